//! gotoc command-line entry point.

use clap::Parser;
use gotoc::cli::Cli;

fn main() {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = cli.log_level() {
        logger.filter_level(level);
    }
    logger.format_timestamp(None).init();

    let code = match cli.into_config().and_then(gotoc::compile_file) {
        Ok(result) => {
            log::info!("{}", result.stats);
            result.outcome.exit_code()
        }
        Err(err) => {
            eprintln!("gotoc: {err}");
            if err.exit_code() == 2 {
                eprintln!("For more information, try '--help'.");
            }
            err.exit_code()
        }
    };
    std::process::exit(code);
}
