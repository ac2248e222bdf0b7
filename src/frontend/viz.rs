//! Grammar visualization tap.
//!
//! Records parser reductions as a Graphviz digraph:
//!
//! ```text
//! digraph grammar {
//! "program" [style=filled, fillcolor=lightgrey];
//! "primary-1" -> "INT-0" [label="1"];
//! "unary-1" -> "primary-1" [label="2"];
//! }
//! ```
//!
//! In sequenced mode every node name carries a counter suffix so repeated
//! reductions of one nonterminal stay distinct. Reductions happen bottom-up,
//! so a `to` endpoint has already been counted when it appears.
//!
//! The tap never affects compilation: failing to open or write the output
//! disables it with a warning.

use hashbrown::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Name of the highlighted root node.
pub const ROOT_NODE: &str = "program";

/// One recorded edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub step: u64,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" -> \"{}\" [label=\"{}\"];", self.from, self.to, self.step)
    }
}

/// Directed-graph recorder for grammar reductions.
pub struct GrammarTap {
    out: Option<BufWriter<File>>,
    sequenced: bool,
    counts: HashMap<String, u64>,
    step: u64,
}

impl GrammarTap {
    /// A tap that records nothing.
    pub fn disabled() -> Self {
        Self {
            out: None,
            sequenced: true,
            counts: HashMap::new(),
            step: 0,
        }
    }

    /// Open `path` and write the graph header and root node.
    pub fn init(path: &Path, sequenced: bool) -> Self {
        let mut tap = Self::disabled();
        tap.sequenced = sequenced;
        let file = match File::create(path) {
            Ok(file) => file,
            Err(err) => {
                log::warn!(
                    "cannot open visualization output {}: {}; visualization disabled",
                    path.display(),
                    err
                );
                return tap;
            }
        };
        let mut out = BufWriter::new(file);
        let header = writeln!(out, "digraph grammar {{").and_then(|()| {
            writeln!(
                out,
                "\"{}\" [style=filled, fillcolor=lightgrey];",
                ROOT_NODE
            )
        });
        match header {
            Ok(()) => {
                log::debug!("grammar visualization written to {}", path.display());
                tap.out = Some(out);
            }
            Err(err) => log::warn!("visualization disabled: {}", err),
        }
        tap
    }

    pub fn is_enabled(&self) -> bool {
        self.out.is_some()
    }

    pub fn is_sequenced(&self) -> bool {
        self.sequenced
    }

    /// Edges recorded so far.
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Record a reduction of `from` whose principal child is `to`.
    pub fn emit(&mut self, from: &str, to: &str) -> Edge {
        self.step += 1;
        let edge = if self.sequenced {
            let from_count = {
                let count = self.counts.entry(from.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            let to_count = self.counts.get(to).copied().unwrap_or(0);
            Edge {
                from: format!("{}-{}", from, from_count),
                to: format!("{}-{}", to, to_count),
                step: self.step,
            }
        } else {
            Edge {
                from: from.to_string(),
                to: to.to_string(),
                step: self.step,
            }
        };

        if let Some(out) = self.out.as_mut() {
            if let Err(err) = writeln!(out, "{}", edge) {
                log::warn!("visualization disabled: {}", err);
                self.out = None;
            }
        }
        edge
    }

    /// Write the closing brace and release the output.
    ///
    /// Safe to call any number of times, and on a tap that never opened.
    pub fn finalize(&mut self) {
        let Some(mut out) = self.out.take() else {
            return;
        };
        if let Err(err) = writeln!(out, "}}").and_then(|()| out.flush()) {
            log::warn!("failed to finish visualization output: {}", err);
        }
    }
}

impl Drop for GrammarTap {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl fmt::Debug for GrammarTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrammarTap")
            .field("enabled", &self.is_enabled())
            .field("sequenced", &self.sequenced)
            .field("step", &self.step)
            .finish()
    }
}
