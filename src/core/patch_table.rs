// This module implements forward-reference backpatching for single-pass emission. The tree
// walker emits control transfers in source order; when a transfer names a label that has not
// been defined yet, it emits a placeholder target and records the emission slot here. Label
// definitions bind a name to the current emission address. Once the walk completes,
// finalize() checks that every recorded label was bound and only then rewrites each
// placeholder, so a failed finalize leaves the emission buffer exactly as it was. The table
// is bounded: recording past the configured capacity is reported as an error instead of
// growing without limit.

//! Forward-reference patch table.

use hashbrown::HashMap;
use thiserror::Error;

use super::error::Span;
use super::session::EmissionBuffer;
use crate::ir::Addr;

/// Label resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{second}: duplicate label `{label}` (first defined at {first})")]
    DuplicateLabel {
        label: String,
        first: Span,
        second: Span,
    },

    #[error("{span}: undefined label `{label}`")]
    UndefinedLabel { label: String, span: Span },

    #[error("too many unresolved forward references (limit {capacity})")]
    CapacityExceeded { capacity: usize },

    #[error("emission buffer is full (limit {capacity} operations)")]
    BufferFull { capacity: usize },

    #[error("slot {slot} does not hold a control transfer")]
    InvalidPatchSlot { slot: Addr },
}

/// A control transfer waiting for its label.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRef {
    slot: Addr,
    label: String,
    span: Span,
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    addr: Addr,
    span: Span,
}

/// Pending forward references plus the label -> address map.
#[derive(Debug)]
pub struct PatchTable {
    pending: Vec<PendingRef>,
    bindings: HashMap<String, Binding>,
    /// Bind order, kept for debug symbols.
    order: Vec<String>,
    capacity: usize,
}

impl PatchTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Vec::new(),
            bindings: HashMap::new(),
            order: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of references still waiting for finalize.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Remember that the transfer at `slot` targets `label`.
    pub fn record_reference(
        &mut self,
        slot: Addr,
        label: &str,
        span: Span,
    ) -> Result<(), ResolveError> {
        if self.pending.len() >= self.capacity {
            return Err(ResolveError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        log::trace!("forward reference to `{}` at slot {}", label, slot);
        self.pending.push(PendingRef {
            slot,
            label: label.to_string(),
            span,
        });
        Ok(())
    }

    /// Bind `label` to `addr`. Labels share one scope, so a second binding fails.
    pub fn bind_label(&mut self, label: &str, addr: Addr, span: Span) -> Result<(), ResolveError> {
        if let Some(existing) = self.bindings.get(label) {
            return Err(ResolveError::DuplicateLabel {
                label: label.to_string(),
                first: existing.span,
                second: span,
            });
        }
        log::trace!("label `{}` bound to {}", label, addr);
        self.bindings.insert(label.to_string(), Binding { addr, span });
        self.order.push(label.to_string());
        Ok(())
    }

    /// Address `label` is bound to, if it has been defined.
    pub fn lookup(&self, label: &str) -> Option<Addr> {
        self.bindings.get(label).map(|b| b.addr)
    }

    /// Bound labels in definition order.
    pub fn bound_labels(&self) -> impl Iterator<Item = (&str, Addr)> {
        self.order
            .iter()
            .filter_map(|name| self.bindings.get(name).map(|b| (name.as_str(), b.addr)))
    }

    /// Rewrite every placeholder with its label's address.
    ///
    /// All references are checked before any slot is written; on error the
    /// buffer is untouched and the pending list is kept.
    pub fn finalize(&mut self, buffer: &mut EmissionBuffer) -> Result<usize, ResolveError> {
        let mut resolved = Vec::with_capacity(self.pending.len());
        for pending in &self.pending {
            let binding = self.bindings.get(&pending.label).ok_or_else(|| {
                ResolveError::UndefinedLabel {
                    label: pending.label.clone(),
                    span: pending.span,
                }
            })?;
            if buffer.get(pending.slot).and_then(|op| op.target()).is_none() {
                return Err(ResolveError::InvalidPatchSlot { slot: pending.slot });
            }
            resolved.push((pending.slot, binding.addr));
        }

        for &(slot, addr) in &resolved {
            buffer.patch(slot, addr)?;
        }
        let count = resolved.len();
        self.pending.clear();
        log::debug!("resolved {} forward references", count);
        Ok(count)
    }
}
