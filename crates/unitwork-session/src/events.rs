//! Lifecycle callbacks.
//!
//! Hooks run synchronously inside the owning unit of work, in registration
//! order. `before_flush` and `before_commit` hooks can veto by returning an
//! error: the first error stops the remaining hooks and aborts the operation
//! before any statement runs.

use crate::queue::FlushOutcome;
use std::fmt;
use unitwork_core::Result;

type VetoHook = Box<dyn FnMut() -> Result<()> + Send>;
type FlushHook = Box<dyn FnMut(&FlushOutcome) + Send>;
type PlainHook = Box<dyn FnMut() + Send>;

/// Registered lifecycle hooks for one unit of work.
#[derive(Default)]
pub struct EventRegistry {
    before_flush: Vec<VetoHook>,
    after_flush: Vec<FlushHook>,
    before_commit: Vec<VetoHook>,
    after_commit: Vec<PlainHook>,
    after_rollback: Vec<PlainHook>,
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run before each flush computes its actions. An error vetoes the flush.
    pub fn on_before_flush(&mut self, hook: impl FnMut() -> Result<()> + Send + 'static) {
        self.before_flush.push(Box::new(hook));
    }

    /// Run after each successful flush, with its row counts.
    pub fn on_after_flush(&mut self, hook: impl FnMut(&FlushOutcome) + Send + 'static) {
        self.after_flush.push(Box::new(hook));
    }

    /// Run before commit, ahead of the commit-time flush. An error vetoes
    /// the commit.
    pub fn on_before_commit(&mut self, hook: impl FnMut() -> Result<()> + Send + 'static) {
        self.before_commit.push(Box::new(hook));
    }

    /// Run after a successful commit.
    pub fn on_after_commit(&mut self, hook: impl FnMut() + Send + 'static) {
        self.after_commit.push(Box::new(hook));
    }

    /// Run after a rollback.
    pub fn on_after_rollback(&mut self, hook: impl FnMut() + Send + 'static) {
        self.after_rollback.push(Box::new(hook));
    }

    pub(crate) fn emit_before_flush(&mut self) -> Result<()> {
        for hook in &mut self.before_flush {
            hook()?;
        }
        Ok(())
    }

    pub(crate) fn emit_after_flush(&mut self, outcome: &FlushOutcome) {
        for hook in &mut self.after_flush {
            hook(outcome);
        }
    }

    pub(crate) fn emit_before_commit(&mut self) -> Result<()> {
        for hook in &mut self.before_commit {
            hook()?;
        }
        Ok(())
    }

    pub(crate) fn emit_after_commit(&mut self) {
        for hook in &mut self.after_commit {
            hook();
        }
    }

    pub(crate) fn emit_after_rollback(&mut self) {
        for hook in &mut self.after_rollback {
            hook();
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("before_flush", &self.before_flush.len())
            .field("after_flush", &self.after_flush.len())
            .field("before_commit", &self.before_commit.len())
            .field("after_commit", &self.after_commit.len())
            .field("after_rollback", &self.after_rollback.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use unitwork_core::{Error, SessionErrorKind};

    #[test]
    fn test_hooks_run_in_registration_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = EventRegistry::new();

        let first = Arc::clone(&calls);
        events.on_before_flush(move || {
            assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
            Ok(())
        });
        let second = Arc::clone(&calls);
        events.on_before_flush(move || {
            assert_eq!(second.fetch_add(1, Ordering::SeqCst), 1);
            Ok(())
        });

        events.emit_before_flush().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_veto_stops_remaining_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = EventRegistry::new();

        events.on_before_commit(|| {
            Err(Error::session(SessionErrorKind::Failed, "vetoed"))
        });
        let later = Arc::clone(&calls);
        events.on_before_commit(move || {
            later.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(events.emit_before_commit().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_after_flush_sees_outcome() {
        let rows = Arc::new(AtomicUsize::new(0));
        let mut events = EventRegistry::new();
        let sink = Arc::clone(&rows);
        events.on_after_flush(move |outcome| {
            sink.store(outcome.total(), Ordering::SeqCst);
        });

        events.emit_after_flush(&FlushOutcome {
            inserted: 2,
            updated: 1,
            deleted: 1,
        });
        assert_eq!(rows.load(Ordering::SeqCst), 4);
    }
}
