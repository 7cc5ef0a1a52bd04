//! Pending-mutation buffer with the per-pass batch gate.

use crate::engine::{CancelToken, Command, EngineError, Executor};

/// Append-only list of mutation records for one pass.
///
/// `commit` enforces the gate before flushing anything: a plan larger
/// than `max_changesets` aborts the whole pass. This is the safety net
/// against a corrupted desired state (an accidentally emptied team tree
/// would otherwise delete everything in one pass).
#[derive(Debug)]
pub struct CommandBuffer {
    records: Vec<Command>,
    max_changesets: usize,
}

impl CommandBuffer {
    pub fn new(max_changesets: usize) -> Self {
        Self {
            records: Vec::new(),
            max_changesets,
        }
    }

    /// Start a pass: discard anything left over.
    pub fn begin(&mut self) {
        self.records.clear();
    }

    pub fn record(&mut self, cmd: Command) {
        self.records.push(cmd);
    }

    pub fn records(&self) -> &[Command] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Discard the pending records without flushing them.
    pub fn rollback(&mut self, err: &anyhow::Error) {
        log::error!(
            "rolling back {} pending changes: {:#}",
            self.records.len(),
            err
        );
        self.records.clear();
    }

    /// Flush the buffer through the executor, in emission order.
    ///
    /// A failing command is logged with its context and the next one
    /// still runs; there is no cross-command transactionality on the
    /// remote side, so the operator retries on the next pass.
    pub fn commit(
        &mut self,
        executor: &mut dyn Executor,
        cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        if self.records.len() > self.max_changesets {
            let err = EngineError::GateExceeded {
                planned: self.records.len(),
                max: self.max_changesets,
            };
            log::error!("aborting commit: {}", err);
            self.records.clear();
            return Err(err);
        }

        for cmd in self.records.drain(..) {
            if cancel.is_cancelled() {
                log::warn!("commit interrupted, discarding the remaining plan");
                return Err(EngineError::Cancelled);
            }
            match executor.apply(&cmd) {
                Ok(()) => log::debug!("{} outcome=applied", cmd),
                Err(e) => log::error!("{} outcome=failed error={:#}", cmd, e),
            }
        }
        Ok(())
    }
}
