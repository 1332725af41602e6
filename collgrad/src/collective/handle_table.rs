use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{CollError, Result};
use crate::tensor::Tensor;
use crate::types::Handle;

/// Operand references kept alive while the engine works on them.
///
/// Dropping the entry is what lets the caller's buffers be reclaimed, so an
/// entry must outlive the engine's last access to any of its tensors.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
    /// Extra tensors the engine reads, e.g. all-to-all split sizes.
    pub aux: Vec<Tensor>,
    /// True for grouped submissions, whose result is a list.
    pub grouped: bool,
}

impl PendingOperation {
    pub fn single(input: Tensor, output: Tensor) -> Self {
        Self {
            inputs: vec![input],
            outputs: vec![output],
            aux: Vec::new(),
            grouped: false,
        }
    }

    pub fn group(inputs: Vec<Tensor>, outputs: Vec<Tensor>) -> Self {
        Self {
            inputs,
            outputs,
            aux: Vec::new(),
            grouped: true,
        }
    }

    pub fn with_aux(mut self, aux: Tensor) -> Self {
        self.aux.push(aux);
        self
    }
}

/// Registry of in-flight operations, keyed by engine handle.
///
/// Distinct handles may be registered and consumed concurrently. A single
/// handle is consumed at most once; later lookups see no entry.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: Mutex<HashMap<Handle, PendingOperation>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the operands of a freshly submitted operation.
    ///
    /// A second registration under the same handle means the engine reused
    /// a live handle.
    pub fn register(&self, handle: Handle, op: PendingOperation) -> Result<()> {
        let mut entries = self.lock()?;
        if entries.contains_key(&handle) {
            return Err(CollError::HandleConflict { handle });
        }
        entries.insert(handle, op);
        Ok(())
    }

    /// Remove and return the entry, or `None` if it was already consumed.
    pub fn consume(&self, handle: Handle) -> Result<Option<PendingOperation>> {
        Ok(self.lock()?.remove(&handle))
    }

    pub fn contains(&self, handle: Handle) -> Result<bool> {
        Ok(self.lock()?.contains_key(&handle))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// Drop every entry, returning how many were discarded.
    pub fn clear(&self) -> Result<usize> {
        let mut entries = self.lock()?;
        let n = entries.len();
        entries.clear();
        Ok(n)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Handle, PendingOperation>>> {
        self.entries
            .lock()
            .map_err(|_| CollError::LockPoisoned("handle table"))
    }
}
