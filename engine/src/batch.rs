//! Splitting id sets into bounded batches for cloud lookups.

use crate::error::{Error, Result};
use crate::RecordId;

/// Ids split into batches of at most `size`, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    batches: Vec<Vec<RecordId>>,
}

impl BatchPlan {
    pub fn new(ids: &[RecordId], size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidBatchSize);
        }
        Ok(Self {
            batches: ids.chunks(size).map(<[RecordId]>::to_vec).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batches(&self) -> &[Vec<RecordId>] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<Vec<RecordId>> {
        self.batches
    }
}
