// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Primary-key batch allocation
//!
//! Identifiers for a whole insertion are fetched in one round trip and then
//! handed out strictly in order.

use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::{Sequence, Storage};

/// A block of pre-fetched identifiers consumed in order.
#[derive(Debug, Clone)]
pub struct IdBlock {
    sequence: Sequence,
    ids: Vec<i64>,
    cursor: usize,
}

impl IdBlock {
    /// Fetch exactly `count` identifiers in one round trip.
    pub fn allocate(storage: &dyn Storage, sequence: Sequence, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::Allocation(format!("zero identifiers requested from {:?}", sequence)));
        }
        let ids = storage.next_ids(sequence, count)?;
        if ids.len() != count {
            return Err(Error::Allocation(format!(
                "{:?} returned {} identifiers, {} requested",
                sequence,
                ids.len(),
                count
            )));
        }
        debug!(sequence = ?sequence, count, first = ids[0], "Identifier block allocated");
        Ok(Self {
            sequence,
            ids,
            cursor: 0,
        })
    }

    /// Next identifier in traversal order.
    pub fn next(&mut self) -> Result<i64> {
        let id = self.ids.get(self.cursor).copied().ok_or_else(|| {
            Error::Allocation(format!(
                "{:?} block of {} identifiers exhausted",
                self.sequence,
                self.ids.len()
            ))
        })?;
        self.cursor += 1;
        Ok(id)
    }

    /// Identifiers not yet handed out.
    pub fn remaining(&self) -> usize {
        self.ids.len() - self.cursor
    }

    /// All identifiers of the block, in allocation order.
    pub fn as_slice(&self) -> &[i64] {
        &self.ids
    }
}
