//! Bulk insertion of known keys, e.g. when loading a saved volume.
//!
//! Insertion never blocks, so a key whose bucket is locked by another worker fails for that round. `upload_keys` retries
//! the failed keys in later rounds, releasing all locks in between, up to the volume's `upload_attempts`.

use crate::{SpatialHashTable, TsdfVolume, VolumeError, VoxelBlock};

use scalable_tsdf_core::prelude::*;

use rayon::prelude::*;
use tracing::{info, warn};

/// The outcome of a bulk insertion.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UploadReport {
    /// The slot of each input key, in input order. `None` for keys that could not be inserted.
    pub slots: Vec<Option<u32>>,
    /// The number of rounds that were run.
    pub rounds: usize,
    /// The number of keys that could not be inserted.
    pub unresolved: usize,
}

impl UploadReport {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.unresolved == 0
    }

    /// Converts an incomplete upload into `VolumeError::UnresolvedBlocks`.
    pub fn into_result(self) -> Result<Self, VolumeError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(VolumeError::UnresolvedBlocks(self.unresolved))
        }
    }
}

/// Inserts `keys` into `table` with up to `max_rounds` rounds.
///
/// The loop stops early when every key is resolved, or when a round makes no progress and the table can't allocate any
/// more slots.
pub fn upload_keys_into(
    table: &SpatialHashTable,
    keys: &[Point3i],
    max_rounds: usize,
) -> UploadReport {
    let mut slots = vec![None; keys.len()];
    let mut pending: Vec<usize> = (0..keys.len()).collect();

    let mut rounds = 0;
    while !pending.is_empty() && rounds < max_rounds {
        rounds += 1;
        table.reset_locks();

        let attempts: Vec<_> = pending
            .par_iter()
            .map(|i| (*i, table.try_insert(keys[*i]).ok()))
            .collect();
        let attempted = attempts.len();
        pending.clear();
        for (i, slot) in attempts {
            match slot {
                Some(s) => slots[i] = Some(s),
                None => pending.push(i),
            }
        }
        let resolved = attempted - pending.len();
        info!("{} / {} blocks uploaded", resolved, attempted);

        if resolved == 0 && table.is_exhausted() {
            break;
        }
    }

    if !pending.is_empty() {
        warn!(
            "{} of {} blocks could not be uploaded after {} rounds",
            pending.len(),
            keys.len(),
            rounds
        );
    }

    UploadReport {
        slots,
        rounds,
        unresolved: pending.len(),
    }
}

impl TsdfVolume {
    /// Allocates a block for each of `keys`. Duplicate keys resolve to the same slot.
    ///
    /// The `allocations_per_round` quota only applies while this runs. Touching blocks during integration is never
    /// limited by it.
    pub fn upload_keys(&mut self, keys: &[Point3i]) -> UploadReport {
        let quota = self.allocations_per_round();
        let max_rounds = self.upload_attempts();
        let table = self.table_mut();
        table.set_allocations_per_round(quota);
        let report = upload_keys_into(table, keys, max_rounds);
        table.set_allocations_per_round(None);

        report
    }

    /// Allocates a block for each of `keys` and copies in the matching voxels of `blocks`. If a key is repeated, the last
    /// of its blocks wins.
    pub fn upload_volumes(
        &mut self,
        keys: &[Point3i],
        blocks: &[VoxelBlock],
    ) -> Result<UploadReport, VolumeError> {
        if keys.len() != blocks.len() {
            return Err(VolumeError::LengthMismatch {
                keys: keys.len(),
                blocks: blocks.len(),
            });
        }
        let expected = self.params().block_volume();
        for block in blocks.iter() {
            if block.num_voxels() != Some(expected) {
                return Err(VolumeError::BlockSizeMismatch {
                    expected,
                    found: block.tsdf.len().max(block.weight.len()).max(block.color.len()),
                });
            }
        }

        let report = self.upload_keys(keys);
        let pool = self.pool_mut();
        for (slot, block) in report.slots.iter().zip(blocks.iter()) {
            if let Some(slot) = slot {
                pool.block_mut(*slot).copy_from(block);
            }
        }

        Ok(report)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
