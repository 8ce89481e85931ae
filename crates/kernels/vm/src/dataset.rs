//! Dataset metadata and the persistent ID allocator.
//!
//! A [`DataSetMeta`] is owned by the caller, outlives invocations and is
//! shared by every batch of one. All mutation goes through atomics, except
//! the free-ID stack, which is the VM's only lock.
//!
//! # ID Protocol
//!
//! ```text
//! acquire_id  ── lock ──► pop N ids from the free stack
//! update_id   index != NONE ──► id_table[id] = index, raise local max
//!             index == NONE ──► id_table[id] = NONE, stage id in BatchLocalState
//! finish_chunk ── lock ──► push staged ids back; merge local max into max_used_id
//! ```
//!
//! Every acquired ID is therefore either committed to the table or back on
//! the free stack once the batch finishes.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::error;

use crate::bytecode::DataSetShape;

/// Sentinel for "no index" and "no ID".
pub const INDEX_NONE: i32 = -1;

/// Shared state of one logical dataset.
#[derive(Debug)]
pub struct DataSetMeta {
    /// Read-only input columns, raw 32-bit values.
    inputs: Vec<Vec<u32>>,
    /// Output columns, one cell per output index.
    outputs: Vec<Vec<AtomicU32>>,
    /// Last output index handed out; starts at [`INDEX_NONE`].
    access_index: AtomicI32,
    /// ID to current instance index.
    id_table: Vec<AtomicI32>,
    /// IDs available for acquisition, popped from the back.
    free_ids: Mutex<Vec<i32>>,
    /// Highest ID committed so far.
    max_used_id: AtomicI32,
    /// Value written to the tag register by `acquire_id`.
    id_acquire_tag: i32,
}

impl Default for DataSetMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSetMeta {
    /// Dataset with no columns and no IDs.
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            access_index: AtomicI32::new(INDEX_NONE),
            id_table: Vec::new(),
            free_ids: Mutex::new(Vec::new()),
            max_used_id: AtomicI32::new(INDEX_NONE),
            id_acquire_tag: 0,
        }
    }

    /// Append an input column of raw bits.
    pub fn with_input_bits(mut self, column: Vec<u32>) -> Self {
        self.inputs.push(column);
        self
    }

    /// Append a float input column.
    pub fn with_input_f32(self, column: &[f32]) -> Self {
        self.with_input_bits(column.iter().map(|value| value.to_bits()).collect())
    }

    /// Append an integer input column.
    pub fn with_input_i32(self, column: &[i32]) -> Self {
        self.with_input_bits(column.iter().map(|&value| value as u32).collect())
    }

    /// Allocate `count` output columns of `capacity` cells each.
    pub fn with_outputs(mut self, count: usize, capacity: usize) -> Self {
        self.outputs = (0..count)
            .map(|_| (0..capacity).map(|_| AtomicU32::new(0)).collect())
            .collect();
        self
    }

    /// Size the ID table and fill the free stack with IDs `0..capacity`.
    ///
    /// IDs are handed out in ascending order.
    pub fn with_id_capacity(mut self, capacity: usize) -> Self {
        self.id_table = (0..capacity).map(|_| AtomicI32::new(INDEX_NONE)).collect();
        self.free_ids = Mutex::new((0..capacity as i32).rev().collect());
        self
    }

    /// Set the value `acquire_id` writes to its tag register.
    pub fn with_acquire_tag(mut self, tag: i32) -> Self {
        self.id_acquire_tag = tag;
        self
    }

    /// Column counts, for validation.
    pub fn shape(&self) -> DataSetShape {
        DataSetShape {
            inputs: self.inputs.len(),
            outputs: self.outputs.len(),
        }
    }

    // ========================================================================
    // Inputs & Outputs
    // ========================================================================

    /// Element `index` of input `column`, or 0 past the end of the column.
    #[inline]
    pub fn input_bits(&self, column: u16, index: usize) -> u32 {
        self.inputs[column as usize]
            .get(index)
            .copied()
            .unwrap_or_default()
    }

    /// Store `bits` at `index` of output `column`.
    ///
    /// # Panics
    ///
    /// If `index` is past the column's capacity.
    #[inline]
    pub fn write_output(&self, column: u16, index: usize, bits: u32) {
        self.outputs[column as usize][index].store(bits, Ordering::Relaxed);
    }

    /// Cells per output column.
    pub fn output_capacity(&self) -> usize {
        self.outputs.first().map_or(0, Vec::len)
    }

    /// Snapshot of output `column` as raw bits.
    pub fn output_bits(&self, column: usize) -> Vec<u32> {
        self.outputs[column]
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }

    /// Snapshot of output `column` as floats.
    pub fn output_f32(&self, column: usize) -> Vec<f32> {
        self.output_bits(column).into_iter().map(f32::from_bits).collect()
    }

    /// Snapshot of output `column` as integers.
    pub fn output_i32(&self, column: usize) -> Vec<i32> {
        self.output_bits(column)
            .into_iter()
            .map(|bits| bits as i32)
            .collect()
    }

    /// Output indices handed out since the last reset.
    pub fn written_count(&self) -> usize {
        (self.access_index.load(Ordering::Acquire) + 1).max(0) as usize
    }

    /// Rewind the output counter to [`INDEX_NONE`].
    pub fn reset_output_counter(&self) {
        self.access_index.store(INDEX_NONE, Ordering::Release);
    }

    /// Hand out the next output index.
    #[inline]
    pub fn acquire_index(&self, parallel: bool) -> i32 {
        self.acquire_indices(1, parallel) + 1
    }

    /// Reserve `count` consecutive output indices.
    ///
    /// Returns the counter value before the reservation, so the first
    /// reserved index is the return value plus one.
    #[inline]
    pub fn acquire_indices(&self, count: i32, parallel: bool) -> i32 {
        if parallel {
            self.access_index.fetch_add(count, Ordering::AcqRel)
        } else {
            let previous = self.access_index.load(Ordering::Relaxed);
            self.access_index.store(previous + count, Ordering::Relaxed);
            previous
        }
    }

    // ========================================================================
    // Persistent IDs
    // ========================================================================

    /// Tag written alongside acquired IDs.
    pub fn acquire_tag(&self) -> i32 {
        self.id_acquire_tag
    }

    /// Pop one free ID into each slot of `ids`.
    ///
    /// Slots the free stack cannot fill get [`INDEX_NONE`]; running dry is a
    /// capacity bug in the caller and is logged.
    pub fn acquire_ids(&self, ids: &mut [i32]) {
        let mut free = self.lock_free_ids();
        let mut missing = 0usize;
        for slot in ids.iter_mut() {
            *slot = free.pop().unwrap_or_else(|| {
                missing += 1;
                INDEX_NONE
            });
        }
        drop(free);
        if missing > 0 {
            error!(
                missing,
                requested = ids.len(),
                "free id stack exhausted; id capacity is too small"
            );
        }
    }

    /// Commit `index` as the current position of `id`, or release `id` when
    /// `index` is [`INDEX_NONE`].
    ///
    /// IDs outside the table (including [`INDEX_NONE`] from a failed
    /// acquisition) are ignored.
    #[inline]
    pub fn update_id(&self, local: &mut BatchLocalState, id: i32, index: i32) {
        let Some(cell) = usize::try_from(id).ok().and_then(|id| self.id_table.get(id)) else {
            return;
        };
        if index == INDEX_NONE {
            local.ids_to_free.push(id);
            cell.store(INDEX_NONE, Ordering::Relaxed);
        } else {
            cell.store(index, Ordering::Relaxed);
            local.max_id = local.max_id.max(id);
        }
    }

    /// Publish a batch's staged releases and max ID.
    ///
    /// `parallel` selects a compare-and-swap merge of the max; sequential
    /// runs use a plain load/store.
    pub fn finish_chunk(&self, local: &mut BatchLocalState, parallel: bool) {
        if !local.ids_to_free.is_empty() {
            self.lock_free_ids().append(&mut local.ids_to_free);
        }

        let local_max = std::mem::replace(&mut local.max_id, INDEX_NONE);
        if parallel {
            let mut current = self.max_used_id.load(Ordering::Relaxed);
            while local_max > current {
                match self.max_used_id.compare_exchange_weak(
                    current,
                    local_max,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        } else {
            let current = self.max_used_id.load(Ordering::Relaxed);
            self.max_used_id
                .store(current.max(local_max), Ordering::Relaxed);
        }
    }

    /// Snapshot of the ID table.
    pub fn id_table(&self) -> Vec<i32> {
        self.id_table
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }

    /// Snapshot of the free stack, bottom first.
    pub fn free_ids(&self) -> Vec<i32> {
        self.lock_free_ids().clone()
    }

    /// Highest ID committed so far, or [`INDEX_NONE`].
    pub fn max_used_id(&self) -> i32 {
        self.max_used_id.load(Ordering::Acquire)
    }

    fn lock_free_ids(&self) -> MutexGuard<'_, Vec<i32>> {
        self.free_ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-batch, per-dataset staging merged by [`DataSetMeta::finish_chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLocalState {
    ids_to_free: Vec<i32>,
    max_id: i32,
}

impl Default for BatchLocalState {
    fn default() -> Self {
        Self {
            ids_to_free: Vec::new(),
            max_id: INDEX_NONE,
        }
    }
}

impl BatchLocalState {
    /// Empty staging with room for `capacity` releases.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids_to_free: Vec::with_capacity(capacity),
            max_id: INDEX_NONE,
        }
    }

    /// IDs released but not yet returned to the free stack.
    pub fn pending_releases(&self) -> &[i32] {
        &self.ids_to_free
    }

    /// Highest ID committed by this batch so far.
    pub fn max_id(&self) -> i32 {
        self.max_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_counter_starts_at_none() {
        let data_set = DataSetMeta::new().with_outputs(1, 8);
        assert_eq!(data_set.written_count(), 0);
        assert_eq!(data_set.acquire_index(false), 0);
        assert_eq!(data_set.acquire_index(true), 1);
        assert_eq!(data_set.acquire_indices(3, true), 1);
        assert_eq!(data_set.written_count(), 5);
        data_set.reset_output_counter();
        assert_eq!(data_set.written_count(), 0);
    }

    #[test]
    fn inputs_read_zero_past_the_column() {
        let data_set = DataSetMeta::new().with_input_f32(&[1.5, 2.5]);
        assert_eq!(f32::from_bits(data_set.input_bits(0, 1)), 2.5);
        assert_eq!(data_set.input_bits(0, 2), 0);
        assert_eq!(data_set.shape(), DataSetShape { inputs: 1, outputs: 0 });
    }

    #[test]
    fn ids_come_out_in_ascending_order() {
        let data_set = DataSetMeta::new().with_id_capacity(4);
        let mut ids = [0; 3];
        data_set.acquire_ids(&mut ids);
        assert_eq!(ids, [0, 1, 2]);
        assert_eq!(data_set.free_ids(), vec![3]);
    }

    #[test]
    fn exhausted_free_stack_yields_index_none() {
        let data_set = DataSetMeta::new().with_id_capacity(1);
        let mut ids = [7; 3];
        data_set.acquire_ids(&mut ids);
        assert_eq!(ids, [0, INDEX_NONE, INDEX_NONE]);
    }

    #[test]
    fn released_ids_return_only_at_finish() {
        let data_set = DataSetMeta::new().with_id_capacity(3);
        let mut ids = [0; 3];
        data_set.acquire_ids(&mut ids);

        let mut local = BatchLocalState::default();
        data_set.update_id(&mut local, 0, 5);
        data_set.update_id(&mut local, 1, INDEX_NONE);
        data_set.update_id(&mut local, 2, 6);
        data_set.update_id(&mut local, INDEX_NONE, 7);

        assert_eq!(data_set.id_table(), vec![5, INDEX_NONE, 6]);
        assert_eq!(local.pending_releases(), &[1]);
        assert!(data_set.free_ids().is_empty());
        assert_eq!(data_set.max_used_id(), INDEX_NONE);

        data_set.finish_chunk(&mut local, true);
        assert_eq!(data_set.free_ids(), vec![1]);
        assert_eq!(data_set.max_used_id(), 2);
        assert_eq!(local, BatchLocalState::default());

        let mut again = [0; 1];
        data_set.acquire_ids(&mut again);
        assert_eq!(again, [1]);
    }

    #[test]
    fn max_merge_never_lowers_the_high_water_mark() {
        let data_set = DataSetMeta::new().with_id_capacity(8);
        let mut high = BatchLocalState::default();
        data_set.update_id(&mut high, 6, 0);
        data_set.finish_chunk(&mut high, false);

        let mut low = BatchLocalState::default();
        data_set.update_id(&mut low, 2, 1);
        data_set.finish_chunk(&mut low, true);
        data_set.finish_chunk(&mut BatchLocalState::default(), false);
        assert_eq!(data_set.max_used_id(), 6);
    }

    #[test]
    fn outputs_snapshot_typed_views() {
        let data_set = DataSetMeta::new().with_outputs(2, 2);
        data_set.write_output(0, 1, 2.0f32.to_bits());
        data_set.write_output(1, 0, (-3i32) as u32);
        assert_eq!(data_set.output_f32(0), vec![0.0, 2.0]);
        assert_eq!(data_set.output_i32(1), vec![-3, 0]);
        assert_eq!(data_set.output_capacity(), 2);
    }
}
