//! Parallel streaming group operator.
//!
//! The host runtime streams row batches into the operator from several
//! worker threads, partitioned without regard to the grouping key, and
//! then invokes the finalize hook concurrently on those same threads.
//! The operator accumulates rows per group in hash-partitioned slots,
//! elects exactly one finalize winner, and has that winner transform and
//! emit every group; all other threads see an immediate "finished".
//!
//! The single-writer finalize is load-bearing: the host's bulk-insert
//! layer hands all threads the same sentinel batch index once the source
//! is exhausted, and concurrent emission would collide there. It also
//! makes the output order deterministic: slot index, then insertion
//! order within the slot.

use crate::error::{Result, TsError};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One accumulated row of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub timestamp: i64,
    pub value: Option<f64>,
}

/// One input row as delivered by the host.
#[derive(Debug, Clone)]
pub struct InputRow {
    pub key: String,
    pub timestamp: i64,
    pub value: Option<f64>,
}

/// Per-group transform run by the finalize winner.
///
/// Rows arrive sorted by timestamp. A transform error for one group is
/// recorded through `error_row` and does not abort the operator.
pub trait GroupTransform: Send + Sync {
    type Out: Send;

    fn apply(&self, key: &str, rows: &[GroupRow]) -> Result<Vec<Self::Out>>;

    fn error_row(&self, key: &str, error: &TsError) -> Self::Out;
}

/// Result of one finalize invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizePoll {
    /// Output chunk filled; call finalize again.
    HaveMoreOutput,
    /// Every slot drained (or this thread lost the election).
    Finished,
}

/// Operator lifecycle, exposed for assertions and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorPhase {
    Collecting,
    Draining,
    Finished,
}

const PHASE_COLLECTING: u8 = 0;
const PHASE_DRAINING: u8 = 1;
const PHASE_FINISHED: u8 = 2;

/// Cooperative cancellation token checked at batch and slot boundaries.
pub type CancelToken = Arc<AtomicBool>;

/// Per-worker-thread state. The host creates one per worker and passes
/// it to every sink/finalize call made on that thread.
#[derive(Debug, Default)]
pub struct WorkerState {
    registered_collecting: bool,
    registered_done: bool,
    is_winner: bool,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }
}

struct Slot<T> {
    groups: HashMap<String, Vec<GroupRow>>,
    group_order: Vec<String>,
    results: std::collections::VecDeque<T>,
    processed: bool,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            groups: HashMap::new(),
            group_order: Vec::new(),
            results: std::collections::VecDeque::new(),
            processed: false,
        }
    }
}

/// Hash-partitioned streaming group accumulator.
pub struct GroupedOperator<T: GroupTransform> {
    slots: Vec<Mutex<Slot<T::Out>>>,
    threads_collecting: AtomicUsize,
    threads_done_collecting: AtomicUsize,
    finalize_claimed: AtomicBool,
    phase: AtomicU8,
    /// Winner-only cursor over the slots during the drain.
    drain_slot: AtomicUsize,
    transform: T,
    output_capacity: usize,
    cancel: Option<CancelToken>,
}

impl<T: GroupTransform> GroupedOperator<T> {
    /// `slot_count` should be the host's max-threads hint;
    /// `output_capacity` is the host's fixed output-chunk size.
    pub fn new(
        transform: T,
        slot_count: usize,
        output_capacity: usize,
        cancel: Option<CancelToken>,
    ) -> Self {
        let slot_count = slot_count.max(1);
        Self {
            slots: (0..slot_count).map(|_| Mutex::new(Slot::new())).collect(),
            threads_collecting: AtomicUsize::new(0),
            threads_done_collecting: AtomicUsize::new(0),
            finalize_claimed: AtomicBool::new(false),
            phase: AtomicU8::new(PHASE_COLLECTING),
            drain_slot: AtomicUsize::new(0),
            transform,
            output_capacity: output_capacity.max(1),
            cancel,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn phase(&self) -> OperatorPhase {
        match self.phase.load(Ordering::SeqCst) {
            PHASE_COLLECTING => OperatorPhase::Collecting,
            PHASE_DRAINING => OperatorPhase::Draining,
            _ => OperatorPhase::Finished,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn slot_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots.len()
    }

    /// Streaming hook: accumulate one batch.
    ///
    /// The batch is bucketed locally first so each touched slot's mutex
    /// is acquired exactly once per batch, regardless of how the host
    /// partitioned rows across threads.
    pub fn sink(&self, worker: &mut WorkerState, batch: &[InputRow]) -> Result<()> {
        if self.is_cancelled() {
            return Err(TsError::Cancelled);
        }

        if !worker.registered_collecting {
            worker.registered_collecting = true;
            self.threads_collecting.fetch_add(1, Ordering::SeqCst);
        }

        // Local bucketing, no locks held.
        let mut buckets: Vec<Vec<&InputRow>> = vec![Vec::new(); self.slots.len()];
        for row in batch {
            buckets[self.slot_index(&row.key)].push(row);
        }

        // One lock acquisition per non-empty bucket.
        for (slot_idx, bucket) in buckets.iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let mut guard = self
                .slots[slot_idx]
                .lock()
                .map_err(|_| TsError::InternalError("Slot mutex poisoned".to_string()))?;
            let slot = &mut *guard;
            for row in bucket {
                use std::collections::hash_map::Entry;
                let group_row = GroupRow {
                    timestamp: row.timestamp,
                    value: row.value,
                };
                match slot.groups.entry(row.key.clone()) {
                    Entry::Occupied(mut e) => e.get_mut().push(group_row),
                    Entry::Vacant(e) => {
                        slot.group_order.push(row.key.clone());
                        e.insert(vec![group_row]);
                    }
                }
            }
        }

        Ok(())
    }

    /// Finalize hook. The host calls this repeatedly, on every worker
    /// thread, with a fresh output buffer each time; `out` receives at
    /// most `output_capacity` rows per call.
    pub fn finalize(&self, worker: &mut WorkerState, out: &mut Vec<T::Out>) -> Result<FinalizePoll> {
        // Barrier arrival: a collector's first finalize call announces
        // that its stream is complete. Release pairs with the winner's
        // acquire loop below.
        if worker.registered_collecting && !worker.registered_done {
            worker.registered_done = true;
            self.threads_done_collecting.fetch_add(1, Ordering::SeqCst);
        }

        // Single-writer election.
        if !worker.is_winner {
            if self
                .finalize_claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                worker.is_winner = true;
            } else {
                return Ok(FinalizePoll::Finished);
            }
        }

        // The winner waits until every thread that ever collected has
        // checked in; after that no more rows can arrive.
        while self.threads_done_collecting.load(Ordering::SeqCst)
            != self.threads_collecting.load(Ordering::SeqCst)
        {
            if self.is_cancelled() {
                return Err(TsError::Cancelled);
            }
            std::thread::yield_now();
        }

        self.phase.store(PHASE_DRAINING, Ordering::SeqCst);

        while self.drain_slot.load(Ordering::SeqCst) < self.slots.len() {
            if self.is_cancelled() {
                return Err(TsError::Cancelled);
            }

            let slot_idx = self.drain_slot.load(Ordering::SeqCst);
            let mut slot = self
                .slots[slot_idx]
                .lock()
                .map_err(|_| TsError::InternalError("Slot mutex poisoned".to_string()))?;

            if !slot.processed {
                let order = std::mem::take(&mut slot.group_order);
                for key in &order {
                    let mut rows = slot.groups.remove(key).unwrap_or_default();
                    rows.sort_by_key(|r| r.timestamp);
                    match self.transform.apply(key, &rows) {
                        Ok(produced) => slot.results.extend(produced),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => slot.results.push_back(self.transform.error_row(key, &e)),
                    }
                }
                slot.processed = true;
            }

            // Drain within the host's chunk capacity.
            while out.len() < self.output_capacity {
                match slot.results.pop_front() {
                    Some(row) => out.push(row),
                    None => break,
                }
            }

            if slot.results.is_empty() {
                self.drain_slot.fetch_add(1, Ordering::SeqCst);
            }

            if out.len() >= self.output_capacity
                && self.drain_slot.load(Ordering::SeqCst) < self.slots.len()
            {
                return Ok(FinalizePoll::HaveMoreOutput);
            }
        }

        self.phase.store(PHASE_FINISHED, Ordering::SeqCst);
        Ok(FinalizePoll::Finished)
    }
}
