//! Coordinator-side bookkeeping of free and allocated chunks.
//!
//! The ledger mirrors the pools of every worker: free counts per worker and
//! class, plus the class of every allocated chunk keyed by `(worker, chunk)`.
//! Allocation is planned here before anything is dispatched, so a request
//! that cannot be met leaves both the ledger and the workers untouched.

use qframe_engine::FrameConfig;
use qframe_ir::{AddressLayout, QubitHandle};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::{BackendError, BackendResult};

/// Frames to request from one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Worker id.
    pub worker: u32,
    /// Number of frames.
    pub count: usize,
}

/// Free and allocated chunks across all workers.
#[derive(Debug, Clone)]
pub struct CapacityLedger {
    layout: AddressLayout,
    free: Vec<FrameConfig>,
    allocations: FxHashMap<(u32, u32), (u32, usize)>,
}

impl CapacityLedger {
    /// Start from the initial partition of every worker, all chunks free.
    pub fn new(layout: AddressLayout, workers: Vec<FrameConfig>) -> Self {
        Self {
            layout,
            free: workers,
            allocations: FxHashMap::default(),
        }
    }

    /// Number of workers tracked.
    pub fn num_workers(&self) -> usize {
        self.free.len()
    }

    /// Free chunks per class, summed over all workers.
    pub fn free(&self) -> FrameConfig {
        let mut total = FrameConfig::new();
        for worker in &self.free {
            total.merge(worker);
        }
        total
    }

    /// Free chunks of one worker.
    pub fn worker_free(&self, worker: u32) -> Option<&FrameConfig> {
        self.free.get(worker as usize)
    }

    /// Number of chunks currently handed out.
    pub fn allocated_chunks(&self) -> usize {
        self.allocations.len()
    }

    /// Plan `count` frames of class `(dim, size)` over the workers.
    ///
    /// Walks the workers in id order, taking as much as each can give. The
    /// planned frames are reserved; on failure nothing is reserved.
    pub fn figure_allocation(
        &mut self,
        size: usize,
        count: usize,
        dim: u32,
    ) -> BackendResult<Vec<Reservation>> {
        let mut plan = Vec::new();
        let mut remaining = count;
        for (worker, free) in self.free.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let take = free.get(dim, size).min(remaining);
            if take > 0 {
                plan.push(Reservation {
                    worker: worker as u32,
                    count: take,
                });
                remaining -= take;
            }
        }
        if remaining > 0 {
            return Err(BackendError::CapacityExhausted {
                dim,
                size,
                requested: count,
                available: count - remaining,
            });
        }

        for r in &plan {
            let free = &mut self.free[r.worker as usize];
            let left = free.get(dim, size) - r.count;
            free.set(dim, size, left);
        }
        Ok(plan)
    }

    /// Give back reservations that were not turned into allocations.
    pub fn release(&mut self, plan: &[Reservation], size: usize, dim: u32) {
        for r in plan {
            if let Some(free) = self.free.get_mut(r.worker as usize) {
                free.add(dim, size, r.count);
            }
        }
    }

    /// Remember the chunks behind frames granted by `worker`.
    pub fn record(&mut self, worker: u32, dim: u32, size: usize, frames: &[Vec<QubitHandle>]) {
        for frame in frames {
            let Some(first) = frame.first() else {
                continue;
            };
            match self.layout.decode(first) {
                Ok(addr) => {
                    self.allocations.insert((worker, addr.chunk), (dim, size));
                }
                Err(err) => warn!(worker, %first, error = %err, "Granted handle does not decode"),
            }
        }
    }

    /// Split handles by worker, in order of first appearance.
    ///
    /// Handles that do not decode, do not name a tracked allocation, or name
    /// a qubit added by extension (past the frame size) are returned
    /// separately.
    pub fn figure_deallocation(
        &self,
        handles: &[QubitHandle],
    ) -> (Vec<(u32, Vec<QubitHandle>)>, Vec<QubitHandle>) {
        let mut groups: Vec<(u32, Vec<QubitHandle>)> = Vec::new();
        let mut unknown = Vec::new();
        for handle in handles {
            let tracked = self.layout.decode(handle).ok().filter(|addr| {
                self.allocations
                    .get(&addr.chunk_key())
                    .is_some_and(|&(_, size)| (addr.local as usize) < size)
            });
            let Some(addr) = tracked else {
                unknown.push(handle.clone());
                continue;
            };
            match groups.iter_mut().find(|(w, _)| *w == addr.owner) {
                Some((_, list)) => list.push(handle.clone()),
                None => groups.push((addr.owner, vec![handle.clone()])),
            }
        }
        (groups, unknown)
    }

    /// Return chunks freed by `worker` to the free counts, each once.
    pub fn credit(&mut self, worker: u32, freed: &[u32]) {
        for &chunk in freed {
            match self.allocations.remove(&(worker, chunk)) {
                Some((dim, size)) => {
                    if let Some(free) = self.free.get_mut(worker as usize) {
                        free.add(dim, size, 1);
                    }
                }
                None => warn!(worker, chunk, "Worker freed an untracked chunk"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qframe_ir::Address;

    fn ledger() -> CapacityLedger {
        let frames = FrameConfig::new().with(2, 2, 3).split(2);
        CapacityLedger::new(AddressLayout::segmented(), frames)
    }

    fn handle(worker: u32, chunk: u32, local: u32) -> QubitHandle {
        AddressLayout::segmented()
            .encode(&Address::new(worker, 2, chunk, local))
            .unwrap()
    }

    #[test]
    fn test_greedy_plan_in_worker_order() {
        let mut ledger = ledger();
        let plan = ledger.figure_allocation(2, 3, 2).unwrap();
        assert_eq!(
            plan,
            vec![
                Reservation { worker: 0, count: 2 },
                Reservation { worker: 1, count: 1 }
            ]
        );
        assert_eq!(ledger.free().get(2, 2), 0);
    }

    #[test]
    fn test_exhaustion_leaves_ledger_unchanged() {
        let mut ledger = ledger();
        let before = ledger.free();
        let err = ledger.figure_allocation(2, 4, 2).unwrap_err();
        assert!(matches!(
            err,
            BackendError::CapacityExhausted {
                requested: 4,
                available: 3,
                ..
            }
        ));
        assert_eq!(ledger.free(), before);
        assert!(ledger.figure_allocation(5, 1, 2).is_err());
        assert_eq!(ledger.free(), before);
    }

    #[test]
    fn test_release_restores_plan() {
        let mut ledger = ledger();
        let before = ledger.free();
        let plan = ledger.figure_allocation(2, 2, 2).unwrap();
        ledger.release(&plan, 2, 2);
        assert_eq!(ledger.free(), before);
    }

    #[test]
    fn test_deallocation_credits_each_chunk_once() {
        let mut ledger = ledger();
        ledger.figure_allocation(2, 2, 2).unwrap();
        ledger.record(0, 2, 2, &[vec![handle(0, 0, 0), handle(0, 0, 1)]]);
        ledger.record(0, 2, 2, &[vec![handle(0, 1, 0), handle(0, 1, 1)]]);
        assert_eq!(ledger.allocated_chunks(), 2);

        let request = [handle(0, 0, 0), handle(0, 0, 1), handle(1, 0, 0)];
        let (groups, unknown) = ledger.figure_deallocation(&request);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(unknown, vec![handle(1, 0, 0)]);

        ledger.credit(0, &[0]);
        ledger.credit(0, &[0]);
        assert_eq!(ledger.allocated_chunks(), 1);
        assert_eq!(ledger.worker_free(0).unwrap().get(2, 2), 1);
    }

    #[test]
    fn test_extended_qubits_are_not_tracked() {
        let mut ledger = ledger();
        ledger.figure_allocation(2, 1, 2).unwrap();
        ledger.record(0, 2, 2, &[vec![handle(0, 0, 0), handle(0, 0, 1)]]);

        let request = [handle(0, 0, 0), handle(0, 0, 2), handle(0, 0, 3)];
        let (groups, unknown) = ledger.figure_deallocation(&request);
        assert_eq!(groups, vec![(0, vec![handle(0, 0, 0)])]);
        assert_eq!(unknown, vec![handle(0, 0, 2), handle(0, 0, 3)]);
    }
}
