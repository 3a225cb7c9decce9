//! Coordinator driving a fixed set of worker threads.
//!
//! Each worker owns one partition of the chunks. The coordinator keeps a
//! [`CapacityLedger`] mirroring those partitions, splits every request into
//! at most one command per worker and merges the replies back into caller
//! order. Ledger, reply queue and worker queues sit behind one async mutex
//! that is held for the whole of each operation.
//!
//! A request touching several workers is first sent as a check command to
//! each of them; the mutating commands go out only once every worker has
//! accepted its share.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use qframe_engine::{ChunkPool, Engine, EngineError, FrameConfig};
use qframe_ir::{Address, AddressLayout, GateId, QubitHandle};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::backend::QuantumBackend;
use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::ledger::{CapacityLedger, Reservation};
use crate::protocol::{Command, GateOp, Response, ResponseKind, WorkerReply};
use crate::worker::Worker;

/// How long to wait for a reply before checking whether workers are alive.
const REPLY_POLL_INTERVAL: Duration = Duration::from_millis(100);

type Replies = Vec<(u32, Result<Response, EngineError>)>;

struct CoordinatorState {
    workers: Vec<UnboundedSender<Command>>,
    replies: UnboundedReceiver<WorkerReply>,
    threads: Vec<JoinHandle<()>>,
    ledger: CapacityLedger,
    poisoned: bool,
    shut_down: bool,
}

impl CoordinatorState {
    fn poison(&mut self, err: BackendError) -> BackendError {
        warn!(error = %err, "Poisoning coordinator");
        self.poisoned = true;
        err
    }

    /// Send one command per worker and collect exactly one reply from each.
    ///
    /// Results are returned in batch order. A reply from a worker that was
    /// not asked, a second reply, or a response of the wrong kind poisons
    /// the coordinator.
    async fn round_trip(&mut self, batch: Vec<(u32, Command)>) -> BackendResult<Replies> {
        if self.shut_down {
            return Err(BackendError::ShutDown);
        }
        if self.poisoned {
            return Err(BackendError::Poisoned);
        }

        let order: Vec<u32> = batch.iter().map(|(worker, _)| *worker).collect();
        let mut pending: FxHashMap<u32, ResponseKind> = FxHashMap::default();
        for (worker, command) in batch {
            let expected = command.expected_response();
            if pending.insert(worker, expected).is_some() {
                return Err(self.poison(BackendError::ProtocolDesync {
                    worker,
                    detail: "two commands in one batch".to_string(),
                }));
            }
            let sender = self
                .workers
                .get(worker as usize)
                .ok_or_else(|| BackendError::Addressing(format!("no worker {worker}")))?;
            if sender.send(command).is_err() {
                return Err(self.poison(BackendError::WorkerDisconnected(worker)));
            }
        }

        let mut received: FxHashMap<u32, Result<Response, EngineError>> = FxHashMap::default();
        while !pending.is_empty() {
            let reply = match tokio::time::timeout(REPLY_POLL_INTERVAL, self.replies.recv()).await
            {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    let worker = pending.keys().copied().min().unwrap_or_default();
                    return Err(self.poison(BackendError::WorkerDisconnected(worker)));
                }
                Err(_) => {
                    let dead = pending
                        .keys()
                        .copied()
                        .find(|w| self.workers[*w as usize].is_closed());
                    if let Some(worker) = dead {
                        return Err(self.poison(BackendError::WorkerDisconnected(worker)));
                    }
                    continue;
                }
            };

            let Some(expected) = pending.remove(&reply.worker) else {
                return Err(self.poison(BackendError::ProtocolDesync {
                    worker: reply.worker,
                    detail: "unsolicited reply".to_string(),
                }));
            };
            if let Ok(response) = &reply.result {
                if response.kind() != expected {
                    return Err(self.poison(BackendError::ProtocolDesync {
                        worker: reply.worker,
                        detail: format!("expected {expected}, got {}", response.kind()),
                    }));
                }
            }
            received.insert(reply.worker, reply.result);
        }

        Ok(order
            .into_iter()
            .filter_map(|worker| received.remove(&worker).map(|result| (worker, result)))
            .collect())
    }

    /// Round trip where every command must succeed.
    async fn dispatch(&mut self, batch: Vec<(u32, Command)>) -> BackendResult<Vec<(u32, Response)>> {
        self.round_trip(batch)
            .await?
            .into_iter()
            .map(|(worker, result)| Ok((worker, result?)))
            .collect()
    }
}

fn mismatch(worker: u32, expected: ResponseKind, got: &Response) -> BackendError {
    BackendError::ProtocolDesync {
        worker,
        detail: format!("expected {expected}, got {}", got.kind()),
    }
}

/// Qubit handles grouped per worker with their positions in the request.
struct Placement {
    groups: Vec<(u32, Vec<QubitHandle>, Vec<usize>)>,
}

/// Backend spreading chunks over worker threads.
pub struct ParallelBackend {
    name: &'static str,
    engine: &'static str,
    layout: AddressLayout,
    num_workers: usize,
    state: Mutex<CoordinatorState>,
}

impl std::fmt::Debug for ParallelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelBackend")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("num_workers", &self.num_workers)
            .finish_non_exhaustive()
    }
}

impl ParallelBackend {
    /// Build the worker pools, start their threads and wait for each to
    /// report in.
    pub async fn spawn<E: Engine>(config: &BackendConfig) -> BackendResult<Self> {
        config.validate()?;
        let layout = AddressLayout::segmented();
        let partitions = config.worker_frames();
        let noise = Arc::new(config.noise.clone());

        let (reply_tx, replies) = mpsc::unbounded_channel();
        let mut workers = Vec::with_capacity(partitions.len());
        let mut threads = Vec::with_capacity(partitions.len());
        for (id, frames) in partitions.iter().enumerate() {
            let id = id as u32;
            let seed = config.seed.map(|seed| seed.wrapping_add(u64::from(id)));
            let pool = ChunkPool::<E>::new(id, layout, frames, Arc::clone(&noise), seed)?;
            let (tx, rx) = mpsc::unbounded_channel();
            threads.push(Worker::new(pool, rx, reply_tx.clone()).spawn()?);
            workers.push(tx);
        }
        drop(reply_tx);

        let num_workers = workers.len();
        let mut state = CoordinatorState {
            workers,
            replies,
            threads,
            ledger: CapacityLedger::new(layout, partitions),
            poisoned: false,
            shut_down: false,
        };
        let batch = (0..num_workers as u32)
            .map(|w| (w, Command::StartListening))
            .collect();
        state.dispatch(batch).await?;

        debug!(
            kind = config.kind.name(),
            engine = E::NAME,
            workers = num_workers,
            "Coordinator ready"
        );
        Ok(Self {
            name: config.kind.name(),
            engine: E::NAME,
            layout,
            num_workers,
            state: Mutex::new(state),
        })
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Free chunks as reported by each worker, in worker order.
    pub async fn worker_capacity(&self) -> BackendResult<Vec<FrameConfig>> {
        let mut state = self.state.lock().await;
        let batch = (0..self.num_workers as u32)
            .map(|w| (w, Command::Capacity))
            .collect();
        state
            .dispatch(batch)
            .await?
            .into_iter()
            .map(|(worker, response)| match response {
                Response::Capacity(free) => Ok(free),
                other => Err(mismatch(worker, ResponseKind::Capacity, &other)),
            })
            .collect()
    }

    fn decode(&self, handle: &QubitHandle) -> BackendResult<Address> {
        let addr = self.layout.decode(handle)?;
        if addr.owner as usize >= self.num_workers {
            return Err(BackendError::Addressing(format!(
                "handle {handle} names worker {}, only {} running",
                addr.owner, self.num_workers
            )));
        }
        Ok(addr)
    }

    /// Worker holding every handle; they must share one chunk.
    fn route_single(&self, handles: &[QubitHandle]) -> BackendResult<u32> {
        let mut key = None;
        for handle in handles {
            let addr = self.decode(handle)?;
            match key {
                Some(prev) if prev != addr.chunk_key() => {
                    return Err(BackendError::CrossChunk(format!(
                        "qubits live in chunks {prev:?} and {:?}",
                        addr.chunk_key()
                    )));
                }
                _ => key = Some(addr.chunk_key()),
            }
        }
        key.map(|(owner, _)| owner)
            .ok_or(BackendError::Engine(EngineError::NoQubits))
    }

    fn place(&self, handles: &[QubitHandle]) -> BackendResult<Placement> {
        let mut groups: Vec<(u32, Vec<QubitHandle>, Vec<usize>)> = Vec::new();
        for (pos, handle) in handles.iter().enumerate() {
            let worker = self.decode(handle)?.owner;
            match groups.iter_mut().find(|(w, _, _)| *w == worker) {
                Some((_, list, positions)) => {
                    list.push(handle.clone());
                    positions.push(pos);
                }
                None => groups.push((worker, vec![handle.clone()], vec![pos])),
            }
        }
        Ok(Placement { groups })
    }

    /// Have every worker of a multi-worker request check its share before
    /// any of them mutates state.
    ///
    /// A request for one worker is checked by that worker as it runs.
    async fn precheck(
        state: &mut CoordinatorState,
        checks: Vec<(u32, Command)>,
    ) -> BackendResult<()> {
        if checks.len() > 1 {
            state.dispatch(checks).await?;
        }
        Ok(())
    }

    /// Send the same command shape to every worker named in `handles`.
    async fn fan_out(
        &self,
        handles: &[QubitHandle],
        expected: ResponseKind,
        check: impl Fn(Vec<QubitHandle>) -> Command,
        command: impl Fn(Vec<QubitHandle>) -> Command,
    ) -> BackendResult<()> {
        let placement = self.place(handles)?;
        let checks = placement
            .groups
            .iter()
            .map(|(worker, list, _)| (*worker, check(list.clone())))
            .collect();
        let batch = placement
            .groups
            .into_iter()
            .map(|(worker, list, _)| (worker, command(list)))
            .collect();
        let mut state = self.state.lock().await;
        Self::precheck(&mut state, checks).await?;
        for (worker, response) in state.dispatch(batch).await? {
            if response.kind() != expected {
                return Err(mismatch(worker, expected, &response));
            }
        }
        Ok(())
    }

    async fn rollback(
        state: &mut CoordinatorState,
        plan: &[Reservation],
        granted: Vec<(u32, Vec<Vec<QubitHandle>>)>,
        size: usize,
        dim: u32,
    ) {
        let batch: Vec<(u32, Command)> = granted
            .into_iter()
            .map(|(worker, frames)| {
                let qubits = frames.into_iter().flatten().collect();
                (worker, Command::DeallocateFrames { qubits })
            })
            .collect();
        if !batch.is_empty() {
            match state.round_trip(batch).await {
                Ok(replies) => {
                    for (worker, result) in replies {
                        if let Err(err) = result {
                            warn!(worker, error = %err, "Rollback deallocation failed");
                        }
                    }
                }
                Err(err) => warn!(error = %err, "Rollback deallocation failed"),
            }
        }
        state.ledger.release(plan, size, dim);
    }
}

#[async_trait]
impl QuantumBackend for ParallelBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn allocate_qframes(
        &self,
        frame_size: usize,
        frame_count: usize,
        dim: u32,
    ) -> BackendResult<Vec<Vec<QubitHandle>>> {
        if frame_count == 0 {
            return Ok(Vec::new());
        }
        let mut state = self.state.lock().await;
        if state.shut_down {
            return Err(BackendError::ShutDown);
        }
        if state.poisoned {
            return Err(BackendError::Poisoned);
        }
        let plan = state.ledger.figure_allocation(frame_size, frame_count, dim)?;
        let batch = plan
            .iter()
            .map(|r| {
                (
                    r.worker,
                    Command::AllocateFrames {
                        size: frame_size,
                        count: r.count,
                        dim,
                    },
                )
            })
            .collect();

        let replies = match state.round_trip(batch).await {
            Ok(replies) => replies,
            Err(err) => {
                state.ledger.release(&plan, frame_size, dim);
                return Err(err);
            }
        };

        let mut granted = Vec::with_capacity(replies.len());
        let mut failure = None;
        for (worker, result) in replies {
            match result {
                Ok(Response::FramesAllocated(frames)) => granted.push((worker, frames)),
                Ok(other) => failure = Some(mismatch(worker, ResponseKind::FramesAllocated, &other)),
                Err(err) => failure = Some(err.into()),
            }
        }
        if let Some(err) = failure {
            warn!(error = %err, "Allocation failed on a worker, rolling back");
            Self::rollback(&mut state, &plan, granted, frame_size, dim).await;
            return Err(err);
        }

        let mut frames = Vec::with_capacity(frame_count);
        for (worker, batch) in granted {
            state.ledger.record(worker, dim, frame_size, &batch);
            frames.extend(batch);
        }
        Ok(frames)
    }

    async fn deallocate_qubits(&self, handles: &[QubitHandle]) -> BackendResult<bool> {
        let mut state = self.state.lock().await;
        let (groups, unknown) = state.ledger.figure_deallocation(handles);
        for handle in &unknown {
            warn!(%handle, "Skipping handle without a tracked allocation");
        }
        let batch = groups
            .into_iter()
            .map(|(worker, qubits)| (worker, Command::DeallocateFrames { qubits }))
            .collect::<Vec<_>>();
        let mut complete = unknown.is_empty();
        if batch.is_empty() {
            return Ok(complete);
        }
        for (worker, response) in state.dispatch(batch).await? {
            match response {
                Response::FramesDeallocated(result) => {
                    state.ledger.credit(worker, &result.freed);
                    complete &= result.is_complete();
                }
                other => return Err(mismatch(worker, ResponseKind::FramesDeallocated, &other)),
            }
        }
        Ok(complete)
    }

    async fn extend_frame(
        &self,
        handle: &QubitHandle,
        size: usize,
    ) -> BackendResult<Vec<QubitHandle>> {
        let worker = self.decode(handle)?.owner;
        let command = Command::ExtendCircuit {
            qubit: handle.clone(),
            size,
        };
        let mut state = self.state.lock().await;
        match state.dispatch(vec![(worker, command)]).await?.pop() {
            Some((_, Response::CircuitExtended(handles))) => Ok(handles),
            Some((worker, other)) => Err(mismatch(worker, ResponseKind::CircuitExtended, &other)),
            None => Err(BackendError::WorkerDisconnected(worker)),
        }
    }

    async fn apply_transformation(
        &self,
        gate: GateId,
        args: &[f64],
        handles: &[QubitHandle],
    ) -> BackendResult<()> {
        let worker = self.route_single(handles)?;
        let command = Command::ApplyGate {
            gate,
            args: args.to_vec(),
            qubits: handles.to_vec(),
        };
        let mut state = self.state.lock().await;
        state.dispatch(vec![(worker, command)]).await?;
        Ok(())
    }

    async fn apply_serial_transformations(&self, ops: &[GateOp]) -> BackendResult<()> {
        let mut per_worker: Vec<(u32, Vec<GateOp>)> = Vec::new();
        for op in ops {
            let worker = self.route_single(&op.qubits)?;
            match per_worker.iter_mut().find(|(w, _)| *w == worker) {
                Some((_, list)) => list.push(op.clone()),
                None => per_worker.push((worker, vec![op.clone()])),
            }
        }
        if per_worker.is_empty() {
            return Ok(());
        }
        let checks = per_worker
            .iter()
            .map(|(worker, ops)| (*worker, Command::CheckGates { ops: ops.clone() }))
            .collect();
        let batch = per_worker
            .into_iter()
            .map(|(worker, ops)| (worker, Command::ApplySerialGates { ops }))
            .collect();
        let mut state = self.state.lock().await;
        Self::precheck(&mut state, checks).await?;
        state.dispatch(batch).await?;
        Ok(())
    }

    async fn measure_qubits(
        &self,
        handles: &[QubitHandle],
        non_destructive: bool,
        target_dim: Option<u32>,
    ) -> BackendResult<Vec<u32>> {
        let placement = self.place(handles)?;
        let mut positions = FxHashMap::default();
        let mut checks = Vec::with_capacity(placement.groups.len());
        let mut batch = Vec::with_capacity(placement.groups.len());
        for (worker, qubits, pos) in placement.groups {
            positions.insert(worker, pos);
            checks.push((
                worker,
                Command::CheckTargets {
                    qubits: qubits.clone(),
                    target_dim,
                    probability: None,
                },
            ));
            batch.push((
                worker,
                Command::Measure {
                    qubits,
                    non_destructive,
                    target_dim,
                },
            ));
        }

        let mut results = vec![0; handles.len()];
        let mut state = self.state.lock().await;
        Self::precheck(&mut state, checks).await?;
        for (worker, response) in state.dispatch(batch).await? {
            let digits = match response {
                Response::Measured(digits) => digits,
                other => return Err(mismatch(worker, ResponseKind::Measured, &other)),
            };
            let pos = positions.remove(&worker).unwrap_or_default();
            for (p, digit) in pos.into_iter().zip(digits) {
                results[p] = digit;
            }
        }
        Ok(results)
    }

    async fn reset_qubits(&self, handles: &[QubitHandle]) -> BackendResult<()> {
        self.fan_out(
            handles,
            ResponseKind::ResetDone,
            |qubits| Command::CheckTargets {
                qubits,
                target_dim: None,
                probability: None,
            },
            |qubits| Command::Reset { qubits },
        )
        .await
    }

    async fn process_channel_error(
        &self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> BackendResult<()> {
        self.fan_out(
            handles,
            ResponseKind::ChannelErrorApplied,
            |qubits| Command::CheckTargets {
                qubits,
                target_dim: None,
                probability: Some(probability),
            },
            |qubits| Command::ApplyChannelError {
                qubits,
                probability,
            },
        )
        .await
    }

    async fn capacity(&self) -> BackendResult<FrameConfig> {
        let state = self.state.lock().await;
        if state.shut_down {
            return Err(BackendError::ShutDown);
        }
        Ok(state.ledger.free())
    }

    async fn shutdown(&self) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return Ok(());
        }
        if !state.poisoned {
            let batch = (0..self.num_workers as u32)
                .map(|w| (w, Command::Terminate))
                .collect();
            if let Err(err) = state.dispatch(batch).await {
                warn!(error = %err, "Workers did not terminate cleanly");
            }
        }
        state.shut_down = true;
        // Closing the queues ends any worker still waiting for a command.
        state.workers.clear();

        let threads = std::mem::take(&mut state.threads);
        let joined = tokio::task::spawn_blocking(move || {
            threads
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_err)
                .count()
        })
        .await;
        match joined {
            Ok(0) => debug!(backend = self.name, "Coordinator shut down"),
            Ok(panicked) => warn!(panicked, "Worker threads panicked"),
            Err(err) => warn!(error = %err, "Failed to join worker threads"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use qframe_engine::DenseEngine;

    fn config() -> BackendConfig {
        BackendConfig {
            kind: BackendKind::ParallelDense,
            process_count: 2,
            frames: FrameConfig::new().with(2, 2, 4),
            seed: Some(8),
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn test_allocation_spreads_over_workers() {
        let backend = ParallelBackend::spawn::<DenseEngine>(&config()).await.unwrap();
        let frames = backend.allocate_qframes(2, 3, 2).await.unwrap();
        let owners: Vec<char> = frames
            .iter()
            .map(|f| f[0].as_str().chars().next().unwrap())
            .collect();
        assert_eq!(owners, vec!['0', '0', '1']);
        assert_eq!(backend.capacity().await.unwrap().get(2, 2), 1);
        backend.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_rejection_rolls_back() {
        let backend = ParallelBackend::spawn::<DenseEngine>(&config()).await.unwrap();
        let mut state = backend.state.lock().await;
        // Make the ledger believe worker 1 has a chunk it does not have.
        state.ledger.release(&[Reservation { worker: 1, count: 1 }], 2, 2);
        let before = state.ledger.free();
        drop(state);

        let err = backend.allocate_qframes(2, 5, 2).await.unwrap_err();
        assert!(matches!(err, BackendError::CapacityExhausted { .. }));
        assert_eq!(backend.capacity().await.unwrap(), before);
        let reported = backend.worker_capacity().await.unwrap();
        assert_eq!(reported[0].get(2, 2), 2);
        assert_eq!(reported[1].get(2, 2), 2);
        backend.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_share_stops_every_worker() {
        let backend = ParallelBackend::spawn::<DenseEngine>(&config()).await.unwrap();
        let frames = backend.allocate_qframes(2, 3, 2).await.unwrap();
        let ops = vec![
            GateOp::new(GateId::X, vec![frames[0][0].clone()]),
            GateOp::new(GateId(99), vec![frames[2][0].clone()]),
        ];
        assert!(backend.apply_serial_transformations(&ops).await.is_err());
        let digits = backend
            .measure_qubits(&[frames[0][0].clone()], true, None)
            .await
            .unwrap();
        assert_eq!(digits, vec![0]);
        backend.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_free_chunk_on_other_worker_blocks_reset() {
        let backend = ParallelBackend::spawn::<DenseEngine>(&config()).await.unwrap();
        let frames = backend.allocate_qframes(2, 3, 2).await.unwrap();
        let used = &frames[2][0].as_str()[3..8];
        let free = if used == "00000" { "1020000100" } else { "1020000000" };
        backend
            .apply_transformation(GateId::X, &[], &[frames[0][0].clone()])
            .await
            .unwrap();

        let targets = [frames[0][0].clone(), QubitHandle::new(free)];
        assert!(backend.reset_qubits(&targets).await.is_err());
        assert!(backend.process_channel_error(&targets, 0.5).await.is_err());
        assert!(backend.measure_qubits(&targets, false, None).await.is_err());

        let digits = backend
            .measure_qubits(&[frames[0][0].clone()], true, None)
            .await
            .unwrap();
        assert_eq!(digits, vec![1]);
        backend.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_refuses_work() {
        let backend = ParallelBackend::spawn::<DenseEngine>(&config()).await.unwrap();
        backend.shutdown().await.unwrap();
        backend.shutdown().await.unwrap();
        assert!(matches!(
            backend.allocate_qframes(2, 1, 2).await,
            Err(BackendError::ShutDown)
        ));
    }
}
