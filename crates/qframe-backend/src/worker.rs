//! Worker thread owning one chunk pool.
//!
//! A worker blocks on its command queue, executes each command against its
//! [`ChunkPool`] and posts exactly one [`WorkerReply`] on the shared reply
//! queue. It stops after answering [`Command::Terminate`] or when either
//! queue is closed.

use std::thread::{self, JoinHandle};

use qframe_engine::{ChunkPool, Engine, EngineResult};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::error::{BackendError, BackendResult};
use crate::protocol::{Command, Response, WorkerReply};

/// One simulation worker.
pub struct Worker<E: Engine> {
    id: u32,
    pool: ChunkPool<E>,
    inbox: UnboundedReceiver<Command>,
    outbox: UnboundedSender<WorkerReply>,
}

impl<E: Engine> Worker<E> {
    /// Create a worker around a prepared pool.
    pub fn new(
        pool: ChunkPool<E>,
        inbox: UnboundedReceiver<Command>,
        outbox: UnboundedSender<WorkerReply>,
    ) -> Self {
        Self {
            id: pool.owner(),
            pool,
            inbox,
            outbox,
        }
    }

    /// Run the worker on a dedicated OS thread.
    pub fn spawn(self) -> BackendResult<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("qframe-worker-{}", self.id))
            .spawn(move || self.run())
            .map_err(BackendError::Spawn)
    }

    /// Command loop.
    pub fn run(mut self) {
        debug!(worker = self.id, engine = E::NAME, "Worker started");
        while let Some(command) = self.inbox.blocking_recv() {
            let terminate = matches!(command, Command::Terminate);
            trace!(worker = self.id, command = command.name(), "Handling command");
            let result = self.handle(command);
            if let Err(err) = &result {
                debug!(worker = self.id, error = %err, "Command failed");
            }
            let reply = WorkerReply {
                worker: self.id,
                result,
            };
            if self.outbox.send(reply).is_err() {
                warn!(worker = self.id, "Reply queue closed");
                break;
            }
            if terminate {
                break;
            }
        }
        debug!(worker = self.id, "Worker stopped");
    }

    fn handle(&mut self, command: Command) -> EngineResult<Response> {
        let pool = &mut self.pool;
        Ok(match command {
            Command::StartListening => Response::Listening,
            Command::Terminate => Response::Terminated,
            Command::AllocateFrames { size, count, dim } => {
                Response::FramesAllocated(pool.allocate_frames(size, count, dim)?)
            }
            Command::DeallocateFrames { qubits } => {
                Response::FramesDeallocated(pool.deallocate(&qubits)?)
            }
            Command::ExtendCircuit { qubit, size } => {
                Response::CircuitExtended(pool.extend(&qubit, size)?)
            }
            Command::ApplyGate { gate, args, qubits } => {
                pool.apply_gate(gate, &args, &qubits)?;
                Response::GateApplied
            }
            Command::Measure {
                qubits,
                non_destructive,
                target_dim,
            } => Response::Measured(pool.measure(&qubits, non_destructive, target_dim)?),
            Command::Reset { qubits } => {
                pool.reset(&qubits)?;
                Response::ResetDone
            }
            Command::ApplyChannelError {
                qubits,
                probability,
            } => {
                pool.apply_channel_error(&qubits, probability)?;
                Response::ChannelErrorApplied
            }
            Command::ApplySerialGates { ops } => {
                pool.apply_serial(&ops)?;
                Response::SerialGatesApplied
            }
            Command::Capacity => Response::Capacity(pool.capacity()),
            Command::CheckGates { ops } => {
                pool.check_serial(&ops)?;
                Response::Checked
            }
            Command::CheckTargets {
                qubits,
                target_dim,
                probability,
            } => {
                pool.check_targets(&qubits, target_dim, probability)?;
                Response::Checked
            }
        })
    }
}
