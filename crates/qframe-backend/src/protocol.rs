//! Messages exchanged between the coordinator and its workers.
//!
//! Every [`Command`] is answered by exactly one [`WorkerReply`]. A successful
//! reply carries the [`Response`] variant named by
//! [`Command::expected_response`]; anything else is a protocol desync.

use std::fmt;

use qframe_engine::{Deallocation, EngineError, FrameConfig};
use qframe_ir::{GateId, QubitHandle};
use serde::{Deserialize, Serialize};

pub use qframe_engine::GateOp;

/// Request sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Handshake after the worker thread starts.
    StartListening,
    /// Stop the worker loop.
    Terminate,
    /// Allocate `count` frames of `size` qudits of dimension `dim`.
    AllocateFrames { size: usize, count: usize, dim: u32 },
    /// Free the chunks holding these qubits.
    DeallocateFrames { qubits: Vec<QubitHandle> },
    /// Add `size` qudits to the chunk holding `qubit`.
    ExtendCircuit { qubit: QubitHandle, size: usize },
    /// Apply one gate inside one chunk.
    ApplyGate {
        gate: GateId,
        #[serde(default)]
        args: Vec<f64>,
        qubits: Vec<QubitHandle>,
    },
    /// Measure qubits; results follow `qubits`.
    Measure {
        qubits: Vec<QubitHandle>,
        non_destructive: bool,
        target_dim: Option<u32>,
    },
    /// Reset qubits to `|0⟩`.
    Reset { qubits: Vec<QubitHandle> },
    /// Inject the scramble channel with an explicit probability.
    ApplyChannelError {
        qubits: Vec<QubitHandle>,
        probability: f64,
    },
    /// Apply gates in order.
    ApplySerialGates { ops: Vec<GateOp> },
    /// Report free chunks per class.
    Capacity,
    /// Check a serial batch without applying it.
    CheckGates { ops: Vec<GateOp> },
    /// Check the targets of a measure, reset or channel-error request
    /// without touching any state.
    CheckTargets {
        qubits: Vec<QubitHandle>,
        target_dim: Option<u32>,
        probability: Option<f64>,
    },
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        self.expected_response().name()
    }

    /// The response variant a successful reply must carry.
    pub fn expected_response(&self) -> ResponseKind {
        match self {
            Command::StartListening => ResponseKind::Listening,
            Command::Terminate => ResponseKind::Terminated,
            Command::AllocateFrames { .. } => ResponseKind::FramesAllocated,
            Command::DeallocateFrames { .. } => ResponseKind::FramesDeallocated,
            Command::ExtendCircuit { .. } => ResponseKind::CircuitExtended,
            Command::ApplyGate { .. } => ResponseKind::GateApplied,
            Command::Measure { .. } => ResponseKind::Measured,
            Command::Reset { .. } => ResponseKind::ResetDone,
            Command::ApplyChannelError { .. } => ResponseKind::ChannelErrorApplied,
            Command::ApplySerialGates { .. } => ResponseKind::SerialGatesApplied,
            Command::Capacity => ResponseKind::Capacity,
            Command::CheckGates { .. } | Command::CheckTargets { .. } => ResponseKind::Checked,
        }
    }
}

/// Successful answer of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", content = "data", rename_all = "snake_case")]
pub enum Response {
    Listening,
    Terminated,
    FramesAllocated(Vec<Vec<QubitHandle>>),
    FramesDeallocated(Deallocation),
    CircuitExtended(Vec<QubitHandle>),
    GateApplied,
    Measured(Vec<u32>),
    ResetDone,
    ChannelErrorApplied,
    SerialGatesApplied,
    Capacity(FrameConfig),
    Checked,
}

impl Response {
    /// Variant tag.
    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Listening => ResponseKind::Listening,
            Response::Terminated => ResponseKind::Terminated,
            Response::FramesAllocated(_) => ResponseKind::FramesAllocated,
            Response::FramesDeallocated(_) => ResponseKind::FramesDeallocated,
            Response::CircuitExtended(_) => ResponseKind::CircuitExtended,
            Response::GateApplied => ResponseKind::GateApplied,
            Response::Measured(_) => ResponseKind::Measured,
            Response::ResetDone => ResponseKind::ResetDone,
            Response::ChannelErrorApplied => ResponseKind::ChannelErrorApplied,
            Response::SerialGatesApplied => ResponseKind::SerialGatesApplied,
            Response::Capacity(_) => ResponseKind::Capacity,
            Response::Checked => ResponseKind::Checked,
        }
    }
}

/// Variant tag of [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    Listening,
    Terminated,
    FramesAllocated,
    FramesDeallocated,
    CircuitExtended,
    GateApplied,
    Measured,
    ResetDone,
    ChannelErrorApplied,
    SerialGatesApplied,
    Capacity,
    Checked,
}

impl ResponseKind {
    /// Name used in logs and desync reports.
    pub fn name(self) -> &'static str {
        match self {
            ResponseKind::Listening => "listening",
            ResponseKind::Terminated => "terminated",
            ResponseKind::FramesAllocated => "frames_allocated",
            ResponseKind::FramesDeallocated => "frames_deallocated",
            ResponseKind::CircuitExtended => "circuit_extended",
            ResponseKind::GateApplied => "gate_applied",
            ResponseKind::Measured => "measured",
            ResponseKind::ResetDone => "reset_done",
            ResponseKind::ChannelErrorApplied => "channel_error_applied",
            ResponseKind::SerialGatesApplied => "serial_gates_applied",
            ResponseKind::Capacity => "capacity",
            ResponseKind::Checked => "checked",
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One answer on the shared reply queue.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReply {
    /// Id of the answering worker.
    pub worker: u32,
    /// Response, or the engine error the command raised.
    pub result: Result<Response, EngineError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_names_its_response() {
        let commands = [
            Command::StartListening,
            Command::Terminate,
            Command::AllocateFrames {
                size: 2,
                count: 1,
                dim: 2,
            },
            Command::Capacity,
            Command::CheckGates { ops: Vec::new() },
        ];
        let kinds: Vec<_> = commands.iter().map(Command::expected_response).collect();
        assert_eq!(
            kinds,
            vec![
                ResponseKind::Listening,
                ResponseKind::Terminated,
                ResponseKind::FramesAllocated,
                ResponseKind::Capacity,
                ResponseKind::Checked
            ]
        );
        assert_eq!(Response::Measured(vec![1]).kind(), ResponseKind::Measured);
    }

    #[test]
    fn test_command_serialization() {
        let cmd = Command::ApplyGate {
            gate: GateId::CX,
            args: Vec::new(),
            qubits: vec![QubitHandle::new("0020000000"), QubitHandle::new("0020000001")],
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"apply_gate\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }
}
