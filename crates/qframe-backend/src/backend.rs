//! Uniform backend interface and the configured backend wrapper.

use async_trait::async_trait;
use qframe_engine::{CircuitEngine, DenseEngine, FrameConfig, GateOp, StabilizerEngine};
use qframe_ir::{GateId, QubitHandle};
use tracing::{debug, info, instrument, warn};

use crate::config::{BackendConfig, BackendKind};
use crate::coordinator::ParallelBackend;
use crate::error::BackendResult;
use crate::local::{FlatBackend, LocalBackend};

/// Operations every simulation backend provides.
///
/// Handles are only meaningful to the backend that issued them.
#[async_trait]
pub trait QuantumBackend: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Allocate `frame_count` frames of `frame_size` qudits each.
    ///
    /// All or nothing: on failure no frame stays allocated.
    async fn allocate_qframes(
        &self,
        frame_size: usize,
        frame_count: usize,
        dim: u32,
    ) -> BackendResult<Vec<Vec<QubitHandle>>>;

    /// Allocate `count` independent single qudits.
    async fn allocate_qubits(&self, count: usize, dim: u32) -> BackendResult<Vec<QubitHandle>> {
        let frames = self.allocate_qframes(1, count, dim).await?;
        Ok(frames.into_iter().flatten().collect())
    }

    /// Release the frames holding `handles`.
    ///
    /// Returns `false` when some handle did not name an allocated frame;
    /// the recognised frames are released regardless.
    async fn deallocate_qubits(&self, handles: &[QubitHandle]) -> BackendResult<bool>;

    /// Add `size` fresh qudits to the frame holding `handle`.
    async fn extend_frame(
        &self,
        handle: &QubitHandle,
        size: usize,
    ) -> BackendResult<Vec<QubitHandle>>;

    /// Apply one gate from the catalog.
    async fn apply_transformation(
        &self,
        gate: GateId,
        args: &[f64],
        handles: &[QubitHandle],
    ) -> BackendResult<()>;

    /// Apply a batch of gates.
    async fn apply_serial_transformations(&self, ops: &[GateOp]) -> BackendResult<()>;

    /// Measure qudits; results follow `handles`.
    async fn measure_qubits(
        &self,
        handles: &[QubitHandle],
        non_destructive: bool,
        target_dim: Option<u32>,
    ) -> BackendResult<Vec<u32>>;

    /// Reset qudits to `|0⟩`.
    async fn reset_qubits(&self, handles: &[QubitHandle]) -> BackendResult<()>;

    /// Inject the scramble channel with an explicit probability.
    async fn process_channel_error(
        &self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> BackendResult<()>;

    /// Free frames per dimension and size.
    async fn capacity(&self) -> BackendResult<FrameConfig>;

    /// Stop the backend; later calls fail.
    async fn shutdown(&self) -> BackendResult<()> {
        Ok(())
    }
}

/// Allocate `count` frames of `size` qubits, each prepared in a GHZ state.
///
/// Uses only allocation and gate application: H on the first qubit, then CX
/// between each consecutive pair. If a gate fails the frames are released
/// before the error is returned.
pub async fn generate_ghz_pair<B: QuantumBackend + ?Sized>(
    backend: &B,
    size: usize,
    count: usize,
) -> BackendResult<Vec<Vec<QubitHandle>>> {
    let frames = backend.allocate_qframes(size, count, 2).await?;
    if let Err(err) = entangle(backend, &frames).await {
        let handles: Vec<QubitHandle> = frames.into_iter().flatten().collect();
        match backend.deallocate_qubits(&handles).await {
            Ok(true) => {}
            Ok(false) => warn!("GHZ frames only partly released"),
            Err(release) => warn!(error = %release, "Failed to release GHZ frames"),
        }
        return Err(err);
    }
    Ok(frames)
}

async fn entangle<B: QuantumBackend + ?Sized>(
    backend: &B,
    frames: &[Vec<QubitHandle>],
) -> BackendResult<()> {
    for frame in frames {
        let Some(first) = frame.first() else {
            continue;
        };
        backend
            .apply_transformation(GateId::H, &[], std::slice::from_ref(first))
            .await?;
        for pair in frame.windows(2) {
            backend.apply_transformation(GateId::CX, &[], pair).await?;
        }
    }
    Ok(())
}

/// Backend selected by configuration.
pub struct Backend {
    kind: BackendKind,
    inner: Box<dyn QuantumBackend>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind)
            .field("name", &self.inner.name())
            .finish()
    }
}

impl Backend {
    /// Build the backend named by `config.kind`.
    pub async fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        config.validate()?;
        let inner: Box<dyn QuantumBackend> = match config.kind {
            BackendKind::Dense => Box::new(LocalBackend::<DenseEngine>::new(config)?),
            BackendKind::ParallelDense => {
                Box::new(ParallelBackend::spawn::<DenseEngine>(config).await?)
            }
            BackendKind::ParallelCircuit => {
                Box::new(ParallelBackend::spawn::<CircuitEngine>(config).await?)
            }
            BackendKind::Stabilizer => Box::new(FlatBackend::<StabilizerEngine>::new(config)?),
        };
        info!(kind = %config.kind, "Backend ready");
        Ok(Self {
            kind: config.kind,
            inner,
        })
    }

    /// Wrap an already built backend.
    pub fn from_backend(kind: BackendKind, inner: Box<dyn QuantumBackend>) -> Self {
        Self { kind, inner }
    }

    /// Configured kind.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Allocate frames prepared in GHZ states.
    #[instrument(skip(self))]
    pub async fn generate_ghz_pair(
        &self,
        size: usize,
        count: usize,
    ) -> BackendResult<Vec<Vec<QubitHandle>>> {
        generate_ghz_pair(self.inner.as_ref(), size, count).await
    }
}

#[async_trait]
impl QuantumBackend for Backend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    #[instrument(skip(self))]
    async fn allocate_qframes(
        &self,
        frame_size: usize,
        frame_count: usize,
        dim: u32,
    ) -> BackendResult<Vec<Vec<QubitHandle>>> {
        let frames = self
            .inner
            .allocate_qframes(frame_size, frame_count, dim)
            .await?;
        debug!(frames = frames.len(), "Allocated frames");
        Ok(frames)
    }

    #[instrument(skip(self))]
    async fn allocate_qubits(&self, count: usize, dim: u32) -> BackendResult<Vec<QubitHandle>> {
        self.inner.allocate_qubits(count, dim).await
    }

    #[instrument(skip(self, handles), fields(qubits = handles.len()))]
    async fn deallocate_qubits(&self, handles: &[QubitHandle]) -> BackendResult<bool> {
        let complete = self.inner.deallocate_qubits(handles).await?;
        debug!(complete, "Deallocated qubits");
        Ok(complete)
    }

    #[instrument(skip(self))]
    async fn extend_frame(
        &self,
        handle: &QubitHandle,
        size: usize,
    ) -> BackendResult<Vec<QubitHandle>> {
        self.inner.extend_frame(handle, size).await
    }

    #[instrument(skip(self, args, handles), fields(qubits = handles.len()))]
    async fn apply_transformation(
        &self,
        gate: GateId,
        args: &[f64],
        handles: &[QubitHandle],
    ) -> BackendResult<()> {
        self.inner.apply_transformation(gate, args, handles).await
    }

    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    async fn apply_serial_transformations(&self, ops: &[GateOp]) -> BackendResult<()> {
        self.inner.apply_serial_transformations(ops).await
    }

    #[instrument(skip(self, handles), fields(qubits = handles.len()))]
    async fn measure_qubits(
        &self,
        handles: &[QubitHandle],
        non_destructive: bool,
        target_dim: Option<u32>,
    ) -> BackendResult<Vec<u32>> {
        let outcome = self
            .inner
            .measure_qubits(handles, non_destructive, target_dim)
            .await?;
        debug!(?outcome, "Measured");
        Ok(outcome)
    }

    #[instrument(skip(self, handles), fields(qubits = handles.len()))]
    async fn reset_qubits(&self, handles: &[QubitHandle]) -> BackendResult<()> {
        self.inner.reset_qubits(handles).await
    }

    #[instrument(skip(self, handles), fields(qubits = handles.len()))]
    async fn process_channel_error(
        &self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> BackendResult<()> {
        self.inner.process_channel_error(handles, probability).await
    }

    async fn capacity(&self) -> BackendResult<FrameConfig> {
        self.inner.capacity().await
    }

    #[instrument(skip(self))]
    async fn shutdown(&self) -> BackendResult<()> {
        self.inner.shutdown().await?;
        info!(kind = %self.kind, "Backend shut down");
        Ok(())
    }
}
