//! In-process backends.
//!
//! Both keep all state in the calling process behind a mutex: [`LocalBackend`]
//! over a chunk pool, [`FlatBackend`] over a single slot-addressed register.
//! Every operation runs on tokio's blocking pool so simulation work never
//! stalls the async executor.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use qframe_engine::{
    ChunkPool, Engine, EngineError, EngineResult, FlatRegister, FrameConfig, GateOp,
};
use qframe_ir::{AddressLayout, GateId, QubitHandle};

use crate::backend::QuantumBackend;
use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};

type Shared<S> = Arc<Mutex<Option<S>>>;

/// Run `f` on the state, or fail once the backend is shut down.
fn with_state<S, T>(
    state: &Mutex<Option<S>>,
    f: impl FnOnce(&mut S) -> EngineResult<T>,
) -> BackendResult<T> {
    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    let inner = guard.as_mut().ok_or(BackendError::ShutDown)?;
    Ok(f(inner)?)
}

/// [`with_state`] on the blocking thread pool.
async fn run_blocking<S, T>(
    state: &Shared<S>,
    f: impl FnOnce(&mut S) -> EngineResult<T> + Send + 'static,
) -> BackendResult<T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || with_state(&state, f))
        .await
        .map_err(|err| BackendError::Task(err.to_string()))?
}

fn shut_down<S>(state: &Mutex<Option<S>>) {
    state.lock().unwrap_or_else(PoisonError::into_inner).take();
}

/// Chunk pool in the calling process; owner id 0.
#[derive(Debug)]
pub struct LocalBackend<E: Engine> {
    name: &'static str,
    pool: Shared<ChunkPool<E>>,
}

impl<E: Engine> LocalBackend<E> {
    /// Build every chunk of `config.frames`.
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        config.validate()?;
        let pool = ChunkPool::new(
            0,
            AddressLayout::segmented(),
            &config.frames,
            Arc::new(config.noise.clone()),
            config.seed,
        )?;
        Ok(Self {
            name: config.kind.name(),
            pool: Arc::new(Mutex::new(Some(pool))),
        })
    }

    /// Inspect the pool.
    pub fn with_pool<T>(&self, f: impl FnOnce(&ChunkPool<E>) -> T) -> BackendResult<T> {
        with_state(&self.pool, |pool| Ok(f(pool)))
    }
}

#[async_trait]
impl<E: Engine> QuantumBackend for LocalBackend<E> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn allocate_qframes(
        &self,
        frame_size: usize,
        frame_count: usize,
        dim: u32,
    ) -> BackendResult<Vec<Vec<QubitHandle>>> {
        run_blocking(&self.pool, move |pool| {
            pool.allocate_frames(frame_size, frame_count, dim)
        })
        .await
    }

    async fn deallocate_qubits(&self, handles: &[QubitHandle]) -> BackendResult<bool> {
        let handles = handles.to_vec();
        run_blocking(&self.pool, move |pool| {
            pool.deallocate(&handles).map(|d| d.is_complete())
        })
        .await
    }

    async fn extend_frame(
        &self,
        handle: &QubitHandle,
        size: usize,
    ) -> BackendResult<Vec<QubitHandle>> {
        let handle = handle.clone();
        run_blocking(&self.pool, move |pool| pool.extend(&handle, size)).await
    }

    async fn apply_transformation(
        &self,
        gate: GateId,
        args: &[f64],
        handles: &[QubitHandle],
    ) -> BackendResult<()> {
        let (args, handles) = (args.to_vec(), handles.to_vec());
        run_blocking(&self.pool, move |pool| pool.apply_gate(gate, &args, &handles)).await
    }

    async fn apply_serial_transformations(&self, ops: &[GateOp]) -> BackendResult<()> {
        let ops = ops.to_vec();
        run_blocking(&self.pool, move |pool| pool.apply_serial(&ops)).await
    }

    async fn measure_qubits(
        &self,
        handles: &[QubitHandle],
        non_destructive: bool,
        target_dim: Option<u32>,
    ) -> BackendResult<Vec<u32>> {
        let handles = handles.to_vec();
        run_blocking(&self.pool, move |pool| {
            pool.measure(&handles, non_destructive, target_dim)
        })
        .await
    }

    async fn reset_qubits(&self, handles: &[QubitHandle]) -> BackendResult<()> {
        let handles = handles.to_vec();
        run_blocking(&self.pool, move |pool| pool.reset(&handles)).await
    }

    async fn process_channel_error(
        &self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> BackendResult<()> {
        let handles = handles.to_vec();
        run_blocking(&self.pool, move |pool| {
            pool.apply_channel_error(&handles, probability)
        })
        .await
    }

    async fn capacity(&self) -> BackendResult<FrameConfig> {
        with_state(&self.pool, |pool| Ok(pool.capacity()))
    }

    async fn shutdown(&self) -> BackendResult<()> {
        shut_down(&self.pool);
        Ok(())
    }
}

/// One shared qubit register in the calling process.
#[derive(Debug)]
pub struct FlatBackend<E: Engine> {
    name: &'static str,
    register: Shared<FlatRegister<E>>,
}

impl<E: Engine> FlatBackend<E> {
    /// Build a register sized by `config.flat_capacity[2]`.
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        config.validate()?;
        let capacity = config.flat_capacity.get(&2).copied().unwrap_or_default();
        let register = FlatRegister::new(capacity, Arc::new(config.noise.clone()), config.seed)?;
        Ok(Self {
            name: config.kind.name(),
            register: Arc::new(Mutex::new(Some(register))),
        })
    }
}

#[async_trait]
impl<E: Engine> QuantumBackend for FlatBackend<E> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn allocate_qframes(
        &self,
        frame_size: usize,
        frame_count: usize,
        dim: u32,
    ) -> BackendResult<Vec<Vec<QubitHandle>>> {
        run_blocking(&self.register, move |register| {
            if dim != 2 {
                return Err(EngineError::UnsupportedDimension {
                    engine: E::NAME,
                    dim,
                });
            }
            register.allocate_frames(frame_size, frame_count)
        })
        .await
    }

    async fn deallocate_qubits(&self, handles: &[QubitHandle]) -> BackendResult<bool> {
        let handles = handles.to_vec();
        run_blocking(&self.register, move |register| {
            register.deallocate(&handles).map(|d| d.is_complete())
        })
        .await
    }

    async fn extend_frame(
        &self,
        handle: &QubitHandle,
        size: usize,
    ) -> BackendResult<Vec<QubitHandle>> {
        let handle = handle.clone();
        run_blocking(&self.register, move |register| register.extend(&handle, size)).await
    }

    async fn apply_transformation(
        &self,
        gate: GateId,
        args: &[f64],
        handles: &[QubitHandle],
    ) -> BackendResult<()> {
        let (args, handles) = (args.to_vec(), handles.to_vec());
        run_blocking(&self.register, move |register| {
            register.apply_gate(gate, &args, &handles)
        })
        .await
    }

    async fn apply_serial_transformations(&self, ops: &[GateOp]) -> BackendResult<()> {
        let ops = ops.to_vec();
        run_blocking(&self.register, move |register| register.apply_serial(&ops)).await
    }

    async fn measure_qubits(
        &self,
        handles: &[QubitHandle],
        non_destructive: bool,
        target_dim: Option<u32>,
    ) -> BackendResult<Vec<u32>> {
        let handles = handles.to_vec();
        run_blocking(&self.register, move |register| {
            register.measure(&handles, non_destructive, target_dim)
        })
        .await
    }

    async fn reset_qubits(&self, handles: &[QubitHandle]) -> BackendResult<()> {
        let handles = handles.to_vec();
        run_blocking(&self.register, move |register| register.reset(&handles)).await
    }

    async fn process_channel_error(
        &self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> BackendResult<()> {
        let handles = handles.to_vec();
        run_blocking(&self.register, move |register| {
            register.apply_channel_error(&handles, probability)
        })
        .await
    }

    async fn capacity(&self) -> BackendResult<FrameConfig> {
        with_state(&self.register, |register| Ok(register.capacity()))
    }

    async fn shutdown(&self) -> BackendResult<()> {
        shut_down(&self.register);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use qframe_engine::{DenseEngine, StabilizerEngine};

    #[tokio::test]
    async fn test_local_backend_roundtrip() {
        let config = BackendConfig {
            frames: FrameConfig::new().with(3, 1, 2),
            seed: Some(4),
            ..BackendConfig::default()
        };
        let backend = LocalBackend::<DenseEngine>::new(&config).unwrap();
        let q = backend.allocate_qubits(2, 3).await.unwrap();
        assert_eq!(q[0].as_str(), "0030000000");
        assert_eq!(q[1].as_str(), "0030000100");
        backend.apply_transformation(GateId::X, &[], &q[..1]).await.unwrap();
        assert_eq!(
            backend.measure_qubits(&q, false, None).await.unwrap(),
            vec![1, 0]
        );
        assert!(backend.deallocate_qubits(&q).await.unwrap());
        assert_eq!(backend.capacity().await.unwrap().get(3, 1), 2);
        assert_eq!(backend.with_pool(|p| p.len()).unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_share_one_pool() {
        let config = BackendConfig {
            frames: FrameConfig::new().with(2, 1, 8),
            seed: Some(9),
            ..BackendConfig::default()
        };
        let backend = Arc::new(LocalBackend::<DenseEngine>::new(&config).unwrap());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                tokio::spawn(async move {
                    let q = backend.allocate_qubits(1, 2).await.unwrap();
                    backend.apply_transformation(GateId::X, &[], &q).await.unwrap();
                    let bits = backend.measure_qubits(&q, true, None).await.unwrap();
                    assert!(backend.deallocate_qubits(&q).await.unwrap());
                    bits
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), vec![1]);
        }
        assert_eq!(backend.capacity().await.unwrap().get(2, 1), 8);
    }

    #[tokio::test]
    async fn test_flat_backend_rejects_qutrits() {
        let mut config = BackendConfig {
            kind: BackendKind::Stabilizer,
            ..BackendConfig::default()
        };
        config.flat_capacity.insert(2, 4);
        let backend = FlatBackend::<StabilizerEngine>::new(&config).unwrap();
        assert!(backend.allocate_qframes(1, 1, 3).await.is_err());
        assert_eq!(backend.allocate_qframes(2, 2, 2).await.unwrap().len(), 2);
        assert_eq!(backend.capacity().await.unwrap().get(2, 1), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_work() {
        let backend = LocalBackend::<DenseEngine>::new(&BackendConfig::default()).unwrap();
        backend.shutdown().await.unwrap();
        assert!(matches!(
            backend.capacity().await,
            Err(BackendError::ShutDown)
        ));
    }
}
