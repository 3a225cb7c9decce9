//! Chunk pool: the chunks owned by one worker.
//!
//! The pool is created once from a [`FrameConfig`] and never grows. Handles
//! it hands out encode `(owner, dim, chunk, local)` with the pool's
//! [`AddressLayout`]; every operation decodes them back and routes to the
//! chunk they name.

use std::sync::Arc;

use qframe_ir::{
    Address, AddressLayout, Channel, GateCatalog, GateId, IrError, NoisePattern, QubitHandle,
    ResolvedGate,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::engine::{Engine, check_register_size};
use crate::error::{EngineError, EngineResult};
use crate::frames::FrameConfig;

/// One gate of a serial batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOp {
    /// Catalog id.
    pub gate: GateId,
    /// Rotation angles.
    #[serde(default)]
    pub args: Vec<f64>,
    /// Target handles; all must live in one chunk.
    pub qubits: Vec<QubitHandle>,
}

impl GateOp {
    /// Create a gate operation without arguments.
    pub fn new(gate: GateId, qubits: Vec<QubitHandle>) -> Self {
        Self {
            gate,
            args: Vec::new(),
            qubits,
        }
    }

    /// Attach rotation angles.
    #[must_use]
    pub fn with_args(mut self, args: Vec<f64>) -> Self {
        self.args = args;
        self
    }
}

/// Outcome of a deallocation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deallocation {
    /// Chunks returned to the free state, each listed once.
    pub freed: Vec<u32>,
    /// Handles that did not name an allocated chunk.
    pub unknown: Vec<QubitHandle>,
}

impl Deallocation {
    /// Whether every handle was recognised.
    pub fn is_complete(&self) -> bool {
        self.unknown.is_empty()
    }
}

/// Reject frame configurations whose handles would not fit the layout.
pub fn validate_layout(
    layout: &AddressLayout,
    owner: u32,
    frames: &FrameConfig,
) -> EngineResult<()> {
    let Some(last_chunk) = frames.total_chunks().checked_sub(1) else {
        return Ok(());
    };
    let last_chunk = u32::try_from(last_chunk).map_err(|_| IrError::AddressOverflow {
        field: "chunk",
        value: last_chunk as u64,
        max: layout.max_chunk(),
    })?;
    for (dim, size, count) in frames.iter() {
        if count == 0 || size == 0 {
            continue;
        }
        let last_local = u32::try_from(size - 1).unwrap_or(u32::MAX);
        layout.encode(&Address::new(owner, dim, last_chunk, last_local))?;
    }
    Ok(())
}

/// Handles of one chunk: `(chunk, locals, positions in the request)`.
type Group = (u32, Vec<usize>, Vec<usize>);

/// Instantiate the scramble channel once per group.
fn scramble_channels<E: Engine>(
    noise: &NoisePattern,
    chunks: &[Chunk<E>],
    groups: &[Group],
    probability: f64,
    rng: &mut StdRng,
) -> EngineResult<Vec<Channel>> {
    groups
        .iter()
        .map(|(chunk, _, _)| {
            let dim = chunks[*chunk as usize].dim();
            Ok(noise.scramble_with(probability, dim, rng)?)
        })
        .collect()
}

/// All chunks of one worker.
#[derive(Debug)]
pub struct ChunkPool<E: Engine> {
    owner: u32,
    layout: AddressLayout,
    noise: Arc<NoisePattern>,
    chunks: Vec<Chunk<E>>,
    rng: StdRng,
}

impl<E: Engine> ChunkPool<E> {
    /// Build every chunk of `frames` up front.
    pub fn new(
        owner: u32,
        layout: AddressLayout,
        frames: &FrameConfig,
        noise: Arc<NoisePattern>,
        seed: Option<u64>,
    ) -> EngineResult<Self> {
        validate_layout(&layout, owner, frames)?;
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut chunks = Vec::with_capacity(frames.total_chunks());
        for (dim, size, count) in frames.iter() {
            if !E::supports_dimension(dim) {
                return Err(EngineError::UnsupportedDimension {
                    engine: E::NAME,
                    dim,
                });
            }
            noise.validate(dim, &mut rng)?;
            for _ in 0..count {
                let index = chunks.len() as u32;
                chunks.push(Chunk::new(index, dim, size, Arc::clone(&noise), &mut rng)?);
            }
        }

        debug!(
            owner,
            engine = E::NAME,
            chunks = chunks.len(),
            "Created chunk pool"
        );
        Ok(Self {
            owner,
            layout,
            noise,
            chunks,
            rng,
        })
    }

    /// Owner id encoded in every handle of this pool.
    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the pool has no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk by index.
    pub fn chunk(&self, index: u32) -> Option<&Chunk<E>> {
        self.chunks.get(index as usize)
    }

    /// Free chunks of one class.
    pub fn free_count(&self, dim: u32, size: usize) -> usize {
        self.chunks
            .iter()
            .filter(|c| !c.is_allocated() && c.dim() == dim && c.base_size() == size)
            .count()
    }

    /// Free chunks of every configured class, zero counts included.
    pub fn capacity(&self) -> FrameConfig {
        let mut free = FrameConfig::new();
        for chunk in &self.chunks {
            let n = usize::from(!chunk.is_allocated());
            free.add(chunk.dim(), chunk.base_size(), n);
        }
        free
    }

    fn encode(&self, dim: u32, chunk: u32, local: usize) -> EngineResult<QubitHandle> {
        let local = u32::try_from(local).map_err(|_| IrError::AddressOverflow {
            field: "local",
            value: local as u64,
            max: self.layout.max_local(),
        })?;
        Ok(self
            .layout
            .encode(&Address::new(self.owner, dim, chunk, local))?)
    }

    /// Decode a handle into `(chunk, local)` and check it belongs here.
    pub fn locate(&self, handle: &QubitHandle) -> EngineResult<(u32, usize)> {
        let addr = self.layout.decode(handle)?;
        if addr.owner != self.owner {
            return Err(EngineError::ForeignHandle {
                handle: handle.to_string(),
                owner: addr.owner,
                expected: self.owner,
            });
        }
        let chunk = self
            .chunks
            .get(addr.chunk as usize)
            .ok_or(EngineError::ChunkOutOfRange {
                chunk: addr.chunk,
                num_chunks: self.chunks.len(),
            })?;
        if chunk.dim() != addr.dim {
            return Err(EngineError::DimensionMismatch {
                chunk: addr.chunk,
                expected: chunk.dim(),
                got: addr.dim,
            });
        }
        Ok((addr.chunk, addr.local as usize))
    }

    /// Locate handles that must all live in one chunk.
    fn locate_single(&self, handles: &[QubitHandle]) -> EngineResult<(u32, Vec<usize>)> {
        let mut chunk = None;
        let mut locals = Vec::with_capacity(handles.len());
        for handle in handles {
            let (c, local) = self.locate(handle)?;
            match chunk {
                Some(prev) if prev != c => {
                    return Err(EngineError::CrossChunk(format!(
                        "qubits live in chunks {prev} and {c}"
                    )));
                }
                _ => chunk = Some(c),
            }
            locals.push(local);
        }
        let chunk = chunk.ok_or(EngineError::NoQubits)?;
        Ok((chunk, locals))
    }

    /// Locate handles and group them per chunk, in order of first appearance.
    fn group(&self, handles: &[QubitHandle]) -> EngineResult<Vec<Group>> {
        let mut groups: Vec<Group> = Vec::new();
        for (pos, handle) in handles.iter().enumerate() {
            let (chunk, local) = self.locate(handle)?;
            match groups.iter_mut().find(|(c, _, _)| *c == chunk) {
                Some((_, locals, positions)) => {
                    locals.push(local);
                    positions.push(pos);
                }
                None => groups.push((chunk, vec![local], vec![pos])),
            }
        }
        Ok(groups)
    }

    /// Group handles and check every group before any of them is touched.
    fn checked_groups(
        &self,
        handles: &[QubitHandle],
        target_dim: Option<u32>,
    ) -> EngineResult<Vec<Group>> {
        let groups = self.group(handles)?;
        for (chunk, locals, _) in &groups {
            self.chunks[*chunk as usize].check_targets(locals, target_dim)?;
        }
        Ok(groups)
    }

    /// Resolve every op of a batch and check it against the current states.
    fn prepare_serial(&self, ops: &[GateOp]) -> EngineResult<Vec<(u32, ResolvedGate, Vec<usize>)>> {
        ops.iter()
            .map(|op| {
                let (chunk, locals) = self.locate_single(&op.qubits)?;
                let c = &self.chunks[chunk as usize];
                let gate = GateCatalog::resolve(op.gate, &op.args, c.dim(), locals.len())?;
                c.check_transformation(&gate, &locals)?;
                Ok((chunk, gate, locals))
            })
            .collect()
    }

    /// Check a serial batch without applying it.
    pub fn check_serial(&self, ops: &[GateOp]) -> EngineResult<()> {
        self.prepare_serial(ops).map(|_| ())
    }

    /// Check the targets of a measure, reset or channel-error request
    /// without touching any state.
    pub fn check_targets(
        &self,
        handles: &[QubitHandle],
        target_dim: Option<u32>,
        probability: Option<f64>,
    ) -> EngineResult<()> {
        let groups = self.checked_groups(handles, target_dim)?;
        if let Some(p) = probability {
            let mut scratch = StdRng::seed_from_u64(0);
            scramble_channels(&self.noise, &self.chunks, &groups, p, &mut scratch)?;
        }
        Ok(())
    }

    /// Allocate `count` frames of `size` qudits; all or nothing.
    pub fn allocate_frames(
        &mut self,
        size: usize,
        count: usize,
        dim: u32,
    ) -> EngineResult<Vec<Vec<QubitHandle>>> {
        let free: Vec<u32> = self
            .chunks
            .iter()
            .filter(|c| !c.is_allocated() && c.dim() == dim && c.base_size() == size)
            .map(Chunk::index)
            .take(count)
            .collect();
        if free.len() < count {
            return Err(EngineError::Overflow {
                dim,
                size,
                requested: count,
                available: free.len(),
            });
        }

        let frames = free
            .iter()
            .map(|&chunk| {
                (0..size)
                    .map(|local| self.encode(dim, chunk, local))
                    .collect::<EngineResult<Vec<_>>>()
            })
            .collect::<EngineResult<Vec<_>>>()?;
        for &chunk in &free {
            self.chunks[chunk as usize].allocate(size)?;
        }
        debug!(owner = self.owner, size, count, dim, "Allocated frames");
        Ok(frames)
    }

    /// Free every chunk named by `handles`.
    ///
    /// Only handles of the original frame free a chunk. Extended qubits and
    /// handles that do not name an allocated chunk are reported in
    /// [`Deallocation::unknown`] instead of failing the call; an extended
    /// chunk is still reset to its base size when one of its frame handles
    /// is present.
    pub fn deallocate(&mut self, handles: &[QubitHandle]) -> EngineResult<Deallocation> {
        let mut result = Deallocation::default();
        let mut seen = FxHashSet::default();
        for handle in handles {
            let Ok((chunk, local)) = self.locate(handle) else {
                warn!(owner = self.owner, %handle, "Ignoring unknown handle");
                result.unknown.push(handle.clone());
                continue;
            };
            let c = &self.chunks[chunk as usize];
            if c.is_allocated() && local < c.base_size() {
                seen.insert(chunk);
            } else if c.is_allocated() && local < c.size() {
                warn!(owner = self.owner, %handle, chunk, "Skipping extended qubit");
                result.unknown.push(handle.clone());
            } else {
                warn!(owner = self.owner, %handle, "Ignoring unknown handle");
                result.unknown.push(handle.clone());
            }
        }

        let mut freed: Vec<u32> = seen.into_iter().collect();
        freed.sort_unstable();
        for &chunk in &freed {
            self.chunks[chunk as usize].deallocate(&mut self.rng)?;
        }
        result.freed = freed;
        Ok(result)
    }

    /// Extend the chunk holding `handle` by `n` qudits; returns their handles.
    pub fn extend(&mut self, handle: &QubitHandle, n: usize) -> EngineResult<Vec<QubitHandle>> {
        let (chunk, _) = self.locate(handle)?;
        let c = &self.chunks[chunk as usize];
        let (dim, first) = (c.dim(), c.size());
        check_register_size::<E>(dim, first.saturating_add(n))?;
        let handles = (first..first + n)
            .map(|local| self.encode(dim, chunk, local))
            .collect::<EngineResult<Vec<_>>>()?;
        self.chunks[chunk as usize].extend(n, &mut self.rng)?;
        Ok(handles)
    }

    /// Apply a gate; all qubits must be in the same chunk.
    pub fn apply_gate(
        &mut self,
        gate: GateId,
        args: &[f64],
        handles: &[QubitHandle],
    ) -> EngineResult<()> {
        let (chunk, locals) = self.locate_single(handles)?;
        let c = &mut self.chunks[chunk as usize];
        let resolved = GateCatalog::resolve(gate, args, c.dim(), locals.len())?;
        c.apply_transformation(&resolved, &locals, true, &mut self.rng)
    }

    /// Apply gates in order.
    ///
    /// The whole batch is resolved and checked first; a rejected op leaves
    /// every chunk untouched.
    pub fn apply_serial(&mut self, ops: &[GateOp]) -> EngineResult<()> {
        for (chunk, gate, locals) in self.prepare_serial(ops)? {
            self.chunks[chunk as usize].apply_transformation(&gate, &locals, true, &mut self.rng)?;
        }
        Ok(())
    }

    /// Measure qubits across any number of chunks; results follow `handles`.
    pub fn measure(
        &mut self,
        handles: &[QubitHandle],
        non_destructive: bool,
        target_dim: Option<u32>,
    ) -> EngineResult<Vec<u32>> {
        let mut results = vec![0; handles.len()];
        for (chunk, locals, positions) in self.checked_groups(handles, target_dim)? {
            let outcome = self.chunks[chunk as usize].measure(
                &locals,
                non_destructive,
                target_dim,
                &mut self.rng,
            )?;
            for (pos, digit) in positions.into_iter().zip(outcome) {
                results[pos] = digit;
            }
        }
        Ok(results)
    }

    /// Reset qubits to `|0⟩` followed by the state-preparation channel.
    pub fn reset(&mut self, handles: &[QubitHandle]) -> EngineResult<()> {
        for (chunk, locals, _) in self.checked_groups(handles, None)? {
            self.chunks[chunk as usize].reset(&locals, true, &mut self.rng)?;
        }
        Ok(())
    }

    /// Apply the scramble channel kind with `probability` to each qubit.
    pub fn apply_channel_error(
        &mut self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> EngineResult<()> {
        let groups = self.checked_groups(handles, None)?;
        let channels =
            scramble_channels(&self.noise, &self.chunks, &groups, probability, &mut self.rng)?;
        for ((chunk, locals, _), channel) in groups.into_iter().zip(channels) {
            self.chunks[chunk as usize].apply_channel(&channel, &locals, &mut self.rng)?;
        }
        Ok(())
    }
}
