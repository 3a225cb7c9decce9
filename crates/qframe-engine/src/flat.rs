//! Flat register: one shared qubit register addressed by slot.
//!
//! Used by engines whose cost grows gently with register size, where it is
//! cheaper to keep every qubit in a single state than to partition into
//! chunks. Handles use the flat [`AddressLayout`], gates may span any
//! allocated slots and freed slots are reset in place.

use std::sync::Arc;

use qframe_ir::{
    Address, AddressLayout, GateCatalog, GateId, IrError, NoisePattern, QubitHandle,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::frames::FrameConfig;
use crate::pool::{Deallocation, GateOp};

/// Slot-addressed qubit register.
#[derive(Debug)]
pub struct FlatRegister<E: Engine> {
    layout: AddressLayout,
    noise: Arc<NoisePattern>,
    register: Chunk<E>,
    slots: Vec<bool>,
    rng: StdRng,
}

impl<E: Engine> FlatRegister<E> {
    /// Create a register of `capacity` qubits.
    pub fn new(
        capacity: usize,
        noise: Arc<NoisePattern>,
        seed: Option<u64>,
    ) -> EngineResult<Self> {
        let layout = AddressLayout::flat();
        if capacity as u64 > layout.max_chunk() + 1 {
            return Err(IrError::AddressOverflow {
                field: "slot",
                value: capacity as u64 - 1,
                max: layout.max_chunk(),
            }
            .into());
        }
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        noise.validate(2, &mut rng)?;
        let mut register = Chunk::new(0, 2, capacity, Arc::clone(&noise), &mut rng)?;
        register.allocate(capacity)?;
        debug!(engine = E::NAME, capacity, "Created flat register");
        Ok(Self {
            layout,
            noise,
            register,
            slots: vec![false; capacity],
            rng,
        })
    }

    /// Total number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the register has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of free slots.
    pub fn free_count(&self) -> usize {
        self.slots.iter().filter(|used| !**used).count()
    }

    /// Free capacity reported as single-qubit frames.
    pub fn capacity(&self) -> FrameConfig {
        FrameConfig::new().with(2, 1, self.free_count())
    }

    /// The shared register state.
    pub fn state(&self) -> &E {
        self.register.state()
    }

    fn locate(&self, handle: &QubitHandle) -> EngineResult<usize> {
        let slot = self.layout.decode(handle)?.chunk as usize;
        match self.slots.get(slot) {
            Some(true) => Ok(slot),
            Some(false) => Err(EngineError::NotAllocated(slot as u32)),
            None => Err(EngineError::ChunkOutOfRange {
                chunk: slot as u32,
                num_chunks: self.slots.len(),
            }),
        }
    }

    fn locate_all(&self, handles: &[QubitHandle]) -> EngineResult<Vec<usize>> {
        handles.iter().map(|h| self.locate(h)).collect()
    }

    /// Claim `count` free slots; all or nothing.
    pub fn allocate_qubits(&mut self, count: usize) -> EngineResult<Vec<QubitHandle>> {
        let free: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .map(|(slot, _)| slot)
            .take(count)
            .collect();
        if free.len() < count {
            return Err(EngineError::Overflow {
                dim: 2,
                size: 1,
                requested: count,
                available: free.len(),
            });
        }
        let handles = free
            .iter()
            .map(|&slot| {
                self.layout
                    .encode(&Address::new(0, 2, slot as u32, 0))
                    .map_err(EngineError::from)
            })
            .collect::<EngineResult<Vec<_>>>()?;
        for slot in free {
            self.slots[slot] = true;
        }
        Ok(handles)
    }

    /// Claim `count` groups of `size` slots.
    pub fn allocate_frames(
        &mut self,
        size: usize,
        count: usize,
    ) -> EngineResult<Vec<Vec<QubitHandle>>> {
        if size == 0 {
            return Ok(vec![Vec::new(); count]);
        }
        let handles = self.allocate_qubits(size * count).map_err(|err| match err {
            EngineError::Overflow { available, .. } => EngineError::Overflow {
                dim: 2,
                size,
                requested: count,
                available: available / size,
            },
            other => other,
        })?;
        Ok(handles.chunks(size).map(<[QubitHandle]>::to_vec).collect())
    }

    /// Reset and release every named slot.
    pub fn deallocate(&mut self, handles: &[QubitHandle]) -> EngineResult<Deallocation> {
        let mut result = Deallocation::default();
        let mut freed = Vec::new();
        for handle in handles {
            match self.locate(handle) {
                Ok(slot) => {
                    if !freed.contains(&slot) {
                        freed.push(slot);
                    }
                }
                Err(_) => {
                    warn!(%handle, "Ignoring unknown handle");
                    result.unknown.push(handle.clone());
                }
            }
        }
        self.register.reset(&freed, true, &mut self.rng)?;
        for &slot in &freed {
            self.slots[slot] = false;
        }
        result.freed = freed.into_iter().map(|slot| slot as u32).collect();
        Ok(result)
    }

    /// Claim `n` more slots alongside `handle`.
    ///
    /// Every slot already shares one register, so this is an allocation that
    /// requires `handle` to be live.
    pub fn extend(&mut self, handle: &QubitHandle, n: usize) -> EngineResult<Vec<QubitHandle>> {
        self.locate(handle)?;
        self.allocate_qubits(n)
    }

    /// Apply a gate to any allocated slots.
    pub fn apply_gate(
        &mut self,
        gate: GateId,
        args: &[f64],
        handles: &[QubitHandle],
    ) -> EngineResult<()> {
        let slots = self.locate_all(handles)?;
        let resolved = GateCatalog::resolve(gate, args, 2, slots.len())?;
        self.register
            .apply_transformation(&resolved, &slots, true, &mut self.rng)
    }

    /// Apply gates in order; the whole batch is checked before the first
    /// gate runs.
    pub fn apply_serial(&mut self, ops: &[GateOp]) -> EngineResult<()> {
        let prepared = ops
            .iter()
            .map(|op| {
                let slots = self.locate_all(&op.qubits)?;
                let gate = GateCatalog::resolve(op.gate, &op.args, 2, slots.len())?;
                self.register.check_transformation(&gate, &slots)?;
                Ok((gate, slots))
            })
            .collect::<EngineResult<Vec<_>>>()?;
        for (gate, slots) in prepared {
            self.register
                .apply_transformation(&gate, &slots, true, &mut self.rng)?;
        }
        Ok(())
    }

    /// Measure slots; results follow `handles`.
    pub fn measure(
        &mut self,
        handles: &[QubitHandle],
        non_destructive: bool,
        target_dim: Option<u32>,
    ) -> EngineResult<Vec<u32>> {
        let slots = self.locate_all(handles)?;
        self.register
            .measure(&slots, non_destructive, target_dim, &mut self.rng)
    }

    /// Reset slots to `|0⟩` followed by the state-preparation channel.
    pub fn reset(&mut self, handles: &[QubitHandle]) -> EngineResult<()> {
        let slots = self.locate_all(handles)?;
        self.register.reset(&slots, true, &mut self.rng)
    }

    /// Apply the scramble channel kind with `probability` to each slot.
    pub fn apply_channel_error(
        &mut self,
        handles: &[QubitHandle],
        probability: f64,
    ) -> EngineResult<()> {
        let slots = self.locate_all(handles)?;
        let channel = self.noise.scramble_with(probability, 2, &mut self.rng)?;
        self.register.apply_channel(&channel, &slots, &mut self.rng)
    }
}
