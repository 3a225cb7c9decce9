//! Fixed-dimension register with an allocation life cycle.
//!
//! A [`Chunk`] is either free (state `|0…0⟩` after a state-preparation
//! noise pass, base size) or allocated (addressable, may have been extended).
//! Noise from the attached [`NoisePattern`] is scheduled here so every engine
//! sees the same sequence: gate error before a noisy gate, measurement error
//! before a destructive collapse and scrambling after it.

use std::sync::Arc;

use qframe_ir::{Channel, IrError, NoisePattern, ResolvedGate};
use rand::rngs::StdRng;
use tracing::trace;

use crate::engine::{Engine, check_qudits};
use crate::error::{EngineError, EngineResult};

/// One register of a chunk pool.
#[derive(Debug, Clone)]
pub struct Chunk<E: Engine> {
    index: u32,
    dim: u32,
    base_size: usize,
    extension: usize,
    allocated: bool,
    state: E,
    noise: Arc<NoisePattern>,
}

impl<E: Engine> Chunk<E> {
    /// Create a free chunk of `base_size` qudits.
    pub fn new(
        index: u32,
        dim: u32,
        base_size: usize,
        noise: Arc<NoisePattern>,
        rng: &mut StdRng,
    ) -> EngineResult<Self> {
        let mut chunk = Self {
            index,
            dim,
            base_size,
            extension: 0,
            allocated: false,
            state: E::new(base_size, dim)?,
            noise,
        };
        chunk.prepare(0..base_size, rng)?;
        Ok(chunk)
    }

    /// Chunk index within its pool.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Qudit dimension.
    pub fn dim(&self) -> u32 {
        self.dim
    }

    /// Size the chunk returns to on deallocation.
    pub fn base_size(&self) -> usize {
        self.base_size
    }

    /// Qudits added by [`Chunk::extend`] since allocation.
    pub fn extension(&self) -> usize {
        self.extension
    }

    /// Current number of qudits.
    pub fn size(&self) -> usize {
        self.base_size + self.extension
    }

    /// Whether the chunk is handed out.
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// The engine state.
    pub fn state(&self) -> &E {
        &self.state
    }

    /// Mark the chunk allocated for a frame of `size` qudits.
    pub fn allocate(&mut self, size: usize) -> EngineResult<()> {
        if self.allocated {
            return Err(EngineError::AlreadyAllocated(self.index));
        }
        if size != self.base_size {
            return Err(EngineError::SizeMismatch {
                chunk: self.index,
                expected: self.base_size,
                got: size,
            });
        }
        self.allocated = true;
        Ok(())
    }

    fn ensure_allocated(&self) -> EngineResult<()> {
        if self.allocated {
            Ok(())
        } else {
            Err(EngineError::NotAllocated(self.index))
        }
    }

    /// Apply the state-preparation channel to freshly initialised qudits.
    fn prepare(
        &mut self,
        qudits: impl IntoIterator<Item = usize>,
        rng: &mut StdRng,
    ) -> EngineResult<()> {
        if self.noise.is_noiseless() {
            return Ok(());
        }
        for q in qudits {
            let channel = self.noise.state_prep(self.dim, rng)?;
            self.state.apply_channel(&channel, q, rng)?;
        }
        Ok(())
    }

    /// Check that a gate would be accepted, without touching the state.
    pub fn check_transformation(&self, gate: &ResolvedGate, qudits: &[usize]) -> EngineResult<()> {
        self.ensure_allocated()?;
        self.state.validate_gate(gate, qudits)
    }

    /// Check that `qudits` can be measured, reset or hit by a channel.
    ///
    /// Returns the modulus measurement digits are folded with.
    pub fn check_targets(&self, qudits: &[usize], target_dim: Option<u32>) -> EngineResult<u32> {
        self.ensure_allocated()?;
        check_qudits(qudits, self.size())?;
        match target_dim {
            Some(d) if d < 2 => Err(IrError::UnsupportedDimension {
                what: "measurement target".to_string(),
                dim: d,
            }
            .into()),
            Some(d) => Ok(d.min(self.dim)),
            None => Ok(self.dim),
        }
    }

    /// Apply a gate to chunk-local qudits.
    ///
    /// When `noisy`, the gate-error channel hits every target first. The gate
    /// is validated before any noise is applied.
    pub fn apply_transformation(
        &mut self,
        gate: &ResolvedGate,
        qudits: &[usize],
        noisy: bool,
        rng: &mut StdRng,
    ) -> EngineResult<()> {
        self.check_transformation(gate, qudits)?;
        if noisy && !self.noise.is_noiseless() {
            for &q in qudits {
                let channel = self.noise.gate(self.dim, rng)?;
                self.state.apply_channel(&channel, q, rng)?;
            }
        }
        trace!(chunk = self.index, gate = gate.name, ?qudits, "Applying gate");
        self.state.apply_gate(gate, qudits)
    }

    /// Measure chunk-local qudits.
    ///
    /// Destructive measurements apply the measurement channel before the
    /// collapse and the scramble channel after it. Non-destructive
    /// measurements run on a snapshot that is put back afterwards. Digits are
    /// folded modulo `min(target_dim, dim)`.
    pub fn measure(
        &mut self,
        qudits: &[usize],
        non_destructive: bool,
        target_dim: Option<u32>,
        rng: &mut StdRng,
    ) -> EngineResult<Vec<u32>> {
        let modulus = self.check_targets(qudits, target_dim)?;

        let outcome = if non_destructive {
            let snapshot = self.state.snapshot();
            let outcome = self.state.measure(qudits, rng);
            self.state.restore(snapshot);
            outcome?
        } else {
            let noisy = !self.noise.is_noiseless();
            if noisy {
                for &q in qudits {
                    let channel = self.noise.measurement(self.dim, rng)?;
                    self.state.apply_channel(&channel, q, rng)?;
                }
            }
            let outcome = self.state.measure(qudits, rng)?;
            if noisy {
                for &q in qudits {
                    let channel = self.noise.scramble(self.dim, rng)?;
                    self.state.apply_channel(&channel, q, rng)?;
                }
            }
            outcome
        };

        Ok(outcome.into_iter().map(|digit| digit % modulus).collect())
    }

    /// Reset qudits to `|0⟩`, optionally followed by the state-prep channel.
    pub fn reset(
        &mut self,
        qudits: &[usize],
        apply_error: bool,
        rng: &mut StdRng,
    ) -> EngineResult<()> {
        self.check_targets(qudits, None)?;
        for &q in qudits {
            self.state.reset(q, rng)?;
        }
        if apply_error {
            self.prepare(qudits.iter().copied(), rng)?;
        }
        Ok(())
    }

    /// Append `n` fresh qudits; returns the local index of the first one.
    pub fn extend(&mut self, n: usize, rng: &mut StdRng) -> EngineResult<usize> {
        self.ensure_allocated()?;
        let first = self.size();
        self.state.extend(n)?;
        self.extension += n;
        self.prepare(first..first + n, rng)?;
        Ok(first)
    }

    /// Return the chunk to the free state at its base size.
    pub fn deallocate(&mut self, rng: &mut StdRng) -> EngineResult<()> {
        self.ensure_allocated()?;
        self.state = E::new(self.base_size, self.dim)?;
        self.extension = 0;
        self.allocated = false;
        self.prepare(0..self.base_size, rng)
    }

    /// Inject an explicit channel error on each qudit.
    pub fn apply_channel(
        &mut self,
        channel: &Channel,
        qudits: &[usize],
        rng: &mut StdRng,
    ) -> EngineResult<()> {
        self.check_targets(qudits, None)?;
        for &q in qudits {
            self.state.apply_channel(channel, q, rng)?;
        }
        Ok(())
    }
}
