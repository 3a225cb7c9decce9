//! Buffered qubit statevector engine.
//!
//! Gates and channels are appended to a pending circuit and only executed when
//! the engine is flushed, which happens implicitly before every measurement
//! and reset.

use num_complex::Complex64;
use qframe_ir::{Channel, ChannelOperator, Matrix, NamedGate, ResolvedGate};
use rand::Rng;
use rand::rngs::StdRng;
use std::f64::consts::PI;
use tracing::trace;

use crate::engine::{Engine, MAX_AMPLITUDES, check_qudits, check_register_size};
use crate::error::{EngineError, EngineResult};

/// An operation waiting in the pending circuit.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    /// A resolved gate on local qubits.
    Gate {
        gate: ResolvedGate,
        qubits: Vec<usize>,
    },
    /// A noise channel on one qubit.
    Channel { channel: Channel, qubit: usize },
}

/// Qubit statevector with a pending-operation buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitEngine {
    num_qubits: usize,
    amplitudes: Vec<Complex64>,
    pending: Vec<PendingOp>,
}

impl CircuitEngine {
    /// Operations not yet applied to the statevector.
    pub fn pending(&self) -> &[PendingOp] {
        &self.pending
    }

    /// Statevector as of the last flush.
    pub fn amplitudes(&self) -> &[Complex64] {
        &self.amplitudes
    }

    fn execute(&mut self, op: PendingOp, rng: &mut StdRng) {
        match op {
            PendingOp::Gate { gate, qubits } => match gate.alias {
                Some(named) => self.apply_named(named, &qubits),
                None => self.apply_unitary(&gate.matrix, &qubits),
            },
            PendingOp::Channel { channel, qubit } => {
                let mixture = channel.mixture();
                let r: f64 = rng.r#gen();
                let mut cumulative = 0.0;
                let chosen = mixture
                    .iter()
                    .find(|(p, _)| {
                        cumulative += p;
                        r < cumulative
                    })
                    .or_else(|| mixture.last());
                match chosen {
                    Some((_, ChannelOperator::Unitary(m))) => self.apply_unitary(m, &[qubit]),
                    Some((_, ChannelOperator::Reset)) => self.collapse_to_zero(qubit, rng),
                    None => {}
                }
            }
        }
    }

    fn apply_named(&mut self, gate: NamedGate, qubits: &[usize]) {
        match gate {
            NamedGate::I => {}
            NamedGate::X => self.apply_x(qubits[0]),
            NamedGate::Y => self.apply_y(qubits[0]),
            NamedGate::Z => self.apply_phase(qubits[0], PI),
            NamedGate::H => self.apply_h(qubits[0]),
            NamedGate::S => self.apply_phase(qubits[0], PI / 2.0),
            NamedGate::Sdg => self.apply_phase(qubits[0], -PI / 2.0),
            NamedGate::T => self.apply_phase(qubits[0], PI / 4.0),
            NamedGate::CX => self.apply_cx(qubits[0], qubits[1]),
            NamedGate::CZ => self.apply_cz(qubits[0], qubits[1]),
            NamedGate::Swap => self.apply_swap(qubits[0], qubits[1]),
            NamedGate::CCX => self.apply_ccx(qubits[0], qubits[1], qubits[2]),
        }
    }

    // =========================================================================
    // Gate kernels
    // =========================================================================

    fn apply_x(&mut self, qubit: usize) {
        let mask = 1 << qubit;
        for i in 0..self.amplitudes.len() {
            if i & mask == 0 {
                self.amplitudes.swap(i, i | mask);
            }
        }
    }

    fn apply_y(&mut self, qubit: usize) {
        let mask = 1 << qubit;
        let i_val = Complex64::new(0.0, 1.0);
        for i in 0..self.amplitudes.len() {
            if i & mask == 0 {
                let j = i | mask;
                let tmp = self.amplitudes[i];
                self.amplitudes[i] = -i_val * self.amplitudes[j];
                self.amplitudes[j] = i_val * tmp;
            }
        }
    }

    fn apply_h(&mut self, qubit: usize) {
        let mask = 1 << qubit;
        let sqrt2_inv = 1.0 / 2.0_f64.sqrt();
        for i in 0..self.amplitudes.len() {
            if i & mask == 0 {
                let j = i | mask;
                let a = self.amplitudes[i];
                let b = self.amplitudes[j];
                self.amplitudes[i] = sqrt2_inv * (a + b);
                self.amplitudes[j] = sqrt2_inv * (a - b);
            }
        }
    }

    fn apply_phase(&mut self, qubit: usize, theta: f64) {
        let mask = 1 << qubit;
        let phase = Complex64::from_polar(1.0, theta);
        for i in 0..self.amplitudes.len() {
            if i & mask != 0 {
                self.amplitudes[i] *= phase;
            }
        }
    }

    fn apply_cx(&mut self, control: usize, target: usize) {
        let ctrl_mask = 1 << control;
        let tgt_mask = 1 << target;
        for i in 0..self.amplitudes.len() {
            if (i & ctrl_mask != 0) && (i & tgt_mask == 0) {
                self.amplitudes.swap(i, i | tgt_mask);
            }
        }
    }

    fn apply_cz(&mut self, control: usize, target: usize) {
        let both = (1 << control) | (1 << target);
        for i in 0..self.amplitudes.len() {
            if i & both == both {
                self.amplitudes[i] = -self.amplitudes[i];
            }
        }
    }

    fn apply_swap(&mut self, q1: usize, q2: usize) {
        let mask1 = 1 << q1;
        let mask2 = 1 << q2;
        for i in 0..self.amplitudes.len() {
            if (i & mask1 != 0) && (i & mask2 == 0) {
                let j = (i & !mask1) | mask2;
                self.amplitudes.swap(i, j);
            }
        }
    }

    fn apply_ccx(&mut self, c1: usize, c2: usize, target: usize) {
        let controls = (1 << c1) | (1 << c2);
        let tgt_mask = 1 << target;
        for i in 0..self.amplitudes.len() {
            if (i & controls == controls) && (i & tgt_mask == 0) {
                self.amplitudes.swap(i, i | tgt_mask);
            }
        }
    }

    /// Apply an arbitrary `2^k × 2^k` unitary; `qubits[0]` is the most
    /// significant bit of the matrix index.
    fn apply_unitary(&mut self, matrix: &Matrix, qubits: &[usize]) {
        let k = qubits.len();
        let block = 1usize << k;
        let offsets: Vec<usize> = (0..block)
            .map(|local| {
                qubits
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| local & (1 << (k - 1 - j)) != 0)
                    .map(|(_, &q)| 1 << q)
                    .sum()
            })
            .collect();
        let target_mask: usize = qubits.iter().map(|&q| 1 << q).sum();

        let mut gathered = vec![Complex64::new(0.0, 0.0); block];
        for base in 0..self.amplitudes.len() {
            if base & target_mask != 0 {
                continue;
            }
            for (slot, offset) in gathered.iter_mut().zip(&offsets) {
                *slot = self.amplitudes[base | offset];
            }
            for (row, offset) in offsets.iter().enumerate() {
                self.amplitudes[base | offset] = gathered
                    .iter()
                    .enumerate()
                    .map(|(col, amp)| matrix[[row, col]] * amp)
                    .sum();
            }
        }
    }

    // =========================================================================
    // Measurement
    // =========================================================================

    fn sample(&self, rng: &mut StdRng) -> usize {
        let r: f64 = rng.r#gen();
        let mut cumulative = 0.0;
        for (i, amp) in self.amplitudes.iter().enumerate() {
            cumulative += amp.norm_sqr();
            if r < cumulative {
                return i;
            }
        }
        self.amplitudes
            .iter()
            .rposition(|a| a.norm_sqr() > 0.0)
            .unwrap_or(0)
    }

    fn project(&mut self, qubits: &[usize], bits: &[u32]) {
        let mut norm_sq = 0.0;
        for i in 0..self.amplitudes.len() {
            let keep = qubits
                .iter()
                .zip(bits)
                .all(|(&q, &b)| ((i >> q) & 1) as u32 == b);
            if keep {
                norm_sq += self.amplitudes[i].norm_sqr();
            } else {
                self.amplitudes[i] = Complex64::new(0.0, 0.0);
            }
        }
        let norm = norm_sq.sqrt();
        if norm > 0.0 {
            for amp in &mut self.amplitudes {
                *amp /= norm;
            }
        }
    }

    fn measure_now(&mut self, qubits: &[usize], rng: &mut StdRng) -> Vec<u32> {
        let outcome = self.sample(rng);
        let bits: Vec<u32> = qubits.iter().map(|&q| ((outcome >> q) & 1) as u32).collect();
        self.project(qubits, &bits);
        bits
    }

    fn collapse_to_zero(&mut self, qubit: usize, rng: &mut StdRng) {
        if self.measure_now(&[qubit], rng)[0] == 1 {
            self.apply_x(qubit);
        }
    }
}

impl Engine for CircuitEngine {
    const NAME: &'static str = "circuit";

    fn supports_dimension(dim: u32) -> bool {
        dim == 2
    }

    fn max_qudits(dim: u32) -> usize {
        if Self::supports_dimension(dim) {
            MAX_AMPLITUDES.trailing_zeros() as usize
        } else {
            0
        }
    }

    fn new(num_qudits: usize, dim: u32) -> EngineResult<Self> {
        if !Self::supports_dimension(dim) {
            return Err(EngineError::UnsupportedDimension {
                engine: Self::NAME,
                dim,
            });
        }
        check_register_size::<Self>(dim, num_qudits)?;
        let mut amplitudes = vec![Complex64::new(0.0, 0.0); 1 << num_qudits];
        amplitudes[0] = Complex64::new(1.0, 0.0);
        Ok(Self {
            num_qubits: num_qudits,
            amplitudes,
            pending: Vec::new(),
        })
    }

    fn num_qudits(&self) -> usize {
        self.num_qubits
    }

    fn dim(&self) -> u32 {
        2
    }

    fn apply_gate(&mut self, gate: &ResolvedGate, qudits: &[usize]) -> EngineResult<()> {
        self.validate_gate(gate, qudits)?;
        self.pending.push(PendingOp::Gate {
            gate: gate.clone(),
            qubits: qudits.to_vec(),
        });
        Ok(())
    }

    fn apply_channel(
        &mut self,
        channel: &Channel,
        qudit: usize,
        _rng: &mut StdRng,
    ) -> EngineResult<()> {
        check_qudits(&[qudit], self.num_qubits)?;
        if channel.dim() != 2 {
            return Err(EngineError::UnsupportedDimension {
                engine: Self::NAME,
                dim: channel.dim(),
            });
        }
        if !channel.is_identity() {
            self.pending.push(PendingOp::Channel {
                channel: channel.clone(),
                qubit: qudit,
            });
        }
        Ok(())
    }

    fn measure(&mut self, qudits: &[usize], rng: &mut StdRng) -> EngineResult<Vec<u32>> {
        check_qudits(qudits, self.num_qubits)?;
        self.flush(rng)?;
        Ok(self.measure_now(qudits, rng))
    }

    fn reset(&mut self, qudit: usize, rng: &mut StdRng) -> EngineResult<()> {
        check_qudits(&[qudit], self.num_qubits)?;
        self.flush(rng)?;
        self.collapse_to_zero(qudit, rng);
        Ok(())
    }

    fn extend(&mut self, n: usize) -> EngineResult<()> {
        check_register_size::<Self>(2, self.num_qubits.saturating_add(n))?;
        // New qubits are the high bits, so existing indices are unchanged.
        let new_len = self.amplitudes.len() << n;
        self.amplitudes.resize(new_len, Complex64::new(0.0, 0.0));
        self.num_qubits += n;
        Ok(())
    }

    fn flush(&mut self, rng: &mut StdRng) -> EngineResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        trace!(ops = self.pending.len(), "Flushing pending circuit");
        for op in std::mem::take(&mut self.pending) {
            self.execute(op, rng);
        }
        Ok(())
    }

    fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.num_qubits == other.num_qubits
            && self.pending == other.pending
            && self
                .amplitudes
                .iter()
                .zip(&other.amplitudes)
                .all(|(a, b)| (a - b).norm() <= tolerance)
    }
}
