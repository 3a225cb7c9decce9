//! Dense qudit statevector engine.
//!
//! Amplitudes are stored for all `d^n` basis states. Digit `q` of basis index
//! `i` is `(i / d^q) mod d`, so qudit 0 is the least significant digit and
//! extending the register only appends higher digits.

use num_complex::Complex64;
use qframe_ir::{Channel, ChannelOperator, Matrix, ResolvedGate};
use rand::Rng;
use rand::rngs::StdRng;

use crate::engine::{Engine, MAX_AMPLITUDES, check_qudits};
use crate::error::{EngineError, EngineResult};

/// Statevector over `d`-level qudits, gates applied eagerly.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseEngine {
    dim: u32,
    num_qudits: usize,
    amplitudes: Vec<Complex64>,
}

impl DenseEngine {
    /// The state amplitudes.
    pub fn amplitudes(&self) -> &[Complex64] {
        &self.amplitudes
    }

    /// Probability of every basis state.
    pub fn probabilities(&self) -> Vec<f64> {
        self.amplitudes.iter().map(Complex64::norm_sqr).collect()
    }

    /// Amplitude count for `num_qudits` qudits, `None` past the limit.
    fn state_len(dim: u32, num_qudits: usize) -> Option<usize> {
        let n = u32::try_from(num_qudits).ok()?;
        (dim as usize)
            .checked_pow(n)
            .filter(|&len| len <= MAX_AMPLITUDES)
    }

    fn too_large(dim: u32, requested: usize) -> EngineError {
        EngineError::RegisterTooLarge {
            engine: Self::NAME,
            dim,
            requested,
            max: Self::max_qudits(dim),
        }
    }

    fn stride(&self, qudit: usize) -> usize {
        (self.dim as usize).pow(qudit as u32)
    }

    fn digit(&self, index: usize, qudit: usize) -> usize {
        (index / self.stride(qudit)) % self.dim as usize
    }

    /// Apply a `d^k × d^k` unitary; the first target is the most significant
    /// digit of the matrix index.
    pub(crate) fn apply_matrix(&mut self, matrix: &Matrix, qudits: &[usize]) {
        let d = self.dim as usize;
        let k = qudits.len();
        let block = d.pow(k as u32);

        let offsets: Vec<usize> = (0..block)
            .map(|local| {
                qudits
                    .iter()
                    .enumerate()
                    .map(|(j, &q)| {
                        let digit = (local / d.pow((k - 1 - j) as u32)) % d;
                        digit * self.stride(q)
                    })
                    .sum()
            })
            .collect();

        let mut gathered = vec![Complex64::new(0.0, 0.0); block];
        for base in 0..self.amplitudes.len() {
            if qudits.iter().any(|&q| self.digit(base, q) != 0) {
                continue;
            }
            for (slot, offset) in gathered.iter_mut().zip(&offsets) {
                *slot = self.amplitudes[base + offset];
            }
            for (row, offset) in offsets.iter().enumerate() {
                let mut acc = Complex64::new(0.0, 0.0);
                for (col, amp) in gathered.iter().enumerate() {
                    acc += matrix[[row, col]] * amp;
                }
                self.amplitudes[base + offset] = acc;
            }
        }
    }

    /// Sample a basis index by walking the cumulative probability mass.
    fn sample(&self, rng: &mut StdRng) -> usize {
        let r: f64 = rng.r#gen();
        let mut cumulative = 0.0;
        for (i, amp) in self.amplitudes.iter().enumerate() {
            cumulative += amp.norm_sqr();
            if r < cumulative {
                return i;
            }
        }
        // Rounding can leave the total mass just below r.
        self.amplitudes
            .iter()
            .rposition(|a| a.norm_sqr() > 0.0)
            .unwrap_or(0)
    }

    /// Keep only the amplitudes consistent with `digits` and renormalise.
    fn project(&mut self, qudits: &[usize], digits: &[usize]) {
        let mut norm_sq = 0.0;
        for i in 0..self.amplitudes.len() {
            let keep = qudits
                .iter()
                .zip(digits)
                .all(|(&q, &digit)| self.digit(i, q) == digit);
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

    /// Cyclically shift one qudit down by `k` levels.
    fn shift_down(&mut self, qudit: usize, k: usize) {
        let d = self.dim as usize;
        if k % d == 0 {
            return;
        }
        let shifted = qframe_ir::gate::shift(d, d - k % d);
        self.apply_matrix(&shifted, &[qudit]);
    }
}

impl Engine for DenseEngine {
    const NAME: &'static str = "dense";

    fn supports_dimension(dim: u32) -> bool {
        dim >= 2
    }

    fn max_qudits(dim: u32) -> usize {
        if !Self::supports_dimension(dim) {
            return 0;
        }
        let mut n = 0;
        while Self::state_len(dim, n + 1).is_some() {
            n += 1;
        }
        n
    }

    fn new(num_qudits: usize, dim: u32) -> EngineResult<Self> {
        if !Self::supports_dimension(dim) {
            return Err(EngineError::UnsupportedDimension {
                engine: Self::NAME,
                dim,
            });
        }
        let size =
            Self::state_len(dim, num_qudits).ok_or_else(|| Self::too_large(dim, num_qudits))?;
        let mut amplitudes = vec![Complex64::new(0.0, 0.0); size];
        amplitudes[0] = Complex64::new(1.0, 0.0);
        Ok(Self {
            dim,
            num_qudits,
            amplitudes,
        })
    }

    fn num_qudits(&self) -> usize {
        self.num_qudits
    }

    fn dim(&self) -> u32 {
        self.dim
    }

    fn apply_gate(&mut self, gate: &ResolvedGate, qudits: &[usize]) -> EngineResult<()> {
        self.validate_gate(gate, qudits)?;
        self.apply_matrix(&gate.matrix, qudits);
        Ok(())
    }

    fn apply_channel(
        &mut self,
        channel: &Channel,
        qudit: usize,
        rng: &mut StdRng,
    ) -> EngineResult<()> {
        check_qudits(&[qudit], self.num_qudits)?;
        if channel.is_identity() {
            return Ok(());
        }
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
            Some((_, ChannelOperator::Unitary(matrix))) => self.apply_matrix(matrix, &[qudit]),
            Some((_, ChannelOperator::Reset)) => self.reset(qudit, rng)?,
            None => {}
        }
        Ok(())
    }

    fn measure(&mut self, qudits: &[usize], rng: &mut StdRng) -> EngineResult<Vec<u32>> {
        check_qudits(qudits, self.num_qudits)?;
        let outcome = self.sample(rng);
        let digits: Vec<usize> = qudits.iter().map(|&q| self.digit(outcome, q)).collect();
        self.project(qudits, &digits);
        Ok(digits.into_iter().map(|d| d as u32).collect())
    }

    fn reset(&mut self, qudit: usize, rng: &mut StdRng) -> EngineResult<()> {
        let outcome = self.measure(&[qudit], rng)?[0];
        self.shift_down(qudit, outcome as usize);
        Ok(())
    }

    fn extend(&mut self, n: usize) -> EngineResult<()> {
        let requested = self.num_qudits.saturating_add(n);
        let new_len = Self::state_len(self.dim, requested)
            .ok_or_else(|| Self::too_large(self.dim, requested))?;
        self.amplitudes.resize(new_len, Complex64::new(0.0, 0.0));
        self.num_qudits += n;
        Ok(())
    }

    fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.dim == other.dim
            && self.num_qudits == other.num_qudits
            && self
                .amplitudes
                .iter()
                .zip(&other.amplitudes)
                .all(|(a, b)| (a - b).norm() <= tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qframe_ir::{ChannelKind, GateCatalog, GateId};
    use rand::SeedableRng;

    fn approx(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < 1e-10
    }

    fn gate(id: GateId, dim: u32, arity: usize) -> ResolvedGate {
        GateCatalog::resolve(id, &[], dim, arity).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let state = DenseEngine::new(2, 3).unwrap();
        assert_eq!(state.amplitudes().len(), 9);
        assert!(approx(state.amplitudes()[0], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn test_bell_state() {
        let mut state = DenseEngine::new(2, 2).unwrap();
        state.apply_gate(&gate(GateId::H, 2, 1), &[0]).unwrap();
        state.apply_gate(&gate(GateId::CX, 2, 2), &[0, 1]).unwrap();

        let p = state.probabilities();
        assert!((p[0] - 0.5).abs() < 1e-10);
        assert!((p[3] - 0.5).abs() < 1e-10);
        assert!(p[1].abs() < 1e-10 && p[2].abs() < 1e-10);
    }

    #[test]
    fn test_control_order_follows_qudit_list() {
        // X on qubit 1, then CX with qubit 1 as control flips qubit 0.
        let mut state = DenseEngine::new(2, 2).unwrap();
        state.apply_gate(&gate(GateId::X, 2, 1), &[1]).unwrap();
        state.apply_gate(&gate(GateId::CX, 2, 2), &[1, 0]).unwrap();
        assert!(approx(state.amplitudes()[3], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn test_qutrit_shift_and_measure() {
        let mut state = DenseEngine::new(2, 3).unwrap();
        let x = gate(GateId::X, 3, 1);
        state.apply_gate(&x, &[1]).unwrap();
        state.apply_gate(&x, &[1]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(state.measure(&[0, 1], &mut rng).unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_qutrit_ghz_is_correlated() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let mut state = DenseEngine::new(2, 3).unwrap();
            state.apply_gate(&gate(GateId::H, 3, 1), &[0]).unwrap();
            state.apply_gate(&gate(GateId::CX, 3, 2), &[0, 1]).unwrap();
            let outcome = state.measure(&[0, 1], &mut rng).unwrap();
            assert_eq!(outcome[0], outcome[1]);
        }
    }

    #[test]
    fn test_measurement_collapses() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = DenseEngine::new(1, 2).unwrap();
        state.apply_gate(&gate(GateId::H, 2, 1), &[0]).unwrap();
        let first = state.measure(&[0], &mut rng).unwrap();
        for _ in 0..20 {
            assert_eq!(state.measure(&[0], &mut rng).unwrap(), first);
        }
    }

    #[test]
    fn test_reset_returns_to_zero() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut state = DenseEngine::new(1, 4).unwrap();
        state.apply_gate(&gate(GateId::H, 4, 1), &[0]).unwrap();
        state.reset(0, &mut rng).unwrap();
        assert!(approx(state.amplitudes()[0], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn test_extend_keeps_existing_amplitudes() {
        let mut state = DenseEngine::new(1, 2).unwrap();
        state.apply_gate(&gate(GateId::X, 2, 1), &[0]).unwrap();
        state.extend(2).unwrap();
        assert_eq!(state.num_qudits(), 3);
        assert_eq!(state.amplitudes().len(), 8);
        assert!(approx(state.amplitudes()[1], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn test_register_size_limit() {
        assert_eq!(DenseEngine::max_qudits(2), 26);
        assert_eq!(DenseEngine::max_qudits(3), 16);
        assert!(matches!(
            DenseEngine::new(64, 2),
            Err(EngineError::RegisterTooLarge { requested: 64, .. })
        ));

        let mut state = DenseEngine::new(2, 3).unwrap();
        assert!(state.extend(usize::MAX).is_err());
        assert!(state.extend(15).is_err());
        assert_eq!(state.num_qudits(), 2);
        assert_eq!(state.amplitudes().len(), 9);
    }

    #[test]
    fn test_certain_bit_flip_channel() {
        let mut rng = StdRng::seed_from_u64(4);
        let channel = Channel::instantiate(ChannelKind::BitFlip, 1.0, 2, &mut rng).unwrap();
        let mut state = DenseEngine::new(1, 2).unwrap();
        state.apply_channel(&channel, 0, &mut rng).unwrap();
        assert!(approx(state.amplitudes()[1], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn test_rejects_wrong_dimension_gate() {
        let mut state = DenseEngine::new(2, 3).unwrap();
        let before = state.clone();
        let err = state.apply_gate(&gate(GateId::H, 2, 1), &[0]).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedDimension { dim: 2, .. }));
        assert_eq!(state, before);
    }
}
