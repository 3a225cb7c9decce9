//! Aaronson-Gottesman stabilizer engine for Clifford circuits.
//!
//! The tableau holds `2n` rows of `2n + 1` bits: destabilizers in rows
//! `0..n`, stabilizers in rows `n..2n`. Within a row the layout is
//! `x[0..n], z[0..n], r`. Gates cost O(n), measurements O(n²).
//!
//! Reference: Aaronson & Gottesman, "Improved Simulation of Stabilizer
//! Circuits", Phys. Rev. A 70, 052328 (2004).

use qframe_ir::{Channel, NamedGate, NoiseAction, ResolvedGate};
use rand::Rng;
use rand::rngs::StdRng;

use crate::engine::{Engine, check_gate, check_qudits, check_register_size};
use crate::error::{EngineError, EngineResult};

/// Largest tableau: `2n × (2n + 1)` bits stay under 300 MB.
const MAX_QUBITS: usize = 1 << 13;

/// Stabilizer tableau over qubits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilizerEngine {
    num_qubits: usize,
    tableau: Vec<bool>,
}

impl StabilizerEngine {
    fn identity_tableau(n: usize) -> Vec<bool> {
        let stride = 2 * n + 1;
        let mut tableau = vec![false; 2 * n * stride];
        for i in 0..n {
            tableau[i * stride + i] = true;
            tableau[(n + i) * stride + n + i] = true;
        }
        tableau
    }

    #[inline]
    fn stride(&self) -> usize {
        2 * self.num_qubits + 1
    }

    #[inline]
    fn x(&self, row: usize, col: usize) -> bool {
        self.tableau[row * self.stride() + col]
    }

    #[inline]
    fn z(&self, row: usize, col: usize) -> bool {
        self.tableau[row * self.stride() + self.num_qubits + col]
    }

    #[inline]
    fn r(&self, row: usize) -> bool {
        self.tableau[row * self.stride() + 2 * self.num_qubits]
    }

    #[inline]
    fn set_x(&mut self, row: usize, col: usize, val: bool) {
        let idx = row * self.stride() + col;
        self.tableau[idx] = val;
    }

    #[inline]
    fn set_z(&mut self, row: usize, col: usize, val: bool) {
        let idx = row * self.stride() + self.num_qubits + col;
        self.tableau[idx] = val;
    }

    #[inline]
    fn flip_r(&mut self, row: usize) {
        let idx = row * self.stride() + 2 * self.num_qubits;
        self.tableau[idx] = !self.tableau[idx];
    }

    /// Left-multiply row `target` by row `source`.
    fn rowsum(&mut self, target: usize, source: usize) {
        let n = self.num_qubits;
        let stride = self.stride();
        let mut phase: i32 = 2 * i32::from(self.r(target)) + 2 * i32::from(self.r(source));
        for j in 0..n {
            phase += g(
                self.x(source, j),
                self.z(source, j),
                self.x(target, j),
                self.z(target, j),
            );
        }
        self.tableau[target * stride + 2 * n] = phase.rem_euclid(4) == 2;
        for j in 0..2 * n {
            let bit = self.tableau[source * stride + j];
            self.tableau[target * stride + j] ^= bit;
        }
    }

    // -----------------------------------------------------------------------
    // Clifford gates
    // -----------------------------------------------------------------------

    fn hadamard(&mut self, qubit: usize) {
        for i in 0..2 * self.num_qubits {
            let xi = self.x(i, qubit);
            let zi = self.z(i, qubit);
            if xi && zi {
                self.flip_r(i);
            }
            self.set_x(i, qubit, zi);
            self.set_z(i, qubit, xi);
        }
    }

    fn phase(&mut self, qubit: usize) {
        for i in 0..2 * self.num_qubits {
            let xi = self.x(i, qubit);
            let zi = self.z(i, qubit);
            if xi && zi {
                self.flip_r(i);
            }
            self.set_z(i, qubit, zi ^ xi);
        }
    }

    fn cnot(&mut self, control: usize, target: usize) {
        for i in 0..2 * self.num_qubits {
            let xc = self.x(i, control);
            let zt = self.z(i, target);
            let xt = self.x(i, target);
            let zc = self.z(i, control);
            if xc && zt && (xt == zc) {
                self.flip_r(i);
            }
            self.set_x(i, target, xt ^ xc);
            self.set_z(i, control, zc ^ zt);
        }
    }

    /// Flip the sign of every row whose Pauli anticommutes with the given one.
    fn pauli(&mut self, qubit: usize, x: bool, z: bool) {
        for i in 0..2 * self.num_qubits {
            if (self.x(i, qubit) && z) ^ (self.z(i, qubit) && x) {
                self.flip_r(i);
            }
        }
    }

    fn apply_named(&mut self, gate: NamedGate, qubits: &[usize]) {
        match gate {
            NamedGate::I => {}
            NamedGate::X => self.pauli(qubits[0], true, false),
            NamedGate::Y => self.pauli(qubits[0], true, true),
            NamedGate::Z => self.pauli(qubits[0], false, true),
            NamedGate::H => self.hadamard(qubits[0]),
            NamedGate::S => self.phase(qubits[0]),
            NamedGate::Sdg => {
                self.phase(qubits[0]);
                self.phase(qubits[0]);
                self.phase(qubits[0]);
            }
            NamedGate::CX => self.cnot(qubits[0], qubits[1]),
            NamedGate::CZ => {
                self.hadamard(qubits[1]);
                self.cnot(qubits[0], qubits[1]);
                self.hadamard(qubits[1]);
            }
            NamedGate::Swap => {
                self.cnot(qubits[0], qubits[1]);
                self.cnot(qubits[1], qubits[0]);
                self.cnot(qubits[0], qubits[1]);
            }
            // Filtered out by `clifford_alias`.
            NamedGate::T | NamedGate::CCX => {}
        }
    }

    fn measure_one(&mut self, qubit: usize, rng: &mut StdRng) -> bool {
        let n = self.num_qubits;
        let stride = self.stride();

        if let Some(p) = (n..2 * n).find(|&i| self.x(i, qubit)) {
            for i in 0..2 * n {
                if i != p && self.x(i, qubit) {
                    self.rowsum(i, p);
                }
            }
            let dest = p - n;
            self.tableau
                .copy_within(p * stride..(p + 1) * stride, dest * stride);
            self.tableau[p * stride..(p + 1) * stride].fill(false);
            self.set_z(p, qubit, true);
            let outcome: bool = rng.r#gen();
            if outcome {
                self.flip_r(p);
            }
            outcome
        } else {
            // Deterministic: accumulate the stabilizers paired with
            // destabilizers that anticommute with Z_qubit into a scratch row.
            let mut scratch = vec![false; stride];
            for i in 0..n {
                if !self.x(i, qubit) {
                    continue;
                }
                let row = n + i;
                let mut phase: i32 = 2 * i32::from(scratch[2 * n]) + 2 * i32::from(self.r(row));
                for j in 0..n {
                    phase += g(self.x(row, j), self.z(row, j), scratch[j], scratch[n + j]);
                }
                scratch[2 * n] = phase.rem_euclid(4) == 2;
                for j in 0..2 * n {
                    scratch[j] ^= self.tableau[row * stride + j];
                }
            }
            scratch[2 * n]
        }
    }

    fn clifford_alias(gate: &ResolvedGate) -> EngineResult<NamedGate> {
        match gate.alias {
            Some(named) if named.is_clifford() => Ok(named),
            _ => Err(EngineError::UnsupportedGate {
                engine: Self::NAME,
                gate: gate.name.to_string(),
            }),
        }
    }
}

/// Phase exponent (power of `i`) picked up when multiplying Pauli
/// `(x1, z1)` into `(x2, z2)`.
fn g(x1: bool, z1: bool, x2: bool, z2: bool) -> i32 {
    let (x2, z2) = (i32::from(x2), i32::from(z2));
    match (x1, z1) {
        (false, false) => 0,
        (true, true) => z2 - x2,
        (true, false) => z2 * (2 * x2 - 1),
        (false, true) => x2 * (1 - 2 * z2),
    }
}

impl Engine for StabilizerEngine {
    const NAME: &'static str = "stabilizer";

    fn supports_dimension(dim: u32) -> bool {
        dim == 2
    }

    fn max_qudits(dim: u32) -> usize {
        if Self::supports_dimension(dim) {
            MAX_QUBITS
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
        Ok(Self {
            num_qubits: num_qudits,
            tableau: Self::identity_tableau(num_qudits),
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
        let named = Self::clifford_alias(gate)?;
        self.apply_named(named, qudits);
        Ok(())
    }

    fn validate_gate(&self, gate: &ResolvedGate, qudits: &[usize]) -> EngineResult<()> {
        check_qudits(qudits, self.num_qubits)?;
        check_gate(Self::NAME, gate, 2, qudits)?;
        Self::clifford_alias(gate).map(|_| ())
    }

    fn apply_channel(
        &mut self,
        channel: &Channel,
        qudit: usize,
        rng: &mut StdRng,
    ) -> EngineResult<()> {
        check_qudits(&[qudit], self.num_qubits)?;
        for action in channel.sample_gates(rng)? {
            match action {
                NoiseAction::Gate(named) => self.apply_named(named, &[qudit]),
                NoiseAction::Reset => self.reset(qudit, rng)?,
            }
        }
        Ok(())
    }

    fn measure(&mut self, qudits: &[usize], rng: &mut StdRng) -> EngineResult<Vec<u32>> {
        check_qudits(qudits, self.num_qubits)?;
        Ok(qudits
            .iter()
            .map(|&q| u32::from(self.measure_one(q, rng)))
            .collect())
    }

    fn reset(&mut self, qudit: usize, rng: &mut StdRng) -> EngineResult<()> {
        check_qudits(&[qudit], self.num_qubits)?;
        if self.measure_one(qudit, rng) {
            self.pauli(qudit, true, false);
        }
        Ok(())
    }

    fn extend(&mut self, n: usize) -> EngineResult<()> {
        check_register_size::<Self>(2, self.num_qubits.saturating_add(n))?;
        let old = self.num_qubits;
        let new = old + n;
        let old_stride = self.stride();
        let new_stride = 2 * new + 1;
        let mut tableau = Self::identity_tableau(new);

        for row in 0..2 * old {
            let new_row = if row < old { row } else { row - old + new };
            let src = &self.tableau[row * old_stride..(row + 1) * old_stride];
            let dst = &mut tableau[new_row * new_stride..(new_row + 1) * new_stride];
            dst.fill(false);
            dst[..old].copy_from_slice(&src[..old]);
            dst[new..new + old].copy_from_slice(&src[old..2 * old]);
            dst[2 * new] = src[2 * old];
        }

        self.tableau = tableau;
        self.num_qubits = new;
        Ok(())
    }

    fn approx_eq(&self, other: &Self, _tolerance: f64) -> bool {
        self == other
    }
}
