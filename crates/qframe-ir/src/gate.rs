//! Gate catalog.
//!
//! Gates are addressed by a small integer [`GateId`]. Resolving an id with
//! its constructor arguments and the target dimension yields a
//! [`ResolvedGate`]: a `dim^k × dim^k` unitary plus the gate's arity and an
//! optional [`NamedGate`] alias for engines that only accept a fixed gate set.
//!
//! For dimensions above two the qubit gates generalise as follows:
//!
//! | Gate | Qudit form |
//! |------|------------|
//! | `X` | cyclic shift `|j⟩ → |j+1 mod d⟩` |
//! | `Z` | clock `|j⟩ → ω^j |j⟩` |
//! | `H` | discrete Fourier transform |
//! | `CX` | controlled sum `|c,t⟩ → |c, t+c mod d⟩` |
//! | `CZ` | controlled clock `|c,t⟩ → ω^{ct} |c,t⟩` |
//! | `SWAP` | qudit swap |
//!
//! The remaining gates are only defined for qubits.

use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::fmt;

use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};

/// Dense complex matrix, row-major.
pub type Matrix = Array2<Complex64>;

/// Identifier of a gate in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GateId(pub u16);

impl GateId {
    pub const I: GateId = GateId(0);
    pub const X: GateId = GateId(1);
    pub const Y: GateId = GateId(2);
    pub const Z: GateId = GateId(3);
    pub const H: GateId = GateId(4);
    pub const S: GateId = GateId(5);
    pub const SDG: GateId = GateId(6);
    pub const T: GateId = GateId(7);
    pub const RX: GateId = GateId(8);
    pub const RY: GateId = GateId(9);
    pub const RZ: GateId = GateId(10);
    pub const PHASE: GateId = GateId(11);
    pub const CX: GateId = GateId(12);
    pub const CZ: GateId = GateId(13);
    pub const SWAP: GateId = GateId(14);
    pub const CCX: GateId = GateId(15);
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

impl From<u16> for GateId {
    fn from(id: u16) -> Self {
        GateId(id)
    }
}

/// Gates known by name to engines with a reduced gate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedGate {
    I,
    X,
    Y,
    Z,
    H,
    S,
    Sdg,
    T,
    CX,
    CZ,
    Swap,
    CCX,
}

impl NamedGate {
    /// Get the name of this gate.
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            NamedGate::I => "id",
            NamedGate::X => "x",
            NamedGate::Y => "y",
            NamedGate::Z => "z",
            NamedGate::H => "h",
            NamedGate::S => "s",
            NamedGate::Sdg => "sdg",
            NamedGate::T => "t",
            NamedGate::CX => "cx",
            NamedGate::CZ => "cz",
            NamedGate::Swap => "swap",
            NamedGate::CCX => "ccx",
        }
    }

    /// Get the number of qubits this gate operates on.
    #[inline]
    pub fn num_qubits(self) -> u32 {
        match self {
            NamedGate::CX | NamedGate::CZ | NamedGate::Swap => 2,
            NamedGate::CCX => 3,
            _ => 1,
        }
    }

    /// Whether the gate belongs to the Clifford group.
    pub fn is_clifford(self) -> bool {
        !matches!(self, NamedGate::T | NamedGate::CCX)
    }

    /// Catalog id of the gate.
    pub fn id(self) -> GateId {
        match self {
            NamedGate::I => GateId::I,
            NamedGate::X => GateId::X,
            NamedGate::Y => GateId::Y,
            NamedGate::Z => GateId::Z,
            NamedGate::H => GateId::H,
            NamedGate::S => GateId::S,
            NamedGate::Sdg => GateId::SDG,
            NamedGate::T => GateId::T,
            NamedGate::CX => GateId::CX,
            NamedGate::CZ => GateId::CZ,
            NamedGate::Swap => GateId::SWAP,
            NamedGate::CCX => GateId::CCX,
        }
    }
}

/// Static metadata of a catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct GateSpec {
    /// Catalog id.
    pub id: GateId,
    /// Short lowercase name.
    pub name: &'static str,
    /// Number of qudits the gate acts on.
    pub arity: u32,
    /// Number of constructor arguments (rotation angles).
    pub num_args: usize,
    /// Whether the gate is only defined for dimension 2.
    pub qubit_only: bool,
    /// Alias for reduced-gate-set engines.
    pub alias: Option<NamedGate>,
}

const fn spec(
    id: GateId,
    name: &'static str,
    arity: u32,
    num_args: usize,
    qubit_only: bool,
    alias: Option<NamedGate>,
) -> GateSpec {
    GateSpec {
        id,
        name,
        arity,
        num_args,
        qubit_only,
        alias,
    }
}

static CATALOG: [GateSpec; 16] = [
    spec(GateId::I, "id", 1, 0, false, Some(NamedGate::I)),
    spec(GateId::X, "x", 1, 0, false, Some(NamedGate::X)),
    spec(GateId::Y, "y", 1, 0, true, Some(NamedGate::Y)),
    spec(GateId::Z, "z", 1, 0, false, Some(NamedGate::Z)),
    spec(GateId::H, "h", 1, 0, false, Some(NamedGate::H)),
    spec(GateId::S, "s", 1, 0, true, Some(NamedGate::S)),
    spec(GateId::SDG, "sdg", 1, 0, true, Some(NamedGate::Sdg)),
    spec(GateId::T, "t", 1, 0, true, Some(NamedGate::T)),
    spec(GateId::RX, "rx", 1, 1, true, None),
    spec(GateId::RY, "ry", 1, 1, true, None),
    spec(GateId::RZ, "rz", 1, 1, true, None),
    spec(GateId::PHASE, "p", 1, 1, true, None),
    spec(GateId::CX, "cx", 2, 0, false, Some(NamedGate::CX)),
    spec(GateId::CZ, "cz", 2, 0, false, Some(NamedGate::CZ)),
    spec(GateId::SWAP, "swap", 2, 0, false, Some(NamedGate::Swap)),
    spec(GateId::CCX, "ccx", 3, 0, true, Some(NamedGate::CCX)),
];

/// A gate resolved for a concrete dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGate {
    /// Catalog id.
    pub id: GateId,
    /// Gate name.
    pub name: &'static str,
    /// Number of qudits acted on.
    pub arity: u32,
    /// Dimension of each qudit.
    pub dim: u32,
    /// Unitary of size `dim^arity × dim^arity`. The first target qudit is the
    /// most significant digit of the row/column index.
    pub matrix: Matrix,
    /// Alias for reduced-gate-set engines.
    pub alias: Option<NamedGate>,
}

/// Registry of the fixed gate set.
pub struct GateCatalog;

impl GateCatalog {
    /// Look up the static metadata for a gate id.
    pub fn spec(id: GateId) -> IrResult<&'static GateSpec> {
        CATALOG
            .iter()
            .find(|s| s.id == id)
            .ok_or(IrError::UnknownGate(id.0))
    }

    /// Iterate over all catalog entries.
    pub fn entries() -> impl Iterator<Item = &'static GateSpec> {
        CATALOG.iter()
    }

    /// Resolve a gate into its matrix for `dim`-level qudits.
    ///
    /// `qubit_count` is the number of target qudits the caller supplied; it
    /// must equal the gate's arity.
    pub fn resolve(
        id: GateId,
        args: &[f64],
        dim: u32,
        qubit_count: usize,
    ) -> IrResult<ResolvedGate> {
        let spec = Self::spec(id)?;

        if qubit_count != spec.arity as usize {
            return Err(IrError::QubitCountMismatch {
                gate_name: spec.name.to_string(),
                expected: spec.arity,
                got: qubit_count as u32,
            });
        }
        if args.len() < spec.num_args {
            return Err(IrError::MissingArgument {
                gate_name: spec.name.to_string(),
                expected: spec.num_args,
                got: args.len(),
            });
        }
        if dim < 2 || (spec.qubit_only && dim != 2) {
            return Err(IrError::UnsupportedDimension {
                what: spec.name.to_string(),
                dim,
            });
        }

        let d = dim as usize;
        let matrix = match id {
            GateId::I => identity(d),
            GateId::X => shift(d, 1),
            GateId::Y => qubit([
                [c(0.0, 0.0), c(0.0, -1.0)],
                [c(0.0, 1.0), c(0.0, 0.0)],
            ]),
            GateId::Z => clock(d, 1),
            GateId::H => fourier(d),
            GateId::S => phase(PI / 2.0),
            GateId::SDG => phase(-PI / 2.0),
            GateId::T => phase(PI / 4.0),
            GateId::RX => {
                let (co, si) = half_angle(args[0]);
                qubit([[c(co, 0.0), c(0.0, -si)], [c(0.0, -si), c(co, 0.0)]])
            }
            GateId::RY => {
                let (co, si) = half_angle(args[0]);
                qubit([[c(co, 0.0), c(-si, 0.0)], [c(si, 0.0), c(co, 0.0)]])
            }
            GateId::RZ => qubit([
                [Complex64::from_polar(1.0, -args[0] / 2.0), c(0.0, 0.0)],
                [c(0.0, 0.0), Complex64::from_polar(1.0, args[0] / 2.0)],
            ]),
            GateId::PHASE => phase(args[0]),
            GateId::CX => controlled_sum(d),
            GateId::CZ => controlled_clock(d),
            GateId::SWAP => qudit_swap(d),
            GateId::CCX => toffoli(),
            _ => return Err(IrError::UnknownGate(id.0)),
        };

        Ok(ResolvedGate {
            id,
            name: spec.name,
            arity: spec.arity,
            dim,
            matrix,
            alias: spec.alias,
        })
    }

    /// Resolve a named gate for `dim`-level qudits.
    pub fn named(gate: NamedGate, dim: u32) -> IrResult<ResolvedGate> {
        Self::resolve(gate.id(), &[], dim, gate.num_qubits() as usize)
    }
}

#[inline]
fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn half_angle(theta: f64) -> (f64, f64) {
    ((theta / 2.0).cos(), (theta / 2.0).sin())
}

fn qubit(rows: [[Complex64; 2]; 2]) -> Matrix {
    Array2::from_shape_fn((2, 2), |(r, col)| rows[r][col])
}

fn phase(theta: f64) -> Matrix {
    qubit([
        [c(1.0, 0.0), c(0.0, 0.0)],
        [c(0.0, 0.0), Complex64::from_polar(1.0, theta)],
    ])
}

/// Primitive d-th root of unity raised to `k`.
fn omega(d: usize, k: usize) -> Complex64 {
    Complex64::from_polar(1.0, 2.0 * PI * (k % d) as f64 / d as f64)
}

/// Identity on one qudit.
pub fn identity(d: usize) -> Matrix {
    Array2::eye(d)
}

/// Cyclic shift `X^k`: `|j⟩ → |j+k mod d⟩`.
pub fn shift(d: usize, k: usize) -> Matrix {
    let mut m = Array2::zeros((d, d));
    for j in 0..d {
        m[[(j + k) % d, j]] = c(1.0, 0.0);
    }
    m
}

/// Clock `Z^k`: `|j⟩ → ω^{jk} |j⟩`.
pub fn clock(d: usize, k: usize) -> Matrix {
    let mut m = Array2::zeros((d, d));
    for j in 0..d {
        m[[j, j]] = omega(d, j * k);
    }
    m
}

/// Generalised Pauli `X^a · Z^b`.
pub fn pauli(d: usize, a: usize, b: usize) -> Matrix {
    shift(d, a).dot(&clock(d, b))
}

fn fourier(d: usize) -> Matrix {
    let norm = if d == 2 {
        FRAC_1_SQRT_2
    } else {
        1.0 / (d as f64).sqrt()
    };
    Array2::from_shape_fn((d, d), |(j, k)| omega(d, j * k) * norm)
}

fn controlled_sum(d: usize) -> Matrix {
    let n = d * d;
    let mut m = Array2::zeros((n, n));
    for ctrl in 0..d {
        for tgt in 0..d {
            m[[ctrl * d + (tgt + ctrl) % d, ctrl * d + tgt]] = c(1.0, 0.0);
        }
    }
    m
}

fn controlled_clock(d: usize) -> Matrix {
    let n = d * d;
    let mut m = Array2::zeros((n, n));
    for ctrl in 0..d {
        for tgt in 0..d {
            m[[ctrl * d + tgt, ctrl * d + tgt]] = omega(d, ctrl * tgt);
        }
    }
    m
}

fn qudit_swap(d: usize) -> Matrix {
    let n = d * d;
    let mut m = Array2::zeros((n, n));
    for a in 0..d {
        for b in 0..d {
            m[[b * d + a, a * d + b]] = c(1.0, 0.0);
        }
    }
    m
}

fn toffoli() -> Matrix {
    let mut m = Array2::eye(8);
    m[[6, 6]] = c(0.0, 0.0);
    m[[7, 7]] = c(0.0, 0.0);
    m[[6, 7]] = c(1.0, 0.0);
    m[[7, 6]] = c(1.0, 0.0);
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_unitary(m: &Matrix) -> bool {
        let n = m.nrows();
        let adjoint = m.t().mapv(|z| z.conj());
        let product = adjoint.dot(m);
        let eye: Matrix = Array2::eye(n);
        product
            .iter()
            .zip(eye.iter())
            .all(|(a, b)| (a - b).norm() < 1e-10)
    }

    #[test]
    fn test_catalog_gates_are_unitary() {
        for spec in GateCatalog::entries() {
            let args = vec![0.3; spec.num_args];
            for dim in [2, 3, 4] {
                if spec.qubit_only && dim != 2 {
                    continue;
                }
                let gate = GateCatalog::resolve(spec.id, &args, dim, spec.arity as usize).unwrap();
                let expected = (dim as usize).pow(spec.arity);
                assert_eq!(gate.matrix.dim(), (expected, expected), "{}", spec.name);
                assert!(is_unitary(&gate.matrix), "{} dim {dim}", spec.name);
            }
        }
    }

    #[test]
    fn test_unknown_gate() {
        assert_eq!(
            GateCatalog::resolve(GateId(999), &[], 2, 1),
            Err(IrError::UnknownGate(999))
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let err = GateCatalog::resolve(GateId::CX, &[], 2, 1).unwrap_err();
        assert!(matches!(
            err,
            IrError::QubitCountMismatch {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_rotation_needs_angle() {
        let err = GateCatalog::resolve(GateId::RX, &[], 2, 1).unwrap_err();
        assert!(matches!(err, IrError::MissingArgument { expected: 1, .. }));
    }

    #[test]
    fn test_qubit_only_gate_rejects_qutrit() {
        let err = GateCatalog::resolve(GateId::T, &[], 3, 1).unwrap_err();
        assert!(matches!(err, IrError::UnsupportedDimension { dim: 3, .. }));
    }

    #[test]
    fn test_qubit_cx_matches_cnot() {
        let cx = GateCatalog::resolve(GateId::CX, &[], 2, 2).unwrap();
        // |10⟩ (index 2) → |11⟩ (index 3)
        assert_eq!(cx.matrix[[3, 2]], c(1.0, 0.0));
        assert_eq!(cx.matrix[[2, 3]], c(1.0, 0.0));
        assert_eq!(cx.matrix[[0, 0]], c(1.0, 0.0));
        assert_eq!(cx.alias, Some(NamedGate::CX));
    }

    #[test]
    fn test_qutrit_shift_cycles() {
        let x = GateCatalog::resolve(GateId::X, &[], 3, 1).unwrap();
        let cubed = x.matrix.dot(&x.matrix).dot(&x.matrix);
        let eye: Matrix = Array2::eye(3);
        assert!(
            cubed
                .iter()
                .zip(eye.iter())
                .all(|(a, b)| (a - b).norm() < 1e-12)
        );
    }

    #[test]
    fn test_named_gate_round_trip() {
        for gate in [NamedGate::H, NamedGate::CZ, NamedGate::CCX] {
            let resolved = GateCatalog::named(gate, 2).unwrap();
            assert_eq!(resolved.alias, Some(gate));
            assert_eq!(resolved.arity, gate.num_qubits());
        }
        assert!(NamedGate::S.is_clifford());
        assert!(!NamedGate::T.is_clifford());
    }
}
