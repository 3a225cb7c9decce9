//! Noise channels.
//!
//! A [`Channel`] is a weighted list of [`Branch`]es. Engines consume it in one
//! of two shapes derived from the same branch list:
//!
//! - **mixture form** ([`Channel::mixture`]): `(probability, operator)` pairs
//!   applied as a probabilistic operator mixture,
//! - **sampled-gate form** ([`Channel::sample_gates`]): one branch is drawn and
//!   returned as named gates, for engines that only accept gate appends.
//!
//! For qudits (`dim > 2`) the Pauli matrices are replaced by the cyclic shift
//! `X^a` and the phase ladder `Z^b`.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};
use crate::gate::{Matrix, NamedGate, identity, pauli};

/// Kind of noise channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Identity channel.
    #[default]
    NoNoise,
    /// Applies `X` (shift) with probability `p`.
    BitFlip,
    /// Applies `Z` (clock) with probability `p`.
    PhaseFlip,
    /// Applies a combined bit and phase flip (`Y` up to phase) with probability `p`.
    BitPhaseFlip,
    /// Applies each non-identity Pauli with equal share of `p`.
    Depolarizing,
    /// Applies `X`, `Y`, `Z` with independent probabilities.
    AsymmetricDepolarizing,
    /// Resets to `|0⟩` with probability `p`.
    Reset,
}

impl ChannelKind {
    /// Get the configuration name of this channel kind.
    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::NoNoise => "no_noise",
            ChannelKind::BitFlip => "bit_flip",
            ChannelKind::PhaseFlip => "phase_flip",
            ChannelKind::BitPhaseFlip => "bit_phase_flip",
            ChannelKind::Depolarizing => "depolarizing",
            ChannelKind::AsymmetricDepolarizing => "asymmetric_depolarizing",
            ChannelKind::Reset => "reset",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChannelKind {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "no_noise" | "none" | "identity" => Ok(ChannelKind::NoNoise),
            "bit_flip" => Ok(ChannelKind::BitFlip),
            "phase_flip" => Ok(ChannelKind::PhaseFlip),
            "bit_phase_flip" | "y_flip" => Ok(ChannelKind::BitPhaseFlip),
            "depolarizing" => Ok(ChannelKind::Depolarizing),
            "asymmetric_depolarizing" => Ok(ChannelKind::AsymmetricDepolarizing),
            "reset" => Ok(ChannelKind::Reset),
            other => Err(IrError::InvalidChannelParams(format!(
                "unknown channel kind '{other}'"
            ))),
        }
    }
}

/// Probability parameters of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChannelParams {
    /// One combined error probability.
    Single(f64),
    /// Independent `X`, `Y`, `Z` probabilities (asymmetric depolarizing only).
    Asymmetric {
        /// Probability of an `X` error.
        px: f64,
        /// Probability of a `Y` error.
        py: f64,
        /// Probability of a `Z` error.
        pz: f64,
    },
}

impl From<f64> for ChannelParams {
    fn from(p: f64) -> Self {
        ChannelParams::Single(p)
    }
}

/// One outcome of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Nothing happens.
    Identity,
    /// Generalised Pauli `X^x · Z^z`.
    Pauli {
        /// Shift power.
        x: u32,
        /// Clock power.
        z: u32,
    },
    /// Reset to `|0⟩`.
    Reset,
}

/// Operator of the mixture form.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelOperator {
    /// Single-qudit unitary.
    Unitary(Matrix),
    /// Non-unitary reset to `|0⟩`.
    Reset,
}

/// Action of the sampled-gate form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseAction {
    /// Append a named gate.
    Gate(NamedGate),
    /// Reset the qubit to `|0⟩`.
    Reset,
}

/// A single-qudit noise channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    kind: ChannelKind,
    dim: u32,
    branches: Vec<(f64, Branch)>,
}

fn check_probability(p: f64, what: &str) -> IrResult<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(IrError::InvalidProbability(format!(
            "{what} must be in [0, 1], got {p}"
        )))
    }
}

impl Channel {
    /// The identity channel on `dim`-level qudits.
    pub fn identity(dim: u32) -> Self {
        Self {
            kind: ChannelKind::NoNoise,
            dim,
            branches: vec![(1.0, Branch::Identity)],
        }
    }

    /// Build a channel.
    ///
    /// `rng` is only consumed when an asymmetric depolarizing channel is given
    /// a single combined probability, which is then split at random across
    /// `X`, `Y` and `Z`.
    pub fn instantiate<R: Rng + ?Sized>(
        kind: ChannelKind,
        params: impl Into<ChannelParams>,
        dim: u32,
        rng: &mut R,
    ) -> IrResult<Self> {
        if dim < 2 {
            return Err(IrError::UnsupportedDimension {
                what: kind.name().to_string(),
                dim,
            });
        }
        let params = params.into();
        let d = dim;

        let mut weighted: Vec<(f64, Branch)> = match (kind, params) {
            (ChannelKind::NoNoise, _) => Vec::new(),
            (ChannelKind::AsymmetricDepolarizing, params) => {
                if d != 2 {
                    return Err(IrError::UnsupportedDimension {
                        what: kind.name().to_string(),
                        dim,
                    });
                }
                let (px, py, pz) = match params {
                    ChannelParams::Single(p) => {
                        check_probability(p, "combined probability")?;
                        let a = rng.gen_range(0.0..=p);
                        let b = rng.gen_range(0.0..=p);
                        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                        (lo, hi - lo, p - hi)
                    }
                    ChannelParams::Asymmetric { px, py, pz } => {
                        check_probability(px, "px")?;
                        check_probability(py, "py")?;
                        check_probability(pz, "pz")?;
                        if px + py + pz > 1.0 + f64::EPSILON {
                            return Err(IrError::InvalidProbability(format!(
                                "px + py + pz must not exceed 1, got {}",
                                px + py + pz
                            )));
                        }
                        (px, py, pz)
                    }
                };
                vec![
                    (px, Branch::Pauli { x: 1, z: 0 }),
                    (py, Branch::Pauli { x: 1, z: 1 }),
                    (pz, Branch::Pauli { x: 0, z: 1 }),
                ]
            }
            (_, ChannelParams::Asymmetric { .. }) => {
                return Err(IrError::InvalidChannelParams(format!(
                    "{kind} takes a single probability"
                )));
            }
            (kind, ChannelParams::Single(p)) => {
                check_probability(p, kind.name())?;
                let share = p / f64::from(d - 1);
                match kind {
                    ChannelKind::BitFlip => (1..d)
                        .map(|k| (share, Branch::Pauli { x: k, z: 0 }))
                        .collect(),
                    ChannelKind::PhaseFlip => (1..d)
                        .map(|k| (share, Branch::Pauli { x: 0, z: k }))
                        .collect(),
                    ChannelKind::BitPhaseFlip => (1..d)
                        .map(|k| (share, Branch::Pauli { x: k, z: k }))
                        .collect(),
                    ChannelKind::Depolarizing => {
                        let share = p / f64::from(d * d - 1);
                        (0..d)
                            .flat_map(|x| (0..d).map(move |z| (x, z)))
                            .filter(|&(x, z)| (x, z) != (0, 0))
                            .map(|(x, z)| (share, Branch::Pauli { x, z }))
                            .collect()
                    }
                    ChannelKind::Reset => vec![(p, Branch::Reset)],
                    ChannelKind::NoNoise | ChannelKind::AsymmetricDepolarizing => Vec::new(),
                }
            }
        };

        weighted.retain(|(w, _)| *w > 0.0);
        let error_mass: f64 = weighted.iter().map(|(w, _)| w).sum();
        let mut branches = Vec::with_capacity(weighted.len() + 1);
        if error_mass < 1.0 {
            branches.push((1.0 - error_mass, Branch::Identity));
        }
        branches.extend(weighted);

        Ok(Self {
            kind,
            dim,
            branches,
        })
    }

    /// Channel kind.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Qudit dimension.
    pub fn dim(&self) -> u32 {
        self.dim
    }

    /// Weighted branches; weights sum to 1.
    pub fn branches(&self) -> &[(f64, Branch)] {
        &self.branches
    }

    /// Whether the channel can only ever act as the identity.
    pub fn is_identity(&self) -> bool {
        self.branches.iter().all(|(_, b)| *b == Branch::Identity)
    }

    /// Mixture form: probabilities summing to 1 with their operators.
    pub fn mixture(&self) -> Vec<(f64, ChannelOperator)> {
        let d = self.dim as usize;
        self.branches
            .iter()
            .map(|(w, branch)| {
                let op = match *branch {
                    Branch::Identity => ChannelOperator::Unitary(identity(d)),
                    Branch::Pauli { x, z } => {
                        ChannelOperator::Unitary(pauli(d, x as usize, z as usize))
                    }
                    Branch::Reset => ChannelOperator::Reset,
                };
                (*w, op)
            })
            .collect()
    }

    /// Draw one branch by walking the cumulative weights.
    pub fn sample_branch<R: Rng + ?Sized>(&self, rng: &mut R) -> Branch {
        let r: f64 = rng.r#gen();
        let mut cumulative = 0.0;
        for (w, branch) in &self.branches {
            cumulative += w;
            if r < cumulative {
                return *branch;
            }
        }
        self.branches
            .last()
            .map_or(Branch::Identity, |(_, branch)| *branch)
    }

    /// Sampled-gate form: draw an outcome and return the gates to append.
    ///
    /// Only defined for qubits. The no-noise outcome is `[Gate(I)]`.
    pub fn sample_gates<R: Rng + ?Sized>(&self, rng: &mut R) -> IrResult<Vec<NoiseAction>> {
        if self.dim != 2 {
            return Err(IrError::UnsupportedDimension {
                what: format!("sampled {}", self.kind),
                dim: self.dim,
            });
        }
        let action = match self.sample_branch(rng) {
            Branch::Identity | Branch::Pauli { x: 0, z: 0 } => NoiseAction::Gate(NamedGate::I),
            Branch::Pauli { x: _, z: 0 } => NoiseAction::Gate(NamedGate::X),
            Branch::Pauli { x: 0, z: _ } => NoiseAction::Gate(NamedGate::Z),
            Branch::Pauli { .. } => NoiseAction::Gate(NamedGate::Y),
            Branch::Reset => NoiseAction::Reset,
        };
        Ok(vec![action])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn total_weight(channel: &Channel) -> f64 {
        channel.branches().iter().map(|(w, _)| w).sum()
    }

    #[test]
    fn test_zero_depolarizing_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        let channel = Channel::instantiate(ChannelKind::Depolarizing, 0.0, 2, &mut rng).unwrap();
        assert!(channel.is_identity());

        let mixture = channel.mixture();
        assert_eq!(mixture.len(), 1);
        assert_eq!(mixture[0].1, ChannelOperator::Unitary(identity(2)));

        for _ in 0..1000 {
            assert_eq!(
                channel.sample_gates(&mut rng).unwrap(),
                vec![NoiseAction::Gate(NamedGate::I)]
            );
        }
    }

    #[test]
    fn test_depolarizing_weights() {
        let mut rng = StdRng::seed_from_u64(1);
        let channel = Channel::instantiate(ChannelKind::Depolarizing, 0.3, 2, &mut rng).unwrap();
        assert_eq!(channel.branches().len(), 4);
        assert!((total_weight(&channel) - 1.0).abs() < 1e-12);
        for (w, branch) in channel.branches() {
            match branch {
                Branch::Identity => assert!((w - 0.7).abs() < 1e-12),
                _ => assert!((w - 0.1).abs() < 1e-12),
            }
        }
    }

    #[test]
    fn test_qutrit_depolarizing_covers_all_paulis() {
        let mut rng = StdRng::seed_from_u64(1);
        let channel = Channel::instantiate(ChannelKind::Depolarizing, 0.8, 3, &mut rng).unwrap();
        // identity + 8 non-trivial (a, b) pairs
        assert_eq!(channel.branches().len(), 9);
        assert!((total_weight(&channel) - 1.0).abs() < 1e-12);
        assert!(channel.sample_gates(&mut rng).is_err());
    }

    #[test]
    fn test_certain_bit_flip_samples_x() {
        let mut rng = StdRng::seed_from_u64(3);
        let channel = Channel::instantiate(ChannelKind::BitFlip, 1.0, 2, &mut rng).unwrap();
        for _ in 0..100 {
            assert_eq!(
                channel.sample_gates(&mut rng).unwrap(),
                vec![NoiseAction::Gate(NamedGate::X)]
            );
        }
    }

    #[test]
    fn test_asymmetric_single_probability_is_partitioned() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let channel = Channel::instantiate(
                ChannelKind::AsymmetricDepolarizing,
                0.4,
                2,
                &mut rng,
            )
            .unwrap();
            let error: f64 = channel
                .branches()
                .iter()
                .filter(|(_, b)| *b != Branch::Identity)
                .map(|(w, _)| w)
                .sum();
            assert!((error - 0.4).abs() < 1e-12);
        }
    }

    #[test]
    fn test_asymmetric_bound_violation() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = Channel::instantiate(
            ChannelKind::AsymmetricDepolarizing,
            ChannelParams::Asymmetric {
                px: 0.5,
                py: 0.4,
                pz: 0.3,
            },
            2,
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, IrError::InvalidProbability(_)));
    }

    #[test]
    fn test_probability_out_of_range() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(Channel::instantiate(ChannelKind::BitFlip, 1.5, 2, &mut rng).is_err());
        assert!(Channel::instantiate(ChannelKind::BitFlip, -0.1, 2, &mut rng).is_err());
    }

    #[test]
    fn test_reset_mixture() {
        let mut rng = StdRng::seed_from_u64(0);
        let channel = Channel::instantiate(ChannelKind::Reset, 0.25, 3, &mut rng).unwrap();
        let mixture = channel.mixture();
        assert_eq!(mixture.len(), 2);
        assert_eq!(mixture[1], (0.25, ChannelOperator::Reset));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "bit-flip".parse::<ChannelKind>().unwrap(),
            ChannelKind::BitFlip
        );
        assert_eq!(
            "Depolarizing".parse::<ChannelKind>().unwrap(),
            ChannelKind::Depolarizing
        );
        assert!("leakage".parse::<ChannelKind>().is_err());
    }
}
