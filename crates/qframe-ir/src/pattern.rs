//! Backend-wide noise pattern.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::IrResult;
use crate::noise::{Channel, ChannelKind};

/// Four independent `(channel kind, probability)` pairs attached to a backend.
///
/// - state preparation: applied whenever a qudit is (re)initialised,
/// - measurement: applied before a destructive measurement collapses,
/// - gate: applied to the targets of a noisy gate before the gate,
/// - scramble: applied after a destructive measurement and by explicit
///   channel-error injection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoisePattern {
    #[serde(default)]
    pub state_prep_probability: f64,
    #[serde(default)]
    pub measurement_probability: f64,
    #[serde(default)]
    pub gate_error_probability: f64,
    #[serde(default)]
    pub scramble_probability: f64,
    #[serde(default)]
    pub state_prep_channel: ChannelKind,
    #[serde(default)]
    pub measurement_channel: ChannelKind,
    #[serde(default)]
    pub gate_error_channel: ChannelKind,
    #[serde(default)]
    pub scramble_channel: ChannelKind,
}

impl NoisePattern {
    /// A pattern whose four channels are all identity.
    pub fn noiseless() -> Self {
        Self::default()
    }

    /// Use the same channel kind and probability for all four slots.
    pub fn uniform(kind: ChannelKind, p: f64) -> Self {
        Self {
            state_prep_probability: p,
            measurement_probability: p,
            gate_error_probability: p,
            scramble_probability: p,
            state_prep_channel: kind,
            measurement_channel: kind,
            gate_error_channel: kind,
            scramble_channel: kind,
        }
    }

    /// Whether every slot is guaranteed to act as the identity.
    pub fn is_noiseless(&self) -> bool {
        [
            (self.state_prep_channel, self.state_prep_probability),
            (self.measurement_channel, self.measurement_probability),
            (self.gate_error_channel, self.gate_error_probability),
            (self.scramble_channel, self.scramble_probability),
        ]
        .iter()
        .all(|(kind, p)| *kind == ChannelKind::NoNoise || *p == 0.0)
    }

    /// Check that every slot builds a valid channel for `dim`.
    pub fn validate<R: Rng + ?Sized>(&self, dim: u32, rng: &mut R) -> IrResult<()> {
        self.state_prep(dim, rng)?;
        self.measurement(dim, rng)?;
        self.gate(dim, rng)?;
        self.scramble(dim, rng)?;
        Ok(())
    }

    /// State-preparation channel.
    pub fn state_prep<R: Rng + ?Sized>(&self, dim: u32, rng: &mut R) -> IrResult<Channel> {
        Channel::instantiate(self.state_prep_channel, self.state_prep_probability, dim, rng)
    }

    /// Measurement channel.
    pub fn measurement<R: Rng + ?Sized>(&self, dim: u32, rng: &mut R) -> IrResult<Channel> {
        Channel::instantiate(
            self.measurement_channel,
            self.measurement_probability,
            dim,
            rng,
        )
    }

    /// Gate-error channel.
    pub fn gate<R: Rng + ?Sized>(&self, dim: u32, rng: &mut R) -> IrResult<Channel> {
        Channel::instantiate(
            self.gate_error_channel,
            self.gate_error_probability,
            dim,
            rng,
        )
    }

    /// Scramble channel with the configured probability.
    pub fn scramble<R: Rng + ?Sized>(&self, dim: u32, rng: &mut R) -> IrResult<Channel> {
        self.scramble_with(self.scramble_probability, dim, rng)
    }

    /// Scramble channel kind with an explicit probability.
    pub fn scramble_with<R: Rng + ?Sized>(
        &self,
        probability: f64,
        dim: u32,
        rng: &mut R,
    ) -> IrResult<Channel> {
        Channel::instantiate(self.scramble_channel, probability, dim, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_noiseless_pattern() {
        let pattern = NoisePattern::noiseless();
        assert!(pattern.is_noiseless());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(pattern.gate(2, &mut rng).unwrap().is_identity());
    }

    #[test]
    fn test_pattern_deserializes_with_defaults() {
        let json = r#"{"gate_error_probability": 0.01, "gate_error_channel": "depolarizing"}"#;
        let pattern: NoisePattern = serde_json::from_str(json).unwrap();
        assert_eq!(pattern.gate_error_channel, ChannelKind::Depolarizing);
        assert_eq!(pattern.state_prep_channel, ChannelKind::NoNoise);
        assert!(!pattern.is_noiseless());
    }

    #[test]
    fn test_invalid_probability_fails_validation() {
        let pattern = NoisePattern::uniform(ChannelKind::BitFlip, 2.0);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(pattern.validate(2, &mut rng).is_err());
    }
}
