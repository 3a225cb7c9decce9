//! Backend configuration.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML, or JSON for `.json` paths)
//! 2. Environment variables (with `QFRAME_` prefix)
//!
//! Environment variables override file values, which override defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use qframe_engine::{
    CircuitEngine, DenseEngine, Engine, FrameConfig, StabilizerEngine, validate_layout,
};
use qframe_ir::{AddressLayout, ChannelKind, NoisePattern};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Engine and topology a backend runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process dense qudit engine.
    #[default]
    Dense,
    /// Dense qudit engine spread over worker threads.
    ParallelDense,
    /// Buffered qubit statevector engine spread over worker threads.
    ParallelCircuit,
    /// In-process stabilizer tableau over one flat register.
    Stabilizer,
}

impl BackendKind {
    /// Name used in configuration and logs.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Dense => "dense",
            BackendKind::ParallelDense => "parallel_dense",
            BackendKind::ParallelCircuit => "parallel_circuit",
            BackendKind::Stabilizer => "stabilizer",
        }
    }

    /// Whether the backend runs a coordinator with worker threads.
    pub fn is_parallel(self) -> bool {
        matches!(
            self,
            BackendKind::ParallelDense | BackendKind::ParallelCircuit
        )
    }

    /// Whether the backend can hold qudits of dimension `dim`.
    pub fn supports_dimension(self, dim: u32) -> bool {
        match self {
            BackendKind::Dense | BackendKind::ParallelDense => dim >= 2,
            BackendKind::ParallelCircuit | BackendKind::Stabilizer => dim == 2,
        }
    }

    /// Largest register of dimension `dim` the backend's engine builds.
    pub fn max_qudits(self, dim: u32) -> usize {
        match self {
            BackendKind::Dense | BackendKind::ParallelDense => DenseEngine::max_qudits(dim),
            BackendKind::ParallelCircuit => CircuitEngine::max_qudits(dim),
            BackendKind::Stabilizer => StabilizerEngine::max_qudits(dim),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "dense" => Ok(BackendKind::Dense),
            "parallel_dense" => Ok(BackendKind::ParallelDense),
            "parallel_circuit" => Ok(BackendKind::ParallelCircuit),
            "stabilizer" => Ok(BackendKind::Stabilizer),
            other => Err(ConfigError::ParseError(format!(
                "Unknown backend kind: {other}"
            ))),
        }
    }
}

/// Complete backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Engine and topology.
    #[serde(default)]
    pub kind: BackendKind,

    /// Number of worker threads for parallel kinds.
    #[serde(default = "default_process_count")]
    pub process_count: usize,

    /// Chunk classes, split evenly across workers unless `workers` is set.
    #[serde(default)]
    pub frames: FrameConfig,

    /// Explicit chunk classes per worker.
    #[serde(default)]
    pub workers: Option<Vec<FrameConfig>>,

    /// Register size per dimension for the flat-register backend.
    #[serde(default)]
    pub flat_capacity: BTreeMap<u32, usize>,

    /// Noise attached to every chunk.
    #[serde(default)]
    pub noise: NoisePattern,

    /// Seed for reproducible sampling.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_process_count() -> usize {
    2
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            kind: BackendKind::default(),
            process_count: default_process_count(),
            frames: FrameConfig::default(),
            workers: None,
            flat_capacity: BTreeMap::new(),
            noise: NoisePattern::default(),
            seed: None,
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ParseError(format!("Invalid value for {name}: {raw}"))),
        None => Ok(None),
    }
}

impl BackendConfig {
    /// Load configuration from a YAML (or `.json`) file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: BackendConfig = serde_yaml_ng::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: BackendConfig =
            serde_json::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.merge_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Merge `QFRAME_*` environment variables into this configuration.
    pub fn merge_env(self) -> Result<Self, ConfigError> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    /// Merge overrides from an arbitrary variable source.
    ///
    /// Only variables that are present override the current values.
    pub fn merge_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(kind) = parse_var(&lookup, "QFRAME_BACKEND")? {
            self.kind = kind;
        }
        if let Some(count) = parse_var(&lookup, "QFRAME_PROCESS_COUNT")? {
            self.process_count = count;
        }
        if let Some(seed) = parse_var(&lookup, "QFRAME_SEED")? {
            self.seed = Some(seed);
        }
        if let Some(capacity) = parse_var(&lookup, "QFRAME_FLAT_CAPACITY")? {
            self.flat_capacity.insert(2, capacity);
        }

        // Noise
        if let Some(kind) = parse_var::<ChannelKind>(&lookup, "QFRAME_NOISE_CHANNEL")? {
            self.noise.state_prep_channel = kind;
            self.noise.measurement_channel = kind;
            self.noise.gate_error_channel = kind;
            self.noise.scramble_channel = kind;
        }
        if let Some(p) = parse_var(&lookup, "QFRAME_STATE_PREP_PROBABILITY")? {
            self.noise.state_prep_probability = p;
        }
        if let Some(p) = parse_var(&lookup, "QFRAME_MEASUREMENT_PROBABILITY")? {
            self.noise.measurement_probability = p;
        }
        if let Some(p) = parse_var(&lookup, "QFRAME_GATE_ERROR_PROBABILITY")? {
            self.noise.gate_error_probability = p;
        }
        if let Some(p) = parse_var(&lookup, "QFRAME_SCRAMBLE_PROBABILITY")? {
            self.noise.scramble_probability = p;
        }

        Ok(self)
    }

    /// Frame classes of every worker, in worker order.
    pub fn worker_frames(&self) -> Vec<FrameConfig> {
        match &self.workers {
            Some(workers) => workers.clone(),
            None => self.frames.split(self.process_count),
        }
    }

    /// Chunk classes of `frames` and every explicit worker partition.
    fn all_frames(&self) -> FrameConfig {
        let mut all = self.frames.clone();
        for worker in self.workers.iter().flatten() {
            all.merge(worker);
        }
        all
    }

    /// Every dimension the configuration allocates.
    fn dimensions(&self) -> Vec<u32> {
        let mut dims: Vec<u32> = if self.kind == BackendKind::Stabilizer {
            self.flat_capacity.keys().copied().collect()
        } else {
            self.all_frames().iter().map(|(dim, _, _)| dim).collect()
        };
        dims.dedup();
        dims
    }

    fn check_register_size(&self, dim: u32, size: usize) -> Result<(), ConfigError> {
        let max = self.kind.max_qudits(dim);
        if size > max {
            return Err(ConfigError::ValidationError(format!(
                "Backend '{}' simulates at most {max} qudits of dimension {dim} per register, \
                 configured {size}",
                self.kind
            )));
        }
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dims = self.dimensions();
        for &dim in &dims {
            if !self.kind.supports_dimension(dim) {
                return Err(ConfigError::ValidationError(format!(
                    "Backend '{}' does not support dimension {dim}",
                    self.kind
                )));
            }
        }

        // Noise must build a valid channel for every dimension in use.
        let mut rng = StdRng::seed_from_u64(0);
        for &dim in &dims {
            self.noise
                .validate(dim, &mut rng)
                .map_err(|e| ConfigError::ValidationError(format!("Invalid noise pattern: {e}")))?;
        }

        if self.kind == BackendKind::Stabilizer {
            for (&dim, &capacity) in &self.flat_capacity {
                self.check_register_size(dim, capacity)?;
            }
        } else {
            for (dim, size, count) in self.all_frames().iter() {
                if count > 0 {
                    self.check_register_size(dim, size)?;
                }
            }
        }

        let layout = AddressLayout::segmented();
        match self.kind {
            BackendKind::Dense => {
                validate_layout(&layout, 0, &self.frames)
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            }
            BackendKind::ParallelDense | BackendKind::ParallelCircuit => {
                if self.process_count == 0 {
                    return Err(ConfigError::ValidationError(
                        "process_count must be greater than 0".to_string(),
                    ));
                }
                if self.process_count as u64 > layout.max_owner() + 1 {
                    return Err(ConfigError::ValidationError(format!(
                        "process_count {} exceeds the {} encodable worker ids",
                        self.process_count,
                        layout.max_owner() + 1
                    )));
                }
                if let Some(workers) = &self.workers {
                    if workers.len() != self.process_count {
                        return Err(ConfigError::ValidationError(format!(
                            "workers lists {} frame configs for process_count {}",
                            workers.len(),
                            self.process_count
                        )));
                    }
                }
                for (owner, frames) in self.worker_frames().iter().enumerate() {
                    validate_layout(&layout, owner as u32, frames)
                        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
                }
            }
            BackendKind::Stabilizer => {
                let max_slots = AddressLayout::flat().max_chunk() + 1;
                for (&dim, &capacity) in &self.flat_capacity {
                    if capacity as u64 > max_slots {
                        return Err(ConfigError::ValidationError(format!(
                            "flat_capacity {capacity} for dimension {dim} exceeds {max_slots} slots"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
