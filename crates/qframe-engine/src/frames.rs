//! Frame configuration: `dimension → frame size → count`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Number of chunks per `(dimension, frame size)` class.
///
/// Used both for static pre-allocation and for reporting free capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameConfig(BTreeMap<u32, BTreeMap<usize, usize>>);

impl FrameConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` chunks of `size` qudits of dimension `dim`.
    #[must_use]
    pub fn with(mut self, dim: u32, size: usize, count: usize) -> Self {
        self.add(dim, size, count);
        self
    }

    /// Add `count` chunks of `size` qudits of dimension `dim`.
    pub fn add(&mut self, dim: u32, size: usize, count: usize) {
        *self.0.entry(dim).or_default().entry(size).or_default() += count;
    }

    /// Number of chunks of the class.
    pub fn get(&self, dim: u32, size: usize) -> usize {
        self.0
            .get(&dim)
            .and_then(|sizes| sizes.get(&size))
            .copied()
            .unwrap_or(0)
    }

    /// Overwrite the count of a class.
    pub fn set(&mut self, dim: u32, size: usize, count: usize) {
        self.0.entry(dim).or_default().insert(size, count);
    }

    /// Iterate `(dim, size, count)` in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, usize, usize)> + '_ {
        self.0.iter().flat_map(|(dim, sizes)| {
            sizes
                .iter()
                .map(move |(size, count)| (*dim, *size, *count))
        })
    }

    /// Total number of chunks.
    pub fn total_chunks(&self) -> usize {
        self.iter().map(|(_, _, count)| count).sum()
    }

    /// Whether no chunk is declared.
    pub fn is_empty(&self) -> bool {
        self.total_chunks() == 0
    }

    /// Split evenly across `parts` workers; the remainder goes to the first ones.
    pub fn split(&self, parts: usize) -> Vec<FrameConfig> {
        let parts = parts.max(1);
        let mut out = vec![FrameConfig::new(); parts];
        for (dim, size, count) in self.iter() {
            let base = count / parts;
            let remainder = count % parts;
            for (i, part) in out.iter_mut().enumerate() {
                let share = base + usize::from(i < remainder);
                if share > 0 {
                    part.add(dim, size, share);
                }
            }
        }
        out
    }

    /// Element-wise sum.
    pub fn merge(&mut self, other: &FrameConfig) {
        for (dim, size, count) in other.iter() {
            self.add(dim, size, count);
        }
    }
}

impl FromIterator<(u32, usize, usize)> for FrameConfig {
    fn from_iter<I: IntoIterator<Item = (u32, usize, usize)>>(iter: I) -> Self {
        let mut config = FrameConfig::new();
        for (dim, size, count) in iter {
            config.add(dim, size, count);
        }
        config
    }
}
