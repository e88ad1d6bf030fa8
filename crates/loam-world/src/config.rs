use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::Path;

/// Streaming and caching parameters for a world.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Used only when the chunk store holds no world data yet.
    pub seed: Option<i64>,
    /// Half-extent of the visible window, in chunks.
    pub render_distance: i32,
    /// Absent: flat window of chunk columns at `cy = 0`.
    pub vertical_radius: Option<i32>,
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub meta_cache_buckets: usize,
    pub meta_cache_associativity: usize,
    pub flush_interval_ms: u64,
    pub tick_ms: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: None,
            render_distance: 5,
            vertical_radius: None,
            workers: None,
            queue_capacity: None,
            meta_cache_buckets: 64,
            meta_cache_associativity: 4,
            flush_interval_ms: 10_000,
            tick_ms: 100,
        }
    }
}

impl WorldConfig {
    #[inline]
    pub fn render_distance(&self) -> i32 {
        self.render_distance.max(1)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.filter(|n| *n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8)
        })
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .filter(|n| *n > 0)
            .unwrap_or_else(|| ((self.render_distance() as usize) << 2).max(4))
    }
}

pub fn load_config_from_path(path: &Path) -> Result<WorldConfig, Box<dyn Error>> {
    let s = fs::read_to_string(path)?;
    let cfg: WorldConfig = toml::from_str(&s)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: WorldConfig = toml::from_str("render_distance = 3\nseed = 42\n").unwrap();
        assert_eq!(cfg.render_distance, 3);
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.meta_cache_associativity, 4);
        assert_eq!(cfg.queue_capacity(), 12);
        assert!(cfg.vertical_radius.is_none());
    }

    #[test]
    fn explicit_workers_override_parallelism() {
        let cfg = WorldConfig {
            workers: Some(3),
            ..WorldConfig::default()
        };
        assert_eq!(cfg.worker_count(), 3);
    }
}
