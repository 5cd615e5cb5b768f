//! Statistics tracking for the tank.

use crate::organism::Registry;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Side-effect-free summary handed to the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TankStats {
    pub tick_count: u64,
    pub population: usize,
    /// Total germ energy per cell
    pub energy_density: f64,
}

/// Statistics snapshot for a tick
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Completed ticks
    pub tick: u64,
    /// Live germs
    pub population: usize,
    /// Live food particles
    pub food: usize,
    /// Total germ energy per cell
    pub energy_density: f64,
    pub energy_mean: f64,
    /// Mean instruction count
    pub code_len_mean: f64,
    pub code_len_max: usize,
    /// Births this tick
    pub births: usize,
    /// Deaths this tick, kills included
    pub deaths: usize,
    /// Germs killed by attacks this tick
    pub kills: usize,
    /// Turns aborted by a brain fault this tick
    pub faults: usize,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute population aggregates from the registry.
    pub fn update(&mut self, registry: &Registry, cells: usize) {
        self.population = registry.germ_count();
        self.food = registry.food_count();

        let (energy, len, max_len) = registry.germs().fold((0.0, 0usize, 0usize), |(e, l, m), g| {
            let n = g.brain.code.len();
            (e + g.energy, l + n, m.max(n))
        });
        self.energy_density = if cells > 0 { energy / cells as f64 } else { 0.0 };
        self.code_len_max = max_len;
        if self.population == 0 {
            self.energy_mean = 0.0;
            self.code_len_mean = 0.0;
        } else {
            self.energy_mean = energy / self.population as f64;
            self.code_len_mean = len as f64 / self.population as f64;
        }
    }

    /// Format stats as a one-line summary
    pub fn summary(&self) -> String {
        format!(
            "T:{:7} | Pop:{:6} | Food:{:5} | Energy:{:5.1} | Code:{:5.1} | B:{:3} D:{:3} K:{:3} F:{}",
            self.tick,
            self.population,
            self.food,
            self.energy_mean,
            self.code_len_mean,
            self.births,
            self.deaths,
            self.kills,
            self.faults,
        )
    }
}

/// Historical statistics tracker
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsHistory {
    pub snapshots: Vec<Stats>,
    /// Recording interval in ticks
    pub interval: u64,
}

impl StatsHistory {
    pub fn new(interval: u64) -> Self {
        Self {
            snapshots: Vec::new(),
            interval: interval.max(1),
        }
    }

    /// Whether a snapshot is due after `tick`.
    pub fn is_due(&self, tick: u64) -> bool {
        tick % self.interval == 0
    }

    pub fn record(&mut self, stats: Stats) {
        self.snapshots.push(stats);
    }

    pub fn latest(&self) -> Option<&Stats> {
        self.snapshots.last()
    }

    pub fn population_series(&self) -> Vec<(u64, usize)> {
        self.snapshots.iter().map(|s| (s.tick, s.population)).collect()
    }

    pub fn code_len_series(&self) -> Vec<(u64, f64)> {
        self.snapshots.iter().map(|s| (s.tick, s.code_len_mean)).collect()
    }

    pub fn energy_series(&self) -> Vec<(u64, f64)> {
        self.snapshots.iter().map(|s| (s.tick, s.energy_density)).collect()
    }

    /// Save history as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
