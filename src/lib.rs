//! # germtank
//!
//! A tank of germs, each steered by a small evolvable program.
//!
//! Germs live on a 2-D grid lit from the top. Every tick each germ absorbs
//! light, pays upkeep and runs its code to pick an action: move, give birth,
//! attack a neighbour, or do nothing. Offspring inherit a mutated copy of
//! their parent's code, so behaviour evolves under selection.
//!
//! - `brain`: germ code, its interpreter and the mutation engine
//! - `world`: the tick loop and driver interface
//! - `checkpoint`: JSON and binary persistence
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use germtank::{Config, World};
//!
//! let mut world = World::new_with_seed(Config::default(), 42);
//! world.run(1000);
//!
//! println!("Population: {}", world.population());
//! println!("{}", world.stats.summary());
//! ```
//!
//! ## Germ code
//!
//! ```rust
//! use germtank::brain::Code;
//!
//! let code = Code::parse("if (> energy 70) @0; ret; mark @0; ax 1; bir").unwrap();
//! assert_eq!(code, Code::starter());
//! ```
//!
//! ## Checkpoints
//!
//! ```rust,no_run
//! use germtank::checkpoint::Checkpoint;
//! use germtank::{Config, World};
//!
//! let mut world = World::new(Config::default());
//! world.run(1000);
//!
//! world.create_checkpoint().save("tank.bin").unwrap();
//! let restored = World::from_checkpoint(Checkpoint::load("tank.bin").unwrap()).unwrap();
//! ```

pub mod brain;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod grid;
pub mod organism;
pub mod stats;
pub mod world;

// Re-export main types
pub use config::Config;
pub use grid::{EntityId, Position};
pub use organism::{Entity, Germ};
pub use stats::TankStats;
pub use world::{Pixel, World};

use rayon::prelude::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run isolated worlds, one per seed, in parallel. Each world is driven
/// sequentially by its own worker.
pub fn run_ensemble(config: &Config, seeds: &[u64], steps: u64) -> Vec<World> {
    seeds
        .par_iter()
        .map(|&seed| {
            let mut world = World::new_with_seed(config.clone(), seed);
            world.run(steps);
            world
        })
        .collect()
}

/// Run a quick benchmark
pub fn benchmark(steps: u64, population: usize) -> BenchmarkResult {
    use std::time::Instant;

    let mut config = Config::default();
    config.germs.initial_population = population;

    let mut world = World::new(config);

    let start = Instant::now();
    world.run(steps);
    let elapsed = start.elapsed();

    BenchmarkResult {
        steps,
        ticks: world.tick(),
        initial_population: population,
        final_population: world.population(),
        elapsed_secs: elapsed.as_secs_f64(),
        steps_per_second: steps as f64 / elapsed.as_secs_f64(),
        mean_code_len: world.stats.code_len_mean,
    }
}

/// Benchmark result
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub steps: u64,
    /// Standard plus burst ticks
    pub ticks: u64,
    pub initial_population: usize,
    pub final_population: usize,
    pub elapsed_secs: f64,
    pub steps_per_second: f64,
    pub mean_code_len: f64,
}

impl std::fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Benchmark Results ===")?;
        writeln!(f, "Steps: {} ({} ticks)", self.steps, self.ticks)?;
        writeln!(f, "Population: {} -> {}", self.initial_population, self.final_population)?;
        writeln!(f, "Time: {:.3}s", self.elapsed_secs)?;
        writeln!(f, "Speed: {:.1} steps/s", self.steps_per_second)?;
        writeln!(f, "Mean code length: {:.1}", self.mean_code_len)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_quick_simulation() {
        let mut world = World::new(Config::small(80, 40, 100));
        world.run(50);
        assert!(world.tick() >= 50 && world.tick() <= 100);
    }

    #[test]
    fn test_ensemble_worlds_are_isolated() {
        let config = Config::small(40, 20, 40);
        let worlds = run_ensemble(&config, &[1, 2, 1], 20);

        assert_eq!(worlds.len(), 3);
        assert_eq!(worlds[0].seed(), 1);
        assert_eq!(worlds[0].snapshot_pixels(), worlds[2].snapshot_pixels());
        assert_eq!(worlds[0].tick(), worlds[2].tick());
    }

    #[test]
    fn test_benchmark() {
        let result = benchmark(5, 50);

        assert_eq!(result.steps, 5);
        assert!(result.ticks >= 5);
        assert!(result.steps_per_second > 0.0);
    }
}
