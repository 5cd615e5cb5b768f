//! Configuration system for the germ tank.
//!
//! Supports YAML configuration files with sensible defaults.

use crate::brain::Code;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tank: TankConfig,
    pub germs: GermConfig,
    pub costs: CostConfig,
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub food: FoodConfig,
    #[serde(default)]
    pub brain: BrainConfig,
    #[serde(default)]
    pub burst: BurstConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tank geometry and light
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TankConfig {
    pub width: u16,
    pub height: u16,
    /// Whether the left and right sides of the tank wrap
    pub wrap: bool,
    /// Radius (Euclidean) of each germ's view
    pub view_radius: u16,
    /// Light energy entering each column per turn
    pub solar_power: f64,
    /// Max light energy a germ can absorb per turn, and what it blocks
    /// for the cells below it
    pub germ_opacity: f64,
    /// Whether entities higher in a column shade the cells below
    #[serde(default = "default_shading")]
    pub shading: bool,
}

fn default_shading() -> bool {
    true
}

/// Germ physiology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GermConfig {
    /// Germs placed at random when a tank is created
    pub initial_population: usize,
    pub max_energy: f64,
    /// Starting energy of a germ; a parent must commit this plus the birth cost
    pub initial_energy: f64,
    /// Max stamina
    pub stamina: f64,
    /// Stamina regenerated each standard turn
    pub stamina_regen: f64,
    /// Energy gained by eating an adjacent food particle
    pub food_energy: f64,
    /// Share of a prey's energy gained by its killer
    pub absorb_rate: f64,
    /// Base energy gained by a killer
    pub base_absorb: f64,
}

/// Energy costs. Moving one square always costs 1, as a baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Flat cost of staying alive each turn
    pub upkeep: f64,
    /// Extra upkeep at the bottom of the tank, scaled linearly with depth
    pub depth_upkeep: f64,
    pub burst: f64,
    pub attack_base: f64,
    /// Per unit of attack power
    pub attack_power: f64,
    pub birth: f64,
    /// Charged when code exhausts its step budget
    pub halt_penalty: f64,
}

/// Mutation and mortality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Chance an offspring develops mutations
    pub mutation_rate: f64,
    /// Chance of each additional mutation beyond the first
    pub multi_mutation_rate: f64,
    /// Chance a germ self-mutates each standard turn
    pub cancer_rate: f64,
    /// Chance a germ dies spontaneously each standard turn
    pub death_rate: f64,
    /// Maximum operator nesting in generated expressions
    pub max_expression_depth: usize,
}

/// Food particles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodConfig {
    /// Fraction of cells seeded with food at creation
    pub initial_density: f64,
    /// Regrowth stops once food covers this fraction of cells
    pub density_cap: f64,
    /// Random cells probed for regrowth each tick
    pub regrow_probes: usize,
}

/// Interpreter limits and the ancestral program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    pub max_executions: usize,
    pub starting_code: Code,
}

/// How germs taking a burst turn pay for metabolism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BurstMetabolism {
    /// Burst turns skip metabolism entirely
    #[default]
    Skip,
    /// Burst turns pay `prorate_factor` of a standard turn's light and upkeep
    Prorate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    pub metabolism: BurstMetabolism,
    pub prorate_factor: f64,
}

/// Logging and checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Ticks between checkpoints
    pub checkpoint_interval: u64,
    /// Ticks between stats records
    pub stats_interval: u64,
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tank: TankConfig::default(),
            germs: GermConfig::default(),
            costs: CostConfig::default(),
            evolution: EvolutionConfig::default(),
            food: FoodConfig::default(),
            brain: BrainConfig::default(),
            burst: BurstConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 500,
            wrap: true,
            view_radius: 5,
            solar_power: 5.0,
            germ_opacity: 0.5,
            shading: true,
        }
    }
}

impl Default for GermConfig {
    fn default() -> Self {
        Self {
            initial_population: 1000,
            max_energy: 100.0,
            initial_energy: 30.0,
            stamina: 15.0,
            stamina_regen: 1.0,
            food_energy: 10.0,
            absorb_rate: 0.5,
            base_absorb: 5.0,
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            upkeep: 0.1,
            depth_upkeep: 0.1,
            burst: 1.0,
            attack_base: 1.0,
            attack_power: 1.0,
            birth: 10.0,
            halt_penalty: 1.0,
        }
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            mutation_rate: 0.15,
            multi_mutation_rate: 0.5,
            cancer_rate: 0.00001,
            death_rate: 0.0001,
            max_expression_depth: 3,
        }
    }
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            initial_density: 0.01,
            density_cap: 0.02,
            regrow_probes: 50,
        }
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            max_executions: crate::brain::MAX_EXECUTIONS,
            starting_code: Code::starter(),
        }
    }
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            metabolism: BurstMetabolism::Skip,
            prorate_factor: 0.5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 5000,
            stats_interval: 100,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Small tank for tests and benchmarks.
    pub fn small(width: u16, height: u16, population: usize) -> Self {
        let mut config = Self::default();
        config.tank.width = width;
        config.tank.height = height;
        config.germs.initial_population = population;
        config
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        let tank = &self.tank;

        if tank.width < 3 || tank.height < 3 {
            return invalid("tank must be at least 3x3");
        }
        let diameter = 2 * tank.view_radius as u32;
        if diameter >= tank.width as u32 || diameter >= tank.height as u32 {
            return invalid("view_radius must be less than half the tank size");
        }
        if tank.germ_opacity <= 0.0 || tank.solar_power < 0.0 {
            return invalid("germ_opacity must be > 0 and solar_power >= 0");
        }
        if self.germs.initial_population > tank.width as usize * tank.height as usize {
            return invalid("initial_population exceeds the number of cells");
        }
        if self.germs.initial_energy <= 0.0 || self.germs.initial_energy > self.germs.max_energy {
            return invalid("initial_energy must be in (0, max_energy]");
        }
        if self.germs.stamina <= 0.0 {
            return invalid("stamina must be > 0");
        }
        let e = &self.evolution;
        for (name, rate) in [
            ("mutation_rate", e.mutation_rate),
            ("multi_mutation_rate", e.multi_mutation_rate),
            ("cancer_rate", e.cancer_rate),
            ("death_rate", e.death_rate),
            ("food.initial_density", self.food.initial_density),
            ("food.density_cap", self.food.density_cap),
            ("burst.prorate_factor", self.burst.prorate_factor),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid(format!("{} must be between 0 and 1", name)));
            }
        }
        if self.brain.max_executions == 0 {
            return invalid("max_executions must be > 0");
        }
        self.brain
            .starting_code
            .check_marks()
            .map_err(|e| ConfigError::StartingCode(e.into()))?;
        Ok(())
    }
}
