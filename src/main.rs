//! germtank - CLI entry point

use clap::{Parser, Subcommand};
use germtank::checkpoint::{Checkpoint, CheckpointManager, RecordKind};
use germtank::{benchmark, Config, World};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "germtank")]
#[command(version)]
#[command(about = "Tank of germs running small evolvable programs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new simulation
    Run {
        /// Configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Number of steps to simulate
        #[arg(short, long, default_value = "10000")]
        steps: u64,

        /// Output directory for checkpoints
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Quiet mode (minimal output)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Resume simulation from checkpoint
    Resume {
        /// Checkpoint file to resume from
        #[arg(short, long)]
        checkpoint: PathBuf,

        /// Number of additional steps
        #[arg(short, long, default_value = "10000")]
        steps: u64,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },

    /// Run performance benchmark
    Benchmark {
        #[arg(short, long, default_value = "1000")]
        steps: u64,

        #[arg(short, long, default_value = "1000")]
        population: usize,
    },

    /// Generate default configuration file
    Init {
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Analyze a checkpoint file (binary, or JSON with --json)
    Analyze {
        checkpoint: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            steps,
            output,
            seed,
            quiet,
        } => {
            let config = load_config(&config)?;
            init_logging(&config.logging.log_level);
            let seed = seed.unwrap_or_else(rand::random);
            let world = World::try_new_with_seed(config, seed)?;
            simulate(world, steps, &output, quiet)
        }

        Commands::Resume {
            checkpoint,
            steps,
            output,
        } => {
            init_logging("info");
            log::info!("Loading checkpoint: {}", checkpoint.display());
            let world = World::from_checkpoint(Checkpoint::load(&checkpoint)?)?;
            simulate(world, steps, &output, false)
        }

        Commands::Benchmark { steps, population } => {
            init_logging("warn");
            println!("{}", benchmark(steps, population));
            Ok(())
        }

        Commands::Init { output } => {
            Config::default().save(&output)?;
            println!("Configuration saved to: {}", output.display());
            Ok(())
        }

        Commands::Analyze { checkpoint, json } => analyze_checkpoint(&checkpoint, json),
    }
}

fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if path.exists() {
        println!("Loading config from: {}", path.display());
        Ok(Config::from_file(path)?)
    } else {
        println!("Using default configuration");
        Ok(Config::default())
    }
}

fn simulate(mut world: World, steps: u64, output: &Path, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(output)?;
    let mut checkpoint_mgr = CheckpointManager::new(output, world.config.logging.checkpoint_interval, 10)?;
    let stats_interval = world.config.logging.stats_interval.max(1);

    println!("Starting at tick {} (seed {})", world.tick(), world.seed());
    println!("  Tank: {}x{}", world.config.tank.width, world.config.tank.height);
    println!("  Population: {}", world.population());
    println!("  Steps: {}", steps);
    println!();

    let start = Instant::now();
    let start_tick = world.tick();

    for i in 0..steps {
        world.step();

        if !quiet && i % stats_interval == 0 {
            println!("{}", world.stats.summary());
        }

        if checkpoint_mgr.should_save(world.tick()) {
            let checkpoint = world.create_checkpoint();
            if let Err(e) = checkpoint_mgr.save(&checkpoint) {
                log::error!("Checkpoint error: {}", e);
            }
        }

        if world.is_extinct() {
            println!("\nPopulation extinct at tick {}", world.tick());
            break;
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("=== Simulation Complete ===");
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Ticks: {} -> {}", start_tick, world.tick());
    println!("Speed: {:.1} ticks/s", (world.tick() - start_tick) as f64 / elapsed.as_secs_f64());
    println!("Final population: {}", world.population());

    let final_path = output.join("checkpoint_final.bin");
    world.create_checkpoint().save(&final_path)?;
    println!("Final checkpoint: {}", final_path.display());

    let stats_path = output.join("stats_history.json");
    world.stats_history.save(&stats_path)?;
    println!("Stats history: {}", stats_path.display());

    Ok(())
}

fn analyze_checkpoint(path: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Checkpoint Analysis ===");
    println!("File: {}", path.display());
    println!();

    let checkpoint = if json {
        Checkpoint::from_json(&std::fs::read_to_string(path)?)?
    } else {
        Checkpoint::load(path)?
    };

    println!("Tick: {}", checkpoint.tick);
    println!("Seed: {}", checkpoint.seed);
    println!("Records: {}", checkpoint.entities.len());

    let germs: Vec<_> = checkpoint
        .entities
        .iter()
        .filter(|r| r.alive)
        .filter_map(|r| match &r.kind {
            RecordKind::Germ(g) => Some(g),
            RecordKind::Food => None,
        })
        .collect();
    println!("Live germs: {}", germs.len());

    if !germs.is_empty() {
        let n = germs.len() as f64;
        let avg_energy = germs.iter().map(|g| g.energy).sum::<f64>() / n;
        let avg_len = germs.iter().map(|g| g.brain.code.len() as f64).sum::<f64>() / n;
        println!("Average energy: {:.1}", avg_energy);
        println!("Average code length: {:.2}", avg_len);

        // Identical programs form one strain.
        let mut strains: HashMap<String, usize> = HashMap::new();
        for germ in &germs {
            *strains.entry(germ.brain.code.to_string()).or_insert(0) += 1;
        }
        println!();
        println!("Distinct programs: {}", strains.len());
        if let Some((code, &count)) = strains.iter().max_by_key(|(_, &c)| c) {
            println!(
                "Dominant program ({} germs, {:.1}%):\n{}",
                count,
                100.0 * count as f64 / n,
                code
            );
        }
    }

    println!();
    println!("Checkpoint size: {:.2} MB", checkpoint.size_bytes() as f64 / 1_000_000.0);

    Ok(())
}
