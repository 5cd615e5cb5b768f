//! Checkpoint system for saving and loading tank state.
//!
//! A checkpoint is an ordered list of entity records plus the configuration
//! and seed needed to resume. It is written either as a JSON document or as
//! a bincode blob behind a magic header.

use crate::brain::Brain;
use crate::config::Config;
use crate::error::CheckpointError;
use crate::organism::{Body, Entity, Germ};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"GTNK";

/// Persisted state of a germ.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GermRecord {
    pub energy: f64,
    pub stamina: f64,
    pub pain: f64,
    pub success: bool,
    pub burst: bool,
    pub brain: Brain,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Food,
    Germ(GermRecord),
}

/// One entity: position, alive flag and either a food marker or a germ block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub x: u16,
    pub y: u16,
    pub alive: bool,
    pub kind: RecordKind,
}

impl From<&Entity> for EntityRecord {
    fn from(entity: &Entity) -> Self {
        let kind = match &entity.body {
            Body::Food => RecordKind::Food,
            Body::Germ(g) => RecordKind::Germ(GermRecord {
                energy: g.energy,
                stamina: g.stamina,
                pain: g.pain,
                success: g.success,
                burst: g.burst,
                brain: g.brain.clone(),
            }),
        };
        Self {
            x: entity.pos.x,
            y: entity.pos.y,
            alive: entity.alive,
            kind,
        }
    }
}

impl EntityRecord {
    /// Body described by this record.
    pub fn body(&self) -> Body {
        match &self.kind {
            RecordKind::Food => Body::Food,
            RecordKind::Germ(g) => Body::Germ(Germ {
                energy: g.energy,
                stamina: g.stamina,
                pain: g.pain,
                success: g.success,
                burst: g.burst,
                brain: g.brain.clone(),
            }),
        }
    }

    pub fn is_germ(&self) -> bool {
        matches!(self.kind, RecordKind::Germ(_))
    }
}

/// Complete tank state for checkpointing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Version for compatibility checking
    pub version: u32,
    /// Completed ticks
    pub tick: u64,
    pub seed: u64,
    pub config: Config,
    /// Entities in id order
    pub entities: Vec<EntityRecord>,
}

impl Checkpoint {
    /// Current checkpoint version
    pub const VERSION: u32 = 1;

    pub fn new(tick: u64, seed: u64, config: Config, entities: Vec<EntityRecord>) -> Self {
        Self {
            version: Self::VERSION,
            tick,
            seed,
            config,
            entities,
        }
    }

    pub fn germ_count(&self) -> usize {
        self.entities.iter().filter(|r| r.alive && r.is_germ()).count()
    }

    fn check_version(self) -> Result<Self, CheckpointError> {
        if self.version != Self::VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: Self::VERSION,
                found: self.version,
            });
        }
        Ok(self)
    }

    /// Structured JSON document
    pub fn to_json(&self) -> Result<String, CheckpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Checkpoint = serde_json::from_str(json)?;
        checkpoint.check_version()
    }

    /// Save checkpoint to binary file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load checkpoint from binary file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(CheckpointError::InvalidFormat("Invalid magic bytes".to_string()));
        }

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        let checkpoint: Checkpoint = bincode::deserialize(&buffer)?;
        checkpoint.check_version()
    }

    /// Approximate encoded size in bytes
    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self).unwrap_or(0) as usize + MAGIC.len()
    }
}

/// Checkpoint manager for automatic saving
pub struct CheckpointManager {
    pub base_dir: PathBuf,
    /// Ticks between checkpoints
    pub interval: u64,
    /// Maximum checkpoints to keep
    pub max_checkpoints: usize,
    last_checkpoint: u64,
}

impl CheckpointManager {
    pub fn new<P: Into<PathBuf>>(base_dir: P, interval: u64, max_checkpoints: usize) -> Result<Self, CheckpointError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            interval: interval.max(1),
            max_checkpoints,
            last_checkpoint: 0,
        })
    }

    /// Whether `tick` has crossed an interval boundary since the last save.
    /// A step can advance two ticks, so exact multiples may be skipped.
    pub fn should_save(&self, tick: u64) -> bool {
        tick > 0 && tick / self.interval > self.last_checkpoint / self.interval
    }

    pub fn checkpoint_path(&self, tick: u64) -> PathBuf {
        self.base_dir.join(format!("checkpoint_{:010}.bin", tick))
    }

    /// Save checkpoint and prune old ones
    pub fn save(&mut self, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let path = self.checkpoint_path(checkpoint.tick);
        checkpoint.save(&path)?;
        self.last_checkpoint = checkpoint.tick;
        log::info!("Checkpoint saved: {}", path.display());

        self.cleanup()?;
        Ok(path)
    }

    fn checkpoints(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("checkpoint_"))
            .map(|entry| entry.path())
            .collect();
        // Zero-padded tick makes name order chronological.
        paths.sort();
        Ok(paths)
    }

    /// Remove old checkpoints beyond max limit
    fn cleanup(&self) -> Result<(), CheckpointError> {
        let paths = self.checkpoints()?;
        if paths.len() > self.max_checkpoints {
            let excess = paths.len() - self.max_checkpoints;
            for path in paths.into_iter().take(excess) {
                log::debug!("Removing old checkpoint {}", path.display());
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Find latest checkpoint in directory
    pub fn find_latest(&self) -> Option<PathBuf> {
        self.checkpoints().ok()?.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::Code;

    fn create_test_checkpoint(tick: u64) -> Checkpoint {
        let config = Config::small(20, 10, 1);
        let mut brain = Brain::new(Code::parse("set 3 (+ (m 3) 1); ret").unwrap());
        brain.memory.write(3.0, 42.5);
        let germ = EntityRecord {
            x: 4,
            y: 2,
            alive: true,
            kind: RecordKind::Germ(GermRecord {
                energy: 55.0,
                stamina: 9.0,
                pain: 0.0,
                success: false,
                burst: true,
                brain,
            }),
        };
        let food = EntityRecord {
            x: 5,
            y: 2,
            alive: true,
            kind: RecordKind::Food,
        };
        Checkpoint::new(tick, 12345, config, vec![germ, food])
    }

    #[test]
    fn test_binary_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tank.bin");
        let checkpoint = create_test_checkpoint(1000);

        checkpoint.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();

        assert_eq!(loaded.tick, 1000);
        assert_eq!(loaded.seed, 12345);
        assert_eq!(loaded.entities, checkpoint.entities);
        assert!(checkpoint.size_bytes() > 0);
    }

    #[test]
    fn test_json_document_is_readable() {
        let checkpoint = create_test_checkpoint(7);
        let json = checkpoint.to_json().unwrap();
        assert!(json.contains("set 3 (+ (m 3) 1); ret"));
        assert!(json.contains("\"food\""));

        let loaded = Checkpoint::from_json(&json).unwrap();
        assert_eq!(loaded.entities, checkpoint.entities);
        assert_eq!(loaded.germ_count(), 1);
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"NOPE1234").unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(CheckpointError::InvalidFormat(_))));

        let mut checkpoint = create_test_checkpoint(1);
        checkpoint.version = 99;
        let json = checkpoint.to_json().unwrap();
        assert!(matches!(
            Checkpoint::from_json(&json),
            Err(CheckpointError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    #[test]
    fn test_rejects_wrong_memory_size() {
        let json = create_test_checkpoint(3).to_json().unwrap();
        let mut doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        doc["entities"][0]["kind"]["germ"]["brain"]["memory"] = serde_json::json!([1.0, 2.0, 3.0]);

        let err = Checkpoint::from_json(&doc.to_string()).unwrap_err();
        assert!(matches!(err, CheckpointError::Json(_)));
        assert!(err.to_string().contains("memory holds 3 registers"));
    }

    #[test]
    fn test_manager_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CheckpointManager::new(dir.path().join("ckpt"), 10, 2).unwrap();

        assert!(!manager.should_save(0));
        assert!(!manager.should_save(9));
        assert!(manager.should_save(11));

        manager.save(&create_test_checkpoint(11)).unwrap();
        assert!(!manager.should_save(19));
        assert!(manager.should_save(20));

        for tick in [20, 30] {
            manager.save(&create_test_checkpoint(tick)).unwrap();
        }
        assert!(!manager.should_save(30));
        assert!(!manager.checkpoint_path(11).exists());

        let latest = manager.find_latest().unwrap();
        assert_eq!(latest, manager.checkpoint_path(30));
        assert!(manager.checkpoint_path(20).exists());
    }
}
