//! Tank entities: germs and food particles, and the registry that owns them.

use crate::brain::Brain;
use crate::config::GermConfig;
use crate::grid::{EntityId, IdAllocator, Position};
use std::collections::BTreeMap;

/// Colour of food particles in pixel snapshots.
pub const FOOD_COLOR: [u8; 3] = [40, 200, 60];

/// Mutable state of a living germ.
#[derive(Clone, Debug, PartialEq)]
pub struct Germ {
    pub energy: f64,
    pub stamina: f64,
    /// Damage taken since the last turn
    pub pain: f64,
    /// False if the last action resulted in no change of state
    pub success: bool,
    /// Paid for an extra turn on the next burst tick
    pub burst: bool,
    pub brain: Brain,
}

impl Germ {
    pub fn new(brain: Brain, config: &GermConfig) -> Self {
        Self {
            energy: config.initial_energy,
            stamina: config.stamina,
            pain: 0.0,
            success: true,
            burst: false,
            brain,
        }
    }

    /// Pixel colour: red fades to blue as energy fills, green tracks code length.
    pub fn color(&self, max_energy: f64) -> [u8; 3] {
        let fill = (self.energy / max_energy).clamp(0.0, 1.0);
        let length = (self.brain.code.len() * 12).min(200) as u8;
        [
            (255.0 * (1.0 - fill)) as u8,
            55 + length,
            (255.0 * fill) as u8,
        ]
    }
}

/// What occupies a cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Germ(Germ),
    Food,
}

/// Anything living in the tank.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub pos: Position,
    /// Cleared when marked for removal at the end of the tick
    pub alive: bool,
    pub body: Body,
}

impl Entity {
    pub fn germ(id: EntityId, pos: Position, germ: Germ) -> Self {
        Self {
            id,
            pos,
            alive: true,
            body: Body::Germ(germ),
        }
    }

    pub fn food(id: EntityId, pos: Position) -> Self {
        Self {
            id,
            pos,
            alive: true,
            body: Body::Food,
        }
    }

    #[inline]
    pub fn is_germ(&self) -> bool {
        matches!(self.body, Body::Germ(_))
    }

    #[inline]
    pub fn is_food(&self) -> bool {
        matches!(self.body, Body::Food)
    }

    pub fn as_germ(&self) -> Option<&Germ> {
        match &self.body {
            Body::Germ(g) => Some(g),
            Body::Food => None,
        }
    }

    pub fn as_germ_mut(&mut self) -> Option<&mut Germ> {
        match &mut self.body {
            Body::Germ(g) => Some(g),
            Body::Food => None,
        }
    }

    pub fn color(&self, max_energy: f64) -> [u8; 3] {
        match &self.body {
            Body::Germ(g) => g.color(max_energy),
            Body::Food => FOOD_COLOR,
        }
    }
}

/// Id-ordered map of every admitted entity.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    entities: BTreeMap<EntityId, Entity>,
    ids: IdAllocator,
    germs: usize,
    food: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for an entity admitted later.
    pub fn allocate(&mut self) -> EntityId {
        self.ids.allocate()
    }

    /// Return a reserved id that was never admitted.
    pub fn release(&mut self, id: EntityId) {
        if !self.entities.contains_key(&id) {
            self.ids.release(id);
        }
    }

    /// Insert an entity under its pre-allocated id.
    pub fn admit(&mut self, entity: Entity) {
        self.count(&entity, true);
        if let Some(old) = self.entities.insert(entity.id, entity) {
            self.count(&old, false);
        }
    }

    /// Remove an entity and free its id.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.count(&entity, false);
        self.ids.release(id);
        Some(entity)
    }

    /// Borrow an entity out of the map for the length of its turn. Counts
    /// and id stay reserved until [`Registry::restore`].
    pub(crate) fn take(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub(crate) fn restore(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    fn count(&mut self, entity: &Entity, add: bool) {
        let counter = if entity.is_germ() { &mut self.germs } else { &mut self.food };
        if add {
            *counter += 1;
        } else {
            *counter -= 1;
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Snapshot of ids in ascending order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn germs(&self) -> impl Iterator<Item = &Germ> {
        self.entities.values().filter_map(Entity::as_germ)
    }

    pub fn germ_count(&self) -> usize {
        self.germs
    }

    pub fn food_count(&self) -> usize {
        self.food
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::Code;
    use crate::config::Config;

    fn germ() -> Germ {
        Germ::new(Brain::new(Code::starter()), &Config::default().germs)
    }

    #[test]
    fn test_new_germ_defaults() {
        let g = germ();
        assert_eq!(g.energy, 30.0);
        assert_eq!(g.stamina, 15.0);
        assert!(g.success);
        assert!(!g.burst);
    }

    #[test]
    fn test_registry_counts_and_id_reuse() {
        let mut registry = Registry::new();
        let a = registry.allocate();
        registry.admit(Entity::germ(a, Position::new(0, 0), germ()));
        let b = registry.allocate();
        registry.admit(Entity::food(b, Position::new(1, 0)));
        let c = registry.allocate();
        registry.admit(Entity::germ(c, Position::new(2, 0), germ()));

        assert_eq!((registry.germ_count(), registry.food_count()), (2, 1));
        assert_eq!(registry.ids(), vec![0, 1, 2]);

        let removed = registry.remove(b).unwrap();
        assert!(removed.is_food());
        assert_eq!(registry.food_count(), 0);
        assert_eq!(registry.allocate(), 1);
    }

    #[test]
    fn test_take_and_restore_keep_counts() {
        let mut registry = Registry::new();
        let id = registry.allocate();
        registry.admit(Entity::germ(id, Position::new(3, 3), germ()));

        let mut entity = registry.take(id).unwrap();
        assert!(!registry.contains(id));
        entity.pos = Position::new(4, 3);
        registry.restore(entity);

        assert_eq!(registry.germ_count(), 1);
        assert_eq!(registry.get(id).map(|e| e.pos), Some(Position::new(4, 3)));
        assert_eq!(registry.allocate(), 1);
    }

    #[test]
    fn test_colors() {
        let mut g = germ();
        g.energy = 100.0;
        let full = g.color(100.0);
        assert_eq!((full[0], full[2]), (0, 255));
        assert_eq!(Entity::food(0, Position::new(0, 0)).color(100.0), FOOD_COLOR);
    }
}
