//! World simulation engine - the tick loop.
//!
//! A tick walks the registry once in id order. Deaths are only marked and
//! births only queued while germs act; both are applied in the
//! reconciliation phase, so no germ observes another's birth or removal
//! within the tick it happened.

use crate::brain::{mutation_count, Action, ActionKind, Brain, Code, GermState, Interpreter, Mutator, Sighting, View};
use crate::checkpoint::{Checkpoint, EntityRecord};
use crate::config::{BurstMetabolism, Config};
use crate::error::{CapacityError, CheckpointError, ConfigError};
use crate::grid::{EntityId, Position, Tank, ViewOffsets, NEIGHBOURS};
use crate::organism::{Body, Entity, Germ, Registry};
use crate::stats::{Stats, StatsHistory, TankStats};
use log::{debug, info, warn};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// A live entity as drawn by a presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pixel {
    pub x: u16,
    pub y: u16,
    pub color: [u8; 3],
}

/// Counters for the tick in progress.
#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    births: usize,
    deaths: usize,
    kills: usize,
    faults: usize,
}

/// The simulated tank
pub struct World {
    pub config: Config,

    // Environment
    tank: Tank,
    registry: Registry,
    view_offsets: ViewOffsets,

    // Germ machinery
    interpreter: Interpreter,
    mutator: Mutator,
    /// Born this tick, admitted during reconciliation
    newborns: Vec<Entity>,

    tick: u64,

    // Statistics
    pub stats: Stats,
    pub stats_history: StatsHistory,
    tally: Tally,

    // Every random effect draws from here
    rng: Box<dyn RngCore + Send>,
    seed: u64,
}

impl World {
    /// Create a new world with the given configuration.
    ///
    /// The constructors below trust `config`; one that fails
    /// [`Config::validate`] may panic. Use [`World::try_new_with_seed`] for
    /// configuration that has not been checked.
    pub fn new(config: Config) -> Self {
        let seed = rand::thread_rng().gen();
        Self::new_with_seed(config, seed)
    }

    /// Create a new world with a specific seed for reproducibility
    pub fn new_with_seed(config: Config, seed: u64) -> Self {
        Self::with_rng(config, seed, Box::new(ChaCha8Rng::seed_from_u64(seed)))
    }

    /// Validate `config`, then build a seeded world.
    pub fn try_new_with_seed(config: Config, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new_with_seed(config, seed))
    }

    /// Populated world drawing from a caller-supplied random source. `seed`
    /// is only recorded in checkpoints.
    pub fn with_rng(config: Config, seed: u64, rng: Box<dyn RngCore + Send>) -> Self {
        let mut world = Self::bare(config, seed, rng);
        world.populate();
        world.update_stats();
        info!(
            "Tank {}x{} created with {} germs and {} food (seed {})",
            world.tank.width(),
            world.tank.height(),
            world.registry.germ_count(),
            world.registry.food_count(),
            seed
        );
        world
    }

    /// World with no germs or food; entities are added with
    /// [`World::spawn_germ`] and [`World::spawn_food`].
    pub fn empty(config: Config, seed: u64) -> Self {
        let mut world = Self::bare(config, seed, Box::new(ChaCha8Rng::seed_from_u64(seed)));
        world.update_stats();
        world
    }

    fn bare(config: Config, seed: u64, rng: Box<dyn RngCore + Send>) -> Self {
        let tank = Tank::new(config.tank.width, config.tank.height, config.tank.wrap);
        let view_offsets = ViewOffsets::new(config.tank.view_radius);
        let interpreter = Interpreter::new(config.brain.max_executions);
        let mutator = Mutator::new(config.evolution.max_expression_depth);
        let stats_history = StatsHistory::new(config.logging.stats_interval);

        Self {
            config,
            tank,
            registry: Registry::new(),
            view_offsets,
            interpreter,
            mutator,
            newborns: Vec::new(),
            tick: 0,
            stats: Stats::new(),
            stats_history,
            tally: Tally::default(),
            rng,
            seed,
        }
    }

    /// Scatter the starting population and food; draws that land on an
    /// occupied cell are dropped.
    fn populate(&mut self) {
        for _ in 0..self.config.germs.initial_population {
            let pos = self.random_position();
            let code = self.config.brain.starting_code.clone();
            self.spawn_germ(pos, code).ok();
        }

        let cells = self.tank.cell_count() as f64;
        let probes = (self.config.food.initial_density * cells).round() as usize;
        for _ in 0..probes {
            let pos = self.random_position();
            self.spawn_food(pos).ok();
        }
    }

    /// Restore world from checkpoint. Dead records are skipped and ids are
    /// reassigned in record order.
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Result<Self, CheckpointError> {
        checkpoint
            .config
            .validate()
            .map_err(|e| CheckpointError::InvalidFormat(e.to_string()))?;

        let rng = ChaCha8Rng::seed_from_u64(checkpoint.seed ^ checkpoint.tick);
        let mut world = Self::bare(checkpoint.config, checkpoint.seed, Box::new(rng));
        world.tick = checkpoint.tick;

        for (index, record) in checkpoint.entities.iter().enumerate() {
            if !record.alive {
                continue;
            }
            world
                .admit_at(Position::new(record.x, record.y), record.body())
                .map_err(|source| CheckpointError::Capacity { index, source })?;
        }

        world.update_stats();
        info!(
            "Restored tank at tick {} with {} germs and {} food",
            world.tick,
            world.registry.germ_count(),
            world.registry.food_count()
        );
        Ok(world)
    }

    /// Create checkpoint from current state
    pub fn create_checkpoint(&self) -> Checkpoint {
        Checkpoint::new(
            self.tick,
            self.seed,
            self.config.clone(),
            self.registry.iter().map(EntityRecord::from).collect(),
        )
    }

    /// Place a germ running `code` with fresh memory.
    pub fn spawn_germ(&mut self, pos: Position, code: Code) -> Result<EntityId, CapacityError> {
        let germ = Germ::new(Brain::new(code), &self.config.germs);
        self.admit_at(pos, Body::Germ(germ))
    }

    pub fn spawn_food(&mut self, pos: Position) -> Result<EntityId, CapacityError> {
        self.admit_at(pos, Body::Food)
    }

    fn admit_at(&mut self, pos: Position, body: Body) -> Result<EntityId, CapacityError> {
        let id = self.registry.allocate();
        if let Err(e) = self.tank.place(pos, id) {
            self.registry.release(id);
            return Err(e);
        }
        self.registry.admit(Entity {
            id,
            pos,
            alive: true,
            body,
        });
        Ok(id)
    }

    /// Standard tick, followed by a burst tick when any germ paid for one.
    pub fn step(&mut self) {
        self.advance(false);
        if self.pending_bursts() > 0 {
            self.advance(true);
        }
    }

    /// Run for a number of steps
    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Run with a callback after every step
    pub fn run_with_callback<F>(&mut self, steps: u64, mut callback: F)
    where
        F: FnMut(&World),
    {
        for _ in 0..steps {
            self.step();
            callback(self);
        }
    }

    /// Run exactly one tick. On a burst tick only germs holding a paid
    /// burst act, and metabolism follows the configured burst policy.
    pub fn advance(&mut self, burst_tick: bool) {
        self.tally = Tally::default();

        for id in self.registry.ids() {
            let Some(mut entity) = self.registry.take(id) else {
                continue;
            };
            if entity.alive && entity.is_germ() {
                self.turn(&mut entity, burst_tick);
            }
            self.registry.restore(entity);
        }

        self.reconcile();
        self.tick += 1;
        self.update_stats();

        debug!(
            "tick {}{}: {} births, {} deaths ({} kills), {} faults",
            self.tick,
            if burst_tick { " (burst)" } else { "" },
            self.tally.births,
            self.tally.deaths,
            self.tally.kills,
            self.tally.faults
        );
        if self.stats_history.is_due(self.tick) {
            self.stats_history.record(self.stats.clone());
        }
    }

    fn turn(&mut self, entity: &mut Entity, burst_tick: bool) {
        let Entity { id, pos, alive, body } = entity;
        let Body::Germ(germ) = body else {
            return;
        };

        if burst_tick {
            if !germ.burst {
                return;
            }
            if self.config.burst.metabolism == BurstMetabolism::Prorate {
                let net = self.sunlight(*pos) - self.upkeep(pos.y);
                germ.energy += self.config.burst.prorate_factor * net;
            }
        } else if !self.metabolise(*id, germ, *pos) {
            *alive = false;
            return;
        }
        if germ.energy <= 0.0 {
            *alive = false;
            return;
        }
        germ.energy = germ.energy.min(self.config.germs.max_energy);

        self.eat(germ, *pos);
        match self.think(*id, germ, *pos) {
            Some(action) => self.resolve(germ, pos, action),
            None => {
                germ.success = false;
                germ.burst = false;
            }
        }

        germ.pain = 0.0;
        if germ.energy <= 0.0 {
            *alive = false;
        }
        germ.energy = germ.energy.clamp(0.0, self.config.germs.max_energy);
    }

    /// Light, upkeep, stamina and the spontaneous rolls. Returns false if
    /// the germ dies spontaneously.
    fn metabolise(&mut self, id: EntityId, germ: &mut Germ, pos: Position) -> bool {
        germ.energy += self.sunlight(pos) - self.upkeep(pos.y);
        let germs = &self.config.germs;
        germ.stamina = (germ.stamina + germs.stamina_regen).min(germs.stamina);

        let evolution = &self.config.evolution;
        if self.rng.gen::<f64>() < evolution.cancer_rate {
            let count = mutation_count(&mut *self.rng, 1.0, evolution.multi_mutation_rate);
            self.mutator.mutate_n(&mut germ.brain.code, count, &mut *self.rng);
            debug!("germ {} mutated spontaneously ({} edits)", id, count);
        }
        self.rng.gen::<f64>() >= evolution.death_rate
    }

    /// Consume the first live food particle in the 8-neighbourhood.
    fn eat(&mut self, germ: &mut Germ, pos: Position) {
        let food = self
            .tank
            .neighbours(pos)
            .filter_map(|cell| self.tank.get(cell))
            .find(|&id| self.registry.get(id).map_or(false, |e| e.alive && e.is_food()));

        if let Some(entity) = food.and_then(|id| self.registry.get_mut(id)) {
            entity.alive = false;
            germ.energy = (germ.energy + self.config.germs.food_energy).min(self.config.germs.max_energy);
        }
    }

    /// Run the germ's code. A fault degrades the turn to a no-op.
    fn think(&mut self, id: EntityId, germ: &mut Germ, pos: Position) -> Option<Action> {
        let view = self.view(pos);
        let state = GermState {
            energy: germ.energy,
            brightness: self.brightness(pos),
            stamina: germ.stamina,
            pain: germ.pain,
            success: germ.success,
            view: &view,
        };

        match self.interpreter.run(&germ.brain.code, &mut germ.brain.memory, &state) {
            Ok(outcome) => Some(outcome.action),
            Err(fault) => {
                warn!("germ {} at ({}, {}): {}", id, pos.x, pos.y, fault);
                debug!("code of germ {}:\n{}", id, fault.listing);
                debug_assert!(!fault.is_structural(), "{}", fault);
                self.tally.faults += 1;
                None
            }
        }
    }

    fn resolve(&mut self, germ: &mut Germ, pos: &mut Position, action: Action) {
        if action.burst {
            germ.energy -= self.config.costs.burst;
            germ.burst = true;
        } else {
            germ.burst = false;
        }

        germ.success = match action.kind {
            ActionKind::Idle => true,
            ActionKind::Halt => {
                germ.energy -= self.config.costs.halt_penalty;
                false
            }
            ActionKind::Move => self.try_move(germ, pos, action),
            ActionKind::Birth => self.try_birth(germ, *pos, action),
            ActionKind::Attack => self.try_attack(germ, *pos, action),
        };
    }

    fn try_move(&mut self, germ: &mut Germ, pos: &mut Position, action: Action) -> bool {
        let Some(target) = self.tank.relative(*pos, action.dx, action.dy) else {
            return false;
        };
        if self.tank.relocate(*pos, target).is_err() {
            return false;
        }
        germ.energy -= ((action.dx * action.dx + action.dy * action.dy) as f64).sqrt();
        *pos = target;
        true
    }

    fn try_birth(&mut self, germ: &mut Germ, pos: Position, action: Action) -> bool {
        let reserve = self.config.germs.initial_energy + self.config.costs.birth;
        if germ.energy < reserve + 1.0 {
            return false;
        }
        let Some(cell) = self.birth_cell(pos, action.dx, action.dy) else {
            return false;
        };
        let id = self.registry.allocate();
        if self.tank.place(cell, id).is_err() {
            self.registry.release(id);
            return false;
        }

        germ.energy -= reserve;
        let evolution = &self.config.evolution;
        let mutations = mutation_count(
            &mut *self.rng,
            evolution.mutation_rate,
            evolution.multi_mutation_rate,
        );
        let brain = germ.brain.offspring(&self.mutator, mutations, &mut *self.rng);
        let child = Germ::new(brain, &self.config.germs);
        self.newborns.push(Entity::germ(id, cell, child));
        self.tally.births += 1;
        true
    }

    /// First free neighbour, ordered by Manhattan distance to the requested
    /// direction with ties kept in scan order.
    fn birth_cell(&self, pos: Position, dx: i32, dy: i32) -> Option<Position> {
        let mut order = NEIGHBOURS;
        order.sort_by_key(|&(i, j)| (i - dx).abs() + (j - dy).abs());
        order
            .iter()
            .filter_map(|&(i, j)| self.tank.relative(pos, i, j))
            .find(|&cell| !self.tank.is_occupied(cell))
    }

    fn try_attack(&mut self, germ: &mut Germ, pos: Position, action: Action) -> bool {
        let power = action.power as f64;
        let cost = self.config.costs.attack_base + self.config.costs.attack_power * power;
        if action.power == 0 || cost > germ.energy {
            return false;
        }
        let Some(target_id) = self
            .tank
            .relative(pos, action.dx, action.dy)
            .and_then(|cell| self.tank.get(cell))
        else {
            return false;
        };

        let (base, rate) = (self.config.germs.base_absorb, self.config.germs.absorb_rate);
        let gain = {
            // Neither the attacker nor an unadmitted newborn resolves here.
            let Some(target) = self.registry.get_mut(target_id) else {
                return false;
            };
            if !target.alive {
                return false;
            }
            let Body::Germ(prey) = &mut target.body else {
                return false;
            };
            prey.stamina -= power;
            prey.pain += power;
            if prey.stamina <= 0.0 {
                let gain = (prey.energy - base) * rate + base;
                target.alive = false;
                Some(gain)
            } else {
                None
            }
        };

        germ.energy -= cost;
        if let Some(gain) = gain {
            germ.energy += gain;
            self.tally.kills += 1;
        }
        true
    }

    /// Remove the dead, admit newborns, regrow food.
    fn reconcile(&mut self) {
        let dead: Vec<EntityId> = self.registry.iter().filter(|e| !e.alive).map(|e| e.id).collect();
        for id in dead {
            if let Some(entity) = self.registry.remove(id) {
                self.tank.release(entity.pos, id);
                if entity.is_germ() {
                    self.tally.deaths += 1;
                }
            }
        }

        for child in std::mem::take(&mut self.newborns) {
            self.registry.admit(child);
        }

        self.regrow_food();
    }

    fn regrow_food(&mut self) {
        let cells = self.tank.cell_count() as f64;
        let cap = (self.config.food.density_cap * cells).round() as usize;
        for _ in 0..self.config.food.regrow_probes {
            if self.registry.food_count() >= cap {
                break;
            }
            let pos = self.random_position();
            self.spawn_food(pos).ok();
        }
    }

    fn random_position(&mut self) -> Position {
        let x = self.rng.gen_range(0..self.tank.width());
        let y = self.rng.gen_range(0..self.tank.height());
        Position::new(x, y)
    }

    /// Light absorbed by a germ at `pos`. Light enters at the surface and
    /// each cell above `pos` blocks some of it: an occupied cell blocks
    /// `germ_opacity`, an empty one an even share of `solar_power`. With
    /// shading off every cell above counts as empty.
    pub fn sunlight(&self, pos: Position) -> f64 {
        let tank = &self.config.tank;
        let open_cell = tank.solar_power / tank.height as f64;
        let blocked: f64 = if tank.shading {
            (0..pos.y)
                .map(|y| {
                    if self.tank.is_occupied(Position::new(pos.x, y)) {
                        tank.germ_opacity
                    } else {
                        open_cell
                    }
                })
                .sum()
        } else {
            open_cell * pos.y as f64
        };
        (tank.solar_power - blocked).min(tank.germ_opacity).max(0.0)
    }

    /// Percent of the maximum absorbable light, truncated.
    pub fn brightness(&self, pos: Position) -> f64 {
        (100.0 * self.sunlight(pos) / self.config.tank.germ_opacity).floor()
    }

    fn upkeep(&self, y: u16) -> f64 {
        let costs = &self.config.costs;
        costs.upkeep + costs.depth_upkeep * y as f64 / self.config.tank.height as f64
    }

    /// Live entities around `origin`, nearest first, split into germs and food.
    pub fn view(&self, origin: Position) -> View {
        let mut view = View::default();
        for (dx, dy) in self.view_offsets.iter() {
            let Some(cell) = self.tank.relative(origin, dx, dy) else {
                continue;
            };
            // Cells reserved for newborns stay invisible until reconciliation.
            let Some(entity) = self.tank.get(cell).and_then(|id| self.registry.get(id)) else {
                continue;
            };
            if !entity.alive {
                continue;
            }
            let sighting = Sighting { dx, dy };
            if entity.is_germ() {
                view.germs.push(sighting);
            } else {
                view.food.push(sighting);
            }
        }
        view
    }

    fn update_stats(&mut self) {
        self.stats.tick = self.tick;
        self.stats.births = self.tally.births;
        self.stats.deaths = self.tally.deaths;
        self.stats.kills = self.tally.kills;
        self.stats.faults = self.tally.faults;
        self.stats.update(&self.registry, self.tank.cell_count());
    }

    /// Live entity positions and colours. Only meaningful between ticks.
    pub fn snapshot_pixels(&self) -> Vec<Pixel> {
        let max_energy = self.config.germs.max_energy;
        self.registry
            .iter()
            .filter(|e| e.alive)
            .map(|e| Pixel {
                x: e.pos.x,
                y: e.pos.y,
                color: e.color(max_energy),
            })
            .collect()
    }

    pub fn snapshot_stats(&self) -> TankStats {
        let energy: f64 = self.registry.germs().map(|g| g.energy).sum();
        TankStats {
            tick_count: self.tick,
            population: self.registry.germ_count(),
            energy_density: energy / self.tank.cell_count() as f64,
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.registry.get(id)
    }

    pub fn entity_at(&self, pos: Position) -> Option<&Entity> {
        self.tank.get(pos).and_then(|id| self.registry.get(id))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.registry.iter()
    }

    pub fn germ(&self, id: EntityId) -> Option<&Germ> {
        self.registry.get(id).and_then(Entity::as_germ)
    }

    /// Mutable germ state; position stays under the world's control.
    pub fn germ_mut(&mut self, id: EntityId) -> Option<&mut Germ> {
        self.registry.get_mut(id).and_then(Entity::as_germ_mut)
    }

    pub fn tank(&self) -> &Tank {
        &self.tank
    }

    /// Germs holding a paid burst for the next burst tick
    pub fn pending_bursts(&self) -> usize {
        self.registry.germs().filter(|g| g.burst).count()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn population(&self) -> usize {
        self.registry.germ_count()
    }

    pub fn food_count(&self) -> usize {
        self.registry.food_count()
    }

    pub fn is_extinct(&self) -> bool {
        self.registry.germ_count() == 0
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{Expression, Instruction, Op};

    /// Deterministic tank: no food, no spontaneous events, no mutations.
    fn quiet(width: u16, height: u16) -> Config {
        let mut config = Config::small(width, height, 0);
        config.food.initial_density = 0.0;
        config.food.density_cap = 0.0;
        config.evolution.cancer_rate = 0.0;
        config.evolution.death_rate = 0.0;
        config.evolution.mutation_rate = 0.0;
        config
    }

    fn spawn(world: &mut World, x: u16, y: u16, text: &str) -> EntityId {
        world
            .spawn_germ(Position::new(x, y), Code::parse(text).unwrap())
            .unwrap()
    }

    fn energy(world: &World, id: EntityId) -> f64 {
        world.germ(id).unwrap().energy
    }

    // At (x, 5) in a 20-high tank a standard tick nets +0.5 - 0.125.
    const NET: f64 = 0.375;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_new_world_is_consistent() {
        let world = World::new_with_seed(Config::small(60, 30, 100), 42);

        assert!(world.population() > 80 && world.population() <= 100);
        assert!(world.food_count() <= 18);
        for entity in world.entities() {
            assert_eq!(world.tank().get(entity.pos), Some(entity.id));
        }
        assert_eq!(world.tank().occupied_count(), world.population() + world.food_count());
        assert_eq!(world.stats.population, world.population());
    }

    #[test]
    fn test_try_new_rejects_bad_config() {
        let mut config = Config::small(0, 20, 10);
        assert!(matches!(World::try_new_with_seed(config.clone(), 1), Err(ConfigError::Invalid(_))));

        config.tank.width = 20;
        let world = World::try_new_with_seed(config, 1).unwrap();
        assert_eq!(world.tank().width(), 20);
    }

    #[test]
    fn test_same_seed_same_history() {
        let mut a = World::new_with_seed(Config::small(40, 20, 60), 7);
        let mut b = World::new_with_seed(Config::small(40, 20, 60), 7);
        a.run(30);
        b.run(30);
        assert_eq!(a.snapshot_pixels(), b.snapshot_pixels());
        assert_eq!(a.tick(), b.tick());
    }

    #[test]
    fn test_sunlight_and_brightness() {
        let world = World::empty(quiet(20, 20), 0);
        assert_eq!(world.sunlight(Position::new(3, 0)), 0.5);
        assert_eq!(world.brightness(Position::new(3, 0)), 100.0);
        assert!(close(world.sunlight(Position::new(3, 19)), 0.25));
        assert_eq!(world.brightness(Position::new(3, 19)), 50.0);
    }

    #[test]
    fn test_germs_above_shade_the_column() {
        let mut world = World::empty(quiet(20, 20), 0);
        for y in 0..9 {
            world.spawn_food(Position::new(4, y)).unwrap();
        }
        let shaded = spawn(&mut world, 4, 10, "ret");
        let open = spawn(&mut world, 8, 10, "ret");

        // 9 occupied cells block 4.5, the empty one at y = 9 blocks 0.25.
        assert!(close(world.sunlight(Position::new(4, 10)), 0.25));
        assert_eq!(world.brightness(Position::new(4, 10)), 50.0);
        assert_eq!(world.sunlight(Position::new(8, 10)), 0.5);

        world.advance(false);
        assert!(close(energy(&world, open) - energy(&world, shaded), 0.25));

        // A full column leaves nothing, never a negative amount.
        for y in 11..20 {
            world.spawn_food(Position::new(4, y)).unwrap();
        }
        assert_eq!(world.sunlight(Position::new(4, 19)), 0.0);

        let mut flat = quiet(20, 20);
        flat.tank.shading = false;
        let mut unshaded = World::empty(flat, 0);
        unshaded.spawn_food(Position::new(4, 9)).unwrap();
        assert_eq!(unshaded.sunlight(Position::new(4, 10)), 0.5);
    }

    #[test]
    fn test_eats_adjacent_food() {
        let mut world = World::empty(quiet(20, 20), 0);
        let germ = spawn(&mut world, 5, 5, "ret");
        world.spawn_food(Position::new(6, 6)).unwrap();

        world.advance(false);

        assert_eq!(world.food_count(), 0);
        assert!(world.entity_at(Position::new(6, 6)).is_none());
        assert!(close(energy(&world, germ), 30.0 + NET + 10.0));
        assert!(world.germ(germ).unwrap().success);
    }

    #[test]
    fn test_view_partitions_by_kind() {
        let mut world = World::empty(quiet(20, 20), 0);
        spawn(&mut world, 5, 4, "ret");
        world.spawn_food(Position::new(7, 5)).unwrap();
        world.spawn_food(Position::new(5, 8)).unwrap();

        let view = world.view(Position::new(5, 5));
        let offsets = |list: &[Sighting]| list.iter().map(|s| (s.dx, s.dy)).collect::<Vec<_>>();
        assert_eq!(offsets(&view.germs), vec![(0, -1)]);
        assert_eq!(offsets(&view.food), vec![(2, 0), (0, 3)]);
    }

    #[test]
    fn test_move_costs_euclidean_distance() {
        let mut world = World::empty(quiet(20, 20), 0);
        let germ = spawn(&mut world, 5, 5, "ax 1; ay 1; mv");

        world.advance(false);

        assert_eq!(world.entity(germ).unwrap().pos, Position::new(6, 6));
        assert_eq!(world.tank().get(Position::new(5, 5)), None);
        assert!(close(energy(&world, germ), 30.0 + NET - 2f64.sqrt()));
    }

    #[test]
    fn test_blocked_move_fails() {
        let mut world = World::empty(quiet(20, 20), 0);
        let mover = spawn(&mut world, 5, 5, "ax 1; mv");
        spawn(&mut world, 6, 5, "ret");

        world.advance(false);

        assert_eq!(world.entity(mover).unwrap().pos, Position::new(5, 5));
        assert!(!world.germ(mover).unwrap().success);
        assert!(close(energy(&world, mover), 30.0 + NET));
    }

    #[test]
    fn test_birth_spends_reserve_and_queues_child() {
        let mut world = World::empty(quiet(20, 20), 0);
        let parent = spawn(&mut world, 5, 5, &Code::starter().to_string());
        world.germ_mut(parent).unwrap().energy = 80.0;

        world.advance(false);

        assert_eq!(world.population(), 2);
        assert_eq!(world.stats.births, 1);
        assert!(close(energy(&world, parent), 80.0 + NET - 40.0));
        let child = world.entity_at(Position::new(6, 5)).unwrap();
        let child = child.as_germ().unwrap();
        assert_eq!(child.energy, 30.0);
        assert_eq!(child.brain.code, Code::starter());
    }

    #[test]
    fn test_birth_needs_reserve_plus_one() {
        let mut world = World::empty(quiet(20, 20), 0);
        let parent = spawn(&mut world, 5, 5, "bir");
        world.germ_mut(parent).unwrap().energy = 40.5;

        world.advance(false);

        assert_eq!(world.population(), 1);
        assert!(!world.germ(parent).unwrap().success);
    }

    #[test]
    fn test_birth_cell_prefers_requested_direction() {
        let mut world = World::empty(quiet(20, 20), 0);
        let origin = Position::new(5, 5);
        assert_eq!(world.birth_cell(origin, 1, 0), Some(Position::new(6, 5)));

        world.spawn_food(Position::new(6, 5)).unwrap();
        assert_eq!(world.birth_cell(origin, 1, 0), Some(Position::new(6, 4)));
        assert_eq!(world.birth_cell(origin, 0, 0), Some(Position::new(4, 5)));

        for (dx, dy) in NEIGHBOURS {
            world.spawn_food(Position::new((5 + dx) as u16, (5 + dy) as u16)).ok();
        }
        assert_eq!(world.birth_cell(origin, 1, 0), None);
    }

    #[test]
    fn test_lethal_attack_absorbs_prey() {
        let mut world = World::empty(quiet(20, 20), 0);
        let hunter = spawn(&mut world, 5, 5, "ax 1; pwr 5; att");
        let prey = spawn(&mut world, 6, 5, "ret");
        world.germ_mut(hunter).unwrap().energy = 50.0;
        let target = world.germ_mut(prey).unwrap();
        target.energy = 40.0;
        target.stamina = 3.0;

        world.advance(false);

        assert!(world.entity(prey).is_none());
        assert!(world.tank().get(Position::new(6, 5)).is_none());
        let gain = (40.0 - 5.0) * 0.5 + 5.0;
        assert!(close(energy(&world, hunter), 50.0 + NET - 6.0 + gain));
        assert_eq!((world.stats.kills, world.stats.deaths), (1, 1));
    }

    #[test]
    fn test_attack_damages_without_killing() {
        let mut world = World::empty(quiet(20, 20), 0);
        let hunter = spawn(&mut world, 5, 5, "ax 1; pwr 2; att");
        let prey = spawn(&mut world, 6, 5, "set 0 pain; ret");

        world.advance(false);

        assert!(close(energy(&world, hunter), 30.0 + NET - 3.0));
        let target = world.germ(prey).unwrap();
        // Hit for 2, then regenerated 1 on its own turn.
        assert_eq!(target.stamina, 14.0);
        assert_eq!(target.brain.memory.read(0.0), 2.0);
        assert_eq!(target.pain, 0.0);
    }

    #[test]
    fn test_attack_needs_power_and_a_germ() {
        let mut world = World::empty(quiet(20, 20), 0);
        let weak = spawn(&mut world, 5, 5, "ax 1; pwr 0; att");
        spawn(&mut world, 6, 5, "ret");
        let empty = spawn(&mut world, 10, 10, "ax 1; pwr 3; att");

        world.advance(false);

        assert!(!world.germ(weak).unwrap().success);
        assert!(close(energy(&world, weak), 30.0 + NET));
        assert!(!world.germ(empty).unwrap().success);
        assert_eq!(world.population(), 3);
    }

    #[test]
    fn test_halt_penalty_can_kill() {
        let mut config = quiet(20, 20);
        config.brain.max_executions = 50;
        let mut world = World::empty(config, 0);
        let looper = spawn(&mut world, 5, 5, "mark @0; if 1 @0");

        world.advance(false);
        assert!(close(energy(&world, looper), 30.0 + NET - 1.0));
        assert!(!world.germ(looper).unwrap().success);

        world.germ_mut(looper).unwrap().energy = 0.5;
        world.advance(false);
        assert!(world.is_extinct());
        assert_eq!(world.stats.deaths, 1);
        assert_eq!(spawn(&mut world, 1, 1, "ret"), looper);
    }

    #[test]
    fn test_fault_is_a_no_op_turn() {
        let mut world = World::empty(quiet(20, 20), 0);
        let broken = Code::new(vec![
            Instruction::SetBurst(1.0.into()),
            Instruction::SetActionX(Expression::op(Op::Add, vec![1.0.into()])),
            Instruction::Move,
        ]);
        let id = world.spawn_germ(Position::new(5, 5), broken).unwrap();

        world.advance(false);

        let germ = world.germ(id).unwrap();
        assert!(!germ.success);
        assert!(!germ.burst);
        assert!(close(germ.energy, 30.0 + NET));
        assert_eq!(world.stats.faults, 1);
    }

    #[test]
    fn test_burst_turns() {
        for (policy, expected) in [
            (BurstMetabolism::Skip, 30.0 + NET - 2.0),
            (BurstMetabolism::Prorate, 30.0 + NET - 2.0 + 0.5 * NET),
        ] {
            let mut config = quiet(20, 20);
            config.burst.metabolism = policy;
            let mut world = World::empty(config, 0);
            let burster = spawn(&mut world, 5, 5, "bst 1; ret");
            let idler = spawn(&mut world, 9, 9, "ret");

            world.step();

            assert_eq!(world.tick(), 2);
            assert!(close(energy(&world, burster), expected), "{:?}", policy);
            assert!(world.germ(burster).unwrap().burst);
            assert!(close(energy(&world, idler), 30.0 + 0.5 - 0.145));
        }
    }

    #[test]
    fn test_food_regrows_to_cap() {
        let mut config = quiet(20, 20);
        config.food.density_cap = 0.05;
        config.food.regrow_probes = 1000;
        let mut world = World::empty(config, 3);

        world.advance(false);
        assert_eq!(world.food_count(), 20);
        world.advance(false);
        assert_eq!(world.food_count(), 20);
    }

    #[test]
    fn test_newborn_does_not_act_in_birth_tick() {
        let mut world = World::empty(quiet(20, 20), 0);
        let text = "if (> energy 70) @0; ret; mark @0; ax 1; bir";
        let parent = spawn(&mut world, 5, 5, text);
        world.germ_mut(parent).unwrap().energy = 100.0;

        world.advance(false);

        let child = world.entity_at(Position::new(6, 5)).unwrap().as_germ().unwrap();
        assert_eq!(child.stamina, 15.0);
        assert_eq!(child.energy, 30.0);
        assert!(child.success);
    }

    #[test]
    fn test_newborn_is_invisible_until_admitted() {
        let mut world = World::empty(quiet(20, 20), 0);
        let parent = spawn(&mut world, 5, 5, &Code::starter().to_string());
        let observer = spawn(&mut world, 8, 5, "set 0 (ox 0); ret");
        world.germ_mut(parent).unwrap().energy = 80.0;

        world.advance(false);
        assert_eq!(world.stats.births, 1);
        let nearest = |w: &World| w.germ(observer).unwrap().brain.memory.read(0.0);
        assert_eq!(nearest(&world), -3.0);

        world.advance(false);
        assert_eq!(nearest(&world), -2.0);
    }

    #[test]
    fn test_newborn_cannot_be_attacked_in_birth_tick() {
        let mut world = World::empty(quiet(20, 20), 0);
        let parent = spawn(&mut world, 5, 5, &Code::starter().to_string());
        let hunter = spawn(&mut world, 7, 5, "ax -1; pwr 5; att");
        world.germ_mut(parent).unwrap().energy = 80.0;

        world.advance(false);

        assert!(!world.germ(hunter).unwrap().success);
        assert!(close(energy(&world, hunter), 30.0 + NET));
        assert_eq!(world.population(), 3);
        assert_eq!(world.stats.kills, 0);
        let child = world.entity_at(Position::new(6, 5)).unwrap().as_germ().unwrap();
        assert_eq!(child.stamina, 15.0);
        assert_eq!(child.pain, 0.0);
    }

    #[test]
    fn test_checkpoint_rejects_overlap() {
        let mut world = World::empty(quiet(20, 20), 9);
        spawn(&mut world, 3, 3, "ret");
        world.spawn_food(Position::new(4, 3)).unwrap();

        let mut checkpoint = world.create_checkpoint();
        let mut clash = checkpoint.entities[1].clone();
        clash.x = 3;
        checkpoint.entities.push(clash.clone());
        assert!(matches!(
            World::from_checkpoint(checkpoint.clone()),
            Err(CheckpointError::Capacity { index: 2, .. })
        ));

        checkpoint.entities[2].alive = false;
        let restored = World::from_checkpoint(checkpoint).unwrap();
        assert_eq!(restored.population() + restored.food_count(), 2);
    }
}
