//! Tank grid, id allocation and precomputed view offsets.

use crate::error::CapacityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique entity identifier; freed ids are reused smallest-first.
pub type EntityId = u32;

/// 8-neighbourhood offsets in fixed scan order.
pub const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// A cell of the tank. `y` grows with depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u16,
    pub y: u16,
}

impl Position {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

/// Occupancy grid: each cell holds at most one entity id.
#[derive(Clone, Debug)]
pub struct Tank {
    width: u16,
    height: u16,
    wrap: bool,
    cells: Vec<Option<EntityId>>,
}

impl Tank {
    pub fn new(width: u16, height: u16, wrap: bool) -> Self {
        Self {
            width,
            height,
            wrap,
            cells: vec![None; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn width(&self) -> u16 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn index(&self, pos: Position) -> Option<usize> {
        (pos.x < self.width && pos.y < self.height)
            .then(|| pos.y as usize * self.width as usize + pos.x as usize)
    }

    /// Id occupying `pos`, if any
    #[inline]
    pub fn get(&self, pos: Position) -> Option<EntityId> {
        self.index(pos).and_then(|i| self.cells[i])
    }

    #[inline]
    pub fn is_occupied(&self, pos: Position) -> bool {
        self.get(pos).is_some()
    }

    /// Put `id` into an empty, in-bounds cell.
    pub fn place(&mut self, pos: Position, id: EntityId) -> Result<(), CapacityError> {
        let err = CapacityError { x: pos.x, y: pos.y };
        let i = self.index(pos).ok_or(err)?;
        if self.cells[i].is_some() {
            return Err(err);
        }
        self.cells[i] = Some(id);
        Ok(())
    }

    /// Clear `pos` if it holds `id`.
    pub fn release(&mut self, pos: Position, id: EntityId) {
        if let Some(i) = self.index(pos) {
            if self.cells[i] == Some(id) {
                self.cells[i] = None;
            }
        }
    }

    /// Move whatever occupies `from` into the empty cell `to`.
    pub fn relocate(&mut self, from: Position, to: Position) -> Result<(), CapacityError> {
        let err = CapacityError { x: to.x, y: to.y };
        let (Some(src), Some(dst)) = (self.index(from), self.index(to)) else {
            return Err(err);
        };
        if self.cells[dst].is_some() {
            return Err(err);
        }
        self.cells[dst] = self.cells[src].take();
        Ok(())
    }

    /// Cell at an offset from `pos`. The x axis wraps if configured; the y
    /// axis never does.
    pub fn relative(&self, pos: Position, dx: i32, dy: i32) -> Option<Position> {
        let width = self.width as i32;
        let mut x = pos.x as i32 + dx;
        if self.wrap {
            x = x.rem_euclid(width);
        } else if !(0..width).contains(&x) {
            return None;
        }
        let y = pos.y as i32 + dy;
        if !(0..self.height as i32).contains(&y) {
            return None;
        }
        Some(Position::new(x as u16, y as u16))
    }

    /// In-bounds neighbours of `pos` in scan order.
    pub fn neighbours(&self, pos: Position) -> impl Iterator<Item = Position> + '_ {
        NEIGHBOURS
            .iter()
            .filter_map(move |&(dx, dy)| self.relative(pos, dx, dy))
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}

/// Allocates the smallest id not currently in use.
#[derive(Clone, Debug, Default)]
pub struct IdAllocator {
    free: BTreeSet<EntityId>,
    next: EntityId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> EntityId {
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn release(&mut self, id: EntityId) {
        if id + 1 == self.next {
            self.next = id;
            // Trailing free ids collapse into `next`.
            while self.next > 0 && self.free.remove(&(self.next - 1)) {
                self.next -= 1;
            }
        } else if id < self.next {
            self.free.insert(id);
        }
    }

    pub fn in_use(&self) -> usize {
        self.next as usize - self.free.len()
    }
}

/// Offsets within the view radius, nearest first, shared by every germ.
#[derive(Clone, Debug)]
pub struct ViewOffsets {
    offsets: Vec<(i32, i32)>,
}

impl ViewOffsets {
    /// All nonzero offsets within Euclidean `radius`, sorted by distance,
    /// then by row, then by column.
    pub fn new(radius: u16) -> Self {
        let r = radius as i32;
        let mut offsets: Vec<(i32, i32)> = (-r..=r)
            .flat_map(|dy| (-r..=r).map(move |dx| (dx, dy)))
            .filter(|&(dx, dy)| (dx, dy) != (0, 0) && dx * dx + dy * dy <= r * r)
            .collect();
        offsets.sort_by_key(|&(dx, dy)| (dx * dx + dy * dy, dy, dx));
        Self { offsets }
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.offsets.iter().copied()
    }
}
