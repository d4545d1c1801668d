//! Uniform-cell spatial hash for proximity queries
//!
//! Each item lives in exactly one cell, the one containing its last recorded
//! position. Queries return every item in the cells the query volume touches,
//! so results are a superset of the exact answer; callers that need exact
//! membership filter by distance afterwards.

use ember_core::{Aabb, Vec3};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Integer cell coordinate
pub type CellCoord = (i32, i32, i32);

/// Spatial hash keyed by discretized position
pub struct SpatialGrid<T> {
    cell_size: f32,
    cells: HashMap<CellCoord, HashSet<T>>,
    /// Reverse index: which cell each item currently occupies
    membership: HashMap<T, CellCoord>,
}

impl<T: Copy + Eq + Hash> SpatialGrid<T> {
    /// Create a grid with the given cell edge length (must be positive)
    pub fn new(cell_size: f32) -> Self {
        assert!(cell_size > 0.0, "cell size must be positive, got {cell_size}");
        Self {
            cell_size,
            cells: HashMap::new(),
            membership: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Cell containing `position`
    pub fn cell_of(&self, position: Vec3) -> CellCoord {
        (
            (position.x / self.cell_size).floor() as i32,
            (position.y / self.cell_size).floor() as i32,
            (position.z / self.cell_size).floor() as i32,
        )
    }

    /// Record `item` at `position`.
    ///
    /// `old_position` is a hint: when it maps to the same cell as the new
    /// position nothing changes. `None` means the item is being placed for
    /// the first time. Either way, any stale membership is removed first so
    /// an item never sits in two cells.
    pub fn update_position(&mut self, item: T, old_position: Option<Vec3>, position: Vec3) {
        let new_cell = self.cell_of(position);

        if let Some(old) = old_position {
            if self.cell_of(old) == new_cell && self.membership.get(&item) == Some(&new_cell) {
                return;
            }
        }

        if let Some(previous) = self.membership.insert(item, new_cell) {
            if previous == new_cell {
                return;
            }
            self.remove_from_cell(item, previous);
        }
        self.cells.entry(new_cell).or_default().insert(item);
    }

    /// Drop `item` from the grid; no-op if absent
    pub fn remove(&mut self, item: T) {
        if let Some(cell) = self.membership.remove(&item) {
            self.remove_from_cell(item, cell);
        }
    }

    fn remove_from_cell(&mut self, item: T, cell: CellCoord) {
        if let Some(set) = self.cells.get_mut(&cell) {
            set.remove(&item);
            if set.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Items in every cell overlapping the sphere at `center` with `radius`
    pub fn query_radius(&self, center: Vec3, radius: f32) -> Vec<T> {
        let r = radius.max(0.0);
        self.query_cells(center - Vec3::splat(r), center + Vec3::splat(r))
    }

    /// Items in every cell overlapping the box `min..=max`
    pub fn query_bounds(&self, min: Vec3, max: Vec3) -> Vec<T> {
        let bounds = Aabb::new(min, max);
        self.query_cells(bounds.min, bounds.max)
    }

    fn query_cells(&self, min: Vec3, max: Vec3) -> Vec<T> {
        let lo = self.cell_of(min);
        let hi = self.cell_of(max);
        let extent = |a: i32, b: i32| i128::from(b) - i128::from(a) + 1;
        let span = extent(lo.0, hi.0) * extent(lo.1, hi.1) * extent(lo.2, hi.2);

        let mut out = Vec::new();
        if span > self.cells.len() as i128 {
            // Sparse grid under a large query: scan occupied cells instead
            for (cell, items) in &self.cells {
                if in_range(*cell, lo, hi) {
                    out.extend(items.iter().copied());
                }
            }
            return out;
        }

        for x in lo.0..=hi.0 {
            for y in lo.1..=hi.1 {
                for z in lo.2..=hi.2 {
                    if let Some(items) = self.cells.get(&(x, y, z)) {
                        out.extend(items.iter().copied());
                    }
                }
            }
        }
        out
    }

    pub fn contains(&self, item: T) -> bool {
        self.membership.contains_key(&item)
    }

    /// Number of occupied cells
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn total_particle_count(&self) -> usize {
        self.membership.len()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.membership.clear();
    }
}

fn in_range(cell: CellCoord, lo: CellCoord, hi: CellCoord) -> bool {
    (lo.0..=hi.0).contains(&cell.0)
        && (lo.1..=hi.1).contains(&cell.1)
        && (lo.2..=hi.2).contains(&cell.2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn insert_move_and_remove() {
        let mut grid = SpatialGrid::new(10.0);
        grid.update_position(1u32, None, Vec3::new(1.0, 1.0, 1.0));
        grid.update_position(2u32, None, Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(grid.cell_count(), 1);
        assert_eq!(grid.total_particle_count(), 2);

        grid.update_position(1, Some(Vec3::new(1.0, 1.0, 1.0)), Vec3::new(25.0, 1.0, 1.0));
        assert_eq!(grid.cell_count(), 2);
        assert_eq!(grid.total_particle_count(), 2);
        assert_eq!(grid.query_radius(Vec3::new(25.0, 1.0, 1.0), 0.0), vec![1]);

        grid.remove(1);
        grid.remove(1);
        assert_eq!(grid.cell_count(), 1);
        assert!(!grid.contains(1));
        assert!(grid.contains(2));
    }

    #[test]
    fn stale_old_position_does_not_duplicate() {
        let mut grid = SpatialGrid::new(5.0);
        grid.update_position(7u32, None, Vec3::ZERO);
        // Caller passes a wrong hint; membership still ends up in one cell
        grid.update_position(7, Some(Vec3::new(100.0, 0.0, 0.0)), Vec3::new(12.0, 0.0, 0.0));
        assert_eq!(grid.cell_count(), 1);
        assert_eq!(grid.query_radius(Vec3::ZERO, 1.0), Vec::<u32>::new());
    }

    #[test]
    fn negative_coordinates_floor_correctly() {
        let grid: SpatialGrid<u32> = SpatialGrid::new(10.0);
        assert_eq!(grid.cell_of(Vec3::new(-0.5, 9.99, -10.0)), (-1, 0, -1));
    }

    #[test]
    fn bounds_query_accepts_swapped_corners() {
        let mut grid = SpatialGrid::new(4.0);
        grid.update_position(1u32, None, Vec3::new(1.0, 1.0, 1.0));
        grid.update_position(2u32, None, Vec3::new(50.0, 1.0, 1.0));
        let found = grid.query_bounds(Vec3::new(3.0, 3.0, 3.0), Vec3::new(-3.0, -3.0, -3.0));
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn huge_query_falls_back_to_cell_scan() {
        let mut grid = SpatialGrid::new(1.0);
        for i in 0..10u32 {
            grid.update_position(i, None, Vec3::new(i as f32 * 3.0, 0.0, 0.0));
        }
        let mut found = grid.query_radius(Vec3::ZERO, 10_000.0);
        found.sort();
        assert_eq!(found, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn world_sized_queries_scan_occupied_cells() {
        let mut grid = SpatialGrid::new(1.0);
        grid.update_position(1u32, None, Vec3::new(5.0, -3.0, 2.0));
        grid.update_position(2u32, None, Vec3::new(-4000.0, 12.0, 900.0));

        let mut found = grid.query_radius(Vec3::ZERO, 1.0e10);
        found.sort();
        assert_eq!(found, vec![1, 2]);

        let mut found = grid.query_bounds(Vec3::splat(f32::MIN), Vec3::splat(f32::MAX));
        found.sort();
        assert_eq!(found, vec![1, 2]);
    }

    proptest! {
        #[test]
        fn inserted_item_found_within_any_radius(
            x in -500.0f32..500.0,
            y in -500.0f32..500.0,
            z in -500.0f32..500.0,
            r in 0.0f32..50.0,
            cell in 0.5f32..20.0,
        ) {
            let mut grid = SpatialGrid::new(cell);
            let p = Vec3::new(x, y, z);
            grid.update_position(1u32, None, p);
            prop_assert!(grid.query_radius(p, r).contains(&1));
        }

        #[test]
        fn far_item_never_returned(
            p in (-500.0f32..500.0, -500.0f32..500.0, -500.0f32..500.0),
            q in (-500.0f32..500.0, -500.0f32..500.0, -500.0f32..500.0),
            r in 0.0f32..50.0,
            cell in 0.5f32..20.0,
        ) {
            let mut grid = SpatialGrid::new(cell);
            let p = Vec3::new(p.0, p.1, p.2);
            let q = Vec3::new(q.0, q.1, q.2);
            grid.update_position(1u32, None, p);
            let diagonal = cell * 3.0f32.sqrt();
            if p.distance(&q) > r + diagonal {
                prop_assert!(!grid.query_radius(q, r).contains(&1));
            }
        }
    }
}
