//! Regular cell grid bounding the collision search.
//!
//! The box is tiled by `dims[0] x dims[1] x dims[2]` cells, each at least as wide as the
//! largest interaction range, so any pair that can collide before either particle leaves
//! its cell sits in the same or an adjacent cell. Membership follows
//! `floor(r / cell_size) mod dims` on periodic axes and is clamped to the grid on the
//! others.

use crate::core::geometry::{AxisKind, SimBox};
use crate::core::particle::{Particle, DIM};
use crate::core::vector::Vec3;
use crate::error::{Error, Result};

/// Linear cell index.
pub type CellId = usize;

/// Largest grid `CellIndex::new` will allocate.
pub const MAX_CELLS: usize = 1 << 24;

#[derive(Debug, Clone, Copy)]
struct Slot {
    cell: CellId,
    index: usize,
}

/// Cell membership table with precomputed neighbor stencils.
#[derive(Debug, Clone)]
pub struct CellIndex {
    dims: [usize; DIM],
    cell_size: [f64; DIM],
    sim_box: SimBox,
    cells: Vec<Vec<u32>>,
    neighbors: Vec<Vec<CellId>>,
    slots: Vec<Slot>,
}

impl CellIndex {
    /// Build an empty grid whose cells are no narrower than `range * (1 + 2 * margin)`.
    pub fn new(sim_box: &SimBox, range: f64, margin: f64) -> Result<Self> {
        if !range.is_finite() || range <= 0.0 {
            return Err(Error::InvalidParam(
                "interaction range must be finite and > 0".into(),
            ));
        }
        let lengths = sim_box.lengths();
        let min_edge = range * (1.0 + 2.0 * margin);
        let mut dims = [1usize; DIM];
        let mut cell_size = [0.0_f64; DIM];
        for k in 0..DIM {
            dims[k] = ((lengths[k] / min_edge).floor() as usize).max(1);
            cell_size[k] = lengths[k] / dims[k] as f64;
        }
        let n_cells = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .filter(|&n| n <= MAX_CELLS)
            .ok_or_else(|| {
                Error::InvalidParam(format!(
                    "cell grid {dims:?} needs more than {MAX_CELLS} cells"
                ))
            })?;

        let mut index = Self {
            dims,
            cell_size,
            sim_box: sim_box.clone(),
            cells: vec![Vec::new(); n_cells],
            neighbors: Vec::with_capacity(n_cells),
            slots: Vec::new(),
        };
        for cell in 0..n_cells {
            let stencil = index.stencil(cell);
            index.neighbors.push(stencil);
        }
        Ok(index)
    }

    /// Number of cells along each axis.
    #[inline]
    pub fn dims(&self) -> [usize; DIM] {
        self.dims
    }

    /// Edge lengths of one cell.
    #[inline]
    pub fn cell_size(&self) -> [f64; DIM] {
        self.cell_size
    }

    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Grid coordinates of the cell containing `r`.
    pub fn coords_for_position(&self, r: &Vec3) -> [usize; DIM] {
        let mut c = [0usize; DIM];
        for k in 0..DIM {
            let raw = (r[k] / self.cell_size[k]).floor() as i64;
            let n = self.dims[k] as i64;
            c[k] = match self.sim_box.kind(k) {
                AxisKind::Periodic => raw.rem_euclid(n) as usize,
                AxisKind::Reflective | AxisKind::Open => raw.clamp(0, n - 1) as usize,
            };
        }
        c
    }

    /// Linear id of the cell containing `r`.
    #[inline]
    pub fn cell_for_position(&self, r: &Vec3) -> CellId {
        self.linear(self.coords_for_position(r))
    }

    /// Linear id from grid coordinates, z fastest.
    #[inline]
    pub fn linear(&self, c: [usize; DIM]) -> CellId {
        (c[0] * self.dims[1] + c[1]) * self.dims[2] + c[2]
    }

    /// Inverse of [`CellIndex::linear`].
    #[inline]
    pub fn coords(&self, cell: CellId) -> [usize; DIM] {
        let c2 = cell % self.dims[2];
        let rest = cell / self.dims[2];
        [rest / self.dims[1], rest % self.dims[1], c2]
    }

    /// Drop all membership and assign every particle from scratch.
    pub fn rebuild(&mut self, particles: &[Particle], time: f64) -> Result<()> {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.slots.clear();
        self.slots.reserve(particles.len());
        for p in particles {
            self.check_inside(p.id, &p.r, time)?;
            let cell = self.cell_for_position(&p.r);
            self.slots.push(Slot {
                cell,
                index: self.cells[cell].len(),
            });
            self.cells[cell].push(p.id);
        }
        Ok(())
    }

    /// Cell currently recorded for particle `id`.
    pub fn cell_of(&self, id: u32) -> Result<CellId> {
        self.slots
            .get(id as usize)
            .map(|s| s.cell)
            .ok_or(Error::UnknownParticle(id))
    }

    /// The 3^D - 1 cells surrounding `cell` (fewer on clamped faces or narrow grids).
    #[inline]
    pub fn neighbor_cells(&self, cell: CellId) -> &[CellId] {
        &self.neighbors[cell]
    }

    /// `cell` followed by its neighbors.
    pub fn neighborhood(&self, cell: CellId) -> impl Iterator<Item = CellId> + '_ {
        std::iter::once(cell).chain(self.neighbors[cell].iter().copied())
    }

    /// Particles currently recorded in `cell`, in no particular order.
    #[inline]
    pub fn particles_in(&self, cell: CellId) -> &[u32] {
        &self.cells[cell]
    }

    /// Recompute the cell of particle `id` at position `r`; returns whether it moved.
    ///
    /// Errors with `BoundaryViolation` when `r` lies outside an open axis.
    pub fn relocate(&mut self, id: u32, r: &Vec3, time: f64) -> Result<bool> {
        self.check_inside(id, r, time)?;
        let slot = *self
            .slots
            .get(id as usize)
            .ok_or(Error::UnknownParticle(id))?;
        let target = self.cell_for_position(r);
        if target == slot.cell {
            return Ok(false);
        }

        let members = &mut self.cells[slot.cell];
        members.swap_remove(slot.index);
        if let Some(&moved) = members.get(slot.index) {
            self.slots[moved as usize].index = slot.index;
        }

        self.slots[id as usize] = Slot {
            cell: target,
            index: self.cells[target].len(),
        };
        self.cells[target].push(id);
        Ok(true)
    }

    /// Time until the particle is `margin` cell widths past a face of `cell`.
    ///
    /// Faces on the outside of non-periodic axes are skipped: walls or the open-box check
    /// handle those.
    pub fn transit_time(&self, cell: CellId, r: &Vec3, v: &Vec3, margin: f64) -> Option<f64> {
        let c = self.coords(cell);
        let mut best = f64::INFINITY;
        for k in 0..DIM {
            let periodic = self.sim_box.kind(k) == AxisKind::Periodic;
            if self.dims[k] == 1 && periodic {
                continue;
            }
            let size = self.cell_size[k];
            let dt = if v[k] > 0.0 && (periodic || c[k] + 1 < self.dims[k]) {
                ((c[k] + 1) as f64 * size + margin * size - r[k]) / v[k]
            } else if v[k] < 0.0 && (periodic || c[k] > 0) {
                (c[k] as f64 * size - margin * size - r[k]) / v[k]
            } else {
                continue;
            };
            if dt.is_finite() {
                best = best.min(dt.max(0.0));
            }
        }
        best.is_finite().then_some(best)
    }

    /// Ensure recorded membership matches positions for every particle.
    pub fn verify(&self, particles: &[Particle]) -> Result<()> {
        for p in particles {
            let recorded = self.cell_of(p.id)?;
            let expected = self.cell_for_position(&p.r);
            if recorded != expected {
                return Err(Error::CellDesync {
                    particle: p.id,
                    recorded,
                    expected,
                });
            }
            let slot = self.slots[p.id as usize];
            if self.cells[recorded].get(slot.index) != Some(&p.id) {
                return Err(Error::CellDesync {
                    particle: p.id,
                    recorded,
                    expected,
                });
            }
        }
        Ok(())
    }

    fn check_inside(&self, id: u32, r: &Vec3, time: f64) -> Result<()> {
        if self.sim_box.escaped_axis(r).is_some() {
            return Err(Error::BoundaryViolation {
                particle: id,
                time,
                position: *r,
            });
        }
        Ok(())
    }

    fn stencil(&self, cell: CellId) -> Vec<CellId> {
        let c = self.coords(cell);
        let mut out = Vec::with_capacity(26);
        for dx in -1i64..=1 {
            for dy in -1i64..=1 {
                for dz in -1i64..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    let offset = [dx, dy, dz];
                    let mut n = [0usize; DIM];
                    let mut valid = true;
                    for k in 0..DIM {
                        let dim = self.dims[k] as i64;
                        let raw = c[k] as i64 + offset[k];
                        if self.sim_box.kind(k) == AxisKind::Periodic {
                            n[k] = raw.rem_euclid(dim) as usize;
                        } else if (0..dim).contains(&raw) {
                            n[k] = raw as usize;
                        } else {
                            valid = false;
                            break;
                        }
                    }
                    if valid {
                        out.push(self.linear(n));
                    }
                }
            }
        }
        out.retain(|&n| n != cell);
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(id: u32, r: Vec3) -> Result<Particle> {
        Particle::new(id, r, [0.0; DIM], 0.1, 1.0)
    }

    #[test]
    fn grid_tiles_box_with_cells_at_least_range() -> Result<()> {
        let b = SimBox::periodic([10.0, 7.5, 3.0])?;
        let idx = CellIndex::new(&b, 1.0, 1e-9)?;
        assert_eq!(idx.dims(), [9, 7, 2]);
        for (k, &s) in idx.cell_size().iter().enumerate() {
            assert!(s >= 1.0);
            assert!((s * idx.dims()[k] as f64 - b.lengths()[k]).abs() < 1e-12);
        }
        Ok(())
    }

    #[test]
    fn oversized_grid_is_rejected() -> Result<()> {
        let b = SimBox::walled([1e7, 1e7, 1e7])?;
        match CellIndex::new(&b, 1.0, 1e-9) {
            Err(Error::InvalidParam(msg)) => assert!(msg.contains("cells")),
            other => panic!("expected InvalidParam, got {other:?}"),
        }
        // Still fine once the range is wide enough
        let idx = CellIndex::new(&b, 1e6, 1e-9)?;
        assert_eq!(idx.dims(), [9, 9, 9]);
        Ok(())
    }

    #[test]
    fn interior_cell_has_26_neighbors() -> Result<()> {
        let b = SimBox::walled([5.0, 5.0, 5.0])?;
        let idx = CellIndex::new(&b, 1.0, 1e-9)?;
        let center = idx.linear([2, 2, 2]);
        assert_eq!(idx.neighbor_cells(center).len(), 26);
        let corner = idx.linear([0, 0, 0]);
        assert_eq!(idx.neighbor_cells(corner).len(), 7);
        Ok(())
    }

    #[test]
    fn periodic_corner_wraps() -> Result<()> {
        let b = SimBox::periodic([4.0, 4.0, 4.0])?;
        let idx = CellIndex::new(&b, 1.0, 1e-9)?;
        let corner = idx.linear([0, 0, 0]);
        let n = idx.neighbor_cells(corner);
        assert_eq!(n.len(), 26);
        assert!(n.contains(&idx.linear([2, 2, 2])));
        Ok(())
    }

    #[test]
    fn narrow_periodic_grid_deduplicates() -> Result<()> {
        let b = SimBox::periodic([2.0, 2.0, 1.0])?;
        let idx = CellIndex::new(&b, 1.0, 1e-9)?;
        assert_eq!(idx.dims(), [1, 1, 1]);
        assert!(idx.neighbor_cells(0).is_empty());
        let b = SimBox::periodic([2.5, 2.5, 2.5])?;
        let idx = CellIndex::new(&b, 1.0, 1e-9)?;
        assert_eq!(idx.dims(), [2, 2, 2]);
        assert_eq!(idx.neighbor_cells(0).len(), 7);
        Ok(())
    }

    #[test]
    fn relocate_moves_membership() -> Result<()> {
        let b = SimBox::periodic([4.0, 4.0, 4.0])?;
        let mut idx = CellIndex::new(&b, 1.0, 1e-9)?;
        let ps = vec![
            particle(0, [0.5, 0.5, 0.5])?,
            particle(1, [0.6, 0.5, 0.5])?,
            particle(2, [2.5, 0.5, 0.5])?,
        ];
        idx.rebuild(&ps, 0.0)?;
        let c0 = idx.cell_of(0)?;
        assert_eq!(idx.particles_in(c0), &[0, 1]);

        let moved = idx.relocate(0, &[1.5, 0.5, 0.5], 0.0)?;
        assert!(moved);
        assert_eq!(idx.particles_in(c0), &[1]);
        assert_eq!(idx.cell_of(0)?, idx.linear([1, 0, 0]));
        assert!(!idx.relocate(1, &[0.7, 0.5, 0.5], 0.0)?);

        let mut after = ps.clone();
        after[0].r = [1.5, 0.5, 0.5];
        after[1].r = [0.7, 0.5, 0.5];
        idx.verify(&after)?;
        Ok(())
    }

    #[test]
    fn relocate_outside_open_axis_is_violation() -> Result<()> {
        let b = SimBox::new(
            [4.0, 4.0, 4.0],
            [AxisKind::Open, AxisKind::Periodic, AxisKind::Periodic],
        )?;
        let mut idx = CellIndex::new(&b, 1.0, 1e-9)?;
        idx.rebuild(&[particle(0, [0.5, 0.5, 0.5])?], 0.0)?;
        match idx.relocate(0, &[-0.1, 0.5, 0.5], 2.0) {
            Err(Error::BoundaryViolation { particle, time, .. }) => {
                assert_eq!(particle, 0);
                assert_eq!(time, 2.0);
            }
            other => panic!("expected boundary violation, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn transit_time_to_next_face() -> Result<()> {
        let b = SimBox::walled([4.0, 4.0, 4.0])?;
        let idx = CellIndex::new(&b, 1.0, 0.0)?;
        let r = [0.25, 0.5, 0.5];
        let cell = idx.cell_for_position(&r);
        let t = idx.transit_time(cell, &r, &[0.5, 0.0, 0.0], 0.0);
        assert_eq!(t, Some(1.5));
        // Heading into the outer wall: no transit
        assert_eq!(idx.transit_time(cell, &r, &[-0.5, 0.0, 0.0], 0.0), None);
        assert_eq!(idx.transit_time(cell, &r, &[0.0; DIM], 0.0), None);
        Ok(())
    }
}
