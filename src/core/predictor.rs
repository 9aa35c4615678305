use crate::core::boundary::Boundary;
use crate::core::cell::CellIndex;
use crate::core::event::Partner;
use crate::core::geometry::SimBox;
use crate::core::particle::Particle;
use crate::core::potential::{PairState, PotentialId, PotentialMap};
use crate::core::vector::sub;
use crate::error::{Error, Result};

/// An absolute-time prediction for one subject particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub time: f64,
    pub partner: Partner,
    pub potential: Option<PotentialId>,
}

impl Prediction {
    /// Strictly earlier, or equally early with a smaller tie-break key for `subject`.
    #[inline]
    fn precedes(&self, other: &Prediction, subject: u32) -> bool {
        self.time < other.time
            || (self.time == other.time
                && self.partner.order_key(subject) < other.partner.order_key(subject))
    }
}

/// Read-only view of the simulation state used to compute event times.
///
/// All times it returns are absolute (`clock + dt`).
pub struct CollisionPredictor<'a> {
    pub particles: &'a [Particle],
    pub sim_box: &'a SimBox,
    pub cells: &'a CellIndex,
    pub potentials: &'a PotentialMap,
    pub boundaries: &'a [Box<dyn Boundary>],
    pub clock: f64,
    pub transit_margin: f64,
}

impl<'a> CollisionPredictor<'a> {
    fn particle(&self, id: u32) -> Result<&'a Particle> {
        self.particles
            .get(id as usize)
            .ok_or(Error::UnknownParticle(id))
    }

    /// Kinematics of `b` relative to `a`, using the minimum image.
    pub fn pair_state(&self, a: u32, b: u32) -> Result<PairState> {
        let pa = self.particle(a)?;
        let pb = self.particle(b)?;
        Ok(PairState {
            dr: self.sim_box.minimum_image(sub(&pb.r, &pa.r)),
            dv: sub(&pb.v, &pa.v),
            inv_mass_a: pa.inv_mass(),
            inv_mass_b: pb.inv_mass(),
        })
    }

    /// Next event between `a` and `partner`, or `None` if they never interact.
    pub fn predict(&self, a: u32, partner: Partner) -> Result<Option<Prediction>> {
        match partner {
            Partner::Particle(b) => self.predict_pair(a, b),
            Partner::Boundary(b) => self.predict_boundary(a, b),
            Partner::Transit => self.predict_transit(a),
        }
    }

    /// Next event of the pair `(a, b)` under the law mapped to their species.
    pub fn predict_pair(&self, a: u32, b: u32) -> Result<Option<Prediction>> {
        if a == b {
            return Ok(None);
        }
        let (pa, pb) = (self.particle(a)?, self.particle(b)?);
        let Some(id) = self.potentials.lookup(pa.species, pb.species) else {
            return Ok(None);
        };
        let law = self.potentials.get(id)?;
        let pair = self.pair_state(a, b)?;
        Ok(law.collision_time(&pair).map(|dt| Prediction {
            time: self.clock + dt,
            partner: Partner::Particle(b),
            potential: Some(id),
        }))
    }

    /// Next contact of `a` with boundary `b`.
    pub fn predict_boundary(&self, a: u32, b: u32) -> Result<Option<Prediction>> {
        let p = self.particle(a)?;
        let boundary = self
            .boundaries
            .get(b as usize)
            .ok_or_else(|| Error::InvalidParam(format!("unknown boundary id {b}")))?;
        Ok(boundary.collision_time(p).map(|dt| Prediction {
            time: self.clock + dt,
            partner: Partner::Boundary(b),
            potential: None,
        }))
    }

    /// When `a` next leaves its cell.
    pub fn predict_transit(&self, a: u32) -> Result<Option<Prediction>> {
        let p = self.particle(a)?;
        let cell = self.cells.cell_of(a)?;
        Ok(self
            .cells
            .transit_time(cell, &p.r, &p.v, self.transit_margin)
            .map(|dt| Prediction {
                time: self.clock + dt,
                partner: Partner::Transit,
                potential: None,
            }))
    }

    /// Earliest event of `a` over its cell neighborhood, every boundary and its next
    /// cell transit.
    pub fn earliest(&self, a: u32) -> Result<Option<Prediction>> {
        let mut best: Option<Prediction> = None;
        let mut offer = |candidate: Option<Prediction>| {
            if let Some(c) = candidate {
                if !c.time.is_finite() {
                    return;
                }
                let better = match &best {
                    None => true,
                    Some(b) => c.precedes(b, a),
                };
                if better {
                    best = Some(c);
                }
            }
        };

        let home = self.cells.cell_of(a)?;
        for cell in self.cells.neighborhood(home) {
            for &b in self.cells.particles_in(cell) {
                offer(self.predict_pair(a, b)?);
            }
        }
        for b in 0..self.boundaries.len() as u32 {
            offer(self.predict_boundary(a, b)?);
        }
        offer(self.predict_transit(a)?);
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boundary::{Side, Wall};
    use crate::core::particle::DIM;
    use crate::core::potential::HardSphere;
    use approx::assert_relative_eq;

    struct Fixture {
        particles: Vec<Particle>,
        sim_box: SimBox,
        cells: CellIndex,
        potentials: PotentialMap,
        boundaries: Vec<Box<dyn Boundary>>,
    }

    impl Fixture {
        fn new(particles: Vec<Particle>, sim_box: SimBox) -> Result<Self> {
            let potentials = PotentialMap::uniform(HardSphere::new(1.0)?);
            let mut cells = CellIndex::new(&sim_box, 1.0, 1e-9)?;
            cells.rebuild(&particles, 0.0)?;
            Ok(Self {
                particles,
                sim_box,
                cells,
                potentials,
                boundaries: Vec::new(),
            })
        }

        fn predictor(&self, clock: f64) -> CollisionPredictor<'_> {
            CollisionPredictor {
                particles: &self.particles,
                sim_box: &self.sim_box,
                cells: &self.cells,
                potentials: &self.potentials,
                boundaries: &self.boundaries,
                clock,
                transit_margin: 1e-9,
            }
        }
    }

    fn sphere(id: u32, r: [f64; DIM], v: [f64; DIM]) -> Result<Particle> {
        Particle::new(id, r, v, 0.5, 1.0)
    }

    #[test]
    fn pair_prediction_is_absolute() -> Result<()> {
        let f = Fixture::new(
            vec![
                sphere(0, [4.0, 5.0, 5.0], [1.0, 0.0, 0.0])?,
                sphere(1, [6.0, 5.0, 5.0], [-1.0, 0.0, 0.0])?,
            ],
            SimBox::periodic([10.0, 10.0, 10.0])?,
        )?;
        let p = f.predictor(3.0).predict_pair(0, 1)?;
        let p = p.ok_or_else(|| Error::MathError("expected a collision".into()))?;
        assert_eq!(p.time, 3.5);
        assert_eq!(p.partner, Partner::Particle(1));
        Ok(())
    }

    #[test]
    fn minimum_image_finds_collision_across_the_box_face() -> Result<()> {
        let f = Fixture::new(
            vec![
                sphere(0, [0.9, 5.0, 5.0], [-1.0, 0.0, 0.0])?,
                sphere(1, [9.1, 5.0, 5.0], [1.0, 0.0, 0.0])?,
            ],
            SimBox::periodic([10.0, 10.0, 10.0])?,
        )?;
        let t = f.predictor(0.0).predict_pair(0, 1)?.map(|p| p.time);
        assert_relative_eq!(t.unwrap_or(f64::NAN), 0.4, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn resting_isolated_particle_has_no_event() -> Result<()> {
        let f = Fixture::new(
            vec![
                sphere(0, [1.5, 1.5, 1.5], [0.0; DIM])?,
                sphere(1, [8.5, 8.5, 8.5], [0.0; DIM])?,
            ],
            SimBox::walled([10.0, 10.0, 10.0])?,
        )?;
        assert_eq!(f.predictor(0.0).earliest(0)?, None);
        Ok(())
    }

    #[test]
    fn earliest_prefers_wall_over_later_pair() -> Result<()> {
        let mut f = Fixture::new(
            vec![
                sphere(0, [1.0, 5.0, 5.0], [-1.0, 0.0, 0.0])?,
                sphere(1, [5.0, 5.0, 5.0], [0.0; DIM])?,
            ],
            SimBox::walled([10.0, 10.0, 10.0])?,
        )?;
        f.boundaries.push(Box::new(Wall::new(0, Side::Min, 0.0)?));
        let best = f.predictor(0.0).earliest(0)?;
        let best = best.ok_or_else(|| Error::MathError("expected an event".into()))?;
        assert_eq!(best.partner, Partner::Boundary(0));
        assert_eq!(best.time, 0.5);
        Ok(())
    }

    #[test]
    fn transit_competes_with_collisions() -> Result<()> {
        let f = Fixture::new(
            vec![sphere(0, [0.5, 0.5, 0.5], [1.0, 0.0, 0.0])?],
            SimBox::periodic([10.0, 10.0, 10.0])?,
        )?;
        let best = f.predictor(0.0).earliest(0)?;
        let best = best.ok_or_else(|| Error::MathError("expected a transit".into()))?;
        assert_eq!(best.partner, Partner::Transit);
        let edge = 10.0 / 9.0;
        assert_relative_eq!(best.time, edge * (1.0 + 1e-9) - 0.5, epsilon = 1e-12);
        Ok(())
    }
}
