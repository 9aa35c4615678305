//! Hooks for thermostats and accumulators around each resolved collision.

use crate::core::event::{CollisionEvent, Partner};
use crate::core::particle::{Particle, DIM};
use crate::core::potential::PotentialId;
use crate::error::{Error, Result};

/// Summary of a resolved collision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionRecord {
    pub time: f64,
    pub subject: u32,
    pub partner: Partner,
    pub potential: Option<PotentialId>,
    /// Pair virial `dr . dp` (zero for boundary events).
    pub virial: f64,
    /// Momentum delivered by a boundary along its normal (zero for pair events).
    pub boundary_impulse: f64,
    /// Change of pair potential energy.
    pub delta_u: f64,
    /// Work done on the particle by a moving boundary.
    pub work: f64,
}

/// Mutable velocity view handed to [`Observer::post_resolve`].
///
/// Any write marks the state as modified, which makes the integrator throw away every
/// cached prediction and recompute them all.
pub struct VelocityAccess<'a> {
    particles: &'a mut [Particle],
    modified: bool,
}

impl<'a> VelocityAccess<'a> {
    pub(crate) fn new(particles: &'a mut [Particle]) -> Self {
        Self {
            particles,
            modified: false,
        }
    }

    /// Read access to every particle.
    pub fn particles(&self) -> &[Particle] {
        self.particles
    }

    /// Overwrite the velocity of particle `id`.
    pub fn set_velocity(&mut self, id: u32, v: [f64; DIM]) -> Result<()> {
        let p = self
            .particles
            .get_mut(id as usize)
            .ok_or(Error::UnknownParticle(id))?;
        p.set_velocity(v)?;
        self.modified = true;
        Ok(())
    }

    /// Multiply every velocity by `factor`.
    pub fn scale_all(&mut self, factor: f64) -> Result<()> {
        if !factor.is_finite() {
            return Err(Error::InvalidParam("scale factor must be finite".into()));
        }
        for p in self.particles.iter_mut() {
            p.v.iter_mut().for_each(|c| *c *= factor);
        }
        self.modified = true;
        Ok(())
    }

    /// Whether any velocity was written through this handle.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

/// Observation points around a collision. Both methods default to no-ops.
pub trait Observer: Send {
    /// Called with the pre-collision state, after every particle was advanced to the
    /// event time.
    fn pre_resolve(&mut self, _event: &CollisionEvent, _particles: &[Particle]) {}

    /// Called after the collision law updated the velocities.
    fn post_resolve(&mut self, _record: &CollisionRecord, _state: &mut VelocityAccess<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_mark_state_modified() -> Result<()> {
        let mut ps = vec![
            Particle::new(0, [0.0; DIM], [1.0, 0.0, 0.0], 0.5, 1.0)?,
            Particle::new(1, [2.0, 0.0, 0.0], [0.0, -2.0, 0.0], 0.5, 1.0)?,
        ];
        let mut access = VelocityAccess::new(&mut ps);
        assert!(!access.is_modified());
        assert_eq!(access.particles().len(), 2);
        access.scale_all(0.5)?;
        assert!(access.is_modified());
        assert!(access.set_velocity(9, [0.0; DIM]).is_err());
        assert_eq!(ps[1].v, [0.0, -1.0, 0.0]);
        Ok(())
    }
}
