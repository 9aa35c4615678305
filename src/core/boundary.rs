use std::fmt;

use crate::core::particle::{Particle, DIM};
use crate::error::{Error, Result};

/// What a boundary event did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundaryResponse {
    /// Momentum given to the particle along the boundary normal.
    pub impulse: f64,
    /// Kinetic energy given to the particle (nonzero for moving walls).
    pub work: f64,
    /// The boundary's own trajectory changed; every prediction against it is stale.
    pub state_changed: bool,
}

/// A particle-vs-boundary collision law.
pub trait Boundary: fmt::Debug + Send {
    /// Time from now until `p` touches the boundary, if ever.
    fn collision_time(&self, p: &Particle) -> Option<f64>;

    /// Apply the collision to `p` in place.
    fn resolve_collision(&mut self, p: &mut Particle) -> Result<BoundaryResponse>;

    /// Move the boundary ballistically by `dt`.
    fn advance(&mut self, _dt: f64) {}

    /// Change the boundary's velocity. Fixed boundaries refuse.
    fn set_velocity(&mut self, _velocity: f64) -> Result<()> {
        Err(Error::InvalidParam("boundary cannot move".into()))
    }

    /// Cumulative momentum delivered to particles.
    fn impulse_total(&self) -> f64 {
        0.0
    }

    /// Cumulative work done on particles.
    fn work_total(&self) -> f64 {
        0.0
    }
}

/// Which face of an axis a wall closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Min,
    Max,
}

/// Infinitely massive plane normal to `axis`, optionally moving at constant speed.
///
/// The min-side wall keeps particles at `x >= position + radius`, the max-side wall at
/// `x <= position - radius`.
#[derive(Debug, Clone, PartialEq)]
pub struct Wall {
    axis: usize,
    side: Side,
    position: f64,
    velocity: f64,
    impulse_total: f64,
    work_total: f64,
}

impl Wall {
    /// Fixed wall closing `side` of `axis` at `position`.
    pub fn new(axis: usize, side: Side, position: f64) -> Result<Self> {
        Self::piston(axis, side, position, 0.0)
    }

    /// A wall moving along its axis at `velocity`.
    pub fn piston(axis: usize, side: Side, position: f64, velocity: f64) -> Result<Self> {
        if axis >= DIM {
            return Err(Error::InvalidParam(format!(
                "wall axis must be < {DIM}, got {axis}"
            )));
        }
        if !position.is_finite() || !velocity.is_finite() {
            return Err(Error::InvalidParam(
                "wall position and velocity must be finite".into(),
            ));
        }
        Ok(Self {
            axis,
            side,
            position,
            velocity,
            impulse_total: 0.0,
            work_total: 0.0,
        })
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Current coordinate of the wall plane along its axis.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Velocity of the wall plane; zero for a fixed wall.
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    #[inline]
    fn contact_plane(&self, radius: f64) -> f64 {
        match self.side {
            Side::Min => self.position + radius,
            Side::Max => self.position - radius,
        }
    }
}

impl Boundary for Wall {
    fn collision_time(&self, p: &Particle) -> Option<f64> {
        let k = self.axis;
        let closing = p.v[k] - self.velocity;
        let approaching = match self.side {
            Side::Min => closing < 0.0,
            Side::Max => closing > 0.0,
        };
        if !approaching {
            return None;
        }
        let t = (self.contact_plane(p.radius) - p.r[k]) / closing;
        t.is_finite().then_some(t.max(0.0))
    }

    fn resolve_collision(&mut self, p: &mut Particle) -> Result<BoundaryResponse> {
        let k = self.axis;
        let v_old = p.v[k];
        // Specular reflection in the wall frame
        let v_new = 2.0 * self.velocity - v_old;
        p.v[k] = v_new;
        p.r[k] = self.contact_plane(p.radius);

        let impulse = p.mass * (v_new - v_old);
        let work = 0.5 * p.mass * (v_new * v_new - v_old * v_old);
        self.impulse_total += impulse;
        self.work_total += work;
        Ok(BoundaryResponse {
            impulse,
            work,
            state_changed: false,
        })
    }

    fn impulse_total(&self) -> f64 {
        self.impulse_total
    }

    fn work_total(&self) -> f64 {
        self.work_total
    }

    fn advance(&mut self, dt: f64) {
        self.position += self.velocity * dt;
    }

    fn set_velocity(&mut self, velocity: f64) -> Result<()> {
        if !velocity.is_finite() {
            return Err(Error::InvalidParam("wall velocity must be finite".into()));
        }
        self.velocity = velocity;
        Ok(())
    }
}
