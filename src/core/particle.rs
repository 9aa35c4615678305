use crate::error::{Error, Result};

/// Fixed spatial dimension (3D).
pub const DIM: usize = 3;

/// A hard particle moving ballistically between events.
///
/// Fields:
/// - `id`: stable dense index into the particle table
/// - `r`: position vector [x, y, z]
/// - `v`: velocity vector [vx, vy, vz]
/// - `radius`: contact radius against walls (> 0)
/// - `mass`: particle mass (> 0)
/// - `species`: interaction type, selects the pair potential
/// - `collision_count`: number of resolved collisions this particle took part in
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    /// Stable particle identifier.
    pub id: u32,
    /// Position (x, y, z).
    pub r: [f64; DIM],
    /// Velocity (vx, vy, vz).
    pub v: [f64; DIM],
    /// Hard radius used for wall contact (> 0).
    pub radius: f64,
    /// Mass (> 0).
    pub mass: f64,
    /// Interaction type.
    pub species: u32,
    /// Collision participation counter.
    pub collision_count: u64,
}

impl Particle {
    /// Create a new particle of species 0 after validating invariants.
    ///
    /// Errors:
    /// - `Error::InvalidParam` if `radius` or `mass` is non-positive or any component is NaN/inf.
    pub fn new(id: u32, r: [f64; DIM], v: [f64; DIM], radius: f64, mass: f64) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(Error::InvalidParam("radius must be finite and > 0".into()));
        }
        if !mass.is_finite() || mass <= 0.0 {
            return Err(Error::InvalidParam("mass must be finite and > 0".into()));
        }
        if !r.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("position must be finite".into()));
        }
        if !v.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("velocity must be finite".into()));
        }
        Ok(Self {
            id,
            r,
            v,
            radius,
            mass,
            species: 0,
            collision_count: 0,
        })
    }

    /// Builder-style species assignment.
    pub fn with_species(mut self, species: u32) -> Self {
        self.species = species;
        self
    }

    #[inline]
    pub fn inv_mass(&self) -> f64 {
        1.0 / self.mass
    }

    #[inline]
    pub fn bump_collision_count(&mut self) {
        self.collision_count = self.collision_count.saturating_add(1);
    }

    /// Returns the particle's kinetic energy: 1/2 m |v|^2.
    #[inline]
    pub fn kinetic_energy(&self) -> f64 {
        let vsq: f64 = self.v.iter().map(|&c| c * c).sum();
        0.5 * self.mass * vsq
    }

    /// Linear momentum m v.
    #[inline]
    pub fn momentum(&self) -> [f64; DIM] {
        self.v.map(|c| self.mass * c)
    }

    /// Ballistic drift over `dt`.
    #[inline]
    pub(crate) fn drift(&mut self, dt: f64) {
        for (rk, vk) in self.r.iter_mut().zip(self.v.iter()) {
            *rk += vk * dt;
        }
    }

    /// Set velocity (validated as finite).
    pub fn set_velocity(&mut self, v: [f64; DIM]) -> Result<()> {
        if !v.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("velocity must be finite".into()));
        }
        self.v = v;
        Ok(())
    }
}
