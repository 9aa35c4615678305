//! Seeded initial configurations.

use log::debug;
use rand::{rng, rngs::StdRng, Rng, SeedableRng};

use crate::core::geometry::{AxisKind, SimBox};
use crate::core::particle::{Particle, DIM};
use crate::core::vector::{norm_sq, sub};
use crate::error::{Error, Result};

const MAX_ATTEMPTS: usize = 1_000_000;

/// Parameters for [`random_gas`].
#[derive(Debug, Clone, PartialEq)]
pub struct GasSpec {
    pub num_particles: usize,
    pub radius: f64,
    pub mass: f64,
    /// Velocity components are drawn uniformly from `[-max_speed, max_speed]`.
    pub max_speed: f64,
    /// `None` draws a fresh seed.
    pub seed: Option<u64>,
}

impl Default for GasSpec {
    fn default() -> Self {
        Self {
            num_particles: 0,
            radius: 0.5,
            mass: 1.0,
            max_speed: 1.0,
            seed: None,
        }
    }
}

/// Place `spec.num_particles` identical spheres in `sim_box` without overlap.
///
/// Positions are rejection sampled; on periodic axes the overlap test uses the minimum
/// image and the whole axis is available, elsewhere centers stay `radius` away from the
/// faces.
pub fn random_gas(spec: &GasSpec, sim_box: &SimBox) -> Result<Vec<Particle>> {
    if spec.num_particles == 0 {
        return Err(Error::InvalidParam("num_particles must be > 0".into()));
    }
    if !spec.radius.is_finite() || spec.radius <= 0.0 {
        return Err(Error::InvalidParam("radius must be finite and > 0".into()));
    }
    if !spec.max_speed.is_finite() || spec.max_speed < 0.0 {
        return Err(Error::InvalidParam(
            "max_speed must be finite and >= 0".into(),
        ));
    }
    let lengths = sim_box.lengths();
    for k in 0..DIM {
        if sim_box.kind(k) != AxisKind::Periodic && lengths[k] < 2.0 * spec.radius {
            return Err(Error::InvalidParam(
                "box must be at least 2 * radius along every bounded axis".into(),
            ));
        }
    }

    let mut rng: StdRng = match spec.seed {
        Some(s) => SeedableRng::seed_from_u64(s),
        None => SeedableRng::seed_from_u64(rng().random()),
    };

    let min_sq = (2.0 * spec.radius) * (2.0 * spec.radius);
    let mut particles: Vec<Particle> = Vec::with_capacity(spec.num_particles);
    for id in 0..spec.num_particles as u32 {
        let mut attempts = 0usize;
        let r = loop {
            if attempts >= MAX_ATTEMPTS {
                return Err(Error::InvalidParam(format!(
                    "failed to place particle {id} without overlap; try fewer particles or a smaller radius"
                )));
            }
            attempts += 1;
            let mut r = [0.0_f64; DIM];
            for (k, r_k) in r.iter_mut().enumerate() {
                *r_k = match sim_box.kind(k) {
                    AxisKind::Periodic => rng.random_range(0.0..lengths[k]),
                    AxisKind::Reflective | AxisKind::Open => {
                        rng.random_range(spec.radius..=lengths[k] - spec.radius)
                    }
                };
            }
            let clear = particles
                .iter()
                .all(|p| norm_sq(&sim_box.minimum_image(sub(&r, &p.r))) >= min_sq);
            if clear {
                break r;
            }
        };

        let mut v = [0.0_f64; DIM];
        if spec.max_speed > 0.0 {
            v.iter_mut()
                .for_each(|x| *x = rng.random_range(-spec.max_speed..=spec.max_speed));
        }
        particles.push(Particle::new(id, r, v, spec.radius, spec.mass)?);
    }
    debug!("placed {} particles", particles.len());
    Ok(particles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(n: usize, seed: u64) -> GasSpec {
        GasSpec {
            num_particles: n,
            radius: 0.3,
            seed: Some(seed),
            ..GasSpec::default()
        }
    }

    #[test]
    fn placement_is_non_overlapping_and_seeded() -> Result<()> {
        let b = SimBox::periodic([6.0, 6.0, 6.0])?;
        let a = random_gas(&spec(40, 7), &b)?;
        let again = random_gas(&spec(40, 7), &b)?;
        assert_eq!(a, again);
        for (i, p) in a.iter().enumerate() {
            assert_eq!(p.id as usize, i);
            for q in &a[i + 1..] {
                let d = b.minimum_image(sub(&p.r, &q.r));
                assert!(norm_sq(&d) >= 0.36);
            }
        }
        Ok(())
    }

    #[test]
    fn walled_placement_keeps_clear_of_faces() -> Result<()> {
        let b = SimBox::walled([3.0, 3.0, 3.0])?;
        for p in random_gas(&spec(10, 1), &b)? {
            assert!(p.r.iter().all(|&x| (0.3..=2.7).contains(&x)));
        }
        Ok(())
    }

    #[test]
    fn overfull_box_fails() -> Result<()> {
        let b = SimBox::walled([1.0, 1.0, 1.0])?;
        assert!(random_gas(&spec(20, 3), &b).is_err());
        assert!(random_gas(&spec(0, 3), &b).is_err());
        Ok(())
    }
}
