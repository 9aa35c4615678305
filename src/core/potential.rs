//! Pair collision laws.
//!
//! A law only sees the relative kinematics of a pair and answers two questions: when is
//! the next event, and what impulse does it exchange. The engine owns the particles and
//! applies the impulse, so momentum is conserved by construction.

use std::collections::HashMap;
use std::fmt;

use crate::core::vector::{dot, norm_sq, scale, Vec3};
use crate::error::{Error, Result};

/// Discriminants below this fraction of `b^2` count as a grazing miss.
const DEGENERATE_REL: f64 = 1e-12;

/// Relative width of the band around the well edge inside which the direction of
/// motion decides whether the pair is captured.
const WELL_EDGE_REL: f64 = 1e-10;

/// Index of a registered pair law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PotentialId(pub usize);

/// Kinematics of particle `b` relative to particle `a`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairState {
    /// `r_b - r_a` (minimum image on periodic axes).
    pub dr: Vec3,
    /// `v_b - v_a`.
    pub dv: Vec3,
    pub inv_mass_a: f64,
    pub inv_mass_b: f64,
}

impl PairState {
    /// Squared separation.
    #[inline]
    pub fn r2(&self) -> f64 {
        norm_sq(&self.dr)
    }

    /// Squared relative speed.
    #[inline]
    pub fn v2(&self) -> f64 {
        norm_sq(&self.dv)
    }

    /// `dr . dv`; negative while approaching.
    #[inline]
    pub fn bij(&self) -> f64 {
        dot(&self.dr, &self.dv)
    }

    #[inline]
    pub fn reduced_mass(&self) -> f64 {
        1.0 / (self.inv_mass_a + self.inv_mass_b)
    }
}

/// Momentum exchanged by a pair event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Impulse {
    /// Momentum change of `b`; `a` receives the opposite.
    pub on_b: Vec3,
    /// `dr . on_b`, positive for repulsive bounces.
    pub virial: f64,
    /// Change of potential energy (negative on capture into a well).
    pub delta_u: f64,
}

impl Impulse {
    fn along(pair: &PairState, magnitude_over_r2: f64, delta_u: f64) -> Self {
        let on_b = scale(&pair.dr, magnitude_over_r2);
        Self {
            on_b,
            virial: dot(&pair.dr, &on_b),
            delta_u,
        }
    }
}

/// A hard pair law: knows its own next-event time and collision response.
pub trait Potential: fmt::Debug + Send + Sync {
    /// Largest separation at which the law can produce an event.
    fn range(&self) -> f64;

    /// Time from now until the next event for this pair, or `None` if ballistic motion
    /// never triggers one.
    fn collision_time(&self, pair: &PairState) -> Option<f64>;

    /// Impulse exchanged when the predicted event fires.
    fn resolve_collision(&self, pair: &PairState) -> Result<Impulse>;

    /// Potential energy of the pair at its current separation.
    fn energy(&self, _pair: &PairState) -> f64 {
        0.0
    }
}

fn elastic_bounce(pair: &PairState) -> Result<Impulse> {
    let r2 = pair.r2();
    if r2 <= f64::MIN_POSITIVE {
        return Err(Error::MathError(
            "degenerate contact normal in pair collision".into(),
        ));
    }
    let mu = pair.reduced_mass();
    Ok(Impulse::along(pair, -2.0 * mu * pair.bij() / r2, 0.0))
}

/// Smaller positive root of `v2 t^2 + 2 bij t + (r2 - d2) = 0` for an approaching pair
/// that starts outside the sphere of diameter `sqrt(d2)`.
fn entry_time(bij: f64, v2: f64, r2: f64, d2: f64) -> Option<f64> {
    if bij >= 0.0 || v2 <= 0.0 {
        return None;
    }
    let gap = r2 - d2;
    if gap <= 0.0 {
        return Some(0.0);
    }
    let disc = bij * bij - v2 * gap;
    if disc <= DEGENERATE_REL * bij * bij {
        return None;
    }
    // Written to avoid cancellation in -bij - sqrt(disc)
    Some(gap / (-bij + disc.sqrt()))
}

/// Larger root: when a pair inside the sphere of diameter `sqrt(d2)` reaches its surface.
fn exit_time(bij: f64, v2: f64, r2: f64, d2: f64) -> Option<f64> {
    if v2 <= 0.0 {
        return None;
    }
    let disc = (bij * bij - v2 * (r2 - d2)).max(0.0);
    let t = (-bij + disc.sqrt()) / v2;
    t.is_finite().then_some(t.max(0.0))
}

/// Elastic hard spheres with contact distance `sigma`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardSphere {
    sigma: f64,
}

impl HardSphere {
    /// Hard spheres touching at center distance `sigma`.
    pub fn new(sigma: f64) -> Result<Self> {
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(Error::InvalidParam("sigma must be finite and > 0".into()));
        }
        Ok(Self { sigma })
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl Potential for HardSphere {
    fn range(&self) -> f64 {
        self.sigma
    }

    fn collision_time(&self, pair: &PairState) -> Option<f64> {
        entry_time(pair.bij(), pair.v2(), pair.r2(), self.sigma * self.sigma)
    }

    fn resolve_collision(&self, pair: &PairState) -> Result<Impulse> {
        elastic_bounce(pair)
    }
}

/// Hard core of diameter `core` inside an attractive well of diameter `lambda * core`
/// and depth `epsilon`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareWell {
    core: f64,
    well: f64,
    epsilon: f64,
}

impl SquareWell {
    /// Well of depth `epsilon` reaching out to `lambda * core`; `lambda` must exceed 1.
    pub fn new(core: f64, lambda: f64, epsilon: f64) -> Result<Self> {
        if !core.is_finite() || core <= 0.0 {
            return Err(Error::InvalidParam("core must be finite and > 0".into()));
        }
        if !lambda.is_finite() || lambda <= 1.0 {
            return Err(Error::InvalidParam("lambda must be finite and > 1".into()));
        }
        if !epsilon.is_finite() || epsilon < 0.0 {
            return Err(Error::InvalidParam(
                "epsilon must be finite and >= 0".into(),
            ));
        }
        Ok(Self {
            core,
            well: core * lambda,
            epsilon,
        })
    }

    pub fn well_diameter(&self) -> f64 {
        self.well
    }

    fn inside_well(&self, r2: f64, bij: f64) -> bool {
        let w2 = self.well * self.well;
        r2 < w2 * (1.0 - WELL_EDGE_REL) || (r2 < w2 * (1.0 + WELL_EDGE_REL) && bij < 0.0)
    }
}

impl Potential for SquareWell {
    fn range(&self) -> f64 {
        self.well
    }

    fn collision_time(&self, pair: &PairState) -> Option<f64> {
        let (r2, bij, v2) = (pair.r2(), pair.bij(), pair.v2());
        let core2 = self.core * self.core;
        let well2 = self.well * self.well;
        if !self.inside_well(r2, bij) {
            return entry_time(bij, v2, r2, well2);
        }
        entry_time(bij, v2, r2, core2).or_else(|| exit_time(bij, v2, r2, well2))
    }

    fn resolve_collision(&self, pair: &PairState) -> Result<Impulse> {
        let (r2, bij) = (pair.r2(), pair.bij());
        if r2 <= f64::MIN_POSITIVE {
            return Err(Error::MathError(
                "degenerate contact normal in square-well collision".into(),
            ));
        }
        let core2 = self.core * self.core;
        let well2 = self.well * self.well;
        if 2.0 * r2 < core2 + well2 {
            return elastic_bounce(pair);
        }

        let mu = pair.reduced_mass();
        let barrier = 2.0 * r2 * self.epsilon / mu;
        if bij > 0.0 {
            if bij * bij < barrier {
                // Not enough kinetic energy along the normal to climb out
                return elastic_bounce(pair);
            }
            let raw = mu * (bij - (bij * bij - barrier).sqrt());
            Ok(Impulse::along(pair, -raw / r2, self.epsilon))
        } else {
            let raw = mu * (bij + (bij * bij + barrier).sqrt());
            Ok(Impulse::along(pair, -raw / r2, -self.epsilon))
        }
    }

    fn energy(&self, pair: &PairState) -> f64 {
        if self.inside_well(pair.r2(), pair.bij()) {
            -self.epsilon
        } else {
            0.0
        }
    }
}

/// Registry of pair laws keyed by unordered species pair.
#[derive(Debug, Default)]
pub struct PotentialMap {
    laws: Vec<Box<dyn Potential>>,
    table: HashMap<(u32, u32), PotentialId>,
}

impl PotentialMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map with a single law acting between species-0 particles.
    pub fn uniform(law: impl Potential + 'static) -> Self {
        let mut map = Self::new();
        let id = map.add(law);
        map.table.insert((0, 0), id);
        map
    }

    /// Register `law` without routing any species pair to it.
    pub fn add(&mut self, law: impl Potential + 'static) -> PotentialId {
        self.laws.push(Box::new(law));
        PotentialId(self.laws.len() - 1)
    }

    /// Route pairs of species `a` and `b` (either order) to `id`.
    pub fn assign(&mut self, a: u32, b: u32, id: PotentialId) -> Result<()> {
        if id.0 >= self.laws.len() {
            return Err(Error::InvalidParam(format!(
                "unknown potential id {}",
                id.0
            )));
        }
        self.table.insert(Self::key(a, b), id);
        Ok(())
    }

    /// Register `law` and route species pair `(a, b)` to it.
    pub fn with_pair(mut self, a: u32, b: u32, law: impl Potential + 'static) -> Result<Self> {
        let id = self.add(law);
        self.assign(a, b, id)?;
        Ok(self)
    }

    /// Law acting between species `a` and `b`, if any.
    #[inline]
    pub fn lookup(&self, a: u32, b: u32) -> Option<PotentialId> {
        self.table.get(&Self::key(a, b)).copied()
    }

    /// Law registered under `id`.
    pub fn get(&self, id: PotentialId) -> Result<&dyn Potential> {
        self.laws
            .get(id.0)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::InvalidParam(format!("unknown potential id {}", id.0)))
    }

    /// Largest range among the laws that are actually assigned to a species pair.
    pub fn max_range(&self) -> Option<f64> {
        self.table
            .values()
            .map(|id| self.laws[id.0].range())
            .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |a| a.max(r))))
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[inline]
    fn key(a: u32, b: u32) -> (u32, u32) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
