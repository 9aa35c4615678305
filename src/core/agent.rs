//! Per-particle collision bookkeeping kept beside the particle table.
//!
//! Records are indexed by dense particle id. Besides each particle's own prediction the
//! store keeps a reverse index from every particle and boundary to the particles whose
//! current prediction names it as partner, so invalidation after a collision touches
//! only the affected records.

use crate::core::event::{EventHandle, Partner};
use crate::core::potential::PotentialId;
use crate::error::{Error, Result};

/// Cached earliest event of one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentRecord {
    /// Absolute time of the particle's earliest predicted event, `INFINITY` if none.
    pub collision_time: f64,
    pub partner: Option<Partner>,
    /// Pair law for a particle partner.
    pub potential: Option<PotentialId>,
    /// Live queue entry, present iff `collision_time` is finite.
    pub handle: Option<EventHandle>,
}

impl Default for AgentRecord {
    fn default() -> Self {
        Self {
            collision_time: f64::INFINITY,
            partner: None,
            potential: None,
            handle: None,
        }
    }
}

impl AgentRecord {
    /// Whether the record carries a finite prediction.
    #[inline]
    pub fn is_scheduled(&self) -> bool {
        self.collision_time.is_finite()
    }
}

/// Per-particle side table of cached predictions.
///
/// Alongside each record it keeps, for every particle and boundary, the list of particles
/// whose cached partner it is, so invalidation after a collision touches only those.
#[derive(Debug, Clone, Default)]
pub struct AgentStore {
    records: Vec<AgentRecord>,
    particle_watchers: Vec<Vec<u32>>,
    boundary_watchers: Vec<Vec<u32>>,
}

impl AgentStore {
    /// Empty records for `num_particles` particles and `num_boundaries` boundaries.
    pub fn new(num_particles: usize, num_boundaries: usize) -> Self {
        let mut store = Self::default();
        store.reset(num_particles, num_boundaries);
        store
    }

    /// Release every record and start over with blank ones.
    pub fn reset(&mut self, num_particles: usize, num_boundaries: usize) {
        self.records.clear();
        self.records.resize(num_particles, AgentRecord::default());
        self.particle_watchers.clear();
        self.particle_watchers.resize(num_particles, Vec::new());
        self.boundary_watchers.clear();
        self.boundary_watchers.resize(num_boundaries, Vec::new());
    }

    /// Make room for a newly installed boundary.
    pub fn add_boundary(&mut self) {
        self.boundary_watchers.push(Vec::new());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record of particle `id`.
    pub fn get(&self, id: u32) -> Result<&AgentRecord> {
        self.records
            .get(id as usize)
            .ok_or(Error::UnknownParticle(id))
    }

    /// Records paired with their particle ids.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &AgentRecord)> {
        self.records.iter().enumerate().map(|(i, r)| (i as u32, r))
    }

    /// Replace particle `id`'s record, keeping the reverse index in step.
    /// Returns the previous record.
    pub fn set(&mut self, id: u32, record: AgentRecord) -> Result<AgentRecord> {
        let old = *self.get(id)?;
        if old.partner != record.partner {
            if let Some(p) = record.partner {
                self.check_partner(p)?;
            }
            if let Some(p) = old.partner {
                self.unwatch(p, id);
            }
            if let Some(p) = record.partner {
                if let Some(list) = self.watchers_mut(p) {
                    list.push(id);
                }
            }
        }
        self.records[id as usize] = record;
        Ok(old)
    }

    /// Reset particle `id` to "nothing predicted".
    pub fn clear(&mut self, id: u32) -> Result<AgentRecord> {
        self.set(id, AgentRecord::default())
    }

    /// Particles whose cached prediction names `partner`.
    pub fn dependents_of(&self, partner: Partner) -> &[u32] {
        let list = match partner {
            Partner::Particle(j) => self.particle_watchers.get(j as usize),
            Partner::Boundary(b) => self.boundary_watchers.get(b as usize),
            Partner::Transit => None,
        };
        list.map(Vec::as_slice).unwrap_or(&[])
    }

    fn check_partner(&self, partner: Partner) -> Result<()> {
        match partner {
            Partner::Particle(j) if j as usize >= self.particle_watchers.len() => {
                Err(Error::UnknownParticle(j))
            }
            Partner::Boundary(b) if b as usize >= self.boundary_watchers.len() => {
                Err(Error::InvalidParam(format!("unknown boundary id {b}")))
            }
            _ => Ok(()),
        }
    }

    fn watchers_mut(&mut self, partner: Partner) -> Option<&mut Vec<u32>> {
        match partner {
            Partner::Particle(j) => self.particle_watchers.get_mut(j as usize),
            Partner::Boundary(b) => self.boundary_watchers.get_mut(b as usize),
            Partner::Transit => None,
        }
    }

    fn unwatch(&mut self, partner: Partner, id: u32) {
        if let Some(list) = self.watchers_mut(partner) {
            if let Some(pos) = list.iter().position(|&w| w == id) {
                list.swap_remove(pos);
            }
        }
    }
}
