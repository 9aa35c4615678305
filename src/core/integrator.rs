use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::config::IntegratorConfig;
use crate::core::agent::{AgentRecord, AgentStore};
use crate::core::boundary::{Boundary, Side, Wall};
use crate::core::cell::CellIndex;
use crate::core::event::{CollisionEvent, EventQueue, Partner};
use crate::core::geometry::{AxisKind, SimBox};
use crate::core::observer::{CollisionRecord, Observer, VelocityAccess};
use crate::core::particle::{Particle, DIM};
use crate::core::potential::PotentialMap;
use crate::core::predictor::{CollisionPredictor, Prediction};
use crate::core::vector::Vec3;
use crate::error::{Error, Result};

/// Lifecycle of the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorState {
    /// Tables built, nothing predicted yet.
    Idle,
    /// Computing the initial predictions.
    Predicting,
    /// Processing events.
    Running,
    /// Halted by `stop()` or a stop request; `resume()` continues.
    Stopped,
}

/// Result of [`Integrator::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// A collision was resolved.
    Collision(CollisionRecord),
    /// `subject` moved to a new cell; no velocities changed.
    Transit { subject: u32, time: f64 },
    /// No finite event remains.
    Exhausted,
    /// The integrator is stopped.
    Stopped,
}

/// How far [`Integrator::run_until`] should go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunLimit {
    /// Process every event up to this absolute time, then drift to it.
    Time(f64),
    /// Resolve this many collisions.
    Collisions(u64),
    /// Process this many events, cell transits included.
    Events(u64),
}

/// What a call to [`Integrator::run_until`] did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunSummary {
    pub collisions: u64,
    pub transits: u64,
    pub end_time: f64,
    pub exhausted: bool,
    pub stopped: bool,
}

/// Shared flag to request a stop between events.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the integrator to stop before its next event.
    pub fn request_stop(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(false, AtomicOrdering::Relaxed);
    }
}

enum Processed {
    Collision(CollisionRecord),
    Transit(u32),
    Beyond,
    Exhausted,
}

/// Event-driven integrator for hard particles.
///
/// Owns the particles, the cell index, the agent table and the event queue, and keeps
/// the three bookkeeping structures mutually consistent between events:
/// - every particle with a finite prediction has exactly one queue entry carrying the
///   same time and partner as its agent record;
/// - every particle's recorded cell matches its position.
pub struct Integrator {
    config: IntegratorConfig,
    state: IntegratorState,
    clock: f64,
    sim_box: SimBox,
    particles: Vec<Particle>,
    potentials: PotentialMap,
    boundaries: Vec<Box<dyn Boundary>>,
    walls: Vec<(usize, Side, u32)>,
    observers: Vec<Box<dyn Observer>>,
    cells: CellIndex,
    agents: AgentStore,
    queue: EventQueue,
    stop: StopHandle,
    collisions: u64,
    transits: u64,
    last_event_time: f64,
}

impl fmt::Debug for Integrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integrator")
            .field("state", &self.state)
            .field("clock", &self.clock)
            .field("particles", &self.particles.len())
            .field("boundaries", &self.boundaries.len())
            .field("observers", &self.observers.len())
            .field("grid", &self.cells.dims())
            .field("queued", &self.queue.len())
            .field("collisions", &self.collisions)
            .finish()
    }
}

impl Integrator {
    /// Build an integrator with the default configuration.
    pub fn initialize(
        particles: Vec<Particle>,
        sim_box: SimBox,
        potentials: PotentialMap,
    ) -> Result<Self> {
        Self::with_config(particles, sim_box, potentials, IntegratorConfig::default())
    }

    /// Build an integrator. Particle `i` must carry id `i`. Reflective axes get two
    /// walls each, installed in axis order (min side first).
    pub fn with_config(
        mut particles: Vec<Particle>,
        sim_box: SimBox,
        potentials: PotentialMap,
        config: IntegratorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let range = potentials.max_range().ok_or_else(|| {
            Error::InvalidParam("at least one species pair needs a potential".into())
        })?;
        for k in 0..DIM {
            if sim_box.kind(k) == AxisKind::Periodic && sim_box.lengths()[k] < 2.0 * range {
                return Err(Error::InvalidParam(format!(
                    "periodic axis {k} must be at least twice the interaction range ({range})"
                )));
            }
        }
        for (i, p) in particles.iter_mut().enumerate() {
            if p.id as usize != i {
                return Err(Error::InvalidParam(format!(
                    "particle at index {i} has id {}; ids must be dense and ordered",
                    p.id
                )));
            }
            sim_box.wrap(&mut p.r);
        }

        let mut boundaries: Vec<Box<dyn Boundary>> = Vec::new();
        let mut walls = Vec::new();
        for k in 0..DIM {
            if sim_box.kind(k) != AxisKind::Reflective {
                continue;
            }
            for (side, at) in [(Side::Min, 0.0), (Side::Max, sim_box.lengths()[k])] {
                walls.push((k, side, boundaries.len() as u32));
                boundaries.push(Box::new(Wall::new(k, side, at)?));
            }
        }

        let mut cells = CellIndex::new(&sim_box, range, config.transit_margin)?;
        cells.rebuild(&particles, 0.0)?;
        let n = particles.len();
        debug!(
            "initialized {} particles, range {}, grid {:?}, {} walls",
            n,
            range,
            cells.dims(),
            boundaries.len()
        );

        Ok(Self {
            config,
            state: IntegratorState::Idle,
            clock: 0.0,
            sim_box,
            particles,
            potentials,
            agents: AgentStore::new(n, boundaries.len()),
            boundaries,
            walls,
            observers: Vec::new(),
            cells,
            queue: EventQueue::with_capacity(n),
            stop: StopHandle::default(),
            collisions: 0,
            transits: 0,
            last_event_time: 0.0,
        })
    }

    // ============ Accessors ============

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.clock
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> IntegratorState {
        self.state
    }

    /// Tolerances the integrator was built with.
    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    /// All particles, indexed by id.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Particle `id`, or `UnknownParticle`.
    pub fn particle(&self, id: u32) -> Result<&Particle> {
        self.particles
            .get(id as usize)
            .ok_or(Error::UnknownParticle(id))
    }

    /// Returns the number of particles.
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    /// Returns the simulation box.
    pub fn sim_box(&self) -> &SimBox {
        &self.sim_box
    }

    /// Cell membership table.
    pub fn cells(&self) -> &CellIndex {
        &self.cells
    }

    /// Cached per-particle predictions.
    pub fn agents(&self) -> &AgentStore {
        &self.agents
    }

    /// Pending events, one per scheduled particle.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Boundary `id`, automatic walls included.
    pub fn boundary(&self, id: u32) -> Option<&dyn Boundary> {
        self.boundaries.get(id as usize).map(|b| b.as_ref())
    }

    /// Boundary id of the automatic wall on `axis`/`side`, if that axis is reflective.
    pub fn wall_id(&self, axis: usize, side: Side) -> Option<u32> {
        self.walls
            .iter()
            .find(|(k, s, _)| *k == axis && *s == side)
            .map(|(_, _, id)| *id)
    }

    /// Number of resolved collisions (pair and boundary).
    pub fn collision_count(&self) -> u64 {
        self.collisions
    }

    /// Number of cell transits processed.
    pub fn transit_count(&self) -> u64 {
        self.transits
    }

    /// Time of the most recently processed event.
    pub fn last_event_time(&self) -> f64 {
        self.last_event_time
    }

    /// Positions as a Vec of fixed-size arrays.
    pub fn positions(&self) -> Vec<Vec3> {
        self.particles.iter().map(|p| p.r).collect()
    }

    /// Velocities as a Vec of fixed-size arrays.
    pub fn velocities(&self) -> Vec<Vec3> {
        self.particles.iter().map(|p| p.v).collect()
    }

    /// Predictor over the current state.
    pub fn predictor(&self) -> CollisionPredictor<'_> {
        CollisionPredictor {
            particles: &self.particles,
            sim_box: &self.sim_box,
            cells: &self.cells,
            potentials: &self.potentials,
            boundaries: &self.boundaries,
            clock: self.clock,
            transit_margin: self.config.transit_margin,
        }
    }

    // ============ Diagnostics ============

    /// Total kinetic energy.
    pub fn kinetic_energy(&self) -> f64 {
        self.particles.iter().map(|p| p.kinetic_energy()).sum()
    }

    /// Sum of pair potential energies over cell neighborhoods.
    pub fn potential_energy(&self) -> Result<f64> {
        let predictor = self.predictor();
        let mut total = 0.0;
        for p in &self.particles {
            let home = self.cells.cell_of(p.id)?;
            for cell in self.cells.neighborhood(home) {
                for &j in self.cells.particles_in(cell) {
                    if j <= p.id {
                        continue;
                    }
                    let q = &self.particles[j as usize];
                    if let Some(id) = self.potentials.lookup(p.species, q.species) {
                        let pair = predictor.pair_state(p.id, j)?;
                        total += self.potentials.get(id)?.energy(&pair);
                    }
                }
            }
        }
        Ok(total)
    }

    /// Kinetic plus pair potential energy.
    pub fn total_energy(&self) -> Result<f64> {
        Ok(self.kinetic_energy() + self.potential_energy()?)
    }

    /// Cumulative work done on the particles by every boundary.
    pub fn work_done(&self) -> f64 {
        self.boundaries.iter().map(|b| b.work_total()).sum()
    }

    /// Fresh earliest-event prediction for `id`, ignoring the cached one.
    pub fn predict(&self, id: u32) -> Result<Option<Prediction>> {
        self.predictor().earliest(id)
    }

    /// Sum of `m v` over all particles.
    pub fn total_momentum(&self) -> Vec3 {
        let mut total = [0.0_f64; DIM];
        for p in &self.particles {
            for (t, m) in total.iter_mut().zip(p.momentum()) {
                *t += m;
            }
        }
        total
    }

    /// Cross-check agent table, event queue and cell index.
    pub fn verify_consistency(&self) -> Result<()> {
        let mut scheduled = 0usize;
        for (id, record) in self.agents.iter() {
            let entry = self.queue.get(id);
            match (record.is_scheduled(), entry) {
                (true, Some(ev)) => {
                    scheduled += 1;
                    if ev.time_f64() != record.collision_time
                        || Some(ev.partner) != record.partner
                        || record.handle.map(|h| h.subject()) != Some(id)
                    {
                        return Err(Error::QueueDesync {
                            particle: id,
                            detail: format!(
                                "agent ({}, {:?}) vs queue ({}, {:?})",
                                record.collision_time,
                                record.partner,
                                ev.time_f64(),
                                ev.partner
                            ),
                        });
                    }
                }
                (false, None) => {}
                (true, None) => {
                    return Err(Error::QueueDesync {
                        particle: id,
                        detail: "scheduled agent has no queue entry".into(),
                    })
                }
                (false, Some(_)) => {
                    return Err(Error::QueueDesync {
                        particle: id,
                        detail: "queue entry for an unscheduled agent".into(),
                    })
                }
            }
        }
        if scheduled != self.queue.len() {
            return Err(Error::QueueDesync {
                particle: u32::MAX,
                detail: format!(
                    "{} scheduled agents but {} queue entries",
                    scheduled,
                    self.queue.len()
                ),
            });
        }
        self.cells.verify(&self.particles)
    }

    // ============ Setup mutators ============

    /// Install an extra boundary (e.g. a piston); returns its id.
    pub fn add_boundary(&mut self, boundary: Box<dyn Boundary>) -> Result<u32> {
        self.boundaries.push(boundary);
        self.agents.add_boundary();
        if self.is_started() {
            self.repredict_all()?;
        }
        Ok(self.boundaries.len() as u32 - 1)
    }

    /// Change a boundary's velocity; every prediction is recomputed.
    pub fn set_boundary_velocity(&mut self, id: u32, velocity: f64) -> Result<()> {
        self.boundaries
            .get_mut(id as usize)
            .ok_or_else(|| Error::InvalidParam(format!("unknown boundary id {id}")))?
            .set_velocity(velocity)?;
        if self.is_started() {
            self.repredict_all()?;
        }
        Ok(())
    }

    /// Register an observer; observers run in registration order.
    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Add a particle; its id must equal the current particle count.
    /// Rebuilds every table.
    pub fn add_particle(&mut self, mut particle: Particle) -> Result<()> {
        if particle.id as usize != self.particles.len() {
            return Err(Error::InvalidParam(format!(
                "new particle must have id {}, got {}",
                self.particles.len(),
                particle.id
            )));
        }
        self.sim_box.wrap(&mut particle.r);
        self.particles.push(particle);
        if let Err(e) = self.rebuild_predictions() {
            self.particles.pop();
            self.rebuild_predictions()?;
            return Err(e);
        }
        Ok(())
    }

    /// Remove particle `id`. The last particle takes over its id. Rebuilds every table.
    pub fn remove_particle(&mut self, id: u32) -> Result<Particle> {
        if id as usize >= self.particles.len() {
            return Err(Error::UnknownParticle(id));
        }
        let removed = self.particles.swap_remove(id as usize);
        if let Some(moved) = self.particles.get_mut(id as usize) {
            moved.id = id;
        }
        self.rebuild_predictions()?;
        Ok(removed)
    }

    /// Overwrite all velocities and recompute every prediction.
    pub fn set_velocities(&mut self, velocities: &[Vec3]) -> Result<()> {
        if velocities.len() != self.particles.len() {
            return Err(Error::InvalidParam(format!(
                "expected {} velocities, got {}",
                self.particles.len(),
                velocities.len()
            )));
        }
        if !velocities.iter().flatten().all(|c| c.is_finite()) {
            return Err(Error::InvalidParam("velocity values must be finite".into()));
        }
        for (p, v) in self.particles.iter_mut().zip(velocities) {
            p.v = *v;
        }
        self.rebuild_predictions()
    }

    /// Reset cells, agents and queue from the current particle state.
    ///
    /// This should be called after externally modifying positions/velocities.
    pub fn rebuild_predictions(&mut self) -> Result<()> {
        self.cells.rebuild(&self.particles, self.clock)?;
        let n = self.particles.len();
        self.agents.reset(n, self.boundaries.len());
        self.queue.reset(n);
        if self.is_started() {
            self.repredict_all()?;
        }
        Ok(())
    }

    // ============ Driver ============

    /// Request a halt; the tables stay consistent and `resume()` continues.
    pub fn stop(&mut self) {
        if self.is_started() {
            self.state = IntegratorState::Stopped;
        } else {
            // Predictions are built on the next step; halt right after that.
            self.stop.request_stop();
        }
    }

    /// Leave `Stopped` and clear any pending stop request.
    pub fn resume(&mut self) {
        self.stop.clear();
        if self.state == IntegratorState::Stopped {
            self.state = IntegratorState::Running;
        }
    }

    /// Handle that observers or drivers can use to stop the loop between events.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Process the next event.
    pub fn step(&mut self) -> Result<StepOutcome> {
        self.ensure_started()?;
        if self.halted() {
            return Ok(StepOutcome::Stopped);
        }
        Ok(match self.process_next(None)? {
            Processed::Collision(record) => StepOutcome::Collision(record),
            Processed::Transit(subject) => StepOutcome::Transit {
                subject,
                time: self.clock,
            },
            Processed::Exhausted | Processed::Beyond => StepOutcome::Exhausted,
        })
    }

    /// Process events until the next collision, skipping cell transits.
    ///
    /// Does not return while only transits remain (e.g. non-interacting particles in a
    /// periodic box); bound such runs with [`run_until`](Self::run_until).
    pub fn step_collision(&mut self) -> Result<StepOutcome> {
        loop {
            match self.step()? {
                StepOutcome::Transit { .. } => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Run until `limit`, a stop request, or the queue runs dry.
    pub fn run_until(&mut self, limit: RunLimit) -> Result<RunSummary> {
        self.ensure_started()?;
        let horizon = match limit {
            RunLimit::Time(t) => {
                if !t.is_finite() {
                    return Err(Error::InvalidParam("target time must be finite".into()));
                }
                if t < self.clock - self.config.time_tolerance {
                    return Err(Error::InvalidParam(
                        "target time cannot be earlier than current time".into(),
                    ));
                }
                Some(t)
            }
            RunLimit::Collisions(_) | RunLimit::Events(_) => None,
        };

        let mut summary = RunSummary::default();
        loop {
            let done = match limit {
                RunLimit::Collisions(n) => summary.collisions >= n,
                RunLimit::Events(n) => summary.collisions + summary.transits >= n,
                RunLimit::Time(_) => false,
            };
            if done {
                break;
            }
            if self.halted() {
                summary.stopped = true;
                break;
            }
            match self.process_next(horizon)? {
                Processed::Collision(_) => summary.collisions += 1,
                Processed::Transit(_) => summary.transits += 1,
                Processed::Beyond => break,
                Processed::Exhausted => {
                    summary.exhausted = true;
                    break;
                }
            }
        }
        if let (Some(t), false) = (horizon, summary.stopped) {
            self.drift_to(t)?;
        }
        summary.end_time = self.clock;
        info!(
            "run finished at t={} after {} collisions, {} transits{}",
            summary.end_time,
            summary.collisions,
            summary.transits,
            if summary.exhausted { " (queue exhausted)" } else { "" }
        );
        Ok(summary)
    }

    /// Advance the simulation to `target_time` (must be >= current time).
    pub fn advance_to(&mut self, target_time: f64) -> Result<()> {
        self.run_until(RunLimit::Time(target_time)).map(|_| ())
    }

    // ============ Internal helpers ============

    fn is_started(&self) -> bool {
        !matches!(
            self.state,
            IntegratorState::Idle | IntegratorState::Predicting
        )
    }

    fn halted(&mut self) -> bool {
        if self.stop.is_requested() {
            self.state = IntegratorState::Stopped;
        }
        self.state == IntegratorState::Stopped
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.state == IntegratorState::Idle {
            self.state = IntegratorState::Predicting;
            self.repredict_all()?;
            self.state = IntegratorState::Running;
            debug!("initial predictions: {} events queued", self.queue.len());
        }
        Ok(())
    }

    fn process_next(&mut self, horizon: Option<f64>) -> Result<Processed> {
        let Some(next) = self.queue.peek_min().copied() else {
            return Ok(Processed::Exhausted);
        };
        let t = next.time_f64();
        if horizon.is_some_and(|h| t > h) {
            return Ok(Processed::Beyond);
        }
        let Some(event) = self.queue.pop_min() else {
            return Ok(Processed::Exhausted);
        };
        if self.config.check_consistency {
            self.check_popped(&event)?;
        }
        // The agent still names this entry; drop its handle before anything reschedules.
        let mut record = *self.agents.get(event.subject)?;
        record.handle = None;
        self.agents.set(event.subject, record)?;

        if t < self.clock {
            warn!(
                "event for particle {} at {} trails the clock {}; clamped",
                event.subject, t, self.clock
            );
        }
        self.drift_to(t)?;
        self.last_event_time = self.clock;
        trace!(
            "t={} subject={} partner={:?}",
            self.clock,
            event.subject,
            event.partner
        );

        match event.partner {
            Partner::Transit => {
                self.transits += 1;
                self.repredict(vec![event.subject])?;
                Ok(Processed::Transit(event.subject))
            }
            Partner::Particle(j) => self.resolve_pair(&event, j).map(Processed::Collision),
            Partner::Boundary(b) => self.resolve_boundary(&event, b).map(Processed::Collision),
        }
    }

    fn check_popped(&self, event: &CollisionEvent) -> Result<()> {
        let record = self.agents.get(event.subject)?;
        if record.collision_time != event.time_f64() || record.partner != Some(event.partner) {
            return Err(Error::QueueDesync {
                particle: event.subject,
                detail: format!(
                    "popped ({}, {:?}) but agent holds ({}, {:?})",
                    event.time_f64(),
                    event.partner,
                    record.collision_time,
                    record.partner
                ),
            });
        }
        if event.time_f64() < self.clock - self.config.time_tolerance {
            return Err(Error::QueueDesync {
                particle: event.subject,
                detail: format!("event at {} precedes clock {}", event.time_f64(), self.clock),
            });
        }
        Ok(())
    }

    /// Ballistic advance of everything to absolute time `t`, then restore cell membership.
    fn drift_to(&mut self, t: f64) -> Result<()> {
        let dt = t - self.clock;
        if dt < -self.config.time_tolerance {
            return Err(Error::InvalidParam("cannot drift backwards in time".into()));
        }
        if dt > 0.0 {
            for p in &mut self.particles {
                p.drift(dt);
                self.sim_box.wrap(&mut p.r);
            }
            for b in &mut self.boundaries {
                b.advance(dt);
            }
            self.clock = t;
        }
        for p in &self.particles {
            self.cells.relocate(p.id, &p.r, self.clock)?;
        }
        Ok(())
    }

    fn resolve_pair(&mut self, event: &CollisionEvent, j: u32) -> Result<CollisionRecord> {
        let i = event.subject;
        let potential = event.potential.ok_or_else(|| Error::QueueDesync {
            particle: i,
            detail: "pair event without a potential".into(),
        })?;
        for obs in self.observers.iter_mut() {
            obs.pre_resolve(event, &self.particles);
        }

        let pair = self.predictor().pair_state(i, j)?;
        let impulse = self.potentials.get(potential)?.resolve_collision(&pair)?;
        {
            let a = &mut self.particles[i as usize];
            let inv = a.inv_mass();
            for (v, dp) in a.v.iter_mut().zip(impulse.on_b.iter()) {
                *v -= dp * inv;
            }
            a.bump_collision_count();
        }
        {
            let b = &mut self.particles[j as usize];
            let inv = b.inv_mass();
            for (v, dp) in b.v.iter_mut().zip(impulse.on_b.iter()) {
                *v += dp * inv;
            }
            b.bump_collision_count();
        }
        self.collisions += 1;

        let record = CollisionRecord {
            time: self.clock,
            subject: i,
            partner: event.partner,
            potential: Some(potential),
            virial: impulse.virial,
            boundary_impulse: 0.0,
            delta_u: impulse.delta_u,
            work: 0.0,
        };
        if self.notify_post(&record) {
            self.repredict_all()?;
        } else {
            let mut affected = vec![i, j];
            affected.extend_from_slice(self.agents.dependents_of(Partner::Particle(i)));
            affected.extend_from_slice(self.agents.dependents_of(Partner::Particle(j)));
            self.repredict(affected)?;
        }
        Ok(record)
    }

    fn resolve_boundary(&mut self, event: &CollisionEvent, b: u32) -> Result<CollisionRecord> {
        let i = event.subject;
        for obs in self.observers.iter_mut() {
            obs.pre_resolve(event, &self.particles);
        }

        let boundary = self
            .boundaries
            .get_mut(b as usize)
            .ok_or_else(|| Error::QueueDesync {
                particle: i,
                detail: format!("event names missing boundary {b}"),
            })?;
        let p = &mut self.particles[i as usize];
        let response = boundary.resolve_collision(p)?;
        p.bump_collision_count();
        self.sim_box.wrap(&mut p.r);
        self.cells.relocate(i, &p.r, self.clock)?;
        self.collisions += 1;

        let record = CollisionRecord {
            time: self.clock,
            subject: i,
            partner: event.partner,
            potential: None,
            virial: 0.0,
            boundary_impulse: response.impulse,
            delta_u: 0.0,
            work: response.work,
        };
        if self.notify_post(&record) || response.state_changed {
            self.repredict_all()?;
        } else {
            let mut affected = vec![i];
            affected.extend_from_slice(self.agents.dependents_of(Partner::Particle(i)));
            self.repredict(affected)?;
        }
        Ok(record)
    }

    /// Returns whether an observer changed any velocity.
    fn notify_post(&mut self, record: &CollisionRecord) -> bool {
        if self.observers.is_empty() {
            return false;
        }
        let mut access = VelocityAccess::new(&mut self.particles);
        for obs in self.observers.iter_mut() {
            obs.post_resolve(record, &mut access);
        }
        let modified = access.is_modified();
        if modified {
            debug!("observer modified velocities at t={}; full re-predict", record.time);
        }
        modified
    }

    fn repredict(&mut self, mut ids: Vec<u32>) -> Result<()> {
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            let prediction = self.predictor().earliest(id)?;
            self.schedule(id, prediction)?;
        }
        Ok(())
    }

    fn repredict_all(&mut self) -> Result<()> {
        for id in 0..self.particles.len() as u32 {
            let prediction = self.predictor().earliest(id)?;
            self.schedule(id, prediction)?;
        }
        Ok(())
    }

    /// The only writer of agent records and queue entries; keeps both in step.
    fn schedule(&mut self, id: u32, prediction: Option<Prediction>) -> Result<()> {
        match prediction {
            Some(p) => {
                let event = CollisionEvent::new(p.time, id, p.partner, p.potential)?;
                let handle = self.queue.upsert(event);
                self.agents.set(
                    id,
                    AgentRecord {
                        collision_time: p.time,
                        partner: Some(p.partner),
                        potential: p.potential,
                        handle: Some(handle),
                    },
                )?;
            }
            None => {
                if let Some(handle) = self.queue.handle_of(id) {
                    self.queue.remove(handle);
                }
                self.agents.clear(id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::potential::HardSphere;

    fn sphere(id: u32, r: Vec3, v: Vec3) -> Result<Particle> {
        Particle::new(id, r, v, 0.5, 1.0)
    }

    fn hard_spheres(particles: Vec<Particle>, sim_box: SimBox) -> Result<Integrator> {
        Integrator::initialize(
            particles,
            sim_box,
            PotentialMap::uniform(HardSphere::new(1.0)?),
        )
    }

    #[test]
    fn starts_idle_then_runs() -> Result<()> {
        let mut sim = hard_spheres(
            vec![sphere(0, [2.0, 2.0, 2.0], [1.0, 0.0, 0.0])?],
            SimBox::walled([6.0, 6.0, 6.0])?,
        )?;
        assert_eq!(sim.state(), IntegratorState::Idle);
        assert!(sim.queue().is_empty());
        sim.step()?;
        assert_eq!(sim.state(), IntegratorState::Running);
        sim.verify_consistency()?;
        Ok(())
    }

    #[test]
    fn rejects_out_of_order_ids() -> Result<()> {
        let err = hard_spheres(
            vec![sphere(1, [2.0, 2.0, 2.0], [0.0; DIM])?],
            SimBox::walled([6.0, 6.0, 6.0])?,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dense"));
        Ok(())
    }

    #[test]
    fn rejects_periodic_box_smaller_than_two_ranges() -> Result<()> {
        let err = hard_spheres(
            vec![sphere(0, [0.5, 0.5, 0.5], [0.0; DIM])?],
            SimBox::periodic([1.5, 4.0, 4.0])?,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));
        Ok(())
    }

    #[test]
    fn reflective_axes_install_walls() -> Result<()> {
        let sim = hard_spheres(
            vec![sphere(0, [2.0, 2.0, 2.0], [0.0; DIM])?],
            SimBox::new(
                [6.0, 6.0, 6.0],
                [AxisKind::Periodic, AxisKind::Reflective, AxisKind::Periodic],
            )?,
        )?;
        assert_eq!(sim.wall_id(1, Side::Min), Some(0));
        assert_eq!(sim.wall_id(1, Side::Max), Some(1));
        assert_eq!(sim.wall_id(0, Side::Min), None);
        Ok(())
    }

    #[test]
    fn single_particle_bounces_between_walls() -> Result<()> {
        let mut sim = hard_spheres(
            vec![sphere(0, [1.0, 3.0, 3.0], [1.0, 0.0, 0.0])?],
            SimBox::walled([6.0, 6.0, 6.0])?,
        )?;
        // Hits the max-x wall at x = 5.5 after 4.5
        let first = match sim.step_collision()? {
            StepOutcome::Collision(rec) => rec,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(first.partner, Partner::Boundary(1));
        assert!((first.time - 4.5).abs() < 1e-12);
        assert_eq!(sim.particle(0)?.v, [-1.0, 0.0, 0.0]);
        assert!((first.boundary_impulse + 2.0).abs() < 1e-12);
        sim.verify_consistency()?;
        Ok(())
    }

    #[test]
    fn stop_and_resume_keep_tables_consistent() -> Result<()> {
        let mut sim = hard_spheres(
            vec![
                sphere(0, [1.0, 3.0, 3.0], [1.0, 0.3, 0.0])?,
                sphere(1, [4.0, 3.0, 3.0], [-1.0, 0.0, 0.2])?,
            ],
            SimBox::walled([6.0, 6.0, 6.0])?,
        )?;
        sim.run_until(RunLimit::Collisions(3))?;
        sim.stop();
        assert_eq!(sim.step()?, StepOutcome::Stopped);
        sim.verify_consistency()?;

        let handle = sim.stop_handle();
        sim.resume();
        sim.run_until(RunLimit::Collisions(2))?;
        handle.request_stop();
        let summary = sim.run_until(RunLimit::Time(sim.time() + 10.0))?;
        assert!(summary.stopped);
        assert_eq!(summary.collisions, 0);
        sim.verify_consistency()?;
        Ok(())
    }
}
