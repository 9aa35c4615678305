use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use edmd::core::{
    random_gas, AxisKind, Boundary, CollisionRecord, GasSpec, HardSphere, Integrator, Observer,
    Particle, Partner, PotentialMap, RunLimit, Side, SimBox, StepOutcome, VelocityAccess, Wall,
};
use edmd::error::{Error, Result};

fn hard_spheres(particles: Vec<Particle>, sim_box: SimBox) -> Result<Integrator> {
    Integrator::initialize(
        particles,
        sim_box,
        PotentialMap::uniform(HardSphere::new(1.0)?),
    )
}

/// Sums the work boundaries do on particles.
struct WorkMeter(Arc<Mutex<f64>>);

impl Observer for WorkMeter {
    fn post_resolve(&mut self, record: &CollisionRecord, _state: &mut VelocityAccess<'_>) {
        if let Ok(mut total) = self.0.lock() {
            *total += record.work;
        }
    }
}

/// A particle leaving through an open face is reported, not silently lost.
#[test]
fn escape_through_open_axis_is_boundary_violation() -> Result<()> {
    let sim_box = SimBox::new(
        [10.0, 10.0, 10.0],
        [AxisKind::Open, AxisKind::Periodic, AxisKind::Periodic],
    )?;
    let mut sim = hard_spheres(
        vec![Particle::new(0, [2.0, 5.0, 5.0], [-1.0, 0.0, 0.0], 0.5, 1.0)?],
        sim_box,
    )?;
    match sim.run_until(RunLimit::Time(5.0)) {
        Err(Error::BoundaryViolation {
            particle, position, ..
        }) => {
            assert_eq!(particle, 0);
            assert!(position[0] < 0.0);
        }
        other => panic!("expected a boundary violation, got {other:?}"),
    }
    Ok(())
}

/// Reflective boxes keep every particle inside and conserve energy.
#[test]
fn walled_gas_stays_inside() -> Result<()> {
    let sim_box = SimBox::walled([8.0, 8.0, 8.0])?;
    let spec = GasSpec {
        num_particles: 40,
        seed: Some(5),
        ..GasSpec::default()
    };
    let mut sim = hard_spheres(random_gas(&spec, &sim_box)?, sim_box)?;
    let e0 = sim.kinetic_energy();
    let summary = sim.run_until(RunLimit::Time(30.0))?;
    assert!(summary.collisions > 0);
    for p in sim.particles() {
        for k in 0..3 {
            assert!(p.r[k] >= p.radius - 1e-9 && p.r[k] <= 8.0 - p.radius + 1e-9);
        }
    }
    assert_relative_eq!(sim.kinetic_energy(), e0, max_relative = 1e-9);
    sim.verify_consistency()?;
    Ok(())
}

/// An inward-moving piston heats the gas by exactly the work it does.
#[test]
fn piston_work_matches_energy_gain() -> Result<()> {
    let sim_box = SimBox::walled([10.0, 10.0, 10.0])?;
    let spec = GasSpec {
        num_particles: 30,
        seed: Some(24680),
        ..GasSpec::default()
    };
    let mut sim = hard_spheres(random_gas(&spec, &sim_box)?, sim_box)?;
    let work = Arc::new(Mutex::new(0.0));
    sim.add_observer(Box::new(WorkMeter(Arc::clone(&work))));

    sim.advance_to(1.0)?;
    let piston = sim.wall_id(0, Side::Max).unwrap();
    let e0 = sim.kinetic_energy();
    let w0 = *work.lock().unwrap();
    assert_relative_eq!(w0, 0.0);

    sim.set_boundary_velocity(piston, -0.2)?;
    sim.advance_to(10.0)?;

    let w = *work.lock().unwrap();
    assert!(w > 0.0, "piston never hit a particle");
    assert_relative_eq!(sim.kinetic_energy() - e0, w, max_relative = 1e-9);
    // The wall's own accumulators agree with what observers saw
    assert_relative_eq!(sim.work_done(), w, max_relative = 1e-9);
    let piston_wall = sim.boundary(piston).unwrap();
    assert_relative_eq!(piston_wall.work_total(), w, max_relative = 1e-9);
    // A max-side wall only ever pushes particles towards -x
    assert!(piston_wall.impulse_total() < 0.0);
    for p in sim.particles() {
        assert!(p.r[0] <= 10.0 - 0.2 * 9.0 - p.radius + 1e-9);
    }
    sim.verify_consistency()?;
    Ok(())
}

/// Extra boundaries installed after start are picked up by every prediction.
#[test]
fn added_wall_is_hit() -> Result<()> {
    let mut sim = hard_spheres(
        vec![Particle::new(0, [2.0, 5.0, 5.0], [1.0, 0.0, 0.0], 0.5, 1.0)?],
        SimBox::periodic([10.0, 10.0, 10.0])?,
    )?;
    sim.run_until(RunLimit::Time(0.5))?;
    let id = sim.add_boundary(Box::new(Wall::new(0, Side::Max, 6.0)?))?;

    let rec = match sim.step_collision()? {
        StepOutcome::Collision(rec) => rec,
        other => panic!("expected the wall, got {other:?}"),
    };
    assert_eq!(rec.partner, Partner::Boundary(id));
    assert_relative_eq!(rec.time, 3.5, epsilon = 1e-12);
    assert_relative_eq!(sim.particle(0)?.v[0], -1.0);
    assert!(sim.set_boundary_velocity(id + 1, 1.0).is_err());
    Ok(())
}
