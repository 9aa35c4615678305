use numpy::ndarray::Array2;
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::core::particle::DIM;
use crate::core::{
    random_gas, AxisKind, Boundary, GasSpec, HardSphere, Integrator, Partner, PotentialMap,
    RunLimit, Side, SimBox, StepOutcome, Wall,
};

fn py_err<E: ToString>(e: E) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn to_array(rows: &[[f64; DIM]]) -> Array2<f64> {
    let mut arr = Array2::<f64>::zeros((rows.len(), DIM));
    for (i, row) in rows.iter().enumerate() {
        for k in 0..DIM {
            arr[[i, k]] = row[k];
        }
    }
    arr
}

fn parse_axis(kind: &str) -> PyResult<AxisKind> {
    match kind {
        "periodic" => Ok(AxisKind::Periodic),
        "reflective" | "wall" => Ok(AxisKind::Reflective),
        "open" => Ok(AxisKind::Open),
        other => Err(py_err(format!(
            "unknown boundary kind '{other}' (expected periodic, reflective or open)"
        ))),
    }
}

/// Hard-sphere gas driven by the event-driven integrator.
///
/// API:
/// - __new__(num_particles, box_size, radius=0.5, mass=1.0, boundary="reflective", seed=None)
/// - advance_to(time), step(max_events=1_000_000), run_collisions(count)
/// - get_positions() / get_velocities() -> np.ndarray, shape (N, 3)
/// - set_velocities(array)
/// - set_piston(axis, velocity), get_piston_impulse(axis), get_work_done()
#[pyclass(unsendable)]
pub struct HardSphereGas {
    sim: Integrator,
    /// Pistons added to non-reflective boxes, by axis.
    pistons: Vec<(usize, u32)>,
}

#[pymethods]
impl HardSphereGas {
    /// Place `num_particles` spheres at random without overlap and draw velocity
    /// components uniformly from [-1, 1].
    ///
    /// Errors: raises ValueError on invalid parameters.
    #[new]
    #[pyo3(signature = (num_particles, box_size, radius=0.5, mass=1.0, boundary="reflective", seed=None))]
    fn new(
        num_particles: usize,
        box_size: Vec<f64>,
        radius: f64,
        mass: f64,
        boundary: &str,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        if box_size.len() != DIM {
            return Err(py_err(format!("box_size must have length {DIM}")));
        }
        let mut lengths = [0.0f64; DIM];
        lengths.copy_from_slice(&box_size);
        let kind = parse_axis(boundary)?;
        let sim_box = SimBox::new(lengths, [kind; DIM]).map_err(py_err)?;
        let spec = GasSpec {
            num_particles,
            radius,
            mass,
            max_speed: 1.0,
            seed,
        };
        let particles = random_gas(&spec, &sim_box).map_err(py_err)?;
        let potentials = PotentialMap::uniform(HardSphere::new(2.0 * radius).map_err(py_err)?);
        let sim = Integrator::initialize(particles, sim_box, potentials).map_err(py_err)?;
        Ok(Self {
            sim,
            pistons: Vec::new(),
        })
    }

    /// Advance the simulation to the specified absolute time (releases the GIL during computation).
    fn advance_to(&mut self, py: Python<'_>, target_time: f64) -> PyResult<()> {
        let sim = &mut self.sim;
        py.detach(|| sim.advance_to(target_time)).map_err(py_err)
    }

    /// Process events until one collision is resolved, giving up after `max_events`.
    ///
    /// Returns (time, subject, partner) or None if no collision happened.
    /// `partner` is a particle id, or -1 - boundary_id for boundary hits.
    #[pyo3(signature = (max_events=1_000_000))]
    fn step(&mut self, max_events: u64) -> PyResult<Option<(f64, u32, i64)>> {
        for _ in 0..max_events {
            match self.sim.step().map_err(py_err)? {
                StepOutcome::Collision(rec) => {
                    let partner = match rec.partner {
                        Partner::Particle(j) => j as i64,
                        Partner::Boundary(b) => -1 - b as i64,
                        Partner::Transit => continue,
                    };
                    return Ok(Some((rec.time, rec.subject, partner)));
                }
                StepOutcome::Transit { .. } => continue,
                StepOutcome::Exhausted | StepOutcome::Stopped => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Resolve `count` collisions; returns how many were processed.
    fn run_collisions(&mut self, py: Python<'_>, count: u64) -> PyResult<u64> {
        let sim = &mut self.sim;
        py.detach(|| sim.run_until(RunLimit::Collisions(count)))
            .map(|s| s.collisions)
            .map_err(py_err)
    }

    /// Return positions as a NumPy array of shape (N, 3), dtype=float64.
    fn get_positions(&self, py: Python<'_>) -> PyResult<Py<PyArray2<f64>>> {
        Ok(to_array(&self.sim.positions()).into_pyarray(py).unbind())
    }

    /// Return velocities as a NumPy array of shape (N, 3), dtype=float64.
    fn get_velocities(&self, py: Python<'_>) -> PyResult<Py<PyArray2<f64>>> {
        Ok(to_array(&self.sim.velocities()).into_pyarray(py).unbind())
    }

    /// Set all particle velocities from a NumPy array of shape (N, 3). Values must be finite.
    fn set_velocities<'py>(&mut self, velocities: PyReadonlyArray2<'py, f64>) -> PyResult<()> {
        let arr = velocities.as_array();
        let n = self.sim.num_particles();
        if arr.shape() != [n, DIM] {
            return Err(py_err(format!(
                "velocities must have shape ({n}, {DIM}), got {:?}",
                arr.shape()
            )));
        }
        let rows: Vec<[f64; DIM]> = arr
            .outer_iter()
            .map(|row| {
                let mut v = [0.0; DIM];
                for k in 0..DIM {
                    v[k] = row[k];
                }
                v
            })
            .collect();
        self.sim.set_velocities(&rows).map_err(py_err)
    }

    fn kinetic_energy(&self) -> f64 {
        self.sim.kinetic_energy()
    }

    fn time(&self) -> f64 {
        self.sim.time()
    }

    fn collision_count(&self) -> u64 {
        self.sim.collision_count()
    }

    /// Move the max-side wall of `axis` at `velocity` (negative compresses).
    ///
    /// Reflective boxes reuse their existing wall; other boxes get a piston at `L[axis]`
    /// on first use.
    fn set_piston(&mut self, axis: usize, velocity: f64) -> PyResult<()> {
        if axis >= DIM {
            return Err(py_err(format!("axis must be < {DIM}")));
        }
        if self.sim.sim_box().kind(axis) == AxisKind::Periodic {
            return Err(py_err("cannot place a piston on a periodic axis"));
        }
        let id = match self.piston_id(axis) {
            Some(id) => id,
            None => {
                let at = self.sim.sim_box().lengths()[axis];
                let wall = Wall::piston(axis, Side::Max, at, 0.0).map_err(py_err)?;
                let id = self.sim.add_boundary(Box::new(wall)).map_err(py_err)?;
                self.pistons.push((axis, id));
                id
            }
        };
        self.sim.set_boundary_velocity(id, velocity).map_err(py_err)
    }

    /// Return the cumulative mechanical work done on the gas by every boundary.
    fn get_work_done(&self) -> f64 {
        self.sim.work_done()
    }

    /// Return the cumulative momentum the max-side wall of `axis` has delivered to particles.
    ///
    /// Zero if that axis has neither a reflective wall nor a piston yet.
    fn get_piston_impulse(&self, axis: usize) -> PyResult<f64> {
        if axis >= DIM {
            return Err(py_err(format!("axis must be < {DIM}")));
        }
        Ok(self
            .piston_id(axis)
            .and_then(|id| self.sim.boundary(id))
            .map_or(0.0, |b| b.impulse_total()))
    }
}

impl HardSphereGas {
    /// Boundary id of the max-side wall or piston on `axis`, if one exists.
    fn piston_id(&self, axis: usize) -> Option<u32> {
        self.sim.wall_id(axis, Side::Max).or_else(|| {
            self.pistons
                .iter()
                .find(|(k, _)| *k == axis)
                .map(|(_, id)| *id)
        })
    }
}

/// Python module entry point.
#[pymodule]
fn edmd(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<HardSphereGas>()?;
    Ok(())
}
