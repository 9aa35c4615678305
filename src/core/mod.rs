//! Core data structures and the event loop.
//!
//! Bottom-up: [`particle`] and [`geometry`] describe the state, [`cell`] bounds the
//! collision search, [`potential`] and [`boundary`] hold the collision laws,
//! [`predictor`] turns state into event times, [`event`] and [`agent`] cache them, and
//! [`integrator`] drives everything.

pub mod agent;
pub mod boundary;
pub mod cell;
pub mod event;
pub mod geometry;
pub mod integrator;
pub mod observer;
pub mod particle;
pub mod potential;
pub mod predictor;
pub mod setup;
pub mod vector;

pub use agent::{AgentRecord, AgentStore};
pub use boundary::{Boundary, BoundaryResponse, Side, Wall};
pub use cell::{CellId, CellIndex};
pub use event::{CollisionEvent, EventHandle, EventQueue, Partner};
pub use geometry::{AxisKind, SimBox};
pub use integrator::{Integrator, IntegratorState, RunLimit, RunSummary, StepOutcome, StopHandle};
pub use observer::{CollisionRecord, Observer, VelocityAccess};
pub use particle::{Particle, DIM};
pub use potential::{HardSphere, Impulse, PairState, Potential, PotentialId, PotentialMap, SquareWell};
pub use predictor::{CollisionPredictor, Prediction};
pub use setup::{random_gas, GasSpec};
