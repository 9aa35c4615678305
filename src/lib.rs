//! Event-driven molecular dynamics for hard particles.
//!
//! Particles move ballistically between instantaneous collisions. A cell grid bounds the
//! pair search, a per-particle agent table caches each particle's earliest event, and an
//! indexed min-heap orders the events. See [`core::Integrator`] for the event loop.
//!
//! The `python` feature builds a `pyo3` extension module exposing a hard-sphere gas.

pub mod config;
pub mod core;
pub mod error;

#[cfg(feature = "python")]
mod python;

pub use crate::config::IntegratorConfig;
pub use crate::core::{
    Boundary, CollisionRecord, HardSphere, Integrator, Observer, Particle, Partner, Potential,
    PotentialMap, RunLimit, SimBox, SquareWell, StepOutcome,
};
pub use crate::error::{Error, Result};
