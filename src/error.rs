use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the event-driven engine.
///
/// Recoverable numerical trouble (grazing trajectories, zero relative velocity) never
/// surfaces here; the predictor reports "no collision" instead. The variants below are
/// either caller mistakes or internal-consistency failures that abort the run.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Numerical or geometric issue (e.g., coincident centers at contact).
    #[error("numerical error: {0}")]
    MathError(String),

    /// A particle was advanced outside an open (non-periodic, non-reflective) axis
    /// without a boundary event firing first.
    #[error("boundary violation: particle {particle} at t={time} left the box at {position:?}")]
    BoundaryViolation {
        particle: u32,
        time: f64,
        position: [f64; 3],
    },

    /// Agent table and event queue disagree about a particle's pending event.
    #[error("event queue out of sync for particle {particle}: {detail}")]
    QueueDesync { particle: u32, detail: String },

    /// Recorded cell membership differs from the one implied by the position.
    #[error("cell index out of sync for particle {particle}: recorded {recorded}, expected {expected}")]
    CellDesync {
        particle: u32,
        recorded: usize,
        expected: usize,
    },

    /// Particle id outside the current particle table.
    #[error("unknown particle id {0}")]
    UnknownParticle(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_informative() {
        let e = Error::InvalidParam("radius must be > 0".to_string());
        let msg = format!("{e}");
        assert!(msg.contains("invalid parameter"));
        assert!(msg.contains("radius"));
    }

    #[test]
    fn boundary_violation_reports_particle_and_position() {
        let e = Error::BoundaryViolation {
            particle: 7,
            time: 1.5,
            position: [-0.25, 1.0, 2.0],
        };
        let msg = e.to_string();
        assert!(msg.contains("particle 7"));
        assert!(msg.contains("-0.25"));
    }
}
