//! Tunables for the event loop.

use crate::error::{Error, Result};

/// Default tolerance used when comparing absolute times.
pub const DEFAULT_TIME_TOLERANCE: f64 = 1e-12;

/// Default overshoot, as a fraction of the cell edge, past which a cell transit fires.
pub const DEFAULT_TRANSIT_MARGIN: f64 = 1e-9;

/// Configuration for an [`Integrator`](crate::core::Integrator).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorConfig {
    /// Times closer than this are treated as equal when advancing the clock.
    pub time_tolerance: f64,
    /// A particle is moved to its next cell once it is this fraction of a cell edge past
    /// the face. Cells are sized so that two such overshoots still fit inside the range.
    pub transit_margin: f64,
    /// Cross-check each popped event against the agent table.
    pub check_consistency: bool,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            time_tolerance: DEFAULT_TIME_TOLERANCE,
            transit_margin: DEFAULT_TRANSIT_MARGIN,
            check_consistency: true,
        }
    }
}

impl IntegratorConfig {
    /// Reject non-finite or negative tolerances.
    pub fn validate(&self) -> Result<()> {
        if !self.time_tolerance.is_finite() || self.time_tolerance < 0.0 {
            return Err(Error::InvalidParam(
                "time_tolerance must be finite and >= 0".into(),
            ));
        }
        if !self.transit_margin.is_finite()
            || self.transit_margin <= 0.0
            || self.transit_margin >= 0.01
        {
            return Err(Error::InvalidParam(
                "transit_margin must lie in (0, 0.01)".into(),
            ));
        }
        Ok(())
    }
}
