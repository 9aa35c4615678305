use crate::core::particle::DIM;
use crate::core::vector::Vec3;
use crate::error::{Error, Result};

/// How the box treats one Cartesian axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    /// Positions wrap modulo the box length; displacements use the minimum image.
    Periodic,
    /// Two hard walls at `0` and `L` reflect particles.
    Reflective,
    /// No walls; a particle leaving `[0, L)` is a boundary violation.
    Open,
}

/// Axis-aligned simulation box with its lower corner at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct SimBox {
    lengths: [f64; DIM],
    kinds: [AxisKind; DIM],
}

impl SimBox {
    /// Box with the given edge lengths and per-axis treatment.
    pub fn new(lengths: [f64; DIM], kinds: [AxisKind; DIM]) -> Result<Self> {
        if !lengths.iter().all(|&l| l.is_finite() && l > 0.0) {
            return Err(Error::InvalidParam(
                "box lengths must be finite and > 0".into(),
            ));
        }
        Ok(Self { lengths, kinds })
    }

    /// Fully periodic box.
    pub fn periodic(lengths: [f64; DIM]) -> Result<Self> {
        Self::new(lengths, [AxisKind::Periodic; DIM])
    }

    /// Box closed by six hard walls.
    pub fn walled(lengths: [f64; DIM]) -> Result<Self> {
        Self::new(lengths, [AxisKind::Reflective; DIM])
    }

    /// Returns the box edge lengths.
    #[inline]
    pub fn lengths(&self) -> [f64; DIM] {
        self.lengths
    }

    #[inline]
    pub fn kind(&self, axis: usize) -> AxisKind {
        self.kinds[axis]
    }

    #[inline]
    pub fn kinds(&self) -> [AxisKind; DIM] {
        self.kinds
    }

    /// Returns the box volume.
    pub fn volume(&self) -> f64 {
        self.lengths.iter().product()
    }

    /// Minimum-image displacement on periodic axes; identity elsewhere.
    #[inline]
    pub fn minimum_image(&self, mut d: Vec3) -> Vec3 {
        for ((dk, &l), &kind) in d.iter_mut().zip(&self.lengths).zip(&self.kinds) {
            if kind == AxisKind::Periodic {
                *dk -= l * (*dk / l).round();
            }
        }
        d
    }

    /// Fold positions on periodic axes back into `[0, L)`.
    #[inline]
    pub fn wrap(&self, r: &mut Vec3) {
        for ((rk, &l), &kind) in r.iter_mut().zip(&self.lengths).zip(&self.kinds) {
            if kind == AxisKind::Periodic {
                let mut x = rk.rem_euclid(l);
                // rem_euclid of a tiny negative number rounds up to l
                if x >= l {
                    x = 0.0;
                }
                *rk = x;
            }
        }
    }

    /// Returns the first open axis on which `r` lies outside `[0, L)`.
    pub fn escaped_axis(&self, r: &Vec3) -> Option<usize> {
        (0..DIM).find(|&k| {
            self.kinds[k] == AxisKind::Open && !(0.0..self.lengths[k]).contains(&r[k])
        })
    }
}
