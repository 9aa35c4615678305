//! Small fixed-size vector helpers on `[f64; DIM]`.

use crate::core::particle::DIM;

/// Position or velocity.
pub type Vec3 = [f64; DIM];

#[inline]
pub fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// `a - b`.
#[inline]
pub fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    let mut out = [0.0_f64; DIM];
    for ((o, &x), &y) in out.iter_mut().zip(a.iter()).zip(b.iter()) {
        *o = x - y;
    }
    out
}

#[inline]
pub fn scale(a: &Vec3, s: f64) -> Vec3 {
    a.map(|x| x * s)
}

#[inline]
pub fn norm_sq(a: &Vec3) -> f64 {
    dot(a, a)
}
