use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

/// A 2D vector in lattice space: `x` runs along columns, `y` along rows.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    pub fn zero() -> Self {
        Vec2 { x: 0.0, y: 0.0 }
    }

    pub fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    /// True when the vector is too short to carry a direction.
    pub fn is_negligible(&self) -> bool {
        self.length_squared() <= 1e-12
    }

    pub fn scale(&self, scalar: f32) -> Self {
        Vec2 { x: self.x * scalar, y: self.y * scalar }
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { x: self.x + other.x, y: self.y + other.y }
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, scalar: f32) -> Self {
        Self { x: self.x * scalar, y: self.y * scalar }
    }
}

/// Converts a vector to an angle (in radians), measured from +x towards +y.
pub fn vec_to_angle(vec: Vec2) -> f32 {
    vec.y.atan2(vec.x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_follows_atan2_quadrants() {
        assert_eq!(vec_to_angle(Vec2::new(1.0, 0.0)), 0.0);
        assert!((vec_to_angle(Vec2::new(0.0, 1.0)) - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert!((vec_to_angle(Vec2::new(-1.0, 0.0)).abs() - std::f32::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn negligible_vectors() {
        assert!(Vec2::zero().is_negligible());
        assert!(!(Vec2::new(0.3, 0.4)).is_negligible());
        assert!((Vec2::new(3.0, 4.0).length() - 5.0).abs() < 1e-6);
    }
}
