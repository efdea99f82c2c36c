//! Vector and color types used by the simulation and the wire format.
//!
//! Both serialize as plain three-element arrays (`[x, y, z]`, `[r, g, b]`).

use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};
use std::ops::{Add, AddAssign, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance(self, other: Vec3) -> f32 {
        (self - other).length()
    }

    /// Unit vector in the same direction, or zero for a (near) zero vector.
    pub fn normalized(self) -> Vec3 {
        let length = self.length();
        if length <= f32::EPSILON {
            Vec3::ZERO
        } else {
            self * (1.0 / length)
        }
    }

    /// Scales the vector down so its length does not exceed `max`.
    pub fn clamp_length(self, max: f32) -> Vec3 {
        let length = self.length();
        if length > max && length > 0.0 {
            self * (max / length)
        } else {
            self
        }
    }

    pub fn clamp_axes(self, min: f32, max: f32) -> Vec3 {
        Vec3::new(
            self.x.clamp(min, max),
            self.y.clamp(min, max),
            self.z.clamp(min, max),
        )
    }

    pub fn lerp(self, target: Vec3, t: f32) -> Vec3 {
        self + (target - self) * t
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Vec3::new(x, y, z)
    }
}

impl From<Vec3> for [f32; 3] {
    fn from(v: Vec3) -> Self {
        [v.x, v.y, v.z]
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Linear RGB color with components nominally in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Converts hue, saturation and value (all in `[0, 1]`) to RGB.
    pub fn from_hsv(hue: f32, saturation: f32, value: f32) -> Rgb {
        let h = hue.rem_euclid(1.0) * 6.0;
        let sector = h.floor();
        let f = h - sector;
        let p = value * (1.0 - saturation);
        let q = value * (1.0 - saturation * f);
        let t = value * (1.0 - saturation * (1.0 - f));
        match sector as u8 {
            0 => Rgb::new(value, t, p),
            1 => Rgb::new(q, value, p),
            2 => Rgb::new(p, value, t),
            3 => Rgb::new(p, q, value),
            4 => Rgb::new(t, p, value),
            _ => Rgb::new(value, p, q),
        }
    }

    pub fn clamped(self) -> Rgb {
        Rgb::new(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
        )
    }

    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite()
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::WHITE
    }
}

impl From<[f32; 3]> for Rgb {
    fn from([r, g, b]: [f32; 3]) -> Self {
        Rgb::new(r, g, b)
    }
}

impl From<Rgb> for [f32; 3] {
    fn from(c: Rgb) -> Self {
        [c.r, c.g, c.b]
    }
}

/// Interpolates between two angles (radians) along the shortest arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let delta = (to - from + PI).rem_euclid(TAU) - PI;
    from + delta * t
}

/// Yaw (radians) of a horizontal direction; zero yaw faces +z.
pub fn yaw_of(direction: Vec3) -> f32 {
    direction.x.atan2(direction.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vec3_serializes_as_array() {
        let json = serde_json::to_string(&Vec3::new(1.0, 2.5, -3.0)).unwrap();
        assert_eq!(json, "[1.0,2.5,-3.0]");

        let parsed: Vec3 = serde_json::from_str("[0.5, 0, -1]").unwrap();
        assert_eq!(parsed, Vec3::new(0.5, 0.0, -1.0));
    }

    #[test]
    fn test_vec3_rejects_short_array() {
        assert!(serde_json::from_str::<Vec3>("[1.0, 2.0]").is_err());
    }

    #[test]
    fn test_normalized_handles_zero() {
        assert_eq!(Vec3::ZERO.normalized(), Vec3::ZERO);
        let unit = Vec3::new(3.0, 0.0, 4.0).normalized();
        assert_approx_eq!(unit.length(), 1.0, 1e-6);
        assert_approx_eq!(unit.x, 0.6, 1e-6);
    }

    #[test]
    fn test_clamp_length_only_shrinks() {
        let short = Vec3::new(0.3, 0.0, 0.4);
        assert_eq!(short.clamp_length(1.0), short);

        let long = Vec3::new(1.0, 0.0, 1.0).clamp_length(1.0);
        assert_approx_eq!(long.length(), 1.0, 1e-6);
        assert_approx_eq!(long.x, long.z, 1e-6);
    }

    #[test]
    fn test_lerp_angle_takes_short_way() {
        let from = 170f32.to_radians();
        let to = -170f32.to_radians();
        let halfway = lerp_angle(from, to, 0.5);
        assert_approx_eq!(halfway.abs(), PI, 1e-4);
    }

    #[test]
    fn test_yaw_of_axes() {
        assert_approx_eq!(yaw_of(Vec3::new(0.0, 0.0, 1.0)), 0.0, 1e-6);
        assert_approx_eq!(yaw_of(Vec3::new(1.0, 0.0, 0.0)), PI / 2.0, 1e-6);
    }

    #[test]
    fn test_hsv_primary_colors() {
        assert_eq!(Rgb::from_hsv(0.0, 1.0, 1.0), Rgb::new(1.0, 0.0, 0.0));
        let green = Rgb::from_hsv(1.0 / 3.0, 1.0, 1.0);
        assert_approx_eq!(green.g, 1.0, 1e-5);
        assert_approx_eq!(green.r, 0.0, 1e-5);
    }

    #[test]
    fn test_rgb_clamped() {
        assert_eq!(Rgb::new(-0.5, 2.0, 0.25).clamped(), Rgb::new(0.0, 1.0, 0.25));
    }
}
