//! Plane primitive layered on top of `nalgebra` points and vectors.

use nalgebra::{Point3, Unit, Vector3};
use serde::{Deserialize, Serialize};

/// An infinite plane through `origin` with unit `normal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    origin: Point3<f64>,
    normal: Unit<Vector3<f64>>,
}

impl Plane {
    /// Returns `None` when `normal` is too short to normalize.
    pub fn new(origin: Point3<f64>, normal: Vector3<f64>) -> Option<Self> {
        Unit::try_new(normal, 1e-12).map(|normal| Self { origin, normal })
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    pub fn normal(&self) -> Vector3<f64> {
        self.normal.into_inner()
    }

    /// Orthogonal projection of `point` onto the plane.
    pub fn closest_point(&self, point: &Point3<f64>) -> Point3<f64> {
        let offset = self.normal.dot(&(point - self.origin));
        point - self.normal.into_inner() * offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn projection_lands_on_plane() {
        let plane = Plane::new(Point3::new(0.0, 0.0, 2.0), Vector3::new(0.0, 0.0, 3.0)).unwrap();
        let projected = plane.closest_point(&Point3::new(1.5, -2.0, 7.0));
        assert_relative_eq!(projected, Point3::new(1.5, -2.0, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn degenerate_normal_is_rejected() {
        assert!(Plane::new(Point3::origin(), Vector3::zeros()).is_none());
    }
}
