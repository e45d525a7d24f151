//! Exploded-view math.
//!
//! Each object is displaced outward along the vector from the aggregate
//! bounding center to its own center, scaled by the configured factor.
//! Disabling resets every offset to exactly zero, so the view is
//! invertible regardless of the factor.

use nalgebra::{Point3, Vector3};
use serde::Deserialize;

/// The shared `explodedView` option.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplodedView {
    pub enabled: bool,
    #[serde(default)]
    pub factor: f64,
}

/// Displacement of one object under the current explosion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplodedState {
    /// Unit direction away from the assembly center (zero for an object
    /// sitting exactly on it).
    pub vector: Vector3<f64>,
    pub distance: f64,
    pub old_center: Point3<f64>,
    pub new_center: Point3<f64>,
}

impl ExplodedState {
    /// The applied offset, `vector * distance`.
    #[must_use]
    pub fn offset(&self) -> Vector3<f64> {
        self.vector * self.distance
    }
}

/// Helper line from an object's original to its exploded position.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplodedLine {
    /// Owning object name; visibility follows the object.
    pub name: String,
    pub from: Point3<f64>,
    pub to: Point3<f64>,
    pub visible: bool,
}

/// Compute an object's displacement from its center, the assembly
/// center, and the explosion factor.
#[must_use]
pub fn compute_exploded_state(
    object_center: &Point3<f64>,
    group_center: &Point3<f64>,
    factor: f64,
) -> ExplodedState {
    let delta = object_center - group_center;
    let norm = delta.norm();
    let vector = if norm > 0.0 { delta / norm } else { Vector3::zeros() };
    let distance = norm * factor;
    ExplodedState {
        vector,
        distance,
        old_center: *object_center,
        new_center: object_center + vector * distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacement_points_away_from_center() {
        let state = compute_exploded_state(
            &Point3::new(2.0, 0.0, 0.0),
            &Point3::origin(),
            1.5,
        );
        assert!((state.vector - Vector3::x()).norm() < 1e-12);
        assert!((state.distance - 3.0).abs() < 1e-12);
        assert!((state.new_center - Point3::new(5.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn object_on_center_does_not_move() {
        let center = Point3::new(1.0, 2.0, 3.0);
        let state = compute_exploded_state(&center, &center, 4.0);
        assert_eq!(state.offset(), Vector3::zeros());
        assert_eq!(state.new_center, center);
    }

    #[test]
    fn zero_factor_is_identity() {
        let state = compute_exploded_state(
            &Point3::new(7.0, -2.0, 1.0),
            &Point3::origin(),
            0.0,
        );
        assert_eq!(state.offset(), Vector3::zeros());
    }
}
