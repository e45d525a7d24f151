//! 3D camera: pose, projection, and picking rays.
//!
//! The camera pose matches the presence wire shape (position, XYZ Euler
//! rotation, up vector) so a remote pose can drive the local camera
//! directly in follow mode. Projection supports perspective and
//! orthographic kinds; switching kinds preserves position and up.

#[cfg(test)]
#[path = "camera_test.rs"]
mod camera_test;

use nalgebra::{Matrix4, Point3, Rotation3, Vector3, Vector4};

use doc::presence::CameraPose;

use crate::pick::Ray;

/// Projection kind, driven by the shared `cameraSettings` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
pub enum ProjectionKind {
    #[default]
    Perspective,
    Orthographic,
}

/// Viewport size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    #[must_use]
    pub fn aspect(&self) -> f64 {
        if self.height > 0.0 { self.width / self.height } else { 1.0 }
    }

    /// Pixel position → normalized device coordinates, y up.
    #[must_use]
    pub fn to_ndc(&self, px: (f64, f64)) -> (f64, f64) {
        if self.width <= 0.0 || self.height <= 0.0 {
            return (0.0, 0.0);
        }
        (px.0 / self.width * 2.0 - 1.0, -(px.1 / self.height) * 2.0 + 1.0)
    }
}

/// The scene camera.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Point3<f64>,
    /// XYZ Euler angles in radians.
    pub rotation: Vector3<f64>,
    pub up: Vector3<f64>,
    pub kind: ProjectionKind,
    /// Vertical field of view in radians (perspective only).
    pub fov_y: f64,
    pub near: f64,
    pub far: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Point3::new(8.0, 8.0, 8.0),
            rotation: Vector3::zeros(),
            up: Vector3::z(),
            kind: ProjectionKind::Perspective,
            fov_y: 90_f64.to_radians(),
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Rotation matrix for XYZ Euler order.
    fn rotation_matrix(&self) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), self.rotation.x)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), self.rotation.y)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), self.rotation.z)
    }

    /// The direction the camera looks along.
    #[must_use]
    pub fn forward(&self) -> Vector3<f64> {
        self.rotation_matrix() * -Vector3::z()
    }

    /// World → camera transform.
    #[must_use]
    pub fn view_matrix(&self) -> Matrix4<f64> {
        let world = Matrix4::new_translation(&self.position.coords)
            * self.rotation_matrix().to_homogeneous();
        world.try_inverse().unwrap_or_else(Matrix4::identity)
    }

    /// Camera → clip transform for the given viewport.
    #[must_use]
    pub fn projection_matrix(&self, viewport: &Viewport) -> Matrix4<f64> {
        match self.kind {
            ProjectionKind::Perspective => {
                Matrix4::new_perspective(viewport.aspect(), self.fov_y, self.near, self.far)
            }
            ProjectionKind::Orthographic => {
                let half_w = (viewport.width / 2.0).max(1.0);
                let half_h = (viewport.height / 2.0).max(1.0);
                Matrix4::new_orthographic(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        }
    }

    /// Point the camera at a world target, deriving the Euler rotation
    /// from the current position and up vector.
    pub fn look_at(&mut self, target: &Point3<f64>) {
        let back = self.position - target;
        if back.norm() == 0.0 {
            return;
        }
        let z = back.normalize();
        let mut x = self.up.cross(&z);
        if x.norm() < 1e-12 {
            // Up is parallel to the view direction; pick any orthogonal.
            x = Vector3::x();
        }
        let x = x.normalize();
        let y = z.cross(&x);

        // Euler extraction for XYZ order.
        let (m02, m12, m22) = (z.x, z.y, z.z);
        let ry = m02.clamp(-1.0, 1.0).asin();
        let (rx, rz) = if m02.abs() < 0.999_999_9 {
            ((-m12).atan2(m22), (-y.x).atan2(x.x))
        } else {
            ((y.z).atan2(y.y), 0.0)
        };
        self.rotation = Vector3::new(rx, ry, rz);
    }

    /// Current pose in the presence wire shape.
    #[must_use]
    pub fn pose(&self) -> CameraPose {
        CameraPose {
            position: [self.position.x, self.position.y, self.position.z],
            rotation: [self.rotation.x, self.rotation.y, self.rotation.z],
            up: [self.up.x, self.up.y, self.up.z],
        }
    }

    /// Drive the camera from a remote pose.
    pub fn set_pose(&mut self, pose: &CameraPose) {
        self.position = Point3::new(pose.position[0], pose.position[1], pose.position[2]);
        self.rotation = Vector3::new(pose.rotation[0], pose.rotation[1], pose.rotation[2]);
        self.up = Vector3::new(pose.up[0], pose.up[1], pose.up[2]);
    }

    /// Project a world point to pixel coordinates. `None` when the point
    /// is behind the camera or degenerate.
    #[must_use]
    pub fn project(&self, point: &Point3<f64>, viewport: &Viewport) -> Option<(f64, f64)> {
        let clip = self.projection_matrix(viewport)
            * self.view_matrix()
            * Vector4::new(point.x, point.y, point.z, 1.0);
        if clip.w.abs() < 1e-12 || clip.w < 0.0 {
            return None;
        }
        let ndc = (clip.x / clip.w, clip.y / clip.w);
        Some((
            (ndc.0 * 0.5 + 0.5) * viewport.width,
            (-ndc.1 * 0.5 + 0.5) * viewport.height,
        ))
    }

    /// Ray from the camera through a normalized-device-coordinate point.
    #[must_use]
    pub fn ray_through(&self, ndc: (f64, f64), viewport: &Viewport) -> Ray {
        let inverse = (self.projection_matrix(viewport) * self.view_matrix())
            .try_inverse()
            .unwrap_or_else(Matrix4::identity);
        let unproject = |x: f64, y: f64, z: f64| -> Point3<f64> {
            let world = inverse * Vector4::new(x, y, z, 1.0);
            if world.w.abs() < 1e-12 {
                Point3::origin()
            } else {
                Point3::new(world.x / world.w, world.y / world.w, world.z / world.w)
            }
        };
        match self.kind {
            ProjectionKind::Perspective => {
                let target = unproject(ndc.0, ndc.1, 0.5);
                let direction = (target - self.position)
                    .try_normalize(1e-12)
                    .unwrap_or_else(|| self.forward());
                Ray { origin: self.position, direction }
            }
            ProjectionKind::Orthographic => {
                let origin = unproject(ndc.0, ndc.1, -1.0);
                Ray { origin, direction: self.forward() }
            }
        }
    }
}
