//! Clip-plane state: the implicit half-space, the drag gizmo, and the
//! stencil-style fill plane.
//!
//! The plane is `normal · p + constant = 0`; geometry on the negative
//! side is cut away. Enabling clip mode also enables the interactive
//! gizmo (translate by default, `r` toggles rotate) and a translucent
//! control plane; a second plane mesh renders the pseudo "fill" where
//! the model is cut and is re-posed onto the plane every frame.

use nalgebra::{Point3, Rotation3, Vector3};
use serde::Deserialize;

/// The shared `clipView` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipSettings {
    pub enabled: bool,
    #[serde(default = "default_show_plane")]
    pub show_clip_plane: bool,
}

fn default_show_plane() -> bool {
    true
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self { enabled: false, show_clip_plane: true }
    }
}

/// An implicit half-space: `normal · p + constant = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPlane {
    pub normal: Vector3<f64>,
    pub constant: f64,
}

impl Default for ClipPlane {
    fn default() -> Self {
        Self { normal: Vector3::new(-1.0, 0.0, 0.0), constant: 0.0 }
    }
}

impl ClipPlane {
    /// Signed distance of a point; negative means cut away.
    #[must_use]
    pub fn signed_distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) + self.constant
    }

    /// A point lying on the plane.
    #[must_use]
    pub fn coplanar_point(&self) -> Point3<f64> {
        Point3::origin() + self.normal * -self.constant
    }

    pub fn set_from_normal_and_point(&mut self, normal: Vector3<f64>, point: &Point3<f64>) {
        let normal = normal.try_normalize(1e-12).unwrap_or_else(Vector3::x);
        self.constant = -normal.dot(&point.coords);
        self.normal = normal;
    }
}

/// Gizmo interaction mode while clipping is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GizmoMode {
    #[default]
    Translate,
    Rotate,
}

/// The translucent control plane the gizmo drags around.
#[derive(Debug, Clone)]
pub struct ClipControl {
    pub position: Point3<f64>,
    /// XYZ Euler rotation; the plane normal is the rotated +z axis.
    pub rotation: Vector3<f64>,
    pub size: f64,
    pub visible: bool,
}

impl Default for ClipControl {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            rotation: Vector3::zeros(),
            size: 1.0,
            visible: false,
        }
    }
}

impl ClipControl {
    /// The world normal implied by the control pose.
    #[must_use]
    pub fn normal(&self) -> Vector3<f64> {
        let rotation = Rotation3::from_axis_angle(&Vector3::x_axis(), self.rotation.x)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), self.rotation.y)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), self.rotation.z);
        rotation * Vector3::z()
    }
}

/// Pose of the stencil fill plane, recomputed every frame from the
/// current clip plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipFill {
    pub position: Point3<f64>,
    /// The fill faces against the clip normal so it shades the cut.
    pub facing: Vector3<f64>,
    pub size: f64,
}

/// Full clip-editing state.
#[derive(Debug, Clone, Default)]
pub struct ClipState {
    pub settings: ClipSettings,
    pub plane: ClipPlane,
    pub gizmo: GizmoMode,
    pub control: ClipControl,
    pub fill: Option<ClipFill>,
    pub fill_size: f64,
}

impl ClipState {
    /// The active plane for pick filtering, `None` while disabled.
    #[must_use]
    pub fn active_plane(&self) -> Option<&ClipPlane> {
        self.settings.enabled.then_some(&self.plane)
    }

    /// Toggle between translate and rotate gizmo modes. No-op while
    /// clipping is disabled.
    pub fn toggle_gizmo(&mut self) {
        if !self.settings.enabled {
            return;
        }
        self.gizmo = match self.gizmo {
            GizmoMode::Translate => GizmoMode::Rotate,
            GizmoMode::Rotate => GizmoMode::Translate,
        };
    }

    /// Apply new shared settings, syncing control visibility.
    pub fn apply_settings(&mut self, settings: ClipSettings) {
        self.settings = settings;
        self.control.visible = settings.enabled && settings.show_clip_plane;
        if !settings.enabled {
            self.gizmo = GizmoMode::Translate;
            self.fill = None;
        }
    }

    /// Move the control plane (gizmo drag) and re-derive the clip plane
    /// from its pose.
    pub fn set_control_pose(&mut self, position: Point3<f64>, rotation: Vector3<f64>) {
        self.control.position = position;
        self.control.rotation = rotation;
        let normal = self.control.normal();
        self.plane.set_from_normal_and_point(normal, &position);
    }

    /// Re-pose the fill plane onto the clip plane; called every frame
    /// while clipping is enabled.
    pub fn update_fill(&mut self) {
        if !self.settings.enabled {
            self.fill = None;
            return;
        }
        self.fill = Some(ClipFill {
            position: self.plane.coplanar_point(),
            facing: -self.plane.normal,
            size: self.fill_size,
        });
    }
}
