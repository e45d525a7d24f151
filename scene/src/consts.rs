//! Shared numeric constants for the scene crate.

// ── Styling ─────────────────────────────────────────────────────

/// Edge line width for unselected meshes.
pub const DEFAULT_LINEWIDTH: f64 = 1.0;

/// Edge line width applied to selected meshes.
pub const SELECTED_LINEWIDTH: f64 = 2.0;

/// Theme variable for the default surface color.
pub const DEFAULT_MESH_COLOR_CSS: &str = "var(--cadboard-mesh-color)";

/// Theme variable for the default edge color.
pub const DEFAULT_EDGE_COLOR_CSS: &str = "var(--cadboard-edge-color)";

/// Theme variable for the selection highlight color.
pub const SELECTED_MESH_COLOR_CSS: &str = "var(--cadboard-selected-color)";

// ── Timing ──────────────────────────────────────────────────────

/// Minimum interval between outgoing pointer/camera presence
/// broadcasts, in milliseconds. Local feedback is never throttled.
pub const BROADCAST_INTERVAL_MS: u64 = 100;

/// How long the worker must stay busy before the spinner shows, in
/// milliseconds. Fast recomputations never flicker it.
pub const BUSY_GRACE_MS: u64 = 250;

// ── Scale derivation ────────────────────────────────────────────

/// Reference length = largest bounding-box dimension divided by this.
pub const REF_LENGTH_DIVISOR: f64 = 5.0;

/// Reference length of an empty scene.
pub const EMPTY_REF_LENGTH: f64 = 1.0;

/// Initial camera distance, in reference lengths per axis.
pub const CAMERA_DISTANCE_FACTOR: f64 = 10.0;

/// Camera far plane, in reference lengths.
pub const CAMERA_FAR_FACTOR: f64 = 200.0;

/// Side length of the clip-plane meshes, in reference lengths.
pub const CLIP_PLANE_SIZE_FACTOR: f64 = 10.0;

/// Collaborator pointer radius, as a fraction of the reference length.
pub const POINTER_RADIUS_FACTOR: f64 = 0.1;

/// Edge pick tolerance, as a fraction of the reference length.
pub const EDGE_PICK_TOLERANCE_FACTOR: f64 = 0.05;
