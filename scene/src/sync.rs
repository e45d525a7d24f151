//! The scene synchronizer.
//!
//! ARCHITECTURE
//! ============
//! `SceneSync` is the render core: it consumes document change events,
//! presence snapshots, and worker payloads, and maintains the derived
//! scene — the mesh-entity arena, selection styling, exploded-view
//! offsets, clip plane, collaborator pointers, and annotation overlays.
//! User interaction (pick, click) flows back out as document-model
//! mutations and presence broadcasts.
//!
//! Everything runs on one cooperative loop: the host calls [`SceneSync::tick`]
//! once per frame, which drains the pending event queues with
//! `try_recv` — worker responses never race frame code, they just wait
//! for the next tick.
//!
//! ERROR HANDLING
//! ==============
//! A tick after dispose is a hard error so the host's frame loop stops
//! instead of rendering a torn-down scene. Everything else is defensive:
//! stale worker payloads, unknown objects, and malformed option values
//! are logged and ignored.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use nalgebra::{Point3, Vector3};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use doc::model::{DocModel, Theme};
use doc::object::CadObject;
use doc::presence::{
    ClientId, Pointer, PresenceSnapshot, SelectionEntry, SelectionKind, UserIdentity,
};
use doc::protocol::{MainMessage, PostInput, PostShape, ShapeData, WorkerLink};
use doc::shared::{ChangeAction, DocChange, KeyChange};
use worker::mesh::{MeshPayload, encode_mesh};
use worker::stl;

use crate::annotation::{ANNOTATION_PREFIX, Annotation, SceneAnnotation, annotation_key};
use crate::camera::{Camera, ProjectionKind, Viewport};
use crate::clip::{ClipSettings, ClipState};
use crate::color::{self, Color};
use crate::consts::{
    BROADCAST_INTERVAL_MS, BUSY_GRACE_MS, CAMERA_DISTANCE_FACTOR, CAMERA_FAR_FACTOR,
    CLIP_PLANE_SIZE_FACTOR, DEFAULT_EDGE_COLOR_CSS, DEFAULT_LINEWIDTH, DEFAULT_MESH_COLOR_CSS,
    EDGE_PICK_TOLERANCE_FACTOR, POINTER_RADIUS_FACTOR, SELECTED_LINEWIDTH,
    SELECTED_MESH_COLOR_CSS,
};
use crate::exploded::{ExplodedLine, ExplodedView, compute_exploded_state};
use crate::mesh::{
    Aabb, EntityStyle, SceneArena, SceneColors, base_color, build_entity, build_post_entity,
    effective_visibility, reference_length,
};
use crate::pick::{PickHit, pick};

// =============================================================================
// TYPES
// =============================================================================

/// Session lifecycle: `Loading` until the first shape payload lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Ready,
}

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// The frame loop must stop; the synchronizer was torn down.
    #[error("scene synchronizer is disposed")]
    Disposed,
}

/// Marker mesh for one remote collaborator's pointer.
#[derive(Debug, Clone, PartialEq)]
pub struct PointerMarker {
    pub position: Point3<f64>,
    pub color: Color,
    pub radius: f64,
    pub visible: bool,
}

/// The local client's own 3D pointer (never broadcast-delayed).
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPointer {
    pub parent: String,
    pub position: Point3<f64>,
}

/// The shared `axes` option.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AxesHelper {
    pub visible: bool,
    #[serde(default = "default_axes_size")]
    pub size: f64,
}

fn default_axes_size() -> f64 {
    5.0
}

/// The shared `cameraSettings` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
struct CameraSettings {
    #[serde(rename = "type")]
    kind: ProjectionKind,
}

// =============================================================================
// SCENE SYNC
// =============================================================================

pub struct SceneSync {
    /// Component id used as the emitter tag on presence writes.
    id: Uuid,
    model: DocModel,
    file_name: String,

    doc_events: mpsc::UnboundedReceiver<DocChange>,
    presence_events: mpsc::UnboundedReceiver<PresenceSnapshot>,
    theme_events: mpsc::UnboundedReceiver<Theme>,
    worker_events: Option<mpsc::UnboundedReceiver<MainMessage>>,

    arena: SceneArena,
    bounds: Aabb,
    ref_length: f64,
    colors: SceneColors,
    theme: Theme,

    selected: Vec<String>,
    exploded: ExplodedView,
    exploded_lines: Vec<ExplodedLine>,
    clip: ClipState,
    axes: Option<AxesHelper>,

    camera: Camera,
    camera_initialized: bool,
    viewport: Viewport,

    pointers: HashMap<ClientId, PointerMarker>,
    local_pointer: Option<LocalPointer>,
    pointer_ndc: (f64, f64),
    pointer_throttle: crate::throttle::Throttle,
    camera_throttle: crate::throttle::Throttle,
    camera_snapshot: Option<doc::presence::CameraPose>,
    remote_user: Option<UserIdentity>,

    annotations: HashMap<String, SceneAnnotation>,
    first_load: bool,

    state: SessionState,
    busy: bool,
    busy_deadline: Option<Instant>,
    loading: bool,
    disposed: bool,
}

impl SceneSync {
    /// Wire a synchronizer to a document model and a worker link. The
    /// worker handshake is sent immediately; the first shape request
    /// goes out when the worker reports itself initialized.
    #[must_use]
    pub fn new(mut model: DocModel, file_name: &str, link: WorkerLink) -> Self {
        let doc_events = model.subscribe_shared();
        let presence_events = model.subscribe_presence();
        let theme_events = model.subscribe_theme();
        model.worker(|| link);
        let worker_events = model.take_worker_responses();
        let theme = model.theme().clone();
        let colors = resolve_colors(&theme);
        let broadcast = Duration::from_millis(BROADCAST_INTERVAL_MS);

        Self {
            id: Uuid::new_v4(),
            model,
            file_name: file_name.to_string(),
            doc_events,
            presence_events,
            theme_events,
            worker_events,
            arena: SceneArena::new(),
            bounds: Aabb::empty(),
            ref_length: reference_length(&Aabb::empty()),
            colors,
            theme,
            selected: Vec::new(),
            exploded: ExplodedView::default(),
            exploded_lines: Vec::new(),
            clip: ClipState::default(),
            axes: None,
            camera: Camera::default(),
            camera_initialized: false,
            viewport: Viewport { width: 500.0, height: 500.0 },
            pointers: HashMap::new(),
            local_pointer: None,
            pointer_ndc: (0.0, 0.0),
            pointer_throttle: crate::throttle::Throttle::new(broadcast),
            camera_throttle: crate::throttle::Throttle::new(broadcast),
            camera_snapshot: None,
            remote_user: None,
            annotations: HashMap::new(),
            first_load: true,
            state: SessionState::Loading,
            busy: false,
            busy_deadline: None,
            loading: true,
            disposed: false,
        }
    }

    // --- Frame loop ---

    /// Advance one frame: drain pending events, settle the busy
    /// indicator, and refresh per-frame derived state.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Disposed`] after [`SceneSync::dispose`];
    /// the host loop must stop.
    pub fn tick(&mut self, now: Instant) -> Result<(), SceneError> {
        if self.disposed {
            return Err(SceneError::Disposed);
        }
        while let Ok(theme) = self.theme_events.try_recv() {
            self.apply_theme(theme);
        }
        while let Ok(change) = self.doc_events.try_recv() {
            self.handle_doc_change(&change, now);
        }
        while let Ok(snapshot) = self.presence_events.try_recv() {
            self.handle_presence(&snapshot);
        }
        let mut pending = Vec::new();
        if let Some(rx) = self.worker_events.as_mut() {
            while let Ok(msg) = rx.try_recv() {
                pending.push(msg);
            }
        }
        for msg in pending {
            self.handle_worker(msg, now);
        }

        // Show the spinner only if the worker stayed busy past the grace
        // period.
        if self.busy && !self.loading {
            if let Some(deadline) = self.busy_deadline {
                if now >= deadline {
                    self.loading = true;
                }
            }
        }

        self.clip.update_fill();
        self.update_annotation_positions();
        Ok(())
    }

    /// Tear down: the model is disposed, pending worker responses are
    /// discarded, and the busy indicator timer is cleared.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.worker_events = None;
        self.busy = false;
        self.busy_deadline = None;
        self.loading = false;
        self.model.dispose();
    }

    // --- Input ---

    /// Pointer moved to a pixel position. Local pointer feedback is
    /// instant; the presence broadcast is throttled.
    pub fn pointer_moved(&mut self, px: (f64, f64), now: Instant) {
        if self.disposed {
            return;
        }
        self.pointer_ndc = self.viewport.to_ndc(px);
        match self.pick_at_pointer() {
            Some(hit) => {
                self.local_pointer =
                    Some(LocalPointer { parent: hit.object.clone(), position: hit.point });
                if self.pointer_throttle.ready(now) {
                    // Broadcast the unexploded position so peers anchor it
                    // to the object, not to the current display offset.
                    let mut position = hit.point;
                    if self.exploded.enabled {
                        if let Some(entity) = self.arena.get(&hit.object) {
                            position -= entity.offset;
                        }
                    }
                    self.model.sync_pointer(
                        Some(Pointer {
                            parent: hit.object,
                            position: [position.x, position.y, position.z],
                        }),
                        Some(self.id),
                    );
                }
            }
            None => {
                self.local_pointer = None;
                if self.pointer_throttle.ready(now) {
                    self.model.sync_pointer(None, Some(self.id));
                }
            }
        }
    }

    /// Click at the current pointer position. Without the modifier the
    /// pick replaces the selection (toggling off when it was already
    /// selected); with it, the pick toggles membership.
    pub fn click(&mut self, modifier: bool) {
        let Some(hit) = self.pick_at_pointer() else {
            return;
        };
        let mut names: HashSet<String> = self.selected.iter().cloned().collect();
        if modifier {
            if !names.remove(&hit.mesh_name) {
                names.insert(hit.mesh_name.clone());
            }
        } else {
            let already = names.contains(&hit.mesh_name);
            names.clear();
            if !already {
                names.insert(hit.mesh_name.clone());
            }
        }

        let mut selection = HashMap::new();
        for name in names {
            if let Some(entry) = self.selection_entry(&name) {
                selection.insert(name, entry);
            }
        }
        self.update_selected(&selection);
        self.model.sync_selected(Some(selection), Some(self.id));
    }

    /// Key press. `r` toggles the clip gizmo between translate and
    /// rotate while clipping is active.
    pub fn key_down(&mut self, key: char) {
        if key == 'r' {
            self.clip.toggle_gizmo();
        }
    }

    /// The host's camera controls moved the camera. Broadcasting is
    /// throttled and suspended entirely while following a remote client;
    /// every broadcast also snapshots the pose for unfollow restore.
    pub fn camera_changed(&mut self, now: Instant) {
        if self.disposed {
            return;
        }
        let following = self.model.local_state().and_then(|s| s.following);
        if following.is_some() {
            return;
        }
        if self.camera_throttle.ready(now) {
            let pose = self.camera.pose();
            self.camera_snapshot = Some(pose);
            self.model.sync_camera(Some(pose), Some(self.id));
        }
    }

    /// Viewport resized; annotation anchors reproject immediately.
    pub fn resize(&mut self, width: f64, height: f64) {
        self.viewport = Viewport { width, height };
        self.update_annotation_positions();
    }

    /// Follow a remote client (or stop following with `None`).
    pub fn follow(&mut self, client: Option<ClientId>) {
        self.model.set_following(client);
    }

    /// Move the clip control plane (gizmo drag).
    pub fn set_clip_control_pose(&mut self, position: Point3<f64>, rotation: Vector3<f64>) {
        if self.clip.settings.enabled {
            self.clip.set_control_pose(position, rotation);
        }
    }

    /// Drop an annotation at the current 3D pointer, anchored to the
    /// pointed-at object. No-op without a pointer.
    pub fn add_annotation(&mut self, label: &str) {
        let Some(pointer) = self.local_pointer.clone() else {
            return;
        };
        let mut position = pointer.position;
        // Store the unexploded anchor so the annotation survives view
        // mode changes.
        if self.exploded.enabled {
            if let Some(entity) = self.arena.get(&pointer.parent) {
                position -= entity.offset;
            }
        }
        let annotation = Annotation {
            label: label.to_string(),
            position: [position.x, position.y, position.z],
            contents: Vec::new(),
            parent: pointer.parent,
        };
        let key = annotation_key();
        self.model.shared_mut().set_metadata(&key, &annotation.to_metadata());
    }

    // --- Queries ---

    #[must_use]
    pub fn model(&self) -> &DocModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut DocModel {
        &mut self.model
    }

    #[must_use]
    pub fn arena(&self) -> &SceneArena {
        &self.arena
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.state
    }

    /// Whether the busy spinner is showing.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn ref_length(&self) -> f64 {
        self.ref_length
    }

    /// Aggregate bounds over visible entities, unexploded.
    #[must_use]
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    #[must_use]
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    #[must_use]
    pub fn pointers(&self) -> &HashMap<ClientId, PointerMarker> {
        &self.pointers
    }

    #[must_use]
    pub fn local_pointer(&self) -> Option<&LocalPointer> {
        self.local_pointer.as_ref()
    }

    #[must_use]
    pub fn annotations(&self) -> &HashMap<String, SceneAnnotation> {
        &self.annotations
    }

    #[must_use]
    pub fn exploded_lines(&self) -> &[ExplodedLine] {
        &self.exploded_lines
    }

    #[must_use]
    pub fn clip(&self) -> &ClipState {
        &self.clip
    }

    #[must_use]
    pub fn axes(&self) -> Option<&AxesHelper> {
        self.axes.as_ref()
    }

    /// Identity of the client being followed, if any.
    #[must_use]
    pub fn remote_user(&self) -> Option<&UserIdentity> {
        self.remote_user.as_ref()
    }

    // --- Document changes ---

    fn handle_doc_change(&mut self, change: &DocChange, now: Instant) {
        let mut recompute = false;
        for object_change in &change.objects {
            match (object_change.action, object_change.key.as_deref()) {
                (ChangeAction::Update, Some("visible")) => {
                    // Visibility patches in place: no rebuild of the rest
                    // of the scene.
                    self.patch_visibility(
                        &object_change.name,
                        object_change.object.as_ref().is_none_or(|o| o.visible),
                    );
                }
                (ChangeAction::Delete, _) => {
                    self.arena.remove(&object_change.name);
                    self.exploded_lines.retain(|line| line.name != object_change.name);
                    recompute = true;
                }
                _ => recompute = true,
            }
        }
        for key_change in &change.options {
            self.apply_option(&key_change.key);
        }
        let mut saw_annotation = false;
        for key_change in &change.metadata {
            if key_change.key.starts_with(ANNOTATION_PREFIX) {
                saw_annotation = true;
                self.apply_annotation_change(key_change);
            }
        }
        if saw_annotation {
            self.first_load = false;
        }
        if recompute {
            self.request_recompute(now);
        }
    }

    fn patch_visibility(&mut self, name: &str, object_visible: bool) {
        let guidata = self.model.shared().get_option("guidata");
        let entry = guidata.as_ref().and_then(|g| g.get(name));
        let visible = effective_visibility(object_visible, entry);
        if let Some(entity) = self.arena.get_mut(name) {
            entity.visible = visible;
        }
        for line in &mut self.exploded_lines {
            if line.name == name {
                line.visible = visible;
            }
        }
    }

    fn apply_option(&mut self, key: &str) {
        match key {
            "guidata" => self.apply_guidata(),
            "axes" => {
                self.axes = self
                    .parse_option::<AxesHelper>("axes")
                    .filter(|axes| axes.visible);
            }
            "explodedView" => {
                if let Some(exploded) = self.parse_option::<ExplodedView>("explodedView") {
                    self.exploded = exploded;
                    self.setup_exploded_view();
                }
            }
            "cameraSettings" => {
                if let Some(settings) = self.parse_option::<CameraSettings>("cameraSettings") {
                    // Kind switch preserves position and up.
                    self.camera.kind = settings.kind;
                }
            }
            "clipView" => {
                if let Some(settings) = self.parse_option::<ClipSettings>("clipView") {
                    self.clip.apply_settings(settings);
                }
            }
            _ => {}
        }
    }

    fn parse_option<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.model.shared().get_option(key)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(key, error = %err, "ignoring malformed option value");
                None
            }
        }
    }

    fn apply_guidata(&mut self) {
        let Some(guidata) = self.model.shared().get_option("guidata") else {
            return;
        };
        let Some(entries) = guidata.as_object() else {
            return;
        };
        for (name, data) in entries {
            let object_visible = self
                .model
                .shared()
                .get_object_by_name(name)
                .is_none_or(|obj| obj.visible);
            let selected = self.selected.iter().any(|s| s == name);
            let colors = self.colors;
            let Some(entity) = self.arena.get_mut(name) else {
                continue;
            };
            if data.get("visibility").is_some() {
                entity.visible = effective_visibility(object_visible, Some(data));
            }
            // Selection tint wins until deselect restores the override.
            if !selected {
                entity.surface.color = base_color(Some(data), &colors);
            }
            let visible = entity.visible;
            for line in &mut self.exploded_lines {
                if line.name == *name {
                    line.visible = visible;
                }
            }
        }
    }

    // --- Presence ---

    fn handle_presence(&mut self, snapshot: &PresenceSnapshot) {
        let local = self.model.local_state();
        let following = local.as_ref().and_then(|state| state.following);

        if let Some(remote_id) = following {
            // Follow mode: camera and selection are driven remotely.
            let Some(remote) = snapshot.get(&remote_id) else {
                return;
            };
            if self.remote_user.as_ref() != Some(&remote.user) {
                self.remote_user = Some(remote.user.clone());
            }
            if let Some(selection) =
                remote.selected.as_ref().and_then(|tagged| tagged.value.clone())
            {
                self.update_selected(&selection);
            }
            if let Some(pose) = remote.camera.as_ref().and_then(|tagged| tagged.value) {
                self.camera.set_pose(&pose);
            }
        } else {
            // Unfollowing restores the last broadcast local pose.
            if self.remote_user.take().is_some() {
                if let Some(pose) = self.camera_snapshot {
                    self.camera.set_pose(&pose);
                }
            }
            if let Some(selection) = local
                .as_ref()
                .and_then(|state| state.selected.as_ref())
                .and_then(|tagged| tagged.value.clone())
            {
                self.update_selected(&selection);
            }
        }

        self.update_collaborator_pointers(snapshot);
    }

    fn update_collaborator_pointers(&mut self, snapshot: &PresenceSnapshot) {
        let own = self.model.client_id();
        for (&client_id, state) in snapshot {
            // Our own pointer is drawn on pointer move, not from echo.
            if client_id == own {
                continue;
            }
            let Some(pointer) = state.pointer.as_ref().and_then(|tagged| tagged.value.clone())
            else {
                if let Some(marker) = self.pointers.get_mut(&client_id) {
                    marker.visible = false;
                }
                continue;
            };

            let mut position =
                Point3::new(pointer.position[0], pointer.position[1], pointer.position[2]);
            // Exploded view displays the pointer at the anchor's offset.
            if self.exploded.enabled {
                if let Some(entity) = self.arena.get(&pointer.parent) {
                    position += entity.offset;
                }
            }
            let color = color::resolve(&state.user.color, &self.theme.palette);
            let radius = self.ref_length * POINTER_RADIUS_FACTOR;
            let marker = self.pointers.entry(client_id).or_insert(PointerMarker {
                position,
                color,
                radius,
                visible: true,
            });
            marker.position = position;
            marker.color = color;
            marker.radius = radius;
            marker.visible = true;
        }
        // Departed clients: retract, keeping the marker for reuse.
        for (client_id, marker) in &mut self.pointers {
            if !snapshot.contains_key(client_id) {
                marker.visible = false;
            }
        }
    }

    // --- Worker payloads ---

    fn handle_worker(&mut self, message: MainMessage, now: Instant) {
        match message {
            MainMessage::Initialized(true) => self.request_recompute(now),
            MainMessage::Initialized(false) => {
                warn!("geometry worker failed to initialize");
            }
            MainMessage::DisplayShape(response) => {
                if response.file_name != self.file_name {
                    debug!(file = %response.file_name, "ignoring payload for unknown file");
                    return;
                }
                self.rebuild_arena(response.shapes);
                self.state = SessionState::Ready;
                self.set_busy(false, now);
                if !response.post_inputs.is_empty() {
                    self.submit_post_inputs(response.post_inputs);
                }
            }
            MainMessage::PostResult(results) => {
                for (name, shape) in results {
                    self.apply_post_shape(&name, &shape);
                }
            }
        }
    }

    fn request_recompute(&mut self, now: Instant) {
        if self.model.request_shapes(&self.file_name) {
            self.set_busy(true, now);
        }
    }

    fn set_busy(&mut self, busy: bool, now: Instant) {
        if busy {
            self.busy = true;
            self.busy_deadline = Some(now + Duration::from_millis(BUSY_GRACE_MS));
        } else {
            self.busy = false;
            self.busy_deadline = None;
            self.loading = false;
        }
    }

    /// Rebuild the entity arena from a shape payload, preserving the
    /// selection by name.
    fn rebuild_arena(&mut self, shapes: HashMap<String, ShapeData>) {
        let guidata = self.model.shared().get_option("guidata");
        let previous: HashSet<String> = self.selected.drain(..).collect();
        self.arena.clear();

        for (name, data) in shapes {
            let object = self.model.shared().get_object_by_name(&name);
            let solid = object.as_ref().is_none_or(CadObject::is_solid);
            let object_visible = object.as_ref().is_none_or(|obj| obj.visible);
            let entry = guidata.as_ref().and_then(|g| g.get(&name));
            let style = EntityStyle {
                solid,
                visible: effective_visibility(object_visible, entry),
                guidata: entry,
                selected: &previous,
                colors: self.colors,
            };
            let entity = build_entity(&name, &data, &style);
            if previous.contains(&name) {
                self.selected.push(name.clone());
            }
            for edge in &entity.edges {
                if previous.contains(&edge.name) {
                    self.selected.push(edge.name.clone());
                }
            }
            self.arena.insert(entity);
        }

        self.refresh_scale();
        if !self.camera_initialized && !self.arena.is_empty() {
            self.camera_initialized = true;
            let distance = self.ref_length * CAMERA_DISTANCE_FACTOR;
            self.camera.position = Point3::new(distance, distance, distance);
            self.camera.far = self.ref_length * CAMERA_FAR_FACTOR;
            self.camera.look_at(&Point3::origin());
        }
        self.setup_exploded_view();
    }

    /// Recompute bounds, the reference length, and everything sized by
    /// it. Runs on every rebuild since it depends on current bounds.
    fn refresh_scale(&mut self) {
        self.bounds = self.arena.visible_bounds();
        self.ref_length = reference_length(&self.bounds);
        let size = self.ref_length * CLIP_PLANE_SIZE_FACTOR;
        self.clip.fill_size = size;
        self.clip.control.size = size;
        let radius = self.ref_length * POINTER_RADIUS_FACTOR;
        for marker in self.pointers.values_mut() {
            marker.radius = radius;
        }
    }

    fn submit_post_inputs(&mut self, mut inputs: HashMap<String, PostInput>) {
        for input in inputs.values_mut() {
            let Some(source) = input
                .object
                .parameters
                .get("Object")
                .and_then(Value::as_str)
            else {
                continue;
            };
            let Some(entity) = self.arena.get(source) else {
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            let payload = MeshPayload {
                positions: entity.surface.positions.iter().map(|v| *v as f32).collect(),
                normals: entity.surface.normals.iter().map(|v| *v as f32).collect(),
                indices: entity.surface.indices.clone(),
                color: vec![
                    entity.surface.color.r as f32,
                    entity.surface.color.g as f32,
                    entity.surface.color.b as f32,
                ],
            };
            input.mesh = Some(encode_mesh(&payload));
        }
        inputs.retain(|name, input| {
            let ready = input.mesh.is_some();
            if !ready {
                debug!(name = %name, "post input has no source mesh, dropping");
            }
            ready
        });
        if !inputs.is_empty() {
            self.model.send_raw_geometry(inputs);
        }
    }

    fn apply_post_shape(&mut self, name: &str, shape: &PostShape) {
        let decoded = match shape.format {
            doc::protocol::MeshFormat::Stl => stl::decode(&shape.data),
        };
        let face = match decoded {
            Ok(face) => face,
            Err(err) => {
                warn!(name, error = %err, "discarding undecodable post result");
                return;
            }
        };
        let entity = build_post_entity(name, &face, &self.colors);
        self.arena.insert(entity);
        self.refresh_scale();
    }

    // --- Selection ---

    fn selection_entry(&self, mesh_name: &str) -> Option<SelectionEntry> {
        let owner = self.arena.owner_of(mesh_name)?;
        if owner.name == mesh_name {
            Some(SelectionEntry { kind: SelectionKind::Shape, parent: None })
        } else {
            Some(SelectionEntry { kind: SelectionKind::Edge, parent: Some(owner.name.clone()) })
        }
    }

    /// Restyle the arena for a new selection map: old selections restore
    /// to their default (or explicit per-object override), new ones get
    /// the highlight color and heavier lines.
    fn update_selected(&mut self, selection: &HashMap<String, SelectionEntry>) {
        let guidata = self.model.shared().get_option("guidata");
        let previous: Vec<String> = std::mem::take(&mut self.selected);
        for name in previous {
            self.restyle_mesh(&name, false, guidata.as_ref());
        }
        for name in selection.keys() {
            if self.arena.owner_of(name).is_some() {
                self.selected.push(name.clone());
                self.restyle_mesh(name, true, guidata.as_ref());
            }
        }
    }

    fn restyle_mesh(&mut self, mesh_name: &str, selected: bool, guidata: Option<&Value>) {
        let colors = self.colors;
        if let Some(entity) = self.arena.get_mut(mesh_name) {
            entity.surface.color = if selected {
                colors.selected
            } else {
                base_color(guidata.and_then(|g| g.get(mesh_name)), &colors)
            };
            return;
        }
        let Some(owner) = mesh_name
            .strip_prefix("edge-")
            .and_then(|rest| rest.split_once('-'))
            .map(|(_, object)| object.to_string())
        else {
            return;
        };
        let Some(entity) = self.arena.get_mut(&owner) else {
            return;
        };
        if let Some(edge) = entity.edges.iter_mut().find(|edge| edge.name == mesh_name) {
            edge.color = if selected { colors.selected } else { colors.edge };
            edge.linewidth = if selected { SELECTED_LINEWIDTH } else { DEFAULT_LINEWIDTH };
        }
    }

    // --- Exploded view ---

    fn setup_exploded_view(&mut self) {
        if self.exploded.enabled {
            let center = self.arena.visible_bounds().center();
            let factor = self.exploded.factor;
            let mut lines = Vec::with_capacity(self.arena.len());
            for entity in self.arena.iter_mut() {
                let state = compute_exploded_state(&entity.center(), &center, factor);
                entity.offset = state.offset();
                lines.push(ExplodedLine {
                    name: entity.name.clone(),
                    from: state.old_center,
                    to: state.new_center,
                    visible: entity.visible,
                });
            }
            self.exploded_lines = lines;
        } else {
            for entity in self.arena.iter_mut() {
                entity.offset = Vector3::zeros();
            }
            self.exploded_lines.clear();
        }
    }

    // --- Picking ---

    fn pick_at_pointer(&self) -> Option<PickHit> {
        if self.arena.is_empty() {
            return None;
        }
        let ray = self.camera.ray_through(self.pointer_ndc, &self.viewport);
        pick(
            &ray,
            &self.arena,
            self.clip.active_plane(),
            self.ref_length * EDGE_PICK_TOLERANCE_FACTOR,
        )
    }

    // --- Annotations ---

    fn apply_annotation_change(&mut self, change: &KeyChange) {
        match change.action {
            ChangeAction::Delete => {
                self.annotations.remove(&change.key);
            }
            ChangeAction::Add | ChangeAction::Update => {
                let Some(data) = self.model.shared().get_metadata(&change.key) else {
                    return;
                };
                let Some(annotation) = Annotation::from_metadata(&data) else {
                    warn!(key = %change.key, "skipping undecodable annotation");
                    return;
                };
                if let Some(existing) = self.annotations.get_mut(&change.key) {
                    existing.annotation = annotation;
                } else {
                    // First-ever load opens annotations collapsed.
                    let open = !self.first_load;
                    self.annotations.insert(
                        change.key.clone(),
                        SceneAnnotation { annotation, open, screen: None },
                    );
                }
            }
        }
    }

    fn update_annotation_positions(&mut self) {
        let viewport = self.viewport;
        let exploded = self.exploded.enabled;
        for entry in self.annotations.values_mut() {
            let p = entry.annotation.position;
            let mut position = Point3::new(p[0], p[1], p[2]);
            if exploded {
                if let Some(entity) = self.arena.get(&entry.annotation.parent) {
                    position += entity.offset;
                }
            }
            entry.screen = self.camera.project(&position, &viewport);
        }
    }

    // --- Theme ---

    fn apply_theme(&mut self, theme: Theme) {
        self.theme = theme;
        self.colors = resolve_colors(&self.theme);
        // Restyle defaults in place; selections keep their highlight.
        let guidata = self.model.shared().get_option("guidata");
        let names: Vec<String> = self.arena.iter().map(|e| e.name.clone()).collect();
        for name in names {
            if !self.selected.contains(&name) {
                self.restyle_mesh(&name, false, guidata.as_ref());
            }
        }
    }
}

fn resolve_colors(theme: &Theme) -> SceneColors {
    let defaults = SceneColors::default();
    SceneColors {
        mesh: color::resolve_or(DEFAULT_MESH_COLOR_CSS, &theme.palette, defaults.mesh),
        edge: color::resolve_or(DEFAULT_EDGE_COLOR_CSS, &theme.palette, defaults.edge),
        selected: color::resolve_or(SELECTED_MESH_COLOR_CSS, &theme.palette, defaults.selected),
    }
}
