//! Awareness channel — ephemeral per-client presence state.
//!
//! DESIGN
//! ======
//! Presence is purely ephemeral: camera pose, pointer, selection, and
//! follow target are broadcast to peers and forgotten on disconnect. No
//! persistence, no merge — each client is the only writer of its own
//! record, and every write replaces the field wholesale.
//!
//! The hub relays the *full* map of client records to every subscriber
//! on any change, keyed by a transport-assigned numeric client id.
//! Downstream consumers treat a missing id as "client left" and retract
//! whatever they derived from it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Transport-assigned numeric client identifier.
pub type ClientId = u64;

// =============================================================================
// WIRE SHAPES
// =============================================================================

/// Who a client is, for labeling and coloring their presence artifacts.
///
/// `color` may be a hex color, a named color, or a `var(--x)` CSS
/// custom-property reference resolved against the host theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub name: String,
    pub color: String,
}

/// A camera pose broadcast over presence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: [f64; 3],
    /// XYZ Euler angles in radians.
    pub rotation: [f64; 3],
    pub up: [f64; 3],
}

/// A 3D pointer anchored to a named object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    /// Name of the object the pointer rests on.
    pub parent: String,
    pub position: [f64; 3],
}

/// What part of an object a selection entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionKind {
    Shape,
    Edge,
}

/// Selection descriptor, keyed by mesh name in the selection map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionEntry {
    #[serde(rename = "type")]
    pub kind: SelectionKind,
    /// Owning object name when the selected mesh is an edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// A field value plus the id of the UI component that wrote it, so a
/// component can tell its own echoed update from a remote one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged<T> {
    pub value: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emitter: Option<Uuid>,
}

/// Which surface hosts a property-field selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    Panel,
    Dialog,
}

/// Cross-panel form-field selection, for mirroring focus between
/// property editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropFieldSelection {
    pub id: Option<String>,
    pub value: Value,
    #[serde(rename = "parentType")]
    pub parent_kind: PanelKind,
}

/// One client's full presence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub user: UserIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<Tagged<Pointer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<Tagged<CameraPose>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<Tagged<HashMap<String, SelectionEntry>>>,
    #[serde(
        default,
        rename = "selectedPropField",
        skip_serializing_if = "Option::is_none"
    )]
    pub selected_prop_field: Option<PropFieldSelection>,
    /// Client id this client is following, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following: Option<ClientId>,
}

impl ClientState {
    fn new(user: UserIdentity) -> Self {
        Self {
            user,
            pointer: None,
            camera: None,
            selected: None,
            selected_prop_field: None,
            following: None,
        }
    }
}

/// Full presence map fanned out on every change.
pub type PresenceSnapshot = HashMap<ClientId, ClientState>;

// =============================================================================
// HUB
// =============================================================================

struct HubInner {
    states: PresenceSnapshot,
    subs: Vec<mpsc::UnboundedSender<PresenceSnapshot>>,
}

/// In-process presence relay. The host's transport stands in the same
/// position between real peers; locally every connected handle shares
/// one hub.
#[derive(Clone)]
pub struct PresenceHub {
    inner: Arc<Mutex<HubInner>>,
}

impl PresenceHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner { states: HashMap::new(), subs: Vec::new() })),
        }
    }

    /// Connect a client: assigns a fresh numeric id, registers an empty
    /// record, and fans the updated map out.
    #[must_use]
    pub fn connect(&self, user: UserIdentity) -> PresenceHandle {
        let mut inner = self.lock();
        let mut id: ClientId = rand::random();
        while inner.states.contains_key(&id) {
            id = rand::random();
        }
        inner.states.insert(id, ClientState::new(user));
        Self::broadcast(&mut inner);
        PresenceHandle { hub: self.clone(), id }
    }

    /// Number of currently connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.lock().states.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        // A poisoned hub mutex means a panic mid-broadcast; presence is
        // rebuildable, so continue with whatever state is there.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn broadcast(inner: &mut HubInner) {
        let snapshot = inner.states.clone();
        inner.subs.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// One client's connection to the hub. Only this handle can write the
/// client's record; dropping it disconnects and removes the record.
pub struct PresenceHandle {
    hub: PresenceHub,
    id: ClientId,
}

impl PresenceHandle {
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.id
    }

    /// Subscribe to full-map snapshots. The current map is delivered
    /// immediately so a late subscriber starts consistent.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PresenceSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.hub.lock();
        let _ = tx.send(inner.states.clone());
        inner.subs.push(tx);
        rx
    }

    /// This client's own record.
    #[must_use]
    pub fn local_state(&self) -> Option<ClientState> {
        self.hub.lock().states.get(&self.id).cloned()
    }

    pub fn set_pointer(&self, value: Option<Pointer>, emitter: Option<Uuid>) {
        self.write(|state| state.pointer = Some(Tagged { value, emitter }));
    }

    pub fn set_camera(&self, value: Option<CameraPose>, emitter: Option<Uuid>) {
        self.write(|state| state.camera = Some(Tagged { value, emitter }));
    }

    pub fn set_selected(
        &self,
        value: Option<HashMap<String, SelectionEntry>>,
        emitter: Option<Uuid>,
    ) {
        self.write(|state| state.selected = Some(Tagged { value, emitter }));
    }

    pub fn set_selected_prop_field(&self, value: Option<PropFieldSelection>) {
        self.write(|state| state.selected_prop_field = value);
    }

    pub fn set_following(&self, value: Option<ClientId>) {
        self.write(|state| state.following = value);
    }

    fn write(&self, f: impl FnOnce(&mut ClientState)) {
        let mut inner = self.hub.lock();
        let Some(state) = inner.states.get_mut(&self.id) else {
            return;
        };
        f(state);
        PresenceHub::broadcast(&mut inner);
    }
}

impl Drop for PresenceHandle {
    fn drop(&mut self) {
        let mut inner = self.hub.lock();
        if inner.states.remove(&self.id).is_some() {
            PresenceHub::broadcast(&mut inner);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserIdentity {
        UserIdentity { name: name.into(), color: "steelblue".into() }
    }

    #[test]
    fn connect_assigns_unique_ids() {
        let hub = PresenceHub::new();
        let a = hub.connect(user("a"));
        let b = hub.connect(user("b"));
        assert_ne!(a.client_id(), b.client_id());
        assert_eq!(hub.client_count(), 2);
    }

    #[test]
    fn field_write_fans_out_full_map() {
        let hub = PresenceHub::new();
        let a = hub.connect(user("a"));
        let b = hub.connect(user("b"));
        let mut rx = a.subscribe();
        // Drain the initial snapshot.
        let _ = rx.try_recv();

        b.set_pointer(
            Some(Pointer { parent: "Box1".into(), position: [1.0, 2.0, 3.0] }),
            None,
        );

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.len(), 2);
        let pointer = snapshot[&b.client_id()].pointer.as_ref().unwrap();
        assert_eq!(
            pointer.value.as_ref().unwrap().position,
            [1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn field_write_replaces_wholesale() {
        let hub = PresenceHub::new();
        let a = hub.connect(user("a"));

        a.set_pointer(
            Some(Pointer { parent: "Box1".into(), position: [1.0, 0.0, 0.0] }),
            None,
        );
        a.set_pointer(None, None);

        let state = a.local_state().unwrap();
        assert!(state.pointer.unwrap().value.is_none());
    }

    #[test]
    fn disconnect_removes_record() {
        let hub = PresenceHub::new();
        let a = hub.connect(user("a"));
        let b = hub.connect(user("b"));
        let b_id = b.client_id();
        let mut rx = a.subscribe();
        let _ = rx.try_recv();

        drop(b);

        let snapshot = rx.try_recv().unwrap();
        assert!(!snapshot.contains_key(&b_id));
        assert_eq!(hub.client_count(), 1);
    }

    #[test]
    fn emitter_tag_survives_round_trip() {
        let hub = PresenceHub::new();
        let a = hub.connect(user("a"));
        let emitter = Uuid::new_v4();
        a.set_camera(
            Some(CameraPose {
                position: [8.0, 8.0, 8.0],
                rotation: [0.0, 0.0, 0.0],
                up: [0.0, 0.0, 1.0],
            }),
            Some(emitter),
        );

        let state = a.local_state().unwrap();
        assert_eq!(state.camera.unwrap().emitter, Some(emitter));
    }

    #[test]
    fn wire_shape_matches_contract() {
        let mut state = ClientState::new(user("a"));
        state.pointer = Some(Tagged {
            value: Some(Pointer { parent: "Box1".into(), position: [0.0, 1.0, 2.0] }),
            emitter: None,
        });
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("user").is_some());
        assert!(json.get("pointer").and_then(|p| p.get("value")).is_some());
        // Unset fields stay off the wire entirely.
        assert!(json.get("camera").is_none());
        assert!(json.get("following").is_none());
    }
}
