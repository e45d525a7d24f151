//! Document model — the typed façade over the shared document, the
//! presence channel, and the worker link.
//!
//! DESIGN
//! ======
//! The model owns the shared document for its process lifetime and is
//! the only place the rest of the application touches presence writes.
//! Each `sync_*` helper writes exactly one presence field and carries an
//! emitter tag so a component can tell its own echoed update from a
//! genuinely remote one.
//!
//! The model also owns at most one lazily-attached worker link per
//! document. Disposing the model drops the response receiver, so no
//! worker response can reach a torn-down consumer, and sends a
//! `CLOSE_FILE` for whatever file was loaded.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::content::{DocContent, LoadError};
use crate::object::CadObject;
use crate::presence::{
    CameraPose, ClientId, ClientState, Pointer, PresenceHandle, PresenceHub, PresenceSnapshot,
    PropFieldSelection, SelectionEntry, UserIdentity,
};
use crate::protocol::{MainMessage, WorkerAction, WorkerLink, WorkerMessage};
use crate::shared::{DocChange, DocUpdate, SharedDoc};

/// Host UI theme. The palette maps CSS custom-property names to color
/// strings so presence colors written as `var(--x)` can be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Theme {
    pub light: bool,
    pub palette: HashMap<String, String>,
}

/// The document model.
pub struct DocModel {
    id: Uuid,
    client: ClientId,
    shared: SharedDoc,
    presence: Option<PresenceHandle>,
    worker: Option<mpsc::UnboundedSender<WorkerMessage>>,
    worker_responses: Option<mpsc::UnboundedReceiver<MainMessage>>,
    theme: Theme,
    theme_subs: Vec<mpsc::UnboundedSender<Theme>>,
    file_name: Option<String>,
    dirty: bool,
    read_only: bool,
    disposed: bool,
}

impl DocModel {
    /// Create a model connected to the given presence hub.
    #[must_use]
    pub fn new(hub: &PresenceHub, user: UserIdentity) -> Self {
        let presence = hub.connect(user);
        let client = presence.client_id();
        Self {
            id: Uuid::new_v4(),
            client,
            shared: SharedDoc::new(client),
            presence: Some(presence),
            worker: None,
            worker_responses: None,
            theme: Theme::default(),
            theme_subs: Vec::new(),
            file_name: None,
            dirty: false,
            read_only: false,
            disposed: false,
        }
    }

    /// Stable id of this model instance, used as the default emitter tag
    /// and as the worker routing id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Numeric presence client id of this document's user.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.client
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    #[must_use]
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    // --- Shared document access ---

    #[must_use]
    pub fn shared(&self) -> &SharedDoc {
        &self.shared
    }

    pub fn shared_mut(&mut self) -> &mut SharedDoc {
        self.dirty = true;
        &mut self.shared
    }

    /// Subscribe to shared-document change events.
    pub fn subscribe_shared(&mut self) -> mpsc::UnboundedReceiver<DocChange> {
        self.shared.subscribe()
    }

    /// Subscribe to the replication feed for the host's provider.
    pub fn subscribe_updates(&mut self) -> mpsc::UnboundedReceiver<DocUpdate> {
        self.shared.subscribe_updates()
    }

    /// Subscribe to presence snapshots.
    pub fn subscribe_presence(&mut self) -> mpsc::UnboundedReceiver<PresenceSnapshot> {
        match &self.presence {
            Some(handle) => handle.subscribe(),
            None => mpsc::unbounded_channel().1,
        }
    }

    /// Subscribe to host theme changes.
    pub fn subscribe_theme(&mut self) -> mpsc::UnboundedReceiver<Theme> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.theme.clone());
        self.theme_subs.push(tx);
        rx
    }

    #[must_use]
    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    /// Push a host theme change to subscribers.
    pub fn set_theme(&mut self, theme: Theme) {
        if self.theme == theme {
            return;
        }
        self.theme = theme;
        let theme = self.theme.clone();
        self.theme_subs.retain(|tx| tx.send(theme.clone()).is_ok());
    }

    // --- Content interchange ---

    #[must_use]
    pub fn get_content(&self) -> DocContent {
        DocContent { objects: self.shared.objects(), options: self.shared.options() }
    }

    #[must_use]
    pub fn get_all_objects(&self) -> Vec<CadObject> {
        self.shared.objects()
    }

    /// Serialize the current content to JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        self.get_content().to_json_string()
    }

    /// Load document content from its JSON interchange form. Validation
    /// failure rejects the document outright; nothing is loaded.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the payload does not match the content
    /// schema.
    pub fn from_json(&mut self, data: &str) -> Result<(), LoadError> {
        let content = DocContent::from_str(data)?;
        self.shared.transact(|doc| {
            doc.add_objects(content.objects);
            doc.set_options(content.options);
        });
        Ok(())
    }

    // --- Presence writes ---

    #[must_use]
    pub fn local_state(&self) -> Option<ClientState> {
        self.presence.as_ref().and_then(PresenceHandle::local_state)
    }

    /// Broadcast the local 3D pointer, or retract it with `None`.
    pub fn sync_pointer(&self, pointer: Option<Pointer>, emitter: Option<Uuid>) {
        if let Some(handle) = &self.presence {
            handle.set_pointer(pointer, emitter);
        }
    }

    /// Broadcast the local camera pose.
    pub fn sync_camera(&self, camera: Option<CameraPose>, emitter: Option<Uuid>) {
        if let Some(handle) = &self.presence {
            handle.set_camera(camera, emitter);
        }
    }

    /// Broadcast the local selection map.
    pub fn sync_selected(
        &self,
        selected: Option<HashMap<String, SelectionEntry>>,
        emitter: Option<Uuid>,
    ) {
        if let Some(handle) = &self.presence {
            handle.set_selected(selected, emitter);
        }
    }

    /// Broadcast which property form field has focus.
    pub fn sync_selected_prop_field(&self, field: Option<PropFieldSelection>) {
        if let Some(handle) = &self.presence {
            handle.set_selected_prop_field(field);
        }
    }

    /// Enter or leave follow mode by naming the followed client.
    pub fn set_following(&self, client: Option<ClientId>) {
        if let Some(handle) = &self.presence {
            handle.set_following(client);
        }
    }

    // --- Metadata helpers ---

    pub fn add_metadata(&mut self, key: &str, value: &str) {
        self.shared.set_metadata(key, value);
    }

    pub fn remove_metadata(&mut self, key: &str) {
        self.shared.remove_metadata(key);
    }

    // --- Worker link ---

    /// The worker request sender, attaching `init`'s link on first call.
    /// Repeated calls return the same sender: at most one live worker
    /// link per document.
    pub fn worker(
        &mut self,
        init: impl FnOnce() -> WorkerLink,
    ) -> Option<mpsc::UnboundedSender<WorkerMessage>> {
        if self.disposed {
            return None;
        }
        if self.worker.is_none() {
            let link = init();
            let register = WorkerMessage {
                id: self.id,
                action: WorkerAction::Register { id: self.id },
            };
            let _ = link.requests.send(register);
            self.worker = Some(link.requests);
            self.worker_responses = Some(link.responses);
        }
        self.worker.clone()
    }

    /// Take the response receiver for the consumer that drains worker
    /// payloads. Yields once; the scene holds it afterwards.
    pub fn take_worker_responses(&mut self) -> Option<mpsc::UnboundedReceiver<MainMessage>> {
        self.worker_responses.take()
    }

    /// Submit the current object list for (re)computation under the
    /// given file name. Returns whether a request went out.
    pub fn request_shapes(&mut self, file_name: &str) -> bool {
        if self.disposed {
            return false;
        }
        let content = self.get_content();
        let Some(worker) = &self.worker else {
            return false;
        };
        let msg = WorkerMessage {
            id: self.id,
            action: WorkerAction::LoadFile { file_name: file_name.to_string(), content },
        };
        let sent = worker.send(msg).is_ok();
        if sent {
            self.file_name = Some(file_name.to_string());
        }
        sent
    }

    /// Submit exported raw geometry for post-processing.
    pub fn send_raw_geometry(
        &self,
        inputs: HashMap<String, crate::protocol::PostInput>,
    ) -> bool {
        if self.disposed {
            return false;
        }
        let Some(worker) = &self.worker else {
            return false;
        };
        worker
            .send(WorkerMessage { id: self.id, action: WorkerAction::PostProcess { inputs } })
            .is_ok()
    }

    // --- Lifecycle ---

    /// Tear the model down. Pending worker responses are discarded, the
    /// loaded file is closed, and the presence record disappears.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let (Some(worker), Some(file_name)) = (&self.worker, &self.file_name) {
            let _ = worker.send(WorkerMessage {
                id: self.id,
                action: WorkerAction::CloseFile { file_name: file_name.clone() },
            });
        }
        self.worker = None;
        self.worker_responses = None;
        self.presence = None;
        self.theme_subs.clear();
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
