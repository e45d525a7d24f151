//! The worker bridge task.
//!
//! DESIGN
//! ======
//! One spawned task owns the routing state: registered clients (id →
//! response sender) and the open-file table. Each `LOAD_FILE` bumps the
//! file's generation and computes on a detached task, so responses may
//! arrive out of request order; before sending, the task re-checks the
//! generation so a file closed or reloaded mid-computation discards the
//! stale payload instead of delivering it.
//!
//! Delivery is per-client: a response goes only to the sender registered
//! for the requesting id. A dropped receiver (disposed document model)
//! makes the send fail silently — pending work is discarded, never
//! delivered to a torn-down consumer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use doc::protocol::{MainMessage, ShapeResponse, WorkerAction, WorkerLink, WorkerMessage};

use crate::engine::GeometryEngine;

enum Control {
    Attach { client: Uuid, responses: mpsc::UnboundedSender<MainMessage> },
}

/// Shared open-file table: file name → generation of the latest load.
type FileTable = Arc<Mutex<HashMap<String, u64>>>;

/// Handle to the bridge task. Dropping it aborts the task.
pub struct WorkerBridge {
    control: mpsc::UnboundedSender<Control>,
    requests: mpsc::UnboundedSender<WorkerMessage>,
    task: JoinHandle<()>,
}

impl WorkerBridge {
    /// Spawn the bridge around an engine.
    #[must_use]
    pub fn spawn(engine: Arc<dyn GeometryEngine>) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(engine, control_rx, request_rx));
        Self { control: control_tx, requests: request_tx, task }
    }

    /// Create a channel pair for a client. The returned link's receiver
    /// is private to that client id; messages sent through the link must
    /// carry the same id.
    #[must_use]
    pub fn link(&self, client: Uuid) -> WorkerLink {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let _ = self.control.send(Control::Attach { client, responses: responses_tx });
        WorkerLink { requests: self.requests.clone(), responses: responses_rx }
    }

    /// Stop the bridge, discarding all pending work.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    engine: Arc<dyn GeometryEngine>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut request_rx: mpsc::UnboundedReceiver<WorkerMessage>,
) {
    let mut clients: HashMap<Uuid, mpsc::UnboundedSender<MainMessage>> = HashMap::new();
    let files: FileTable = Arc::new(Mutex::new(HashMap::new()));

    loop {
        tokio::select! {
            // Biased: attachments are processed before any request so a
            // link's first message can never outrun its registration.
            biased;
            control = control_rx.recv() => {
                let Some(Control::Attach { client, responses }) = control else {
                    break;
                };
                clients.insert(client, responses);
            }
            request = request_rx.recv() => {
                let Some(message) = request else {
                    break;
                };
                // Prune clients whose receiver went away.
                clients.retain(|_, tx| !tx.is_closed());
                handle(&engine, &files, &clients, message);
            }
        }
    }
}

fn handle(
    engine: &Arc<dyn GeometryEngine>,
    files: &FileTable,
    clients: &HashMap<Uuid, mpsc::UnboundedSender<MainMessage>>,
    message: WorkerMessage,
) {
    let Some(responses) = clients.get(&message.id).cloned() else {
        debug!(client = %message.id, "dropping message from unregistered client");
        return;
    };

    match message.action {
        WorkerAction::Register { .. } => {
            let _ = responses.send(MainMessage::Initialized(true));
        }
        WorkerAction::LoadFile { file_name, content } => {
            let generation = {
                let mut table = lock_files(files);
                let entry = table.entry(file_name.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            let engine = Arc::clone(engine);
            let files = Arc::clone(files);
            tokio::spawn(async move {
                let computed = match engine.shape_data(&content).await {
                    Ok(computed) => computed,
                    Err(err) => {
                        warn!(file_name, error = %err, "shape computation failed");
                        return;
                    }
                };
                // Discard if the file was closed or reloaded meanwhile.
                if lock_files(&files).get(&file_name) != Some(&generation) {
                    debug!(file_name, "discarding stale shape payload");
                    return;
                }
                let _ = responses.send(MainMessage::DisplayShape(ShapeResponse {
                    file_name,
                    shapes: computed.shapes,
                    post_inputs: computed.post_inputs,
                }));
            });
        }
        WorkerAction::CloseFile { file_name } => {
            lock_files(files).remove(&file_name);
        }
        WorkerAction::PostProcess { inputs } => {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                match engine.post_process(inputs).await {
                    Ok(results) => {
                        let _ = responses.send(MainMessage::PostResult(results));
                    }
                    Err(err) => warn!(error = %err, "post-processing failed"),
                }
            });
        }
    }
}

fn lock_files(files: &FileTable) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
    // Table mutations never panic while holding the lock; recover the
    // inner state if they somehow did.
    files.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// =============================================================================
// TESTS
// =============================================================================
