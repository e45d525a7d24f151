//! Geometry worker wire protocol.
//!
//! ARCHITECTURE
//! ============
//! All communication with the geometry engine is asynchronous message
//! passing, no shared memory. Main→worker messages carry
//! `{id, action, payload}`; worker→main messages carry
//! `{action, payload}`. Responses arrive at arbitrary later times and
//! not necessarily in request order; consumers ignore payloads for
//! files or objects they no longer know about.
//!
//! This module owns the wire representation consumed by both the
//! document model and the bridge, so neither side depends on the other's
//! internals.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::content::DocContent;
use crate::object::{CadObject, OperatorRecord};

// =============================================================================
// MAIN → WORKER
// =============================================================================

/// Request actions dispatched to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum WorkerAction {
    /// Announce a client id so responses can be routed to it.
    Register { id: Uuid },
    /// Submit a named file's full object list for (re)computation.
    LoadFile { file_name: String, content: DocContent },
    /// Forget a file; any in-flight computation for it is discarded.
    CloseFile { file_name: String },
    /// Submit exported raw geometry for operator post-processing.
    PostProcess { inputs: HashMap<String, PostInput> },
}

/// One message on the main→worker wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    /// Sending client id; responses are routed back to it.
    pub id: Uuid,
    #[serde(flatten)]
    pub action: WorkerAction,
}

// =============================================================================
// WORKER → MAIN
// =============================================================================

/// Response actions pushed back to the main side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MainMessage {
    /// Tessellated geometry for every object of a file.
    DisplayShape(ShapeResponse),
    /// Worker start-up handshake.
    Initialized(bool),
    /// Post-processing results, object name → exported mesh.
    PostResult(HashMap<String, PostShape>),
}

/// Payload of [`MainMessage::DisplayShape`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeResponse {
    pub file_name: String,
    /// Object name → tessellated buffers.
    pub shapes: HashMap<String, ShapeData>,
    /// Objects whose operator chain needs an exported mesh from the
    /// scene before the worker can post-process them.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub post_inputs: HashMap<String, PostInput>,
}

/// Tessellated geometry for one object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeData {
    pub faces: Vec<FaceMesh>,
    pub edges: Vec<EdgePolyline>,
}

/// One triangulated face: flat xyz position/normal triples plus triangle
/// indices into them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceMesh {
    pub vertex_coords: Vec<f64>,
    pub normal_coords: Vec<f64>,
    pub tri_indexes: Vec<u32>,
}

/// One edge polyline: flat xyz triples along the curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgePolyline {
    pub vertex_coords: Vec<f64>,
}

/// Input to a post-processing operator. The `mesh` is the binary mesh
/// interchange payload exported per object group by the scene; the
/// worker's initial response leaves it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostInput {
    pub object: CadObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<Vec<u8>>,
}

/// Supported mesh export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MeshFormat {
    Stl,
}

/// One post-processing result: an exported mesh plus the operator that
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostShape {
    pub format: MeshFormat,
    pub binary: bool,
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<OperatorRecord>,
}

// =============================================================================
// LINK
// =============================================================================

/// One document's channel pair into the bridge: a request sender plus a
/// private response receiver. Dropping the receiver guarantees no
/// response is ever delivered to a torn-down consumer.
#[derive(Debug)]
pub struct WorkerLink {
    pub requests: mpsc::UnboundedSender<WorkerMessage>,
    pub responses: mpsc::UnboundedReceiver<MainMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_message_wire_shape() {
        let msg = WorkerMessage {
            id: Uuid::nil(),
            action: WorkerAction::CloseFile { file_name: "part.cad".into() },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "CLOSE_FILE");
        assert_eq!(json["payload"]["fileName"], "part.cad");
        assert!(json.get("id").is_some());
    }

    #[test]
    fn load_file_round_trip() {
        let msg = WorkerMessage {
            id: Uuid::new_v4(),
            action: WorkerAction::LoadFile {
                file_name: "part.cad".into(),
                content: DocContent::default(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        let restored: WorkerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, msg);
    }

    #[test]
    fn main_message_wire_shape() {
        let json = serde_json::to_value(MainMessage::Initialized(true)).unwrap();
        assert_eq!(json["action"], "INITIALIZED");
        assert_eq!(json["payload"], true);

        let resp = MainMessage::DisplayShape(ShapeResponse {
            file_name: "part.cad".into(),
            shapes: HashMap::new(),
            post_inputs: HashMap::new(),
        });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["action"], "DISPLAY_SHAPE");
        assert_eq!(json["payload"]["fileName"], "part.cad");
    }

    #[test]
    fn face_mesh_field_names() {
        let face = FaceMesh {
            vertex_coords: vec![0.0, 0.0, 0.0],
            normal_coords: vec![0.0, 0.0, 1.0],
            tri_indexes: vec![0],
        };
        let json = serde_json::to_value(&face).unwrap();
        assert!(json.get("vertexCoords").is_some());
        assert!(json.get("triIndexes").is_some());
    }
}
