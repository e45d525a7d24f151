//! Binary mesh interchange payload.
//!
//! Exported per object group on demand for post-processing operator
//! consumption: flat vertex/normal buffers, triangle indices, and a
//! material color. Serde carries the typed model inside protocol
//! messages; prost produces the compact binary form that actually
//! crosses the worker boundary.

use prost::Message;

/// Error returned by [`decode_mesh`].
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The raw bytes could not be decoded as a mesh payload.
    #[error("failed to decode mesh payload: {0}")]
    Decode(#[from] prost::DecodeError),
    /// Buffer lengths are inconsistent (positions not a multiple of 3,
    /// or an index out of range).
    #[error("malformed mesh payload: {0}")]
    Malformed(String),
}

/// One exported mesh: positions/normals as flat xyz triples, triangle
/// indices into them, and an rgb material color in `0..=1`.
#[derive(Clone, PartialEq, Message)]
pub struct MeshPayload {
    #[prost(float, repeated, tag = "1")]
    pub positions: Vec<f32>,
    #[prost(float, repeated, tag = "2")]
    pub normals: Vec<f32>,
    #[prost(uint32, repeated, tag = "3")]
    pub indices: Vec<u32>,
    #[prost(float, repeated, tag = "4")]
    pub color: Vec<f32>,
}

/// Encode a mesh payload into bytes.
#[must_use]
pub fn encode_mesh(mesh: &MeshPayload) -> Vec<u8> {
    let mut out = Vec::with_capacity(mesh.encoded_len());
    // Encoding into a growable Vec is infallible.
    mesh.encode(&mut out).unwrap_or_default();
    out
}

/// Decode bytes into a mesh payload and sanity-check the buffers.
///
/// # Errors
///
/// Returns [`MeshError::Decode`] for malformed bytes and
/// [`MeshError::Malformed`] for inconsistent buffer shapes.
pub fn decode_mesh(bytes: &[u8]) -> Result<MeshPayload, MeshError> {
    let mesh = MeshPayload::decode(bytes)?;
    if mesh.positions.len() % 3 != 0 {
        return Err(MeshError::Malformed(format!(
            "position buffer length {} is not a multiple of 3",
            mesh.positions.len()
        )));
    }
    let vertex_count = (mesh.positions.len() / 3) as u32;
    if let Some(bad) = mesh.indices.iter().find(|i| **i >= vertex_count) {
        return Err(MeshError::Malformed(format!(
            "index {bad} out of range for {vertex_count} vertices"
        )));
    }
    Ok(mesh)
}
