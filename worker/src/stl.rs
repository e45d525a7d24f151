//! STL decode/encode for post-processing results.
//!
//! Post-processed meshes cross the worker boundary as STL, binary or
//! ASCII. Decoding produces the same flat-buffer face shape the rest of
//! the pipeline consumes; triangles are kept unindexed (three fresh
//! vertices each), which is what STL stores anyway.

use doc::protocol::FaceMesh;

/// Fixed binary STL record sizes: 80-byte header, u32 triangle count,
/// 50 bytes per triangle (normal + 3 vertices + attribute word).
const HEADER_LEN: usize = 80;
const TRIANGLE_LEN: usize = 50;

/// Errors raised while decoding an STL payload.
#[derive(Debug, thiserror::Error)]
pub enum StlError {
    #[error("truncated STL payload: {0} bytes")]
    Truncated(usize),
    #[error("triangle count mismatch: header says {expected}, payload holds {actual}")]
    CountMismatch { expected: u32, actual: usize },
    #[error("malformed ASCII STL at line {0}")]
    Ascii(usize),
}

/// Decode a binary or ASCII STL payload into a face mesh.
///
/// # Errors
///
/// Returns an [`StlError`] when the payload is truncated or malformed.
pub fn decode(bytes: &[u8]) -> Result<FaceMesh, StlError> {
    if is_binary(bytes) {
        decode_binary(bytes)
    } else {
        decode_ascii(bytes)
    }
}

/// Encode triangle buffers as binary STL. Facet normals are recomputed
/// from the winding.
#[must_use]
pub fn encode(positions: &[f32], indices: &[u32]) -> Vec<u8> {
    let tri_count = indices.len() / 3;
    let mut out = Vec::with_capacity(HEADER_LEN + 4 + tri_count * TRIANGLE_LEN);

    let mut header = [0_u8; HEADER_LEN];
    let tag = b"binary mesh export";
    header[..tag.len()].copy_from_slice(tag);
    out.extend_from_slice(&header);
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(tri_count as u32).to_le_bytes());

    for tri in indices.chunks_exact(3) {
        let v: Vec<[f32; 3]> = tri
            .iter()
            .map(|i| {
                let at = *i as usize * 3;
                [
                    positions.get(at).copied().unwrap_or(0.0),
                    positions.get(at + 1).copied().unwrap_or(0.0),
                    positions.get(at + 2).copied().unwrap_or(0.0),
                ]
            })
            .collect();
        let normal = facet_normal(v[0], v[1], v[2]);
        for c in normal {
            out.extend_from_slice(&c.to_le_bytes());
        }
        for vert in &v {
            for c in vert {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out.extend_from_slice(&0_u16.to_le_bytes());
    }
    out
}

fn facet_normal(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> [f32; 3] {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len > 0.0 {
        [n[0] / len, n[1] / len, n[2] / len]
    } else {
        [0.0, 0.0, 0.0]
    }
}

/// The `solid` keyword alone does not prove ASCII — some binary
/// exporters write it into the comment header — so the record-length
/// arithmetic decides.
fn is_binary(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_LEN + 4 {
        return false;
    }
    let mut count_bytes = [0_u8; 4];
    count_bytes.copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + 4]);
    let count = u32::from_le_bytes(count_bytes) as usize;
    bytes.len() == HEADER_LEN + 4 + count * TRIANGLE_LEN
}

fn decode_binary(bytes: &[u8]) -> Result<FaceMesh, StlError> {
    if bytes.len() < HEADER_LEN + 4 {
        return Err(StlError::Truncated(bytes.len()));
    }
    let mut count_bytes = [0_u8; 4];
    count_bytes.copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + 4]);
    let expected = u32::from_le_bytes(count_bytes);
    let body = &bytes[HEADER_LEN + 4..];
    let actual = body.len() / TRIANGLE_LEN;
    if actual != expected as usize {
        return Err(StlError::CountMismatch { expected, actual });
    }

    let mut mesh = FaceMesh::default();
    for record in body.chunks_exact(TRIANGLE_LEN) {
        let normal = read_vec3(record, 0);
        for vertex in 0..3 {
            let v = read_vec3(record, 12 + vertex * 12);
            #[allow(clippy::cast_possible_truncation)]
            mesh.tri_indexes.push((mesh.vertex_coords.len() / 3) as u32);
            mesh.vertex_coords.extend_from_slice(&v);
            mesh.normal_coords.extend_from_slice(&normal);
        }
    }
    Ok(mesh)
}

fn read_vec3(record: &[u8], offset: usize) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (i, slot) in out.iter_mut().enumerate() {
        let at = offset + i * 4;
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(&record[at..at + 4]);
        *slot = f64::from(f32::from_le_bytes(raw));
    }
    out
}

fn decode_ascii(bytes: &[u8]) -> Result<FaceMesh, StlError> {
    let text = std::str::from_utf8(bytes).map_err(|_| StlError::Truncated(bytes.len()))?;
    let mut mesh = FaceMesh::default();
    let mut normal = [0.0_f64; 3];

    for (line_no, line) in text.lines().enumerate() {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("facet") => {
                // facet normal nx ny nz
                let _ = words.next();
                normal = parse_triple(&mut words).ok_or(StlError::Ascii(line_no + 1))?;
            }
            Some("vertex") => {
                let v = parse_triple(&mut words).ok_or(StlError::Ascii(line_no + 1))?;
                #[allow(clippy::cast_possible_truncation)]
                mesh.tri_indexes.push((mesh.vertex_coords.len() / 3) as u32);
                mesh.vertex_coords.extend_from_slice(&v);
                mesh.normal_coords.extend_from_slice(&normal);
            }
            _ => {}
        }
    }
    if mesh.vertex_coords.is_empty() || mesh.tri_indexes.len() % 3 != 0 {
        return Err(StlError::Ascii(text.lines().count()));
    }
    Ok(mesh)
}

fn parse_triple<'a>(words: &mut impl Iterator<Item = &'a str>) -> Option<[f64; 3]> {
    let mut out = [0.0; 3];
    for slot in &mut out {
        *slot = words.next()?.parse().ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRI_POSITIONS: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    const TRI_INDICES: [u32; 3] = [0, 1, 2];

    #[test]
    fn binary_round_trip() {
        let bytes = encode(&TRI_POSITIONS, &TRI_INDICES);
        let mesh = decode(&bytes).unwrap();
        assert_eq!(mesh.tri_indexes.len(), 3);
        assert_eq!(mesh.vertex_coords.len(), 9);
        // Winding (0,0,0)->(1,0,0)->(0,1,0) faces +z.
        assert!((mesh.normal_coords[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ascii_decode() {
        let text = "solid demo\n\
            facet normal 0 0 1\n\
            outer loop\n\
            vertex 0 0 0\n\
            vertex 1 0 0\n\
            vertex 0 1 0\n\
            endloop\n\
            endfacet\n\
            endsolid demo\n";
        let mesh = decode(text.as_bytes()).unwrap();
        assert_eq!(mesh.tri_indexes.len(), 3);
        assert_eq!(mesh.vertex_coords[3], 1.0);
        assert_eq!(mesh.normal_coords[2], 1.0);
    }

    #[test]
    fn truncated_binary_rejected() {
        let mut bytes = encode(&TRI_POSITIONS, &TRI_INDICES);
        bytes.truncate(bytes.len() - 10);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn malformed_ascii_rejected() {
        assert!(decode(b"solid x\nvertex 1 2\nendsolid").is_err());
        assert!(decode(b"not an stl at all").is_err());
    }
}
