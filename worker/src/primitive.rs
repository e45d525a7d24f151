//! Built-in primitive tessellation engine.
//!
//! DESIGN
//! ======
//! A minimal `GeometryEngine` for tests and demos: boxes, spheres, and
//! cylinders with a `Position` translation parameter. Real kernels sit
//! behind the same trait in their own process; this one exists so the
//! whole pipeline can run end-to-end without one. Unsupported shape
//! kinds are skipped with a warning rather than failing the file —
//! one unknown object must not blank the rest of the scene.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use doc::content::DocContent;
use doc::object::{CadObject, ShapeKind};
use doc::protocol::{EdgePolyline, FaceMesh, MeshFormat, PostInput, PostShape, ShapeData};

use crate::engine::{ComputedShapes, EngineError, GeometryEngine};
use crate::mesh::decode_mesh;
use crate::stl;

/// Sphere tessellation resolution.
const SPHERE_STACKS: u32 = 16;
const SPHERE_SECTORS: u32 = 32;
/// Cylinder side resolution.
const CYLINDER_SECTORS: u32 = 32;

/// The built-in engine.
#[derive(Debug, Default)]
pub struct PrimitiveEngine;

impl PrimitiveEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GeometryEngine for PrimitiveEngine {
    async fn shape_data(&self, content: &DocContent) -> Result<ComputedShapes, EngineError> {
        let mut computed = ComputedShapes::default();
        for obj in &content.objects {
            match obj.shape {
                ShapeKind::Box => {
                    computed.shapes.insert(obj.name.clone(), tessellate_box(obj)?);
                }
                ShapeKind::Sphere => {
                    computed.shapes.insert(obj.name.clone(), tessellate_sphere(obj)?);
                }
                ShapeKind::Cylinder => {
                    computed.shapes.insert(obj.name.clone(), tessellate_cylinder(obj)?);
                }
                ShapeKind::Post => {
                    computed
                        .post_inputs
                        .insert(obj.name.clone(), PostInput { object: obj.clone(), mesh: None });
                }
                ShapeKind::Extrusion => {
                    warn!(name = %obj.name, "extrusions are not supported by the primitive engine");
                }
            }
        }
        Ok(computed)
    }

    async fn post_process(
        &self,
        inputs: HashMap<String, PostInput>,
    ) -> Result<HashMap<String, PostShape>, EngineError> {
        let mut results = HashMap::new();
        for (name, input) in inputs {
            let Some(bytes) = &input.mesh else {
                warn!(name, "post-processing input carries no mesh, skipping");
                continue;
            };
            let mesh = decode_mesh(bytes)?;
            let data = stl::encode(&mesh.positions, &mesh.indices);
            results.insert(
                name,
                PostShape {
                    format: MeshFormat::Stl,
                    binary: true,
                    data,
                    operator: input.object.operators.as_ref().and_then(|ops| ops.first().cloned()),
                },
            );
        }
        Ok(results)
    }
}

// =============================================================================
// PARAMETER HELPERS
// =============================================================================

fn param_f64(obj: &CadObject, key: &str, default: f64) -> f64 {
    obj.parameters.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn param_position(obj: &CadObject) -> [f64; 3] {
    let Some(Value::Array(values)) = obj.parameters.get("Position") else {
        return [0.0; 3];
    };
    let mut out = [0.0; 3];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = value.as_f64().unwrap_or(0.0);
    }
    out
}

fn positive_param(obj: &CadObject, key: &str, default: f64) -> Result<f64, EngineError> {
    let value = param_f64(obj, key, default);
    if value > 0.0 {
        Ok(value)
    } else {
        Err(EngineError::InvalidParameters {
            name: obj.name.clone(),
            reason: format!("{key} must be positive, got {value}"),
        })
    }
}

// =============================================================================
// BOX
// =============================================================================

fn tessellate_box(obj: &CadObject) -> Result<ShapeData, EngineError> {
    let l = positive_param(obj, "Length", 1.0)?;
    let w = positive_param(obj, "Width", 1.0)?;
    let h = positive_param(obj, "Height", 1.0)?;
    let [px, py, pz] = param_position(obj);

    // Corner vertices, corner of the box at the position parameter.
    let corner = |mask: [f64; 3]| [px + mask[0] * l, py + mask[1] * w, pz + mask[2] * h];
    let corners: Vec<[f64; 3]> = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
        [0.0, 1.0, 1.0],
    ]
    .into_iter()
    .map(corner)
    .collect();

    // (vertex indices, outward normal) per face, counter-clockwise from
    // outside.
    let quads: [([usize; 4], [f64; 3]); 6] = [
        ([0, 3, 2, 1], [0.0, 0.0, -1.0]),
        ([4, 5, 6, 7], [0.0, 0.0, 1.0]),
        ([0, 1, 5, 4], [0.0, -1.0, 0.0]),
        ([2, 3, 7, 6], [0.0, 1.0, 0.0]),
        ([1, 2, 6, 5], [1.0, 0.0, 0.0]),
        ([3, 0, 4, 7], [-1.0, 0.0, 0.0]),
    ];

    let mut faces = Vec::with_capacity(6);
    for (quad, normal) in quads {
        let mut face = FaceMesh::default();
        for idx in quad {
            face.vertex_coords.extend_from_slice(&corners[idx]);
            face.normal_coords.extend_from_slice(&normal);
        }
        face.tri_indexes = vec![0, 1, 2, 0, 2, 3];
        faces.push(face);
    }

    let segments: [(usize, usize); 12] = [
        (0, 1),
        (1, 2),
        (2, 3),
        (3, 0),
        (4, 5),
        (5, 6),
        (6, 7),
        (7, 4),
        (0, 4),
        (1, 5),
        (2, 6),
        (3, 7),
    ];
    let edges = segments
        .into_iter()
        .map(|(a, b)| {
            let mut coords = Vec::with_capacity(6);
            coords.extend_from_slice(&corners[a]);
            coords.extend_from_slice(&corners[b]);
            EdgePolyline { vertex_coords: coords }
        })
        .collect();

    Ok(ShapeData { faces, edges })
}

// =============================================================================
// SPHERE
// =============================================================================

fn tessellate_sphere(obj: &CadObject) -> Result<ShapeData, EngineError> {
    let r = positive_param(obj, "Radius", 1.0)?;
    let [px, py, pz] = param_position(obj);

    let mut face = FaceMesh::default();
    for stack in 0..=SPHERE_STACKS {
        let phi = std::f64::consts::PI * f64::from(stack) / f64::from(SPHERE_STACKS);
        for sector in 0..=SPHERE_SECTORS {
            let theta = std::f64::consts::TAU * f64::from(sector) / f64::from(SPHERE_SECTORS);
            let n = [phi.sin() * theta.cos(), phi.sin() * theta.sin(), phi.cos()];
            face.vertex_coords.extend_from_slice(&[px + r * n[0], py + r * n[1], pz + r * n[2]]);
            face.normal_coords.extend_from_slice(&n);
        }
    }
    let ring = SPHERE_SECTORS + 1;
    for stack in 0..SPHERE_STACKS {
        for sector in 0..SPHERE_SECTORS {
            let a = stack * ring + sector;
            let b = a + ring;
            face.tri_indexes.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }

    // Equator polyline as the pickable edge curve.
    let mut equator = EdgePolyline::default();
    for sector in 0..=SPHERE_SECTORS {
        let theta = std::f64::consts::TAU * f64::from(sector) / f64::from(SPHERE_SECTORS);
        equator
            .vertex_coords
            .extend_from_slice(&[px + r * theta.cos(), py + r * theta.sin(), pz]);
    }

    Ok(ShapeData { faces: vec![face], edges: vec![equator] })
}

// =============================================================================
// CYLINDER
// =============================================================================

fn tessellate_cylinder(obj: &CadObject) -> Result<ShapeData, EngineError> {
    let r = positive_param(obj, "Radius", 1.0)?;
    let h = positive_param(obj, "Height", 1.0)?;
    let [px, py, pz] = param_position(obj);

    let ring: Vec<[f64; 2]> = (0..=CYLINDER_SECTORS)
        .map(|sector| {
            let theta = std::f64::consts::TAU * f64::from(sector) / f64::from(CYLINDER_SECTORS);
            [theta.cos(), theta.sin()]
        })
        .collect();

    // Side wall with radial normals.
    let mut side = FaceMesh::default();
    for [cx, cy] in &ring {
        side.vertex_coords.extend_from_slice(&[px + r * cx, py + r * cy, pz]);
        side.normal_coords.extend_from_slice(&[*cx, *cy, 0.0]);
        side.vertex_coords.extend_from_slice(&[px + r * cx, py + r * cy, pz + h]);
        side.normal_coords.extend_from_slice(&[*cx, *cy, 0.0]);
    }
    for sector in 0..CYLINDER_SECTORS {
        let a = sector * 2;
        side.tri_indexes.extend_from_slice(&[a, a + 2, a + 1, a + 1, a + 2, a + 3]);
    }

    // Caps as triangle fans around their center.
    let mut caps = Vec::with_capacity(2);
    for (z, normal_z) in [(pz, -1.0), (pz + h, 1.0)] {
        let mut cap = FaceMesh::default();
        cap.vertex_coords.extend_from_slice(&[px, py, z]);
        cap.normal_coords.extend_from_slice(&[0.0, 0.0, normal_z]);
        for [cx, cy] in &ring {
            cap.vertex_coords.extend_from_slice(&[px + r * cx, py + r * cy, z]);
            cap.normal_coords.extend_from_slice(&[0.0, 0.0, normal_z]);
        }
        for sector in 1..=CYLINDER_SECTORS {
            if normal_z > 0.0 {
                cap.tri_indexes.extend_from_slice(&[0, sector, sector + 1]);
            } else {
                cap.tri_indexes.extend_from_slice(&[0, sector + 1, sector]);
            }
        }
        caps.push(cap);
    }

    let rims = [(pz), (pz + h)]
        .into_iter()
        .map(|z| {
            let mut coords = Vec::new();
            for [cx, cy] in &ring {
                coords.extend_from_slice(&[px + r * cx, py + r * cy, z]);
            }
            EdgePolyline { vertex_coords: coords }
        })
        .collect();

    let mut faces = vec![side];
    faces.append(&mut caps);
    Ok(ShapeData { faces, edges: rims })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{MeshPayload, encode_mesh};
    use serde_json::Map;

    fn object(name: &str, shape: ShapeKind, params: &[(&str, Value)]) -> CadObject {
        let mut parameters = Map::new();
        for (key, value) in params {
            parameters.insert((*key).to_string(), value.clone());
        }
        CadObject {
            name: name.into(),
            shape,
            parameters,
            visible: true,
            operators: None,
            dependencies: None,
        }
    }

    fn content(objects: Vec<CadObject>) -> DocContent {
        DocContent { objects, options: Map::new() }
    }

    #[tokio::test]
    async fn box_tessellation_shape() {
        let obj = object(
            "Box1",
            ShapeKind::Box,
            &[
                ("Length", serde_json::json!(4.0)),
                ("Width", serde_json::json!(2.0)),
                ("Height", serde_json::json!(10.0)),
            ],
        );
        let computed = PrimitiveEngine::new().shape_data(&content(vec![obj])).await.unwrap();
        let shape = &computed.shapes["Box1"];
        assert_eq!(shape.faces.len(), 6);
        assert_eq!(shape.edges.len(), 12);
        for face in &shape.faces {
            assert_eq!(face.vertex_coords.len(), 12);
            assert_eq!(face.tri_indexes.len(), 6);
        }
        // Extents span the parameter box.
        let max_z = shape
            .faces
            .iter()
            .flat_map(|f| f.vertex_coords.chunks_exact(3))
            .map(|v| v[2])
            .fold(f64::MIN, f64::max);
        assert!((max_z - 10.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn position_parameter_translates() {
        let obj = object(
            "Box1",
            ShapeKind::Box,
            &[("Position", serde_json::json!([5.0, 0.0, 0.0]))],
        );
        let computed = PrimitiveEngine::new().shape_data(&content(vec![obj])).await.unwrap();
        let min_x = computed.shapes["Box1"]
            .faces
            .iter()
            .flat_map(|f| f.vertex_coords.chunks_exact(3))
            .map(|v| v[0])
            .fold(f64::MAX, f64::min);
        assert!((min_x - 5.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn sphere_normals_are_unit() {
        let obj = object("S", ShapeKind::Sphere, &[("Radius", serde_json::json!(2.0))]);
        let computed = PrimitiveEngine::new().shape_data(&content(vec![obj])).await.unwrap();
        let face = &computed.shapes["S"].faces[0];
        for n in face.normal_coords.chunks_exact(3) {
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            assert!((len - 1.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn invalid_radius_is_an_error() {
        let obj = object("S", ShapeKind::Sphere, &[("Radius", serde_json::json!(-1.0))]);
        let result = PrimitiveEngine::new().shape_data(&content(vec![obj])).await;
        assert!(matches!(result, Err(EngineError::InvalidParameters { .. })));
    }

    #[tokio::test]
    async fn post_objects_become_post_inputs() {
        let mut post = object("Flat1", ShapeKind::Post, &[]);
        post.parameters.insert("Object".into(), serde_json::json!("Box1"));
        let box_obj = object("Box1", ShapeKind::Box, &[]);
        let computed =
            PrimitiveEngine::new().shape_data(&content(vec![box_obj, post])).await.unwrap();
        assert!(computed.shapes.contains_key("Box1"));
        assert!(computed.post_inputs.contains_key("Flat1"));
        assert!(!computed.shapes.contains_key("Flat1"));
    }

    #[tokio::test]
    async fn post_process_exports_stl() {
        let payload = MeshPayload {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![],
            indices: vec![0, 1, 2],
            color: vec![1.0, 0.0, 0.0],
        };
        let input = PostInput {
            object: object("Flat1", ShapeKind::Post, &[]),
            mesh: Some(encode_mesh(&payload)),
        };
        let results = PrimitiveEngine::new()
            .post_process(HashMap::from([("Flat1".to_string(), input)]))
            .await
            .unwrap();
        let shape = &results["Flat1"];
        assert_eq!(shape.format, MeshFormat::Stl);
        assert!(shape.binary);
        let mesh = crate::stl::decode(&shape.data).unwrap();
        assert_eq!(mesh.tri_indexes.len(), 3);
    }

    #[tokio::test]
    async fn inputs_without_mesh_are_skipped() {
        let input = PostInput { object: object("Flat1", ShapeKind::Post, &[]), mesh: None };
        let results = PrimitiveEngine::new()
            .post_process(HashMap::from([("Flat1".to_string(), input)]))
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
