//! Scene-entity arena: mesh groups derived from worker shape payloads.
//!
//! DESIGN
//! ======
//! The arena is the single owned store of derived scene entities, keyed
//! by object name. It holds no state of record — the shared document
//! plus the latest worker payload can always reconstruct it — so
//! rebuild and patch operations take the arena and a diff rather than
//! mutating ambient globals.

#[cfg(test)]
#[path = "mesh_test.rs"]
mod mesh_test;

use std::collections::{BTreeMap, HashSet};

use nalgebra::{Point3, Vector3};
use serde_json::Value;

use doc::protocol::{FaceMesh, ShapeData};

use crate::color::Color;
use crate::consts::{
    DEFAULT_LINEWIDTH, EMPTY_REF_LENGTH, REF_LENGTH_DIVISOR, SELECTED_LINEWIDTH,
};

// =============================================================================
// BOUNDS
// =============================================================================

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// An empty box that expands from nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn expand_point(&mut self, p: &Point3<f64>) {
        self.min = Point3::new(self.min.x.min(p.x), self.min.y.min(p.y), self.min.z.min(p.z));
        self.max = Point3::new(self.max.x.max(p.x), self.max.y.max(p.y), self.max.z.max(p.z));
    }

    pub fn expand(&mut self, other: &Aabb) {
        if !other.is_empty() {
            self.expand_point(&other.min);
            self.expand_point(&other.max);
        }
    }

    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        if self.is_empty() {
            Point3::origin()
        } else {
            nalgebra::center(&self.min, &self.max)
        }
    }

    #[must_use]
    pub fn size(&self) -> Vector3<f64> {
        if self.is_empty() { Vector3::zeros() } else { self.max - self.min }
    }
}

/// Reference length for helper-geometry sizing: largest bounding
/// dimension over five, `1.0` for an empty scene.
#[must_use]
pub fn reference_length(bounds: &Aabb) -> f64 {
    let size = bounds.size();
    let largest = size.x.max(size.y).max(size.z);
    if largest > 0.0 { largest / REF_LENGTH_DIVISOR } else { EMPTY_REF_LENGTH }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Default colors resolved from the current theme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneColors {
    pub mesh: Color,
    pub edge: Color,
    pub selected: Color,
}

impl Default for SceneColors {
    fn default() -> Self {
        Self {
            mesh: Color::rgb(0.8, 0.8, 0.8),
            edge: Color::rgb(0.15, 0.15, 0.15),
            selected: Color::rgb(1.0, 0.55, 0.0),
        }
    }
}

/// The filled surface of one object.
#[derive(Debug, Clone)]
pub struct SurfaceMesh {
    /// Mesh name; equal to the owning object name.
    pub name: String,
    pub positions: Vec<f64>,
    pub normals: Vec<f64>,
    pub indices: Vec<u32>,
    pub color: Color,
    /// Surface-only objects render without fill.
    pub solid: bool,
}

/// One edge polyline of an object.
#[derive(Debug, Clone)]
pub struct EdgeMesh {
    /// Mesh name, `edge-<n>-<object>`.
    pub name: String,
    pub positions: Vec<f64>,
    pub color: Color,
    pub linewidth: f64,
}

/// Mesh group for one CAD object: surface plus edge wireframe, with the
/// exploded-view displacement applied as a group offset.
#[derive(Debug, Clone)]
pub struct MeshEntity {
    pub name: String,
    pub surface: SurfaceMesh,
    pub edges: Vec<EdgeMesh>,
    pub visible: bool,
    /// Exploded-view displacement; zero when the view is not exploded.
    pub offset: Vector3<f64>,
    /// Bounds of the raw (unexploded) geometry.
    pub bounds: Aabb,
}

impl MeshEntity {
    /// Geometric center of the raw geometry.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        self.bounds.center()
    }
}

/// Build parameters for one entity.
pub struct EntityStyle<'a> {
    pub solid: bool,
    pub visible: bool,
    /// This object's entry in the `guidata` option, if any.
    pub guidata: Option<&'a Value>,
    /// Mesh names selected before the rebuild, preserved across it.
    pub selected: &'a HashSet<String>,
    pub colors: SceneColors,
}

/// Effective visibility: the object flag gated by the gui override.
#[must_use]
pub fn effective_visibility(object_visible: bool, guidata: Option<&Value>) -> bool {
    let override_visible = guidata
        .and_then(|data| data.get("visibility"))
        .and_then(Value::as_bool)
        .unwrap_or(true);
    object_visible && override_visible
}

/// Per-object base color: explicit gui override, else the theme default.
#[must_use]
pub fn base_color(guidata: Option<&Value>, colors: &SceneColors) -> Color {
    guidata
        .and_then(|data| data.get("color"))
        .and_then(Color::from_rgb_value)
        .unwrap_or(colors.mesh)
}

/// Build one mesh entity from a shape payload entry.
#[must_use]
pub fn build_entity(name: &str, data: &ShapeData, style: &EntityStyle<'_>) -> MeshEntity {
    let mut bounds = Aabb::empty();
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut indices = Vec::new();

    for face in &data.faces {
        #[allow(clippy::cast_possible_truncation)]
        let base = (positions.len() / 3) as u32;
        positions.extend_from_slice(&face.vertex_coords);
        normals.extend_from_slice(&face.normal_coords);
        indices.extend(face.tri_indexes.iter().map(|i| i + base));
        for v in face.vertex_coords.chunks_exact(3) {
            bounds.expand_point(&Point3::new(v[0], v[1], v[2]));
        }
    }

    let selected = style.selected.contains(name);
    let surface_color =
        if selected { style.colors.selected } else { base_color(style.guidata, &style.colors) };

    let edges = data
        .edges
        .iter()
        .enumerate()
        .map(|(i, polyline)| {
            let edge_name = format!("edge-{i}-{name}");
            let edge_selected = style.selected.contains(&edge_name);
            for v in polyline.vertex_coords.chunks_exact(3) {
                bounds.expand_point(&Point3::new(v[0], v[1], v[2]));
            }
            EdgeMesh {
                name: edge_name,
                positions: polyline.vertex_coords.clone(),
                color: if edge_selected { style.colors.selected } else { style.colors.edge },
                linewidth: if edge_selected { SELECTED_LINEWIDTH } else { DEFAULT_LINEWIDTH },
            }
        })
        .collect();

    MeshEntity {
        name: name.to_string(),
        surface: SurfaceMesh {
            name: name.to_string(),
            positions,
            normals,
            indices,
            color: surface_color,
            solid: style.solid,
        },
        edges,
        visible: style.visible,
        offset: Vector3::zeros(),
        bounds,
    }
}

/// Build an entity from a decoded post-processing face mesh.
#[must_use]
pub fn build_post_entity(name: &str, face: &FaceMesh, colors: &SceneColors) -> MeshEntity {
    let data = ShapeData { faces: vec![face.clone()], edges: Vec::new() };
    let no_selection = HashSet::new();
    let style = EntityStyle {
        solid: true,
        visible: true,
        guidata: None,
        selected: &no_selection,
        colors: *colors,
    };
    build_entity(name, &data, &style)
}

// =============================================================================
// ARENA
// =============================================================================

/// The owned arena of scene entities, keyed by object name. `BTreeMap`
/// keeps iteration deterministic.
#[derive(Debug, Default)]
pub struct SceneArena {
    entities: BTreeMap<String, MeshEntity>,
}

impl SceneArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: MeshEntity) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn remove(&mut self, name: &str) -> Option<MeshEntity> {
        self.entities.remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MeshEntity> {
        self.entities.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut MeshEntity> {
        self.entities.get_mut(name)
    }

    /// Resolve a mesh name (surface or edge) to its owning entity.
    #[must_use]
    pub fn owner_of(&self, mesh_name: &str) -> Option<&MeshEntity> {
        if let Some(entity) = self.entities.get(mesh_name) {
            return Some(entity);
        }
        // edge-<n>-<object>
        let object = mesh_name.strip_prefix("edge-")?.split_once('-')?.1;
        self.entities.get(object)
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeshEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MeshEntity> {
        self.entities.values_mut()
    }

    /// Aggregate bounds over *visible* entities only, unexploded.
    #[must_use]
    pub fn visible_bounds(&self) -> Aabb {
        let mut bounds = Aabb::empty();
        for entity in self.entities.values().filter(|e| e.visible) {
            bounds.expand(&entity.bounds);
        }
        bounds
    }
}
