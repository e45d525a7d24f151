use super::*;

use std::collections::HashSet;

use doc::protocol::{EdgePolyline, FaceMesh, ShapeData};

use crate::mesh::{EntityStyle, SceneColors, build_entity};

/// A unit quad in the z=0 plane, facing +z.
fn quad_entity(name: &str, visible: bool) -> MeshEntity {
    let face = FaceMesh {
        vertex_coords: vec![
            -0.5, -0.5, 0.0, //
            0.5, -0.5, 0.0, //
            0.5, 0.5, 0.0, //
            -0.5, 0.5, 0.0,
        ],
        normal_coords: vec![[0.0, 0.0, 1.0]; 4].concat(),
        tri_indexes: vec![0, 1, 2, 0, 2, 3],
    };
    let selected = HashSet::new();
    let style = EntityStyle {
        solid: true,
        visible,
        guidata: None,
        selected: &selected,
        colors: SceneColors::default(),
    };
    build_entity(name, &ShapeData { faces: vec![face], edges: vec![] }, &style)
}

fn edge_entity(name: &str) -> MeshEntity {
    let edge = EdgePolyline { vertex_coords: vec![-1.0, 0.0, 0.0, 1.0, 0.0, 0.0] };
    let selected = HashSet::new();
    let style = EntityStyle {
        solid: true,
        visible: true,
        guidata: None,
        selected: &selected,
        colors: SceneColors::default(),
    };
    build_entity(name, &ShapeData { faces: vec![], edges: vec![edge] }, &style)
}

fn down_ray(x: f64, y: f64) -> Ray {
    Ray { origin: Point3::new(x, y, 5.0), direction: -Vector3::z() }
}

#[test]
fn nearest_surface_wins() {
    let mut arena = SceneArena::new();
    let near = quad_entity("Near", true);
    let mut far = quad_entity("Far", true);
    // Push the far quad down along -z.
    for chunk in far.surface.positions.chunks_exact_mut(3) {
        chunk[2] = -3.0;
    }
    arena.insert(near);
    arena.insert(far);

    let hit = pick(&down_ray(0.0, 0.0), &arena, None, 0.05).unwrap();
    assert_eq!(hit.object, "Near");
    assert_eq!(hit.kind, SelectionKind::Shape);
    assert!((hit.distance - 5.0).abs() < 1e-9);
}

#[test]
fn hidden_entities_are_not_pickable() {
    let mut arena = SceneArena::new();
    arena.insert(quad_entity("Ghost", false));
    assert!(pick(&down_ray(0.0, 0.0), &arena, None, 0.05).is_none());
}

#[test]
fn miss_outside_the_quad() {
    let mut arena = SceneArena::new();
    arena.insert(quad_entity("Quad", true));
    assert!(pick(&down_ray(2.0, 2.0), &arena, None, 0.05).is_none());
}

#[test]
fn clip_plane_rejects_cut_candidates() {
    let mut arena = SceneArena::new();
    arena.insert(quad_entity("Quad", true));

    // Plane with normal +x through the origin: the x<0 half is cut away.
    let mut plane = ClipPlane::default();
    plane.set_from_normal_and_point(Vector3::x(), &Point3::origin());

    let kept = pick(&down_ray(0.25, 0.0), &arena, Some(&plane), 0.05);
    assert!(kept.is_some());
    let cut = pick(&down_ray(-0.25, 0.0), &arena, Some(&plane), 0.05);
    assert!(cut.is_none());
}

#[test]
fn edges_pick_within_tolerance() {
    let mut arena = SceneArena::new();
    arena.insert(edge_entity("Wire"));

    let hit = pick(&down_ray(0.5, 0.02), &arena, None, 0.05).unwrap();
    assert_eq!(hit.mesh_name, "edge-0-Wire");
    assert_eq!(hit.kind, SelectionKind::Edge);
    // The hit point lies on the segment, not beside it.
    assert!(hit.point.y.abs() < 1e-9);

    assert!(pick(&down_ray(0.5, 0.2), &arena, None, 0.05).is_none());
}

#[test]
fn exploded_offset_displaces_pick_target() {
    let mut arena = SceneArena::new();
    let mut entity = quad_entity("Quad", true);
    entity.offset = Vector3::new(2.0, 0.0, 0.0);
    arena.insert(entity);

    // The original location no longer hits; the displaced one does.
    assert!(pick(&down_ray(0.0, 0.0), &arena, None, 0.05).is_none());
    let hit = pick(&down_ray(2.0, 0.0), &arena, None, 0.05).unwrap();
    assert_eq!(hit.object, "Quad");
}

#[test]
fn surfaces_beat_edges_at_equal_reach() {
    // A quad at z=0 with an edge floating above it at z=1: the ray meets
    // the edge first.
    let mut arena = SceneArena::new();
    arena.insert(quad_entity("Quad", true));
    let mut wire = edge_entity("Wire");
    for chunk in wire.edges[0].positions.chunks_exact_mut(3) {
        chunk[2] = 1.0;
    }
    arena.insert(wire);

    let hit = pick(&down_ray(0.0, 0.0), &arena, None, 0.05).unwrap();
    assert_eq!(hit.mesh_name, "edge-0-Wire");
}
