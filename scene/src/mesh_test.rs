use super::*;

use doc::protocol::EdgePolyline;

fn unit_quad_face(z: f64) -> FaceMesh {
    FaceMesh {
        vertex_coords: vec![0.0, 0.0, z, 1.0, 0.0, z, 1.0, 1.0, z, 0.0, 1.0, z],
        normal_coords: vec![[0.0, 0.0, 1.0]; 4].concat(),
        tri_indexes: vec![0, 1, 2, 0, 2, 3],
    }
}

fn shape(faces: Vec<FaceMesh>, edges: Vec<EdgePolyline>) -> ShapeData {
    ShapeData { faces, edges }
}

fn style<'a>(selected: &'a HashSet<String>) -> EntityStyle<'a> {
    EntityStyle {
        solid: true,
        visible: true,
        guidata: None,
        selected,
        colors: SceneColors::default(),
    }
}

#[test]
fn faces_merge_with_rebased_indices() {
    let selected = HashSet::new();
    let entity = build_entity(
        "Box1",
        &shape(vec![unit_quad_face(0.0), unit_quad_face(1.0)], vec![]),
        &style(&selected),
    );
    assert_eq!(entity.surface.positions.len(), 24);
    assert_eq!(entity.surface.indices.len(), 12);
    // The second face's indices are rebased past the first's vertices.
    assert_eq!(entity.surface.indices[6], 4);
}

#[test]
fn edges_are_named_after_their_object() {
    let selected = HashSet::new();
    let entity = build_entity(
        "Box1",
        &shape(
            vec![],
            vec![
                EdgePolyline { vertex_coords: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0] },
                EdgePolyline { vertex_coords: vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0] },
            ],
        ),
        &style(&selected),
    );
    assert_eq!(entity.edges[0].name, "edge-0-Box1");
    assert_eq!(entity.edges[1].name, "edge-1-Box1");
    assert_eq!(entity.edges[0].linewidth, DEFAULT_LINEWIDTH);
}

#[test]
fn preserved_selection_is_restyled() {
    let selected: HashSet<String> = ["Box1".to_string(), "edge-0-Box1".to_string()].into();
    let entity = build_entity(
        "Box1",
        &shape(
            vec![unit_quad_face(0.0)],
            vec![EdgePolyline { vertex_coords: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0] }],
        ),
        &style(&selected),
    );
    let colors = SceneColors::default();
    assert_eq!(entity.surface.color, colors.selected);
    assert_eq!(entity.edges[0].color, colors.selected);
    assert_eq!(entity.edges[0].linewidth, SELECTED_LINEWIDTH);
}

#[test]
fn guidata_overrides_color_and_visibility() {
    let guidata = serde_json::json!({"color": [0.2, 0.4, 0.6], "visibility": false});
    let selected = HashSet::new();
    let mut s = style(&selected);
    s.guidata = Some(&guidata);
    s.visible = effective_visibility(true, Some(&guidata));
    let entity = build_entity("Box1", &shape(vec![unit_quad_face(0.0)], vec![]), &s);
    assert!(!entity.visible);
    assert_eq!(entity.surface.color, crate::color::Color::rgb(0.2, 0.4, 0.6));
}

#[test]
fn effective_visibility_gates_on_both_flags() {
    let hidden = serde_json::json!({"visibility": false});
    assert!(effective_visibility(true, None));
    assert!(!effective_visibility(false, None));
    assert!(!effective_visibility(true, Some(&hidden)));
}

#[test]
fn reference_length_from_bounds() {
    let mut bounds = Aabb::empty();
    bounds.expand_point(&Point3::new(0.0, 0.0, 0.0));
    bounds.expand_point(&Point3::new(4.0, 2.0, 10.0));
    assert!((reference_length(&bounds) - 2.0).abs() < 1e-12);

    // Empty scene defaults to 1.
    assert!((reference_length(&Aabb::empty()) - 1.0).abs() < 1e-12);
}

#[test]
fn visible_bounds_ignore_hidden_entities() {
    let selected = HashSet::new();
    let mut arena = SceneArena::new();
    arena.insert(build_entity("A", &shape(vec![unit_quad_face(0.0)], vec![]), &style(&selected)));
    let mut far_style = style(&selected);
    far_style.visible = false;
    let far_face = FaceMesh {
        vertex_coords: vec![100.0, 100.0, 100.0, 101.0, 100.0, 100.0, 100.0, 101.0, 100.0],
        normal_coords: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
        tri_indexes: vec![0, 1, 2],
    };
    arena.insert(build_entity("B", &shape(vec![far_face], vec![]), &far_style));

    let bounds = arena.visible_bounds();
    assert!((bounds.max.x - 1.0).abs() < 1e-12);
}

#[test]
fn owner_of_resolves_edges() {
    let selected = HashSet::new();
    let mut arena = SceneArena::new();
    arena.insert(build_entity(
        "My-Box",
        &shape(vec![], vec![EdgePolyline { vertex_coords: vec![0.0; 6] }]),
        &style(&selected),
    ));
    assert_eq!(arena.owner_of("My-Box").unwrap().name, "My-Box");
    assert_eq!(arena.owner_of("edge-0-My-Box").unwrap().name, "My-Box");
    assert!(arena.owner_of("edge-0-Ghost").is_none());
}
