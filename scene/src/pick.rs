//! Ray picking against the scene arena.
//!
//! A pick walks every visible entity's surface triangles and edge
//! segments (displaced by the entity's exploded offset), collects the
//! candidates along the ray, and returns the nearest one that survives
//! the visibility and clip-plane filters.

#[cfg(test)]
#[path = "pick_test.rs"]
mod pick_test;

use nalgebra::{Point3, Vector3};

use doc::presence::SelectionKind;

use crate::clip::ClipPlane;
use crate::mesh::{MeshEntity, SceneArena};

/// A world-space ray. `direction` is unit length.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Point3<f64>,
    pub direction: Vector3<f64>,
}

impl Ray {
    #[must_use]
    pub fn at(&self, t: f64) -> Point3<f64> {
        self.origin + self.direction * t
    }
}

/// The nearest surviving pick candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct PickHit {
    /// Name of the picked mesh (surface or edge).
    pub mesh_name: String,
    /// Name of the owning object.
    pub object: String,
    /// World-space hit position (on the displaced geometry).
    pub point: Point3<f64>,
    /// Distance along the ray.
    pub distance: f64,
    pub kind: SelectionKind,
}

/// Cast a ray against the arena. Candidates are rejected when their
/// entity is hidden or when they lie on the far side of an enabled clip
/// plane; the nearest survivor wins.
#[must_use]
pub fn pick(
    ray: &Ray,
    arena: &SceneArena,
    clip: Option<&ClipPlane>,
    edge_tolerance: f64,
) -> Option<PickHit> {
    let mut hits: Vec<PickHit> = Vec::new();
    for entity in arena.iter().filter(|e| e.visible) {
        collect_surface_hits(ray, entity, &mut hits);
        collect_edge_hits(ray, entity, edge_tolerance, &mut hits);
    }
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits.into_iter().find(|hit| match clip {
        // A candidate behind the clip plane is cut away.
        Some(plane) => plane.signed_distance(&hit.point) >= 0.0,
        None => true,
    })
}

fn collect_surface_hits(ray: &Ray, entity: &MeshEntity, hits: &mut Vec<PickHit>) {
    let surface = &entity.surface;
    for tri in surface.indices.chunks_exact(3) {
        let a = vertex_at(&surface.positions, tri[0], &entity.offset);
        let b = vertex_at(&surface.positions, tri[1], &entity.offset);
        let c = vertex_at(&surface.positions, tri[2], &entity.offset);
        if let Some(t) = ray_triangle(ray, &a, &b, &c) {
            hits.push(PickHit {
                mesh_name: surface.name.clone(),
                object: entity.name.clone(),
                point: ray.at(t),
                distance: t,
                kind: SelectionKind::Shape,
            });
        }
    }
}

fn collect_edge_hits(ray: &Ray, entity: &MeshEntity, tolerance: f64, hits: &mut Vec<PickHit>) {
    for edge in &entity.edges {
        let points: Vec<Point3<f64>> = edge
            .positions
            .chunks_exact(3)
            .map(|v| Point3::new(v[0], v[1], v[2]) + entity.offset)
            .collect();
        for segment in points.windows(2) {
            if let Some((t, on_segment)) = ray_segment(ray, &segment[0], &segment[1], tolerance) {
                hits.push(PickHit {
                    mesh_name: edge.name.clone(),
                    object: entity.name.clone(),
                    point: on_segment,
                    distance: t,
                    kind: SelectionKind::Edge,
                });
            }
        }
    }
}

fn vertex_at(positions: &[f64], index: u32, offset: &Vector3<f64>) -> Point3<f64> {
    let at = index as usize * 3;
    Point3::new(
        positions.get(at).copied().unwrap_or(0.0),
        positions.get(at + 1).copied().unwrap_or(0.0),
        positions.get(at + 2).copied().unwrap_or(0.0),
    ) + offset
}

/// Möller–Trumbore ray/triangle intersection. Returns the ray parameter
/// of the hit, front and back faces alike.
fn ray_triangle(
    ray: &Ray,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> Option<f64> {
    let e1 = b - a;
    let e2 = c - a;
    let p = ray.direction.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - a;
    let u = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = ray.direction.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(&q) * inv_det;
    (t > 1e-9).then_some(t)
}

/// Closest approach between a ray and a segment. Returns the ray
/// parameter and the closest point on the segment when they come within
/// `tolerance` of each other.
fn ray_segment(
    ray: &Ray,
    a: &Point3<f64>,
    b: &Point3<f64>,
    tolerance: f64,
) -> Option<(f64, Point3<f64>)> {
    let seg = b - a;
    let w0 = ray.origin - a;
    let aa = ray.direction.dot(&ray.direction);
    let ab = ray.direction.dot(&seg);
    let bb = seg.dot(&seg);
    let ad = ray.direction.dot(&w0);
    let bd = seg.dot(&w0);

    let denom = aa * bb - ab * ab;
    let s = if denom.abs() < 1e-12 { 0.0 } else { (ab * bd - bb * ad) / denom };
    let mut u = if bb.abs() < 1e-12 { 0.0 } else { (bd + ab * s) / bb };

    // Clamp to the segment, then re-project onto the ray.
    u = u.clamp(0.0, 1.0);
    let s = (ab * u - ad) / aa;
    if s < 0.0 {
        return None;
    }
    let on_ray = ray.at(s);
    let on_segment = a + seg * u;
    ((on_ray - on_segment).norm() <= tolerance).then_some((s, on_segment))
}
