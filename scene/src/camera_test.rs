use super::*;

fn viewport() -> Viewport {
    Viewport { width: 800.0, height: 600.0 }
}

#[test]
fn ndc_conversion() {
    let vp = viewport();
    assert_eq!(vp.to_ndc((400.0, 300.0)), (0.0, 0.0));
    assert_eq!(vp.to_ndc((0.0, 0.0)), (-1.0, 1.0));
    assert_eq!(vp.to_ndc((800.0, 600.0)), (1.0, -1.0));
}

#[test]
fn look_at_points_forward_at_target() {
    let mut camera = Camera::default();
    camera.position = Point3::new(10.0, 0.0, 0.0);
    camera.look_at(&Point3::origin());

    let forward = camera.forward();
    let expected = Vector3::new(-1.0, 0.0, 0.0);
    assert!((forward - expected).norm() < 1e-9);
}

#[test]
fn center_of_view_projects_to_viewport_center() {
    let mut camera = Camera::default();
    camera.position = Point3::new(10.0, 10.0, 10.0);
    camera.look_at(&Point3::origin());

    let vp = viewport();
    let (x, y) = camera.project(&Point3::origin(), &vp).unwrap();
    assert!((x - 400.0).abs() < 1e-6);
    assert!((y - 300.0).abs() < 1e-6);
}

#[test]
fn points_behind_camera_do_not_project() {
    let mut camera = Camera::default();
    camera.position = Point3::new(10.0, 0.0, 0.0);
    camera.look_at(&Point3::origin());

    assert!(camera.project(&Point3::new(20.0, 0.0, 0.0), &viewport()).is_none());
}

#[test]
fn center_ray_passes_through_target() {
    let mut camera = Camera::default();
    camera.position = Point3::new(10.0, 10.0, 10.0);
    camera.look_at(&Point3::origin());

    let ray = camera.ray_through((0.0, 0.0), &viewport());
    assert!((ray.origin - camera.position).norm() < 1e-9);

    // The ray through NDC center must pass through the look-at target.
    let to_target = (Point3::origin() - ray.origin).normalize();
    assert!((ray.direction - to_target).norm() < 1e-6);
}

#[test]
fn pose_round_trip() {
    let mut camera = Camera::default();
    camera.position = Point3::new(1.0, 2.0, 3.0);
    camera.look_at(&Point3::origin());
    let pose = camera.pose();

    let mut restored = Camera::default();
    restored.set_pose(&pose);
    assert!((restored.position - camera.position).norm() < 1e-12);
    assert!((restored.rotation - camera.rotation).norm() < 1e-12);
    assert!((restored.up - camera.up).norm() < 1e-12);
}

#[test]
fn kind_switch_preserves_position_and_up() {
    let mut camera = Camera::default();
    camera.position = Point3::new(5.0, 5.0, 5.0);
    camera.look_at(&Point3::origin());
    let position = camera.position;
    let up = camera.up;

    camera.kind = ProjectionKind::Orthographic;
    assert_eq!(camera.position, position);
    assert_eq!(camera.up, up);

    // An orthographic ray keeps the camera's forward direction.
    let ray = camera.ray_through((0.3, -0.2), &viewport());
    assert!((ray.direction - camera.forward()).norm() < 1e-9);
}
