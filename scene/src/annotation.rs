//! Annotation overlays anchored to scene objects.
//!
//! Annotations live as JSON-encoded strings in the shared metadata
//! table under keys prefixed `annotation`. The scene observes key-level
//! metadata events to create, update, and delete overlay entries, and
//! recomputes each entry's screen position every frame by projecting
//! its (possibly exploded-view-adjusted) anchor through the camera.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata keys carrying annotations start with this prefix.
pub const ANNOTATION_PREFIX: &str = "annotation";

/// One comment inside an annotation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationContent {
    pub user: Option<String>,
    pub value: String,
}

/// An annotation as stored in metadata: a label and thread anchored to
/// a parent object at a 3D offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub label: String,
    pub position: [f64; 3],
    #[serde(default)]
    pub contents: Vec<AnnotationContent>,
    /// Name of the object the annotation is anchored to.
    pub parent: String,
}

impl Annotation {
    /// Parse the JSON-encoded metadata value. `None` for values that do
    /// not decode; malformed annotations are skipped, never fatal.
    #[must_use]
    pub fn from_metadata(value: &str) -> Option<Self> {
        serde_json::from_str(value).ok()
    }

    #[must_use]
    pub fn to_metadata(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Generate a fresh metadata key for a new annotation.
#[must_use]
pub fn annotation_key() -> String {
    format!("{ANNOTATION_PREFIX}:{}", Uuid::new_v4())
}

/// One live overlay entry derived from the metadata table.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneAnnotation {
    pub annotation: Annotation,
    /// Whether the overlay is expanded. Annotations arriving in the
    /// first-ever load start collapsed to avoid an initial layout storm.
    pub open: bool,
    /// Projected position in pixels, `None` while off-screen.
    pub screen: Option<(f64, f64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trip() {
        let annotation = Annotation {
            label: "check this fillet".into(),
            position: [1.0, 2.0, 3.0],
            contents: vec![AnnotationContent { user: Some("ana".into()), value: "too tight?".into() }],
            parent: "Box1".into(),
        };
        let restored = Annotation::from_metadata(&annotation.to_metadata()).unwrap();
        assert_eq!(restored, annotation);
    }

    #[test]
    fn malformed_metadata_is_skipped() {
        assert!(Annotation::from_metadata("not json").is_none());
        assert!(Annotation::from_metadata("{\"label\": \"x\"}").is_none());
    }

    #[test]
    fn keys_carry_the_prefix() {
        let key = annotation_key();
        assert!(key.starts_with("annotation:"));
        assert_ne!(annotation_key(), key);
    }
}
