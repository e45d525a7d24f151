//! Document content interchange.
//!
//! The interchange format is `{objects: [...], options: {...}}`. Loading
//! validates the whole payload by strict typed decode; any malformed
//! content is a fatal error and the document is rejected outright, never
//! partially loaded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::object::CadObject;

/// Errors raised while loading document content. The sole error class
/// that crosses the document-model boundary as a hard failure.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("file format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Full document content on the wire and on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocContent {
    pub objects: Vec<CadObject>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl DocContent {
    /// Parse and validate content. Any schema violation is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Format`] when the payload is not valid JSON
    /// or does not match the content schema.
    pub fn from_str(data: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Serialize to pretty-printed JSON.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ShapeKind;

    #[test]
    fn round_trip() {
        let content = DocContent {
            objects: vec![CadObject {
                name: "Box1".into(),
                shape: ShapeKind::Box,
                parameters: Map::new(),
                visible: true,
                operators: None,
                dependencies: None,
            }],
            options: {
                let mut m = Map::new();
                m.insert("axes".into(), serde_json::json!({"visible": true}));
                m
            },
        };
        let restored = DocContent::from_str(&content.to_json_string()).unwrap();
        assert_eq!(restored, content);
    }

    #[test]
    fn missing_objects_is_fatal() {
        assert!(DocContent::from_str("{\"options\": {}}").is_err());
    }

    #[test]
    fn unknown_top_level_key_is_fatal() {
        assert!(DocContent::from_str("{\"objects\": [], \"extra\": 1}").is_err());
    }

    #[test]
    fn bad_shape_kind_is_fatal() {
        let data = r#"{"objects": [{"name": "X", "shape": "Blob", "visible": true}]}"#;
        assert!(DocContent::from_str(data).is_err());
    }

    #[test]
    fn options_default_to_empty() {
        let content = DocContent::from_str("{\"objects\": []}").unwrap();
        assert!(content.options.is_empty());
    }
}
