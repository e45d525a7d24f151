//! CAD object data model.
//!
//! This module defines what the shared document stores per object: a
//! unique name, a shape kind, an open-ended parameter bag, a visibility
//! flag, an optional chain of operator records, and the names of the
//! objects it is derived from. On the wire an object is a flat map of
//! field name to JSON value; [`CadObject`] is the typed view of that map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The shape kind of a CAD object.
///
/// Closed set: the scene dispatches on this tag through a lookup table,
/// and the geometry engine rejects kinds it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    /// Axis-aligned box primitive.
    #[serde(rename = "Box")]
    Box,
    /// Sphere primitive.
    #[serde(rename = "Sphere")]
    Sphere,
    /// Cylinder primitive.
    #[serde(rename = "Cylinder")]
    Cylinder,
    /// Profile extrusion. May be non-solid (surface only) depending on
    /// its `Solid` parameter.
    #[serde(rename = "Part::Extrusion")]
    Extrusion,
    /// Post-processing operator applied to another object's exported
    /// mesh. Produces no shape of its own.
    #[serde(rename = "Post::Operator")]
    Post,
}

/// One step in an object's operator chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorRecord {
    /// Operation name, e.g. `"Translate"`.
    pub name: String,
    /// Operation parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// A CAD object as stored in the document and on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadObject {
    /// Unique name within the document. Doubles as the scene-entity key.
    pub name: String,
    /// Shape kind tag.
    pub shape: ShapeKind,
    /// Heterogeneous shape parameters (numbers, strings, nested values).
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Whether the object is rendered.
    pub visible: bool,
    /// Ordered chain of dependent transformations, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operators: Option<Vec<OperatorRecord>>,
    /// Names of the objects this one is derived from. Recorded verbatim;
    /// dependency resolution is the geometry engine's concern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

impl CadObject {
    /// Whether the object renders with a filled surface. Extrusions with
    /// an explicit `Solid: false` parameter are surface-only.
    #[must_use]
    pub fn is_solid(&self) -> bool {
        if self.shape != ShapeKind::Extrusion {
            return true;
        }
        self.parameters
            .get("Solid")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Flatten into the field map the replicated record stores.
    ///
    /// Objects always serialize to a JSON object, so this cannot fail.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Rebuild from a replicated field map. `None` if the map does not
    /// describe a well-formed object.
    #[must_use]
    pub fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(fields.clone())).ok()
    }
}
