//! The geometry engine seam.
//!
//! A real CAD kernel sits behind [`GeometryEngine`] in its own process;
//! everything on this side only ever sees the trait. Implementations
//! must be `Send + Sync` — the bridge shares one engine across
//! concurrently computed files.

use std::collections::HashMap;

use async_trait::async_trait;

use doc::content::DocContent;
use doc::protocol::{PostInput, PostShape, ShapeData};

/// Errors an engine computation can produce. The bridge logs these and
/// skips the response; they never cross to the main side as panics.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid parameters for object {name}: {reason}")]
    InvalidParameters { name: String, reason: String },
    #[error("mesh payload error: {0}")]
    Mesh(#[from] crate::mesh::MeshError),
    #[error("mesh decode error: {0}")]
    Stl(#[from] crate::stl::StlError),
}

/// Result of tessellating one file's object list.
#[derive(Debug, Clone, Default)]
pub struct ComputedShapes {
    /// Object name → tessellated buffers.
    pub shapes: HashMap<String, ShapeData>,
    /// Objects whose operator chain needs an exported mesh from the
    /// scene before post-processing can run.
    pub post_inputs: HashMap<String, PostInput>,
}

/// An asynchronous geometry kernel.
#[async_trait]
pub trait GeometryEngine: Send + Sync {
    /// Tessellate every object of a document.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the object list cannot be
    /// computed; the bridge logs it and sends nothing.
    async fn shape_data(&self, content: &DocContent) -> Result<ComputedShapes, EngineError>;

    /// Run operator post-processing over exported raw geometry.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] when the payload cannot be processed.
    async fn post_process(
        &self,
        inputs: HashMap<String, PostInput>,
    ) -> Result<HashMap<String, PostShape>, EngineError>;
}
