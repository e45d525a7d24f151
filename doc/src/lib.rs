//! Replicated CAD document, presence channel, and document model.
//!
//! This crate owns the data model consumed by every other crate: the
//! multi-writer shared document (objects, options, metadata) with
//! deterministic last-writer-wins conflict resolution, the ephemeral
//! awareness channel for per-client presence, the typed document model
//! that wraps both, and the geometry-worker wire protocol.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`shared`] | Replicated shared document and change/replication events |
//! | [`presence`] | Ephemeral per-client presence hub and wire shapes |
//! | [`model`] | Typed document model: sync helpers, signals, worker link |
//! | [`object`] | CAD object types and the shape-kind tag |
//! | [`content`] | Document content interchange and load validation |
//! | [`protocol`] | Main↔worker message types |
//! | [`clock`] | Lamport stamps and LWW registers |

pub mod clock;
pub mod content;
pub mod model;
pub mod object;
pub mod presence;
pub mod protocol;
pub mod shared;
