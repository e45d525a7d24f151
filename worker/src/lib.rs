//! Geometry worker bridge.
//!
//! The geometry engine runs outside the main thread and is consumed
//! only as an asynchronous request/response channel. This crate owns
//! that boundary: the [`engine::GeometryEngine`] seam a real CAD kernel
//! implements, the bridge task that routes messages between documents
//! and the engine, and the mesh interchange codecs used for
//! post-processing payloads.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`bridge`] | The bridge task: routing, file table, stale discard |
//! | [`engine`] | `GeometryEngine` trait and engine result types |
//! | [`primitive`] | Built-in Box/Sphere/Cylinder tessellator for tests and demos |
//! | [`mesh`] | Binary mesh interchange payload (prost) |
//! | [`stl`] | STL decode/encode for post-processing results |

pub mod bridge;
pub mod engine;
pub mod mesh;
pub mod primitive;
pub mod stl;
