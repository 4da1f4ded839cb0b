//! Glint Core - Data model for the renderer service contract
//!
//! Glint decouples a shading execution engine from the renderer that hosts
//! it. The engine is compiled and optimized independently of any particular
//! renderer; whenever it needs renderer-owned state while evaluating a
//! shading point - a coordinate transform, a scene attribute, a filtered
//! texture sample, a point-cloud query - it calls through the service
//! contract defined in `glint-services`.
//!
//! # Core Philosophy
//!
//! ```text
//! Shading Engine → RendererServices → Renderer Backend
//!                        ↑
//!          ShadeContext / TypeDesc / Value
//! ```
//!
//! This crate holds the vocabulary both sides share: type descriptors,
//! typed values with optional derivatives, the per-point evaluation context,
//! opaque transform handles, well-known coordinate-space names, and ray
//! query options. It contains no behavior a backend could disagree with.
//!
//! # Speculative queries
//!
//! A static optimizer may issue queries before any shading point exists.
//! Operations therefore take `Option<&ShadeContext>`; `None` marks a
//! speculative, object-independent query and every operation documents its
//! behavior for that case.

pub mod context;
pub mod trace;
pub mod transform;
pub mod typedesc;
pub mod value;

// Re-export commonly used types
pub use context::ShadeContext;
pub use trace::TraceOptions;
pub use transform::{spaces, TransformHandle};
pub use typedesc::{Aggregate, BaseType, TypeDesc, VecSemantics};
pub use value::{Datum, Value};
