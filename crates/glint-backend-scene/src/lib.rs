//! Glint Scene Backend - In-memory reference implementation
//!
//! A complete, renderer-shaped implementation of the service contract over
//! a declarative in-memory scene. It exists to exercise every operation of
//! [`RendererServices`](glint_services::RendererServices) - including the
//! ones production backends often skip - and to show where a real renderer
//! plugs in its own machinery:
//!
//! - named and handle-identified transforms, static or keyframed
//! - object and scene-global attribute tables, per-object user data
//! - an image/volume texture registry implementing the texture seam
//! - point clouds backed by the shared accumulate/flush store
//! - visibility rays against tagged spheres, with out-of-band shade-on-hit
//! - a typed message board for sourced messages
//!
//! It is a test and integration vehicle, not a renderer.

pub mod renderer;
pub mod scene;
pub mod textures;

// Re-export commonly used types
pub use renderer::{SceneBackend, ShadedHit, TraceSphere};
pub use scene::{NamedTransform, ObjectRecord, SceneDescription};
pub use textures::{SourceImage, SourceVolume, TextureError, TextureRegistry};
