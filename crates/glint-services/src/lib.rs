//! Glint Services - The renderer service contract
//!
//! This crate defines `RendererServices`, the trait through which a shading
//! execution engine asks its host renderer for everything it cannot know on
//! its own: coordinate transforms, scene and object attributes, per-point
//! user data, filtered texture samples, point-cloud queries, visibility
//! rays, and cross-stage messages.
//!
//! # Contract shape
//!
//! A backend implements the eight mandatory methods (forward transform
//! resolution and attribute/user-data access). Everything else has a default
//! body derived from simpler primitives or reporting "not supported":
//! inverse transforms invert the forward result, texture lookups delegate to
//! the backend's [`TextureSystem`], ray tracing reports no-hit, the bulk
//! nonlinear transform and the message channel report unavailable. A backend
//! overrides a default only when it can do better.
//!
//! Every operation completes synchronously and reports unavailability as
//! `None`/`false`/zero with outputs untouched; no operation panics the
//! calling engine. All methods must be safe for concurrent invocation across
//! independent point evaluations.

pub mod pointcloud;
pub mod services;
pub mod texture;

// Re-export commonly used types
pub use pointcloud::{FlushStats, PointCloud, PointCloudError, PointCloudStore};
pub use services::RendererServices;
pub use texture::{InterpMode, TextureOptions, TextureSystem, WrapMode};
