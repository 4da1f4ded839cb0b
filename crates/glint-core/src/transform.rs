//! Opaque transform handles and well-known coordinate space names
//!
//! A renderer describes a (possibly motion-blurred) coordinate transform
//! either by an opaque handle it issued itself, or by the interned name of a
//! logical space. The contract never interprets a handle's bits; it only
//! hands them back to the renderer that minted them.

use serde::{Deserialize, Serialize};

/// Opaque token identifying a renderer-owned coordinate transform
///
/// Minted by a backend (typically an index or tagged pointer into its own
/// transform table) and meaningless to everyone else. A handle from one
/// backend must not be presented to another; backends reject tokens they do
/// not recognize by reporting not-found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformHandle(u64);

impl TransformHandle {
    /// Wrap a raw token value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw token value
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

/// Well-known logical coordinate space names
///
/// Backends may resolve additional, renderer-specific names; these are the
/// ones every shading program can assume exist when the renderer supports
/// the corresponding concept.
pub mod spaces {
    /// The shared space all other spaces resolve through
    pub const COMMON: &str = "common";
    /// Local space of the object being shaded
    pub const OBJECT: &str = "object";
    /// Local space of the shader's binding
    pub const SHADER: &str = "shader";
    /// World space
    pub const WORLD: &str = "world";
    /// Camera space
    pub const CAMERA: &str = "camera";
    /// Normalized screen space after projection
    pub const SCREEN: &str = "screen";
    /// Pixel coordinates of the output image
    pub const RASTER: &str = "raster";
    /// Normalized device coordinates
    pub const NDC: &str = "NDC";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_round_trip() {
        let h = TransformHandle::from_raw(42);
        assert_eq!(h.raw(), 42);
        assert_eq!(h, TransformHandle::from_raw(42));
        assert_ne!(h, TransformHandle::from_raw(7));
    }
}
