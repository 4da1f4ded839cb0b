//! The texture collaborator seam
//!
//! Filtering and decoding are owned by an external texture system; this
//! module only defines the call contract the default sampling methods of
//! [`RendererServices`](crate::RendererServices) delegate to, and the
//! options structure that travels with every lookup.
//!
//! The differential pairs in each lookup describe an anisotropic filter
//! footprint: the rate of change of the sample coordinate along two
//! canonical directions. Filtering over that footprint is what makes
//! results alias-free under arbitrary minification. An implementation may
//! fall back to an unfiltered point sample when all differentials are zero;
//! that is a documented quality degradation, never an error.

use glam::Vec3;
use glint_core::{TypeDesc, Value};
use serde::{Deserialize, Serialize};

/// How coordinates outside [0, 1) resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WrapMode {
    /// Repeat the texture
    #[default]
    Periodic,
    /// Clamp to the edge texel
    Clamp,
    /// Outside the domain is black
    Black,
    /// Mirror on every repeat
    Mirror,
}

/// Interpolation between texels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InterpMode {
    /// Nearest texel
    Closest,
    /// Bilinear (trilinear for volumes)
    #[default]
    Linear,
}

/// Per-lookup filtering and wrapping configuration
///
/// Owned by the texture collaborator; the service contract passes it
/// through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureOptions {
    /// Wrap mode along s
    pub s_wrap: WrapMode,
    /// Wrap mode along t
    pub t_wrap: WrapMode,
    /// Wrap mode along r (volumes only)
    pub r_wrap: WrapMode,
    /// Texel interpolation
    pub interp: InterpMode,
    /// First channel of the file to read
    pub first_channel: usize,
    /// Value for channels requested beyond what the file holds
    pub fill: f32,
    /// Multiplier on the filter footprint width
    pub width: f32,
    /// Extra blur added to the footprint, in texture coordinate units
    pub blur: f32,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            s_wrap: WrapMode::default(),
            t_wrap: WrapMode::default(),
            r_wrap: WrapMode::default(),
            interp: InterpMode::default(),
            first_channel: 0,
            fill: 0.0,
            width: 1.0,
            blur: 0.0,
        }
    }
}

impl TextureOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the same wrap mode on every axis
    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.s_wrap = wrap;
        self.t_wrap = wrap;
        self.r_wrap = wrap;
        self
    }

    /// Set the interpolation mode
    pub fn with_interp(mut self, interp: InterpMode) -> Self {
        self.interp = interp;
        self
    }

    /// Set the fill value for missing channels
    pub fn with_fill(mut self, fill: f32) -> Self {
        self.fill = fill;
        self
    }
}

/// Decoded, filtered sample access, implemented by the texture collaborator
///
/// Every method is synchronous and safe for concurrent calls. Failure means
/// "file or datum unavailable" with all output buffers untouched.
pub trait TextureSystem: Send + Sync {
    /// Filtered 2D lookup; see
    /// [`RendererServices::texture`](crate::RendererServices::texture) for
    /// the argument contract.
    #[allow(clippy::too_many_arguments)]
    fn texture(
        &self,
        filename: &str,
        options: &TextureOptions,
        s: f32,
        t: f32,
        ds_dx: f32,
        dt_dx: f32,
        ds_dy: f32,
        dt_dy: f32,
        nchannels: usize,
        result: &mut [f32],
        d_ds: Option<&mut [f32]>,
        d_dt: Option<&mut [f32]>,
    ) -> bool;

    /// Filtered volumetric lookup at `p`.
    #[allow(clippy::too_many_arguments)]
    fn texture3d(
        &self,
        filename: &str,
        options: &TextureOptions,
        p: Vec3,
        dp_dx: Vec3,
        dp_dy: Vec3,
        dp_dz: Vec3,
        nchannels: usize,
        result: &mut [f32],
        d_ds: Option<&mut [f32]>,
        d_dt: Option<&mut [f32]>,
        d_dr: Option<&mut [f32]>,
    ) -> bool;

    /// Filtered directional lookup along `r`.
    #[allow(clippy::too_many_arguments)]
    fn environment(
        &self,
        filename: &str,
        options: &TextureOptions,
        r: Vec3,
        dr_dx: Vec3,
        dr_dy: Vec3,
        nchannels: usize,
        result: &mut [f32],
        d_ds: Option<&mut [f32]>,
        d_dt: Option<&mut [f32]>,
    ) -> bool;

    /// Metadata query, type-checked against `datatype`.
    ///
    /// Returns `None` for an unknown file, unknown subimage, unknown datum
    /// name, or a type mismatch.
    fn texture_info(
        &self,
        filename: &str,
        subimage: usize,
        dataname: &str,
        datatype: TypeDesc,
    ) -> Option<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_defaults() {
        let opt = TextureOptions::default();
        assert_eq!(opt.s_wrap, WrapMode::Periodic);
        assert_eq!(opt.interp, InterpMode::Linear);
        assert_eq!(opt.first_channel, 0);
        assert_eq!(opt.fill, 0.0);
        assert_eq!(opt.width, 1.0);
    }

    #[test]
    fn test_option_builder() {
        let opt = TextureOptions::new()
            .with_wrap(WrapMode::Clamp)
            .with_interp(InterpMode::Closest)
            .with_fill(1.0);
        assert_eq!(opt.s_wrap, WrapMode::Clamp);
        assert_eq!(opt.t_wrap, WrapMode::Clamp);
        assert_eq!(opt.r_wrap, WrapMode::Clamp);
        assert_eq!(opt.interp, InterpMode::Closest);
        assert_eq!(opt.fill, 1.0);
    }

    #[test]
    fn test_serialization() {
        let opt = TextureOptions::new().with_wrap(WrapMode::Mirror);
        let json = serde_json::to_string(&opt).unwrap();
        let decoded: TextureOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.s_wrap, WrapMode::Mirror);
    }
}
