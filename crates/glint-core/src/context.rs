//! Per-point evaluation context
//!
//! A `ShadeContext` describes the shading point currently being evaluated:
//! its position, screen-space differentials, shading normal, surface
//! parameters, time, and the object it is bound to. The calling engine owns
//! it; service operations only read it.
//!
//! Operations accept `Option<&ShadeContext>` where a speculative query makes
//! sense. `None` means a static optimizer is asking before any point exists;
//! such a query must be answered from context-independent state or refused,
//! never by dereferencing a placeholder.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// The shading point being evaluated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadeContext {
    /// Position of the point
    pub p: Vec3,
    /// Position differential along the first canonical direction
    pub dp_dx: Vec3,
    /// Position differential along the second canonical direction
    pub dp_dy: Vec3,
    /// Shading normal
    pub n: Vec3,
    /// First surface parameter
    pub u: f32,
    /// Second surface parameter
    pub v: f32,
    /// u differentials
    pub du_dx: f32,
    pub du_dy: f32,
    /// v differentials
    pub dv_dx: f32,
    pub dv_dy: f32,
    /// Shutter-relative evaluation time
    pub time: f32,
    /// Name of the object this point lies on, if bound
    pub object: Option<String>,
}

impl ShadeContext {
    /// Create a context at a position, everything else defaulted
    pub fn at(p: Vec3) -> Self {
        Self {
            p,
            dp_dx: Vec3::ZERO,
            dp_dy: Vec3::ZERO,
            n: Vec3::Z,
            u: 0.0,
            v: 0.0,
            du_dx: 0.0,
            du_dy: 0.0,
            dv_dx: 0.0,
            dv_dy: 0.0,
            time: 0.0,
            object: None,
        }
    }

    /// Set the evaluation time
    pub fn with_time(mut self, time: f32) -> Self {
        self.time = time;
        self
    }

    /// Bind the context to a named object
    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Set the position differentials
    pub fn with_differentials(mut self, dp_dx: Vec3, dp_dy: Vec3) -> Self {
        self.dp_dx = dp_dx;
        self.dp_dy = dp_dy;
        self
    }

    /// Set the shading normal
    pub fn with_normal(mut self, n: Vec3) -> Self {
        self.n = n;
        self
    }

    /// Set the surface parameters and their differentials
    pub fn with_uv(mut self, u: f32, v: f32, duv_dx: [f32; 2], duv_dy: [f32; 2]) -> Self {
        self.u = u;
        self.v = v;
        self.du_dx = duv_dx[0];
        self.dv_dx = duv_dx[1];
        self.du_dy = duv_dy[0];
        self.dv_dy = duv_dy[1];
        self
    }
}
