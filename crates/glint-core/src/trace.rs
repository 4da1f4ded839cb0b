//! Options for visibility ray queries

use serde::{Deserialize, Serialize};

/// Options bounding a visibility ray query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceOptions {
    /// Ignore hits closer than this along the ray
    pub min_dist: f32,
    /// Ignore hits farther than this along the ray
    pub max_dist: f32,
    /// Request that the renderer shade the hit point, delivered out-of-band
    pub shade: bool,
    /// Restrict the query to a named subset of scene geometry
    pub trace_set: Option<String>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            min_dist: 0.0,
            max_dist: f32::INFINITY,
            shade: false,
            trace_set: None,
        }
    }
}

impl TraceOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the search window along the ray
    pub fn with_range(mut self, min_dist: f32, max_dist: f32) -> Self {
        self.min_dist = min_dist;
        self.max_dist = max_dist;
        self
    }

    /// Request shading at the hit point
    pub fn with_shade(mut self) -> Self {
        self.shade = true;
        self
    }

    /// Restrict the query to a named trace set
    pub fn with_trace_set(mut self, set: impl Into<String>) -> Self {
        self.trace_set = Some(set.into());
        self
    }
}
