//! Declarative scene state behind the reference backend
//!
//! A `SceneDescription` is the renderer-owned state the service contract
//! exposes: transform tables, attribute tables, and per-object user data.
//! It is built once, up front, and only read during shading.

use glam::Mat4;
use glint_core::{Datum, TransformHandle, TypeDesc, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A renderer-side coordinate transform
///
/// Either a single matrix or a set of time keyframes interpolated linearly
/// and clamped at the ends. A keyframed transform with two distinct key
/// matrices is time-varying: no-time queries against it must fail closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NamedTransform {
    /// Constant over the frame
    Static(Mat4),
    /// (time, matrix) keys, sorted by time
    Keyframed(Vec<(f32, Mat4)>),
}

impl NamedTransform {
    /// Build a keyframed transform, sorting the keys by time
    pub fn keyframed(mut keys: Vec<(f32, Mat4)>) -> Self {
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self::Keyframed(keys)
    }

    /// Whether the transform changes over the frame
    pub fn is_time_varying(&self) -> bool {
        match self {
            Self::Static(_) => false,
            Self::Keyframed(keys) => keys.windows(2).any(|w| w[0].1 != w[1].1),
        }
    }

    /// The matrix at a concrete time
    pub fn at(&self, time: f32) -> Mat4 {
        match self {
            Self::Static(m) => *m,
            Self::Keyframed(keys) => match keys.len() {
                0 => Mat4::IDENTITY,
                1 => keys[0].1,
                _ => {
                    let first = &keys[0];
                    let last = &keys[keys.len() - 1];
                    if time <= first.0 {
                        return first.1;
                    }
                    if time >= last.0 {
                        return last.1;
                    }
                    let hi = keys.partition_point(|(t, _)| *t <= time);
                    let (t0, m0) = keys[hi - 1];
                    let (t1, m1) = keys[hi];
                    let f = if t1 > t0 { (time - t0) / (t1 - t0) } else { 0.0 };
                    m0 * (1.0 - f) + m1 * f
                }
            },
        }
    }

    /// The matrix when no time is given; `None` for time-varying transforms
    pub fn untimed(&self) -> Option<Mat4> {
        if self.is_time_varying() {
            None
        } else {
            Some(self.at(0.0))
        }
    }
}

/// An attribute value and its declared type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAttr {
    /// Declared type, including vector semantics and array shape
    pub ty: TypeDesc,
    /// The value, possibly with derivatives
    pub datum: Datum,
}

/// Attributes and user data attached to one scene object
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectRecord {
    attributes: HashMap<String, StoredAttr>,
    userdata: HashMap<String, StoredAttr>,
    transform: Option<NamedTransform>,
}

impl ObjectRecord {
    /// An empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an attribute
    pub fn with_attribute(mut self, name: impl Into<String>, ty: TypeDesc, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), StoredAttr { ty, datum: Datum::constant(value) });
        self
    }

    /// Attach per-point user data
    pub fn with_userdata(mut self, name: impl Into<String>, ty: TypeDesc, datum: Datum) -> Self {
        self.userdata.insert(name.into(), StoredAttr { ty, datum });
        self
    }

    /// Look up an attribute
    pub fn attribute(&self, name: &str) -> Option<&StoredAttr> {
        self.attributes.get(name)
    }

    /// Look up user data
    pub fn userdata(&self, name: &str) -> Option<&StoredAttr> {
        self.userdata.get(name)
    }

    /// Set the object-to-common transform
    pub fn with_transform(mut self, transform: NamedTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// The object-to-common transform, if one was set
    pub fn transform(&self) -> Option<&NamedTransform> {
        self.transform.as_ref()
    }
}

/// The renderer-owned scene state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    globals: HashMap<String, StoredAttr>,
    objects: HashMap<String, ObjectRecord>,
    named_transforms: HashMap<String, NamedTransform>,
    /// Handle table; a `TransformHandle` is an index into it
    handles: Vec<NamedTransform>,
}

impl SceneDescription {
    /// An empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a scene-global attribute
    pub fn with_global(mut self, name: impl Into<String>, ty: TypeDesc, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), StoredAttr { ty, datum: Datum::constant(value) });
        self
    }

    /// Add a named object
    pub fn with_object(mut self, name: impl Into<String>, object: ObjectRecord) -> Self {
        self.objects.insert(name.into(), object);
        self
    }

    /// Add a named coordinate space
    pub fn with_space(mut self, name: impl Into<String>, transform: NamedTransform) -> Self {
        self.named_transforms.insert(name.into(), transform);
        self
    }

    /// Mint a handle for a transform
    ///
    /// The returned token is only meaningful to the scene that minted it;
    /// unknown tokens resolve to not-found.
    pub fn register_transform(&mut self, transform: NamedTransform) -> TransformHandle {
        let handle = TransformHandle::from_raw(self.handles.len() as u64);
        self.handles.push(transform);
        handle
    }

    /// Look up a scene-global attribute
    pub fn global(&self, name: &str) -> Option<&StoredAttr> {
        self.globals.get(name)
    }

    /// Look up an object by name
    pub fn object(&self, name: &str) -> Option<&ObjectRecord> {
        self.objects.get(name)
    }

    /// Look up a named coordinate space
    pub fn named_transform(&self, space: &str) -> Option<&NamedTransform> {
        self.named_transforms.get(space)
    }

    /// Resolve a minted handle
    pub fn handle_transform(&self, handle: TransformHandle) -> Option<&NamedTransform> {
        self.handles.get(handle.raw() as usize)
    }
}
