//! The reference backend's `RendererServices` implementation
//!
//! Maps every contract operation onto the in-memory scene state. Internal
//! faults surface as the contract's `false`/`None`/zero with a debug log,
//! never as a panic into the calling engine.

use crate::scene::{SceneDescription, StoredAttr};
use crate::textures::TextureRegistry;
use glam::{Mat4, Vec3};
use glint_core::{spaces, Datum, ShadeContext, TraceOptions, TransformHandle, TypeDesc, Value};
use glint_services::{PointCloudStore, RendererServices, TextureSystem};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::debug;

/// A traceable sphere, optionally tagged into trace sets
#[derive(Debug, Clone)]
pub struct TraceSphere {
    /// Object name reported on shaded hits
    pub name: String,
    /// Sphere center in common space
    pub center: Vec3,
    /// Sphere radius
    pub radius: f32,
    /// Trace sets this sphere belongs to
    pub sets: Vec<String>,
}

impl TraceSphere {
    /// A sphere outside all trace sets
    pub fn new(name: impl Into<String>, center: Vec3, radius: f32) -> Self {
        Self {
            name: name.into(),
            center,
            radius,
            sets: Vec::new(),
        }
    }

    /// Tag the sphere into a trace set
    pub fn in_set(mut self, set: impl Into<String>) -> Self {
        self.sets.push(set.into());
        self
    }

    /// Nearest intersection distance within a window, if any
    fn hit(&self, origin: Vec3, dir: Vec3, min_dist: f32, max_dist: f32) -> Option<f32> {
        let oc = origin - self.center;
        let b = oc.dot(dir);
        let disc = b * b - (oc.length_squared() - self.radius * self.radius);
        if disc < 0.0 {
            return None;
        }
        let sqrt_disc = disc.sqrt();
        for t in [-b - sqrt_disc, -b + sqrt_disc] {
            if t >= min_dist && t <= max_dist {
                return Some(t);
            }
        }
        None
    }
}

/// Shading evaluated at a traced hit, delivered out-of-band
#[derive(Debug, Clone, PartialEq)]
pub struct ShadedHit {
    /// Name of the object that was hit
    pub object: String,
    /// Hit position in common space
    pub position: Vec3,
    /// Distance from the ray origin
    pub distance: f32,
}

/// The in-memory reference backend
pub struct SceneBackend {
    scene: SceneDescription,
    pointclouds: PointCloudStore,
    textures: TextureRegistry,
    spheres: Vec<TraceSphere>,
    messages: RwLock<HashMap<(String, String), Datum>>,
    shaded_hits: Mutex<Vec<ShadedHit>>,
}

impl SceneBackend {
    /// Wrap a scene description
    pub fn new(scene: SceneDescription) -> Self {
        Self {
            scene,
            pointclouds: PointCloudStore::new(),
            textures: TextureRegistry::new(),
            spheres: Vec::new(),
            messages: RwLock::new(HashMap::new()),
            shaded_hits: Mutex::new(Vec::new()),
        }
    }

    /// Add a traceable sphere
    pub fn with_sphere(mut self, sphere: TraceSphere) -> Self {
        self.spheres.push(sphere);
        self
    }

    /// The point-cloud store; the frame lifecycle collaborator calls
    /// `flush` on it once all writers have quiesced
    pub fn pointclouds(&self) -> &PointCloudStore {
        &self.pointclouds
    }

    /// The texture registry backing the sampling operations
    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    /// Publish a sourced message for later retrieval
    pub fn publish_message(
        &self,
        source: impl Into<String>,
        name: impl Into<String>,
        datum: Datum,
    ) {
        self.messages
            .write()
            .insert((source.into(), name.into()), datum);
    }

    /// Drain the shade-on-hit results accumulated so far
    pub fn take_shaded_hits(&self) -> Vec<ShadedHit> {
        std::mem::take(&mut self.shaded_hits.lock())
    }

    /// Apply the derivative flag to a stored attribute's datum
    fn finish_datum(stored: &StoredAttr, derivatives: bool) -> Datum {
        if derivatives {
            stored.datum.clone().fill_zero_derivs()
        } else {
            stored.datum.clone().strip_derivs()
        }
    }

    /// Attribute search order: explicit object, else bound object, then
    /// scene globals; a speculative query sees globals only
    fn find_attribute(
        &self,
        ctx: Option<&ShadeContext>,
        object: Option<&str>,
        name: &str,
    ) -> Option<&StoredAttr> {
        if let Some(obj) = object {
            return self.scene.object(obj)?.attribute(name);
        }
        if let Some(obj) = ctx.and_then(|c| c.object.as_deref()) {
            if let Some(attr) = self.scene.object(obj).and_then(|o| o.attribute(name)) {
                return Some(attr);
            }
        }
        self.scene.global(name)
    }
}

impl RendererServices for SceneBackend {
    fn matrix_at(
        &self,
        _ctx: Option<&ShadeContext>,
        xform: TransformHandle,
        time: f32,
    ) -> Option<Mat4> {
        Some(self.scene.handle_transform(xform)?.at(time))
    }

    fn matrix(&self, _ctx: Option<&ShadeContext>, xform: TransformHandle) -> Option<Mat4> {
        self.scene.handle_transform(xform)?.untimed()
    }

    fn named_matrix_at(
        &self,
        ctx: Option<&ShadeContext>,
        space: &str,
        time: f32,
    ) -> Option<Mat4> {
        match space {
            spaces::COMMON => Some(Mat4::IDENTITY),
            spaces::OBJECT => {
                // Object space resolves through the bound object, so a
                // speculative query has nothing to answer with
                let obj = ctx?.object.as_deref()?;
                Some(self.scene.object(obj)?.transform()?.at(time))
            }
            _ => Some(self.scene.named_transform(space)?.at(time)),
        }
    }

    fn named_matrix(&self, ctx: Option<&ShadeContext>, space: &str) -> Option<Mat4> {
        match space {
            spaces::COMMON => Some(Mat4::IDENTITY),
            spaces::OBJECT => {
                let obj = ctx?.object.as_deref()?;
                self.scene.object(obj)?.transform()?.untimed()
            }
            _ => self.scene.named_transform(space)?.untimed(),
        }
    }

    fn get_attribute(
        &self,
        ctx: Option<&ShadeContext>,
        derivatives: bool,
        object: Option<&str>,
        ty: TypeDesc,
        name: &str,
    ) -> Option<Datum> {
        let stored = self.find_attribute(ctx, object, name)?;
        if !ty.compatible(&stored.ty) {
            debug!(name, "attribute type mismatch");
            return None;
        }
        Some(Self::finish_datum(stored, derivatives))
    }

    fn get_array_attribute(
        &self,
        ctx: Option<&ShadeContext>,
        derivatives: bool,
        object: Option<&str>,
        ty: TypeDesc,
        name: &str,
        index: usize,
    ) -> Option<Datum> {
        let stored = self.find_attribute(ctx, object, name)?;
        if !stored.ty.is_array() || !ty.compatible(&stored.ty.element()) {
            debug!(name, "array attribute type mismatch");
            return None;
        }
        let element = stored.datum.value.as_array()?.get(index)?.clone();
        let datum = Datum::constant(element);
        Some(if derivatives {
            datum.fill_zero_derivs()
        } else {
            datum
        })
    }

    fn get_userdata(
        &self,
        derivatives: bool,
        name: &str,
        ty: TypeDesc,
        ctx: &ShadeContext,
    ) -> Option<Datum> {
        let obj = ctx.object.as_deref()?;
        let stored = self.scene.object(obj)?.userdata(name)?;
        if !ty.compatible(&stored.ty) {
            debug!(name, "user data type mismatch");
            return None;
        }
        Some(Self::finish_datum(stored, derivatives))
    }

    fn has_userdata(&self, name: &str, ty: TypeDesc, ctx: &ShadeContext) -> bool {
        ctx.object
            .as_deref()
            .and_then(|obj| self.scene.object(obj))
            .and_then(|o| o.userdata(name))
            .is_some_and(|stored| ty.compatible(&stored.ty))
    }

    fn texture_system(&self) -> Option<&dyn TextureSystem> {
        Some(&self.textures)
    }

    fn pointcloud_search(
        &self,
        ctx: Option<&ShadeContext>,
        filename: &str,
        center: Vec3,
        radius: f32,
        max_points: usize,
        sorted: bool,
        out_indices: &mut [usize],
        out_distances: Option<&mut [f32]>,
        derivs_offset: usize,
    ) -> usize {
        let cap = max_points.min(out_indices.len());
        let found = self.pointclouds.search(filename, center, radius, cap, sorted);

        for (slot, &(idx, _)) in found.iter().enumerate() {
            out_indices[slot] = idx;
        }
        if let Some(distances) = out_distances {
            for (slot, &(_, dist)) in found.iter().enumerate() {
                if let Some(d) = distances.get_mut(slot) {
                    *d = dist;
                }
            }
            if derivs_offset > 0 {
                // dD/dx of D = |center - p| is ((center - p)/D) . dc/dx,
                // with the center following the shading point's
                // differentials; a speculative query has none
                let (dc_dx, dc_dy) = match ctx {
                    Some(c) => (c.dp_dx, c.dp_dy),
                    None => (Vec3::ZERO, Vec3::ZERO),
                };
                let mut positions = vec![0.0f32; found.len() * 3];
                let indices: Vec<usize> = found.iter().map(|&(i, _)| i).collect();
                if self
                    .pointclouds
                    .get(filename, &indices, "position", TypeDesc::POINT, &mut positions)
                    .is_ok()
                {
                    for (slot, &(_, dist)) in found.iter().enumerate() {
                        let p = Vec3::from_slice(&positions[slot * 3..slot * 3 + 3]);
                        let grad = if dist > 1e-12 {
                            (center - p) / dist
                        } else {
                            Vec3::ZERO
                        };
                        if let Some(d) = distances.get_mut(derivs_offset + 2 * slot) {
                            *d = grad.dot(dc_dx);
                        }
                        if let Some(d) = distances.get_mut(derivs_offset + 2 * slot + 1) {
                            *d = grad.dot(dc_dy);
                        }
                    }
                }
            }
        }
        found.len()
    }

    fn pointcloud_get(
        &self,
        _ctx: Option<&ShadeContext>,
        filename: &str,
        indices: &[usize],
        attr_name: &str,
        attr_type: TypeDesc,
        out: &mut [f32],
    ) -> bool {
        match self.pointclouds.get(filename, indices, attr_name, attr_type, out) {
            Ok(()) => true,
            Err(err) => {
                debug!(filename, %err, "pointcloud get failed");
                false
            }
        }
    }

    fn pointcloud_write(
        &self,
        _ctx: Option<&ShadeContext>,
        filename: &str,
        position: Vec3,
        attributes: &[(&str, Value)],
    ) -> bool {
        match self.pointclouds.write(filename, position, attributes) {
            Ok(()) => true,
            Err(err) => {
                debug!(filename, %err, "pointcloud write failed");
                false
            }
        }
    }

    fn trace(
        &self,
        options: &TraceOptions,
        _ctx: Option<&ShadeContext>,
        p: Vec3,
        _dp_dx: Vec3,
        _dp_dy: Vec3,
        r: Vec3,
        _dr_dx: Vec3,
        _dr_dy: Vec3,
    ) -> bool {
        let len = r.length();
        if len < 1e-12 {
            return false;
        }
        let dir = r / len;

        let mut nearest: Option<(f32, &TraceSphere)> = None;
        for sphere in &self.spheres {
            if let Some(set) = options.trace_set.as_deref() {
                if !sphere.sets.iter().any(|s| s == set) {
                    continue;
                }
            }
            if let Some(t) = sphere.hit(p, dir, options.min_dist, options.max_dist) {
                if nearest.is_none_or(|(best, _)| t < best) {
                    nearest = Some((t, sphere));
                }
            }
        }

        match nearest {
            Some((t, sphere)) => {
                if options.shade {
                    self.shaded_hits.lock().push(ShadedHit {
                        object: sphere.name.clone(),
                        position: p + dir * t,
                        distance: t,
                    });
                }
                true
            }
            None => false,
        }
    }

    fn get_message(
        &self,
        _ctx: &ShadeContext,
        source: &str,
        name: &str,
        ty: TypeDesc,
        derivatives: bool,
    ) -> Option<Datum> {
        let messages = self.messages.read();
        let datum = messages.get(&(source.to_string(), name.to_string()))?;
        if !datum.value.type_desc().compatible(&ty) {
            debug!(source, name, "message type mismatch");
            return None;
        }
        Some(if derivatives {
            datum.clone().fill_zero_derivs()
        } else {
            datum.clone().strip_derivs()
        })
    }
}
