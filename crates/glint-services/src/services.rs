//! The `RendererServices` trait
//!
//! One trait object per renderer backend; the shading engine holds it for
//! the lifetime of a frame and calls into it from many point evaluations at
//! once.

use crate::texture::{TextureOptions, TextureSystem};
use glam::{Mat4, Vec3};
use glint_core::{Datum, ShadeContext, TraceOptions, TransformHandle, TypeDesc, Value, VecSemantics};
use tracing::debug;

/// Determinant magnitude below which a matrix is treated as singular.
const SINGULAR_EPSILON: f32 = 1e-12;

/// Numerically invert a matrix, refusing singular or non-finite results.
fn invert_checked(m: Mat4) -> Option<Mat4> {
    let det = m.determinant();
    if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
        return None;
    }
    let inv = m.inverse();
    inv.is_finite().then_some(inv)
}

/// Callbacks a renderer provides to the shading execution engine
///
/// Mandatory methods are the forward transform queries and the attribute /
/// user-data accessors; everything else defaults to a derived or
/// "unsupported" behavior. See the crate docs for the full contract.
pub trait RendererServices: Send + Sync {
    // ── Transform resolution ────────────────────────────────────────

    /// Matrix for a handle-identified transform at a concrete time.
    ///
    /// Returns `None` if the handle is unknown to this backend.
    fn matrix_at(
        &self,
        ctx: Option<&ShadeContext>,
        xform: TransformHandle,
        time: f32,
    ) -> Option<Mat4>;

    /// Matrix for a handle-identified transform with no time given.
    ///
    /// Must return `None` whenever the transform is known to vary over
    /// time, even though [`matrix_at`](Self::matrix_at) would succeed for
    /// every concrete time. Silently picking an arbitrary time would hand
    /// an optimizer a wrong answer it cannot detect.
    fn matrix(&self, ctx: Option<&ShadeContext>, xform: TransformHandle) -> Option<Mat4>;

    /// Matrix taking the named space to common space at a concrete time.
    fn named_matrix_at(&self, ctx: Option<&ShadeContext>, space: &str, time: f32) -> Option<Mat4>;

    /// Matrix taking the named space to common space, no time given.
    ///
    /// Fails closed for time-varying spaces, like [`matrix`](Self::matrix).
    fn named_matrix(&self, ctx: Option<&ShadeContext>, space: &str) -> Option<Mat4>;

    /// Inverse of [`matrix_at`](Self::matrix_at).
    ///
    /// The default numerically inverts the forward result and fails if the
    /// forward query failed or the matrix is singular. Override when an
    /// analytically stable inverse is available.
    fn inverse_matrix_at(
        &self,
        ctx: Option<&ShadeContext>,
        xform: TransformHandle,
        time: f32,
    ) -> Option<Mat4> {
        self.matrix_at(ctx, xform, time).and_then(invert_checked)
    }

    /// Inverse of [`matrix`](Self::matrix), with the same no-time rule.
    fn inverse_matrix(&self, ctx: Option<&ShadeContext>, xform: TransformHandle) -> Option<Mat4> {
        self.matrix(ctx, xform).and_then(invert_checked)
    }

    /// Matrix taking common space to the named space at a concrete time.
    fn named_inverse_matrix_at(
        &self,
        ctx: Option<&ShadeContext>,
        space: &str,
        time: f32,
    ) -> Option<Mat4> {
        self.named_matrix_at(ctx, space, time).and_then(invert_checked)
    }

    /// Matrix taking common space to the named space, no time given.
    fn named_inverse_matrix(&self, ctx: Option<&ShadeContext>, space: &str) -> Option<Mat4> {
        self.named_matrix(ctx, space).and_then(invert_checked)
    }

    /// Bulk point transform between named spaces, bypassing matrices.
    ///
    /// Exists so a renderer can expose transforms that no single affine
    /// matrix expresses (deformation fields, lattices). Transforms
    /// `points[i]` into `out[i]` under the given vector semantics.
    ///
    /// Calling with zero points performs no work and answers whether a
    /// nonlinear transform between `from` and `to` exists at all; with both
    /// names empty it answers whether *any* nonlinear transform is
    /// supported. The default reports unsupported and callers fall back to
    /// the matrix path.
    fn transform_points(
        &self,
        _ctx: Option<&ShadeContext>,
        _from: &str,
        _to: &str,
        _time: f32,
        _points: &[Vec3],
        _out: &mut [Vec3],
        _semantics: VecSemantics,
    ) -> bool {
        false
    }

    // ── Attributes and user data ────────────────────────────────────

    /// Fetch a named attribute.
    ///
    /// With `object` set, only that object's table is searched. With
    /// `object` empty, the bound object is searched first, then the scene
    /// globals. A `None` context marks a speculative optimizer query that
    /// does not yet know the bound object: answer only when the attribute
    /// resolves without object-specific state, otherwise return `None`.
    ///
    /// `None` also covers a type mismatch between `ty` and the stored data.
    fn get_attribute(
        &self,
        ctx: Option<&ShadeContext>,
        derivatives: bool,
        object: Option<&str>,
        ty: TypeDesc,
        name: &str,
    ) -> Option<Datum>;

    /// Fetch one element of a named array attribute, bounds-checked.
    fn get_array_attribute(
        &self,
        ctx: Option<&ShadeContext>,
        derivatives: bool,
        object: Option<&str>,
        ty: TypeDesc,
        name: &str,
        index: usize,
    ) -> Option<Datum>;

    /// Fetch named per-point user data from the bound object.
    ///
    /// User data lives in a distinct namespace from attributes and always
    /// requires a concrete evaluation point. When `derivatives` is set the
    /// result carries both derivatives, zero-filled if the datum is
    /// constant.
    fn get_userdata(
        &self,
        derivatives: bool,
        name: &str,
        ty: TypeDesc,
        ctx: &ShadeContext,
    ) -> Option<Datum>;

    /// Whether the bound object carries the named user data, without
    /// fetching its value.
    fn has_userdata(&self, name: &str, ty: TypeDesc, ctx: &ShadeContext) -> bool;

    // ── Filtered texture sampling ───────────────────────────────────

    /// The texture collaborator behind the default sampling methods.
    fn texture_system(&self) -> Option<&dyn TextureSystem> {
        None
    }

    /// Filtered 2D texture lookup.
    ///
    /// `(s, t)` is the sample coordinate; the four differentials give its
    /// rate of change along two canonical directions and define an
    /// anisotropic filter footprint, not a point sample. Writes `nchannels`
    /// floats into `result` and, when supplied, per-channel derivatives
    /// into `d_ds`/`d_dt`. Returns `false` with outputs untouched if the
    /// file is unknown.
    #[allow(clippy::too_many_arguments)]
    fn texture(
        &self,
        filename: &str,
        options: &TextureOptions,
        _ctx: Option<&ShadeContext>,
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
    ) -> bool {
        match self.texture_system() {
            Some(ts) => ts.texture(
                filename, options, s, t, ds_dx, dt_dx, ds_dy, dt_dy, nchannels, result, d_ds, d_dt,
            ),
            None => {
                debug!(filename, "2d texture lookup with no texture system");
                false
            }
        }
    }

    /// Filtered 3D (volumetric) texture lookup.
    #[allow(clippy::too_many_arguments)]
    fn texture3d(
        &self,
        filename: &str,
        options: &TextureOptions,
        _ctx: Option<&ShadeContext>,
        p: Vec3,
        dp_dx: Vec3,
        dp_dy: Vec3,
        dp_dz: Vec3,
        nchannels: usize,
        result: &mut [f32],
        d_ds: Option<&mut [f32]>,
        d_dt: Option<&mut [f32]>,
        d_dr: Option<&mut [f32]>,
    ) -> bool {
        match self.texture_system() {
            Some(ts) => ts.texture3d(
                filename, options, p, dp_dx, dp_dy, dp_dz, nchannels, result, d_ds, d_dt, d_dr,
            ),
            None => {
                debug!(filename, "3d texture lookup with no texture system");
                false
            }
        }
    }

    /// Filtered environment (directional) lookup along `r`.
    #[allow(clippy::too_many_arguments)]
    fn environment(
        &self,
        filename: &str,
        options: &TextureOptions,
        _ctx: Option<&ShadeContext>,
        r: Vec3,
        dr_dx: Vec3,
        dr_dy: Vec3,
        nchannels: usize,
        result: &mut [f32],
        d_ds: Option<&mut [f32]>,
        d_dt: Option<&mut [f32]>,
    ) -> bool {
        match self.texture_system() {
            Some(ts) => {
                ts.environment(filename, options, r, dr_dx, dr_dy, nchannels, result, d_ds, d_dt)
            }
            None => {
                debug!(filename, "environment lookup with no texture system");
                false
            }
        }
    }

    /// Metadata query against a texture, type-checked against `datatype`.
    ///
    /// Fails on an unknown file, an unknown datum name, or a type mismatch.
    fn get_texture_info(
        &self,
        _ctx: Option<&ShadeContext>,
        filename: &str,
        subimage: usize,
        dataname: &str,
        datatype: TypeDesc,
    ) -> Option<Value> {
        self.texture_system()?
            .texture_info(filename, subimage, dataname, datatype)
    }

    // ── Point clouds ────────────────────────────────────────────────

    /// Nearest-neighbor search in a named point cloud.
    ///
    /// Finds points within `radius` of `center`, writing their indices into
    /// `out_indices` and, when supplied, their distances into
    /// `out_distances`. Never returns more than `max_points`. With `sorted`
    /// the results come back in non-decreasing distance order with a stable
    /// tie-break.
    ///
    /// When `derivs_offset > 0` and distances were requested, distance
    /// derivatives are additionally written into `out_distances`
    /// interleaved from that offset: `[derivs_offset + 2*i]` holds the x
    /// derivative of point `i` and `[derivs_offset + 2*i + 1]` the y
    /// derivative. The default implementation knows no clouds and returns
    /// zero.
    #[allow(clippy::too_many_arguments)]
    fn pointcloud_search(
        &self,
        _ctx: Option<&ShadeContext>,
        filename: &str,
        _center: Vec3,
        _radius: f32,
        _max_points: usize,
        _sorted: bool,
        _out_indices: &mut [usize],
        _out_distances: Option<&mut [f32]>,
        _derivs_offset: usize,
    ) -> usize {
        debug!(filename, "pointcloud search not supported by this backend");
        0
    }

    /// Batched attribute fetch by point index.
    ///
    /// Writes one `attr_type`-shaped value per index into `out`. Any
    /// invalid index or unknown attribute fails the entire batch with `out`
    /// untouched; there is no partial success.
    fn pointcloud_get(
        &self,
        _ctx: Option<&ShadeContext>,
        filename: &str,
        _indices: &[usize],
        _attr_name: &str,
        _attr_type: TypeDesc,
        _out: &mut [f32],
    ) -> bool {
        debug!(filename, "pointcloud get not supported by this backend");
        false
    }

    /// Append a point to a named cloud's accumulation buffer.
    ///
    /// The point becomes searchable only after the end-of-frame flush,
    /// triggered by the frame lifecycle collaborator; this call never
    /// persists anything itself. Concurrent writes to the same filename
    /// must all survive the flush.
    fn pointcloud_write(
        &self,
        _ctx: Option<&ShadeContext>,
        filename: &str,
        _position: Vec3,
        _attributes: &[(&str, Value)],
    ) -> bool {
        debug!(filename, "pointcloud write not supported by this backend");
        false
    }

    // ── Ray queries ─────────────────────────────────────────────────

    /// Bounded visibility query from `p` along `r`.
    ///
    /// Reports whether anything lies in `[min_dist, max_dist]` along the
    /// ray, restricted to `trace_set` when one is named. With
    /// `options.shade` the renderer additionally evaluates shading at the
    /// hit point, delivered out-of-band rather than through this return
    /// value. The default reports no-hit, so a backend without ray tracing
    /// remains otherwise fully usable.
    #[allow(clippy::too_many_arguments)]
    fn trace(
        &self,
        _options: &TraceOptions,
        _ctx: Option<&ShadeContext>,
        _p: Vec3,
        _dp_dx: Vec3,
        _dp_dy: Vec3,
        _r: Vec3,
        _dr_dx: Vec3,
        _dr_dy: Vec3,
    ) -> bool {
        false
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Retrieve a named, typed message published by `source` for this
    /// evaluation point.
    ///
    /// Only sourced messages arrive here; ordinary intra-program value
    /// passing is a separate mechanism. The default knows no sources.
    fn get_message(
        &self,
        _ctx: &ShadeContext,
        _source: &str,
        _name: &str,
        _ty: TypeDesc,
        _derivatives: bool,
    ) -> Option<Datum> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    /// Minimal backend: one static handle transform, one animated one,
    /// one singular named space, and a couple of global attributes.
    struct MiniBackend;

    const STATIC_XFORM: TransformHandle = TransformHandle::from_raw(1);
    const ANIMATED_XFORM: TransformHandle = TransformHandle::from_raw(2);
    const SINGULAR_XFORM: TransformHandle = TransformHandle::from_raw(3);

    fn translation(t: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(t, 0.0, 0.0))
    }

    impl RendererServices for MiniBackend {
        fn matrix_at(
            &self,
            _ctx: Option<&ShadeContext>,
            xform: TransformHandle,
            time: f32,
        ) -> Option<Mat4> {
            match xform {
                STATIC_XFORM => Some(translation(2.0)),
                ANIMATED_XFORM => Some(translation(time)),
                SINGULAR_XFORM => Some(Mat4::ZERO),
                _ => None,
            }
        }

        fn matrix(&self, ctx: Option<&ShadeContext>, xform: TransformHandle) -> Option<Mat4> {
            // Animated handles fail closed without a time
            match xform {
                ANIMATED_XFORM => None,
                _ => self.matrix_at(ctx, xform, 0.0),
            }
        }

        fn named_matrix_at(
            &self,
            _ctx: Option<&ShadeContext>,
            space: &str,
            _time: f32,
        ) -> Option<Mat4> {
            match space {
                "world" => Some(Mat4::IDENTITY),
                "flat" => Some(Mat4::from_scale(Vec3::new(1.0, 1.0, 0.0))),
                _ => None,
            }
        }

        fn named_matrix(&self, ctx: Option<&ShadeContext>, space: &str) -> Option<Mat4> {
            self.named_matrix_at(ctx, space, 0.0)
        }

        fn get_attribute(
            &self,
            ctx: Option<&ShadeContext>,
            _derivatives: bool,
            object: Option<&str>,
            ty: TypeDesc,
            name: &str,
        ) -> Option<Datum> {
            // Globals resolve without a context; object attributes need one
            if object.is_none() && name == "renderer:name" && ty.compatible(&TypeDesc::STRING) {
                return Some(Datum::constant("mini"));
            }
            let ctx = ctx?;
            let obj = object.or(ctx.object.as_deref())?;
            (obj == "ball" && name == "radius" && ty.compatible(&TypeDesc::FLOAT))
                .then(|| Datum::constant(1.5f32))
        }

        fn get_array_attribute(
            &self,
            _ctx: Option<&ShadeContext>,
            _derivatives: bool,
            _object: Option<&str>,
            ty: TypeDesc,
            name: &str,
            index: usize,
        ) -> Option<Datum> {
            if name == "shutter" && ty.compatible(&TypeDesc::FLOAT) && index < 2 {
                return Some(Datum::constant(index as f32 * 0.5));
            }
            None
        }

        fn get_userdata(
            &self,
            derivatives: bool,
            name: &str,
            ty: TypeDesc,
            _ctx: &ShadeContext,
        ) -> Option<Datum> {
            if name == "temperature" && ty.compatible(&TypeDesc::FLOAT) {
                let d = Datum::constant(300.0f32);
                return Some(if derivatives { d.fill_zero_derivs() } else { d });
            }
            None
        }

        fn has_userdata(&self, name: &str, ty: TypeDesc, _ctx: &ShadeContext) -> bool {
            name == "temperature" && ty.compatible(&TypeDesc::FLOAT)
        }
    }

    fn mat_close(a: Mat4, b: Mat4, eps: f32) -> bool {
        (0..4).all(|c| (a.col(c) - b.col(c)).abs().max_element() < eps)
    }

    #[test]
    fn test_default_inverse_round_trips() {
        let be = MiniBackend;
        let m = be.matrix_at(None, ANIMATED_XFORM, 0.75).unwrap();
        let inv = be.inverse_matrix_at(None, ANIMATED_XFORM, 0.75).unwrap();
        assert!(mat_close(m * inv, Mat4::IDENTITY, 1e-4));

        let m = be.named_matrix_at(None, "world", 0.0).unwrap();
        let inv = be.named_inverse_matrix_at(None, "world", 0.0).unwrap();
        assert!(mat_close(m * inv, Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn test_inverse_fails_on_singular() {
        let be = MiniBackend;
        assert!(be.matrix_at(None, SINGULAR_XFORM, 0.0).is_some());
        assert!(be.inverse_matrix_at(None, SINGULAR_XFORM, 0.0).is_none());

        // A projection-like named space that drops a dimension
        assert!(be.named_matrix(None, "flat").is_some());
        assert!(be.named_inverse_matrix(None, "flat").is_none());
    }

    #[test]
    fn test_inverse_fails_when_forward_fails() {
        let be = MiniBackend;
        let unknown = TransformHandle::from_raw(99);
        assert!(be.inverse_matrix_at(None, unknown, 0.0).is_none());
        assert!(be.named_inverse_matrix_at(None, "nope", 0.0).is_none());
    }

    #[test]
    fn test_no_time_fails_for_time_varying() {
        let be = MiniBackend;
        // Timed queries succeed at any concrete time
        assert!(be.matrix_at(None, ANIMATED_XFORM, 0.0).is_some());
        assert!(be.matrix_at(None, ANIMATED_XFORM, 1.0).is_some());
        // The no-time forms fail closed
        assert!(be.matrix(None, ANIMATED_XFORM).is_none());
        assert!(be.inverse_matrix(None, ANIMATED_XFORM).is_none());
        // Static handles still resolve without a time
        assert!(be.matrix(None, STATIC_XFORM).is_some());
    }

    #[test]
    fn test_transform_points_defaults_to_unsupported() {
        let be = MiniBackend;
        // Capability probe: zero points, both spaces named
        assert!(!be.transform_points(
            None,
            "world",
            "object",
            0.0,
            &[],
            &mut [],
            VecSemantics::Point
        ));
        // Probe for any nonlinear support at all
        assert!(!be.transform_points(None, "", "", 0.0, &[], &mut [], VecSemantics::Point));
        // Real work is refused too; callers fall back to the matrix path
        let pts = [Vec3::ONE];
        let mut out = [Vec3::ZERO];
        assert!(!be.transform_points(
            None,
            "world",
            "object",
            0.0,
            &pts,
            &mut out,
            VecSemantics::Point
        ));
        assert_eq!(out[0], Vec3::ZERO);
    }

    #[test]
    fn test_speculative_attribute_query() {
        let be = MiniBackend;
        // Context-free global resolves
        let d = be
            .get_attribute(None, false, None, TypeDesc::STRING, "renderer:name")
            .unwrap();
        assert_eq!(d.value.as_str(), Some("mini"));
        // Object-dependent attribute refuses a null context
        assert!(be.get_attribute(None, false, None, TypeDesc::FLOAT, "radius").is_none());
        // ... but resolves once a bound context exists
        let ctx = ShadeContext::at(Vec3::ZERO).with_object("ball");
        let d = be
            .get_attribute(Some(&ctx), false, None, TypeDesc::FLOAT, "radius")
            .unwrap();
        assert_eq!(d.value.as_float(), Some(1.5));
    }

    #[test]
    fn test_type_mismatch_is_not_found() {
        let be = MiniBackend;
        assert!(be.get_attribute(None, false, None, TypeDesc::FLOAT, "renderer:name").is_none());
        let ctx = ShadeContext::at(Vec3::ZERO);
        assert!(be.get_userdata(false, "temperature", TypeDesc::STRING, &ctx).is_none());
        assert!(!be.has_userdata("temperature", TypeDesc::STRING, &ctx));
    }

    #[test]
    fn test_userdata_derivatives_zero_filled() {
        let be = MiniBackend;
        let ctx = ShadeContext::at(Vec3::ZERO);
        let d = be.get_userdata(true, "temperature", TypeDesc::FLOAT, &ctx).unwrap();
        assert_eq!(d.dx, Some(Value::Float(0.0)));
        assert_eq!(d.dy, Some(Value::Float(0.0)));
        let d = be.get_userdata(false, "temperature", TypeDesc::FLOAT, &ctx).unwrap();
        assert!(!d.has_derivs());
    }

    #[test]
    fn test_unimplemented_services_degrade() {
        let be = MiniBackend;
        let ctx = ShadeContext::at(Vec3::ZERO);
        let mut buf = [7.0f32; 3];

        // No texture system: lookups fail with the buffer untouched
        assert!(!be.texture(
            "checker.tx",
            &TextureOptions::default(),
            Some(&ctx),
            0.5,
            0.5,
            0.0,
            0.0,
            0.0,
            0.0,
            3,
            &mut buf,
            None,
            None
        ));
        assert_eq!(buf, [7.0; 3]);
        assert!(be
            .get_texture_info(None, "checker.tx", 0, "resolution", TypeDesc::INT.array_of(2))
            .is_none());

        // No point clouds
        let mut indices = [0usize; 4];
        let found = be.pointcloud_search(
            Some(&ctx),
            "cloud.pc",
            Vec3::ZERO,
            1.0,
            4,
            true,
            &mut indices,
            None,
            0,
        );
        assert_eq!(found, 0);
        assert!(!be.pointcloud_write(Some(&ctx), "cloud.pc", Vec3::ZERO, &[]));

        // No ray tracing: always no-hit
        assert!(!be.trace(
            &TraceOptions::default(),
            Some(&ctx),
            Vec3::ZERO,
            Vec3::ZERO,
            Vec3::ZERO,
            Vec3::Z,
            Vec3::ZERO,
            Vec3::ZERO
        ));

        // No message channel
        assert!(be.get_message(&ctx, "trace", "hit", TypeDesc::INT, false).is_none());
    }

    #[test]
    fn test_invert_checked_rejects_non_finite() {
        let m = Mat4::from_cols(
            Vec4::new(f32::NAN, 0.0, 0.0, 0.0),
            Vec4::Y,
            Vec4::Z,
            Vec4::W,
        );
        assert!(invert_checked(m).is_none());
    }
}
