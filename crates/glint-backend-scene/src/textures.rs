//! In-memory texture system
//!
//! A small implementation of the texture seam: float images and volumes
//! registered under filenames, sampled with wrap modes, bilinear or
//! trilinear interpolation, and a deterministic multi-tap box filter over
//! the caller's differential footprint. All-zero differentials degrade to
//! a single unfiltered tap, which the seam documents as a quality
//! degradation rather than an error.

use glam::Vec3;
use glint_core::{TypeDesc, Value};
use glint_services::{InterpMode, TextureOptions, TextureSystem, WrapMode};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::f32::consts::{PI, TAU};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Texture construction errors
#[derive(Debug, Error)]
pub enum TextureError {
    /// Pixel buffer does not match the declared dimensions
    #[error("pixel data holds {got} floats, expected {expected}")]
    DataSize { expected: usize, got: usize },

    /// An image axis or the channel count is zero
    #[error("zero-sized texture")]
    ZeroSized,
}

/// Resolve a texel coordinate along one axis; `None` means outside-is-black
fn wrap_coord(i: i64, n: usize, mode: WrapMode) -> Option<usize> {
    let n_i = n as i64;
    match mode {
        WrapMode::Periodic => Some(i.rem_euclid(n_i) as usize),
        WrapMode::Clamp => Some(i.clamp(0, n_i - 1) as usize),
        WrapMode::Black => (0..n_i).contains(&i).then_some(i as usize),
        WrapMode::Mirror => {
            let period = 2 * n_i;
            let m = i.rem_euclid(period);
            let m = if m < n_i { m } else { period - 1 - m };
            Some(m as usize)
        }
    }
}

/// A float image with a fixed channel count
pub struct SourceImage {
    width: usize,
    height: usize,
    channels: usize,
    /// Row-major, `channels` floats per texel
    data: Vec<f32>,
}

impl SourceImage {
    /// Wrap raw pixel data, validating its size
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self, TextureError> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(TextureError::ZeroSized);
        }
        let expected = width * height * channels;
        if data.len() != expected {
            return Err(TextureError::DataSize {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Generate an image texel by texel
    pub fn from_fn(
        width: usize,
        height: usize,
        channels: usize,
        f: impl Fn(usize, usize, &mut [f32]),
    ) -> Self {
        let mut data = vec![0.0; width.max(1) * height.max(1) * channels.max(1)];
        for y in 0..height {
            for x in 0..width {
                let at = (y * width + x) * channels;
                f(x, y, &mut data[at..at + channels]);
            }
        }
        Self {
            width: width.max(1),
            height: height.max(1),
            channels: channels.max(1),
            data,
        }
    }

    /// Image width in texels
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in texels
    pub fn height(&self) -> usize {
        self.height
    }

    /// Channels per texel
    pub fn channels(&self) -> usize {
        self.channels
    }

    fn texel(&self, x: i64, y: i64, options: &TextureOptions) -> Option<&[f32]> {
        let x = wrap_coord(x, self.width, options.s_wrap)?;
        let y = wrap_coord(y, self.height, options.t_wrap)?;
        let at = (y * self.width + x) * self.channels;
        Some(&self.data[at..at + self.channels])
    }

    /// One interpolated tap at (s, t), accumulated into `acc` with `weight`
    fn tap(&self, s: f32, t: f32, options: &TextureOptions, weight: f32, acc: &mut [f32]) {
        let x = s * self.width as f32 - 0.5;
        let y = t * self.height as f32 - 0.5;
        match options.interp {
            InterpMode::Closest => {
                if let Some(texel) =
                    self.texel(x.round() as i64, y.round() as i64, options)
                {
                    for (a, v) in acc.iter_mut().zip(texel) {
                        *a += weight * v;
                    }
                }
            }
            InterpMode::Linear => {
                let x0 = x.floor();
                let y0 = y.floor();
                let fx = x - x0;
                let fy = y - y0;
                let corners = [
                    (0i64, 0i64, (1.0 - fx) * (1.0 - fy)),
                    (1, 0, fx * (1.0 - fy)),
                    (0, 1, (1.0 - fx) * fy),
                    (1, 1, fx * fy),
                ];
                for (dx, dy, w) in corners {
                    if let Some(texel) =
                        self.texel(x0 as i64 + dx, y0 as i64 + dy, options)
                    {
                        for (a, v) in acc.iter_mut().zip(texel) {
                            *a += weight * w * v;
                        }
                    }
                }
            }
        }
    }

    /// Filtered value over the footprint spanned by two axis vectors
    ///
    /// A zero footprint is a single unfiltered tap; otherwise a
    /// deterministic five-tap box filter over the footprint parallelogram.
    fn filtered(&self, s: f32, t: f32, ax: [f32; 2], ay: [f32; 2], options: &TextureOptions) -> Vec<f32> {
        let mut acc = vec![0.0; self.channels];
        let zero = ax[0] == 0.0 && ax[1] == 0.0 && ay[0] == 0.0 && ay[1] == 0.0;
        if zero {
            self.tap(s, t, options, 1.0, &mut acc);
        } else {
            let taps = [
                (s, t),
                (s + 0.5 * ax[0], t + 0.5 * ax[1]),
                (s - 0.5 * ax[0], t - 0.5 * ax[1]),
                (s + 0.5 * ay[0], t + 0.5 * ay[1]),
                (s - 0.5 * ay[0], t - 0.5 * ay[1]),
            ];
            for (ts, tt) in taps {
                self.tap(ts, tt, options, 1.0 / taps.len() as f32, &mut acc);
            }
        }
        acc
    }

    /// Central-difference derivative of the unfiltered value along one axis
    fn derivative(&self, s: f32, t: f32, along_s: bool, options: &TextureOptions) -> Vec<f32> {
        let h = if along_s {
            1.0 / self.width as f32
        } else {
            1.0 / self.height as f32
        };
        let (sp, tp, sm, tm) = if along_s {
            (s + h, t, s - h, t)
        } else {
            (s, t + h, s, t - h)
        };
        let mut plus = vec![0.0; self.channels];
        let mut minus = vec![0.0; self.channels];
        self.tap(sp, tp, options, 1.0, &mut plus);
        self.tap(sm, tm, options, 1.0, &mut minus);
        plus.iter()
            .zip(&minus)
            .map(|(p, m)| (p - m) / (2.0 * h))
            .collect()
    }
}

/// Extend a footprint axis by `blur` along its own direction
///
/// A degenerate axis has no direction of its own and blurs along the
/// given coordinate axis instead, so zero-differential lookups still
/// honor the requested blur.
fn widen_axis(axis: [f32; 2], blur: f32, fallback: [f32; 2]) -> [f32; 2] {
    if blur == 0.0 {
        return axis;
    }
    let len = (axis[0] * axis[0] + axis[1] * axis[1]).sqrt();
    if len < 1e-12 {
        return [fallback[0] * blur, fallback[1] * blur];
    }
    let scale = (len + blur) / len;
    [axis[0] * scale, axis[1] * scale]
}

/// Copy filtered channels into the caller's buffers, honoring
/// `first_channel` and `fill`
fn emit(
    filtered: &[f32],
    options: &TextureOptions,
    nchannels: usize,
    result: &mut [f32],
) {
    for c in 0..nchannels {
        let src = options.first_channel + c;
        result[c] = filtered.get(src).copied().unwrap_or(options.fill);
    }
}

/// A float volume with a fixed channel count
pub struct SourceVolume {
    nx: usize,
    ny: usize,
    nz: usize,
    channels: usize,
    data: Vec<f32>,
}

impl SourceVolume {
    /// Wrap raw voxel data, validating its size
    pub fn new(
        nx: usize,
        ny: usize,
        nz: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self, TextureError> {
        if nx == 0 || ny == 0 || nz == 0 || channels == 0 {
            return Err(TextureError::ZeroSized);
        }
        let expected = nx * ny * nz * channels;
        if data.len() != expected {
            return Err(TextureError::DataSize {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            nx,
            ny,
            nz,
            channels,
            data,
        })
    }

    /// Generate a volume voxel by voxel
    pub fn from_fn(
        nx: usize,
        ny: usize,
        nz: usize,
        channels: usize,
        f: impl Fn(usize, usize, usize, &mut [f32]),
    ) -> Self {
        let mut data = vec![0.0; nx.max(1) * ny.max(1) * nz.max(1) * channels.max(1)];
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let at = ((z * ny + y) * nx + x) * channels;
                    f(x, y, z, &mut data[at..at + channels]);
                }
            }
        }
        Self {
            nx: nx.max(1),
            ny: ny.max(1),
            nz: nz.max(1),
            channels: channels.max(1),
            data,
        }
    }

    fn voxel(&self, x: i64, y: i64, z: i64, options: &TextureOptions) -> Option<&[f32]> {
        let x = wrap_coord(x, self.nx, options.s_wrap)?;
        let y = wrap_coord(y, self.ny, options.t_wrap)?;
        let z = wrap_coord(z, self.nz, options.r_wrap)?;
        let at = ((z * self.ny + y) * self.nx + x) * self.channels;
        Some(&self.data[at..at + self.channels])
    }

    /// One trilinear (or nearest) tap at `p`, accumulated with `weight`
    fn tap(&self, p: Vec3, options: &TextureOptions, weight: f32, acc: &mut [f32]) {
        let x = p.x * self.nx as f32 - 0.5;
        let y = p.y * self.ny as f32 - 0.5;
        let z = p.z * self.nz as f32 - 0.5;
        match options.interp {
            InterpMode::Closest => {
                if let Some(voxel) = self.voxel(
                    x.round() as i64,
                    y.round() as i64,
                    z.round() as i64,
                    options,
                ) {
                    for (a, v) in acc.iter_mut().zip(voxel) {
                        *a += weight * v;
                    }
                }
            }
            InterpMode::Linear => {
                let (x0, y0, z0) = (x.floor(), y.floor(), z.floor());
                let (fx, fy, fz) = (x - x0, y - y0, z - z0);
                for corner in 0..8u32 {
                    let dx = (corner & 1) as i64;
                    let dy = ((corner >> 1) & 1) as i64;
                    let dz = ((corner >> 2) & 1) as i64;
                    let w = (if dx == 1 { fx } else { 1.0 - fx })
                        * (if dy == 1 { fy } else { 1.0 - fy })
                        * (if dz == 1 { fz } else { 1.0 - fz });
                    if let Some(voxel) = self.voxel(
                        x0 as i64 + dx,
                        y0 as i64 + dy,
                        z0 as i64 + dz,
                        options,
                    ) {
                        for (a, v) in acc.iter_mut().zip(voxel) {
                            *a += weight * w * v;
                        }
                    }
                }
            }
        }
    }

    /// Filtered value over the footprint spanned by three axis vectors
    fn filtered(&self, p: Vec3, axes: [Vec3; 3], options: &TextureOptions) -> Vec<f32> {
        let mut acc = vec![0.0; self.channels];
        if axes.iter().all(|a| *a == Vec3::ZERO) {
            self.tap(p, options, 1.0, &mut acc);
        } else {
            let mut taps = vec![p];
            for axis in axes {
                taps.push(p + 0.5 * axis);
                taps.push(p - 0.5 * axis);
            }
            let w = 1.0 / taps.len() as f32;
            for tp in taps {
                self.tap(tp, options, w, &mut acc);
            }
        }
        acc
    }

    /// Central-difference derivative along one volume axis (0, 1, or 2)
    fn derivative(&self, p: Vec3, axis: usize, options: &TextureOptions) -> Vec<f32> {
        let n = [self.nx, self.ny, self.nz][axis];
        let h = 1.0 / n as f32;
        let mut step = Vec3::ZERO;
        step[axis] = h;
        let mut plus = vec![0.0; self.channels];
        let mut minus = vec![0.0; self.channels];
        self.tap(p + step, options, 1.0, &mut plus);
        self.tap(p - step, options, 1.0, &mut minus);
        plus.iter()
            .zip(&minus)
            .map(|(a, b)| (a - b) / (2.0 * h))
            .collect()
    }
}

/// Map a direction to latlong coordinates; `None` for a zero direction
fn dir_to_latlong(d: Vec3) -> Option<(f32, f32)> {
    let len = d.length();
    if len < 1e-12 {
        return None;
    }
    let s = d.y.atan2(d.x) / TAU + 0.5;
    let t = (d.z / len).clamp(-1.0, 1.0).acos() / PI;
    Some((s, t))
}

/// Shortest wrapped difference between two s coordinates on a latlong seam
fn wrapped_diff(a: f32, b: f32) -> f32 {
    let mut d = a - b;
    if d > 0.5 {
        d -= 1.0;
    } else if d < -0.5 {
        d += 1.0;
    }
    d
}

/// Filenames mapped to in-memory images and volumes
///
/// Interior-locked so registration and sampling can happen from any
/// thread; sampling takes only read locks.
pub struct TextureRegistry {
    images: RwLock<HashMap<String, Arc<SourceImage>>>,
    volumes: RwLock<HashMap<String, Arc<SourceVolume>>>,
}

impl TextureRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            images: RwLock::new(HashMap::new()),
            volumes: RwLock::new(HashMap::new()),
        }
    }

    /// Register an image under a filename
    pub fn add_image(&self, filename: impl Into<String>, image: SourceImage) {
        self.images.write().insert(filename.into(), Arc::new(image));
    }

    /// Register a volume under a filename
    pub fn add_volume(&self, filename: impl Into<String>, volume: SourceVolume) {
        self.volumes.write().insert(filename.into(), Arc::new(volume));
    }

    fn image(&self, filename: &str) -> Option<Arc<SourceImage>> {
        self.images.read().get(filename).cloned()
    }

    fn volume(&self, filename: &str) -> Option<Arc<SourceVolume>> {
        self.volumes.read().get(filename).cloned()
    }
}

impl Default for TextureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureSystem for TextureRegistry {
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
    ) -> bool {
        let Some(image) = self.image(filename) else {
            debug!(filename, "2d texture not found");
            return false;
        };
        // All buffers are validated before anything is written, so failure
        // leaves every output untouched
        let too_small = result.len() < nchannels
            || d_ds.as_ref().is_some_and(|b| b.len() < nchannels)
            || d_dt.as_ref().is_some_and(|b| b.len() < nchannels);
        if too_small {
            debug!(filename, "output buffer too small for 2d lookup");
            return false;
        }

        let w = options.width;
        let ax = widen_axis([ds_dx * w, dt_dx * w], options.blur, [1.0, 0.0]);
        let ay = widen_axis([ds_dy * w, dt_dy * w], options.blur, [0.0, 1.0]);
        let filtered = image.filtered(s, t, ax, ay, options);
        emit(&filtered, options, nchannels, result);

        if let Some(buf) = d_ds {
            emit(&image.derivative(s, t, true, options), options, nchannels, buf);
        }
        if let Some(buf) = d_dt {
            emit(&image.derivative(s, t, false, options), options, nchannels, buf);
        }
        true
    }

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
    ) -> bool {
        let Some(volume) = self.volume(filename) else {
            debug!(filename, "3d texture not found");
            return false;
        };
        let too_small = result.len() < nchannels
            || d_ds.as_ref().is_some_and(|b| b.len() < nchannels)
            || d_dt.as_ref().is_some_and(|b| b.len() < nchannels)
            || d_dr.as_ref().is_some_and(|b| b.len() < nchannels);
        if too_small {
            debug!(filename, "output buffer too small for 3d lookup");
            return false;
        }

        let w = options.width;
        let filtered = volume.filtered(p, [dp_dx * w, dp_dy * w, dp_dz * w], options);
        emit(&filtered, options, nchannels, result);

        for (axis, buf) in [(0, d_ds), (1, d_dt), (2, d_dr)] {
            if let Some(buf) = buf {
                emit(&volume.derivative(p, axis, options), options, nchannels, buf);
            }
        }
        true
    }

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
    ) -> bool {
        let Some((s, t)) = dir_to_latlong(r) else {
            debug!(filename, "environment lookup along a zero direction");
            return false;
        };
        // Project the directional differentials into latlong coordinates
        let (ds_dx, dt_dx) = dir_to_latlong(r + dr_dx)
            .map(|(s2, t2)| (wrapped_diff(s2, s), t2 - t))
            .unwrap_or((0.0, 0.0));
        let (ds_dy, dt_dy) = dir_to_latlong(r + dr_dy)
            .map(|(s2, t2)| (wrapped_diff(s2, s), t2 - t))
            .unwrap_or((0.0, 0.0));

        self.texture(
            filename, options, s, t, ds_dx, dt_dx, ds_dy, dt_dy, nchannels, result, d_ds, d_dt,
        )
    }

    fn texture_info(
        &self,
        filename: &str,
        subimage: usize,
        dataname: &str,
        datatype: TypeDesc,
    ) -> Option<Value> {
        if subimage != 0 {
            return None;
        }
        let value = if let Some(image) = self.image(filename) {
            match dataname {
                "exists" => Value::Int(1),
                "channels" => Value::Int(image.channels() as i32),
                "resolution" => Value::Array(vec![
                    Value::Int(image.width() as i32),
                    Value::Int(image.height() as i32),
                ]),
                "format" => Value::from("float"),
                _ => return None,
            }
        } else if let Some(volume) = self.volume(filename) {
            match dataname {
                "exists" => Value::Int(1),
                "channels" => Value::Int(volume.channels as i32),
                "resolution" => Value::Array(vec![
                    Value::Int(volume.nx as i32),
                    Value::Int(volume.ny as i32),
                    Value::Int(volume.nz as i32),
                ]),
                "format" => Value::from("float"),
                _ => return None,
            }
        } else {
            debug!(filename, "texture info for unknown file");
            return None;
        };

        // Type-checked: a mismatch is indistinguishable from not-found
        value.type_desc().compatible(&datatype).then_some(value)
    }
}
