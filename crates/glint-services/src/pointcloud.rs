//! In-memory point cloud storage with deferred writes
//!
//! The point-cloud accumulation buffer is the one shared-mutable resource
//! in the service contract. `PointCloudStore` implements the two-phase
//! model the contract requires: `write` appends to a per-filename pending
//! buffer under that file's append lock, and `flush` - the end-of-frame
//! barrier, triggered by the frame lifecycle collaborator once all writers
//! have quiesced - merges pending points into the searchable cloud and
//! rebuilds its spatial index. Nothing written is discoverable before the
//! flush.
//!
//! Helper methods return `Result` so faults carry a reason; the trait
//! adapters in a backend map every error to the contract's `false`/zero.

use glam::Vec3;
use glint_core::{TypeDesc, Value};
use parking_lot::{Mutex, RwLock};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Point cloud access errors
#[derive(Debug, Error)]
pub enum PointCloudError {
    /// No cloud flushed or loaded under this name
    #[error("point cloud '{0}' not found")]
    CloudNotFound(String),

    /// The cloud has no such attribute
    #[error("attribute '{0}' not found")]
    AttributeNotFound(String),

    /// Requested type incompatible with the stored attribute
    #[error("type mismatch for attribute '{0}'")]
    TypeMismatch(String),

    /// An index in a batched fetch is past the end of the cloud
    #[error("index {index} out of range for cloud of {count} points")]
    IndexOutOfRange { index: usize, count: usize },

    /// Caller-sized output buffer cannot hold the batch
    #[error("output buffer holds {got} floats, need {need}")]
    BufferTooSmall { need: usize, got: usize },

    /// Attribute value with no float representation (strings)
    #[error("attribute '{0}' is not numeric")]
    NotNumeric(String),

    /// Two attributes in one write share a name
    #[error("duplicate attribute '{0}' in write")]
    DuplicateAttribute(String),

    /// Write does not match the schema fixed by the first write
    #[error("write to '{0}' does not match its attribute schema")]
    SchemaMismatch(String),
}

/// Spatial index record: a point and its stable index in the cloud
struct IndexedPoint {
    idx: usize,
    pos: [f32; 3],
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.pos[0] - point[0];
        let dy = self.pos[1] - point[1];
        let dz = self.pos[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// One attribute across all points, densely packed
struct AttrColumn {
    ty: TypeDesc,
    /// `ty.channels()` floats per point
    data: Vec<f32>,
}

/// A searchable cloud of attributed points
///
/// Indices handed out by [`search`](Self::search) are stable for an
/// unmodified cloud; merging a flush appends points and extends columns
/// without renumbering existing ones.
pub struct PointCloud {
    positions: Vec<Vec3>,
    /// Attribute name and type, in first-write order
    schema: Vec<(String, TypeDesc)>,
    columns: HashMap<String, AttrColumn>,
    tree: RTree<IndexedPoint>,
}

impl PointCloud {
    /// An empty cloud with no attribute schema yet
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            schema: Vec::new(),
            columns: HashMap::new(),
            tree: RTree::new(),
        }
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the cloud holds no points
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Append one point, fixing the schema on the first append
    ///
    /// Used for seeding clouds directly; engine-visible writes go through
    /// [`PointCloudStore::write`] so they stay invisible until the flush.
    pub fn push(
        &mut self,
        position: Vec3,
        attributes: &[(&str, Value)],
    ) -> Result<(), PointCloudError> {
        let incoming = schema_of(attributes)?;
        if self.positions.is_empty() && self.schema.is_empty() {
            self.schema = incoming;
            for (name, ty) in &self.schema {
                self.columns.insert(
                    name.clone(),
                    AttrColumn {
                        ty: *ty,
                        data: Vec::new(),
                    },
                );
            }
        } else if !schema_matches(&self.schema, &incoming) {
            return Err(PointCloudError::SchemaMismatch("<direct>".to_string()));
        }

        let idx = self.positions.len();
        self.positions.push(position);
        for (name, value) in attributes {
            let column = self
                .columns
                .get_mut(*name)
                .ok_or_else(|| PointCloudError::AttributeNotFound((*name).to_string()))?;
            let start = column.data.len();
            column.data.resize(start + column.ty.channels(), 0.0);
            value
                .write_floats(&mut column.data[start..])
                .ok_or_else(|| PointCloudError::NotNumeric((*name).to_string()))?;
        }
        self.tree.insert(IndexedPoint {
            idx,
            pos: position.to_array(),
        });
        Ok(())
    }

    /// Points within `radius` of `center`, capped at `max_points`
    ///
    /// Sorted results come back in non-decreasing distance order with the
    /// point index as tie-break, so repeated queries against an unmodified
    /// cloud are stable. Unsorted results come back in index order, which
    /// is equally stable.
    pub fn search(
        &self,
        center: Vec3,
        radius: f32,
        max_points: usize,
        sorted: bool,
    ) -> Vec<(usize, f32)> {
        let c = center.to_array();
        let mut found: Vec<(usize, f32)> = self
            .tree
            .locate_within_distance(c, radius * radius)
            .map(|p| (p.idx, p.distance_2(&c).sqrt()))
            .collect();

        if sorted {
            found.sort_unstable_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        } else {
            found.sort_unstable_by_key(|&(idx, _)| idx);
        }
        found.truncate(max_points);
        found
    }

    /// Copy one attribute for a batch of indices into `out`
    ///
    /// Writes `attr_type.channels()` floats per index. Fails the entire
    /// batch, leaving `out` untouched, on any bad index, unknown
    /// attribute, or type mismatch. The built-in `position` attribute is
    /// always available as a float triple.
    pub fn get(
        &self,
        indices: &[usize],
        attr_name: &str,
        attr_type: TypeDesc,
        out: &mut [f32],
    ) -> Result<(), PointCloudError> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.positions.len()) {
            return Err(PointCloudError::IndexOutOfRange {
                index: bad,
                count: self.positions.len(),
            });
        }
        let need = attr_type.channels() * indices.len();
        if out.len() < need {
            return Err(PointCloudError::BufferTooSmall {
                need,
                got: out.len(),
            });
        }

        if attr_name == "position" {
            if !attr_type.compatible(&TypeDesc::POINT) {
                return Err(PointCloudError::TypeMismatch(attr_name.to_string()));
            }
            for (slot, &idx) in indices.iter().enumerate() {
                out[slot * 3..slot * 3 + 3].copy_from_slice(&self.positions[idx].to_array());
            }
            return Ok(());
        }

        let column = self
            .columns
            .get(attr_name)
            .ok_or_else(|| PointCloudError::AttributeNotFound(attr_name.to_string()))?;
        if !attr_type.compatible(&column.ty) {
            return Err(PointCloudError::TypeMismatch(attr_name.to_string()));
        }
        let width = column.ty.channels();
        for (slot, &idx) in indices.iter().enumerate() {
            out[slot * width..(slot + 1) * width]
                .copy_from_slice(&column.data[idx * width..(idx + 1) * width]);
        }
        Ok(())
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}

fn schema_of(attributes: &[(&str, Value)]) -> Result<Vec<(String, TypeDesc)>, PointCloudError> {
    let mut schema: Vec<(String, TypeDesc)> = Vec::with_capacity(attributes.len());
    for (name, value) in attributes {
        let ty = value.type_desc();
        if matches!(ty.base, glint_core::BaseType::String) {
            return Err(PointCloudError::NotNumeric((*name).to_string()));
        }
        // A repeated name would alias one column and shear its packing
        if schema.iter().any(|(n, _)| n == name) {
            return Err(PointCloudError::DuplicateAttribute((*name).to_string()));
        }
        schema.push(((*name).to_string(), ty));
    }
    Ok(schema)
}

fn schema_matches(a: &[(String, TypeDesc)], b: &[(String, TypeDesc)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|((an, at), (bn, bt))| an == bn && at.compatible(bt))
}

/// Pending points for one filename, not yet searchable
struct PendingCloud {
    schema: Vec<(String, TypeDesc)>,
    points: Vec<(Vec3, Vec<Value>)>,
}

/// Flush outcome for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Filenames that received points
    pub files: usize,
    /// Points merged into searchable clouds
    pub points: usize,
    /// Pending batches dropped for schema conflicts with an existing cloud
    pub rejected: usize,
}

/// Two-phase point cloud storage shared by all point evaluations
///
/// Writers append concurrently under per-filename locks; the flush barrier
/// runs once per frame after all writers have quiesced.
pub struct PointCloudStore {
    clouds: RwLock<HashMap<String, PointCloud>>,
    pending: RwLock<HashMap<String, Arc<Mutex<PendingCloud>>>>,
}

impl PointCloudStore {
    /// An empty store
    pub fn new() -> Self {
        Self {
            clouds: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a pre-built cloud under a name, immediately searchable
    pub fn insert_cloud(&self, filename: impl Into<String>, cloud: PointCloud) {
        self.clouds.write().insert(filename.into(), cloud);
    }

    /// Number of searchable points in a named cloud
    pub fn point_count(&self, filename: &str) -> Option<usize> {
        self.clouds.read().get(filename).map(PointCloud::len)
    }

    /// Append a point to the named cloud's pending buffer
    ///
    /// The first write to a filename fixes its attribute schema; later
    /// writes must match. The point is invisible to searches until
    /// [`flush`](Self::flush).
    pub fn write(
        &self,
        filename: &str,
        position: Vec3,
        attributes: &[(&str, Value)],
    ) -> Result<(), PointCloudError> {
        let incoming = schema_of(attributes)?;
        let pending = self.pending_for(filename, &incoming);
        let mut pending = pending.lock();
        if !schema_matches(&pending.schema, &incoming) {
            return Err(PointCloudError::SchemaMismatch(filename.to_string()));
        }
        let values = attributes.iter().map(|(_, v)| v.clone()).collect();
        pending.points.push((position, values));
        Ok(())
    }

    /// The append lock for one filename, created on first use
    fn pending_for(
        &self,
        filename: &str,
        schema: &[(String, TypeDesc)],
    ) -> Arc<Mutex<PendingCloud>> {
        if let Some(p) = self.pending.read().get(filename) {
            return Arc::clone(p);
        }
        let mut map = self.pending.write();
        Arc::clone(map.entry(filename.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(PendingCloud {
                schema: schema.to_vec(),
                points: Vec::new(),
            }))
        }))
    }

    /// End-of-frame barrier: merge all pending points into their clouds
    ///
    /// Must run only after every writer for the frame has quiesced; the
    /// frame lifecycle collaborator owns that ordering. A pending batch
    /// whose schema conflicts with an already-flushed cloud is dropped and
    /// counted rather than corrupting the cloud.
    pub fn flush(&self) -> FlushStats {
        let drained: Vec<(String, Arc<Mutex<PendingCloud>>)> =
            self.pending.write().drain().collect();
        let mut stats = FlushStats::default();
        let mut clouds = self.clouds.write();

        for (filename, pending) in drained {
            let pending = pending.lock();
            if pending.points.is_empty() {
                continue;
            }
            let cloud = clouds.entry(filename.clone()).or_default();
            if !cloud.is_empty() && !schema_matches(&cloud.schema, &pending.schema) {
                warn!(
                    filename = %filename,
                    points = pending.points.len(),
                    "dropping pending points with conflicting schema"
                );
                stats.rejected += 1;
                continue;
            }

            let names: Vec<&str> = pending.schema.iter().map(|(n, _)| n.as_str()).collect();
            let mut merged = 0usize;
            for (position, values) in &pending.points {
                let attrs: Vec<(&str, Value)> = names
                    .iter()
                    .zip(values)
                    .map(|(n, v)| (*n, v.clone()))
                    .collect();
                match cloud.push(*position, &attrs) {
                    Ok(()) => merged += 1,
                    Err(err) => warn!(filename = %filename, %err, "dropping point at flush"),
                }
            }
            stats.files += 1;
            stats.points += merged;
        }

        info!(
            files = stats.files,
            points = stats.points,
            rejected = stats.rejected,
            "point cloud flush"
        );
        stats
    }

    /// Search a flushed cloud; empty result for an unknown filename
    pub fn search(
        &self,
        filename: &str,
        center: Vec3,
        radius: f32,
        max_points: usize,
        sorted: bool,
    ) -> Vec<(usize, f32)> {
        match self.clouds.read().get(filename) {
            Some(cloud) => cloud.search(center, radius, max_points, sorted),
            None => Vec::new(),
        }
    }

    /// Batched attribute fetch against a flushed cloud
    pub fn get(
        &self,
        filename: &str,
        indices: &[usize],
        attr_name: &str,
        attr_type: TypeDesc,
        out: &mut [f32],
    ) -> Result<(), PointCloudError> {
        self.clouds
            .read()
            .get(filename)
            .ok_or_else(|| PointCloudError::CloudNotFound(filename.to_string()))?
            .get(indices, attr_name, attr_type, out)
    }
}

impl Default for PointCloudStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> PointCloudStore {
        let mut cloud = PointCloud::new();
        for i in 0..10 {
            cloud
                .push(
                    Vec3::new(i as f32, 0.0, 0.0),
                    &[
                        ("density", Value::Float(i as f32 * 0.1)),
                        ("velocity", Value::Vec3(Vec3::new(0.0, i as f32, 0.0))),
                    ],
                )
                .unwrap();
        }
        let store = PointCloudStore::new();
        store.insert_cloud("cloud.pc", cloud);
        store
    }

    #[test]
    fn test_search_respects_cap_and_order() {
        let store = seeded_store();

        let found = store.search("cloud.pc", Vec3::new(4.5, 0.0, 0.0), 3.0, 4, true);
        assert!(found.len() <= 4);
        for pair in found.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }

        // Equidistant points tie-break on index, stably across queries
        let a = store.search("cloud.pc", Vec3::new(4.5, 0.0, 0.0), 10.0, 10, true);
        let b = store.search("cloud.pc", Vec3::new(4.5, 0.0, 0.0), 10.0, 10, true);
        assert_eq!(a, b);
        assert_eq!(a[0].0.min(a[1].0), 4);
        assert_eq!(a[0].0.max(a[1].0), 5);
    }

    #[test]
    fn test_unsorted_search_is_stable() {
        let store = seeded_store();
        let a = store.search("cloud.pc", Vec3::ZERO, 100.0, 10, false);
        let b = store.search("cloud.pc", Vec3::ZERO, 100.0, 10, false);
        assert_eq!(a, b);
        let indices: Vec<usize> = a.iter().map(|&(i, _)| i).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_search_unknown_cloud_is_empty() {
        let store = PointCloudStore::new();
        assert!(store.search("nope.pc", Vec3::ZERO, 1.0, 8, true).is_empty());
    }

    #[test]
    fn test_get_batch() {
        let store = seeded_store();
        let mut out = [0.0f32; 3];
        store
            .get("cloud.pc", &[2, 4, 9], "density", TypeDesc::FLOAT, &mut out)
            .unwrap();
        assert!((out[0] - 0.2).abs() < 1e-6);
        assert!((out[1] - 0.4).abs() < 1e-6);
        assert!((out[2] - 0.9).abs() < 1e-6);

        // The built-in position attribute
        let mut pos = [0.0f32; 6];
        store
            .get("cloud.pc", &[1, 3], "position", TypeDesc::POINT, &mut pos)
            .unwrap();
        assert_eq!(pos[0], 1.0);
        assert_eq!(pos[3], 3.0);
    }

    #[test]
    fn test_get_fails_whole_batch() {
        let store = seeded_store();
        let mut out = [-1.0f32; 3];

        // One bad index among good ones fails everything, output untouched
        let err = store
            .get("cloud.pc", &[0, 42, 1], "density", TypeDesc::FLOAT, &mut out)
            .unwrap_err();
        assert!(matches!(err, PointCloudError::IndexOutOfRange { index: 42, .. }));
        assert_eq!(out, [-1.0; 3]);

        // Unknown attribute
        assert!(matches!(
            store.get("cloud.pc", &[0], "mass", TypeDesc::FLOAT, &mut out),
            Err(PointCloudError::AttributeNotFound(_))
        ));

        // Type mismatch is its own failure, same caller-visible outcome
        assert!(matches!(
            store.get("cloud.pc", &[0], "density", TypeDesc::POINT, &mut out),
            Err(PointCloudError::TypeMismatch(_))
        ));

        // Velocity as vector works; semantics never participate
        let mut v = [0.0f32; 3];
        store
            .get("cloud.pc", &[7], "velocity", TypeDesc::VECTOR, &mut v)
            .unwrap();
        assert_eq!(v[1], 7.0);
    }

    #[test]
    fn test_write_flush_search_round_trip() {
        let store = PointCloudStore::new();
        store
            .write("bake.pc", Vec3::new(1.0, 2.0, 3.0), &[("radiance", Value::Vec3(Vec3::ONE))])
            .unwrap();

        // Invisible before the barrier
        assert!(store.search("bake.pc", Vec3::new(1.0, 2.0, 3.0), 0.5, 4, true).is_empty());

        let stats = store.flush();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.points, 1);

        let found = store.search("bake.pc", Vec3::new(1.0, 2.0, 3.0), 0.5, 4, true);
        assert_eq!(found.len(), 1);
        assert!(found[0].1 < 1e-6);

        let mut out = [0.0f32; 3];
        store
            .get("bake.pc", &[found[0].0], "radiance", TypeDesc::COLOR, &mut out)
            .unwrap();
        assert_eq!(out, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_schema_fixed_by_first_write() {
        let store = PointCloudStore::new();
        store
            .write("bake.pc", Vec3::ZERO, &[("density", Value::Float(1.0))])
            .unwrap();

        // Different attribute set
        assert!(matches!(
            store.write("bake.pc", Vec3::ONE, &[("mass", Value::Float(1.0))]),
            Err(PointCloudError::SchemaMismatch(_))
        ));
        // Same name, different type
        assert!(matches!(
            store.write("bake.pc", Vec3::ONE, &[("density", Value::Vec3(Vec3::ONE))]),
            Err(PointCloudError::SchemaMismatch(_))
        ));
        // Strings never land in a cloud
        assert!(matches!(
            store.write("other.pc", Vec3::ONE, &[("tag", Value::from("a"))]),
            Err(PointCloudError::NotNumeric(_))
        ));
    }

    #[test]
    fn test_flush_merges_into_existing_cloud() {
        let store = seeded_store();
        store
            .write(
                "cloud.pc",
                Vec3::new(20.0, 0.0, 0.0),
                &[
                    ("density", Value::Float(2.0)),
                    ("velocity", Value::Vec3(Vec3::ZERO)),
                ],
            )
            .unwrap();
        store.flush();

        assert_eq!(store.point_count("cloud.pc"), Some(11));
        // Existing indices are not renumbered
        let mut out = [0.0f32];
        store.get("cloud.pc", &[9], "density", TypeDesc::FLOAT, &mut out).unwrap();
        assert!((out[0] - 0.9).abs() < 1e-6);
        store.get("cloud.pc", &[10], "density", TypeDesc::FLOAT, &mut out).unwrap();
        assert!((out[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_conflicting_flush_batch_is_rejected() {
        let store = seeded_store();
        store
            .write("cloud.pc", Vec3::ZERO, &[("mass", Value::Float(1.0))])
            .unwrap();
        let stats = store.flush();
        assert_eq!(stats.rejected, 1);
        assert_eq!(store.point_count("cloud.pc"), Some(10));
    }

    #[test]
    fn test_duplicate_attribute_names_rejected() {
        let store = PointCloudStore::new();
        assert!(matches!(
            store.write(
                "dup.pc",
                Vec3::ZERO,
                &[("a", Value::Float(1.0)), ("a", Value::Float(2.0))],
            ),
            Err(PointCloudError::DuplicateAttribute(_))
        ));
        // The rejected write leaves no pending state behind
        store.flush();
        assert!(store.point_count("dup.pc").is_none());

        // Direct appends refuse duplicates the same way
        let mut cloud = PointCloud::new();
        assert!(matches!(
            cloud.push(Vec3::ZERO, &[("a", Value::Float(1.0)), ("a", Value::Float(2.0))]),
            Err(PointCloudError::DuplicateAttribute(_))
        ));
        assert!(cloud.is_empty());

        // Clean writes afterwards read back exactly per index
        for i in 0..3 {
            store
                .write("dup.pc", Vec3::new(i as f32, 0.0, 0.0), &[("a", Value::Float(i as f32 * 10.0))])
                .unwrap();
        }
        store.flush();
        let mut out = [0.0f32];
        store.get("dup.pc", &[1], "a", TypeDesc::FLOAT, &mut out).unwrap();
        assert!((out[0] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_writes_all_survive_flush() {
        let store = PointCloudStore::new();
        let threads = 8;
        let per_thread = 50;

        std::thread::scope(|scope| {
            for t in 0..threads {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..per_thread {
                        let id = (t * per_thread + i) as f32;
                        store
                            .write(
                                "bake.pc",
                                Vec3::new(id, 0.0, 0.0),
                                &[("id", Value::Float(id))],
                            )
                            .unwrap();
                    }
                });
            }
        });

        let stats = store.flush();
        assert_eq!(stats.points, threads * per_thread);
        assert_eq!(store.point_count("bake.pc"), Some(threads * per_thread));

        // Content check: every id appears exactly once
        let count = threads * per_thread;
        let found = store.search("bake.pc", Vec3::ZERO, 1.0e6, count, false);
        assert_eq!(found.len(), count);
        let mut ids = vec![0.0f32; count];
        let indices: Vec<usize> = found.iter().map(|&(i, _)| i).collect();
        store.get("bake.pc", &indices, "id", TypeDesc::FLOAT, &mut ids).unwrap();
        let mut sorted_ids: Vec<i64> = ids.iter().map(|&f| f as i64).collect();
        sorted_ids.sort_unstable();
        assert_eq!(sorted_ids, (0..count as i64).collect::<Vec<_>>());
    }
}
