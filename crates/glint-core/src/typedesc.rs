//! Type descriptors for attributes, user data, and texture metadata
//!
//! A `TypeDesc` describes the element type, array shape, and vector
//! semantics of a value crossing the engine/renderer boundary. Backends use
//! it to type-check lookups; a mismatch is reported as not-found, never as a
//! hard fault.

use serde::{Deserialize, Serialize};

/// Scalar base type of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BaseType {
    /// 32-bit float
    #[default]
    Float,
    /// 32-bit signed integer
    Int,
    /// Interned string
    String,
}

/// How many scalar lanes make up one element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Aggregate {
    /// Single scalar
    #[default]
    Scalar,
    /// Two lanes (uv pairs, resolutions)
    Vec2,
    /// Three lanes (points, vectors, normals, colors)
    Vec3,
    /// Sixteen lanes, a 4x4 matrix
    Matrix4,
}

impl Aggregate {
    /// Number of scalar lanes in one element
    pub fn lanes(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Matrix4 => 16,
        }
    }
}

/// Transformation semantics of a three-lane value
///
/// Points, vectors, and normals transform differently; colors do not
/// transform at all. Semantics never participate in type compatibility -
/// they only matter when a value is run through a coordinate transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VecSemantics {
    /// No spatial interpretation
    #[default]
    None,
    /// Position: translated and scaled by a transform
    Point,
    /// Direction: scaled but not translated
    Vector,
    /// Surface normal: transformed by the inverse transpose
    Normal,
    /// Color triple: not transformed
    Color,
}

/// Describes the type of an attribute, user datum, or metadata value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TypeDesc {
    /// Scalar base type
    pub base: BaseType,
    /// Lanes per element
    pub aggregate: Aggregate,
    /// Transformation semantics (three-lane types only)
    pub semantics: VecSemantics,
    /// Array length, or `None` for a single element
    pub array_len: Option<usize>,
}

impl TypeDesc {
    /// Single float
    pub const FLOAT: Self = Self::new(BaseType::Float, Aggregate::Scalar, VecSemantics::None);
    /// Single int
    pub const INT: Self = Self::new(BaseType::Int, Aggregate::Scalar, VecSemantics::None);
    /// Single string
    pub const STRING: Self = Self::new(BaseType::String, Aggregate::Scalar, VecSemantics::None);
    /// Float pair
    pub const VEC2: Self = Self::new(BaseType::Float, Aggregate::Vec2, VecSemantics::None);
    /// Float triple with point semantics
    pub const POINT: Self = Self::new(BaseType::Float, Aggregate::Vec3, VecSemantics::Point);
    /// Float triple with vector semantics
    pub const VECTOR: Self = Self::new(BaseType::Float, Aggregate::Vec3, VecSemantics::Vector);
    /// Float triple with normal semantics
    pub const NORMAL: Self = Self::new(BaseType::Float, Aggregate::Vec3, VecSemantics::Normal);
    /// Float triple with color semantics
    pub const COLOR: Self = Self::new(BaseType::Float, Aggregate::Vec3, VecSemantics::Color);
    /// 4x4 float matrix
    pub const MATRIX: Self = Self::new(BaseType::Float, Aggregate::Matrix4, VecSemantics::None);

    /// Create a non-array type descriptor
    pub const fn new(base: BaseType, aggregate: Aggregate, semantics: VecSemantics) -> Self {
        Self {
            base,
            aggregate,
            semantics,
            array_len: None,
        }
    }

    /// An array of this type
    pub const fn array_of(mut self, len: usize) -> Self {
        self.array_len = Some(len);
        self
    }

    /// The element type of an array (identity for non-arrays)
    pub const fn element(mut self) -> Self {
        self.array_len = None;
        self
    }

    /// Whether this describes an array
    pub fn is_array(&self) -> bool {
        self.array_len.is_some()
    }

    /// Total scalar lanes across all array elements
    pub fn channels(&self) -> usize {
        self.aggregate.lanes() * self.array_len.unwrap_or(1)
    }

    /// Structural compatibility, ignoring vector semantics
    ///
    /// A request for a `point` must match stored `vector` data: the lanes
    /// are the same and the semantics only matter under transformation.
    pub fn compatible(&self, other: &TypeDesc) -> bool {
        self.base == other.base
            && self.aggregate == other.aggregate
            && self.array_len == other.array_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        assert_eq!(TypeDesc::FLOAT.channels(), 1);
        assert_eq!(TypeDesc::POINT.channels(), 3);
        assert_eq!(TypeDesc::MATRIX.channels(), 16);
        assert_eq!(TypeDesc::COLOR.array_of(4).channels(), 12);
    }

    #[test]
    fn test_array_element() {
        let arr = TypeDesc::FLOAT.array_of(8);
        assert!(arr.is_array());
        assert_eq!(arr.element(), TypeDesc::FLOAT);
    }

    #[test]
    fn test_semantics_ignored_by_compatibility() {
        assert!(TypeDesc::POINT.compatible(&TypeDesc::VECTOR));
        assert!(TypeDesc::POINT.compatible(&TypeDesc::COLOR));
        assert!(!TypeDesc::POINT.compatible(&TypeDesc::FLOAT));
        assert!(!TypeDesc::FLOAT.compatible(&TypeDesc::INT));
        assert!(!TypeDesc::FLOAT.compatible(&TypeDesc::FLOAT.array_of(2)));
    }

    #[test]
    fn test_serialization() {
        let ty = TypeDesc::NORMAL.array_of(3);
        let json = serde_json::to_string(&ty).unwrap();
        let decoded: TypeDesc = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ty);
    }
}
