//! Typed values crossing the engine/renderer boundary
//!
//! A `Value` carries one attribute, user datum, message, or metadata value.
//! A `Datum` is a value plus optional derivatives with respect to the two
//! canonical screen directions, for callers that requested them.

use crate::typedesc::{Aggregate, BaseType, TypeDesc, VecSemantics};
use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// A typed value
///
/// Vector semantics (point/vector/normal/color) are not stored here; they
/// travel in the `TypeDesc` the caller supplied. Arrays are homogeneous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// Integer value
    Int(i32),
    /// Float value
    Float(f32),
    /// Float pair (uv coordinates, 2D resolutions)
    Vec2(Vec2),
    /// Float triple (point, vector, normal, or color)
    Vec3(Vec3),
    /// 4x4 matrix
    Matrix(Mat4),
    /// String value
    Str(String),
    /// Homogeneous array of values
    Array(Vec<Value>),
}

impl Value {
    /// Try to get as int
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as float (ints widen)
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f32),
            _ => None,
        }
    }

    /// Try to get as a float pair
    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            Self::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as a float triple
    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Self::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as a matrix
    pub fn as_matrix(&self) -> Option<Mat4> {
        match self {
            Self::Matrix(m) => Some(*m),
            _ => None,
        }
    }

    /// Try to get as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an array slice
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The type descriptor this value matches (semantics always `None`)
    pub fn type_desc(&self) -> TypeDesc {
        match self {
            Self::Int(_) => TypeDesc::INT,
            Self::Float(_) => TypeDesc::FLOAT,
            Self::Vec2(_) => TypeDesc::new(BaseType::Float, Aggregate::Vec2, VecSemantics::None),
            Self::Vec3(_) => TypeDesc::new(BaseType::Float, Aggregate::Vec3, VecSemantics::None),
            Self::Matrix(_) => TypeDesc::MATRIX,
            Self::Str(_) => TypeDesc::STRING,
            Self::Array(a) => {
                let elem = a.first().map(Value::type_desc).unwrap_or_default();
                elem.array_of(a.len())
            }
        }
    }

    /// Write the numeric lanes of this value into `out`
    ///
    /// Returns the number of floats written, or `None` for string values or
    /// when `out` is too small. Ints widen to float.
    pub fn write_floats(&self, out: &mut [f32]) -> Option<usize> {
        match self {
            Self::Int(i) => {
                *out.first_mut()? = *i as f32;
                Some(1)
            }
            Self::Float(f) => {
                *out.first_mut()? = *f;
                Some(1)
            }
            Self::Vec2(v) => {
                out.get_mut(..2)?.copy_from_slice(&v.to_array());
                Some(2)
            }
            Self::Vec3(v) => {
                out.get_mut(..3)?.copy_from_slice(&v.to_array());
                Some(3)
            }
            Self::Matrix(m) => {
                out.get_mut(..16)?.copy_from_slice(&m.to_cols_array());
                Some(16)
            }
            Self::Str(_) => None,
            Self::Array(a) => {
                let mut written = 0;
                for v in a {
                    written += v.write_floats(&mut out[written..])?;
                }
                Some(written)
            }
        }
    }

    /// A zero value of the same shape, for derivative fill
    pub fn zeroed_like(&self) -> Value {
        match self {
            Self::Int(_) => Self::Int(0),
            Self::Float(_) => Self::Float(0.0),
            Self::Vec2(_) => Self::Vec2(Vec2::ZERO),
            Self::Vec3(_) => Self::Vec3(Vec3::ZERO),
            Self::Matrix(_) => Self::Matrix(Mat4::ZERO),
            Self::Str(_) => Self::Str(String::new()),
            Self::Array(a) => Self::Array(a.iter().map(Value::zeroed_like).collect()),
        }
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f)
    }
}

impl From<Vec2> for Value {
    fn from(v: Vec2) -> Self {
        Self::Vec2(v)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Mat4> for Value {
    fn from(m: Mat4) -> Self {
        Self::Matrix(m)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// A value with optional derivatives in the two canonical directions
///
/// `dx`/`dy` are `None` when the value is constant over the surface or the
/// caller did not ask for derivatives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Datum {
    /// The value itself
    pub value: Value,
    /// Derivative with respect to the first canonical direction
    pub dx: Option<Value>,
    /// Derivative with respect to the second canonical direction
    pub dy: Option<Value>,
}

impl Datum {
    /// A value with no derivatives
    pub fn constant(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            dx: None,
            dy: None,
        }
    }

    /// A value with both derivatives
    pub fn with_derivs(
        value: impl Into<Value>,
        dx: impl Into<Value>,
        dy: impl Into<Value>,
    ) -> Self {
        Self {
            value: value.into(),
            dx: Some(dx.into()),
            dy: Some(dy.into()),
        }
    }

    /// Whether any derivative is present
    pub fn has_derivs(&self) -> bool {
        self.dx.is_some() || self.dy.is_some()
    }

    /// Drop the derivatives, keeping the value
    pub fn strip_derivs(mut self) -> Self {
        self.dx = None;
        self.dy = None;
        self
    }

    /// Fill missing derivatives with zeros of the value's shape
    ///
    /// Callers that requested derivatives always receive both; a constant
    /// datum legitimately has zero rate of change.
    pub fn fill_zero_derivs(mut self) -> Self {
        if self.dx.is_none() {
            self.dx = Some(self.value.zeroed_like());
        }
        if self.dy.is_none() {
            self.dy = Some(self.value.zeroed_like());
        }
        self
    }
}
