//! Type system for fused tensor programs.

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
    /// Brain floating point.
    BFloat,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };
    pub const BF16: Self = Self {
        kind: ScalarKind::BFloat,
        width: 2,
    };
}

/// One dimension of a tensor shape.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Dim {
    /// Statically known extent.
    Fixed(u32),
    /// Dynamic extent with an optional symbolic name.
    Dynamic(Option<String>),
}

/// The shape of a tensor, possibly with dynamic dimensions.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct TensorShape {
    pub dims: Vec<Dim>,
}

impl TensorShape {
    /// Builds a shape from fixed extents; negative values become dynamic.
    pub fn from_dims(dims: &[i64]) -> Self {
        Self {
            dims: dims
                .iter()
                .map(|&d| {
                    if d < 0 {
                        Dim::Dynamic(None)
                    } else {
                        Dim::Fixed(d as u32)
                    }
                })
                .collect(),
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

/// The type of an expression.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Ty {
    /// A dense tensor with an element scalar and a shape.
    Tensor { scalar: Scalar, shape: TensorShape },
    /// A tuple of component types.
    Tuple(Vec<Ty>),
    /// A function value.
    Fn,
    /// A mutable reference cell.
    Ref(Box<Ty>),
    /// Unknown or not yet inferred.
    Unknown,
}

impl Ty {
    /// Shorthand for a fixed-shape f32 tensor.
    pub fn tensor_f32(dims: &[i64]) -> Self {
        Ty::Tensor {
            scalar: Scalar::F32,
            shape: TensorShape::from_dims(dims),
        }
    }

    /// Returns `true` if this is a tensor type.
    pub fn is_tensor(&self) -> bool {
        matches!(self, Ty::Tensor { .. })
    }

    /// Returns `true` if this is a tuple whose fields are all tensors.
    pub fn is_tensor_tuple(&self) -> bool {
        match self {
            Ty::Tuple(fields) => fields.iter().all(Ty::is_tensor),
            _ => false,
        }
    }
}
