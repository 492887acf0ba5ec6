//! Tensor shapes: element types plus per-dimension size/stride pairs.
//!
//! Strides are in *elements*, signed so a view may walk a buffer backwards.
//! `elem_size` is the number of addressable elements (product of sizes),
//! `byte_size` the buffer footprint.

use smallvec::SmallVec;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ElemType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float16,
    #[default]
    Float32,
    Float64,
}

impl ElemType {
    /// Size of one element in bytes.
    pub fn byte_size(self) -> u64 {
        match self {
            Self::Bool | Self::Int8 => 1,
            Self::Int16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }
}

/// One dimension of a tensor: extent and element stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorDimension {
    pub size: u64,
    pub stride: i64,
}

/// A concrete tensor layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorShape {
    pub elem_type: ElemType,
    pub dims: SmallVec<[TensorDimension; 4]>,
}

impl TensorShape {
    /// Row-major contiguous shape with the given dimension sizes.
    pub fn contiguous(elem_type: ElemType, sizes: &[u64]) -> Self {
        let mut stride = 1i64;
        let mut dims: SmallVec<[TensorDimension; 4]> = sizes
            .iter()
            .rev()
            .map(|&size| {
                let dim = TensorDimension { size, stride };
                stride *= size as i64;
                dim
            })
            .collect();
        dims.reverse();
        Self { elem_type, dims }
    }

    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    /// Number of addressable elements: the product of dimension sizes.
    pub fn elem_size(&self) -> u64 {
        self.dims.iter().map(|d| d.size).product()
    }

    /// Buffer footprint in bytes.
    pub fn byte_size(&self) -> u64 {
        self.elem_size() * self.elem_type.byte_size()
    }

    pub fn sizes(&self) -> impl Iterator<Item = u64> + '_ {
        self.dims.iter().map(|d| d.size)
    }
}
