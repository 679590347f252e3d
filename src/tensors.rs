//! Core tensor data structures.
//!
//! # Tensor Storage
//!
//! A [`Tensor`] is a flat, row-major buffer plus a shape. It carries no
//! gradient information of its own; gradient tracking lives in
//! [`crate::variable::Variable`], which wraps a tensor value.
//!
//! ## Design Highlights
//! - Tensors are generic over the element type, but the autodiff engine works on [`Ten64`]
//! - Shape is a `Vec<usize>` checked at runtime; an empty shape is a scalar
//! - The `tensor!` macro builds tensors from nested array literals
//!
//! ## Limitations
//! - Row-major only
//! - No broadcasting, slicing or views
//!
//! ## Example
//!
//! ```rust
//! use briny_grad::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! assert_eq!(t.numel(), 6);
//! ```

use crate::error::{Error, Result};

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - All elements must be the same type (`T`).
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

/// The tensor type every differentiable operation works on.
pub type Ten64 = Tensor<f64>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Number of stored elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the same data under a new shape.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the element counts differ.
    pub fn reshape(self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if shape.iter().product::<usize>() != self.data.len() {
            return Err(Error::ShapeMismatch {
                op: "reshape",
                expected: shape,
                got: self.shape,
            });
        }
        Ok(Self { shape, data: self.data })
    }
}

impl<T: Clone> Tensor<T> {
    /// Creates a tensor with every element set to `value`.
    pub fn filled(shape: impl Into<Vec<usize>>, value: T) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self { shape, data: vec![value; len] }
    }

    /// Transposes a rank-2 tensor.
    ///
    /// # Panics
    /// Panics if the tensor is not rank 2.
    pub fn transpose(&self) -> Self {
        assert_eq!(self.rank(), 2, "transpose expects a matrix, got {:?}", self.shape);
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..cols {
            for r in 0..rows {
                data.push(self.data[r * cols + c].clone());
            }
        }
        Self { shape: vec![cols, rows], data }
    }

    /// Applies `f` element-wise, keeping the shape.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Tensor<U> {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl Tensor<f64> {
    /// A tensor of zeros.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        Self::filled(shape, 0.0)
    }

    /// A rank-0 tensor holding `value`.
    pub fn scalar(value: f64) -> Self {
        Self::new(Vec::new(), vec![value])
    }

    /// The value of a single-element tensor, if it is one.
    pub fn item(&self) -> Option<f64> {
        match self.data.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: f64) -> Self {
        self.map(|x| x * factor)
    }

    /// Adds `other` into `self` element-wise.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                op: "add_assign",
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += *b;
        }
        Ok(())
    }
}

/// Defines a tensor from nested arrays of numbers.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
/// Leaves may be any expression, including negative literals.
///
/// # Example
/// ```
/// use briny_grad::tensor;
/// let t = tensor!([[1.0, -2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// assert_eq!(t.data[1], -2.0);
/// ```
#[macro_export]
macro_rules! tensor {
    ([ $( [ $($inner:tt)* ] ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!([ $($inner)* ]) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};

    ([ $( $leaf:expr ),+ $(,)? ]) => {{
        let data = vec![ $( $leaf ),+ ];
        $crate::tensors::Tensor::new(vec![data.len()], data)
    }};

    ($scalar:expr) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$scalar])
    };
}
