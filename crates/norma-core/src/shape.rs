use smallvec::SmallVec;
use std::fmt;

/// Row-major tensor shape. Kernel operands are vectors and matrices, so
/// the inline capacity of four dims is never exceeded in practice.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Element count; an empty dim list counts as one element.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// `(rows, cols)` for a 2-D shape.
    pub fn as_matrix(&self) -> Option<(usize, usize)> {
        match *self.dims.as_slice() {
            [rows, cols] => Some((rows, cols)),
            _ => None,
        }
    }

    /// Strides of a packed row-major layout over these dims.
    pub fn contiguous_strides(&self) -> SmallVec<[usize; 4]> {
        let mut strides: SmallVec<[usize; 4]> = SmallVec::from_elem(1, self.dims.len());
        let mut acc = 1;
        for (stride, &d) in strides.iter_mut().zip(self.dims.iter()).rev() {
            *stride = acc;
            acc *= d;
        }
        strides
    }

    /// Same dims with the trailing two swapped. `None` below rank 2.
    pub fn transpose(&self) -> Option<Shape> {
        let n = self.ndim();
        if n < 2 {
            return None;
        }
        let mut dims = self.dims.clone();
        dims.swap(n - 2, n - 1);
        Some(Shape { dims })
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape{:?}", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
