use std::ops::{Deref, Index};
use std::slice;

/// `(dx, dy)` of the eight surrounding cells, left column first, top to bottom.
const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BufferShapeError {
    #[error("Buffer dimensions must be positive, got {width}x{height}")]
    EmptyDimension { width: usize, height: usize },
    #[error("Buffer of {width}x{height} needs {expected} values, got {actual}")]
    LengthMismatch {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },
}

/// Dense row-major 2-D buffer. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer2<T> {
    values: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, values: Vec<T>) -> Result<Self, BufferShapeError> {
        if width == 0 || height == 0 {
            return Err(BufferShapeError::EmptyDimension { width, height });
        }

        let expected = width * height;
        if values.len() != expected {
            return Err(BufferShapeError::LengthMismatch {
                width,
                height,
                expected,
                actual: values.len(),
            });
        }

        Ok(Self {
            values,
            width,
            height,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        assert!(
            x < self.width && y < self.height,
            "coordinate ({x}, {y}) outside {}x{} buffer",
            self.width,
            self.height
        );
        &self.values[y * self.width + x]
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize) {
        (idx % self.width, idx / self.width)
    }

    /// Linear indices of the in-bounds cells around `idx`, column by column.
    pub fn neighbors(&self, idx: usize) -> Vec<usize> {
        assert!(
            idx < self.values.len(),
            "index {idx} outside buffer of {} values",
            self.values.len()
        );

        let (x, y) = self.coords(idx);
        let mut result = Vec::with_capacity(NEIGHBOR_OFFSETS.len());
        for (dx, dy) in NEIGHBOR_OFFSETS {
            let (Some(nx), Some(ny)) = (x.checked_add_signed(dx), y.checked_add_signed(dy)) else {
                continue;
            };
            if nx < self.width && ny < self.height {
                result.push(self.index(nx, ny));
            }
        }
        result
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.values.iter()
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Result<Self, BufferShapeError> {
        Self::new(width, height, vec![value; width * height])
    }
}

impl<T> Index<usize> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &Self::Output {
        &self.values[idx]
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        self.get(x, y)
    }
}

impl<T> Deref for Buffer2<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl<'a, T> IntoIterator for &'a Buffer2<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
