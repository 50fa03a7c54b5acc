//! Validation and row-major flattening of caller datasets.
//!
//! A dataset arrives as a sequence of points. Before anything is copied into the
//! arena it is checked for shape (non-empty, rectangular, at least one dimension)
//! and for finite values, then written point by point into a single contiguous
//! buffer: point `i` occupies `[i * D, (i + 1) * D)`. Row-major order is the only
//! layout the bridge and the engine agree on.

use serde_json::Value;

use crate::error::{KMeansError, Result, ValidationError};
use crate::numeric::{Element, NumericWidth};

/// Number of points and dimensions of a validated dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub points: usize,
    pub dimensions: usize,
}

impl Shape {
    /// Total number of scalars in the flattened buffer.
    pub fn len(&self) -> usize {
        self.points * self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Contiguous row-major buffer tagged with its element width.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl FlatBuffer {
    pub fn width(&self) -> NumericWidth {
        match self {
            FlatBuffer::F32(_) => NumericWidth::F32,
            FlatBuffer::F64(_) => NumericWidth::F64,
        }
    }

    /// Number of elements (not bytes).
    pub fn len(&self) -> usize {
        match self {
            FlatBuffer::F32(values) => values.len(),
            FlatBuffer::F64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the buffer in bytes once copied across the bridge.
    pub fn byte_len(&self) -> usize {
        self.len() * self.width().bytes()
    }

    /// Raw bytes of the buffer in native endianness.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FlatBuffer::F32(values) => bytemuck::cast_slice(values),
            FlatBuffer::F64(values) => bytemuck::cast_slice(values),
        }
    }

    /// Widened copy of the contents.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            FlatBuffer::F32(values) => values.iter().map(|&v| f64::from(v)).collect(),
            FlatBuffer::F64(values) => values.clone(),
        }
    }
}

/// A dataset that passed [`DataMarshaller::validate`].
#[derive(Debug, Clone, Copy)]
pub struct ValidatedDataset<'a, R> {
    rows: &'a [R],
    shape: Shape,
}

impl<'a, R: AsRef<[f64]>> ValidatedDataset<'a, R> {
    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn points(&self) -> usize {
        self.shape.points
    }

    pub fn dimensions(&self) -> usize {
        self.shape.dimensions
    }

    /// Write the points into a new buffer of the requested width.
    pub fn flatten(&self, width: NumericWidth) -> Result<FlatBuffer> {
        match width {
            NumericWidth::F32 => Ok(FlatBuffer::F32(self.flatten_as::<f32>()?)),
            NumericWidth::F64 => Ok(FlatBuffer::F64(self.flatten_as::<f64>()?)),
        }
    }

    fn flatten_as<T: Element>(&self) -> Result<Vec<T>> {
        let dim = self.shape.dimensions;
        let mut flat = Vec::with_capacity(self.shape.len());
        for (index, row) in self.rows.iter().enumerate() {
            for (dimension, &value) in row.as_ref().iter().enumerate() {
                let narrowed = T::from_f64(value);
                // f64 values beyond f32::MAX become infinite when narrowed.
                if !narrowed.to_f64().is_finite() {
                    return Err(ValidationError::NonFinite { index, dimension }.into());
                }
                flat.push(narrowed);
            }
        }
        debug_assert_eq!(flat.len(), self.shape.points * dim);
        Ok(flat)
    }
}

/// Stateless validator and reshaper for caller datasets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataMarshaller;

impl DataMarshaller {
    /// Check that `data` is a non-empty, rectangular set of finite points.
    pub fn validate<R: AsRef<[f64]>>(
        data: &[R],
    ) -> std::result::Result<ValidatedDataset<'_, R>, ValidationError> {
        let first = data.first().ok_or(ValidationError::Empty)?;
        let dimensions = first.as_ref().len();
        if dimensions == 0 {
            return Err(ValidationError::ZeroDimensions { index: 0 });
        }

        for (index, row) in data.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != dimensions {
                return Err(ValidationError::DimensionMismatch {
                    index,
                    expected: dimensions,
                    found: row.len(),
                });
            }
            if let Some(dimension) = row.iter().position(|v| !v.is_finite()) {
                return Err(ValidationError::NonFinite { index, dimension });
            }
        }

        Ok(ValidatedDataset {
            rows: data,
            shape: Shape {
                points: data.len(),
                dimensions,
            },
        })
    }

    /// Validate and flatten in one step.
    pub fn flatten<R: AsRef<[f64]>>(data: &[R], width: NumericWidth) -> Result<FlatBuffer> {
        Self::validate(data)?.flatten(width)
    }

    /// Inverse of [`DataMarshaller::flatten`]: split a buffer back into points.
    pub fn unflatten(buffer: &FlatBuffer, dimensions: usize) -> Result<Vec<Vec<f64>>> {
        if dimensions == 0 {
            return Err(ValidationError::ZeroDimensions { index: 0 }.into());
        }
        let values = buffer.to_f64_vec();
        let remainder = values.len() % dimensions;
        if remainder != 0 {
            return Err(ValidationError::DimensionMismatch {
                index: values.len() / dimensions,
                expected: dimensions,
                found: remainder,
            }
            .into());
        }
        Ok(values.chunks_exact(dimensions).map(<[f64]>::to_vec).collect())
    }

    /// Read a dynamically typed dataset (an array of numeric arrays).
    ///
    /// Shape problems are reported as [`ValidationError`]s; elements that are not
    /// numbers are reported as [`KMeansError::UnsupportedType`].
    pub fn from_json(value: &Value) -> Result<Vec<Vec<f64>>> {
        let rows = value
            .as_array()
            .ok_or(ValidationError::NotTwoDimensional { index: 0 })?;
        if rows.is_empty() {
            return Err(ValidationError::Empty.into());
        }

        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                let row = row
                    .as_array()
                    .ok_or(ValidationError::NotTwoDimensional { index })?;
                row.iter()
                    .enumerate()
                    .map(|(dimension, element)| {
                        element.as_f64().ok_or_else(|| {
                            KMeansError::UnsupportedType(format!(
                                "point {index} dimension {dimension} is a JSON {}; only numbers are accepted",
                                json_kind(element)
                            ))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
