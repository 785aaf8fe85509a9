#![forbid(unsafe_code)]

use chrono::NaiveDateTime;
use lx_types::{DType, Scalar, TypeError, cast_scalar_owned, common_dtype, infer_dtype};
use ndarray::{ArrayD, Axis, IxDyn, Zip};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArrayError {
    #[error("axis {axis} is out of bounds for an array with {ndim} dimension(s)")]
    AxisOutOfBounds { axis: usize, ndim: usize },
    #[error("dtype {0:?} cannot be stored in an array")]
    UnsupportedDtype(DType),
    #[error("shape {shape:?} does not match {len} values")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// A rectangular n-dimensional array with one element type.
///
/// Datetime arrays use `None` as the NaT marker; float arrays use NaN.
#[derive(Debug, Clone, PartialEq)]
pub enum NdArray {
    Bool(ArrayD<bool>),
    Int64(ArrayD<i64>),
    Float64(ArrayD<f64>),
    Datetime(ArrayD<Option<NaiveDateTime>>),
}

impl From<ArrayD<bool>> for NdArray {
    fn from(values: ArrayD<bool>) -> Self {
        Self::Bool(values)
    }
}

impl From<ArrayD<i64>> for NdArray {
    fn from(values: ArrayD<i64>) -> Self {
        Self::Int64(values)
    }
}

impl From<ArrayD<f64>> for NdArray {
    fn from(values: ArrayD<f64>) -> Self {
        Self::Float64(values)
    }
}

impl From<ArrayD<Option<NaiveDateTime>>> for NdArray {
    fn from(values: ArrayD<Option<NaiveDateTime>>) -> Self {
        Self::Datetime(values)
    }
}

impl NdArray {
    /// Build a 1-D array from scalars, picking the storage dtype from the
    /// values.
    pub fn from_scalars(values: &[Scalar]) -> Result<Self, ArrayError> {
        Self::from_shape_scalars(&[values.len()], values.to_vec())
    }

    /// Build an array of `shape` from scalars laid out in row-major order.
    ///
    /// Integer and boolean data containing missing values is stored as
    /// float64 so the missing slots can hold NaN.
    pub fn from_shape_scalars(shape: &[usize], values: Vec<Scalar>) -> Result<Self, ArrayError> {
        let dtype = storage_dtype(&values)?;
        Self::build(shape, values, dtype)
    }

    fn build(shape: &[usize], values: Vec<Scalar>, dtype: DType) -> Result<Self, ArrayError> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(ArrayError::ShapeMismatch {
                shape: shape.to_vec(),
                len: values.len(),
            });
        }

        let array = match dtype {
            DType::Bool => Self::Bool(shaped(
                shape,
                collect_elements(values, dtype, bool_element)?,
            )?),
            DType::Int64 => Self::Int64(shaped(
                shape,
                collect_elements(values, dtype, int_element)?,
            )?),
            DType::Float64 | DType::Null => Self::Float64(shaped(
                shape,
                collect_elements(values, DType::Float64, float_element)?,
            )?),
            DType::Datetime => Self::Datetime(shaped(
                shape,
                collect_elements(values, dtype, datetime_element)?,
            )?),
            DType::Utf8 => return Err(ArrayError::UnsupportedDtype(dtype)),
        };
        Ok(array)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Datetime(_) => DType::Datetime,
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Bool(values) => values.shape(),
            Self::Int64(values) => values.shape(),
            Self::Float64(values) => values.shape(),
            Self::Datetime(values) => values.shape(),
        }
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in logical row-major order.
    #[must_use]
    pub fn to_scalars(&self) -> Vec<Scalar> {
        match self {
            Self::Bool(values) => values.iter().map(|v| Scalar::Bool(*v)).collect(),
            Self::Int64(values) => values.iter().map(|v| Scalar::Int64(*v)).collect(),
            Self::Float64(values) => values.iter().map(|v| Scalar::Float64(*v)).collect(),
            Self::Datetime(values) => values
                .iter()
                .map(|v| match v {
                    Some(ts) => Scalar::Datetime(*ts),
                    None => Scalar::missing_for_dtype(DType::Datetime),
                })
                .collect(),
        }
    }

    pub fn cast(&self, dtype: DType) -> Result<Self, ArrayError> {
        if dtype == self.dtype() {
            return Ok(self.clone());
        }
        Self::build(self.shape(), self.to_scalars(), dtype)
    }

    /// Dtype this array must be promoted to before `fill` can be stored in
    /// it.
    pub fn fill_promotion(&self, fill: &Scalar) -> Result<DType, TypeError> {
        let dtype = self.dtype();
        if fill.is_missing() {
            return Ok(match dtype {
                DType::Bool | DType::Int64 => DType::Float64,
                other => other,
            });
        }
        common_dtype(dtype, fill.dtype())
    }

    pub fn abs(&self) -> Result<Self, ArrayError> {
        match self {
            Self::Bool(values) => Ok(Self::Bool(values.clone())),
            Self::Int64(values) => {
                if let Some(value) = values.iter().find(|v| v.checked_abs().is_none()) {
                    return Err(TypeError::AbsOverflow { value: *value }.into());
                }
                Ok(Self::Int64(values.mapv(i64::wrapping_abs)))
            }
            Self::Float64(values) => Ok(Self::Float64(values.mapv(f64::abs))),
            Self::Datetime(values) => Err(TypeError::NonNumericValue {
                value: values
                    .iter()
                    .flatten()
                    .next()
                    .map_or_else(|| "NaT".to_owned(), ToString::to_string),
                dtype: DType::Datetime,
            }
            .into()),
        }
    }

    /// Sum over every element, skipping NaN and NaT. Boolean arrays count
    /// their `true` entries.
    pub fn sum(&self) -> Result<Scalar, ArrayError> {
        match self {
            Self::Bool(values) => {
                let count = values.iter().filter(|v| **v).count();
                Ok(Scalar::Int64(i64::try_from(count).map_err(|_| TypeError::SumOverflow)?))
            }
            Self::Int64(values) => values
                .iter()
                .try_fold(0_i64, |acc, v| acc.checked_add(*v))
                .map(Scalar::Int64)
                .ok_or(ArrayError::Type(TypeError::SumOverflow)),
            Self::Float64(values) => Ok(Scalar::Float64(
                values.iter().filter(|v| !v.is_nan()).sum(),
            )),
            Self::Datetime(values) => Err(TypeError::NonNumericValue {
                value: values
                    .iter()
                    .flatten()
                    .next()
                    .map_or_else(|| "NaT".to_owned(), ToString::to_string),
                dtype: DType::Datetime,
            }
            .into()),
        }
    }

    /// Shift every lane along `axis` by `amount` positions, writing `fill`
    /// into the vacated slots. The shape is unchanged.
    pub fn shift(&self, amount: i64, fill: &Scalar, axis: usize) -> Result<Self, ArrayError> {
        let ndim = self.ndim();
        if axis >= ndim {
            return Err(ArrayError::AxisOutOfBounds { axis, ndim });
        }
        let axis = Axis(axis);
        if amount == 0 || self.len() == 0 {
            return Ok(self.clone());
        }
        let dtype = self.dtype();

        let shifted = match self {
            Self::Bool(values) => Self::Bool(shift_lanes(
                values,
                amount,
                &element(fill.clone(), dtype, bool_element)?,
                axis,
            )),
            Self::Int64(values) => Self::Int64(shift_lanes(
                values,
                amount,
                &element(fill.clone(), dtype, int_element)?,
                axis,
            )),
            Self::Float64(values) => Self::Float64(shift_lanes(
                values,
                amount,
                &element(fill.clone(), dtype, float_element)?,
                axis,
            )),
            Self::Datetime(values) => Self::Datetime(shift_lanes(
                values,
                amount,
                &element(fill.clone(), dtype, datetime_element)?,
                axis,
            )),
        };
        Ok(shifted)
    }
}

/// Position in the input that lands on `position` after shifting a lane of
/// `len` elements by `amount`, or `None` when the slot is vacated.
#[must_use]
pub fn shift_source(position: usize, amount: i64, len: usize) -> Option<usize> {
    let position = i64::try_from(position).ok()?;
    let source = position.checked_sub(amount)?;
    usize::try_from(source).ok().filter(|source| *source < len)
}

/// Shift a 1-D slice; the output has the same length as the input.
#[must_use]
pub fn shift_slice<T: Clone>(values: &[T], amount: i64, fill: &T) -> Vec<T> {
    (0..values.len())
        .map(|position| match shift_source(position, amount, values.len()) {
            Some(source) => values[source].clone(),
            None => fill.clone(),
        })
        .collect()
}

fn shift_lanes<T: Clone>(values: &ArrayD<T>, amount: i64, fill: &T, axis: Axis) -> ArrayD<T> {
    let len = values.len_of(axis);
    let mut out = values.clone();
    Zip::from(values.lanes(axis))
        .and(out.lanes_mut(axis))
        .for_each(|src, mut dst| {
            for (position, slot) in dst.iter_mut().enumerate() {
                *slot = match shift_source(position, amount, len) {
                    Some(source) => src[source].clone(),
                    None => fill.clone(),
                };
            }
        });
    out
}

fn storage_dtype(values: &[Scalar]) -> Result<DType, ArrayError> {
    let dtype = infer_dtype(values)?;
    let has_missing = values.iter().any(Scalar::is_missing);
    match dtype {
        DType::Null => Ok(DType::Float64),
        DType::Bool | DType::Int64 if has_missing => Ok(DType::Float64),
        DType::Utf8 => Err(ArrayError::UnsupportedDtype(dtype)),
        other => Ok(other),
    }
}

fn shaped<T>(shape: &[usize], values: Vec<T>) -> Result<ArrayD<T>, ArrayError> {
    let len = values.len();
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| ArrayError::ShapeMismatch {
        shape: shape.to_vec(),
        len,
    })
}

fn collect_elements<T>(
    values: Vec<Scalar>,
    dtype: DType,
    extract: fn(Scalar) -> Option<T>,
) -> Result<Vec<T>, ArrayError> {
    values
        .into_iter()
        .map(|value| element(value, dtype, extract))
        .collect()
}

fn element<T>(
    value: Scalar,
    dtype: DType,
    extract: fn(Scalar) -> Option<T>,
) -> Result<T, ArrayError> {
    let from = value.dtype();
    let cast = cast_scalar_owned(value, dtype)?;
    extract(cast).ok_or(ArrayError::Type(TypeError::InvalidCast { from, to: dtype }))
}

fn bool_element(value: Scalar) -> Option<bool> {
    match value {
        Scalar::Bool(v) => Some(v),
        _ => None,
    }
}

fn int_element(value: Scalar) -> Option<i64> {
    match value {
        Scalar::Int64(v) => Some(v),
        _ => None,
    }
}

fn float_element(value: Scalar) -> Option<f64> {
    match value {
        Scalar::Float64(v) => Some(v),
        Scalar::Null(_) => Some(f64::NAN),
        _ => None,
    }
}

fn datetime_element(value: Scalar) -> Option<Option<NaiveDateTime>> {
    match value {
        Scalar::Datetime(v) => Some(Some(v)),
        Scalar::Null(_) => Some(None),
        _ => None,
    }
}
