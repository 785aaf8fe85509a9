use std::borrow::Cow;
use std::sync::Arc;

use lx_array::{ArrayError, NdArray, shift_slice};
use lx_columnar::Column;
use lx_runtime::BackendKind;
use lx_types::{
    DType, Scalar, cast_scalar, cast_scalar_owned, common_dtype, infer_dtype, sum_scalars,
};

use crate::ExprError;
use crate::context::ContextValue;

/// Evaluates a sub-expression over one rolling window.
pub type WindowFn<'a> = dyn FnMut(ContextValue) -> Result<ContextValue, ExprError> + 'a;

/// The operation set, implemented once per value representation.
pub trait Backend: Sync {
    fn kind(&self) -> BackendKind;

    /// Whether `value` has a shape this backend can execute over.
    fn supports(&self, value: &ContextValue) -> bool;

    fn abs(&self, value: &ContextValue) -> Result<ContextValue, ExprError>;

    fn shift(
        &self,
        value: &ContextValue,
        amount: i64,
        fill: &Scalar,
        axis: usize,
    ) -> Result<ContextValue, ExprError>;

    /// Sum of the non-missing elements.
    fn sum(&self, value: &ContextValue) -> Result<Scalar, ExprError>;

    /// Apply `func` to every trailing window of at most `window` elements.
    /// Scalar window results become one output element each; iterable
    /// results are concatenated.
    fn rolling(
        &self,
        value: &ContextValue,
        window: usize,
        func: &mut WindowFn<'_>,
    ) -> Result<ContextValue, ExprError>;

    /// Cast `value` to an element type that can hold `fill`.
    fn promote_for_fill(
        &self,
        value: &ContextValue,
        fill: &Scalar,
    ) -> Result<ContextValue, ExprError>;

    /// Convert `value` into this backend's native representation.
    fn materialize(
        &self,
        value: ContextValue,
        name: Option<&str>,
    ) -> Result<ContextValue, ExprError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceBackend;

#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayBackend;

#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnBackend;

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughBackend;

static SEQUENCE: SequenceBackend = SequenceBackend;
static ARRAY: ArrayBackend = ArrayBackend;
static COLUMN: ColumnBackend = ColumnBackend;
static PASSTHROUGH: PassthroughBackend = PassthroughBackend;

#[must_use]
pub fn backend_for(kind: BackendKind) -> &'static dyn Backend {
    match kind {
        BackendKind::GenericSequence => &SEQUENCE,
        BackendKind::VectorizedArray => &ARRAY,
        BackendKind::TabularColumn => &COLUMN,
        BackendKind::NativePassthrough => &PASSTHROUGH,
    }
}

/// Pick the backend for one operation over the current value.
///
/// Scalars and opaque values always run natively, whatever was requested.
/// Iterable values use the requested backend when given, otherwise the
/// backend matching their own representation.
pub fn select_backend(
    value: &ContextValue,
    requested: Option<BackendKind>,
) -> Result<&'static dyn Backend, ExprError> {
    let kind = value.kind();
    if !kind.is_iterable() {
        return Ok(&PASSTHROUGH);
    }
    let backend = backend_for(requested.unwrap_or_else(|| kind.native_backend()));
    if backend.supports(value) {
        Ok(backend)
    } else {
        Err(mismatch(
            backend.kind(),
            value,
            format!("{}-dimensional value", value.ndim().unwrap_or(0)),
        ))
    }
}

fn mismatch(backend: BackendKind, value: &ContextValue, detail: impl Into<String>) -> ExprError {
    ExprError::BackendMismatch {
        backend,
        kind: value.kind(),
        detail: detail.into(),
    }
}

fn one_dimensional(value: &ContextValue) -> bool {
    value.ndim() == Some(1)
}

fn check_flat_axis(axis: usize) -> Result<(), ExprError> {
    if axis == 0 {
        Ok(())
    } else {
        Err(ExprError::AxisOutOfBounds { axis, ndim: 1 })
    }
}

fn shift_array(
    array: &NdArray,
    amount: i64,
    fill: &Scalar,
    axis: usize,
) -> Result<NdArray, ExprError> {
    array
        .shift(amount, fill, axis)
        .map_err(|err| match err {
            ArrayError::Type(source) => ExprError::FillCoercion {
                fill: fill.clone(),
                dtype: array.dtype(),
                source,
            },
            other => other.into(),
        })
}

fn promote_array(array: &NdArray, fill: &Scalar) -> Result<NdArray, ExprError> {
    let dtype = array.fill_promotion(fill)?;
    Ok(array.cast(dtype)?)
}

/// `fill` as an element of `dtype`. All-missing data takes the fill as given.
fn coerce_fill(fill: &Scalar, dtype: DType) -> Result<Scalar, ExprError> {
    if dtype == DType::Null {
        return Ok(fill.clone());
    }
    cast_scalar(fill, dtype).map_err(|source| ExprError::FillCoercion {
        fill: fill.clone(),
        dtype,
        source,
    })
}

/// Element type able to hold both `dtype` data and `fill`.
fn fill_target(dtype: DType, fill: &Scalar) -> Result<DType, ExprError> {
    if fill.is_missing() {
        Ok(dtype)
    } else {
        Ok(common_dtype(dtype, fill.dtype())?)
    }
}

fn rolling_values(
    values: &[Scalar],
    window: usize,
    func: &mut WindowFn<'_>,
) -> Result<Vec<Scalar>, ExprError> {
    let mut out = Vec::with_capacity(values.len());
    for end in 1..=values.len() {
        let start = end.saturating_sub(window);
        match func(ContextValue::sequence(values[start..end].to_vec()))? {
            ContextValue::Scalar(scalar) => out.push(scalar),
            ContextValue::Sequence(items) => out.extend(items.iter().cloned()),
            ContextValue::Column(column) => out.extend(column.values().iter().cloned()),
            ContextValue::Array(array) if array.ndim() == 1 => out.extend(array.to_scalars()),
            other => {
                return Err(ExprError::Unsupported {
                    op: "rolling",
                    kind: other.kind(),
                });
            }
        }
    }
    Ok(out)
}

impl SequenceBackend {
    fn values_of<'a>(&self, value: &'a ContextValue) -> Result<Cow<'a, [Scalar]>, ExprError> {
        match value {
            ContextValue::Sequence(values) => Ok(Cow::Borrowed(values.as_slice())),
            ContextValue::Column(column) => Ok(Cow::Borrowed(column.values())),
            ContextValue::Array(array) if array.ndim() == 1 => Ok(Cow::Owned(array.to_scalars())),
            other => Err(mismatch(
                self.kind(),
                other,
                "generic sequences are one-dimensional",
            )),
        }
    }
}

impl Backend for SequenceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GenericSequence
    }

    fn supports(&self, value: &ContextValue) -> bool {
        one_dimensional(value)
    }

    fn abs(&self, value: &ContextValue) -> Result<ContextValue, ExprError> {
        let values = self.values_of(value)?;
        let out = values
            .iter()
            .map(Scalar::abs)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ContextValue::sequence(out))
    }

    fn shift(
        &self,
        value: &ContextValue,
        amount: i64,
        fill: &Scalar,
        axis: usize,
    ) -> Result<ContextValue, ExprError> {
        check_flat_axis(axis)?;
        let values = self.values_of(value)?;
        if amount == 0 || values.is_empty() {
            return Ok(ContextValue::sequence(values.into_owned()));
        }
        let fill = coerce_fill(fill, infer_dtype(&values)?)?;
        Ok(ContextValue::sequence(shift_slice(&values[..], amount, &fill)))
    }

    fn sum(&self, value: &ContextValue) -> Result<Scalar, ExprError> {
        Ok(sum_scalars(&self.values_of(value)?)?)
    }

    fn rolling(
        &self,
        value: &ContextValue,
        window: usize,
        func: &mut WindowFn<'_>,
    ) -> Result<ContextValue, ExprError> {
        let values = self.values_of(value)?;
        Ok(ContextValue::sequence(rolling_values(&values, window, func)?))
    }

    fn promote_for_fill(
        &self,
        value: &ContextValue,
        fill: &Scalar,
    ) -> Result<ContextValue, ExprError> {
        let values = self.values_of(value)?;
        let target = fill_target(infer_dtype(&values)?, fill)?;
        let promoted = values
            .iter()
            .cloned()
            .map(|value| cast_scalar_owned(value, target))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ContextValue::sequence(promoted))
    }

    fn materialize(
        &self,
        value: ContextValue,
        _name: Option<&str>,
    ) -> Result<ContextValue, ExprError> {
        if matches!(value, ContextValue::Sequence(_)) {
            return Ok(value);
        }
        let values = self.values_of(&value)?.into_owned();
        Ok(ContextValue::sequence(values))
    }
}

impl ArrayBackend {
    fn array_of<'a>(&self, value: &'a ContextValue) -> Result<Cow<'a, NdArray>, ExprError> {
        let values = match value {
            ContextValue::Array(array) => return Ok(Cow::Borrowed(array.as_ref())),
            ContextValue::Sequence(values) => values.as_slice(),
            ContextValue::Column(column) => column.values(),
            other => {
                return Err(mismatch(self.kind(), other, "value is not array-like"));
            }
        };
        NdArray::from_scalars(values)
            .map(Cow::Owned)
            .map_err(|err| mismatch(self.kind(), value, err.to_string()))
    }
}

impl Backend for ArrayBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::VectorizedArray
    }

    fn supports(&self, value: &ContextValue) -> bool {
        value.is_iterable()
    }

    fn abs(&self, value: &ContextValue) -> Result<ContextValue, ExprError> {
        let array = self.array_of(value)?;
        Ok(ContextValue::array(array.abs()?))
    }

    fn shift(
        &self,
        value: &ContextValue,
        amount: i64,
        fill: &Scalar,
        axis: usize,
    ) -> Result<ContextValue, ExprError> {
        let array = self.array_of(value)?;
        Ok(ContextValue::array(shift_array(&array, amount, fill, axis)?))
    }

    fn sum(&self, value: &ContextValue) -> Result<Scalar, ExprError> {
        Ok(self.array_of(value)?.sum()?)
    }

    fn rolling(
        &self,
        value: &ContextValue,
        window: usize,
        func: &mut WindowFn<'_>,
    ) -> Result<ContextValue, ExprError> {
        let array = self.array_of(value)?;
        if array.ndim() != 1 {
            return Err(ExprError::Unsupported {
                op: "rolling",
                kind: value.kind(),
            });
        }
        let out = rolling_values(&array.to_scalars(), window, func)?;
        Ok(ContextValue::array(NdArray::from_scalars(&out)?))
    }

    fn promote_for_fill(
        &self,
        value: &ContextValue,
        fill: &Scalar,
    ) -> Result<ContextValue, ExprError> {
        let array = self.array_of(value)?;
        Ok(ContextValue::array(promote_array(&array, fill)?))
    }

    fn materialize(
        &self,
        value: ContextValue,
        _name: Option<&str>,
    ) -> Result<ContextValue, ExprError> {
        if matches!(value, ContextValue::Array(_)) {
            return Ok(value);
        }
        let array = self.array_of(&value)?.into_owned();
        Ok(ContextValue::array(array))
    }
}

impl ColumnBackend {
    fn column_of<'a>(&self, value: &'a ContextValue) -> Result<Cow<'a, Column>, ExprError> {
        let values = match value {
            ContextValue::Column(column) => return Ok(Cow::Borrowed(column.as_ref())),
            ContextValue::Sequence(values) => values.to_vec(),
            ContextValue::Array(array) if array.ndim() == 1 => array.to_scalars(),
            other => {
                return Err(mismatch(self.kind(), other, "columns are one-dimensional"));
            }
        };
        Column::from_values(String::new(), values)
            .map(Cow::Owned)
            .map_err(|err| mismatch(self.kind(), value, err.to_string()))
    }

    /// The column as an array of its own dtype. Strings have no array form,
    /// and int or bool data with missing values would be widened to float.
    fn dense_array(column: &Column) -> Option<NdArray> {
        NdArray::from_scalars(column.values())
            .ok()
            .filter(|array| array.dtype() == column.dtype())
    }

    /// Rebuild `values` as a column with the name and element type of
    /// `like`. An untyped input takes the type of its new values.
    fn rebuild(like: &Column, values: Vec<Scalar>) -> Result<ContextValue, ExprError> {
        let column = if like.dtype() == DType::Null {
            Column::from_values(like.name(), values)?
        } else {
            Column::new(like.name(), like.dtype(), values)?
        };
        Ok(ContextValue::column(column))
    }
}

impl Backend for ColumnBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::TabularColumn
    }

    fn supports(&self, value: &ContextValue) -> bool {
        one_dimensional(value)
    }

    fn abs(&self, value: &ContextValue) -> Result<ContextValue, ExprError> {
        let column = self.column_of(value)?;
        let out = match Self::dense_array(&column) {
            Some(array) => array.abs()?.to_scalars(),
            None => column
                .values()
                .iter()
                .map(Scalar::abs)
                .collect::<Result<Vec<_>, _>>()?,
        };
        Self::rebuild(&column, out)
    }

    fn shift(
        &self,
        value: &ContextValue,
        amount: i64,
        fill: &Scalar,
        axis: usize,
    ) -> Result<ContextValue, ExprError> {
        check_flat_axis(axis)?;
        let column = self.column_of(value)?;
        if amount == 0 || column.is_empty() {
            return Ok(ContextValue::column(column.into_owned()));
        }
        let fill = coerce_fill(fill, column.dtype())?;
        let out = match Self::dense_array(&column) {
            Some(array) => shift_array(&array, amount, &fill, axis)?.to_scalars(),
            None => shift_slice(column.values(), amount, &fill),
        };
        Self::rebuild(&column, out)
    }

    fn sum(&self, value: &ContextValue) -> Result<Scalar, ExprError> {
        let column = self.column_of(value)?;
        match Self::dense_array(&column) {
            Some(array) => Ok(array.sum()?),
            None => Ok(sum_scalars(column.values())?),
        }
    }

    fn rolling(
        &self,
        value: &ContextValue,
        window: usize,
        func: &mut WindowFn<'_>,
    ) -> Result<ContextValue, ExprError> {
        let column = self.column_of(value)?;
        let out = rolling_values(column.values(), window, func)?;
        Ok(ContextValue::column(Column::from_values(column.name(), out)?))
    }

    fn promote_for_fill(
        &self,
        value: &ContextValue,
        fill: &Scalar,
    ) -> Result<ContextValue, ExprError> {
        let column = self.column_of(value)?;
        let target = fill_target(column.dtype(), fill)?;
        let promoted = Column::new(column.name(), target, column.values().to_vec())?;
        Ok(ContextValue::column(promoted))
    }

    fn materialize(
        &self,
        value: ContextValue,
        name: Option<&str>,
    ) -> Result<ContextValue, ExprError> {
        let column = match (value, name) {
            (ContextValue::Column(column), None) => return Ok(ContextValue::Column(column)),
            (ContextValue::Column(column), Some(name)) => {
                Arc::unwrap_or_clone(column).with_name(name)
            }
            (other, name) => {
                let column = self.column_of(&other)?.into_owned();
                match name {
                    Some(name) => column.with_name(name),
                    None => column,
                }
            }
        };
        Ok(ContextValue::column(column))
    }
}

impl Backend for PassthroughBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativePassthrough
    }

    fn supports(&self, value: &ContextValue) -> bool {
        !value.is_iterable()
    }

    fn abs(&self, value: &ContextValue) -> Result<ContextValue, ExprError> {
        match value {
            ContextValue::Scalar(scalar) => Ok(ContextValue::Scalar(scalar.abs()?)),
            other => Err(ExprError::Unsupported {
                op: "abs",
                kind: other.kind(),
            }),
        }
    }

    fn shift(
        &self,
        value: &ContextValue,
        _amount: i64,
        _fill: &Scalar,
        _axis: usize,
    ) -> Result<ContextValue, ExprError> {
        Err(ExprError::Unsupported {
            op: "shift",
            kind: value.kind(),
        })
    }

    fn sum(&self, value: &ContextValue) -> Result<Scalar, ExprError> {
        Err(ExprError::Unsupported {
            op: "sum",
            kind: value.kind(),
        })
    }

    fn rolling(
        &self,
        value: &ContextValue,
        _window: usize,
        _func: &mut WindowFn<'_>,
    ) -> Result<ContextValue, ExprError> {
        Err(ExprError::Unsupported {
            op: "rolling",
            kind: value.kind(),
        })
    }

    fn promote_for_fill(
        &self,
        value: &ContextValue,
        _fill: &Scalar,
    ) -> Result<ContextValue, ExprError> {
        Err(ExprError::Unsupported {
            op: "shift",
            kind: value.kind(),
        })
    }

    fn materialize(
        &self,
        value: ContextValue,
        _name: Option<&str>,
    ) -> Result<ContextValue, ExprError> {
        Ok(value)
    }
}
