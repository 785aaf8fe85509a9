#![forbid(unsafe_code)]

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Null,
    Bool,
    Int64,
    Float64,
    Utf8,
    Datetime,
}

impl DType {
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Bool | Self::Int64 | Self::Float64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    #[serde(rename = "nan")]
    NaN,
    #[serde(rename = "nat")]
    NaT,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Datetime(NaiveDateTime),
}

impl Scalar {
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Null(_) => DType::Null,
            Self::Bool(_) => DType::Bool,
            Self::Int64(_) => DType::Int64,
            Self::Float64(_) => DType::Float64,
            Self::Utf8(_) => DType::Utf8,
            Self::Datetime(_) => DType::Datetime,
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => v.is_nan(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_nan(&self) -> bool {
        matches!(self, Self::Null(NullKind::NaN)) || matches!(self, Self::Float64(v) if v.is_nan())
    }

    #[must_use]
    pub fn missing_for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::Float64 => Self::Null(NullKind::NaN),
            DType::Datetime => Self::Null(NullKind::NaT),
            DType::Null | DType::Bool | DType::Int64 | DType::Utf8 => Self::Null(NullKind::Null),
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float64(a), Self::Float64(b)) => (a.is_nan() && b.is_nan()) || (a == b),
            (Self::Null(NullKind::NaN), Self::Float64(v))
            | (Self::Float64(v), Self::Null(NullKind::NaN)) => v.is_nan(),
            _ => self == other,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
            Self::Datetime(v) => Err(TypeError::NonNumericValue {
                value: v.to_string(),
                dtype: DType::Datetime,
            }),
        }
    }

    /// Absolute value of a numeric scalar.
    ///
    /// Missing values pass through unchanged and booleans are their own
    /// absolute value. Strings and datetimes are rejected.
    pub fn abs(&self) -> Result<Self, TypeError> {
        match self {
            Self::Null(kind) => Ok(Self::Null(*kind)),
            Self::Bool(v) => Ok(Self::Bool(*v)),
            Self::Int64(v) => v
                .checked_abs()
                .map(Self::Int64)
                .ok_or(TypeError::AbsOverflow { value: *v }),
            Self::Float64(v) => Ok(Self::Float64(v.abs())),
            Self::Utf8(v) => Err(TypeError::NonNumericValue {
                value: v.clone(),
                dtype: DType::Utf8,
            }),
            Self::Datetime(v) => Err(TypeError::NonNumericValue {
                value: v.to_string(),
                dtype: DType::Datetime,
            }),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int64(i64::from(value))
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(value: NaiveDateTime) -> Self {
        Self::Datetime(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("dtype coercion from {left:?} to {right:?} has no compatible common type")]
    IncompatibleDtypes { left: DType, right: DType },
    #[error("cannot cast scalar of dtype {from:?} to {to:?}")]
    InvalidCast { from: DType, to: DType },
    #[error("cannot cast float {value} to int64 without loss")]
    LossyFloatToInt { value: f64 },
    #[error("expected 0/1 for bool cast from int64 but found {value}")]
    InvalidBoolInt { value: i64 },
    #[error("expected 0.0/1.0 for bool cast from float64 but found {value}")]
    InvalidBoolFloat { value: f64 },
    #[error("value {value:?} has non-numeric dtype {dtype:?}")]
    NonNumericValue { value: String, dtype: DType },
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
    #[error("absolute value of {value} overflows int64")]
    AbsOverflow { value: i64 },
    #[error("int64 sum overflows")]
    SumOverflow,
}

pub fn common_dtype(left: DType, right: DType) -> Result<DType, TypeError> {
    use DType::{Bool, Datetime, Float64, Int64, Null, Utf8};

    let out = match (left, right) {
        (a, b) if a == b => a,
        (Null, other) | (other, Null) => other,
        (Bool, Int64) | (Int64, Bool) => Int64,
        (Bool, Float64) | (Float64, Bool) => Float64,
        (Int64, Float64) | (Float64, Int64) => Float64,
        (Utf8, Utf8) => Utf8,
        (Datetime, Datetime) => Datetime,
        _ => return Err(TypeError::IncompatibleDtypes { left, right }),
    };

    Ok(out)
}

pub fn infer_dtype(values: &[Scalar]) -> Result<DType, TypeError> {
    let mut current = DType::Null;
    for value in values {
        current = common_dtype(current, value.dtype())?;
    }
    Ok(current)
}

/// Sum of the non-missing values.
///
/// Booleans count as 0/1 and sum to int64. An empty or all-missing input sums
/// to `Int64(0)`, except float data, which sums to `Float64(0.0)`.
pub fn sum_scalars(values: &[Scalar]) -> Result<Scalar, TypeError> {
    let dtype = infer_dtype(values)?;
    if !dtype.is_numeric() && dtype != DType::Null {
        let value = values
            .iter()
            .find(|value| !value.is_missing())
            .map_or_else(String::new, |value| format!("{value:?}"));
        return Err(TypeError::NonNumericValue { value, dtype });
    }
    let mut present = values.iter().filter(|value| !value.is_missing());
    if dtype == DType::Float64 {
        return present
            .map(Scalar::to_f64)
            .sum::<Result<f64, _>>()
            .map(Scalar::Float64);
    }
    present
        .try_fold(0_i64, |acc, value| {
            let value = match value {
                Scalar::Bool(v) => i64::from(*v),
                Scalar::Int64(v) => *v,
                _ => 0,
            };
            acc.checked_add(value).ok_or(TypeError::SumOverflow)
        })
        .map(Scalar::Int64)
}

pub fn cast_scalar(value: &Scalar, target: DType) -> Result<Scalar, TypeError> {
    cast_scalar_owned(value.clone(), target)
}

/// Owned variant of [`cast_scalar`]; values already of the target dtype are
/// moved through without cloning.
pub fn cast_scalar_owned(value: Scalar, target: DType) -> Result<Scalar, TypeError> {
    let from = value.dtype();
    if matches!(value, Scalar::Null(_)) {
        return Ok(Scalar::missing_for_dtype(target));
    }
    if from == target {
        return Ok(value);
    }

    match target {
        DType::Null => Ok(Scalar::Null(NullKind::Null)),
        DType::Bool => match value {
            Scalar::Int64(v) => match v {
                0 => Ok(Scalar::Bool(false)),
                1 => Ok(Scalar::Bool(true)),
                _ => Err(TypeError::InvalidBoolInt { value: v }),
            },
            Scalar::Float64(v) => {
                if v == 0.0 {
                    Ok(Scalar::Bool(false))
                } else if v == 1.0 {
                    Ok(Scalar::Bool(true))
                } else {
                    Err(TypeError::InvalidBoolFloat { value: v })
                }
            }
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Int64 => match value {
            Scalar::Bool(v) => Ok(Scalar::Int64(i64::from(v))),
            Scalar::Float64(v) => {
                if !v.is_finite() || v != v.trunc() {
                    return Err(TypeError::LossyFloatToInt { value: v });
                }
                if v < i64::MIN as f64 || v > i64::MAX as f64 {
                    return Err(TypeError::LossyFloatToInt { value: v });
                }
                Ok(Scalar::Int64(v as i64))
            }
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Float64 => match value {
            Scalar::Bool(v) => Ok(Scalar::Float64(if v { 1.0 } else { 0.0 })),
            Scalar::Int64(v) => Ok(Scalar::Float64(v as f64)),
            _ => Err(TypeError::InvalidCast { from, to: target }),
        },
        DType::Utf8 | DType::Datetime => Err(TypeError::InvalidCast { from, to: target }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        DType, NullKind, Scalar, TypeError, cast_scalar, common_dtype, infer_dtype, sum_scalars,
    };

    #[test]
    fn dtype_inference_coerces_numeric_values() {
        let values = vec![Scalar::Bool(true), Scalar::Int64(7), Scalar::Float64(3.5)];
        assert_eq!(
            infer_dtype(&values).expect("dtype should infer"),
            DType::Float64
        );
    }

    #[test]
    fn missing_values_get_target_missing_marker() {
        let missing = Scalar::Null(NullKind::Null);
        let cast = cast_scalar(&missing, DType::Float64).expect("missing casts");
        assert_eq!(cast, Scalar::Null(NullKind::NaN));
        let cast = cast_scalar(&missing, DType::Datetime).expect("missing casts");
        assert_eq!(cast, Scalar::Null(NullKind::NaT));
    }

    #[test]
    fn semantic_eq_treats_nan_as_equal() {
        let left = Scalar::Float64(f64::NAN);
        let right = Scalar::Null(NullKind::NaN);
        assert!(left.semantic_eq(&right));
    }

    #[test]
    fn common_dtype_rejects_datetime_numeric_mix() {
        let err = common_dtype(DType::Datetime, DType::Int64).expect_err("must fail");
        assert_eq!(
            err.to_string(),
            "dtype coercion from Datetime to Int64 has no compatible common type"
        );
    }

    #[test]
    fn abs_handles_numeric_and_missing_scalars() {
        assert_eq!(Scalar::Int64(-4).abs().expect("abs"), Scalar::Int64(4));
        assert_eq!(
            Scalar::Float64(-2.5).abs().expect("abs"),
            Scalar::Float64(2.5)
        );
        assert_eq!(
            Scalar::Null(NullKind::NaN).abs().expect("abs"),
            Scalar::Null(NullKind::NaN)
        );
        assert_eq!(
            Scalar::Int64(i64::MIN).abs().expect_err("overflow"),
            TypeError::AbsOverflow { value: i64::MIN }
        );
    }

    #[test]
    fn abs_rejects_datetime() {
        let ts = NaiveDate::from_ymd_opt(2020, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid timestamp");
        let err = Scalar::Datetime(ts).abs().expect_err("datetime abs");
        assert!(matches!(
            err,
            TypeError::NonNumericValue {
                dtype: DType::Datetime,
                ..
            }
        ));
    }

    #[test]
    fn fractional_float_to_int_is_lossy() {
        let err = cast_scalar(&Scalar::Float64(0.5), DType::Int64).expect_err("lossy");
        assert_eq!(err, TypeError::LossyFloatToInt { value: 0.5 });
        assert_eq!(
            cast_scalar(&Scalar::Float64(2.0), DType::Int64).expect("exact"),
            Scalar::Int64(2)
        );
    }

    #[test]
    fn sum_skips_missing_values() {
        let values = vec![
            Scalar::Int64(1),
            Scalar::Null(NullKind::Null),
            Scalar::Int64(-3),
        ];
        assert_eq!(sum_scalars(&values).expect("sum"), Scalar::Int64(-2));

        let floats = vec![Scalar::Float64(0.5), Scalar::Float64(f64::NAN)];
        assert_eq!(sum_scalars(&floats).expect("sum"), Scalar::Float64(0.5));

        let flags = vec![Scalar::Bool(true), Scalar::Bool(true), Scalar::Bool(false)];
        assert_eq!(sum_scalars(&flags).expect("sum"), Scalar::Int64(2));

        assert_eq!(sum_scalars(&[]).expect("empty"), Scalar::Int64(0));
    }

    #[test]
    fn sum_rejects_text_and_overflow() {
        let err = sum_scalars(&[Scalar::Utf8("a".to_owned())]).expect_err("text");
        assert!(matches!(
            err,
            TypeError::NonNumericValue {
                dtype: DType::Utf8,
                ..
            }
        ));
        let err = sum_scalars(&[Scalar::Int64(i64::MAX), Scalar::Int64(1)]).expect_err("overflow");
        assert_eq!(err, TypeError::SumOverflow);
    }

    #[test]
    fn scalar_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Scalar::Int64(3)).expect("serialize");
        assert_eq!(json, r#"{"kind":"int64","value":3}"#);
    }
}
