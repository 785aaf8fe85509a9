use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lx_array::NdArray;
use lx_columnar::{Column, Table};
use lx_runtime::ValueKind;
use lx_types::Scalar;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::ExprError;

/// Address of a context entry: a zero-based position or a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    Position(i64),
    Key(String),
}

impl From<i32> for SourceRef {
    fn from(position: i32) -> Self {
        Self::Position(i64::from(position))
    }
}

impl From<i64> for SourceRef {
    fn from(position: i64) -> Self {
        Self::Position(position)
    }
}

impl From<usize> for SourceRef {
    fn from(position: usize) -> Self {
        Self::Position(i64::try_from(position).unwrap_or(i64::MAX))
    }
}

impl From<&str> for SourceRef {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for SourceRef {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(position) => write!(f, "{position}"),
            Self::Key(key) => write!(f, "{key:?}"),
        }
    }
}

/// A caller-owned value the engine never looks inside. Clones share the
/// same allocation, so identity survives evaluation.
#[derive(Clone)]
pub struct OpaqueValue {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.inner).downcast_ref::<T>()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueValue").field(&self.type_name).finish()
    }
}

impl PartialEq for OpaqueValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// One entry of an evaluation context, or the result of evaluating an
/// expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Scalar(Scalar),
    Sequence(Arc<Vec<Scalar>>),
    Array(Arc<NdArray>),
    Column(Arc<Column>),
    Opaque(OpaqueValue),
}

impl ContextValue {
    #[must_use]
    pub fn sequence(values: Vec<Scalar>) -> Self {
        Self::Sequence(Arc::new(values))
    }

    #[must_use]
    pub fn array(array: NdArray) -> Self {
        Self::Array(Arc::new(array))
    }

    #[must_use]
    pub fn column(column: Column) -> Self {
        Self::Column(Arc::new(column))
    }

    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(OpaqueValue::new(value))
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Scalar(_) => ValueKind::Scalar,
            Self::Sequence(_) => ValueKind::Sequence,
            Self::Array(_) => ValueKind::Array,
            Self::Column(_) => ValueKind::Column,
            Self::Opaque(_) => ValueKind::Opaque,
        }
    }

    #[must_use]
    pub fn is_iterable(&self) -> bool {
        self.kind().is_iterable()
    }

    /// Number of dimensions for iterable values; `None` for scalars and
    /// opaque values.
    #[must_use]
    pub fn ndim(&self) -> Option<usize> {
        match self {
            Self::Sequence(_) | Self::Column(_) => Some(1),
            Self::Array(array) => Some(array.ndim()),
            Self::Scalar(_) | Self::Opaque(_) => None,
        }
    }

    #[must_use]
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Scalar]> {
        match self {
            Self::Sequence(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Self::Array(array) => Some(array),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_column(&self) -> Option<&Column> {
        match self {
            Self::Column(column) => Some(column),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_opaque(&self) -> Option<&OpaqueValue> {
        match self {
            Self::Opaque(value) => Some(value),
            _ => None,
        }
    }

    /// True when both values point at the same storage; scalars compare by
    /// value.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(left), Self::Scalar(right)) => left == right,
            (Self::Sequence(left), Self::Sequence(right)) => Arc::ptr_eq(left, right),
            (Self::Array(left), Self::Array(right)) => Arc::ptr_eq(left, right),
            (Self::Column(left), Self::Column(right)) => Arc::ptr_eq(left, right),
            (Self::Opaque(left), Self::Opaque(right)) => left.ptr_eq(right),
            _ => false,
        }
    }
}

impl From<Scalar> for ContextValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int64(value))
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        Self::Scalar(Scalar::Float64(value))
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Scalar(Scalar::Utf8(value.to_owned()))
    }
}

impl From<Vec<Scalar>> for ContextValue {
    fn from(values: Vec<Scalar>) -> Self {
        Self::sequence(values)
    }
}

impl From<Vec<i64>> for ContextValue {
    fn from(values: Vec<i64>) -> Self {
        Self::sequence(values.into_iter().map(Scalar::Int64).collect())
    }
}

impl From<Vec<f64>> for ContextValue {
    fn from(values: Vec<f64>) -> Self {
        Self::sequence(values.into_iter().map(Scalar::Float64).collect())
    }
}

impl From<NdArray> for ContextValue {
    fn from(array: NdArray) -> Self {
        Self::array(array)
    }
}

impl From<ArrayD<i64>> for ContextValue {
    fn from(array: ArrayD<i64>) -> Self {
        Self::array(array.into())
    }
}

impl From<ArrayD<f64>> for ContextValue {
    fn from(array: ArrayD<f64>) -> Self {
        Self::array(array.into())
    }
}

impl From<Column> for ContextValue {
    fn from(column: Column) -> Self {
        Self::column(column)
    }
}

impl From<OpaqueValue> for ContextValue {
    fn from(value: OpaqueValue) -> Self {
        Self::Opaque(value)
    }
}

/// The values an expression is evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    /// Entries addressable by position only.
    Ordered(Vec<ContextValue>),
    /// Entries addressable by position or by key.
    Keyed {
        values: Vec<ContextValue>,
        keys: BTreeMap<String, usize>,
    },
    /// Columns addressable by position or by name.
    Table(Table),
}

impl Default for Context {
    fn default() -> Self {
        Self::Ordered(Vec::new())
    }
}

impl From<Table> for Context {
    fn from(table: Table) -> Self {
        Self::Table(table)
    }
}

impl Context {
    #[must_use]
    pub fn new(values: Vec<ContextValue>) -> Self {
        Self::Ordered(values)
    }

    pub fn single(value: impl Into<ContextValue>) -> Self {
        Self::Ordered(vec![value.into()])
    }

    /// Name every entry so that string references resolve against it.
    pub fn keyed<K, I>(values: Vec<ContextValue>, keys: I) -> Result<Self, ExprError>
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        let mut positions = BTreeMap::new();
        for (position, key) in keys.into_iter().enumerate() {
            let key = key.into();
            if positions.contains_key(&key) {
                return Err(ExprError::DuplicateKey(key));
            }
            positions.insert(key, position);
        }
        if positions.len() != values.len() {
            return Err(ExprError::KeyCountMismatch {
                values: values.len(),
                keys: positions.len(),
            });
        }
        Ok(Self::Keyed {
            values,
            keys: positions,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Ordered(values) | Self::Keyed { values, .. } => values.len(),
            Self::Table(table) => table.num_columns(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the entry `reference` points at. Shared storage is cloned by
    /// reference count only.
    pub fn resolve(&self, reference: &SourceRef) -> Result<ContextValue, ExprError> {
        match reference {
            SourceRef::Position(position) => self.resolve_position(*position),
            SourceRef::Key(key) => self.resolve_key(key),
        }
    }

    fn resolve_position(&self, position: i64) -> Result<ContextValue, ExprError> {
        let out_of_range = || ExprError::PositionOutOfRange {
            position,
            len: self.len(),
        };
        let index = usize::try_from(position).map_err(|_| out_of_range())?;
        match self {
            Self::Ordered(values) | Self::Keyed { values, .. } => {
                values.get(index).cloned().ok_or_else(out_of_range)
            }
            Self::Table(table) => table
                .column(index)
                .map(|column| ContextValue::Column(Arc::clone(column)))
                .ok_or_else(out_of_range),
        }
    }

    fn resolve_key(&self, key: &str) -> Result<ContextValue, ExprError> {
        match self {
            Self::Ordered(_) => Err(ExprError::KeyOnUnkeyedContext(key.to_owned())),
            Self::Keyed { values, keys } => keys
                .get(key)
                .and_then(|position| values.get(*position))
                .cloned()
                .ok_or_else(|| ExprError::UnknownKey(key.to_owned())),
            Self::Table(table) => table
                .column_by_name(key)
                .map(|column| ContextValue::Column(Arc::clone(column)))
                .ok_or_else(|| ExprError::UnknownKey(key.to_owned())),
        }
    }
}
