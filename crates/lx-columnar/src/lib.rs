#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use lx_types::{DType, Scalar, TypeError, cast_scalar_owned, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named, positionally ordered 1-D column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    dtype: DType,
    values: Vec<Scalar>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("duplicate column name: {0}")]
    DuplicateName(String),
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Column {
    /// Construct a column, coercing values to the target dtype.
    /// Takes ownership of the values and only casts the ones whose dtype
    /// differs from the target.
    pub fn new(
        name: impl Into<String>,
        dtype: DType,
        values: Vec<Scalar>,
    ) -> Result<Self, ColumnError> {
        let needs_coercion = values.iter().any(|v| {
            let d = v.dtype();
            d != dtype && d != DType::Null
        });

        let coerced = if needs_coercion {
            values
                .into_iter()
                .map(|value| cast_scalar_owned(value, dtype))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            values
                .into_iter()
                .map(|value| match value {
                    Scalar::Null(_) => Scalar::missing_for_dtype(dtype),
                    other => other,
                })
                .collect()
        };

        Ok(Self {
            name: name.into(),
            dtype,
            values: coerced,
        })
    }

    pub fn from_values(name: impl Into<String>, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(name, dtype, values)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }
}

/// Equal-length named columns, addressable by position or by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Arc<Column>>,
    positions: BTreeMap<String, usize>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, ColumnError> {
        let mut positions = BTreeMap::new();
        let expected_rows = columns.first().map(Column::len);

        for (position, column) in columns.iter().enumerate() {
            if let Some(rows) = expected_rows
                && column.len() != rows
            {
                return Err(ColumnError::LengthMismatch {
                    left: rows,
                    right: column.len(),
                });
            }
            if positions.insert(column.name().to_owned(), position).is_some() {
                return Err(ColumnError::DuplicateName(column.name().to_owned()));
            }
        }

        Ok(Self {
            columns: columns.into_iter().map(Arc::new).collect(),
            positions,
        })
    }

    /// Build a table from `(name, values)` pairs, inferring each column's
    /// dtype.
    pub fn from_pairs<N, I>(pairs: I) -> Result<Self, ColumnError>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Vec<Scalar>)>,
    {
        let columns = pairs
            .into_iter()
            .map(|(name, values)| Column::from_values(name, values))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(columns)
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |column| column.len())
    }

    #[must_use]
    pub fn column(&self, position: usize) -> Option<&Arc<Column>> {
        self.columns.get(position)
    }

    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&Arc<Column>> {
        self.positions
            .get(name)
            .and_then(|position| self.columns.get(*position))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name())
    }
}

#[cfg(test)]
mod tests {
    use lx_types::{DType, NullKind, Scalar};

    use super::{Column, ColumnError, Table};

    #[test]
    fn column_coerces_mixed_numeric_values() {
        let column = Column::from_values("a", vec![Scalar::Int64(1), Scalar::Float64(2.5)])
            .expect("column should build");
        assert_eq!(column.dtype(), DType::Float64);
        assert_eq!(column.values(), &[Scalar::Float64(1.0), Scalar::Float64(2.5)]);
    }

    #[test]
    fn column_remaps_missing_to_dtype_marker() {
        let column = Column::new(
            "a",
            DType::Float64,
            vec![Scalar::Float64(1.0), Scalar::Null(NullKind::Null)],
        )
        .expect("column should build");
        assert_eq!(
            column.values(),
            &[Scalar::Float64(1.0), Scalar::Null(NullKind::NaN)]
        );
    }

    #[test]
    fn table_resolves_columns_by_name_and_position() {
        let table = Table::from_pairs([
            ("a", vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3)]),
            ("b", vec![Scalar::Int64(4), Scalar::Int64(-5), Scalar::Int64(6)]),
        ])
        .expect("table");

        assert_eq!(table.num_columns(), 2);
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.column(1).map(|c| c.name()), Some("b"));
        assert_eq!(
            table.column_by_name("b").map(|c| c.values().to_vec()),
            Some(vec![Scalar::Int64(4), Scalar::Int64(-5), Scalar::Int64(6)])
        );
        assert!(table.column_by_name("z").is_none());
        assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn table_rejects_ragged_columns() {
        let err = Table::from_pairs([
            ("a", vec![Scalar::Int64(1)]),
            ("b", vec![Scalar::Int64(1), Scalar::Int64(2)]),
        ])
        .expect_err("ragged");
        assert_eq!(err, ColumnError::LengthMismatch { left: 1, right: 2 });
    }

    #[test]
    fn table_rejects_duplicate_names() {
        let err = Table::from_pairs([("a", vec![Scalar::Int64(1)]), ("a", vec![Scalar::Int64(2)])])
            .expect_err("duplicate");
        assert_eq!(err, ColumnError::DuplicateName("a".to_owned()));
    }

    #[test]
    fn column_round_trips_through_json() {
        let column = Column::from_values("a", vec![Scalar::Int64(1)]).expect("column");
        let json = serde_json::to_string(&column).expect("serialize");
        let back: Column = serde_json::from_str(&json).expect("deserialize");
        assert!(column.semantic_eq(&back));
        assert_eq!(back.name(), "a");
    }
}
