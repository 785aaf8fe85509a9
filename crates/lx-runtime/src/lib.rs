#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    #[default]
    Strict,
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Reject,
    Repair,
}

/// Representation an operation executes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    GenericSequence,
    VectorizedArray,
    TabularColumn,
    NativePassthrough,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenericSequence => "generic_sequence",
            Self::VectorizedArray => "vectorized_array",
            Self::TabularColumn => "tabular_column",
            Self::NativePassthrough => "native_passthrough",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = RuntimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "generic_sequence" | "sequence" | "list" | "vec" => Ok(Self::GenericSequence),
            "vectorized_array" | "array" | "numpy" | "np" => Ok(Self::VectorizedArray),
            "tabular_column" | "column" | "table" | "pandas" | "pd" => Ok(Self::TabularColumn),
            "native_passthrough" | "passthrough" | "native" => Ok(Self::NativePassthrough),
            _ => Err(RuntimeError::UnknownBackend(value.to_owned())),
        }
    }
}

/// Kind of a resolved context value, as seen by the backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Scalar,
    Sequence,
    Array,
    Column,
    Opaque,
}

impl ValueKind {
    #[must_use]
    pub fn is_iterable(self) -> bool {
        matches!(self, Self::Sequence | Self::Array | Self::Column)
    }

    /// Backend chosen for this kind when the caller requests none.
    #[must_use]
    pub fn native_backend(self) -> BackendKind {
        match self {
            Self::Sequence => BackendKind::GenericSequence,
            Self::Array => BackendKind::VectorizedArray,
            Self::Column => BackendKind::TabularColumn,
            Self::Scalar | Self::Opaque => BackendKind::NativePassthrough,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    BackendSelection,
    Materialization,
    FillCoercion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub issue: IssueKind,
    pub node: String,
    pub value_kind: ValueKind,
    pub requested: Option<BackendKind>,
    pub chosen: BackendKind,
    pub action: DecisionAction,
    pub detail: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalLedger {
    records: Vec<DecisionRecord>,
}

impl EvalLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DecisionRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(node, backend)` for every backend selection, in evaluation order.
    #[must_use]
    pub fn selections(&self) -> Vec<(&str, BackendKind)> {
        self.records
            .iter()
            .filter(|record| matches!(record.issue, IssueKind::BackendSelection))
            .map(|record| (record.node.as_str(), record.chosen))
            .collect()
    }

    #[must_use]
    pub fn repairs(&self) -> usize {
        self.records
            .iter()
            .filter(|record| matches!(record.action, DecisionAction::Repair))
            .count()
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error("invalid evaluation policy: {0}")]
    Config(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvalPolicy {
    #[serde(default)]
    pub mode: RuntimeMode,
    #[serde(default)]
    pub default_backend: Option<BackendKind>,
}

impl EvalPolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
            default_backend: None,
        }
    }

    #[must_use]
    pub fn hardened() -> Self {
        Self {
            mode: RuntimeMode::Hardened,
            default_backend: None,
        }
    }

    #[must_use]
    pub fn with_default_backend(mut self, backend: BackendKind) -> Self {
        self.default_backend = Some(backend);
        self
    }

    pub fn from_json(body: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(body)?)
    }

    /// An explicit request wins over the configured default.
    #[must_use]
    pub fn requested_backend(&self, explicit: Option<BackendKind>) -> Option<BackendKind> {
        explicit.or(self.default_backend)
    }

    /// Decide what happens when a shift fill cannot be stored in the value's
    /// element type. Strict mode rejects; hardened mode repairs by promotion.
    pub fn decide_fill_coercion(
        &self,
        node: &str,
        value_kind: ValueKind,
        chosen: BackendKind,
        detail: impl Into<String>,
        ledger: &mut EvalLedger,
    ) -> DecisionAction {
        let action = match self.mode {
            RuntimeMode::Strict => DecisionAction::Reject,
            RuntimeMode::Hardened => DecisionAction::Repair,
        };
        ledger.push(DecisionRecord {
            issue: IssueKind::FillCoercion,
            node: node.to_owned(),
            value_kind,
            requested: None,
            chosen,
            action,
            detail: Some(detail.into()),
        });
        action
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BackendKind, DecisionAction, EvalLedger, EvalPolicy, IssueKind, RuntimeMode, ValueKind,
    };

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!(
            "list".parse::<BackendKind>().expect("list"),
            BackendKind::GenericSequence
        );
        assert_eq!(
            "np".parse::<BackendKind>().expect("np"),
            BackendKind::VectorizedArray
        );
        assert_eq!(
            " Pandas ".parse::<BackendKind>().expect("pandas"),
            BackendKind::TabularColumn
        );
        let err = "polars".parse::<BackendKind>().expect_err("unknown");
        assert_eq!(err.to_string(), "unknown backend: polars");
    }

    #[test]
    fn native_backend_follows_value_kind() {
        assert_eq!(
            ValueKind::Array.native_backend(),
            BackendKind::VectorizedArray
        );
        assert_eq!(
            ValueKind::Opaque.native_backend(),
            BackendKind::NativePassthrough
        );
        assert!(ValueKind::Column.is_iterable());
        assert!(!ValueKind::Scalar.is_iterable());
    }

    #[test]
    fn policy_loads_from_json_with_defaults() {
        let policy = EvalPolicy::from_json(r#"{"mode":"hardened"}"#).expect("policy");
        assert_eq!(policy.mode, RuntimeMode::Hardened);
        assert_eq!(policy.default_backend, None);

        let policy =
            EvalPolicy::from_json(r#"{"default_backend":"vectorized_array"}"#).expect("policy");
        assert_eq!(policy, EvalPolicy::strict().with_default_backend(BackendKind::VectorizedArray));

        assert!(EvalPolicy::from_json(r#"{"mode":"lenient"}"#).is_err());
    }

    #[test]
    fn explicit_backend_overrides_default() {
        let policy = EvalPolicy::strict().with_default_backend(BackendKind::TabularColumn);
        assert_eq!(
            policy.requested_backend(Some(BackendKind::GenericSequence)),
            Some(BackendKind::GenericSequence)
        );
        assert_eq!(
            policy.requested_backend(None),
            Some(BackendKind::TabularColumn)
        );
        assert_eq!(EvalPolicy::strict().requested_backend(None), None);
    }

    #[test]
    fn fill_coercion_decision_depends_on_mode() {
        let mut ledger = EvalLedger::new();
        let strict = EvalPolicy::strict().decide_fill_coercion(
            "shift",
            ValueKind::Array,
            BackendKind::VectorizedArray,
            "fill 0.5 into int64",
            &mut ledger,
        );
        let hardened = EvalPolicy::hardened().decide_fill_coercion(
            "shift",
            ValueKind::Array,
            BackendKind::VectorizedArray,
            "fill 0.5 into int64",
            &mut ledger,
        );
        assert_eq!(strict, DecisionAction::Reject);
        assert_eq!(hardened, DecisionAction::Repair);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.repairs(), 1);
        assert!(
            ledger
                .records()
                .iter()
                .all(|record| record.issue == IssueKind::FillCoercion)
        );
        assert!(ledger.selections().is_empty());
    }
}
