#![forbid(unsafe_code)]

mod backend;
mod context;

use std::sync::Arc;

use lx_array::ArrayError;
use lx_columnar::ColumnError;
use lx_runtime::{
    BackendKind, DecisionAction, DecisionRecord, EvalLedger, EvalPolicy, IssueKind, ValueKind,
};
use lx_types::{DType, Scalar, TypeError, cast_scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use backend::{
    ArrayBackend, Backend, ColumnBackend, PassthroughBackend, SequenceBackend, WindowFn,
    backend_for, select_backend,
};
pub use context::{Context, ContextValue, OpaqueValue, SourceRef};

/// A lazy expression tree. Building one never touches a context; all
/// validation happens in [`evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Source {
        reference: SourceRef,
    },
    Literal {
        value: Scalar,
    },
    Abs {
        inner: Box<Expr>,
    },
    Shift {
        inner: Box<Expr>,
        amount: i64,
        #[serde(default = "default_fill")]
        fill: Scalar,
        #[serde(default)]
        axis: usize,
    },
    /// Shift by an amount computed from the context at evaluation time.
    ShiftBy {
        inner: Box<Expr>,
        amount: Box<Expr>,
        #[serde(default = "default_fill")]
        fill: Scalar,
        #[serde(default)]
        axis: usize,
    },
    Sum {
        inner: Box<Expr>,
    },
    /// `func` evaluated over each trailing window of `inner`; inside the
    /// window, `source(0)` is the window itself.
    Rolling {
        inner: Box<Expr>,
        window: usize,
        func: Box<Expr>,
    },
    Alias {
        inner: Box<Expr>,
        name: String,
    },
}

fn default_fill() -> Scalar {
    Scalar::Int64(0)
}

/// Reference the context entry at a position or under a key.
pub fn source(reference: impl Into<SourceRef>) -> Expr {
    Expr::Source {
        reference: reference.into(),
    }
}

pub fn lit(value: impl Into<Scalar>) -> Expr {
    Expr::Literal {
        value: value.into(),
    }
}

impl Expr {
    #[must_use]
    pub fn abs(self) -> Self {
        Self::Abs {
            inner: Box::new(self),
        }
    }

    /// Shift along the first axis. Positive amounts move data toward higher
    /// indices; vacated slots receive `fill`.
    pub fn shift(self, amount: i64, fill: impl Into<Scalar>) -> Self {
        self.shift_along(amount, fill, 0)
    }

    pub fn shift_along(self, amount: i64, fill: impl Into<Scalar>, axis: usize) -> Self {
        Self::Shift {
            inner: Box::new(self),
            amount,
            fill: fill.into(),
            axis,
        }
    }

    /// `shift(amount, 0)`.
    #[must_use]
    pub fn lag(self, amount: i64) -> Self {
        self.shift(amount, default_fill())
    }

    /// Like [`Expr::shift`], with the amount read from `amount`, which must
    /// evaluate to an integer scalar.
    pub fn shift_by(self, amount: Expr, fill: impl Into<Scalar>) -> Self {
        Self::ShiftBy {
            inner: Box::new(self),
            amount: Box::new(amount),
            fill: fill.into(),
            axis: 0,
        }
    }

    #[must_use]
    pub fn sum(self) -> Self {
        Self::Sum {
            inner: Box::new(self),
        }
    }

    /// Start a rolling computation over trailing windows of `window`
    /// elements; the first `window - 1` windows are partial.
    #[must_use]
    pub fn rolling(self, window: usize) -> RollingWindow {
        RollingWindow {
            inner: self,
            window,
        }
    }

    pub fn alias(self, name: impl Into<String>) -> Self {
        Self::Alias {
            inner: Box::new(self),
            name: name.into(),
        }
    }

    /// Name given by the outermost alias, if any.
    #[must_use]
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Self::Alias { name, .. } => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Source { .. } => "source",
            Self::Literal { .. } => "literal",
            Self::Abs { .. } => "abs",
            Self::Shift { .. } => "shift",
            Self::ShiftBy { .. } => "shift_by",
            Self::Sum { .. } => "sum",
            Self::Rolling { .. } => "rolling",
            Self::Alias { .. } => "alias",
        }
    }

    /// True when the tree computes something rather than only looking a value
    /// up. Aliases are transparent.
    #[must_use]
    pub fn is_operation(&self) -> bool {
        match self {
            Self::Abs { .. }
            | Self::Shift { .. }
            | Self::ShiftBy { .. }
            | Self::Sum { .. }
            | Self::Rolling { .. } => true,
            Self::Alias { inner, .. } => inner.is_operation(),
            Self::Source { .. } | Self::Literal { .. } => false,
        }
    }

    /// Evaluate with the default (strict) policy, discarding the ledger.
    pub fn eval(
        &self,
        context: &Context,
        backend: Option<BackendKind>,
    ) -> Result<ContextValue, ExprError> {
        let mut ledger = EvalLedger::new();
        evaluate(self, context, backend, &EvalPolicy::default(), &mut ledger)
    }
}

/// A pending rolling computation; [`RollingWindow::agg`] supplies the
/// per-window expression.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    inner: Expr,
    window: usize,
}

impl RollingWindow {
    #[must_use]
    pub fn agg(self, func: Expr) -> Expr {
        Expr::Rolling {
            inner: Box::new(self.inner),
            window: self.window,
            func: Box::new(func),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Reference,
    TypeMismatch,
    Axis,
    BackendMismatch,
    InvalidContext,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::TypeMismatch => "type_mismatch",
            Self::Axis => "axis",
            Self::BackendMismatch => "backend_mismatch",
            Self::InvalidContext => "invalid_context",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("source position {position} is out of range for a context of {len} entries")]
    PositionOutOfRange { position: i64, len: usize },
    #[error("unknown source key: {0:?}")]
    UnknownKey(String),
    #[error("key {0:?} used on a context without keys")]
    KeyOnUnkeyedContext(String),
    #[error("{op} is not supported for {kind:?} values")]
    Unsupported { op: &'static str, kind: ValueKind },
    #[error("shift fill {fill:?} cannot be stored as {dtype:?}: {source}")]
    FillCoercion {
        fill: Scalar,
        dtype: DType,
        #[source]
        source: TypeError,
    },
    #[error("axis {axis} is out of bounds for a value with {ndim} dimension(s)")]
    AxisOutOfBounds { axis: usize, ndim: usize },
    #[error("rolling window must span at least one element")]
    EmptyWindow,
    #[error("backend {backend} cannot execute over {kind:?} value: {detail}")]
    BackendMismatch {
        backend: BackendKind,
        kind: ValueKind,
        detail: String,
    },
    #[error("context has {values} values but {keys} keys")]
    KeyCountMismatch { values: usize, keys: usize },
    #[error("duplicate context key: {0:?}")]
    DuplicateKey(String),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Array(ArrayError),
}

impl From<ArrayError> for ExprError {
    fn from(err: ArrayError) -> Self {
        match err {
            ArrayError::AxisOutOfBounds { axis, ndim } => Self::AxisOutOfBounds { axis, ndim },
            ArrayError::Type(err) => Self::Type(err),
            other => Self::Array(other),
        }
    }
}

impl ExprError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PositionOutOfRange { .. }
            | Self::UnknownKey(_)
            | Self::KeyOnUnkeyedContext(_) => ErrorCategory::Reference,
            Self::Unsupported { .. }
            | Self::FillCoercion { .. }
            | Self::Type(_)
            | Self::Array(_)
            | Self::Column(ColumnError::Type(_)) => ErrorCategory::TypeMismatch,
            Self::AxisOutOfBounds { .. } | Self::EmptyWindow => ErrorCategory::Axis,
            Self::BackendMismatch { .. } => ErrorCategory::BackendMismatch,
            Self::KeyCountMismatch { .. }
            | Self::DuplicateKey(_)
            | Self::Column(ColumnError::LengthMismatch { .. } | ColumnError::DuplicateName(_)) => {
                ErrorCategory::InvalidContext
            }
        }
    }
}

/// Evaluate `expr` against `context`.
///
/// `backend` overrides the policy's default backend. Every operation node
/// records its backend selection in `ledger`; fill repairs and the final
/// materialization are recorded as well.
pub fn evaluate(
    expr: &Expr,
    context: &Context,
    backend: Option<BackendKind>,
    policy: &EvalPolicy,
    ledger: &mut EvalLedger,
) -> Result<ContextValue, ExprError> {
    let requested = policy.requested_backend(backend);
    let value = evaluate_node(expr, context, requested, policy, ledger)?;
    materialize(expr, value, requested, ledger)
}

fn evaluate_node(
    expr: &Expr,
    context: &Context,
    requested: Option<BackendKind>,
    policy: &EvalPolicy,
    ledger: &mut EvalLedger,
) -> Result<ContextValue, ExprError> {
    match expr {
        Expr::Source { reference } => context.resolve(reference),
        Expr::Literal { value } => Ok(ContextValue::Scalar(value.clone())),
        Expr::Abs { inner } => {
            let value = evaluate_node(inner, context, requested, policy, ledger)?;
            let backend = select(expr.label(), &value, requested, ledger)?;
            backend.abs(&value)
        }
        Expr::Shift {
            inner,
            amount,
            fill,
            axis,
        } => {
            let value = evaluate_node(inner, context, requested, policy, ledger)?;
            let backend = select(expr.label(), &value, requested, ledger)?;
            let args = ShiftArgs {
                amount: *amount,
                fill,
                axis: *axis,
            };
            shift_with_policy(expr.label(), backend, &value, &args, policy, ledger)
        }
        Expr::ShiftBy {
            inner,
            amount,
            fill,
            axis,
        } => {
            let value = evaluate_node(inner, context, requested, policy, ledger)?;
            let amount = shift_amount(amount, context, policy, ledger)?;
            let backend = select(expr.label(), &value, requested, ledger)?;
            let args = ShiftArgs {
                amount,
                fill,
                axis: *axis,
            };
            shift_with_policy(expr.label(), backend, &value, &args, policy, ledger)
        }
        Expr::Sum { inner } => {
            let value = evaluate_node(inner, context, requested, policy, ledger)?;
            let backend = select(expr.label(), &value, requested, ledger)?;
            Ok(ContextValue::Scalar(backend.sum(&value)?))
        }
        Expr::Rolling {
            inner,
            window,
            func,
        } => {
            if *window == 0 {
                return Err(ExprError::EmptyWindow);
            }
            let value = evaluate_node(inner, context, requested, policy, ledger)?;
            let backend = select(expr.label(), &value, requested, ledger)?;
            // Window evaluations are not ledgered individually.
            let mut scratch = EvalLedger::new();
            backend.rolling(&value, *window, &mut |values| {
                let frame = Context::single(values);
                evaluate_node(func, &frame, None, policy, &mut scratch)
            })
        }
        Expr::Alias { inner, name } => {
            let value = evaluate_node(inner, context, requested, policy, ledger)?;
            Ok(match value {
                ContextValue::Column(column) => {
                    ContextValue::column(Arc::unwrap_or_clone(column).with_name(name.as_str()))
                }
                other => other,
            })
        }
    }
}

struct ShiftArgs<'a> {
    amount: i64,
    fill: &'a Scalar,
    axis: usize,
}

/// Run a shift, letting the policy decide whether a fill the value cannot
/// hold is an error or a reason to promote the value.
fn shift_with_policy(
    node: &'static str,
    backend: &dyn Backend,
    value: &ContextValue,
    args: &ShiftArgs<'_>,
    policy: &EvalPolicy,
    ledger: &mut EvalLedger,
) -> Result<ContextValue, ExprError> {
    let ShiftArgs { amount, fill, axis } = *args;
    match backend.shift(value, amount, fill, axis) {
        Err(err @ ExprError::FillCoercion { .. }) => {
            let action = policy.decide_fill_coercion(
                node,
                value.kind(),
                backend.kind(),
                err.to_string(),
                ledger,
            );
            if action != DecisionAction::Repair {
                return Err(err);
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(
                backend = %backend.kind(),
                error = %err,
                "promoting value for shift fill"
            );
            let promoted = backend.promote_for_fill(value, fill)?;
            backend.shift(&promoted, amount, fill, axis)
        }
        result => result,
    }
}

fn shift_amount(
    amount: &Expr,
    context: &Context,
    policy: &EvalPolicy,
    ledger: &mut EvalLedger,
) -> Result<i64, ExprError> {
    match evaluate_node(amount, context, None, policy, ledger)? {
        ContextValue::Scalar(scalar) => match cast_scalar(&scalar, DType::Int64)? {
            Scalar::Int64(amount) => Ok(amount),
            _ => Err(TypeError::InvalidCast {
                from: scalar.dtype(),
                to: DType::Int64,
            }
            .into()),
        },
        other => Err(ExprError::Unsupported {
            op: "shift amount",
            kind: other.kind(),
        }),
    }
}

fn select(
    node: &'static str,
    value: &ContextValue,
    requested: Option<BackendKind>,
    ledger: &mut EvalLedger,
) -> Result<&'static dyn Backend, ExprError> {
    let selected = select_backend(value, requested);
    let (chosen, action, detail) = match &selected {
        Ok(backend) => (backend.kind(), DecisionAction::Allow, None),
        Err(err) => (
            requested.unwrap_or_else(|| value.kind().native_backend()),
            DecisionAction::Reject,
            Some(err.to_string()),
        ),
    };
    #[cfg(feature = "tracing")]
    tracing::debug!(
        node,
        value_kind = ?value.kind(),
        requested = ?requested,
        backend = %chosen,
        ?action,
        "backend selection"
    );
    ledger.push(DecisionRecord {
        issue: IssueKind::BackendSelection,
        node: node.to_owned(),
        value_kind: value.kind(),
        requested,
        chosen,
        action,
        detail,
    });
    selected
}

/// Convert an iterable operation result into the requested representation.
/// Plain lookups and non-iterable values come back untouched.
fn materialize(
    expr: &Expr,
    value: ContextValue,
    requested: Option<BackendKind>,
    ledger: &mut EvalLedger,
) -> Result<ContextValue, ExprError> {
    let Some(kind) = requested else {
        return Ok(value);
    };
    if !expr.is_operation() || !value.is_iterable() {
        return Ok(value);
    }
    let value_kind = value.kind();
    let out = backend_for(kind).materialize(value, expr.output_name())?;
    #[cfg(feature = "tracing")]
    tracing::debug!(from = ?value_kind, to = ?out.kind(), backend = %kind, "materialized result");
    ledger.push(DecisionRecord {
        issue: IssueKind::Materialization,
        node: expr.label().to_owned(),
        value_kind,
        requested,
        chosen: kind,
        action: DecisionAction::Allow,
        detail: None,
    });
    Ok(out)
}
