#![forbid(unsafe_code)]

//! Build an expression once, evaluate it against any context.
//!
//! ```
//! use lazyexpr::{Context, ContextValue, source};
//!
//! let ctx = Context::single(vec![1_i64, -2, 3]);
//! let out = source(0).abs().shift(-1, 0).eval(&ctx, None)?;
//! assert_eq!(out, ContextValue::from(vec![2_i64, 3, 0]));
//! # Ok::<(), lazyexpr::ExprError>(())
//! ```

pub use lx_array::{ArrayError, NdArray};
pub use lx_columnar::{Column, ColumnError, Table};
pub use lx_expr::{
    Backend, Context, ContextValue, ErrorCategory, Expr, ExprError, OpaqueValue, RollingWindow,
    SourceRef, WindowFn, backend_for, evaluate, lit, select_backend, source,
};
pub use lx_runtime::{
    BackendKind, DecisionAction, DecisionRecord, EvalLedger, EvalPolicy, IssueKind, RuntimeError,
    RuntimeMode, ValueKind,
};
pub use lx_types::{DType, NullKind, Scalar, TypeError};
