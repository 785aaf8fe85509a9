#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use lx_array::NdArray;
use lx_columnar::{Column, ColumnError, Table};
use lx_expr::{Context, ContextValue, ErrorCategory, Expr, ExprError, SourceRef, evaluate};
use lx_runtime::{BackendKind, EvalLedger, EvalPolicy, RuntimeMode};
use lx_types::{NullKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        }
    }

    #[must_use]
    pub fn with_fixture_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fixture_root = root.into();
        self
    }

    #[must_use]
    pub fn case_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("cases")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub cases_present: bool,
    pub fixture_count: usize,
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = list_fixture_files(&config.case_fixture_root())
        .map(|files| files.len())
        .unwrap_or(0);

    HarnessReport {
        suite: "smoke",
        cases_present: config.case_fixture_root().exists(),
        fixture_count,
    }
}

/// A fixture scalar. Plain JSON literals cover the common cases; datetimes
/// and typed missing markers use the tagged [`Scalar`] form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Missing,
    Tagged(Scalar),
}

impl FixtureScalar {
    #[must_use]
    pub fn to_scalar(&self) -> Scalar {
        match self {
            Self::Bool(value) => Scalar::Bool(*value),
            Self::Int(value) => Scalar::Int64(*value),
            Self::Float(value) => Scalar::Float64(*value),
            Self::Text(value) => Scalar::Utf8(value.clone()),
            Self::Missing => Scalar::Null(NullKind::Null),
            Self::Tagged(value) => value.clone(),
        }
    }
}

fn scalars(values: &[FixtureScalar]) -> Vec<Scalar> {
    values.iter().map(FixtureScalar::to_scalar).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixtureValue {
    Scalar {
        value: FixtureScalar,
    },
    Sequence {
        values: Vec<FixtureScalar>,
    },
    Array {
        shape: Vec<usize>,
        values: Vec<FixtureScalar>,
    },
    Column {
        name: String,
        values: Vec<FixtureScalar>,
    },
    /// An opaque caller record carrying a label.
    Opaque {
        label: String,
    },
}

impl FixtureValue {
    pub fn to_context_value(&self) -> Result<ContextValue, HarnessError> {
        Ok(match self {
            Self::Scalar { value } => ContextValue::Scalar(value.to_scalar()),
            Self::Sequence { values } => ContextValue::sequence(scalars(values)),
            Self::Array { shape, values } => ContextValue::array(
                NdArray::from_shape_scalars(shape, scalars(values))
                    .map_err(|err| HarnessError::FixtureFormat(err.to_string()))?,
            ),
            Self::Column { name, values } => {
                ContextValue::column(Column::from_values(name.as_str(), scalars(values))?)
            }
            Self::Opaque { label } => ContextValue::opaque(label.clone()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureColumn {
    pub name: String,
    pub values: Vec<FixtureScalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FixtureContext {
    Ordered {
        values: Vec<FixtureValue>,
    },
    Keyed {
        keys: Vec<String>,
        values: Vec<FixtureValue>,
    },
    Table {
        columns: Vec<FixtureColumn>,
    },
}

impl FixtureContext {
    pub fn build(&self) -> Result<Context, HarnessError> {
        match self {
            Self::Ordered { values } => Ok(Context::new(context_values(values)?)),
            Self::Keyed { keys, values } => {
                Ok(Context::keyed(context_values(values)?, keys.iter().cloned())?)
            }
            Self::Table { columns } => {
                let table = Table::from_pairs(
                    columns
                        .iter()
                        .map(|column| (column.name.as_str(), scalars(&column.values))),
                )?;
                Ok(Context::from(table))
            }
        }
    }
}

fn context_values(values: &[FixtureValue]) -> Result<Vec<ContextValue>, HarnessError> {
    values.iter().map(FixtureValue::to_context_value).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureExpected {
    Value(FixtureValue),
    /// The result must share storage with this context entry.
    SameAs(SourceRef),
    Error(ErrorCategory),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalFixture {
    pub suite_id: String,
    pub case_id: String,
    #[serde(default)]
    pub mode: RuntimeMode,
    #[serde(default)]
    pub backend: Option<BackendKind>,
    pub context: FixtureContext,
    pub expr: Expr,
    pub expected: FixtureExpected,
    #[serde(default)]
    pub expected_repairs: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub suite_id: String,
    pub case_id: String,
    pub mode: RuntimeMode,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub ledger_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub suite_id: Option<String>,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&CaseResult> {
        self.results
            .iter()
            .filter(|result| result.status == CaseStatus::Fail)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
}

pub fn run_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(config, None)?;
    Ok(build_report("eval_cases".to_owned(), None, &fixtures))
}

pub fn run_suite_by_id(
    config: &HarnessConfig,
    suite_id: &str,
) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(config, Some(suite_id))?;
    Ok(build_report(
        format!("eval_cases:{suite_id}"),
        Some(suite_id.to_owned()),
        &fixtures,
    ))
}

pub fn parse_fixture(body: &str) -> Result<EvalFixture, HarnessError> {
    Ok(serde_json::from_str(body)?)
}

/// Evaluate one fixture and compare against its expectation. Fixture
/// construction problems are reported as mismatches, never as harness
/// errors, so one broken case cannot hide the rest of the suite.
#[must_use]
pub fn run_fixture(fixture: &EvalFixture) -> CaseResult {
    let policy = match fixture.mode {
        RuntimeMode::Strict => EvalPolicy::strict(),
        RuntimeMode::Hardened => EvalPolicy::hardened(),
    };
    let mut ledger = EvalLedger::new();
    let mismatch = check_fixture(fixture, &policy, &mut ledger).err();

    CaseResult {
        suite_id: fixture.suite_id.clone(),
        case_id: fixture.case_id.clone(),
        mode: fixture.mode,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        ledger_records: ledger.len(),
    }
}

fn build_report(suite: String, suite_id: Option<String>, fixtures: &[EvalFixture]) -> SuiteReport {
    let results: Vec<_> = fixtures.iter().map(run_fixture).collect();
    let failed = results
        .iter()
        .filter(|result| matches!(result.status, CaseStatus::Fail))
        .count();
    let passed = results.len().saturating_sub(failed);

    SuiteReport {
        suite,
        suite_id,
        fixture_count: results.len(),
        passed,
        failed,
        results,
    }
}

fn load_fixtures(
    config: &HarnessConfig,
    suite_filter: Option<&str>,
) -> Result<Vec<EvalFixture>, HarnessError> {
    let fixture_files = list_fixture_files(&config.case_fixture_root())?;
    let mut fixtures = Vec::with_capacity(fixture_files.len());

    for fixture_path in fixture_files {
        let fixture = load_fixture(&fixture_path)?;
        if suite_filter.is_none_or(|suite| fixture.suite_id == suite) {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<EvalFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    parse_fixture(&body)
        .map_err(|err| HarnessError::FixtureFormat(format!("{}: {err}", path.display())))
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn check_fixture(
    fixture: &EvalFixture,
    policy: &EvalPolicy,
    ledger: &mut EvalLedger,
) -> Result<(), String> {
    let context = match (fixture.context.build(), &fixture.expected) {
        (Ok(context), _) => context,
        (Err(HarnessError::Expr(err)), FixtureExpected::Error(category))
            if err.category() == *category =>
        {
            return Ok(());
        }
        (Err(err), _) => return Err(format!("context construction failed: {err}")),
    };
    let outcome = evaluate(&fixture.expr, &context, fixture.backend, policy, ledger);

    match (&fixture.expected, outcome) {
        (FixtureExpected::Error(category), Err(err)) => {
            if err.category() != *category {
                return Err(format!(
                    "error category mismatch: expected={}, actual={} ({err})",
                    category.as_str(),
                    err.category().as_str()
                ));
            }
        }
        (FixtureExpected::Error(category), Ok(value)) => {
            return Err(format!(
                "expected {} error, got value {value:?}",
                category.as_str()
            ));
        }
        (_, Err(err)) => return Err(format!("evaluation failed: {err}")),
        (FixtureExpected::SameAs(reference), Ok(actual)) => {
            let stored = context
                .resolve(reference)
                .map_err(|err| format!("identity reference {reference} invalid: {err}"))?;
            if !actual.shares_storage(&stored) {
                return Err(format!(
                    "result does not share storage with entry {reference}: {actual:?}"
                ));
            }
        }
        (FixtureExpected::Value(expected), Ok(actual)) => compare_value(expected, &actual)?,
    }

    if let Some(repairs) = fixture.expected_repairs
        && ledger.repairs() != repairs
    {
        return Err(format!(
            "repair count mismatch: expected={repairs}, actual={}",
            ledger.repairs()
        ));
    }
    Ok(())
}

fn compare_value(expected: &FixtureValue, actual: &ContextValue) -> Result<(), String> {
    match (expected, actual) {
        (FixtureValue::Scalar { value }, ContextValue::Scalar(actual)) => {
            compare_scalars(&[value.to_scalar()], std::slice::from_ref(actual))
        }
        (FixtureValue::Sequence { values }, ContextValue::Sequence(actual)) => {
            compare_scalars(&scalars(values), actual)
        }
        (FixtureValue::Array { shape, values }, ContextValue::Array(actual)) => {
            if actual.shape() != shape.as_slice() {
                return Err(format!(
                    "shape mismatch: expected={shape:?}, actual={:?}",
                    actual.shape()
                ));
            }
            compare_scalars(&scalars(values), &actual.to_scalars())
        }
        (FixtureValue::Column { name, values }, ContextValue::Column(actual)) => {
            if actual.name() != name {
                return Err(format!(
                    "column name mismatch: expected={name}, actual={}",
                    actual.name()
                ));
            }
            compare_scalars(&scalars(values), actual.values())
        }
        (FixtureValue::Opaque { label }, ContextValue::Opaque(actual)) => {
            match actual.downcast_ref::<String>() {
                Some(actual) if actual == label => Ok(()),
                other => Err(format!("opaque mismatch: expected={label}, actual={other:?}")),
            }
        }
        (expected, actual) => Err(format!(
            "representation mismatch: expected={expected:?}, actual kind={:?}",
            actual.kind()
        )),
    }
}

fn compare_scalars(expected: &[Scalar], actual: &[Scalar]) -> Result<(), String> {
    if expected.len() != actual.len() {
        return Err(format!(
            "length mismatch: expected={}, actual={}",
            expected.len(),
            actual.len()
        ));
    }
    for (position, (left, right)) in expected.iter().zip(actual).enumerate() {
        if !left.semantic_eq(right) {
            return Err(format!(
                "value mismatch at {position}: expected={left:?}, actual={right:?}"
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use lx_runtime::RuntimeMode;
    use lx_types::{NullKind, Scalar};

    use super::{
        CaseStatus, FixtureExpected, FixtureScalar, FixtureValue, HarnessConfig, parse_fixture,
        run_fixture, run_suite, run_suite_by_id,
    };

    const PASSING: &str = r#"{
        "suite_id": "LX-TMP",
        "case_id": "tmp_abs",
        "context": {"kind": "ordered", "values": [{"kind": "sequence", "values": [1, -2]}]},
        "expr": {"kind": "abs", "inner": {"kind": "source", "reference": 0}},
        "expected": {"value": {"kind": "sequence", "values": [1, 2]}}
    }"#;

    const FAILING: &str = r#"{
        "suite_id": "LX-TMP",
        "case_id": "tmp_wrong",
        "context": {"kind": "ordered", "values": [{"kind": "sequence", "values": [1, -2]}]},
        "expr": {"kind": "abs", "inner": {"kind": "source", "reference": 0}},
        "expected": {"value": {"kind": "sequence", "values": [1, -2]}}
    }"#;

    #[test]
    fn fixture_scalars_accept_plain_and_tagged_forms() {
        let values: Vec<FixtureScalar> =
            serde_json::from_str(r#"[true, 3, 1.5, "x", null, {"kind": "null", "value": "nat"}]"#)
                .expect("scalars");
        let scalars: Vec<Scalar> = values.iter().map(FixtureScalar::to_scalar).collect();
        assert_eq!(
            scalars,
            vec![
                Scalar::Bool(true),
                Scalar::Int64(3),
                Scalar::Float64(1.5),
                Scalar::Utf8("x".to_owned()),
                Scalar::Null(NullKind::Null),
                Scalar::Null(NullKind::NaT),
            ]
        );
    }

    #[test]
    fn fixture_defaults_to_strict_without_backend() {
        let fixture = parse_fixture(PASSING).expect("fixture");
        assert_eq!(fixture.mode, RuntimeMode::Strict);
        assert_eq!(fixture.backend, None);
        assert!(matches!(
            fixture.expected,
            FixtureExpected::Value(FixtureValue::Sequence { .. })
        ));
        let result = run_fixture(&fixture);
        assert_eq!(result.status, CaseStatus::Pass, "{:?}", result.mismatch);
        assert_eq!(result.ledger_records, 1);
    }

    #[test]
    fn mismatches_are_reported_not_raised() {
        let fixture = parse_fixture(FAILING).expect("fixture");
        let result = run_fixture(&fixture);
        assert_eq!(result.status, CaseStatus::Fail);
        let mismatch = result.mismatch.expect("mismatch text");
        assert!(mismatch.contains("value mismatch at 1"), "{mismatch}");
    }

    #[test]
    fn suite_runs_against_ad_hoc_fixture_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cases = dir.path().join("cases");
        fs::create_dir_all(cases.join("nested")).expect("mkdir");
        fs::write(cases.join("a.json"), PASSING).expect("write");
        fs::write(cases.join("nested/b.json"), FAILING).expect("write");
        fs::write(cases.join("notes.txt"), "ignored").expect("write");

        let config = HarnessConfig::default_paths().with_fixture_root(dir.path());
        let report = run_suite(&config).expect("suite");
        assert_eq!(report.fixture_count, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.is_green());
        assert_eq!(report.failures()[0].case_id, "tmp_wrong");

        let filtered = run_suite_by_id(&config, "LX-NONE").expect("filtered");
        assert_eq!(filtered.fixture_count, 0);
        assert!(!filtered.is_green());
    }

    #[test]
    fn malformed_fixture_is_a_harness_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cases = dir.path().join("cases");
        fs::create_dir_all(&cases).expect("mkdir");
        fs::write(cases.join("bad.json"), r#"{"suite_id": 1}"#).expect("write");

        let config = HarnessConfig::default_paths().with_fixture_root(dir.path());
        let err = run_suite(&config).expect_err("bad fixture");
        assert!(err.to_string().contains("bad.json"), "{err}");
    }

    #[test]
    fn shipped_fixtures_are_green() {
        let report = run_suite(&HarnessConfig::default_paths()).expect("suite");
        let failures: Vec<_> = report
            .failures()
            .into_iter()
            .map(|result| (result.case_id.clone(), result.mismatch.clone()))
            .collect();
        assert!(report.is_green(), "failures: {failures:?}");
    }

    mod properties {
        use proptest::prelude::*;

        use crate::parse_fixture;

        proptest! {
            #[test]
            fn parse_never_panics(body in ".{0,256}") {
                let _ = parse_fixture(&body);
            }
        }
    }
}
