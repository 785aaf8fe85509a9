use chrono::NaiveDate;
use lazyexpr::{
    BackendKind, Column, Context, ContextValue, ErrorCategory, EvalLedger, EvalPolicy, IssueKind,
    NdArray, NullKind, Scalar, Table, evaluate, source,
};
use ndarray::{arr1, arr2};

#[derive(Debug, PartialEq)]
struct OpaqueRecord {
    label: String,
}

fn ints(values: &[i64]) -> Vec<Scalar> {
    values.iter().copied().map(Scalar::Int64).collect()
}

#[test]
fn mixed_context_lookups() {
    let record = ContextValue::opaque(OpaqueRecord {
        label: "aab".to_owned(),
    });
    let ctx = Context::new(vec![
        ContextValue::from(vec![1_i64, -2, 3]),
        ContextValue::sequence(Vec::new()),
        ContextValue::from("hello"),
        record.clone(),
    ]);

    assert_eq!(
        source(0).eval(&ctx, None).expect("list"),
        ContextValue::from(vec![1_i64, -2, 3])
    );
    assert_eq!(
        source(2).eval(&ctx, None).expect("string"),
        ContextValue::from("hello")
    );

    let out = source(3).eval(&ctx, None).expect("record");
    assert!(out.shares_storage(&record));
    assert_eq!(
        out.as_opaque()
            .and_then(|value| value.downcast_ref::<OpaqueRecord>())
            .map(|record| record.label.as_str()),
        Some("aab")
    );
}

#[test]
fn abs_then_shift_back_fills_the_tail() {
    let ctx = Context::single(vec![1_i64, -2, 3]);
    let out = source(0).abs().shift(-1, 0).eval(&ctx, None).expect("eval");
    assert_eq!(out, ContextValue::from(vec![2_i64, 3, 0]));
}

#[test]
fn matrix_shift_along_second_axis() {
    let ctx = Context::single(ContextValue::from(
        arr2(&[[1_i64, -2, 3], [4, -5, 6], [7, -8, 9]]).into_dyn(),
    ));
    let out = source(0)
        .abs()
        .shift_along(1, 0, 1)
        .eval(&ctx, None)
        .expect("eval");
    assert_eq!(
        out.as_array(),
        Some(&NdArray::from(
            arr2(&[[0_i64, 1, 2], [0, 4, 5], [0, 7, 8]]).into_dyn()
        ))
    );
}

#[test]
fn table_column_through_sequence_backend() {
    let table = Table::from_pairs([("a", ints(&[1, 2, 3])), ("b", ints(&[4, -5, 6]))])
        .expect("table");
    let ctx = Context::from(table);
    let out = source("b")
        .shift(1, 0)
        .eval(&ctx, Some(BackendKind::GenericSequence))
        .expect("eval");
    assert_eq!(out, ContextValue::from(vec![0_i64, 4, -5]));
}

#[test]
fn backend_choice_does_not_change_values() {
    let ctx = Context::single(vec![3_i64, -1, 4, -1, 5]);
    let expr = source(0).abs().lag(2);
    let expected = ints(&[0, 0, 3, 1, 4]);
    for backend in [
        None,
        Some(BackendKind::GenericSequence),
        Some(BackendKind::VectorizedArray),
        Some(BackendKind::TabularColumn),
    ] {
        let out = expr.eval(&ctx, backend).expect("eval");
        let values = match &out {
            ContextValue::Sequence(values) => values.to_vec(),
            ContextValue::Array(array) => array.to_scalars(),
            ContextValue::Column(column) => column.values().to_vec(),
            other => panic!("unexpected result {other:?}"),
        };
        assert_eq!(values, expected, "backend {backend:?}");
    }
}

#[test]
fn rolling_sum_matches_across_backends() {
    let table = Table::from_pairs([("v", ints(&[5, -1, 2, 0]))]).expect("table");
    let ctx = Context::from(table);
    let expr = source("v").rolling(2).agg(source(0).sum()).alias("v_roll");
    let expected = ints(&[5, 4, 1, 2]);
    for backend in [
        None,
        Some(BackendKind::GenericSequence),
        Some(BackendKind::VectorizedArray),
        Some(BackendKind::TabularColumn),
    ] {
        let out = expr.eval(&ctx, backend).expect("rolling");
        let values = match &out {
            ContextValue::Sequence(values) => values.to_vec(),
            ContextValue::Array(array) => array.to_scalars(),
            ContextValue::Column(column) => {
                assert_eq!(column.name(), "v_roll");
                column.values().to_vec()
            }
            other => panic!("unexpected result {other:?}"),
        };
        assert_eq!(values, expected, "backend {backend:?}");
    }
}

#[test]
fn policy_default_backend_applies_without_explicit_choice() {
    let ctx = Context::single(vec![-1_i64, 2]);
    let policy = EvalPolicy::strict().with_default_backend(BackendKind::TabularColumn);
    let mut ledger = EvalLedger::new();
    let out = evaluate(&source(0).abs().alias("m"), &ctx, None, &policy, &mut ledger)
        .expect("eval");
    assert_eq!(out.as_column().map(Column::name), Some("m"));

    let mut ledger = EvalLedger::new();
    let out = evaluate(
        &source(0).abs(),
        &ctx,
        Some(BackendKind::VectorizedArray),
        &policy,
        &mut ledger,
    )
    .expect("eval");
    assert_eq!(
        out.as_array(),
        Some(&NdArray::from(arr1(&[1_i64, 2]).into_dyn()))
    );
    assert_eq!(ledger.selections(), vec![("abs", BackendKind::VectorizedArray)]);
}

#[test]
fn hardened_policy_repairs_lossy_fill() {
    let ctx = Context::single(ContextValue::from(arr1(&[1_i64, 2, 3]).into_dyn()));
    let expr = source(0).shift(1, 0.25);

    let err = expr.eval(&ctx, None).expect_err("strict rejects");
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);

    let mut ledger = EvalLedger::new();
    let out = evaluate(&expr, &ctx, None, &EvalPolicy::hardened(), &mut ledger).expect("repair");
    assert_eq!(
        out.as_array(),
        Some(&NdArray::from(arr1(&[0.25_f64, 1.0, 2.0]).into_dyn()))
    );
    assert!(
        ledger
            .records()
            .iter()
            .any(|record| record.issue == IssueKind::FillCoercion)
    );
}

#[test]
fn datetime_sequences_shift_with_nat() {
    let day = |d| {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .map(Scalar::Datetime)
            .expect("valid date")
    };
    let ctx = Context::single(ContextValue::sequence(vec![day(1), day(2), day(3)]));
    let out = source(0)
        .shift(1, Scalar::Null(NullKind::NaT))
        .eval(&ctx, Some(BackendKind::VectorizedArray))
        .expect("shift");
    assert_eq!(
        out.as_array().map(NdArray::to_scalars),
        Some(vec![Scalar::Null(NullKind::NaT), day(1), day(2)])
    );

    let err = source(0).abs().eval(&ctx, None).expect_err("abs");
    assert_eq!(err.category(), ErrorCategory::TypeMismatch);
}

#[test]
fn every_failure_mode_has_a_category() {
    let ctx = Context::single(vec![1_i64, 2]);
    let matrix = Context::single(ContextValue::from(arr2(&[[1_i64, 2], [3, 4]]).into_dyn()));
    let cases = [
        (source(9).eval(&ctx, None), ErrorCategory::Reference),
        (source("k").eval(&ctx, None), ErrorCategory::Reference),
        (
            source(0).shift_along(1, 0, 1).eval(&ctx, None),
            ErrorCategory::Axis,
        ),
        (
            source(0)
                .abs()
                .eval(&matrix, Some(BackendKind::GenericSequence)),
            ErrorCategory::BackendMismatch,
        ),
        (
            lazyexpr::lit("text").abs().eval(&ctx, None),
            ErrorCategory::TypeMismatch,
        ),
    ];
    for (outcome, category) in cases {
        let err = outcome.expect_err("failure");
        assert_eq!(err.category(), category, "{err}");
    }
}
