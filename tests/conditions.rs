//! Condition parsing and evaluation, including evaluator totality.

mod common;

use harmonyspace::condition::{CmpOp, Predicate, parse_predicate};
use harmonyspace::state::StateRecord;
use proptest::prelude::*;
use serde_json::{Value, json};

fn record_with(field: &str, value: Value) -> StateRecord {
    let mut record = StateRecord::default();
    record.set(field, value);
    record
}

#[test]
fn parsed_expression_evaluates_against_nested_state() {
    let predicate =
        parse_predicate("state.agent_selection.agent_id == 'tech_support'").unwrap();
    let record = record_with("agent_selection", json!({"agent_id": "tech_support"}));
    assert!(predicate.eval(&record).unwrap());

    let other = record_with("agent_selection", json!({"agent_id": "billing"}));
    assert!(!predicate.eval(&other).unwrap());
}

#[test]
fn combined_expression_respects_precedence_and_negation() {
    let predicate = parse_predicate(
        "state.tier == 'pro' && (state.count > 3 || !(state.resolved == true))",
    )
    .unwrap();

    let mut record = StateRecord::default();
    record.set("tier", json!("pro"));
    record.set("count", json!(1));
    record.set("resolved", json!(false));
    assert!(predicate.eval(&record).unwrap());

    record.set("resolved", json!(true));
    assert!(!predicate.eval(&record).unwrap());

    record.set("count", json!(10));
    assert!(predicate.eval(&record).unwrap());
}

#[test]
fn cross_type_comparison_reports_type_mismatch() {
    let predicate = parse_predicate("state.count == 'three'").unwrap();
    let record = record_with("count", json!(3));
    assert!(predicate.eval(&record).is_err());
}

/// Arbitrary JSON scalars plus shallow containers, to exercise every operand
/// type the evaluator can see.
fn arb_value() -> impl Strategy<Value = Value> {
    let scalar = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        (-1.0e6f64..1.0e6).prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    prop_oneof![
        scalar.clone(),
        proptest::collection::vec(scalar.clone(), 0..3).prop_map(Value::Array),
        proptest::collection::btree_map("[a-z]{1,4}", scalar, 0..3)
            .prop_map(|m| Value::Object(m.into_iter().collect())),
    ]
}

fn arb_op() -> impl Strategy<Value = CmpOp> {
    prop_oneof![
        Just(CmpOp::Eq),
        Just(CmpOp::Ne),
        Just(CmpOp::Lt),
        Just(CmpOp::Le),
        Just(CmpOp::Gt),
        Just(CmpOp::Ge),
    ]
}

proptest! {
    /// Evaluation is total: any operand pairing either yields a boolean or a
    /// type-mismatch error. It never panics.
    #[test]
    fn evaluation_never_panics(left in arb_value(), right in arb_value(), op in arb_op()) {
        let predicate = Predicate::Compare {
            path: "field".into(),
            op,
            value: right,
        };
        let record = record_with("field", left);
        let _ = predicate.eval(&record);
    }

    /// Same-type number comparisons always succeed and order consistently.
    #[test]
    fn number_comparisons_are_consistent(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
        let record = record_with("n", json!(a));
        let lt = Predicate::Compare { path: "n".into(), op: CmpOp::Lt, value: json!(b) };
        let ge = Predicate::Compare { path: "n".into(), op: CmpOp::Ge, value: json!(b) };
        prop_assert_eq!(lt.eval(&record).unwrap(), a < b);
        prop_assert_eq!(ge.eval(&record).unwrap(), a >= b);
    }

    /// Equality on same-type strings mirrors string equality.
    #[test]
    fn string_equality_mirrors_rust(a in "[a-z]{0,6}", b in "[a-z]{0,6}") {
        let record = record_with("s", json!(a.clone()));
        let eq = Predicate::Compare { path: "s".into(), op: CmpOp::Eq, value: json!(b.clone()) };
        prop_assert_eq!(eq.eval(&record).unwrap(), a == b);
    }
}
