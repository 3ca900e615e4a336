//! End-to-end behaviour of stores, evaluation and editors working together

use dynfield_controller::{ControllerState, Draft, DynamicFieldController};
use dynfield_eval::Interpreter;
use dynfield_store::{
    ApplyOutcome, DiscardReason, Entity, FieldBackend, FieldError, FieldStore, HistoryFilter, VariableKind,
};
use dynfield_test_utils::{
    config_harness, dynamic_entity, expression, init_tracing, integer_entity, literal, variable_harness,
    GatedInterpreter, Harness,
};
use dynfield_value::{Value, ValueType};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn gated_harness() -> (Arc<GatedInterpreter>, Harness<VariableKind>) {
    let gate = Arc::new(GatedInterpreter::arithmetic());
    let interpreter: Arc<dyn Interpreter> = gate.clone();
    (gate, Harness::with_interpreter(interpreter))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

#[tokio::test]
async fn scenario_a_static_config_update() {
    init_tracing();
    let h = config_harness();
    h.store.create_entity("retries", integer_entity("3")).await.unwrap();

    h.store.set_static_value("retries", "value", "5").await.unwrap();

    let field = h.store.get("retries", "value").unwrap();
    assert_eq!(field.value.value(), &Value::Integer(5));
    assert!(!field.value.is_dynamic());
}

#[tokio::test]
async fn scenario_b_dynamic_variable_refresh() {
    let h = variable_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();

    let placeholder = h.store.get("sum", "value").unwrap();
    assert!(placeholder.stale);
    assert_eq!(placeholder.value.value(), &Value::Integer(0));

    let outcome = h.client.refresh("sum", "value").await.unwrap();
    assert_eq!(outcome.applied().unwrap().value(), &Value::Integer(3));

    let field = h.store.get("sum", "value").unwrap();
    assert_eq!(field.value.value(), &Value::Integer(3));
    assert!(!field.stale);
    assert_eq!(h.client.get_history("sum", "value").unwrap().len(), 1);
}

#[tokio::test]
async fn scenario_c_rename_carries_history() {
    let h = variable_harness();
    h.store.create_entity("oldKey", dynamic_entity("(+ 1 2)")).await.unwrap();
    h.client.refresh("oldKey", "value").await.unwrap();
    h.client.refresh("oldKey", "value").await.unwrap();
    let history = h.client.get_history("oldKey", "value").unwrap();
    assert_eq!(history.len(), 2);

    h.renamer.rename("oldKey", "newKey").await.unwrap();

    assert_eq!(h.client.get_history("newKey", "value").unwrap(), history);
    assert!(matches!(
        h.client.get_history("oldKey", "value"),
        Err(FieldError::NotFound { .. })
    ));

    let backend: Arc<dyn FieldBackend> = h.backend.clone();
    let reloaded = FieldStore::<VariableKind>::open(backend).await.unwrap();
    assert_eq!(reloaded.history("newKey", "value").unwrap(), history);
}

#[tokio::test]
async fn scenario_d_malformed_expression() {
    let h = variable_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();
    h.client.refresh("sum", "value").await.unwrap();
    let before = h.store.get("sum", "value").unwrap();

    let err = h.client.evaluate("sum", "value", "(+ 1 2").await.unwrap_err();
    assert!(matches!(&err, FieldError::Evaluation(msg) if msg.starts_with("syntax error")));
    assert_eq!(h.store.get("sum", "value").unwrap(), before);

    let err = h.client.commit_expression("sum", "value", "(/ 1 0)").await.unwrap_err();
    assert_eq!(err, FieldError::Evaluation("division by zero".into()));
    assert_eq!(h.store.get("sum", "value").unwrap(), before);
}

#[tokio::test]
async fn expression_write_leaves_value_until_evaluated() {
    let h = variable_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();
    h.client.refresh("sum", "value").await.unwrap();

    let field = h.store.set_dynamic_expression("sum", "value", "(* 10 10)").await.unwrap();
    assert_eq!(field.value.value(), &Value::Integer(3));
    assert_eq!(field.value.original(), Some("(* 10 10)"));
    assert!(field.stale);

    h.client.refresh("sum", "value").await.unwrap();
    assert_eq!(h.store.get("sum", "value").unwrap().value.value(), &Value::Integer(100));
}

#[tokio::test]
async fn in_flight_refresh_is_discarded_after_edit() {
    let (gate, h) = gated_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();

    let client = h.client.clone();
    let pending = tokio::spawn(async move { client.refresh("sum", "value").await });
    gate.wait_for_calls(1).await;

    h.store.set_dynamic_expression("sum", "value", "(+ 5 5)").await.unwrap();
    gate.release(1);

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, ApplyOutcome::Discarded(DiscardReason::ExpressionChanged));
    let field = h.store.get("sum", "value").unwrap();
    assert_eq!(field.value.value(), &Value::Integer(0));
    assert!(field.stale);
    assert!(h.client.get_history("sum", "value").unwrap().is_empty());
}

#[tokio::test]
async fn in_flight_refresh_is_discarded_after_rename() {
    let (gate, h) = gated_harness();
    h.store.create_entity("oldKey", dynamic_entity("(+ 1 2)")).await.unwrap();

    let client = h.client.clone();
    let pending = tokio::spawn(async move { client.refresh("oldKey", "value").await });
    gate.wait_for_calls(1).await;

    h.renamer.rename("oldKey", "newKey").await.unwrap();
    gate.release(1);

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, ApplyOutcome::Discarded(DiscardReason::FieldRemoved));
    assert!(!h.store.contains("oldKey"));
    assert_eq!(h.store.get("newKey", "value").unwrap().value.value(), &Value::Integer(0));
}

#[tokio::test]
async fn in_flight_refresh_is_discarded_after_delete_and_recreate() {
    let (gate, h) = gated_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();

    let client = h.client.clone();
    let pending = tokio::spawn(async move { client.refresh("sum", "value").await });
    gate.wait_for_calls(1).await;

    h.store.delete_entity("sum").await.unwrap();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();
    gate.release(1);

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, ApplyOutcome::Discarded(DiscardReason::Superseded));
    assert!(h.client.get_history("sum", "value").unwrap().is_empty());
}

#[tokio::test]
async fn rename_preserves_every_field() {
    let h = variable_harness();
    let entity = integer_entity("7")
        .with_field("double", expression(ValueType::Integer, "(* 7 2)"))
        .with_field("label", literal(ValueType::String, "seven"));
    h.store.create_entity("k", entity).await.unwrap();
    h.client.refresh("k", "double").await.unwrap();
    let before = h.store.fields("k").unwrap();

    h.renamer.rename("k", "k2").await.unwrap();

    let after = h.store.fields("k2").unwrap();
    assert_eq!(after.len(), before.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(new.key, "k2");
        assert_eq!(new.field_name, old.field_name);
        assert_eq!(new.value, old.value);
        assert_eq!(new.stale, old.stale);
        assert!(matches!(h.store.get("k", &old.field_name), Err(FieldError::NotFound { .. })));
    }
}

#[tokio::test]
async fn rename_conflict_leaves_both_keys() {
    let h = config_harness();
    h.store.create_entity("a", integer_entity("1")).await.unwrap();
    h.store.create_entity("b", integer_entity("2")).await.unwrap();

    let err = h.renamer.rename("a", "b").await.unwrap_err();
    assert_eq!(err, FieldError::key_conflict("b"));
    assert_eq!(h.store.get("a", "value").unwrap().value.value(), &Value::Integer(1));
    assert_eq!(h.store.get("b", "value").unwrap().value.value(), &Value::Integer(2));
}

#[tokio::test]
async fn persistence_failures_roll_back() {
    let h = variable_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();
    h.store.create_entity("n", integer_entity("4")).await.unwrap();
    h.client.refresh("sum", "value").await.unwrap();
    let sum_before = h.store.get("sum", "value").unwrap();
    let listing = h.store.list();

    h.backend.set_failing(true);

    assert!(matches!(
        h.store.set_static_value("n", "value", "5").await,
        Err(FieldError::Persistence(_))
    ));
    assert!(matches!(h.client.refresh("sum", "value").await, Err(FieldError::Persistence(_))));
    assert!(matches!(
        h.client.commit_expression("sum", "value", "(+ 2 2)").await,
        Err(FieldError::Persistence(_))
    ));
    assert!(matches!(h.renamer.rename("n", "m").await, Err(FieldError::Persistence(_))));
    assert!(matches!(h.store.delete_entity("n").await, Err(FieldError::Persistence(_))));
    assert!(matches!(
        h.store.create_entity("fresh", integer_entity("1")).await,
        Err(FieldError::Persistence(_))
    ));

    assert_eq!(h.store.list(), listing);
    assert_eq!(h.store.get("sum", "value").unwrap(), sum_before);
    assert_eq!(h.client.get_history("sum", "value").unwrap().len(), 1);

    h.backend.set_failing(false);
    h.store.set_static_value("n", "value", "5").await.unwrap();
    assert_eq!(h.store.get("n", "value").unwrap().value.value(), &Value::Integer(5));
}

#[tokio::test]
async fn commit_rolls_back_when_history_write_fails() {
    let h = config_harness();
    h.store.create_entity("n", integer_entity("4")).await.unwrap();
    let before = h.store.get("n", "value").unwrap();

    h.backend.fail_after(1);
    let err = h.client.commit_expression("n", "value", "(* 3 3)").await.unwrap_err();
    assert!(matches!(err, FieldError::Persistence(_)));
    assert_eq!(h.store.get("n", "value").unwrap(), before);
    assert!(h.client.get_history("n", "value").unwrap().is_empty());
}

#[tokio::test]
async fn clear_history_keeps_values() {
    let h = variable_harness();
    let entity: Entity = dynamic_entity("(+ 1 2)").with_field("aux", expression(ValueType::Integer, "(+ 2 2)"));
    h.store.create_entity("v", entity).await.unwrap();
    h.client.refresh_all().await;
    h.client.refresh_all().await;

    let removed = h
        .client
        .clear_history(&HistoryFilter::all().key("v").field("value"))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(h.client.get_history("v", "value").unwrap().is_empty());
    assert_eq!(h.client.get_history("v", "aux").unwrap().len(), 2);
    assert_eq!(h.store.get("v", "value").unwrap().value.value(), &Value::Integer(3));
}

#[tokio::test]
async fn cancel_leaves_field_untouched() {
    let h = variable_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();
    h.client.refresh("sum", "value").await.unwrap();
    let before = h.store.get("sum", "value").unwrap();
    let writes = h.backend.writes();

    let mut editor = DynamicFieldController::open(h.client.clone(), "sum", "value").unwrap();
    editor.begin_edit().unwrap();
    editor.edit_draft("(* 9 9)").unwrap();
    editor.evaluate().await.unwrap();
    editor.cancel().unwrap();

    assert_eq!(editor.state(), ControllerState::Viewing);
    assert_eq!(h.store.get("sum", "value").unwrap(), before);
    assert_eq!(h.backend.writes(), writes);
}

#[tokio::test]
async fn editor_failed_evaluation_keeps_committed_value() {
    let h = variable_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();
    h.client.refresh("sum", "value").await.unwrap();

    let mut editor = DynamicFieldController::open(h.client.clone(), "sum", "value").unwrap();
    editor.begin_edit().unwrap();
    editor.edit_draft("(+ 1").unwrap();
    assert!(editor.evaluate().await.is_err());

    assert_eq!(editor.state(), ControllerState::Editing);
    assert!(editor.preview().is_none());
    assert!(matches!(editor.last_error(), Some(FieldError::Evaluation(_))));
    assert_eq!(h.store.get("sum", "value").unwrap().value.value(), &Value::Integer(3));
}

#[tokio::test]
async fn editor_save_commits_expression_and_value_together() {
    let h = variable_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();

    let mut editor = DynamicFieldController::open(h.client.clone(), "sum", "value").unwrap();
    editor.begin_edit().unwrap();
    editor.edit_draft("(max 4 8)").unwrap();
    editor.save().await.unwrap();

    let field = h.store.get("sum", "value").unwrap();
    assert_eq!(field.value.original(), Some("(max 4 8)"));
    assert_eq!(field.value.value(), &Value::Integer(8));
    assert!(!field.stale);
    assert_eq!(editor.committed(), &field);
}

#[tokio::test]
async fn editor_save_failure_keeps_draft() {
    let h = variable_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();

    let mut editor = DynamicFieldController::open(h.client.clone(), "sum", "value").unwrap();
    editor.begin_edit().unwrap();
    editor.edit_draft("(+ 4 4)").unwrap();

    h.backend.set_failing(true);
    assert!(editor.save().await.is_err());
    assert_eq!(editor.state(), ControllerState::Editing);
    assert_eq!(editor.draft().map(|d| d.text()), Some("(+ 4 4)"));

    h.backend.set_failing(false);
    editor.save().await.unwrap();
    assert_eq!(h.store.get("sum", "value").unwrap().value.value(), &Value::Integer(8));
}

#[tokio::test]
async fn timed_out_preview_returns_editor_to_editing() {
    let (gate, h) = gated_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();

    let mut editor = DynamicFieldController::open(h.client.clone(), "sum", "value").unwrap();
    editor.begin_edit().unwrap();
    editor.edit_draft("(+ 2 2)").unwrap();

    assert!(tokio::time::timeout(Duration::from_millis(20), editor.evaluate()).await.is_err());
    assert_eq!(gate.calls(), 1);
    assert_eq!(editor.state(), ControllerState::Editing);
    assert_eq!(editor.draft(), Some(&Draft::Expression("(+ 2 2)".into())));

    // re-entering edit mode would reset the draft
    assert!(editor.begin_edit().is_err());
    assert_eq!(editor.draft().map(Draft::text), Some("(+ 2 2)"));

    editor.edit_draft("(+ 3 3)").unwrap();
    editor.cancel().unwrap();
    assert_eq!(editor.state(), ControllerState::Viewing);
}

#[tokio::test]
async fn timed_out_save_keeps_draft_and_field() {
    let (gate, h) = gated_harness();
    h.store.create_entity("sum", dynamic_entity("(+ 1 2)")).await.unwrap();
    let before = h.store.get("sum", "value").unwrap();

    let mut editor = DynamicFieldController::open(h.client.clone(), "sum", "value").unwrap();
    editor.begin_edit().unwrap();
    editor.edit_draft("(* 6 7)").unwrap();

    assert!(tokio::time::timeout(Duration::from_millis(20), editor.save()).await.is_err());
    assert_eq!(editor.state(), ControllerState::Editing);
    assert_eq!(editor.draft().map(Draft::text), Some("(* 6 7)"));
    assert_eq!(h.store.get("sum", "value").unwrap(), before);

    gate.release(1);
    editor.save().await.unwrap();
    assert_eq!(editor.state(), ControllerState::Viewing);
    assert_eq!(h.store.get("sum", "value").unwrap().value.value(), &Value::Integer(42));
}

#[tokio::test]
async fn auxiliary_fields_are_independent() {
    let h = variable_harness();
    h.store.create_entity("v", integer_entity("1")).await.unwrap();
    h.store
        .add_field("v", "twice", expression(ValueType::Integer, "(* 2 21)"))
        .await
        .unwrap();

    let err = h
        .store
        .add_field("v", "twice", literal(ValueType::Integer, "0"))
        .await
        .unwrap_err();
    assert_eq!(err, FieldError::field_conflict("v", "twice"));

    h.client.refresh("v", "twice").await.unwrap();
    assert_eq!(h.store.get("v", "twice").unwrap().value.value(), &Value::Integer(42));
    assert_eq!(h.store.get("v", "value").unwrap().value.value(), &Value::Integer(1));

    h.store.delete_field("v", "twice").await.unwrap();
    assert!(matches!(h.store.get("v", "twice"), Err(FieldError::NotFound { .. })));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_static_literal_round_trip(n in any::<i64>(), start in any::<i64>()) {
        let rt = runtime();
        rt.block_on(async {
            let h = config_harness();
            h.store.create_entity("k", integer_entity(&start.to_string())).await.unwrap();
            let value = literal(ValueType::Integer, &n.to_string());
            h.store.set_static_value("k", "value", &value.to_literal()).await.unwrap();
            assert_eq!(h.store.get("k", "value").unwrap().value, value);
        });
    }

    #[test]
    fn prop_expression_writes_never_change_value(exprs in prop::collection::vec("\\(\\+ [0-9]{1,3} [0-9]{1,3}\\)", 1..6)) {
        let rt = runtime();
        rt.block_on(async {
            let h = variable_harness();
            h.store.create_entity("k", dynamic_entity("(+ 1 1)")).await.unwrap();
            h.client.refresh("k", "value").await.unwrap();
            let committed = h.store.get("k", "value").unwrap().value.value().clone();

            for expr in &exprs {
                let field = h.store.set_dynamic_expression("k", "value", expr).await.unwrap();
                assert_eq!(field.value.value(), &committed);
                assert_eq!(field.value.original(), Some(expr.as_str()));
            }
        });
    }

    #[test]
    fn prop_history_only_shrinks_on_matching_clear(ops in prop::collection::vec(0u8..4, 1..24)) {
        let rt = runtime();
        rt.block_on(async {
            let h = variable_harness();
            let entity = dynamic_entity("(+ 1 2)").with_field("aux", expression(ValueType::Integer, "(+ 3 4)"));
            h.store.create_entity("k", entity).await.unwrap();

            let mut last = 0;
            for op in ops {
                let clears_value = match op {
                    0 => { h.client.refresh("k", "value").await.unwrap(); false }
                    1 => { h.client.refresh("k", "aux").await.unwrap(); false }
                    2 => { h.client.clear_history(&HistoryFilter::all().field("aux")).await.unwrap(); false }
                    _ => { h.client.clear_history(&HistoryFilter::all().key("k")).await.unwrap(); true }
                };
                let len = h.client.get_history("k", "value").unwrap().len();
                if clears_value {
                    assert_eq!(len, 0);
                } else {
                    assert!(len >= last);
                }
                last = len;
            }
        });
    }
}
