//! Evaluation client
//!
//! Bridges a [`FieldStore`] and an [`Interpreter`]:
//! - [`EvaluationClient::evaluate`] previews an expression without touching the store
//! - [`EvaluationClient::refresh`] re-evaluates the stored expression and commits
//!   value plus history record together, guarded by the field's version token
//! - [`EvaluationClient::commit_expression`] evaluates a new expression and commits
//!   expression, value and record as one unit
//!
//! Every interpreter call runs under the configured timeout. Failures surface as
//! `FieldError::Evaluation` and leave the committed value untouched.

use crate::config::EvalConfig;
use crate::interpreter::{EvaluationRequest, Interpreter};
use dynfield_store::{ApplyOutcome, EntityKind, Field, FieldError, FieldResult, FieldStore, HistoryFilter};
use dynfield_value::{EvaluationRecord, TypedValue};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of refreshing one field during [`EvaluationClient::refresh_all`]
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    /// Entity key
    pub key: String,
    /// Field name
    pub field_name: String,
    /// What happened
    pub outcome: FieldResult<ApplyOutcome>,
}

impl RefreshReport {
    /// Whether the refresh committed a new value
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, Ok(ApplyOutcome::Applied(_)))
    }
}

/// Evaluates fields of one store
#[derive(Debug)]
pub struct EvaluationClient<K: EntityKind> {
    store: Arc<FieldStore<K>>,
    interpreter: Arc<dyn Interpreter>,
    config: EvalConfig,
}

impl<K: EntityKind> Clone for EvaluationClient<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            interpreter: Arc::clone(&self.interpreter),
            config: self.config.clone(),
        }
    }
}

impl<K: EntityKind> EvaluationClient<K> {
    /// Client with default settings
    #[must_use]
    pub fn new(store: Arc<FieldStore<K>>, interpreter: Arc<dyn Interpreter>) -> Self {
        Self {
            store,
            interpreter,
            config: EvalConfig::default(),
        }
    }

    /// With custom settings
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    /// Store this client evaluates against
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<FieldStore<K>> {
        &self.store
    }

    /// Active settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate `expression` for a field without committing anything
    ///
    /// The returned value carries `expression` as its original text and the
    /// type the interpreter reported.
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidTypedValue` when `expression` is blank
    /// - `Evaluation` on interpreter failure or timeout
    pub async fn evaluate(&self, key: &str, field_name: &str, expression: &str) -> FieldResult<TypedValue> {
        let template = self.store.get(key, field_name)?.value;
        self.run(key, field_name, expression, &template).await
    }

    /// Re-evaluate the stored expression and commit the result with a history record
    ///
    /// Returns `Discarded` when the field was edited, renamed or deleted while
    /// the interpreter was running.
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidOperation` when the field is static
    /// - `Evaluation` on interpreter failure or timeout (nothing committed)
    /// - `Persistence` when the backend rejects the commit (nothing committed)
    pub async fn refresh(&self, key: &str, field_name: &str) -> FieldResult<ApplyOutcome> {
        let ticket = self.store.begin_evaluation(key, field_name)?;
        let template = self.store.get(key, field_name)?.value;
        let evaluated = self.run(key, field_name, &ticket.expression, &template).await?;

        let record = EvaluationRecord::now(evaluated.clone());
        let outcome = self.store.apply_evaluation_result(&ticket, evaluated, record).await?;
        if let ApplyOutcome::Discarded(reason) = &outcome {
            warn!(key, field_name, ?reason, "refresh result discarded");
        }
        Ok(outcome)
    }

    /// Evaluate a new expression and commit it with its value and history record
    ///
    /// Nothing is written when evaluation fails.
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidTypedValue` when `expression` is blank
    /// - `Evaluation` on interpreter failure or timeout
    /// - `Persistence` when the backend rejects the commit (prior state restored)
    pub async fn commit_expression(&self, key: &str, field_name: &str, expression: &str) -> FieldResult<Field> {
        let evaluated = self.evaluate(key, field_name, expression).await?;
        let record = EvaluationRecord::now(evaluated.clone());
        self.store.commit_expression(key, field_name, evaluated, record).await
    }

    /// Refresh every dynamic field of the store concurrently
    pub async fn refresh_all(&self) -> Vec<RefreshReport> {
        let targets = self.store.dynamic_fields();
        info!(kind = %self.store.kind(), count = targets.len(), "refreshing all dynamic fields");

        join_all(targets.into_iter().map(|(key, field_name)| async move {
            let outcome = self.refresh(&key, &field_name).await;
            if let Err(err) = &outcome {
                warn!(key = %key, field_name = %field_name, error = %err, "refresh failed");
            }
            RefreshReport {
                key,
                field_name,
                outcome,
            }
        }))
        .await
    }

    /// Evaluation history of a field, ascending by timestamp
    ///
    /// # Errors
    /// `NotFound` when the key or field is absent
    pub fn get_history(&self, key: &str, field_name: &str) -> FieldResult<Vec<EvaluationRecord>> {
        self.store.history(key, field_name)
    }

    /// Remove matching history records; current values are untouched
    ///
    /// # Errors
    /// `Persistence` when the backend rejects the clear
    pub async fn clear_history(&self, filter: &HistoryFilter) -> FieldResult<usize> {
        self.store.clear_history(filter).await
    }

    async fn run(
        &self,
        key: &str,
        field_name: &str,
        expression: &str,
        template: &TypedValue,
    ) -> FieldResult<TypedValue> {
        if expression.trim().is_empty() {
            return Err(FieldError::InvalidTypedValue("expression must not be blank".into()));
        }

        let request = EvaluationRequest {
            component: self.store.kind(),
            key: key.to_string(),
            field_name: field_name.to_string(),
            expression: expression.to_string(),
            context: self.config.context.clone(),
        };

        debug!(key, field_name, expression, "evaluating");
        let response = tokio::time::timeout(self.config.timeout(), self.interpreter.evaluate(&request))
            .await
            .map_err(|_| {
                FieldError::Evaluation(format!("evaluation timed out after {}ms", self.config.timeout_ms))
            })??;

        template
            .evaluated(expression, response.kind, &response.value)
            .map_err(|e| FieldError::Evaluation(format!("interpreter returned an unusable value: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{EvaluationResponse, InterpreterError};
    use dynfield_store::{DiscardReason, Entity, MemoryBackend, VariableKind};
    use dynfield_value::{Value, ValueType};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    /// Counts the characters of the expression; `fail` and `slow` are special
    #[derive(Debug)]
    struct LengthInterpreter;

    #[async_trait::async_trait]
    impl Interpreter for LengthInterpreter {
        async fn evaluate(
            &self,
            request: &EvaluationRequest,
        ) -> Result<crate::EvaluationResponse, InterpreterError> {
            match request.expression.as_str() {
                "fail" => Err(InterpreterError::Rejected("unknown symbol fail".into())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(EvaluationResponse::new(ValueType::Integer, json!(0)))
                }
                "text" => Ok(EvaluationResponse::new(ValueType::String, json!("hello"))),
                expr => Ok(EvaluationResponse::new(ValueType::Integer, json!(expr.len()))),
            }
        }
    }

    async fn client() -> EvaluationClient<VariableKind> {
        let store = Arc::new(FieldStore::new(Arc::new(MemoryBackend::new())));
        let entity = Entity::new(TypedValue::new_dynamic(ValueType::Integer, "abc").unwrap())
            .with_field("label", TypedValue::from_literal(ValueType::String, "x").unwrap());
        store.create_entity("v", entity).await.unwrap();
        EvaluationClient::new(store, Arc::new(LengthInterpreter))
    }

    #[tokio::test]
    async fn evaluate_is_a_preview() {
        let client = client().await;
        let preview = client.evaluate("v", "value", "abcdef").await.unwrap();
        assert_eq!(preview.value(), &Value::Integer(6));
        assert_eq!(preview.original(), Some("abcdef"));

        let committed = client.store().get("v", "value").unwrap();
        assert_eq!(committed.value.value(), &Value::Integer(0));
        assert!(client.get_history("v", "value").unwrap().is_empty());
    }

    #[tokio::test]
    async fn evaluate_failure_keeps_message() {
        let client = client().await;
        let err = client.evaluate("v", "value", "fail").await.unwrap_err();
        assert_eq!(err, FieldError::Evaluation("unknown symbol fail".into()));
    }

    #[tokio::test]
    async fn evaluate_missing_field() {
        let client = client().await;
        assert!(matches!(
            client.evaluate("v", "nope", "abc").await,
            Err(FieldError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_as_evaluation_error() {
        let client = client().await.with_config(EvalConfig::new().with_timeout_ms(50));
        let err = client.evaluate("v", "value", "slow").await.unwrap_err();
        assert_eq!(err, FieldError::Evaluation("evaluation timed out after 50ms".into()));
    }

    #[tokio::test]
    async fn refresh_commits_value_and_history() {
        let client = client().await;
        let outcome = client.refresh("v", "value").await.unwrap();
        assert_eq!(outcome.applied().unwrap().value(), &Value::Integer(3));
        assert_eq!(client.get_history("v", "value").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refresh_static_field_is_invalid() {
        let client = client().await;
        assert!(matches!(
            client.refresh("v", "label").await,
            Err(FieldError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn reported_type_wins() {
        let client = client().await;
        let field = client.commit_expression("v", "value", "text").await.unwrap();
        assert_eq!(field.value.kind(), ValueType::String);
        assert_eq!(field.value.value(), &Value::String("hello".into()));
    }

    #[tokio::test]
    async fn refresh_all_reports_each_dynamic_field() {
        let client = client().await;
        client
            .store()
            .switch_to_dynamic("v", "label", "abcd")
            .await
            .unwrap();

        let reports = client.refresh_all().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(RefreshReport::is_applied));
    }

    #[tokio::test]
    async fn refresh_after_delete_is_not_found() {
        let client = client().await;
        let ticket = client.store().begin_evaluation("v", "value").unwrap();
        client.store().delete_entity("v").await.unwrap();

        let evaluated = TypedValue::new_dynamic(ValueType::Integer, "abc")
            .unwrap()
            .evaluated("abc", ValueType::Integer, &json!(3))
            .unwrap();
        let outcome = client
            .store()
            .apply_evaluation_result(&ticket, evaluated.clone(), EvaluationRecord::now(evaluated))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Discarded(DiscardReason::FieldRemoved));
        assert!(matches!(client.refresh("v", "value").await, Err(FieldError::NotFound { .. })));
    }
}
