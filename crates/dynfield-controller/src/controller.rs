//! Per-field editor
//!
//! A [`DynamicFieldController`] is owned by whoever edits the field and is
//! addressed by `(key, field_name)`. The draft lives only in the controller:
//! nothing reaches the store until [`DynamicFieldController::save`], and
//! [`DynamicFieldController::cancel`] makes no calls at all.

use crate::error::{ControllerError, ControllerResult};
use crate::state::{validate_transition, ControllerState};
use dynfield_eval::EvaluationClient;
use dynfield_store::{EntityKind, Field, FieldError};
use dynfield_value::TypedValue;
use tracing::{debug, info};

/// Local edit of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    /// Static literal text
    Literal(String),
    /// Expression text
    Expression(String),
}

impl Draft {
    /// Initial draft for a committed value
    #[must_use]
    pub fn of(value: &TypedValue) -> Self {
        match value.original() {
            Some(expression) => Self::Expression(expression.to_string()),
            None => Self::Literal(value.to_literal()),
        }
    }

    /// Draft text
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Literal(text) | Self::Expression(text) => text,
        }
    }

    /// Whether the draft is an expression
    #[inline]
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Expression(_))
    }
}

/// Holds the controller in `Evaluating` or `Saving` for one interpreter or store call
///
/// Dropping it without [`InFlight::finish`] (the call's future was dropped)
/// puts the controller back in `Editing`, draft untouched.
struct InFlight<'a> {
    state: &'a mut ControllerState,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn enter(state: &'a mut ControllerState, to: ControllerState) -> ControllerResult<Self> {
        validate_transition(*state, to)?;
        *state = to;
        Ok(Self { state, finished: false })
    }

    fn finish(mut self, to: ControllerState) -> ControllerResult<()> {
        validate_transition(*self.state, to)?;
        *self.state = to;
        self.finished = true;
        Ok(())
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state = ControllerState::Editing;
        }
    }
}

/// Edit, evaluate, save and cancel lifecycle of one field
#[derive(Debug)]
pub struct DynamicFieldController<K: EntityKind> {
    client: EvaluationClient<K>,
    key: String,
    field_name: String,
    state: ControllerState,
    committed: Field,
    draft: Option<Draft>,
    preview: Option<TypedValue>,
    last_error: Option<FieldError>,
}

impl<K: EntityKind> DynamicFieldController<K> {
    /// Open a controller in `Viewing` on an existing field
    ///
    /// # Errors
    /// `NotFound` when the key or field is absent
    pub fn open(client: EvaluationClient<K>, key: &str, field_name: &str) -> ControllerResult<Self> {
        let committed = client.store().get(key, field_name)?;
        Ok(Self {
            client,
            key: key.to_string(),
            field_name: field_name.to_string(),
            state: ControllerState::Viewing,
            committed,
            draft: None,
            preview: None,
            last_error: None,
        })
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Entity key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Field name
    #[inline]
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Last committed field seen by this controller
    #[inline]
    #[must_use]
    pub fn committed(&self) -> &Field {
        &self.committed
    }

    /// Draft, while editing
    #[inline]
    #[must_use]
    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    /// Result of the last successful preview of the current draft
    #[inline]
    #[must_use]
    pub fn preview(&self) -> Option<&TypedValue> {
        self.preview.as_ref()
    }

    /// Error of the last failed evaluate or save
    #[inline]
    #[must_use]
    pub fn last_error(&self) -> Option<&FieldError> {
        self.last_error.as_ref()
    }

    /// Re-read the committed field from the store
    ///
    /// # Errors
    /// - `IllegalTransition` outside `Viewing`
    /// - `NotFound` when the field is gone
    pub fn reload(&mut self) -> ControllerResult<&Field> {
        if self.state != ControllerState::Viewing {
            return Err(ControllerError::IllegalTransition {
                from: self.state,
                to: ControllerState::Viewing,
            });
        }
        self.committed = self.client.store().get(&self.key, &self.field_name)?;
        Ok(&self.committed)
    }

    /// Enter `Editing` with a draft of the committed value
    ///
    /// # Errors
    /// - `IllegalTransition` outside `Viewing`
    /// - `NotFound` when the field is gone
    pub fn begin_edit(&mut self) -> ControllerResult<&Draft> {
        if self.state != ControllerState::Viewing {
            return Err(ControllerError::IllegalTransition {
                from: self.state,
                to: ControllerState::Editing,
            });
        }
        self.committed = self.client.store().get(&self.key, &self.field_name)?;
        self.transition(ControllerState::Editing)?;
        self.preview = None;
        self.last_error = None;
        Ok(self.draft.insert(Draft::of(&self.committed.value)))
    }

    /// Replace the draft text, keeping its mode
    ///
    /// Clears any preview, since it no longer matches the draft.
    ///
    /// # Errors
    /// `IllegalTransition` outside `Editing`
    pub fn edit_draft(&mut self, text: impl Into<String>) -> ControllerResult<()> {
        let draft = self.editing_draft()?;
        *draft = match draft {
            Draft::Literal(_) => Draft::Literal(text.into()),
            Draft::Expression(_) => Draft::Expression(text.into()),
        };
        self.preview = None;
        self.last_error = None;
        Ok(())
    }

    /// Switch the draft between literal and expression
    ///
    /// Switching to dynamic starts from an empty expression; switching to
    /// static starts from the committed value's literal form.
    ///
    /// # Errors
    /// `IllegalTransition` outside `Editing`
    pub fn set_mode(&mut self, dynamic: bool) -> ControllerResult<()> {
        let committed_literal = self.committed.value.to_literal();
        let draft = self.editing_draft()?;
        if draft.is_dynamic() == dynamic {
            return Ok(());
        }
        *draft = if dynamic {
            Draft::Expression(String::new())
        } else {
            Draft::Literal(committed_literal)
        };
        self.preview = None;
        self.last_error = None;
        Ok(())
    }

    /// Preview the draft expression without committing it
    ///
    /// On failure the preview is cleared and the error kept in
    /// [`DynamicFieldController::last_error`]; the controller stays in `Editing`.
    ///
    /// # Errors
    /// - `IllegalTransition` outside `Editing`
    /// - `NotDynamic` for a literal draft
    /// - `Field` with the evaluation failure
    pub async fn evaluate(&mut self) -> ControllerResult<&TypedValue> {
        let expression = match self.editing_draft()? {
            Draft::Expression(text) => text.clone(),
            Draft::Literal(_) => return Err(ControllerError::NotDynamic),
        };

        let in_flight = InFlight::enter(&mut self.state, ControllerState::Evaluating)?;
        let result = self.client.evaluate(&self.key, &self.field_name, &expression).await;
        in_flight.finish(ControllerState::Editing)?;

        match result {
            Ok(value) => {
                debug!(key = %self.key, field_name = %self.field_name, "preview ready");
                self.last_error = None;
                Ok(self.preview.insert(value))
            }
            Err(err) => {
                debug!(key = %self.key, field_name = %self.field_name, error = %err, "preview failed");
                self.preview = None;
                self.last_error = Some(err.clone());
                Err(err.into())
            }
        }
    }

    /// Commit the draft
    ///
    /// Literal drafts are written as static values (switching a dynamic field
    /// to static first). Expression drafts are evaluated and committed together
    /// with their value and history record. On failure the controller returns
    /// to `Editing` with the draft intact.
    ///
    /// # Errors
    /// - `IllegalTransition` outside `Editing`
    /// - `Field` with the store or evaluation failure
    pub async fn save(&mut self) -> ControllerResult<&Field> {
        let draft = self.editing_draft()?.clone();
        let in_flight = InFlight::enter(&mut self.state, ControllerState::Saving)?;

        let store = self.client.store();
        let result = match &draft {
            Draft::Literal(text) if self.committed.value.is_dynamic() => {
                store.switch_to_static(&self.key, &self.field_name, text).await
            }
            Draft::Literal(text) => store.set_static_value(&self.key, &self.field_name, text).await,
            Draft::Expression(text) => {
                self.client
                    .commit_expression(&self.key, &self.field_name, text)
                    .await
            }
        };

        in_flight.finish(if result.is_ok() {
            ControllerState::Viewing
        } else {
            ControllerState::Editing
        })?;

        match result {
            Ok(field) => {
                info!(key = %self.key, field_name = %self.field_name, "draft saved");
                self.draft = None;
                self.preview = None;
                self.last_error = None;
                self.committed = field;
                Ok(&self.committed)
            }
            Err(err) => {
                debug!(key = %self.key, field_name = %self.field_name, error = %err, "save failed");
                self.last_error = Some(err.clone());
                Err(err.into())
            }
        }
    }

    /// Discard the draft and return to `Viewing`
    ///
    /// # Errors
    /// `IllegalTransition` outside `Editing`
    pub fn cancel(&mut self) -> ControllerResult<()> {
        self.transition(ControllerState::Cancelled)?;
        self.draft = None;
        self.preview = None;
        self.last_error = None;
        self.transition(ControllerState::Viewing)
    }

    fn editing_draft(&mut self) -> ControllerResult<&mut Draft> {
        match (self.state, self.draft.as_mut()) {
            (ControllerState::Editing, Some(draft)) => Ok(draft),
            (from, _) => Err(ControllerError::IllegalTransition {
                from,
                to: ControllerState::Editing,
            }),
        }
    }

    fn transition(&mut self, to: ControllerState) -> ControllerResult<()> {
        validate_transition(self.state, to)?;
        debug!(key = %self.key, field_name = %self.field_name, from = %self.state, %to, "controller transition");
        self.state = to;
        Ok(())
    }
}
