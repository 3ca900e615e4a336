//! Field store
//!
//! In-memory view of one entity kind, kept consistent with the backend.
//!
//! # Mutation protocol
//!
//! Every write follows stage → persist → commit-or-roll-back:
//! 1. under the write lock, compute the new field state and give it a fresh version
//! 2. release the lock and hand the change to the [`FieldBackend`]
//! 3. on `Persistence` failure, restore the prior state unless a newer
//!    version landed meanwhile
//!
//! The lock is never held across an `.await`.
//!
//! # Version tokens
//!
//! Versions come from one store-wide counter, so a token is never reused,
//! not even by a key that is deleted and created again. Evaluation results
//! carry the token they were issued under and are discarded when it no
//! longer matches.

use crate::backend::{FieldBackend, HistoryFilter};
use crate::entity::{Entity, Field};
use crate::error::{FieldError, FieldResult};
use crate::kind::{ComponentKind, EntityKind, PRIMARY_FIELD};
use dynfield_value::{EvaluationRecord, TypedValue};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handle on one pending evaluation of a dynamic field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationTicket {
    /// Entity key at issue time
    pub key: String,
    /// Field name
    pub field_name: String,
    /// Expression being evaluated
    pub expression: String,
    /// Field version at issue time
    pub version: u64,
}

/// Why an evaluation result was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Field or entity was deleted or renamed
    FieldRemoved,
    /// Field was written after the ticket was issued
    Superseded,
    /// Field's expression no longer matches the evaluated one
    ExpressionChanged,
}

/// Result of applying an evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Value and history updated
    Applied(Field),
    /// Result was stale and dropped without touching the field
    Discarded(DiscardReason),
}

impl ApplyOutcome {
    /// Committed value, when applied
    #[must_use]
    pub fn applied(&self) -> Option<&TypedValue> {
        match self {
            Self::Applied(field) => Some(&field.value),
            Self::Discarded(_) => None,
        }
    }

    /// Whether the result was dropped
    #[inline]
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        matches!(self, Self::Discarded(_))
    }
}

#[derive(Debug, Clone)]
struct FieldSlot {
    value: TypedValue,
    version: u64,
    stale: bool,
    history: Vec<EvaluationRecord>,
}

impl FieldSlot {
    fn replaced(&self, value: TypedValue, stale: bool) -> Self {
        Self {
            value,
            version: self.version,
            stale,
            history: self.history.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct EntityState {
    primary: FieldSlot,
    auxiliary: BTreeMap<String, FieldSlot>,
}

impl EntityState {
    /// One slot per field of `entity`
    fn build(entity: &Entity, mut slot: impl FnMut(&str, &TypedValue) -> FieldSlot) -> Self {
        Self {
            primary: slot(PRIMARY_FIELD, &entity.value),
            auxiliary: entity
                .dynamic_fields
                .iter()
                .map(|(name, value)| (name.clone(), slot(name, value)))
                .collect(),
        }
    }

    fn slot(&self, field_name: &str) -> Option<&FieldSlot> {
        if field_name == PRIMARY_FIELD {
            Some(&self.primary)
        } else {
            self.auxiliary.get(field_name)
        }
    }

    fn slot_mut(&mut self, field_name: &str) -> Option<&mut FieldSlot> {
        if field_name == PRIMARY_FIELD {
            Some(&mut self.primary)
        } else {
            self.auxiliary.get_mut(field_name)
        }
    }

    /// Primary first, then auxiliary fields by name
    fn slots(&self) -> impl Iterator<Item = (&str, &FieldSlot)> + '_ {
        std::iter::once((PRIMARY_FIELD, &self.primary))
            .chain(self.auxiliary.iter().map(|(name, slot)| (name.as_str(), slot)))
    }

    fn slots_mut(&mut self) -> impl Iterator<Item = (&str, &mut FieldSlot)> + '_ {
        std::iter::once((PRIMARY_FIELD, &mut self.primary))
            .chain(self.auxiliary.iter_mut().map(|(name, slot)| (name.as_str(), slot)))
    }

    fn snapshot(&self) -> Entity {
        Entity {
            value: self.primary.value.clone(),
            dynamic_fields: self
                .auxiliary
                .iter()
                .map(|(name, slot)| (name.clone(), slot.value.clone()))
                .collect(),
        }
    }
}

/// State staged by a mutation, kept for rollback
struct Staged {
    prior: FieldSlot,
    version: u64,
    field: Field,
}

/// Store of one entity kind (config entries or variables)
#[derive(Debug)]
pub struct FieldStore<K: EntityKind> {
    backend: Arc<dyn FieldBackend>,
    entities: RwLock<BTreeMap<String, EntityState>>,
    next_version: AtomicU64,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EntityKind> FieldStore<K> {
    /// Create an empty store over `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn FieldBackend>) -> Self {
        Self {
            backend,
            entities: RwLock::new(BTreeMap::new()),
            next_version: AtomicU64::new(0),
            _kind: PhantomData,
        }
    }

    /// Create a store and populate it from `backend`
    ///
    /// # Errors
    /// Whatever [`FieldStore::load`] returns
    pub async fn open(backend: Arc<dyn FieldBackend>) -> FieldResult<Self> {
        let store = Self::new(backend);
        store.load().await?;
        Ok(store)
    }

    /// Component type of this store
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        K::COMPONENT
    }

    /// Backend this store persists through
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn FieldBackend> {
        &self.backend
    }

    /// Replace the in-memory view with the backend's entities and history
    ///
    /// Returns the number of entities loaded.
    ///
    /// # Errors
    /// - `Persistence` when the backend cannot be read
    /// - `InvalidOperation` when a config entry carries auxiliary fields
    pub async fn load(&self) -> FieldResult<usize> {
        let entities = self.backend.load_entities(K::COMPONENT).await?;
        let mut loaded = BTreeMap::new();

        for (key, entity) in entities {
            Self::check_policy(&key, &entity)?;
            let mut histories = BTreeMap::new();
            for (name, _) in entity.fields() {
                let history = self.backend.fetch_history(K::COMPONENT, &key, name).await?;
                histories.insert(name.to_string(), history);
            }
            let state = EntityState::build(&entity, |name, value| FieldSlot {
                value: value.clone(),
                version: self.issue_version(),
                stale: false,
                history: histories.remove(name).unwrap_or_default(),
            });
            loaded.insert(key, state);
        }

        let count = loaded.len();
        *self.entities.write() = loaded;
        info!(kind = %K::COMPONENT, count, "loaded entities");
        Ok(count)
    }

    /// Snapshot of every committed entity
    #[must_use]
    pub fn list(&self) -> BTreeMap<String, Entity> {
        self.entities
            .read()
            .iter()
            .map(|(key, state)| (key.clone(), state.snapshot()))
            .collect()
    }

    /// Whether `key` exists
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entities.read().contains_key(key)
    }

    /// Number of entities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Whether the store holds no entities
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Snapshot of one entity
    ///
    /// # Errors
    /// `NotFound` when `key` is absent
    pub fn entity(&self, key: &str) -> FieldResult<Entity> {
        self.entities
            .read()
            .get(key)
            .map(EntityState::snapshot)
            .ok_or_else(|| FieldError::key_not_found(key))
    }

    /// One committed field
    ///
    /// # Errors
    /// `NotFound` when the key or field is absent
    pub fn get(&self, key: &str, field_name: &str) -> FieldResult<Field> {
        let map = self.entities.read();
        let slot = Self::slot(&map, key, field_name)?;
        Ok(view(key, field_name, slot))
    }

    /// Every field of one entity, primary first
    ///
    /// # Errors
    /// `NotFound` when `key` is absent
    pub fn fields(&self, key: &str) -> FieldResult<Vec<Field>> {
        let map = self.entities.read();
        let state = map.get(key).ok_or_else(|| FieldError::key_not_found(key))?;
        Ok(state.slots().map(|(name, slot)| view(key, name, slot)).collect())
    }

    /// `(key, field)` of every dynamic field
    #[must_use]
    pub fn dynamic_fields(&self) -> Vec<(String, String)> {
        self.entities
            .read()
            .iter()
            .flat_map(|(key, state)| {
                state
                    .slots()
                    .filter(|(_, slot)| slot.value.is_dynamic())
                    .map(move |(name, _)| (key.clone(), name.to_string()))
            })
            .collect()
    }

    /// Evaluation history of one field, ascending by timestamp
    ///
    /// # Errors
    /// `NotFound` when the key or field is absent
    pub fn history(&self, key: &str, field_name: &str) -> FieldResult<Vec<EvaluationRecord>> {
        let map = self.entities.read();
        Ok(Self::slot(&map, key, field_name)?.history.clone())
    }

    /// Create an entity
    ///
    /// # Errors
    /// - `Conflict` when `key` exists
    /// - `InvalidOperation` for blank keys or auxiliary fields on config entries
    /// - `Persistence` when the backend rejects the create (nothing is kept)
    pub async fn create_entity(&self, key: &str, entity: Entity) -> FieldResult<()> {
        if key.trim().is_empty() {
            return Err(FieldError::InvalidOperation("entity key must not be blank".into()));
        }
        Self::check_policy(key, &entity)?;

        let versions = {
            let mut map = self.entities.write();
            if map.contains_key(key) {
                return Err(FieldError::key_conflict(key));
            }
            let state = EntityState::build(&entity, |_, value| FieldSlot {
                value: value.clone(),
                version: self.issue_version(),
                stale: value.is_dynamic(),
                history: Vec::new(),
            });
            let versions: Vec<u64> = state.slots().map(|(_, s)| s.version).collect();
            map.insert(key.to_string(), state);
            versions
        };

        if let Err(err) = self.backend.persist_create(K::COMPONENT, key, &entity).await {
            let mut map = self.entities.write();
            let untouched = map.get(key).is_some_and(|state| {
                state.slots().map(|(_, s)| s.version).eq(versions.iter().copied())
            });
            if untouched {
                map.remove(key);
            }
            warn!(kind = %K::COMPONENT, key, error = %err, "create rolled back");
            return Err(err);
        }

        info!(kind = %K::COMPONENT, key, "created entity");
        Ok(())
    }

    /// Write a literal into a static field
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidOperation` when the field is dynamic
    /// - `TypeMismatch` when `literal` cannot be coerced to the field's type
    /// - `Persistence` when the backend rejects the write (prior value restored)
    pub async fn set_static_value(&self, key: &str, field_name: &str, literal: &str) -> FieldResult<Field> {
        let staged = self.stage(key, field_name, |slot| {
            if slot.value.is_dynamic() {
                return Err(FieldError::InvalidOperation(format!(
                    "'{key}.{field_name}' is dynamic; switch it to static first"
                )));
            }
            Ok(slot.replaced(slot.value.with_literal(literal)?, false))
        })?;

        let persisted = self
            .backend
            .persist_static_update(K::COMPONENT, key, field_name, &staged.field.value)
            .await;
        self.settle(key, field_name, staged, persisted, "static value written")
    }

    /// Set a field's expression without evaluating it
    ///
    /// The value stays as it was; the field is marked stale until the next
    /// applied evaluation. Static fields become dynamic.
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidTypedValue` when `expression` is blank
    /// - `Persistence` when the backend rejects the write (prior state restored)
    pub async fn set_dynamic_expression(
        &self,
        key: &str,
        field_name: &str,
        expression: &str,
    ) -> FieldResult<Field> {
        let staged = self.stage(key, field_name, |slot| {
            let unchanged = slot.value.original() == Some(expression);
            let value = slot.value.with_expression(expression)?;
            Ok(slot.replaced(value, slot.stale || !unchanged))
        })?;

        let persisted = self
            .backend
            .persist_dynamic_update(K::COMPONENT, key, field_name, expression)
            .await;
        self.settle(key, field_name, staged, persisted, "expression written")
    }

    /// Switch a field to dynamic mode, discarding its literal
    ///
    /// History is kept.
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidOperation` when the field is already dynamic
    /// - `InvalidTypedValue` when `expression` is blank
    /// - `Persistence` when the backend rejects the write (prior state restored)
    pub async fn switch_to_dynamic(&self, key: &str, field_name: &str, expression: &str) -> FieldResult<Field> {
        let staged = self.stage(key, field_name, |slot| {
            if slot.value.is_dynamic() {
                return Err(FieldError::InvalidOperation(format!(
                    "'{key}.{field_name}' is already dynamic"
                )));
            }
            Ok(slot.replaced(slot.value.into_dynamic(expression)?, true))
        })?;

        let persisted = self
            .backend
            .persist_mode_switch(K::COMPONENT, key, field_name, &staged.field.value)
            .await;
        self.settle(key, field_name, staged, persisted, "switched to dynamic")
    }

    /// Switch a field to static mode with `literal`, discarding its expression
    ///
    /// History is kept for audit.
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidOperation` when the field is already static
    /// - `TypeMismatch` when `literal` cannot be coerced
    /// - `Persistence` when the backend rejects the write (prior state restored)
    pub async fn switch_to_static(&self, key: &str, field_name: &str, literal: &str) -> FieldResult<Field> {
        let staged = self.stage(key, field_name, |slot| {
            if !slot.value.is_dynamic() {
                return Err(FieldError::InvalidOperation(format!(
                    "'{key}.{field_name}' is already static"
                )));
            }
            Ok(slot.replaced(slot.value.into_static(literal)?, false))
        })?;

        let persisted = self
            .backend
            .persist_mode_switch(K::COMPONENT, key, field_name, &staged.field.value)
            .await;
        self.settle(key, field_name, staged, persisted, "switched to static")
    }

    /// Add an auxiliary field to a variable
    ///
    /// # Errors
    /// - `InvalidOperation` on config stores or for blank names
    /// - `NotFound` when `key` is absent
    /// - `Conflict` when the field exists
    /// - `Persistence` when the backend rejects the write (field removed again)
    pub async fn add_field(&self, key: &str, field_name: &str, value: TypedValue) -> FieldResult<Field> {
        if !K::ALLOWS_AUXILIARY {
            return Err(FieldError::InvalidOperation(format!(
                "{} entries have no auxiliary fields",
                K::COMPONENT
            )));
        }
        if field_name.trim().is_empty() {
            return Err(FieldError::InvalidOperation("field name must not be blank".into()));
        }

        let (version, field) = {
            let mut map = self.entities.write();
            let state = map.get_mut(key).ok_or_else(|| FieldError::key_not_found(key))?;
            if state.slot(field_name).is_some() {
                return Err(FieldError::field_conflict(key, field_name));
            }
            let slot = FieldSlot {
                stale: value.is_dynamic(),
                value: value.clone(),
                version: self.issue_version(),
                history: Vec::new(),
            };
            let field = view(key, field_name, &slot);
            let version = slot.version;
            state.auxiliary.insert(field_name.to_string(), slot);
            (version, field)
        };

        if let Err(err) = self
            .backend
            .persist_field_create(K::COMPONENT, key, field_name, &value)
            .await
        {
            let mut map = self.entities.write();
            if let Some(state) = map.get_mut(key) {
                if state.auxiliary.get(field_name).is_some_and(|s| s.version == version) {
                    state.auxiliary.remove(field_name);
                }
            }
            warn!(kind = %K::COMPONENT, key, field_name, error = %err, "field create rolled back");
            return Err(err);
        }

        info!(kind = %K::COMPONENT, key, field_name, "added field");
        Ok(field)
    }

    /// Remove an auxiliary field and its history
    ///
    /// # Errors
    /// - `InvalidOperation` for the primary field
    /// - `NotFound` when the key or field is absent
    /// - `Persistence` when the backend rejects the delete (field restored)
    pub async fn delete_field(&self, key: &str, field_name: &str) -> FieldResult<()> {
        if field_name == PRIMARY_FIELD {
            return Err(FieldError::InvalidOperation(
                "the primary field is removed only with its entity".into(),
            ));
        }

        let prior = {
            let mut map = self.entities.write();
            let state = map.get_mut(key).ok_or_else(|| FieldError::key_not_found(key))?;
            state
                .auxiliary
                .remove(field_name)
                .ok_or_else(|| FieldError::field_not_found(key, field_name))?
        };

        if let Err(err) = self.backend.persist_field_delete(K::COMPONENT, key, field_name).await {
            let mut map = self.entities.write();
            if let Some(state) = map.get_mut(key) {
                state.auxiliary.entry(field_name.to_string()).or_insert(prior);
            }
            warn!(kind = %K::COMPONENT, key, field_name, error = %err, "field delete rolled back");
            return Err(err);
        }

        info!(kind = %K::COMPONENT, key, field_name, "deleted field");
        Ok(())
    }

    /// Remove an entity with all its fields and history
    ///
    /// # Errors
    /// - `NotFound` when `key` is absent
    /// - `Persistence` when the backend rejects the delete (entity restored)
    pub async fn delete_entity(&self, key: &str) -> FieldResult<()> {
        let prior = self
            .entities
            .write()
            .remove(key)
            .ok_or_else(|| FieldError::key_not_found(key))?;

        if let Err(err) = self.backend.persist_delete(K::COMPONENT, key).await {
            self.entities.write().entry(key.to_string()).or_insert(prior);
            warn!(kind = %K::COMPONENT, key, error = %err, "delete rolled back");
            return Err(err);
        }

        info!(kind = %K::COMPONENT, key, "deleted entity");
        Ok(())
    }

    /// Issue a ticket for evaluating a dynamic field's stored expression
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidOperation` when the field is static
    pub fn begin_evaluation(&self, key: &str, field_name: &str) -> FieldResult<EvaluationTicket> {
        let map = self.entities.read();
        let slot = Self::slot(&map, key, field_name)?;
        let expression = slot.value.original().ok_or_else(|| {
            FieldError::InvalidOperation(format!("'{key}.{field_name}' is static and has nothing to evaluate"))
        })?;
        debug!(key, field_name, version = slot.version, "evaluation ticket issued");
        Ok(EvaluationTicket {
            key: key.to_string(),
            field_name: field_name.to_string(),
            expression: expression.to_string(),
            version: slot.version,
        })
    }

    /// Apply an evaluation result issued under `ticket`
    ///
    /// Updates the value and appends `record` in one step. A result whose
    /// field vanished, was written again, or changed expression since the
    /// ticket was issued is dropped silently.
    ///
    /// # Errors
    /// - `InvalidTypedValue` when `evaluated` was not computed from the ticket's expression
    /// - `Persistence` when the backend rejects the write (value and history restored)
    pub async fn apply_evaluation_result(
        &self,
        ticket: &EvaluationTicket,
        evaluated: TypedValue,
        record: EvaluationRecord,
    ) -> FieldResult<ApplyOutcome> {
        if evaluated.original() != Some(ticket.expression.as_str()) {
            return Err(FieldError::InvalidTypedValue(format!(
                "evaluated value does not come from {:?}",
                ticket.expression
            )));
        }
        let key = ticket.key.as_str();
        let field_name = ticket.field_name.as_str();

        let (prior, record, field) = {
            let mut map = self.entities.write();
            let Some(slot) = map.get_mut(key).and_then(|s| s.slot_mut(field_name)) else {
                debug!(key, field_name, "evaluation discarded: field removed");
                return Ok(ApplyOutcome::Discarded(DiscardReason::FieldRemoved));
            };
            if slot.value.original() != Some(ticket.expression.as_str()) {
                debug!(key, field_name, "evaluation discarded: expression changed");
                return Ok(ApplyOutcome::Discarded(DiscardReason::ExpressionChanged));
            }
            if slot.version != ticket.version {
                debug!(key, field_name, ticket = ticket.version, current = slot.version, "evaluation discarded: superseded");
                return Ok(ApplyOutcome::Discarded(DiscardReason::Superseded));
            }

            let prior = slot.clone();
            let record = ordered_record(&slot.history, record);
            slot.value = evaluated;
            slot.stale = false;
            slot.history.push(record.clone());
            (prior, record, view(key, field_name, slot))
        };

        if let Err(err) = self
            .backend
            .persist_evaluation(K::COMPONENT, key, field_name, &record)
            .await
        {
            let mut map = self.entities.write();
            if let Some(slot) = map.get_mut(key).and_then(|s| s.slot_mut(field_name)) {
                if slot.version == prior.version && slot.history.len() == prior.history.len() + 1 {
                    *slot = prior;
                }
            }
            warn!(kind = %K::COMPONENT, key, field_name, error = %err, "evaluation rolled back");
            return Err(err);
        }

        info!(kind = %K::COMPONENT, key, field_name, "evaluation applied");
        Ok(ApplyOutcome::Applied(field))
    }

    /// Commit a new expression together with its evaluated value
    ///
    /// Expression, value and history record land as one unit: if either
    /// backend write fails, all three are rolled back. Static fields become
    /// dynamic. Pending evaluations of the field are superseded.
    ///
    /// # Errors
    /// - `NotFound` when the key or field is absent
    /// - `InvalidTypedValue` when `evaluated` is not dynamic
    /// - `Persistence` when the backend rejects a write
    pub async fn commit_expression(
        &self,
        key: &str,
        field_name: &str,
        evaluated: TypedValue,
        record: EvaluationRecord,
    ) -> FieldResult<Field> {
        let expression = evaluated
            .original()
            .map(str::to_string)
            .ok_or_else(|| FieldError::InvalidTypedValue("committed value has no expression".into()))?;

        let (staged, record) = self.stage_with(key, field_name, |slot| {
            let record = ordered_record(&slot.history, record);
            let mut next = slot.replaced(evaluated, false);
            next.history.push(record.clone());
            Ok((next, record))
        })?;

        let mut persisted = self
            .backend
            .persist_dynamic_update(K::COMPONENT, key, field_name, &expression)
            .await;
        if persisted.is_ok() {
            persisted = self
                .backend
                .persist_evaluation(K::COMPONENT, key, field_name, &record)
                .await;
            if persisted.is_err() {
                if let Err(err) = self
                    .backend
                    .persist_mode_switch(K::COMPONENT, key, field_name, &staged.prior.value)
                    .await
                {
                    warn!(key, field_name, error = %err, "could not restore stored expression");
                }
            }
        }
        self.settle(key, field_name, staged, persisted, "expression committed")
    }

    /// Clear matching history of this store's kind in the backend and in memory
    ///
    /// The filter is scoped to this kind; a filter naming another kind clears
    /// nothing. Current values are untouched. Returns the backend's removal count.
    ///
    /// # Errors
    /// `Persistence` when the backend rejects the clear (memory untouched)
    pub async fn clear_history(&self, filter: &HistoryFilter) -> FieldResult<usize> {
        if filter.component.is_some_and(|kind| kind != K::COMPONENT) {
            debug!(kind = %K::COMPONENT, "history filter names another kind");
            return Ok(0);
        }
        let filter = filter.clone().component(K::COMPONENT);
        let removed = self.backend.clear_history(&filter).await?;

        let mut map = self.entities.write();
        for (key, state) in map.iter_mut() {
            for (name, slot) in state.slots_mut() {
                if filter.matches_field(K::COMPONENT, key, name) {
                    slot.history.retain(|r| !filter.matches_record(r));
                }
            }
        }

        info!(kind = %K::COMPONENT, removed, "history cleared");
        Ok(removed)
    }

    /// Move an entity to `new_key` in memory only
    ///
    /// # Errors
    /// `NotFound` / `Conflict` per the rename rules
    pub(crate) fn move_entity(&self, old_key: &str, new_key: &str) -> FieldResult<()> {
        let mut map = self.entities.write();
        if map.contains_key(new_key) {
            return Err(FieldError::key_conflict(new_key));
        }
        let state = map.remove(old_key).ok_or_else(|| FieldError::key_not_found(old_key))?;
        map.insert(new_key.to_string(), state);
        Ok(())
    }

    /// Undo [`FieldStore::move_entity`] if nothing reclaimed `old_key` meanwhile
    pub(crate) fn unmove_entity(&self, old_key: &str, new_key: &str) -> bool {
        let mut map = self.entities.write();
        if map.contains_key(old_key) {
            return false;
        }
        match map.remove(new_key) {
            Some(state) => {
                map.insert(old_key.to_string(), state);
                true
            }
            None => false,
        }
    }

    fn issue_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn check_policy(key: &str, entity: &Entity) -> FieldResult<()> {
        if !K::ALLOWS_AUXILIARY && !entity.dynamic_fields.is_empty() {
            return Err(FieldError::InvalidOperation(format!(
                "{} entry '{key}' cannot carry auxiliary fields",
                K::COMPONENT
            )));
        }
        if entity.dynamic_fields.contains_key(PRIMARY_FIELD) {
            return Err(FieldError::field_conflict(key, PRIMARY_FIELD));
        }
        Ok(())
    }

    fn slot<'a>(
        map: &'a BTreeMap<String, EntityState>,
        key: &str,
        field_name: &str,
    ) -> FieldResult<&'a FieldSlot> {
        map.get(key)
            .ok_or_else(|| FieldError::key_not_found(key))?
            .slot(field_name)
            .ok_or_else(|| FieldError::field_not_found(key, field_name))
    }

    /// Apply `change` to one field under the write lock with a fresh version
    fn stage(
        &self,
        key: &str,
        field_name: &str,
        change: impl FnOnce(&FieldSlot) -> FieldResult<FieldSlot>,
    ) -> FieldResult<Staged> {
        self.stage_with(key, field_name, |slot| Ok((change(slot)?, ())))
            .map(|(staged, ())| staged)
    }

    /// [`FieldStore::stage`] for changes that also produce a value
    fn stage_with<T>(
        &self,
        key: &str,
        field_name: &str,
        change: impl FnOnce(&FieldSlot) -> FieldResult<(FieldSlot, T)>,
    ) -> FieldResult<(Staged, T)> {
        let mut map = self.entities.write();
        let slot = map
            .get_mut(key)
            .ok_or_else(|| FieldError::key_not_found(key))?
            .slot_mut(field_name)
            .ok_or_else(|| FieldError::field_not_found(key, field_name))?;

        let (mut next, produced) = change(&*slot)?;
        next.version = self.issue_version();
        let prior = std::mem::replace(slot, next);
        let staged = Staged {
            prior,
            version: slot.version,
            field: view(key, field_name, slot),
        };
        Ok((staged, produced))
    }

    /// Finish a staged mutation: keep it, or restore the prior state on failure
    fn settle(
        &self,
        key: &str,
        field_name: &str,
        staged: Staged,
        persisted: FieldResult<()>,
        what: &'static str,
    ) -> FieldResult<Field> {
        match persisted {
            Ok(()) => {
                info!(kind = %K::COMPONENT, key, field_name, version = staged.version, "{what}");
                Ok(staged.field)
            }
            Err(err) => {
                let mut map = self.entities.write();
                match map.get_mut(key).and_then(|s| s.slot_mut(field_name)) {
                    Some(slot) if slot.version == staged.version => *slot = staged.prior,
                    _ => warn!(key, field_name, "newer write landed; rollback skipped"),
                }
                warn!(kind = %K::COMPONENT, key, field_name, error = %err, "{what}: rolled back");
                Err(err)
            }
        }
    }
}

fn view(key: &str, field_name: &str, slot: &FieldSlot) -> Field {
    Field {
        key: key.to_string(),
        field_name: field_name.to_string(),
        value: slot.value.clone(),
        stale: slot.stale,
    }
}

/// Keep history ascending even if the clock stepped back
fn ordered_record(history: &[EvaluationRecord], mut record: EvaluationRecord) -> EvaluationRecord {
    if let Some(last) = history.last() {
        if record.timestamp < last.timestamp {
            record.timestamp = last.timestamp;
        }
    }
    record
}
