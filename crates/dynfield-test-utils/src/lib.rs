//! Testing utilities for the dynfield workspace
//!
//! Shared interpreters, backends and fixtures.

#![allow(missing_docs)]

pub mod backend;
pub mod interpreters;

pub use backend::FlakyBackend;
pub use interpreters::{ArithmeticInterpreter, GatedInterpreter};

use dynfield_eval::{EvaluationClient, Interpreter};
use dynfield_store::{ConfigKind, Entity, EntityKind, FieldBackend, FieldStore, KeyRenameCoordinator, VariableKind};
use dynfield_value::{TypedValue, ValueType};
use std::sync::Arc;

/// Store, rename coordinator and evaluation client over one backend
#[derive(Debug)]
pub struct Harness<K: EntityKind> {
    pub backend: Arc<FlakyBackend>,
    pub store: Arc<FieldStore<K>>,
    pub renamer: KeyRenameCoordinator<K>,
    pub client: EvaluationClient<K>,
}

impl<K: EntityKind> Harness<K> {
    /// Harness evaluating with `interpreter`
    pub fn with_interpreter(interpreter: Arc<dyn Interpreter>) -> Self {
        let backend = Arc::new(FlakyBackend::new());
        let dyn_backend: Arc<dyn FieldBackend> = backend.clone();
        let store = Arc::new(FieldStore::new(dyn_backend));
        Self {
            renamer: KeyRenameCoordinator::new(store.clone()),
            client: EvaluationClient::new(store.clone(), interpreter),
            backend,
            store,
        }
    }

    /// Harness evaluating with [`ArithmeticInterpreter`]
    pub fn arithmetic() -> Self {
        Self::with_interpreter(Arc::new(ArithmeticInterpreter))
    }
}

/// Harness over config entries
pub fn config_harness() -> Harness<ConfigKind> {
    Harness::arithmetic()
}

/// Harness over variables
pub fn variable_harness() -> Harness<VariableKind> {
    Harness::arithmetic()
}

/// Static field from a literal
pub fn literal(kind: ValueType, text: &str) -> TypedValue {
    TypedValue::from_literal(kind, text).unwrap()
}

/// Dynamic field awaiting its first evaluation
pub fn expression(kind: ValueType, text: &str) -> TypedValue {
    TypedValue::new_dynamic(kind, text).unwrap()
}

/// Entity with a static integer primary field
pub fn integer_entity(text: &str) -> Entity {
    Entity::new(literal(ValueType::Integer, text))
}

/// Entity with a dynamic integer primary field
pub fn dynamic_entity(text: &str) -> Entity {
    Entity::new(expression(ValueType::Integer, text))
}

/// Install a test-writer subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
