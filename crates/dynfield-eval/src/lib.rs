//! Dynfield Eval
//!
//! Evaluation of dynamic fields against an external interpreter.
//!
//! # Overview
//!
//! - **Interpreter**: async boundary to the expression language
//! - **ProcessInterpreter**: runs an external program per evaluation
//! - **EvaluationClient**: preview, refresh, commit and history operations on one store
//! - **EvalConfig**: timeout and context settings
//!
//! # Example
//!
//! ```rust,ignore
//! use dynfield_eval::prelude::*;
//!
//! let client = EvaluationClient::new(store, Arc::new(ProcessInterpreter::new("dynfield-lisp")))
//!     .with_config(EvalConfig::new().with_timeout_ms(2_000));
//!
//! let preview = client.evaluate("sum", "value", "(+ 1 2)").await?;
//! client.refresh("sum", "value").await?;
//! ```

#![warn(unreachable_pub)]

pub mod client;
pub mod config;
pub mod interpreter;
pub mod process;

// Re-exports
pub use client::{EvaluationClient, RefreshReport};
pub use config::EvalConfig;
pub use interpreter::{EvaluationRequest, EvaluationResponse, Interpreter, InterpreterError};
pub use process::ProcessInterpreter;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for evaluating fields
    pub use crate::{
        EvalConfig, EvaluationClient, EvaluationRequest, EvaluationResponse, Interpreter,
        InterpreterError, ProcessInterpreter,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
