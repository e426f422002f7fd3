//! AI task execution: a language model drives a live browser session to
//! carry out a natural-language instruction.
//!
//! [`TaskExecutor`] runs the batch observe/decide/act loop with retries,
//! failure budgets, and batched side-effect flushing;
//! [`ConversationalExecutor`] is the interactive variant with
//! confidence-gated questions and stuck detection.

pub mod cleaner;
pub mod conversational;
pub mod decision;
pub mod error;
pub mod executor;
pub mod prompt;
pub mod session;

pub use {
    conversational::{AgentEvent, ConversationalExecutor, StuckDetector, UserChannel},
    decision::{ActionKind, Decision, DecodeError, decode, normalize_selector},
    error::{Error as ExecutorError, Result},
    executor::{ExecutorConfig, TaskExecutor, plan_actions},
    session::{TaskHook, needs_start_url_revisit},
};
