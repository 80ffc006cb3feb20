//! Human-in-the-loop approval for tool calls.
//!
//! The [`ApprovalGate`] combines the static `requires_approval` flag of a tool
//! contract with an [`ApprovalPolicy`] of auto-approve and always-deny rules.
//! Always-deny wins over auto-approve. When neither rule matches and the
//! contract asks for approval, an injected [`ApprovalPrompt`] decides.

#![warn(missing_docs, clippy::pedantic)]

pub mod decision;
pub mod gate;
pub mod observer;
pub mod prompt;
pub mod request;
pub mod rules;

pub use decision::{ApprovalDecision, ApprovalOutcome, DecisionKind};
pub use gate::{ApprovalGate, ApprovalStats};
pub use observer::{ApprovalObserver, CompositeApprovalObserver, TracingApprovalObserver};
pub use prompt::{ApprovalPrompt, FnPrompt, PromptFuture, StaticPrompt};
pub use request::ApprovalRequest;
pub use rules::{ApprovalError, ApprovalPolicy, ApprovalRule, RuleEffect, RuleMatcher};
