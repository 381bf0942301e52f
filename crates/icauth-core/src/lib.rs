//! Core authentication flow for harvesting an iCloud web session.
//!
//! This crate contains everything that does not need a real browser:
//!
//! - **`flow`**: the auth flow state machine over an abstract
//!   [`AuthFlowDriver`] capability set, so the sequencing logic is testable
//!   against scripted fakes.
//! - **`poll`**: the bounded fixed-interval polling primitive every
//!   interactive step is built from.
//! - **`cookies`**: trust-cookie extraction and `Cookie:` header handling.
//! - **`config`**: rclone config section patching and iCloud remote
//!   enumeration.
//! - **`orchestrate`**: assembly of a harvested session into a config patch
//!   and/or an equivalent command line.
//! - **`remote`**: operator-facing selection among configured remotes.
//!
//! The real CDP-backed driver lives in `icauth-cli`, on top of
//! `icauth-browser`.

pub mod config;
pub mod cookies;
pub mod error;
pub mod flow;
pub mod orchestrate;
pub mod poll;
pub mod remote;

pub use error::FlowError;
pub use flow::{run_auth_flow, AuthFlowDriver, AuthPrompter, AuthResult, Credentials};
pub use orchestrate::{assemble_outcome, OrchestrateOutcome};
pub use poll::{poll_until, PollBudget};
