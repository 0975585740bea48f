//! Unattended nightly code-modification runs for a git repository.
//!
//! Each run drives a language-model conversation through six stages, plan,
//! implement, validate, repair, document, publish, and leaves the result on a
//! date-scoped branch for human review the next morning. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (artifact extraction,
//!   conversation state, retry policy). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (model HTTP calls, git, process
//!   execution, filesystem). Behind traits to enable scripted doubles in tests.
//!
//! Orchestration ([`run`], [`session`]) coordinates core logic with I/O to
//! implement the nightly pipeline.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod prompts;
pub mod run;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
