//! Sandboxed evaluation of untrusted node bodies for forgeline.
//!
//! This crate implements C1: the sandbox runtime that evaluates `Script`
//! node bodies under resource caps the execution engine cannot itself
//! enforce. It has three moving pieces:
//!
//! - **Static analysis** ([`blocklist`]): per-language forbidden-symbol scan
//!   run at admission time and again immediately before execution.
//! - **Evaluation** ([`evaluator`], [`harness`]): an in-process pooled
//!   evaluator for JavaScript, and an out-of-process runner harness for
//!   both languages when OS-level rlimits are required.
//! - **Egress control** ([`egress`]): the contract a node's executor must
//!   consult before dialing out when its caps permit network access. No
//!   bundled evaluator performs outbound requests today; this is the
//!   surface an out-of-process or `ExternalCall` executor is required to
//!   wire in before it may open a socket on a body's behalf.
//!
//! [`runtime::SandboxRuntime`] is the single entry point other crates use.

pub mod blocklist;
pub mod caps;
pub mod egress;
pub mod error;
pub mod evaluator;
pub mod harness;
pub mod runtime;

pub use caps::SandboxCaps;
pub use egress::EgressFilter;
pub use error::SandboxError;
pub use runtime::SandboxRuntime;
