//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Plain request:   (host, target URL) → access_control.rs → allow | 403
//! CONNECT request: host of host:port  → access_control.rs → allow | 403
//! ```
//!
//! # Design Decisions
//! - Exact string matching only, no patterns
//! - Blocklists are shared via Arc and mutated only through explicit calls
//! - Checks run before any upstream connection is attempted

pub mod access_control;

pub use access_control::{AccessControl, BlockKind};
