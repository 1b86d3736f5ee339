//! Permit approval links and decision engine.
//!
//! Permits move from pending approval to a terminal decision through
//! single-use emailed links. Raw tokens are never stored; decisions apply
//! exactly once under concurrent access; every link and decision leaves an
//! audit trail.

pub mod audit;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod issuer;
pub mod link;
pub mod permit;
pub mod recipients;
pub mod service;
pub mod status;
pub mod store;
pub mod token;
pub mod types;
pub mod utils;
