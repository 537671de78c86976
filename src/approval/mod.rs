//! Checkpoint approval context.
//!
//! Stages configured with `approval_required` suspend their task behind a
//! checkpoint once they complete. This context owns those requests: raising
//! them, recording reviewer decisions with an audit trail, enforcing the
//! single-pending-request invariant, and expiring unattended requests per
//! the stage's timeout policy.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
