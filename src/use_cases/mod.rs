//! Use cases (orchestration)
//!
//! Each use case opens its own connection, works with one key and releases
//! both before returning.

mod materialize;
mod sign;

pub use materialize::{materialize, tpm_from_context, verification_key};
pub use sign::sign_with_tpm;
