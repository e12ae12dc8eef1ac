//! Ports (traits) for the TPM command layer
//!
//! These traits define the TPM commands the signing core depends on.
//! They represent ports in hexagonal architecture - sessions and keys are
//! managed against these abstractions, not a concrete TPM stack.

pub mod contract_tests;
mod tpm_device;

pub use tpm_device::{CommandError, CommandResult, PublicArea, TpmDevice, TpmSession};
