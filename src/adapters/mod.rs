//! Adapters - concrete implementations of the TPM ports

mod simulator;
#[cfg(feature = "tpm")]
mod tss;

pub use simulator::{Fault, SimulatedSession, SimulatedTpm, DEFAULT_OBJECT_SLOTS};
#[cfg(feature = "tpm")]
pub use tss::{TssDevice, TssSession};
