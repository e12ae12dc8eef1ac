//! Hardware resource lifecycle: connections and the keys loaded through them

mod key;
mod session;

pub use key::KeyObject;
pub use session::{DeviceSession, FlushReport};
