use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Raw TPM handle value
pub type TpmHandle = u32;

/// Handle ranges that can be enumerated and flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleClass {
    LoadedSession,
    SavedSession,
    Transient,
}

impl HandleClass {
    /// First handle value of the class (TPM_HT_* << 24)
    pub fn first_handle(self) -> TpmHandle {
        match self {
            HandleClass::LoadedSession => 0x0200_0000,
            HandleClass::SavedSession => 0x0300_0000,
            HandleClass::Transient => 0x8000_0000,
        }
    }

    /// Class of a handle value, if it is one of the flushable ranges
    pub fn of(handle: TpmHandle) -> Option<Self> {
        match handle >> 24 {
            0x02 => Some(HandleClass::LoadedSession),
            0x03 => Some(HandleClass::SavedSession),
            0x80 => Some(HandleClass::Transient),
            _ => None,
        }
    }
}

impl fmt::Display for HandleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleClass::LoadedSession => f.write_str("loaded-session"),
            HandleClass::SavedSession => f.write_str("saved-session"),
            HandleClass::Transient => f.write_str("transient"),
        }
    }
}

/// Which handle classes to release when flushing stale state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushScope {
    All,
    Loaded,
    Saved,
    Transient,
    #[default]
    None,
}

impl FlushScope {
    pub fn classes(self) -> &'static [HandleClass] {
        match self {
            FlushScope::All => &[
                HandleClass::LoadedSession,
                HandleClass::SavedSession,
                HandleClass::Transient,
            ],
            FlushScope::Loaded => &[HandleClass::LoadedSession],
            FlushScope::Saved => &[HandleClass::SavedSession],
            FlushScope::Transient => &[HandleClass::Transient],
            FlushScope::None => &[],
        }
    }
}

impl FromStr for FlushScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(FlushScope::All),
            "loaded" => Ok(FlushScope::Loaded),
            "saved" => Ok(FlushScope::Saved),
            "transient" => Ok(FlushScope::Transient),
            "none" => Ok(FlushScope::None),
            other => Err(ConfigError::UnknownFlushScope {
                scope: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_scope_from_str() {
        assert_eq!("all".parse::<FlushScope>().unwrap(), FlushScope::All);
        assert_eq!("none".parse::<FlushScope>().unwrap(), FlushScope::None);
        assert_eq!(
            "transient".parse::<FlushScope>().unwrap(),
            FlushScope::Transient
        );
        assert!(matches!(
            "everything".parse::<FlushScope>(),
            Err(ConfigError::UnknownFlushScope { .. })
        ));
    }

    #[test]
    fn test_all_covers_every_class() {
        assert_eq!(FlushScope::All.classes().len(), 3);
        assert!(FlushScope::None.classes().is_empty());
    }

    #[test]
    fn test_handle_class_round_trip() {
        for class in FlushScope::All.classes() {
            assert_eq!(HandleClass::of(class.first_handle() + 7), Some(*class));
        }
        assert_eq!(HandleClass::of(0x8100_0001), None);
    }
}
