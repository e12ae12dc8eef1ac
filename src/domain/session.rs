//! Scoped connection to a TPM
//!
//! A `DeviceSession` is closed exactly once: either explicitly through
//! [`DeviceSession::close`] or, on any early return, when it is dropped.

use tracing::{debug, info, warn};

use crate::error::{DeviceError, TpmJwtResult};
use crate::model::{FlushScope, TpmHandle};
use crate::ports::{TpmDevice, TpmSession};

/// Outcome of a flush pass
#[derive(Debug, Default)]
pub struct FlushReport {
    pub flushed: Vec<TpmHandle>,
    pub failures: Vec<DeviceError>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first failure, or the number of handles released
    pub fn into_result(self) -> TpmJwtResult<usize> {
        match self.failures.into_iter().next() {
            Some(err) => Err(err.into()),
            None => Ok(self.flushed.len()),
        }
    }
}

/// Live connection to a TPM
#[derive(Debug)]
pub struct DeviceSession<S: TpmSession> {
    commands: S,
    device: String,
    closed: bool,
}

impl<S: TpmSession> DeviceSession<S> {
    /// Open the TPM at `path`
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::Unavailable` if the device cannot be opened
    pub fn open<D>(device: &D, path: &str) -> TpmJwtResult<Self>
    where
        D: TpmDevice<Session = S>,
    {
        let commands = device.open(path).map_err(|e| DeviceError::Unavailable {
            device: path.to_string(),
            reason: e.to_string(),
        })?;
        debug!("Opened TPM {}", path);

        Ok(Self {
            commands,
            device: path.to_string(),
            closed: false,
        })
    }

    /// Open the TPM and release stale handles in `scope`
    ///
    /// The connection is closed again if flushing fails.
    pub fn open_with_flush<D>(device: &D, path: &str, scope: FlushScope) -> TpmJwtResult<Self>
    where
        D: TpmDevice<Session = S>,
    {
        let mut session = Self::open(device, path)?;
        let flushed = session.flush(scope).into_result()?;
        if flushed > 0 {
            info!("Flushed {} stale handles from {}", flushed, path);
        }
        Ok(session)
    }

    /// Release every handle in the classes of `scope`
    ///
    /// Failures are collected rather than returned early so that one bad
    /// handle or class does not leave the rest of the TPM untouched.
    pub fn flush(&mut self, scope: FlushScope) -> FlushReport {
        let mut report = FlushReport::default();

        for class in scope.classes() {
            let handles = match self.commands.get_handles(*class) {
                Ok(handles) => handles,
                Err(e) => {
                    report.failures.push(DeviceError::HandleEnumerationFailed {
                        class: *class,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for handle in handles {
                match self.commands.flush_context(handle) {
                    Ok(()) => {
                        debug!("Flushed {} handle 0x{:08x}", class, handle);
                        report.flushed.push(handle);
                    }
                    Err(e) => report.failures.push(DeviceError::HandleFlushFailed {
                        handle,
                        reason: e.to_string(),
                    }),
                }
            }
        }

        report
    }

    /// Close the connection; later calls are no-ops
    pub fn close(&mut self) -> TpmJwtResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.commands.close().map_err(|e| DeviceError::CloseFailed {
            device: self.device.clone(),
            reason: e.to_string(),
        })?;
        debug!("Closed TPM {}", self.device);
        Ok(())
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn commands(&mut self) -> &mut S {
        &mut self.commands
    }
}

impl<S: TpmSession> Drop for DeviceSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Fault, SimulatedTpm};
    use crate::error::TpmJwtError;
    use crate::model::{HandleClass, KeyTemplate, DEFAULT_TPM_DEVICE};

    #[test]
    fn test_open_missing_device() {
        let tpm = SimulatedTpm::new();
        let result = DeviceSession::open(&tpm, "/dev/tpm9");

        assert!(matches!(
            result.unwrap_err(),
            TpmJwtError::Device(DeviceError::Unavailable { .. })
        ));
        assert_eq!(tpm.opens(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let tpm = SimulatedTpm::new();
        let mut session = DeviceSession::open(&tpm, DEFAULT_TPM_DEVICE).unwrap();

        session.close().unwrap();
        session.close().unwrap();
        drop(session);

        assert_eq!(tpm.closes(), 1);
    }

    #[test]
    fn test_drop_closes_session() {
        let tpm = SimulatedTpm::new();
        {
            let _session = DeviceSession::open(&tpm, DEFAULT_TPM_DEVICE).unwrap();
        }
        assert_eq!(tpm.opens(), 1);
        assert_eq!(tpm.closes(), 1);
    }

    #[test]
    fn test_close_failure_is_reported_once() {
        let tpm = SimulatedTpm::new();
        tpm.inject_fault(Fault::Close);
        let mut session = DeviceSession::open(&tpm, DEFAULT_TPM_DEVICE).unwrap();

        assert!(matches!(
            session.close().unwrap_err(),
            TpmJwtError::Device(DeviceError::CloseFailed { .. })
        ));
        assert!(session.is_closed());
        assert!(session.close().is_ok());
    }

    #[test]
    fn test_flush_all_is_idempotent() {
        let tpm = SimulatedTpm::new();
        tpm.leak_session(HandleClass::LoadedSession);
        tpm.leak_session(HandleClass::SavedSession);
        {
            let mut leaky = tpm.open(DEFAULT_TPM_DEVICE).unwrap();
            leaky
                .create_primary(&KeyTemplate::unrestricted_rsa2048())
                .unwrap();
        }

        let mut session = DeviceSession::open(&tpm, DEFAULT_TPM_DEVICE).unwrap();
        let first = session.flush(FlushScope::All);
        assert!(first.is_clean());
        assert_eq!(first.flushed.len(), 3);

        let second = session.flush(FlushScope::All);
        assert!(second.is_clean());
        assert!(second.flushed.is_empty());
        assert!(tpm.transient_handles().is_empty());
    }

    #[test]
    fn test_flush_none_touches_nothing() {
        let tpm = SimulatedTpm::new();
        let leaked = tpm.leak_session(HandleClass::LoadedSession);
        let mut session = DeviceSession::open(&tpm, DEFAULT_TPM_DEVICE).unwrap();

        assert_eq!(session.flush(FlushScope::None).into_result().unwrap(), 0);
        assert_eq!(tpm.session_handles(HandleClass::LoadedSession), vec![leaked]);
    }

    #[test]
    fn test_flush_continues_after_failures() {
        let tpm = SimulatedTpm::new();
        let bad = tpm.leak_session(HandleClass::LoadedSession);
        let good = tpm.leak_session(HandleClass::LoadedSession);
        let saved = tpm.leak_session(HandleClass::SavedSession);
        tpm.inject_fault(Fault::Flush(bad));
        tpm.inject_fault(Fault::GetHandles(HandleClass::Transient));

        let mut session = DeviceSession::open(&tpm, DEFAULT_TPM_DEVICE).unwrap();
        let report = session.flush(FlushScope::All);

        assert_eq!(report.flushed, vec![good, saved]);
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(
            report.failures[0],
            DeviceError::HandleFlushFailed { handle, .. } if handle == bad
        ));
        assert!(matches!(
            report.failures[1],
            DeviceError::HandleEnumerationFailed {
                class: HandleClass::Transient,
                ..
            }
        ));
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_open_with_flush_closes_on_failure() {
        let tpm = SimulatedTpm::new();
        tpm.inject_fault(Fault::GetHandles(HandleClass::SavedSession));

        let result = DeviceSession::open_with_flush(&tpm, DEFAULT_TPM_DEVICE, FlushScope::Saved);

        assert!(matches!(
            result.unwrap_err(),
            TpmJwtError::Device(DeviceError::HandleEnumerationFailed { .. })
        ));
        assert_eq!(tpm.opens(), tpm.closes());
    }
}
