//! Key objects loaded inside a TPM session

use rsa::RsaPublicKey;
use tracing::{debug, info, warn};

use super::DeviceSession;
use crate::error::{KeyError, TpmJwtResult};
use crate::model::{KeyTemplate, TpmHandle};
use crate::ports::{PublicArea, TpmSession};

/// A key loaded into the TPM through `session`
///
/// The key borrows its session mutably, so it is always released before the
/// session can be closed. Dropping the key flushes its transient handle.
#[derive(Debug)]
pub struct KeyObject<'s, S: TpmSession> {
    session: &'s mut DeviceSession<S>,
    template: KeyTemplate,
    handle: TpmHandle,
    public: PublicArea,
    public_key: RsaPublicKey,
    released: bool,
}

impl<'s, S: TpmSession> KeyObject<'s, S> {
    /// Create the key described by `template` under the owner hierarchy, or
    /// load it again if the TPM already derived it
    ///
    /// # Errors
    ///
    /// Returns errors if:
    /// - The template is not a signing template
    /// - create-primary fails (`KeyError::CreationFailed`)
    /// - The public area cannot be read back (`KeyError::LoadFailed`)
    pub fn load_or_create(
        session: &'s mut DeviceSession<S>,
        template: &KeyTemplate,
    ) -> TpmJwtResult<Self> {
        template.validate()?;

        let (handle, created) = session
            .commands()
            .create_primary(template)
            .map_err(|e| KeyError::CreationFailed {
                reason: e.to_string(),
            })?;
        debug!("Primary key loaded at handle 0x{:08x}", handle);

        let loaded = Self::read_back(session, handle, &created);
        let (public, public_key) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                if let Err(e) = session.commands().flush_context(handle) {
                    warn!("error flushing handle 0x{:08x}: {}", handle, e);
                }
                return Err(err.into());
            }
        };

        info!(
            "Loaded key {} from {}",
            hex::encode(public.name_digest()),
            session.device()
        );

        Ok(Self {
            session,
            template: template.clone(),
            handle,
            public,
            public_key,
            released: false,
        })
    }

    fn read_back(
        session: &mut DeviceSession<S>,
        handle: TpmHandle,
        created: &PublicArea,
    ) -> Result<(PublicArea, RsaPublicKey), KeyError> {
        let public = session
            .commands()
            .read_public(handle)
            .map_err(|e| KeyError::LoadFailed {
                reason: e.to_string(),
            })?;
        if public.name != created.name {
            return Err(KeyError::LoadFailed {
                reason: "public area changed between create and read".to_string(),
            });
        }
        let public_key = public
            .to_rsa_public_key()
            .map_err(|e| KeyError::LoadFailed {
                reason: format!("unusable RSA public area: {e}"),
            })?;
        Ok((public, public_key))
    }

    /// Hex name digest identifying the key
    pub fn name(&self) -> String {
        hex::encode(self.public.name_digest())
    }

    pub fn handle(&self) -> TpmHandle {
        self.handle
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn public_area(&self) -> &PublicArea {
        &self.public
    }

    /// Sign `message` with the scheme configured in the template
    ///
    /// # Errors
    ///
    /// Returns `KeyError::SignOperationFailed` if the TPM refuses
    pub fn sign(&mut self, message: &[u8]) -> TpmJwtResult<Vec<u8>> {
        debug!(
            "Signing {} bytes with key 0x{:08x}, scheme {:?}",
            message.len(),
            self.handle,
            self.template.scheme
        );

        let signature = self
            .session
            .commands()
            .sign(self.handle, message, &self.template)
            .map_err(|e| KeyError::SignOperationFailed {
                reason: e.to_string(),
            })?;
        Ok(signature)
    }

    /// Flush the key's handle
    pub fn close(mut self) -> TpmJwtResult<()> {
        self.release()
    }

    fn release(&mut self) -> TpmJwtResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let handle = self.handle;
        self.session
            .commands()
            .flush_context(handle)
            .map_err(|e| crate::error::DeviceError::HandleFlushFailed {
                handle,
                reason: e.to_string(),
            })?;
        debug!("Flushed key handle 0x{:08x}", handle);
        Ok(())
    }
}

impl<S: TpmSession> Drop for KeyObject<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{}", e);
        }
    }
}
