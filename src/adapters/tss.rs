//! TPM 2.0 implementation of the command-layer ports
//!
//! Talks to a kernel TPM device through the tpm2-tss ESAPI bindings.

use std::collections::HashMap;
use std::str::FromStr;

use tracing::{debug, warn};
use tss_esapi::attributes::ObjectAttributes as TssObjectAttributes;
use tss_esapi::constants::tss::{TPM2_RH_NULL, TPM2_ST_HASHCHECK};
use tss_esapi::constants::CapabilityType;
use tss_esapi::handles::{KeyHandle, ObjectHandle, TpmHandle as TssTpmHandle};
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm, RsaSchemeAlgorithm};
use tss_esapi::interface_types::key_bits::RsaKeyBits;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{
    CapabilityData, Digest, HashScheme, HashcheckTicket, MaxBuffer, Public, PublicBuilder,
    PublicKeyRsa, PublicRsaParametersBuilder, RsaExponent, RsaScheme, Signature,
    SignatureScheme as TssSignatureScheme,
};
use tss_esapi::tcti_ldr::{DeviceConfig, TctiNameConf};
use tss_esapi::tss2_esys::TPMT_TK_HASHCHECK;
use tss_esapi::Context;

use crate::model::{HandleClass, HashAlgorithm, KeyTemplate, SignatureScheme, TpmHandle};
use crate::ports::{CommandError, CommandResult, PublicArea, TpmDevice, TpmSession};

const MAX_HANDLES_PER_QUERY: u32 = 64;

fn command_error(step: &str, err: tss_esapi::Error) -> CommandError {
    CommandError::new(format!("{step}: {err}"))
}

fn hashing_algorithm(hash: HashAlgorithm) -> HashingAlgorithm {
    match hash {
        HashAlgorithm::Sha256 => HashingAlgorithm::Sha256,
        HashAlgorithm::Sha384 => HashingAlgorithm::Sha384,
        HashAlgorithm::Sha512 => HashingAlgorithm::Sha512,
    }
}

fn build_public(template: &KeyTemplate) -> tss_esapi::Result<Public> {
    let (scheme_alg, hash) = match template.scheme {
        SignatureScheme::RsaSsa(hash) => (RsaSchemeAlgorithm::RsaSsa, hash),
        SignatureScheme::RsaPss(hash) => (RsaSchemeAlgorithm::RsaPss, hash),
    };
    let rsa_params = PublicRsaParametersBuilder::new()
        .with_scheme(RsaScheme::create(scheme_alg, Some(hashing_algorithm(hash)))?)
        .with_key_bits(RsaKeyBits::try_from(template.key_bits)?)
        .with_exponent(RsaExponent::create(template.exponent)?)
        .with_is_signing_key(true)
        .with_is_decryption_key(false)
        .with_restricted(template.is_restricted())
        .build()?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(hashing_algorithm(template.name_alg))
        .with_object_attributes(TssObjectAttributes::from(template.attributes.bits()))
        .with_auth_policy(Digest::try_from(template.auth_policy.clone())?)
        .with_rsa_parameters(rsa_params)
        .with_rsa_unique_identifier(PublicKeyRsa::default())
        .build()
}

fn public_area(public: &Public, name: &[u8]) -> CommandResult<PublicArea> {
    match public {
        Public::Rsa {
            parameters, unique, ..
        } => Ok(PublicArea {
            modulus: unique.value().to_vec(),
            exponent: parameters.exponent().value(),
            name: name.to_vec(),
        }),
        _ => Err(CommandError::new("object is not an RSA key")),
    }
}

/// TPM reached through a kernel device node such as `/dev/tpmrm0`
#[derive(Debug, Clone, Copy, Default)]
pub struct TssDevice;

impl TpmDevice for TssDevice {
    type Session = TssSession;

    fn open(&self, path: &str) -> CommandResult<Self::Session> {
        let config = DeviceConfig::from_str(path).map_err(|e| command_error("device path", e))?;
        let context = Context::new(TctiNameConf::Device(config))
            .map_err(|e| command_error("open TPM", e))?;
        debug!("ESAPI context opened on {}", path);

        Ok(TssSession {
            context: Some(context),
            keys: HashMap::new(),
        })
    }
}

/// ESAPI context over one device connection
pub struct TssSession {
    context: Option<Context>,
    keys: HashMap<TpmHandle, KeyHandle>,
}

impl TssSession {
    fn context(&mut self) -> CommandResult<&mut Context> {
        self.context
            .as_mut()
            .ok_or_else(|| CommandError::new("connection already closed"))
    }

    fn key(&self, handle: TpmHandle) -> CommandResult<KeyHandle> {
        self.keys
            .get(&handle)
            .copied()
            .ok_or_else(|| CommandError::new(format!("handle 0x{handle:08x} not loaded by this session")))
    }
}

impl TssSession {
    /// Read back a freshly created object and record its TPM handle
    ///
    /// ESAPI does not report the TPM handle, so the object is identified as
    /// the one transient handle that appeared since `before`. Through a
    /// resource manager (`/dev/tpmrm0`) only this connection's objects are
    /// listed. On a raw `/dev/tpm0`, objects created concurrently by other
    /// clients make the match ambiguous, and the create is rejected.
    fn register_created(
        &mut self,
        key_handle: KeyHandle,
        out_public: &Public,
        before: &[TpmHandle],
    ) -> CommandResult<(TpmHandle, PublicArea)> {
        let (_, name, _) = self
            .context()?
            .read_public(key_handle)
            .map_err(|e| command_error("read public", e))?;
        let area = public_area(out_public, name.value())?;

        let mut appeared = self
            .get_handles(HandleClass::Transient)?
            .into_iter()
            .filter(|h| !before.contains(h));
        let handle = match (appeared.next(), appeared.next()) {
            (Some(handle), None) => handle,
            (None, _) => return Err(CommandError::new("created object not listed as transient")),
            (Some(_), Some(_)) => {
                return Err(CommandError::new(
                    "other clients created objects concurrently, use a resource manager device",
                ))
            }
        };

        self.keys.insert(handle, key_handle);
        Ok((handle, area))
    }
}

/// Run `release` if `result` is an error; a failed release is only logged
fn release_on_error<T>(
    result: CommandResult<T>,
    release: impl FnOnce() -> CommandResult<()>,
) -> CommandResult<T> {
    if result.is_err() {
        if let Err(e) = release() {
            warn!("releasing object after failed create: {}", e);
        }
    }
    result
}

impl TpmSession for TssSession {
    fn get_handles(&mut self, class: HandleClass) -> CommandResult<Vec<TpmHandle>> {
        let context = self.context()?;
        let mut handles = Vec::new();
        let mut next = class.first_handle();

        loop {
            let (data, more) = context
                .get_capability(CapabilityType::Handles, next, MAX_HANDLES_PER_QUERY)
                .map_err(|e| command_error("get capability", e))?;
            let CapabilityData::Handles(list) = data else {
                return Err(CommandError::new("unexpected capability data"));
            };

            let batch: Vec<TpmHandle> = list
                .into_inner()
                .into_iter()
                .map(u32::from)
                .filter(|h| HandleClass::of(*h) == Some(class))
                .collect();
            let last = batch.last().copied();
            handles.extend(batch);

            match (more, last) {
                (true, Some(last)) => next = last + 1,
                _ => break,
            }
        }

        Ok(handles)
    }

    fn flush_context(&mut self, handle: TpmHandle) -> CommandResult<()> {
        if let Some(key) = self.keys.remove(&handle) {
            return self
                .context()?
                .flush_context(ObjectHandle::from(key))
                .map_err(|e| command_error("flush context", e));
        }

        let context = self.context()?;
        let tpm_handle = TssTpmHandle::try_from(handle).map_err(|e| command_error("handle", e))?;
        let object = context
            .tr_from_tpm_public(tpm_handle)
            .map_err(|e| command_error("resolve handle", e))?;
        context
            .flush_context(object)
            .map_err(|e| command_error("flush context", e))
    }

    fn create_primary(&mut self, template: &KeyTemplate) -> CommandResult<(TpmHandle, PublicArea)> {
        let public = build_public(template).map_err(|e| command_error("key template", e))?;
        let before = self.get_handles(HandleClass::Transient)?;

        let created = self
            .context()?
            .execute_with_nullauth_session(|ctx| {
                ctx.create_primary(Hierarchy::Owner, public, None, None, None, None)
            })
            .map_err(|e| command_error("create primary", e))?;
        let key_handle = created.key_handle;

        let registered = self.register_created(key_handle, &created.out_public, &before);
        release_on_error(registered, || {
            self.context()?
                .flush_context(ObjectHandle::from(key_handle))
                .map_err(|e| command_error("flush context", e))
        })
    }

    fn read_public(&mut self, handle: TpmHandle) -> CommandResult<PublicArea> {
        let key = self.key(handle)?;
        let (public, name, _) = self
            .context()?
            .read_public(key)
            .map_err(|e| command_error("read public", e))?;
        public_area(&public, name.value())
    }

    fn sign(
        &mut self,
        handle: TpmHandle,
        message: &[u8],
        template: &KeyTemplate,
    ) -> CommandResult<Vec<u8>> {
        let key = self.key(handle)?;
        let hash = template.scheme.hash();
        let restricted = template.is_restricted();
        let context = self.context()?;

        // restricted keys only sign digests the TPM computed itself
        let (digest, ticket) = if restricted {
            let buffer = MaxBuffer::try_from(message.to_vec())
                .map_err(|e| command_error("message too large for a restricted key", e))?;
            context
                .hash(buffer, hashing_algorithm(hash), Hierarchy::Owner)
                .map_err(|e| command_error("hash", e))?
        } else {
            let digest = hash.digest(message);
            let ticket = HashcheckTicket::try_from(TPMT_TK_HASHCHECK {
                tag: TPM2_ST_HASHCHECK,
                hierarchy: TPM2_RH_NULL,
                digest: Default::default(),
            })
            .map_err(|e| command_error("null ticket", e))?;
            (
                Digest::try_from(digest).map_err(|e| command_error("digest", e))?,
                ticket,
            )
        };

        let hash_scheme = HashScheme::new(hashing_algorithm(hash));
        let scheme = match template.scheme {
            SignatureScheme::RsaSsa(_) => TssSignatureScheme::RsaSsa { hash_scheme },
            SignatureScheme::RsaPss(_) => TssSignatureScheme::RsaPss { hash_scheme },
        };

        let signature = context
            .execute_with_nullauth_session(|ctx| ctx.sign(key, digest, scheme, ticket))
            .map_err(|e| command_error("sign", e))?;

        match signature {
            Signature::RsaSsa(sig) | Signature::RsaPss(sig) => Ok(sig.signature().value().to_vec()),
            _ => Err(CommandError::new("unexpected signature type")),
        }
    }

    fn close(&mut self) -> CommandResult<()> {
        self.keys.clear();
        match self.context.take() {
            Some(context) => {
                drop(context);
                Ok(())
            }
            None => Err(CommandError::new("connection already closed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run the same contract as the simulator against a real TPM.
    // Enable with: --features hardware-tests

    #[cfg(feature = "hardware-tests")]
    use crate::ports::contract_tests::tpm_contract;

    #[cfg(feature = "hardware-tests")]
    crate::contract_tests_for!(
        tss_contract,
        make = || TssDevice,
        tests = {
            test_open_and_close => tpm_contract::test_open_and_close,
            test_open_missing_device => tpm_contract::test_open_missing_device,
            test_create_primary_is_deterministic => tpm_contract::test_create_primary_is_deterministic,
            test_read_public_matches_create => tpm_contract::test_read_public_matches_create,
            test_sign_verifies_with_public_area => tpm_contract::test_sign_verifies_with_public_area,
            test_flush_releases_transient => tpm_contract::test_flush_releases_transient,
            test_flush_unknown_handle_fails => tpm_contract::test_flush_unknown_handle_fails,
        }
    );

    #[test]
    #[cfg_attr(not(feature = "hardware-tests"), ignore)] // Requires a TPM at /dev/tpmrm0 - enable with: --features hardware-tests
    fn test_restricted_key_signs_through_hash_ticket() {
        use crate::logic::verify_rsa_signature;
        use crate::model::DEFAULT_TPM_DEVICE;

        let template = KeyTemplate::attestation_rsa2048();
        let mut session = TssDevice.open(DEFAULT_TPM_DEVICE).expect("Failed to open TPM");
        let (handle, public) = session.create_primary(&template).expect("create failed");

        let signature = session
            .sign(handle, b"attested data", &template)
            .expect("restricted sign failed");
        let key = public.to_rsa_public_key().expect("bad public area");
        verify_rsa_signature(&key, template.scheme, b"attested data", &signature)
            .expect("Signature verification failed");

        session.flush_context(handle).expect("flush failed");
        session.close().expect("close failed");
    }

    #[test]
    fn test_release_runs_only_on_error() {
        let mut released = 0;
        let ok: CommandResult<u32> = release_on_error(Ok(7), || {
            released += 1;
            Ok(())
        });
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(released, 0);

        let err: CommandResult<u32> = release_on_error(Err(CommandError::new("read public")), || {
            released += 1;
            Ok(())
        });
        assert_eq!(err.unwrap_err().message, "read public");
        assert_eq!(released, 1);
    }

    #[test]
    fn test_release_failure_keeps_original_error() {
        let result: CommandResult<()> = release_on_error(
            Err(CommandError::new("created object not listed as transient")),
            || Err(CommandError::new("flush context: TPM_RC_HANDLE")),
        );
        assert_eq!(
            result.unwrap_err().message,
            "created object not listed as transient"
        );
    }

    #[test]
    #[cfg_attr(not(feature = "hardware-tests"), ignore)] // Requires a TPM at /dev/tpmrm0 - enable with: --features hardware-tests
    fn test_create_primary_adds_exactly_one_transient() {
        use crate::model::DEFAULT_TPM_DEVICE;

        let mut session = TssDevice.open(DEFAULT_TPM_DEVICE).expect("Failed to open TPM");
        let before = session.get_handles(HandleClass::Transient).expect("get handles failed");
        let (handle, _) = session
            .create_primary(&KeyTemplate::unrestricted_rsa2048())
            .expect("create failed");
        let after = session.get_handles(HandleClass::Transient).expect("get handles failed");

        assert_eq!(after.len(), before.len() + 1);
        assert!(after.contains(&handle) && !before.contains(&handle));

        session.flush_context(handle).expect("flush failed");
        assert_eq!(
            session.get_handles(HandleClass::Transient).expect("get handles failed"),
            before
        );
        session.close().expect("close failed");
    }

    #[test]
    fn test_build_public_for_catalog_templates() {
        for template in [
            KeyTemplate::attestation_rsa2048(),
            KeyTemplate::unrestricted_rsa2048(),
        ] {
            let public = build_public(&template).expect("template rejected");
            assert!(matches!(public, Public::Rsa { .. }));
        }
    }
}
