#[macro_export]
macro_rules! contract_tests_for {
      (
          $mod_name:ident,
          make = $make:expr,
          tests = {
            $( $test_name:ident => $tmpl:path ),+ $(,)?
        }
      ) => {
          mod $mod_name {
              use super::*;

              $(
                  #[test]
                  fn $test_name() {
                      let device = ($make)();
                      $tmpl(device);
                  }
              )+
          }
      };
  }

#[cfg(test)]
pub mod tpm_contract {
    use crate::logic::verify_rsa_signature;
    use crate::model::{HandleClass, KeyTemplate, DEFAULT_TPM_DEVICE};
    use crate::ports::{TpmDevice, TpmSession};

    pub(crate) fn test_open_and_close(device: impl TpmDevice) {
        let mut session = device.open(DEFAULT_TPM_DEVICE).expect("open failed");
        assert!(session.close().is_ok());
    }

    pub(crate) fn test_open_missing_device(device: impl TpmDevice) {
        assert!(device.open("/dev/does-not-exist").is_err());
    }

    pub(crate) fn test_create_primary_is_deterministic(device: impl TpmDevice) {
        let mut session = device.open(DEFAULT_TPM_DEVICE).expect("open failed");
        let template = KeyTemplate::unrestricted_rsa2048();

        let (first, first_public) = session.create_primary(&template).expect("create failed");
        let (second, second_public) = session.create_primary(&template).expect("create failed");

        assert_ne!(first, second);
        assert_eq!(first_public.modulus, second_public.modulus);
        assert_eq!(first_public.name, second_public.name);

        session.flush_context(first).expect("flush failed");
        session.flush_context(second).expect("flush failed");
        session.close().expect("close failed");
    }

    pub(crate) fn test_read_public_matches_create(device: impl TpmDevice) {
        let mut session = device.open(DEFAULT_TPM_DEVICE).expect("open failed");
        let template = KeyTemplate::unrestricted_rsa2048();

        let (handle, created) = session.create_primary(&template).expect("create failed");
        let read = session.read_public(handle).expect("read public failed");

        assert_eq!(created, read);
        assert_eq!(read.modulus.len(), 256);
        assert_eq!(read.name_digest().len(), 32);

        session.flush_context(handle).expect("flush failed");
        session.close().expect("close failed");
    }

    pub(crate) fn test_sign_verifies_with_public_area(device: impl TpmDevice) {
        let mut session = device.open(DEFAULT_TPM_DEVICE).expect("open failed");
        let template = KeyTemplate::unrestricted_rsa2048();

        let (handle, public) = session.create_primary(&template).expect("create failed");
        let signature = session
            .sign(handle, b"test data", &template)
            .expect("sign failed");
        let key = public.to_rsa_public_key().expect("bad public area");

        verify_rsa_signature(&key, template.scheme, b"test data", &signature)
            .expect("Signature verification failed");
        assert!(verify_rsa_signature(&key, template.scheme, b"test datb", &signature).is_err());

        session.flush_context(handle).expect("flush failed");
        session.close().expect("close failed");
    }

    pub(crate) fn test_flush_releases_transient(device: impl TpmDevice) {
        let mut session = device.open(DEFAULT_TPM_DEVICE).expect("open failed");
        let template = KeyTemplate::unrestricted_rsa2048();

        let (handle, _) = session.create_primary(&template).expect("create failed");
        let before = session
            .get_handles(HandleClass::Transient)
            .expect("get handles failed");
        assert!(before.contains(&handle));

        session.flush_context(handle).expect("flush failed");
        let after = session
            .get_handles(HandleClass::Transient)
            .expect("get handles failed");
        assert!(!after.contains(&handle));

        session.close().expect("close failed");
    }

    pub(crate) fn test_flush_unknown_handle_fails(device: impl TpmDevice) {
        let mut session = device.open(DEFAULT_TPM_DEVICE).expect("open failed");

        assert!(session.flush_context(0x80ff_fff0).is_err());

        session.close().expect("close failed");
    }
}
