//! Software TPM implementing the command-layer ports
//!
//! Primary keys are derived deterministically from an owner seed and the
//! template digest, the way a real TPM derives them from the owner hierarchy
//! seed. Transient objects and session handles live in state shared by every
//! connection opened on the same `SimulatedTpm`, like the raw `/dev/tpm0`
//! interface without a resource manager.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::logic::{pkcs1v15_padding, pss_padding};
use crate::model::{HandleClass, KeyTemplate, SignatureScheme, TpmHandle, DEFAULT_TPM_DEVICE};
use crate::ports::{CommandError, CommandResult, PublicArea, TpmDevice, TpmSession};

const TPM_RC_HANDLE: u32 = 0x008B;
const TPM_RC_OBJECT_MEMORY: u32 = 0x0902;
const TPM_RC_FAILURE: u32 = 0x0101;

/// Transient objects a typical TPM can hold at once
pub const DEFAULT_OBJECT_SLOTS: usize = 3;

const DEFAULT_OWNER_SEED: [u8; 32] = [0x5A; 32];

/// Keys already derived in this process, by derivation seed
fn derived_keys() -> &'static Mutex<HashMap<[u8; 32], Arc<RsaPrivateKey>>> {
    static KEYS: OnceLock<Mutex<HashMap<[u8; 32], Arc<RsaPrivateKey>>>> = OnceLock::new();
    KEYS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A command that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Open,
    GetHandles(HandleClass),
    Flush(TpmHandle),
    CreatePrimary,
    ReadPublic,
    Sign,
    Close,
}

#[derive(Debug)]
struct LoadedObject {
    key: Arc<RsaPrivateKey>,
    public: PublicArea,
}

#[derive(Debug)]
struct SimState {
    owner_seed: [u8; 32],
    device_paths: HashSet<String>,
    object_slots: usize,
    objects: BTreeMap<TpmHandle, LoadedObject>,
    sessions: BTreeMap<TpmHandle, HandleClass>,
    next_handle: HashMap<HandleClass, TpmHandle>,
    faults: Vec<Fault>,
    opens: usize,
    closes: usize,
    signatures: usize,
}

impl SimState {
    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }

    fn allocate(&mut self, class: HandleClass) -> TpmHandle {
        let next = self
            .next_handle
            .entry(class)
            .or_insert_with(|| class.first_handle());
        let handle = *next;
        *next += 1;
        handle
    }
}

/// In-memory TPM for development and tests
#[derive(Debug, Clone)]
pub struct SimulatedTpm {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTpm {
    /// A TPM reachable at `/dev/tpmrm0` with the default owner seed
    pub fn new() -> Self {
        Self::with_owner_seed(DEFAULT_OWNER_SEED)
    }

    /// A TPM whose owner hierarchy derives a different set of keys
    pub fn with_owner_seed(owner_seed: [u8; 32]) -> Self {
        let state = SimState {
            owner_seed,
            device_paths: HashSet::from([DEFAULT_TPM_DEVICE.to_string()]),
            object_slots: DEFAULT_OBJECT_SLOTS,
            objects: BTreeMap::new(),
            sessions: BTreeMap::new(),
            next_handle: HashMap::new(),
            faults: Vec::new(),
            opens: 0,
            closes: 0,
            signatures: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Make the TPM reachable at an additional path
    pub fn with_device_path(self, path: impl Into<String>) -> Self {
        self.lock().device_paths.insert(path.into());
        self
    }

    pub fn with_object_slots(self, slots: usize) -> Self {
        self.lock().object_slots = slots;
        self
    }

    /// Fail the next matching command
    pub fn inject_fault(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    /// Leave a session handle behind, as a crashed client would
    pub fn leak_session(&self, class: HandleClass) -> TpmHandle {
        let mut state = self.lock();
        let handle = state.allocate(class);
        state.sessions.insert(handle, class);
        handle
    }

    pub fn transient_handles(&self) -> Vec<TpmHandle> {
        self.lock().objects.keys().copied().collect()
    }

    pub fn session_handles(&self, class: HandleClass) -> Vec<TpmHandle> {
        self.lock()
            .sessions
            .iter()
            .filter(|(_, c)| **c == class)
            .map(|(h, _)| *h)
            .collect()
    }

    /// Connections opened so far
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Connections closed so far
    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Successful sign commands so far
    pub fn signatures(&self) -> usize {
        self.lock().signatures
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl TpmDevice for SimulatedTpm {
    type Session = SimulatedSession;

    fn open(&self, path: &str) -> CommandResult<Self::Session> {
        let mut state = self.lock();
        if state.take_fault(Fault::Open) {
            return Err(CommandError::new("device busy"));
        }
        if !state.device_paths.contains(path) {
            return Err(CommandError::new(format!(
                "open {path}: no such file or directory"
            )));
        }
        state.opens += 1;
        debug!("simulated TPM opened at {}", path);

        Ok(SimulatedSession {
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

/// One connection to a [`SimulatedTpm`]
#[derive(Debug)]
pub struct SimulatedSession {
    state: Arc<Mutex<SimState>>,
    closed: bool,
}

impl SimulatedSession {
    fn lock(&self) -> CommandResult<MutexGuard<'_, SimState>> {
        if self.closed {
            return Err(CommandError::new("connection already closed"));
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn derive_primary(owner_seed: &[u8; 32], template: &KeyTemplate) -> CommandResult<Arc<RsaPrivateKey>> {
    let seed: [u8; 32] = Sha256::new()
        .chain_update(owner_seed)
        .chain_update(template.digest())
        .finalize()
        .into();

    let mut keys = derived_keys()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(key) = keys.get(&seed) {
        return Ok(Arc::clone(key));
    }

    let mut rng = StdRng::from_seed(seed);
    let exponent = rsa::BigUint::from_bytes_be(&template.effective_exponent().to_be_bytes());
    let key = RsaPrivateKey::new_with_exp(&mut rng, usize::from(template.key_bits), &exponent)
        .map_err(|e| CommandError::with_code(TPM_RC_FAILURE, format!("key derivation: {e}")))?;
    let key = Arc::new(key);
    keys.insert(seed, Arc::clone(&key));
    Ok(key)
}

fn public_area(template: &KeyTemplate, key: &RsaPrivateKey) -> PublicArea {
    let modulus = key.n().to_bytes_be();
    let digest = Sha256::new()
        .chain_update(template.digest())
        .chain_update(&modulus)
        .finalize();

    let mut name = template.name_alg.tpm_alg_id().to_be_bytes().to_vec();
    name.extend_from_slice(&digest);

    PublicArea {
        modulus,
        exponent: template.exponent,
        name,
    }
}

impl TpmSession for SimulatedSession {
    fn get_handles(&mut self, class: HandleClass) -> CommandResult<Vec<TpmHandle>> {
        let mut state = self.lock()?;
        if state.take_fault(Fault::GetHandles(class)) {
            return Err(CommandError::new(format!("capability query for {class} failed")));
        }
        let handles = match class {
            HandleClass::Transient => state.objects.keys().copied().collect(),
            _ => state
                .sessions
                .iter()
                .filter(|(_, c)| **c == class)
                .map(|(h, _)| *h)
                .collect(),
        };
        Ok(handles)
    }

    fn flush_context(&mut self, handle: TpmHandle) -> CommandResult<()> {
        let mut state = self.lock()?;
        if state.take_fault(Fault::Flush(handle)) {
            return Err(CommandError::with_code(TPM_RC_FAILURE, "flush rejected"));
        }
        let removed = state.objects.remove(&handle).is_some() || state.sessions.remove(&handle).is_some();
        if removed {
            Ok(())
        } else {
            Err(CommandError::with_code(
                TPM_RC_HANDLE,
                format!("handle 0x{handle:08x} not loaded"),
            ))
        }
    }

    fn create_primary(&mut self, template: &KeyTemplate) -> CommandResult<(TpmHandle, PublicArea)> {
        let mut state = self.lock()?;
        if state.take_fault(Fault::CreatePrimary) {
            return Err(CommandError::with_code(TPM_RC_FAILURE, "create primary failed"));
        }
        if state.objects.len() >= state.object_slots {
            return Err(CommandError::with_code(
                TPM_RC_OBJECT_MEMORY,
                "out of memory for object contexts",
            ));
        }

        let key = derive_primary(&state.owner_seed, template)?;
        let public = public_area(template, &key);
        let handle = state.allocate(HandleClass::Transient);
        state.objects.insert(
            handle,
            LoadedObject {
                key,
                public: public.clone(),
            },
        );
        Ok((handle, public))
    }

    fn read_public(&mut self, handle: TpmHandle) -> CommandResult<PublicArea> {
        let mut state = self.lock()?;
        if state.take_fault(Fault::ReadPublic) {
            return Err(CommandError::with_code(TPM_RC_FAILURE, "read public failed"));
        }
        state
            .objects
            .get(&handle)
            .map(|object| object.public.clone())
            .ok_or_else(|| {
                CommandError::with_code(TPM_RC_HANDLE, format!("handle 0x{handle:08x} not loaded"))
            })
    }

    fn sign(
        &mut self,
        handle: TpmHandle,
        message: &[u8],
        template: &KeyTemplate,
    ) -> CommandResult<Vec<u8>> {
        let mut state = self.lock()?;
        if state.take_fault(Fault::Sign) {
            return Err(CommandError::with_code(TPM_RC_FAILURE, "sign failed"));
        }
        let key = state
            .objects
            .get(&handle)
            .map(|object| Arc::clone(&object.key))
            .ok_or_else(|| {
                CommandError::with_code(TPM_RC_HANDLE, format!("handle 0x{handle:08x} not loaded"))
            })?;

        let digest = template.scheme.hash().digest(message);
        let signature = match template.scheme {
            SignatureScheme::RsaSsa(hash) => key.sign(pkcs1v15_padding(hash), &digest),
            SignatureScheme::RsaPss(hash) => {
                key.sign_with_rng(&mut rand::thread_rng(), pss_padding(hash), &digest)
            }
        }
        .map_err(|e| CommandError::with_code(TPM_RC_FAILURE, e.to_string()))?;

        state.signatures += 1;
        Ok(signature)
    }

    fn close(&mut self) -> CommandResult<()> {
        let mut state = self.lock()?;
        if state.take_fault(Fault::Close) {
            return Err(CommandError::new("close failed"));
        }
        state.closes += 1;
        drop(state);
        self.closed = true;
        Ok(())
    }
}
