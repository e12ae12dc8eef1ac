use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use super::{RsaPkcs1Method, SigningMethod};

/// String-keyed table of signing methods, owned by the application
///
/// Registering under an existing name replaces the previous method for every
/// later lookup through this registry.
#[derive(Default)]
pub struct SigningMethodRegistry {
    methods: RwLock<HashMap<String, Arc<dyn SigningMethod>>>,
}

impl SigningMethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the software RS256, RS384 and RS512 methods
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(RsaPkcs1Method::rs256()));
        registry.register(Arc::new(RsaPkcs1Method::rs384()));
        registry.register(Arc::new(RsaPkcs1Method::rs512()));
        registry
    }

    /// Register `method` under its own `alg`, returning the method it replaced
    pub fn register(&self, method: Arc<dyn SigningMethod>) -> Option<Arc<dyn SigningMethod>> {
        let alg = method.alg().to_string();
        let previous = self
            .methods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alg.clone(), method);
        if previous.is_some() {
            info!("Signing method {} replaced", alg);
        }
        previous
    }

    pub fn get(&self, alg: &str) -> Option<Arc<dyn SigningMethod>> {
        self.methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alg)
            .cloned()
    }

    /// Registered algorithm names, sorted
    pub fn algorithms(&self) -> Vec<String> {
        let mut algs: Vec<String> = self
            .methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        algs.sort();
        algs
    }
}

impl fmt::Debug for SigningMethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningMethodRegistry")
            .field("algorithms", &self.algorithms())
            .finish()
    }
}
