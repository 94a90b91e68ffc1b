use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};

use super::backend::Detector;
use super::backends::{StubDetector, STUB_SCHEME};

type DetectorFactory = fn() -> Box<dyn Detector>;

/// Maps model locations to the detector backend able to load them.
///
/// Locations of the form `scheme://...` select a backend by scheme. Plain file
/// paths go to the file backend, when one is registered.
pub struct DetectorRegistry {
    schemes: BTreeMap<String, DetectorFactory>,
    file_backend: Option<DetectorFactory>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            schemes: BTreeMap::new(),
            file_backend: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_scheme(STUB_SCHEME, || Box::new(StubDetector::new()));
        registry
    }

    /// Register a backend for locations starting with `scheme` (e.g. `"stub://"`).
    pub fn register_scheme(&mut self, scheme: &str, factory: DetectorFactory) {
        self.schemes.insert(scheme.to_string(), factory);
    }

    /// Register the backend used for plain model file paths.
    pub fn register_file_backend(&mut self, factory: DetectorFactory) {
        self.file_backend = Some(factory);
    }

    /// List registered schemes.
    pub fn schemes(&self) -> Vec<String> {
        self.schemes.keys().cloned().collect()
    }

    /// Construct an unloaded detector for `model_path`.
    pub fn resolve(&self, model_path: &str) -> Result<Box<dyn Detector>> {
        if let Some(factory) = self
            .schemes
            .iter()
            .find(|(scheme, _)| model_path.starts_with(scheme.as_str()))
            .map(|(_, factory)| factory)
        {
            return Ok(factory());
        }

        if model_path.contains("://") {
            return Err(anyhow!(
                "no detector backend for '{}' (registered: {})",
                model_path,
                self.schemes().join(", ")
            ));
        }
        if !Path::new(model_path).exists() {
            return Err(anyhow!("model file does not exist: {}", model_path));
        }
        match self.file_backend {
            Some(factory) => Ok(factory()),
            None => Err(anyhow!(
                "no file-based detector backend compiled in; cannot load {}",
                model_path
            )),
        }
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
