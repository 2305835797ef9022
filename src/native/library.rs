use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use tracing::debug;

use super::{RefFunction, UnrefFunction};
use crate::error::BridgeError;
use crate::types::CustomLifetime;

/// Shared libraries providing custom lifetime hooks, loaded once per name.
pub struct NativeLibraries {
    root: PathBuf,
    libraries: HashMap<String, Arc<Library>>,
}

impl NativeLibraries {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            libraries: HashMap::new(),
        }
    }

    fn locate(&self, name: &str) -> PathBuf {
        let found = self.root.read_dir().ok().and_then(|entries| {
            entries
                .filter_map(Result::ok)
                .find(|d| d.file_name().to_string_lossy().starts_with(name))
                .map(|d| d.path())
        });
        found.unwrap_or_else(|| PathBuf::from(name))
    }

    pub fn get_library(&mut self, name: &str) -> Result<Arc<Library>, BridgeError> {
        if let Some(library) = self.libraries.get(name) {
            return Ok(library.clone());
        }
        let path = self.locate(name);
        // SAFETY: loading runs the library's initializers; hook libraries are trusted.
        let library = unsafe { Library::new(&path) }.map_err(|e| BridgeError::Library {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        debug!(library = name, path = %path.display(), "loaded native library");
        let library = Arc::new(library);
        self.libraries.insert(name.to_string(), library.clone());
        Ok(library)
    }

    /// Resolves refsink/unref hook symbols into a [`CustomLifetime`] that keeps the
    /// library loaded.
    pub fn lifetime_hooks(
        &mut self,
        library: &str,
        refsink: Option<&str>,
        unref: Option<&str>,
    ) -> Result<CustomLifetime, BridgeError> {
        let lib = self.get_library(library)?;
        let missing = |symbol: &str, e: libloading::Error| BridgeError::Library {
            name: format!("{library}::{symbol}"),
            reason: e.to_string(),
        };

        let refsink = match refsink {
            Some(symbol) => {
                // SAFETY: the symbol is declared to have the C ref signature.
                let sym: Symbol<RefFunction> =
                    unsafe { lib.get(symbol.as_bytes()) }.map_err(|e| missing(symbol, e))?;
                Some(*sym)
            }
            None => None,
        };
        let unref = match unref {
            Some(symbol) => {
                // SAFETY: the symbol is declared to have the C unref signature.
                let sym: Symbol<UnrefFunction> =
                    unsafe { lib.get(symbol.as_bytes()) }.map_err(|e| missing(symbol, e))?;
                Some(*sym)
            }
            None => None,
        };

        Ok(CustomLifetime {
            refsink,
            unref,
            keepalive: Some(lib),
        })
    }
}
