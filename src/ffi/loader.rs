//! Dynamic Library Loader
//!
//! Safe wrapper around libloading for opening shared libraries and
//! resolving exported symbols.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::dispatch::ForeignFunction;
use super::error::{FfiError, FfiResult};
use super::types::{Declaration, Signature};

struct LibraryInner {
    /// Name the library was requested by
    name: String,
    /// File that was loaded, when found through the search paths
    path: Option<PathBuf>,
    /// The loaded library handle
    handle: libloading::Library,
    /// Cached symbol addresses
    symbols: RwLock<HashMap<String, usize>>,
}

/// An open shared library.
///
/// Clones share one OS handle; foreign functions created from a library
/// hold a clone, so the library stays loaded while they exist.
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

impl Library {
    /// Open a library using the platform default search paths
    pub fn open(name: &str) -> FfiResult<Self> {
        Self::open_with(name, &default_search_paths())
    }

    /// Open a library, searching `search_paths` before the OS loader.
    ///
    /// A file found on the search paths that fails to load is `LoadFailed`.
    /// Otherwise the bare name goes to the OS loader, and failure there is
    /// `NotFound`.
    pub fn open_with(name: &str, search_paths: &[PathBuf]) -> FfiResult<Self> {
        let (handle, path) = match find_library(name, search_paths) {
            Some(path) => {
                // Safety: loading runs the library's initializers; the caller
                // chose to trust this library.
                let handle = unsafe { libloading::Library::new(&path) }.map_err(|e| {
                    FfiError::LoadFailed {
                        library: path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                (handle, Some(path))
            }
            None => {
                let handle = unsafe { libloading::Library::new(name) }.map_err(|e| {
                    FfiError::NotFound {
                        library: name.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                (handle, None)
            }
        };

        debug!(library = name, path = ?path, "opened library");
        Ok(Self {
            inner: Arc::new(LibraryInner {
                name: name.to_string(),
                path,
                handle,
                symbols: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Name the library was opened with
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// File that was loaded, if it came from the search paths
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Resolve an exported symbol to its address
    pub fn resolve(&self, symbol: &str) -> FfiResult<usize> {
        if let Some(&addr) = self.inner.symbols.read().get(symbol) {
            return Ok(addr);
        }

        let c_name =
            CString::new(symbol).map_err(|_| FfiError::InvalidSymbol(symbol.to_string()))?;

        // Safety: the address is only handed out as a plain integer; it is
        // called through a plan whose signature the caller asserts.
        let addr = unsafe {
            let sym: libloading::Symbol<*const ()> = self
                .inner
                .handle
                .get(c_name.as_bytes_with_nul())
                .map_err(|e| FfiError::SymbolNotFound {
                    library: self.inner.name.clone(),
                    symbol: symbol.to_string(),
                    reason: e.to_string(),
                })?;
            *sym as usize
        };
        if addr == 0 {
            return Err(FfiError::SymbolNotFound {
                library: self.inner.name.clone(),
                symbol: symbol.to_string(),
                reason: "symbol resolves to null".to_string(),
            });
        }

        self.inner.symbols.write().insert(symbol.to_string(), addr);
        Ok(addr)
    }

    /// Bind an exported function to a signature
    ///
    /// # Safety
    ///
    /// `signature` must match the function's real signature.
    pub unsafe fn function(&self, symbol: &str, signature: &Signature) -> FfiResult<ForeignFunction> {
        let address = self.resolve(symbol)?;
        Ok(ForeignFunction::new(address, signature)?.with_library(symbol, self.clone()))
    }

    /// Bind a function from a C-style declaration such as
    /// `"double strtod(const char*, ptr)"`.
    ///
    /// # Safety
    ///
    /// The declaration must match the function's real signature.
    pub unsafe fn declare(&self, declaration: &str) -> FfiResult<ForeignFunction> {
        let decl = Declaration::parse(declaration).map_err(FfiError::InvalidDeclaration)?;
        self.function(&decl.name, &decl.signature)
    }

    /// Release this handle.
    ///
    /// The OS library is unloaded only when this was the last clone;
    /// returns whether that happened.
    pub fn close(self) -> bool {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => {
                let name = inner.name;
                match inner.handle.close() {
                    Ok(()) => {
                        debug!(library = %name, "closed library");
                        true
                    }
                    Err(e) => {
                        warn!(library = %name, error = %e, "failed to close library");
                        false
                    }
                }
            }
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.inner.name)
            .field("path", &self.inner.path)
            .finish()
    }
}

/// Library loader with search paths
pub struct LibraryLoader {
    /// Search paths for libraries
    search_paths: Vec<PathBuf>,
    /// Loaded libraries
    libraries: HashMap<String, Library>,
}

impl LibraryLoader {
    /// Create a new library loader
    pub fn new() -> Self {
        Self {
            search_paths: default_search_paths(),
            libraries: HashMap::new(),
        }
    }

    /// Create a loader with explicit search paths, optionally followed by
    /// the platform defaults
    pub fn with_search_paths(paths: Vec<PathBuf>, include_defaults: bool) -> Self {
        let mut search_paths = paths;
        if include_defaults {
            search_paths.extend(default_search_paths());
        }
        Self {
            search_paths,
            libraries: HashMap::new(),
        }
    }

    /// Add a search path
    pub fn add_search_path(&mut self, path: impl AsRef<Path>) {
        self.search_paths.push(path.as_ref().to_path_buf());
    }

    /// Current search paths, in lookup order
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find a library file by name
    pub fn find_library(&self, name: &str) -> Option<PathBuf> {
        find_library(name, &self.search_paths)
    }

    /// Load a library by name
    pub fn load(&mut self, name: &str) -> FfiResult<Library> {
        // Check if already loaded
        if let Some(lib) = self.libraries.get(name) {
            return Ok(lib.clone());
        }

        let library = Library::open_with(name, &self.search_paths)?;
        self.libraries.insert(name.to_string(), library.clone());
        Ok(library)
    }

    /// Get a loaded library
    pub fn get(&self, name: &str) -> Option<Library> {
        self.libraries.get(name).cloned()
    }

    /// Drop the loader's handle to a library
    pub fn unload(&mut self, name: &str) -> bool {
        match self.libraries.remove(name) {
            Some(library) => {
                library.close();
                true
            }
            None => false,
        }
    }

    /// List loaded libraries
    pub fn loaded_libraries(&self) -> Vec<&str> {
        self.libraries.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Filename of the platform's default system library
pub fn system_library_name() -> FfiResult<&'static str> {
    if cfg!(target_vendor = "apple") {
        Ok("/usr/lib/libSystem.B.dylib")
    } else if cfg!(target_os = "linux") {
        Ok("libc.so.6")
    } else if cfg!(target_os = "freebsd") {
        Ok("libc.so.7")
    } else if cfg!(target_os = "windows") {
        Ok("ucrtbase.dll")
    } else {
        Err(FfiError::UnsupportedPlatform(format!(
            "no default system library for {}",
            std::env::consts::OS
        )))
    }
}

/// Open the platform's default system library
pub fn system_library() -> FfiResult<Library> {
    Library::open(system_library_name()?)
}

/// Look for `name` as a path, then in each search path both verbatim and
/// with the platform's library filename convention applied.
fn find_library(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    if path.components().count() > 1 {
        return None;
    }

    let lib_name = library_filename(name);
    for search_path in search_paths {
        for candidate in [search_path.join(name), search_path.join(&lib_name)] {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Get the default library search paths for this platform
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // Current directory
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }

    // Standard system paths
    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/lib"));
        paths.push(PathBuf::from("/lib64"));
        paths.push(PathBuf::from("/usr/lib64"));

        // LD_LIBRARY_PATH
        if let Ok(ld_path) = std::env::var("LD_LIBRARY_PATH") {
            paths.extend(ld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));

        // DYLD_LIBRARY_PATH
        if let Ok(dyld_path) = std::env::var("DYLD_LIBRARY_PATH") {
            paths.extend(dyld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
    }

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from("C:\\Windows\\System32"));

        // PATH
        if let Ok(path) = std::env::var("PATH") {
            paths.extend(path.split(';').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
    }

    paths
}

/// Construct the platform-specific library filename
fn library_filename(name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        if name.starts_with("lib") && name.ends_with(".dylib") {
            name.to_string()
        } else {
            format!("lib{}.dylib", name)
        }
    }

    #[cfg(target_os = "windows")]
    {
        if name.ends_with(".dll") {
            name.to_string()
        } else {
            format!("{}.dll", name)
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        if name.starts_with("lib") && name.contains(".so") {
            name.to_string()
        } else {
            format!("lib{}.so", name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_filename() {
        #[cfg(target_os = "linux")]
        {
            assert_eq!(library_filename("m"), "libm.so");
            assert_eq!(library_filename("libc.so.6"), "libc.so.6");
        }
        #[cfg(target_os = "windows")]
        assert_eq!(library_filename("kernel32"), "kernel32.dll");
    }

    #[test]
    fn test_missing_library_is_not_found() {
        let err = Library::open("libdlbridge_does_not_exist_42.so").unwrap_err();
        assert!(matches!(err, FfiError::NotFound { .. }));
    }

    #[test]
    fn test_unloadable_file_is_load_failed() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join(library_filename("bogus"));
        std::fs::write(&bogus, b"definitely not an object file").unwrap();

        let err = Library::open_with("bogus", &[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, FfiError::LoadFailed { .. }));
    }

    #[test]
    fn test_search_paths_prefer_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(library_filename("thing"));
        std::fs::write(&file, b"").unwrap();

        let loader = LibraryLoader::with_search_paths(vec![dir.path().to_path_buf()], false);
        assert_eq!(loader.search_paths().len(), 1);
        assert_eq!(loader.find_library("thing"), Some(file));
        assert_eq!(loader.find_library("other"), None);
    }

    #[test]
    fn test_system_library_name() {
        if let Ok(name) = system_library_name() {
            assert!(!name.is_empty());
        }
    }
}
