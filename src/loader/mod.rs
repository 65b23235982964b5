//! Discovers, loads, and unloads external vision modules from shared
//! libraries.
//!
//! Plug-in contract: a shared object is a valid module iff it exports
//! `create(id: i32, tags: u16) -> *mut ModuleHandle` and
//! `destroy(handle: *mut ModuleHandle)`, where `ModuleHandle` is
//! `Box<dyn Module>` defined by this crate. Calling into a plug-in is
//! intrinsically unsafe; that unsafety is confined to this module — every
//! other component only ever sees a `Box<dyn Module>`.

mod watch;

pub use watch::{DirectoryWatcherGuard, WatchEvent};

use std::path::{Path, PathBuf};
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::errors::{Result, TvError};
use crate::modules::{Module, ModuleId};

/// The type plug-ins exchange across the FFI boundary: a boxed trait
/// object, one level of indirection deeper than the `Box` itself so the
/// C-shaped `create`/`destroy` signatures only ever move a thin pointer.
pub type ModuleHandle = Box<dyn Module>;

type CreateFn = unsafe extern "C" fn(id: ModuleId, tags: u16) -> *mut ModuleHandle;
type DestroyFn = unsafe extern "C" fn(handle: *mut ModuleHandle);

struct LoadedLibrary {
    library: libloading::Library,
    open_count: usize,
}

/// Discovers, loads, and unloads modules from the configured user and
/// system module directories.
pub struct ModuleLoader {
    user_path: PathBuf,
    system_path: PathBuf,
    libraries: FxHashMap<PathBuf, LoadedLibrary>,
    module_libraries: FxHashMap<ModuleId, PathBuf>,
    last_error: parking_lot::Mutex<Option<TvError>>,
}

impl ModuleLoader {
    #[must_use]
    pub fn new(user_path: PathBuf, system_path: PathBuf) -> Self {
        Self {
            user_path,
            system_path,
            libraries: FxHashMap::default(),
            module_libraries: FxHashMap::default(),
            last_error: parking_lot::Mutex::new(None),
        }
    }

    fn search_dirs(&self) -> [&Path; 2] {
        [self.user_path.as_path(), self.system_path.as_path()]
    }

    /// Single-slot error state; destructive read, matching the plug-in
    /// loader's C heritage.
    pub fn last_error(&self) -> Option<TvError> {
        self.last_error.lock().take()
    }

    fn record_error(&self, err: TvError) -> TvError {
        // TvError has no Clone; stash a lightweight summary instead of the
        // original (which is about to be returned to the caller anyway).
        *self.last_error.lock() = Some(TvError::Internal(err.to_string()));
        err
    }

    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        let file_name = format!("{name}.{}", std::env::consts::DLL_EXTENSION);
        for dir in self.search_dirs() {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(self.record_error(TvError::ModuleUnknown(name.to_string())))
    }

    /// Walks the configured directories and reports every file that both
    /// has the platform shared-object extension and resolves both required
    /// symbols. Invalid files are logged and skipped, never returned as an
    /// error.
    #[must_use]
    pub fn list_available(&self) -> Vec<(PathBuf, String)> {
        let mut found = Vec::new();
        for dir in self.search_dirs() {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(std::env::consts::DLL_EXTENSION) {
                    continue;
                }
                match Self::probe(&path) {
                    Ok(()) => {
                        let name = path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or_default()
                            .to_string();
                        found.push((path, name));
                    }
                    Err(err) => {
                        log::warn!("skipping invalid module candidate {}: {err}", path.display());
                    }
                }
            }
        }
        found
    }

    fn probe(path: &Path) -> Result<()> {
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| TvError::ModuleDlopenFailed(path.display().to_string(), e))?;
        unsafe { library.get::<CreateFn>(b"create\0") }
            .map_err(|e| TvError::ModuleDlsymFailed(path.display().to_string(), e))?;
        unsafe { library.get::<DestroyFn>(b"destroy\0") }
            .map_err(|e| TvError::ModuleDlsymFailed(path.display().to_string(), e))?;
        Ok(())
    }

    /// Resolves `name` to a library, opens it (reusing an already-open
    /// library if another module of the same name is live), and invokes
    /// `create`.
    pub fn load(&mut self, name: &str, id: ModuleId, tags: u16) -> Result<Box<dyn Module>> {
        let path = self.resolve_path(name)?;

        if !self.libraries.contains_key(&path) {
            let library = unsafe { libloading::Library::new(&path) }
                .map_err(|e| self.record_error(TvError::ModuleDlopenFailed(name.to_string(), e)))?;
            self.libraries.insert(
                path.clone(),
                LoadedLibrary {
                    library,
                    open_count: 0,
                },
            );
        }

        let entry = self.libraries.get_mut(&path).expect("just inserted");
        let create: libloading::Symbol<CreateFn> = unsafe { entry.library.get(b"create\0") }
            .map_err(|e| self.record_error(TvError::ModuleDlsymFailed(name.to_string(), e)))?;

        let raw = unsafe { create(id, tags) };
        if raw.is_null() {
            return Err(self.record_error(TvError::Internal(format!("create returned null for '{name}'"))));
        }
        entry.open_count += 1;
        self.module_libraries.insert(id, path);

        let boxed_handle: Box<ModuleHandle> = unsafe { Box::from_raw(raw) };
        Ok(*boxed_handle)
    }

    /// Invokes the module's `destroy`, then unloads the backing library if
    /// this was the last module it backed (symmetric open/close counts).
    pub fn destroy(&mut self, id: ModuleId, module: Box<dyn Module>) -> Result<()> {
        let path = self
            .module_libraries
            .remove(&id)
            .ok_or_else(|| self.record_error(TvError::ModuleUnknown(id.to_string())))?;

        let entry = self
            .libraries
            .get_mut(&path)
            .ok_or_else(|| self.record_error(TvError::ModuleUnknown(id.to_string())))?;

        let destroy: libloading::Symbol<DestroyFn> = unsafe { entry.library.get(b"destroy\0") }
            .map_err(|e| self.record_error(TvError::ModuleDlsymFailed(path.display().to_string(), e)))?;

        let raw = Box::into_raw(Box::new(module));
        unsafe { destroy(raw) };

        entry.open_count -= 1;
        if entry.open_count == 0 {
            self.libraries.remove(&path);
        }
        Ok(())
    }

    /// Starts a debounced watcher over both configured directories;
    /// dropping the returned guard stops it. `debounce` should be at least
    /// 100ms to avoid reacting to partial writes mid-copy.
    pub fn update_on_changes(
        &self,
        debounce: Duration,
        cb: impl FnMut(&Path, &Path, WatchEvent) + Send + 'static,
    ) -> Result<DirectoryWatcherGuard> {
        let dirs = vec![self.user_path.clone(), self.system_path.clone()];
        watch::watch(dirs, debounce, cb)
            .map_err(|e| TvError::Internal(format!("failed to start module directory watcher: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_reports_module_unknown_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        assert!(loader.resolve_path("nonexistent").is_err());
    }

    #[test]
    fn list_available_is_empty_for_empty_directories() {
        let user = tempfile::tempdir().unwrap();
        let system = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(user.path().to_path_buf(), system.path().to_path_buf());
        assert!(loader.list_available().is_empty());
    }

    #[test]
    fn list_available_skips_files_with_the_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("not_a_module.txt"), b"hello").unwrap();
        let loader = ModuleLoader::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        assert!(loader.list_available().is_empty());
    }

    #[test]
    fn list_available_skips_a_same_extension_file_that_is_not_a_real_library() {
        // No compiled plug-in fixture exists in this workspace (there is no
        // real "colormatch" module); a garbage file with the right extension
        // must still fail `probe`'s dlopen and be skipped, not crash.
        let dir = tempfile::tempdir().unwrap();
        let fake_so = dir.path().join(format!("bogus.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&fake_so, b"not an elf or mach-o or pe file").unwrap();
        let loader = ModuleLoader::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        assert!(loader.list_available().is_empty());
    }

    #[test]
    fn last_error_is_cleared_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        let _ = loader.resolve_path("nope");
        // resolve_path doesn't itself record into last_error (only load/destroy do);
        // exercise the slot directly to pin its destructive-read contract.
        *loader.last_error.lock() = Some(TvError::NotImplemented("probe".into()));
        assert!(loader.last_error().is_some());
        assert!(loader.last_error().is_none());
    }
}
