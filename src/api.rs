//! The process-facing façade: every public verb either mutates runtime
//! state and reports a [`ResultCode`], or reads and returns a typed value
//! wrapped in [`Result`]. No `TvError` escapes past this module.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::JoinHandle;

use crate::camera::{CameraAdapter, CameraHandle, CameraProperties};
use crate::config::RuntimeConfig;
use crate::errors::{Result, ResultCode, result_string};
use crate::loader::ModuleLoader;
use crate::modules::{ModuleId, ModuleKind, ModuleResult, ParameterValue, ResultKind};
use crate::scene::SceneId;
use crate::scheduler::{Callback, Scheduler, SchedulerHandle, SchedulerStats};

/// Owns the scheduler thread for the lifetime of the process (or test).
/// Construction acquires the camera and spawns the scheduler in `Paused`
/// state; `quit` runs the deterministic shutdown sequence and joins the
/// thread.
pub struct Api {
    handle: SchedulerHandle,
    join: Option<JoinHandle<()>>,
    config: RuntimeConfig,
    next_module_id: AtomicI32,
}

impl Api {
    /// Builds the runtime around `camera`, resolving module directories
    /// from `config`. The scheduler thread starts immediately, paused.
    pub fn new(camera: Box<dyn CameraAdapter>, config: RuntimeConfig) -> Result<Self> {
        let mut camera_handle = CameraHandle::new(camera);
        camera_handle.acquire()?;

        let loader = ModuleLoader::new(config.user_prefix.modules_dir(), config.system_prefix.modules_dir());
        let (scheduler, handle) = Scheduler::new(camera_handle, loader, config.clone());
        let join = std::thread::spawn(move || scheduler.run());

        Ok(Self {
            handle,
            join: Some(join),
            config,
            next_module_id: AtomicI32::new(1),
        })
    }

    fn as_code(result: Result<()>) -> ResultCode {
        match result {
            Ok(()) => ResultCode::Ok,
            Err(err) => {
                log::warn!("api call failed: {err}");
                ResultCode::from(err)
            }
        }
    }

    #[must_use]
    pub fn result_string(code: ResultCode) -> &'static str {
        result_string(code)
    }

    pub fn start(&self) -> ResultCode {
        Self::as_code(self.handle.start())
    }

    pub fn stop(&self) -> ResultCode {
        Self::as_code(self.handle.stop())
    }

    /// Brings the runtime up without running any pass: the scheduler thread
    /// is already live from construction, so this only confirms the state
    /// is `Paused` rather than leaving it wherever a prior `start`/`stop`
    /// left it.
    pub fn start_idle(&self) -> ResultCode {
        Self::as_code(self.handle.stop())
    }

    /// Runs the deterministic shutdown sequence (stop, drain commands,
    /// destroy modules, release camera, unload libraries) and joins the
    /// scheduler thread. Idempotent: a second call is a no-op.
    pub fn quit(&mut self) -> ResultCode {
        let code = Self::as_code(self.handle.quit());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("scheduler thread panicked during shutdown");
                return ResultCode::InternalError;
            }
        }
        code
    }

    pub fn set_framesize(&self, width: u32, height: u32) -> ResultCode {
        Self::as_code(self.handle.set_framesize(width, height))
    }

    pub fn get_resolution(&self) -> Result<CameraProperties> {
        self.handle.get_resolution()
    }

    /// Starts a module by name. `id` selects the module id explicitly; pass
    /// `None` to have the façade allocate the next free one. Returns the id
    /// actually used.
    pub fn module_start(&self, name: &str, id: Option<ModuleId>, tags: ModuleKind) -> Result<ModuleId> {
        let id = id.unwrap_or_else(|| self.next_module_id.fetch_add(1, Ordering::Relaxed));
        self.handle.module_start(name, id, tags.bits())?;
        Ok(id)
    }

    pub fn module_restart(&self, id: ModuleId) -> ResultCode {
        Self::as_code(self.handle.module_restart(id))
    }

    pub fn module_remove(&self, id: ModuleId) -> ResultCode {
        Self::as_code(self.handle.module_remove(id))
    }

    pub fn remove_all_modules(&self) -> ResultCode {
        Self::as_code(self.handle.remove_all_modules())
    }

    pub fn set_parameter(&self, id: ModuleId, name: &str, value: ParameterValue) -> ResultCode {
        Self::as_code(self.handle.set_parameter(id, name, value))
    }

    pub fn get_parameter(&self, id: ModuleId, name: &str) -> Result<ParameterValue> {
        self.handle.get_parameter(id, name)
    }

    pub fn get_result(&self, id: ModuleId) -> Result<ModuleResult> {
        self.handle.get_result(id)
    }

    pub fn set_callback(&self, id: ModuleId, kind: ResultKind, callback: Callback) -> ResultCode {
        Self::as_code(self.handle.set_callback(id, kind, callback))
    }

    pub fn enable_default_callback(&self, callback: Option<Callback>) -> ResultCode {
        Self::as_code(self.handle.enable_default_callback(callback))
    }

    pub fn scene_from_module(&self, root: ModuleId) -> Result<SceneId> {
        self.handle.scene_from_module(root)
    }

    pub fn scene_add_module(&self, scene: SceneId, module: ModuleId) -> ResultCode {
        Self::as_code(self.handle.scene_add_module(scene, module))
    }

    pub fn scene_remove(&self, scene: SceneId) -> ResultCode {
        Self::as_code(self.handle.scene_remove(scene))
    }

    pub fn enumerate_available_modules(&self) -> Result<Vec<(PathBuf, String)>> {
        self.handle.enumerate_available_modules()
    }

    #[must_use]
    pub fn user_module_load_path(&self) -> PathBuf {
        self.config.user_prefix.modules_dir()
    }

    #[must_use]
    pub fn system_module_load_path(&self) -> PathBuf {
        self.config.system_prefix.modules_dir()
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.handle.stats()
    }
}

impl Drop for Api {
    fn drop(&mut self) {
        if self.join.is_some() {
            let _ = self.quit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::fake::FakeCamera;
    use crate::image::ColorSpace;

    fn test_api() -> (Api, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.user_prefix = crate::config::Prefix::new(dir.path().to_path_buf());
        config.system_prefix = crate::config::Prefix::new(std::path::PathBuf::from("."));
        let camera = FakeCamera::new(2, 2, ColorSpace::Bgr888, vec![0; 12]);
        (Api::new(Box::new(camera), config).unwrap(), dir)
    }

    #[test]
    fn fresh_api_starts_paused_and_quits_cleanly() {
        let (mut api, _dir) = test_api();
        assert_eq!(api.start(), ResultCode::Ok);
        assert_eq!(api.stop(), ResultCode::Ok);
        assert_eq!(api.quit(), ResultCode::Ok);
    }

    #[test]
    fn unknown_parameter_read_is_unconfigured_id() {
        let (api, _dir) = test_api();
        let err = api.get_parameter(999, "anything").unwrap_err();
        assert_eq!(ResultCode::from(err), ResultCode::UnconfiguredId);
    }

    #[test]
    fn module_start_without_explicit_id_autoallocates() {
        let (api, _dir) = test_api();
        let err = api.module_start("nonexistent", None, ModuleKind::EXECUTABLE).unwrap_err();
        assert_eq!(ResultCode::from(err), ResultCode::ModuleUnknown);
    }
}
