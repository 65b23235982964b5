//! The scheduler: owns runtime cadence and turns the crank of the whole
//! pipeline (frame acquisition, scene/registry execution, result delivery,
//! tag-driven transitions).

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::camera::{CameraHandle, FrameBus};
use crate::config::RuntimeConfig;
use crate::errors::{Result, TvError};
use crate::loader::{DirectoryWatcherGuard, ModuleLoader};
use crate::modules::{Module, ModuleId, ModuleKind, ModuleResult, ParameterValue, ResultKind};
use crate::registry::SharedResource;
use crate::scene::{SceneId, SceneTrees};

/// `Running`/`Paused`/`Stopped`, mirrored into an `AtomicU8` so
/// `SchedulerHandle::state()` never has to round-trip the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Paused,
    Stopped,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SchedulerState::Running,
            1 => SchedulerState::Paused,
            _ => SchedulerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SchedulerState::Running => 0,
            SchedulerState::Paused => 1,
            SchedulerState::Stopped => 2,
        }
    }
}

pub type Callback = Box<dyn FnMut(ModuleId, ModuleResult) + Send>;

enum Command {
    Start,
    Stop,
    Quit,
    ModuleStart {
        name: String,
        id: ModuleId,
        tags: u16,
        reply: flume::Sender<Result<()>>,
    },
    ModuleRestart {
        id: ModuleId,
        reply: flume::Sender<Result<()>>,
    },
    ModuleRemove {
        id: ModuleId,
        reply: flume::Sender<Result<()>>,
    },
    RemoveAllModules {
        reply: flume::Sender<Result<()>>,
    },
    SceneFromModule {
        root: ModuleId,
        reply: flume::Sender<Result<SceneId>>,
    },
    SceneAddModule {
        scene: SceneId,
        module: ModuleId,
        reply: flume::Sender<Result<()>>,
    },
    SceneRemove {
        scene: SceneId,
        reply: flume::Sender<Result<()>>,
    },
    SetCallback {
        id: ModuleId,
        kind: ResultKind,
        callback: Callback,
        reply: flume::Sender<Result<()>>,
    },
    EnableDefaultCallback {
        callback: Option<Callback>,
    },
    EnumerateAvailableModules {
        reply: flume::Sender<Vec<(std::path::PathBuf, String)>>,
    },
    SetFramesize {
        width: u32,
        height: u32,
        reply: flume::Sender<Result<()>>,
    },
    GetResolution {
        reply: flume::Sender<crate::camera::CameraProperties>,
    },
}

/// Read-only scheduler telemetry, for the ambient logging/observability
/// surface rather than any behavior the scheduler itself depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub pass_count: u64,
    pub last_pass_duration: Duration,
}

/// Cheap, cloneable front door Api handlers use to reach the scheduler
/// thread. Reads against the registry go straight through `SharedResource`'s
/// own synchronization; everything that must be serialized with the tick
/// (loader and scene-tree mutations, callback registration) is posted as a
/// [`Command`] and applied the next time the scheduler drains its queue.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) registry: Arc<SharedResource<ModuleId, Box<dyn Module>>>,
    tx: flume::Sender<Command>,
    state: Arc<AtomicU8>,
    pass_count: Arc<AtomicU64>,
    last_pass_duration_us: Arc<AtomicU64>,
}

impl SchedulerHandle {
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pass_count: self.pass_count.load(Ordering::Relaxed),
            last_pass_duration: Duration::from_micros(self.last_pass_duration_us.load(Ordering::Relaxed)),
        }
    }

    /// Blocks for at most one poll interval for the scheduler to apply a
    /// command; returns `EXEC_THREAD_FAILURE` if it never replies.
    fn call<T>(&self, make: impl FnOnce(flume::Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.tx
            .send(make(reply_tx))
            .map_err(|_| TvError::ExecThreadFailure)?;
        reply_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| TvError::ExecThreadFailure)?
    }

    pub fn start(&self) -> Result<()> {
        self.tx.send(Command::Start).map_err(|_| TvError::ExecThreadFailure)
    }

    pub fn stop(&self) -> Result<()> {
        self.tx.send(Command::Stop).map_err(|_| TvError::ExecThreadFailure)
    }

    pub fn quit(&self) -> Result<()> {
        self.tx.send(Command::Quit).map_err(|_| TvError::ExecThreadFailure)
    }

    pub fn module_start(&self, name: &str, id: ModuleId, tags: u16) -> Result<()> {
        self.call(|reply| Command::ModuleStart {
            name: name.to_string(),
            id,
            tags,
            reply,
        })
    }

    pub fn module_restart(&self, id: ModuleId) -> Result<()> {
        self.call(|reply| Command::ModuleRestart { id, reply })
    }

    pub fn module_remove(&self, id: ModuleId) -> Result<()> {
        self.call(|reply| Command::ModuleRemove { id, reply })
    }

    pub fn remove_all_modules(&self) -> Result<()> {
        self.call(|reply| Command::RemoveAllModules { reply })
    }

    pub fn scene_from_module(&self, root: ModuleId) -> Result<SceneId> {
        self.call(|reply| Command::SceneFromModule { root, reply })
    }

    pub fn scene_add_module(&self, scene: SceneId, module: ModuleId) -> Result<()> {
        self.call(|reply| Command::SceneAddModule { scene, module, reply })
    }

    pub fn scene_remove(&self, scene: SceneId) -> Result<()> {
        self.call(|reply| Command::SceneRemove { scene, reply })
    }

    pub fn set_parameter(&self, id: ModuleId, name: &str, value: ParameterValue) -> Result<()> {
        self.registry
            .write(id, |module| module.set_parameter(name, value))
            .ok_or(TvError::UnconfiguredId(id))?
    }

    pub fn get_parameter(&self, id: ModuleId, name: &str) -> Result<ParameterValue> {
        self.registry
            .read(id, |module| module.get_parameter(name))
            .ok_or(TvError::UnconfiguredId(id))?
    }

    pub fn get_result(&self, id: ModuleId) -> Result<ModuleResult> {
        self.registry
            .read(id, Module::get_result)
            .ok_or(TvError::UnconfiguredId(id))
    }

    pub fn set_callback(&self, id: ModuleId, kind: ResultKind, callback: Callback) -> Result<()> {
        let current_kind = self
            .registry
            .read(id, |m| m.has_result().then(|| m.get_result().kind()))
            .flatten();
        if let Some(current) = current_kind {
            if current != kind {
                return Err(TvError::CallbackMismatch(id));
            }
        }
        self.call(|reply| Command::SetCallback {
            id,
            kind,
            callback,
            reply,
        })
    }

    pub fn enable_default_callback(&self, callback: Option<Callback>) -> Result<()> {
        self.tx
            .send(Command::EnableDefaultCallback { callback })
            .map_err(|_| TvError::ExecThreadFailure)
    }

    pub fn enumerate_available_modules(&self) -> Result<Vec<(std::path::PathBuf, String)>> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.tx
            .send(Command::EnumerateAvailableModules { reply: reply_tx })
            .map_err(|_| TvError::ExecThreadFailure)?;
        reply_rx.recv_timeout(Duration::from_secs(2)).map_err(|_| TvError::ExecThreadFailure)
    }

    pub fn set_framesize(&self, width: u32, height: u32) -> Result<()> {
        self.call(|reply| Command::SetFramesize { width, height, reply })
    }

    pub fn get_resolution(&self) -> Result<crate::camera::CameraProperties> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.tx
            .send(Command::GetResolution { reply: reply_tx })
            .map_err(|_| TvError::ExecThreadFailure)?;
        reply_rx.recv_timeout(Duration::from_secs(2)).map_err(|_| TvError::ExecThreadFailure)
    }

    /// Injects an already-constructed module straight into the registry,
    /// bypassing the loader entirely. There is no real plug-in `.so` in this
    /// workspace's test fixtures, so scheduling-behavior tests build a
    /// `modules::fake::FakeModule` and hand it to the scheduler this way.
    #[cfg(any(test, feature = "test-support"))]
    pub fn test_allocate_module(&self, id: ModuleId, module: Box<dyn Module>) -> Result<()> {
        self.registry.allocate(id, module)
    }
}

/// Owns the camera, loader, registry, and scene forest, and runs the main
/// loop on whatever thread calls [`Scheduler::run`].
pub struct Scheduler {
    registry: Arc<SharedResource<ModuleId, Box<dyn Module>>>,
    scene_trees: SceneTrees,
    loader: ModuleLoader,
    camera: CameraHandle,
    frame_bus: FrameBus,
    command_rx: flume::Receiver<Command>,
    state: Arc<AtomicU8>,
    config: RuntimeConfig,
    callbacks: FxHashMap<(ModuleId, ResultKind), Callback>,
    default_callback: Option<Callback>,
    pass_count: Arc<AtomicU64>,
    last_pass_duration_us: Arc<AtomicU64>,
    /// Kept alive for the scheduler's lifetime; dropping it stops the
    /// watcher thread. `None` if the watcher failed to start (e.g. a
    /// configured directory doesn't exist yet).
    _watcher_guard: Option<DirectoryWatcherGuard>,
}

impl Scheduler {
    #[must_use]
    pub fn new(camera: CameraHandle, loader: ModuleLoader, config: RuntimeConfig) -> (Self, SchedulerHandle) {
        let (tx, rx) = flume::unbounded();
        let registry = Arc::new(SharedResource::new());
        let state = Arc::new(AtomicU8::new(SchedulerState::Paused.as_u8()));
        let pass_count = Arc::new(AtomicU64::new(0));
        let last_pass_duration_us = Arc::new(AtomicU64::new(0));

        let handle = SchedulerHandle {
            registry: registry.clone(),
            tx,
            state: state.clone(),
            pass_count: pass_count.clone(),
            last_pass_duration_us: last_pass_duration_us.clone(),
        };

        let watcher_guard = loader
            .update_on_changes(config.watch_debounce, |dir, file, event| {
                log::info!("module directory watch: {event:?} {} in {}", file.display(), dir.display());
            })
            .map_err(|err| log::warn!("failed to start module directory watcher: {err}"))
            .ok();

        let scheduler = Self {
            registry,
            scene_trees: SceneTrees::new(),
            loader,
            camera,
            frame_bus: FrameBus::new(),
            command_rx: rx,
            state,
            config,
            callbacks: FxHashMap::default(),
            default_callback: None,
            pass_count,
            last_pass_duration_us,
            _watcher_guard: watcher_guard,
        };
        (scheduler, handle)
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Runs the scheduler loop until `quit()` is observed, then performs the
    /// deterministic shutdown sequence: drain commands, destroy every
    /// remaining module, release the camera, and let the loader unload any
    /// library whose last module just went away. Intended to be run on its
    /// own dedicated thread.
    pub fn run(mut self) {
        loop {
            self.drain_commands();
            match self.state() {
                SchedulerState::Stopped => break,
                SchedulerState::Paused => {
                    std::thread::sleep(self.config.min_idle_latency);
                }
                SchedulerState::Running => {
                    self.tick();
                }
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        log::info!("scheduler stopping, running shutdown sequence");
        self.drain_commands();
        for (id, module) in self.registry.drain() {
            if let Err(err) = self.loader.destroy(id, module) {
                log::warn!("failed to cleanly destroy module {id} during shutdown: {err}");
            }
        }
        if let Err(err) = self.camera.release() {
            log::warn!("camera release failed during shutdown: {err}");
        }
        log::info!("scheduler shutdown complete");
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Start => {
                if self.state() != SchedulerState::Stopped {
                    self.set_state(SchedulerState::Running);
                    log::info!("scheduler transitioning to Running");
                }
            }
            Command::Stop => {
                if self.state() == SchedulerState::Running {
                    self.set_state(SchedulerState::Paused);
                    log::info!("scheduler transitioning to Paused");
                }
            }
            Command::Quit => {
                self.set_state(SchedulerState::Stopped);
                log::info!("scheduler transitioning to Stopped");
            }
            Command::ModuleStart { name, id, tags, reply } => {
                let _ = reply.send(self.module_start(&name, id, tags));
            }
            Command::ModuleRestart { id, reply } => {
                let _ = reply.send(
                    self.registry
                        .write(id, |m| m.set_active(true))
                        .ok_or(TvError::UnconfiguredId(id)),
                );
            }
            Command::ModuleRemove { id, reply } => {
                let _ = reply.send(self.module_remove(id));
            }
            Command::RemoveAllModules { reply } => {
                let ids: Vec<ModuleId> = {
                    let mut ids = Vec::new();
                    self.registry.foreach(|id, _| ids.push(id));
                    ids
                };
                for id in ids {
                    let _ = self.module_remove(id);
                }
                let _ = reply.send(Ok(()));
            }
            Command::SceneFromModule { root, reply } => {
                let result = if self.registry.managed(root) {
                    Ok(self.scene_trees.scene_start(root))
                } else {
                    Err(TvError::UnconfiguredId(root))
                };
                let _ = reply.send(result);
            }
            Command::SceneAddModule { scene, module, reply } => {
                let result = if self.registry.managed(module) {
                    self.scene_trees.scene_add_module(scene, module)
                } else {
                    Err(TvError::ModuleUnknown(module.to_string()))
                };
                let _ = reply.send(result);
            }
            Command::SceneRemove { scene, reply } => {
                let _ = reply.send(self.scene_trees.scene_remove(scene));
            }
            Command::SetCallback { id, kind, callback, reply } => {
                self.callbacks.insert((id, kind), callback);
                let _ = reply.send(Ok(()));
            }
            Command::EnableDefaultCallback { callback } => {
                self.default_callback = callback;
            }
            Command::EnumerateAvailableModules { reply } => {
                let _ = reply.send(self.loader.list_available());
            }
            Command::SetFramesize { width, height, reply } => {
                let _ = reply.send(self.camera.configure(width, height));
            }
            Command::GetResolution { reply } => {
                let _ = reply.send(self.camera.get_properties());
            }
        }
    }

    fn module_start(&mut self, name: &str, id: ModuleId, tags: u16) -> Result<()> {
        let module = self.loader.load(name, id, tags)?;
        self.registry.allocate(id, module)?;
        log::info!("module '{name}' started as id {id}");
        Ok(())
    }

    fn module_remove(&mut self, id: ModuleId) -> Result<()> {
        self.registry.remove(id)?;
        log::info!("module {id} marked for removal");
        Ok(())
    }

    fn tick(&mut self) {
        let pass_started = Instant::now();
        let properties = self.camera.get_properties();
        let camera_header = crate::image::ImageHeader::new(properties.width, properties.height, properties.colorspace, 0);

        if let Err(err) = self.camera.grab() {
            log::warn!("camera grab failed: {err}");
            std::thread::sleep(self.config.execution_latency);
            return;
        }
        let frame = match self.camera.get_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("camera frame acquisition failed: {err}");
                std::thread::sleep(self.config.execution_latency);
                return;
            }
        };
        self.frame_bus.begin_pass(frame);

        let mut to_remove: Vec<ModuleId> = Vec::new();
        let mut fired: Vec<(ModuleId, ModuleResult)> = Vec::new();
        let mut any_active = false;

        let registry = self.registry.clone();
        let frame_bus = &mut self.frame_bus;
        let mut scene_members: std::collections::HashSet<ModuleId> = std::collections::HashSet::new();

        registry.begin_pass();
        self.scene_trees.exec_all(|module_id| {
            scene_members.insert(module_id);
            let _ = registry.exec_one(module_id, |module| {
                Self::execute_one(module, frame_bus, camera_header, &mut to_remove, &mut fired, &mut any_active);
            });
        });
        registry.end_pass();

        registry.exec_all(|id, module| {
            if scene_members.contains(&id) {
                return;
            }
            Self::execute_one(module, frame_bus, camera_header, &mut to_remove, &mut fired, &mut any_active);
        });

        for (id, result) in fired {
            let kind = result.kind();
            if let Some(callback) = self.callbacks.get_mut(&(id, kind)) {
                callback(id, result);
            } else if let Some(callback) = self.default_callback.as_mut() {
                callback(id, result);
            }
        }

        for id in to_remove {
            if let Err(err) = self.registry.remove_self(id) {
                log::warn!("tag-driven removal of module {id} failed: {err}");
            } else {
                log::debug!("module {id} removed via ExecAndRemove tag");
            }
        }

        self.pass_count.fetch_add(1, Ordering::Relaxed);
        self.last_pass_duration_us
            .store(pass_started.elapsed().as_micros() as u64, Ordering::Relaxed);

        let latency = if any_active {
            self.config.execution_latency
        } else {
            self.config.execution_latency.max(self.config.min_idle_latency)
        };
        std::thread::sleep(latency);
    }

    fn execute_one(
        module: &mut Box<dyn Module>,
        frame_bus: &mut FrameBus,
        camera_header: crate::image::ImageHeader,
        to_remove: &mut Vec<ModuleId>,
        fired: &mut Vec<(ModuleId, ModuleResult)>,
        any_active: &mut bool,
    ) {
        if !module.is_active() {
            return;
        }
        *any_active = true;

        let colorspace = module.input_colorspace();
        let view = if colorspace == crate::image::ColorSpace::None {
            None
        } else {
            match frame_bus.view(colorspace) {
                Ok(view) => Some(view),
                Err(err) => {
                    log::warn!("module {} conversion failed, skipping this pass: {err}", module.id());
                    return;
                }
            }
        };

        let mut output_buf;
        let output = if module.outputs_image() {
            let reference = view.as_ref().map_or(camera_header, |v| v.header);
            let header = module.get_output_image_header(&reference);
            output_buf = vec![0u8; header.byte_count];
            Some(output_buf.as_mut_slice())
        } else {
            output_buf = Vec::new();
            let _ = &output_buf;
            None
        };

        if let Err(err) = module.execute(view.as_ref(), output) {
            log::warn!("module {} execute failed: {err}", module.id());
            return;
        }

        let tags = module.tags();
        if tags.contains(ModuleKind::EXEC_AND_REMOVE) {
            to_remove.push(module.id());
        }
        if tags.contains(ModuleKind::EXEC_AND_DISABLE) {
            module.set_active(false);
        }

        if module.has_result() {
            fired.push((module.id(), module.get_result()));
        }
    }
}
