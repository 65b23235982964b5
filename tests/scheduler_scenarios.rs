//! Scheduler Pipeline Scenarios
//!
//! Drives a real `Scheduler` on its own thread through `SchedulerHandle`,
//! with an in-process camera and modules standing in for hardware and
//! plug-ins that don't exist in this workspace. Modules are injected
//! straight into the registry via `test_allocate_module`, bypassing
//! `ModuleLoader` entirely.

use std::time::{Duration, Instant};

use tinkervision::camera::fake::FakeCamera;
use tinkervision::modules::fake::FakeModule;
use tinkervision::{
    CameraHandle, ColorSpace, ModuleResult, Parameter, ParameterValue, ResultKind, RuntimeConfig, Scheduler,
    SchedulerHandle,
};

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        execution_latency: Duration::from_millis(2),
        min_idle_latency: Duration::from_millis(5),
        ..RuntimeConfig::default()
    }
}

fn spawn_scheduler() -> SchedulerHandle {
    let camera = FakeCamera::new(4, 4, ColorSpace::Bgr888, vec![0; 48]);
    let mut camera_handle = CameraHandle::new(Box::new(camera));
    camera_handle.acquire().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let loader = tinkervision::ModuleLoader::new(dir.path().join("user"), dir.path().join("system"));

    let (scheduler, handle) = Scheduler::new(camera_handle, loader, test_config());
    std::thread::spawn(move || scheduler.run());
    handle
}

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !predicate() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_passes(handle: &SchedulerHandle, passes: u64, timeout: Duration) {
    wait_until(|| handle.stats().pass_count >= passes, timeout);
}

// ============================================================================
// Load, execute, observe a result, remove
// ============================================================================

#[test]
fn module_executes_and_produces_a_result_then_can_be_removed() {
    let handle = spawn_scheduler();

    let module = FakeModule::new(1, "colormatch", ColorSpace::Bgr888)
        .with_parameter(Parameter::numeric("min-hue", 0, 255, 100))
        .with_result(ModuleResult::Rectangle { x: 1, y: 2, w: 3, h: 4 });
    handle.test_allocate_module(1, Box::new(module)).unwrap();
    handle.set_parameter(1, "min-hue", ParameterValue::Numeric(120)).unwrap();

    handle.start().unwrap();
    wait_for_passes(&handle, 3, Duration::from_secs(2));

    let result = handle.get_result(1).unwrap();
    assert_eq!(result, ModuleResult::Rectangle { x: 1, y: 2, w: 3, h: 4 });

    handle.module_remove(1).unwrap();
    wait_until(|| handle.get_result(1).is_err(), Duration::from_secs(2));

    handle.quit().unwrap();
}

// ============================================================================
// A prefix shared by two scenes executes exactly once per pass
// ============================================================================

#[test]
fn shared_scene_prefix_executes_once_per_pass() {
    let handle = spawn_scheduler();

    let root = FakeModule::new(1, "root", ColorSpace::None).reporting_exec_count();
    let tail_a = FakeModule::new(2, "tail-a", ColorSpace::None);
    let tail_b = FakeModule::new(3, "tail-b", ColorSpace::None);
    handle.test_allocate_module(1, Box::new(root)).unwrap();
    handle.test_allocate_module(2, Box::new(tail_a)).unwrap();
    handle.test_allocate_module(3, Box::new(tail_b)).unwrap();

    let scene_a = handle.scene_from_module(1).unwrap();
    handle.scene_add_module(scene_a, 2).unwrap();
    let scene_b = handle.scene_from_module(1).unwrap();
    handle.scene_add_module(scene_b, 3).unwrap();

    handle.start().unwrap();
    wait_for_passes(&handle, 3, Duration::from_secs(2));
    handle.stop().unwrap();
    // let any in-flight tick settle before reading
    std::thread::sleep(Duration::from_millis(20));

    let passes = handle.stats().pass_count;
    let root_result = handle.get_result(1).unwrap();
    // if the shared root were visited once per scene instead of once per
    // pass, this would read 2 * passes instead.
    assert_eq!(root_result, ModuleResult::Scalar(passes as i32));

    handle.quit().unwrap();
}

// ============================================================================
// A module that leaves a scene keeps executing via the non-scene pass
// ============================================================================

#[test]
fn scene_remove_returns_its_module_to_the_non_scene_pass() {
    let handle = spawn_scheduler();

    let module = FakeModule::new(1, "root", ColorSpace::None).reporting_exec_count();
    handle.test_allocate_module(1, Box::new(module)).unwrap();

    let scene = handle.scene_from_module(1).unwrap();
    handle.scene_remove(scene).unwrap();

    handle.start().unwrap();
    wait_for_passes(&handle, 3, Duration::from_secs(2));
    handle.stop().unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let passes = handle.stats().pass_count;
    // module 1 belongs to no scene forest anymore; if the scheduler still
    // excluded it from the non-scene pass it would never execute again and
    // this would read Scalar(0) regardless of how many passes ran.
    assert_eq!(handle.get_result(1).unwrap(), ModuleResult::Scalar(passes as i32));

    handle.quit().unwrap();
}

// ============================================================================
// Modules requiring different derived colorspaces from one raw frame
// ============================================================================

#[test]
fn modules_requiring_different_colorspaces_all_execute_every_pass() {
    let handle = spawn_scheduler();

    let gray_consumer = FakeModule::new(1, "gray-consumer", ColorSpace::Gray).reporting_exec_count();
    let rgb_consumer = FakeModule::new(2, "rgb-consumer", ColorSpace::Rgb888).reporting_exec_count();
    handle.test_allocate_module(1, Box::new(gray_consumer)).unwrap();
    handle.test_allocate_module(2, Box::new(rgb_consumer)).unwrap();

    handle.start().unwrap();
    wait_for_passes(&handle, 5, Duration::from_secs(2));
    handle.stop().unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let passes = handle.stats().pass_count;
    assert_eq!(handle.get_result(1).unwrap(), ModuleResult::Scalar(passes as i32));
    assert_eq!(handle.get_result(2).unwrap(), ModuleResult::Scalar(passes as i32));

    handle.quit().unwrap();
}

// ============================================================================
// Pause stops progress; resume picks back up
// ============================================================================

#[test]
fn stop_halts_pass_progress_and_start_resumes_it() {
    let handle = spawn_scheduler();
    handle.start().unwrap();
    wait_for_passes(&handle, 2, Duration::from_secs(2));

    handle.stop().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let paused_at = handle.stats().pass_count;
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(handle.stats().pass_count, paused_at, "pass count must not advance while paused");

    handle.start().unwrap();
    wait_for_passes(&handle, paused_at + 2, Duration::from_secs(2));

    handle.quit().unwrap();
}

// ============================================================================
// Callback kind mismatch is rejected; the default callback still fires
// ============================================================================

#[test]
fn set_callback_rejects_a_kind_mismatched_with_the_modules_declared_result() {
    let handle = spawn_scheduler();
    let module = FakeModule::new(1, "scalar-module", ColorSpace::None).with_result(ModuleResult::Scalar(7));
    handle.test_allocate_module(1, Box::new(module)).unwrap();

    let err = handle
        .set_callback(1, ResultKind::Point, Box::new(|_, _| {}))
        .unwrap_err();
    assert_eq!(
        tinkervision::ResultCode::from(err),
        tinkervision::ResultCode::CallbackMismatch
    );

    handle.quit().unwrap();
}

#[test]
fn default_callback_receives_results_with_no_specific_callback_registered() {
    let handle = spawn_scheduler();
    let module = FakeModule::new(1, "scalar-module", ColorSpace::None).with_result(ModuleResult::Scalar(7));
    handle.test_allocate_module(1, Box::new(module)).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    handle
        .enable_default_callback(Some(Box::new(move |id, result| {
            let _ = tx.send((id, result));
        })))
        .unwrap();

    handle.start().unwrap();
    let (id, result) = rx.recv_timeout(Duration::from_secs(2)).expect("default callback never fired");
    assert_eq!(id, 1);
    assert_eq!(result, ModuleResult::Scalar(7));

    handle.quit().unwrap();
}
