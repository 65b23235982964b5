//! Error Types
//!
//! This module defines the internal error type [`TvError`] and the public,
//! FFI-stable [`ResultCode`] domain that the [`crate::api`] façade translates
//! every `TvError` into.
//!
//! # Overview
//!
//! Internal components (the registry, the scheduler, the converter, the
//! loader) thread [`Result<T>`] = `std::result::Result<T, TvError>` with `?`.
//! Only the façade boundary collapses a `TvError` down to a `ResultCode`,
//! which is `repr(i32)` and safe to hand across an FFI boundary by value.

use thiserror::Error;

/// The internal error type used throughout the runtime.
#[derive(Error, Debug)]
pub enum TvError {
    /// An id was supplied that does not name any live module/scene.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// `allocate` was called with an id that is already in use.
    #[error("duplicate id: {0}")]
    DuplicateId(i32),

    /// `remove`/`exec_one` targeted an id that is not (or no longer) managed.
    #[error("unconfigured id: {0}")]
    UnconfiguredId(i32),

    /// A scene or module reference was structurally invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A parameter name does not exist on the target module.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A numeric parameter value fell outside its declared `[min, max]`.
    #[error("parameter '{name}' out of range [{min}, {max}]: got {value}")]
    ParameterOutOfRange {
        name: String,
        min: i32,
        max: i32,
        value: i32,
    },

    /// The camera could not be opened or a grab failed persistently.
    #[error("camera acquisition failed: {0}")]
    CameraAcquisitionFailed(String),

    /// A camera property could not be applied.
    #[error("camera settings failed: {0}")]
    CameraSettingsFailed(String),

    /// `dlopen`/`Library::new` failed for a plug-in.
    #[error("module dlopen failed for '{0}': {1}")]
    ModuleDlopenFailed(String, #[source] libloading::Error),

    /// A required ABI symbol could not be resolved in an opened library.
    #[error("module dlsym failed for '{0}': {1}")]
    ModuleDlsymFailed(String, #[source] libloading::Error),

    /// A library failed to unload cleanly.
    #[error("module dlclose failed for '{0}'")]
    ModuleDlcloseFailed(String),

    /// `load`/`destroy` referenced a module name/id the loader does not know.
    #[error("unknown module: {0}")]
    ModuleUnknown(String),

    /// A scene id does not name a live scene.
    #[error("unknown scene: {0:?}")]
    SceneUnknown(crate::scene::SceneId),

    /// A scene operation expected its target to be the scene's terminal node.
    #[error("module is not the terminal node of its scene")]
    SceneModuleNotTerminal,

    /// The converter found no path between two colorspaces.
    #[error("unsupported conversion: {from:?} -> {to:?}")]
    UnsupportedConversion {
        from: crate::image::ColorSpace,
        to: crate::image::ColorSpace,
    },

    /// A callback was registered with a `ResultKind` incompatible with the
    /// module's declared result variant.
    #[error("callback kind mismatch for module {0}")]
    CallbackMismatch(i32),

    /// A requested feature is recognized but not implemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// An invariant the runtime relies on was violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// The scheduler thread is unresponsive beyond the bounded poll wait.
    #[error("execution thread failure")]
    ExecThreadFailure,
}

/// Alias for `Result<T, TvError>`, used throughout the crate.
pub type Result<T> = std::result::Result<T, TvError>;

/// The public, C-ABI-stable result code domain.
///
/// [`result_string`] gives the stable human-readable string for each
/// variant; the two are defined side by side so they cannot drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    NewFeatureConfigured,
    FeatureReconfigured,

    InvalidId,
    DuplicateId,
    UnconfiguredId,
    InvalidConfiguration,
    InvalidParameter,
    ParameterOutOfRange,

    CameraAcquisitionFailed,
    CameraSettingsFailed,

    ModuleDlopenFailed,
    ModuleDlsymFailed,
    ModuleDlcloseFailed,
    ModuleUnknown,

    SceneUnknown,
    SceneModuleNotTerminal,
    UnsupportedConversion,

    NotImplemented,
    InternalError,
    UnknownError,
    ExecThreadFailure,
    CallbackMismatch,
}

/// Stable human-readable string for a [`ResultCode`].
#[must_use]
pub fn result_string(code: ResultCode) -> &'static str {
    match code {
        ResultCode::Ok => "ok",
        ResultCode::NewFeatureConfigured => "new feature configured",
        ResultCode::FeatureReconfigured => "feature reconfigured",
        ResultCode::InvalidId => "invalid id",
        ResultCode::DuplicateId => "duplicate id",
        ResultCode::UnconfiguredId => "unconfigured id",
        ResultCode::InvalidConfiguration => "invalid configuration",
        ResultCode::InvalidParameter => "invalid parameter",
        ResultCode::ParameterOutOfRange => "parameter out of range",
        ResultCode::CameraAcquisitionFailed => "camera acquisition failed",
        ResultCode::CameraSettingsFailed => "camera settings failed",
        ResultCode::ModuleDlopenFailed => "module dlopen failed",
        ResultCode::ModuleDlsymFailed => "module dlsym failed",
        ResultCode::ModuleDlcloseFailed => "module dlclose failed",
        ResultCode::ModuleUnknown => "unknown module",
        ResultCode::SceneUnknown => "unknown scene",
        ResultCode::SceneModuleNotTerminal => "scene module not terminal",
        ResultCode::UnsupportedConversion => "unsupported conversion",
        ResultCode::NotImplemented => "not implemented",
        ResultCode::InternalError => "internal error",
        ResultCode::UnknownError => "unknown error",
        ResultCode::ExecThreadFailure => "execution thread failure",
        ResultCode::CallbackMismatch => "callback mismatch",
    }
}

impl From<&TvError> for ResultCode {
    fn from(err: &TvError) -> Self {
        match err {
            TvError::InvalidId(_) => ResultCode::InvalidId,
            TvError::DuplicateId(_) => ResultCode::DuplicateId,
            TvError::UnconfiguredId(_) => ResultCode::UnconfiguredId,
            TvError::InvalidConfiguration(_) => ResultCode::InvalidConfiguration,
            TvError::InvalidParameter(_) => ResultCode::InvalidParameter,
            TvError::ParameterOutOfRange { .. } => ResultCode::ParameterOutOfRange,
            TvError::CameraAcquisitionFailed(_) => ResultCode::CameraAcquisitionFailed,
            TvError::CameraSettingsFailed(_) => ResultCode::CameraSettingsFailed,
            TvError::ModuleDlopenFailed(..) => ResultCode::ModuleDlopenFailed,
            TvError::ModuleDlsymFailed(..) => ResultCode::ModuleDlsymFailed,
            TvError::ModuleDlcloseFailed(_) => ResultCode::ModuleDlcloseFailed,
            TvError::ModuleUnknown(_) => ResultCode::ModuleUnknown,
            TvError::SceneUnknown(_) => ResultCode::SceneUnknown,
            TvError::SceneModuleNotTerminal => ResultCode::SceneModuleNotTerminal,
            TvError::UnsupportedConversion { .. } => ResultCode::UnsupportedConversion,
            TvError::CallbackMismatch(_) => ResultCode::CallbackMismatch,
            TvError::NotImplemented(_) => ResultCode::NotImplemented,
            TvError::Internal(_) => ResultCode::InternalError,
            TvError::ExecThreadFailure => ResultCode::ExecThreadFailure,
        }
    }
}

impl From<TvError> for ResultCode {
    fn from(err: TvError) -> Self {
        ResultCode::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::{ResultCode, TvError, result_string};

    #[test]
    fn result_string_is_stable_for_ok() {
        assert_eq!(result_string(ResultCode::Ok), "ok");
    }

    #[test]
    fn error_conversion_maps_duplicate_id() {
        let err = TvError::DuplicateId(3);
        let code: ResultCode = (&err).into();
        assert_eq!(code, ResultCode::DuplicateId);
    }
}
