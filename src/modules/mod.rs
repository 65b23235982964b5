//! The `Module` trait, its capability tags, and the parameter/result
//! vocabulary every loaded vision module is described by.
//!
//! Dynamic dispatch replaces the alternative of compile-time generic
//! pipelines: every module is a `Box<dyn Module>` behind a single capability
//! tag ([`ModuleKind`]) and one virtual [`Module::execute`].

use std::sync::Arc;

use bitflags::bitflags;

use crate::errors::{Result, TvError};
use crate::image::{ColorSpace, ImageHeader};

/// Client-chosen identifier, unique over currently live modules.
pub type ModuleId = i32;

bitflags! {
    /// Coarse role (`NONE`/`EXECUTABLE`/`FX`/`ANALYSIS`/`OUTPUT`) layered
    /// with runtime tags (`EXEC_AND_REMOVE`/`EXEC_AND_DISABLE`/`REMOVABLE`/
    /// `SEQUENTIAL`). A module carries exactly one role bit plus any number
    /// of tag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModuleKind: u16 {
        const NONE = 0;
        const EXECUTABLE = 1 << 0;
        const FX = 1 << 1;
        const ANALYSIS = 1 << 2;
        const OUTPUT = 1 << 3;

        const EXEC_AND_REMOVE = 1 << 8;
        const EXEC_AND_DISABLE = 1 << 9;
        const REMOVABLE = 1 << 10;
        const SEQUENTIAL = 1 << 11;
    }
}

/// A predicate a [`Parameter::StringValued`] runs over any candidate value
/// before accepting it. Boxed so the parameter table can hold a mix of
/// per-module closures.
pub type StringPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One numeric-or-string configurable value on a [`Module`], in declaration
/// order (a `Vec`, not a map, so introspection preserves registration
/// order).
#[derive(Clone)]
pub enum Parameter {
    Numeric {
        name: String,
        min: i32,
        max: i32,
        default: i32,
        value: i32,
    },
    /// A string-valued parameter gated by a predicate over candidate values;
    /// `set_parameter` rejects any value for which the predicate is false.
    StringValued {
        name: String,
        default: String,
        value: String,
        predicate: StringPredicate,
    },
}

impl std::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parameter::Numeric { name, min, max, default, value } => f
                .debug_struct("Numeric")
                .field("name", name)
                .field("min", min)
                .field("max", max)
                .field("default", default)
                .field("value", value)
                .finish(),
            Parameter::StringValued { name, default, value, .. } => f
                .debug_struct("StringValued")
                .field("name", name)
                .field("default", default)
                .field("value", value)
                .field("predicate", &"<fn>")
                .finish(),
        }
    }
}

impl Parameter {
    #[must_use]
    pub fn numeric(name: impl Into<String>, min: i32, max: i32, default: i32) -> Self {
        Parameter::Numeric {
            name: name.into(),
            min,
            max,
            default: default.clamp(min, max),
            value: default.clamp(min, max),
        }
    }

    /// `predicate` gates every future `set_parameter` call for this
    /// parameter; it is not run against `default` itself.
    #[must_use]
    pub fn string(name: impl Into<String>, default: impl Into<String>, predicate: StringPredicate) -> Self {
        let default = default.into();
        Parameter::StringValued {
            name: name.into(),
            value: default.clone(),
            default,
            predicate,
        }
    }

    /// A string parameter that accepts any value.
    #[must_use]
    pub fn string_unconstrained(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::string(name, default, Arc::new(|_| true))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Parameter::Numeric { name, .. } | Parameter::StringValued { name, .. } => name,
        }
    }
}

/// A value supplied to [`Module::set_parameter`] or read back from
/// [`Module::get_parameter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Numeric(i32),
    String(String),
}

/// The shape of a value a module may produce; used to validate that a
/// registered callback is compatible with a module's result (spec
/// `CALLBACK_MISMATCH`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Empty,
    String,
    Scalar,
    Point,
    Rectangle,
}

/// A typed value produced by a module for the current pass. Only one
/// variant is produced at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleResult {
    Empty,
    String(String),
    Scalar(i32),
    Point { x: i32, y: i32 },
    Rectangle { x: i32, y: i32, w: i32, h: i32 },
}

impl ModuleResult {
    #[must_use]
    pub fn kind(&self) -> ResultKind {
        match self {
            ModuleResult::Empty => ResultKind::Empty,
            ModuleResult::String(_) => ResultKind::String,
            ModuleResult::Scalar(_) => ResultKind::Scalar,
            ModuleResult::Point { .. } => ResultKind::Point,
            ModuleResult::Rectangle { .. } => ResultKind::Rectangle,
        }
    }
}

/// One loadable vision operation. Implementors are produced by the
/// [`crate::loader::ModuleLoader`] (plug-ins behind the `create`/`destroy`
/// ABI) or constructed in-process by tests.
pub trait Module: Send {
    fn id(&self) -> ModuleId;

    /// The type-name used to resolve this module via the loader,
    /// independent of its numeric id.
    fn name(&self) -> &str;

    fn tags(&self) -> ModuleKind;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    /// Fixed for the module's lifetime. `ColorSpace::None` declares the
    /// module execute-free: still scheduled for bookkeeping, never handed a
    /// frame.
    fn input_colorspace(&self) -> ColorSpace;

    fn outputs_image(&self) -> bool {
        false
    }

    /// Required output buffer shape for a given input header. Only called
    /// when `outputs_image()` is true.
    fn get_output_image_header(&self, reference: &ImageHeader) -> ImageHeader {
        *reference
    }

    fn produces_result(&self) -> bool {
        false
    }

    fn has_result(&self) -> bool {
        false
    }

    fn get_result(&self) -> ModuleResult {
        ModuleResult::Empty
    }

    /// Per-frame entry point. `output` is `Some` iff `outputs_image()` is
    /// true, sized per `get_output_image_header`. Implementations must not
    /// retain `input`/`output` past return.
    fn execute(&mut self, input: Option<&crate::image::Image<'_>>, output: Option<&mut [u8]>) -> Result<()>;

    fn parameters(&self) -> &[Parameter];

    fn set_parameter(&mut self, name: &str, value: ParameterValue) -> Result<()>;

    fn get_parameter(&self, name: &str) -> Result<ParameterValue>;

    /// Called after a `set_parameter` call succeeds, so a module can react
    /// to the new value (e.g. invalidate a cache keyed on it). No-op by
    /// default; most modules don't need to observe their own parameters.
    fn value_changed(&mut self, _name: &str, _value: &ParameterValue) {}
}

/// Shared validation for `set_parameter` implementations: range-checks a
/// numeric value and runs the declared predicate for a string value.
pub fn validate_numeric(min: i32, max: i32, value: i32, name: &str) -> Result<()> {
    if value < min || value > max {
        return Err(TvError::ParameterOutOfRange {
            name: name.to_string(),
            min,
            max,
            value,
        });
    }
    Ok(())
}

/// Runs `predicate` over a candidate string value, rejecting it as an
/// invalid parameter if the predicate returns false.
pub fn validate_string(predicate: &StringPredicate, value: &str, name: &str) -> Result<()> {
    if predicate(value) {
        Ok(())
    } else {
        Err(TvError::InvalidParameter(name.to_string()))
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! A minimal in-process module used by registry/scheduler tests.

    use super::{Module, ModuleId, ModuleKind, ModuleResult, Parameter, ParameterValue, ResultKind};
    use crate::errors::{Result, TvError};
    use crate::image::{ColorSpace, Image, ImageHeader};

    pub struct FakeModule {
        id: ModuleId,
        name: String,
        tags: ModuleKind,
        active: bool,
        input_colorspace: ColorSpace,
        parameters: Vec<Parameter>,
        result: ModuleResult,
        pub exec_count: u32,
        /// When set, `get_result` reports `exec_count` as a `Scalar` instead
        /// of the fixed `result`, so a caller with no other window into a
        /// module living behind the registry can still observe how many
        /// times it actually ran.
        report_exec_count: bool,
        /// Last `(name, value)` pair observed through `value_changed`, for
        /// tests asserting that propagation actually happened.
        last_changed: Option<(String, ParameterValue)>,
    }

    impl FakeModule {
        #[must_use]
        pub fn new(id: ModuleId, name: &str, input_colorspace: ColorSpace) -> Self {
            Self {
                id,
                name: name.to_string(),
                tags: ModuleKind::EXECUTABLE,
                active: true,
                input_colorspace,
                parameters: Vec::new(),
                result: ModuleResult::Empty,
                exec_count: 0,
                report_exec_count: false,
                last_changed: None,
            }
        }

        #[must_use]
        pub fn with_tags(mut self, tags: ModuleKind) -> Self {
            self.tags = tags;
            self
        }

        #[must_use]
        pub fn with_parameter(mut self, parameter: Parameter) -> Self {
            self.parameters.push(parameter);
            self
        }

        #[must_use]
        pub fn with_result(mut self, result: ModuleResult) -> Self {
            self.result = result;
            self
        }

        #[must_use]
        pub fn reporting_exec_count(mut self) -> Self {
            self.report_exec_count = true;
            self
        }

        #[must_use]
        pub fn last_changed(&self) -> Option<&(String, ParameterValue)> {
            self.last_changed.as_ref()
        }
    }

    impl Module for FakeModule {
        fn id(&self) -> ModuleId {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn tags(&self) -> ModuleKind {
            self.tags
        }

        fn is_active(&self) -> bool {
            self.active
        }

        fn set_active(&mut self, active: bool) {
            self.active = active;
        }

        fn input_colorspace(&self) -> ColorSpace {
            self.input_colorspace
        }

        fn produces_result(&self) -> bool {
            self.report_exec_count || self.result.kind() != ResultKind::Empty
        }

        fn has_result(&self) -> bool {
            self.produces_result()
        }

        fn get_result(&self) -> ModuleResult {
            if self.report_exec_count {
                ModuleResult::Scalar(self.exec_count as i32)
            } else {
                self.result.clone()
            }
        }

        fn execute(&mut self, _input: Option<&Image<'_>>, _output: Option<&mut [u8]>) -> Result<()> {
            self.exec_count += 1;
            Ok(())
        }

        fn parameters(&self) -> &[Parameter] {
            &self.parameters
        }

        fn set_parameter(&mut self, name: &str, value: ParameterValue) -> Result<()> {
            let slot = self
                .parameters
                .iter_mut()
                .find(|p| p.name() == name)
                .ok_or_else(|| TvError::InvalidParameter(name.to_string()))?;
            let changed = match (slot, value) {
                (Parameter::Numeric { min, max, value: v, .. }, ParameterValue::Numeric(new)) => {
                    super::validate_numeric(*min, *max, new, name)?;
                    *v = new;
                    ParameterValue::Numeric(new)
                }
                (Parameter::StringValued { value: v, predicate, .. }, ParameterValue::String(new)) => {
                    super::validate_string(predicate, &new, name)?;
                    *v = new.clone();
                    ParameterValue::String(new)
                }
                _ => return Err(TvError::InvalidParameter(name.to_string())),
            };
            self.value_changed(name, &changed);
            Ok(())
        }

        fn get_parameter(&self, name: &str) -> Result<ParameterValue> {
            self.parameters
                .iter()
                .find(|p| p.name() == name)
                .map(|p| match p {
                    Parameter::Numeric { value, .. } => ParameterValue::Numeric(*value),
                    Parameter::StringValued { value, .. } => ParameterValue::String(value.clone()),
                })
                .ok_or_else(|| TvError::InvalidParameter(name.to_string()))
        }

        fn get_output_image_header(&self, reference: &ImageHeader) -> ImageHeader {
            *reference
        }

        fn value_changed(&mut self, name: &str, value: &ParameterValue) {
            self.last_changed = Some((name.to_string(), value.clone()));
        }
    }

    #[cfg(test)]
    mod tests {
        use super::{FakeModule, Module, Parameter, ParameterValue};
        use crate::image::ColorSpace;
        use std::sync::Arc;

        #[test]
        fn parameter_range_is_enforced() {
            let mut module = FakeModule::new(1, "dummy", ColorSpace::None)
                .with_parameter(Parameter::numeric("min-hue", 0, 255, 100));
            assert!(module.set_parameter("min-hue", ParameterValue::Numeric(300)).is_err());
            assert!(module.set_parameter("min-hue", ParameterValue::Numeric(110)).is_ok());
            assert_eq!(module.get_parameter("min-hue").unwrap(), ParameterValue::Numeric(110));
        }

        #[test]
        fn unknown_parameter_is_invalid_parameter() {
            let module = FakeModule::new(1, "dummy", ColorSpace::None);
            assert!(module.get_parameter("nope").is_err());
        }

        #[test]
        fn string_parameter_predicate_rejects_non_matching_values() {
            let mut module = FakeModule::new(1, "dummy", ColorSpace::None).with_parameter(Parameter::string(
                "mode",
                "auto",
                Arc::new(|v| v == "auto" || v == "manual"),
            ));
            assert!(module.set_parameter("mode", ParameterValue::String("bogus".into())).is_err());
            assert!(module.set_parameter("mode", ParameterValue::String("manual".into())).is_ok());
            assert_eq!(
                module.get_parameter("mode").unwrap(),
                ParameterValue::String("manual".into())
            );
        }

        #[test]
        fn set_parameter_propagates_through_value_changed() {
            let mut module = FakeModule::new(1, "dummy", ColorSpace::None)
                .with_parameter(Parameter::numeric("min-hue", 0, 255, 100));
            module.set_parameter("min-hue", ParameterValue::Numeric(42)).unwrap();
            assert_eq!(
                module.last_changed(),
                Some(&("min-hue".to_string(), ParameterValue::Numeric(42)))
            );
        }
    }
}
