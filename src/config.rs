//! Runtime configuration: module/script/data directories, scheduler
//! cadence, and watch debounce.

use std::path::PathBuf;
use std::time::Duration;

/// Resolved directory prefix, containing `modules/`, `scripts/`, `data/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub root: PathBuf,
}

impl Prefix {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn modules_dir(&self) -> PathBuf {
        self.root.join("modules")
    }

    #[must_use]
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }
}

/// Typed configuration surface for one runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub user_prefix: Prefix,
    pub system_prefix: Prefix,
    /// Sleep between passes while modules are active.
    pub execution_latency: Duration,
    /// Floor applied to `execution_latency` when no module is active.
    pub min_idle_latency: Duration,
    /// Minimum debounce window for the module directory watcher.
    pub watch_debounce: Duration,
}

impl RuntimeConfig {
    /// Resolves directory prefixes from `TV_USER_PREFIX`/`TV_SYSTEM_PREFIX`,
    /// defaulting to `$HOME/tv` for the user prefix and `/usr/share/tv` for
    /// the system prefix, with the remaining settings at their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let user_prefix = std::env::var_os("TV_USER_PREFIX")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
                home.join("tv")
            });
        let system_prefix = std::env::var_os("TV_SYSTEM_PREFIX")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/usr/share/tv"));

        Self {
            user_prefix: Prefix::new(user_prefix),
            system_prefix: Prefix::new(system_prefix),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            user_prefix: Prefix::new(PathBuf::from(".")),
            system_prefix: Prefix::new(PathBuf::from(".")),
            execution_latency: Duration::from_millis(20),
            min_idle_latency: Duration::from_millis(200),
            watch_debounce: Duration::from_millis(100),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_honors_explicit_prefixes() {
        unsafe {
            std::env::set_var("TV_USER_PREFIX", "/tmp/tv-user");
            std::env::set_var("TV_SYSTEM_PREFIX", "/tmp/tv-system");
        }
        let config = RuntimeConfig::from_env();
        assert_eq!(config.user_prefix.root, PathBuf::from("/tmp/tv-user"));
        assert_eq!(config.system_prefix.root, PathBuf::from("/tmp/tv-system"));
        unsafe {
            std::env::remove_var("TV_USER_PREFIX");
            std::env::remove_var("TV_SYSTEM_PREFIX");
        }
    }

    #[test]
    fn prefix_derives_standard_subdirectories() {
        let prefix = Prefix::new(PathBuf::from("/tv"));
        assert_eq!(prefix.modules_dir(), PathBuf::from("/tv/modules"));
        assert_eq!(prefix.scripts_dir(), PathBuf::from("/tv/scripts"));
        assert_eq!(prefix.data_dir(), PathBuf::from("/tv/data"));
    }
}
