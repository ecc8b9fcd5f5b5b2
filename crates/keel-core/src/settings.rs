#![forbid(unsafe_code)]

//! Process-wide lock configuration.
//!
//! Every collection reads its lock timeout from [`EnvironmentSettings`]
//! when it is constructed, unless a per-instance [`LockSettings`] override
//! is supplied. The process-wide value lives in an [`ArcSwap`], so the hot
//! path (constructing a collection) never contends with an occasional
//! [`EnvironmentSettings::install`].
//!
//! # Sources
//!
//! - [`EnvironmentSettings::default`]: 1000 ms, [`LockTimeoutPolicy::WarnAndWait`]
//! - [`EnvironmentSettings::from_env`]: `KEEL_LOCK_TIMEOUT_MS`, `KEEL_LOCK_TIMEOUT_POLICY`
//! - `from_toml_str` / `from_json_str` / `from_toml_file` (feature `config`)
//!
//! ```toml
//! lock_acquisition_timeout_ms = 250
//! lock_timeout_policy = "fail"
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[cfg(feature = "config")]
use std::path::Path;

use arc_swap::ArcSwap;
#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Default lock acquisition timeout in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 1000;

/// What a lock token does when its acquisition times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "kebab-case"))]
pub enum LockTimeoutPolicy {
    /// Log a warning, then keep waiting for the lock. Callers never see a
    /// timeout error.
    #[default]
    WarnAndWait,
    /// Return [`crate::LockError::Timeout`] to the caller.
    Fail,
}

impl LockTimeoutPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "warn-and-wait" | "warn_and_wait" | "wait" => Some(Self::WarnAndWait),
            "fail" | "error" => Some(Self::Fail),
            _ => None,
        }
    }
}

/// Per-instance lock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Upper bound for every acquisition and upgrade.
    pub timeout: Duration,
    /// Behaviour once `timeout` elapses.
    pub policy: LockTimeoutPolicy,
}

impl Default for LockSettings {
    /// Snapshot of the current process-wide settings.
    fn default() -> Self {
        EnvironmentSettings::current().lock_settings()
    }
}

impl LockSettings {
    #[must_use]
    pub const fn new(timeout: Duration, policy: LockTimeoutPolicy) -> Self {
        Self { timeout, policy }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: LockTimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Process-wide defaults for lock behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct EnvironmentSettings {
    /// Lock acquisition timeout in milliseconds.
    pub lock_acquisition_timeout_ms: u64,
    /// Behaviour when the timeout elapses.
    pub lock_timeout_policy: LockTimeoutPolicy,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            lock_acquisition_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            lock_timeout_policy: LockTimeoutPolicy::WarnAndWait,
        }
    }
}

static CURRENT: OnceLock<ArcSwap<EnvironmentSettings>> = OnceLock::new();

fn current_store() -> &'static ArcSwap<EnvironmentSettings> {
    CURRENT.get_or_init(|| ArcSwap::from_pointee(EnvironmentSettings::default()))
}

impl EnvironmentSettings {
    /// The process-wide settings currently in effect.
    #[must_use]
    pub fn current() -> Arc<Self> {
        current_store().load_full()
    }

    /// Replace the process-wide settings. Collections constructed before
    /// the swap keep the values they were built with.
    pub fn install(settings: Self) {
        tracing::debug!(
            timeout_ms = settings.lock_acquisition_timeout_ms,
            policy = ?settings.lock_timeout_policy,
            "installing environment settings"
        );
        current_store().store(Arc::new(settings));
    }

    #[must_use]
    pub fn lock_acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquisition_timeout_ms)
    }

    #[must_use]
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings::new(self.lock_acquisition_timeout(), self.lock_timeout_policy)
    }

    /// Load settings from environment variables.
    ///
    /// Reads:
    /// - `KEEL_LOCK_TIMEOUT_MS`: acquisition timeout in milliseconds
    /// - `KEEL_LOCK_TIMEOUT_POLICY`: `warn-and-wait` or `fail`
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable lookup.
    #[must_use]
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(val) = lookup("KEEL_LOCK_TIMEOUT_MS")
            && let Ok(ms) = val.trim().parse::<u64>()
        {
            settings.lock_acquisition_timeout_ms = ms;
        }

        if let Some(val) = lookup("KEEL_LOCK_TIMEOUT_POLICY")
            && let Some(policy) = LockTimeoutPolicy::parse(&val)
        {
            settings.lock_timeout_policy = policy;
        }

        settings
    }

    /// Load from a TOML string.
    #[cfg(feature = "config")]
    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(s)?;
        settings.checked()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "config")]
    pub fn from_json_str(s: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(s)?;
        settings.checked()
    }

    /// Validate all parameters. An empty list means the settings are usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.lock_acquisition_timeout_ms == 0 {
            errors.push("lock_acquisition_timeout_ms must be > 0".into());
        }
        errors
    }

    /// Return `self` if valid, the list of problems otherwise.
    pub fn checked(self) -> Result<Self, SettingsError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(SettingsError::Validation(errors))
        }
    }
}
