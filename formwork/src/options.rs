//! Session options and their configuration sources.
//!
//! Options are plain serde data so they can come from code, from the
//! environment (`FORMWORK_MODE=on_change`) or from any figment provider the
//! caller merges in (TOML/YAML/JSON files).

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Environment variable prefix read by [`FormOptions::figment`].
pub const ENV_PREFIX: &str = "FORMWORK_";

/// When validation runs before the first submit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    #[default]
    OnSubmit,
    OnBlur,
    OnChange,
    /// First blur, then every change
    OnTouched,
    All,
}

/// When validation runs once the form has been submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevalidateMode {
    #[default]
    OnChange,
    OnBlur,
    OnSubmit,
}

/// How many failures a field records per validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaMode {
    /// Stop at the first failing built-in rule
    #[default]
    FirstError,
    /// Run every rule and record every failure
    All,
}

/// What caused a validation opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Change,
    Blur,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub mode: ValidationMode,
    pub revalidate_mode: RevalidateMode,
    pub criteria_mode: CriteriaMode,
    /// Unregistering a field also drops its value
    pub should_unregister: bool,
    /// Reset values to the defaults after a successful submit
    pub reset_on_submit_success: bool,
}

impl FormOptions {
    /// Defaults layered under `FORMWORK_*` environment variables.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(FormOptions::default())).merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load options from defaults and the environment.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Extract options from a caller-assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let options: FormOptions = figment.extract()?;
        debug!(?options, "form options loaded");
        Ok(options)
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_revalidate_mode(mut self, mode: RevalidateMode) -> Self {
        self.revalidate_mode = mode;
        self
    }

    pub fn with_criteria_mode(mut self, mode: CriteriaMode) -> Self {
        self.criteria_mode = mode;
        self
    }

    pub fn with_should_unregister(mut self, enabled: bool) -> Self {
        self.should_unregister = enabled;
        self
    }

    pub fn with_reset_on_submit_success(mut self, enabled: bool) -> Self {
        self.reset_on_submit_success = enabled;
        self
    }

    /// Whether a change or blur on a field should validate it.
    ///
    /// Before the first submit the decision follows `mode`; afterwards it
    /// follows `revalidate_mode`.
    pub fn validates_on(&self, trigger: Trigger, submitted: bool, touched: bool) -> bool {
        if submitted {
            return match (self.revalidate_mode, trigger) {
                (RevalidateMode::OnChange, Trigger::Change) => true,
                (RevalidateMode::OnBlur, Trigger::Blur) => true,
                _ => false,
            };
        }
        match (self.mode, trigger) {
            (ValidationMode::OnSubmit, _) => false,
            (ValidationMode::OnBlur, Trigger::Blur) => true,
            (ValidationMode::OnChange, Trigger::Change) => true,
            (ValidationMode::OnTouched, Trigger::Blur) => true,
            (ValidationMode::OnTouched, Trigger::Change) => touched,
            (ValidationMode::All, _) => true,
            _ => false,
        }
    }
}
