//! # Run Contexts
//!
//! An [`EnvironmentContext`] describes one benchmark run: which side of the
//! comparison it is (reference baseline or branch candidate), which feature
//! toggles are active, and the per-side environment variables handed to the
//! target server at launch.
//!
//! ## Launch environment
//!
//! [`EnvironmentContext::launch_overlay`] derives the variables applied to the
//! spawned server on every start:
//!
//! - `PERF_CHECK` - always `"1"`
//! - `PERF_CHECK_VERIFICATION` - `"1"` when verifying that responses do not differ
//! - `PERF_CHECK_NOCACHING` - `"1"` when caching is disabled
//! - every key of the selected side's map, applied last so it wins

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marks the process as running under perfcheck.
pub const PERF_CHECK: &str = "PERF_CHECK";
/// Asks the target to record response bodies for diff verification.
pub const PERF_CHECK_VERIFICATION: &str = "PERF_CHECK_VERIFICATION";
/// Asks the target to bypass its caches.
pub const PERF_CHECK_NOCACHING: &str = "PERF_CHECK_NOCACHING";

/// Which side of a comparison a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunSide {
    /// The baseline, typically the base branch.
    Reference,
    /// The candidate under test.
    Branch,
}

impl std::fmt::Display for RunSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunSide::Reference => write!(f, "reference"),
            RunSide::Branch => write!(f, "branch"),
        }
    }
}

/// Immutable description of the options for one start/restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    is_reference: bool,
    verify_no_diff: bool,
    caching_enabled: bool,
    branch_env_vars: BTreeMap<String, String>,
    reference_env_vars: BTreeMap<String, String>,
}

impl Default for EnvironmentContext {
    fn default() -> Self {
        Self {
            is_reference: false,
            verify_no_diff: false,
            caching_enabled: true,
            branch_env_vars: BTreeMap::new(),
            reference_env_vars: BTreeMap::new(),
        }
    }
}

impl EnvironmentContext {
    /// Start building a context. Defaults to a branch run with caching enabled.
    pub fn builder() -> EnvironmentContextBuilder {
        EnvironmentContextBuilder::default()
    }

    pub fn is_reference(&self) -> bool {
        self.is_reference
    }

    pub fn verify_no_diff(&self) -> bool {
        self.verify_no_diff
    }

    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled
    }

    pub fn branch_env_vars(&self) -> &BTreeMap<String, String> {
        &self.branch_env_vars
    }

    pub fn reference_env_vars(&self) -> &BTreeMap<String, String> {
        &self.reference_env_vars
    }

    /// The side this context selects.
    pub fn side(&self) -> RunSide {
        if self.is_reference {
            RunSide::Reference
        } else {
            RunSide::Branch
        }
    }

    /// The same options, selecting the reference side.
    #[must_use]
    pub fn for_reference(&self) -> Self {
        Self {
            is_reference: true,
            ..self.clone()
        }
    }

    /// The same options, selecting the branch side.
    #[must_use]
    pub fn for_branch(&self) -> Self {
        Self {
            is_reference: false,
            ..self.clone()
        }
    }

    /// User-supplied variables for the selected side.
    pub fn selected_env_vars(&self) -> &BTreeMap<String, String> {
        match self.side() {
            RunSide::Reference => &self.reference_env_vars,
            RunSide::Branch => &self.branch_env_vars,
        }
    }

    /// Environment variables to overlay on the launched server's environment.
    pub fn launch_overlay(&self) -> BTreeMap<String, String> {
        let mut overlay = BTreeMap::new();
        overlay.insert(PERF_CHECK.to_string(), "1".to_string());
        overlay.insert(
            PERF_CHECK_VERIFICATION.to_string(),
            flag(self.verify_no_diff).to_string(),
        );
        overlay.insert(
            PERF_CHECK_NOCACHING.to_string(),
            flag(!self.caching_enabled).to_string(),
        );

        // User values go last and may override the fixed flags.
        for (key, value) in self.selected_env_vars() {
            overlay.insert(key.clone(), value.clone());
        }

        overlay
    }
}

fn flag(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

/// Builder for [`EnvironmentContext`].
#[derive(Debug, Clone, Default)]
pub struct EnvironmentContextBuilder {
    context: EnvironmentContext,
}

impl EnvironmentContextBuilder {
    /// Select the reference side (`true`) or the branch side (`false`).
    #[must_use]
    pub fn reference(mut self, is_reference: bool) -> Self {
        self.context.is_reference = is_reference;
        self
    }

    #[must_use]
    pub fn verify_no_diff(mut self, verify: bool) -> Self {
        self.context.verify_no_diff = verify;
        self
    }

    #[must_use]
    pub fn caching_enabled(mut self, enabled: bool) -> Self {
        self.context.caching_enabled = enabled;
        self
    }

    /// Add one variable for branch runs.
    #[must_use]
    pub fn branch_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .branch_env_vars
            .insert(key.into(), value.into());
        self
    }

    /// Add one variable for reference runs.
    #[must_use]
    pub fn reference_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .reference_env_vars
            .insert(key.into(), value.into());
        self
    }

    /// Replace all branch variables.
    #[must_use]
    pub fn branch_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.context.branch_env_vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Replace all reference variables.
    #[must_use]
    pub fn reference_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.context.reference_env_vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn build(self) -> EnvironmentContext {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_context() -> EnvironmentContext {
        EnvironmentContext::builder()
            .branch_env_vars([("TEST_ENV", "yes"), ("TEST_ENV2", "no")])
            .reference_env_vars([("TEST_ENV", "no"), ("TEST_ENV2", "yes")])
            .build()
    }

    #[rstest]
    #[case(false, false, "0", "1")]
    #[case(false, true, "0", "0")]
    #[case(true, false, "1", "1")]
    #[case(true, true, "1", "0")]
    fn test_overlay_flags(
        #[case] verify_no_diff: bool,
        #[case] caching_enabled: bool,
        #[case] expected_verification: &str,
        #[case] expected_nocaching: &str,
    ) {
        let context = EnvironmentContext::builder()
            .verify_no_diff(verify_no_diff)
            .caching_enabled(caching_enabled)
            .build();

        let overlay = context.launch_overlay();

        assert_eq!(overlay.get(PERF_CHECK).map(String::as_str), Some("1"));
        assert_eq!(
            overlay.get(PERF_CHECK_VERIFICATION).map(String::as_str),
            Some(expected_verification)
        );
        assert_eq!(
            overlay.get(PERF_CHECK_NOCACHING).map(String::as_str),
            Some(expected_nocaching)
        );
    }

    #[test]
    fn test_branch_context_selects_branch_vars() {
        let overlay = sample_context().launch_overlay();

        assert_eq!(overlay["TEST_ENV"], "yes");
        assert_eq!(overlay["TEST_ENV2"], "no");
    }

    #[test]
    fn test_reference_context_selects_reference_vars() {
        let overlay = sample_context().for_reference().launch_overlay();

        assert_eq!(overlay["TEST_ENV"], "no");
        assert_eq!(overlay["TEST_ENV2"], "yes");
    }

    #[test]
    fn test_side_flip_keeps_options() {
        let branch = EnvironmentContext::builder()
            .verify_no_diff(true)
            .caching_enabled(false)
            .build();
        let reference = branch.for_reference();

        assert_eq!(reference.side(), RunSide::Reference);
        assert!(reference.verify_no_diff());
        assert!(!reference.caching_enabled());
        assert_eq!(reference.for_branch(), branch);
    }

    #[test]
    fn test_user_vars_override_fixed_flags() {
        let context = EnvironmentContext::builder()
            .branch_env(PERF_CHECK_NOCACHING, "1")
            .build();

        assert_eq!(context.launch_overlay()[PERF_CHECK_NOCACHING], "1");
    }

    #[test]
    fn test_default_is_branch_with_caching() {
        let context = EnvironmentContext::default();
        assert_eq!(context.side(), RunSide::Branch);
        assert!(context.caching_enabled());
        assert!(!context.verify_no_diff());
        assert_eq!(context.launch_overlay().len(), 3);
    }
}
