//! User-visible refusals and failures.
//!
//! Plumbing errors travel as `anyhow::Error`; anything a user action can be
//! refused with is one of these variants so callers can tell "wrong password"
//! apart from "the helper failed".

use crate::policy::EnforcementState;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Credential verification failed for a gated action
    #[error("credential verification failed")]
    Unauthorized,

    /// Focus cannot be entered from a policy-assigned state
    #[error("focus mode is unavailable while the policy state is {0}")]
    FocusUnavailable(EnforcementState),

    /// The remote policy does not permit this feature
    #[error("the {0} feature is disabled by policy")]
    FeatureDisabled(&'static str),

    /// Remote policy could not be fetched or failed validation
    #[error("policy fetch failed: {0}")]
    PolicyFetch(String),

    /// Privilege escalation was declined or the helper failed
    #[error("privileged operation failed: {0}")]
    Elevation(String),

    /// Local filesystem or service-supervisor failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl GuardError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        GuardError::Storage(format!("{:#}", err))
    }
}
