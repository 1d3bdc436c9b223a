// Remote policy document: fetch, validation and monotonic merge

use super::{EnforcementState, Policy, PolicyFeatures};
use crate::error::GuardError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Versioned policy document served by the policy endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePolicyDocument {
    pub meta: RemoteMeta,
    pub policy: RemoteConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMeta {
    pub version: u64,
    pub last_updated: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// "monitor_only", "soft", "strict", ...
    pub enforcement_mode: String,
    pub global_whitelist: Vec<String>,
    pub features: PolicyFeatures,
}

impl RemotePolicyDocument {
    /// Decode an endpoint response. Anything but a 200 with a valid body is a fetch error.
    pub fn from_response(status: u16, body: &[u8]) -> Result<Self, GuardError> {
        if status != 200 {
            return Err(GuardError::PolicyFetch(format!("endpoint returned status {}", status)));
        }

        let document: RemotePolicyDocument = serde_json::from_slice(body)
            .map_err(|e| GuardError::PolicyFetch(format!("invalid policy document: {}", e)))?;

        document.validate()?;
        Ok(document)
    }

    /// Structural checks serde cannot express
    fn validate(&self) -> Result<(), GuardError> {
        if self.meta.tenant_id.trim().is_empty() {
            return Err(GuardError::PolicyFetch("policy document has no tenant".to_string()));
        }

        // An empty pattern is a substring of every process name
        if self.policy.global_whitelist.iter().any(|w| w.trim().is_empty()) {
            return Err(GuardError::PolicyFetch(
                "policy whitelist contains an empty pattern".to_string(),
            ));
        }

        Ok(())
    }
}

/// What a merge did to the local policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Remote version was not newer; nothing changed
    Ignored { local_version: u64, remote_version: u64 },
    Applied {
        previous_state: EnforcementState,
        new_state: EnforcementState,
    },
}

impl MergeOutcome {
    /// Whether this merge took the agent out of focus
    pub fn ended_focus(&self) -> bool {
        matches!(
            self,
            MergeOutcome::Applied { previous_state: EnforcementState::Focus, new_state }
                if *new_state != EnforcementState::Focus
        )
    }
}

impl Policy {
    /// Merge a validated remote document. Only a strictly newer version is applied.
    pub fn merge_remote(&mut self, document: &RemotePolicyDocument) -> MergeOutcome {
        let remote_version = document.meta.version;
        if remote_version <= self.version {
            log::debug!(
                "Ignoring remote policy v{} (local v{})",
                remote_version,
                self.version
            );
            return MergeOutcome::Ignored {
                local_version: self.version,
                remote_version,
            };
        }

        let previous_state = self.current_state;
        let mode = document.policy.enforcement_mode.as_str();

        let mut features = document.policy.features;
        if EnforcementState::mode_forbids_focus(mode) {
            features.meeting_mode = false;
        }

        self.version = remote_version;
        self.tenant_id = document.meta.tenant_id.clone();
        self.whitelist = document.policy.global_whitelist.clone();
        self.features = Some(features);

        match EnforcementState::from_remote_mode(mode) {
            // A Normal-class mode leaves the user's own focus choice alone
            Some(EnforcementState::Normal) if previous_state == EnforcementState::Focus => {}
            Some(state) => self.current_state = state,
            None => log::warn!("Unknown enforcement mode {:?}, keeping {}", mode, previous_state),
        }

        if self.is_focus() && !features.meeting_mode {
            self.current_state = EnforcementState::Normal;
        }

        log::info!(
            "Applied remote policy v{} for {}: {} -> {}",
            remote_version,
            self.tenant_id,
            previous_state,
            self.current_state
        );

        MergeOutcome::Applied {
            previous_state,
            new_state: self.current_state,
        }
    }
}

/// HTTP client for the policy endpoint
#[derive(Clone)]
pub struct PolicyClient {
    http: reqwest::Client,
    endpoint: String,
}

impl PolicyClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("netpulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// GET the endpoint and decode the document
    pub async fn fetch(&self) -> Result<RemotePolicyDocument, GuardError> {
        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| GuardError::PolicyFetch(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| GuardError::PolicyFetch(e.to_string()))?;

        let document = RemotePolicyDocument::from_response(status, &body)?;
        log::info!("Fetched remote policy v{}", document.meta.version);
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(version: u64, mode: &str, whitelist: &[&str], meeting_mode: bool) -> RemotePolicyDocument {
        RemotePolicyDocument {
            meta: RemoteMeta {
                version,
                last_updated: "2026-10-19T08:00:00Z".to_string(),
                tenant_id: "ACME".to_string(),
            },
            policy: RemoteConfig {
                enforcement_mode: mode.to_string(),
                global_whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
                features: PolicyFeatures {
                    meeting_mode,
                    hardening: true,
                },
            },
        }
    }

    const BODY: &str = r#"{
        "meta": { "version": 3, "last_updated": "2026-10-19T08:00:00Z", "tenant_id": "ACME" },
        "policy": {
            "enforcement_mode": "strict",
            "global_whitelist": ["zoom", "Slack"],
            "features": { "meeting_mode": true, "hardening": false }
        }
    }"#;

    #[test]
    fn test_decode_valid_response() {
        let doc = RemotePolicyDocument::from_response(200, BODY.as_bytes()).unwrap();
        assert_eq!(doc.meta.version, 3);
        assert_eq!(doc.policy.global_whitelist, vec!["zoom", "Slack"]);
        assert!(!doc.policy.features.hardening);
    }

    #[test]
    fn test_non_200_is_fetch_error() {
        let err = RemotePolicyDocument::from_response(503, BODY.as_bytes()).unwrap_err();
        assert!(matches!(err, GuardError::PolicyFetch(_)));
    }

    #[test]
    fn test_schema_mismatch_is_fetch_error() {
        let body = r#"{ "meta": { "version": "three" }, "policy": {} }"#;
        let err = RemotePolicyDocument::from_response(200, body.as_bytes()).unwrap_err();
        assert!(matches!(err, GuardError::PolicyFetch(_)));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let body = BODY.replace(r#""Slack""#, r#""  ""#);
        assert!(RemotePolicyDocument::from_response(200, body.as_bytes()).is_err());
    }

    #[test]
    fn test_equal_or_lower_version_is_ignored() {
        let mut policy = Policy {
            version: 5,
            ..Policy::default()
        };
        let original = policy.clone();

        for version in [1, 5] {
            let outcome = policy.merge_remote(&document(version, "strict", &["only"], false));
            assert!(matches!(outcome, MergeOutcome::Ignored { .. }));
            assert_eq!(policy, original);
        }
    }

    #[test]
    fn test_first_published_version_applies_to_seed() {
        let mut policy = Policy::default();
        let outcome = policy.merge_remote(&document(1, "soft", &["zoom"], false));

        assert!(matches!(outcome, MergeOutcome::Applied { .. }));
        assert_eq!(policy.version, 1);
        assert_eq!(policy.current_state, EnforcementState::CorporateDefault);
        assert!(!policy.meeting_mode_permitted());
    }

    #[test]
    fn test_newer_version_overwrites() {
        let mut policy = Policy::default();
        let outcome = policy.merge_remote(&document(2, "strict", &["only"], true));

        assert_eq!(policy.version, 2);
        assert_eq!(policy.tenant_id, "ACME");
        assert_eq!(policy.whitelist, vec!["only".to_string()]);
        assert_eq!(policy.current_state, EnforcementState::Lockdown);
        assert_eq!(
            outcome,
            MergeOutcome::Applied {
                previous_state: EnforcementState::Normal,
                new_state: EnforcementState::Lockdown
            }
        );
    }

    #[test]
    fn test_soft_mode_forces_focus_off() {
        let mut policy = Policy::default();
        policy.enter_focus().unwrap();

        let outcome = policy.merge_remote(&document(2, "soft", &["zoom"], true));

        assert!(outcome.ended_focus());
        assert_eq!(policy.current_state, EnforcementState::CorporateDefault);
        assert!(!policy.meeting_mode_permitted());
    }

    #[test]
    fn test_monitor_only_keeps_user_focus() {
        let mut policy = Policy::default();
        policy.enter_focus().unwrap();

        let outcome = policy.merge_remote(&document(2, "monitor_only", &["zoom"], true));
        assert!(!outcome.ended_focus());
        assert!(policy.is_focus());

        let outcome = policy.merge_remote(&document(3, "monitor_only", &["zoom"], false));
        assert!(outcome.ended_focus());
        assert_eq!(policy.current_state, EnforcementState::Normal);
    }

    #[test]
    fn test_unknown_mode_keeps_state() {
        let mut policy = Policy::default();
        policy.merge_remote(&document(2, "chaos", &["zoom"], true));
        assert_eq!(policy.current_state, EnforcementState::Normal);
        assert_eq!(policy.version, 2);
    }
}
