// Enforcement policy model

pub mod remote;
pub mod store;

use crate::error::GuardError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use remote::{MergeOutcome, PolicyClient, RemotePolicyDocument};
pub use store::PolicyStore;

/// Tenant recorded on a policy that never saw a remote document
pub const DEFAULT_TENANT: &str = "DEFAULT";

/// Process names exempt from suspension until a remote policy says otherwise
pub const DEFAULT_WHITELIST: &[&str] = &[
    // Conferencing
    "zoom",
    "zoom.us",
    "Teams",
    "Microsoft Teams",
    "Slack",
    "Webex",
    "Skype",
    "FaceTime",
    // Browsers
    "Google Chrome",
    "Safari",
    "Firefox",
    // VPN
    "Tailscale",
    "Cloudflare",
    "CloudflareWARP",
    "WARP",
    "AnyConnect",
    "GlobalProtect",
    // Developer tools
    "Antigravity",
    "language_server",
    // OS core
    "NetPulse",
    "ControlCenter",
    "SystemUIServer",
    "WindowServer",
    "trustd",
    "mDNSResponder",
    "hidd",
    "coreaudiod",
    "bluetoothd",
];

/// Enforcement level. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnforcementState {
    /// Standard operation, no suspension
    #[default]
    Normal,
    /// User-initiated meeting/focus mode; the only state that enforces
    Focus,
    /// Baseline corporate rules (PDP)
    CorporateDefault,
    /// Corporate rules with a temporary risk-acceptance exception
    CorporateDefaultRiskAccepted,
    /// Incident-triggered maximum restriction
    Lockdown,
}

impl EnforcementState {
    /// Map a remote `enforcement_mode` string to a state.
    ///
    /// Returns `None` for unknown modes; the caller keeps its current state.
    pub fn from_remote_mode(mode: &str) -> Option<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "monitor_only" | "normal" => Some(EnforcementState::Normal),
            "soft" | "pdp" | "corporate_default" => Some(EnforcementState::CorporateDefault),
            "pdp_risk_accepted" | "risk_accepted" => {
                Some(EnforcementState::CorporateDefaultRiskAccepted)
            }
            "strict" | "lockdown" => Some(EnforcementState::Lockdown),
            _ => None,
        }
    }

    /// Whether a remote mode takes the meeting-mode capability away
    pub fn mode_forbids_focus(mode: &str) -> bool {
        mode.trim().eq_ignore_ascii_case("soft")
    }
}

impl fmt::Display for EnforcementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EnforcementState::Normal => "Normal",
            EnforcementState::Focus => "Focus / Meeting",
            EnforcementState::CorporateDefault => "PDP (Corporate Default)",
            EnforcementState::CorporateDefaultRiskAccepted => "PDP Risk Accepted",
            EnforcementState::Lockdown => "Lock Down",
        };
        f.write_str(label)
    }
}

/// Feature flags delivered by the remote policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFeatures {
    pub meeting_mode: bool,
    pub hardening: bool,
}

/// The durable policy record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub version: u64,
    pub tenant_id: String,
    pub current_state: EnforcementState,
    /// Case-insensitive substring patterns matched against process names
    pub whitelist: Vec<String>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<PolicyFeatures>,
}

impl Default for Policy {
    /// Version 0: any published remote document is newer than the seed
    fn default() -> Self {
        Self {
            version: 0,
            tenant_id: DEFAULT_TENANT.to_string(),
            current_state: EnforcementState::Normal,
            whitelist: DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect(),
            last_updated: Utc::now(),
            credential_hash: None,
            features: None,
        }
    }
}

impl Policy {
    pub fn is_focus(&self) -> bool {
        self.current_state == EnforcementState::Focus
    }

    /// Meeting mode is permitted until a remote policy says otherwise
    pub fn meeting_mode_permitted(&self) -> bool {
        self.features.is_none_or(|f| f.meeting_mode)
    }

    pub fn hardening_permitted(&self) -> bool {
        self.features.is_none_or(|f| f.hardening)
    }

    /// Normal -> Focus. Policy-assigned states cannot be left this way.
    pub fn enter_focus(&mut self) -> Result<(), GuardError> {
        match self.current_state {
            EnforcementState::Focus => Ok(()),
            EnforcementState::Normal => {
                if !self.meeting_mode_permitted() {
                    return Err(GuardError::FeatureDisabled("meeting mode"));
                }
                self.current_state = EnforcementState::Focus;
                Ok(())
            }
            other => Err(GuardError::FocusUnavailable(other)),
        }
    }

    /// Focus -> Normal. Returns whether focus was active.
    pub fn leave_focus(&mut self) -> bool {
        if self.is_focus() {
            self.current_state = EnforcementState::Normal;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_policy() {
        let policy = Policy::default();
        assert_eq!(policy.current_state, EnforcementState::Normal);
        assert!(policy.whitelist.iter().any(|w| w == "zoom"));
        assert!(policy.credential_hash.is_none());
        assert!(policy.meeting_mode_permitted());
        assert_eq!(policy.version, 0);
    }

    #[test]
    fn test_seed_whitelist_keeps_developer_tools() {
        let policy = Policy::default();
        assert!(crate::enforcement::is_whitelisted(&policy.whitelist, "Antigravity Helper"));
        assert!(crate::enforcement::is_whitelisted(
            &policy.whitelist,
            "language_server_macos_arm"
        ));
    }

    #[test]
    fn test_focus_round_trip_returns_to_normal() {
        let mut policy = Policy::default();
        policy.enter_focus().unwrap();
        assert!(policy.is_focus());
        assert!(policy.leave_focus());
        assert_eq!(policy.current_state, EnforcementState::Normal);
        assert!(!policy.leave_focus());
    }

    #[test]
    fn test_focus_refused_from_policy_states() {
        let mut policy = Policy {
            current_state: EnforcementState::Lockdown,
            ..Policy::default()
        };
        assert!(matches!(
            policy.enter_focus(),
            Err(GuardError::FocusUnavailable(EnforcementState::Lockdown))
        ));
    }

    #[test]
    fn test_focus_refused_when_feature_disabled() {
        let mut policy = Policy {
            features: Some(PolicyFeatures {
                meeting_mode: false,
                hardening: true,
            }),
            ..Policy::default()
        };
        assert!(matches!(
            policy.enter_focus(),
            Err(GuardError::FeatureDisabled(_))
        ));
        assert!(policy.hardening_permitted());
    }

    #[test]
    fn test_remote_mode_table() {
        use EnforcementState::*;
        assert_eq!(EnforcementState::from_remote_mode("monitor_only"), Some(Normal));
        assert_eq!(EnforcementState::from_remote_mode("soft"), Some(CorporateDefault));
        assert_eq!(
            EnforcementState::from_remote_mode("PDP_RISK_ACCEPTED"),
            Some(CorporateDefaultRiskAccepted)
        );
        assert_eq!(EnforcementState::from_remote_mode("strict"), Some(Lockdown));
        assert_eq!(EnforcementState::from_remote_mode("chaos"), None);
        assert!(EnforcementState::mode_forbids_focus("soft"));
        assert!(!EnforcementState::mode_forbids_focus("strict"));
    }

    #[test]
    fn test_policy_json_uses_iso8601() {
        let policy = Policy::default();
        let json = serde_json::to_value(&policy).unwrap();
        let stamp = json["last_updated"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
    }
}
