// Credential gate for irreversible actions
//
// A single shared secret, stored as a salted SHA-256 hex digest inside the
// policy. The gate is never vacuously open: the first verification against a
// policy with no stored hash installs the hash of a known fallback secret.

use crate::error::GuardError;
use crate::policy::PolicyStore;
use sha2::{Digest, Sha256};

const STATIC_SALT: &str = "netpulse-lullaby-static-salt";

/// Bootstrap secret installed on first verification; meant to be changed
pub const FALLBACK_SECRET: &str = "lullaby";

/// Proof that a credential check passed.
///
/// Only the gate can construct one, so any function taking `&Authorized` is
/// statically unreachable without a successful `authorize`.
#[derive(Debug)]
pub struct Authorized {
    _private: (),
}

pub struct CredentialGate {
    /// When set, changing the secret requires proving the current one
    require_current_for_change: bool,
}

impl CredentialGate {
    pub fn new(require_current_for_change: bool) -> Self {
        Self {
            require_current_for_change,
        }
    }

    /// Salted hex digest of `secret`
    pub fn hash(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(STATIC_SALT.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check `candidate` against the secret currently on disk
    pub fn verify(&self, store: &mut PolicyStore, candidate: &str) -> bool {
        store.refresh();
        if store.current().credential_hash.is_none() {
            log::warn!("No credential set, installing the fallback credential");
            store.update(|p| p.credential_hash = Some(Self::hash(FALLBACK_SECRET)));
        }

        let Some(stored) = store.current().credential_hash.as_deref() else {
            return false;
        };

        constant_time_eq(stored.as_bytes(), Self::hash(candidate).as_bytes())
    }

    /// Verify and hand out a proof token for gated operations
    pub fn authorize(&self, store: &mut PolicyStore, candidate: &str) -> Result<Authorized, GuardError> {
        if self.verify(store, candidate) {
            Ok(Authorized { _private: () })
        } else {
            log::warn!("Credential verification failed");
            Err(GuardError::Unauthorized)
        }
    }

    /// Replace the stored secret.
    ///
    /// `current` is only consulted when the gate was built with
    /// `require_current_for_change`; otherwise any caller may replace it.
    pub fn set_credential(
        &self,
        store: &mut PolicyStore,
        new_secret: &str,
        current: Option<&str>,
    ) -> Result<(), GuardError> {
        if self.require_current_for_change {
            self.authorize(store, current.unwrap_or_default())?;
        }

        let hash = Self::hash(new_secret);
        store.update(|p| p.credential_hash = Some(hash));
        log::info!("Credential updated");
        Ok(())
    }

    /// Whether the stored secret is something other than the fallback
    pub fn has_custom_credential(&self, store: &PolicyStore) -> bool {
        store
            .current()
            .credential_hash
            .as_deref()
            .is_some_and(|h| h != Self::hash(FALLBACK_SECRET))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use crate::policy::store::PolicyFile;

    fn store() -> PolicyStore {
        PolicyStore::in_memory(Policy::default())
    }

    #[test]
    fn test_hash_is_salted_sha256_hex() {
        let hash = CredentialGate::hash("lullaby");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, hex::encode(Sha256::digest(b"lullaby")));
    }

    #[test]
    fn test_fresh_store_accepts_fallback() {
        let gate = CredentialGate::new(false);
        let mut store = store();

        assert!(gate.verify(&mut store, "lullaby"));
        assert!(store.current().credential_hash.is_some());
        assert!(!gate.has_custom_credential(&store));
    }

    #[test]
    fn test_gate_never_vacuously_open() {
        let gate = CredentialGate::new(false);
        let mut store = store();

        assert!(!gate.verify(&mut store, ""));
        assert!(!gate.verify(&mut store, "anything"));
    }

    #[test]
    fn test_set_credential_replaces_fallback() {
        let gate = CredentialGate::new(false);
        let mut store = store();

        gate.set_credential(&mut store, "newpass", None).unwrap();

        assert!(!gate.verify(&mut store, "lullaby"));
        assert!(gate.verify(&mut store, "newpass"));
        assert!(gate.has_custom_credential(&store));
    }

    #[test]
    fn test_strict_change_requires_current() {
        let gate = CredentialGate::new(true);
        let mut store = store();

        assert!(matches!(
            gate.set_credential(&mut store, "newpass", Some("wrong")),
            Err(GuardError::Unauthorized)
        ));
        assert!(gate.verify(&mut store, "lullaby"));

        gate.set_credential(&mut store, "newpass", Some("lullaby")).unwrap();
        assert!(gate.verify(&mut store, "newpass"));
    }

    #[test]
    fn test_credential_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = PolicyFile::new(dir.path().join("policy.json"));
        let gate = CredentialGate::new(false);

        let mut first = PolicyStore::open(Some(file.clone()));
        gate.set_credential(&mut first, "newpass", None).unwrap();

        let mut second = PolicyStore::open(Some(file));
        assert!(gate.verify(&mut second, "newpass"));
        assert!(gate.authorize(&mut second, "lullaby").is_err());
    }

    #[test]
    fn test_running_store_sees_changed_credential() {
        let dir = tempfile::tempdir().unwrap();
        let file = PolicyFile::new(dir.path().join("policy.json"));
        let gate = CredentialGate::new(false);

        let mut agent = PolicyStore::open(Some(file.clone()));
        assert!(gate.verify(&mut agent, "lullaby"));

        let mut cli = PolicyStore::open(Some(file.clone()));
        gate.set_credential(&mut cli, "newpass", None).unwrap();

        assert!(!gate.verify(&mut agent, "lullaby"));
        assert!(gate.verify(&mut agent, "newpass"));

        agent.update(|p| p.enter_focus()).unwrap();
        let on_disk = file.load().unwrap();
        assert_eq!(on_disk.credential_hash, Some(CredentialGate::hash("newpass")));
        assert!(on_disk.is_focus());
    }
}
