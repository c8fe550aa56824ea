use crate::domain::models::OAuthToken;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;

pub trait CredentialStore: Send + Sync {
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError>;
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError>;
    fn delete_token(&self) -> Result<(), InfraError>;
}

/// Stores the credential in the platform vault (Keychain, Credential Manager,
/// kernel keyring) through `keyring`, as one versioned JSON record.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

const VAULT_RECORD_VERSION: u8 = 1;

/// Vault payload. Records written before versioning carry no `version` and
/// read as version 0.
#[derive(Debug, Serialize, Deserialize)]
struct VaultRecord {
    #[serde(default)]
    version: u8,
    #[serde(flatten)]
    token: OAuthToken,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| self.vault_error("open", error))
    }

    fn vault_error(&self, action: &str, error: keyring::Error) -> InfraError {
        InfraError::Credential(format!(
            "failed to {action} {}/{}: {error}",
            self.service_name, self.account_name
        ))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("ticktick-menubar", "TickTickAccessToken")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError> {
        let record = VaultRecord {
            version: VAULT_RECORD_VERSION,
            token: token.clone(),
        };
        let payload = serde_json::to_string(&record)?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| self.vault_error("write", error))?;
        debug!(service = %self.service_name, "credential written to vault");
        Ok(())
    }

    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        match self.entry()?.get_password() {
            Ok(payload) => read_vault_payload(&payload),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service_name, "vault holds no credential");
                Ok(None)
            }
            Err(error) => Err(self.vault_error("read", error)),
        }
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(self.vault_error("delete", error)),
        }
    }
}

/// Blank payloads count as no credential; anything that is not a JSON object
/// is a bare access token left by older builds.
fn read_vault_payload(payload: &str) -> Result<Option<OAuthToken>, InfraError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(None);
    }
    if !payload.starts_with('{') {
        return Ok(Some(OAuthToken::bearer(payload)));
    }

    let record: VaultRecord = serde_json::from_str(payload)
        .map_err(|error| InfraError::Credential(format!("unreadable vault record: {error}")))?;
    if record.version > VAULT_RECORD_VERSION {
        return Err(InfraError::Credential(format!(
            "vault record version {} is newer than supported version {VAULT_RECORD_VERSION}",
            record.version
        )));
    }
    Ok(Some(record.token))
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    token: Mutex<Option<OAuthToken>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(token.clone());
        Ok(())
    }

    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn token_pattern() -> impl Strategy<Value = String> {
        "[A-Za-z0-9._\\-]{1,64}".prop_map(|value| value.to_string())
    }

    fn arb_oauth_token() -> impl Strategy<Value = OAuthToken> {
        (
            token_pattern(),
            token_pattern(),
            prop::option::of(token_pattern()),
            prop::option::of(0i64..4_000_000_000i64),
        )
            .prop_map(|(access_token, token_type, scope, expires_at)| OAuthToken {
                access_token,
                token_type,
                scope,
                expires_at: expires_at.and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0)),
            })
    }

    // Property: credentials survive a store round-trip unchanged
    proptest! {
        #[test]
        fn in_memory_store_roundtrip(token in arb_oauth_token()) {
            let store = InMemoryCredentialStore::default();
            store.save_token(&token).expect("save token");
            let loaded = store.load_token().expect("load token").expect("token exists");
            prop_assert_eq!(loaded, token);
        }
    }

    // Property: a written vault record reads back as the same credential
    proptest! {
        #[test]
        fn vault_record_roundtrip(token in arb_oauth_token()) {
            let record = VaultRecord { version: VAULT_RECORD_VERSION, token: token.clone() };
            let payload = serde_json::to_string(&record).expect("serialize record");
            prop_assert_eq!(read_vault_payload(&payload).expect("read record"), Some(token));
        }
    }

    #[test]
    fn bare_token_payload_is_read_as_bearer_token() {
        let token = read_vault_payload("0d1f6c1e-2f7a-4d3b-9a52-7b1c6f2e9d10\n")
            .expect("read payload")
            .expect("token present");
        assert_eq!(token.access_token, "0d1f6c1e-2f7a-4d3b-9a52-7b1c6f2e9d10");
        assert_eq!(token.token_type, "bearer");
        assert!(token.expires_at.is_none());
    }

    #[test]
    fn unversioned_record_is_accepted() {
        let payload = r#"{"access_token":"access","token_type":"bearer","scope":"tasks:read","expires_at":null}"#;
        let token = read_vault_payload(payload).expect("read payload").expect("token present");
        assert_eq!(token.access_token, "access");
        assert_eq!(token.scope.as_deref(), Some("tasks:read"));
    }

    #[test]
    fn blank_payload_is_no_credential() {
        assert!(read_vault_payload("  \n").expect("read payload").is_none());
    }

    #[test]
    fn newer_or_broken_records_are_rejected() {
        let newer = r#"{"version":9,"access_token":"access","token_type":"bearer"}"#;
        assert!(matches!(read_vault_payload(newer), Err(InfraError::Credential(_))));
        assert!(matches!(
            read_vault_payload("{\"access_token\":"),
            Err(InfraError::Credential(_))
        ));
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[test]
    fn default_store_uses_platform_vault() {
        // Sandboxes may refuse the vault outright; the mock store never fails to open.
        if let Ok(entry) = KeyringCredentialStore::default().entry() {
            assert!(
                entry
                    .get_credential()
                    .downcast_ref::<keyring::mock::MockCredential>()
                    .is_none()
            );
        }
    }

    #[test]
    fn delete_clears_in_memory_token() {
        let store = InMemoryCredentialStore::default();
        store.save_token(&OAuthToken::bearer("access")).expect("save token");
        store.delete_token().expect("delete token");
        assert!(store.load_token().expect("load token").is_none());
    }
}
