use crate::domain::models::OAuthToken;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Process-wide holder of the bearer credential.
///
/// Constructed once and shared by handle. The in-memory copy is what requests
/// use; the credential store only backs it across restarts, so invalidating
/// the session never touches the stored record.
pub struct Session {
    credential_store: Arc<dyn CredentialStore>,
    credential: RwLock<Option<OAuthToken>>,
    authenticated: watch::Sender<bool>,
}

impl Session {
    pub fn new(credential_store: Arc<dyn CredentialStore>) -> Self {
        let (authenticated, _) = watch::channel(false);
        Self {
            credential_store,
            credential: RwLock::new(None),
            authenticated,
        }
    }

    /// Loads the stored credential. Returns whether the session is now
    /// authenticated; an expired record is discarded from the store.
    pub fn restore(&self, now: DateTime<Utc>) -> Result<bool, InfraError> {
        let Some(token) = self.credential_store.load_token()? else {
            debug!("no stored credential found");
            return Ok(false);
        };

        if !token.is_usable_at(now) {
            warn!(expires_at = ?token.expires_at, "stored credential has expired");
            self.credential_store.delete_token()?;
            return Ok(false);
        }

        self.set_credential(Some(token));
        info!("restored stored credential");
        Ok(true)
    }

    /// Persists a freshly issued credential and marks the session
    /// authenticated. Nothing changes in memory if the store rejects it.
    pub fn establish(&self, token: OAuthToken) -> Result<(), InfraError> {
        self.credential_store.save_token(&token)?;
        self.set_credential(Some(token));
        Ok(())
    }

    pub fn invalidate(&self) {
        self.set_credential(None);
    }

    /// Drops the in-memory credential only while it is still `access_token`.
    /// A credential established after that token was read is kept.
    pub fn invalidate_if(&self, access_token: &str) -> bool {
        {
            let mut guard = self
                .credential
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match guard.as_ref() {
                Some(current) if current.access_token == access_token => *guard = None,
                _ => return false,
            }
        }
        self.authenticated.send_replace(false);
        true
    }

    pub fn access_token(&self) -> Option<String> {
        let guard = self
            .credential
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_ref().map(|token| token.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    fn set_credential(&self, token: Option<OAuthToken>) {
        let authenticated = token.is_some();
        {
            let mut guard = self
                .credential
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = token;
        }
        self.authenticated.send_replace(authenticated);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
