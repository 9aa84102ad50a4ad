//! Credential storage for Jamf Pro API client credentials
//!
//! Credentials are opaque secrets keyed by a logical name and are kept in the
//! platform keychain (macOS Keychain, Windows Credential Manager, Linux kernel
//! keyring). They are never written to plaintext files.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Mutex;

use keyring::Entry;
use tracing::{debug, info, warn};
use url::Url;

use crate::constants::auth;
use crate::errors::{AuthError, AuthResult};

/// Logical name of a stored credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    Url,
    ClientId,
    ClientSecret,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 3] = [
        CredentialKey::Url,
        CredentialKey::ClientId,
        CredentialKey::ClientSecret,
    ];

    /// Name of the keychain entry backing this credential
    pub fn entry_name(&self) -> &'static str {
        match self {
            CredentialKey::Url => auth::URL_KEY,
            CredentialKey::ClientId => auth::CLIENT_ID_KEY,
            CredentialKey::ClientSecret => auth::CLIENT_SECRET_KEY,
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.entry_name())
    }
}

impl FromStr for CredentialKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "url" => Ok(CredentialKey::Url),
            "client-id" => Ok(CredentialKey::ClientId),
            "client-secret" => Ok(CredentialKey::ClientSecret),
            other => Err(format!(
                "unknown credential '{}', expected one of: url, client-id, client-secret",
                other
            )),
        }
    }
}

/// Store/retrieve interface for persisted secrets
pub trait CredentialStore: Send + Sync {
    /// Get a secret, `None` if it has never been stored
    fn get(&self, key: CredentialKey) -> AuthResult<Option<String>>;

    /// Store or replace a secret
    fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()>;

    /// Delete a secret; deleting a missing secret is not an error
    fn delete(&self, key: CredentialKey) -> AuthResult<()>;
}

/// Credential store backed by the platform keychain
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: CredentialKey) -> AuthResult<Entry> {
        Entry::new(&self.service_name, key.entry_name()).map_err(|e| {
            AuthError::Keychain(format!("Failed to open keychain entry {}: {}", key, e))
        })
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(auth::KEYCHAIN_SERVICE)
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: CredentialKey) -> AuthResult<Option<String>> {
        debug!(service = %self.service_name, %key, "Retrieving credential from keychain");
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => {
                debug!(%key, "No credential found in keychain");
                Ok(None)
            }
            Err(e) => Err(AuthError::Keychain(format!(
                "Failed to retrieve {}: {}",
                key, e
            ))),
        }
    }

    fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()> {
        debug!(service = %self.service_name, %key, "Storing credential in keychain");
        self.entry(key)?
            .set_password(value)
            .map_err(|e| AuthError::Keychain(format!("Failed to store {}: {}", key, e)))
    }

    fn delete(&self, key: CredentialKey) -> AuthResult<()> {
        debug!(service = %self.service_name, %key, "Deleting credential from keychain");
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Keychain(format!(
                "Failed to delete {}: {}",
                key, e
            ))),
        }
    }
}

/// In-process credential store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<CredentialKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with a full credential set
    pub fn with_credentials(url: &str, client_id: &str, client_secret: &str) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.lock() {
            values.insert(CredentialKey::Url, url.to_string());
            values.insert(CredentialKey::ClientId, client_id.to_string());
            values.insert(CredentialKey::ClientSecret, client_secret.to_string());
        }
        store
    }

    fn lock(&self) -> AuthResult<std::sync::MutexGuard<'_, HashMap<CredentialKey, String>>> {
        self.values
            .lock()
            .map_err(|_| AuthError::Keychain("memory store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: CredentialKey) -> AuthResult<Option<String>> {
        Ok(self.lock()?.get(&key).cloned())
    }

    fn set(&self, key: CredentialKey, value: &str) -> AuthResult<()> {
        self.lock()?.insert(key, value.to_string());
        Ok(())
    }

    fn delete(&self, key: CredentialKey) -> AuthResult<()> {
        self.lock()?.remove(&key);
        Ok(())
    }
}

/// API client credentials loaded for a single token exchange
#[derive(Clone)]
pub struct ClientCredentials {
    pub base_url: Url,
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    /// Load the full credential set from a store
    pub fn load(store: &dyn CredentialStore) -> AuthResult<Self> {
        let url = require(store, CredentialKey::Url)?;
        let client_id = require(store, CredentialKey::ClientId)?;
        let client_secret = require(store, CredentialKey::ClientSecret)?;

        Ok(Self {
            base_url: normalize_server_url(&url)?,
            client_id,
            client_secret,
        })
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("base_url", &self.base_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

fn require(store: &dyn CredentialStore, key: CredentialKey) -> AuthResult<String> {
    match store.get(key)? {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AuthError::MissingCredential {
            key: key.to_string(),
        }),
    }
}

/// Normalize a server URL: default to https, drop query, fragment and trailing slash
pub fn normalize_server_url(raw: &str) -> AuthResult<Url> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| AuthError::InvalidUrl {
        url: raw.to_string(),
        error: e.to_string(),
    })?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(AuthError::InvalidUrl {
            url: raw.to_string(),
            error: "missing host".to_string(),
        });
    }

    url.set_query(None);
    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);
    Ok(url)
}

/// Authentication status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    pub url_set: bool,
    pub client_id_set: bool,
    pub client_secret_set: bool,
}

impl AuthStatus {
    /// Check if every credential is available
    pub fn has_credentials(&self) -> bool {
        self.url_set && self.client_id_set && self.client_secret_set
    }

    /// Get descriptive status message for display
    pub fn status_message(&self) -> String {
        if self.has_credentials() {
            "Credentials configured".to_string()
        } else {
            let missing: Vec<&str> = [
                (!self.url_set).then_some("url"),
                (!self.client_id_set).then_some("client-id"),
                (!self.client_secret_set).then_some("client-secret"),
            ]
            .into_iter()
            .flatten()
            .collect();
            format!(
                "Missing credentials ({}) - run 'patcher auth setup' to configure",
                missing.join(", ")
            )
        }
    }
}

/// Check which credentials are present in the store
pub fn get_auth_status(store: &dyn CredentialStore) -> AuthResult<AuthStatus> {
    let present = |key| -> AuthResult<bool> {
        Ok(store
            .get(key)?
            .map_or(false, |value| !value.trim().is_empty()))
    };

    Ok(AuthStatus {
        url_set: present(CredentialKey::Url)?,
        client_id_set: present(CredentialKey::ClientId)?,
        client_secret_set: present(CredentialKey::ClientSecret)?,
    })
}

/// Persist a full credential set after validating the server URL
pub fn save_credentials(
    store: &dyn CredentialStore,
    url: &str,
    client_id: &str,
    client_secret: &str,
) -> AuthResult<()> {
    let normalized = normalize_server_url(url)?;
    store.set(CredentialKey::Url, normalized.as_str().trim_end_matches('/'))?;
    store.set(CredentialKey::ClientId, client_id)?;
    store.set(CredentialKey::ClientSecret, client_secret)?;
    info!("Credentials saved to keychain for {}", normalized);
    Ok(())
}

/// Remove one credential, or every credential when `which` is `None`
pub fn reset_credentials(
    store: &dyn CredentialStore,
    which: Option<CredentialKey>,
) -> AuthResult<Vec<CredentialKey>> {
    let keys: Vec<CredentialKey> = match which {
        Some(key) => vec![key],
        None => CredentialKey::ALL.to_vec(),
    };

    for key in &keys {
        store.delete(*key)?;
        info!("Credential {} removed", key);
    }
    Ok(keys)
}

/// Prompt user for credentials interactively
pub fn prompt_credentials() -> AuthResult<(String, String, String)> {
    let url = prompt_line("Jamf Pro URL: ")?;
    normalize_server_url(&url)?;

    let client_id = prompt_line("API Client ID: ")?;
    if client_id.is_empty() {
        return Err(AuthError::MissingCredential {
            key: CredentialKey::ClientId.to_string(),
        });
    }

    let client_secret = rpassword::prompt_password("API Client Secret: ")?;
    if client_secret.is_empty() {
        warn!("Empty client secret entered");
        return Err(AuthError::MissingCredential {
            key: CredentialKey::ClientSecret.to_string(),
        });
    }

    Ok((url, client_id, client_secret))
}

fn prompt_line(label: &str) -> AuthResult<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_server_url() {
        let url = normalize_server_url("example.jamfcloud.com/").unwrap();
        assert_eq!(url.as_str(), "https://example.jamfcloud.com/");
        assert_eq!(url.host_str(), Some("example.jamfcloud.com"));

        let url = normalize_server_url("http://jamf.local:8443/jamf/?x=1").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/jamf");
        assert_eq!(url.query(), None);

        assert!(matches!(
            normalize_server_url("https://"),
            Err(AuthError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_credential_key_parsing() {
        assert_eq!("url".parse::<CredentialKey>(), Ok(CredentialKey::Url));
        assert_eq!(
            "client_id".parse::<CredentialKey>(),
            Ok(CredentialKey::ClientId)
        );
        assert_eq!(
            "Client-Secret".parse::<CredentialKey>(),
            Ok(CredentialKey::ClientSecret)
        );
        assert!("token".parse::<CredentialKey>().is_err());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get(CredentialKey::ClientId).unwrap(), None);

        store.set(CredentialKey::ClientId, "abc").unwrap();
        assert_eq!(
            store.get(CredentialKey::ClientId).unwrap().as_deref(),
            Some("abc")
        );

        store.delete(CredentialKey::ClientId).unwrap();
        store.delete(CredentialKey::ClientId).unwrap();
        assert_eq!(store.get(CredentialKey::ClientId).unwrap(), None);
    }

    #[test]
    fn test_load_credentials_missing_secret() {
        let store = MemoryStore::new();
        store.set(CredentialKey::Url, "https://jamf.example.com").unwrap();
        store.set(CredentialKey::ClientId, "id").unwrap();

        let err = ClientCredentials::load(&store).unwrap_err();
        match err {
            AuthError::MissingCredential { key } => assert_eq!(key, "CLIENT_SECRET"),
            other => panic!("Expected MissingCredential, got {:?}", other),
        }
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let store = MemoryStore::with_credentials("jamf.example.com", "id", "s3cr3t");
        let creds = ClientCredentials::load(&store).unwrap();
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_auth_status_and_reset() {
        let store = MemoryStore::with_credentials("jamf.example.com", "id", "secret");
        assert!(get_auth_status(&store).unwrap().has_credentials());

        let removed = reset_credentials(&store, Some(CredentialKey::ClientSecret)).unwrap();
        assert_eq!(removed, vec![CredentialKey::ClientSecret]);

        let status = get_auth_status(&store).unwrap();
        assert!(!status.has_credentials());
        assert!(status.status_message().contains("client-secret"));

        reset_credentials(&store, None).unwrap();
        let status = get_auth_status(&store).unwrap();
        assert!(!status.url_set && !status.client_id_set);
    }

    #[test]
    fn test_save_credentials_normalizes_url() {
        let store = MemoryStore::new();
        save_credentials(&store, "jamf.example.com/", "id", "secret").unwrap();
        assert_eq!(
            store.get(CredentialKey::Url).unwrap().as_deref(),
            Some("https://jamf.example.com")
        );
    }
}
