//! Credential resolution for connected external systems.
//!
//! Storage and OAuth flows live outside the core; this module only
//! defines the injected store/refresher seams and the resolver that
//! guarantees tools never see expired credentials.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CredentialError;

/// Refresh ahead of expiry by this margin.
const EXPIRY_SKEW_SECS: i64 = 60;

/// A connected external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    Salesforce,
    Hubspot,
    Google,
    Microsoft,
}

impl System {
    pub fn as_str(&self) -> &'static str {
        match self {
            System::Salesforce => "salesforce",
            System::Hubspot => "hubspot",
            System::Google => "google",
            System::Microsoft => "microsoft",
        }
    }
}

impl std::fmt::Display for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for System {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "salesforce" => Ok(System::Salesforce),
            "hubspot" => Ok(System::Hubspot),
            "google" => Ok(System::Google),
            "microsoft" => Ok(System::Microsoft),
            other => Err(CredentialError::UnsupportedSystem(other.to_string())),
        }
    }
}

/// Scoped, time-bounded access credentials for one external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Tenant-specific API base, e.g. a Salesforce instance URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            instance_url: None,
            expires_at: None,
        }
    }

    /// Expired (or about to expire within the refresh skew).
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(at) => at <= Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }
}

/// Injected credential repository. Keyed by (subject, system); the
/// concrete backend (Redis/Postgres in production) is a collaborator.
pub trait CredentialStore: Send + Sync {
    fn get(&self, sub_id: &str, system: System) -> Option<Credentials>;
    fn put(&self, sub_id: &str, system: System, creds: Credentials);
    fn delete(&self, sub_id: &str, system: System) -> bool;
}

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(sub_id: &str, system: System) -> String {
        format!("cred:{sub_id}:{system}")
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, sub_id: &str, system: System) -> Option<Credentials> {
        self.entries
            .get(&Self::key(sub_id, system))
            .map(|e| e.value().clone())
    }

    fn put(&self, sub_id: &str, system: System, creds: Credentials) {
        self.entries.insert(Self::key(sub_id, system), creds);
    }

    fn delete(&self, sub_id: &str, system: System) -> bool {
        self.entries.remove(&Self::key(sub_id, system)).is_some()
    }
}

/// Exchanges a refresh token for fresh credentials with the provider.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        system: System,
        current: &Credentials,
    ) -> Result<Credentials, CredentialError>;
}

/// Refresher for deployments without an OAuth broker. Any refresh
/// attempt fails; callers must reconnect the integration.
pub struct NullRefresher;

#[async_trait]
impl TokenRefresher for NullRefresher {
    async fn refresh(
        &self,
        system: System,
        _current: &Credentials,
    ) -> Result<Credentials, CredentialError> {
        Err(CredentialError::RefreshFailed {
            system: system.to_string(),
            message: "no token refresher configured".to_string(),
        })
    }
}

/// Resolves valid credentials for a subject, refreshing when needed.
///
/// Guarantee: the returned credentials are valid at call time, or the
/// call fails. Refreshed tokens are persisted before being returned.
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { store, refresher }
    }

    pub async fn resolve(
        &self,
        sub_id: &str,
        system: System,
    ) -> Result<Credentials, CredentialError> {
        if sub_id.trim().is_empty() {
            return Err(CredentialError::MissingIdentity);
        }

        let creds = self
            .store
            .get(sub_id, system)
            .ok_or_else(|| CredentialError::NotConnected {
                system: system.to_string(),
            })?;

        if !creds.needs_refresh() {
            return Ok(creds);
        }

        debug!("Refreshing {} credentials for sub {}", system, sub_id);
        let refreshed = self.refresher.refresh(system, &creds).await?;
        // Persist before returning so a concurrent caller sees the new token.
        self.store.put(sub_id, system, refreshed.clone());
        info!("Refreshed {} credentials for sub {}", system, sub_id);
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRefresher(Credentials);

    #[async_trait]
    impl TokenRefresher for FixedRefresher {
        async fn refresh(
            &self,
            _system: System,
            _current: &Credentials,
        ) -> Result<Credentials, CredentialError> {
            Ok(self.0.clone())
        }
    }

    fn resolver_with(
        store: Arc<MemoryCredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> CredentialResolver {
        CredentialResolver::new(store, refresher)
    }

    #[tokio::test]
    async fn test_resolve_missing_identity() {
        let store = Arc::new(MemoryCredentialStore::new());
        let r = resolver_with(store, Arc::new(NullRefresher));
        let err = r.resolve("", System::Salesforce).await.unwrap_err();
        assert!(matches!(err, CredentialError::MissingIdentity));
    }

    #[tokio::test]
    async fn test_resolve_not_connected() {
        let store = Arc::new(MemoryCredentialStore::new());
        let r = resolver_with(store, Arc::new(NullRefresher));
        let err = r.resolve("user-1", System::Hubspot).await.unwrap_err();
        assert!(matches!(err, CredentialError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_resolve_valid_passthrough() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.put("user-1", System::Salesforce, Credentials::new("tok-1"));
        let r = resolver_with(store, Arc::new(NullRefresher));
        let creds = r.resolve("user-1", System::Salesforce).await.unwrap();
        assert_eq!(creds.access_token, "tok-1");
    }

    #[tokio::test]
    async fn test_resolve_refreshes_and_persists() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mut stale = Credentials::new("stale");
        stale.expires_at = Some(Utc::now() - Duration::seconds(10));
        store.put("user-1", System::Google, stale);

        let fresh = Credentials::new("fresh");
        let r = resolver_with(store.clone(), Arc::new(FixedRefresher(fresh)));

        let creds = r.resolve("user-1", System::Google).await.unwrap();
        assert_eq!(creds.access_token, "fresh");
        // Persisted into the store before return
        let stored = store.get("user-1", System::Google).unwrap();
        assert_eq!(stored.access_token, "fresh");
    }

    #[tokio::test]
    async fn test_resolve_refresh_failure_surfaces() {
        let store = Arc::new(MemoryCredentialStore::new());
        let mut stale = Credentials::new("stale");
        stale.expires_at = Some(Utc::now() - Duration::seconds(10));
        store.put("user-1", System::Microsoft, stale);

        let r = resolver_with(store, Arc::new(NullRefresher));
        let err = r.resolve("user-1", System::Microsoft).await.unwrap_err();
        assert!(matches!(err, CredentialError::RefreshFailed { .. }));
    }

    #[test]
    fn test_system_from_str() {
        assert_eq!("Salesforce".parse::<System>().unwrap(), System::Salesforce);
        assert!("trello".parse::<System>().is_err());
    }
}
