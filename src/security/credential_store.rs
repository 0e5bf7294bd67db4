use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::security::storage::{KeyValueStore, MemoryStore};

pub const ACCESS_KEY: &str = "nc_access";
pub const REFRESH_KEY: &str = "nc_refresh";
const ROTATED_AT_KEY: &str = "nc_access_rotated_at";

/// Access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

/// Durable home of the access/refresh tokens.
///
/// Reads fall back to legacy keys written by older clients, checking the
/// durable store before the session store for each key. `clear_all` wipes
/// those keys too so a stale token cannot come back after logout.
#[derive(Clone)]
pub struct CredentialStore {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    legacy_keys: Vec<String>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("has_access", &self.get_access_token().is_some())
            .field("has_refresh", &self.get_refresh_token().is_some())
            .field("legacy_keys", &self.legacy_keys)
            .finish()
    }
}

impl CredentialStore {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        legacy_keys: Vec<String>,
    ) -> Self {
        Self {
            durable,
            session,
            legacy_keys,
        }
    }

    /// Store with no persistence and no legacy keys.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Vec::new(),
        )
    }

    /// The durable backend, shared with session state that lives next to
    /// the tokens.
    pub fn durable(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.durable)
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.durable
            .get(ACCESS_KEY)
            .filter(|t| !t.is_empty())
            .or_else(|| self.read_legacy_access())
    }

    fn read_legacy_access(&self) -> Option<String> {
        self.legacy_keys.iter().find_map(|key| {
            self.durable
                .get(key)
                .filter(|t| !t.is_empty())
                .or_else(|| self.session.get(key).filter(|t| !t.is_empty()))
        })
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.durable.get(REFRESH_KEY).filter(|t| !t.is_empty())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            access_token: self.get_access_token()?,
            refresh_token: self.get_refresh_token()?,
        })
    }

    pub fn has_session(&self) -> bool {
        self.get_access_token().is_some() || self.get_refresh_token().is_some()
    }

    /// Update whichever token is given; `None` leaves the stored one alone.
    pub fn set_tokens(&self, access: Option<&str>, refresh: Option<&str>) {
        if let Some(access) = access {
            self.durable.set(ACCESS_KEY, access);
            self.durable.set(ROTATED_AT_KEY, &Utc::now().to_rfc3339());
            debug!("access token stored");
        }
        if let Some(refresh) = refresh {
            self.durable.set(REFRESH_KEY, refresh);
            debug!("refresh token stored");
        }
    }

    pub fn clear_all(&self) {
        self.durable.remove(ACCESS_KEY);
        self.durable.remove(REFRESH_KEY);
        self.durable.remove(ROTATED_AT_KEY);
        for key in &self.legacy_keys {
            self.durable.remove(key);
            self.session.remove(key);
        }
        debug!("credentials cleared");
    }

    /// When the access token was last written by this client.
    pub fn last_rotated(&self) -> Option<DateTime<Utc>> {
        self.durable
            .get(ROTATED_AT_KEY)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Seconds since the access token was last written, 0 if unknown.
    pub fn age_seconds(&self) -> u64 {
        if let Some(rotated) = self.last_rotated() {
            let age = Utc::now() - rotated;
            age.num_seconds().max(0) as u64
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::storage::FileStore;
    use tempfile::tempdir;

    fn legacy_store() -> (CredentialStore, Arc<MemoryStore>, Arc<MemoryStore>) {
        let durable = Arc::new(MemoryStore::new());
        let session = Arc::new(MemoryStore::new());
        let store = CredentialStore::new(
            durable.clone(),
            session.clone(),
            vec!["token".into(), "access_token".into(), "jwt".into()],
        );
        (store, durable, session)
    }

    #[test]
    fn test_set_access_keeps_refresh() {
        let store = CredentialStore::in_memory();
        store.set_tokens(Some("a1"), Some("r1"));
        store.set_tokens(Some("a2"), None);

        assert_eq!(store.get_access_token().as_deref(), Some("a2"));
        assert_eq!(store.get_refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_set_refresh_keeps_access() {
        let store = CredentialStore::in_memory();
        store.set_tokens(Some("a1"), Some("r1"));
        store.set_tokens(None, Some("r2"));

        assert_eq!(
            store.credentials(),
            Some(Credentials {
                access_token: "a1".into(),
                refresh_token: "r2".into(),
            })
        );
    }

    #[test]
    fn test_legacy_access_fallback_order() {
        let (store, durable, session) = legacy_store();
        session.set("token", "from-session");
        assert_eq!(store.get_access_token().as_deref(), Some("from-session"));

        durable.set("jwt", "from-durable-jwt");
        // "token" is checked first, in both stores, before "jwt"
        assert_eq!(store.get_access_token().as_deref(), Some("from-session"));

        durable.set("token", "from-durable");
        assert_eq!(store.get_access_token().as_deref(), Some("from-durable"));

        store.set_tokens(Some("current"), None);
        assert_eq!(store.get_access_token().as_deref(), Some("current"));
    }

    #[test]
    fn test_clear_all_wipes_legacy_keys() {
        let (store, durable, session) = legacy_store();
        store.set_tokens(Some("a"), Some("r"));
        durable.set("access_token", "old");
        session.set("jwt", "older");

        store.clear_all();

        assert!(store.get_access_token().is_none());
        assert!(store.get_refresh_token().is_none());
        assert!(durable.get("access_token").is_none());
        assert!(session.get("jwt").is_none());
        assert!(store.last_rotated().is_none());
        assert!(!store.has_session());
    }

    #[test]
    fn test_rotation_tracking() {
        let store = CredentialStore::in_memory();
        assert!(store.last_rotated().is_none());
        assert_eq!(store.age_seconds(), 0);

        store.set_tokens(Some("a"), None);
        assert!(store.last_rotated().is_some());
        assert!(store.age_seconds() <= 1);

        let before = store.last_rotated();
        store.set_tokens(None, Some("r"));
        assert_eq!(store.last_rotated(), before);
    }

    #[test]
    fn test_tokens_survive_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("creds.json");
        {
            let durable = Arc::new(FileStore::open(&path).unwrap());
            let store = CredentialStore::new(durable, Arc::new(MemoryStore::new()), vec![]);
            store.set_tokens(Some("a"), Some("r"));
        }

        let durable = Arc::new(FileStore::open(&path).unwrap());
        let store = CredentialStore::new(durable, Arc::new(MemoryStore::new()), vec![]);
        assert_eq!(store.get_access_token().as_deref(), Some("a"));
        assert_eq!(store.get_refresh_token().as_deref(), Some("r"));
    }

    #[test]
    fn test_clone_shares_backend() {
        let store = CredentialStore::in_memory();
        let cloned = store.clone();

        cloned.set_tokens(Some("new_token"), None);
        assert_eq!(store.get_access_token().as_deref(), Some("new_token"));
    }
}
