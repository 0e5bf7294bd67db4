use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::Page;
use crate::error::{GatewayError, Result};
use crate::security::audit_log::AuditLogger;
use crate::security::storage::KeyValueStore;
use crate::security::token_refresh::SessionEvent;
use crate::transport::gateway::Gateway;
use crate::transport::ApiRequest;

const USER_KEY: &str = "nc_user";
const PROFILES_KEY: &str = "nc_profiles";
const CURRENT_PROFILE_KEY: &str = "nc_current_profile";
const PROFILES_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Owner,
    #[default]
    Standard,
    Kid,
}

/// A viewing profile under the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ProfileKind,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProfileKind,
    pub avatar: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProfileKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: User,
}

/// Account session: tokens, the signed-in user, their profiles and the
/// selected profile, all persisted next to the credentials.
#[derive(Clone)]
pub struct SessionClient {
    gateway: Gateway,
    store: Arc<dyn KeyValueStore>,
    audit: AuditLogger,
}

impl SessionClient {
    pub fn new(gateway: Gateway) -> Self {
        let store = gateway.credentials().durable();
        Self {
            gateway,
            store,
            audit: AuditLogger::new(),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(key, error = %err, "dropping unreadable session entry");
                self.store.remove(key);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: Option<&T>) {
        match value.map(serde_json::to_string) {
            Some(Ok(raw)) => self.store.set(key, &raw),
            Some(Err(err)) => warn!(key, error = %err, "failed to serialize session entry"),
            None => self.store.remove(key),
        }
    }

    fn write_profiles(&self, profiles: &[Profile]) {
        if profiles.is_empty() {
            self.store.remove(PROFILES_KEY);
        } else {
            self.write(PROFILES_KEY, Some(&profiles));
        }
    }

    fn clear_state(&self) {
        self.store.remove(USER_KEY);
        self.store.remove(PROFILES_KEY);
        self.store.remove(CURRENT_PROFILE_KEY);
    }

    pub fn current_user(&self) -> Option<User> {
        self.read(USER_KEY)
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.read(PROFILES_KEY).unwrap_or_default()
    }

    pub fn current_profile(&self) -> Option<Profile> {
        self.read(CURRENT_PROFILE_KEY)
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "email and password are required".to_string(),
            ));
        }

        let resp: LoginResponse = self
            .gateway
            .post_json("/auth/login", &json!({ "email": email, "password": password }))
            .await?;

        self.gateway
            .credentials()
            .set_tokens(Some(&resp.access_token), resp.refresh_token.as_deref());
        self.write(USER_KEY, Some(&resp.user));

        let profiles = self.fetch_profiles().await?;
        self.write_profiles(&profiles);
        self.write::<Profile>(CURRENT_PROFILE_KEY, None);

        self.audit.login(email);
        Ok(resp.user)
    }

    /// Create an account. Does not sign in; any previous session is cleared.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "name, email and password are required".to_string(),
            ));
        }

        let req = ApiRequest::post("/auth/register")
            .json(&json!({ "name": name, "email": email, "password": password }))?;
        self.gateway.send(req).await?;

        self.gateway.credentials().clear_all();
        self.clear_state();
        info!(email, "account registered");
        Ok(())
    }

    pub async fn me(&self) -> Result<User> {
        self.gateway.get_json("/auth/me").await
    }

    async fn fetch_profiles(&self) -> Result<Vec<Profile>> {
        let page: Page<Profile> = self
            .gateway
            .send_json(
                ApiRequest::get("/profiles")
                    .query("page", 1)
                    .query("limit", PROFILES_PAGE_LIMIT),
            )
            .await?;
        Ok(page.items)
    }

    /// Rehydrate the session from stored tokens. Any failure wipes the
    /// session and yields `None`.
    pub async fn restore(&self) -> Option<User> {
        match self.hydrate().await {
            Ok(user) => Some(user),
            Err(err) => {
                debug!(error = %err, "session restore failed; clearing");
                self.gateway.credentials().clear_all();
                self.clear_state();
                None
            }
        }
    }

    async fn hydrate(&self) -> Result<User> {
        let user = self.me().await?;
        self.write(USER_KEY, Some(&user));

        let profiles = self.fetch_profiles().await?;
        self.write_profiles(&profiles);

        if let Some(current) = self.current_profile() {
            if !profiles.iter().any(|p| p.id == current.id) {
                self.write::<Profile>(CURRENT_PROFILE_KEY, None);
            }
        }
        Ok(user)
    }

    pub fn logout(&self) {
        self.end_session("user");
    }

    /// Drop tokens and every piece of session state.
    pub fn end_session(&self, reason: &str) {
        self.gateway.credentials().clear_all();
        self.clear_state();
        self.audit.logout(reason);
    }

    /// Select a known profile; an unknown id clears the selection.
    pub fn select_profile(&self, profile_id: &str) -> Option<Profile> {
        let found = self.profiles().into_iter().find(|p| p.id == profile_id);
        self.write(CURRENT_PROFILE_KEY, found.as_ref());
        found
    }

    pub async fn create_profile(&self, profile: &NewProfile) -> Result<Profile> {
        let created: Profile = self.gateway.post_json("/profiles", profile).await?;
        let mut profiles = self.profiles();
        profiles.push(created.clone());
        self.write_profiles(&profiles);
        Ok(created)
    }

    pub async fn update_profile(&self, profile_id: &str, patch: &ProfilePatch) -> Result<Profile> {
        let path = format!("/profiles/{}", urlencoding::encode(profile_id));
        let updated: Profile = self.gateway.put_json(&path, patch).await?;

        let profiles: Vec<Profile> = self
            .profiles()
            .into_iter()
            .map(|p| if p.id == profile_id { updated.clone() } else { p })
            .collect();
        self.write_profiles(&profiles);

        if self.current_profile().is_some_and(|p| p.id == profile_id) {
            self.write(CURRENT_PROFILE_KEY, Some(&updated));
        }
        Ok(updated)
    }

    pub async fn delete_profile(&self, profile_id: &str) -> Result<()> {
        let path = format!("/profiles/{}", urlencoding::encode(profile_id));
        self.gateway.delete(&path).await?;

        let profiles: Vec<Profile> = self
            .profiles()
            .into_iter()
            .filter(|p| p.id != profile_id)
            .collect();
        self.write_profiles(&profiles);

        if self.current_profile().is_some_and(|p| p.id == profile_id) {
            self.write::<Profile>(CURRENT_PROFILE_KEY, None);
        }
        Ok(())
    }

    /// Clear session state whenever the gateway ends the session after a
    /// failed refresh.
    pub fn watch_forced_logout(&self) -> JoinHandle<()> {
        let mut events = self.gateway.subscribe();
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Ended) => session.end_session("session ended"),
                    Ok(SessionEvent::Refreshed) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "session event listener lagged");
                        if !session.gateway.credentials().has_session() {
                            session.clear_state();
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
