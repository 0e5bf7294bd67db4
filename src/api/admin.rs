use serde::Deserialize;
use serde_json::json;

use crate::api::auth::User;
use crate::api::Page;
use crate::error::Result;
use crate::transport::gateway::Gateway;
use crate::transport::ApiRequest;

pub const BASE_ROLE: &str = "viewer";

#[derive(Debug, Deserialize)]
struct RolesResponse {
    #[serde(default)]
    roles: Vec<String>,
}

/// Roles to send: insertion order kept, duplicates dropped, `viewer` always
/// present so no account ends up without a role.
pub fn normalize_roles(roles: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(roles.len() + 1);
    for role in roles
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .chain(std::iter::once(BASE_ROLE))
    {
        if !out.iter().any(|r| r == role) {
            out.push(role.to_string());
        }
    }
    out
}

#[derive(Clone)]
pub struct AdminClient {
    gateway: Gateway,
}

impl AdminClient {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub async fn list_users(&self, q: Option<&str>, page: u32, limit: u32) -> Result<Page<User>> {
        let req = ApiRequest::get("/admin/users")
            .query_opt("q", q.filter(|s| !s.trim().is_empty()))
            .query("page", page.max(1))
            .query("limit", limit);
        self.gateway.send_json(req).await
    }

    /// Replace a user's roles; returns what the backend stored.
    pub async fn set_roles(&self, user_id: &str, roles: &[String]) -> Result<Vec<String>> {
        let path = format!("/admin/users/{}/roles", urlencoding::encode(user_id));
        let resp: RolesResponse = self
            .gateway
            .post_json(&path, &json!({ "roles": normalize_roles(roles) }))
            .await?;
        Ok(resp.roles)
    }
}
