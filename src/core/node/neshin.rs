//! Shared implementation for the marzneshin/rustneshin dialects (§4.B):
//! identical except for username-filter encoding and the `NodeKind`
//! reported. `marzneshin.rs`/`rustneshin.rs` are thin constructors over
//! this struct.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::shared::{build_client, delete, get_json, get_json_unauthenticated, post_empty, post_json, put_json};
use super::{ConfigEntry, DesiredUser, NodeClient, UserView};
use crate::core::domain::NodeKind;
use crate::error::{Error, Result};

/// How the list-users username filter is encoded on the wire (§4.B
/// "for rustneshin the list is JSON-encoded; for the others it is a
/// repeated query parameter").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameFilterStyle {
    RepeatedParam,
    Json,
}

pub struct NeshinClient {
    host: String,
    client: Client,
    kind: NodeKind,
    filter_style: UsernameFilterStyle,
}

impl NeshinClient {
    #[must_use]
    pub fn new(host: String, kind: NodeKind, filter_style: UsernameFilterStyle) -> Self {
        Self { host: host.trim_end_matches('/').to_string(), client: build_client(), kind, filter_style }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    fn username_filter_query(&self, usernames: &[String]) -> String {
        if usernames.is_empty() {
            return String::new();
        }
        match self.filter_style {
            UsernameFilterStyle::RepeatedParam => usernames
                .iter()
                .map(|u| format!("&username={u}"))
                .collect(),
            UsernameFilterStyle::Json => {
                let encoded = serde_json::to_string(usernames).unwrap_or_default();
                format!("&username={}", urlencoding_minimal(&encoded))
            }
        }
    }
}

/// Minimal percent-encoding sufficient for a JSON array in a query string;
/// avoids pulling in a full URL-encoding crate for one call site.
fn urlencoding_minimal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ServicesResponse {
    items: Vec<ServiceEntry>,
}

#[derive(Deserialize)]
struct ServiceEntry {
    id: i64,
    name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
struct NeshinUser {
    username: String,
    enabled: bool,
    used_traffic: u64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    service_ids: Vec<i64>,
    #[serde(default)]
    subscription_url: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Deserialize)]
struct UsersResponse {
    items: Vec<NeshinUser>,
}

#[derive(Serialize)]
struct CreateUserPayload {
    username: String,
    service_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    expire_strategy: &'static str,
}

#[derive(Serialize)]
struct UpdateUserPayload {
    service_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    expire_strategy: &'static str,
}

fn parse_created_at(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

impl From<NeshinUser> for UserView {
    fn from(user: NeshinUser) -> Self {
        UserView {
            server_key: user.username,
            is_active: user.enabled,
            lifetime_used_traffic: user.used_traffic,
            created_at: parse_created_at(user.created_at.as_deref()),
            service_ids: user.service_ids,
            inbound_tags: HashMap::new(),
            proxies: HashMap::new(),
            links: vec![],
            subscription_url: user.subscription_url,
        }
    }
}

#[async_trait]
impl NodeClient for NeshinClient {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .client
            .post(self.url("/api/admins/token"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!("login failed: {}", resp.status())));
        }
        let token: TokenResponse = resp.json().await.map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn get_inbounds_or_services(&self, token: &str) -> Result<Vec<ConfigEntry>> {
        let resp: ServicesResponse = get_json(&self.client, &self.url("/api/services"), token).await?;
        Ok(resp
            .items
            .into_iter()
            .map(|s| ConfigEntry::Service { id: s.id, name: s.name })
            .collect())
    }

    async fn get_user(&self, server_key: &str, token: &str) -> Result<Option<UserView>> {
        let resp = self
            .client
            .get(self.url(&format!("/api/users/{server_key}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!("status {}", resp.status())));
        }
        let user: NeshinUser = resp.json().await.map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        Ok(Some(user.into()))
    }

    async fn list_users(&self, token: &str, page: u32, size: u32) -> Result<Vec<UserView>> {
        let url = self.url(&format!("/api/users?page={page}&size={size}"));
        let resp: UsersResponse = get_json(&self.client, &url, token).await?;
        Ok(resp.items.into_iter().map(UserView::from).collect())
    }

    async fn create_user(&self, desired: &DesiredUser, token: &str) -> Result<UserView> {
        let payload = CreateUserPayload {
            username: desired.server_key.clone(),
            service_ids: desired.service_ids.clone(),
            key: desired.key.clone(),
            expire_strategy: "never",
        };
        let user: NeshinUser = post_json(&self.client, &self.url("/api/users"), token, &payload).await?;
        Ok(user.into())
    }

    async fn update_user(&self, server_key: &str, desired: &DesiredUser, token: &str) -> Result<UserView> {
        let payload = UpdateUserPayload {
            service_ids: desired.service_ids.clone(),
            key: desired.key.clone(),
            expire_strategy: "never",
        };
        let user: NeshinUser = put_json(
            &self.client,
            &self.url(&format!("/api/users/{server_key}")),
            token,
            &payload,
        )
        .await?;
        Ok(user.into())
    }

    async fn delete_user(&self, server_key: &str, token: &str) -> Result<()> {
        delete(&self.client, &self.url(&format!("/api/users/{server_key}")), token).await
    }

    async fn activate_user(&self, server_key: &str, token: &str) -> Result<()> {
        post_empty(&self.client, &self.url(&format!("/api/users/{server_key}/enable")), token).await
    }

    async fn deactivate_user(&self, server_key: &str, token: &str) -> Result<()> {
        post_empty(&self.client, &self.url(&format!("/api/users/{server_key}/disable")), token).await
    }

    async fn reset_user(&self, server_key: &str, token: &str) -> Result<()> {
        post_empty(&self.client, &self.url(&format!("/api/users/{server_key}/reset")), token).await
    }

    async fn revoke_sub(&self, desired: &DesiredUser, token: &str) -> Result<UserView> {
        let user: NeshinUser = post_json(
            &self.client,
            &self.url(&format!("/api/users/{}/revoke_sub", desired.server_key)),
            token,
            &serde_json::json!({}),
        )
        .await?;
        Ok(user.into())
    }

    async fn users_count(&self, token: &str) -> Result<u64> {
        #[derive(Deserialize)]
        struct CountResponse {
            total: u64,
        }
        let resp: CountResponse = get_json(&self.client, &self.url("/api/users/count"), token).await?;
        Ok(resp.total)
    }

    async fn links_for(&self, user: &UserView, _token: &str) -> Result<Vec<String>> {
        let Some(sub_url) = &user.subscription_url else {
            return Ok(vec![]);
        };
        let url = format!("{sub_url}/v2ray");
        let body: String = get_json_unauthenticated(&self.client, &url).await.unwrap_or_default();
        let decoded = STANDARD.decode(body.trim()).map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        let text = String::from_utf8(decoded).map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    fn parse_scripted_users(&self, body: &str) -> Result<Vec<UserView>> {
        #[derive(Deserialize)]
        struct ScriptedUsersResponse {
            users: Vec<NeshinUser>,
        }
        let resp: ScriptedUsersResponse =
            serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(resp.users.into_iter().map(UserView::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn login_posts_to_admins_token_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admins/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tok"})))
            .mount(&server)
            .await;

        let client = NeshinClient::new(server.uri(), NodeKind::Marzneshin, UsernameFilterStyle::RepeatedParam);
        let token = client.login("admin", "pw").await.unwrap();
        assert_eq!(token, "tok");
    }

    #[tokio::test]
    async fn list_users_uses_page_size_and_items_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"username": "u1", "enabled": true, "used_traffic": 5, "service_ids": [1,2]}]
            })))
            .mount(&server)
            .await;

        let client = NeshinClient::new(server.uri(), NodeKind::Rustneshin, UsernameFilterStyle::Json);
        let users = client.list_users("tok", 1, 50).await.unwrap();
        assert_eq!(users[0].service_ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn activate_user_posts_enable_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/users/u1/enable"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = NeshinClient::new(server.uri(), NodeKind::Marzneshin, UsernameFilterStyle::RepeatedParam);
        client.activate_user("u1", "tok").await.unwrap();
    }

    #[test]
    fn repeated_param_style_joins_each_username() {
        let client = NeshinClient::new("http://x".into(), NodeKind::Marzneshin, UsernameFilterStyle::RepeatedParam);
        let q = client.username_filter_query(&["a".to_string(), "b".to_string()]);
        assert_eq!(q, "&username=a&username=b");
    }

    #[test]
    fn json_style_encodes_array_as_one_param() {
        let client = NeshinClient::new("http://x".into(), NodeKind::Rustneshin, UsernameFilterStyle::Json);
        let q = client.username_filter_query(&["a".to_string()]);
        assert!(q.starts_with("&username=%5B"));
    }
}
