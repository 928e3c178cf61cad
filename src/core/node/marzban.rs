//! Marzban dialect (§4.B): `/api/admin/token`, `/api/user/...`, `offset`/
//! `limit` pagination, `{users:[...]}` envelope, PUT status-field
//! activation, `proxies`/`inbounds` payload shape, ready-made `links`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::shared::{build_client, delete, get_json, post_empty, post_json, put_json};
use super::{ConfigEntry, DesiredUser, NodeClient, UserView};
use crate::core::domain::NodeKind;
use crate::error::{Error, Result};

pub struct MarzbanClient {
    host: String,
    client: Client,
}

impl MarzbanClient {
    #[must_use]
    pub fn new(host: String) -> Self {
        Self { host: host.trim_end_matches('/').to_string(), client: build_client() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct InboundsResponse(HashMap<String, Vec<InboundTag>>);

#[derive(Deserialize)]
struct InboundTag {
    tag: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
struct MarzbanUser {
    username: String,
    status: String,
    used_traffic: u64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    proxies: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    inbounds: HashMap<String, Vec<String>>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    data_limit: u64,
    #[serde(default)]
    expire: i64,
}

#[derive(Deserialize)]
struct UsersResponse {
    users: Vec<MarzbanUser>,
}

#[derive(Serialize)]
struct UpdateStatusPayload {
    status: &'static str,
    expire: i64,
}

#[derive(Serialize)]
struct CreateUserPayload {
    username: String,
    proxies: HashMap<String, HashMap<String, String>>,
    inbounds: HashMap<String, Vec<String>>,
    data_limit: u64,
    expire: i64,
    status: &'static str,
}

fn parse_created_at(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

impl From<MarzbanUser> for UserView {
    fn from(user: MarzbanUser) -> Self {
        let proxies: HashMap<String, String> = user
            .proxies
            .iter()
            .filter_map(|(protocol, fields)| {
                fields
                    .get("id")
                    .or_else(|| fields.get("password"))
                    .map(|v| (protocol.clone(), v.clone()))
            })
            .collect();
        UserView {
            server_key: user.username,
            is_active: user.status == "active",
            lifetime_used_traffic: user.used_traffic,
            created_at: parse_created_at(user.created_at.as_deref()),
            service_ids: vec![],
            inbound_tags: user
                .inbounds
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            proxies,
            links: user.links,
            subscription_url: None,
        }
    }
}

fn desired_to_payload(desired: &DesiredUser) -> (HashMap<String, HashMap<String, String>>, HashMap<String, Vec<String>>) {
    let proxies = desired
        .proxies
        .iter()
        .map(|(protocol, cred)| {
            let key = if protocol == "shadowsocks" || protocol == "trojan" {
                "password"
            } else {
                "id"
            };
            (protocol.clone(), HashMap::from([(key.to_string(), cred.clone())]))
        })
        .collect();
    (proxies, desired.inbound_tags.clone())
}

#[async_trait]
impl NodeClient for MarzbanClient {
    fn kind(&self) -> NodeKind {
        NodeKind::Marzban
    }

    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .client
            .post(self.url("/api/admin/token"))
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
        let resp: InboundsResponse = get_json(&self.client, &self.url("/api/inbounds"), token).await?;
        Ok(resp
            .0
            .into_iter()
            .flat_map(|(protocol, tags)| {
                tags.into_iter().map(move |t| ConfigEntry::Inbound { tag: t.tag, protocol: protocol.clone() })
            })
            .collect())
    }

    async fn get_user(&self, server_key: &str, token: &str) -> Result<Option<UserView>> {
        let resp = self
            .client
            .get(self.url(&format!("/api/user/{server_key}")))
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
        let user: MarzbanUser = resp.json().await.map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
        Ok(Some(user.into()))
    }

    async fn list_users(&self, token: &str, page: u32, size: u32) -> Result<Vec<UserView>> {
        let offset = page.saturating_sub(1) * size;
        let url = self.url(&format!("/api/users?offset={offset}&limit={size}"));
        let resp: UsersResponse = get_json(&self.client, &url, token).await?;
        Ok(resp.users.into_iter().map(UserView::from).collect())
    }

    async fn create_user(&self, desired: &DesiredUser, token: &str) -> Result<UserView> {
        let (proxies, inbounds) = desired_to_payload(desired);
        let payload = CreateUserPayload {
            username: desired.server_key.clone(),
            proxies,
            inbounds,
            data_limit: 0,
            expire: 0,
            status: "active",
        };
        let user: MarzbanUser = post_json(&self.client, &self.url("/api/user"), token, &payload).await?;
        Ok(user.into())
    }

    async fn update_user(&self, server_key: &str, desired: &DesiredUser, token: &str) -> Result<UserView> {
        let (proxies, inbounds) = desired_to_payload(desired);
        #[derive(Serialize)]
        struct Payload {
            proxies: HashMap<String, HashMap<String, String>>,
            inbounds: HashMap<String, Vec<String>>,
        }
        let user: MarzbanUser = put_json(
            &self.client,
            &self.url(&format!("/api/user/{server_key}")),
            token,
            &Payload { proxies, inbounds },
        )
        .await?;
        Ok(user.into())
    }

    async fn delete_user(&self, server_key: &str, token: &str) -> Result<()> {
        delete(&self.client, &self.url(&format!("/api/user/{server_key}")), token).await
    }

    async fn activate_user(&self, server_key: &str, token: &str) -> Result<()> {
        let _: MarzbanUser = put_json(
            &self.client,
            &self.url(&format!("/api/user/{server_key}")),
            token,
            &UpdateStatusPayload { status: "active", expire: 0 },
        )
        .await?;
        Ok(())
    }

    async fn deactivate_user(&self, server_key: &str, token: &str) -> Result<()> {
        let _: MarzbanUser = put_json(
            &self.client,
            &self.url(&format!("/api/user/{server_key}")),
            token,
            &UpdateStatusPayload { status: "disabled", expire: 0 },
        )
        .await?;
        Ok(())
    }

    async fn reset_user(&self, server_key: &str, token: &str) -> Result<()> {
        post_empty(&self.client, &self.url(&format!("/api/user/{server_key}/reset")), token).await
    }

    async fn revoke_sub(&self, desired: &DesiredUser, token: &str) -> Result<UserView> {
        let user: MarzbanUser = post_json(
            &self.client,
            &self.url(&format!("/api/user/{}/revoke_sub", desired.server_key)),
            token,
            &serde_json::json!({}),
        )
        .await?;
        Ok(user.into())
    }

    async fn users_count(&self, token: &str) -> Result<u64> {
        #[derive(Deserialize)]
        struct CountResponse {
            count: u64,
        }
        let resp: CountResponse = get_json(&self.client, &self.url("/api/users/count"), token).await?;
        Ok(resp.count)
    }

    async fn links_for(&self, user: &UserView, _token: &str) -> Result<Vec<String>> {
        Ok(user.links.clone())
    }

    fn parse_scripted_users(&self, body: &str) -> Result<Vec<UserView>> {
        let resp: UsersResponse = serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(resp.users.into_iter().map(UserView::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn login_posts_form_to_admin_token_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admin/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tok"})))
            .mount(&server)
            .await;

        let client = MarzbanClient::new(server.uri());
        let token = client.login("admin", "pw").await.unwrap();
        assert_eq!(token, "tok");
    }

    #[tokio::test]
    async fn list_users_uses_offset_limit_and_users_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "users": [{"username": "u1", "status": "active", "used_traffic": 10}]
            })))
            .mount(&server)
            .await;

        let client = MarzbanClient::new(server.uri());
        let users = client.list_users("tok", 1, 100).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].server_key, "u1");
        assert!(users[0].is_active);
    }

    #[tokio::test]
    async fn get_user_missing_returns_none_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/user/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = MarzbanClient::new(server.uri());
        let user = client.get_user("ghost", "tok").await.unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn parse_scripted_users_decodes_users_envelope() {
        let client = MarzbanClient::new("http://x".into());
        let body = serde_json::json!({"users": [{"username": "u1", "status": "active", "used_traffic": 5}]}).to_string();
        let users = client.parse_scripted_users(&body).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].server_key, "u1");
    }

    #[tokio::test]
    async fn deactivate_user_puts_disabled_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/user/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "username": "u1", "status": "disabled", "used_traffic": 0
            })))
            .mount(&server)
            .await;

        let client = MarzbanClient::new(server.uri());
        client.deactivate_user("u1", "tok").await.unwrap();
    }
}
