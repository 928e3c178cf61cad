//! HTTP plumbing shared by the three dialect clients (§4.B). Each dialect
//! module owns its endpoint paths and payload shapes; this module only
//! owns the `reqwest::Client` construction and generic JSON helpers so
//! that duplication lives in the URLs/payloads, not the transport code.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::REQUEST_TIMEOUT;
use crate::error::{Error, Result};

/// A bare `reqwest::Client` with the node-call timeout and TLS
/// verification disabled (§5 "SSL verification disabled for upstream
/// nodes (design decision)" — upstream nodes are typically self-signed,
/// operator-controlled hosts).
#[must_use]
pub fn build_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
        .expect("reqwest client builds with a static config")
}

/// GET `url` with a bearer token, decode JSON. 4xx/5xx map to
/// `UpstreamUnavailable` (§4.B "4xx/5xx -> return failure sentinel").
pub async fn get_json<T: DeserializeOwned>(client: &Client, url: &str, token: &str) -> Result<T> {
    let resp = client
        .get(url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    decode(resp).await
}

pub async fn get_json_unauthenticated<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    decode(resp).await
}

pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
    client: &Client,
    url: &str,
    token: &str,
    body: &B,
) -> Result<T> {
    let resp = client
        .post(url)
        .bearer_auth(token)
        .json(body)
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    decode(resp).await
}

pub async fn put_json<B: Serialize + Sync, T: DeserializeOwned>(
    client: &Client,
    url: &str,
    token: &str,
    body: &B,
) -> Result<T> {
    let resp = client
        .put(url)
        .bearer_auth(token)
        .json(body)
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    decode(resp).await
}

/// POST with no response body expected on success (enable/disable style
/// endpoints); 204 is success, anything else JSON-decoded and discarded.
pub async fn post_empty(client: &Client, url: &str, token: &str) -> Result<()> {
    let resp = client
        .post(url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    if resp.status() == StatusCode::NO_CONTENT || resp.status().is_success() {
        Ok(())
    } else {
        Err(Error::UpstreamUnavailable(format!(
            "unexpected status {}",
            resp.status()
        )))
    }
}

pub async fn delete(client: &Client, url: &str, token: &str) -> Result<()> {
    let resp = client
        .delete(url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;
    if resp.status() == StatusCode::NO_CONTENT || resp.status().is_success() {
        Ok(())
    } else {
        Err(Error::UpstreamUnavailable(format!(
            "unexpected status {}",
            resp.status()
        )))
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(Error::UpstreamUnavailable(format!("status {status}")));
    }
    resp.json::<T>()
        .await
        .map_err(|e| Error::UpstreamUnavailable(e.to_string()))
}
