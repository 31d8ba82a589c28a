//! PBS API client for communicating with Proxmox Backup Server.
//!
//! This module provides a thin client over the PBS REST API exposing the
//! read-only calls the query modes need. Authentication uses an API token
//! header when token credentials are configured, otherwise a ticket is
//! obtained up front with username/password and sent as a cookie.

use crate::config::ConnectionConfig;
use crate::error::{PbsError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// PBS API client.
#[derive(Clone)]
pub struct PbsClient {
    client: Client,
    base_url: String,
    auth: Auth,
}

#[derive(Clone)]
enum Auth {
    /// Full value for the `Authorization` header
    Token(String),
    /// Full value for the `Cookie` header
    Ticket(String),
}

impl PbsClient {
    /// Connect to the configured PBS instance.
    ///
    /// With complete token credentials this only builds the HTTP client;
    /// with a password it also performs the ticket login immediately, so
    /// bad credentials fail here rather than on the first query.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        let base_url = config.base_url();

        let auth = if config.has_token_auth() {
            let user = config.username.as_deref().unwrap_or_default();
            let name = config.token_name.as_deref().unwrap_or_default();
            let value = config.token_value.as_deref().unwrap_or_default();
            Auth::Token(format!("PBSAPIToken={user}!{name}:{value}"))
        } else {
            let ticket = login(&client, &base_url, config).await?;
            Auth::Ticket(format!("PBSAuthCookie={ticket}"))
        };

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    /// Get datastore usage for all datastores.
    pub async fn datastore_usage(&self) -> Result<Vec<DatastoreUsage>> {
        self.get("/api2/json/status/datastore-usage", &[]).await
    }

    /// Get the namespaces of a datastore.
    pub async fn namespaces(&self, store: &str) -> Result<Vec<Namespace>> {
        self.get(&format!("/api2/json/admin/datastore/{store}/namespace"), &[])
            .await
    }

    /// Get the backup groups in a datastore namespace.
    ///
    /// The `ns` parameter is always sent, empty string meaning the root
    /// namespace.
    pub async fn groups(&self, store: &str, ns: &str) -> Result<Vec<BackupGroup>> {
        self.get(
            &format!("/api2/json/admin/datastore/{store}/groups"),
            &[("ns", ns)],
        )
        .await
    }

    /// Get the notes attached to a backup group, empty string when none.
    pub async fn group_notes(
        &self,
        store: &str,
        backup_id: &str,
        backup_type: &str,
    ) -> Result<String> {
        let notes: Option<String> = self
            .get(
                &format!("/api2/json/admin/datastore/{store}/group-notes"),
                &[("backup-id", backup_id), ("backup-type", backup_type)],
            )
            .await?;
        Ok(notes.unwrap_or_default())
    }

    /// Get the snapshots in a datastore namespace.
    pub async fn snapshots(&self, store: &str, ns: &str) -> Result<Vec<Snapshot>> {
        self.get(
            &format!("/api2/json/admin/datastore/{store}/snapshots"),
            &[("ns", ns)],
        )
        .await
    }

    /// Get up to `limit` recent tasks of the local node.
    pub async fn tasks(&self, limit: u64) -> Result<Vec<Task>> {
        let limit = limit.to_string();
        self.get("/api2/json/nodes/localhost/tasks", &[("limit", limit.as_str())])
            .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let mut request = self.client.get(&url).query(query);
        request = match &self.auth {
            Auth::Token(header) => request.header("Authorization", header),
            Auth::Ticket(cookie) => request.header("Cookie", cookie),
        };

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!("GET {} failed: {}", url, status);
            // error_for_status only errors on 4xx/5xx; an unfollowed 3xx
            // still has to surface as an error
            return Err(match response.error_for_status() {
                Err(e) => PbsError::Api(e),
                Ok(_) => PbsError::Other(format!("GET {url} returned status {status}")),
            });
        }

        let body = response.text().await?;
        let api_response: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            PbsError::ParseError(format!("{url}: {e}. Body preview: {}", body_preview(&body)))
        })?;
        Ok(api_response.data)
    }
}

/// First 200 bytes of a response body, truncated on a char boundary.
fn body_preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

async fn login(client: &Client, base_url: &str, config: &ConnectionConfig) -> Result<String> {
    let username = config
        .username
        .as_deref()
        .ok_or_else(|| PbsError::Auth("no username configured".to_string()))?;
    let password = config
        .password
        .as_deref()
        .ok_or_else(|| PbsError::Auth("no password or API token configured".to_string()))?;

    let url = format!("{base_url}/api2/json/access/ticket");
    debug!("Requesting auth ticket from: {}", url);

    let response = client
        .post(&url)
        .form(&[("username", username), ("password", password)])
        .send()
        .await?;

    if !response.status().is_success() {
        warn!("Ticket login failed: {}", response.status());
        return Err(PbsError::Auth(format!(
            "ticket login failed with status {}",
            response.status()
        )));
    }

    let api_response: ApiResponse<Ticket> = response.json().await?;
    Ok(api_response.data.ticket)
}

/// Generic PBS API response wrapper.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Ticket {
    ticket: String,
}

/// Datastore usage information.
///
/// Only the store name is interpreted; every other field rides along in
/// `extra` and reaches the output untouched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatastoreUsage {
    /// Datastore name
    pub store: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A namespace within a datastore. Empty `ns` is the root namespace.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Namespace {
    pub ns: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Backup group information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupGroup {
    /// Backup type (vm, ct, host)
    #[serde(rename = "backup-type")]
    pub backup_type: String,
    /// Backup ID (VM ID, CT ID, or hostname)
    #[serde(rename = "backup-id")]
    pub backup_id: String,
    /// Group notes attached by a secondary lookup; omitted when empty
    #[serde(rename = "full-comment", default, skip_serializing_if = "Option::is_none")]
    pub full_comment: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Snapshot information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Snapshot {
    /// Backup timestamp (Unix epoch)
    #[serde(rename = "backup-time")]
    pub backup_time: i64,
    /// Derived `YYYY-MM-DD HH:MM:SS` rendering of `backup-time` (UTC)
    #[serde(rename = "backup-time-str", default, skip_serializing_if = "Option::is_none")]
    pub backup_time_str: Option<String>,
    /// Verification result; the `upid` key is stripped before output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Task information from the local node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Task {
    /// Start timestamp (Unix epoch)
    pub starttime: i64,
    /// Derived `YYYY-MM-DD HH:MM:SS` rendering of `starttime` (UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starttime_str: Option<String>,
    /// Task status; the API omits this for tasks still running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
