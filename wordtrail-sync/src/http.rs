//! HTTP remote adapter.
//!
//! Speaks a small JSON REST contract: one upsert/delete endpoint per record
//! and one collection endpoint per kind, both scoped by owner. The only
//! thing the engine requires of the backend is that records are keyed by
//! their client-assigned id and carry an `updated_at` usable for
//! last-write-wins; everything else here is adapter detail.

use crate::error::RemoteError;
use crate::remote::{PushOutcome, RemoteClient, RemoteRecord};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use wordtrail_store::PendingChange;
use wordtrail_types::{EntityId, EntityKind, HybridTimestamp, OwnerId, PendingOp};

/// Configuration for the HTTP remote.
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Base URL of the sync API (e.g. `https://api.wordtrail.app`).
    pub base_url: String,
    /// Bearer token for the authenticated session.
    pub bearer_token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpRemoteConfig {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// The wire form of a pushed operation.
#[derive(Debug, Serialize)]
struct PushBody<'a> {
    op: &'static str,
    parent_id: Option<EntityId>,
    updated_at: HybridTimestamp,
    payload: &'a serde_json::Value,
}

/// The wire form of an accepted push.
#[derive(Debug, Deserialize)]
struct PushAccepted {
    updated_at: HybridTimestamp,
}

/// [`RemoteClient`] over the WordTrail sync API.
pub struct HttpRemoteClient {
    config: HttpRemoteConfig,
    client: Client,
}

impl HttpRemoteClient {
    /// Creates a new client.
    pub fn new(config: HttpRemoteConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to create HTTP client");
        Self { config, client }
    }

    fn record_url(&self, owner_id: OwnerId, kind: EntityKind, id: EntityId) -> String {
        format!(
            "{}/v1/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            owner_id,
            kind,
            id
        )
    }

    fn collection_url(&self, owner_id: OwnerId, kind: EntityKind) -> String {
        format!(
            "{}/v1/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            owner_id,
            kind
        )
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    // Timeouts, refused connections, and mid-call drops are all worth a
    // retry once connectivity settles.
    RemoteError::Transient(e.to_string())
}

fn classify_status(status: StatusCode, body: String) -> RemoteError {
    if status == StatusCode::UNAUTHORIZED {
        return RemoteError::AuthExpired;
    }
    let retryable = status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY | StatusCode::TOO_MANY_REQUESTS
        );
    if retryable {
        RemoteError::Transient(format!("{status}: {body}"))
    } else {
        RemoteError::Permanent(format!("{status}: {body}"))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn push(&self, change: &PendingChange) -> Result<PushOutcome, RemoteError> {
        let url = self.record_url(change.owner_id, change.kind, change.id);
        let body = PushBody {
            op: change.op.as_str(),
            parent_id: change.parent_id,
            updated_at: change.updated_at,
            payload: &change.payload,
        };

        debug!("push {} {} {}", change.op, change.kind, change.id);
        let request = if change.op == PendingOp::Delete {
            self.client.delete(&url)
        } else {
            self.client.put(&url)
        };
        let response = request
            .bearer_auth(&self.config.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            let accepted: PushAccepted = response.json().await.map_err(transport_error)?;
            return Ok(PushOutcome::Applied {
                remote_updated_at: accepted.updated_at,
            });
        }
        if status == StatusCode::CONFLICT {
            let remote: RemoteRecord = response.json().await.map_err(transport_error)?;
            return Ok(PushOutcome::Conflict { remote });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }

    async fn pull(
        &self,
        kind: EntityKind,
        owner_id: OwnerId,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        let url = self.collection_url(owner_id, kind);
        debug!("pull {kind} for {owner_id}");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(transport_error);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}
