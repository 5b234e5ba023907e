//! Local write path: sends pending local changes to the write server.

use crate::{error::TransportError, store::PendingChange};
use async_trait::async_trait;
use ordo_sync_engine::SyncRecord;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::HashMap;

/// Sends pending local changes upstream.
///
/// A push either succeeds for the whole batch or fails; rows are only
/// marked as sent after success.
#[async_trait]
pub trait ChangePusher<R: SyncRecord>: Send + Sync + 'static {
    async fn push(&self, table: &str, changes: &[PendingChange<R>]) -> Result<(), TransportError>;
}

/// Outcome of one push pass over every table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    /// Rows sent to the write server
    pub sent: usize,
    /// Rows marked as sent
    pub marked: usize,
    /// Rows edited again while the push was in flight; they stay pending
    pub stale: usize,
}

/// Posts change sets to `{url}/apply-changes`.
#[derive(Debug, Clone)]
pub struct HttpChangePusher {
    client: Client,
    apply_url: String,
}

impl HttpChangePusher {
    pub fn new(write_server_url: &str) -> Self {
        Self {
            client: Client::new(),
            apply_url: format!("{}/apply-changes", write_server_url.trim_end_matches('/')),
        }
    }

    pub fn apply_url(&self) -> &str {
        &self.apply_url
    }
}

#[async_trait]
impl<R: SyncRecord> ChangePusher<R> for HttpChangePusher {
    async fn push(&self, table: &str, changes: &[PendingChange<R>]) -> Result<(), TransportError> {
        let body: HashMap<&str, &[PendingChange<R>]> = HashMap::from([(table, changes)]);

        let response = self.client.post(&self.apply_url).json(&body).send().await?;

        match response.status() {
            s if s.is_success() => {
                tracing::info!(table = %table, count = changes.len(), "Pushed local changes");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(TransportError::Unauthorized(response.status().to_string()))
            }
            s => Err(TransportError::Network(format!(
                "write server rejected changes: {s}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ordo_sync_engine::Task;
    use serde_json::json;

    #[test]
    fn apply_url_is_normalized() {
        assert_eq!(
            HttpChangePusher::new("http://localhost:3001/").apply_url(),
            "http://localhost:3001/apply-changes"
        );
    }

    #[test]
    fn change_set_shape() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let changes = vec![PendingChange {
            record: Task::new("t1", "Draft", at),
            modified_columns: vec!["title".to_string()],
            new: true,
            deleted: false,
        }];
        let body: HashMap<&str, &[PendingChange<Task>]> = HashMap::from([("tasks", &changes[..])]);

        let value = serde_json::to_value(&body).unwrap();
        let row = &value["tasks"][0];
        assert_eq!(row["id"], json!("t1"));
        assert_eq!(row["title"], json!("Draft"));
        assert_eq!(row["modified_columns"], json!(["title"]));
        assert_eq!(row["new"], json!(true));
    }
}
