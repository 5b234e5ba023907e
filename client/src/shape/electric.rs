//! HTTP shape transport.

use super::{
    protocol::{self, HANDLE_HEADER, INITIAL_OFFSET, OFFSET_HEADER},
    ShapeDescriptor, ShapeMessage, ShapeStream, ShapeTransport,
};
use crate::{config::SyncConfig, error::TransportError};
use async_trait::async_trait;
use ordo_sync_engine::SyncRecord;
use reqwest::{header::HeaderMap, Client, StatusCode};
use std::{collections::VecDeque, marker::PhantomData, time::Duration};

/// Shape transport speaking the Electric HTTP shape API.
#[derive(Debug, Clone)]
pub struct ElectricTransport {
    client: Client,
    endpoint_url: String,
    source_id: Option<String>,
    secret: Option<String>,
    probe_timeout: Duration,
}

impl ElectricTransport {
    pub fn new(config: &SyncConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.trim_end_matches('/').to_string(),
            source_id: config.source_id.clone(),
            secret: config.secret.clone(),
            probe_timeout: config.probe_timeout,
        })
    }

    fn shape_url(&self) -> String {
        format!("{}/v1/shape", self.endpoint_url)
    }
}

#[async_trait]
impl<R: SyncRecord> ShapeTransport<R> for ElectricTransport {
    async fn probe(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(format!("{}/v1/health", self.endpoint_url))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        check_status(response.status())
    }

    async fn connect(
        &self,
        shape: &ShapeDescriptor,
    ) -> Result<Box<dyn ShapeStream<R>>, TransportError> {
        Ok(Box::new(ElectricStream::<R> {
            transport: self.clone(),
            shape: shape.clone(),
            offset: INITIAL_OFFSET.to_string(),
            handle: None,
            live: false,
            buffer: VecDeque::new(),
            _record: PhantomData,
        }))
    }
}

fn check_status(status: StatusCode) -> Result<(), TransportError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(TransportError::Unauthorized(status.to_string()))
        }
        s => Err(TransportError::Network(format!("unexpected status {s}"))),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

struct ElectricStream<R: SyncRecord> {
    transport: ElectricTransport,
    shape: ShapeDescriptor,
    offset: String,
    handle: Option<String>,
    /// Long-poll once caught up
    live: bool,
    buffer: VecDeque<ShapeMessage<R>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: SyncRecord> ElectricStream<R> {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("table", self.shape.qualified_table()),
            ("offset", self.offset.clone()),
        ];
        if let Some(handle) = &self.handle {
            params.push(("handle", handle.clone()));
        }
        if self.live {
            params.push(("live", "true".to_string()));
        }
        if let Some(filter) = &self.shape.filter {
            params.push(("where", filter.clone()));
        }
        if let Some(source_id) = &self.transport.source_id {
            params.push(("source_id", source_id.clone()));
        }
        if let Some(secret) = &self.transport.secret {
            params.push(("secret", secret.clone()));
        }
        params
    }

    async fn fetch(&mut self) -> Result<(), TransportError> {
        let response = self
            .transport
            .client
            .get(self.transport.shape_url())
            .query(&self.query())
            .send()
            .await?;

        let handle = header_value(response.headers(), HANDLE_HEADER);
        let offset = header_value(response.headers(), OFFSET_HEADER);

        if response.status() == StatusCode::CONFLICT {
            tracing::warn!(shape_key = %self.shape.shape_key(), "Shape must be refetched");
            self.handle = handle;
            self.offset = INITIAL_OFFSET.to_string();
            self.live = false;
            self.buffer.push_back(ShapeMessage::MustRefetch);
            return Ok(());
        }
        check_status(response.status())?;

        if let Some(handle) = handle {
            self.handle = Some(handle);
        }
        if let Some(offset) = offset {
            self.offset = offset;
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(());
        }

        let messages = protocol::decode_batch::<R>(&body)?;
        if messages.iter().any(|m| matches!(m, ShapeMessage::UpToDate)) {
            self.live = true;
        }
        tracing::debug!(
            shape_key = %self.shape.shape_key(),
            count = messages.len(),
            offset = %self.offset,
            "Fetched shape messages"
        );
        self.buffer.extend(messages);
        Ok(())
    }
}

#[async_trait]
impl<R: SyncRecord> ShapeStream<R> for ElectricStream<R> {
    async fn next_message(&mut self) -> Result<Option<ShapeMessage<R>>, TransportError> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                return Ok(Some(message));
            }
            self.fetch().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_sync_engine::Task;

    fn stream(config: SyncConfig) -> ElectricStream<Task> {
        ElectricStream {
            transport: ElectricTransport::new(&config).unwrap(),
            shape: ShapeDescriptor::new("tasks")
                .with_schema("public")
                .with_filter("completed = false"),
            offset: INITIAL_OFFSET.to_string(),
            handle: None,
            live: false,
            buffer: VecDeque::new(),
            _record: PhantomData,
        }
    }

    #[test]
    fn initial_query() {
        let mut config = SyncConfig::new("http://localhost:3000/");
        config.source_id = Some("src".into());
        config.secret = Some("shh".into());
        let stream = stream(config);

        assert_eq!(stream.transport.shape_url(), "http://localhost:3000/v1/shape");
        let query = stream.query();
        assert_eq!(
            query,
            vec![
                ("table", "public.tasks".to_string()),
                ("offset", "-1".to_string()),
                ("where", "completed = false".to_string()),
                ("source_id", "src".to_string()),
                ("secret", "shh".to_string()),
            ]
        );
    }

    #[test]
    fn live_query_carries_handle() {
        let mut stream = stream(SyncConfig::new("http://localhost:3000"));
        stream.handle = Some("h-1".into());
        stream.offset = "0_0".into();
        stream.live = true;

        let query = stream.query();
        assert!(query.contains(&("handle", "h-1".to_string())));
        assert!(query.contains(&("offset", "0_0".to_string())));
        assert!(query.contains(&("live", "true".to_string())));
    }

    #[test]
    fn status_mapping() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN),
            Err(TransportError::Unauthorized(_))
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(TransportError::Network(_))
        ));
    }
}
