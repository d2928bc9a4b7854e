//! In-memory doubles shared by the unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

use crate::gateway::{ApiConnector, GatewayError, TaxApi};
use crate::log_sink::{LogEntry, LogSink, Severity};
use crate::scheduler::Clock;
use crate::store::{StoreError, TaxLevel, TaxRateRecord, TaxRateStore};

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingSink {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_with(&self, level: Severity) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|entry| entry.message).collect()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub records: Vec<TaxRateRecord>,
}

#[async_trait]
impl TaxRateStore for MemoryStore {
    async fn records_updated_after(
        &self,
        level: TaxLevel,
        cutoff: NaiveDateTime,
    ) -> Result<Vec<TaxRateRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|record| record.updated_after(level, cutoff))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login { url: String, payload: String },
    Update { url: String, payload: String },
}

/// Scripted API: responds to each call with the first matching rule.
#[derive(Clone, Default)]
pub struct MockApi {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub login_response: Option<String>,
    /// Payload substring that makes an update fail with this body.
    pub reject_update: Option<(String, String)>,
    /// Payload substring that makes an update fail at the transport level.
    pub drop_update: Option<String>,
}

impl MockApi {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn update_payloads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Update { payload, .. } => Some(payload),
                Call::Login { .. } => None,
            })
            .collect()
    }
}

fn transport_error() -> GatewayError {
    let source = reqwest::Client::new()
        .get("not a url")
        .build()
        .unwrap_err();
    GatewayError::Transport {
        url: "mock".to_string(),
        source,
    }
}

#[async_trait]
impl TaxApi for MockApi {
    async fn login(&self, url: &str, payload: String) -> Result<String, GatewayError> {
        self.calls.lock().unwrap().push(Call::Login {
            url: url.to_string(),
            payload,
        });
        match &self.login_response {
            Some(body) => Ok(body.clone()),
            None => Err(transport_error()),
        }
    }

    async fn submit_update(&self, url: &str, payload: String) -> Result<String, GatewayError> {
        self.calls.lock().unwrap().push(Call::Update {
            url: url.to_string(),
            payload: payload.clone(),
        });
        if let Some(marker) = &self.drop_update {
            if payload.contains(marker.as_str()) {
                return Err(transport_error());
            }
        }
        if let Some((marker, body)) = &self.reject_update {
            if payload.contains(marker.as_str()) {
                return Ok(body.clone());
            }
        }
        Ok(r#"{"id":"ok"}"#.to_string())
    }
}

impl ApiConnector for MockApi {
    fn connect(&self) -> Result<Box<dyn TaxApi>, GatewayError> {
        Ok(Box::new(self.clone()))
    }
}
