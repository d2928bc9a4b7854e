//! One update cycle: select changed rates, log in once, push every rate.
//!
//! Candidates are gathered with one windowed query per tax level. A record
//! qualifies for a level when that level's timestamp is strictly after local
//! midnight `window_days` days before today.
//!
//! Login failure aborts the cycle before any update is sent. Individual
//! update failures are logged and the batch moves on; nothing is retried or
//! rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveTime};

use crate::config::ApiConfig;
use crate::gateway::{indicates_failure, ApiConnector, GatewayError, TaxApi};
use crate::log_sink::{LogEntry, LogSink};
use crate::payload::{
    build_login_payload, build_update_payload, PayloadError, DEFAULT_LOGIN_TEMPLATE,
    DEFAULT_UPDATE_TEMPLATE,
};
use crate::scheduler::{Clock, UpdateCycle};
use crate::secret::{EncodedSecret, SecretError};
use crate::store::{StoreError, TaxLevel, TaxRateRecord, TaxRateStore, TaxType};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("failed to decode {field}")]
    Secret {
        field: &'static str,
        #[source]
        source: SecretError,
    },

    #[error("failed to build login payload")]
    Payload(#[from] PayloadError),

    #[error("failed to query tax rate records")]
    Store(#[from] StoreError),

    #[error("failed to open API session")]
    Gateway(#[from] GatewayError),

    #[error("authentication failed: {reason}")]
    AuthenticationFailure {
        reason: String,
        #[source]
        source: Option<GatewayError>,
    },
}

/// A per-record failure. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum UpdateFailure {
    #[error("could not build update payload for {tax_id}")]
    Payload {
        tax_id: String,
        #[source]
        source: PayloadError,
    },

    #[error("update request for {tax_id} failed")]
    Transport {
        tax_id: String,
        #[source]
        source: GatewayError,
    },

    #[error("Error updating tax rate: {body}")]
    Rejected { tax_id: String, body: String },
}

/// A tax schedule entry to push to the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxScheduleUpdate {
    pub tax_id: String,
    pub tax_rate: String,
    pub reporting_group: &'static str,
}

impl TaxScheduleUpdate {
    /// State rates are keyed by state code, local rates by jurisdiction and
    /// level. Use tax always reports to the `Use` group.
    pub fn from_record(record: &TaxRateRecord, level: TaxLevel) -> Self {
        let tax_type = record.tax_type.as_str();
        let tax_id = match level {
            TaxLevel::State => format!("{}{}", record.state, tax_type),
            _ => format!("{}{}{}", record.z2t_id, level.id_suffix(), tax_type),
        };
        let reporting_group = match (record.tax_type, level) {
            (TaxType::Use, _) => "Use",
            (TaxType::Sales, TaxLevel::State) => "State",
            (TaxType::Sales, _) => "Local",
        };

        Self {
            tax_id,
            tax_rate: record.rate(level).to_string(),
            reporting_group,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Collects the cycle's candidates from the four per-level queries.
///
/// The state level contributes at most one sales and one use entry (the
/// first qualifying record of each type); every qualifying record
/// contributes an entry for the local levels.
pub async fn collect_candidates(
    store: &dyn TaxRateStore,
    today: NaiveDate,
    window_days: u32,
) -> Result<Vec<TaxScheduleUpdate>, StoreError> {
    let cutoff = today
        .checked_sub_days(Days::new(window_days.into()))
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN);

    let mut candidates = Vec::new();
    for level in TaxLevel::ALL {
        let records = store.records_updated_after(level, cutoff).await?;
        match level {
            TaxLevel::State => {
                for tax_type in [TaxType::Sales, TaxType::Use] {
                    if let Some(record) = records.iter().find(|r| r.tax_type == tax_type) {
                        candidates.push(TaxScheduleUpdate::from_record(record, level));
                    }
                }
            }
            _ => candidates.extend(
                records
                    .iter()
                    .map(|record| TaxScheduleUpdate::from_record(record, level)),
            ),
        }
    }
    Ok(candidates)
}

pub struct UpdateOrchestrator {
    api: ApiConfig,
    window_days: u32,
    store: Arc<dyn TaxRateStore>,
    connector: Arc<dyn ApiConnector>,
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn Clock>,
}

impl UpdateOrchestrator {
    pub fn new(
        api: ApiConfig,
        window_days: u32,
        store: Arc<dyn TaxRateStore>,
        connector: Arc<dyn ApiConnector>,
        sink: Arc<dyn LogSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            window_days,
            store,
            connector,
            sink,
            clock,
        }
    }

    pub async fn run_update_cycle(&self) -> Result<CycleReport, SyncError> {
        let today = self.clock.today();
        let candidates = collect_candidates(self.store.as_ref(), today, self.window_days).await?;
        let mut report = CycleReport {
            candidates: candidates.len(),
            ..CycleReport::default()
        };

        if candidates.is_empty() {
            self.sink
                .log(LogEntry::information("No tax rate changes found, nothing to update."));
            return Ok(report);
        }

        let api = self.connector.connect()?;
        self.log_in(api.as_ref()).await?;

        let update_url = self.endpoint(&self.api.update_path, "api.update_path")?;
        let template = self.template(
            self.api.update_template.as_ref(),
            DEFAULT_UPDATE_TEMPLATE,
            "api.update_template",
        )?;

        for candidate in &candidates {
            match self
                .update_one(api.as_ref(), &update_url, &template, candidate, today)
                .await
            {
                Ok(()) => report.succeeded += 1,
                Err(failure) => {
                    report.failed += 1;
                    self.sink.log(LogEntry::from_error(&failure));
                }
            }
        }

        tracing::info!(
            candidates = report.candidates,
            succeeded = report.succeeded,
            failed = report.failed,
            "tax rate updates submitted"
        );
        Ok(report)
    }

    async fn log_in(&self, api: &dyn TaxApi) -> Result<(), SyncError> {
        let template = self.template(
            self.api.login_template.as_ref(),
            DEFAULT_LOGIN_TEMPLATE,
            "api.login_template",
        )?;
        let payload = build_login_payload(
            &template,
            &self.decode(&self.api.username, "api.username")?,
            &self.decode(&self.api.password, "api.password")?,
            &self.decode(&self.api.tenant, "api.tenant")?,
        )?;
        let login_url = self.endpoint(&self.api.login_path, "api.login_path")?;

        let body = api
            .login(&login_url, payload)
            .await
            .map_err(|source| SyncError::AuthenticationFailure {
                reason: "login request failed".to_string(),
                source: Some(source),
            })?;

        if indicates_failure(&body) {
            return Err(SyncError::AuthenticationFailure {
                reason: body,
                source: None,
            });
        }

        tracing::debug!(url = %login_url, "logged in");
        Ok(())
    }

    async fn update_one(
        &self,
        api: &dyn TaxApi,
        url: &str,
        template: &str,
        candidate: &TaxScheduleUpdate,
        today: NaiveDate,
    ) -> Result<(), UpdateFailure> {
        let tax_id = &candidate.tax_id;
        let payload = build_update_payload(
            template,
            tax_id,
            &candidate.tax_rate,
            candidate.reporting_group,
            today,
            &self.api.start_date_format,
        )
        .map_err(|source| UpdateFailure::Payload {
            tax_id: tax_id.clone(),
            source,
        })?;

        self.sink
            .log(LogEntry::information(format!("Updating tax rate: {payload}")));

        let body = api
            .submit_update(url, payload)
            .await
            .map_err(|source| UpdateFailure::Transport {
                tax_id: tax_id.clone(),
                source,
            })?;

        if indicates_failure(&body) {
            return Err(UpdateFailure::Rejected {
                tax_id: tax_id.clone(),
                body,
            });
        }
        Ok(())
    }

    fn endpoint(&self, path: &EncodedSecret, field: &'static str) -> Result<String, SyncError> {
        let path = self.decode(path, field)?;
        Ok(format!("{}{}", self.api.base_url, path))
    }

    fn template(
        &self,
        configured: Option<&EncodedSecret>,
        default: &str,
        field: &'static str,
    ) -> Result<String, SyncError> {
        match configured {
            Some(template) => self.decode(template, field),
            None => Ok(default.to_string()),
        }
    }

    /// Rejected values are recorded in the log store without their content.
    fn decode(&self, secret: &EncodedSecret, field: &'static str) -> Result<String, SyncError> {
        secret.decode(self.api.padding).map_err(|source| {
            self.sink.log(LogEntry::information(format!(
                "Value for {field} is not a valid obfuscated string: {source}"
            )));
            SyncError::Secret { field, source }
        })
    }
}

#[async_trait]
impl UpdateCycle for UpdateOrchestrator {
    async fn run_update_cycle(&self) -> Result<CycleReport, SyncError> {
        UpdateOrchestrator::run_update_cycle(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::Severity;
    use crate::secret::{encode, PaddingStrategy};
    use crate::test_support::{Call, FixedClock, MemoryStore, MockApi, RecordingSink};
    use chrono::NaiveDateTime;

    const BASE_URL: &str = "https://erp.example.com";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 31).unwrap()
    }

    fn days_ago(days: u64) -> Option<NaiveDateTime> {
        today()
            .checked_sub_days(Days::new(days))
            .and_then(|d| d.and_hms_opt(9, 30, 0))
    }

    fn api_config() -> ApiConfig {
        let secret = |plain: &str| EncodedSecret::new(encode(plain, PaddingStrategy::Restore));
        ApiConfig {
            base_url: BASE_URL.to_string(),
            login_path: secret("/entity/auth/login"),
            update_path: secret("/entity/Default/22.200.001/SalesTax"),
            username: secret("admin"),
            password: secret("hunter2"),
            tenant: secret("Company"),
            padding: PaddingStrategy::Restore,
            login_template: None,
            update_template: None,
            start_date_format: "%Y-%m-%d".to_string(),
            user_agent: "test".to_string(),
        }
    }

    fn record(z2t_id: &str, state: &str, tax_type: TaxType) -> TaxRateRecord {
        TaxRateRecord {
            z2t_id: z2t_id.to_string(),
            state: state.to_string(),
            tax_type,
            rate_state: 0.0625,
            rate_county: 0.005,
            rate_special_district: 0.01,
            rate_city: 0.02,
            state_updated: None,
            county_updated: None,
            sd_updated: None,
            city_updated: None,
        }
    }

    fn county_record(z2t_id: &str) -> TaxRateRecord {
        TaxRateRecord {
            county_updated: days_ago(3),
            ..record(z2t_id, "TX", TaxType::Sales)
        }
    }

    fn orchestrator(
        records: Vec<TaxRateRecord>,
        api: &MockApi,
        sink: &Arc<RecordingSink>,
        config: ApiConfig,
    ) -> UpdateOrchestrator {
        UpdateOrchestrator::new(
            config,
            21,
            Arc::new(MemoryStore { records }),
            Arc::new(api.clone()),
            sink.clone(),
            Arc::new(FixedClock(today())),
        )
    }

    fn logged_in() -> MockApi {
        MockApi {
            login_response: Some(String::new()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_candidate_selection_per_level() {
        let records = vec![
            TaxRateRecord {
                state_updated: days_ago(1),
                city_updated: days_ago(2),
                ..record("TX001", "TX", TaxType::Sales)
            },
            TaxRateRecord {
                state_updated: days_ago(1),
                ..record("TX002", "TX", TaxType::Sales)
            },
            TaxRateRecord {
                state_updated: days_ago(5),
                sd_updated: days_ago(20),
                county_updated: days_ago(22),
                ..record("TX003", "TX", TaxType::Use)
            },
        ];
        let store = MemoryStore { records };

        let candidates = collect_candidates(&store, today(), 21).await.unwrap();
        let summary: Vec<_> = candidates
            .iter()
            .map(|c| (c.tax_id.as_str(), c.tax_rate.as_str(), c.reporting_group))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("TXSales", "0.0625", "State"),
                ("TXUse", "0.0625", "Use"),
                ("TX003SDUse", "0.01", "Use"),
                ("TX001CitySales", "0.02", "Local"),
            ]
        );
    }

    #[tokio::test]
    async fn test_window_boundary_is_exclusive() {
        let boundary = today()
            .checked_sub_days(Days::new(21))
            .and_then(|d| d.and_hms_opt(0, 0, 0));
        let store = MemoryStore {
            records: vec![TaxRateRecord {
                county_updated: boundary,
                ..record("NV001", "NV", TaxType::Sales)
            }],
        };
        assert!(collect_candidates(&store, today(), 21)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_no_candidates_means_no_network() {
        let api = logged_in();
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(vec![], &api, &sink, api_config());

        let report = orchestrator.run_update_cycle().await.unwrap();

        assert_eq!(report, CycleReport::default());
        assert!(api.calls().is_empty());
        assert_eq!(sink.entries_with(Severity::Information).len(), 1);
    }

    #[tokio::test]
    async fn test_logs_in_once_then_updates_each_record() {
        let api = logged_in();
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(
            vec![county_record("TX001"), county_record("TX002")],
            &api,
            &sink,
            api_config(),
        );

        let report = orchestrator.run_update_cycle().await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                candidates: 2,
                succeeded: 2,
                failed: 0
            }
        );

        let calls = api.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            Call::Login {
                url: format!("{BASE_URL}/entity/auth/login"),
                payload: r#"{"name":"admin","password":"hunter2","locale":"en-US","tenant":"Company"}"#
                    .to_string(),
            }
        );
        match &calls[1] {
            Call::Update { url, payload } => {
                assert_eq!(url, &format!("{BASE_URL}/entity/Default/22.200.001/SalesTax"));
                assert!(payload.contains(r#""TaxID":{"value":"TX001CountySales"}"#));
                assert!(payload.contains(r#""TaxRate":{"value":0.005}"#));
                assert!(payload.contains(r#""StartDate":{"value":"2026-10-31"}"#));
                assert!(payload.contains(r#""ReportingGroup":{"value":"Local"}"#));
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert!(sink.entries_with(Severity::Error).is_empty());
        assert!(sink
            .messages()
            .iter()
            .any(|m| m.starts_with("Updating tax rate: ") && m.contains("TX002CountySales")));
    }

    #[tokio::test]
    async fn test_rejected_record_does_not_stop_batch() {
        let api = MockApi {
            reject_update: Some((
                "TX002".to_string(),
                r#"{"message":"error: tax schedule locked"}"#.to_string(),
            )),
            ..logged_in()
        };
        let sink = Arc::new(RecordingSink::default());
        let records = ["TX001", "TX002", "TX003", "TX004"]
            .into_iter()
            .map(county_record)
            .collect();
        let orchestrator = orchestrator(records, &api, &sink, api_config());

        let report = orchestrator.run_update_cycle().await.unwrap();

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        let submitted = api.update_payloads();
        assert_eq!(submitted.len(), 4);
        for (payload, id) in submitted.iter().zip(["TX001", "TX002", "TX003", "TX004"]) {
            assert!(payload.contains(id), "{payload} should be for {id}");
        }

        let errors = sink.entries_with(Severity::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            r#"Error updating tax rate: {"message":"error: tax schedule locked"}"#
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_per_record() {
        let api = MockApi {
            drop_update: Some("TX001".to_string()),
            ..logged_in()
        };
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(
            vec![county_record("TX001"), county_record("TX002")],
            &api,
            &sink,
            api_config(),
        );

        let report = orchestrator.run_update_cycle().await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        let errors = sink.entries_with(Severity::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "update request for TX001CountySales failed");
        assert!(errors[0].stack_trace.is_some());
    }

    #[tokio::test]
    async fn test_failed_login_sends_no_updates() {
        let api = MockApi {
            login_response: Some(r#"{"error":"Invalid credentials"}"#.to_string()),
            ..Default::default()
        };
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(
            vec![county_record("TX001"), county_record("TX002")],
            &api,
            &sink,
            api_config(),
        );

        let err = orchestrator.run_update_cycle().await.unwrap_err();

        assert!(matches!(err, SyncError::AuthenticationFailure { source: None, .. }));
        assert!(api.update_payloads().is_empty());
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_login_is_authentication_failure() {
        let api = MockApi::default();
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = orchestrator(vec![county_record("TX001")], &api, &sink, api_config());

        let err = orchestrator.run_update_cycle().await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::AuthenticationFailure {
                source: Some(_),
                ..
            }
        ));
        assert!(api.update_payloads().is_empty());
    }

    #[tokio::test]
    async fn test_bad_secret_aborts_cycle() {
        let api = logged_in();
        let sink = Arc::new(RecordingSink::default());
        let config = ApiConfig {
            password: EncodedSecret::new("not base64!"),
            ..api_config()
        };
        let orchestrator = orchestrator(vec![county_record("TX001")], &api, &sink, config);

        let err = orchestrator.run_update_cycle().await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Secret {
                field: "api.password",
                source: SecretError::InvalidEncoding(_)
            }
        ));
        assert!(api.calls().is_empty());

        let rejections = sink.entries_with(Severity::Information);
        assert_eq!(rejections.len(), 1);
        assert!(rejections[0].message.contains("api.password"));
        assert!(!rejections[0].message.contains("not base64!"));
    }

    #[tokio::test]
    async fn test_configured_update_template() {
        let api = logged_in();
        let sink = Arc::new(RecordingSink::default());
        let template = r#"{"id":"{taxID}","rate":{taxRate},"group":"{reportinggroup}","from":"{startDate}"}"#;
        let config = ApiConfig {
            update_template: Some(EncodedSecret::new(encode(
                template,
                PaddingStrategy::Restore,
            ))),
            ..api_config()
        };
        let orchestrator = orchestrator(vec![county_record("TX001")], &api, &sink, config);

        orchestrator.run_update_cycle().await.unwrap();

        assert_eq!(
            api.update_payloads(),
            vec![r#"{"id":"TX001CountySales","rate":0.005,"group":"Local","from":"2026-10-31"}"#]
        );
    }
}
