//! Batch sync of profiles and their events from a JSON-lines file.

use crate::config::SyncConfig;
use profile_sync::metrics_defs::EVENTS_POSTED;
use profile_sync::processed::{event_key, profile_key};
use profile_sync::types::normalize_email;
use profile_sync::{
    Attributes, CdpClient, Event, ProcessedStore, ProfileSync, SyncError, UpsertAction,
    UpsertOutcome, UpsertRequest,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use shared::counter;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tokio::task::{JoinError, JoinSet};

/// One line of the input file.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SyncRecord {
    pub email: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub list_id: Option<String>,
    #[serde(default)]
    pub events: Vec<RecordEvent>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RecordEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub subscribed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub events_posted: usize,
    pub events_failed: usize,
    pub duplicate_events: usize,
}

impl SyncSummary {
    fn record_outcome(&mut self, outcome: &UpsertOutcome) {
        match outcome.action {
            UpsertAction::Created => self.created += 1,
            UpsertAction::Updated => self.updated += 1,
        }
        if outcome.subscribed {
            self.subscribed += 1;
        }
    }
}

/// Reads sync records, one JSON object per line. Blank lines are ignored and
/// lines that do not parse are logged and skipped.
pub fn read_records(path: &Path) -> Result<Vec<SyncRecord>, io::Error> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SyncRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(line = index + 1, error = %err, "skipping unparseable record");
            }
        }
    }

    Ok(records)
}

/// Keeps string values, stringifies other scalars and drops empty values.
fn sanitize_attributes(raw: &Map<String, Value>) -> Attributes {
    raw.iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            (!value.is_empty()).then(|| (key.clone(), value))
        })
        .collect()
}

struct Prepared {
    email: String,
    attributes: Attributes,
    list_id: Option<String>,
    events: Vec<RecordEvent>,
}

struct PendingEvent {
    key: String,
    event: Event,
}

pub struct SyncRunner {
    client: CdpClient,
    sync: ProfileSync<CdpClient>,
    options: SyncConfig,
}

impl SyncRunner {
    pub fn new(client: CdpClient, options: SyncConfig) -> Self {
        SyncRunner {
            sync: ProfileSync::new(client.clone()),
            client,
            options,
        }
    }

    /// Upserts every record, then posts their events in batches. Keys of
    /// profiles and events accepted by the CDP are added to `store`; saving
    /// it is left to the caller.
    pub async fn run(&self, records: Vec<SyncRecord>, store: &mut ProcessedStore) -> SyncSummary {
        let mut summary = SyncSummary {
            total: records.len(),
            ..Default::default()
        };

        let mut prepared = Vec::with_capacity(records.len());
        for record in records {
            let Some(email) = normalize_email(&record.email) else {
                tracing::warn!(email = %record.email, "skipping record with invalid email");
                summary.skipped += 1;
                continue;
            };
            let list_id = record
                .list_id
                .filter(|id| !id.trim().is_empty())
                .or_else(|| self.options.default_list_id.clone());
            prepared.push(Prepared {
                email,
                attributes: sanitize_attributes(&record.attributes),
                list_id,
                events: record.events,
            });
        }

        self.upsert_profiles(&prepared, store, &mut summary).await;
        self.post_events(&prepared, store, &mut summary).await;

        tracing::info!(
            total = summary.total,
            created = summary.created,
            updated = summary.updated,
            subscribed = summary.subscribed,
            skipped = summary.skipped,
            failed = summary.failed,
            events_posted = summary.events_posted,
            events_failed = summary.events_failed,
            duplicate_events = summary.duplicate_events,
            dry_run = self.options.dry_run,
            "sync finished"
        );
        summary
    }

    async fn upsert_profiles(
        &self,
        prepared: &[Prepared],
        store: &mut ProcessedStore,
        summary: &mut SyncSummary,
    ) {
        let mut tasks = JoinSet::new();

        for record in prepared {
            if self.options.skip_synced_profiles && store.contains(&profile_key(&record.email)) {
                tracing::debug!(email = %record.email, "profile already synced");
                summary.skipped += 1;
                continue;
            }
            let Some(list_id) = &record.list_id else {
                tracing::warn!(email = %record.email, "no list id for record, skipping upsert");
                summary.skipped += 1;
                continue;
            };

            if self.options.dry_run {
                tracing::info!(
                    email = %record.email,
                    list_id = %list_id,
                    attributes = record.attributes.len(),
                    "dry run: would upsert profile"
                );
                continue;
            }

            if tasks.len() >= self.options.concurrency
                && let Some(joined) = tasks.join_next().await
            {
                record_upsert(joined, store, summary);
            }

            let sync = self.sync.clone();
            let request = UpsertRequest::new(&record.email, record.attributes.clone(), list_id);
            tasks.spawn(async move {
                let result = sync.upsert_profile_with_subscription(&request).await;
                (request.email, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            record_upsert(joined, store, summary);
        }
    }

    async fn post_events(
        &self,
        prepared: &[Prepared],
        store: &mut ProcessedStore,
        summary: &mut SyncSummary,
    ) {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for record in prepared {
            for raw in &record.events {
                let properties = Value::Object(raw.properties.clone()).to_string();
                let key = event_key(
                    &record.email,
                    &[
                        raw.event_type.as_str(),
                        raw.timestamp.as_deref().unwrap_or_default(),
                        properties.as_str(),
                    ],
                );
                if store.contains(&key) || !seen.insert(key.clone()) {
                    summary.duplicate_events += 1;
                    continue;
                }
                pending.push(PendingEvent {
                    key,
                    event: Event::new(
                        &raw.event_type,
                        &record.email,
                        raw.properties.clone(),
                        raw.timestamp.clone(),
                    ),
                });
            }
        }

        for batch in pending.chunks(self.options.event_batch_size) {
            if self.options.dry_run {
                tracing::info!(events = batch.len(), "dry run: would post event batch");
                continue;
            }

            let events: Vec<Event> = batch.iter().map(|p| p.event.clone()).collect();
            match self.client.post_events_batch(&events).await {
                Ok(response) if response.is_accepted() => {
                    for p in batch {
                        store.insert(p.key.clone());
                    }
                    summary.events_posted += batch.len();
                    counter!(EVENTS_POSTED).increment(batch.len() as u64);
                }
                Ok(response) => {
                    tracing::warn!(
                        status = response.status.as_u16(),
                        events = batch.len(),
                        "event batch rejected"
                    );
                    summary.events_failed += batch.len();
                }
                Err(err) => {
                    tracing::error!(error = %err, events = batch.len(), "event batch failed");
                    summary.events_failed += batch.len();
                }
            }
        }
    }
}

fn record_upsert(
    joined: Result<(String, Result<UpsertOutcome, SyncError>), JoinError>,
    store: &mut ProcessedStore,
    summary: &mut SyncSummary,
) {
    match joined {
        Ok((email, Ok(outcome))) => {
            tracing::info!(email = %email, action = %outcome.action, "{}", outcome.message);
            summary.record_outcome(&outcome);
            store.insert(profile_key(&email));
        }
        Ok((email, Err(err))) => {
            tracing::error!(email = %email, error = %err, "profile upsert failed");
            summary.failed += 1;
        }
        Err(err) => {
            tracing::error!("Task panicked: {}", err);
            summary.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profile_sync::{ClientConfig, RetryPolicy};
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LIST: &str = "weekly_digest";

    fn options(dry_run: bool) -> SyncConfig {
        SyncConfig {
            default_list_id: Some(LIST.into()),
            event_batch_size: 2,
            concurrency: 2,
            dry_run,
            ..Default::default()
        }
    }

    fn runner(server: &MockServer, options: SyncConfig) -> SyncRunner {
        let client = CdpClient::new(ClientConfig::new(server.uri(), "test-key").with_retry(
            RetryPolicy {
                max_attempts: 2,
                delay: Duration::from_millis(1),
            },
        ))
        .unwrap();
        SyncRunner::new(client, options)
    }

    fn record(email: &str, events: usize) -> SyncRecord {
        SyncRecord {
            email: email.into(),
            attributes: json!({"first_name": "Ada", "city": "", "orders": 3, "note": null})
                .as_object()
                .cloned()
                .unwrap(),
            list_id: None,
            events: (0..events)
                .map(|i| RecordEvent {
                    event_type: "purchase".into(),
                    timestamp: Some(format!("2024-05-01T12:00:0{i}+00:00")),
                    properties: json!({"ticket": format!("T-{i}")})
                        .as_object()
                        .cloned()
                        .unwrap(),
                })
                .collect(),
        }
    }

    async fn mock_cdp(server: &MockServer, events_status: u16) {
        Mock::given(method("GET"))
            .and(path("/profiles"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(events_status))
            .mount(server)
            .await;
    }

    async fn posted_bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "POST")
            .map(|r| r.body_json::<Value>().unwrap())
            .collect()
    }

    #[test]
    fn test_sanitize_attributes() {
        let attributes = sanitize_attributes(
            json!({"first_name": " Ada ", "city": "", "orders": 3, "note": null})
                .as_object()
                .unwrap(),
        );
        assert_eq!(
            attributes,
            Attributes::from([
                ("first_name".to_string(), "Ada".to_string()),
                ("orders".to_string(), "3".to_string()),
            ])
        );
    }

    #[test]
    fn test_read_records_skips_bad_lines() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, r#"{{"email": "ada@example.com", "list_id": "l1"}}"#).unwrap();
        writeln!(tmp).unwrap();
        writeln!(tmp, "not json").unwrap();
        writeln!(
            tmp,
            r#"{{"email": "bob@example.com", "events": [{{"type": "purchase", "properties": {{"sku": "A1"}}}}]}}"#
        )
        .unwrap();

        let records = read_records(tmp.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].list_id.as_deref(), Some("l1"));
        assert_eq!(records[1].events[0].event_type, "purchase");
        assert_eq!(records[1].events[0].timestamp, None);
    }

    #[tokio::test]
    async fn test_run_upserts_and_batches_events() {
        let server = MockServer::start().await;
        mock_cdp(&server, 202).await;

        let mut store = ProcessedStore::in_memory();
        let records = vec![
            record(" Ada@Example.com ", 2),
            record("bob@example.com", 1),
            record("not-an-email", 1),
        ];
        let summary = runner(&server, options(false)).run(records, &mut store).await;

        assert_eq!(
            summary,
            SyncSummary {
                total: 3,
                created: 2,
                subscribed: 2,
                skipped: 1,
                events_posted: 3,
                ..Default::default()
            }
        );
        assert!(store.contains(&profile_key("ada@example.com")));
        assert!(store.contains(&profile_key("bob@example.com")));

        let bodies = posted_bodies(&server).await;
        let profile_writes: Vec<_> = bodies.iter().filter(|b| b.is_object()).collect();
        assert_eq!(profile_writes.len(), 2);
        for write in &profile_writes {
            assert_eq!(write["properties"], json!({"first_name": "Ada", "orders": "3"}));
            assert_eq!(write["lists"], json!([{"id": LIST, "subscribe": true}]));
        }
        let batches: Vec<_> = bodies.iter().filter(|b| b.is_array()).collect();
        let mut sizes: Vec<_> = batches.iter().map(|b| b.as_array().unwrap().len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2]);
        assert_eq!(batches[0][0]["identifiers"]["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_rejected_events_are_not_marked() {
        let server = MockServer::start().await;
        mock_cdp(&server, 400).await;

        let mut store = ProcessedStore::in_memory();
        let summary = runner(&server, options(false))
            .run(vec![record("ada@example.com", 1)], &mut store)
            .await;

        // The profile write shares the events endpoint, so it is rejected too.
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.events_failed, 1);
        assert_eq!(summary.events_posted, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_already_processed_events_are_not_resent() {
        let server = MockServer::start().await;
        mock_cdp(&server, 200).await;

        let runner = runner(&server, options(false));
        let mut store = ProcessedStore::in_memory();
        let first = runner.run(vec![record("ada@example.com", 3)], &mut store).await;
        assert_eq!(first.events_posted, 3);

        let second = runner.run(vec![record("ada@example.com", 3)], &mut store).await;
        assert_eq!(second.events_posted, 0);
        assert_eq!(second.duplicate_events, 3);
        assert_eq!(second.updated, 0);
        assert_eq!(second.created, 1);
    }

    #[tokio::test]
    async fn test_skip_synced_profiles() {
        let server = MockServer::start().await;
        mock_cdp(&server, 202).await;

        let mut store = ProcessedStore::in_memory();
        store.insert(profile_key("ada@example.com"));
        let options = SyncConfig {
            skip_synced_profiles: true,
            ..options(false)
        };
        let summary = runner(&server, options)
            .run(vec![record("ada@example.com", 0)], &mut store)
            .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 0);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_without_list_is_skipped() {
        let server = MockServer::start().await;
        mock_cdp(&server, 202).await;

        let options = SyncConfig {
            default_list_id: None,
            ..options(false)
        };
        let mut store = ProcessedStore::in_memory();
        let summary = runner(&server, options)
            .run(vec![record("ada@example.com", 0)], &mut store)
            .await;

        assert_eq!(summary.skipped, 1);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upsert_does_not_abort_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profiles"))
            .and(query_param("email", "bad@example.com"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/profiles"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let options = SyncConfig {
            concurrency: 1,
            ..options(false)
        };
        let client = CdpClient::new(
            ClientConfig::new(server.uri(), "test-key")
                .with_retry(RetryPolicy {
                    max_attempts: 1,
                    delay: Duration::from_millis(1),
                })
                .with_read_failure_policy(profile_sync::ReadFailurePolicy::FailClosed),
        )
        .unwrap();
        let mut store = ProcessedStore::in_memory();
        let summary = SyncRunner::new(client, options)
            .run(
                vec![record("bad@example.com", 0), record("ada@example.com", 0)],
                &mut store,
            )
            .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.created, 1);
        assert!(!store.contains(&profile_key("bad@example.com")));
        assert!(store.contains(&profile_key("ada@example.com")));
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_requests() {
        let server = MockServer::start().await;

        let mut store = ProcessedStore::in_memory();
        let summary = runner(&server, options(true))
            .run(vec![record("ada@example.com", 3)], &mut store)
            .await;

        assert_eq!(summary.total, 1);
        assert_eq!(summary.events_posted, 0);
        assert!(store.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
