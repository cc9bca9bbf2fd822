//! Durable queue of records awaiting delivery.
//!
//! Records whose send failed are appended to a JSON array persisted under a
//! single store key. A flush replays the whole array through the
//! [`DeliveryClient`] in insertion order and then clears it.
//!
//! Two locks guard the queue. The store lock makes each read-modify-write
//! atomic; no await happens while it is held except acquiring it. The flush
//! lock serializes flushes (and [`OfflineQueue::clear`]) so that a pass never
//! races another pass over the same records. Appends may land while a flush
//! is sending; the flush only removes the prefix it attempted.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::error::{Error, Result};
use crate::record::AttendanceRecord;
use crate::storage::KeyValueStore;

/// What a flush does with records whose send failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Clear every attempted record, failed or not.
    #[default]
    ClearAll,
    /// Keep failed records for the next flush.
    RetainFailed,
}

/// Counts from one completed flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Records a send was attempted for.
    pub attempted: usize,
    /// Records the transport accepted.
    pub delivered: usize,
    /// Records whose send failed.
    pub failed: usize,
    /// Failed records kept in the queue.
    pub retained: usize,
}

impl FlushReport {
    /// Failed records that were cleared without delivery.
    #[must_use]
    pub fn lost(&self) -> usize {
        self.failed - self.retained
    }
}

/// Result of a flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The network is down; nothing was touched.
    Offline,
    /// No endpoint is configured; nothing was touched.
    NotConfigured,
    /// The queue was empty.
    Empty,
    /// A pass ran over the queued records.
    Flushed(FlushReport),
}

/// The offline queue.
#[derive(Debug)]
pub struct OfflineQueue<S> {
    key: String,
    policy: FlushPolicy,
    store: Mutex<S>,
    flush_lock: Mutex<()>,
}

impl<S: KeyValueStore> OfflineQueue<S> {
    /// Create a queue persisted under `key` in `store`.
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            policy: FlushPolicy::default(),
            store: Mutex::new(store),
            flush_lock: Mutex::new(()),
        }
    }

    /// Set the flush policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The store key this queue persists under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The flush policy in effect.
    #[must_use]
    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Append `record` to the persisted queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written, or if the
    /// persisted queue is corrupt.
    pub async fn enqueue(&self, record: &AttendanceRecord) -> Result<()> {
        let mut store = self.store.lock().await;
        let mut records = self.read(&*store)?;
        records.push(record.clone());
        self.write(&mut *store, &records)?;
        info!(code = %record.code, pending = records.len(), "Record queued for later delivery");
        Ok(())
    }

    /// Snapshot of the queued records in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the queue is corrupt.
    pub async fn pending(&self) -> Result<Vec<AttendanceRecord>> {
        let store = self.store.lock().await;
        self.read(&*store)
    }

    /// Number of queued records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the queue is corrupt.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.pending().await?.len())
    }

    /// Check if nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the queue is corrupt.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop every queued record without sending. Returns how many were dropped.
    ///
    /// Waits for any in-flight flush to finish first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn clear(&self) -> Result<usize> {
        let _flushing = self.flush_lock.lock().await;
        let mut store = self.store.lock().await;
        // A corrupt queue can still be cleared.
        let dropped = self.read(&*store).map_or(0, |records| records.len());
        store.remove(&self.key)?;
        warn!(dropped, "Offline queue cleared");
        Ok(dropped)
    }

    /// Try to deliver every queued record once, then clear them.
    ///
    /// Does nothing while `connectivity` reports offline or when `client`
    /// has no endpoint. Under [`FlushPolicy::ClearAll`] failed records are
    /// dropped; under [`FlushPolicy::RetainFailed`] they stay queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written. Send failures
    /// are not errors; they are counted in the report.
    pub async fn flush(
        &self,
        client: &DeliveryClient,
        connectivity: &dyn Connectivity,
    ) -> Result<FlushOutcome> {
        let _flushing = self.flush_lock.lock().await;

        if !connectivity.is_online() {
            debug!("Offline; flush skipped");
            return Ok(FlushOutcome::Offline);
        }
        if !client.is_configured() {
            warn!("No endpoint configured; keeping queued records");
            return Ok(FlushOutcome::NotConfigured);
        }

        let snapshot = self.pending().await?;
        if snapshot.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let mut report = FlushReport {
            attempted: snapshot.len(),
            ..FlushReport::default()
        };
        let mut failed = Vec::new();
        for record in &snapshot {
            match client.send(record).await {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Failed { .. } | DeliveryOutcome::NotConfigured => {
                    failed.push(record.clone());
                }
            }
        }
        report.failed = failed.len();

        let retained = match self.policy {
            FlushPolicy::ClearAll => Vec::new(),
            FlushPolicy::RetainFailed => failed,
        };
        report.retained = retained.len();

        {
            let mut store = self.store.lock().await;
            let current = self.read(&*store)?;
            let appended = current.into_iter().skip(snapshot.len());
            let remaining: Vec<_> = retained.into_iter().chain(appended).collect();
            self.write(&mut *store, &remaining)?;
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            retained = report.retained,
            "Sent {} pending records",
            report.attempted
        );
        if report.lost() > 0 {
            warn!(lost = report.lost(), "Failed records dropped by flush");
        }
        Ok(FlushOutcome::Flushed(report))
    }

    fn read(&self, store: &S) -> Result<Vec<AttendanceRecord>> {
        match store.get(&self.key)? {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(&raw).map_err(|source| Error::QueueCorrupt {
                key: self.key.clone(),
                source,
            }),
        }
    }

    fn write(&self, store: &mut S, records: &[AttendanceRecord]) -> Result<()> {
        if records.is_empty() {
            store.remove(&self.key)
        } else {
            store.set(&self.key, &serde_json::to_string(records)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connectivity::{AlwaysOnline, ConnectivityWatch};
    use crate::delivery::testing::ScriptedTransport;
    use crate::delivery::TransportError;
    use crate::identifier::parse;
    use crate::storage::{MemoryStore, SqliteStore};

    const KEY: &str = "qr_attendance_queue_v1";

    fn record(raw: &str) -> AttendanceRecord {
        AttendanceRecord::build(&parse(raw), Some("entrada"), Some("L1"))
    }

    fn client(transport: &Arc<ScriptedTransport>) -> DeliveryClient {
        DeliveryClient::with_transport(Some("https://x.test/exec".into()), transport.clone())
    }

    fn queue() -> OfflineQueue<MemoryStore> {
        OfflineQueue::new(MemoryStore::new(), KEY)
    }

    #[tokio::test]
    async fn test_enqueue_appends_in_order() {
        let queue = queue();
        queue.enqueue(&record("1")).await.unwrap();
        queue.enqueue(&record("2")).await.unwrap();

        let codes: Vec<_> = queue
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.code)
            .collect();
        assert_eq!(codes, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_persisted_record_keeps_all_fields() {
        let queue = queue();
        let original = record("202367506 Juan Camilo VELASQUEZ CORONADO 1006327468");
        queue.enqueue(&original).await.unwrap();

        let raw = queue.store.lock().await.get(KEY).unwrap().unwrap();
        let persisted: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &persisted[0];
        assert_eq!(entry["codigo"], "202367506");
        assert_eq!(entry["nombre"], "Juan Camilo VELASQUEZ CORONADO");
        assert_eq!(entry["documento"], "1006327468");
        assert_eq!(entry["mode"], "entrada");
        assert_eq!(entry["lab"], "L1");
        assert_eq!(entry["source"], "pwa");
        assert!(entry["client_ts"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_flush_sends_all_in_order_and_clears() {
        let queue = queue();
        for code in ["a", "b", "c", "d"] {
            queue.enqueue(&record(code)).await.unwrap();
        }
        let transport = ScriptedTransport::new();

        let outcome = queue.flush(&client(&transport), &AlwaysOnline).await.unwrap();

        assert_eq!(
            outcome,
            FlushOutcome::Flushed(FlushReport {
                attempted: 4,
                delivered: 4,
                failed: 0,
                retained: 0,
            })
        );
        assert_eq!(transport.sent_codes(), vec!["a", "b", "c", "d"]);
        assert!(queue.is_empty().await.unwrap());
        assert!(queue.store.lock().await.get(KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_offline_is_noop() {
        let queue = queue();
        queue.enqueue(&record("1")).await.unwrap();
        queue.enqueue(&record("2")).await.unwrap();
        let transport = ScriptedTransport::new();

        let outcome = queue
            .flush(&client(&transport), &ConnectivityWatch::new(false))
            .await
            .unwrap();

        assert_eq!(outcome, FlushOutcome::Offline);
        assert_eq!(queue.len().await.unwrap(), 2);
        assert!(transport.sent_codes().is_empty());
    }

    #[tokio::test]
    async fn test_flush_empty_queue() {
        let queue = queue();
        let transport = ScriptedTransport::new();

        let outcome = queue.flush(&client(&transport), &AlwaysOnline).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Empty);
        assert!(transport.sent_codes().is_empty());
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_flush_without_endpoint_keeps_records() {
        let queue = queue();
        queue.enqueue(&record("1")).await.unwrap();
        let transport = ScriptedTransport::new();
        let client = DeliveryClient::with_transport(None, transport.clone());

        let outcome = queue.flush(&client, &AlwaysOnline).await.unwrap();
        assert_eq!(outcome, FlushOutcome::NotConfigured);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_all_drops_failures() {
        let queue = queue();
        for code in ["1", "2", "3"] {
            queue.enqueue(&record(code)).await.unwrap();
        }
        let transport = ScriptedTransport::new();
        transport.push(Ok(()));
        transport.push(Err(TransportError::Timeout));
        transport.push(Ok(()));

        let outcome = queue.flush(&client(&transport), &AlwaysOnline).await.unwrap();
        let FlushOutcome::Flushed(report) = outcome else {
            panic!("expected a flush pass, got {outcome:?}");
        };
        assert_eq!(report.failed, 1);
        assert_eq!(report.lost(), 1);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_retain_failed_keeps_failed_subset() {
        let queue = queue().with_policy(FlushPolicy::RetainFailed);
        for code in ["1", "2", "3"] {
            queue.enqueue(&record(code)).await.unwrap();
        }
        let transport = ScriptedTransport::new();
        transport.push(Err(TransportError::Timeout));
        transport.push(Ok(()));
        transport.push(Err(TransportError::Connect("reset".into())));

        let outcome = queue.flush(&client(&transport), &AlwaysOnline).await.unwrap();
        let FlushOutcome::Flushed(report) = outcome else {
            panic!("expected a flush pass, got {outcome:?}");
        };
        assert_eq!(report.retained, 2);
        assert_eq!(report.lost(), 0);

        let codes: Vec<_> = queue
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.code)
            .collect();
        assert_eq!(codes, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_records_enqueued_during_flush_survive() {
        #[derive(Debug)]
        struct EnqueueDuringSend {
            queue: Arc<OfflineQueue<MemoryStore>>,
            fired: std::sync::atomic::AtomicBool,
        }

        #[async_trait::async_trait]
        impl crate::delivery::Transport for EnqueueDuringSend {
            async fn post(
                &self,
                _url: &str,
                _record: &AttendanceRecord,
            ) -> std::result::Result<(), TransportError> {
                if !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    self.queue.enqueue(&record("late")).await.unwrap();
                }
                Ok(())
            }
        }

        let queue = Arc::new(queue());
        queue.enqueue(&record("early")).await.unwrap();
        let transport = Arc::new(EnqueueDuringSend {
            queue: Arc::clone(&queue),
            fired: std::sync::atomic::AtomicBool::new(false),
        });
        let client = DeliveryClient::with_transport(Some("https://x.test".into()), transport);

        queue.flush(&client, &AlwaysOnline).await.unwrap();

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].code, "late");
    }

    #[tokio::test]
    async fn test_concurrent_flushes_send_once() {
        let queue = Arc::new(queue());
        for code in ["1", "2"] {
            queue.enqueue(&record(code)).await.unwrap();
        }
        let transport = ScriptedTransport::new();
        let client = client(&transport);

        let (a, b) = tokio::join!(
            queue.flush(&client, &AlwaysOnline),
            queue.flush(&client, &AlwaysOnline)
        );

        let outcomes = [a.unwrap(), b.unwrap()];
        assert!(outcomes.contains(&FlushOutcome::Empty));
        assert_eq!(transport.sent_codes(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_clear_returns_count() {
        let queue = queue();
        queue.enqueue(&record("1")).await.unwrap();
        queue.enqueue(&record("2")).await.unwrap();

        assert_eq!(queue.clear().await.unwrap(), 2);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_queue_reported() {
        let mut store = MemoryStore::new();
        store.set(KEY, "{not json").unwrap();
        let queue = OfflineQueue::new(store, KEY);

        let err = queue.pending().await.unwrap_err();
        assert!(matches!(err, Error::QueueCorrupt { .. }));
        assert_eq!(queue.clear().await.unwrap(), 0);
        assert!(queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = OfflineQueue::new(SqliteStore::open(&path).unwrap(), KEY);
            queue.enqueue(&record("1")).await.unwrap();
            queue.enqueue(&record("2")).await.unwrap();
        }

        let queue = OfflineQueue::new(SqliteStore::open(&path).unwrap(), KEY);
        assert_eq!(queue.len().await.unwrap(), 2);

        let transport = ScriptedTransport::new();
        queue.flush(&client(&transport), &AlwaysOnline).await.unwrap();
        assert_eq!(transport.sent_codes(), vec!["1", "2"]);
        assert!(queue.is_empty().await.unwrap());
    }
}
