//! End-to-end consumer tests against in-process stores and sinks

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pricewatch::alerts::AlertSink;
    use pricewatch::codec::ObservationCodec;
    use pricewatch::consumer::{BatchConsumer, ConsumerSettings};
    use pricewatch::detector::DropDetector;
    use pricewatch::errors::{NotificationError, StoreError};
    use pricewatch::history::{CsvHistoryStore, HistoryStore, MemoryHistoryStore};
    use pricewatch::types::{
        AlertOutcome, IngestRecord, ItemError, ItemOutcome, ItemStage, Observation,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    // ============================================================================
    // Fakes
    // ============================================================================

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn publish(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            if self.fail {
                Err(NotificationError::Delivery("topic offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Lookups always fail; counts writes that should never happen
    #[derive(Default)]
    struct UnavailableStore {
        puts: AtomicUsize,
    }

    #[async_trait]
    impl HistoryStore for UnavailableStore {
        async fn find_latest_at_or_before(
            &self,
            _id: &str,
            _cutoff: DateTime<Utc>,
        ) -> Result<Option<Observation>, StoreError> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }

        async fn put(&self, _obs: &Observation) -> Result<(), StoreError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn find_since(
            &self,
            _id: &str,
            _floor: DateTime<Utc>,
        ) -> Result<Vec<Observation>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Lookups never complete
    struct StalledStore;

    #[async_trait]
    impl HistoryStore for StalledStore {
        async fn find_latest_at_or_before(
            &self,
            _id: &str,
            _cutoff: DateTime<Utc>,
        ) -> Result<Option<Observation>, StoreError> {
            std::future::pending().await
        }

        async fn put(&self, _obs: &Observation) -> Result<(), StoreError> {
            Ok(())
        }

        async fn find_since(
            &self,
            _id: &str,
            _floor: DateTime<Utc>,
        ) -> Result<Vec<Observation>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Deliveries never complete
    struct StalledSink;

    #[async_trait]
    impl AlertSink for StalledSink {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn publish(&self, _subject: &str, _body: &str) -> Result<(), NotificationError> {
            std::future::pending().await
        }
    }

    // ============================================================================
    // Helpers
    // ============================================================================

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn obs(hours_ago: i64, price: Decimal) -> Observation {
        Observation::new(
            "bitcoin",
            now() - Duration::hours(hours_ago),
            price,
            "Coinbase",
        )
    }

    fn record(obs: &Observation) -> IngestRecord {
        IngestRecord::new(ObservationCodec::new("Coinbase").encode_record(obs).unwrap())
    }

    fn raw_record(json: &str) -> IngestRecord {
        use base64::Engine;
        IngestRecord::new(base64::engine::general_purpose::STANDARD.encode(json))
    }

    fn consumer(store: Arc<dyn HistoryStore>, sink: Arc<dyn AlertSink>) -> BatchConsumer {
        BatchConsumer::new(
            ObservationCodec::new("Coinbase"),
            DropDetector::new(dec!(5.0), Duration::hours(10)).unwrap(),
            store,
            sink,
            ConsumerSettings::default(),
        )
    }

    fn consumer_with_deadline(
        store: Arc<dyn HistoryStore>,
        sink: Arc<dyn AlertSink>,
        deadline: std::time::Duration,
    ) -> BatchConsumer {
        BatchConsumer::new(
            ObservationCodec::new("Coinbase"),
            DropDetector::new(dec!(5.0), Duration::hours(10)).unwrap(),
            store,
            sink,
            ConsumerSettings {
                max_concurrency: 4,
                batch_timeout: deadline,
            },
        )
    }

    // ============================================================================
    // Scenarios
    // ============================================================================

    #[tokio::test]
    async fn test_first_observation_is_committed_without_alert() {
        let store = Arc::new(MemoryHistoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store.clone(), sink.clone());

        let summary = consumer.process_batch(&[record(&obs(0, dec!(50000)))]).await;

        assert_eq!(summary.committed, 1);
        assert_eq!(summary.alerts_published, 0);
        assert!(sink.sent().is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_six_percent_drop_publishes_crash_alert() {
        let store = Arc::new(MemoryHistoryStore::from_observations([obs(11, dec!(50000))]));
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store.clone(), sink.clone());

        let summary = consumer.process_batch(&[record(&obs(0, dec!(47000)))]).await;

        assert_eq!(summary.committed, 1);
        assert_eq!(summary.alerts_published, 1);
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("CRASH ALERT"));
        assert!(sent[0].0.contains("-6.00%"));
        assert!(sent[0].1.contains("current=47000 old=50000 drop=6.00%"));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_small_drop_is_committed_silently() {
        let store = Arc::new(MemoryHistoryStore::from_observations([obs(11, dec!(50000))]));
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store.clone(), sink.clone());

        let outcomes = consumer
            .process_batch_detailed(&[record(&obs(0, dec!(49000)))])
            .await;

        match &outcomes[0] {
            ItemOutcome::Committed { evaluation, alert, .. } => {
                assert_eq!(evaluation.percent_drop, Some(dec!(2)));
                assert!(!evaluation.should_alert);
                assert_eq!(*alert, AlertOutcome::NotTriggered);
            }
            other => panic!("expected commit, got {:?}", other),
        }
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reference_inside_window_is_not_used() {
        // Only a 2h-old observation exists; it is newer than the 10h cutoff
        let store = Arc::new(MemoryHistoryStore::from_observations([obs(2, dec!(60000))]));
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store, sink.clone());

        let summary = consumer.process_batch(&[record(&obs(0, dec!(40000)))]).await;

        assert_eq!(summary.committed, 1);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_item_does_not_poison_batch() {
        let store = Arc::new(MemoryHistoryStore::from_observations([obs(11, dec!(50000))]));
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store.clone(), sink.clone());

        let batch = vec![
            record(&obs(1, dec!(49500))),
            raw_record(r#"{"id":"bitcoin","price":"abc","timestamp":"2024-03-10T12:00:00"}"#),
            record(&obs(0, dec!(47000))),
        ];
        let outcomes = consumer.process_batch_detailed(&batch).await;

        assert!(outcomes[0].is_committed());
        assert!(matches!(
            outcomes[1],
            ItemOutcome::Skipped {
                stage: ItemStage::Decode,
                ..
            }
        ));
        assert!(outcomes[2].is_committed());
        assert_eq!(store.len().await, 3);
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_skips_without_write_or_alert() {
        let store = Arc::new(UnavailableStore::default());
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store.clone(), sink.clone());

        let summary = consumer.process_batch(&[record(&obs(0, dec!(47000)))]).await;

        assert_eq!(summary.committed, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_alert_still_commits_observation() {
        let store = Arc::new(MemoryHistoryStore::from_observations([obs(11, dec!(50000))]));
        let sink = Arc::new(RecordingSink::failing());
        let consumer = consumer(store.clone(), sink.clone());

        let summary = consumer.process_batch(&[record(&obs(0, dec!(47000)))]).await;

        assert_eq!(summary.committed, 1);
        assert_eq!(summary.alerts_published, 0);
        assert_eq!(summary.alert_failures, 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_redelivered_record_is_idempotent() {
        let store = Arc::new(MemoryHistoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store.clone(), sink);

        let rec = record(&obs(0, dec!(50000)));
        consumer.process_batch(&[rec.clone()]).await;
        consumer.process_batch(&[rec]).await;

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_event_envelope_through_csv_store() {
        let dir = std::env::temp_dir().join(format!("pricewatch-it-{}", uuid::Uuid::new_v4()));
        let data_dir = dir.to_string_lossy().to_string();

        {
            let store = Arc::new(CsvHistoryStore::open(&data_dir, "crypto-prices").unwrap());
            store.put(&obs(11, dec!(50000))).await.unwrap();
        }

        let store = Arc::new(CsvHistoryStore::open(&data_dir, "crypto-prices").unwrap());
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store.clone(), sink.clone());

        let event = serde_json::json!({
            "Records": [
                { "kinesis": { "data": record(&obs(0, dec!(47000))).data } },
                { "kinesis": { "data": "!!not-base64!!" } }
            ]
        });
        let summary = consumer
            .process_event(event.to_string().as_bytes())
            .await
            .unwrap();

        assert_eq!(summary.committed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.alerts_published, 1);

        let history = store
            .find_since("bitcoin", now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].price, dec!(47000));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_stalled_lookup_is_skipped_at_batch_deadline() {
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer_with_deadline(
            Arc::new(StalledStore),
            sink.clone(),
            std::time::Duration::from_millis(100),
        );

        let started = tokio::time::Instant::now();
        let outcomes = consumer
            .process_batch_detailed(&[record(&obs(1, dec!(49000))), record(&obs(0, dec!(47000)))])
            .await;

        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            match outcome {
                ItemOutcome::Skipped { stage, error, alert } => {
                    assert_eq!(*stage, ItemStage::Lookup);
                    assert!(matches!(error, ItemError::Store(StoreError::Unavailable(_))));
                    assert_eq!(*alert, AlertOutcome::NotTriggered);
                }
                other => panic!("expected skip, got {:?}", other),
            }
        }
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_alert_times_out_at_batch_deadline() {
        let store = Arc::new(MemoryHistoryStore::from_observations([obs(11, dec!(50000))]));
        let consumer = consumer_with_deadline(
            store,
            Arc::new(StalledSink),
            std::time::Duration::from_millis(100),
        );

        let started = tokio::time::Instant::now();
        let outcomes = consumer
            .process_batch_detailed(&[record(&obs(0, dec!(47000)))])
            .await;

        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(
            *outcomes[0].alert(),
            AlertOutcome::Failed(NotificationError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_overflowing_rise_does_not_break_batch() {
        let dust = Observation::new(
            "dust",
            now() - Duration::hours(11),
            dec!(0.0000000000000001),
            "Coinbase",
        );
        let store = Arc::new(MemoryHistoryStore::from_observations([dust, obs(11, dec!(50000))]));
        let sink = Arc::new(RecordingSink::default());
        let consumer = consumer(store.clone(), sink.clone());

        let summary = consumer
            .process_batch(&[
                raw_record(
                    r#"{"id":"dust","price":"1000000000000000","timestamp":"2024-03-10T12:00:00"}"#,
                ),
                record(&obs(0, dec!(50000))),
            ])
            .await;

        assert_eq!(summary.committed, 2);
        assert_eq!(summary.skipped, 0);
        assert!(sink.sent().is_empty());
        assert_eq!(store.len().await, 4);
    }

    #[tokio::test]
    async fn test_window_past_earliest_time_means_no_reference() {
        let store = Arc::new(UnavailableStore::default());
        let sink = Arc::new(RecordingSink::default());
        let consumer = BatchConsumer::new(
            ObservationCodec::new("Coinbase"),
            DropDetector::new(dec!(5.0), Duration::days(200_000_000)).unwrap(),
            store.clone(),
            sink.clone(),
            ConsumerSettings::default(),
        );

        let summary = consumer.process_batch(&[record(&obs(0, dec!(47000)))]).await;

        // The failing lookup is never reached
        assert_eq!(summary.committed, 1);
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_envelope_is_rejected() {
        let store = Arc::new(MemoryHistoryStore::new());
        let consumer = consumer(store, Arc::new(RecordingSink::default()));

        assert!(consumer.process_event(b"not json").await.is_err());
    }
}
