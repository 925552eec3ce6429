//! Concurrent append and certify behaviour of the audit log.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use rsct_core::{
    content_digest, AuditFilter, AuditLog, CertificationEngine, DerivedMetricCalculator,
    ExportFormat, FeatureSummary, GateInput, GatePipeline, JsonlAuditLog, LexicalExtractor,
    MemoryAuditLog, SimplexDecomposer, TimeWindow,
};
use rsct_types::{CertificateDraft, Decision, GateConfig};

const THREADS: usize = 16;
const PER_THREAD: usize = 10;

fn features(i: usize) -> FeatureSummary {
    let noise = if i % 4 == 0 { 5.0 } else { 0.03 };
    FeatureSummary::from_masses(0.85, 0.12, noise).with_channels(0.9, 0.95, Some(0.89))
}

fn draft(i: usize) -> CertificateDraft {
    let config = GateConfig::default();
    let content = "retrieval abstract";
    let features = features(i);
    let simplex = SimplexDecomposer.decompose(content, &features);
    let metrics = DerivedMetricCalculator::new(&config).compute(&simplex, &features);
    let outcome = GatePipeline::from_config(&config)
        .evaluate(&GateInput::from_metrics(&simplex, &metrics));
    CertificateDraft {
        simplex,
        metrics,
        pattern_flags: Vec::new(),
        outcome,
        content_digest: content_digest(content),
        stage: None,
    }
}

fn hammer(engine: &Arc<CertificationEngine>) {
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = Arc::clone(engine);
            thread::spawn(move || {
                for k in 0..PER_THREAD {
                    let i = t * PER_THREAD + k;
                    engine
                        .certify(&format!("retrieval abstract number {i}"), Some(features(i)))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_appends_memory_log() {
    let engine = Arc::new(CertificationEngine::with_defaults(GateConfig::default()).unwrap());
    hammer(&engine);

    let stats = engine.statistics().unwrap();
    assert_eq!(stats.total_certificates, THREADS * PER_THREAD);
    let rejects = (0..THREADS * PER_THREAD).filter(|i| i % 4 == 0).count();
    assert_eq!(stats.per_decision_counts[&Decision::Reject], rejects);

    let records = engine.audit_log().snapshot().unwrap();
    let ids: HashSet<&str> = records.iter().map(|c| c.id()).collect();
    assert_eq!(ids.len(), records.len());
    for pair in records.windows(2) {
        assert!(pair[0].timestamp() <= pair[1].timestamp());
    }
}

#[test]
fn concurrent_issues_counted_exactly() {
    let log = Arc::new(MemoryAuditLog::new());
    let handles: Vec<_> = (0..128)
        .map(|i| {
            let log = Arc::clone(&log);
            thread::spawn(move || log.issue(draft(i)).unwrap())
        })
        .collect();
    let issued: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ids: HashSet<&str> = issued.iter().map(|c| c.id()).collect();
    assert_eq!(ids.len(), 128);
    assert_eq!(log.statistics(TimeWindow::all()).unwrap().count, 128);

    let records = log.snapshot().unwrap();
    for pair in records.windows(2) {
        assert!(pair[0].timestamp() <= pair[1].timestamp());
    }
}

#[test]
fn shared_log_ids_unique_across_engines() {
    let log: Arc<dyn AuditLog> = Arc::new(MemoryAuditLog::new());
    let engines: Vec<Arc<CertificationEngine>> = (0..2)
        .map(|_| {
            Arc::new(
                CertificationEngine::new(
                    GateConfig::default(),
                    Arc::new(LexicalExtractor::default()),
                    Arc::clone(&log),
                )
                .unwrap(),
            )
        })
        .collect();
    let handles: Vec<_> = engines
        .iter()
        .map(|engine| {
            let engine = Arc::clone(engine);
            thread::spawn(move || hammer(&engine))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let records = log.snapshot().unwrap();
    assert_eq!(records.len(), 2 * THREADS * PER_THREAD);
    let ids: HashSet<&str> = records.iter().map(|c| c.id()).collect();
    assert_eq!(ids.len(), records.len());
}

#[test]
fn restarted_engine_never_reissues_an_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("certificates.jsonl");
    let mut ids = HashSet::new();
    for _ in 0..50 {
        let engine = CertificationEngine::new(
            GateConfig::default(),
            Arc::new(LexicalExtractor::default()),
            Arc::new(JsonlAuditLog::open_or_create(&path).unwrap()),
        )
        .unwrap();
        let cert = engine
            .certify("retrieval abstract", Some(features(1)))
            .unwrap();
        assert!(ids.insert(cert.id().to_string()));
    }
    assert_eq!(JsonlAuditLog::open_or_create(&path).unwrap().len(), 50);
}

#[test]
fn concurrent_appends_jsonl_log_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("certificates.jsonl");
    {
        let log = Arc::new(JsonlAuditLog::open_or_create(&path).unwrap());
        let engine = Arc::new(
            CertificationEngine::new(
                GateConfig::default(),
                Arc::new(LexicalExtractor::default()),
                log,
            )
            .unwrap(),
        );
        hammer(&engine);
        assert_eq!(
            engine.statistics().unwrap().total_certificates,
            THREADS * PER_THREAD
        );
    }

    let reopened = JsonlAuditLog::open_or_create(&path).unwrap();
    assert_eq!(reopened.len(), THREADS * PER_THREAD);
    let lines = std::fs::read_to_string(&path).unwrap().lines().count();
    assert_eq!(lines, THREADS * PER_THREAD);

    let exported = reopened
        .export(ExportFormat::Compliance, &AuditFilter::all().limit(5))
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(v["record_count"], 5);
}

#[test]
fn batch_certification_records_every_item() {
    let engine = CertificationEngine::with_defaults(GateConfig::default()).unwrap();
    let contents: Vec<String> = (0..120)
        .map(|i| format!("abstract {i} on representation compatibility"))
        .collect();
    let results = engine.certify_batch(&contents, 8);
    assert_eq!(results.len(), 120);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(engine.statistics().unwrap().total_certificates, 120);
}
