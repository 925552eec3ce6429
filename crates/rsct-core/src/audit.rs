// ─────────────────────────────────────────────────────────────────────
// Swarm-It — Certificate Audit Log
// ─────────────────────────────────────────────────────────────────────
//! Append-only record of every issued certificate.
//!
//! Two backends:
//! - `MemoryAuditLog`: process-local, for tests and short-lived engines.
//! - `JsonlAuditLog`: one JSON document per line, synced to disk before
//!   `append` returns. Reopening replays the file. A failed append is
//!   rolled back so it never resurfaces on replay.
//!
//! Neither exposes update or delete. Readers always see whole records:
//! a certificate becomes visible only after its append completed.
//! `issue` seals drafts inside the log's own critical section, which is
//! what keeps ids unique and timestamps ordered per log.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};

use rsct_types::{Certificate, CertificateDraft, Decision, GateError, GateResult, Provenance};

/// Position of a record in its log, starting at 0.
pub type RecordId = u64;

/// Version tag carried by compliance exports.
pub const COMPLIANCE_SCHEMA: &str = "rsct-compliance/1";

// ─── Filters ────────────────────────────────────────────────────────

/// Record selection for `query` and `export`. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    /// Inclusive lower bound on timestamp (unix ms).
    pub since: Option<u64>,
    /// Inclusive upper bound on timestamp (unix ms).
    pub until: Option<u64>,
    pub decision: Option<Decision>,
    pub id: Option<String>,
    pub stage: Option<String>,
    /// Keep at most this many matches, oldest first.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, cert: &Certificate) -> bool {
        self.since.map_or(true, |t| cert.timestamp() >= t)
            && self.until.map_or(true, |t| cert.timestamp() <= t)
            && self.decision.map_or(true, |d| cert.decision() == d)
            && self.id.as_deref().map_or(true, |id| cert.id() == id)
            && self.stage.as_deref().map_or(true, |s| cert.stage() == Some(s))
    }

    /// Matching records in log order, truncated to `limit`.
    pub fn apply(&self, records: &[Certificate]) -> Vec<Certificate> {
        records
            .iter()
            .filter(|c| self.matches(c))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Time range for statistics. Bounds are inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: Option<u64>,
    pub until: Option<u64>,
}

impl TimeWindow {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(since: u64, until: u64) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
        }
    }

    fn filter(&self) -> AuditFilter {
        AuditFilter {
            since: self.since,
            until: self.until,
            ..AuditFilter::default()
        }
    }
}

/// Counts over a window of the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogStatistics {
    pub count: usize,
    /// Every decision appears, zero counts included.
    pub per_decision: BTreeMap<Decision, usize>,
}

impl LogStatistics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Certificate>) -> Self {
        let mut per_decision: BTreeMap<Decision, usize> =
            Decision::ALL.into_iter().map(|d| (d, 0)).collect();
        let mut count = 0;
        for cert in records {
            count += 1;
            *per_decision.entry(cert.decision()).or_insert(0) += 1;
        }
        Self {
            count,
            per_decision,
        }
    }

    pub fn count_of(&self, decision: Decision) -> usize {
        self.per_decision.get(&decision).copied().unwrap_or(0)
    }
}

// ─── Export ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSON array of identity, decision and reason per record.
    Plain,
    /// Versioned document with the full metric tuple and provenance.
    Compliance,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Plain => "plain",
            ExportFormat::Compliance => "compliance",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(ExportFormat::Plain),
            "compliance" => Ok(ExportFormat::Compliance),
            other => Err(GateError::Validation(format!("unknown export format: {other}"))),
        }
    }
}

#[derive(Serialize)]
struct PlainRecord<'a> {
    id: &'a str,
    timestamp: u64,
    stage: Option<&'a str>,
    decision: Decision,
    gate_reached: u8,
    reason: &'a str,
    pattern_flags: &'a [String],
}

#[derive(Serialize)]
struct EstimatedFields {
    omega: Provenance,
    sigma: Provenance,
    consensus: Provenance,
    kappa_h: Provenance,
    kappa_l: Provenance,
    kappa_interface: Provenance,
}

#[derive(Serialize)]
struct ComplianceRecord<'a> {
    id: &'a str,
    timestamp: u64,
    stage: Option<&'a str>,
    content_digest: &'a str,
    decision: Decision,
    gate_reached: u8,
    reason: &'a str,
    pattern_flags: &'a [String],
    r: f64,
    s: f64,
    n: f64,
    alpha: f64,
    omega: f64,
    alpha_omega: f64,
    tau: f64,
    kappa_h: f64,
    kappa_l: f64,
    kappa_interface: f64,
    kappa_gate: f64,
    kappa_req: f64,
    sigma: f64,
    consensus: f64,
    provenance: EstimatedFields,
}

#[derive(Serialize)]
struct ComplianceDocument<'a> {
    schema: &'static str,
    record_count: usize,
    records: Vec<ComplianceRecord<'a>>,
}

/// Serialize records in the requested format.
pub fn export_records(records: &[Certificate], format: ExportFormat) -> GateResult<String> {
    let result = match format {
        ExportFormat::Plain => {
            let rows: Vec<PlainRecord<'_>> = records
                .iter()
                .map(|c| PlainRecord {
                    id: c.id(),
                    timestamp: c.timestamp(),
                    stage: c.stage(),
                    decision: c.decision(),
                    gate_reached: c.gate_reached().index(),
                    reason: c.reason(),
                    pattern_flags: c.pattern_flags(),
                })
                .collect();
            serde_json::to_string_pretty(&rows)
        }
        ExportFormat::Compliance => {
            let doc = ComplianceDocument {
                schema: COMPLIANCE_SCHEMA,
                record_count: records.len(),
                records: records.iter().map(compliance_record).collect(),
            };
            serde_json::to_string_pretty(&doc)
        }
    };
    result.map_err(|e| GateError::Export(format!("{format} export failed: {e}")))
}

fn compliance_record(c: &Certificate) -> ComplianceRecord<'_> {
    ComplianceRecord {
        id: c.id(),
        timestamp: c.timestamp(),
        stage: c.stage(),
        content_digest: c.content_digest(),
        decision: c.decision(),
        gate_reached: c.gate_reached().index(),
        reason: c.reason(),
        pattern_flags: c.pattern_flags(),
        r: c.r(),
        s: c.s(),
        n: c.n(),
        alpha: c.alpha(),
        omega: c.omega().value,
        alpha_omega: c.alpha_omega(),
        tau: c.tau(),
        kappa_h: c.kappa_h().value,
        kappa_l: c.kappa_l().value,
        kappa_interface: c.kappa_interface().value,
        kappa_gate: c.kappa_gate(),
        kappa_req: c.kappa_req(),
        sigma: c.sigma().value,
        consensus: c.consensus().value,
        provenance: EstimatedFields {
            omega: c.omega().provenance,
            sigma: c.sigma().provenance,
            consensus: c.consensus().provenance,
            kappa_h: c.kappa_h().provenance,
            kappa_l: c.kappa_l().provenance,
            kappa_interface: c.kappa_interface().provenance,
        },
    }
}

// ─── Trait ──────────────────────────────────────────────────────────

/// Append-only certificate store.
///
/// Implementations must be safe for concurrent appends and must never
/// expose a partially written record. Ids are unique and timestamps
/// non-decreasing per log, however many engines share it.
pub trait AuditLog: Send + Sync {
    /// Seal a draft and durably record it in one step. The log assigns
    /// the timestamp and id, so ordering holds across every writer.
    fn issue(&self, draft: CertificateDraft) -> GateResult<Certificate>;

    /// Durably record an already-sealed certificate. Refuses a duplicate
    /// id or a timestamp older than the newest record.
    fn append(&self, cert: &Certificate) -> GateResult<RecordId>;

    /// Consistent copy of every record, in log order.
    fn snapshot(&self) -> GateResult<Vec<Certificate>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp of the newest record.
    fn last_timestamp(&self) -> GateResult<Option<u64>> {
        Ok(self.snapshot()?.last().map(Certificate::timestamp))
    }

    fn query(&self, filter: &AuditFilter) -> GateResult<Vec<Certificate>> {
        Ok(filter.apply(&self.snapshot()?))
    }

    fn statistics(&self, window: TimeWindow) -> GateResult<LogStatistics> {
        let filter = window.filter();
        let records = self.snapshot()?;
        Ok(LogStatistics::from_records(
            records.iter().filter(|c| filter.matches(c)),
        ))
    }

    fn export(&self, format: ExportFormat, filter: &AuditFilter) -> GateResult<String> {
        export_records(&self.query(filter)?, format)
    }
}

/// Certificate id: truncated SHA-256 over content digest, timestamp and
/// log position. The position makes it unique within one log.
pub fn certificate_id(digest: &str, timestamp: u64, position: RecordId) -> String {
    let mut h = Sha256::new();
    h.update(digest.as_bytes());
    h.update(timestamp.to_be_bytes());
    h.update(position.to_be_bytes());
    let mut id = hex::encode(h.finalize());
    id.truncate(32);
    id
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Records plus the identity index shared by both backends.
#[derive(Default)]
struct LogState {
    records: Vec<Certificate>,
    ids: HashSet<String>,
    last_timestamp: Option<u64>,
}

impl LogState {
    fn from_records(records: Vec<Certificate>) -> GateResult<Self> {
        let mut state = Self::default();
        for cert in records {
            if state.ids.contains(cert.id()) {
                return Err(GateError::Audit(format!(
                    "duplicate certificate id {} in log",
                    cert.id()
                )));
            }
            state.push(cert);
        }
        Ok(state)
    }

    fn check(&self, cert: &Certificate) -> GateResult<()> {
        if self.ids.contains(cert.id()) {
            return Err(GateError::Audit(format!(
                "certificate {} already recorded",
                cert.id()
            )));
        }
        if let Some(last) = self.last_timestamp {
            if cert.timestamp() < last {
                return Err(GateError::Audit(format!(
                    "certificate {} at {} predates newest record at {last}",
                    cert.id(),
                    cert.timestamp()
                )));
            }
        }
        Ok(())
    }

    fn seal_next(&self, draft: CertificateDraft) -> Certificate {
        let timestamp = unix_ms().max(self.last_timestamp.unwrap_or(0));
        let position = self.records.len() as RecordId;
        let id = certificate_id(&draft.content_digest, timestamp, position);
        draft.seal(id, timestamp)
    }

    fn push(&mut self, cert: Certificate) -> RecordId {
        let ts = cert.timestamp();
        self.last_timestamp = Some(self.last_timestamp.map_or(ts, |last| last.max(ts)));
        self.ids.insert(cert.id().to_string());
        self.records.push(cert);
        (self.records.len() - 1) as RecordId
    }
}

// ─── In-memory backend ──────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryAuditLog {
    state: RwLock<LogState>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn issue(&self, draft: CertificateDraft) -> GateResult<Certificate> {
        let mut state = self.state.write();
        let cert = state.seal_next(draft);
        state.check(&cert)?;
        state.push(cert.clone());
        Ok(cert)
    }

    fn append(&self, cert: &Certificate) -> GateResult<RecordId> {
        let mut state = self.state.write();
        state.check(cert)?;
        Ok(state.push(cert.clone()))
    }

    fn snapshot(&self) -> GateResult<Vec<Certificate>> {
        Ok(self.state.read().records.clone())
    }

    fn len(&self) -> usize {
        self.state.read().records.len()
    }

    fn last_timestamp(&self) -> GateResult<Option<u64>> {
        Ok(self.state.read().last_timestamp)
    }

    fn query(&self, filter: &AuditFilter) -> GateResult<Vec<Certificate>> {
        Ok(filter.apply(&self.state.read().records))
    }

    fn statistics(&self, window: TimeWindow) -> GateResult<LogStatistics> {
        let filter = window.filter();
        let state = self.state.read();
        Ok(LogStatistics::from_records(
            state.records.iter().filter(|c| filter.matches(c)),
        ))
    }
}

// ─── JSON-lines backend ─────────────────────────────────────────────

/// Durable byte sink behind `JsonlAuditLog`.
trait LogSink: Send {
    /// Current length in bytes.
    fn end(&mut self) -> io::Result<u64>;

    /// Write everything and sync it to disk.
    fn write_durable(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Cut the sink back to `len` bytes and sync.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn end(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn write_durable(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()?;
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_data()
    }
}

/// File-backed log, one serialized certificate per line.
pub struct JsonlAuditLog {
    path: PathBuf,
    sink: Mutex<Box<dyn LogSink>>,
    state: RwLock<LogState>,
}

impl JsonlAuditLog {
    /// Open an existing log or create an empty one, replaying any records.
    ///
    /// Every newline-terminated line must parse; one that does not is
    /// corruption and fails the open. An unterminated tail is an append
    /// that may not have completed: if it parses it is kept and
    /// terminated, otherwise it is truncated away with a warning.
    pub fn open_or_create(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref().to_path_buf();
        let audit_err = |what: &str, e: &dyn fmt::Display| {
            GateError::Audit(format!("{what} {}: {e}", path.display()))
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| audit_err("cannot open", &e))?;
        let bytes = std::fs::read(&path).map_err(|e| audit_err("cannot read", &e))?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut line_no = 0usize;
        while offset < bytes.len() {
            line_no += 1;
            let rest = &bytes[offset..];
            let Some(end) = rest.iter().position(|&b| b == b'\n') else {
                if rest.iter().all(u8::is_ascii_whitespace) {
                    file.truncate(offset as u64)
                        .map_err(|e| audit_err("cannot truncate", &e))?;
                } else {
                    match serde_json::from_slice::<Certificate>(rest) {
                        Ok(cert) => {
                            log::warn!(
                                "audit log {}: terminating final record {}",
                                path.display(),
                                cert.id()
                            );
                            file.write_durable(b"\n")
                                .map_err(|e| audit_err("cannot terminate", &e))?;
                            records.push(cert);
                        }
                        Err(e) => {
                            log::warn!(
                                "audit log {}: dropping torn final record ({e})",
                                path.display()
                            );
                            file.truncate(offset as u64)
                                .map_err(|e| audit_err("cannot truncate", &e))?;
                        }
                    }
                }
                break;
            };
            let line = &rest[..end];
            if !line.iter().all(u8::is_ascii_whitespace) {
                let cert = serde_json::from_slice::<Certificate>(line).map_err(|e| {
                    GateError::Audit(format!(
                        "corrupt record at line {line_no} of {}: {e}",
                        path.display()
                    ))
                })?;
                records.push(cert);
            }
            offset += end + 1;
        }
        let state = LogState::from_records(records)?;
        log::info!(
            "audit log {} opened with {} records",
            path.display(),
            state.records.len()
        );

        Ok(Self {
            path,
            sink: Mutex::new(Box::new(file)),
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one record line. On failure the sink is cut back to its
    /// previous length, so nothing of the record survives.
    fn persist(&self, sink: &mut dyn LogSink, cert: &Certificate) -> GateResult<()> {
        let mut line = serde_json::to_vec(cert)
            .map_err(|e| GateError::Audit(format!("cannot serialize certificate: {e}")))?;
        line.push(b'\n');

        let start = sink.end().map_err(|e| {
            GateError::Audit(format!("cannot stat {}: {e}", self.path.display()))
        })?;
        if let Err(e) = sink.write_durable(&line) {
            log::error!("audit append to {} failed: {e}", self.path.display());
            if let Err(undo) = sink.truncate(start) {
                log::error!(
                    "audit log {}: cannot roll back failed append: {undo}",
                    self.path.display()
                );
            }
            return Err(GateError::Audit(format!(
                "append to {} failed: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl AuditLog for JsonlAuditLog {
    fn issue(&self, draft: CertificateDraft) -> GateResult<Certificate> {
        // Every writer holds the sink lock, so state cannot move under us.
        let mut sink = self.sink.lock();
        let cert = {
            let state = self.state.read();
            let cert = state.seal_next(draft);
            state.check(&cert)?;
            cert
        };
        self.persist(&mut **sink, &cert)?;
        self.state.write().push(cert.clone());
        Ok(cert)
    }

    fn append(&self, cert: &Certificate) -> GateResult<RecordId> {
        let mut sink = self.sink.lock();
        self.state.read().check(cert)?;
        self.persist(&mut **sink, cert)?;
        Ok(self.state.write().push(cert.clone()))
    }

    fn snapshot(&self) -> GateResult<Vec<Certificate>> {
        Ok(self.state.read().records.clone())
    }

    fn len(&self) -> usize {
        self.state.read().records.len()
    }

    fn last_timestamp(&self) -> GateResult<Option<u64>> {
        Ok(self.state.read().last_timestamp)
    }

    fn query(&self, filter: &AuditFilter) -> GateResult<Vec<Certificate>> {
        Ok(filter.apply(&self.state.read().records))
    }
}
