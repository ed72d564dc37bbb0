//! The conversion record store: which source files were converted, from which
//! content, with what result.
//!
//! ## Lifecycle
//!
//! The store is loaded once at the start of a run ([`ConversionStore::load`];
//! a missing or corrupt document yields an empty store), mutated in memory as
//! files are processed, and written back with [`ConversionStore::persist`]
//! after every record update so progress survives an interrupted batch.
//! Persisting is atomic (temp file + rename in the same directory), so a crash
//! mid-write leaves the previous document intact.
//!
//! ## Document format
//!
//! A single pretty-printed JSON object keyed by canonical file key. Two value
//! shapes are accepted per key, and may be mixed in one document:
//!
//! ```json
//! {
//!   "a.pdf": "3f0a…",
//!   "sub/b.docx": {
//!     "fingerprint": "9c1d…",
//!     "status": "success",
//!     "timestamp": 1760000000000,
//!     "outputPath": "md/sub/b.md",
//!     "intermediate": "placeholder"
//!   }
//! }
//! ```
//!
//! The bare-string form is what older releases wrote (key → fingerprint). It is
//! kept as [`StoredEntry::Legacy`] until the file is next processed, at which
//! point it is rewritten in the structured form.
//!
//! The store is not internally synchronised. Concurrent batches share it
//! behind a single `Mutex` (see [`crate::convert`]); multi-process writers
//! are not supported.

pub mod identity;

pub use identity::{FileIdentity, KeySpace, MatchKind, Resolution};

use crate::error::Doc2MdError;
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

// ── Record types ─────────────────────────────────────────────────────────

/// Outcome of the last conversion attempt for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionStatus {
    /// Conversion completed and the output artifact was written.
    Success,
    /// The collaborator ran but produced no usable output.
    Failed,
    /// A fault occurred during the attempt.
    Error(String),
}

impl ConversionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionStatus::Success)
    }

    fn tag(&self) -> &'static str {
        match self {
            ConversionStatus::Success => "success",
            ConversionStatus::Failed => "failed",
            ConversionStatus::Error(_) => "error",
        }
    }
}

/// State of an intermediate artifact (the PDF rendered from an office file).
///
/// `Placeholder` means "absent, but a later-stage artifact already satisfies
/// the pipeline", so its absence must not trigger reconversion. Older
/// releases expressed this with a zero-byte file; [`ArtifactState::observe`]
/// still recognises those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactState {
    #[default]
    Absent,
    Placeholder,
    Present,
}

impl ArtifactState {
    /// Inspect the file system: missing → `Absent`, zero bytes →
    /// `Placeholder`, anything else → `Present`.
    pub fn observe(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() && meta.len() == 0 => ArtifactState::Placeholder,
            Ok(meta) if meta.is_file() => ArtifactState::Present,
            _ => ArtifactState::Absent,
        }
    }

    pub fn is_present(self) -> bool {
        self == ArtifactState::Present
    }

    fn is_absent(&self) -> bool {
        *self == ArtifactState::Absent
    }
}

/// Everything known about one logical source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRecord {
    /// Content digest at the time of the last attempt. `None` when the file
    /// could not be read; such records always carry an `Error` status.
    pub fingerprint: Option<Fingerprint>,
    pub status: ConversionStatus,
    /// Epoch milliseconds of the last attempt. Diagnostic only.
    pub timestamp_ms: Option<u64>,
    /// Last known location of the final Markdown. Advisory.
    pub output_path: Option<PathBuf>,
    pub intermediate: ArtifactState,
}

impl ConversionRecord {
    /// A record stamped with the current time.
    pub fn new(fingerprint: Option<Fingerprint>, status: ConversionStatus) -> Self {
        Self {
            fingerprint,
            status,
            timestamp_ms: Some(now_ms()),
            output_path: None,
            intermediate: ArtifactState::Absent,
        }
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_intermediate(mut self, state: ArtifactState) -> Self {
        self.intermediate = state;
        self
    }
}

/// A store entry as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEntry {
    /// Pre-status format: the key mapped straight to a fingerprint.
    /// Treated as a successful conversion with unknown output location.
    Legacy(Fingerprint),
    Current(ConversionRecord),
}

impl StoredEntry {
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            StoredEntry::Legacy(fp) => Some(fp),
            StoredEntry::Current(r) => r.fingerprint.as_ref(),
        }
    }

    pub fn status(&self) -> ConversionStatus {
        match self {
            StoredEntry::Legacy(_) => ConversionStatus::Success,
            StoredEntry::Current(r) => r.status.clone(),
        }
    }

    pub fn output_path(&self) -> Option<&Path> {
        match self {
            StoredEntry::Legacy(_) => None,
            StoredEntry::Current(r) => r.output_path.as_deref(),
        }
    }

    pub fn intermediate(&self) -> ArtifactState {
        match self {
            StoredEntry::Legacy(_) => ArtifactState::Absent,
            StoredEntry::Current(r) => r.intermediate,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, StoredEntry::Legacy(_))
    }

    /// Normalise to the structured form.
    pub fn into_record(self) -> ConversionRecord {
        match self {
            StoredEntry::Legacy(fp) => ConversionRecord {
                fingerprint: Some(fp),
                status: ConversionStatus::Success,
                timestamp_ms: None,
                output_path: None,
                intermediate: ArtifactState::Absent,
            },
            StoredEntry::Current(r) => r,
        }
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordOut<'a> {
    fingerprint: Option<&'a str>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_path: Option<&'a Path>,
    #[serde(skip_serializing_if = "ArtifactState::is_absent")]
    intermediate: ArtifactState,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EntryOut<'a> {
    Legacy(&'a str),
    Current(RecordOut<'a>),
}

impl<'a> From<&'a StoredEntry> for EntryOut<'a> {
    fn from(entry: &'a StoredEntry) -> Self {
        match entry {
            StoredEntry::Legacy(fp) => EntryOut::Legacy(fp.as_str()),
            StoredEntry::Current(r) => EntryOut::Current(RecordOut {
                fingerprint: r.fingerprint.as_ref().map(Fingerprint::as_str),
                status: r.status.tag(),
                error: match &r.status {
                    ConversionStatus::Error(msg) => Some(msg.as_str()),
                    _ => None,
                },
                timestamp: r.timestamp_ms,
                output_path: r.output_path.as_deref(),
                intermediate: r.intermediate,
            }),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordIn {
    #[serde(default)]
    fingerprint: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    #[serde(default, alias = "output_path")]
    output_path: Option<PathBuf>,
    #[serde(default)]
    intermediate: ArtifactState,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntryIn {
    Legacy(String),
    Current(RecordIn),
}

impl From<EntryIn> for StoredEntry {
    fn from(entry: EntryIn) -> Self {
        match entry {
            EntryIn::Legacy(fp) => StoredEntry::Legacy(Fingerprint::from_hex(fp)),
            EntryIn::Current(r) => {
                let status = match r.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
                    Some("success") => ConversionStatus::Success,
                    Some("failed") => ConversionStatus::Failed,
                    Some("error") => ConversionStatus::Error(
                        r.error.unwrap_or_else(|| "unknown error".to_string()),
                    ),
                    // Unknown or missing status: force a retry.
                    other => ConversionStatus::Error(format!(
                        "unrecognised status {:?}",
                        other.unwrap_or("<missing>")
                    )),
                };
                // Older writers used float seconds; current writers use integer ms.
                let timestamp_ms = match r.timestamp {
                    Some(serde_json::Value::Number(n)) => n
                        .as_u64()
                        .or_else(|| n.as_f64().map(|secs| (secs * 1000.0) as u64)),
                    _ => None,
                };
                StoredEntry::Current(ConversionRecord {
                    fingerprint: r.fingerprint.filter(|s| !s.is_empty()).map(Fingerprint::from_hex),
                    status,
                    timestamp_ms,
                    output_path: r.output_path,
                    intermediate: r.intermediate,
                })
            }
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────

/// In-memory view of the persisted conversion records.
///
/// Keeps a reverse index from fingerprint to keys so that identity
/// resolution's content fallback does not scan every record.
#[derive(Debug, Default)]
pub struct ConversionStore {
    path: Option<PathBuf>,
    entries: HashMap<String, StoredEntry>,
    by_fingerprint: HashMap<Fingerprint, BTreeSet<String>>,
}

impl ConversionStore {
    /// An empty store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the store document at `path`.
    ///
    /// Never fails: a missing file yields an empty store, and an unreadable or
    /// corrupt document yields an empty store plus a warning (everything gets
    /// reconverted, which is slow but correct). Individual malformed entries
    /// are dropped with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut store = Self {
            path: Some(path.clone()),
            ..Self::default()
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No conversion store at {}, starting empty", path.display());
                return store;
            }
            Err(e) => {
                warn!(
                    "Cannot read conversion store {}: {}; treating as empty",
                    path.display(),
                    e
                );
                return store;
            }
        };

        match parse_document(&text) {
            Ok(entries) => {
                for (key, entry) in entries {
                    store.put(key, entry);
                }
                debug!(
                    "Loaded {} records from {}",
                    store.entries.len(),
                    path.display()
                );
            }
            Err(e) => {
                warn!(
                    "Conversion store {} is corrupt ({}); treating as empty, it will be rewritten",
                    path.display(),
                    e
                );
            }
        }
        store
    }

    /// Parse a store document without binding it to a file.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut store = Self::default();
        for (key, entry) in parse_document(text)? {
            store.put(key, entry);
        }
        Ok(store)
    }

    /// Serialise to the on-disk JSON form, keys sorted.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let sorted: BTreeMap<&str, EntryOut<'_>> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), EntryOut::from(v)))
            .collect();
        serde_json::to_string_pretty(&sorted)
    }

    /// Write the store back to its file. No-op for in-memory stores.
    pub fn persist(&self) -> Result<(), Doc2MdError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let json = self.to_json()?;
        write_atomic(path, json.as_bytes()).map_err(|source| Doc2MdError::StoreWriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&StoredEntry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Keys whose stored fingerprint equals `fp`, in sorted order.
    pub fn keys_with_fingerprint(&self, fp: &Fingerprint) -> impl Iterator<Item = &str> {
        self.by_fingerprint
            .get(fp)
            .into_iter()
            .flat_map(|keys| keys.iter().map(String::as_str))
    }

    /// Insert or replace the record under `key`.
    pub fn insert(&mut self, key: impl Into<String>, record: ConversionRecord) {
        self.put(key.into(), StoredEntry::Current(record));
    }

    /// Remove the entry under `key`, keeping the reverse index in sync.
    pub fn remove(&mut self, key: &str) -> Option<StoredEntry> {
        let entry = self.entries.remove(key)?;
        self.unindex(key, &entry);
        Some(entry)
    }

    /// Update only the intermediate-artifact state of an existing record.
    /// Returns `true` when something changed.
    pub fn set_intermediate(&mut self, key: &str, state: ArtifactState) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        if entry.intermediate() == state {
            return false;
        }
        let mut record = entry.clone().into_record();
        record.intermediate = state;
        *entry = StoredEntry::Current(record);
        true
    }

    /// After the intermediate directory is removed: every `Present`
    /// intermediate becomes `Placeholder`. Returns how many changed.
    pub fn demote_present_intermediates(&mut self) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.intermediate().is_present())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.set_intermediate(key, ArtifactState::Placeholder);
        }
        keys.len()
    }

    fn put(&mut self, key: String, entry: StoredEntry) {
        if let Some(old) = self.entries.remove(&key) {
            self.unindex(&key, &old);
        }
        if let Some(fp) = entry.fingerprint() {
            self.by_fingerprint
                .entry(fp.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(key, entry);
    }

    fn unindex(&mut self, key: &str, entry: &StoredEntry) {
        if let Some(fp) = entry.fingerprint() {
            if let Some(keys) = self.by_fingerprint.get_mut(fp) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_fingerprint.remove(fp);
                }
            }
        }
    }
}

fn parse_document(text: &str) -> Result<Vec<(String, StoredEntry)>, serde_json::Error> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
    let mut out = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        match serde_json::from_value::<EntryIn>(value) {
            Ok(entry) => out.push((key, StoredEntry::from(entry))),
            Err(e) => warn!("Dropping malformed store entry '{}': {}", key, e),
        }
    }
    Ok(out)
}

/// Atomic write: temp file in the target directory, then rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from_hex(s)
    }

    #[test]
    fn legacy_and_current_entries_load_from_one_document() {
        let doc = r#"{
            "source/a.pdf": "aaaa",
            "b.docx": {
                "fingerprint": "bbbb",
                "status": "failed",
                "timestamp": 1700000000000,
                "outputPath": "md/b.md"
            },
            "c.pdf": {"fingerprint": "cccc", "status": "error", "error": "boom"}
        }"#;
        let store = ConversionStore::from_json(doc).unwrap();
        assert_eq!(store.len(), 3);

        let a = store.get("source/a.pdf").unwrap();
        assert!(a.is_legacy());
        assert_eq!(a.status(), ConversionStatus::Success);
        assert_eq!(a.fingerprint(), Some(&fp("aaaa")));

        let b = store.get("b.docx").unwrap();
        assert_eq!(b.status(), ConversionStatus::Failed);
        assert_eq!(b.output_path(), Some(Path::new("md/b.md")));

        let c = store.get("c.pdf").unwrap();
        assert_eq!(c.status(), ConversionStatus::Error("boom".into()));
    }

    #[test]
    fn malformed_entry_is_dropped_not_fatal() {
        let store = ConversionStore::from_json(r#"{"a.pdf": 42, "b.pdf": "bbbb"}"#).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.contains_key("b.pdf"));
    }

    #[test]
    fn float_second_timestamps_are_accepted() {
        let store = ConversionStore::from_json(
            r#"{"a.pdf": {"fingerprint": "aa", "status": "Success", "timestamp": 1700000000.5}}"#,
        )
        .unwrap();
        match store.get("a.pdf").unwrap() {
            StoredEntry::Current(r) => {
                assert_eq!(r.timestamp_ms, Some(1_700_000_000_500));
                assert!(r.status.is_success());
            }
            other => panic!("expected current record, got {other:?}"),
        }
    }

    #[test]
    fn missing_status_forces_retry() {
        let store =
            ConversionStore::from_json(r#"{"a.pdf": {"fingerprint": "aa"}}"#).unwrap();
        assert!(!store.get("a.pdf").unwrap().status().is_success());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.json");
        fs::write(&path, "{ not json").unwrap();
        let store = ConversionStore::load(&path);
        assert!(store.is_empty());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversionStore::load(dir.path().join("absent.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn persist_then_load_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/hashes.json");

        let mut store = ConversionStore::load(&path);
        store.insert(
            "sub/x.pptx",
            ConversionRecord::new(Some(fp("1234")), ConversionStatus::Error("crash".into()))
                .with_output("md/sub/x.md")
                .with_intermediate(ArtifactState::Placeholder),
        );
        store.persist().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"outputPath\""), "got: {text}");
        assert!(text.contains("\"placeholder\""), "got: {text}");

        let again = ConversionStore::load(&path);
        let entry = again.get("sub/x.pptx").unwrap();
        assert_eq!(entry.status(), ConversionStatus::Error("crash".into()));
        assert_eq!(entry.intermediate(), ArtifactState::Placeholder);
        assert_eq!(entry.output_path(), Some(Path::new("md/sub/x.md")));
    }

    #[test]
    fn legacy_entries_are_written_back_unchanged() {
        let store = ConversionStore::from_json(r#"{"a.pdf": "aaaa"}"#).unwrap();
        let json = store.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["a.pdf"], serde_json::json!("aaaa"));
    }

    #[test]
    fn reverse_index_follows_insert_replace_and_remove() {
        let mut store = ConversionStore::in_memory();
        store.insert("a.pdf", ConversionRecord::new(Some(fp("11")), ConversionStatus::Success));
        store.insert("b.pdf", ConversionRecord::new(Some(fp("11")), ConversionStatus::Success));
        assert_eq!(
            store.keys_with_fingerprint(&fp("11")).collect::<Vec<_>>(),
            vec!["a.pdf", "b.pdf"]
        );

        store.insert("a.pdf", ConversionRecord::new(Some(fp("22")), ConversionStatus::Success));
        assert_eq!(
            store.keys_with_fingerprint(&fp("11")).collect::<Vec<_>>(),
            vec!["b.pdf"]
        );

        store.remove("b.pdf");
        assert_eq!(store.keys_with_fingerprint(&fp("11")).count(), 0);
        assert_eq!(store.keys_with_fingerprint(&fp("22")).count(), 1);
    }

    #[test]
    fn set_intermediate_normalises_legacy_entry() {
        let mut store = ConversionStore::from_json(r#"{"a.docx": "aaaa"}"#).unwrap();
        assert!(store.set_intermediate("a.docx", ArtifactState::Placeholder));
        assert!(!store.set_intermediate("a.docx", ArtifactState::Placeholder));
        let entry = store.get("a.docx").unwrap();
        assert!(!entry.is_legacy());
        assert_eq!(entry.fingerprint(), Some(&fp("aaaa")));
    }

    #[test]
    fn artifact_state_observes_zero_byte_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.pdf");
        let full = dir.path().join("full.pdf");
        fs::write(&empty, b"").unwrap();
        fs::write(&full, b"%PDF").unwrap();
        assert_eq!(ArtifactState::observe(&empty), ArtifactState::Placeholder);
        assert_eq!(ArtifactState::observe(&full), ArtifactState::Present);
        assert_eq!(
            ArtifactState::observe(&dir.path().join("none.pdf")),
            ArtifactState::Absent
        );
    }
}
