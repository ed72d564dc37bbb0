//! Identity resolution: which store key (if any) describes a given file.
//!
//! Older releases keyed records inconsistently: sometimes by the path as typed,
//! sometimes by absolute path, sometimes by bare file name, with platform
//! separators. A [`KeySpace`] derives one **canonical key** per file (relative
//! to the source root, forward slashes) and knows every alternate form the
//! same file may have been stored under.
//!
//! Lookup order, first match wins:
//!
//! 1. the canonical key;
//! 2. an alias form of the same path;
//! 3. any key with the same content fingerprint (the file was moved or
//!    renamed), tried in sorted key order.
//!
//! Writing a record under the canonical key prunes every other key that refers
//! to the same file, so exactly one authoritative key survives.

use super::{ConversionRecord, ConversionStore, StoredEntry};
use crate::fingerprint::Fingerprint;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Which lookup rule produced a [`Resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Canonical,
    Alias,
    Fingerprint,
}

/// A store entry found for a candidate file.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The key the entry is stored under.
    pub key: String,
    pub kind: MatchKind,
    pub entry: StoredEntry,
    /// For fingerprint matches: the matched key still names an existing file
    /// other than the candidate (a copy rather than a move).
    pub origin_exists: bool,
}

impl Resolution {
    /// The entry lives under some key other than the canonical one.
    pub fn needs_migration(&self) -> bool {
        self.kind != MatchKind::Canonical
    }

    /// A fingerprint match whose original file is gone.
    pub fn is_move(&self) -> bool {
        self.kind == MatchKind::Fingerprint && !self.origin_exists
    }
}

/// A candidate file, located every way the store might know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    /// The path as discovered or given.
    pub path: PathBuf,
    /// Absolute path, symlinks resolved when the file exists.
    pub abs: PathBuf,
    /// Absolute path by lexical cleanup only.
    pub lexical: PathBuf,
    /// Canonical store key.
    pub key: String,
}

/// Key derivation for one source root.
#[derive(Debug, Clone)]
pub struct KeySpace {
    root: Option<PathBuf>,
    root_abs: Option<PathBuf>,
    root_lexical: Option<PathBuf>,
    cwd: PathBuf,
}

impl KeySpace {
    /// Key space for files under `root`. `None` means keys are the paths as
    /// given (single-file mode outside any root).
    pub fn new(root: Option<&Path>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let root_lexical = root.map(|r| lexical_abs(&cwd, r));
        let root_abs = root.map(|r| {
            fs::canonicalize(r).unwrap_or_else(|_| lexical_abs(&cwd, r))
        });
        Self {
            root: root.map(Path::to_path_buf),
            root_abs,
            root_lexical,
            cwd,
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Locate `path` and derive its canonical key.
    pub fn identify(&self, path: &Path) -> FileIdentity {
        let lexical = lexical_abs(&self.cwd, path);
        let abs = fs::canonicalize(path).unwrap_or_else(|_| lexical.clone());

        let relative = self
            .root_abs
            .as_deref()
            .and_then(|root| abs.strip_prefix(root).ok())
            .or_else(|| {
                self.root_lexical
                    .as_deref()
                    .and_then(|root| lexical.strip_prefix(root).ok())
            });

        let key = match relative {
            Some(rel) if !rel.as_os_str().is_empty() => normalize_key(rel),
            _ => normalize_key(path),
        };

        FileIdentity {
            path: path.to_path_buf(),
            abs,
            lexical,
            key,
        }
    }

    /// Every alternate key form `id` may have been stored under, excluding
    /// the canonical key. Order is stable.
    pub fn alias_keys(&self, id: &FileIdentity) -> Vec<String> {
        let mut forms: Vec<String> = vec![
            id.abs.to_string_lossy().into_owned(),
            normalize_key(&id.abs),
            id.lexical.to_string_lossy().into_owned(),
            normalize_key(&id.lexical),
            id.path.to_string_lossy().into_owned(),
            normalize_key(&id.path),
        ];
        if let Some(root) = self.root.as_deref() {
            let joined = root.join(&id.key);
            forms.push(joined.to_string_lossy().into_owned());
            forms.push(normalize_key(&joined));
        }
        if let Some(name) = id.path.file_name() {
            forms.push(name.to_string_lossy().into_owned());
        }

        // Keys written on Windows carry backslashes.
        let backslashed: Vec<String> = forms.iter().map(|f| f.replace('/', "\\")).collect();
        forms.extend(backslashed);

        let mut seen = BTreeSet::new();
        forms
            .into_iter()
            .filter(|f| !f.is_empty() && *f != id.key && seen.insert(f.clone()))
            .collect()
    }

    /// Absolute paths a stored key could denote.
    fn locations(&self, key: &str) -> Vec<PathBuf> {
        let path = PathBuf::from(key.replace('\\', "/"));
        if path.is_absolute() {
            return vec![lexical_abs(&self.cwd, &path)];
        }
        let mut out = Vec::with_capacity(2);
        if let Some(root) = self.root_lexical.as_deref() {
            out.push(lexical_abs(root, &path));
        }
        if let Some(root) = self.root_abs.as_deref() {
            out.push(lexical_abs(root, &path));
        }
        out.push(lexical_abs(&self.cwd, &path));
        out
    }

    /// `key` lexically resolves to `id`'s absolute path.
    pub fn refers_to(&self, key: &str, id: &FileIdentity) -> bool {
        self.locations(key)
            .iter()
            .any(|loc| *loc == id.abs || *loc == id.lexical)
    }

    /// Some location `key` could denote is an existing file.
    pub fn source_exists(&self, key: &str) -> bool {
        self.locations(key).iter().any(|loc| loc.is_file())
    }

    /// `key` names an existing file that is not `id`.
    fn belongs_to_other(&self, key: &str, id: &FileIdentity) -> bool {
        self.locations(key).iter().any(|loc| {
            loc.is_file()
                && *loc != id.lexical
                && *loc != id.abs
                && fs::canonicalize(loc).map(|c| c != id.abs).unwrap_or(true)
        })
    }
}

// ── Store integration ────────────────────────────────────────────────────

impl ConversionStore {
    /// Find the entry describing `id`, if any.
    ///
    /// `fingerprint` enables the content fallback; pass `None` when the file
    /// could not be hashed.
    pub fn resolve(
        &self,
        space: &KeySpace,
        id: &FileIdentity,
        fingerprint: Option<&Fingerprint>,
    ) -> Option<Resolution> {
        if let Some(entry) = self.get(&id.key) {
            return Some(Resolution {
                key: id.key.clone(),
                kind: MatchKind::Canonical,
                entry: entry.clone(),
                origin_exists: false,
            });
        }

        for alias in space.alias_keys(id) {
            if let Some(entry) = self.get(&alias) {
                // A bare name like "report.pdf" may belong to a different file
                // at the root rather than to sub/report.pdf.
                if space.belongs_to_other(&alias, id) {
                    continue;
                }
                debug!("{}: matched alias key '{}'", id.key, alias);
                return Some(Resolution {
                    key: alias,
                    kind: MatchKind::Alias,
                    entry: entry.clone(),
                    origin_exists: false,
                });
            }
        }

        let fp = fingerprint?;
        let candidates: Vec<&str> = self
            .keys_with_fingerprint(fp)
            .filter(|k| *k != id.key)
            .collect();
        // Prefer a key whose file is gone: that is the move we are looking for.
        let chosen = candidates
            .iter()
            .find(|k| !space.source_exists(k))
            .or_else(|| candidates.first())?;
        let entry = self.get(chosen)?.clone();
        let origin_exists = space.belongs_to_other(chosen, id);
        debug!(
            "{}: matched by fingerprint to '{}' (origin {})",
            id.key,
            chosen,
            if origin_exists { "still exists" } else { "gone" }
        );
        Some(Resolution {
            key: (*chosen).to_string(),
            kind: MatchKind::Fingerprint,
            entry,
            origin_exists,
        })
    }

    /// Write `record` under `id`'s canonical key and prune every other key
    /// that refers to the same file. Returns the pruned keys, sorted.
    ///
    /// Pruned: alias forms of `id` (unless they name a different existing
    /// file), keys that resolve to `id`'s absolute path, and the key matched
    /// by fingerprint when its own source file no longer exists.
    pub fn write_authoritative(
        &mut self,
        space: &KeySpace,
        id: &FileIdentity,
        matched: Option<&Resolution>,
        record: ConversionRecord,
    ) -> Vec<String> {
        let mut prune: BTreeSet<String> = BTreeSet::new();

        for alias in space.alias_keys(id) {
            if self.contains_key(&alias) && !space.belongs_to_other(&alias, id) {
                prune.insert(alias);
            }
        }
        for key in self.keys() {
            if key != id.key && !prune.contains(key) && space.refers_to(key, id) {
                prune.insert(key.to_string());
            }
        }
        if let Some(m) = matched {
            if m.is_move() && m.key != id.key {
                prune.insert(m.key.clone());
            }
        }

        for key in &prune {
            self.remove(key);
        }
        if !prune.is_empty() {
            debug!("{}: pruned stale keys {:?}", id.key, prune);
        }
        self.insert(id.key.clone(), record);
        prune.into_iter().collect()
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────

/// Forward-slash form of a path with `.` segments removed.
pub fn normalize_key(path: &Path) -> String {
    let mut out = String::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => out.push_str(&p.as_os_str().to_string_lossy()),
            Component::RootDir => out.push('/'),
            Component::CurDir => {}
            Component::ParentDir => push_segment(&mut out, ".."),
            Component::Normal(s) => push_segment(&mut out, &s.to_string_lossy()),
        }
    }
    out.replace('\\', "/")
}

fn push_segment(out: &mut String, seg: &str) {
    if !out.is_empty() && !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(seg);
}

/// `base.join(path)` with `.` and `..` resolved lexically.
fn lexical_abs(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
