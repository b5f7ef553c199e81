use crate::core::error::DictError;
use crate::core::model::DictionaryInfo;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Extension of the definition-store artifact.
pub const WAP_EXT: &str = "wap";
/// Extension of the suggestion-index artifact.
pub const IDX_EXT: &str = "idx";
/// Suffix for in-flight transfers; reconciliation ignores these.
pub const PARTIAL_SUFFIX: &str = "partial";

/// On-disk facts about one dictionary id, gathered by `scan_local`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFacts {
    pub wap_size: u64,
    pub idx_size: u64,
    /// Newest modification time across both artifacts.
    pub modified: Option<SystemTime>,
}

impl LocalFacts {
    pub fn total_size(&self) -> u64 {
        self.wap_size + self.idx_size
    }

    /// A complete cached copy needs both artifacts with non-zero size.
    pub fn is_complete(&self) -> bool {
        self.wap_size > 0 && self.idx_size > 0
    }
}

pub fn wap_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_filename::sanitize(name), WAP_EXT))
}

pub fn idx_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_filename::sanitize(name), IDX_EXT))
}

pub fn partial_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".");
    s.push(PARTIAL_SUFFIX);
    PathBuf::from(s)
}

pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(crate::core::remote::INDEX_FILE)
}

/// Walks the cache directory and collects per-id artifact facts.
/// Partial files, the persisted index and anything unrecognized are skipped.
/// A missing directory yields an empty map.
pub fn scan_local(dir: &Path) -> Result<HashMap<String, LocalFacts>, DictError> {
    let mut facts: HashMap<String, LocalFacts> = HashMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(facts),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(e) => e,
            None => continue,
        };
        if ext != WAP_EXT && ext != IDX_EXT {
            continue;
        }

        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s.to_string(),
            None => continue,
        };

        let meta = entry.metadata()?;
        let slot = facts.entry(stem).or_default();
        if ext == WAP_EXT {
            slot.wap_size = meta.len();
        } else {
            slot.idx_size = meta.len();
        }
        if let Ok(mtime) = meta.modified() {
            slot.modified = Some(match slot.modified {
                Some(prev) if prev > mtime => prev,
                _ => mtime,
            });
        }
    }

    Ok(facts)
}

/// Applies scanned facts to a record: local size and offline availability.
/// Remote-side fields are left untouched; `has_update` is recomputed from
/// whatever remote size is already known.
pub fn apply_local_facts(record: &mut DictionaryInfo, facts: Option<&LocalFacts>) {
    match facts {
        Some(f) if f.is_complete() => {
            record.file_size_local = f.total_size();
            record.is_available_offline = true;
        }
        Some(f) => {
            record.file_size_local = f.total_size();
            record.is_available_offline = false;
        }
        None => {
            record.file_size_local = 0;
            record.is_available_offline = false;
        }
    }
    record.has_update = has_update(record, facts, None);
}

/// `has_update` is set only when both sides are known and disagree: either
/// the sizes differ, or the remote copy is newer than the local one.
pub fn has_update(
    record: &DictionaryInfo,
    facts: Option<&LocalFacts>,
    remote_modified: Option<SystemTime>,
) -> bool {
    let local = match facts {
        Some(f) if f.is_complete() => f,
        _ => return false,
    };
    if record.file_size_remote == 0 {
        return false;
    }
    if local.total_size() != record.file_size_remote {
        return true;
    }
    match (remote_modified, local.modified) {
        (Some(remote), Some(local_mtime)) => remote > local_mtime,
        _ => false,
    }
}

/// Removes cached artifacts (and stray partials) for one id.
pub fn delete_dictionary_files(dir: &Path, name: &str) -> Result<(), DictError> {
    for path in [wap_path(dir, name), idx_path(dir, name)] {
        remove_if_exists(&partial_path(&path))?;
        remove_if_exists(&path)?;
    }
    Ok(())
}

pub fn remove_if_exists(path: &Path) -> Result<(), DictError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str, len: usize) {
        fs::write(dir.join(name), vec![0u8; len]).unwrap();
    }

    #[test]
    fn scan_collects_artifact_pairs() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "en.wap", 100);
        touch(tmp.path(), "en.idx", 40);
        touch(tmp.path(), "uk.wap", 7);
        touch(tmp.path(), "index.txt", 5);
        touch(tmp.path(), "uk.idx.partial", 3);

        let facts = scan_local(tmp.path()).unwrap();
        assert_eq!(facts.len(), 2);

        let en = &facts["en"];
        assert_eq!(en.total_size(), 140);
        assert!(en.is_complete());

        let uk = &facts["uk"];
        assert_eq!(uk.total_size(), 7);
        assert!(!uk.is_complete(), "missing idx must not count as complete");
    }

    #[test]
    fn scan_missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("nope");
        assert!(scan_local(&gone).unwrap().is_empty());
    }

    #[test]
    fn apply_facts_sets_offline_state() {
        let mut record = DictionaryInfo::named("en");

        apply_local_facts(
            &mut record,
            Some(&LocalFacts { wap_size: 10, idx_size: 4, modified: None }),
        );
        assert!(record.is_available_offline);
        assert_eq!(record.file_size_local, 14);

        apply_local_facts(&mut record, None);
        assert!(!record.is_available_offline);
        assert_eq!(record.file_size_local, 0);
    }

    #[test]
    fn has_update_requires_both_sides_known() {
        let mut record = DictionaryInfo::named("en");
        let complete = LocalFacts { wap_size: 10, idx_size: 4, modified: None };

        // Remote size unknown: never an update.
        assert!(!has_update(&record, Some(&complete), None));

        // Local incomplete: never an update.
        record.file_size_remote = 99;
        assert!(!has_update(&record, None, None));

        // Both known, sizes differ.
        assert!(has_update(&record, Some(&complete), None));

        // Both known, same size: only a newer remote mtime flags an update.
        record.file_size_remote = 14;
        assert!(!has_update(&record, Some(&complete), None));

        let t0 = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000);
        let t1 = t0 + std::time::Duration::from_secs(60);
        let dated = LocalFacts { wap_size: 10, idx_size: 4, modified: Some(t0) };
        assert!(has_update(&record, Some(&dated), Some(t1)));
        assert!(!has_update(&record, Some(&dated), Some(t0)));
    }

    #[test]
    fn delete_removes_artifacts_and_partials() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "uk.wap", 10);
        touch(tmp.path(), "uk.idx", 10);
        touch(tmp.path(), "uk.wap.partial", 3);

        delete_dictionary_files(tmp.path(), "uk").unwrap();
        assert!(scan_local(tmp.path()).unwrap().is_empty());

        // Deleting an id with no files is not an error.
        delete_dictionary_files(tmp.path(), "uk").unwrap();
    }
}
