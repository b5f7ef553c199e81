//! Builds `.wap` / `.idx` artifacts from plain word/definition pairs.
//!
//! The readers in `wap` and `idx` only ever consume these formats; this
//! module is the producing side, used by the CLI `pack` subcommand and by
//! tests to construct fixtures.

use crate::core::cache;
use crate::core::compress;
use crate::core::error::DictError;
use crate::core::idx::prefix_key;
use crate::core::wap::word_key;
use bytes::BufMut;
use std::collections::BTreeMap;
use std::path::Path;

/// Words per suggestion-index chunk.
const IDX_CHUNK_WORDS: usize = 64;

/// Builds the suggestion-index artifact from the given words.
pub fn build_idx(words: &[String]) -> Result<Vec<u8>, DictError> {
    let mut sorted: Vec<&str> =
        words.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    sorted.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)));
    sorted.dedup();

    let mut data = Vec::new();
    let mut table = Vec::new();
    let mut count = 0usize;

    for chunk in sorted.chunks(IDX_CHUNK_WORDS) {
        let mut raw = String::new();
        for word in chunk {
            raw.push_str(word);
            raw.push('\n');
        }
        let compressed = compress::deflate(raw.as_bytes())?;

        table.put_u32(offset_u32(data.len())?);
        table.put_u32(chunk.len() as u32);
        table.put_u32(prefix_key(chunk[0]).0);
        table.put_u32(prefix_key(chunk[chunk.len() - 1]).0);
        data.extend_from_slice(&compressed);
        count += 1;
    }

    let end_offset = offset_u32(data.len())?;
    data.extend_from_slice(&table);
    data.put_u32(end_offset);

    tracing::debug!(words = sorted.len(), chunks = count, "built idx artifact");
    Ok(data)
}

/// Builds the definition-store artifact. One chunk per word-key bucket;
/// MD5-key collisions share a chunk and are resolved by the in-chunk table.
pub fn build_wap(entries: &[(String, String)]) -> Result<Vec<u8>, DictError> {
    let mut buckets: BTreeMap<u16, Vec<(&str, &str)>> = BTreeMap::new();
    for (word, definition) in entries {
        let word = word.trim();
        if word.is_empty() {
            continue;
        }
        buckets.entry(word_key(word)).or_default().push((word, definition));
    }

    let mut data = Vec::new();
    let mut table = Vec::new();

    for (key, mut bucket) in buckets {
        bucket.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let mut raw: Vec<u8> = Vec::new();
        let mut offsets = Vec::with_capacity(bucket.len());
        for (word, definition) in &bucket {
            offsets.push(offset_u32(raw.len())?);
            raw.extend_from_slice(word.as_bytes());
            raw.push(b'\n');
            raw.extend_from_slice(definition.as_bytes());
            raw.push(b'\n');
        }

        let word_table_start = offset_u32(raw.len())?;
        for ofs in offsets {
            raw.put_u32(ofs);
        }
        raw.put_u32(word_table_start);

        let compressed = compress::deflate(&raw)?;
        table.put_u32(offset_u32(data.len())?);
        table.put_u16(key);
        data.extend_from_slice(&compressed);
    }

    let end_offset = offset_u32(data.len())?;
    data.extend_from_slice(&table);
    data.put_u32(end_offset);

    Ok(data)
}

/// Writes both artifacts for `name` into `dir`.
pub fn write_dictionary(
    dir: &Path,
    name: &str,
    entries: &[(String, String)],
) -> Result<(), DictError> {
    std::fs::create_dir_all(dir)?;

    let words: Vec<String> = entries.iter().map(|(w, _)| w.clone()).collect();
    std::fs::write(cache::wap_path(dir, name), build_wap(entries)?)?;
    std::fs::write(cache::idx_path(dir, name), build_idx(&words)?)?;
    Ok(())
}

/// Parses `word<TAB>definition` lines; `\n` escapes in the definition become
/// real newlines. Blank lines and `#` comments are skipped.
pub fn parse_entries(text: &str) -> Result<Vec<(String, String)>, DictError> {
    let mut entries = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (word, definition) = line.split_once('\t').ok_or_else(|| {
            DictError::parse(format!("line {}: expected word<TAB>definition", lineno + 1))
        })?;
        entries.push((word.trim().to_string(), definition.trim().replace("\\n", "\n")));
    }

    Ok(entries)
}

fn offset_u32(len: usize) -> Result<u32, DictError> {
    u32::try_from(len).map_err(|_| DictError::format("artifact exceeds 4 GiB offset space"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idx_artifact_has_sane_tail() {
        let words = vec!["beta".to_string(), "alpha".to_string()];
        let bytes = build_idx(&words).unwrap();

        assert!(bytes.len() > 4);
        let end_offset =
            u32::from_be_bytes(bytes[bytes.len() - 4..].try_into().unwrap()) as usize;
        // One chunk: table is a single 16-byte entry before the trailing u32.
        assert_eq!(bytes.len() - 4 - end_offset, 16);
    }

    #[test]
    fn wap_one_chunk_per_key_bucket() {
        let entries = vec![
            ("alpha".to_string(), "first".to_string()),
            ("beta".to_string(), "second".to_string()),
        ];
        let bytes = build_wap(&entries).unwrap();
        let end_offset =
            u32::from_be_bytes(bytes[bytes.len() - 4..].try_into().unwrap()) as usize;
        // Two distinct MD5 buckets: two 6-byte entries.
        assert_eq!(bytes.len() - 4 - end_offset, 12);
    }

    #[test]
    fn parse_entries_splits_and_unescapes() {
        let text = "# fixture\napple\ta fruit\nfugue\tline one\\nline two\n";
        let entries = parse_entries(text).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("apple".to_string(), "a fruit".to_string()));
        assert_eq!(entries[1].1, "line one\nline two");
    }

    #[test]
    fn parse_entries_rejects_missing_tab() {
        assert!(matches!(parse_entries("justaword\n"), Err(DictError::Parse { .. })));
    }

    #[test]
    fn write_dictionary_emits_both_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let entries = vec![("apple".to_string(), "a fruit".to_string())];
        write_dictionary(tmp.path(), "en", &entries).unwrap();

        assert!(tmp.path().join("en.wap").is_file());
        assert!(tmp.path().join("en.idx").is_file());
    }
}
