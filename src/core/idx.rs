use crate::core::compress;
use crate::core::error::DictError;
use bytes::Buf;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Number of leading bytes of a (lowercased) word that form its prefix key.
pub const SUGGEST_KEY_LEN: usize = 4;

const ENTRY_SIZE: u64 = 16;

/// One chunk of the suggestion index: `count` sorted words starting at
/// `offset`, covering the prefix-key range `[key_a, key_b]`.
#[derive(Debug, Clone, Copy)]
struct SuggestEntry {
    offset: u32,
    count: u32,
    key_a: u32,
    key_b: u32,
}

/// Packs the first `SUGGEST_KEY_LEN` bytes of the lowercased word into a
/// big-endian u32 key, plus the mask of bytes actually present. A prefix
/// shorter than the key length compares under its mask only.
pub fn prefix_key(prefix: &str) -> (u32, u32) {
    let lower = prefix.to_lowercase();
    let raw = lower.as_bytes();

    let mut key = 0u32;
    let mut mask = 0u32;
    for i in 0..raw.len().min(SUGGEST_KEY_LEN) {
        let shift = 8 * (SUGGEST_KEY_LEN - i - 1) as u32;
        key |= (raw[i] as u32) << shift;
        mask |= 0xFF << shift;
    }
    (key, mask)
}

/// Reader for the `.idx` suggestion artifact: deflate chunks of sorted
/// words, a trailing entry table, and a final u32 giving the table offset.
pub struct IdxReader {
    path: PathBuf,
    file: File,
    entries: Vec<SuggestEntry>,
    /// Offset where chunk data ends and the entry table begins.
    end_offset: u64,
}

impl IdxReader {
    pub fn open(path: &Path) -> Result<Self, DictError> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < 4 {
            return Err(DictError::format(format!("{}: too short for an index", path.display())));
        }

        let table_end = file_size - 4;
        file.seek(SeekFrom::Start(table_end))?;
        let mut four = [0u8; 4];
        file.read_exact(&mut four)?;
        let end_offset = u32::from_be_bytes(four) as u64;

        if end_offset > table_end || (table_end - end_offset) % ENTRY_SIZE != 0 {
            return Err(DictError::format(format!(
                "{}: corrupt entry table (end offset {})",
                path.display(),
                end_offset
            )));
        }

        let count = (table_end - end_offset) / ENTRY_SIZE;
        let mut table = vec![0u8; (table_end - end_offset) as usize];
        file.seek(SeekFrom::Start(end_offset))?;
        file.read_exact(&mut table)?;

        let mut buf = &table[..];
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(SuggestEntry {
                offset: buf.get_u32(),
                count: buf.get_u32(),
                key_a: buf.get_u32(),
                key_b: buf.get_u32(),
            });
        }

        Ok(Self { path: path.to_path_buf(), file, entries, end_offset })
    }

    pub fn word_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count as u64).sum()
    }

    /// Returns up to `limit` words starting with `prefix`, case-insensitive,
    /// in the stored (lexicographic) order. The empty prefix matches every
    /// word, so it yields the head of the word list.
    pub fn suggest(&mut self, prefix: &str, limit: usize) -> Result<Vec<String>, DictError> {
        if self.entries.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let (key, mask) = prefix_key(prefix);

        // Chunks are sorted by key range; a matching word can only live in a
        // chunk whose masked [key_a, key_b] range touches the prefix key.
        let lo = self.entries.partition_point(|e| (e.key_b & mask) < key);
        let hi = self.entries.partition_point(|e| (e.key_a & mask) <= key);

        let lower_prefix = prefix.to_lowercase();
        let mut result = Vec::new();

        for i in lo..hi {
            let raw = self.read_chunk(i)?;
            let text = String::from_utf8(raw).map_err(|_| {
                DictError::format(format!("{}: chunk {} is not utf-8", self.path.display(), i))
            })?;

            for line in text.lines() {
                let word = line.trim();
                if word.is_empty() || !word.to_lowercase().starts_with(&lower_prefix) {
                    continue;
                }
                result.push(word.to_string());
                if result.len() >= limit {
                    return Ok(result);
                }
            }
        }

        Ok(result)
    }

    fn read_chunk(&mut self, i: usize) -> Result<Vec<u8>, DictError> {
        let start = self.entries[i].offset as u64;
        let end = match self.entries.get(i + 1) {
            Some(next) => next.offset as u64,
            None => self.end_offset,
        };
        if end < start || end > self.end_offset {
            return Err(DictError::format(format!(
                "{}: chunk {} has bad bounds {}..{}",
                self.path.display(),
                i,
                start,
                end
            )));
        }

        let mut compressed = vec![0u8; (end - start) as usize];
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut compressed)?;

        compress::inflate(&compressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pack::build_idx;

    fn write_idx(words: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("t.idx");
        let bytes = build_idx(&words.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        (tmp, path)
    }

    #[test]
    fn prefix_key_packs_and_masks() {
        let (key, mask) = prefix_key("ab");
        assert_eq!(key, 0x6162_0000);
        assert_eq!(mask, 0xFFFF_0000);

        let (key4, mask4) = prefix_key("Apple");
        assert_eq!(key4, u32::from_be_bytes(*b"appl"));
        assert_eq!(mask4, 0xFFFF_FFFF);

        assert_eq!(prefix_key(""), (0, 0));
    }

    #[test]
    fn suggest_prefix_matches_in_order() {
        let (_tmp, path) = write_idx(&["apple", "apricot", "banana", "cherry"]);
        let mut reader = IdxReader::open(&path).unwrap();

        assert_eq!(reader.suggest("ap", 10).unwrap(), vec!["apple", "apricot"]);
        assert_eq!(reader.suggest("banana", 10).unwrap(), vec!["banana"]);
        assert_eq!(reader.word_count(), 4);
    }

    #[test]
    fn suggest_is_case_insensitive() {
        let (_tmp, path) = write_idx(&["Apple", "apricot", "Banana"]);
        let mut reader = IdxReader::open(&path).unwrap();

        assert_eq!(reader.suggest("AP", 10).unwrap(), vec!["Apple", "apricot"]);
    }

    #[test]
    fn suggest_honors_limit() {
        let words: Vec<String> = (0..40).map(|i| format!("word{:02}", i)).collect();
        let refs: Vec<&str> = words.iter().map(|s| s.as_str()).collect();
        let (_tmp, path) = write_idx(&refs);
        let mut reader = IdxReader::open(&path).unwrap();

        let got = reader.suggest("word", 5).unwrap();
        assert_eq!(got.len(), 5);
        assert_eq!(got[0], "word00");
    }

    #[test]
    fn empty_prefix_returns_head_of_word_list() {
        let (_tmp, path) = write_idx(&["apple", "banana", "cherry"]);
        let mut reader = IdxReader::open(&path).unwrap();

        assert_eq!(reader.suggest("", 2).unwrap(), vec!["apple", "banana"]);
    }

    #[test]
    fn no_match_is_empty_not_error() {
        let (_tmp, path) = write_idx(&["apple", "banana"]);
        let mut reader = IdxReader::open(&path).unwrap();

        assert!(reader.suggest("zz", 10).unwrap().is_empty());
    }

    #[test]
    fn suggest_spans_multiple_chunks() {
        // More words than fit in one chunk so the bounds search must walk
        // several entries.
        let words: Vec<String> = (0..300).map(|i| format!("entry{:03}", i)).collect();
        let refs: Vec<&str> = words.iter().map(|s| s.as_str()).collect();
        let (_tmp, path) = write_idx(&refs);
        let mut reader = IdxReader::open(&path).unwrap();

        assert!(reader.entries.len() > 1);
        assert_eq!(reader.word_count(), 300);
        let got = reader.suggest("entry2", 300).unwrap();
        assert_eq!(got.len(), 100);
        assert_eq!(got[0], "entry200");
        assert_eq!(got[99], "entry299");
    }

    #[test]
    fn truncated_file_is_format_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.idx");
        std::fs::write(&path, [0u8, 1]).unwrap();
        assert!(matches!(IdxReader::open(&path), Err(DictError::Format { .. })));
    }
}
