use crate::core::compress;
use crate::core::error::DictError;
use bytes::Buf;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

const ENTRY_SIZE: u64 = 6;

/// Bucket key for a word: the first two bytes of its MD5 digest. Collisions
/// land in the same chunk and are resolved by the in-chunk word table.
pub fn word_key(word: &str) -> u16 {
    let digest = Md5::digest(word.as_bytes());
    u16::from_be_bytes([digest[0], digest[1]])
}

#[derive(Debug, Clone, Copy)]
struct LookupEntry {
    offset: u32,
    key: u16,
}

/// Reader for the `.wap` definition artifact: deflate chunks addressed by a
/// trailing `{offset, key}` table sorted by key. Each inflated chunk holds
/// `word\n<definition>` blocks plus its own word-offset table for binary
/// search.
pub struct WapReader {
    path: PathBuf,
    file: File,
    entries: Vec<LookupEntry>,
    end_offset: u64,
}

impl WapReader {
    pub fn open(path: &Path) -> Result<Self, DictError> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < 4 {
            return Err(DictError::format(format!("{}: too short for a dictionary", path.display())));
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
            entries.push(LookupEntry { offset: buf.get_u32(), key: buf.get_u16() });
        }

        Ok(Self { path: path.to_path_buf(), file, entries, end_offset })
    }

    /// Index of the chunk holding `key`, if any. Dense tables allow a direct
    /// probe at position `key`; sparse tables fall back to binary search.
    fn chunk_for_key(&self, key: u16) -> Option<usize> {
        if let Some(entry) = self.entries.get(key as usize) {
            if entry.key == key {
                return Some(key as usize);
            }
        }
        self.entries.binary_search_by_key(&key, |e| e.key).ok()
    }

    /// Exact-match lookup. `Ok(None)` when the word is simply absent.
    pub fn lookup(&mut self, word: &str) -> Result<Option<String>, DictError> {
        let chunk_index = match self.chunk_for_key(word_key(word)) {
            Some(i) => i,
            None => return Ok(None),
        };

        let raw = self.read_chunk(chunk_index)?;
        let Some(entry) = Self::find_in_chunk(&raw, word, &self.path)? else {
            return Ok(None);
        };

        let text = std::str::from_utf8(entry)
            .map_err(|_| DictError::format(format!("{}: definition is not utf-8", self.path.display())))?;
        Ok(Some(text.trim_end_matches('\n').to_string()))
    }

    /// Binary-searches the chunk's word-offset table for `word` and returns
    /// the definition byte range that follows it.
    fn find_in_chunk<'a>(
        raw: &'a [u8],
        word: &str,
        path: &Path,
    ) -> Result<Option<&'a [u8]>, DictError> {
        if raw.len() < 4 {
            return Err(DictError::format(format!("{}: empty chunk", path.display())));
        }

        let table_end = raw.len() - 4;
        let table_start = u32::from_be_bytes(
            raw[table_end..].try_into().map_err(|_| DictError::format("bad chunk tail"))?,
        ) as usize;

        if table_start > table_end || (table_end - table_start) % 4 != 0 {
            return Err(DictError::format(format!("{}: corrupt chunk word table", path.display())));
        }

        let mut buf = &raw[table_start..table_end];
        let mut offsets = Vec::with_capacity(buf.len() / 4);
        while buf.remaining() >= 4 {
            let ofs = buf.get_u32() as usize;
            if ofs > table_start {
                return Err(DictError::format(format!(
                    "{}: word offset {} beyond chunk data ({})",
                    path.display(),
                    ofs,
                    table_start
                )));
            }
            offsets.push(ofs);
        }

        fn word_at(raw: &[u8], table_start: usize, start: usize) -> &[u8] {
            let end = raw[start..table_start]
                .iter()
                .position(|&b| b == b'\n')
                .map(|p| start + p)
                .unwrap_or(table_start);
            &raw[start..end]
        }

        let found =
            offsets.partition_point(|&ofs| word_at(raw, table_start, ofs) < word.as_bytes());
        if found >= offsets.len() || word_at(raw, table_start, offsets[found]) != word.as_bytes() {
            return Ok(None);
        }

        let start = {
            let w = offsets[found];
            let word_end = w + word_at(raw, table_start, w).len();
            // Skip the newline terminating the headword.
            (word_end + 1).min(table_start)
        };
        let end = offsets.get(found + 1).copied().unwrap_or(table_start);
        if end < start || end > table_start {
            return Err(DictError::format(format!("{}: corrupt definition bounds", path.display())));
        }

        Ok(Some(&raw[start..end]))
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
    use crate::core::pack::build_wap;
    use std::path::PathBuf;

    fn write_wap(entries: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("t.wap");
        let pairs: Vec<(String, String)> = entries
            .iter()
            .map(|(w, d)| (w.to_string(), d.to_string()))
            .collect();
        std::fs::write(&path, build_wap(&pairs).unwrap()).unwrap();
        (tmp, path)
    }

    #[test]
    fn lookup_finds_exact_word() {
        let (_tmp, path) = write_wap(&[
            ("apple", "a fruit with seeds"),
            ("banana", "a long yellow fruit"),
            ("cherry", "a small red fruit"),
        ]);
        let mut reader = WapReader::open(&path).unwrap();

        assert_eq!(reader.lookup("banana").unwrap().as_deref(), Some("a long yellow fruit"));
        assert_eq!(reader.lookup("apple").unwrap().as_deref(), Some("a fruit with seeds"));
    }

    #[test]
    fn lookup_missing_word_is_none() {
        let (_tmp, path) = write_wap(&[("apple", "a fruit")]);
        let mut reader = WapReader::open(&path).unwrap();

        assert!(reader.lookup("pear").unwrap().is_none());
        assert!(reader.lookup("").unwrap().is_none());
    }

    #[test]
    fn lookup_is_case_sensitive_exact_match() {
        let (_tmp, path) = write_wap(&[("apple", "a fruit")]);
        let mut reader = WapReader::open(&path).unwrap();

        assert!(reader.lookup("Apple").unwrap().is_none());
    }

    #[test]
    fn multiline_definitions_survive() {
        let (_tmp, path) = write_wap(&[
            ("fugue", "1. a musical form\n2. a dissociative state"),
            ("motet", "a choral composition"),
        ]);
        let mut reader = WapReader::open(&path).unwrap();

        assert_eq!(
            reader.lookup("fugue").unwrap().as_deref(),
            Some("1. a musical form\n2. a dissociative state")
        );
    }

    #[test]
    fn non_ascii_words_roundtrip() {
        let (_tmp, path) = write_wap(&[("яблуко", "apple (Ukrainian)"), ("груша", "pear")]);
        let mut reader = WapReader::open(&path).unwrap();

        assert_eq!(reader.lookup("яблуко").unwrap().as_deref(), Some("apple (Ukrainian)"));
    }

    #[test]
    fn many_words_hit_every_bucket_path() {
        let pairs: Vec<(String, String)> =
            (0..500).map(|i| (format!("word{:03}", i), format!("definition {}", i))).collect();
        let refs: Vec<(&str, &str)> =
            pairs.iter().map(|(w, d)| (w.as_str(), d.as_str())).collect();
        let (_tmp, path) = write_wap(&refs);
        let mut reader = WapReader::open(&path).unwrap();

        for (w, d) in &pairs {
            assert_eq!(reader.lookup(w).unwrap().as_deref(), Some(d.as_str()), "word {}", w);
        }
        assert!(reader.lookup("word500").unwrap().is_none());
    }

    #[test]
    fn out_of_range_word_offset_is_format_error() {
        use bytes::BufMut;

        // One chunk holding "apple" whose word table claims an offset far
        // beyond the chunk data.
        let mut raw: Vec<u8> = Vec::new();
        raw.extend_from_slice(b"apple\na fruit\n");
        let table_start = raw.len() as u32;
        raw.put_u32(9999);
        raw.put_u32(table_start);
        let compressed = compress::deflate(&raw).unwrap();

        let mut bytes = compressed.clone();
        let end_offset = bytes.len() as u32;
        bytes.put_u32(0);
        bytes.put_u16(word_key("apple"));
        bytes.put_u32(end_offset);

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.wap");
        std::fs::write(&path, bytes).unwrap();

        let mut reader = WapReader::open(&path).unwrap();
        assert!(matches!(reader.lookup("apple"), Err(DictError::Format { .. })));
    }

    #[test]
    fn truncated_file_is_format_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.wap");
        std::fs::write(&path, [9u8]).unwrap();
        assert!(matches!(WapReader::open(&path), Err(DictError::Format { .. })));
    }
}
