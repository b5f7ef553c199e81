use uuid::Uuid;

/// Maximum number of suggestions returned per dictionary unless the
/// engine is configured otherwise.
pub const DEFAULT_SUGGESTION_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    Init,
    LoadOffline,
    Lookup,
    Suggest,
    DownloadDictionary,
    DeleteDictionary,
    UpdateLocal,
    HeadFiles,
}

/// A single requested operation against the engine. Commands are immutable
/// once posted and run exactly once, in FIFO order across all callers.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: Uuid,
    pub name: CommandName,
    pub argument: Option<String>,
}

impl Command {
    pub fn new(name: CommandName) -> Self {
        Self { id: Uuid::new_v4(), name, argument: None }
    }

    pub fn with_argument(name: CommandName, argument: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), name, argument: Some(argument.into()) }
    }
}

/// One record per dictionary known from the index, keyed by `name`
/// (a short identifier such as "en" or "uk").
///
/// `progress` is only meaningful while a download for this record is in
/// flight; 0 and 100 both mean idle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictionaryInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// Total size of the cached artifacts in bytes. 0 means not cached.
    pub file_size_local: u64,
    /// Total remote size in bytes as last reported by HEAD_FILES. 0 means unknown.
    pub file_size_remote: u64,
    pub is_available_offline: bool,
    pub has_update: bool,
    pub progress: u8,
}

impl DictionaryInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}

/// Per-dictionary outcome of a LOOKUP command.
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub word: String,
    pub is_found: bool,
    /// Present iff `is_found`.
    pub definition: Option<String>,
    pub dictionary: DictionaryInfo,
}

/// Per-dictionary outcome of a SUGGEST command. Suggestions are ordered
/// lexicographically and capped at the configured limit.
#[derive(Debug, Clone)]
pub struct SuggestResult {
    pub word_prefix: String,
    pub suggestions: Vec<String>,
    pub dictionary: DictionaryInfo,
}

/// Remote file metadata from a HEAD request (no content transfer).
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteFileInfo {
    pub size: Option<u64>,
    pub last_modified: Option<std::time::SystemTime>,
}
