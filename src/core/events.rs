use crate::core::error::DictError;
use crate::core::model::{Command, DictionaryInfo, LookupResult, SuggestResult};
use std::sync::Arc;

/// Events fanned out to every subscriber of the engine.
///
/// Each executed command produces exactly one terminal event matching its
/// kind (see `is_terminal`); progress and per-dictionary load events may
/// precede it. A command that fails dispatches `Error` in place of its
/// normal terminal event, never both.
#[derive(Debug, Clone)]
pub enum DictionaryEvent {
    IndexDownloadProgress { bytes_downloaded: u64, bytes_total: u64 },
    IndexDownloadComplete { success: bool },
    /// One per dictionary while INIT/LOAD_OFFLINE (re)opens offline copies.
    DictionaryLoad { dictionary: DictionaryInfo, success: bool },
    /// Terminal for INIT and LOAD_OFFLINE. `success` is false when at least
    /// one offline dictionary failed to open.
    AllDictionariesReady { success: bool },
    DownloadProgress { dictionary: DictionaryInfo, bytes_downloaded: u64, bytes_total: u64 },
    /// Terminal for DOWNLOAD_DICTIONARY.
    DownloadComplete { dictionary: DictionaryInfo },
    /// Terminal for DELETE_DICTIONARY.
    DictionaryDelete { dictionary: DictionaryInfo },
    /// Terminal for LOOKUP. `successful` counts dictionaries queried without
    /// error; `total` is the number of loaded dictionaries.
    DictionaryLookup { results: Vec<LookupResult>, successful: usize, total: usize },
    /// Terminal for SUGGEST.
    DictionarySuggest { results: Vec<SuggestResult>, successful: usize, total: usize },
    /// Terminal for HEAD_FILES.
    HeadFilesComplete { successful: usize, total: usize },
    /// Terminal for UPDATE_LOCAL.
    LocalFilesChecked,
    /// Replacement terminal event for any failed command.
    Error { command: Command, error: Arc<DictError> },
}

impl DictionaryEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AllDictionariesReady { .. }
                | Self::DownloadComplete { .. }
                | Self::DictionaryDelete { .. }
                | Self::DictionaryLookup { .. }
                | Self::DictionarySuggest { .. }
                | Self::HeadFilesComplete { .. }
                | Self::LocalFilesChecked
                | Self::Error { .. }
        )
    }
}
