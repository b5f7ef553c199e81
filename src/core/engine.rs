use crate::core::cache;
use crate::core::download;
use crate::core::error::DictError;
use crate::core::events::DictionaryEvent;
use crate::core::idx::IdxReader;
use crate::core::model::{
    Command, CommandName, DictionaryInfo, LookupResult, SuggestResult, DEFAULT_SUGGESTION_LIMIT,
};
use crate::core::remote::{self, RemoteSource};
use crate::core::wap::WapReader;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    pub suggestion_limit: usize,
}

impl EngineConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into(), suggestion_limit: DEFAULT_SUGGESTION_LIMIT }
    }
}

type SharedRecords = Arc<Mutex<Vec<DictionaryInfo>>>;
type CancelMap = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The dictionary management engine: one serialized command processor that
/// owns the index, the local cache, remote sync and query fan-out.
///
/// Callers on any task post commands and never block; a single worker task
/// drains the queue strictly in submission order, so `INIT` → `DOWNLOAD` →
/// `LOAD_OFFLINE` → `LOOKUP` needs no synchronization on the caller side.
/// Results come back through the broadcast subscription; every subscriber
/// sees every event.
#[derive(Clone)]
pub struct CompositeDictionary {
    command_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<DictionaryEvent>,
    shared: SharedRecords,
    cancels: CancelMap,
    shutdown: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl CompositeDictionary {
    pub fn new(remote: Arc<dyn RemoteSource>, config: EngineConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);
        let shared: SharedRecords = Arc::new(Mutex::new(Vec::new()));
        let cancels: CancelMap = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let worker = Worker {
            remote,
            config,
            event_tx: event_tx.clone(),
            shared: shared.clone(),
            cancels: cancels.clone(),
            shutdown: shutdown.clone(),
            records: Vec::new(),
            loaded: Vec::new(),
        };
        tokio::spawn(worker.run(command_rx));

        Self {
            command_tx,
            event_tx,
            shared,
            cancels,
            shutdown,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends a command to the queue and returns immediately. Fails fast
    /// with `Closed` once `close()` has been called.
    pub fn post_command(&self, command: Command) -> Result<(), DictError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DictError::Closed);
        }
        tracing::debug!(name = ?command.name, argument = ?command.argument, "command posted");
        self.command_tx.send(command).map_err(|_| DictError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DictionaryEvent> {
        self.event_tx.subscribe()
    }

    /// Point-in-time snapshot of the record store. Not live: re-read after a
    /// relevant event to observe changes.
    pub fn dictionaries(&self) -> Vec<DictionaryInfo> {
        lock(&self.shared).clone()
    }

    /// Requests cancellation of an in-flight download. Goes around the queue
    /// on purpose: the queue is blocked behind the very transfer this stops.
    /// Returns false when no download for `name` is active.
    pub fn cancel_download(&self, name: &str) -> bool {
        match lock(&self.cancels).get(name) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops accepting commands and shuts the worker down. Queued commands
    /// are abandoned; an in-flight download observes the shutdown token and
    /// stops without leaving partial artifacts. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

struct LoadedDictionary {
    name: String,
    wap: WapReader,
    idx: IdxReader,
}

impl LoadedDictionary {
    fn open(dir: &std::path::Path, name: &str) -> Result<Self, DictError> {
        Ok(Self {
            name: name.to_string(),
            wap: WapReader::open(&cache::wap_path(dir, name))?,
            idx: IdxReader::open(&cache::idx_path(dir, name))?,
        })
    }
}

/// Owns all mutable engine state. Only this task touches the record store;
/// everyone else sees snapshots published through `shared`.
struct Worker {
    remote: Arc<dyn RemoteSource>,
    config: EngineConfig,
    event_tx: broadcast::Sender<DictionaryEvent>,
    shared: SharedRecords,
    cancels: CancelMap,
    shutdown: CancellationToken,
    records: Vec<DictionaryInfo>,
    loaded: Vec<LoadedDictionary>,
}

impl Worker {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                cmd = command_rx.recv() => match cmd {
                    Some(c) => c,
                    None => break,
                },
            };
            self.execute(command).await;
        }
        tracing::debug!("dictionary worker stopped");
    }

    async fn execute(&mut self, command: Command) {
        tracing::debug!(name = ?command.name, argument = ?command.argument, "executing command");

        let result = match command.name {
            CommandName::Init => self.cmd_init().await,
            CommandName::LoadOffline => self.reload_offline().await,
            CommandName::UpdateLocal => self.cmd_update_local(),
            CommandName::HeadFiles => self.cmd_head_files().await,
            CommandName::DownloadDictionary => self.cmd_download(&command).await,
            CommandName::DeleteDictionary => self.cmd_delete(&command),
            CommandName::Lookup => self.cmd_lookup(&command),
            CommandName::Suggest => self.cmd_suggest(&command),
        };

        // Failures never abort the worker loop; they become the command's
        // terminal event and the queue moves on.
        if let Err(error) = result {
            tracing::warn!(name = ?command.name, %error, "command failed");
            let _ = self
                .event_tx
                .send(DictionaryEvent::Error { command, error: Arc::new(error) });
        }
    }

    /// INIT: fetch and persist the catalog if the cache has none yet, then
    /// behave exactly like LOAD_OFFLINE.
    async fn cmd_init(&mut self) -> Result<(), DictError> {
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;

        let index_file = cache::index_path(&self.config.cache_dir);
        if tokio::fs::metadata(&index_file).await.is_err() {
            let text = match self.remote.fetch_index().await {
                Ok(text) => text,
                Err(err) => {
                    let _ = self
                        .event_tx
                        .send(DictionaryEvent::IndexDownloadComplete { success: false });
                    return Err(err);
                }
            };
            // Validate before persisting so a bad catalog never poisons the cache.
            if let Err(err) = remote::parse_index(&text) {
                let _ = self
                    .event_tx
                    .send(DictionaryEvent::IndexDownloadComplete { success: false });
                return Err(err);
            }

            let len = text.len() as u64;
            let _ = self.event_tx.send(DictionaryEvent::IndexDownloadProgress {
                bytes_downloaded: len,
                bytes_total: len,
            });
            tokio::fs::write(&index_file, &text).await?;
            let _ = self
                .event_tx
                .send(DictionaryEvent::IndexDownloadComplete { success: true });
            tracing::info!(path = %index_file.display(), "catalog fetched and persisted");
        }

        self.reload_offline().await
    }

    /// LOAD_OFFLINE: rebuild the record store purely from local disk state
    /// and reopen every complete cached dictionary. No network access.
    async fn reload_offline(&mut self) -> Result<(), DictError> {
        self.loaded.clear();

        let index_file = cache::index_path(&self.config.cache_dir);
        let mut records = Vec::new();
        match tokio::fs::read_to_string(&index_file).await {
            Ok(text) => {
                for entry in remote::parse_index(&text)? {
                    records.push(DictionaryInfo {
                        name: entry.name,
                        display_name: entry.display_name,
                        description: entry.description,
                        ..Default::default()
                    });
                }
            }
            // A fresh cache directory simply has no dictionaries yet.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let facts = cache::scan_local(&self.config.cache_dir)?;
        let mut all_ok = true;

        for record in &mut records {
            cache::apply_local_facts(record, facts.get(&record.name));
            if !record.is_available_offline {
                continue;
            }
            match LoadedDictionary::open(&self.config.cache_dir, &record.name) {
                Ok(dict) => {
                    self.loaded.push(dict);
                    let _ = self.event_tx.send(DictionaryEvent::DictionaryLoad {
                        dictionary: record.clone(),
                        success: true,
                    });
                }
                Err(err) => {
                    tracing::warn!(name = %record.name, %err, "cached dictionary failed to open");
                    record.is_available_offline = false;
                    all_ok = false;
                    let _ = self.event_tx.send(DictionaryEvent::DictionaryLoad {
                        dictionary: record.clone(),
                        success: false,
                    });
                }
            }
        }

        self.records = records;
        self.publish();
        let _ = self
            .event_tx
            .send(DictionaryEvent::AllDictionariesReady { success: all_ok });
        Ok(())
    }

    /// UPDATE_LOCAL: re-derive local sizes and availability from disk,
    /// without touching the network or the loaded readers.
    fn cmd_update_local(&mut self) -> Result<(), DictError> {
        let facts = cache::scan_local(&self.config.cache_dir)?;
        for record in &mut self.records {
            cache::apply_local_facts(record, facts.get(&record.name));
        }
        self.publish();
        let _ = self.event_tx.send(DictionaryEvent::LocalFilesChecked);
        Ok(())
    }

    /// HEAD_FILES: metadata-only pass over every known dictionary, replacing
    /// `file_size_remote` and recomputing `has_update` from scratch.
    async fn cmd_head_files(&mut self) -> Result<(), DictError> {
        let facts = cache::scan_local(&self.config.cache_dir)?;
        let total = self.records.len();
        let mut successful = 0usize;

        for record in &mut self.records {
            let wap = self
                .remote
                .head_file(&format!("{}.{}", record.name, cache::WAP_EXT))
                .await;
            let idx = self
                .remote
                .head_file(&format!("{}.{}", record.name, cache::IDX_EXT))
                .await;

            match (wap, idx) {
                (Ok(wap), Ok(idx)) => {
                    record.file_size_remote =
                        wap.size.unwrap_or(0) + idx.size.unwrap_or(0);
                    let newest = match (wap.last_modified, idx.last_modified) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                    record.has_update =
                        cache::has_update(record, facts.get(&record.name), newest);
                    successful += 1;
                }
                (wap, idx) => {
                    let error = wap.err().or(idx.err());
                    tracing::warn!(
                        name = %record.name,
                        error = %error.map(|e| e.to_string()).unwrap_or_default(),
                        "head request failed"
                    );
                }
            }
        }

        self.publish();
        let _ = self
            .event_tx
            .send(DictionaryEvent::HeadFilesComplete { successful, total });
        Ok(())
    }

    /// DOWNLOAD_DICTIONARY: stream both artifacts for the id, publishing
    /// coalesced progress, then reconcile that record against the cache.
    async fn cmd_download(&mut self, command: &Command) -> Result<(), DictError> {
        let name = required_argument(command)?.to_string();
        let index = self
            .records
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| DictError::NotFound { name: name.clone() })?;

        let token = self.shutdown.child_token();
        lock(&self.cancels).insert(name.clone(), token.clone());

        let remote = self.remote.clone();
        let cache_dir = self.config.cache_dir.clone();
        let outcome = {
            let records = &mut self.records;
            let shared = self.shared.clone();
            let event_tx = self.event_tx.clone();
            let mut on_progress = |bytes_downloaded: u64, bytes_total: u64| {
                let record = &mut records[index];
                record.progress = percent_in_flight(bytes_downloaded, bytes_total);
                let dictionary = record.clone();
                *lock(&shared) = records.clone();
                let _ = event_tx.send(DictionaryEvent::DownloadProgress {
                    dictionary,
                    bytes_downloaded,
                    bytes_total,
                });
            };
            download::download_dictionary(
                remote.as_ref(),
                &cache_dir,
                &name,
                &token,
                &mut on_progress,
            )
            .await
        };

        lock(&self.cancels).remove(&name);

        // Reconciling after a successful transfer can itself fail; either
        // way the record must not be left with an in-flight progress value.
        let outcome = outcome
            .and_then(|bytes| Ok((bytes, cache::scan_local(&self.config.cache_dir)?)));

        match outcome {
            Ok((bytes, facts)) => {
                let record = &mut self.records[index];
                cache::apply_local_facts(record, facts.get(&name));
                // A just-fetched copy is current by definition.
                record.has_update = false;
                record.progress = 100;
                let dictionary = record.clone();
                self.publish();
                tracing::info!(name = %name, bytes, "dictionary downloaded");
                let _ = self
                    .event_tx
                    .send(DictionaryEvent::DownloadComplete { dictionary });
                Ok(())
            }
            Err(err) => {
                let record = &mut self.records[index];
                record.progress = 0;
                self.publish();
                Err(err)
            }
        }
    }

    /// DELETE_DICTIONARY: drop the loaded readers first, then the files.
    fn cmd_delete(&mut self, command: &Command) -> Result<(), DictError> {
        let name = required_argument(command)?.to_string();
        let index = self
            .records
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| DictError::NotFound { name: name.clone() })?;

        self.loaded.retain(|d| d.name != name);
        cache::delete_dictionary_files(&self.config.cache_dir, &name)?;

        let record = &mut self.records[index];
        record.file_size_local = 0;
        record.is_available_offline = false;
        record.has_update = false;
        record.progress = 0;
        let dictionary = record.clone();

        self.publish();
        tracing::info!(name = %name, "dictionary deleted");
        let _ = self
            .event_tx
            .send(DictionaryEvent::DictionaryDelete { dictionary });
        Ok(())
    }

    /// LOOKUP: exact match across every loaded dictionary, in index order.
    /// One result per dictionary; a failing dictionary still yields a
    /// not-found entry so the batch stays complete.
    fn cmd_lookup(&mut self, command: &Command) -> Result<(), DictError> {
        let word = command.argument.clone().unwrap_or_default();
        let total = self.loaded.len();
        let mut successful = 0usize;
        let mut results = Vec::with_capacity(total);

        for dict in &mut self.loaded {
            let dictionary = record_snapshot(&self.records, &dict.name);

            // The empty word is deterministically not found anywhere.
            if word.is_empty() {
                successful += 1;
                results.push(LookupResult {
                    word: word.clone(),
                    is_found: false,
                    definition: None,
                    dictionary,
                });
                continue;
            }

            match dict.wap.lookup(&word) {
                Ok(definition) => {
                    successful += 1;
                    results.push(LookupResult {
                        word: word.clone(),
                        is_found: definition.is_some(),
                        definition,
                        dictionary,
                    });
                }
                Err(err) => {
                    tracing::warn!(name = %dict.name, %err, "lookup failed");
                    results.push(LookupResult {
                        word: word.clone(),
                        is_found: false,
                        definition: None,
                        dictionary,
                    });
                }
            }
        }

        let _ = self
            .event_tx
            .send(DictionaryEvent::DictionaryLookup { results, successful, total });
        Ok(())
    }

    /// SUGGEST: case-insensitive prefix matches per loaded dictionary,
    /// capped at the configured limit. The empty prefix yields the head of
    /// each word list.
    fn cmd_suggest(&mut self, command: &Command) -> Result<(), DictError> {
        let prefix = command.argument.clone().unwrap_or_default();
        let limit = self.config.suggestion_limit;
        let total = self.loaded.len();
        let mut successful = 0usize;
        let mut results = Vec::with_capacity(total);

        for dict in &mut self.loaded {
            let dictionary = record_snapshot(&self.records, &dict.name);
            match dict.idx.suggest(&prefix, limit) {
                Ok(suggestions) => {
                    successful += 1;
                    results.push(SuggestResult {
                        word_prefix: prefix.clone(),
                        suggestions,
                        dictionary,
                    });
                }
                Err(err) => {
                    tracing::warn!(name = %dict.name, %err, "suggest failed");
                    results.push(SuggestResult {
                        word_prefix: prefix.clone(),
                        suggestions: Vec::new(),
                        dictionary,
                    });
                }
            }
        }

        let _ = self
            .event_tx
            .send(DictionaryEvent::DictionarySuggest { results, successful, total });
        Ok(())
    }

    fn publish(&self) {
        *lock(&self.shared) = self.records.clone();
    }
}

fn record_snapshot(records: &[DictionaryInfo], name: &str) -> DictionaryInfo {
    records
        .iter()
        .find(|r| r.name == name)
        .cloned()
        .unwrap_or_else(|| DictionaryInfo::named(name))
}

fn required_argument(command: &Command) -> Result<&str, DictError> {
    command
        .argument
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DictError::parse(format!("{:?} requires a dictionary id", command.name)))
}

/// Progress stays strictly between 0 and 100 while a transfer is active.
fn percent_in_flight(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 1;
    }
    let pct = (downloaded as u128 * 100 / total as u128) as u8;
    pct.clamp(1, 99)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_stays_strictly_in_flight() {
        assert_eq!(percent_in_flight(0, 100), 1);
        assert_eq!(percent_in_flight(50, 100), 50);
        assert_eq!(percent_in_flight(100, 100), 99);
        assert_eq!(percent_in_flight(10, 0), 1);
    }

    #[test]
    fn required_argument_rejects_empty() {
        let cmd = Command::new(CommandName::DownloadDictionary);
        assert!(required_argument(&cmd).is_err());

        let cmd = Command::with_argument(CommandName::DownloadDictionary, "uk");
        assert_eq!(required_argument(&cmd).unwrap(), "uk");
    }
}
