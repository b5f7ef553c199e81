use async_trait::async_trait;
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use lexivault::core::engine::{CompositeDictionary, EngineConfig};
use lexivault::core::error::DictError;
use lexivault::core::events::DictionaryEvent;
use lexivault::core::model::{Command as DictCommand, CommandName, RemoteFileInfo};
use lexivault::core::pack;
use lexivault::core::remote::{ByteStream, HttpRemote, RemoteSource};
use lexivault::i18n::{self, Messages};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use url::Url;

const USER_AGENT: &str = "lexivault/0.1";

fn build_cli() -> Command {
    let list = Command::new("list").about("List known dictionaries and their state").arg(
        Arg::new("remote")
            .long("remote")
            .help("Also query the server for remote sizes and updates")
            .action(ArgAction::SetTrue),
    );

    let download = Command::new("download")
        .about("Download a dictionary into the local cache")
        .arg(Arg::new("id").help("Dictionary id").required(true).num_args(1));

    let delete = Command::new("delete")
        .about("Delete a cached dictionary")
        .arg(Arg::new("id").help("Dictionary id").required(true).num_args(1));

    let lookup = Command::new("lookup")
        .about("Look up a word in every cached dictionary")
        .arg(Arg::new("word").help("Word to look up").required(true).num_args(1));

    let suggest = Command::new("suggest")
        .about("Suggest completions for a prefix")
        .arg(Arg::new("prefix").help("Word prefix").required(true).num_args(1));

    let refresh = Command::new("refresh")
        .about("Reconcile the record store with the cache directory, offline");

    let pack = Command::new("pack")
        .about("Build dictionary files from a tab-separated word list")
        .arg(Arg::new("id").help("Dictionary id").required(true).num_args(1))
        .arg(
            Arg::new("input")
                .long("input")
                .help("Input file: one `word<TAB>definition` per line")
                .required(true)
                .num_args(1),
        );

    Command::new("lexivault")
        .about("Offline dictionary manager (download, cache, lookup, suggest)")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("cache_dir")
                .long("cache-dir")
                .help("Local dictionary cache directory")
                .default_value("./dictionaries")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("base_url")
                .long("base-url")
                .help("Base URL of the dictionary server")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("locale")
                .long("locale")
                .help("Message locale (en, uk)")
                .default_value("en")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("timeout_secs")
                .long("timeout-secs")
                .help("Timeout for index and metadata requests")
                .default_value("30")
                .global(true)
                .num_args(1),
        )
        .subcommand(list)
        .subcommand(download)
        .subcommand(delete)
        .subcommand(lookup)
        .subcommand(suggest)
        .subcommand(refresh)
        .subcommand(pack)
}

/// Stands in when no `--base-url` was given. Offline commands never call
/// it; a command that does reach the network gets a clear error.
struct OfflineRemote;

#[async_trait]
impl RemoteSource for OfflineRemote {
    async fn fetch_index(&self) -> Result<String, DictError> {
        Err(DictError::parse("no dictionary server configured; pass --base-url"))
    }

    async fn head_file(&self, _file: &str) -> Result<RemoteFileInfo, DictError> {
        Err(DictError::parse("no dictionary server configured; pass --base-url"))
    }

    async fn fetch_file(&self, _file: &str) -> Result<(RemoteFileInfo, ByteStream), DictError> {
        Err(DictError::parse("no dictionary server configured; pass --base-url"))
    }
}

fn make_engine(m: &ArgMatches) -> anyhow::Result<CompositeDictionary> {
    let cache_dir: PathBuf = m.get_one::<String>("cache_dir").unwrap().into();
    let timeout_secs: u64 = m.get_one::<String>("timeout_secs").unwrap().parse()?;

    let remote: Arc<dyn RemoteSource> = match m.get_one::<String>("base_url") {
        Some(raw) => Arc::new(HttpRemote::new(Url::parse(raw)?, USER_AGENT, timeout_secs)?),
        None => Arc::new(OfflineRemote),
    };
    Ok(CompositeDictionary::new(remote, EngineConfig::new(cache_dir)))
}

/// Posts a command and drains events until its terminal one arrives.
/// FIFO submission order means the next terminal event is always ours.
async fn run_to_terminal(
    engine: &CompositeDictionary,
    rx: &mut broadcast::Receiver<DictionaryEvent>,
    command: DictCommand,
) -> anyhow::Result<DictionaryEvent> {
    engine.post_command(command)?;
    loop {
        match rx.recv().await {
            Ok(evt) if evt.is_terminal() => return Ok(evt),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => {
                return Err(DictError::Closed.into());
            }
        }
    }
}

fn print_catalog(engine: &CompositeDictionary, msg: &Messages) {
    println!("{}:", msg.catalog_header);
    for d in engine.dictionaries() {
        let mut status = if d.is_available_offline {
            format!("{} {}", msg.status_offline, fmt_bytes(d.file_size_local))
        } else {
            msg.status_remote.to_string()
        };
        if d.has_update {
            status.push_str(&format!(", {}", msg.status_update));
        }
        let remote_size = if d.file_size_remote > 0 {
            fmt_bytes(d.file_size_remote)
        } else {
            msg.size_unknown.to_string()
        };
        println!("- {:12} {} [{status}] {} {}", d.name, d.display_name, remote_size, d.description);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    let (name, m) = matches.subcommand().expect("subcommand required");
    let msg = i18n::get_messages(i18n::Locale::from_str(m.get_one::<String>("locale").unwrap()));

    match name {
        "list" => {
            let engine = make_engine(m)?;
            let mut rx = engine.subscribe();
            check_ready(run_to_terminal(&engine, &mut rx, DictCommand::new(CommandName::Init)).await?, msg)?;
            if m.get_flag("remote") {
                let evt =
                    run_to_terminal(&engine, &mut rx, DictCommand::new(CommandName::HeadFiles)).await?;
                match evt {
                    DictionaryEvent::HeadFilesComplete { successful, total } if successful < total => {
                        eprintln!("[{}] head: {}/{}", msg.error_prefix, successful, total);
                    }
                    DictionaryEvent::Error { error, .. } => {
                        eprintln!("[{}] {}", msg.error_prefix, error);
                    }
                    _ => {}
                }
            }
            print_catalog(&engine, msg);
            engine.close();
        }
        "download" => {
            let id = m.get_one::<String>("id").unwrap().clone();
            let engine = make_engine(m)?;
            let mut rx = engine.subscribe();
            check_ready(run_to_terminal(&engine, &mut rx, DictCommand::new(CommandName::Init)).await?, msg)?;

            println!("{}: {}", msg.download_started, id);
            engine.post_command(DictCommand::with_argument(CommandName::DownloadDictionary, &id))?;

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::with_template(
                    "{prefix} {bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec})",
                )
                .unwrap(),
            );
            pb.set_prefix(format!("[{id}]"));

            loop {
                match rx.recv().await {
                    Ok(DictionaryEvent::DownloadProgress { bytes_downloaded, bytes_total, .. }) => {
                        if pb.length().unwrap_or(0) != bytes_total {
                            pb.set_length(bytes_total);
                        }
                        pb.set_position(bytes_downloaded.min(bytes_total));
                    }
                    Ok(DictionaryEvent::DownloadComplete { dictionary }) => {
                        pb.finish();
                        println!(
                            "{}: {} ({})",
                            msg.download_finished,
                            dictionary.name,
                            fmt_bytes(dictionary.file_size_local)
                        );
                        break;
                    }
                    Ok(DictionaryEvent::Error { error, .. }) => {
                        pb.abandon();
                        if error.is_cancelled() {
                            println!("{}: {}", msg.download_cancelled, id);
                            break;
                        }
                        anyhow::bail!("[{}] {}", msg.error_prefix, error);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            engine.close();
        }
        "delete" => {
            let id = m.get_one::<String>("id").unwrap().clone();
            let engine = make_engine(m)?;
            let mut rx = engine.subscribe();
            check_ready(run_to_terminal(&engine, &mut rx, DictCommand::new(CommandName::Init)).await?, msg)?;
            let evt = run_to_terminal(
                &engine,
                &mut rx,
                DictCommand::with_argument(CommandName::DeleteDictionary, &id),
            )
            .await?;
            match evt {
                DictionaryEvent::DictionaryDelete { dictionary } => {
                    println!("{}: {}", dictionary.name, msg.deleted);
                }
                DictionaryEvent::Error { error, .. } => {
                    anyhow::bail!("[{}] {}", msg.error_prefix, error);
                }
                _ => {}
            }
            engine.close();
        }
        "lookup" => {
            let word = m.get_one::<String>("word").unwrap().clone();
            let engine = make_engine(m)?;
            let mut rx = engine.subscribe();
            check_ready(run_to_terminal(&engine, &mut rx, DictCommand::new(CommandName::Init)).await?, msg)?;
            let evt = run_to_terminal(
                &engine,
                &mut rx,
                DictCommand::with_argument(CommandName::Lookup, &word),
            )
            .await?;
            if let DictionaryEvent::DictionaryLookup { results, .. } = evt {
                for r in results {
                    if r.is_found {
                        println!("[{}] {}", r.dictionary.display_name, r.word);
                        if let Some(def) = r.definition {
                            println!("{def}");
                        }
                    } else {
                        println!("[{}] {}: {}", r.dictionary.display_name, r.word, msg.not_found);
                    }
                }
            }
            engine.close();
        }
        "suggest" => {
            let prefix = m.get_one::<String>("prefix").unwrap().clone();
            let engine = make_engine(m)?;
            let mut rx = engine.subscribe();
            check_ready(run_to_terminal(&engine, &mut rx, DictCommand::new(CommandName::Init)).await?, msg)?;
            let evt = run_to_terminal(
                &engine,
                &mut rx,
                DictCommand::with_argument(CommandName::Suggest, &prefix),
            )
            .await?;
            if let DictionaryEvent::DictionarySuggest { results, .. } = evt {
                for r in results {
                    if r.suggestions.is_empty() {
                        println!("[{}] {}", r.dictionary.display_name, msg.no_suggestions);
                    } else {
                        println!("[{}] {}", r.dictionary.display_name, r.suggestions.join(", "));
                    }
                }
            }
            engine.close();
        }
        "refresh" => {
            let engine = make_engine(m)?;
            let mut rx = engine.subscribe();
            check_ready(
                run_to_terminal(&engine, &mut rx, DictCommand::new(CommandName::LoadOffline)).await?,
                msg,
            )?;
            run_to_terminal(&engine, &mut rx, DictCommand::new(CommandName::UpdateLocal)).await?;
            println!("{}", msg.cache_refreshed);
            print_catalog(&engine, msg);
            engine.close();
        }
        "pack" => {
            let id = m.get_one::<String>("id").unwrap();
            let input: PathBuf = m.get_one::<String>("input").unwrap().into();
            let cache_dir: PathBuf = m.get_one::<String>("cache_dir").unwrap().into();

            let text = std::fs::read_to_string(&input)?;
            let entries = pack::parse_entries(&text)?;
            pack::write_dictionary(&cache_dir, id, &entries)?;
            println!("{}: {} ({} {})", msg.pack_written, id, entries.len(), "entries");
        }
        _ => unreachable!(),
    }

    Ok(())
}

fn check_ready(evt: DictionaryEvent, msg: &Messages) -> anyhow::Result<()> {
    match evt {
        DictionaryEvent::AllDictionariesReady { .. } => Ok(()),
        DictionaryEvent::Error { error, .. } => {
            anyhow::bail!("[{}] {}", msg.error_prefix, error)
        }
        _ => Ok(()),
    }
}

fn fmt_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.2}GiB", f / GB)
    } else if f >= MB {
        format!("{:.2}MiB", f / MB)
    } else if f >= KB {
        format!("{:.2}KiB", f / KB)
    } else {
        format!("{}B", n)
    }
}
