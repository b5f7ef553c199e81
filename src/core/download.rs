use crate::core::cache;
use crate::core::error::DictError;
use crate::core::remote::RemoteSource;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Progress callbacks are coalesced to at most one per this many bytes
/// (plus the mandatory 0% and 100% reports).
const PROGRESS_STEP: u64 = 64 * 1024;

/// Streams both artifacts for `name` into the cache directory.
///
/// Everything is written to `*.partial` paths first; the final names only
/// appear after both streams completed, so a crash, failure or cancellation
/// never leaves a torn artifact behind. Returns the total bytes transferred.
///
/// `progress(bytes_downloaded, bytes_total)` reports cumulative bytes across
/// both files; `bytes_total` is 0 while unknown.
pub async fn download_dictionary(
    remote: &dyn RemoteSource,
    cache_dir: &Path,
    name: &str,
    cancel: &CancellationToken,
    progress: &mut (dyn FnMut(u64, u64) + Send),
) -> Result<u64, DictError> {
    tokio::fs::create_dir_all(cache_dir).await?;

    let targets = [cache::wap_path(cache_dir, name), cache::idx_path(cache_dir, name)];
    let partials: Vec<PathBuf> = targets.iter().map(|p| cache::partial_path(p)).collect();
    let files = [
        format!("{}.{}", name, cache::WAP_EXT),
        format!("{}.{}", name, cache::IDX_EXT),
    ];

    // Cheap metadata pass so progress can report a combined total up front.
    // A failed HEAD only downgrades reporting, not the transfer itself.
    let mut total = 0u64;
    for file in &files {
        match remote.head_file(file).await {
            Ok(info) => total += info.size.unwrap_or(0),
            Err(err) => {
                tracing::debug!(file, error = %err, "head before download failed");
                total = 0;
                break;
            }
        }
    }

    let mut downloaded = 0u64;
    let mut last_reported = 0u64;
    progress(0, total);

    let result = async {
        for (file, partial) in files.iter().zip(&partials) {
            let (info, mut stream) = remote.fetch_file(file).await?;
            let mut out = tokio::fs::File::create(partial).await?;
            let mut written = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(DictError::Cancelled { name: name.to_string() });
                    }
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            out.write_all(&bytes).await?;
                            written += bytes.len() as u64;
                            downloaded += bytes.len() as u64;
                            if downloaded - last_reported >= PROGRESS_STEP {
                                last_reported = downloaded;
                                progress(downloaded, total);
                            }
                        }
                        Some(Err(err)) => return Err(err),
                        None => break,
                    }
                }
            }

            out.flush().await?;
            drop(out);

            if let Some(expected) = info.size {
                if written != expected {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("{}: got {} of {} bytes", file, written, expected),
                    )
                    .into());
                }
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        for partial in &partials {
            if let Err(rm) = cache::remove_if_exists(partial) {
                tracing::warn!(path = %partial.display(), error = %rm, "failed to drop partial");
            }
        }
        return Err(err);
    }

    // Both streams are complete; only now do the final names appear.
    for (partial, target) in partials.iter().zip(&targets) {
        tokio::fs::rename(partial, target).await?;
    }

    progress(downloaded, total);
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::RemoteFileInfo;
    use crate::core::remote::{ByteStream, RemoteSource};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;

    struct MemRemote {
        files: HashMap<String, Vec<u8>>,
        /// Claim more bytes than are actually streamed.
        lie_about_size: bool,
    }

    impl MemRemote {
        fn new(files: &[(&str, &[u8])]) -> Self {
            Self {
                files: files.iter().map(|(n, b)| (n.to_string(), b.to_vec())).collect(),
                lie_about_size: false,
            }
        }
    }

    #[async_trait]
    impl RemoteSource for MemRemote {
        async fn fetch_index(&self) -> Result<String, DictError> {
            unimplemented!("not needed here")
        }

        async fn head_file(&self, file: &str) -> Result<RemoteFileInfo, DictError> {
            let data = self
                .files
                .get(file)
                .ok_or_else(|| DictError::NotFound { name: file.to_string() })?;
            Ok(RemoteFileInfo { size: Some(data.len() as u64), last_modified: None })
        }

        async fn fetch_file(&self, file: &str) -> Result<(RemoteFileInfo, ByteStream), DictError> {
            let data = self
                .files
                .get(file)
                .ok_or_else(|| DictError::NotFound { name: file.to_string() })?;
            let size = if self.lie_about_size { data.len() as u64 + 7 } else { data.len() as u64 };
            let chunks: Vec<Result<Bytes, DictError>> =
                data.chunks(3).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
            Ok((
                RemoteFileInfo { size: Some(size), last_modified: None },
                futures::stream::iter(chunks).boxed(),
            ))
        }
    }

    #[tokio::test]
    async fn success_renames_partials_into_place() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = MemRemote::new(&[("uk.wap", b"wap-data"), ("uk.idx", b"idx!")]);
        let cancel = CancellationToken::new();

        let mut reports = Vec::new();
        let n = download_dictionary(&remote, tmp.path(), "uk", &cancel, &mut |d, t| {
            reports.push((d, t))
        })
        .await
        .unwrap();

        assert_eq!(n, 12);
        assert_eq!(std::fs::read(tmp.path().join("uk.wap")).unwrap(), b"wap-data");
        assert_eq!(std::fs::read(tmp.path().join("uk.idx")).unwrap(), b"idx!");
        assert!(!tmp.path().join("uk.wap.partial").exists());

        assert_eq!(reports.first(), Some(&(0, 12)));
        assert_eq!(reports.last(), Some(&(12, 12)));
    }

    #[tokio::test]
    async fn cancellation_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = MemRemote::new(&[("uk.wap", b"wap-data"), ("uk.idx", b"idx!")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = download_dictionary(&remote, tmp.path(), "uk", &cancel, &mut |_, _| {})
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn short_stream_is_an_error_and_drops_partials() {
        let tmp = tempfile::tempdir().unwrap();
        let mut remote = MemRemote::new(&[("uk.wap", b"wap-data"), ("uk.idx", b"idx!")]);
        remote.lie_about_size = true;
        let cancel = CancellationToken::new();

        let err = download_dictionary(&remote, tmp.path(), "uk", &cancel, &mut |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, DictError::Io(_)));
        assert!(!tmp.path().join("uk.wap").exists());
        assert!(!tmp.path().join("uk.wap.partial").exists());
    }

    #[tokio::test]
    async fn missing_remote_file_surfaces_typed_error() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = MemRemote::new(&[("uk.wap", b"wap-data")]);
        let cancel = CancellationToken::new();

        let err = download_dictionary(&remote, tmp.path(), "uk", &cancel, &mut |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, DictError::NotFound { .. }));
    }
}
