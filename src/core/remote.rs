use crate::core::error::DictError;
use crate::core::model::RemoteFileInfo;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderValue, CONTENT_LENGTH, LAST_MODIFIED, USER_AGENT};
use std::time::{Duration, SystemTime};
use url::Url;

/// File name of the dictionary catalog, both on the server and in the
/// local cache directory.
pub const INDEX_FILE: &str = "index.txt";

/// One line of the catalog: `id<TAB>display name<TAB>description`,
/// later fields optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub name: String,
    pub display_name: String,
    pub description: String,
}

/// Parses the catalog text. Blank lines and `#` comments are skipped.
/// An id that is empty or would escape the cache directory is a parse error.
pub fn parse_index(text: &str) -> Result<Vec<IndexRecord>, DictError> {
    let mut records = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split('\t');
        let name = fields.next().unwrap_or("").trim();

        if name.is_empty() {
            return Err(DictError::parse(format!("line {}: empty dictionary id", lineno + 1)));
        }
        if sanitize_filename::sanitize(name) != name {
            return Err(DictError::parse(format!(
                "line {}: dictionary id {:?} is not a valid file name",
                lineno + 1,
                name
            )));
        }

        let display_name = fields.next().map(str::trim).filter(|s| !s.is_empty());
        let description = fields.next().map(str::trim).unwrap_or("");

        records.push(IndexRecord {
            name: name.to_string(),
            display_name: display_name.unwrap_or(name).to_string(),
            description: description.to_string(),
        });
    }

    Ok(records)
}

pub type ByteStream = BoxStream<'static, Result<Bytes, DictError>>;

/// Seam between the engine and the dictionary server. The engine only needs
/// the catalog, cheap per-file metadata, and a byte stream per file; tests
/// substitute an in-memory implementation.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetches the raw catalog text.
    async fn fetch_index(&self) -> Result<String, DictError>;

    /// Metadata-only request; must not transfer file content.
    async fn head_file(&self, file: &str) -> Result<RemoteFileInfo, DictError>;

    /// Opens a content stream for one file.
    async fn fetch_file(&self, file: &str) -> Result<(RemoteFileInfo, ByteStream), DictError>;
}

/// Dictionary server client over plain HTTP(S): the catalog lives at
/// `{base}/index.txt` and each artifact at `{base}/<file>`.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
    user_agent: String,
    timeout: Duration,
}

impl HttpRemote {
    pub fn new(base_url: Url, user_agent: &str, timeout_secs: u64) -> Result<Self, DictError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        // Url::join drops the last path segment unless the base ends in '/'.
        let base_url = if base_url.path().ends_with('/') {
            base_url
        } else {
            let mut u = base_url;
            u.set_path(&format!("{}/", u.path()));
            u
        };

        Ok(Self {
            client,
            base_url,
            user_agent: user_agent.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn file_url(&self, file: &str) -> Result<Url, DictError> {
        self.base_url
            .join(file)
            .map_err(|e| DictError::parse(format!("bad file url {:?}: {}", file, e)))
    }

    fn user_agent_value(&self) -> Result<HeaderValue, DictError> {
        HeaderValue::from_str(&self.user_agent)
            .map_err(|e| DictError::parse(format!("bad user agent: {}", e)))
    }

    fn file_info(resp: &reqwest::Response) -> RemoteFileInfo {
        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let last_modified = resp
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| chrono::DateTime::parse_from_rfc2822(s).ok())
            .and_then(|dt| {
                let secs = dt.timestamp();
                if secs >= 0 {
                    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs as u64))
                } else {
                    None
                }
            });

        RemoteFileInfo { size, last_modified }
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn fetch_index(&self) -> Result<String, DictError> {
        let url = self.file_url(INDEX_FILE)?;
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent_value()?)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.text().await?)
    }

    async fn head_file(&self, file: &str) -> Result<RemoteFileInfo, DictError> {
        let url = self.file_url(file)?;
        let resp = self
            .client
            .head(url)
            .header(USER_AGENT, self.user_agent_value()?)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        Ok(Self::file_info(&resp))
    }

    async fn fetch_file(&self, file: &str) -> Result<(RemoteFileInfo, ByteStream), DictError> {
        let url = self.file_url(file)?;
        // No per-request timeout here: it would cap the whole transfer, not
        // one read. Hung transfers block the worker by design (see close()).
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent_value()?)
            .send()
            .await?
            .error_for_status()?;

        let info = Self::file_info(&resp);
        let stream = resp.bytes_stream().map(|r| r.map_err(DictError::from)).boxed();

        Ok((info, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_index_full_lines() {
        let text = "en\tEnglish\tEnglish explanatory dictionary\nuk\tUkrainian\tUkrainian-English\n";
        let records = parse_index(text).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "en");
        assert_eq!(records[0].display_name, "English");
        assert_eq!(records[0].description, "English explanatory dictionary");
        assert_eq!(records[1].name, "uk");
    }

    #[test]
    fn parse_index_minimal_lines_and_comments() {
        let text = "# catalog\n\nfr\n  de \tGerman\n";
        let records = parse_index(text).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "fr");
        assert_eq!(records[0].display_name, "fr");
        assert_eq!(records[0].description, "");
        assert_eq!(records[1].name, "de");
        assert_eq!(records[1].display_name, "German");
    }

    #[test]
    fn parse_index_rejects_path_like_ids() {
        let err = parse_index("../evil\tEvil\n").unwrap_err();
        assert!(matches!(err, DictError::Parse { .. }));
    }

    #[test]
    fn parse_index_empty_text_is_empty_catalog() {
        assert!(parse_index("").unwrap().is_empty());
        assert!(parse_index("\n# nothing\n").unwrap().is_empty());
    }
}
