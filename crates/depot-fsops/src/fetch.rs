//! Remote URL retrieval into a transient local file.

use std::io::{self, Read};
use std::path::Path;

use depot_config::FetchConfig;
use percent_encoding::percent_decode_str;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use tempfile::NamedTempFile;
use tracing::debug;
use url::Url;

use crate::error::{FsOpsError, FsOpsResult};

const FALLBACK_FILE_NAME: &str = "download";

/// Remote payload staged on local disk. Dropping it removes the staged file.
#[derive(Debug)]
pub struct FetchedFile {
    /// File name derived from the URL.
    pub file_name: String,
    /// Media type reported by the remote server.
    pub content_type: Option<String>,
    /// Staged payload.
    pub staged: NamedTempFile,
}

/// Retrieves remote content for URL-sourced writes.
pub trait RemoteFetcher: Send + Sync {
    /// Fetch `url` into a transient file under `staging_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is unusable, the transfer fails, or the
    /// payload exceeds the configured ceiling.
    fn fetch(&self, url: &str, staging_dir: &Path) -> FsOpsResult<FetchedFile>;
}

/// Blocking HTTP(S) fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    /// Build a fetcher honouring the configured timeout, user agent, and size ceiling.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::Fetch` when the HTTP client cannot be constructed.
    pub fn new(config: &FetchConfig) -> FsOpsResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| FsOpsError::Fetch {
                url: String::new(),
                source,
            })?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

/// Validate a fetch URL: absolute and http(s) only.
///
/// # Errors
///
/// Returns `FsOpsError::InvalidInput` for unparsable URLs or other schemes.
pub fn parse_fetch_url(raw: &str) -> FsOpsResult<Url> {
    let url = Url::parse(raw)
        .map_err(|_| FsOpsError::invalid("url", "unparsable", Some(raw.to_string())))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(FsOpsError::invalid(
            "url",
            "unsupported_scheme",
            Some(raw.to_string()),
        )),
    }
}

/// Last non-empty path segment of a URL, percent-decoded, or `download`.
#[must_use]
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .filter(|name| !matches!(name.as_str(), "." | "..") && !name.contains(['/', '\\']))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

impl RemoteFetcher for HttpFetcher {
    fn fetch(&self, url: &str, staging_dir: &Path) -> FsOpsResult<FetchedFile> {
        let parsed = parse_fetch_url(url)?;
        let fetch_error = |source| FsOpsError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(parsed.clone())
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(fetch_error)?;

        if response
            .content_length()
            .is_some_and(|length| length > self.max_bytes)
        {
            return Err(FsOpsError::FetchTooLarge {
                url: url.to_string(),
                limit: self.max_bytes,
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut staged = tempfile::Builder::new()
            .prefix("depot-fetch-")
            .tempfile_in(staging_dir)
            .map_err(|source| FsOpsError::io("fetch.stage", staging_dir, source))?;
        let mut limited = response.take(self.max_bytes.saturating_add(1));
        let copied = io::copy(&mut limited, &mut staged)
            .map_err(|source| FsOpsError::io("fetch.copy", staged.path(), source))?;
        if copied > self.max_bytes {
            return Err(FsOpsError::FetchTooLarge {
                url: url.to_string(),
                limit: self.max_bytes,
            });
        }

        let file_name = file_name_from_url(&parsed);
        debug!(url, file_name = %file_name, bytes = copied, "remote payload staged");
        Ok(FetchedFile {
            file_name,
            content_type,
            staged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn file_name_comes_from_last_segment() -> TestResult<()> {
        assert_eq!(
            file_name_from_url(&parse_fetch_url("https://cdn.test/pkg/bundle.zip?v=2")?),
            "bundle.zip"
        );
        assert_eq!(file_name_from_url(&parse_fetch_url("http://cdn.test/dir/")?), "dir");
        assert_eq!(file_name_from_url(&parse_fetch_url("http://cdn.test")?), "download");
        Ok(())
    }

    #[test]
    fn file_name_is_percent_decoded() -> TestResult<()> {
        assert_eq!(
            file_name_from_url(&parse_fetch_url("https://cdn.test/docs/my%20report.csv")?),
            "my report.csv"
        );
        assert_eq!(
            file_name_from_url(&parse_fetch_url("https://cdn.test/a%2Fb.txt")?),
            "download"
        );
        Ok(())
    }

    #[test]
    fn non_http_urls_are_rejected() {
        assert!(matches!(
            parse_fetch_url("file:///etc/passwd"),
            Err(FsOpsError::InvalidInput { reason: "unsupported_scheme", .. })
        ));
        assert!(matches!(
            parse_fetch_url("not a url"),
            Err(FsOpsError::InvalidInput { reason: "unparsable", .. })
        ));
    }

    #[test]
    fn fetcher_builds_from_config() -> TestResult<()> {
        let fetcher = HttpFetcher::new(&FetchConfig::default())?;
        assert_eq!(fetcher.max_bytes, FetchConfig::default().max_bytes);
        Ok(())
    }
}
