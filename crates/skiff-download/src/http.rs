//! HTTP transfer session backed by reqwest

use futures_util::StreamExt;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use url::Url;

use crate::error::DownloadError;
use crate::session::{Completion, ResponseMetadata, TransferSession};
use crate::Result;

/// Streams the body of an already received response to disk.
pub struct HttpTransferSession {
    response: Mutex<Option<reqwest::Response>>,
    /// `true` once cancelled
    control: watch::Sender<bool>,
}

impl HttpTransferSession {
    pub fn new(response: reqwest::Response) -> Self {
        let (control, _) = watch::channel(false);
        Self {
            response: Mutex::new(Some(response)),
            control,
        }
    }

    /// GET `url` and return its metadata together with a session that
    /// will write the body once started.
    pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<(ResponseMetadata, Self)> {
        let parsed =
            Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{url}: {e}")))?;

        let response = client.get(parsed.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Transfer(format!("HTTP {status}")));
        }

        let headers = response.headers();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let suggested_filename = headers
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .or_else(|| filename_from_url(response.url()));

        let metadata = ResponseMetadata {
            content_type,
            suggested_filename,
            source: Some(parsed.to_string()),
            expected_size: response.content_length(),
        };

        tracing::debug!(url = %parsed, status = %status, "Fetched download response");

        Ok((metadata, Self::new(response)))
    }
}

impl TransferSession for HttpTransferSession {
    fn start(&self, destination: PathBuf, completion: Completion) {
        let Some(response) = self.response.lock().take() else {
            completion.fail(DownloadError::Transfer(
                "response body already consumed".to_string(),
            ));
            return;
        };

        let control = self.control.subscribe();
        tokio::spawn(async move {
            let outcome = write_body(response, &destination, control)
                .await
                .map(|_| destination);
            completion.finish(outcome);
        });
    }

    fn cancel(&self) {
        self.control.send_replace(true);
    }
}

async fn write_body(
    response: reqwest::Response,
    destination: &Path,
    mut control: watch::Receiver<bool>,
) -> Result<u64> {
    if *control.borrow_and_update() {
        return Err(DownloadError::Cancelled);
    }

    let mut file = tokio::fs::File::create(destination).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        tokio::select! {
            changed = control.changed() => {
                // A dropped session cannot be resumed either
                if changed.is_err() || *control.borrow() {
                    return Err(DownloadError::Cancelled);
                }
            }
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes).await?;
                        written = written.saturating_add(bytes.len() as u64);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }
        }
    }

    file.flush().await?;
    Ok(written)
}

/// Last non-empty path segment, percent-decoded
pub(crate) fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}

/// `filename*=UTF-8''...` wins over `filename="..."`
fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;

    for part in value.split(';').map(str::trim) {
        let Some((key, val)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = val.trim().splitn(3, '\'').nth(2);
                if let Some(decoded) = encoded.and_then(|e| urlencoding::decode(e).ok()) {
                    if !decoded.is_empty() {
                        return Some(decoded.into_owned());
                    }
                }
            }
            "filename" => plain = Some(val.trim().trim_matches('"').to_string()),
            _ => {}
        }
    }

    plain.filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_plain() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"report.pdf\""),
            Some("report.pdf".to_string())
        );
        assert_eq!(
            filename_from_content_disposition("attachment; filename=data.csv"),
            Some("data.csv".to_string())
        );
        assert_eq!(filename_from_content_disposition("inline"), None);
        assert_eq!(filename_from_content_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_content_disposition_prefers_extended() {
        assert_eq!(
            filename_from_content_disposition(
                "attachment; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve%20file.txt"
            ),
            Some("naïve file.txt".to_string())
        );
    }

    #[test]
    fn test_filename_from_url() {
        let url = Url::parse("https://example.com/a/b%20c.zip?token=1").unwrap();
        assert_eq!(filename_from_url(&url), Some("b c.zip".to_string()));

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&url), None);
    }
}
