// Retrying HTTPS GET primitive shared by the release check and both image
// downloads.

use std::time::Duration;

use thiserror::Error;

/// Transport-level failure: DNS, TLS handshake, connection refused/reset.
/// Deliberately a single class; it is the only retryable failure.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// An in-flight HTTP response body. Owned by the caller, read to completion
/// in chunks.
pub trait HttpBody {
    fn status(&self) -> u16;
    fn content_length(&self) -> Option<u64>;
    /// Read the next chunk. Returning 0 before the declared content length
    /// has been consumed means the stream was cut short.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Opens one HTTPS GET per call with the given per-request timeout, following
/// redirects strictly. Implementations add the fixed `Accept`/`User-Agent`
/// headers and the TLS trust configuration.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<Box<dyn HttpBody>, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection-level failure that survived all retry attempts.
    #[error("Connection failed (WiFi/DNS/TLS)")]
    Connection,
    /// Non-200 status. Never retried.
    #[error("HTTP {0}")]
    Http(u16),
    #[error("Invalid releases API response")]
    MalformedResponse,
    #[error("Release missing tag or firmware.bin")]
    IncompleteRelease,
}

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// GET `url`, retrying connection-class failures up to 3 attempts with linear
/// backoff. A response with a non-200 status fails immediately.
pub fn get_with_retry(
    transport: &dyn Transport,
    url: &str,
    timeout: Duration,
) -> Result<Box<dyn HttpBody>, FetchError> {
    for attempt in 1..=MAX_ATTEMPTS {
        match transport.get(url, timeout) {
            Ok(body) => {
                let status = body.status();
                if status == 200 {
                    return Ok(body);
                }
                return Err(FetchError::Http(status));
            }
            Err(e) => {
                log::warn!("GET {} attempt {}/{} failed: {}", url, attempt, MAX_ATTEMPTS, e);
                if attempt < MAX_ATTEMPTS {
                    std::thread::sleep(RETRY_DELAY * attempt);
                }
            }
        }
    }
    Err(FetchError::Connection)
}

/// Drain a response body into memory (release metadata only; images are
/// streamed straight to flash instead).
pub fn read_to_vec(body: &mut dyn HttpBody) -> Result<Vec<u8>, FetchError> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = body.read(&mut buf).map_err(|_| FetchError::Connection)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}
