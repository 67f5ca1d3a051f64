use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use tracing::{debug, warn};

use super::ReadAt;
use anyhow::{Result, bail};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote source served over HTTP(S) Range requests.
///
/// The length comes from `Content-Length` on the initial HEAD request. Servers
/// that omit it are still usable; the stream buffer then finds the end from
/// the first short response.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: Option<u64>,
    max_retry: u32,
    backoff: Duration,
}

/// Outcome of a single ranged GET.
enum RangeReply {
    Body(Vec<u8>),
    /// 416: the range starts at or past the end
    PastEnd,
}

impl HttpRangeReader {
    /// Open `url`, checking that the server accepts byte ranges.
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let resp = client.head(&url).send().await?;
        if !resp.status().is_success() {
            bail!("HEAD {} failed with status {}", url, resp.status());
        }

        let headers = resp.headers();
        let ranges_ok = headers
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));
        if !ranges_ok {
            bail!("{} does not accept byte ranges", url);
        }

        let size = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        debug!(url = %url, size = ?size, "opened HTTP range source");

        Ok(Self {
            client,
            url,
            size,
            max_retry: 10,
            backoff: Duration::from_millis(500),
        })
    }

    /// Retry connection failures up to `max_retry` times, sleeping
    /// `backoff * attempt` between tries.
    pub fn with_retry(mut self, max_retry: u32, backoff: Duration) -> Self {
        self.max_retry = max_retry.max(1);
        self.backoff = backoff;
        self
    }

    async fn get_range(&self, first: u64, last: u64) -> Result<RangeReply> {
        let range = format!("bytes={}-{}", first, last);
        let mut attempt = 0;
        loop {
            match self
                .client
                .get(&self.url)
                .header(header::RANGE, &range)
                .send()
                .await
            {
                Ok(resp) => {
                    return match resp.status() {
                        StatusCode::PARTIAL_CONTENT => Ok(RangeReply::Body(resp.bytes().await?.to_vec())),
                        StatusCode::RANGE_NOT_SATISFIABLE => Ok(RangeReply::PastEnd),
                        status => bail!("GET {} ({}) failed with status {}", self.url, range, status),
                    };
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    attempt += 1;
                    if attempt >= self.max_retry {
                        bail!("GET {} ({}): giving up after {} attempts: {}", self.url, range, attempt, e);
                    }
                    warn!(range = %range, attempt, max_retry = self.max_retry, error = %e, "connection error, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let limit = match self.size {
            Some(size) if offset >= size => return Ok(0),
            Some(size) => buf.len().min((size - offset) as usize),
            None => buf.len(),
        };
        if limit == 0 {
            return Ok(0);
        }

        let mut received = 0;
        while received < limit {
            let first = offset + received as u64;
            let last = offset + limit as u64 - 1;
            let body = match self.get_range(first, last).await? {
                RangeReply::Body(body) if !body.is_empty() => body,
                _ => break,
            };

            let n = body.len().min(limit - received);
            buf[received..received + n].copy_from_slice(&body[..n]);
            received += n;

            // A short reply to an open-ended request marks the end
            if self.size.is_none() && (n as u64) < last - first + 1 {
                break;
            }
        }

        Ok(received)
    }

    fn size(&self) -> Option<u64> {
        self.size
    }
}
