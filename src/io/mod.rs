mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for random access reading from a (possibly remote) data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read; a return of zero means the offset
    /// is at or past the end of the source.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Total size of the data source, if the transport reports one
    fn size(&self) -> Option<u64>;

    /// Release the underlying session
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Check whether a URI should be served over HTTP Range requests
pub fn is_http_url(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Open a source for the given URI.
///
/// `http://` and `https://` URIs are read through [`HttpRangeReader`];
/// `file://` URIs and plain paths through [`LocalFileReader`].
pub async fn open_source(uri: &str) -> Result<Arc<dyn ReadAt>> {
    if is_http_url(uri) {
        let reader = HttpRangeReader::new(uri.to_string()).await?;
        return Ok(Arc::new(reader));
    }

    let path = uri.strip_prefix("file://").unwrap_or(uri);
    Ok(Arc::new(LocalFileReader::new(Path::new(path))?))
}

/// Fill `buf` from `offset`, issuing further reads after short ones.
///
/// Stops early only when the source reports end of data, so the returned
/// count is shorter than `buf` exactly at end of source.
pub async fn read_full(source: &dyn ReadAt, offset: u64, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read_at(offset + filled as u64, &mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Returns at most three bytes per call
    struct Trickle(Vec<u8>);

    #[async_trait]
    impl ReadAt for Trickle {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let start = (offset as usize).min(self.0.len());
            let n = buf.len().min(3).min(self.0.len() - start);
            buf[..n].copy_from_slice(&self.0[start..start + n]);
            Ok(n)
        }

        fn size(&self) -> Option<u64> {
            Some(self.0.len() as u64)
        }
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("http://example.com/a"));
        assert!(is_http_url("https://example.com/a"));
        assert!(!is_http_url("file:///tmp/a"));
        assert!(!is_http_url("/tmp/a"));
    }

    #[tokio::test]
    async fn test_read_full_joins_short_reads() {
        let source = Trickle((0u8..20).collect());
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&source, 4, &mut buf).await.unwrap(), 8);
        assert_eq!(buf, [4, 5, 6, 7, 8, 9, 10, 11]);

        let mut tail = [0u8; 8];
        assert_eq!(read_full(&source, 15, &mut tail).await.unwrap(), 5);
        assert_eq!(&tail[..5], &[15, 16, 17, 18, 19]);
    }

    #[tokio::test]
    async fn test_open_source_plain_path_and_file_uri() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello stream").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let source = open_source(&path).await.unwrap();
        assert_eq!(source.size(), Some(12));

        let source = open_source(&format!("file://{}", path)).await.unwrap();
        let mut buf = [0u8; 6];
        assert_eq!(source.read_at(6, &mut buf).await.unwrap(), 6);
        assert_eq!(&buf, b"stream");
    }

    #[tokio::test]
    async fn test_open_source_missing_file() {
        assert!(open_source("/definitely/not/here.bin").await.is_err());
    }
}
