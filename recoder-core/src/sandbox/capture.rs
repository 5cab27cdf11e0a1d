//! Bounded collection of child process output.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Something that consumes raw output chunks as they arrive
pub(crate) trait Sink {
    fn accept(&mut self, chunk: &[u8]);
}

/// Keeps the first `limit` bytes and counts the rest
#[derive(Debug)]
pub(crate) struct Bounded {
    buf: Vec<u8>,
    limit: usize,
    truncated: usize,
}

impl Bounded {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: 0,
        }
    }

    pub fn truncated(&self) -> usize {
        self.truncated
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

impl Sink for Bounded {
    fn accept(&mut self, chunk: &[u8]) {
        let take = self.limit.saturating_sub(self.buf.len()).min(chunk.len());
        self.buf.extend_from_slice(&chunk[..take]);
        self.truncated += chunk.len() - take;
    }
}

/// Feed `reader` into `sink` until EOF.
///
/// Data already accepted stays in the sink if this future is dropped early.
pub(crate) async fn drain<R, S>(mut reader: R, sink: &mut S) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    S: Sink,
{
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        sink.accept(&chunk[..n]);
    }
}
