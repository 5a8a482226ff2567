use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{info, trace};

const PREVIEW_LEN: usize = 64;

pin_project! {
    /// Transport wrapper that logs every read and write when enabled.
    #[derive(Debug)]
    pub struct Wiretap<IO> {
        #[pin]
        inner: IO,
        connection_id: u64,
        enabled: bool,
    }
}

impl<IO> Wiretap<IO> {
    pub fn new(inner: IO, connection_id: u64, enabled: bool) -> Self {
        Self { inner, connection_id, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get_ref(&self) -> &IO {
        &self.inner
    }

    pub fn into_inner(self) -> IO {
        self.inner
    }
}

fn preview(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_LEN)];
    let mut text = String::from_utf8_lossy(shown).escape_debug().to_string();
    if bytes.len() > PREVIEW_LEN {
        text.push_str("...");
    }
    text
}

impl<IO: AsyncRead> AsyncRead for Wiretap<IO> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let result = this.inner.poll_read(cx, buf);
        if *this.enabled {
            if let Poll::Ready(Ok(())) = &result {
                let read = &buf.filled()[before..];
                if read.is_empty() {
                    info!(connection_id = *this.connection_id, "READ EOF");
                } else {
                    info!(connection_id = *this.connection_id, bytes = read.len(), "READ");
                    trace!(connection_id = *this.connection_id, data = %preview(read), "READ");
                }
            }
        }
        result
    }
}

impl<IO: AsyncWrite> AsyncWrite for Wiretap<IO> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        let result = this.inner.poll_write(cx, buf);
        if *this.enabled {
            if let Poll::Ready(Ok(written)) = &result {
                info!(connection_id = *this.connection_id, bytes = *written, "WRITE");
                trace!(connection_id = *this.connection_id, data = %preview(&buf[..*written]), "WRITE");
            }
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.enabled {
            info!(connection_id = *this.connection_id, "CLOSE");
        }
        this.inner.poll_shutdown(cx)
    }
}
