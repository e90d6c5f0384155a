use md5::{Digest, Md5};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Reader adapter that measures what flows through it.
///
/// It counts bytes and computes their MD5, and fails the read once more than
/// `limit` bytes went through.
pub struct Preprocessor<R> {
    inner: R,
    hasher: Md5,
    size: u64,
    limit: u64,
    exceeded: bool,
}

impl<R> Preprocessor<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
            size: 0,
            limit,
            exceeded: false,
        }
    }

    pub fn exceeded(&self) -> bool {
        self.exceeded
    }

    /// Bytes read so far and the hex MD5 of them.
    pub fn finish(self) -> (u64, String) {
        (self.size, hex::encode(self.hasher.finalize()))
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Preprocessor<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.exceeded {
            return Poll::Ready(Err(too_big(this.limit)));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let chunk = &buf.filled()[before..];

        this.size += chunk.len() as u64;
        if this.size > this.limit {
            this.exceeded = true;
            return Poll::Ready(Err(too_big(this.limit)));
        }
        this.hasher.update(chunk);
        Poll::Ready(Ok(()))
    }
}

fn too_big(limit: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("file too big (limit is set to {limit} bytes)"),
    )
}
