use std::io;

use bytes::{BufMut, BytesMut};

/// `io::Write` over a `BytesMut`, so `write!` can format straight into the buffer.
pub(crate) struct BytesWriter<'a>(pub(crate) &'a mut BytesMut);

impl io::Write for BytesWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
