//! An append-only, chunked in-memory byte stream (FORMATNOTE, section 4.4).
//!
//! Plaintext and ciphertext payloads are staged here before being framed
//! into (or parsed out of) a MAUS/MAUZ container. Using fixed-size chunks
//! instead of one contiguous `Vec<u8>` avoids the repeated reallocation and
//! copying a naive `Vec::extend` would incur as large archives grow (see
//! `DESIGN.md`, "buffer stream vs. `oval::Buffer`").

use std::io::{self, Write};

/// Size of each chunk. Chosen to comfortably hold a handful of MAUS headers
/// or a filesystem block's worth of payload without being so small that
/// bookkeeping overhead dominates.
const CHUNK_SIZE: usize = 64 * 1024;

/// An append-only sequence of fixed-size chunks, with a single sequential
/// read cursor, a one-shot prepend operation, and a `copy_into` drain.
#[derive(Debug, Default, Clone)]
pub struct BufferStream {
    chunks: Vec<Vec<u8>>,
    len: usize,
    read_chunk: usize,
    read_pos: usize,
}

impl BufferStream {
    /// Creates an empty buffer stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of bytes ever appended (prepend included).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes have been appended.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends bytes to the end of the stream, splitting across
    /// `CHUNK_SIZE`-sized chunks as needed.
    pub fn append(&mut self, mut bytes: &[u8]) {
        self.len += bytes.len();
        while !bytes.is_empty() {
            let needs_new_chunk = match self.chunks.last() {
                Some(chunk) => chunk.len() >= CHUNK_SIZE,
                None => true,
            };
            if needs_new_chunk {
                self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
            }
            let chunk = self.chunks.last_mut().unwrap();
            let space = CHUNK_SIZE - chunk.len();
            let take = space.min(bytes.len());
            chunk.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
        }
    }

    /// Resets the read cursor to the start of the stream, without discarding
    /// any data (FORMATNOTE, section 4.4: "reset-to-start").
    pub fn rewind(&mut self) {
        self.read_chunk = 0;
        self.read_pos = 0;
    }

    /// Reads up to `out.len()` bytes sequentially, advancing the read
    /// cursor. Returns the number of bytes actually read (`0` at end of
    /// stream).
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() && self.read_chunk < self.chunks.len() {
            let chunk = &self.chunks[self.read_chunk];
            let available = chunk.len() - self.read_pos;
            if available == 0 {
                self.read_chunk += 1;
                self.read_pos = 0;
                continue;
            }
            let take = available.min(out.len() - written);
            out[written..written + take]
                .copy_from_slice(&chunk[self.read_pos..self.read_pos + take]);
            self.read_pos += take;
            written += take;
        }
        written
    }

    /// Prepends `other` in front of this stream's existing chunks.
    ///
    /// Used to splice the encrypted-options block in front of the
    /// already-buffered payload at finalization time (FORMATNOTE, section 4.4). Must be
    /// called before any reads have advanced the cursor past the start;
    /// this is the "one-shot" part of the contract.
    pub fn prepend(&mut self, other: BufferStream) {
        debug_assert_eq!(self.read_chunk, 0);
        debug_assert_eq!(self.read_pos, 0);
        let mut chunks = other.chunks;
        chunks.append(&mut self.chunks);
        self.chunks = chunks;
        self.len += other.len;
    }

    /// Copies all remaining (unread) bytes into `sink`.
    ///
    /// `leave_open` mirrors the container-level "leave the underlying
    /// stream open" contract (FORMATNOTE, section 6): it only affects whether the method
    /// attempts a final `flush`, since this type owns no file descriptor of
    /// its own.
    pub fn copy_into<W: Write>(&mut self, sink: &mut W, leave_open: bool) -> io::Result<u64> {
        let mut total = 0u64;
        while self.read_chunk < self.chunks.len() {
            let chunk = &self.chunks[self.read_chunk];
            let slice = &chunk[self.read_pos..];
            if !slice.is_empty() {
                sink.write_all(slice)?;
                total += slice.len() as u64;
            }
            self.read_chunk += 1;
            self.read_pos = 0;
        }
        if !leave_open {
            sink.flush()?;
        }
        Ok(total)
    }

    /// Collects the whole stream (from the current read position onward)
    /// into a single owned `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        let remaining = self.len.saturating_sub(self.consumed());
        let mut out = Vec::with_capacity(remaining);
        if self.read_chunk < self.chunks.len() {
            out.extend_from_slice(&self.chunks[self.read_chunk][self.read_pos..]);
            for chunk in &self.chunks[self.read_chunk + 1..] {
                out.extend_from_slice(chunk);
            }
        }
        out
    }

    fn consumed(&self) -> usize {
        self.chunks[..self.read_chunk.min(self.chunks.len())]
            .iter()
            .map(Vec::len)
            .sum::<usize>()
            + self.read_pos
    }
}

impl From<Vec<u8>> for BufferStream {
    fn from(bytes: Vec<u8>) -> Self {
        let mut stream = Self::new();
        stream.append(&bytes);
        stream
    }
}

impl Write for BufferStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_across_chunks() {
        let mut buf = BufferStream::new();
        let data = vec![7u8; CHUNK_SIZE * 2 + 10];
        buf.append(&data);
        assert_eq!(buf.len(), data.len());
        assert_eq!(buf.to_vec(), data);
    }

    #[test]
    fn rewind_allows_rereading() {
        let mut buf = BufferStream::new();
        buf.append(b"hello");
        let mut out = [0u8; 5];
        assert_eq!(buf.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(buf.read(&mut out), 0);
        buf.rewind();
        assert_eq!(buf.read(&mut out), 5);
    }

    #[test]
    fn prepend_splices_in_front() {
        let mut head = BufferStream::new();
        head.append(b"HEAD");
        let mut body = BufferStream::new();
        body.append(b"BODY");
        body.prepend(head);
        assert_eq!(body.to_vec(), b"HEADBODY");
    }

    #[test]
    fn copy_into_drains_remaining_bytes() {
        let mut buf = BufferStream::new();
        buf.append(b"abcdef");
        let mut out = [0u8; 3];
        buf.read(&mut out);
        let mut sink = Vec::new();
        buf.copy_into(&mut sink, true).unwrap();
        assert_eq!(sink, b"def");
    }
}
