//! Moving bytes through the pipes: the payload in, the captured streams out

use std::io::{self, Read, Write};

/// Bytes requested per read.
pub const CHUNK_SIZE: usize = 1024;

/// Read `reader` to end-of-stream.
///
/// Returns `None` when the peer closed without writing a single byte, which
/// is distinct from `Some(vec![])` and never produced here. Blocks until the
/// last write end of the underlying pipe is closed.
pub fn collect_stream<R: Read>(mut reader: R) -> io::Result<Option<Vec<u8>>> {
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut buf = Vec::new();

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(if buf.is_empty() { None } else { Some(buf) })
}

/// Write all of `payload`, looping over short writes.
///
/// Returns the number of bytes the reader accepted. If the reader went away
/// (`EPIPE`) writing stops early; that is reported through the count rather
/// than as an error, since a child may legitimately exit without reading its
/// input.
pub fn write_payload<W: Write>(mut writer: W, payload: &[u8]) -> io::Result<usize> {
    let mut written = 0;

    while written < payload.len() {
        match writer.write(&payload[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!(
                    written,
                    total = payload.len(),
                    "child closed its input before the payload was delivered"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::Pipe;
    use proptest::prelude::*;
    use std::fs::File;
    use std::io::Cursor;
    use std::thread;

    /// Accepts at most `limit` bytes per call and fails every other call
    /// with EINTR.
    struct Stingy {
        data: Vec<u8>,
        limit: usize,
        calls: usize,
    }

    impl Write for Stingy {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Feeds chunks through a real pipe from another thread, then closes it.
    fn collect_from_pipe(chunks: Vec<Vec<u8>>) -> Option<Vec<u8>> {
        let pipe = Pipe::new().unwrap();
        let mut writer = File::from(pipe.write_end);
        let reader = File::from(pipe.read_end);

        let feeder = thread::spawn(move || {
            for chunk in chunks {
                writer.write_all(&chunk).unwrap();
            }
        });
        let collected = collect_stream(reader).unwrap();
        feeder.join().unwrap();
        collected
    }

    #[test]
    fn test_collect_absent_when_nothing_written() {
        assert_eq!(collect_stream(io::empty()).unwrap(), None);
        assert_eq!(collect_from_pipe(vec![]), None);
        // Zero-length writes are still zero bytes.
        assert_eq!(collect_from_pipe(vec![vec![], vec![]]), None);
    }

    #[test]
    fn test_collect_single_chunk() {
        assert_eq!(
            collect_from_pipe(vec![b"ok here\n".to_vec()]),
            Some(b"ok here\n".to_vec())
        );
    }

    #[test]
    fn test_collect_across_chunk_boundaries() {
        for len in [CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 5 * CHUNK_SIZE + 17] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let collected = collect_stream(Cursor::new(data.clone())).unwrap();
            assert_eq!(collected, Some(data));
        }
    }

    #[test]
    fn test_collect_more_than_pipe_buffer() {
        let chunks: Vec<Vec<u8>> = (0..64u8).map(|i| vec![i; 4096]).collect();
        let expected: Vec<u8> = chunks.concat();
        assert_eq!(collect_from_pipe(chunks), Some(expected));
    }

    #[test]
    fn test_write_payload_handles_short_writes_and_eintr() {
        let payload: Vec<u8> = (0..100u8).collect();
        let mut sink = Stingy {
            data: Vec::new(),
            limit: 7,
            calls: 0,
        };
        let written = write_payload(&mut sink, &payload).unwrap();
        assert_eq!(written, payload.len());
        assert_eq!(sink.data, payload);
    }

    #[test]
    fn test_write_payload_empty() {
        let mut sink = Vec::new();
        assert_eq!(write_payload(&mut sink, b"").unwrap(), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_write_payload_stops_on_broken_pipe() {
        let pipe = Pipe::new().unwrap();
        drop(pipe.read_end);
        let writer = File::from(pipe.write_end);
        // Rust ignores SIGPIPE, so the write fails with EPIPE instead.
        assert_eq!(write_payload(writer, b"nobody listens").unwrap(), 0);
    }

    #[test]
    fn test_write_payload_zero_write_is_error() {
        let mut full = [0u8; 0];
        let err = write_payload(&mut full[..], b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_collect_preserves_order(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..3000), 0..12)
        ) {
            let expected: Vec<u8> = chunks.concat();
            let collected = collect_from_pipe(chunks);
            if expected.is_empty() {
                prop_assert_eq!(collected, None);
            } else {
                prop_assert_eq!(collected, Some(expected));
            }
        }
    }
}
