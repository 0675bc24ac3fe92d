//! Custard to tar.

use std::io::{ErrorKind, Read, Write};
use std::io::Result as IoResult;

use crate::engine::config::WriterOptions;
use crate::engine::custard::{self, Parse};
use crate::engine::error::{Error, Result};
use crate::engine::{BLOCK_SIZE, DEFAULT_BUFFER_SIZE, padding_len, write_zeroes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackState {
    /// No byte of the next member seen yet, or inside its name line.
    AwaitingName,
    /// Name line complete, collecting option lines until `body`.
    AwaitingOptionsOrBody,
    /// Header block emitted, copying the body through.
    StreamingBody { size: u64, written: u64, offset: u64 },
    /// An earlier call failed, the stream is unusable.
    Failed,
    /// The end-of-archive marker is written.
    Finished,
}

/// Push driven custard to tar transcoder.
///
/// Bytes may be fed in chunks of any size; a header line or body split over
/// many calls produces the same output as one call with the whole input.
#[derive(Debug)]
pub struct TarEncoder {
    options: WriterOptions,
    state: PackState,
    /// Header text of the current member.
    text: Vec<u8>,
    /// Input bytes consumed so far.
    offset: u64,
    members: u64,
}

impl TarEncoder {
    pub fn new(options: WriterOptions) -> Self {
        Self {
            options,
            state: PackState::AwaitingName,
            text: Vec::new(),
            offset: 0,
            members: 0,
        }
    }

    /// Number of members fully written.
    pub fn members(&self) -> u64 {
        self.members
    }

    /// Tells if the encoder sits between two members.
    pub fn is_idle(&self) -> bool {
        self.state == PackState::AwaitingName && self.text.is_empty()
    }

    /// Consumes custard bytes and writes the matching tar bytes.
    ///
    /// # Arguments
    /// * `input` - The next chunk of custard input.
    /// * `sink` - Receives tar output.
    ///
    /// # Returns
    /// * `Ok(n)` - All `n` input bytes were consumed.
    /// * `Err(e)` - A malformed header or a sink failure; the encoder is unusable after it.
    pub fn encode(&mut self, input: &[u8], sink: &mut impl Write) -> Result<usize> {
        let mut pos = 0;
        while pos < input.len() {
            let took = match self.encode_one(&input[pos..], sink) {
                Ok(took) => took,
                Err(e) => {
                    if self.state != PackState::Finished {
                        self.state = PackState::Failed;
                    }
                    return Err(e);
                }
            };
            pos += took;
            self.offset += took as u64;
        }
        Ok(pos)
    }

    fn encode_one(&mut self, input: &[u8], sink: &mut impl Write) -> Result<usize> {
        match self.state {
            PackState::AwaitingName | PackState::AwaitingOptionsOrBody => self.slurp_header(input, sink),
            PackState::StreamingBody { .. } => self.slurp_body(input, sink),
            PackState::Failed => Err(Error::malformed("transcoding was aborted by an earlier error")),
            PackState::Finished => Err(Error::malformed("input after the end-of-archive marker")),
        }
    }

    // Takes bytes up to and including the next newline.
    fn slurp_header(&mut self, input: &[u8], sink: &mut impl Write) -> Result<usize> {
        let nl = input.iter().position(|&b| b == b'\n');
        let took = nl.map_or(input.len(), |nl| nl + 1);
        if self.text.len() + took > self.options.max_header_len {
            return Err(Error::malformed(format!(
                "header at offset {} exceeds {} bytes",
                self.offset - self.text.len() as u64,
                self.options.max_header_len
            )));
        }
        self.text.extend_from_slice(&input[..took]);
        if nl.is_none() {
            return Ok(took);
        }

        match custard::parse(&self.text)? {
            Parse::Incomplete => {
                self.state = PackState::AwaitingOptionsOrBody;
            }
            Parse::Complete { header, .. } => {
                let tar = header.to_tar(&self.options.defaults)?;
                tar.save(sink)?;
                log::debug!("packed header for {:?} ({} bytes)", String::from_utf8_lossy(header.name()), header.size());
                self.text.clear();
                self.state = PackState::StreamingBody {
                    size: header.size(),
                    written: 0,
                    offset: self.offset + took as u64,
                };
                self.end_body_if_done(sink)?;
            }
        }
        Ok(took)
    }

    fn slurp_body(&mut self, input: &[u8], sink: &mut impl Write) -> Result<usize> {
        let PackState::StreamingBody { size, written, offset } = self.state else {
            return Ok(0);
        };
        let take = (size - written).min(input.len() as u64) as usize;
        sink.write_all(&input[..take])?;
        self.state = PackState::StreamingBody {
            size,
            written: written + take as u64,
            offset,
        };
        self.end_body_if_done(sink)?;
        Ok(take)
    }

    fn end_body_if_done(&mut self, sink: &mut impl Write) -> Result<()> {
        if let PackState::StreamingBody { size, written, .. } = self.state {
            if written == size {
                write_zeroes(sink, padding_len(size))?;
                self.members += 1;
                self.state = PackState::AwaitingName;
            }
        }
        Ok(())
    }

    /// Writes the end-of-archive marker.
    ///
    /// The two zero blocks are written once, whatever the state. A member
    /// left incomplete by the input is reported after that. Later calls to
    /// `encode` fail and later calls to `finish` write nothing.
    pub fn finish(&mut self, sink: &mut impl Write) -> Result<()> {
        if self.state == PackState::Finished {
            return Ok(());
        }
        let state = std::mem::replace(&mut self.state, PackState::Finished);
        write_zeroes(sink, 2 * BLOCK_SIZE)?;
        match state {
            PackState::StreamingBody { size, written, offset } => Err(Error::ShortRead {
                offset,
                expected: size,
                got: written,
            }),
            PackState::AwaitingName | PackState::AwaitingOptionsOrBody if !self.text.is_empty() => {
                Err(Error::malformed(format!(
                    "input ended inside the header at offset {}",
                    self.offset - self.text.len() as u64
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A writer that takes custard bytes and writes tar into the inner writer.
///
/// The end-of-archive marker is written by [`TarWriter::finish`], or on drop
/// if `finish` was never called.
pub struct TarWriter<W: Write> {
    encoder: TarEncoder,
    inner: Option<W>,
}

impl<W: Write> TarWriter<W> {
    pub fn new(inner: W, options: WriterOptions) -> Self {
        Self {
            encoder: TarEncoder::new(options),
            inner: Some(inner),
        }
    }

    /// Number of members fully written.
    pub fn members(&self) -> u64 {
        self.encoder.members()
    }

    /// Writes the end-of-archive marker and returns the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let Some(mut inner) = self.inner.take() else {
            return Err(Error::malformed("writer already finished"));
        };
        self.encoder.finish(&mut inner)?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for TarWriter<W> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(ErrorKind::BrokenPipe.into());
        };
        Ok(self.encoder.encode(buf, inner)?)
    }

    fn flush(&mut self) -> IoResult<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for TarWriter<W> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            let _ = self.encoder.finish(inner);
        }
    }
}

/// Transcodes a whole custard stream into a tar archive.
///
/// # Arguments
/// * `source` - Custard input.
/// * `sink` - Tar output, terminated by two zero blocks.
/// * `options` - Header defaults and limits.
///
/// # Returns
/// * `Ok(n)` - The number of members written.
/// * `Err(e)` - On malformed or truncated input, or I/O failure.
pub fn custard_to_tar(source: &mut impl Read, sink: &mut impl Write, options: WriterOptions) -> Result<u64> {
    let mut encoder = TarEncoder::new(options);
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        encoder.encode(&buf[..n], sink)?;
    }
    encoder.finish(sink)?;
    sink.flush()?;
    Ok(encoder.members())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::HeaderDefaults;
    use crate::engine::header::TarHeader;

    fn encode_chunked(input: &[u8], chunk: usize) -> Result<Vec<u8>> {
        let mut encoder = TarEncoder::new(WriterOptions::default());
        let mut out = Vec::new();
        for part in input.chunks(chunk) {
            assert_eq!(part.len(), encoder.encode(part, &mut out)?);
        }
        encoder.finish(&mut out)?;
        Ok(out)
    }

    #[test]
    fn single_member_layout() {
        let out = encode_chunked(b"name a.txt\nbody 5\nhello", 1024).unwrap();
        assert_eq!(2048, out.len());
        let expected = TarHeader::prepare("a.txt", 5, &HeaderDefaults::default()).unwrap();
        assert_eq!(expected.as_bytes(), &out[..512]);
        assert_eq!(&out[124..136], b"00000000005\0");
        assert_eq!(b"hello", &out[512..517]);
        assert!(out[517..].iter().all(|&b| b == 0));
    }

    #[test]
    fn state_transitions() {
        let mut encoder = TarEncoder::new(WriterOptions::default());
        let mut out = Vec::new();
        assert!(encoder.is_idle());
        encoder.encode(b"na", &mut out).unwrap();
        assert_eq!(PackState::AwaitingName, encoder.state);
        assert!(!encoder.is_idle());
        encoder.encode(b"me a\n", &mut out).unwrap();
        assert_eq!(PackState::AwaitingOptionsOrBody, encoder.state);
        encoder.encode(b"mode 420\nbody 3\n", &mut out).unwrap();
        assert_eq!(512, out.len());
        assert!(matches!(encoder.state, PackState::StreamingBody { size: 3, written: 0, .. }));
        encoder.encode(b"ab", &mut out).unwrap();
        assert!(matches!(encoder.state, PackState::StreamingBody { size: 3, written: 2, .. }));
        encoder.encode(b"c", &mut out).unwrap();
        assert_eq!(PackState::AwaitingName, encoder.state);
        assert_eq!(1024, out.len());
        assert_eq!(1, encoder.members());
    }

    #[test]
    fn chunk_size_independence() {
        let mut input = Vec::new();
        input.extend_from_slice(b"name one\nmode 420\nuid 5\nbody 700\n");
        input.extend((0..700u32).map(|i| (i % 251) as u8));
        input.extend_from_slice(b"name two\nbody 0\nname three\nuname bob\nbody 512\n");
        input.extend(std::iter::repeat_n(b'z', 512));
        let whole = encode_chunked(&input, input.len()).unwrap();
        for chunk in [1, 7, 512] {
            assert_eq!(whole, encode_chunked(&input, chunk).unwrap(), "chunk size {}", chunk);
        }
        // 1536 + 512 + 1024 + 1024 trailer
        assert_eq!(4096, whole.len());
    }

    #[test]
    fn two_members_padding() {
        let mut input = Vec::new();
        for name in ["first", "second"] {
            input.extend_from_slice(format!("name {name}\nbody 600\n").as_bytes());
            input.extend(std::iter::repeat_n(b'x', 600));
        }
        let out = encode_chunked(&input, 100).unwrap();
        assert_eq!(1024 + 1024 + 1024, out.len());
        assert!(out[512 + 600..1024].iter().all(|&b| b == 0));
        assert_eq!(&out[1024..1030], b"second");
        assert!(out[2048..].iter().all(|&b| b == 0));
    }

    #[test]
    fn malformed_header_emits_nothing() {
        let mut encoder = TarEncoder::new(WriterOptions::default());
        let mut out = Vec::new();
        match encoder.encode(b"nam a.txt\nbody 5\nhello", &mut out) {
            Err(Error::MalformedHeader(_)) => {}
            other => panic!("expected malformed header, got {:?}", other),
        }
        assert!(out.is_empty());
        assert!(encoder.encode(b"name b\n", &mut out).is_err());
    }

    #[test]
    fn header_limit() {
        let options = WriterOptions {
            max_header_len: 16,
            ..WriterOptions::default()
        };
        let mut encoder = TarEncoder::new(options);
        let mut out = Vec::new();
        assert!(encoder.encode(b"name 0123456789abcdef\n", &mut out).is_err());
    }

    #[test]
    fn finish_reports_truncated_body() {
        let mut encoder = TarEncoder::new(WriterOptions::default());
        let mut out = Vec::new();
        encoder.encode(b"name a\nbody 10\nabc", &mut out).unwrap();
        match encoder.finish(&mut out) {
            Err(Error::ShortRead { offset, expected, got }) => {
                assert_eq!(15, offset);
                assert_eq!(10, expected);
                assert_eq!(3, got);
            }
            other => panic!("expected short read, got {:?}", other),
        }
        // trailer still written
        assert_eq!(512 + 3 + 1024, out.len());
    }

    #[test]
    fn finish_reports_truncated_header() {
        let mut encoder = TarEncoder::new(WriterOptions::default());
        let mut out = Vec::new();
        encoder.encode(b"name a\nbo", &mut out).unwrap();
        assert!(matches!(encoder.finish(&mut out), Err(Error::MalformedHeader(_))));
        assert_eq!(1024, out.len());
    }

    #[test]
    fn no_input_after_finish() {
        let mut encoder = TarEncoder::new(WriterOptions::default());
        let mut out = Vec::new();
        encoder.encode(b"name a
body 1
x", &mut out).unwrap();
        encoder.finish(&mut out).unwrap();
        assert_eq!(2048, out.len());
        assert!(matches!(encoder.encode(b"name b
body 0
", &mut out), Err(Error::MalformedHeader(_))));
        encoder.finish(&mut out).unwrap();
        assert_eq!(2048, out.len());
        assert_eq!(PackState::Finished, encoder.state);
    }

    #[test]
    fn empty_stream() {
        let out = encode_chunked(b"", 1).unwrap();
        assert_eq!(vec![0u8; 1024], out);
    }

    #[test]
    fn writer_adapter() {
        let mut writer = TarWriter::new(Vec::new(), WriterOptions::default());
        writer.write_all(b"name a.txt\nbo").unwrap();
        writer.write_all(b"dy 5\nhel").unwrap();
        writer.write_all(b"lo").unwrap();
        assert_eq!(1, writer.members());
        let out = writer.finish().unwrap();
        assert_eq!(2048, out.len());
        assert_eq!(out, encode_chunked(b"name a.txt\nbody 5\nhello", 3).unwrap());
    }

    #[test]
    fn writer_adapter_error_kind() {
        let mut writer = TarWriter::new(Vec::new(), WriterOptions::default());
        let err = writer.write_all(b"bogus line\n").unwrap_err();
        assert_eq!(ErrorKind::Other, err.kind());
        assert!(err.to_string().contains("malformed header"));
    }

    #[test]
    fn writer_finishes_on_drop() {
        let mut out = Vec::new();
        {
            let mut writer = TarWriter::new(&mut out, WriterOptions::default());
            writer.write_all(b"name a\nbody 1\nx").unwrap();
        }
        assert_eq!(2048, out.len());
    }

    #[test]
    fn whole_stream_helper() {
        let mut source: &[u8] = b"name a.txt\nbody 5\nhello";
        let mut out = Vec::new();
        let members = custard_to_tar(&mut source, &mut out, WriterOptions::default()).unwrap();
        assert_eq!(1, members);
        assert_eq!(2048, out.len());
    }
}
