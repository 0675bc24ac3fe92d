//! Tar to custard.

use std::io::{ErrorKind, Read, Write};
use std::io::Result as IoResult;

use crate::engine::config::ReaderOptions;
use crate::engine::custard::CustardHeader;
use crate::engine::error::{Error, Result};
use crate::engine::header::TarHeader;
use crate::engine::{BLOCK_SIZE, DEFAULT_BUFFER_SIZE, padding_len, read_full};

#[derive(Debug, Clone, PartialEq, Eq)]
enum UnpackState {
    AwaitingHeaderBlock,
    /// Custard header text not yet handed to the caller.
    EmittingHeaderText { text: Vec<u8>, sent: usize, size: u64 },
    StreamingBody { size: u64, remaining: u64, offset: u64 },
    /// The source ended cleanly between members.
    Done,
    Failed,
}

/// A reader producing custard bytes from a tar source.
///
/// Filler blocks are skipped, each member is turned into its custard header
/// text followed by the body, and the tar padding is dropped. Running out of
/// input is only clean between members; anywhere else it is a short read.
#[derive(Debug)]
pub struct CustardReader<R: Read> {
    source: R,
    options: ReaderOptions,
    state: UnpackState,
    /// Bytes consumed from the source.
    offset: u64,
    members: u64,
}

impl<R: Read> CustardReader<R> {
    pub fn new(source: R, options: ReaderOptions) -> Self {
        Self {
            source,
            options,
            state: UnpackState::AwaitingHeaderBlock,
            offset: 0,
            members: 0,
        }
    }

    /// Number of members fully produced.
    pub fn members(&self) -> u64 {
        self.members
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// Reads the next custard bytes into `buf`.
    ///
    /// A call returns header text or the result of a single read of the
    /// source, never both, so it does not wait for input it does not need.
    ///
    /// # Arguments
    /// * `buf` - Output buffer of any size.
    ///
    /// # Returns
    /// * `Ok(0)` - At the clean end of the archive (or for an empty `buf`).
    /// * `Ok(n)` - Bytes produced.
    /// * `Err(e)` - On a truncated or corrupt archive; the reader is unusable after it.
    pub fn read_custard(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.state {
                UnpackState::Done => return Ok(0),
                UnpackState::Failed => {
                    return Err(Error::malformed("transcoding was aborted by an earlier error"));
                }
                _ => {}
            }
            match self.read_one(buf) {
                Ok(0) => continue,
                Ok(got) => return Ok(got),
                Err(e) => {
                    self.state = UnpackState::Failed;
                    return Err(e);
                }
            }
        }
    }

    fn read_one(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.state {
            UnpackState::AwaitingHeaderBlock => {
                self.state = match self.next_header()? {
                    Some(header) => {
                        let custard = CustardHeader::from_tar(&header)?;
                        log::debug!(
                            "unpacked header for {:?} ({} bytes)",
                            String::from_utf8_lossy(custard.name()),
                            custard.size()
                        );
                        UnpackState::EmittingHeaderText {
                            text: custard.to_bytes(),
                            sent: 0,
                            size: custard.size(),
                        }
                    }
                    None => UnpackState::Done,
                };
                Ok(0)
            }
            UnpackState::EmittingHeaderText { .. } => self.emit_header_text(buf),
            UnpackState::StreamingBody { .. } => self.stream_body(buf),
            UnpackState::Done | UnpackState::Failed => Ok(0),
        }
    }

    fn emit_header_text(&mut self, buf: &mut [u8]) -> Result<usize> {
        let UnpackState::EmittingHeaderText { text, sent, size } = &mut self.state else {
            return Ok(0);
        };
        let take = buf.len().min(text.len() - *sent);
        buf[..take].copy_from_slice(&text[*sent..*sent + take]);
        *sent += take;
        if *sent == text.len() {
            let size = *size;
            self.state = UnpackState::StreamingBody {
                size,
                remaining: size,
                offset: self.offset,
            };
        }
        Ok(take)
    }

    fn stream_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        let UnpackState::StreamingBody { size, remaining, offset } = self.state else {
            return Ok(0);
        };
        // padding is skipped on the call after the last body bytes went out
        if remaining == 0 {
            self.end_body_if_done()?;
            return Ok(0);
        }
        let want = remaining.min(buf.len() as u64) as usize;
        let got = loop {
            match self.source.read(&mut buf[..want]) {
                Ok(got) => break got,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if got == 0 {
            return Err(Error::ShortRead {
                offset,
                expected: size,
                got: size - remaining,
            });
        }
        self.offset += got as u64;
        self.state = UnpackState::StreamingBody {
            size,
            remaining: remaining - got as u64,
            offset,
        };
        Ok(got)
    }

    // Reads blocks until a member header, skipping filler blocks.
    fn next_header(&mut self) -> Result<Option<TarHeader>> {
        loop {
            let block_offset = self.offset;
            let Some(mut header) = TarHeader::load(&mut self.source, block_offset)? else {
                return Ok(None);
            };
            self.offset += BLOCK_SIZE as u64;
            if header.is_zero_block() {
                log::trace!("skipping zero block at offset {block_offset}");
                continue;
            }
            if header.size()? == 0 && !self.options.keep_empty_members {
                log::trace!("skipping empty block at offset {block_offset}");
                continue;
            }
            header.validate(&self.options)?;
            let typeflag = header.typeflag();
            if !typeflag.is_regular_file() {
                log::warn!("member at offset {block_offset} has type {typeflag:?}, passing it through as a file");
            }
            return Ok(Some(header));
        }
    }

    fn end_body_if_done(&mut self) -> Result<()> {
        let UnpackState::StreamingBody { size, remaining: 0, .. } = self.state else {
            return Ok(());
        };
        let pad = padding_len(size);
        let mut scratch = [0u8; BLOCK_SIZE];
        let got = read_full(&mut self.source, &mut scratch[..pad])?;
        if got < pad {
            return Err(Error::ShortRead {
                offset: self.offset,
                expected: pad as u64,
                got: got as u64,
            });
        }
        self.offset += pad as u64;
        self.members += 1;
        self.state = UnpackState::AwaitingHeaderBlock;
        Ok(())
    }
}

impl<R: Read> Read for CustardReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        Ok(self.read_custard(buf)?)
    }
}

/// Transcodes a whole tar archive into a custard stream.
///
/// # Arguments
/// * `source` - Tar input.
/// * `sink` - Custard output.
/// * `options` - Which header checks are fatal.
///
/// # Returns
/// * `Ok(n)` - The number of members written.
/// * `Err(e)` - On truncated or corrupt input, or I/O failure.
pub fn tar_to_custard(source: &mut impl Read, sink: &mut impl Write, options: ReaderOptions) -> Result<u64> {
    let mut reader = CustardReader::new(source, options);
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    loop {
        let n = reader.read_custard(&mut buf)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])?;
    }
    sink.flush()?;
    Ok(reader.members())
}
