pub mod config;
pub mod custard;
pub mod error;
pub mod header;
pub mod pack;
pub mod unpack;

use std::io::{ErrorKind, Read, Write};
use std::io::Result as IoResult;

/// Size of a tar block.
pub const BLOCK_SIZE: usize = 512;

/// Default to 4k bytes
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

const ZEROES: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Number of zero bytes that follow a body of `size` bytes in a tar stream.
pub fn padding_len(size: u64) -> usize {
    ((BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64) as usize
}

/// Reads until the buffer is full or the reader is exhausted.
///
/// # Arguments
/// * `reader` - Byte reader, short reads are retried.
/// * `buf` - Buffer to fill.
///
/// # Returns
/// * `Ok(n)` - Number of bytes read, less than `buf.len()` only at end of stream.
/// * `Err(e)` - If the reader fails.
pub fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> IoResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Write `len` zero bytes into the writer.
pub fn write_zeroes(writer: &mut impl Write, mut len: usize) -> IoResult<()> {
    while len > 0 {
        let take = len.min(BLOCK_SIZE);
        writer.write_all(&ZEROES[..take])?;
        len -= take;
    }
    Ok(())
}
