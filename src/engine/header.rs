pub mod helper;

pub use helper::{decode_octal, encode_octal};

use std::io::{Read, Write};
use std::ops::Range;

use crate::engine::config::{HeaderDefaults, ReaderOptions};
use crate::engine::error::{Error, Result};
use crate::engine::{BLOCK_SIZE, padding_len, read_full, write_zeroes};
use helper::*;

// USTAR field layout, byte offsets into the 512-byte block.
const NAME: Range<usize> = 0..100;
const MODE: Range<usize> = 100..108;
const UID: Range<usize> = 108..116;
const GID: Range<usize> = 116..124;
const SIZE: Range<usize> = 124..136;
const MTIME: Range<usize> = 136..148;
const CHKSUM: Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const MAGIC: Range<usize> = 257..263;
const VERSION: Range<usize> = 263..265;
const UNAME: Range<usize> = 265..297;
const GNAME: Range<usize> = 297..329;
const PREFIX: Range<usize> = 345..500;

/// Tar header type flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypeFlag {
    RegularFile,
    HardLink,
    SymbolicLink,
    CharacterSpecial,
    BlockSpecial,
    Directory,
    FIFO,
    ContiguousFile,
    Unknown(u8)
}

impl From<u8> for TypeFlag {
    fn from(value: u8) -> Self {
        match value {
            // pre-POSIX archives mark regular files with NUL
            b'0' | b'\0' => TypeFlag::RegularFile,
            b'1' => TypeFlag::HardLink,
            b'2' => TypeFlag::SymbolicLink,
            b'3' => TypeFlag::CharacterSpecial,
            b'4' => TypeFlag::BlockSpecial,
            b'5' => TypeFlag::Directory,
            b'6' => TypeFlag::FIFO,
            b'7' => TypeFlag::ContiguousFile,
            v => TypeFlag::Unknown(v),
        }
    }
}

impl From<TypeFlag> for u8 {
    fn from(value: TypeFlag) -> Self {
        match value {
            TypeFlag::RegularFile => b'0',
            TypeFlag::HardLink => b'1',
            TypeFlag::SymbolicLink => b'2',
            TypeFlag::CharacterSpecial => b'3',
            TypeFlag::BlockSpecial => b'4',
            TypeFlag::Directory => b'5',
            TypeFlag::FIFO => b'6',
            TypeFlag::ContiguousFile => b'7',
            TypeFlag::Unknown(v) => v,
        }
    }
}

impl TypeFlag {
    /// Tells if the member holds file data.
    pub fn is_regular_file(&self) -> bool {
        matches!(self, TypeFlag::RegularFile | TypeFlag::ContiguousFile)
    }
}

/// A USTAR header block.
///
/// The block is kept as raw bytes. Mutators rewrite only their own field and
/// leave the checksum stale until [`TarHeader::checksum`] is called with
/// `update` set.
#[derive(Clone, PartialEq, Eq)]
pub struct TarHeader {
    block: [u8; BLOCK_SIZE],
}

impl std::fmt::Debug for TarHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarHeader")
            .field("name", &String::from_utf8_lossy(self.raw_name()))
            .field("size", &self.size().ok())
            .field("typeflag", &self.typeflag())
            .finish()
    }
}

impl Default for TarHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl TarHeader {
    /// Creates an all-zero header block.
    pub fn new() -> Self {
        Self { block: [0u8; BLOCK_SIZE] }
    }

    /// Wraps an already read block.
    pub fn from_bytes(block: [u8; BLOCK_SIZE]) -> Self {
        Self { block }
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.block
    }

    /// Creates a header for a regular file, see [`TarHeader::initialize`].
    pub fn prepare(name: impl AsRef<[u8]>, size: u64, defaults: &HeaderDefaults) -> Result<Self> {
        let mut header = Self::new();
        header.initialize(name, size, defaults)?;
        Ok(header)
    }

    /// Resets the block to describe a regular file.
    ///
    /// # Arguments
    /// * `name` - Member name, truncated to 100 bytes.
    /// * `size` - Body size in bytes.
    /// * `defaults` - Mode, owner and time to record.
    ///
    /// # Returns
    /// * `Ok(())` - The block is complete and its checksum is current.
    /// * `Err(e)` - If a value does not fit its field.
    pub fn initialize(&mut self, name: impl AsRef<[u8]>, size: u64, defaults: &HeaderDefaults) -> Result<()> {
        self.block.fill(0);
        self.set_name(name);
        self.set_mode(defaults.mode)?;
        self.set_uid(defaults.uid)?;
        self.set_gid(defaults.gid)?;
        self.set_size(size)?;
        self.set_mtime(defaults.mtime)?;
        self.set_typeflag(TypeFlag::RegularFile);
        self.block[MAGIC.start..MAGIC.start + 5].copy_from_slice(b"ustar");
        self.block[VERSION].copy_from_slice(b"00");
        if let Some(uname) = &defaults.uname {
            self.set_uname(uname);
        }
        if let Some(gname) = &defaults.gname {
            self.set_gname(gname);
        }
        self.checksum(true);
        Ok(())
    }

    /// Sets the name, truncated to 100 bytes. No USTAR prefix is written.
    pub fn set_name(&mut self, name: impl AsRef<[u8]>) {
        self.put_text("name", NAME, name.as_ref());
    }

    pub fn set_mode(&mut self, mode: u64) -> Result<()> {
        put_octal(&mut self.block[MODE], mode)
    }

    pub fn set_uid(&mut self, uid: u64) -> Result<()> {
        put_octal(&mut self.block[UID], uid)
    }

    pub fn set_gid(&mut self, gid: u64) -> Result<()> {
        put_octal(&mut self.block[GID], gid)
    }

    pub fn set_size(&mut self, size: u64) -> Result<()> {
        put_octal(&mut self.block[SIZE], size)
    }

    pub fn set_mtime(&mut self, mtime: u64) -> Result<()> {
        put_octal(&mut self.block[MTIME], mtime)
    }

    pub fn set_uname(&mut self, uname: impl AsRef<[u8]>) {
        self.put_text("uname", UNAME, uname.as_ref());
    }

    pub fn set_gname(&mut self, gname: impl AsRef<[u8]>) {
        self.put_text("gname", GNAME, gname.as_ref());
    }

    fn put_text(&mut self, label: &str, field: Range<usize>, value: &[u8]) {
        let len = field.len();
        if !put_str(&mut self.block[field], value) {
            log::warn!("{label} {:?} truncated to {len} bytes", String::from_utf8_lossy(value));
        }
    }

    pub fn set_typeflag(&mut self, typeflag: TypeFlag) {
        self.block[TYPEFLAG] = typeflag.into();
    }

    fn raw_name(&self) -> &[u8] {
        get_str(&self.block[NAME])
    }

    /// Member name as raw bytes, joined with the USTAR prefix when one is set.
    pub fn name(&self) -> Vec<u8> {
        let name = self.raw_name();
        let prefix = get_str(&self.block[PREFIX]);
        if prefix.is_empty() {
            return name.to_vec();
        }
        let mut joined = Vec::with_capacity(prefix.len() + 1 + name.len());
        joined.extend_from_slice(prefix);
        joined.push(b'/');
        joined.extend_from_slice(name);
        joined
    }

    pub fn mode(&self) -> Result<u64> {
        decode_octal(&self.block[MODE])
    }

    pub fn uid(&self) -> Result<u64> {
        decode_octal(&self.block[UID])
    }

    pub fn gid(&self) -> Result<u64> {
        decode_octal(&self.block[GID])
    }

    /// Body size in bytes.
    pub fn size(&self) -> Result<u64> {
        decode_octal(&self.block[SIZE])
    }

    pub fn mtime(&self) -> Result<u64> {
        decode_octal(&self.block[MTIME])
    }

    pub fn uname(&self) -> &[u8] {
        get_str(&self.block[UNAME])
    }

    pub fn gname(&self) -> &[u8] {
        get_str(&self.block[GNAME])
    }

    pub fn typeflag(&self) -> TypeFlag {
        self.block[TYPEFLAG].into()
    }

    /// Tells if the block starts with the "ustar" magic.
    pub fn is_valid_magic(&self) -> bool {
        &self.block[MAGIC.start..MAGIC.start + 5] == b"ustar"
    }

    /// Tells if every byte of the block is zero.
    pub fn is_zero_block(&self) -> bool {
        self.block.iter().all(|&b| b == 0)
    }

    /// Sums the block with the checksum field read as eight spaces.
    ///
    /// # Returns
    /// * `(unsigned, signed)` - The sum of the bytes taken as `u8` and as `i8`.
    pub fn compute_checksums(&self) -> (i64, i64) {
        let mut unsigned: i64 = 0;
        let mut signed: i64 = 0;
        for (i, &b) in self.block.iter().enumerate() {
            let b = if CHKSUM.contains(&i) { b' ' } else { b };
            unsigned += b as i64;
            signed += b as i8 as i64;
        }
        (unsigned, signed)
    }

    /// The checksum as stored in the block.
    pub fn stored_checksum(&self) -> Result<u64> {
        decode_octal(&self.block[CHKSUM])
    }

    /// Checks the stored checksum against the computed sums.
    ///
    /// # Arguments
    /// * `update` - Overwrite the stored checksum with the unsigned sum.
    ///
    /// # Returns
    /// * `true` - If the checksum stored before the call matches either sum.
    pub fn checksum(&mut self, update: bool) -> bool {
        let (unsigned, signed) = self.compute_checksums();
        let matches = match self.stored_checksum() {
            Ok(stored) => stored as i64 == unsigned || stored as i64 == signed,
            Err(_) => false,
        };
        if update {
            // six digits, NUL, space; the sum of 512 bytes always fits
            let chksum = format!("{:06o}\0 ", unsigned);
            self.block[CHKSUM].copy_from_slice(chksum.as_bytes());
        }
        matches
    }

    /// Applies the reader's validity checks to a member header.
    ///
    /// # Arguments
    /// * `options` - Which checks are fatal.
    ///
    /// # Returns
    /// * `Ok(())` - If the header passes or a failed check is not fatal.
    /// * `Err(e)` - `InvalidMagic` or `ChecksumMismatch`.
    pub fn validate(&mut self, options: &ReaderOptions) -> Result<()> {
        let name = String::from_utf8_lossy(self.raw_name()).into_owned();
        if !self.is_valid_magic() {
            if options.require_magic {
                return Err(Error::InvalidMagic { name });
            }
            log::warn!("member {name:?} has no ustar magic, continuing");
        }
        if !self.checksum(false) {
            let (unsigned, signed) = self.compute_checksums();
            let stored = self.stored_checksum().unwrap_or(0);
            if options.verify_checksum {
                return Err(Error::ChecksumMismatch { name, stored, unsigned, signed });
            }
            log::warn!("member {name:?} checksum {stored} does not match {unsigned} or {signed}, continuing");
        }
        Ok(())
    }

    /// Reads the next block from the reader.
    ///
    /// # Arguments
    /// * `reader` - Byte reader positioned at a block boundary.
    /// * `offset` - Position of the block in the stream, for error reports.
    ///
    /// # Returns
    /// * `Ok(Some(Self))` - A full block.
    /// * `Ok(None)` - If the reader was already exhausted.
    /// * `Err(Error::ShortRead)` - If the reader ended inside the block.
    pub fn load(reader: &mut impl Read, offset: u64) -> Result<Option<Self>> {
        let mut block = [0u8; BLOCK_SIZE];
        let got = read_full(reader, &mut block)?;
        match got {
            0 => Ok(None),
            BLOCK_SIZE => Ok(Some(Self { block })),
            got => Err(Error::ShortRead {
                offset,
                expected: BLOCK_SIZE as u64,
                got: got as u64,
            }),
        }
    }

    /// Saves the block to the writer.
    pub fn save(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.block)?;
        Ok(())
    }

    /// Writes a whole member: this header, the body and its padding.
    ///
    /// # Arguments
    /// * `writer` - Byte writer.
    /// * `body` - Exactly `size()` bytes.
    pub fn write_member(&self, writer: &mut impl Write, body: &[u8]) -> Result<()> {
        let size = self.size()?;
        if size != body.len() as u64 {
            return Err(Error::malformed(format!(
                "header declares {size} bytes but body has {}",
                body.len()
            )));
        }
        self.save(writer)?;
        writer.write_all(body)?;
        write_zeroes(writer, padding_len(size))?;
        Ok(())
    }
}
