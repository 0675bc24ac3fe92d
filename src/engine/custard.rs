//! The custard header grammar.
//!
//! A member header is a run of `key value\n` lines:
//!
//! ```text
//! member = name *option body
//! name   = "name" SP namestring LF
//! option = ("mode" / "mtime" / "uid" / "gid") SP numstring LF
//! option =/ ("uname" / "gname") SP identstring LF
//! body   = "body" SP numstring LF data
//! ```
//!
//! Numbers are decimal. Other values are raw bytes, anything but a newline.
//! The `body` value is the number of raw bytes that follow the header.

use std::io::Write;

use indexmap::IndexMap;

use crate::engine::config::HeaderDefaults;
use crate::engine::error::{Error, Result};
use crate::engine::header::TarHeader;

/// A key of the custard header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Mode,
    Mtime,
    Uid,
    Gid,
    Uname,
    Gname,
    Body,
}

impl Field {
    /// Every field, in serialization order.
    pub const ALL: [Field; 8] = [
        Field::Name,
        Field::Mode,
        Field::Mtime,
        Field::Uid,
        Field::Gid,
        Field::Uname,
        Field::Gname,
        Field::Body,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Mode => "mode",
            Field::Mtime => "mtime",
            Field::Uid => "uid",
            Field::Gid => "gid",
            Field::Uname => "uname",
            Field::Gname => "gname",
            Field::Body => "body",
        }
    }

    pub fn from_key(key: &[u8]) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str().as_bytes() == key)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Field::Mode | Field::Mtime | Field::Uid | Field::Gid | Field::Body)
    }

    // Fields allowed at a line position: `name` opens a header, the rest follow it.
    fn allowed(&self, first: bool) -> bool {
        (*self == Field::Name) == first
    }
}

/// A parsed custard header, the field mapping of one member.
///
/// A header always holds `name` and `body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustardHeader {
    fields: IndexMap<Field, Vec<u8>>,
}

/// Outcome of [`parse`] over a prefix of the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parse {
    /// A full header was found in the first `consumed` bytes.
    Complete { header: CustardHeader, consumed: usize },
    /// The input is a valid prefix of a header, more is needed.
    Incomplete,
}

impl CustardHeader {
    /// The smallest header: just a name and the body size.
    pub fn minimal(name: impl AsRef<[u8]>, size: u64) -> Result<Self> {
        let mut header = Self { fields: IndexMap::new() };
        header.set(Field::Name, name)?;
        header.set_number(Field::Body, size)?;
        Ok(header)
    }

    /// Sets a field from its raw value.
    ///
    /// # Arguments
    /// * `field` - The key.
    /// * `value` - Non-empty, without newlines, decimal for numeric fields.
    ///
    /// # Returns
    /// * `Err(Error::MalformedHeader)` - If the value is not acceptable for the key.
    pub fn set(&mut self, field: Field, value: impl AsRef<[u8]>) -> Result<()> {
        let value = value.as_ref();
        check_value(field, value)?;
        self.fields.insert(field, value.to_vec());
        Ok(())
    }

    pub fn set_number(&mut self, field: Field, value: u64) -> Result<()> {
        if !field.is_numeric() {
            return Err(Error::malformed(format!("{} is not a numeric field", field.as_str())));
        }
        let mut buf = itoa::Buffer::new();
        self.fields.insert(field, buf.format(value).as_bytes().to_vec());
        Ok(())
    }

    /// Removes an optional field. `name` and `body` stay.
    pub fn remove(&mut self, field: Field) -> Option<Vec<u8>> {
        match field {
            Field::Name | Field::Body => None,
            field => self.fields.shift_remove(&field),
        }
    }

    pub fn get(&self, field: Field) -> Option<&[u8]> {
        self.fields.get(&field).map(Vec::as_slice)
    }

    /// The value of a numeric field, `None` when absent.
    pub fn number(&self, field: Field) -> Result<Option<u64>> {
        match self.fields.get(&field) {
            Some(value) => parse_number(field, value).map(Some),
            None => Ok(None),
        }
    }

    pub fn name(&self) -> &[u8] {
        self.get(Field::Name).unwrap_or_default()
    }

    /// The body size in bytes.
    pub fn size(&self) -> u64 {
        self.number(Field::Body).ok().flatten().unwrap_or(0)
    }

    /// Builds the custard header describing a tar member.
    ///
    /// Owner and group names are left out when the tar fields are empty.
    pub fn from_tar(tar: &TarHeader) -> Result<Self> {
        let name = tar.name();
        if name.is_empty() {
            return Err(Error::malformed("tar member has an empty name"));
        }
        let mut header = Self::minimal(&name, tar.size()?)?;
        header.set_number(Field::Mode, tar.mode()?)?;
        header.set_number(Field::Mtime, tar.mtime()?)?;
        header.set_number(Field::Uid, tar.uid()?)?;
        header.set_number(Field::Gid, tar.gid()?)?;
        let uname = tar.uname();
        if !uname.is_empty() {
            header.set(Field::Uname, uname)?;
        }
        let gname = tar.gname();
        if !gname.is_empty() {
            header.set(Field::Gname, gname)?;
        }
        Ok(header)
    }

    /// Builds the tar header block for this member.
    ///
    /// # Arguments
    /// * `defaults` - Values for the fields this header does not carry.
    ///
    /// # Returns
    /// * `Ok(TarHeader)` - A block with a current checksum.
    /// * `Err(e)` - If a value does not fit its tar field.
    pub fn to_tar(&self, defaults: &HeaderDefaults) -> Result<TarHeader> {
        let mut tar = TarHeader::prepare(self.name(), self.size(), defaults)?;
        if let Some(mode) = self.number(Field::Mode)? {
            tar.set_mode(mode)?;
        }
        if let Some(mtime) = self.number(Field::Mtime)? {
            tar.set_mtime(mtime)?;
        }
        if let Some(uid) = self.number(Field::Uid)? {
            tar.set_uid(uid)?;
        }
        if let Some(gid) = self.number(Field::Gid)? {
            tar.set_gid(gid)?;
        }
        if let Some(uname) = self.get(Field::Uname) {
            tar.set_uname(uname);
        }
        if let Some(gname) = self.get(Field::Gname) {
            tar.set_gname(gname);
        }
        tar.checksum(true);
        Ok(tar)
    }

    /// Serializes the header text, fields in their fixed order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        for field in Field::ALL {
            if let Some(value) = self.fields.get(&field) {
                out.extend_from_slice(field.as_str().as_bytes());
                out.push(b' ');
                out.extend_from_slice(value);
                out.push(b'\n');
            }
        }
        out
    }
}

fn parse_number(field: Field, value: &[u8]) -> Result<u64> {
    let invalid = || {
        Error::malformed(format!(
            "{} value {:?} is not a decimal number",
            field.as_str(),
            String::from_utf8_lossy(value)
        ))
    };
    if !value.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(invalid)
}

fn check_value(field: Field, value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(Error::malformed(format!("empty {} value", field.as_str())));
    }
    if value.contains(&b'\n') {
        return Err(Error::malformed(format!("{} value contains a newline", field.as_str())));
    }
    if field.is_numeric() {
        parse_number(field, value)?;
    }
    Ok(())
}

fn parse_key(key: &[u8], first: bool) -> Result<Field> {
    let field = Field::from_key(key)
        .ok_or_else(|| Error::malformed(format!("unknown key {:?}", String::from_utf8_lossy(key))))?;
    if !field.allowed(first) {
        if first {
            return Err(Error::malformed(format!("header starts with {:?} instead of name", field.as_str())));
        }
        return Err(Error::malformed("name appears twice before body"));
    }
    Ok(field)
}

// One complete line, without its newline.
fn parse_line(line: &[u8], first: bool) -> Result<(Field, Vec<u8>)> {
    let space = line.iter().position(|&b| b == b' ').ok_or_else(|| {
        Error::malformed(format!("line {:?} has no value", String::from_utf8_lossy(line)))
    })?;
    let field = parse_key(&line[..space], first)?;
    let value = &line[space + 1..];
    check_value(field, value)?;
    Ok((field, value.to_vec()))
}

// The unterminated tail must still be able to become a valid line.
fn check_partial(tail: &[u8], first: bool) -> Result<()> {
    match tail.iter().position(|&b| b == b' ') {
        Some(space) => {
            let field = parse_key(&tail[..space], first)?;
            let value = &tail[space + 1..];
            if field.is_numeric() && !value.iter().all(u8::is_ascii_digit) {
                return Err(Error::malformed(format!(
                    "{} value {:?} is not a decimal number",
                    field.as_str(),
                    String::from_utf8_lossy(value)
                )));
            }
            Ok(())
        }
        None => {
            let viable = Field::ALL
                .iter()
                .any(|f| f.allowed(first) && f.as_str().as_bytes().starts_with(tail));
            if viable {
                return Ok(());
            }
            Err(Error::malformed(format!("unknown key {:?}", String::from_utf8_lossy(tail))))
        }
    }
}

/// Parses a custard header from the start of `buf`.
///
/// Parsing always starts over from the beginning of `buf`, so callers pass
/// everything buffered so far. Nothing is consumed unless the header is
/// complete.
///
/// # Arguments
/// * `buf` - Header text received so far, possibly followed by body bytes.
///
/// # Returns
/// * `Ok(Parse::Complete)` - The header and the number of bytes it spans.
/// * `Ok(Parse::Incomplete)` - `buf` is a valid prefix of a header.
/// * `Err(Error::MalformedHeader)` - `buf` can not start a valid header.
pub fn parse(buf: &[u8]) -> Result<Parse> {
    let mut fields = IndexMap::new();
    let mut pos = 0;
    loop {
        let rest = &buf[pos..];
        let first = fields.is_empty();
        let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
            check_partial(rest, first)?;
            return Ok(Parse::Incomplete);
        };
        let (field, value) = parse_line(&rest[..nl], first)?;
        fields.insert(field, value);
        pos += nl + 1;
        if field == Field::Body {
            return Ok(Parse::Complete {
                header: CustardHeader { fields },
                consumed: pos,
            });
        }
    }
}

/// Writes the header text to the writer.
pub fn write_header(writer: &mut impl Write, header: &CustardHeader) -> Result<()> {
    writer.write_all(&header.to_bytes())?;
    Ok(())
}

/// Writes a whole custard member: the header followed by the body.
///
/// # Arguments
/// * `writer` - Byte writer.
/// * `header` - The member header, its `body` must match `body.len()`.
/// * `body` - The member data.
pub fn write_member(writer: &mut impl Write, header: &CustardHeader, body: &[u8]) -> Result<()> {
    if header.size() != body.len() as u64 {
        return Err(Error::malformed(format!(
            "header declares {} bytes but body has {}",
            header.size(),
            body.len()
        )));
    }
    write_header(writer, header)?;
    writer.write_all(body)?;
    Ok(())
}
