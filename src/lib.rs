//! Streaming transcoders between the custard archive format and USTAR tar.
//!
//! Custard carries each member as `key value` text lines ending with
//! `body <size>`, followed by exactly `size` raw bytes:
//!
//! ```text
//! name a.txt
//! mode 420
//! body 5
//! hello
//! ```
//!
//! [`TarWriter`] turns custard written into it into a tar archive, and
//! [`CustardReader`] reads a tar archive back as custard. Both accept input in
//! chunks of any size.

pub mod engine;

pub use engine::config::{HeaderDefaults, ReaderOptions, WriterOptions};
pub use engine::custard::{CustardHeader, Field, Parse};
pub use engine::error::{Error, Result};
pub use engine::header::{TarHeader, TypeFlag};
pub use engine::pack::{TarEncoder, TarWriter, custard_to_tar};
pub use engine::unpack::{CustardReader, tar_to_custard};
