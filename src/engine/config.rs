use std::time::{SystemTime, UNIX_EPOCH};

use nix::unistd::{Gid, Group, Uid, User, getegid, geteuid};
use serde::{Deserialize, Serialize};

/// Default mode for members whose custard header carries none.
pub const DEFAULT_MODE: u64 = 0o444;

/// Default limit on the size of a single custard header text.
pub const DEFAULT_MAX_HEADER_LEN: usize = 8 * 1024;

/// Values used to fill tar header fields the custard header leaves out.
///
/// `Default` is fully deterministic; use [`HeaderDefaults::from_env`] to pick
/// up the effective ids, their names and the current time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderDefaults {
    pub mode: u64,
    pub uid: u64,
    pub gid: u64,
    /// Seconds since the epoch.
    pub mtime: u64,
    pub uname: Option<String>,
    pub gname: Option<String>,
}

impl Default for HeaderDefaults {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE,
            uid: 0,
            gid: 0,
            mtime: 0,
            uname: None,
            gname: None,
        }
    }
}

impl HeaderDefaults {
    /// Builds defaults from the running process.
    ///
    /// Owner and group names are left empty when the ids do not resolve.
    pub fn from_env() -> Self {
        let uid = geteuid();
        let gid = getegid();
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            mode: DEFAULT_MODE,
            uid: uid.as_raw() as u64,
            gid: gid.as_raw() as u64,
            mtime,
            uname: lookup_user(uid),
            gname: lookup_group(gid),
        }
    }
}

fn lookup_user(uid: Uid) -> Option<String> {
    match User::from_uid(uid) {
        Ok(user) => user.map(|u| u.name),
        Err(e) => {
            log::debug!("cannot resolve uid {uid}: {e}");
            None
        }
    }
}

fn lookup_group(gid: Gid) -> Option<String> {
    match Group::from_gid(gid) {
        Ok(group) => group.map(|g| g.name),
        Err(e) => {
            log::debug!("cannot resolve gid {gid}: {e}");
            None
        }
    }
}

/// Options for the custard to tar direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    pub defaults: HeaderDefaults,
    /// Largest custard header text accepted for one member.
    pub max_header_len: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            defaults: HeaderDefaults::default(),
            max_header_len: DEFAULT_MAX_HEADER_LEN,
        }
    }
}

impl WriterOptions {
    pub fn with_defaults(defaults: HeaderDefaults) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }
}

/// Options for the tar to custard direction.
///
/// The default is strict: a bad checksum or magic aborts the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    pub verify_checksum: bool,
    pub require_magic: bool,
    /// Emit zero-length members instead of treating every size 0 block as
    /// filler. All-zero blocks are always filler.
    pub keep_empty_members: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
            require_magic: true,
            keep_empty_members: false,
        }
    }
}

impl ReaderOptions {
    /// Options that log bad checksums and magic instead of failing.
    pub fn lenient() -> Self {
        Self {
            verify_checksum: false,
            require_magic: false,
            keep_empty_members: false,
        }
    }
}
