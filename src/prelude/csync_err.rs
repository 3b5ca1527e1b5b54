pub use CsyncErr::*;

use std::{
    fmt::{self, Display, Formatter},
    io,
    path::PathBuf,
};

///
pub type CsyncResult<T> = Result<T, CsyncErr>;

/// Enum used to classify every error `dirsync` can produce.
///
/// Variants are grouped, in source order, along the four error kinds spec.md §7
/// distinguishes: authenticity (fatal, aborts the sync), IO (recorded on the
/// report, sync continues), config (fatal at startup), usage (external, CLI-level).
///
/// Each variant results in a unique exit code, which can be used for testing.
#[derive(Debug)]
pub enum CsyncErr {
    // -- authenticity: fatal, aborts the sync immediately --
    AuthenticationFailed,
    DescriptorMismatch,
    PathPredicateFailed(PathBuf),
    ShardMismatch(PathBuf),
    VersionMismatch { expected: String, found: String },

    // -- io: recorded on the report, sync continues on sibling paths --
    Io(io::Error),

    // -- config: fatal at startup, never reached once enumeration begins --
    ConfigMissing(PathBuf),
    ConfigMalformed(PathBuf, String),
    WrongDirType(PathBuf),
    ConfigAlreadyExists(PathBuf),

    // -- usage: external, out of core scope, surfaced for completeness --
    UnknownCommand(String),
    DirectionMismatch,
    PasswordConfirmationFailed,

    // -- anything else, wrapped from a foreign error type --
    Other(String),
}

///
impl CsyncErr {
    /// Assign a unique exit code to each variant, mostly for testing purposes.
    ///
    /// DO NOT RELY ON THE EXACT NUMBERS, AS THEY MAY CHANGE IN THE FUTURE
    pub fn exit_code(&self) -> i32 {
        match self {
            AuthenticationFailed => 32,
            DescriptorMismatch => 33,
            PathPredicateFailed(_) => 34,
            ShardMismatch(_) => 35,
            VersionMismatch { .. } => 36,
            Io(_) => 37,
            ConfigMissing(_) => 38,
            ConfigMalformed(_, _) => 39,
            WrongDirType(_) => 40,
            ConfigAlreadyExists(_) => 41,
            UnknownCommand(_) => 42,
            DirectionMismatch => 43,
            PasswordConfirmationFailed => 44,
            Other(_) => 45,
        }
    }

    /// Authenticity failures are the only ones the sync engine does not catch
    /// per-path; every other variant is recorded on the report and the engine
    /// keeps going.
    pub fn is_authenticity_failure(&self) -> bool {
        matches!(
            self,
            AuthenticationFailed | DescriptorMismatch | PathPredicateFailed(_) | ShardMismatch(_) | VersionMismatch { .. }
        )
    }
}

///
impl Display for CsyncErr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        macro_rules! w {
            ( $( $arg:expr ),+ ) => {
                write!(f, $( $arg ),+)
            };
        }
        match self {
            AuthenticationFailed => w!("authentication failed"),
            DescriptorMismatch => w!("ciphertext descriptor does not match its bound copy"),
            PathPredicateFailed(pbuf) => w!("decoded metadata does not match the expected path {:?}", pbuf),
            ShardMismatch(pbuf) => w!("shard path {:?} does not match the hash of its decoded logical path", pbuf),
            VersionMismatch { expected, found } => w!("version check failed: expected {}, found {}", expected, found),
            Io(err) => w!("{}", err),
            ConfigMissing(pbuf) => w!("{:?} has no {} config", pbuf, crate::prelude::CONFIG_FILENAME),
            ConfigMalformed(pbuf, msg) => w!("config at {:?} is malformed: {}", pbuf, msg),
            WrongDirType(pbuf) => w!("{:?} is not a directory", pbuf),
            ConfigAlreadyExists(pbuf) => w!("{:?} already has a config; use --overwrite to replace it", pbuf),
            UnknownCommand(cmd) => w!("unknown command: {}", cmd),
            DirectionMismatch => w!("local directory must be plaintext, remote must be the other side"),
            PasswordConfirmationFailed => w!("password confirmation did not match"),
            Other(desc) => w!("{}", desc),
        }
    }
}

///
macro_rules! csync_err {
    ( $variant:ident ) => {
        Err(CsyncErr::$variant)
    };
    ( $variant:ident, $( $field:expr ),* ) => {
        Err(CsyncErr::$variant($( $field ),*))
    };
}

impl From<io::Error> for CsyncErr {
    #[inline]
    fn from(err: io::Error) -> Self {
        CsyncErr::Io(err)
    }
}

impl From<serde_json::Error> for CsyncErr {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        CsyncErr::Other(format!("(de)serialization failed: {}", err))
    }
}

impl From<argon2::Error> for CsyncErr {
    #[inline]
    fn from(err: argon2::Error) -> Self {
        CsyncErr::Other(format!("key derivation failed: {}", err))
    }
}

impl From<walkdir::Error> for CsyncErr {
    #[inline]
    fn from(err: walkdir::Error) -> Self {
        CsyncErr::Io(err.into())
    }
}

/// `CsyncErr -> std::io::Error`, for call sites that must return `io::Result`.
impl From<CsyncErr> for io::Error {
    #[inline]
    fn from(err: CsyncErr) -> io::Error {
        match err {
            CsyncErr::Io(io_err) => io_err,
            other => io::Error::new(io::ErrorKind::Other, format!("{}", other)),
        }
    }
}
