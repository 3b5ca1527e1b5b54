//! External collaborator: CLI surface (spec.md §6; `original_source/main.py`'s
//! command table; teacher idiom: `structopt`-derived `Opts`).
use crate::prelude::DEFAULT_CHUNK_SIZE;
use std::path::PathBuf;
use structopt::StructOpt;

/// `dirsync` replicates a plaintext directory into either another plaintext
/// directory or an encrypted, path-hash-sharded one, and back.
///
/// See `dirsync <SUBCOMMAND> --help` for options specific to a subcommand.
#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "dirsync")]
pub enum Opts {
    /// Copy new/changed entries from a plaintext directory into the other side.
    Push {
        #[structopt(flatten)]
        sync: SyncArgs,
    },

    /// Copy new/changed entries from the other side into a plaintext directory.
    Pull {
        #[structopt(flatten)]
        sync: SyncArgs,
    },

    /// Like `push`, but keeps running and re-syncing on every filesystem change.
    WatchPush {
        #[structopt(flatten)]
        sync: SyncArgs,

        /// Milliseconds to wait for filesystem activity to settle before syncing.
        #[structopt(long, default_value = "200")]
        settle_ms: u64,
    },

    /// Like `pull`, but keeps running and re-syncing on every filesystem change.
    WatchPull {
        #[structopt(flatten)]
        sync: SyncArgs,

        /// Milliseconds to wait for filesystem activity to settle before syncing.
        #[structopt(long, default_value = "200")]
        settle_ms: u64,
    },

    /// Initialize a directory as a plaintext sync root.
    InitPlain {
        /// Directory to initialize.
        #[structopt(parse(from_os_str))]
        dir: PathBuf,

        /// Glob-like exclude patterns (full-match against a basename), repeatable.
        #[structopt(short = "x", long)]
        exclude: Vec<String>,

        /// Replace an existing config instead of refusing to run.
        #[structopt(long)]
        overwrite: bool,
    },

    /// Initialize a directory as an encrypted sync root.
    InitCrypt {
        /// Directory to initialize.
        #[structopt(parse(from_os_str))]
        dir: PathBuf,

        /// Glob-like exclude patterns (full-match against a basename), repeatable.
        #[structopt(short = "x", long)]
        exclude: Vec<String>,

        /// Replace an existing config instead of refusing to run.
        #[structopt(long)]
        overwrite: bool,
    },

    /// Rewrap an encrypted directory's master key under a new password.
    ChangePassword {
        /// The encrypted directory whose password should change.
        #[structopt(parse(from_os_str))]
        dir: PathBuf,
    },

    /// Force a full rebuild of an encrypted directory's metadata sidecar.
    RebuildMeta {
        /// The encrypted directory to rebuild.
        #[structopt(parse(from_os_str))]
        dir: PathBuf,
    },
}

/// Options shared by `push`/`pull`/`watch-push`/`watch-pull`.
#[derive(Clone, Debug, StructOpt)]
pub struct SyncArgs {
    /// The plaintext directory (must already be `init-plain`'d).
    #[structopt(parse(from_os_str))]
    pub local: PathBuf,

    /// The other side: a plaintext or encrypted directory.
    #[structopt(parse(from_os_str))]
    pub remote: PathBuf,

    /// Classify and print differences without copying, removing, or creating anything.
    #[structopt(short = "d", long)]
    pub diffonly: bool,

    /// Print every successful action, not only failures.
    #[structopt(short, long)]
    pub verbose: bool,

    /// Also treat a newer ctime (not just mtime) on the source as a change.
    #[structopt(long)]
    pub use_ctime: bool,

    /// AEAD frame size, in plaintext bytes, used when writing into an
    /// encrypted directory.
    #[structopt(long, default_value = "4096")]
    pub chunk_size: u32,
}

impl Default for SyncArgs {
    fn default() -> Self {
        SyncArgs {
            local: PathBuf::new(),
            remote: PathBuf::new(),
            diffonly: false,
            verbose: false,
            use_ctime: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_parses_positional_dirs_and_flags() {
        let opts = Opts::from_iter(&["dirsync", "push", "local", "remote", "-d", "-v"]);
        match opts {
            Opts::Push { sync } => {
                assert_eq!(sync.local, PathBuf::from("local"));
                assert_eq!(sync.remote, PathBuf::from("remote"));
                assert!(sync.diffonly);
                assert!(sync.verbose);
                assert_eq!(sync.chunk_size, DEFAULT_CHUNK_SIZE);
            }
            other => panic!("expected Push, got {:?}", other),
        }
    }

    #[test]
    fn init_crypt_parses_dir_and_exclude_list() {
        let opts = Opts::from_iter(&["dirsync", "init-crypt", "some/dir", "-x", "a", "-x", "b"]);
        match opts {
            Opts::InitCrypt { dir, exclude, overwrite } => {
                assert_eq!(dir, PathBuf::from("some/dir"));
                assert_eq!(exclude, vec!["a".to_string(), "b".to_string()]);
                assert!(!overwrite);
            }
            other => panic!("expected InitCrypt, got {:?}", other),
        }
    }

    #[test]
    fn watch_push_parses_settle_ms() {
        let opts = Opts::from_iter(&["dirsync", "watch-push", "local", "remote", "--settle-ms", "500"]);
        match opts {
            Opts::WatchPush { settle_ms, .. } => assert_eq!(settle_ms, 500),
            other => panic!("expected WatchPush, got {:?}", other),
        }
    }
}
