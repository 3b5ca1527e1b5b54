//! C3 + C4: the directory-access interface (spec.md §4.3/§4.4).
///
/// `DirectoryAccess` is the explicit capability DESIGN NOTES calls for,
/// replacing the duck-typed `DirPlain`/`DirCrypt` pair in
/// `original_source` and the teacher's non-trait `Syncer`.
pub mod crypt;
pub mod plain;

pub use crypt::CryptDir;
pub use plain::PlainDir;

use crate::{logical_path::LogicalPath, model::*, prelude::*};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

pub trait DirectoryAccess: std::fmt::Debug {
    fn collect_paths(&mut self, force_rebuild: bool) -> CsyncResult<()>;
    fn included(&self) -> &BTreeMap<LogicalPath, EntryMetadata>;
    fn excluded(&self) -> &BTreeSet<LogicalPath>;
    fn get_path_type(&self, p: &LogicalPath) -> Option<PathType>;
    fn get_path_times(&self, p: &LogicalPath) -> Option<(u64, u64)>;
    fn get_path_mode(&self, p: &LogicalPath) -> Option<u32>;
    fn make_dir(&mut self, p: &LogicalPath, mode: u32, report: &Report);
    fn remove_dir(&mut self, p: &LogicalPath, report: &Report);
    fn remove_file(&mut self, p: &LogicalPath, report: &Report);
    fn push_file(&mut self, p: &LogicalPath, src_abs: &Path, report: &Report);
    fn pull_file(&mut self, p: &LogicalPath, dst_abs: &Path, report: &Report);
    fn root(&self) -> &Path;
    fn is_plain(&self) -> bool;

    /// Authenticity failures abort the whole sync (spec.md §4.5) even though
    /// the mutating ops above are infallible from the engine's point of view
    /// and log everything else to `report`. `PlainDir` can never produce one;
    /// `CryptDir` latches the first it sees here so the engine can check
    /// after every call and stop.
    fn take_fatal_error(&mut self) -> Option<CsyncErr> {
        None
    }
}

/// Compile each user-supplied exclude pattern as a *full match* against a
/// basename, mirroring Python's `re.fullmatch`.
pub fn compile_excludes(patterns: &[String]) -> CsyncResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("^(?:{})$", p)).map_err(|err| CsyncErr::Other(format!("bad exclude pattern {:?}: {}", p, err))))
        .collect()
}

pub(crate) fn excluded_by_pattern(patterns: &[Regex], basename: &str) -> bool {
    patterns.iter().any(|re| re.is_match(basename))
}

/// `.dirsync.json` itself must never be treated as a syncable entry.
pub(crate) fn is_config_file(lp: &LogicalPath) -> bool {
    lp.components() == [crate::prelude::CONFIG_FILENAME.to_string()]
}
