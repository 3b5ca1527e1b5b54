//! Shared data model: `EntryMetadata`, `PathType`, and the reporting sink
//! (spec.md §3, §6; teacher: `DirSyncRes`/`res.log`).
use crate::logical_path::LogicalPath;
use std::{cell::RefCell, fmt, fmt::Display};

/// `mode`'s filesystem type bits, restricted to what this system replicates
/// (spec.md's Non-goals: no symlinks, devices, or hardlinks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    Dir,
    File,
}

/// A record per replicated entry (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub path: LogicalPath,
    pub path_type: PathType,
    pub mode: u32,
    pub mtime_ns: u64,
    pub ctime_ns: u64,
}

impl EntryMetadata {
    /// `S_IFDIR`/`S_IFREG` bits set appropriately, permission bits from `perm`.
    pub fn mode_for(path_type: PathType, perm: u32) -> u32 {
        const S_IFDIR: u32 = 0o040000;
        const S_IFREG: u32 = 0o100000;
        let type_bits = match path_type {
            PathType::Dir => S_IFDIR,
            PathType::File => S_IFREG,
        };
        type_bits | (perm & 0o7777)
    }

    pub fn perm_bits(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// `newer(src, dst, P)` per spec.md §4.5: true iff `src.mtime_ns - dst.mtime_ns`
/// is at least `time_resolution` nanoseconds. Saturating so an out-of-order
/// (src older than dst) comparison is simply `false`, not a panic.
pub fn newer(src_ns: u64, dst_ns: u64, time_resolution_ns: u64) -> bool {
    src_ns.saturating_sub(dst_ns) >= time_resolution_ns
}

/// `{ADD DIR, COPY FILE, REMOVE DIR, REMOVE FILE}` exactly per spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    AddDir,
    CopyFile,
    RemoveDir,
    RemoveFile,
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ActionKind::AddDir => "ADD DIR",
            ActionKind::CopyFile => "COPY FILE",
            ActionKind::RemoveDir => "REMOVE DIR",
            ActionKind::RemoveFile => "REMOVE FILE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub action: ActionKind,
    pub path: LogicalPath,
    pub error: Option<String>,
}

/// Structured per-operation sink the sync engine writes to (spec.md §6,
/// "reporting sink"). `RefCell`-backed, not `Mutex`-backed, because the core
/// is single-threaded (spec.md §5) -- replaces the teacher's "many named
/// accumulator lists" `DirSyncRes` with one record stream that consumers
/// project over.
#[derive(Debug, Default)]
pub struct Report {
    entries: RefCell<Vec<ReportEntry>>,
}

impl Report {
    pub fn new() -> Self {
        Report::default()
    }

    pub fn log(&self, action: ActionKind, path: LogicalPath, error: Option<String>) {
        self.entries.borrow_mut().push(ReportEntry { action, path, error });
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.entries.borrow().clone()
    }

    pub fn failures(&self) -> Vec<ReportEntry> {
        self.entries.borrow().iter().filter(|e| e.error.is_some()).cloned().collect()
    }

    pub fn num_synced(&self) -> usize {
        self.entries.borrow().iter().filter(|e| e.error.is_none()).count()
    }

    /// Human-readable rendering for CLI display (teacher: `SyncStats`'s
    /// `Display` impl; `original_source/dirsync.py::DirCmp.output`).
    pub fn render(&self, verbose: bool) -> String {
        let entries = self.entries.borrow();
        let mut out = String::new();
        for entry in entries.iter() {
            match &entry.error {
                Some(err) => out.push_str(&format!("FAILED {} {}: {}\n", entry.action, entry.path, err)),
                None if verbose => out.push_str(&format!("{} {}\n", entry.action, entry.path)),
                None => (),
            }
        }
        out.push_str(&format!("{}: {}\n", crate::prelude::REPORT_HEADER_NUM_FILES, self.num_synced()));
        let failures = entries.iter().filter(|e| e.error.is_some()).count();
        if failures > 0 {
            out.push_str(&format!("failures: {}\n", failures));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;
    use std::path::Path;

    fn lp(s: &str) -> LogicalPath {
        LogicalPath::try_from(Path::new(s)).unwrap()
    }

    #[test]
    fn newer_respects_resolution() {
        assert!(!newer(1000, 999, 10_000));
        assert!(newer(11_000, 0, 10_000));
        assert!(!newer(5_000, 0, 10_000));
    }

    #[test]
    fn newer_handles_src_older_than_dst() {
        assert!(!newer(0, 100_000, 10_000));
    }

    #[test]
    fn mode_for_sets_type_bits() {
        let dir_mode = EntryMetadata::mode_for(PathType::Dir, 0o755);
        let file_mode = EntryMetadata::mode_for(PathType::File, 0o644);
        assert_eq!(dir_mode & 0o7777, 0o755);
        assert_eq!(file_mode & 0o7777, 0o644);
        assert_ne!(dir_mode & !0o7777, file_mode & !0o7777);
    }

    #[test]
    fn report_counts_successes_and_failures() {
        let report = Report::new();
        report.log(ActionKind::CopyFile, lp("a"), None);
        report.log(ActionKind::CopyFile, lp("b"), Some("boom".to_string()));
        assert_eq!(report.num_synced(), 1);
        assert_eq!(report.failures().len(), 1);
    }
}
