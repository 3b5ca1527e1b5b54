//! C3: plain directory API (spec.md §4.3; `original_source/dirapi_plain.py`).
use crate::{
    dirapi::{compile_excludes, excluded_by_pattern, is_config_file, DirectoryAccess},
    fs_util,
    logical_path::LogicalPath,
    model::*,
    prelude::*,
    util,
};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    convert::TryFrom,
    fs, io,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

#[derive(Debug)]
pub struct PlainDir {
    root: PathBuf,
    exclude: Vec<Regex>,
    included: BTreeMap<LogicalPath, EntryMetadata>,
    excluded: BTreeSet<LogicalPath>,
}

impl PlainDir {
    pub fn new(root: PathBuf, exclude_patterns: &[String]) -> CsyncResult<PlainDir> {
        Ok(PlainDir {
            root,
            exclude: compile_excludes(exclude_patterns)?,
            included: BTreeMap::new(),
            excluded: BTreeSet::new(),
        })
    }
}

fn metadata_ns(secs: i64, nanos: i64) -> u64 {
    (secs.max(0) as u64).saturating_mul(1_000_000_000).saturating_add(nanos.max(0) as u64)
}

impl DirectoryAccess for PlainDir {
    fn collect_paths(&mut self, _force_rebuild: bool) -> CsyncResult<()> {
        let mut included = BTreeMap::new();
        let mut excluded = BTreeSet::new();

        let mut walker = WalkDir::new(&self.root).follow_links(false).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry?;
            let abs = entry.path().to_path_buf();
            let rel = util::subpath(&abs, &self.root).ok_or_else(|| CsyncErr::Other(format!("{:?} escapes root", abs)))?;
            let lp = LogicalPath::try_from(rel.as_path())?;

            if is_config_file(&lp) {
                excluded.insert(lp);
                continue;
            }

            let basename = entry.file_name().to_str().ok_or_else(|| CsyncErr::Other(format!("non UTF-8 name in {:?}", abs)))?;
            let meta = fs::symlink_metadata(&abs)?;
            let matched = excluded_by_pattern(&self.exclude, basename);

            if meta.is_dir() {
                if matched {
                    excluded.insert(lp);
                    walker.skip_current_dir();
                    continue;
                }
                included.insert(
                    lp.clone(),
                    EntryMetadata {
                        path: lp,
                        path_type: PathType::Dir,
                        mode: meta.mode(),
                        mtime_ns: 0,
                        ctime_ns: 0,
                    },
                );
            } else if meta.is_file() && !matched {
                included.insert(
                    lp.clone(),
                    EntryMetadata {
                        path: lp,
                        path_type: PathType::File,
                        mode: meta.mode(),
                        mtime_ns: metadata_ns(meta.mtime(), meta.mtime_nsec()),
                        ctime_ns: metadata_ns(meta.ctime(), meta.ctime_nsec()),
                    },
                );
            } else {
                // matched file, or a non-regular, non-directory entry.
                excluded.insert(lp);
            }
        }

        self.included = included;
        self.excluded = excluded;
        Ok(())
    }

    fn included(&self) -> &BTreeMap<LogicalPath, EntryMetadata> {
        &self.included
    }

    fn excluded(&self) -> &BTreeSet<LogicalPath> {
        &self.excluded
    }

    fn get_path_type(&self, p: &LogicalPath) -> Option<PathType> {
        self.included.get(p).map(|e| e.path_type)
    }

    fn get_path_times(&self, p: &LogicalPath) -> Option<(u64, u64)> {
        self.included.get(p).map(|e| (e.mtime_ns, e.ctime_ns))
    }

    fn get_path_mode(&self, p: &LogicalPath) -> Option<u32> {
        self.included.get(p).map(|e| e.mode)
    }

    fn make_dir(&mut self, p: &LogicalPath, mode: u32, report: &Report) {
        let abs = p.to_abs(&self.root);
        let result = fs::create_dir(&abs).and_then(|()| fs::set_permissions(&abs, fs::Permissions::from_mode(mode & 0o7777)));
        match result {
            Ok(()) => {
                self.included.insert(
                    p.clone(),
                    EntryMetadata {
                        path: p.clone(),
                        path_type: PathType::Dir,
                        mode: EntryMetadata::mode_for(PathType::Dir, mode),
                        mtime_ns: 0,
                        ctime_ns: 0,
                    },
                );
                report.log(ActionKind::AddDir, p.clone(), None);
            }
            Err(err) => report.log(ActionKind::AddDir, p.clone(), Some(err.to_string())),
        }
    }

    fn remove_dir(&mut self, p: &LogicalPath, report: &Report) {
        let abs = p.to_abs(&self.root);
        match fs::remove_dir_all(&abs) {
            Ok(()) => {
                self.included.remove(p);
                report.log(ActionKind::RemoveDir, p.clone(), None);
            }
            Err(err) => report.log(ActionKind::RemoveDir, p.clone(), Some(err.to_string())),
        }
    }

    fn remove_file(&mut self, p: &LogicalPath, report: &Report) {
        let abs = p.to_abs(&self.root);
        match fs::remove_file(&abs) {
            Ok(()) => {
                self.included.remove(p);
                report.log(ActionKind::RemoveFile, p.clone(), None);
            }
            Err(err) => report.log(ActionKind::RemoveFile, p.clone(), Some(err.to_string())),
        }
    }

    fn push_file(&mut self, p: &LogicalPath, src_abs: &Path, report: &Report) {
        let dst_abs = p.to_abs(&self.root);
        match copy_preserving_metadata(src_abs, &dst_abs, p) {
            Ok(meta) => {
                self.included.insert(p.clone(), meta);
                report.log(ActionKind::CopyFile, p.clone(), None);
            }
            Err(err) => report.log(ActionKind::CopyFile, p.clone(), Some(err.to_string())),
        }
    }

    fn pull_file(&mut self, p: &LogicalPath, dst_abs: &Path, report: &Report) {
        let src_abs = p.to_abs(&self.root);
        match copy_preserving_metadata(&src_abs, dst_abs, p) {
            Ok(_) => report.log(ActionKind::CopyFile, p.clone(), None),
            Err(err) => report.log(ActionKind::CopyFile, p.clone(), Some(err.to_string())),
        }
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn is_plain(&self) -> bool {
        true
    }
}

/// `shutil.copy2`-equivalent: copy content, then mode and mtime.
///
/// Writes through a tempfile in `dst`'s parent and renames into place
/// (the same atomic-write pattern as `fs_util::write_atomic`) instead of
/// `fs::copy(src, dst)`, which opens `dst` by path and would follow a
/// symlink planted there. A rename replaces whatever is at `dst` --
/// symlink, regular file, or nothing -- without ever dereferencing it.
fn copy_preserving_metadata(src: &Path, dst: &Path, lp: &LogicalPath) -> CsyncResult<EntryMetadata> {
    let src_meta = fs::symlink_metadata(src)?;

    let parent = dst.parent().unwrap_or_else(|| Path::new("."));
    fs_util::create_dir_all_with_parents(parent)?;
    let mut tmp = fs_util::mktemp_file(Some(parent), ".dirsync-", ".tmp")?;
    io::copy(&mut fs_util::fopen_r(src)?, tmp.as_file_mut())?;
    tmp.as_file().set_permissions(fs::Permissions::from_mode(src_meta.mode() & 0o7777))?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst).map_err(|err| err.error)?;

    let mtime = filetime::FileTime::from_last_modification_time(&src_meta);
    filetime::set_file_times(dst, mtime, mtime)?;

    Ok(EntryMetadata {
        path: lp.clone(),
        path_type: PathType::File,
        mode: src_meta.mode(),
        mtime_ns: metadata_ns(src_meta.mtime(), src_meta.mtime_nsec()),
        ctime_ns: metadata_ns(src_meta.ctime(), src_meta.ctime_nsec()),
    })
}
