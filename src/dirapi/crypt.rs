//! C4: crypt directory API (spec.md §4.4; `original_source/dirapi_crypt.py`,
//! generalized with the metadata sidecar spec.md adds).
use crate::{
    dirapi::{compile_excludes, excluded_by_pattern, DirectoryAccess},
    file_codec::{self, DecryptMode},
    fs_util,
    logical_path::LogicalPath,
    model::*,
    path_codec::{self, ShardPath},
    prelude::*,
    secure_vec::MasterKey,
};
use regex::Regex;
use std::{
    collections::{BTreeMap, BTreeSet},
    convert::TryInto,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

pub struct CryptDir {
    root: PathBuf,
    key: MasterKey,
    exclude: Vec<Regex>,
    chunk_size: u32,
    included: BTreeMap<LogicalPath, EntryMetadata>,
    excluded: BTreeSet<LogicalPath>,
    fatal: Option<CsyncErr>,
}

impl std::fmt::Debug for CryptDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptDir")
            .field("root", &self.root)
            .field("chunk_size", &self.chunk_size)
            .field("included", &self.included)
            .field("excluded", &self.excluded)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

impl CryptDir {
    pub fn new(root: PathBuf, key: MasterKey, exclude_patterns: &[String]) -> CsyncResult<CryptDir> {
        CryptDir::with_chunk_size(root, key, exclude_patterns, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(root: PathBuf, key: MasterKey, exclude_patterns: &[String], chunk_size: u32) -> CsyncResult<CryptDir> {
        Ok(CryptDir {
            root,
            key,
            exclude: compile_excludes(exclude_patterns)?,
            chunk_size,
            included: BTreeMap::new(),
            excluded: BTreeSet::new(),
            fatal: None,
        })
    }

    fn shard_abs(&self, subdir: &str, shard: &ShardPath) -> PathBuf {
        self.root.join(subdir).join(shard.to_relative_path())
    }

    fn latch_fatal(&mut self, err: CsyncErr) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }
}

fn encode_metadata(entry: &EntryMetadata) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.extend_from_slice(&entry.mode.to_le_bytes());
    out.extend_from_slice(&entry.mtime_ns.to_le_bytes());
    out.extend_from_slice(&entry.ctime_ns.to_le_bytes());
    out.extend_from_slice(&path_codec::path_encode(&entry.path));
    out
}

fn decode_metadata(bytes: &[u8]) -> CsyncResult<EntryMetadata> {
    if bytes.len() < 20 {
        return csync_err!(Other, "metadata body shorter than fixed header".to_string());
    }
    let mode = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let mtime_ns = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
    let ctime_ns = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
    let path = path_codec::path_decode(&bytes[20..])?;
    let path_type = if mode & S_IFMT == S_IFDIR { PathType::Dir } else { PathType::File };
    Ok(EntryMetadata {
        path,
        path_type,
        mode,
        mtime_ns,
        ctime_ns,
    })
}

/// Every regular file under `root`'s shard subtree, ignoring the shard
/// directory structure itself (the 2/2/60 split has no logical meaning).
fn shard_files(root: &Path, subdir: &str) -> CsyncResult<Vec<PathBuf>> {
    let dir = root.join(subdir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs_util::find(&dir) {
        let abs = entry?;
        if abs.is_file() {
            out.push(abs);
        }
    }
    Ok(out)
}

impl DirectoryAccess for CryptDir {
    fn collect_paths(&mut self, force_rebuild: bool) -> CsyncResult<()> {
        let sidecar_dir = self.root.join(SIDECAR_SUBDIR);
        let rebuild = force_rebuild || !sidecar_dir.exists();

        let mut decoded = Vec::new();
        if rebuild {
            for cipher_abs in shard_files(&self.root, CIPHERTEXT_SUBDIR)? {
                let metadata_bytes = file_codec::decrypt(&self.key, &cipher_abs, None, DecryptMode::MetadataOnly, None)?;
                let entry = decode_metadata(&metadata_bytes)?;
                let expected_shard = path_codec::path_hash(&self.key, &entry.path);
                let actual_rel = crate::util::subpath(&cipher_abs, &self.root.join(CIPHERTEXT_SUBDIR))
                    .ok_or_else(|| CsyncErr::Other(format!("{:?} escapes shard tree", cipher_abs)))?;
                if actual_rel != expected_shard.to_relative_path() {
                    return csync_err!(ShardMismatch, cipher_abs);
                }
                let sidecar_abs = self.shard_abs(SIDECAR_SUBDIR, &expected_shard);
                fs_util::create_dir_all_with_parents(sidecar_abs.parent().unwrap())?;
                file_codec::encrypt(&self.key, None, &sidecar_abs, &metadata_bytes, self.chunk_size)?;
                decoded.push(entry);
            }
        } else {
            for sidecar_abs in shard_files(&self.root, SIDECAR_SUBDIR)? {
                let metadata_bytes = file_codec::decrypt(&self.key, &sidecar_abs, None, DecryptMode::MetadataOnly, None)?;
                decoded.push(decode_metadata(&metadata_bytes)?);
            }
        }

        let mut included = BTreeMap::new();
        let mut excluded = BTreeSet::new();
        for entry in decoded {
            let is_excluded = entry.path.components().iter().any(|comp| excluded_by_pattern(&self.exclude, comp));
            if is_excluded {
                excluded.insert(entry.path);
            } else {
                included.insert(entry.path.clone(), entry);
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
        let entry = EntryMetadata {
            path: p.clone(),
            path_type: PathType::Dir,
            mode: EntryMetadata::mode_for(PathType::Dir, mode),
            mtime_ns: 0,
            ctime_ns: 0,
        };
        let metadata_bytes = encode_metadata(&entry);
        let shard = path_codec::path_hash(&self.key, p);
        let cipher_abs = self.shard_abs(CIPHERTEXT_SUBDIR, &shard);
        let sidecar_abs = self.shard_abs(SIDECAR_SUBDIR, &shard);

        let result = (|| -> CsyncResult<()> {
            fs_util::create_dir_all_with_parents(cipher_abs.parent().unwrap())?;
            fs_util::create_dir_all_with_parents(sidecar_abs.parent().unwrap())?;
            file_codec::encrypt(&self.key, None, &cipher_abs, &metadata_bytes, self.chunk_size)?;
            file_codec::encrypt(&self.key, None, &sidecar_abs, &metadata_bytes, self.chunk_size)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.included.insert(p.clone(), entry);
                report.log(ActionKind::AddDir, p.clone(), None);
            }
            Err(err) => report.log(ActionKind::AddDir, p.clone(), Some(err.to_string())),
        }
    }

    fn remove_dir(&mut self, p: &LogicalPath, report: &Report) {
        self.remove_shard_pair(p, ActionKind::RemoveDir, report);
    }

    fn remove_file(&mut self, p: &LogicalPath, report: &Report) {
        self.remove_shard_pair(p, ActionKind::RemoveFile, report);
    }

    fn push_file(&mut self, p: &LogicalPath, src_abs: &Path, report: &Report) {
        let result = (|| -> CsyncResult<EntryMetadata> {
            let src_meta = std::fs::symlink_metadata(src_abs)?;
            let entry = EntryMetadata {
                path: p.clone(),
                path_type: PathType::File,
                mode: src_meta.mode(),
                mtime_ns: (src_meta.mtime().max(0) as u64) * 1_000_000_000 + src_meta.mtime_nsec().max(0) as u64,
                ctime_ns: (src_meta.ctime().max(0) as u64) * 1_000_000_000 + src_meta.ctime_nsec().max(0) as u64,
            };
            let metadata_bytes = encode_metadata(&entry);
            let shard = path_codec::path_hash(&self.key, p);
            let cipher_abs = self.shard_abs(CIPHERTEXT_SUBDIR, &shard);
            let sidecar_abs = self.shard_abs(SIDECAR_SUBDIR, &shard);

            fs_util::create_dir_all_with_parents(cipher_abs.parent().unwrap())?;
            fs_util::create_dir_all_with_parents(sidecar_abs.parent().unwrap())?;
            file_codec::encrypt(&self.key, Some(src_abs), &cipher_abs, &metadata_bytes, self.chunk_size)?;
            file_codec::encrypt(&self.key, None, &sidecar_abs, &metadata_bytes, self.chunk_size)?;
            Ok(entry)
        })();

        match result {
            Ok(entry) => {
                self.included.insert(p.clone(), entry);
                report.log(ActionKind::CopyFile, p.clone(), None);
            }
            Err(err) => {
                if err.is_authenticity_failure() {
                    self.latch_fatal(err);
                } else {
                    report.log(ActionKind::CopyFile, p.clone(), Some(err.to_string()));
                }
            }
        }
    }

    fn pull_file(&mut self, p: &LogicalPath, dst_abs: &Path, report: &Report) {
        let shard = path_codec::path_hash(&self.key, p);
        let cipher_abs = self.shard_abs(CIPHERTEXT_SUBDIR, &shard);
        let expected_path = p.clone();

        let predicate = move |metadata: &[u8]| match decode_metadata(metadata) {
            Ok(entry) => entry.path == expected_path && entry.path_type == PathType::File,
            Err(_) => false,
        };

        let result = file_codec::decrypt(&self.key, &cipher_abs, Some(dst_abs), DecryptMode::Full, Some(&predicate)).and_then(|metadata_bytes| {
            let entry = decode_metadata(&metadata_bytes)?;
            std::fs::set_permissions(dst_abs, std::fs::Permissions::from_mode(entry.perm_bits()))?;
            let mtime = filetime::FileTime::from_unix_time((entry.mtime_ns / 1_000_000_000) as i64, (entry.mtime_ns % 1_000_000_000) as u32);
            filetime::set_file_times(dst_abs, mtime, mtime)?;
            Ok(())
        });

        match result {
            Ok(()) => report.log(ActionKind::CopyFile, p.clone(), None),
            Err(err) => {
                if err.is_authenticity_failure() {
                    self.latch_fatal(err);
                } else {
                    report.log(ActionKind::CopyFile, p.clone(), Some(err.to_string()));
                }
            }
        }
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn is_plain(&self) -> bool {
        false
    }

    fn take_fatal_error(&mut self) -> Option<CsyncErr> {
        self.fatal.take()
    }
}

impl CryptDir {
    fn remove_shard_pair(&mut self, p: &LogicalPath, action: ActionKind, report: &Report) {
        let shard = path_codec::path_hash(&self.key, p);
        let cipher_abs = self.shard_abs(CIPHERTEXT_SUBDIR, &shard);
        let sidecar_abs = self.shard_abs(SIDECAR_SUBDIR, &shard);

        let cipher_result = std::fs::remove_file(&cipher_abs);
        let _ = std::fs::remove_file(&sidecar_abs);

        match cipher_result {
            Ok(()) => {
                self.included.remove(p);
                report.log(action, p.clone(), None);
            }
            Err(err) => report.log(action, p.clone(), Some(err.to_string())),
        }
    }
}
