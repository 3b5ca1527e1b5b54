/// THIS MOD SHOULD NOT USE THINGS FROM OTHER MODS IN THIS CRATE.
use std::{
    env,
    fs::{File, OpenOptions, Permissions},
    io::{self, Error, ErrorKind},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    str,
};
use tempfile::{self, NamedTempFile, TempDir};
use walkdir::WalkDir;

macro_rules! tmpfile {
    () => {
        crate::fs_util::mktemp_file(None, "", "")
    };
    ( $out_dir:expr ) => {
        crate::fs_util::mktemp_file(Some($out_dir), "", "")
    };
    ( $out_dir:expr, $prefix:expr ) => {
        crate::fs_util::mktemp_file(Some($out_dir), $prefix, "")
    };
    ( $out_dir:expr, $prefix:expr, $suffix:expr ) => {
        crate::fs_util::mktemp_file(Some($out_dir), $prefix, $suffix)
    };
}

macro_rules! tmpdir {
    () => {
        crate::fs_util::mktemp_dir(None, "", "")
    };
    ( $out_dir:expr ) => {
        crate::fs_util::mktemp_dir(Some($out_dir), "", "")
    };
    ( $out_dir:expr, $prefix:expr ) => {
        crate::fs_util::mktemp_dir(Some($out_dir), $prefix, "")
    };
    ( $out_dir:expr, $prefix:expr, $suffix:expr ) => {
        crate::fs_util::mktemp_dir(Some($out_dir), $prefix, $suffix)
    };
}

#[inline]
pub fn mktemp_file(out_dir: Option<&Path>, prefix: &str, suffix: &str) -> io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(out_dir.unwrap_or(env::temp_dir().as_path()))
}

#[inline]
pub fn mktemp_dir(out_dir: Option<&Path>, prefix: &str, suffix: &str) -> io::Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempdir_in(out_dir.unwrap_or(env::temp_dir().as_path()))
}

#[inline]
pub fn find<P>(root: P) -> impl Iterator<Item = io::Result<PathBuf>>
where
    P: AsRef<Path>,
{
    WalkDir::new(root).follow_links(false).into_iter().map(|entry| {
        entry
            .map(walkdir::DirEntry::into_path)
            .map_err(|err| Error::new(ErrorKind::Other, format!("{:?}", err)))
    })
}

pub fn fopen_w<P>(path: P) -> io::Result<File>
where
    P: AsRef<Path>,
{
    let file = OpenOptions::new().write(true).create(true).open(path)?;
    let perms = Permissions::from_mode(0o600);
    file.set_permissions(perms)?;
    Ok(file)
}

#[inline]
pub fn fopen_r<P>(path: P) -> io::Result<File>
where
    P: AsRef<Path>,
{
    OpenOptions::new().read(true).open(path)
}

/// Write `contents` to `dest` atomically: build the file in a tempfile
/// alongside `dest`'s parent, then rename into place. `dest` either ends up
/// holding the full write or is untouched (spec.md §4.1, "visible only when
/// complete").
pub fn write_atomic<P>(dest: P, contents: &[u8]) -> io::Result<()>
where
    P: AsRef<Path>,
{
    let dest = dest.as_ref();
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    create_dir_all_with_parents(parent)?;

    let mut tmp = mktemp_file(Some(parent), ".dirsync-", ".tmp")?;
    {
        use std::io::Write as _;
        tmp.write_all(contents)?;
        tmp.as_file().set_permissions(Permissions::from_mode(0o600))?;
        tmp.as_file().sync_all()?;
    }
    tmp.persist(dest).map_err(|err| err.error)?;
    Ok(())
}

/// `std::fs::create_dir_all`, tolerant of `dir` already existing.
#[inline]
pub fn create_dir_all_with_parents(dir: &Path) -> io::Result<()> {
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err),
    }
}
