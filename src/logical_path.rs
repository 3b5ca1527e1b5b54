/// THIS MOD SHOULD NOT USE THINGS FROM OTHER MODS IN THIS CRATE, other than `prelude`.
use crate::prelude::*;
use std::{
    convert::TryFrom,
    fmt::{self, Display, Formatter},
    path::{Component, Path, PathBuf},
};

/// An ordered sequence of non-empty path components, relative to some tree
/// root (spec.md §3). No component may contain `\0` or be `.`/`..`.
///
/// Equality and ordering are lexicographic over components, which is what the
/// sync engine relies on for its deterministic ascending/descending sync
/// action order (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalPath(Vec<String>);

impl LogicalPath {
    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<LogicalPath> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(LogicalPath(self.0[..n - 1].to_vec())),
        }
    }

    /// Number of ancestors between this path and the tree root, i.e.
    /// `components().len()`. Used to order directory creation/removal.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn join(&self, child: &str) -> CsyncResult<LogicalPath> {
        let mut comps = self.0.clone();
        comps.push(child.to_string());
        LogicalPath::try_new(comps)
    }

    fn try_new(comps: Vec<String>) -> CsyncResult<LogicalPath> {
        for comp in &comps {
            if comp.is_empty() || comp.contains('\0') || comp == "." || comp == ".." {
                return csync_err!(Other, format!("invalid logical path component: {:?}", comp));
            }
        }
        Ok(LogicalPath(comps))
    }

    /// Resolve this logical path against a filesystem root.
    pub fn to_abs(&self, root: &Path) -> PathBuf {
        let mut pbuf = root.to_path_buf();
        self.0.iter().for_each(|comp| pbuf.push(comp));
        pbuf
    }
}

impl TryFrom<&Path> for LogicalPath {
    type Error = CsyncErr;

    fn try_from(path: &Path) -> CsyncResult<LogicalPath> {
        let comps: CsyncResult<Vec<String>> = path
            .components()
            .map(|c| match c {
                Component::Normal(os) => os
                    .to_str()
                    .map(String::from)
                    .ok_or_else(|| CsyncErr::Other(format!("non UTF-8 path component in {:?}", path))),
                other => Err(CsyncErr::Other(format!("unsupported path component {:?} in {:?}", other, path))),
            })
            .collect();
        LogicalPath::try_new(comps?)
    }
}

impl AsRef<[String]> for LogicalPath {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

impl Display for LogicalPath {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_component() {
        assert!(LogicalPath::try_new(vec!["a".into(), "".into()]).is_err());
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(LogicalPath::try_new(vec!["a\0b".into()]).is_err());
    }

    #[test]
    fn rejects_dot_and_dotdot() {
        assert!(LogicalPath::try_new(vec![".".into()]).is_err());
        assert!(LogicalPath::try_new(vec!["..".into()]).is_err());
        assert!(LogicalPath::try_new(vec!["a".into(), "..".into()]).is_err());
    }

    #[test]
    fn accepts_normal_components() {
        let lp = LogicalPath::try_new(vec!["a".into(), "b.txt".into()]).unwrap();
        assert_eq!(lp.components(), &["a".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn ordering_is_lexicographic_over_components() {
        let a = LogicalPath::try_new(vec!["a".into()]).unwrap();
        let b = LogicalPath::try_new(vec!["a".into(), "b".into()]).unwrap();
        let c = LogicalPath::try_new(vec!["b".into()]).unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn depth_matches_component_count() {
        let lp = LogicalPath::try_new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(lp.depth(), 3);
        assert_eq!(lp.parent().unwrap().depth(), 2);
    }

    #[test]
    fn try_from_path_round_trips_for_valid_paths() {
        let p = Path::new("a/b/c.txt");
        let lp = LogicalPath::try_from(p).unwrap();
        assert_eq!(lp.to_string(), "a/b/c.txt");
    }

    #[test]
    fn to_abs_joins_under_root() {
        let lp = LogicalPath::try_new(vec!["a".into(), "b".into()]).unwrap();
        let abs = lp.to_abs(Path::new("/root"));
        assert_eq!(abs, PathBuf::from("/root/a/b"));
    }
}
