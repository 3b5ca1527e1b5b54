//! C2: path codec (spec.md §4.2/§6).
///
/// THIS MOD SHOULD NOT USE THINGS FROM OTHER MODS IN THIS CRATE, other than
/// `prelude`, `logical_path`, and `secure_vec`.
use crate::{logical_path::LogicalPath, prelude::*, secure_vec::MasterKey};
use blake2::{
    digest::{consts::U32, FixedOutput, KeyInit, Update},
    Blake2bMac,
};
use std::convert::TryFrom;

type Blake2bMac256 = Blake2bMac<U32>;

/// Three-component on-disk location of a ciphertext shard: `[0:2]/[2:4]/[4:]`
/// of the lowercase hex keyed BLAKE2b-256 hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPath {
    pub top: String,
    pub mid: String,
    pub rest: String,
}

impl ShardPath {
    pub fn to_relative_path(&self) -> std::path::PathBuf {
        [&self.top, &self.mid, &self.rest].iter().collect()
    }
}

/// Join the UTF-8 encodings of `p`'s components with a single `0x00` byte.
pub fn path_encode(p: &LogicalPath) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, comp) in p.components().iter().enumerate() {
        if i > 0 {
            out.push(0u8);
        }
        out.extend_from_slice(comp.as_bytes());
    }
    out
}

/// Inverse of `path_encode`. Split on `0x00`, UTF-8-decode each piece, rebuild
/// the path.
pub fn path_decode(bytes: &[u8]) -> CsyncResult<LogicalPath> {
    let comps: CsyncResult<Vec<String>> = bytes
        .split(|b| *b == 0u8)
        .map(|piece| {
            std::str::from_utf8(piece)
                .map(String::from)
                .map_err(|err| CsyncErr::Other(format!("path_decode: invalid UTF-8: {}", err)))
        })
        .collect();
    let comps = comps?;
    let rel: std::path::PathBuf = comps.iter().collect();
    LogicalPath::try_from(rel.as_path())
}

/// Keyed BLAKE2b-256 over `path_encode(p)`, lowercase hex, split into the
/// 2/2/60 shard triple.
pub fn path_hash(key: &MasterKey, p: &LogicalPath) -> ShardPath {
    let mut mac = Blake2bMac256::new_from_slice(key.as_bytes()).expect("blake2b accepts a 32-byte key");
    mac.update(&path_encode(p));
    let digest = mac.finalize_fixed();
    let hex = hex::encode(digest);
    debug_assert_eq!(hex.len(), 64);
    ShardPath {
        top: hex[0..2].to_string(),
        mid: hex[2..4].to_string(),
        rest: hex[4..].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> MasterKey {
        MasterKey([byte; crate::prelude::KEYBYTES])
    }

    fn lp(comps: &[&str]) -> LogicalPath {
        let rel: std::path::PathBuf = comps.iter().collect();
        LogicalPath::try_from(rel.as_path()).unwrap()
    }

    #[test]
    fn encode_joins_with_nul() {
        let p = lp(&["a", "b", "c.txt"]);
        assert_eq!(path_encode(&p), b"a\0b\0c.txt".to_vec());
    }

    #[test]
    fn decode_is_inverse_of_encode() {
        let cases: Vec<LogicalPath> = vec![lp(&["a"]), lp(&["a", "b"]), lp(&["a", "b", "c.txt"]), lp(&["déjà-vu", "日本語"])];
        for p in cases {
            let decoded = path_decode(&path_encode(&p)).unwrap();
            assert_eq!(decoded, p);
        }
    }

    #[test]
    fn hash_has_correct_shape() {
        let shard = path_hash(&key(1), &lp(&["a", "b.txt"]));
        assert_eq!(shard.top.len(), 2);
        assert_eq!(shard.mid.len(), 2);
        assert_eq!(shard.rest.len(), 60);
        assert!(shard.top.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn hash_is_deterministic() {
        let p = lp(&["a", "b.txt"]);
        assert_eq!(path_hash(&key(7), &p), path_hash(&key(7), &p));
    }

    #[test]
    fn hash_depends_on_key() {
        let p = lp(&["a", "b.txt"]);
        assert_ne!(path_hash(&key(7), &p), path_hash(&key(8), &p));
    }

    #[test]
    fn hash_depends_on_path() {
        assert_ne!(path_hash(&key(7), &lp(&["a"])), path_hash(&key(7), &lp(&["b"])));
    }
}
