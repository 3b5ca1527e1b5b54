//! External collaborator: per-directory config and the Argon2i key-wrapping
//! envelope (spec.md §6; `original_source/dirconfig.py`).
use crate::{
    dirapi::{CryptDir, DirectoryAccess, PlainDir},
    fs_util,
    prelude::*,
    secure_vec::{MasterKey, Password, WrappingKey},
};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current config format version. Bumped whenever `DirConfig`'s shape or the
/// wrapping envelope's plaintext layout changes.
const CONFIG_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "dir_type", rename_all = "lowercase")]
enum DirConfig {
    Plain {
        version: String,
        exclude: Vec<String>,
    },
    Crypt {
        version: String,
        exclude: Vec<String>,
        kdf_salt: String,
        kdf_ops_limit: u32,
        kdf_mem_limit: u32,
        wrapped_master_key: String,
    },
}

fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILENAME)
}

fn read_config(dir: &Path) -> CsyncResult<DirConfig> {
    if dir.exists() && !dir.is_dir() {
        return csync_err!(WrongDirType, dir.to_path_buf());
    }
    let path = config_path(dir);
    let bytes = std::fs::read(&path).map_err(|_| CsyncErr::ConfigMissing(path.clone()))?;
    serde_json::from_slice(&bytes).map_err(|err| CsyncErr::ConfigMalformed(path, err.to_string()))
}

fn write_config(dir: &Path, config: &DirConfig, overwrite: bool) -> CsyncResult<()> {
    let path = config_path(dir);
    if path.exists() && !overwrite {
        return csync_err!(ConfigAlreadyExists, path);
    }
    let bytes = serde_json::to_vec_pretty(config)?;
    fs_util::write_atomic(&path, &bytes)?;
    Ok(())
}

/// Always exclude the config file itself, in addition to whatever the caller
/// asked for (spec.md §6: "a config file must never be synced").
fn with_config_excluded(mut exclude: Vec<String>) -> Vec<String> {
    let pattern = regex::escape(CONFIG_FILENAME);
    if !exclude.contains(&pattern) {
        exclude.push(pattern);
    }
    exclude
}

pub fn init_plain(dir: &Path, exclude: Vec<String>, overwrite: bool) -> CsyncResult<()> {
    fs_util::create_dir_all_with_parents(dir)?;
    let config = DirConfig::Plain {
        version: CONFIG_VERSION.to_string(),
        exclude: with_config_excluded(exclude),
    };
    write_config(dir, &config, overwrite)
}

pub fn init_crypt(dir: &Path, exclude: Vec<String>, password: Password, overwrite: bool) -> CsyncResult<()> {
    fs_util::create_dir_all_with_parents(dir)?;
    let mut master_key_bytes = [0u8; KEYBYTES];
    OsRng.fill_bytes(&mut master_key_bytes);
    let master_key = MasterKey(master_key_bytes);

    let salt = random_salt();
    let wrapped = wrap_key(&master_key, &password, &salt, CONFIG_VERSION)?;

    let config = DirConfig::Crypt {
        version: CONFIG_VERSION.to_string(),
        exclude: with_config_excluded(exclude),
        kdf_salt: hex::encode(salt),
        kdf_ops_limit: KDF_TIME_COST,
        kdf_mem_limit: KDF_MEM_COST_KIB,
        wrapped_master_key: hex::encode(wrapped),
    };
    write_config(dir, &config, overwrite)
}

/// Whether `dir`'s own config declares it a crypt directory, so a caller
/// knows to prompt for a password before calling `open`.
pub fn needs_password(dir: &Path) -> CsyncResult<bool> {
    Ok(matches!(read_config(dir)?, DirConfig::Crypt { .. }))
}

/// Opens `dir` per its own config, returning the directory API the sync
/// engine should drive. `password` is required (and only consulted) when the
/// config declares `dir_type: "crypt"`. `chunk_size` governs only new writes
/// into a crypt directory; reads use the chunk size embedded in each file's
/// own descriptor regardless of what's passed here.
pub fn open(dir: &Path, password: Option<Password>, chunk_size: u32) -> CsyncResult<Box<dyn DirectoryAccess>> {
    match read_config(dir)? {
        DirConfig::Plain { exclude, .. } => Ok(Box::new(PlainDir::new(dir.to_path_buf(), &exclude)?)),
        DirConfig::Crypt {
            version,
            exclude,
            kdf_salt,
            wrapped_master_key,
            ..
        } => {
            let password = password.ok_or_else(|| CsyncErr::Other("password required to open a crypt directory".to_string()))?;
            let salt = decode_hex_fixed::<KDF_SALT_LEN>(&kdf_salt)?;
            let wrapped = hex::decode(&wrapped_master_key).map_err(|err| CsyncErr::Other(err.to_string()))?;
            let (master_key, found_version) = unwrap_key(&wrapped, &password, &salt)?;
            if found_version != version {
                return Err(CsyncErr::VersionMismatch { expected: version, found: found_version });
            }
            Ok(Box::new(CryptDir::with_chunk_size(dir.to_path_buf(), master_key, &exclude, chunk_size)?))
        }
    }
}

/// Unwraps the master key under `old_password`, then rewraps the *same* key
/// under a freshly salted KDF derived from `new_password`. No ciphertext in
/// the tree changes, since the master key itself is unchanged.
pub fn change_password(dir: &Path, old_password: Password, new_password: Password) -> CsyncResult<()> {
    let mut config = read_config(dir)?;
    match &mut config {
        DirConfig::Plain { .. } => csync_err!(Other, "change-password is only valid on a crypt directory".to_string()),
        DirConfig::Crypt {
            version,
            kdf_salt,
            wrapped_master_key,
            ..
        } => {
            let salt = decode_hex_fixed::<KDF_SALT_LEN>(kdf_salt)?;
            let wrapped = hex::decode(&wrapped_master_key).map_err(|err| CsyncErr::Other(err.to_string()))?;
            let (master_key, found_version) = unwrap_key(&wrapped, &old_password, &salt)?;
            if &found_version != version {
                return Err(CsyncErr::VersionMismatch { expected: version.clone(), found: found_version });
            }

            let new_salt = random_salt();
            let new_wrapped = wrap_key(&master_key, &new_password, &new_salt, version)?;
            *kdf_salt = hex::encode(new_salt);
            *wrapped_master_key = hex::encode(new_wrapped);
            write_config(dir, &config, true)
        }
    }
}

/// Opens `dir` as crypt and forces a sidecar rebuild walk (spec.md §4.4,
/// "caller requested a rebuild").
pub fn rebuild_meta(dir: &Path, password: Password) -> CsyncResult<()> {
    match read_config(dir)? {
        DirConfig::Crypt {
            version,
            exclude,
            kdf_salt,
            wrapped_master_key,
            ..
        } => {
            let salt = decode_hex_fixed::<KDF_SALT_LEN>(&kdf_salt)?;
            let wrapped = hex::decode(&wrapped_master_key).map_err(|err| CsyncErr::Other(err.to_string()))?;
            let (master_key, found_version) = unwrap_key(&wrapped, &password, &salt)?;
            if found_version != version {
                return Err(CsyncErr::VersionMismatch { expected: version, found: found_version });
            }
            let mut crypt_dir = CryptDir::new(dir.to_path_buf(), master_key, &exclude)?;
            crypt_dir.collect_paths(true)
        }
        DirConfig::Plain { .. } => csync_err!(Other, "rebuild-meta is only valid on a crypt directory".to_string()),
    }
}

fn random_salt() -> [u8; KDF_SALT_LEN] {
    let mut salt = [0u8; KDF_SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

fn argon2_wrapping_key(password: &Password, salt: &[u8; KDF_SALT_LEN]) -> CsyncResult<WrappingKey> {
    let params = Params::new(KDF_MEM_COST_KIB, KDF_TIME_COST, KDF_PARALLELISM, Some(KEYBYTES)).map_err(|err| CsyncErr::Other(err.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);
    let mut out = [0u8; KEYBYTES];
    argon2
        .hash_password_into(&password.0, salt, &mut out)
        .map_err(|err| CsyncErr::Other(err.to_string()))?;
    Ok(WrappingKey(out))
}

/// Encrypts `master_key || version` under a key derived from `password`.
/// Nonce is random and prepended to the returned ciphertext.
fn wrap_key(master_key: &MasterKey, password: &Password, salt: &[u8; KDF_SALT_LEN], version: &str) -> CsyncResult<Vec<u8>> {
    let wrapping_key = argon2_wrapping_key(password, salt)?;
    let aead = XChaCha20Poly1305::new(wrapping_key.0.as_ref().into());

    let mut nonce_bytes = [0u8; 24];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let mut plaintext = Vec::with_capacity(KEYBYTES + version.len());
    plaintext.extend_from_slice(master_key.as_bytes());
    plaintext.extend_from_slice(version.as_bytes());

    let ciphertext = aead.encrypt(nonce, plaintext.as_ref()).map_err(|_| CsyncErr::AuthenticationFailed)?;

    let mut out = Vec::with_capacity(24 + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of `wrap_key`. A decrypt failure, or a plaintext too short to hold
/// the fixed-size key, or a non-UTF-8 version tail is `AuthenticationFailed`.
fn unwrap_key(wrapped: &[u8], password: &Password, salt: &[u8; KDF_SALT_LEN]) -> CsyncResult<(MasterKey, String)> {
    if wrapped.len() < 24 {
        return csync_err!(AuthenticationFailed);
    }
    let (nonce_bytes, ciphertext) = wrapped.split_at(24);
    let wrapping_key = argon2_wrapping_key(password, salt)?;
    let aead = XChaCha20Poly1305::new(wrapping_key.0.as_ref().into());
    let nonce = XNonce::from_slice(nonce_bytes);

    let plaintext = aead.decrypt(nonce, ciphertext).map_err(|_| CsyncErr::AuthenticationFailed)?;
    if plaintext.len() < KEYBYTES {
        return csync_err!(AuthenticationFailed);
    }
    let (key_bytes, version_bytes) = plaintext.split_at(KEYBYTES);
    let version = std::str::from_utf8(version_bytes).map_err(|_| CsyncErr::AuthenticationFailed)?.to_string();

    let mut master_key_bytes = [0u8; KEYBYTES];
    master_key_bytes.copy_from_slice(key_bytes);
    Ok((MasterKey(master_key_bytes), version))
}

fn decode_hex_fixed<const N: usize>(s: &str) -> CsyncResult<[u8; N]> {
    let bytes = hex::decode(s).map_err(|err| CsyncErr::Other(err.to_string()))?;
    if bytes.len() != N {
        return csync_err!(Other, format!("expected {} hex bytes, got {}", N, bytes.len()));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}
