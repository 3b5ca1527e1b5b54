pub const BUFFER_SIZE: usize = 1 << 16;

/// Filename of the per-directory config, written by `init-plain`/`init-crypt`.
///
/// Always excluded from sync, on both sides, regardless of user-supplied patterns.
pub const CONFIG_FILENAME: &str = ".dirsync.json";

/// Reserved subdirectory holding the ciphertext shard tree of a `crypt` root.
pub const CIPHERTEXT_SUBDIR: &str = "objects";

/// Reserved subdirectory holding the metadata-only sidecar shard tree.
pub const SIDECAR_SUBDIR: &str = "meta";

/// Default AEAD frame size, in plaintext bytes, used by the file codec.
///
/// Matches `chunk_size` in `original_source/dirapi_crypt.py`.
pub const DEFAULT_CHUNK_SIZE: u32 = 4096;

/// `newer()` tolerance, in nanoseconds, for filesystem timestamp rounding.
pub const TIME_RESOLUTION_NS: u64 = 10_000;

/// Master key size, in bytes (`KEYBYTES` in spec.md's vocabulary).
pub const KEYBYTES: usize = 32;

/// Salt length for the Argon2i key-wrapping KDF.
pub const KDF_SALT_LEN: usize = 16;

/// Argon2i memory cost, in KiB. "Moderate" per spec.md §6.
pub const KDF_MEM_COST_KIB: u32 = 64 * 1024;

/// Argon2i time cost (number of passes). "Moderate" per spec.md §6.
pub const KDF_TIME_COST: u32 = 3;

/// Argon2i parallelism.
pub const KDF_PARALLELISM: u32 = 1;

/// Default settle delay for watch mode, matching `watchsync.py`'s `settle=0.2`.
pub const DEFAULT_SETTLE_MS: u64 = 200;

pub const REPORT_HEADER_NUM_FILES: &str = "Files synced";

const_assert!(BUFFER_SIZE == 65536);
const_assert!(KEYBYTES == 32);
const_assert!(KDF_SALT_LEN == 16);
