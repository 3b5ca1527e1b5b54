//! C1: file codec (spec.md §4.1/§6).
///
/// Turns a plaintext file plus out-of-band metadata into a single
/// self-describing ciphertext file and back, under streaming AEAD
/// (`chacha20poly1305::aead::stream`, the RustCrypto analogue of the
/// libsodium secretstream used by `original_source/filecrypt.py`).
use crate::{fs_util, prelude::*, secure_vec::MasterKey, util::read_exact};
use chacha20poly1305::{
    aead::{
        stream::{DecryptorBE32, EncryptorBE32},
        KeyInit,
    },
    XChaCha20Poly1305,
};
use rand::{rngs::OsRng, RngCore};
use std::{
    convert::{TryFrom, TryInto},
    path::Path,
};

/// Fresh-randomness prefix length: XChaCha20Poly1305's 24-byte nonce minus
/// the 5-byte big-endian stream counter (`StreamBE32`).
const HEADER_LEN: usize = 19;
/// Poly1305 authentication tag overhead per frame.
const TAG_LEN: usize = 16;
/// Cleartext descriptor length: `metadata_size`(4) + `chunk_size`(4) + `plain_size`(8).
const DESCRIPTOR_LEN: usize = 16;

/// How much of a ciphertext file to materialize on decrypt.
pub enum DecryptMode {
    /// Decrypt the body into `plain_path` as well.
    Full,
    /// Return only the metadata bytes; never touch the body frames.
    MetadataOnly,
}

fn encode_descriptor(metadata_size: u32, chunk_size: u32, plain_size: u64) -> [u8; DESCRIPTOR_LEN] {
    let mut buf = [0u8; DESCRIPTOR_LEN];
    buf[0..4].copy_from_slice(&metadata_size.to_le_bytes());
    buf[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    buf[8..16].copy_from_slice(&plain_size.to_le_bytes());
    buf
}

fn decode_descriptor(bytes: &[u8]) -> CsyncResult<(u32, u32, u64)> {
    if bytes.len() != DESCRIPTOR_LEN {
        return csync_err!(DescriptorMismatch);
    }
    let metadata_size = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let chunk_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let plain_size = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    Ok((metadata_size, chunk_size, plain_size))
}

/// Plaintext byte lengths of the body frames: each at most `chunk_size`,
/// summing to `total`. Empty if `total == 0`.
fn chunk_lengths(total: u64, chunk_size: u32) -> Vec<u64> {
    if total == 0 {
        return Vec::new();
    }
    let chunk_size = chunk_size as u64;
    let mut lens = Vec::new();
    let mut remaining = total;
    while remaining > chunk_size {
        lens.push(chunk_size);
        remaining -= chunk_size;
    }
    lens.push(remaining);
    lens
}

fn aead_for(key: &MasterKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(key.as_bytes().into())
}

/// Encode one file plus its metadata as a self-describing ciphertext at
/// `cipher_path`. `plain_path = None` encodes a pure-metadata entry (e.g. a
/// directory placeholder) with no body frames.
pub fn encrypt(key: &MasterKey, plain_path: Option<&Path>, cipher_path: &Path, metadata: &[u8], chunk_size: u32) -> CsyncResult<()> {
    let metadata_size = u32::try_from(metadata.len()).map_err(|_| CsyncErr::Other("metadata too large".to_string()))?;
    let plain_size: u64 = match plain_path {
        Some(p) => std::fs::metadata(p)?.len(),
        None => 0,
    };

    let descriptor = encode_descriptor(metadata_size, chunk_size, plain_size);

    let mut header = [0u8; HEADER_LEN];
    OsRng.fill_bytes(&mut header);

    let mut out = Vec::with_capacity(DESCRIPTOR_LEN + HEADER_LEN + metadata.len() + plain_size as usize);
    out.extend_from_slice(&descriptor);
    out.extend_from_slice(&header);

    let mut first_frame_plain = Vec::with_capacity(DESCRIPTOR_LEN + metadata.len());
    first_frame_plain.extend_from_slice(&descriptor);
    first_frame_plain.extend_from_slice(metadata);

    let mut encryptor = Some(EncryptorBE32::from_aead(aead_for(key), (&header).into()));
    let lens = chunk_lengths(plain_size, chunk_size);

    // The metadata frame is never FINAL, even when there are no body frames:
    // spec.md's wire layout only tags the last *body* chunk FINAL, and the
    // stream construction folds that tag into the per-chunk nonce, so tagging
    // the metadata frame FINAL here would produce different ciphertext bytes
    // than a reader expects for a zero-byte file or a directory placeholder.
    let frame = encryptor
        .as_mut()
        .unwrap()
        .encrypt_next(first_frame_plain.as_slice())
        .map_err(|_| CsyncErr::AuthenticationFailed)?;
    out.extend_from_slice(&frame);

    if !lens.is_empty() {
        let mut src = fs_util::fopen_r(plain_path.expect("plain_size > 0 implies plain_path is Some"))?;
        for (i, len) in lens.iter().enumerate() {
            let chunk = read_exact(*len as usize, &mut src)?;
            let frame = if i + 1 == lens.len() {
                encryptor.take().unwrap().encrypt_last(chunk.as_slice())
            } else {
                encryptor.as_mut().unwrap().encrypt_next(chunk.as_slice())
            }
            .map_err(|_| CsyncErr::AuthenticationFailed)?;
            out.extend_from_slice(&frame);
        }
    }

    fs_util::write_atomic(cipher_path, &out)?;
    Ok(())
}

/// Decrypt `cipher_path`, returning the bound metadata bytes. In `Full` mode
/// also streams the body into `plain_path`. `predicate`, if given, is
/// checked against the decoded metadata before any body frame is read;
/// failure is an authenticity error (spec.md §4.1/§4.4).
pub fn decrypt(
    key: &MasterKey,
    cipher_path: &Path,
    plain_path: Option<&Path>,
    mode: DecryptMode,
    predicate: Option<&dyn Fn(&[u8]) -> bool>,
) -> CsyncResult<Vec<u8>> {
    let mut src = fs_util::fopen_r(cipher_path)?;

    let descriptor_bytes = read_exact(DESCRIPTOR_LEN, &mut src)?;
    let (metadata_size, chunk_size, plain_size) = decode_descriptor(&descriptor_bytes)?;

    let header_bytes = read_exact(HEADER_LEN, &mut src)?;
    let header: [u8; HEADER_LEN] = header_bytes.as_slice().try_into().map_err(|_| CsyncErr::DescriptorMismatch)?;

    let mut decryptor = Some(DecryptorBE32::from_aead(aead_for(key), (&header).into()));
    let lens = chunk_lengths(plain_size, chunk_size);

    let first_frame_cipher = read_exact(DESCRIPTOR_LEN + metadata_size as usize + TAG_LEN, &mut src)?;
    // Mirrors encrypt(): the metadata frame is always MESSAGE-tagged, even
    // when there are no body frames to follow.
    let first_frame_plain = decryptor
        .as_mut()
        .unwrap()
        .decrypt_next(first_frame_cipher.as_slice())
        .map_err(|_| CsyncErr::AuthenticationFailed)?;

    if first_frame_plain.len() != DESCRIPTOR_LEN + metadata_size as usize {
        return csync_err!(DescriptorMismatch);
    }
    let (bound_descriptor, metadata) = first_frame_plain.split_at(DESCRIPTOR_LEN);
    if bound_descriptor != descriptor_bytes.as_slice() {
        return csync_err!(DescriptorMismatch);
    }
    let metadata = metadata.to_vec();

    if let Some(pred) = predicate {
        if !pred(&metadata) {
            return csync_err!(PathPredicateFailed, cipher_path.to_path_buf());
        }
    }

    if matches!(mode, DecryptMode::MetadataOnly) || plain_path.is_none() || lens.is_empty() {
        return Ok(metadata);
    }

    let mut body = Vec::with_capacity(plain_size as usize);
    for (i, len) in lens.iter().enumerate() {
        let frame_cipher = read_exact(*len as usize + TAG_LEN, &mut src)?;
        let frame_plain = if i + 1 == lens.len() {
            decryptor.take().unwrap().decrypt_last(frame_cipher.as_slice())
        } else {
            decryptor.as_mut().unwrap().decrypt_next(frame_cipher.as_slice())
        }
        .map_err(|_| CsyncErr::AuthenticationFailed)?;
        body.extend_from_slice(&frame_plain);
    }

    fs_util::write_atomic(plain_path.unwrap(), &body)?;
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> MasterKey {
        MasterKey([byte; crate::prelude::KEYBYTES])
    }

    fn roundtrip(body: &[u8], metadata: &[u8], chunk_size: u32) -> (Vec<u8>, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let plain_in = dir.path().join("in");
        let cipher = dir.path().join("cipher");
        let plain_out = dir.path().join("out");
        std::fs::write(&plain_in, body).unwrap();

        let k = key(42);
        encrypt(&k, Some(&plain_in), &cipher, metadata, chunk_size).unwrap();
        let decoded_metadata = decrypt(&k, &cipher, Some(&plain_out), DecryptMode::Full, None).unwrap();
        let decoded_body = std::fs::read(&plain_out).unwrap();
        (decoded_metadata, decoded_body)
    }

    #[test]
    fn round_trip_small_file() {
        let (m, b) = roundtrip(b"hello world", b"meta", 4096);
        assert_eq!(m, b"meta");
        assert_eq!(b, b"hello world");
    }

    #[test]
    fn round_trip_empty_file() {
        let (m, b) = roundtrip(b"", b"meta", 4096);
        assert_eq!(m, b"meta");
        assert_eq!(b, b"");
    }

    #[test]
    fn round_trip_multi_frame() {
        let body: Vec<u8> = (0..8193u32).map(|i| (i % 256) as u8).collect();
        let (m, b) = roundtrip(&body, b"meta", 4096);
        assert_eq!(m, b"meta");
        assert_eq!(b, body);
    }

    #[test]
    fn round_trip_no_body() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = dir.path().join("cipher");
        let k = key(1);
        encrypt(&k, None, &cipher, b"dir-meta", 4096).unwrap();
        let metadata = decrypt(&k, &cipher, None, DecryptMode::MetadataOnly, None).unwrap();
        assert_eq!(metadata, b"dir-meta");
    }

    /// The metadata frame of a zero-byte file (or a directory placeholder,
    /// which also has no body frames) must be tagged MESSAGE, not FINAL: the
    /// stream construction folds the tag into the per-chunk nonce, so a
    /// FINAL-tagged frame is bit-for-bit different ciphertext from a
    /// MESSAGE-tagged one even for identical plaintext and key. Round-trip
    /// tests alone can't catch a FINAL/MESSAGE swap because encrypt/decrypt
    /// are self-consistent either way; this test instead reconstructs the
    /// frame independently and compares raw bytes.
    #[test]
    fn empty_body_metadata_frame_is_message_tagged_not_final() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = dir.path().join("cipher");
        let k = key(9);
        encrypt(&k, None, &cipher, b"dir-meta", 4096).unwrap();

        let bytes = std::fs::read(&cipher).unwrap();
        let header: [u8; HEADER_LEN] = bytes[DESCRIPTOR_LEN..DESCRIPTOR_LEN + HEADER_LEN].try_into().unwrap();
        let frame_in_file = &bytes[DESCRIPTOR_LEN + HEADER_LEN..];

        let descriptor = encode_descriptor(8, 4096, 0);
        let mut first_frame_plain = descriptor.to_vec();
        first_frame_plain.extend_from_slice(b"dir-meta");

        let message_frame = EncryptorBE32::from_aead(aead_for(&k), (&header).into())
            .encrypt_next(first_frame_plain.as_slice())
            .unwrap();
        let final_frame = EncryptorBE32::from_aead(aead_for(&k), (&header).into())
            .encrypt_last(first_frame_plain.as_slice())
            .unwrap();

        assert_ne!(message_frame, final_frame, "MESSAGE and FINAL tags must produce different ciphertext");
        assert_eq!(frame_in_file, message_frame.as_slice());
    }

    #[test]
    fn metadata_only_does_not_touch_body() {
        let dir = tempfile::tempdir().unwrap();
        let plain_in = dir.path().join("in");
        let cipher = dir.path().join("cipher");
        std::fs::write(&plain_in, b"a body").unwrap();
        let k = key(2);
        encrypt(&k, Some(&plain_in), &cipher, b"meta", 4096).unwrap();

        let metadata = decrypt(&k, &cipher, None, DecryptMode::MetadataOnly, None).unwrap();
        assert_eq!(metadata, b"meta");
    }

    #[test]
    fn key_sensitivity() {
        let dir = tempfile::tempdir().unwrap();
        let plain_in = dir.path().join("in");
        let cipher = dir.path().join("cipher");
        std::fs::write(&plain_in, b"secret").unwrap();
        encrypt(&key(1), Some(&plain_in), &cipher, b"meta", 4096).unwrap();

        let result = decrypt(&key(2), &cipher, None, DecryptMode::MetadataOnly, None);
        assert!(matches!(result, Err(CsyncErr::AuthenticationFailed)));
    }

    #[test]
    fn tamper_detection_flips_descriptor_byte() {
        let dir = tempfile::tempdir().unwrap();
        let plain_in = dir.path().join("in");
        let cipher = dir.path().join("cipher");
        std::fs::write(&plain_in, b"secret").unwrap();
        let k = key(3);
        encrypt(&k, Some(&plain_in), &cipher, b"meta", 4096).unwrap();

        let mut bytes = std::fs::read(&cipher).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&cipher, &bytes).unwrap();

        let result = decrypt(&k, &cipher, None, DecryptMode::MetadataOnly, None);
        assert!(result.is_err());
    }

    #[test]
    fn tamper_detection_flips_body_byte() {
        let dir = tempfile::tempdir().unwrap();
        let plain_in = dir.path().join("in");
        let cipher = dir.path().join("cipher");
        let plain_out = dir.path().join("out");
        std::fs::write(&plain_in, vec![9u8; 5000]).unwrap();
        let k = key(4);
        encrypt(&k, Some(&plain_in), &cipher, b"meta", 4096).unwrap();

        let mut bytes = std::fs::read(&cipher).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&cipher, &bytes).unwrap();

        let result = decrypt(&k, &cipher, Some(&plain_out), DecryptMode::Full, None);
        assert!(result.is_err());
    }

    #[test]
    fn predicate_failure_is_path_predicate_failed() {
        let dir = tempfile::tempdir().unwrap();
        let plain_in = dir.path().join("in");
        let cipher = dir.path().join("cipher");
        std::fs::write(&plain_in, b"x").unwrap();
        let k = key(5);
        encrypt(&k, Some(&plain_in), &cipher, b"meta", 4096).unwrap();

        let result = decrypt(&k, &cipher, None, DecryptMode::MetadataOnly, Some(&|m: &[u8]| m == b"not-meta"));
        assert!(matches!(result, Err(CsyncErr::PathPredicateFailed(_))));
    }
}
