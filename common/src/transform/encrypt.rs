// Encryption stage: authenticated streaming envelope
//
// Layout: salt(16) || iv(16) || AES-256-CTR ciphertext || HMAC-SHA256(32).
// Keys are derived per file with HKDF-SHA256 over the 32-byte master key and
// a fresh salt; the MAC covers salt || iv || ciphertext.

use crate::artifact::Artifact;
use crate::errors::TransformError;
use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

type Aes256Ctr = Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const KDF_INFO: &[u8] = b"agent-backup-encryption";
const CHUNK: usize = 32 * 1024;

/// Encrypt the artifact into `<path>.enc` and return its fresh descriptor.
#[instrument(skip(artifact, key_hex), fields(name = %artifact.name, size = artifact.size))]
pub async fn encrypt(artifact: Artifact, key_hex: &str) -> Result<Artifact, TransformError> {
    let master_key = decode_master_key(key_hex)?;
    let out_path = PathBuf::from(format!("{}.enc", artifact.path.display()));

    let src = artifact.path.clone();
    let dst = out_path.clone();
    tokio::task::spawn_blocking(move || encrypt_file(&src, &dst, &master_key))
        .await
        .map_err(|e| TransformError::Io(format!("encryption task failed: {}", e)))??;

    let out_name = format!("{}.enc", artifact.name);
    let encrypted = Artifact::describe(&out_path, out_name, "application/octet-stream")
        .await
        .map_err(|e| TransformError::Io(e.to_string()))?;

    info!(out = %encrypted.path.display(), out_size = encrypted.size, "Encryption complete");
    Ok(encrypted)
}

/// Inverse of [`encrypt_file`]: authenticate the whole envelope, then decrypt.
///
/// The tag is verified over `salt || iv || ciphertext` before a single byte
/// of plaintext is produced; any altered byte fails with `TagMismatch`.
pub fn decrypt_file(src: &Path, dst: &Path, key_hex: &str) -> Result<(), TransformError> {
    let master_key = decode_master_key(key_hex)?;

    let total = std::fs::metadata(src)?.len();
    let header = (SALT_LEN + IV_LEN) as u64;
    if total < header + TAG_LEN as u64 {
        return Err(TransformError::Integrity(
            "encrypted file shorter than envelope header".to_string(),
        ));
    }
    let ct_len = total - header - TAG_LEN as u64;

    let mut reader = BufReader::new(File::open(src)?);
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    reader.read_exact(&mut salt)?;
    reader.read_exact(&mut iv)?;

    let (enc_key, mac_key) = derive_keys(&master_key, &salt)?;

    // First pass: authenticate salt || iv || ciphertext against the tag.
    let mut mac = HmacSha256::new_from_slice(&mac_key)
        .map_err(|e| TransformError::InvalidKey(e.to_string()))?;
    mac.update(&salt);
    mac.update(&iv);

    let mut remaining = ct_len;
    let mut buf = vec![0u8; CHUNK];
    while remaining > 0 {
        let n = buf.len().min(remaining as usize);
        reader.read_exact(&mut buf[..n])?;
        mac.update(&buf[..n]);
        remaining -= n as u64;
    }

    let mut tag = [0u8; TAG_LEN];
    reader.read_exact(&mut tag)?;
    mac.verify_slice(&tag)
        .map_err(|_| TransformError::TagMismatch)?;

    // Second pass: decrypt the now-trusted ciphertext.
    let mut reader = reader.into_inner();
    reader.seek(SeekFrom::Start(header))?;
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(File::create(dst)?);
    let mut cipher = Aes256Ctr::new_from_slices(&enc_key, &iv)
        .map_err(|e| TransformError::InvalidKey(e.to_string()))?;

    let mut remaining = ct_len;
    while remaining > 0 {
        let n = buf.len().min(remaining as usize);
        reader.read_exact(&mut buf[..n])?;
        cipher.apply_keystream(&mut buf[..n]);
        writer.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    writer.flush()?;
    Ok(())
}

fn encrypt_file(src: &Path, dst: &Path, master_key: &[u8; 32]) -> Result<(), TransformError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut iv);

    let (enc_key, mac_key) = derive_keys(master_key, &salt)?;

    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create(dst)?);
    let mut cipher = Aes256Ctr::new_from_slices(&enc_key, &iv)
        .map_err(|e| TransformError::InvalidKey(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(&mac_key)
        .map_err(|e| TransformError::InvalidKey(e.to_string()))?;

    writer.write_all(&salt)?;
    writer.write_all(&iv)?;
    mac.update(&salt);
    mac.update(&iv);

    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        cipher.apply_keystream(&mut buf[..n]);
        mac.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
    }

    writer.write_all(&mac.finalize().into_bytes())?;
    writer.flush()?;
    Ok(())
}

/// HKDF-SHA256 expands the master key into a 32-byte AES key followed by a
/// 32-byte MAC key.
fn derive_keys(master_key: &[u8; 32], salt: &[u8]) -> Result<([u8; 32], [u8; 32]), TransformError> {
    let kdf = Hkdf::<Sha256>::new(Some(salt), master_key);
    let mut okm = [0u8; 64];
    kdf.expand(KDF_INFO, &mut okm)
        .map_err(|e| TransformError::InvalidKey(e.to_string()))?;

    let mut enc_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    enc_key.copy_from_slice(&okm[..32]);
    mac_key.copy_from_slice(&okm[32..]);
    Ok((enc_key, mac_key))
}

fn decode_master_key(key_hex: &str) -> Result<[u8; 32], TransformError> {
    let bytes = hex::decode(key_hex)
        .map_err(|e| TransformError::InvalidKey(format!("key is not valid hex: {}", e)))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TransformError::InvalidKey("master key must be 32 bytes".to_string()))?;
    Ok(key)
}
