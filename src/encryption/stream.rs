// Framed AES-256-GCM file format
//
// The plaintext is cut into frames of at most FRAME_SIZE bytes. Every frame
// is stored as `nonce (12) | flags (1) | ciphertext length (u32 BE) |
// ciphertext + tag`. The frame index and the flags byte are authenticated as
// associated data, so frames cannot be reordered, dropped or appended, and
// a file always ends with exactly one frame flagged final (empty input
// still yields one empty final frame).

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{TransferError, TransferResult};

/// Plaintext bytes per frame
pub const FRAME_SIZE: usize = 64 * 1024;
pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const FLAGS_LEN: usize = 1;
const LEN_PREFIX: usize = 4;

const FLAG_FINAL: u8 = 0x01;

/// Build the cipher from a passphrase (key = SHA-256 of the passphrase)
pub fn cipher_from_passphrase(passphrase: &str) -> Aes256Gcm {
    let key = Sha256::digest(passphrase.as_bytes());
    Aes256Gcm::new(&key)
}

/// Associated data of frame `index`: index (u64 BE) followed by its flags
fn frame_aad(index: u64, flags: u8) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8] = flags;
    aad
}

/// Encrypt `reader` into `writer`; `progress` receives plaintext bytes consumed
pub async fn encrypt_stream<R, W>(
    cipher: &Aes256Gcm,
    reader: &mut R,
    writer: &mut W,
    mut progress: impl FnMut(u64),
) -> TransferResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut current = vec![0u8; FRAME_SIZE];
    let mut ahead = vec![0u8; FRAME_SIZE];
    let mut n = read_full(reader, &mut current).await?;
    let mut index = 0u64;
    let mut total = 0u64;
    loop {
        // a full frame is final only if nothing follows it
        let next = if n == FRAME_SIZE {
            read_full(reader, &mut ahead).await?
        } else {
            0
        };
        let flags = if next == 0 { FLAG_FINAL } else { 0 };

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = frame_aad(index, flags);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: &current[..n],
                    aad: &aad,
                },
            )
            .map_err(|_| TransferError::Crypto("frame encryption failed".to_string()))?;

        writer.write_all(nonce.as_slice()).await.map_err(write_err)?;
        writer.write_all(&[flags]).await.map_err(write_err)?;
        writer
            .write_all(&(ciphertext.len() as u32).to_be_bytes())
            .await
            .map_err(write_err)?;
        writer.write_all(&ciphertext).await.map_err(write_err)?;

        total += n as u64;
        progress(n as u64);
        if flags & FLAG_FINAL != 0 {
            break;
        }
        std::mem::swap(&mut current, &mut ahead);
        n = next;
        index += 1;
    }
    writer.flush().await.map_err(write_err)?;
    Ok(total)
}

/// Decrypt `reader` into `writer`; `progress` receives encrypted bytes consumed
///
/// Fails when the input ends before the final frame or continues after it.
pub async fn decrypt_stream<R, W>(
    cipher: &Aes256Gcm,
    reader: &mut R,
    writer: &mut W,
    mut progress: impl FnMut(u64),
) -> TransferResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut nonce = [0u8; NONCE_LEN];
    let mut header = [0u8; FLAGS_LEN + LEN_PREFIX];
    let mut frame = vec![0u8; FRAME_SIZE + TAG_LEN];
    let mut index = 0u64;
    let mut total = 0u64;
    loop {
        match read_full(reader, &mut nonce).await? {
            0 => {
                return Err(TransferError::Crypto(
                    "truncated input: final frame missing".to_string(),
                ))
            }
            NONCE_LEN => {}
            _ => return Err(truncated()),
        }
        if read_full(reader, &mut header).await? != header.len() {
            return Err(truncated());
        }

        let flags = header[0];
        if flags & !FLAG_FINAL != 0 {
            return Err(TransferError::Crypto(format!("invalid frame flags {:#04x}", flags)));
        }
        let frame_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if !(TAG_LEN..=FRAME_SIZE + TAG_LEN).contains(&frame_len) {
            return Err(TransferError::Crypto(format!(
                "invalid frame length {}",
                frame_len
            )));
        }
        if read_full(reader, &mut frame[..frame_len]).await? != frame_len {
            return Err(truncated());
        }

        let aad = frame_aad(index, flags);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &frame[..frame_len],
                    aad: &aad,
                },
            )
            .map_err(|_| {
                TransferError::Crypto(format!(
                    "frame {} authentication failed (wrong key or damaged file)",
                    index
                ))
            })?;
        writer.write_all(&plaintext).await.map_err(write_err)?;

        total += plaintext.len() as u64;
        progress((NONCE_LEN + header.len() + frame_len) as u64);

        if flags & FLAG_FINAL != 0 {
            let mut trailing = [0u8; 1];
            if read_full(reader, &mut trailing).await? != 0 {
                return Err(TransferError::Crypto(
                    "unexpected data after final frame".to_string(),
                ));
            }
            break;
        }
        index += 1;
    }
    writer.flush().await.map_err(write_err)?;
    Ok(total)
}

/// Fill `buf` unless the stream ends first; returns the bytes read
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> TransferResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| TransferError::io("read input", e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn write_err(e: std::io::Error) -> TransferError {
    TransferError::io("write output", e)
}

fn truncated() -> TransferError {
    TransferError::Crypto("truncated frame".to_string())
}
