//! Payload encryption for secured sessions
//!
//! AES-128 in CFB128 mode, keyed with MD5 of the DH shared secret. CFB is a
//! length-preserving stream mode, so the frame length byte is the same before
//! and after encryption.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use cfb_mode::{BufDecryptor, BufEncryptor, Decryptor, Encryptor};
use md5::{Digest, Md5};
use zeroize::Zeroizing;

use crate::SecurityError;

/// How the cipher IV is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IvMode {
    /// IV is the derived key; one keystream per direction runs across all
    /// frames of the session.
    #[default]
    Session,
    /// Fresh keystream per frame with IV `[sequence, 0, .., 0]`, as the ESP-IDF
    /// firmware does.
    PerFrame,
}

/// 16 byte symmetric key derived from the DH shared secret
pub struct SessionKey(Zeroizing<[u8; 16]>);

impl SessionKey {
    pub fn derive(shared_secret: &[u8]) -> Self {
        let digest = Md5::digest(shared_secret);
        let mut key = Zeroizing::new([0u8; 16]);
        key.copy_from_slice(&digest);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The digest doubles as the session IV
    pub fn iv(&self) -> [u8; 16] {
        *self.0
    }
}

pub struct FrameCipher {
    key: SessionKey,
    mode: IvMode,
    tx: Option<BufEncryptor<Aes128>>,
    rx: Option<BufDecryptor<Aes128>>,
}

impl FrameCipher {
    pub fn new(key: SessionKey, mode: IvMode) -> Result<Self, SecurityError> {
        let (tx, rx) = match mode {
            IvMode::Session => {
                let iv = key.iv();
                let tx = BufEncryptor::<Aes128>::new_from_slices(key.as_bytes(), &iv)
                    .map_err(|_| SecurityError::InvalidKeyLength)?;
                let rx = BufDecryptor::<Aes128>::new_from_slices(key.as_bytes(), &iv)
                    .map_err(|_| SecurityError::InvalidKeyLength)?;
                (Some(tx), Some(rx))
            }
            IvMode::PerFrame => (None, None),
        };
        Ok(Self { key, mode, tx, rx })
    }

    pub fn mode(&self) -> IvMode {
        self.mode
    }

    fn frame_iv(sequence: u8) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[0] = sequence;
        iv
    }

    /// Encrypt an outbound payload in place
    pub fn encrypt(&mut self, sequence: u8, data: &mut [u8]) -> Result<(), SecurityError> {
        match self.tx.as_mut() {
            Some(stream) => stream.encrypt(data),
            None => Encryptor::<Aes128>::new_from_slices(
                self.key.as_bytes(),
                &Self::frame_iv(sequence),
            )
            .map_err(|_| SecurityError::InvalidKeyLength)?
            .encrypt(data),
        }
        Ok(())
    }

    /// Decrypt an inbound payload in place
    pub fn decrypt(&mut self, sequence: u8, data: &mut [u8]) -> Result<(), SecurityError> {
        match self.rx.as_mut() {
            Some(stream) => stream.decrypt(data),
            None => Decryptor::<Aes128>::new_from_slices(
                self.key.as_bytes(),
                &Self::frame_iv(sequence),
            )
            .map_err(|_| SecurityError::InvalidKeyLength)?
            .decrypt(data),
        }
        Ok(())
    }

    /// Advance the inbound keystream past `len` bytes that were never
    /// decrypted. Per-frame ciphers hold no stream state.
    pub fn skip_inbound(&mut self, len: usize) {
        if let Some(stream) = self.rx.as_mut() {
            stream.decrypt(&mut vec![0u8; len]);
        }
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
