//! BluFi security layer
//!
//! Diffie-Hellman over the fixed 1024 bit group shared with the device firmware,
//! MD5 key derivation and AES-128-CFB128 payload encryption.

mod cipher;
mod dh;

pub use cipher::{FrameCipher, IvMode, SessionKey};
pub use dh::{DH_GENERATOR, DH_KEY_LEN, DH_PRIME, DhKeyPair};
