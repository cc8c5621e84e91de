//! Diffie-Hellman key exchange
//!
//! The group is the 1024 bit MODP prime used by the ESP BluFi firmware with
//! generator 2. Keys travel as 128 byte big-endian integers.

use num_bigint::BigUint;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::SecurityError;

pub const DH_KEY_LEN: usize = 128;
pub const DH_GENERATOR: u8 = 0x02;

pub const DH_PRIME: [u8; DH_KEY_LEN] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2,
    0x21, 0x68, 0xc2, 0x34, 0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
    0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74, 0x02, 0x0b, 0xbe, 0xa6,
    0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d,
    0xf2, 0x5f, 0x14, 0x37, 0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
    0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6, 0xf4, 0x4c, 0x42, 0xe9,
    0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11,
    0x7c, 0x4b, 0x1f, 0xe6, 0x49, 0x28, 0x66, 0x51, 0xec, 0xe6, 0x53, 0x81,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

fn prime() -> BigUint {
    BigUint::from_bytes_be(&DH_PRIME)
}

fn to_key_bytes(value: &BigUint) -> [u8; DH_KEY_LEN] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; DH_KEY_LEN];
    out[DH_KEY_LEN - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Local half of a key exchange. The private exponent is zeroed on drop.
pub struct DhKeyPair {
    private_key: Zeroizing<[u8; DH_KEY_LEN]>,
    public_key: [u8; DH_KEY_LEN],
}

impl DhKeyPair {
    /// 128 bytes of OS randomness as the private exponent
    pub fn generate() -> Self {
        let mut private_key = Zeroizing::new([0u8; DH_KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut private_key[..]);
        Self::from_private_key(private_key)
    }

    pub fn from_private_key(private_key: Zeroizing<[u8; DH_KEY_LEN]>) -> Self {
        let exponent = BigUint::from_bytes_be(&private_key[..]);
        let public = BigUint::from(DH_GENERATOR).modpow(&exponent, &prime());
        Self {
            private_key,
            public_key: to_key_bytes(&public),
        }
    }

    pub fn public_key(&self) -> &[u8; DH_KEY_LEN] {
        &self.public_key
    }

    /// `peer_public ^ private mod p`
    pub fn shared_secret(
        &self,
        peer_public: &[u8],
    ) -> Result<Zeroizing<[u8; DH_KEY_LEN]>, SecurityError> {
        let p = prime();
        let peer = BigUint::from_bytes_be(peer_public);
        if peer < BigUint::from(1u8) || peer >= p {
            return Err(SecurityError::InvalidPeerKey);
        }

        let exponent = BigUint::from_bytes_be(&self.private_key[..]);
        let shared = peer.modpow(&exponent, &p);
        Ok(Zeroizing::new(to_key_bytes(&shared)))
    }
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let alice = DhKeyPair::generate();
        let bob = DhKeyPair::generate();
        assert_ne!(alice.public_key(), bob.public_key());

        let a = alice.shared_secret(bob.public_key()).unwrap();
        let b = bob.shared_secret(alice.public_key()).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn small_exponent() {
        let mut private_key = Zeroizing::new([0u8; DH_KEY_LEN]);
        private_key[DH_KEY_LEN - 1] = 10;
        let pair = DhKeyPair::from_private_key(private_key);

        let mut expected = [0u8; DH_KEY_LEN];
        expected[DH_KEY_LEN - 2..].copy_from_slice(&1024u16.to_be_bytes());
        assert_eq!(pair.public_key(), &expected);
    }

    #[test]
    fn rejects_out_of_range_peer_keys() {
        let pair = DhKeyPair::generate();
        assert!(matches!(
            pair.shared_secret(&[0u8; DH_KEY_LEN]),
            Err(SecurityError::InvalidPeerKey)
        ));
        assert!(matches!(
            pair.shared_secret(&DH_PRIME),
            Err(SecurityError::InvalidPeerKey)
        ));
        assert!(matches!(pair.shared_secret(&[]), Err(SecurityError::InvalidPeerKey)));

        let mut p_minus_one = DH_PRIME;
        p_minus_one[DH_KEY_LEN - 1] -= 1;
        assert!(pair.shared_secret(&p_minus_one).is_ok());
    }
}
