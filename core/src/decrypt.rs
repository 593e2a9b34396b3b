//! The decrypt primitive (spec §6 `dyn_aes_decrypt`). Key management and the
//! actual cipher are out of scope (spec §1); this crate only defines the
//! capability the receive engine calls through.

use crate::error::CoreResult;
use crate::mbuf::Mbuf;

pub trait Decrypt {
    /// Deterministic symmetric decryption appending plaintext into `dst`.
    fn decrypt(&self, src: &[u8], dst: &mut Mbuf, key: &[u8]) -> CoreResult<()>;
}

/// A self-inverse XOR stream cipher. Not cryptographically meaningful — a
/// test double standing in for the real AES primitive the spec treats as an
/// external collaborator (spec §1: "encryption key management" out of
/// scope).
#[derive(Debug, Default)]
pub struct XorCipher;

impl Decrypt for XorCipher {
    fn decrypt(&self, src: &[u8], dst: &mut Mbuf, key: &[u8]) -> CoreResult<()> {
        if key.is_empty() {
            return dst.copy(src);
        }
        let transformed: Vec<u8> = src
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % key.len()])
            .collect();
        dst.copy(&transformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::MbufPool;

    #[test]
    fn xor_cipher_is_self_inverse() {
        let key = b"k3y";
        let plaintext = b"hello fragment";
        let ciphertext: Vec<u8> = plaintext.iter().enumerate().map(|(i, b)| b ^ key[i % key.len()]).collect();

        let mut pool = MbufPool::new(64, 0, 2);
        let mut dst = pool.get().unwrap();
        XorCipher.decrypt(&ciphertext, &mut dst, key).unwrap();
        assert_eq!(dst.written(), plaintext);
    }
}
