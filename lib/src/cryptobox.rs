//! Authenticated key-exchange box used to ship the freshly minted auth
//! token and the server certificate back to the login caller.
//!
//! Curve25519 key agreement, XChaCha20-Poly1305 sealing; the 24-byte random
//! nonce is prepended to the ciphertext and the whole blob is base64.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::SharedSecret;

pub use x25519_dalek::{PublicKey, StaticSecret};

pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 24;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CryptoBoxError {
    #[error("bad public key encoding")]
    BadPublicKey,
    #[error("bad sealed blob encoding")]
    BadBlob,
    #[error("failed to open the secure box")]
    OpenFailed,
}

pub fn generate_keypair() -> (PublicKey, StaticSecret) {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);
    (public, secret)
}

/// Deterministic keypair from a 32-byte seed. Test vectors only.
pub fn keypair_from_seed(seed: [u8; KEY_SIZE]) -> (PublicKey, StaticSecret) {
    let secret = StaticSecret::from(seed);
    let public = PublicKey::from(&secret);
    (public, secret)
}

pub fn encode_public_key(key: &PublicKey) -> String {
    STANDARD.encode(key.as_bytes())
}

pub fn decode_public_key(encoded: &str) -> Result<PublicKey, CryptoBoxError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| CryptoBoxError::BadPublicKey)?;
    let bytes: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoBoxError::BadPublicKey)?;
    Ok(PublicKey::from(bytes))
}

fn cipher_for(shared: &SharedSecret) -> XChaCha20Poly1305 {
    let key = Sha256::digest(shared.as_bytes());
    XChaCha20Poly1305::new(Key::from_slice(&key))
}

/// Seal `message` to `recipient`, authenticated by `sender_secret`.
pub fn seal_message(
    message: &str,
    recipient: &PublicKey,
    sender_secret: &StaticSecret,
) -> Result<String, CryptoBoxError> {
    let cipher = cipher_for(&sender_secret.diffie_hellman(recipient));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), message.as_bytes())
        .map_err(|_| CryptoBoxError::OpenFailed)?;

    // Blob layout: nonce followed by the ciphertext.
    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

/// Open a sealed blob with our secret and the sender's base64 public key.
/// Any corruption of the blob yields [`CryptoBoxError::OpenFailed`].
pub fn open_message(
    sealed: &str,
    sender_public: &str,
    our_secret: &StaticSecret,
) -> Result<String, CryptoBoxError> {
    let sender_public = decode_public_key(sender_public)?;
    let blob = STANDARD.decode(sealed).map_err(|_| CryptoBoxError::BadBlob)?;
    if blob.len() < NONCE_SIZE {
        return Err(CryptoBoxError::BadBlob);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);

    let cipher = cipher_for(&our_secret.diffie_hellman(&sender_public));
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoBoxError::OpenFailed)?;
    String::from_utf8(plaintext).map_err(|_| CryptoBoxError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let (client_public, client_secret) = generate_keypair();
        let (server_public, server_secret) = generate_keypair();

        let sealed = seal_message("hello,world", &client_public, &server_secret).unwrap();
        let opened =
            open_message(&sealed, &encode_public_key(&server_public), &client_secret).unwrap();
        assert_eq!(opened, "hello,world");
    }

    #[test]
    fn corrupted_blob_fails_to_open() {
        let (client_public, client_secret) = generate_keypair();
        let (server_public, server_secret) = generate_keypair();
        let server_public = encode_public_key(&server_public);

        let sealed = seal_message("hello,world", &client_public, &server_secret).unwrap();

        // Flip a single byte anywhere in the blob.
        let mut blob = STANDARD.decode(&sealed).unwrap();
        for i in 0..blob.len() {
            blob[i] ^= 0x01;
            let corrupted = STANDARD.encode(&blob);
            assert_eq!(
                open_message(&corrupted, &server_public, &client_secret),
                Err(CryptoBoxError::OpenFailed),
                "byte {i} corruption must not open"
            );
            blob[i] ^= 0x01;
        }
    }

    #[test]
    fn wrong_recipient_fails_to_open() {
        let (client_public, _) = generate_keypair();
        let (server_public, server_secret) = generate_keypair();
        let (_, eavesdropper_secret) = generate_keypair();

        let sealed = seal_message("secret", &client_public, &server_secret).unwrap();
        assert!(open_message(
            &sealed,
            &encode_public_key(&server_public),
            &eavesdropper_secret
        )
        .is_err());
    }

    #[test]
    fn public_key_encoding_round_trip() {
        let (public, _) = keypair_from_seed([7u8; KEY_SIZE]);
        let decoded = decode_public_key(&encode_public_key(&public)).unwrap();
        assert_eq!(decoded.as_bytes(), public.as_bytes());
        assert!(decode_public_key("not-base64!").is_err());
        assert!(decode_public_key("c2hvcnQ=").is_err());
    }
}
