//! Encryptor contracts and their default implementations.
//!
//! The runtime depends only on the two traits here; algorithm choice lives
//! entirely in this module. The defaults use an ephemeral-x25519 sealed box
//! for the key exchange and XChaCha20-Poly1305 for per-connection symmetric
//! traffic, with SHA-256 wrap-key derivation.
//!
//! Symmetric frames are `24-byte random nonce ‖ ciphertext`, with the session
//! iv bound as associated data so frames from one session cannot be replayed
//! into another. Sealed payloads are `32-byte ephemeral public key ‖
//! ciphertext` under a fixed nonce — safe because the ephemeral key is fresh
//! per seal.

use crate::error::{constants, RpcError, Result};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroize;

/// Length of a symmetric session key.
pub const KEY_LEN: usize = 32;
/// Length of the per-session iv (bound to every frame as associated data).
pub const IV_LEN: usize = 24;

const SEAL_DOMAIN: &[u8] = b"rpc-core.sealed.v1";

/// The symmetric key material exchanged during the handshake.
///
/// Serialized, sealed for the client's public key, and sent as the
/// Initialization response. Zeroized on drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionKeys {
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

/// Client side of the encryption contract.
pub trait ClientEncryptor: Send {
    /// The client's asymmetric public key, sent as the Initialization payload.
    fn public_key(&self) -> [u8; 32];
    /// Decrypt a payload sealed for this client's public key.
    fn open_sealed(&self, sealed: &[u8]) -> Result<Vec<u8>>;
    /// Install the symmetric session state received from the server.
    fn install_session(&mut self, key: &[u8], iv: &[u8]) -> Result<()>;
    /// Whether a symmetric session has been installed.
    fn has_session(&self) -> bool;
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Server side of the encryption contract. One instance per connection.
pub trait ServerEncryptor: Send + Sync {
    fn session_key(&self) -> &[u8];
    fn session_iv(&self) -> &[u8];
    /// Generate fresh key + iv. Key material must never be reused across
    /// connections.
    fn reset(&mut self);
    /// Seal a payload so only the holder of `client_public`'s private key can
    /// read it.
    fn seal_for_client(&self, plaintext: &[u8], client_public: &[u8; 32]) -> Result<Vec<u8>>;
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Symmetric AEAD state shared by both default encryptors.
struct SessionCipher {
    cipher: XChaCha20Poly1305,
    iv: [u8; IV_LEN],
}

impl SessionCipher {
    fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN || iv.len() != IV_LEN {
            return Err(RpcError::Handshake(
                constants::ERR_SESSION_NOT_ESTABLISHED.into(),
            ));
        }
        let mut iv_arr = [0u8; IV_LEN];
        iv_arr.copy_from_slice(iv);
        Ok(Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
            iv: iv_arr,
        })
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &self.iv,
                },
            )
            .map_err(|_| RpcError::EncryptionFailure)?;
        let mut out = nonce.to_vec();
        out.extend(ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < IV_LEN {
            return Err(RpcError::DecryptionFailure);
        }
        let (nonce, ciphertext) = data.split_at(IV_LEN);
        self.cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &self.iv,
                },
            )
            .map_err(|_| RpcError::DecryptionFailure)
    }
}

fn wrap_key(shared: &SharedSecret, ephemeral_public: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared.as_bytes());
    hasher.update(SEAL_DOMAIN);
    hasher.update(ephemeral_public);
    hasher.update(recipient);
    hasher.finalize().into()
}

fn seal_cipher(wrap: &[u8; 32]) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(wrap))
}

// A fixed nonce is sound here: the wrap key is derived from a fresh
// ephemeral keypair on every seal.
const SEAL_NONCE: [u8; IV_LEN] = [0u8; IV_LEN];

/// Default client encryptor: static x25519 keypair + XChaCha20 session.
pub struct ClientCrypto {
    secret: StaticSecret,
    public: [u8; 32],
    session: Option<SessionCipher>,
}

impl ClientCrypto {
    pub fn new() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self {
            secret,
            public,
            session: None,
        }
    }

    fn session(&self) -> Result<&SessionCipher> {
        self.session
            .as_ref()
            .ok_or_else(|| RpcError::Handshake(constants::ERR_SESSION_NOT_ESTABLISHED.into()))
    }
}

impl Default for ClientCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientEncryptor for ClientCrypto {
    fn public_key(&self) -> [u8; 32] {
        self.public
    }

    fn open_sealed(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < 32 {
            return Err(RpcError::Handshake(
                constants::ERR_SEALED_BOX_TOO_SHORT.into(),
            ));
        }
        let (eph, ciphertext) = sealed.split_at(32);
        let mut eph_bytes = [0u8; 32];
        eph_bytes.copy_from_slice(eph);
        let shared = self.secret.diffie_hellman(&PublicKey::from(eph_bytes));
        let mut wrap = wrap_key(&shared, &eph_bytes, &self.public);
        let plaintext = seal_cipher(&wrap)
            .decrypt(XNonce::from_slice(&SEAL_NONCE), ciphertext)
            .map_err(|_| RpcError::DecryptionFailure);
        wrap.zeroize();
        plaintext
    }

    fn install_session(&mut self, key: &[u8], iv: &[u8]) -> Result<()> {
        self.session = Some(SessionCipher::new(key, iv)?);
        Ok(())
    }

    fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.session()?.encrypt(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.session()?.decrypt(ciphertext)
    }
}

/// Default server encryptor: fresh key + iv per connection.
pub struct ServerCrypto {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
    session: SessionCipher,
}

impl ServerCrypto {
    pub fn new() -> Self {
        let (key, iv) = Self::generate();
        let session = SessionCipher::new(&key, &iv).expect("generated lengths are valid");
        Self { key, iv, session }
    }

    fn generate() -> ([u8; KEY_LEN], [u8; IV_LEN]) {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        (key, iv)
    }
}

impl Default for ServerCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServerCrypto {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl ServerEncryptor for ServerCrypto {
    fn session_key(&self) -> &[u8] {
        &self.key
    }

    fn session_iv(&self) -> &[u8] {
        &self.iv
    }

    fn reset(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
        let (key, iv) = Self::generate();
        self.key = key;
        self.iv = iv;
        self.session = SessionCipher::new(&self.key, &self.iv).expect("generated lengths are valid");
    }

    fn seal_for_client(&self, plaintext: &[u8], client_public: &[u8; 32]) -> Result<Vec<u8>> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();
        let shared = ephemeral.diffie_hellman(&PublicKey::from(*client_public));
        let mut wrap = wrap_key(&shared, &ephemeral_public, client_public);
        let ciphertext = seal_cipher(&wrap)
            .encrypt(XNonce::from_slice(&SEAL_NONCE), plaintext)
            .map_err(|_| RpcError::EncryptionFailure);
        wrap.zeroize();
        let mut out = ephemeral_public.to_vec();
        out.extend(ciphertext?);
        Ok(out)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.session.encrypt(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.session.decrypt(ciphertext)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn session_encrypt_decrypt_roundtrip() {
        let server = ServerCrypto::new();
        let mut client = ClientCrypto::new();
        client
            .install_session(server.session_key(), server.session_iv())
            .unwrap();

        let frame = server.encrypt(b"from server").unwrap();
        assert_eq!(client.decrypt(&frame).unwrap(), b"from server");

        let frame = client.encrypt(b"from client").unwrap();
        assert_eq!(server.decrypt(&frame).unwrap(), b"from client");
    }

    #[test]
    fn tampered_frame_fails_decryption() {
        let server = ServerCrypto::new();
        let mut frame = server.encrypt(b"payload").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            server.decrypt(&frame),
            Err(RpcError::DecryptionFailure)
        ));
    }

    #[test]
    fn sealed_box_roundtrip() {
        let client = ClientCrypto::new();
        let server = ServerCrypto::new();
        let sealed = server
            .seal_for_client(b"key material", &client.public_key())
            .unwrap();
        assert_eq!(client.open_sealed(&sealed).unwrap(), b"key material");
    }

    #[test]
    fn sealed_box_is_bound_to_the_recipient() {
        let intended = ClientCrypto::new();
        let other = ClientCrypto::new();
        let server = ServerCrypto::new();
        let sealed = server
            .seal_for_client(b"secret", &intended.public_key())
            .unwrap();
        assert!(other.open_sealed(&sealed).is_err());
    }

    #[test]
    fn reset_produces_fresh_key_material() {
        let mut server = ServerCrypto::new();
        let key_before = server.session_key().to_vec();
        let iv_before = server.session_iv().to_vec();
        server.reset();
        assert_ne!(server.session_key(), key_before.as_slice());
        assert_ne!(server.session_iv(), iv_before.as_slice());
    }

    #[test]
    fn sessions_with_different_ivs_reject_each_other() {
        let server_a = ServerCrypto::new();
        let mut client = ClientCrypto::new();
        // Right key, wrong iv: the associated-data binding must reject it.
        let mut wrong_iv = server_a.session_iv().to_vec();
        wrong_iv[0] ^= 0xFF;
        client
            .install_session(server_a.session_key(), &wrong_iv)
            .unwrap();
        let frame = server_a.encrypt(b"hello").unwrap();
        assert!(client.decrypt(&frame).is_err());
    }

    #[test]
    fn encrypt_without_session_is_a_handshake_error() {
        let client = ClientCrypto::new();
        assert!(matches!(
            client.encrypt(b"x"),
            Err(RpcError::Handshake(_))
        ));
    }
}
