use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{Key, Nonce, XSalsa20Poly1305, NONCE_SIZE};

fn derive_key(salt: &str) -> Key {
    let digest = blake3::hash(salt.as_bytes());
    Key::clone_from_slice(digest.as_bytes())
}

/// Secretbox-encrypts `plaintext` with a key derived from `salt`.
/// Output is base64(nonce || ciphertext).
pub fn encrypt(plaintext: &str, salt: &str) -> Result<String> {
    let cipher = XSalsa20Poly1305::new(&derive_key(salt));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("encrypt failed: {}", e))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

pub fn decrypt(token: &str, salt: &str) -> Result<String> {
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|e| anyhow!("malformed token: {}", e))?;
    if raw.len() <= NONCE_SIZE {
        return Err(anyhow!("malformed token: too short"));
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
    let cipher = XSalsa20Poly1305::new(&derive_key(salt));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("decrypt failed: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("decrypted token is not utf8: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let token = encrypt("{\"user_id\":\"email_a@b.c\"}", "salt").unwrap();
        let plain = decrypt(&token, "salt").unwrap();
        assert_eq!(plain, "{\"user_id\":\"email_a@b.c\"}");
    }

    #[test]
    fn wrong_salt_fails() {
        let token = encrypt("payload", "salt-a").unwrap();
        assert!(decrypt(&token, "salt-b").is_err());
    }
}
