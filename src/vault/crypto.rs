use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// (encrypted_dek, dek_nonce, encrypted_secret, secret_nonce)
pub type EncryptedBlob = (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>);

/// AES-256-GCM envelope encryption for token material at rest. Each row
/// gets a fresh DEK; the DEK is wrapped with the process master KEK.
pub struct VaultCrypto {
    kek: [u8; 32],
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        let kek = parse_master_key(master_key_hex)?;
        Ok(Self { kek })
    }

    /// Encrypts a plaintext string using envelope encryption.
    /// Returns (encrypted_dek, dek_nonce, encrypted_secret, secret_nonce).
    pub fn encrypt_string(&self, plaintext: &str) -> anyhow::Result<EncryptedBlob> {
        // 1. Generate a random DEK
        let mut dek = [0u8; 32];
        OsRng.fill_bytes(&mut dek);

        // 2. Encrypt the secret with the DEK
        let secret_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let secret_nonce_bytes = generate_nonce();
        let secret_nonce = Nonce::from_slice(&secret_nonce_bytes);
        let encrypted_secret = secret_cipher
            .encrypt(secret_nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        // 3. Encrypt the DEK with the master KEK
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce_bytes = generate_nonce();
        let dek_nonce = Nonce::from_slice(&dek_nonce_bytes);
        let encrypted_dek = kek_cipher
            .encrypt(dek_nonce, dek.as_ref())
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        // 4. Zero the plaintext DEK
        dek.fill(0);

        Ok((
            encrypted_dek,
            dek_nonce_bytes.to_vec(),
            encrypted_secret,
            secret_nonce_bytes.to_vec(),
        ))
    }

    /// Decrypts a secret using envelope decryption.
    pub fn decrypt_string(
        &self,
        encrypted_dek: &[u8],
        dek_nonce: &[u8],
        encrypted_secret: &[u8],
        secret_nonce: &[u8],
    ) -> anyhow::Result<String> {
        // 1. Decrypt DEK with master KEK
        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let d_nonce = Nonce::from_slice(dek_nonce);
        let dek_bytes = kek_cipher
            .decrypt(d_nonce, encrypted_dek)
            .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?;

        let mut dek = [0u8; 32];
        dek.copy_from_slice(&dek_bytes);

        // 2. Decrypt secret with DEK
        let secret_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let s_nonce = Nonce::from_slice(secret_nonce);
        let plaintext_bytes = secret_cipher
            .decrypt(s_nonce, encrypted_secret)
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        // Zero the DEK
        dek.fill(0);

        Ok(String::from_utf8(plaintext_bytes)?)
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex_key: &str) -> anyhow::Result<[u8; 32]> {
    if hex_key.len() != 64 {
        anyhow::bail!(
            "SNOWGATE_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex_key.len()
        );
    }
    let bytes = hex::decode(hex_key)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
