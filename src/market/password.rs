//! Argon2id password hashing.

use anyhow::{Context, Result, anyhow};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

/// Hashes and verifies account passwords.
///
/// Cost parameters come from configuration; tests use a cheap setting.
#[derive(Clone)]
pub struct Hasher {
    argon2: Argon2<'static>,
}

impl Hasher {
    pub fn new(memory_kib: u32, iterations: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| anyhow!("Invalid argon2 parameters: {}", e))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Lowest-cost hasher, for fixtures and tests.
    pub fn fast() -> Self {
        Self::new(Params::MIN_M_COST, Params::MIN_T_COST).unwrap_or_default()
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
            .map_err(|e| anyhow!("Failed to encode salt: {}", e))?;
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
        Ok(hash.to_string())
    }

    /// Returns false for a wrong password or an unparseable stored hash.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Hash on tokio's blocking pool.
    pub async fn hash_blocking(&self, password: String) -> Result<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("Password hashing task panicked")?
    }

    /// Verify on tokio's blocking pool.
    pub async fn verify_blocking(&self, password: String, stored: String) -> Result<bool> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
            .await
            .context("Password verification task panicked")
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}
