use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use std::sync::OnceLock;

use argon2::{Algorithm, Argon2, Params, Version};
use rand_core::OsRng;

const DUMMY_PASSWORD: &str = "chairtime-no-such-account";

/// Turns passwords into self-describing stored hashes and checks them back.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> anyhow::Result<String>;
    fn verify(&self, password: &str, stored_hash: &str) -> bool;

    /// A valid hash of no real password, verified against when the account
    /// is missing so both login paths cost the same.
    fn dummy_hash(&self) -> &str;
}

/// Argon2id with a fresh random salt per hash, stored as a PHC string.
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    dummy: OnceLock<String>,
}

impl Argon2Hasher {
    pub fn new(memory_kib: u32, iterations: u32) -> anyhow::Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy: OnceLock::new(),
        })
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
            dummy: OnceLock::new(),
        }
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(hash) => self
                .argon2
                .verify_password(password.as_bytes(), &hash)
                .is_ok(),
            Err(_) => false,
        }
    }

    fn dummy_hash(&self) -> &str {
        self.dummy.get_or_init(|| {
            self.hash(DUMMY_PASSWORD).unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to prepare dummy password hash");
                String::new()
            })
        })
    }
}
