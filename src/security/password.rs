use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::errors::AppError;

pub struct PasswordManager;

impl PasswordManager {
    /// 对凭据进行 Argon2 哈希
    pub fn hash_password(password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("Password hash failed: {}", e)))
    }

    /// 验证凭据是否匹配
    pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// 初始凭据的最低要求
    pub fn validate_strength(password: &str, min_length: usize) -> Result<(), AppError> {
        if password.chars().count() < min_length {
            return Err(AppError::Validation(format!(
                "Credential must be at least {} characters",
                min_length
            )));
        }
        if password.trim().is_empty() {
            return Err(AppError::Validation("Credential must not be blank".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let password = "MySecurePassword123!";
        let hash = PasswordManager::hash_password(password).unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(PasswordManager::verify_password(password, &hash).unwrap());
        assert!(!PasswordManager::verify_password("WrongPassword", &hash).unwrap());
    }

    #[test]
    fn test_validate_strength() {
        assert!(PasswordManager::validate_strength("short", 12).is_err());
        assert!(PasswordManager::validate_strength("long-enough-secret", 12).is_ok());
    }
}
