use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};

/// 生成随机字符串（线程本地 CSPRNG）
pub fn generate_random_string(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// 生成初始化令牌原文，只在签发时返回一次
pub fn generate_setup_token(length: usize) -> String {
    generate_random_string(length)
}

/// 令牌哈希：hex(sha256(pepper || raw))，数据库中只保存该值
pub fn hash_setup_token(pepper: &str, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_setup_token() {
        let token = generate_setup_token(48);
        assert_eq!(token.len(), 48);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_setup_token(48));
    }

    #[test]
    fn test_hash_depends_on_pepper() {
        let a = hash_setup_token("pepper-one", "raw-token");
        let b = hash_setup_token("pepper-two", "raw-token");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, hash_setup_token("pepper-one", "raw-token"));
    }
}
