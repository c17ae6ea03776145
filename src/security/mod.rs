pub mod password;
pub mod token;

pub use password::PasswordManager;
pub use token::{generate_random_string, generate_setup_token, hash_setup_token};
