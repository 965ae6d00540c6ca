use crate::error::{AppError, Result};

/// Validates a decrypted login key.
///
/// # Arguments
///
/// * `login_key` - The login key to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the login key is valid.
pub fn validate_login_key(login_key: &str) -> Result<()> {
    if login_key.is_empty() {
        return Err(AppError::Validation("Login key cannot be empty".to_string()));
    }

    if login_key.len() > 255 {
        return Err(AppError::Validation(
            "Login key must be at most 255 characters".to_string(),
        ));
    }

    if !login_key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(AppError::Validation(
            "Login key can only contain letters, numbers, underscores, and hyphens".to_string(),
        ));
    }

    Ok(())
}

/// Validates a decrypted login password.
///
/// # Arguments
///
/// * `password` - The password to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the password is valid.
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(AppError::Validation("Password cannot be empty".to_string()));
    }

    if password.len() > 255 {
        return Err(AppError::Validation(
            "Password must be at most 255 characters".to_string(),
        ));
    }

    Ok(())
}
