/// Password Hashing and Verification
///
/// bcrypt hashing plus the strength policy applied at registration.
/// Comparison is constant-time inside bcrypt.

use bcrypt::{hash, verify};

use crate::error::{AppError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;

/// Hash a password that already passed `validate_password_strength`
///
/// # Errors
/// Returns `AppError::Internal` if bcrypt fails (e.g. invalid cost)
pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost).map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against its hash
///
/// # Errors
/// Returns error if the stored hash is unparseable
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

/// Hash used to burn one bcrypt verification when the account does not
/// exist, so unknown emails cost the same as wrong passwords.
pub fn timing_equalizer_hash(cost: u32) -> Result<String, AppError> {
    hash_password(&crate::auth::signer::generate_jti(), cost)
}

/// Validate password strength requirements
///
/// Requirements:
/// - 8 to 128 characters
/// - At least one digit, one lowercase and one uppercase letter
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort(
            "password".to_string(),
            MIN_PASSWORD_LENGTH,
        ));
    }

    // bcrypt only looks at the first 72 bytes; the cap also bounds hashing work
    if length > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_LENGTH,
        ));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[test]
    fn test_hash_password() {
        let password = "ValidPassword123";
        let hash = hash_password(password, TEST_COST).expect("Failed to hash password");

        assert_ne!(password, hash);
        assert!(hash.starts_with("$2"));
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password("ValidPassword123", TEST_COST).unwrap();
        assert!(verify_password("ValidPassword123", &hash).unwrap());
        assert!(!verify_password("WrongPassword123", &hash).unwrap());
    }

    #[test]
    fn test_verify_against_garbage_hash() {
        assert!(verify_password("ValidPassword123", "not-a-bcrypt-hash").is_err());
    }

    #[test]
    fn test_timing_equalizer_hash_is_valid() {
        let hash = timing_equalizer_hash(TEST_COST).unwrap();
        assert!(!verify_password("ValidPassword123", &hash).unwrap());
    }

    #[test]
    fn test_strength_rules() {
        assert!(validate_password_strength("ValidPassword123").is_ok());
        assert!(validate_password_strength("Short1").is_err());
        assert!(validate_password_strength(&("a".repeat(MAX_PASSWORD_LENGTH + 1) + "A1")).is_err());
        assert!(validate_password_strength("NoDigitsPassword").is_err());
        assert!(validate_password_strength("NOLOWERCASE1").is_err());
        assert!(validate_password_strength("nouppercase1").is_err());
    }
}
