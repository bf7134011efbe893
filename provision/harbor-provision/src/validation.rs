//! Name validation for resources and secrets
//!
//! Resource and secret names end up in file names, environment variable
//! names and external API paths, so they are restricted to a small, safe
//! character set before anything else touches them.

use anyhow::Result;

/// Maximum length for a resource name
pub const RESOURCE_NAME_MAX_LENGTH: usize = 63;

/// Maximum length for a full hierarchical secret name
pub const SECRET_NAME_MAX_LENGTH: usize = 255;

/// Characters allowed in resource names besides ASCII alphanumerics
const RESOURCE_ALLOWED_CHARS: &[char] = &['-', '_'];

/// Characters allowed inside a secret name segment besides ASCII alphanumerics
const SECRET_SEGMENT_ALLOWED_CHARS: &[char] = &['-', '_', '.'];

/// Validate a resource name
///
/// Resource names must:
/// - Not be empty
/// - Not exceed 63 characters
/// - Start with an ASCII letter
/// - Contain only alphanumeric, hyphen or underscore
pub fn validate_resource_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("{} cannot be empty", field_name);
    }

    if name.len() > RESOURCE_NAME_MAX_LENGTH {
        anyhow::bail!(
            "{} exceeds maximum length ({} > {})",
            field_name,
            name.len(),
            RESOURCE_NAME_MAX_LENGTH
        );
    }

    if let Some(first_char) = name.chars().next() {
        if !first_char.is_ascii_alphabetic() {
            anyhow::bail!(
                "{} must start with a letter, got: '{}'",
                field_name,
                first_char
            );
        }
    }

    let invalid_chars: Vec<char> = name
        .chars()
        .filter(|c| !c.is_ascii_alphanumeric() && !RESOURCE_ALLOWED_CHARS.contains(c))
        .collect();

    if !invalid_chars.is_empty() {
        anyhow::bail!(
            "{} contains invalid characters: {:?} (allowed: a-z, A-Z, 0-9, -, _)",
            field_name,
            invalid_chars
        );
    }

    Ok(())
}

/// Validate a hierarchical secret name such as `app/prod/database-url`
pub fn validate_secret_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("secret name cannot be empty");
    }

    if name.len() > SECRET_NAME_MAX_LENGTH {
        anyhow::bail!(
            "secret name exceeds maximum length ({} > {})",
            name.len(),
            SECRET_NAME_MAX_LENGTH
        );
    }

    for segment in name.split('/') {
        if segment.is_empty() {
            anyhow::bail!("secret name contains an empty path segment");
        }

        let invalid_chars: Vec<char> = segment
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric() && !SECRET_SEGMENT_ALLOWED_CHARS.contains(c))
            .collect();

        if !invalid_chars.is_empty() {
            anyhow::bail!(
                "secret name segment '{}' contains invalid characters: {:?} (allowed: a-z, A-Z, 0-9, -, _, .)",
                segment,
                invalid_chars
            );
        }
    }

    Ok(())
}

/// Validate an environment variable name used for secret injection
pub fn validate_env_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("{} cannot be empty", field_name);
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        anyhow::bail!("{} cannot start with a digit: {}", field_name, name);
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!(
            "{} must contain only A-Z, a-z, 0-9 and _, got: {}",
            field_name,
            name
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_resource_name_valid() {
        assert!(validate_resource_name("network", "resource").is_ok());
        assert!(validate_resource_name("db-primary", "resource").is_ok());
        assert!(validate_resource_name("api_service2", "resource").is_ok());
    }

    #[test]
    fn test_validate_resource_name_invalid() {
        assert!(validate_resource_name("", "resource").is_err());
        assert!(validate_resource_name("1network", "resource").is_err());
        assert!(validate_resource_name("my network", "resource").is_err());
        assert!(validate_resource_name("api/v2", "resource").is_err());

        let long_name = "a".repeat(64);
        assert!(validate_resource_name(&long_name, "resource").is_err());
    }

    #[test]
    fn test_validate_secret_name() {
        assert!(validate_secret_name("app/prod/database-url").is_ok());
        assert!(validate_secret_name("secret_key_base").is_ok());
        assert!(validate_secret_name("app/v1.2/token").is_ok());

        assert!(validate_secret_name("").is_err());
        assert!(validate_secret_name("app//db").is_err());
        assert!(validate_secret_name("/app").is_err());
        assert!(validate_secret_name("app/db@v1").is_err());
        assert!(validate_secret_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_validate_env_name() {
        assert!(validate_env_name("DATABASE_URL", "env").is_ok());
        assert!(validate_env_name("SECRET_KEY_BASE", "env").is_ok());

        assert!(validate_env_name("", "env").is_err());
        assert!(validate_env_name("1PASSWORD", "env").is_err());
        assert!(validate_env_name("DATABASE-URL", "env").is_err());
    }
}
