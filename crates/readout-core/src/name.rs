//! Validation for names that appear in condition strings

use thiserror::Error;

/// Error type for invalid readout/machine names
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name cannot be empty")]
    Empty,

    #[error(
        "name '{0}' contains invalid characters (must start with a letter or underscore, \
         followed by letters, digits, or underscores)"
    )]
    InvalidChars(String),
}

/// Check that a name is referencable from the condition language.
///
/// Names must match `[A-Za-z_][A-Za-z0-9_]*`, the same shape the condition
/// lexer accepts, so every registered readout and machine can be named in
/// a condition string.
pub fn validate_name(name: &str) -> Result<(), NameError> {
    let mut chars = name.chars();
    match chars.next() {
        None => Err(NameError::Empty),
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                Ok(())
            } else {
                Err(NameError::InvalidChars(name.to_string()))
            }
        }
        Some(_) => Err(NameError::InvalidChars(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_name("cpu_temp").is_ok());
        assert!(validate_name("_hidden").is_ok());
        assert!(validate_name("pump2").is_ok());
        assert!(validate_name("X").is_ok());
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(validate_name(""), Err(NameError::Empty));
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(
            validate_name("2fast"),
            Err(NameError::InvalidChars(_))
        ));
        assert!(matches!(
            validate_name("cpu-temp"),
            Err(NameError::InvalidChars(_))
        ));
        assert!(matches!(
            validate_name("cpu temp"),
            Err(NameError::InvalidChars(_))
        ));
    }
}
