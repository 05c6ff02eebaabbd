// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!("{} cannot be empty", field)));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {} (got {})",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate that a number is non-zero
    pub fn positive(value: u64, field: &str) -> Result<()> {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be greater than zero",
                field
            )));
        }
        Ok(())
    }

    /// Validate port number
    pub fn is_port(value: u16, field: &str) -> Result<()> {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a valid port number",
                field
            )));
        }
        Ok(())
    }

    /// Validate a redis URL scheme
    pub fn is_redis_url(value: &str, field: &str) -> Result<()> {
        if !value.starts_with("redis://") && !value.starts_with("rediss://") {
            return Err(ConfigError::ValidationError(format!(
                "{} must start with redis:// or rediss://",
                field
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ConfigValidator::in_range(5, 1, 50, "field").is_ok());
        assert!(ConfigValidator::in_range(0, 1, 50, "field").is_err());
        assert!(ConfigValidator::in_range(51, 1, 50, "field").is_err());
    }

    #[test]
    fn test_port_validation() {
        assert!(ConfigValidator::is_port(5000, "port").is_ok());
        assert!(ConfigValidator::is_port(0, "port").is_err());
    }

    #[test]
    fn test_redis_url_validation() {
        assert!(ConfigValidator::is_redis_url("redis://localhost:6379", "url").is_ok());
        assert!(ConfigValidator::is_redis_url("rediss://cache:6380", "url").is_ok());
        assert!(ConfigValidator::is_redis_url("http://localhost", "url").is_err());
    }
}
