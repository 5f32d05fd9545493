//! Error types for cache operations.

use std::fmt;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Item larger than the largest slab class.
    Oversized,

    /// No memory available to store the item.
    /// Eviction was attempted (or disabled) and failed to free a slot.
    OutOfMemory,

    /// The key is too long (max 255 bytes).
    KeyTooLong,

    /// The stored value is not an ASCII decimal number.
    NotNumeric,

    /// Arithmetic on the stored number overflowed.
    Overflow,

    /// Rejected configuration at setup.
    InvalidConfig(&'static str),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oversized => write!(f, "object too large for cache"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::KeyTooLong => write!(f, "key too long (max 255 bytes)"),
            Self::NotNumeric => write!(f, "cannot increment or decrement non-numeric value"),
            Self::Overflow => write!(f, "numeric value overflow"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CacheError::Oversized.to_string(),
            "object too large for cache"
        );
        assert_eq!(CacheError::OutOfMemory.to_string(), "out of memory");
        assert_eq!(
            CacheError::InvalidConfig("slab_size too small").to_string(),
            "invalid configuration: slab_size too small"
        );
    }

    #[test]
    fn test_error_is_error_trait() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<CacheError>();
    }
}
