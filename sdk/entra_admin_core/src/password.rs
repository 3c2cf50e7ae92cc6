//! Initial password generation for new accounts.

use rand::seq::{IndexedRandom, SliceRandom};

use crate::error::{DirectoryError, DirectoryResult};

/// Default generated password length.
pub const DEFAULT_PASSWORD_LENGTH: usize = 16;

/// Shortest password accepted by the directory's complexity policy.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Longest password the directory accepts.
pub const MAX_PASSWORD_LENGTH: usize = 256;

// `l`, `L` are left out; they are easily confused with `1` and `I`.
const DIGITS: &[u8] = b"0123456789";
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKMNOPQRSTUVWXYZ";
const SYMBOLS: &[u8] = b"@#$%=:?./|~>*()<";

/// Generate a random password of `length` characters.
///
/// The result always contains at least one digit, one uppercase letter, one
/// lowercase letter and one symbol. Uses the thread-local CSPRNG.
///
/// # Errors
///
/// Returns [`DirectoryError::Validation`] if `length` is outside
/// [`MIN_PASSWORD_LENGTH`]..=[`MAX_PASSWORD_LENGTH`].
pub fn generate(length: usize) -> DirectoryResult<String> {
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&length) {
        return Err(DirectoryError::validation(format!(
            "password length must be between {MIN_PASSWORD_LENGTH} and {MAX_PASSWORD_LENGTH}, got {length}"
        )));
    }

    let mut rng = rand::rng();
    let combined: Vec<u8> = [DIGITS, UPPER, LOWER, SYMBOLS].concat();

    let mut chars: Vec<u8> = Vec::with_capacity(length);
    for class in [DIGITS, UPPER, LOWER, SYMBOLS] {
        chars.extend(class.choose(&mut rng));
    }
    while chars.len() < length {
        chars.extend(combined.choose(&mut rng));
    }
    chars.shuffle(&mut rng);

    Ok(chars.into_iter().map(char::from).collect())
}

/// Generate a password of [`DEFAULT_PASSWORD_LENGTH`].
pub fn generate_default() -> DirectoryResult<String> {
    generate(DEFAULT_PASSWORD_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_every_character_class() {
        for _ in 0..50 {
            let password = generate(MIN_PASSWORD_LENGTH).unwrap();
            assert_eq!(password.len(), MIN_PASSWORD_LENGTH);
            assert!(password.bytes().any(|b| DIGITS.contains(&b)));
            assert!(password.bytes().any(|b| UPPER.contains(&b)));
            assert!(password.bytes().any(|b| LOWER.contains(&b)));
            assert!(password.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn default_length() {
        let password = generate_default().expect("default length is within bounds");
        assert_eq!(password.len(), DEFAULT_PASSWORD_LENGTH);
        assert!((MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&DEFAULT_PASSWORD_LENGTH));
    }

    #[test]
    fn consecutive_passwords_differ() {
        assert_ne!(generate(32).unwrap(), generate(32).unwrap());
    }

    #[test]
    fn rejects_out_of_range_lengths() {
        assert!(matches!(generate(4), Err(DirectoryError::Validation(_))));
        assert!(matches!(generate(1000), Err(DirectoryError::Validation(_))));
    }
}
