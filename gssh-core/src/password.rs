//! Passphrase generation for new SSH keys.
//!
//! Policy: at least [`MIN_LENGTH`] characters; a quarter of them digits, a
//! quarter symbols (when enabled), the rest letters.  Character positions
//! are shuffled.

use rand::Rng;
use rand::seq::SliceRandom;
use zeroize::Zeroizing;

pub const MIN_LENGTH: usize = 16;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"~!@#$%^&*()_+`-={}|[]\\:\"<>?,./";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password is too short: {got} < {MIN_LENGTH}")]
    TooShort { got: usize },
}

/// A passphrase of `length` characters.
///
/// With `symbols == false` no symbols are used at all, instead of the fixed
/// quarter; their share goes to letters.
pub fn generate(length: usize, symbols: bool) -> Result<Zeroizing<String>, PasswordError> {
    if length < MIN_LENGTH {
        return Err(PasswordError::TooShort { got: length });
    }

    let digits = length / 4;
    let symbol_count = if symbols { length / 4 } else { 0 };
    let letters = length - digits - symbol_count;

    let mut rng = rand::rng();
    let mut chars = Zeroizing::new(Vec::with_capacity(length));
    for (set, count) in [(DIGITS, digits), (SYMBOLS, symbol_count), (LETTERS, letters)] {
        for _ in 0..count {
            chars.push(set[rng.random_range(0..set.len())]);
        }
    }
    chars.shuffle(&mut rng);

    // All charset bytes are ASCII.
    Ok(Zeroizing::new(chars.iter().map(|&b| b as char).collect()))
}
