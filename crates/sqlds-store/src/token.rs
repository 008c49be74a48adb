//! Session token generation.

use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{StoreError, StoreResult};

/// Length of every session token, in characters.
pub const TOKEN_LEN: usize = 100;

const ALPHABET: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Largest multiple of 26 that fits in a byte; bytes at or above it are
/// rejected so every letter is equally likely.
const ACCEPT_BELOW: u8 = 234;

/// Generate a fresh token of [`TOKEN_LEN`] uppercase ASCII letters.
///
/// Tokens are not checked against existing sessions; the `sessions.token`
/// UNIQUE constraint is the only guard against a collision.
pub fn generate_token() -> StoreResult<String> {
    let rng = SystemRandom::new();
    let mut token = String::with_capacity(TOKEN_LEN);
    let mut buf = [0u8; TOKEN_LEN + TOKEN_LEN / 4];

    while token.len() < TOKEN_LEN {
        rng.fill(&mut buf).map_err(|_| StoreError::Entropy)?;
        for byte in buf.iter().copied().filter(|b| *b < ACCEPT_BELOW) {
            token.push(char::from(ALPHABET[usize::from(byte % 26)]));
            if token.len() == TOKEN_LEN {
                break;
            }
        }
    }

    Ok(token)
}

/// Returns `true` if `token` has the shape produced by [`generate_token`].
#[cfg(test)]
pub(crate) fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_uppercase())
}
