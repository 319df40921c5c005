//! Cryptographically secure token generation and validation.

use rand::Rng;

/// Token length in bytes (produces 32 hex characters).
const TOKEN_BYTES: usize = 16;

/// Generates a CSPRNG token as a 32-character lowercase hex string.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Compares a received token against the expected value in constant time.
pub fn validate_token(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    let diff = received
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b));
    diff == 0
}

/// Returns `true` if `token` has the shape produced by [`generate_token`].
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(is_well_formed(&token));
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn validate_matching_tokens() {
        let token = generate_token();
        assert!(validate_token(&token, &token));
    }

    #[test]
    fn validate_mismatched_tokens() {
        assert!(!validate_token(&generate_token(), &generate_token()));
        assert!(!validate_token("short", "this_is_longer"));
    }

    #[test]
    fn rejects_malformed() {
        assert!(!is_well_formed("xyz"));
        assert!(!is_well_formed(&"g".repeat(32)));
    }
}
