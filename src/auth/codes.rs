//! Random identifiers: verification codes and refresh session ids.

use rand::{rngs::OsRng, Rng, RngCore};

/// 6 lowercase hex characters (3 random bytes).
pub fn email_code() -> String {
    let mut bytes = [0u8; 3];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// 6 ASCII digits, zero padded.
pub fn phone_code() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000u32))
}

/// 128-bit session id, hex encoded.
pub fn session_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_email_code_format() {
        for _ in 0..100 {
            let code = email_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_phone_code_format() {
        for _ in 0..100 {
            let code = phone_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_session_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| session_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.len() == 32));
    }
}
