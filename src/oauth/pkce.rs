//! PKCE (RFC 7636) and CSRF state generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Ephemeral secrets for one interactive login attempt
pub struct PkceChallenge {
    /// High-entropy verifier, sent only in the token exchange
    pub code_verifier: String,

    /// `BASE64URL(SHA256(code_verifier))`, sent in the authorization request
    pub code_challenge: String,

    /// CSRF binding between the authorization request and the callback
    pub state: String,
}

impl PkceChallenge {
    /// Generate a fresh verifier, challenge and state
    pub fn generate() -> Self {
        // 32 random bytes -> 43 base64url chars, the RFC minimum
        let verifier_bytes: [u8; 32] = rand::rng().random();
        let code_verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let code_challenge = challenge_for(&code_verifier);

        let state_bytes: [u8; 16] = rand::rng().random();
        let state = URL_SAFE_NO_PAD.encode(state_bytes);

        Self {
            code_verifier,
            code_challenge,
            state,
        }
    }
}

/// S256 code challenge for a verifier
pub fn challenge_for(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_matches_rfc7636_appendix_b() {
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn generated_challenge_is_sha256_of_verifier() {
        let pkce = PkceChallenge::generate();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.code_verifier.as_bytes()));
        assert_eq!(pkce.code_challenge, expected);
    }

    #[test]
    fn values_are_base64url_unpadded() {
        for _ in 0..10 {
            let pkce = PkceChallenge::generate();
            for s in [&pkce.code_verifier, &pkce.code_challenge, &pkce.state] {
                assert!(!s.contains('+'));
                assert!(!s.contains('/'));
                assert!(!s.contains('='));
            }
            assert_eq!(pkce.code_verifier.len(), 43);
            assert!(pkce.state.len() >= 20);
        }
    }

    #[test]
    fn generates_unique_values() {
        let a = PkceChallenge::generate();
        let b = PkceChallenge::generate();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.state, b.state);
    }
}
