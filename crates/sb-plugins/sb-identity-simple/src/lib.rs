//! # sb-identity-simple
//!
//! HMAC-based implementation of `IdentityProvider`.
//! Hands out short numeric aliases, anti-forgery tokens, and signs the
//! session cookie so a client cannot pick someone else's alias.

use hmac::{Hmac, Mac};
use rand::Rng;
use sb_core::traits::IdentityProvider;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct SimpleIdentityProvider {
    /// Secret key for session signatures
    secret: Vec<u8>,
    /// Aliases are drawn from `[10^(digits-1), 10^digits)`
    digits: u32,
    max_attempts: u32,
}

impl SimpleIdentityProvider {
    /// Accepts a secret (e.g., from configuration) and the alias keyspace shape.
    pub fn new(secret: &str, digits: u32, max_attempts: u32) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            digits: digits.clamp(1, 9),
            max_attempts: max_attempts.max(1),
        }
    }

    fn keyspace(&self) -> std::ops::Range<u32> {
        let high = 10u32.pow(self.digits);
        let low = if self.digits == 1 { 0 } else { high / 10 };
        low..high
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.secret).expect("HMAC takes any key size")
    }
}

impl IdentityProvider for SimpleIdentityProvider {
    /// Generates a numeric alias, e.g. "4821" for the default four digits.
    fn generate_alias(&self) -> String {
        rand::thread_rng().gen_range(self.keyspace()).to_string()
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 128 random bits, hex encoded.
    fn new_csrf_token(&self) -> String {
        hex::encode(rand::thread_rng().gen::<[u8; 16]>())
    }

    /// Result format: `{payload}.{hex hmac}`
    fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        format!("{}.{}", payload, hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, signed: &str) -> Option<String> {
        let (payload, signature) = signed.rsplit_once('.')?;
        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(payload.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_stay_in_keyspace() {
        let provider = SimpleIdentityProvider::new("k", 4, 8);
        for _ in 0..500 {
            let alias = provider.generate_alias();
            assert_eq!(alias.len(), 4);
            let n: u32 = alias.parse().unwrap();
            assert!((1000..10000).contains(&n));
        }
    }

    #[test]
    fn signature_round_trip_and_tamper() {
        let provider = SimpleIdentityProvider::new("secret", 4, 8);
        let signed = provider.sign("1234.abcd");
        assert_eq!(provider.verify(&signed).as_deref(), Some("1234.abcd"));

        let forged = signed.replacen("1234", "9999", 1);
        assert_eq!(provider.verify(&forged), None);

        let other = SimpleIdentityProvider::new("other", 4, 8);
        assert_eq!(other.verify(&signed), None);
        assert_eq!(provider.verify("garbage"), None);
    }

    #[test]
    fn csrf_tokens_differ() {
        let provider = SimpleIdentityProvider::new("k", 4, 8);
        let a = provider.new_csrf_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, provider.new_csrf_token());
    }
}
