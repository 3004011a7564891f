//! Deterministic signing keys and token minting.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use p521::ecdsa::signature::Signer;
use p521::elliptic_curve::sec1::ToEncodedPoint;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Ed25519 keypair derived from a one-byte seed.
///
/// The same seed always produces the same key.
pub struct TestKeypair {
    kid: String,
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    pub fn new(seed: u8, kid: &str) -> Self {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("Failed to create test keypair");

        Self {
            kid: kid.to_string(),
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// JWK with `kid`, `alg` and `use` set.
    pub fn jwk_json(&self) -> Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }

    /// JWK with `kid` and the given `use`, no `alg`.
    pub fn jwk_json_with_use(&self, key_use: &str) -> Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "use": key_use
        })
    }

    /// JWK with only the key material, as some issuers publish it.
    pub fn bare_jwk_json(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
        })
    }

    /// Sign `claims` with a header naming this key's `kid`.
    pub fn sign<T: Serialize>(&self, claims: &T) -> String {
        self.sign_with_kid(claims, Some(&self.kid))
    }

    /// Sign `claims` with no `kid` in the header.
    pub fn sign_without_kid<T: Serialize>(&self, claims: &T) -> String {
        self.sign_with_kid(claims, None)
    }

    pub fn sign_with_kid<T: Serialize>(&self, claims: &T, kid: Option<&str>) -> String {
        let encoding_key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = kid.map(ToString::to_string);

        encode(&header, claims, &encoding_key).expect("Failed to sign token")
    }
}

/// P-521 keypair for ES512 tokens, derived from a one-byte seed.
pub struct P521Keypair {
    kid: String,
    secret: p521::SecretKey,
    signing_key: p521::ecdsa::SigningKey,
}

impl P521Keypair {
    pub fn new(seed: u8, kid: &str) -> Self {
        let mut scalar = [0u8; 66];
        scalar[64] = 0x5a;
        scalar[65] = seed.max(1);

        Self {
            kid: kid.to_string(),
            secret: p521::SecretKey::from_slice(&scalar).expect("Failed to create P-521 key"),
            signing_key: p521::ecdsa::SigningKey::from_slice(&scalar)
                .expect("Failed to create P-521 signing key"),
        }
    }

    pub fn jwk_json(&self) -> Value {
        let point = self.secret.public_key().to_encoded_point(false);
        json!({
            "kty": "EC",
            "kid": self.kid,
            "crv": "P-521",
            "x": URL_SAFE_NO_PAD.encode(point.x().expect("uncompressed point has x")),
            "y": URL_SAFE_NO_PAD.encode(point.y().expect("uncompressed point has y")),
            "alg": "ES512",
            "use": "sig"
        })
    }

    /// Sign `claims` as an ES512 JWS naming this key's `kid`.
    pub fn sign<T: Serialize>(&self, claims: &T) -> String {
        let header = json!({"alg": "ES512", "typ": "JWT", "kid": self.kid});
        let payload = serde_json::to_vec(claims).expect("Failed to encode claims");
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload)
        );

        let signature: p521::ecdsa::Signature = self.signing_key.sign(signing_input.as_bytes());
        format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }
}

/// Build PKCS#8 v1 document from Ed25519 seed.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // Outer SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier: SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // PrivateKey: OCTET STRING wrapping OCTET STRING with the seed
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

/// Claims valid for one hour from `issuer` for `sub`.
pub fn base_claims(issuer: &str, sub: &str) -> Map<String, Value> {
    let now = Utc::now().timestamp();
    let mut claims = Map::new();
    claims.insert("iss".to_string(), json!(issuer));
    claims.insert("sub".to_string(), json!(sub));
    claims.insert("iat".to_string(), json!(now));
    claims.insert("exp".to_string(), json!(now + 3600));
    claims
}

/// `base_claims` plus the given extra fields.
pub fn claims_with(issuer: &str, sub: &str, extra: Value) -> Map<String, Value> {
    let mut claims = base_claims(issuer, sub);
    if let Value::Object(fields) = extra {
        claims.extend(fields);
    }
    claims
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_key() {
        let a = TestKeypair::new(7, "a");
        let b = TestKeypair::new(7, "b");
        assert_eq!(a.jwk_json()["x"], b.jwk_json()["x"]);
        assert_ne!(a.jwk_json()["x"], TestKeypair::new(8, "c").jwk_json()["x"]);
    }

    #[test]
    fn test_p521_jwk_coordinates_are_full_width() {
        let jwk = P521Keypair::new(1, "p521").jwk_json();
        for member in ["x", "y"] {
            let bytes = URL_SAFE_NO_PAD.decode(jwk[member].as_str().unwrap()).unwrap();
            assert_eq!(bytes.len(), 66);
        }
    }

    #[test]
    fn test_signed_token_has_three_parts() {
        let keypair = TestKeypair::new(1, "key-1");
        let token = keypair.sign(&base_claims("https://issuer.test", "user-1"));
        assert_eq!(token.split('.').count(), 3);
    }
}
