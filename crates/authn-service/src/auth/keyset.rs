//! Immutable snapshots of verification keys fetched from a JWKS endpoint.
//!
//! A [`KeySet`] is built once from a JWKS document and never mutated. Refresh
//! replaces the whole snapshot, so a reader holding an `Arc<KeySet>` always
//! sees a consistent set of keys.
//!
//! # Security
//!
//! - Only the algorithms in [`SigningAlgorithm`] are accepted
//! - Structurally invalid keys are skipped, never partially loaded
//! - `Debug` output never includes key material

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use p521::ecdsa::signature::Verifier;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Smallest RSA modulus the verifier accepts (2048 bits).
const MIN_RSA_MODULUS_BYTES: usize = 256;

/// Ed25519 public keys are always 32 bytes.
const ED25519_KEY_BYTES: usize = 32;

/// Signature algorithms a token header may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    ES256,
    ES384,
    ES512,
    HS256,
    HS384,
    HS512,
    EdDSA,
}

impl SigningAlgorithm {
    /// Parse a header `alg` value against the allow-list.
    pub fn parse(alg: &str) -> Option<Self> {
        let parsed = match alg {
            "RS256" => Self::RS256,
            "RS384" => Self::RS384,
            "RS512" => Self::RS512,
            "PS256" => Self::PS256,
            "PS384" => Self::PS384,
            "PS512" => Self::PS512,
            "ES256" => Self::ES256,
            "ES384" => Self::ES384,
            "ES512" => Self::ES512,
            "HS256" => Self::HS256,
            "HS384" => Self::HS384,
            "HS512" => Self::HS512,
            "EdDSA" => Self::EdDSA,
            _ => return None,
        };
        Some(parsed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::EdDSA => "EdDSA",
        }
    }

    /// The `jsonwebtoken` algorithm for this kind of signature.
    ///
    /// ES512 (P-521) is verified with the `p521` crate instead.
    pub fn jwt_algorithm(self) -> Option<Algorithm> {
        let alg = match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::RS512 => Algorithm::RS512,
            Self::PS256 => Algorithm::PS256,
            Self::PS384 => Algorithm::PS384,
            Self::PS512 => Algorithm::PS512,
            Self::ES256 => Algorithm::ES256,
            Self::ES384 => Algorithm::ES384,
            Self::ES512 => return None,
            Self::HS256 => Algorithm::HS256,
            Self::HS384 => Algorithm::HS384,
            Self::HS512 => Algorithm::HS512,
            Self::EdDSA => Algorithm::EdDSA,
        };
        Some(alg)
    }

    /// Whether a key of the given type (and curve) can carry this algorithm.
    fn fits(self, material: &KeyMaterial) -> bool {
        match (self, material) {
            (
                Self::RS256 | Self::RS384 | Self::RS512 | Self::PS256 | Self::PS384 | Self::PS512,
                KeyMaterial::Rsa,
            ) => true,
            (Self::ES256, KeyMaterial::Ec { curve }) => curve == "P-256",
            (Self::ES384, KeyMaterial::Ec { curve }) => curve == "P-384",
            (Self::ES512, KeyMaterial::Ec { curve }) => curve == "P-521",
            (Self::HS256 | Self::HS384 | Self::HS512, KeyMaterial::Symmetric) => true,
            (Self::EdDSA, KeyMaterial::Okp) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared `use` of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyUse {
    Signing,
    Unspecified,
    Other(String),
}

impl KeyUse {
    fn from_jwk(value: Option<&str>) -> Self {
        match value {
            None => KeyUse::Unspecified,
            Some("sig") => KeyUse::Signing,
            Some(other) => KeyUse::Other(other.to_string()),
        }
    }

    /// Signing and unspecified keys are tried first during resolution.
    pub fn is_signing_candidate(&self) -> bool {
        matches!(self, KeyUse::Signing | KeyUse::Unspecified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyMaterial {
    Rsa,
    Ec { curve: String },
    Okp,
    Symmetric,
}

/// Coordinate length in bytes for the supported EC curves.
fn ec_coordinate_len(curve: &str) -> Option<usize> {
    match curve {
        "P-256" => Some(32),
        "P-384" => Some(48),
        "P-521" => Some(66),
        _ => None,
    }
}

/// Decode a base64url JWK member, failing unless it has `check`ed length.
fn decode_member(
    name: &str,
    encoded: &str,
    check: impl Fn(usize) -> bool,
) -> Result<Vec<u8>, String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| format!("invalid '{name}' encoding: {e}"))?;
    if !check(bytes.len()) {
        return Err(format!("'{name}' has unexpected length {}", bytes.len()));
    }
    Ok(bytes)
}

#[derive(Clone)]
enum KeyVerifier {
    Jwt(DecodingKey),
    P521(Arc<p521::ecdsa::VerifyingKey>),
}

/// Rules applied to every token verified against a key set.
#[derive(Debug, Clone)]
pub struct VerificationRules {
    /// Expected `iss` value.
    pub issuer: String,
    /// Leeway for `exp`/`nbf`.
    pub leeway: Duration,
}

/// One verification key from a JWKS document.
#[derive(Clone)]
pub struct VerificationKey {
    kid: Option<String>,
    declared_alg: Option<String>,
    key_use: KeyUse,
    material: KeyMaterial,
    verifier: KeyVerifier,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("alg", &self.declared_alg)
            .field("use", &self.key_use)
            .field("kty", &self.material)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Build a key from one JWKS entry.
    ///
    /// Returns a description of the first structural problem found.
    pub fn from_jwk(value: &Value) -> Result<Self, String> {
        let obj = value.as_object().ok_or("key entry is not an object")?;
        let str_field = |name: &str| obj.get(name).and_then(Value::as_str);
        let required = |name: &str| {
            str_field(name)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("missing '{name}'"))
        };

        let kty = required("kty")?;
        let (material, verifier) = match kty {
            "RSA" => {
                let (n, e) = (required("n")?, required("e")?);
                let modulus = decode_member("n", n, |_| true)?;
                let significant = modulus.iter().skip_while(|b| **b == 0).count();
                if significant < MIN_RSA_MODULUS_BYTES {
                    return Err(format!("RSA modulus of {significant} bytes is too short"));
                }
                decode_member("e", e, |len| (1..=8).contains(&len))?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| format!("invalid RSA components: {e}"))?;
                (KeyMaterial::Rsa, KeyVerifier::Jwt(key))
            }
            "EC" => {
                let curve = required("crv")?.to_string();
                let len = ec_coordinate_len(&curve)
                    .ok_or_else(|| format!("unsupported EC curve '{curve}'"))?;
                let (x, y) = (required("x")?, required("y")?);
                let x_bytes = decode_member("x", x, |l| l == len)?;
                let y_bytes = decode_member("y", y, |l| l == len)?;

                let verifier = if curve == "P-521" {
                    let mut sec1 = Vec::with_capacity(1 + 2 * len);
                    sec1.push(0x04);
                    sec1.extend_from_slice(&x_bytes);
                    sec1.extend_from_slice(&y_bytes);
                    let key = p521::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                        .map_err(|_| "P-521 point is not on the curve".to_string())?;
                    KeyVerifier::P521(Arc::new(key))
                } else {
                    let key = DecodingKey::from_ec_components(x, y)
                        .map_err(|e| format!("invalid EC components: {e}"))?;
                    KeyVerifier::Jwt(key)
                };
                (KeyMaterial::Ec { curve }, verifier)
            }
            "OKP" => {
                if required("crv")? != "Ed25519" {
                    return Err("unsupported OKP curve".to_string());
                }
                let x = required("x")?;
                decode_member("x", x, |l| l == ED25519_KEY_BYTES)?;
                let key = DecodingKey::from_ed_components(x)
                    .map_err(|e| format!("invalid OKP components: {e}"))?;
                (KeyMaterial::Okp, KeyVerifier::Jwt(key))
            }
            "oct" => {
                let secret = decode_member("k", required("k")?, |l| l > 0)?;
                (
                    KeyMaterial::Symmetric,
                    KeyVerifier::Jwt(DecodingKey::from_secret(&secret)),
                )
            }
            other => return Err(format!("unsupported key type '{other}'")),
        };

        Ok(Self {
            kid: str_field("kid").filter(|s| !s.is_empty()).map(String::from),
            declared_alg: str_field("alg").map(String::from),
            key_use: KeyUse::from_jwk(str_field("use")),
            material,
            verifier,
        })
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn declared_alg(&self) -> Option<&str> {
        self.declared_alg.as_deref()
    }

    pub fn key_use(&self) -> &KeyUse {
        &self.key_use
    }

    /// A key matches when its declared `alg` equals the header's. Keys that
    /// declare no `alg` match when their type fits the algorithm.
    pub fn matches_algorithm(&self, alg: SigningAlgorithm) -> bool {
        match &self.declared_alg {
            Some(declared) => declared == alg.as_str(),
            None => alg.fits(&self.material),
        }
    }

    /// Verify the token signature and standard claims against this key.
    ///
    /// The signature is checked before any claim, so an error for which
    /// [`is_key_mismatch`] is false means this key produced the signature.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        alg: SigningAlgorithm,
        rules: &VerificationRules,
    ) -> Result<T, JwtError> {
        match &self.verifier {
            KeyVerifier::Jwt(decoding_key) => {
                let alg = alg.jwt_algorithm().ok_or(ErrorKind::InvalidAlgorithm)?;
                let mut validation = Validation::new(alg);
                validation.leeway = rules.leeway.as_secs();
                validation.validate_nbf = true;
                // Audience rules are per origin and applied after decoding
                validation.validate_aud = false;
                validation.set_issuer(&[rules.issuer.as_str()]);

                jsonwebtoken::decode::<T>(token, decoding_key, &validation).map(|data| data.claims)
            }
            KeyVerifier::P521(key) => {
                if alg != SigningAlgorithm::ES512 {
                    return Err(ErrorKind::InvalidAlgorithm.into());
                }
                verify_es512(token, key, rules)
            }
        }
    }
}

/// ES512 verification with the same claim rules `jsonwebtoken` applies.
fn verify_es512<T: DeserializeOwned>(
    token: &str,
    key: &p521::ecdsa::VerifyingKey,
    rules: &VerificationRules,
) -> Result<T, JwtError> {
    let (message, signature) = token.rsplit_once('.').ok_or(ErrorKind::InvalidToken)?;
    let (_, payload) = message.split_once('.').ok_or(ErrorKind::InvalidToken)?;

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| ErrorKind::InvalidToken)?;
    let signature =
        p521::ecdsa::Signature::from_slice(&signature).map_err(|_| ErrorKind::InvalidSignature)?;
    key.verify(message.as_bytes(), &signature)
        .map_err(|_| ErrorKind::InvalidSignature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| ErrorKind::InvalidToken)?;
    let claims: Value = serde_json::from_slice(&payload)?;
    check_registered_claims(&claims, rules, chrono::Utc::now().timestamp())?;
    Ok(serde_json::from_value(claims)?)
}

fn check_registered_claims(
    claims: &Value,
    rules: &VerificationRules,
    now: i64,
) -> Result<(), JwtError> {
    let leeway = i64::try_from(rules.leeway.as_secs()).unwrap_or(i64::MAX);

    let exp = claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| ErrorKind::MissingRequiredClaim("exp".to_string()))?;
    if exp < now.saturating_sub(leeway) {
        return Err(ErrorKind::ExpiredSignature.into());
    }

    if let Some(nbf) = claims.get("nbf").and_then(Value::as_i64) {
        if nbf > now.saturating_add(leeway) {
            return Err(ErrorKind::ImmatureSignature.into());
        }
    }

    match claims.get("iss").and_then(Value::as_str) {
        None => Err(ErrorKind::MissingRequiredClaim("iss".to_string()).into()),
        Some(iss) if iss != rules.issuer => Err(ErrorKind::InvalidIssuer.into()),
        Some(_) => Ok(()),
    }
}

/// True when the error means "this key did not produce the signature".
pub fn is_key_mismatch(err: &JwtError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::Crypto(_)
    )
}

/// An immutable set of verification keys for one issuer.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: Vec<VerificationKey>,
    skipped: usize,
}

impl KeySet {
    /// Parse a JWKS document (RFC 7517).
    ///
    /// Entries that are not structurally valid are skipped. The set is
    /// rejected unless at least one key survives.
    pub fn from_jwks_bytes(body: &[u8]) -> Result<Self, String> {
        let document: Value =
            serde_json::from_slice(body).map_err(|e| format!("body is not JSON: {e}"))?;
        Self::from_jwks_value(&document)
    }

    pub fn from_jwks_value(document: &Value) -> Result<Self, String> {
        let entries = document
            .get("keys")
            .and_then(Value::as_array)
            .ok_or("document has no 'keys' array")?;

        if entries.is_empty() {
            return Err("document contains no keys".to_string());
        }

        let mut keys = Vec::with_capacity(entries.len());
        let mut skipped = 0;
        for entry in entries {
            match VerificationKey::from_jwk(entry) {
                Ok(key) => keys.push(key),
                Err(reason) => {
                    skipped += 1;
                    let kid = entry.get("kid").and_then(serde_json::Value::as_str);
                    tracing::debug!(
                        target: "authn.keyset",
                        kid = kid.unwrap_or("-"),
                        reason = %reason,
                        "Skipping invalid JWKS entry"
                    );
                }
            }
        }

        if keys.is_empty() {
            return Err(format!(
                "none of the {} keys in the document are valid",
                entries.len()
            ));
        }

        Ok(Self { keys, skipped })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of entries dropped while parsing.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.iter().find(|k| k.kid() == Some(kid))
    }

    /// Keys usable for `alg`, signing-use (or unspecified) keys first.
    pub fn candidates_for(&self, alg: SigningAlgorithm) -> Vec<&VerificationKey> {
        let (mut signing, other): (Vec<_>, Vec<_>) = self
            .keys
            .iter()
            .filter(|k| k.matches_algorithm(alg))
            .partition(|k| k.key_use().is_signing_candidate());
        signing.extend(other);
        signing
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    // RFC 8037 test vector public key
    const ED25519_X: &str = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";

    fn okp(kid: &str, alg: Option<&str>, key_use: Option<&str>) -> Value {
        let mut key = json!({"kty": "OKP", "crv": "Ed25519", "x": ED25519_X, "kid": kid});
        if let Some(alg) = alg {
            key["alg"] = json!(alg);
        }
        if let Some(u) = key_use {
            key["use"] = json!(u);
        }
        key
    }

    #[test]
    fn test_algorithm_allow_list() {
        for alg in [
            "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "ES512",
            "HS256", "HS384", "HS512", "EdDSA",
        ] {
            let parsed = SigningAlgorithm::parse(alg).unwrap();
            assert_eq!(parsed.as_str(), alg);
        }
        assert!(SigningAlgorithm::parse("none").is_none());
        assert!(SigningAlgorithm::parse("rs256").is_none());
        assert!(SigningAlgorithm::parse("ES256K").is_none());
    }

    #[test]
    fn test_es512_verified_outside_jsonwebtoken() {
        assert!(SigningAlgorithm::ES512.jwt_algorithm().is_none());
        assert_eq!(SigningAlgorithm::EdDSA.jwt_algorithm(), Some(Algorithm::EdDSA));
    }

    #[test]
    fn test_short_or_empty_key_material_rejected() {
        let doc = json!({"keys": [
            {"kty": "OKP", "crv": "Ed25519", "kid": "short-ed", "x": "AAAA"},
            {"kty": "RSA", "kid": "tiny-rsa", "n": "AQAB", "e": "AQAB"},
            {"kty": "EC", "crv": "P-256", "kid": "short-ec", "x": "AAAA", "y": "AAAA"},
            {"kty": "EC", "crv": "P-192", "kid": "odd-curve", "x": "AAAA", "y": "AAAA"},
        ]});
        let err = KeySet::from_jwks_value(&doc).unwrap_err();
        assert!(err.contains("none of the 4 keys"));
    }

    #[test]
    fn test_p521_point_must_be_on_curve() {
        let zero = URL_SAFE_NO_PAD.encode([0u8; 66]);
        let entry = json!({"kty": "EC", "crv": "P-521", "x": zero, "y": zero});
        assert!(VerificationKey::from_jwk(&entry).is_err());
    }

    #[test]
    fn test_es512_claim_rules() {
        let rules = VerificationRules {
            issuer: "https://idp.test".to_string(),
            leeway: Duration::from_secs(30),
        };
        let now = 1_000_000;
        let check = |claims: Value| check_registered_claims(&claims, &rules, now);

        assert!(check(json!({"iss": "https://idp.test", "exp": now + 60})).is_ok());
        // Inside leeway
        assert!(check(json!({"iss": "https://idp.test", "exp": now - 10})).is_ok());
        assert!(matches!(
            check(json!({"iss": "https://idp.test", "exp": now - 60})).unwrap_err().kind(),
            ErrorKind::ExpiredSignature
        ));
        assert!(matches!(
            check(json!({"iss": "https://idp.test"})).unwrap_err().kind(),
            ErrorKind::MissingRequiredClaim(c) if c == "exp"
        ));
        assert!(matches!(
            check(json!({"iss": "https://idp.test", "exp": now + 60, "nbf": now + 120}))
                .unwrap_err()
                .kind(),
            ErrorKind::ImmatureSignature
        ));
        assert!(matches!(
            check(json!({"iss": "https://other.test", "exp": now + 60})).unwrap_err().kind(),
            ErrorKind::InvalidIssuer
        ));
    }

    #[test]
    fn test_parse_skips_invalid_entries() {
        let doc = json!({"keys": [
            okp("good", Some("EdDSA"), Some("sig")),
            {"kty": "RSA", "kid": "no-modulus", "e": "AQAB"},
            {"kty": "XYZ", "kid": "unknown"},
            "not-an-object"
        ]});

        let set = KeySet::from_jwks_value(&doc).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.skipped(), 3);
        assert!(set.get("good").is_some());
        assert!(set.get("no-modulus").is_none());
    }

    #[test]
    fn test_parse_rejects_empty_and_all_invalid() {
        assert!(KeySet::from_jwks_value(&json!({"keys": []})).is_err());
        assert!(KeySet::from_jwks_value(&json!({"nokeys": true})).is_err());
        assert!(KeySet::from_jwks_value(&json!({"keys": [{"kty": "OKP"}]})).is_err());
        assert!(KeySet::from_jwks_bytes(b"<html>").is_err());
    }

    #[test]
    fn test_candidates_signing_first() {
        let doc = json!({"keys": [
            okp("enc", Some("EdDSA"), Some("enc")),
            okp("sig", Some("EdDSA"), Some("sig")),
            okp("unspecified", None, None),
            okp("rsa-alg", Some("RS256"), Some("sig")),
        ]});
        let set = KeySet::from_jwks_value(&doc).unwrap();

        let kids: Vec<_> = set
            .candidates_for(SigningAlgorithm::EdDSA)
            .iter()
            .map(|k| k.kid().unwrap())
            .collect();
        assert_eq!(kids, vec!["sig", "unspecified", "enc"]);
        assert!(set.candidates_for(SigningAlgorithm::ES256).is_empty());
    }

    #[test]
    fn test_symmetric_key_parses() {
        let doc = json!({"keys": [{"kty": "oct", "kid": "h", "k": "c2VjcmV0LWtleS1tYXRlcmlhbA"}]});
        let set = KeySet::from_jwks_value(&doc).unwrap();
        let key = set.get("h").unwrap();
        assert!(key.matches_algorithm(SigningAlgorithm::HS256));
        assert!(!key.matches_algorithm(SigningAlgorithm::RS256));
    }

    #[test]
    fn test_debug_hides_material() {
        let set = KeySet::from_jwks_value(&json!({"keys": [okp("k1", None, None)]})).unwrap();
        let debug = format!("{:?}", set.get("k1").unwrap());
        assert!(debug.contains("k1"));
        assert!(!debug.contains(ED25519_X));
    }
}
