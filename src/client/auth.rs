use std::time::{SystemTime, UNIX_EPOCH};

use alloy::{
    primitives::U256,
    signers::local::PrivateKeySigner,
    signers::Signer,
};
use alloy_sol_types::{eip712_domain, sol};
use base64::engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE as BASE64_URL_SAFE};
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::ApiConfig;

use super::{ClientError, ClientResult};

type HmacSha256 = Hmac<Sha256>;

// EIP-712 wire format expected by the venue; field order and the attestation
// text are part of the signature and must not change.
const CLOB_DOMAIN_NAME: &str = "ClobAuthDomain";
const CLOB_DOMAIN_VERSION: &str = "1";
const ATTESTATION_TEXT: &str = "This message attests that I control the given wallet";

sol! {
    struct ClobAuth {
        address address;
        string timestamp;
        uint256 nonce;
        string message;
    }
}

/// Wallet signer for L1 auth, bound to the venue's chain.
pub fn wallet_signer(config: &ApiConfig, chain_id: u64) -> ClientResult<PrivateKeySigner> {
    let mut signer = config
        .wallet_private_key
        .parse::<PrivateKeySigner>()
        .map_err(|e| ClientError::Config(format!("wallet private key does not parse: {e}")))?;
    signer.set_chain_id(Some(chain_id.into()));
    Ok(signer)
}

/// Sign the L1 wallet attestation used when deriving or rotating API
/// credentials.
pub async fn l1_attestation_signature(
    signer: &PrivateKeySigner,
    chain_id: u64,
    timestamp: i64,
    nonce: u64,
) -> ClientResult<String> {
    let domain = eip712_domain! {
        name: CLOB_DOMAIN_NAME,
        version: CLOB_DOMAIN_VERSION,
        chain_id: chain_id,
    };
    let attestation = ClobAuth {
        address: signer.address(),
        timestamp: timestamp.to_string(),
        nonce: U256::from(nonce),
        message: ATTESTATION_TEXT.to_string(),
    };

    signer
        .sign_typed_data(&attestation, &domain)
        .await
        .map(|sig| sig.to_string())
        .map_err(|e| ClientError::Eip712(e.to_string()))
}

/// API secrets are handed out in URL-safe base64; some tooling re-encodes
/// them with the standard alphabet. Accept either, ignoring stray whitespace.
fn decode_api_secret(secret: &str) -> ClientResult<Vec<u8>> {
    let compact: String = secret.chars().filter(|c| !c.is_whitespace()).collect();

    if let Ok(key) = BASE64_URL_SAFE.decode(compact.as_bytes()) {
        return Ok(key);
    }
    let standard: String = compact
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    BASE64_STANDARD
        .decode(standard.as_bytes())
        .map_err(|e| ClientError::Hmac(format!("api secret is not valid base64: {e}")))
}

/// HMAC signature over one L2 request: the digest covers
/// `{timestamp}{method}{path}` plus the body when present, and is returned
/// URL-safe base64 encoded for the signature header.
pub fn l2_request_signature(
    secret: &str,
    timestamp: i64,
    method: &str,
    request_path: &str,
    body: Option<&str>,
) -> ClientResult<String> {
    let key = decode_api_secret(secret)?;
    let mut mac =
        HmacSha256::new_from_slice(&key).map_err(|e| ClientError::Hmac(e.to_string()))?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.as_bytes());
    mac.update(request_path.as_bytes());
    if let Some(body) = body {
        mac.update(body.as_bytes());
    }

    Ok(BASE64_URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// Current UNIX timestamp in seconds, as the auth headers expect it.
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Nonce for L1 auth: clock nanos, falling back to randomness if the clock
/// reads before the epoch.
pub fn auth_nonce() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or_else(|_| rand::random(), |d| d.as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_signature_is_url_safe() {
        let secret = BASE64_URL_SAFE.encode(b"0123456789abcdef0123456789abcdef");
        let sig = l2_request_signature(&secret, 1_700_000_000, "POST", "/order", Some("{}"))
            .expect("signature should build");
        assert!(!sig.is_empty());
        assert!(!sig.contains('+'));
        assert!(!sig.contains('/'));
    }

    #[test]
    fn secret_decodes_from_either_alphabet() {
        let key = b"key-material-with-high-bits \xfa\xfb\xfc";
        let url_safe = BASE64_URL_SAFE.encode(key);
        let standard = BASE64_STANDARD.encode(key);

        assert_eq!(decode_api_secret(&url_safe).unwrap(), key);
        assert_eq!(decode_api_secret(&standard).unwrap(), key);
        assert!(decode_api_secret("not base64 at all!!!").is_err());
    }

    #[test]
    fn digest_covers_body_when_present() {
        let secret = BASE64_URL_SAFE.encode(b"0123456789abcdef0123456789abcdef");
        let without = l2_request_signature(&secret, 1, "GET", "/book", None).unwrap();
        let with = l2_request_signature(&secret, 1, "GET", "/book", Some("x")).unwrap();
        assert_ne!(without, with);
    }
}
