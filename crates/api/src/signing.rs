use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use relay_errors::{RelayError, RelayResult};

type HmacSha256 = Hmac<Sha256>;

/// 请求体签名头，值为 HMAC-SHA256(raw body) 的hex或base64编码
pub const SIGNATURE_HEADER: &str = "x-signature";

fn mac_for(secret: &str, body: &[u8]) -> RelayResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| RelayError::config_error(format!("invalid hmac secret: {e}")))?;
    mac.update(body);
    Ok(mac)
}

pub fn sign_hex(secret: &str, body: &[u8]) -> RelayResult<String> {
    Ok(hex::encode(mac_for(secret, body)?.finalize().into_bytes()))
}

pub fn sign_base64(secret: &str, body: &[u8]) -> RelayResult<String> {
    Ok(general_purpose::STANDARD.encode(mac_for(secret, body)?.finalize().into_bytes()))
}

/// 解码签名头：优先按hex解析，失败再按base64解析
fn decode_signature(signature: &str) -> Option<Vec<u8>> {
    let signature = signature.trim();
    if let Ok(bytes) = hex::decode(signature) {
        return Some(bytes);
    }
    general_purpose::STANDARD
        .decode(signature)
        .or_else(|_| general_purpose::URL_SAFE.decode(signature))
        .ok()
}

/// 常量时间校验
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(provided) = decode_signature(signature) else {
        return false;
    };
    match mac_for(secret, body) {
        Ok(mac) => mac.verify_slice(&provided).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shared-secret";
    const BODY: &[u8] = br#"{"kind":"PING"}"#;

    #[test]
    fn test_hex_and_base64_both_verify() {
        let hex_sig = sign_hex(SECRET, BODY).unwrap();
        let b64_sig = sign_base64(SECRET, BODY).unwrap();

        assert_eq!(hex_sig.len(), 64);
        assert!(verify(SECRET, BODY, &hex_sig));
        assert!(verify(SECRET, BODY, &hex_sig.to_uppercase()));
        assert!(verify(SECRET, BODY, &b64_sig));
    }

    #[test]
    fn test_tampered_body_or_secret_fails() {
        let sig = sign_hex(SECRET, BODY).unwrap();
        assert!(!verify(SECRET, br#"{"kind":"BUYBACK_TWAP_AND_LP"}"#, &sig));
        assert!(!verify("other-secret", BODY, &sig));
        assert!(!verify(SECRET, BODY, "not-a-signature!"));
        assert!(!verify(SECRET, BODY, ""));
    }
}
