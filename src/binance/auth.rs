//! Request signing for Binance private endpoints

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::errors::{Result, TraderError};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of the full query string, hex encoded
///
/// # Arguments
/// * `secret` - API secret, used as raw bytes
/// * `query` - url-encoded parameters including `timestamp`
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TraderError::Authentication(format!("Failed to create HMAC: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Append `signature=` to an unsigned query
pub fn signed_query(secret: &str, query: &str) -> Result<String> {
    let signature = sign_query(secret, query)?;
    if query.is_empty() {
        Ok(format!("signature={}", signature))
    } else {
        Ok(format!("{}&signature={}", query, signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Example from the Binance API documentation
    const SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
    const QUERY: &str = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";

    #[test]
    fn test_sign_query_matches_documented_example() {
        let signature = sign_query(SECRET, QUERY).unwrap();
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_signed_query_appends_signature() {
        let signed = signed_query(SECRET, QUERY).unwrap();
        assert!(signed.starts_with(QUERY));
        assert!(signed.contains("&signature="));
    }
}
