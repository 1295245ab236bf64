use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an administrator token: the admin's username and
/// an expiry. Issued out-of-core (operator tooling, tests); the session
/// core only verifies.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub exp: i64,
}

/// Load or generate the token signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("Token signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        // Invalid key file — regenerate
        tracing::warn!("Token key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::random();
    std::fs::write(&key_path, key)?;
    tracing::info!("Token signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an administrator token with the given lifetime.
pub fn issue_admin_token(
    secret: &[u8],
    username: &str,
    lifetime_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = AdminClaims {
        sub: username.to_string(),
        exp: Utc::now().timestamp() + lifetime_secs,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Validate an administrator token and return its claims.
/// Expiry is enforced by the decoder.
pub fn validate_admin_token(
    secret: &[u8],
    token: &str,
) -> Result<AdminClaims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    let token_data = decode::<AdminClaims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_valid_token() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = issue_admin_token(secret, "root", 600).unwrap();
        let claims = validate_admin_token(secret, &token).unwrap();
        assert_eq!(claims.sub, "root");
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = issue_admin_token(secret, "root", -600).unwrap();
        assert!(validate_admin_token(secret, &token).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let token = issue_admin_token(secret, "root", 600).unwrap();
        assert!(validate_admin_token(b"another-secret-another-secret!!!", &token).is_err());
    }
}
