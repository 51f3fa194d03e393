//! HS256 签名的访问 token (JWT)

use std::time::Duration;

use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey,
    EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::utils::{unix_secs, TokenError};

pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// 账户 id
    pub sub: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub iat: u64,
    #[serde(default)]
    pub exp: u64,
}

impl Claims {
    pub fn new(sub: impl Into<String>, admin: bool) -> Self {
        Self {
            sub: sub.into(),
            admin,
            iat: 0,
            exp: 0,
        }
    }
}

#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        let key = key.as_ref();
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
        }
    }

    /// 签发 token, 覆盖 claims 中的 iat/exp
    pub fn encode(&self, claims: Claims, ttl: Duration) -> Result<String, TokenError> {
        self.encode_at(claims, ttl, unix_secs())
    }

    fn encode_at(&self, mut claims: Claims, ttl: Duration, now: u64) -> Result<String, TokenError> {
        claims.iat = now;
        claims.exp = now.saturating_add(ttl.as_secs());

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        // 先看 header, 只接受 HS256
        let header = decode_header(token).map_err(map_jwt_error)?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        JwtErrorKind::ExpiredSignature => TokenError::Expired,
        JwtErrorKind::InvalidSignature => TokenError::BadSignature,
        _ => TokenError::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    #[test]
    fn test_encode_decode() {
        let signer = TokenSigner::new("jwt-secret");
        let now = unix_secs();
        let token = signer
            .encode_at(Claims::new("u1", true), DEFAULT_TTL, now)
            .unwrap();

        assert_eq!(token.split('.').count(), 3);
        let claims = signer.decode(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert!(claims.admin);
        assert_eq!(claims.iat, now);
        assert_eq!(claims.exp, now + 6 * 60 * 60);
    }

    #[test]
    fn test_expired() {
        let signer = TokenSigner::new("jwt-secret");
        let token = signer
            .encode_at(
                Claims::new("u1", false),
                Duration::from_secs(60),
                unix_secs() - 3600,
            )
            .unwrap();

        assert!(matches!(signer.decode(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn test_wrong_key() {
        let token = TokenSigner::new("a")
            .encode(Claims::new("u1", false), DEFAULT_TTL)
            .unwrap();

        assert!(matches!(
            TokenSigner::new("b").decode(&token),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_tampered_claims() {
        let signer = TokenSigner::new("jwt-secret");
        let token = signer.encode(Claims::new("u1", false), DEFAULT_TTL).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                admin: true,
                ..signer.decode(&token).unwrap()
            })
            .unwrap(),
        );
        let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);
        assert!(matches!(
            signer.decode(&tampered),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn test_rejects_none_algorithm() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1","admin":true,"exp":99999999999}"#);
        let token = format!("{}.{}.", header, claims);

        assert!(matches!(
            TokenSigner::new("k").decode(&token),
            Err(TokenError::UnsupportedAlgorithm(_)) | Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn test_rejects_other_hmac_algorithm() {
        let mut claims = Claims::new("u1", true);
        claims.exp = unix_secs() + 600;
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap();

        assert!(matches!(
            TokenSigner::new("k").decode(&token),
            Err(TokenError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_malformed() {
        let signer = TokenSigner::new("k");
        assert!(matches!(signer.decode("abc"), Err(TokenError::Malformed)));
        assert!(matches!(signer.decode("a.b.c.d"), Err(TokenError::Malformed)));
        assert!(matches!(signer.decode("!!.??.**"), Err(TokenError::Malformed)));
    }
}
