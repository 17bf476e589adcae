use chrono::{DateTime, Duration, Utc};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
}

pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, identity: &str, secret: &str) -> Verdict;
}

/// A single configured account. Only the SHA-256 digest of the secret is kept.
#[derive(Clone)]
pub struct StaticCredentials {
    identity: String,
    secret_digest: Vec<u8>,
}

impl StaticCredentials {
    pub fn new(identity: &str, secret: &str) -> Self {
        Self {
            identity: identity.to_string(),
            secret_digest: Sha256::digest(secret.as_bytes()).to_vec(),
        }
    }
}

impl CredentialVerifier for StaticCredentials {
    fn verify(&self, identity: &str, secret: &str) -> Verdict {
        let digest = Sha256::digest(secret.as_bytes());
        let identity_ok = constant_time_eq(identity.as_bytes(), self.identity.as_bytes());
        let secret_ok = constant_time_eq(&digest, &self.secret_digest);
        if identity_ok && secret_ok {
            Verdict::Accepted
        } else {
            Verdict::Rejected
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginError {
    #[error("Username and password are required")]
    FieldsRequired,
    #[error("Invalid email or password")]
    InvalidCredentials,
}

pub fn check_login(
    verifier: &dyn CredentialVerifier,
    identity: &str,
    secret: &str,
) -> Result<(), LoginError> {
    if identity.is_empty() || secret.is_empty() {
        return Err(LoginError::FieldsRequired);
    }
    match verifier.verify(identity, secret) {
        Verdict::Accepted => Ok(()),
        Verdict::Rejected => Err(LoginError::InvalidCredentials),
    }
}

/// Issues and checks `<identity>.<expiry>.<signature>` bearer tokens.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
        }
    }

    pub fn issue(&self, identity: &str, now: DateTime<Utc>) -> String {
        let claims = format!(
            "{}.{}",
            urlencoding::encode(identity),
            (now + self.ttl).timestamp()
        );
        let sig = hex::encode(self.sign(&claims));
        format!("{claims}.{sig}")
    }

    /// Returns the identity of a valid, unexpired token.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let (claims, sig_hex) = token.rsplit_once('.')?;
        let expected = hex::decode(sig_hex).ok()?;
        let computed = self.sign(claims);
        if expected.len() != computed.len() || !constant_time_eq(&computed, &expected) {
            return None;
        }
        let (identity, expiry) = claims.rsplit_once('.')?;
        let expiry: i64 = expiry.parse().ok()?;
        if now.timestamp() >= expiry {
            return None;
        }
        urlencoding::decode(identity).ok().map(|s| s.into_owned())
    }

    fn sign(&self, claims: &str) -> Vec<u8> {
        // HMAC accepts keys of any length.
        let mut mac = match Hmac::<Sha256>::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return Vec::new(),
        };
        mac.update(claims.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_accept_only_exact_match() {
        let creds = StaticCredentials::new("admin", "admin");
        assert_eq!(creds.verify("admin", "admin"), Verdict::Accepted);
        assert_eq!(creds.verify("admin", "Admin"), Verdict::Rejected);
        assert_eq!(creds.verify("root", "admin"), Verdict::Rejected);
    }

    #[test]
    fn login_requires_both_fields() {
        let creds = StaticCredentials::new("admin", "admin");
        assert_eq!(check_login(&creds, "", "admin"), Err(LoginError::FieldsRequired));
        assert_eq!(check_login(&creds, "admin", ""), Err(LoginError::FieldsRequired));
        assert_eq!(
            check_login(&creds, "admin", "nope"),
            Err(LoginError::InvalidCredentials)
        );
        assert_eq!(check_login(&creds, "admin", "admin"), Ok(()));
        assert_eq!(
            LoginError::FieldsRequired.to_string(),
            "Username and password are required"
        );
    }

    #[test]
    fn session_token_round_trip() {
        let signer = SessionSigner::new("s3cret", Duration::minutes(10));
        let now = Utc::now();
        let token = signer.issue("ann.lee@example.com", now);
        assert_eq!(
            signer.verify(&token, now + Duration::minutes(5)).as_deref(),
            Some("ann.lee@example.com")
        );
        assert_eq!(signer.verify(&token, now + Duration::minutes(10)), None);
    }

    #[test]
    fn session_token_rejects_tampering() {
        let signer = SessionSigner::new("s3cret", Duration::minutes(10));
        let now = Utc::now();
        let token = signer.issue("admin", now);
        let forged = token.replacen("admin", "root", 1);
        assert_eq!(signer.verify(&forged, now), None);
        assert_eq!(signer.verify("garbage", now), None);

        let other = SessionSigner::new("different", Duration::minutes(10));
        assert_eq!(other.verify(&token, now), None);
    }
}
