//! Wire format of the signed credential carried in `x-auth-token`:
//!
//! ```text
//! base64(subject):encrypted_secret:base64(role):expires_at_ms:signature
//! ```
//!
//! `signature` is the hex HMAC-SHA256, under the shared key, of the first
//! four fields joined by `:`.

use base64::Engine;

use super::auth::{AuthError, Role};
use super::cipher::SharedKey;

const FIELD_COUNT: usize = 5;

/// A credential split into its raw (still encoded) fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential<'a> {
    pub subject: &'a str,
    pub secret_material: &'a str,
    pub role: &'a str,
    pub expires_at: &'a str,
    pub signature: &'a str,
}

impl<'a> Credential<'a> {
    /// Split a raw token. Anything other than exactly five fields can never
    /// carry a valid signature.
    pub fn parse(raw: &'a str) -> Result<Self, AuthError> {
        let fields: Vec<&str> = raw.trim().split(':').collect();
        if fields.len() != FIELD_COUNT {
            return Err(AuthError::InvalidSignature);
        }
        Ok(Self {
            subject: fields[0],
            secret_material: fields[1],
            role: fields[2],
            expires_at: fields[3],
            signature: fields[4],
        })
    }

    pub fn signed_payload(&self) -> String {
        signed_payload(self.subject, self.secret_material, self.role, self.expires_at)
    }

    pub fn subject(&self) -> Result<String, AuthError> {
        decode_field(self.subject)
    }

    pub fn role(&self) -> Result<Role, AuthError> {
        decode_field(self.role).map(|r| Role::from(r.as_str()))
    }

    pub fn expires_at_ms(&self) -> Result<i64, AuthError> {
        self.expires_at
            .parse()
            .map_err(|_| AuthError::InvalidSignature)
    }

    /// Mint a credential. The counterpart of what the identity service hands
    /// out; used by the CLI and by tests.
    pub fn issue(
        key: &SharedKey,
        subject: &str,
        secret: &str,
        role: &Role,
        expires_at_ms: i64,
    ) -> anyhow::Result<String> {
        let engine = base64::engine::general_purpose::STANDARD;
        let subject = engine.encode(subject);
        let secret_material = key.encrypt_secret(secret)?;
        let role = engine.encode(role.as_str());
        let expires_at = expires_at_ms.to_string();

        let signature = key.sign(&signed_payload(
            &subject,
            &secret_material,
            &role,
            &expires_at,
        ));
        Ok(format!(
            "{}:{}:{}:{}:{}",
            subject, secret_material, role, expires_at, signature
        ))
    }
}

fn signed_payload(subject: &str, secret_material: &str, role: &str, expires_at: &str) -> String {
    format!("{}:{}:{}:{}", subject, secret_material, role, expires_at)
}

fn decode_field(field: &str) -> Result<String, AuthError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(field)
        .map_err(|_| AuthError::InvalidSignature)?;
    String::from_utf8(bytes).map_err(|_| AuthError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requires_five_fields() {
        assert!(matches!(
            Credential::parse("a:b:c:d"),
            Err(AuthError::InvalidSignature)
        ));
        assert!(matches!(
            Credential::parse("a:b:c:d:e:f"),
            Err(AuthError::InvalidSignature)
        ));
        let c = Credential::parse("a:b:c:d:e").unwrap();
        assert_eq!(c.signed_payload(), "a:b:c:d");
        assert_eq!(c.signature, "e");
    }

    #[test]
    fn test_issued_credential_decodes() {
        let key = SharedKey::from_hex(&"11".repeat(32)).unwrap();
        let raw = Credential::issue(&key, "alice", "s3cret", &Role::User, 1_900_000_000_000)
            .unwrap();
        let c = Credential::parse(&raw).unwrap();

        assert!(key.verify(&c.signed_payload(), c.signature));
        assert_eq!(c.subject().unwrap(), "alice");
        assert_eq!(c.role().unwrap(), Role::User);
        assert_eq!(c.expires_at_ms().unwrap(), 1_900_000_000_000);
        assert_eq!(key.decrypt_secret(c.secret_material).unwrap(), "s3cret");
    }
}
