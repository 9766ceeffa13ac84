// src/models/credential.rs
//! Verifiable Credential data model implementation.
//!
//! Defines the structure for W3C-style Verifiable Credentials (VCs), the
//! closed set of credential subject kinds this registry issues, and the
//! lifecycle state machine a stored credential moves through.
//!
//! ```text
//! issue ──▶ Active ──renew──▶ Active (expiration extended)
//!              │
//!              └──revoke──▶ Revoked (terminal)
//! ```

use crate::errors::DidError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Base type every credential carries in `type[0]`.
pub const TYPE_VERIFIABLE_CREDENTIAL: &str = "VerifiableCredential";

/// `type[1]` of a WiFi access grant.
pub const TYPE_WIFI_ACCESS: &str = "WifiAccess";

/// `type[1]` of a mining license.
pub const TYPE_MINING_LICENSE: &str = "MiningLicense";

/// W3C credentials context.
pub const CONTEXT_CREDENTIAL: &str = "https://www.w3.org/2018/credentials/v1";

/// Proof type produced by the issuer and holders.
pub const PROOF_TYPE_SECP256K1: &str = "EcdsaSecp256k1Signature2019";

/// Renders a timestamp the way it is signed.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Length-framed encoding of the inputs to a credential or presentation
/// proof. Each field is preceded by its 4-byte big-endian length and each
/// list by its element count, so distinct field sequences never encode to
/// the same bytes.
#[derive(Debug, Default)]
pub struct ProofEncoder {
    bytes: Vec<u8>,
}

impl ProofEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        self.bytes.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.bytes.extend_from_slice(value);
        self
    }

    pub fn list(mut self, values: &[String]) -> Self {
        self.bytes.extend_from_slice(&(values.len() as u32).to_be_bytes());
        values.iter().fold(self, |encoder, value| encoder.field(value))
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Operations every credential subject kind supports.
pub trait SubjectPayload {
    /// Deterministic bytes of the subject's claims, in field order.
    fn to_attribute_bytes(&self) -> Vec<u8>;

    /// Checks the claims are complete enough to issue.
    fn validate(&self) -> Result<(), DidError>;
}

fn require_subject_did(id: &str) -> Result<(), DidError> {
    if !id.starts_with("did:") {
        return Err(DidError::InvalidInput(format!(
            "credential subject id must be a DID, got {:?}",
            id
        )));
    }
    Ok(())
}

/// Grants a subject access to the WiFi network.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WifiAccessInfo {
    pub id: String,
    /// Access tier, e.g. "User" or "Validator".
    #[serde(rename = "type")]
    pub access_type: String,
}

impl SubjectPayload for WifiAccessInfo {
    fn to_attribute_bytes(&self) -> Vec<u8> {
        ProofEncoder::new()
            .field(&self.id)
            .field(&self.access_type)
            .finish()
    }

    fn validate(&self) -> Result<(), DidError> {
        require_subject_did(&self.id)?;
        if self.access_type.is_empty() {
            return Err(DidError::InvalidInput("wifi access type is empty".into()));
        }
        Ok(())
    }
}

/// Licenses a subject to operate a mining device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MiningLicenseInfo {
    pub id: String,
    pub name: String,
    pub model: String,
    pub serial: String,
}

impl SubjectPayload for MiningLicenseInfo {
    fn to_attribute_bytes(&self) -> Vec<u8> {
        ProofEncoder::new()
            .field(&self.id)
            .field(&self.name)
            .field(&self.model)
            .field(&self.serial)
            .finish()
    }

    fn validate(&self) -> Result<(), DidError> {
        require_subject_did(&self.id)?;
        if self.serial.is_empty() {
            return Err(DidError::InvalidInput("mining license serial is empty".into()));
        }
        Ok(())
    }
}

/// Credential subject, typed once the credential's declared type is known.
///
/// Inbound JSON always lands in [`CredentialSubject::Raw`]; call
/// [`VerifiableCredential::normalize_subject`] to dispatch on `type[1]`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CredentialSubject {
    WifiAccess(WifiAccessInfo),
    MiningLicense(MiningLicenseInfo),
    Raw(serde_json::Value),
}

impl<'de> Deserialize<'de> for CredentialSubject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(CredentialSubject::Raw)
    }
}

impl SubjectPayload for CredentialSubject {
    fn to_attribute_bytes(&self) -> Vec<u8> {
        match self {
            CredentialSubject::WifiAccess(info) => info.to_attribute_bytes(),
            CredentialSubject::MiningLicense(info) => info.to_attribute_bytes(),
            CredentialSubject::Raw(value) => serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    fn validate(&self) -> Result<(), DidError> {
        match self {
            CredentialSubject::WifiAccess(info) => info.validate(),
            CredentialSubject::MiningLicense(info) => info.validate(),
            CredentialSubject::Raw(_) => Err(DidError::InvalidInput(
                "credential subject has not been normalized".into(),
            )),
        }
    }
}

impl CredentialSubject {
    /// DID the claims are about.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            CredentialSubject::WifiAccess(info) => Some(&info.id),
            CredentialSubject::MiningLicense(info) => Some(&info.id),
            CredentialSubject::Raw(value) => value.get("id").and_then(|id| id.as_str()),
        }
    }
}

/// Signature proof attached to credentials and presentations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: String,
    /// DID URL of the verification method that signed.
    pub verification_method: String,
    pub proof_purpose: String,
    /// Hex `r || s || v` signature.
    #[serde(default)]
    pub jws: String,
    /// Single-use request nonce; only present on presentations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// A Verifiable Credential according to W3C standards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// Credential key; also the on-chain identifier.
    pub id: String,

    #[serde(rename = "type")]
    pub types: Vec<String>,

    /// DID of the issuer.
    pub issuer: String,

    pub issuance_date: DateTime<Utc>,

    pub expiration_date: DateTime<Utc>,

    #[serde(default)]
    pub description: String,

    pub credential_subject: CredentialSubject,

    #[serde(default)]
    pub proof: Proof,
}

impl VerifiableCredential {
    /// The specific credential kind, `type[1]`.
    pub fn credential_type(&self) -> Option<&str> {
        self.types.get(1).map(String::as_str)
    }

    /// Converts a raw subject into the variant named by `type[1]`.
    /// Already-typed subjects are left as they are.
    pub fn normalize_subject(&mut self) -> Result<(), DidError> {
        let raw = match &self.credential_subject {
            CredentialSubject::Raw(value) => value.clone(),
            _ => return Ok(()),
        };
        let subject = match self.credential_type() {
            Some(TYPE_WIFI_ACCESS) => serde_json::from_value(raw).map(CredentialSubject::WifiAccess),
            Some(TYPE_MINING_LICENSE) => {
                serde_json::from_value(raw).map(CredentialSubject::MiningLicense)
            }
            other => {
                return Err(DidError::InvalidInput(format!(
                    "unsupported credential type {:?}",
                    other
                )))
            }
        }
        .map_err(|e| DidError::InvalidInput(format!("malformed credential subject: {}", e)))?;

        self.credential_subject = subject;
        Ok(())
    }

    /// Bytes covered by the issuer's proof. Excludes `proof.jws` itself.
    pub fn signing_bytes(&self) -> Vec<u8> {
        ProofEncoder::new()
            .list(&self.context)
            .field(&self.id)
            .list(&self.types)
            .field(&self.issuer)
            .field(format_timestamp(&self.issuance_date))
            .field(format_timestamp(&self.expiration_date))
            .field(&self.description)
            .field(self.credential_subject.to_attribute_bytes())
            .field(&self.proof.proof_type)
            .field(&self.proof.created)
            .field(&self.proof.verification_method)
            .field(&self.proof.proof_purpose)
            .finish()
    }

    /// Whether the credential is past its expiration at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }
}

/// Lifecycle state of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialState {
    Active,
    /// Terminal.
    Revoked,
}

/// A requested lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialTransition {
    Renew { expiration_date: DateTime<Utc> },
    Revoke,
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialState::Active => "ACTIVE",
            CredentialState::Revoked => "REVOKED",
        })
    }
}

impl fmt::Display for CredentialTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialTransition::Renew { .. } => "RENEW",
            CredentialTransition::Revoke => "REVOKE",
        })
    }
}

impl CredentialState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CredentialState::Revoked)
    }

    /// State after applying `transition`. Revocation is single-shot and
    /// nothing leaves `Revoked`.
    pub fn apply(self, transition: &CredentialTransition) -> Result<CredentialState, DidError> {
        if self.is_terminal() {
            return Err(DidError::InvalidTransition {
                from: self.to_string(),
                to: transition.to_string(),
            });
        }
        Ok(match transition {
            CredentialTransition::Renew { .. } => CredentialState::Active,
            CredentialTransition::Revoke => CredentialState::Revoked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_credential() -> VerifiableCredential {
        serde_json::from_value(json!({
            "@context": [CONTEXT_CREDENTIAL],
            "id": "vc-001",
            "type": [TYPE_VERIFIABLE_CREDENTIAL, TYPE_WIFI_ACCESS],
            "issuer": "did:metablox:foundation",
            "issuanceDate": "2024-01-01T00:00:00Z",
            "expirationDate": "2025-01-01T00:00:00Z",
            "description": "wifi",
            "credentialSubject": { "id": "did:metablox:abc", "type": "User" },
            "proof": {
                "type": PROOF_TYPE_SECP256K1,
                "created": "2024-01-01T00:00:00Z",
                "verificationMethod": "did:metablox:foundation#verification",
                "proofPurpose": "assertionMethod",
                "jws": ""
            }
        }))
        .unwrap()
    }

    #[test]
    fn inbound_subject_is_raw_until_normalized() {
        let mut vc = sample_credential();
        assert!(matches!(vc.credential_subject, CredentialSubject::Raw(_)));
        assert!(vc.credential_subject.validate().is_err());
        assert_eq!(vc.credential_subject.subject_id(), Some("did:metablox:abc"));

        vc.normalize_subject().unwrap();
        assert_eq!(
            vc.credential_subject,
            CredentialSubject::WifiAccess(WifiAccessInfo {
                id: "did:metablox:abc".into(),
                access_type: "User".into(),
            })
        );
        assert!(vc.credential_subject.validate().is_ok());
    }

    #[test]
    fn normalize_dispatches_on_declared_type() {
        let mut vc = sample_credential();
        vc.types[1] = TYPE_MINING_LICENSE.into();
        vc.credential_subject = CredentialSubject::Raw(json!({
            "id": "did:metablox:abc", "name": "m1", "model": "x", "serial": "s-9"
        }));
        vc.normalize_subject().unwrap();
        assert!(matches!(
            vc.credential_subject,
            CredentialSubject::MiningLicense(ref info) if info.serial == "s-9"
        ));
    }

    #[test]
    fn unknown_or_mismatched_types_are_rejected() {
        let mut vc = sample_credential();
        vc.types[1] = "Diploma".into();
        assert!(matches!(vc.normalize_subject(), Err(DidError::InvalidInput(_))));

        let mut vc = sample_credential();
        vc.types[1] = TYPE_MINING_LICENSE.into();
        assert!(matches!(vc.normalize_subject(), Err(DidError::InvalidInput(_))));
    }

    #[test]
    fn typed_subject_serializes_without_a_tag() {
        let mut vc = sample_credential();
        vc.normalize_subject().unwrap();
        let json = serde_json::to_value(&vc).unwrap();
        assert_eq!(
            json["credentialSubject"],
            json!({ "id": "did:metablox:abc", "type": "User" })
        );
    }

    #[test]
    fn signing_bytes_ignore_signature_but_cover_expiration() {
        let mut vc = sample_credential();
        vc.normalize_subject().unwrap();
        let before = vc.signing_bytes();

        vc.proof.jws = "ff".into();
        assert_eq!(vc.signing_bytes(), before);

        vc.expiration_date = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_ne!(vc.signing_bytes(), before);
    }

    #[test]
    fn signing_bytes_keep_field_boundaries() {
        let mut vc = sample_credential();
        vc.normalize_subject().unwrap();
        vc.types = vec!["A".into(), "B".into()];
        let split = vc.signing_bytes();
        vc.types = vec!["AB".into()];
        assert_ne!(vc.signing_bytes(), split);

        // shifting text between adjacent fields changes the bytes
        let mut vc = sample_credential();
        vc.normalize_subject().unwrap();
        vc.id = "vc-001did:metablox:".into();
        vc.issuer = "foundation".into();
        let shifted = vc.signing_bytes();
        vc.id = "vc-001".into();
        vc.issuer = "did:metablox:foundation".into();
        assert_ne!(vc.signing_bytes(), shifted);
    }

    #[test]
    fn proof_encoder_frames_fields_and_lists() {
        let bytes = ProofEncoder::new()
            .field("ab")
            .list(&["c".to_string()])
            .finish();
        assert_eq!(bytes, vec![0, 0, 0, 2, b'a', b'b', 0, 0, 0, 1, 0, 0, 0, 1, b'c']);
    }

    #[test]
    fn subject_validation_requires_did_subject() {
        let info = WifiAccessInfo {
            id: "abc".into(),
            access_type: "User".into(),
        };
        assert!(info.validate().is_err());
    }

    #[test]
    fn revoke_is_single_transition() {
        let revoked = CredentialState::Active
            .apply(&CredentialTransition::Revoke)
            .unwrap();
        assert_eq!(revoked, CredentialState::Revoked);
        assert!(revoked.is_terminal());

        let err = revoked.apply(&CredentialTransition::Revoke).unwrap_err();
        assert!(matches!(err, DidError::InvalidTransition { .. }));
    }

    #[test]
    fn renew_keeps_active_and_is_refused_after_revoke() {
        let renew = CredentialTransition::Renew {
            expiration_date: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        };
        assert_eq!(
            CredentialState::Active.apply(&renew).unwrap(),
            CredentialState::Active
        );
        assert!(CredentialState::Revoked.apply(&renew).is_err());
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let vc = sample_credential();
        assert!(vc.is_expired(vc.expiration_date));
        assert!(!vc.is_expired(vc.issuance_date));
    }
}
