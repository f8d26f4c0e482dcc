//! Keyed integrity hash for sealed submissions.
//!
//! HMAC-SHA256 over a canonical JSON encoding of the answers, final score,
//! total marks and completion instant. The server holds the key, so it can
//! check a submission in constant time without replaying the scoring pass.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::error::IntegrityError;
use crate::model::{Answer, SealedSubmission};

type HmacSha256 = Hmac<Sha256>;

/// Completion instant as it is sealed: whole milliseconds.
pub fn seal_instant(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// Secret used to sign and verify submissions.
///
/// Note: Custom Debug impl never prints the key material.
#[derive(Clone)]
pub struct IntegrityKey {
    secret: Vec<u8>,
}

impl IntegrityKey {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"))
    }

    /// Compute the integrity hash for the sealed fields.
    pub fn sign(
        &self,
        answers: &BTreeMap<String, Answer>,
        final_score: f64,
        total_marks: f64,
        completed_at: DateTime<Utc>,
    ) -> String {
        let mut mac = self.mac();
        mac.update(&canonical_bytes(answers, final_score, total_marks, completed_at));
        hex::encode(mac.finalize().into_bytes())
    }

    /// Recompute the hash for a submission's stored fields.
    pub fn sign_submission(&self, submission: &SealedSubmission) -> String {
        self.sign(
            &submission.answers,
            submission.final_score,
            submission.total_marks,
            submission.completed_at,
        )
    }

    /// Check a submission's hash with a constant-time comparison.
    pub fn verify(&self, submission: &SealedSubmission) -> Result<(), IntegrityError> {
        let expected =
            hex::decode(&submission.integrity_hash).map_err(|_| IntegrityError::Malformed)?;
        let mut mac = self.mac();
        mac.update(&canonical_bytes(
            &submission.answers,
            submission.final_score,
            submission.total_marks,
            submission.completed_at,
        ));
        mac.verify_slice(&expected)
            .map_err(|_| IntegrityError::Mismatch)
    }
}

impl std::fmt::Debug for IntegrityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityKey")
            .field("secret", &"***")
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SealedFields<'a> {
    answers: &'a BTreeMap<String, Answer>,
    final_score: f64,
    total_marks: f64,
    completed_at: String,
}

fn canonical_bytes(
    answers: &BTreeMap<String, Answer>,
    final_score: f64,
    total_marks: f64,
    completed_at: DateTime<Utc>,
) -> Vec<u8> {
    let fields = SealedFields {
        answers,
        final_score,
        total_marks,
        completed_at: completed_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
    };
    // Plain structs, string-keyed maps and finite floats always serialize.
    serde_json::to_vec(&fields).unwrap_or_default()
}
