//! Payload fingerprints for idempotent replay.
//!
//! A fingerprint is the SHA-256 of the stage name and the JSON form of the
//! stage payload. The `ok` entry of every stage call stores it; a later call
//! with the same fingerprint gets the stored result back.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::StageName;
use crate::error::Result;

/// Hex-encoded SHA-256 of `stage:payload`
pub fn fingerprint<T: Serialize + ?Sized>(stage: StageName, payload: &T) -> Result<String> {
    let json = serde_json::to_string(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(stage.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceDescriptor;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_stable() {
        let desc = SourceDescriptor::PlainText {
            text: "Launch announcement".to_string(),
        };
        let a = fingerprint(StageName::ReadingSource, &desc).unwrap();
        let b = fingerprint(StageName::ReadingSource, &desc.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_stage_and_payload() {
        let payload = json!({ "run_id": "run-1" });
        let draft = fingerprint(StageName::Drafting, &payload).unwrap();
        let publish = fingerprint(StageName::Publishing, &payload).unwrap();
        assert_ne!(draft, publish);

        let other = fingerprint(StageName::Drafting, &json!({ "run_id": "run-2" })).unwrap();
        assert_ne!(draft, other);
    }
}
