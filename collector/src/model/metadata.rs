//! Decoder for the packed-map metadata blob written next to each group.
//!
//! Two top-level shapes are accepted: a map carrying `version`, `couple`,
//! `namespace`, `frozen` and `service`, or a legacy bare array of group ids
//! (interpreted as version 1 in the "default" namespace). Unknown keys are
//! skipped; a wrong-typed value fails the decode with a keyed diagnostic.

use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceMetadata {
    pub migrating: bool,
    pub job_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupMetadata {
    pub version: u64,
    pub frozen: bool,
    pub couple: Vec<u64>,
    pub namespace: String,
    pub service: ServiceMetadata,
}

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("could not unpack group metadata: {0}")]
    Unpack(String),
    #[error("invalid '{0}' value type")]
    InvalidValueType(&'static str),
    #[error("couldn't parse 'couple'")]
    InvalidCouple,
    #[error("metadata is neither a map nor an array")]
    UnexpectedShape,
}

pub fn decode_group_metadata(blob: &[u8]) -> Result<GroupMetadata, MetadataError> {
    let value: Value =
        rmp_serde::from_slice(blob).map_err(|e| MetadataError::Unpack(e.to_string()))?;

    let mut metadata = GroupMetadata::default();

    match value {
        Value::Object(map) => {
            for (key, val) in &map {
                match key.as_str() {
                    "version" => {
                        metadata.version = val
                            .as_u64()
                            .ok_or(MetadataError::InvalidValueType("version"))?;
                    }
                    "couple" => metadata.couple = parse_couple(val)?,
                    "namespace" => {
                        metadata.namespace = val
                            .as_str()
                            .ok_or(MetadataError::InvalidValueType("namespace"))?
                            .to_string();
                    }
                    "frozen" => {
                        metadata.frozen = val
                            .as_bool()
                            .ok_or(MetadataError::InvalidValueType("frozen"))?;
                    }
                    "service" => parse_service(val, &mut metadata.service)?,
                    _ => {}
                }
            }
        }
        Value::Array(_) => {
            metadata.version = 1;
            metadata.namespace = "default".to_string();
            metadata.couple = parse_couple(&value)?;
        }
        _ => return Err(MetadataError::UnexpectedShape),
    }

    Ok(metadata)
}

fn parse_couple(value: &Value) -> Result<Vec<u64>, MetadataError> {
    let entries = value.as_array().ok_or(MetadataError::InvalidCouple)?;

    let mut couple = Vec::with_capacity(entries.len());
    for entry in entries {
        couple.push(entry.as_u64().ok_or(MetadataError::InvalidCouple)?);
    }
    couple.sort_unstable();

    Ok(couple)
}

fn parse_service(value: &Value, service: &mut ServiceMetadata) -> Result<(), MetadataError> {
    let map = value
        .as_object()
        .ok_or(MetadataError::InvalidValueType("service"))?;

    for (key, val) in map {
        match key.as_str() {
            // A non-string status is tolerated; only the literal marker counts.
            "status" => service.migrating = val.as_str() == Some("MIGRATING"),
            "job_id" => {
                service.job_id = val
                    .as_str()
                    .ok_or(MetadataError::InvalidValueType("job_id"))?
                    .to_string();
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pack(value: &Value) -> Vec<u8> {
        rmp_serde::to_vec(value).unwrap()
    }

    #[test]
    fn decode_map_shape() {
        let blob = pack(&json!({
            "version": 2,
            "couple": [83, 17, 251],
            "namespace": "storage",
            "frozen": true,
            "service": {"status": "MIGRATING", "job_id": "job-17"},
            "unknown_key": "ignored",
        }));

        let metadata = decode_group_metadata(&blob).unwrap();
        assert_eq!(metadata.version, 2);
        assert_eq!(metadata.couple, vec![17, 83, 251]);
        assert_eq!(metadata.namespace, "storage");
        assert!(metadata.frozen);
        assert!(metadata.service.migrating);
        assert_eq!(metadata.service.job_id, "job-17");
    }

    #[test]
    fn decode_legacy_array_shape() {
        let blob = pack(&json!([251, 17, 83]));

        let metadata = decode_group_metadata(&blob).unwrap();
        assert_eq!(metadata.version, 1);
        assert_eq!(metadata.namespace, "default");
        assert_eq!(metadata.couple, vec![17, 83, 251]);
        assert!(!metadata.frozen);
        assert!(!metadata.service.migrating);
    }

    #[test]
    fn non_migrating_status_is_not_an_error() {
        let blob = pack(&json!({
            "version": 1,
            "couple": [1, 2],
            "namespace": "default",
            "service": {"status": 7},
        }));

        let metadata = decode_group_metadata(&blob).unwrap();
        assert!(!metadata.service.migrating);
    }

    #[test]
    fn wrong_typed_values_are_keyed_diagnostics() {
        let blob = pack(&json!({"version": "two"}));
        let err = decode_group_metadata(&blob).unwrap_err();
        assert_eq!(err.to_string(), "invalid 'version' value type");

        let blob = pack(&json!({"couple": [1, "x"]}));
        assert!(matches!(
            decode_group_metadata(&blob).unwrap_err(),
            MetadataError::InvalidCouple
        ));

        let blob = pack(&json!({"frozen": "yes"}));
        assert!(matches!(
            decode_group_metadata(&blob).unwrap_err(),
            MetadataError::InvalidValueType("frozen")
        ));

        let blob = pack(&json!({"service": {"job_id": 5}}));
        assert!(matches!(
            decode_group_metadata(&blob).unwrap_err(),
            MetadataError::InvalidValueType("job_id")
        ));
    }

    #[test]
    fn garbage_blob_fails_to_unpack() {
        assert!(matches!(
            decode_group_metadata(&[0xc1]),
            Err(MetadataError::Unpack(_))
        ));
    }

    #[test]
    fn scalar_shape_is_rejected() {
        let blob = pack(&json!(42));
        assert!(matches!(
            decode_group_metadata(&blob),
            Err(MetadataError::UnexpectedShape)
        ));
    }
}
