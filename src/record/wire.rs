//! JSON-lines form of crawl results
//!
//! Each line carries an `id` and exactly one of `record` or `failure`:
//!
//! ```text
//! {"id": "dQw4w9WgXcQ", "record": {"type": "video", "id": "dQw4w9WgXcQ", "title": "..."}}
//! {"id": "x0dead0x000", "failure": {"kind": "permanent", "cause": "video unavailable"}}
//! ```

use crate::record::{CrawlResult, Failure, Identifier, Record};
use crate::RecordError;
use serde::{Deserialize, Serialize};

/// Serialized shape of a crawl result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl TryFrom<WireResult> for CrawlResult {
    type Error = RecordError;

    fn try_from(wire: WireResult) -> Result<Self, Self::Error> {
        let identifier = Identifier::new(wire.id)?;
        match (wire.record, wire.failure) {
            (Some(record), None) => Ok(CrawlResult::success(identifier, record)),
            (None, Some(failure)) => Ok(CrawlResult::failure(identifier, failure)),
            (Some(_), Some(_)) => Err(RecordError::Ambiguous(identifier.to_string())),
            (None, None) => Err(RecordError::Missing(identifier.to_string())),
        }
    }
}

impl From<CrawlResult> for WireResult {
    fn from(result: CrawlResult) -> Self {
        let (record, failure) = match result.outcome {
            Ok(record) => (Some(record), None),
            Err(failure) => (None, Some(failure)),
        };
        Self {
            id: result.identifier.into(),
            record,
            failure,
        }
    }
}

/// Parses one JSON line into a crawl result
pub fn parse_line(line: &str) -> Result<CrawlResult, RecordError> {
    let wire: WireResult = serde_json::from_str(line)?;
    CrawlResult::try_from(wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FailureKind;

    #[test]
    fn test_parse_success_line() {
        let result =
            parse_line(r#"{"id":"abc","record":{"type":"video","id":"abc","views":12}}"#).unwrap();
        assert_eq!(result.identifier.as_str(), "abc");
        match result.outcome {
            Ok(Record::Video(video)) => assert_eq!(video.views, Some(12)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_parse_failure_line() {
        let line = r#"{"id":"gone","failure":{"kind":"permanent","cause":"video unavailable"}}"#;
        let result = parse_line(line).unwrap();
        let failure = result.outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert_eq!(failure.cause, "video unavailable");
    }

    #[test]
    fn test_parse_rejects_both_or_neither() {
        let both = parse_line(concat!(
            r#"{"id":"a","record":{"type":"channel","id":"a"},"#,
            r#""failure":{"kind":"transient","cause":"x"}}"#,
        ));
        assert!(matches!(both, Err(RecordError::Ambiguous(_))));

        let neither = parse_line(r#"{"id":"a"}"#);
        assert!(matches!(neither, Err(RecordError::Missing(_))));
    }

    #[test]
    fn test_parse_rejects_empty_id_and_garbage() {
        assert!(matches!(
            parse_line(r#"{"id":"","failure":{"kind":"transient","cause":"x"}}"#),
            Err(RecordError::EmptyIdentifier)
        ));
        assert!(matches!(parse_line("not json"), Err(RecordError::Json(_))));
    }
}
