//! Dot-joined identifier payloads.

use std::fmt::Display;
use std::str::FromStr;

use parley_core::DomainError;

use super::JobError;

pub fn join(parts: &[&dyn Display]) -> String {
    parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Split into exactly `N` parts.
pub fn split<const N: usize>(payload: &str) -> Result<[&str; N], JobError> {
    let parts: Vec<&str> = payload.split('.').collect();
    parts.try_into().map_err(|parts: Vec<&str>| {
        JobError::Payload(format!("expected {N} parts, got {}", parts.len()))
    })
}

pub fn parse<T>(part: &str) -> Result<T, JobError>
where
    T: FromStr<Err = DomainError>,
{
    part.parse().map_err(|e: DomainError| JobError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{MessageId, UserId};

    #[test]
    fn joins_and_splits_identifiers() {
        let (m, u) = (MessageId::new(), UserId::new());
        let payload = join(&[&m, &u]);

        let [a, b] = split::<2>(&payload).unwrap();
        assert_eq!(parse::<MessageId>(a).unwrap(), m);
        assert_eq!(parse::<UserId>(b).unwrap(), u);
    }

    #[test]
    fn wrong_arity_is_a_payload_error() {
        assert!(matches!(split::<2>("only-one"), Err(JobError::Payload(_))));
        assert!(matches!(split::<1>("a.b"), Err(JobError::Payload(_))));
    }

    #[test]
    fn garbage_ids_are_payload_errors() {
        assert!(matches!(parse::<MessageId>("nope"), Err(JobError::Payload(_))));
    }
}
