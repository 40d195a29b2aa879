use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Deserialize;

/// One `metric` event reported by the discovery endpoint.
///
/// Only the replica id is of interest; every other field is ignored.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricRecord {
    #[serde(default)]
    pub replica: Option<String>,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SelectError {
    #[error("no metric records to select from")]
    NoRecords,

    #[error("replica not found in metrics")]
    NoReplica,
}

/// Parses every payload as a [`MetricRecord`], dropping the ones that fail.
pub fn parse_records<'a, I>(payloads: I) -> Vec<MetricRecord>
where
    I: IntoIterator<Item = &'a str>,
{
    payloads
        .into_iter()
        .filter_map(|payload| match serde_json::from_str(payload) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::debug!(error = %err, payload, "dropping malformed metric record");
                None
            }
        })
        .collect()
}

/// Picks one record uniformly at random and returns its replica id.
pub fn select_replica<R>(records: &[MetricRecord], rng: &mut R) -> Result<String, SelectError>
where
    R: Rng + ?Sized,
{
    let record = records.choose(rng).ok_or(SelectError::NoRecords)?;

    match record.replica.as_deref() {
        Some(replica) if !replica.is_empty() => Ok(replica.to_string()),
        _ => Err(SelectError::NoReplica),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn test_parse_drops_malformed() {
        let records = parse_records([
            r#"{"replica":"r1","cpu":0.5}"#,
            r#"{"replica":"#,
            r#"{"replica":"r2"}"#,
            "42",
            r#"{"cpu":1}"#,
        ]);

        assert_eq!(
            records,
            vec![
                MetricRecord {
                    replica: Some("r1".into())
                },
                MetricRecord {
                    replica: Some("r2".into())
                },
                MetricRecord { replica: None },
            ]
        );
    }

    #[test]
    fn test_select_skips_malformed_payloads() {
        let records = parse_records([
            r#"{"replica":"r1"}"#,
            "not json",
            r#"{"replica":"r2"}"#,
        ]);
        assert_eq!(records.len(), 2);

        let mut seen = HashSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            seen.insert(select_replica(&records, &mut rng).unwrap());
        }
        assert_eq!(seen, HashSet::from(["r1".to_string(), "r2".to_string()]));
    }

    #[test]
    fn test_select_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            select_replica(&[], &mut rng),
            Err(SelectError::NoRecords)
        );
    }

    #[test]
    fn test_select_missing_or_empty_replica() {
        let mut rng = StdRng::seed_from_u64(1);

        let records = parse_records([r#"{"cpu":1}"#]);
        assert_eq!(
            select_replica(&records, &mut rng),
            Err(SelectError::NoReplica)
        );

        let records = parse_records([r#"{"replica":""}"#]);
        assert_eq!(
            select_replica(&records, &mut rng),
            Err(SelectError::NoReplica)
        );
    }
}
