//! Loki push records.
//!
//! A record is one log line in the shape Loki's `/loki/api/v1/push` expects:
//!
//! ```json
//! {"streams":[{"stream":{"severity":"info",...,"job":"log-generator"},
//!              "values":[["<unix nanos>","<message>"]]}]}
//! ```
//!
//! Records are built fresh every iteration and carry exactly one stream with
//! exactly one entry; batching is not done here.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::category::Sample;

/// Errors produced while assembling a record.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Serialization of the record failed.
    #[error("Failed to serialize push request: {0}")]
    Json(#[from] serde_json::Error),
    /// The system clock reads earlier than the unix epoch.
    #[error("System clock is before the unix epoch: {0}")]
    Clock(#[from] std::time::SystemTimeError),
}

/// The body of a Loki push request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushRequest {
    /// Streams in this request. Always exactly one for generated records.
    pub streams: Vec<Stream>,
}

/// One labelled stream and its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stream {
    /// The label set identifying this stream.
    pub stream: StreamLabels,
    /// `[timestamp, message]` pairs.
    pub values: Vec<Entry>,
}

/// Labels attached to every generated stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamLabels {
    /// Log severity
    pub severity: String,
    /// Originating platform
    pub source: String,
    /// Originating service
    pub service_name: String,
    /// Originating host
    pub host_name: String,
    /// Fixed job label
    pub job: String,
}

/// A `[timestamp, message]` pair. The timestamp is unix nanoseconds rendered
/// as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry(pub String, pub String);

impl PushRequest {
    /// Assemble a request carrying a single entry.
    #[must_use]
    pub fn single(sample: &Sample, job: &str, timestamp_nanos: u128) -> Self {
        let stream = Stream {
            stream: StreamLabels {
                severity: sample.severity.to_string(),
                source: sample.source.to_string(),
                service_name: sample.service_name.to_string(),
                host_name: sample.host_name.to_string(),
                job: job.to_string(),
            },
            values: vec![Entry(
                timestamp_nanos.to_string(),
                sample.message.to_string(),
            )],
        };
        Self {
            streams: vec![stream],
        }
    }

    /// Serialize this request to a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Current wall-clock time in nanoseconds since the unix epoch.
///
/// # Errors
///
/// Returns [`Error::Clock`] if the system clock is set before the epoch.
pub fn now_nanos() -> Result<u128, Error> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos())
}

#[cfg(test)]
mod test {
    use serde_json::{Value, json};

    use super::*;
    use crate::category::{Sample, Tables};

    fn fixed_sample() -> Sample {
        Sample {
            severity: "warning",
            source: "ubuntu",
            service_name: "backend",
            host_name: "zeus",
            message: "User logged in",
        }
    }

    #[test]
    fn assembled_payload_matches_loki_shape() {
        let request = PushRequest::single(&fixed_sample(), "log-generator", 1_700_000_000_000_000_000);
        let bytes = request.to_bytes().expect("serialization failed");
        let actual: Value = serde_json::from_slice(&bytes).expect("not json");

        let expected = json!({
            "streams": [{
                "stream": {
                    "severity": "warning",
                    "source": "ubuntu",
                    "service_name": "backend",
                    "host_name": "zeus",
                    "job": "log-generator"
                },
                "values": [["1700000000000000000", "User logged in"]]
            }]
        });
        assert_eq!(actual, expected);
    }

    #[test]
    fn message_is_not_interpolated() {
        let sample = Sample {
            message: "User {id} logged in %s",
            ..fixed_sample()
        };
        let request = PushRequest::single(&sample, "log-generator", 1);
        assert_eq!(request.streams[0].values[0].1, "User {id} logged in %s");
    }

    #[test]
    fn drawn_record_has_one_stream_one_entry() {
        use rand::{SeedableRng, rngs::SmallRng};

        let mut rng = SmallRng::seed_from_u64(1);
        let sample = Tables::default().draw(&mut rng);
        let ts = now_nanos().expect("clock before epoch");
        let request = PushRequest::single(&sample, "job", ts);

        let decoded: PushRequest =
            serde_json::from_slice(&request.to_bytes().expect("serialization failed"))
                .expect("round trip failed");
        assert_eq!(decoded.streams.len(), 1);
        assert_eq!(decoded.streams[0].values.len(), 1);
        assert_eq!(decoded.streams[0].values[0].0, ts.to_string());
        assert_eq!(decoded.streams[0].stream.job, "job");
    }
}
