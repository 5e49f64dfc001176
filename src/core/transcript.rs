use crate::core::exchange::{Received, Transport};
use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One transmitted APDU and what came back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub timestamp: DateTime<Utc>,
    pub command: Vec<u8>,
    pub response: Vec<u8>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Statistics about recorded rounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptStatistics {
    pub total_rounds: usize,
    pub successful_rounds: usize,
    pub failed_rounds: usize,
    pub average_duration_ms: u64,
}

/// Ordered log of transport round trips
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    rounds: Vec<RoundRecord>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    pub fn push(&mut self, record: RoundRecord) {
        self.rounds.push(record);
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
    }

    /// Export transcript to JSON
    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize transcript")
    }

    /// Import rounds from JSON, appending them
    pub fn import_json(&mut self, json: &str) -> Result<()> {
        let imported: Transcript =
            serde_json::from_str(json).context("Failed to deserialize transcript")?;
        self.rounds.extend(imported.rounds);
        Ok(())
    }

    pub fn statistics(&self) -> TranscriptStatistics {
        let total_rounds = self.rounds.len();
        let successful_rounds = self.rounds.iter().filter(|r| r.success).count();

        let average_duration_ms = if total_rounds > 0 {
            self.rounds.iter().map(|r| r.duration_ms).sum::<u64>() / total_rounds as u64
        } else {
            0
        };

        TranscriptStatistics {
            total_rounds,
            successful_rounds,
            failed_rounds: total_rounds - successful_rounds,
            average_duration_ms,
        }
    }
}

/// Transport decorator that records every round into a [`Transcript`]
pub struct RecordingTransport<T> {
    inner: T,
    transcript: Transcript,
}

impl<T: Transport> RecordingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            transcript: Transcript::new(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_parts(self) -> (T, Transcript) {
        (self.inner, self.transcript)
    }
}

impl<T: Transport> Transport for RecordingTransport<T> {
    type Error = T::Error;

    fn transmit(
        &mut self,
        command: &[u8],
        receive_size: usize,
    ) -> std::result::Result<Received, Self::Error> {
        let timestamp = Utc::now();
        let start_time = Instant::now();
        let result = self.inner.transmit(command, receive_size);
        let duration_ms = start_time.elapsed().as_millis() as u64;

        let (response, error) = match &result {
            Ok(received) => (received.bytes.clone(), None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };

        self.transcript.push(RoundRecord {
            timestamp,
            command: command.to_vec(),
            response,
            success: error.is_none(),
            error,
            duration_ms,
        });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::exchange::{MockTransport, ProtocolControl};

    fn record(success: bool, duration_ms: u64) -> RoundRecord {
        RoundRecord {
            timestamp: Utc::now(),
            command: vec![0x00, 0xA4, 0x04, 0x00],
            response: if success { vec![0x90, 0x00] } else { vec![] },
            success,
            error: (!success).then(|| "Test error".to_string()),
            duration_ms,
        }
    }

    #[test]
    fn test_recording_transport_logs_rounds() {
        let mut mock = MockTransport::new();
        let mut calls = 0;
        mock.expect_transmit().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Ok(Received {
                    bytes: vec![0x90, 0x00],
                    control: ProtocolControl::default(),
                })
            } else {
                Err(std::io::Error::other("gone"))
            }
        });

        let mut transport = RecordingTransport::new(mock);
        assert!(transport.transmit(&[0x00, 0xA4, 0x04, 0x00], 2).is_ok());
        assert!(transport.transmit(&[0x00, 0xB0, 0x00, 0x00, 0x00], 258).is_err());

        let rounds = transport.transcript().rounds();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[0].command, vec![0x00, 0xA4, 0x04, 0x00]);
        assert_eq!(rounds[0].response, vec![0x90, 0x00]);
        assert!(rounds[0].success);
        assert!(!rounds[1].success);
        assert_eq!(rounds[1].error.as_deref(), Some("gone"));
    }

    #[test]
    fn test_export_import() {
        let mut transcript = Transcript::new();
        transcript.push(record(true, 25));
        transcript.push(record(false, 15));

        let json = transcript.export_json().unwrap();
        assert!(json.contains("duration_ms"));

        let mut imported = Transcript::new();
        imported.import_json(&json).unwrap();
        assert_eq!(imported.rounds().len(), 2);
        assert_eq!(imported.rounds()[0].command, transcript.rounds()[0].command);
    }

    #[test]
    fn test_export_import_empty() {
        let transcript = Transcript::new();
        let json = transcript.export_json().unwrap();
        assert_eq!(json.trim(), "[]");
    }

    #[test]
    fn test_import_invalid_json() {
        let mut transcript = Transcript::new();
        assert!(transcript.import_json("invalid json").is_err());
        assert!(transcript.import_json("{}").is_err());
        assert!(transcript.import_json("[{\"invalid\": \"structure\"}]").is_err());
    }

    #[test]
    fn test_statistics() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.statistics().average_duration_ms, 0);

        transcript.push(record(true, 20));
        transcript.push(record(false, 30));
        transcript.push(record(true, 10));

        let stats = transcript.statistics();
        assert_eq!(stats.total_rounds, 3);
        assert_eq!(stats.successful_rounds, 2);
        assert_eq!(stats.failed_rounds, 1);
        assert_eq!(stats.average_duration_ms, 20);

        transcript.clear();
        assert_eq!(transcript.statistics().total_rounds, 0);
    }
}
