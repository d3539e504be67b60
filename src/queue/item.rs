use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix of every queue node name.
pub const NODE_PREFIX: &str = "qn-";

/// An opaque 64-bit id that becomes available at `release_time`
/// (ms since epoch).
///
/// Stored as a sequential node named `qn-<release_time>-<sequence>` whose
/// payload is the id as 8 big-endian bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DelayItem {
    id: i64,
    release_time: i64,
}

impl DelayItem {
    pub fn new(id: i64, release_time: i64) -> Self {
        Self { id, release_time }
    }

    /// Item released `delay` from now.
    pub fn after(id: i64, delay: Duration) -> Self {
        Self::new(id, now_millis().saturating_add(delay.as_millis() as i64))
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn release_time(&self) -> i64 {
        self.release_time
    }

    /// True once `now` (ms since epoch) has reached the release time.
    pub fn is_due(&self, now: i64) -> bool {
        self.release_time <= now
    }

    /// Name handed to a sequential create; the service appends the sequence.
    pub fn node_prefix(&self) -> String {
        format!("{}{}-", NODE_PREFIX, self.release_time)
    }

    pub fn payload(&self) -> Vec<u8> {
        self.id.to_be_bytes().to_vec()
    }

    /// Rebuilds an item from a node name and its payload.
    pub fn decode(name: &str, payload: &[u8]) -> Result<Self, String> {
        let parsed = NodeName::parse(name)?;
        let id = decode_id(payload)?;
        Ok(Self::new(id, parsed.release_time))
    }
}

/// The two numbers encoded in a queue node name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeName {
    pub release_time: i64,
    pub sequence: u64,
}

impl NodeName {
    pub fn parse(name: &str) -> Result<Self, String> {
        let rest = name
            .strip_prefix(NODE_PREFIX)
            .ok_or_else(|| format!("missing '{}' prefix", NODE_PREFIX))?;

        // The release time may itself be negative, so split on the last dash.
        let (release, sequence) = rest
            .rsplit_once('-')
            .ok_or_else(|| "missing sequence suffix".to_string())?;

        let release_time = release
            .parse::<i64>()
            .map_err(|e| format!("bad release time '{}': {}", release, e))?;
        let sequence = sequence
            .parse::<u64>()
            .map_err(|e| format!("bad sequence '{}': {}", sequence, e))?;

        Ok(Self {
            release_time,
            sequence,
        })
    }
}

/// Decodes an 8-byte big-endian id.
pub fn decode_id(payload: &[u8]) -> Result<i64, String> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| format!("expected 8 payload bytes, got {}", payload.len()))?;
    Ok(i64::from_be_bytes(bytes))
}

/// Wall-clock time in ms since epoch, signed to match release times.
pub fn now_millis() -> i64 {
    crate::coordination::types::now_ms() as i64
}
