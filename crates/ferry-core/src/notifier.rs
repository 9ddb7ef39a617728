//! §4.5 — pub/sub contract and wire payload encoding.
//!
//! `ferry-postgres` provides the concrete `LISTEN`/`NOTIFY`-backed
//! implementation; this module owns the channel-naming scheme, the payload
//! compression threshold, and the reachability contract every implementation
//! must satisfy.

use crate::Result;
use async_trait::async_trait;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::read::GzDecoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};

/// The three logical channels every instance multiplexes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Insert,
    Signal,
    Leader,
}

impl Channel {
    /// The concrete wire channel name, namespaced by instance so multiple
    /// instances can share one database without cross-talk.
    pub fn wire_name(self, instance: &str) -> String {
        let suffix = match self {
            Channel::Insert => "insert",
            Channel::Signal => "signal",
            Channel::Leader => "leader",
        };
        format!("{instance}.{suffix}")
    }
}

/// Above this many raw JSON bytes, payloads are gzip-compressed and
/// base64-encoded. Motivated by Postgres' 8 KiB `NOTIFY` payload limit (§4.5).
pub const COMPRESSION_THRESHOLD_BYTES: usize = 1024;

const COMPRESSED_PREFIX: &str = "b64gz:";

/// Encodes a payload for the wire, picking whichever of plain-JSON or
/// compressed-base64 is smaller, as specified in §6.3.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<String> {
    let json = serde_json::to_string(payload)
        .map_err(|e| crate::Error::Validation(format!("payload encode failed: {e}")))?;
    if json.len() <= COMPRESSION_THRESHOLD_BYTES {
        return Ok(json);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(json.as_bytes())
        .map_err(|e| crate::Error::Validation(format!("gzip encode failed: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| crate::Error::Validation(format!("gzip finish failed: {e}")))?;
    let encoded = format!(
        "{COMPRESSED_PREFIX}{}",
        base64::engine::general_purpose::STANDARD.encode(compressed)
    );

    // Compression can lose to plain JSON on small/incompressible payloads;
    // senders pick the smaller representation.
    if encoded.len() < json.len() {
        Ok(encoded)
    } else {
        Ok(json)
    }
}

/// Decodes a payload produced by `encode_payload`, transparently
/// decompressing when the marker prefix is present.
pub fn decode_payload<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let json = if let Some(body) = raw.strip_prefix(COMPRESSED_PREFIX) {
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| crate::Error::Validation(format!("base64 decode failed: {e}")))?;
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = String::new();
        decoder
            .read_to_string(&mut out)
            .map_err(|e| crate::Error::Validation(format!("gzip decode failed: {e}")))?;
        out
    } else {
        raw.to_string()
    };
    serde_json::from_str(&json).map_err(|e| crate::Error::Validation(format!("payload decode failed: {e}")))
}

/// A received notification, already decompressed to a raw JSON string.
#[derive(Debug, Clone)]
pub struct Notification {
    pub channel: Channel,
    pub raw: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Broadcasts an already-encoded payload (see `encode_payload`) to every
    /// listener sharing this instance name, including listeners on other
    /// nodes. Kept non-generic so the trait stays object-safe; callers use
    /// the `notify` extension method below to serialize first.
    async fn notify_encoded(&self, channel: Channel, encoded: &str) -> Result<()>;

    /// Registers interest in a channel; delivered notifications arrive
    /// through whatever mailbox the implementation wires up (a `tokio`
    /// broadcast receiver in `ferry-postgres`).
    async fn listen(&self, channels: &[Channel]) -> Result<()>;

    /// Whether the notifier believes it can currently deliver messages.
    /// Backed by the self-ping "sonar" described in §4.5.
    fn is_reachable(&self) -> bool;
}

/// Convenience wrapper so callers don't have to call `encode_payload`
/// themselves; dispatches through `notify_encoded` so `Notifier` stays
/// object-safe and usable as `Arc<dyn Notifier>`.
pub async fn notify<N, T>(notifier: &N, channel: Channel, payload: &T) -> Result<()>
where
    N: Notifier + ?Sized,
    T: Serialize + Send + Sync,
{
    let encoded = encode_payload(payload)?;
    notifier.notify_encoded(channel, &encoded).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_payload_uncompressed() {
        let payload = serde_json::json!({"queue": "default"});
        let encoded = encode_payload(&payload).unwrap();
        assert!(!encoded.starts_with(COMPRESSED_PREFIX));
        let decoded: serde_json::Value = decode_payload(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trips_large_payload_compressed() {
        let big_string = "x".repeat(4096);
        let payload = serde_json::json!({"blob": big_string});
        let encoded = encode_payload(&payload).unwrap();
        assert!(encoded.starts_with(COMPRESSED_PREFIX));
        assert!(encoded.len() < serde_json::to_string(&payload).unwrap().len());
        let decoded: serde_json::Value = decode_payload(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn channel_names_are_namespaced_by_instance() {
        assert_eq!(Channel::Insert.wire_name("orders"), "orders.insert");
        assert_eq!(Channel::Leader.wire_name("orders"), "orders.leader");
    }
}
