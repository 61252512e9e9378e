//! Sync request and response envelopes.
//!
//! Both directions share one shape:
//!
//! ```text
//! { "type": "items", "last_updated": 1700000000, "values": [ ... ] }
//! ```
//!
//! In a request `last_updated` is the client's watermark; in a response it is
//! the new watermark the client should adopt.

use crate::error::{ProtocolError, ProtocolResult};
use crate::kind::{KindRegistry, ITEMS_KIND};
use ledger_core::{Item, Watermark};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON envelope before values are decoded by kind.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    record_type: String,
    last_updated: Watermark,
    #[serde(default)]
    values: Vec<Value>,
}

fn decode_envelope(
    bytes: &[u8],
    registry: &KindRegistry,
) -> ProtocolResult<(String, Watermark, Vec<Item>)> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    let codec = registry.codec(&envelope.record_type)?;
    let values = envelope
        .values
        .into_iter()
        .map(codec.decode)
        .collect::<ProtocolResult<Vec<_>>>()?;
    Ok((envelope.record_type, envelope.last_updated, values))
}

/// A request whose values were decoded one at a time.
#[derive(Debug)]
pub struct DecodedRequest {
    /// The request with every value that decoded.
    pub request: SyncRequest,
    /// Values that did not decode, by position in the batch.
    pub rejected: Vec<(usize, ProtocolError)>,
}

impl DecodedRequest {
    /// Number of values in the original batch.
    pub fn batch_len(&self) -> usize {
        self.request.values.len() + self.rejected.len()
    }
}

fn encode_envelope(
    record_type: &str,
    last_updated: Watermark,
    values: &[Item],
    registry: &KindRegistry,
) -> ProtocolResult<Vec<u8>> {
    let codec = registry.codec(record_type)?;
    let values = values
        .iter()
        .map(codec.encode)
        .collect::<ProtocolResult<Vec<_>>>()?;
    let envelope = Envelope {
        record_type: record_type.to_string(),
        last_updated,
        values,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// A batch of local changes sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Record kind discriminator.
    pub record_type: String,
    /// Highest watermark the client has seen.
    pub last_updated: Watermark,
    /// Locally modified records.
    pub values: Vec<Item>,
}

impl SyncRequest {
    /// Creates an item sync request.
    #[must_use]
    pub fn items(last_updated: Watermark, values: Vec<Item>) -> Self {
        Self {
            record_type: ITEMS_KIND.to_string(),
            last_updated,
            values,
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self, registry: &KindRegistry) -> ProtocolResult<Vec<u8>> {
        encode_envelope(&self.record_type, self.last_updated, &self.values, registry)
    }

    /// Decodes from JSON.
    ///
    /// Fails with `UnknownType` before any value is looked at when the
    /// discriminator is not registered.
    pub fn decode(bytes: &[u8], registry: &KindRegistry) -> ProtocolResult<Self> {
        let (record_type, last_updated, values) = decode_envelope(bytes, registry)?;
        Ok(Self {
            record_type,
            last_updated,
            values,
        })
    }

    /// Decodes from JSON, dropping values that do not decode.
    ///
    /// Only envelope errors and an unknown `type` fail the whole message; a
    /// bad value is reported in [`DecodedRequest::rejected`] and skipped.
    pub fn decode_lenient(bytes: &[u8], registry: &KindRegistry) -> ProtocolResult<DecodedRequest> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let codec = registry.codec(&envelope.record_type)?;

        let mut values = Vec::with_capacity(envelope.values.len());
        let mut rejected = Vec::new();
        for (index, value) in envelope.values.into_iter().enumerate() {
            match (codec.decode)(value) {
                Ok(item) => values.push(item),
                Err(e) => rejected.push((index, e)),
            }
        }

        Ok(DecodedRequest {
            request: Self {
                record_type: envelope.record_type,
                last_updated: envelope.last_updated,
                values,
            },
            rejected,
        })
    }
}

/// The server's answer to a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    /// Record kind discriminator.
    pub record_type: String,
    /// The watermark the client should adopt.
    pub last_updated: Watermark,
    /// Records the client must store.
    pub values: Vec<Item>,
}

impl SyncResponse {
    /// Creates a response.
    pub fn new(record_type: impl Into<String>, last_updated: Watermark, values: Vec<Item>) -> Self {
        Self {
            record_type: record_type.into(),
            last_updated,
            values,
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self, registry: &KindRegistry) -> ProtocolResult<Vec<u8>> {
        encode_envelope(&self.record_type, self.last_updated, &self.values, registry)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8], registry: &KindRegistry) -> ProtocolResult<Self> {
        let (record_type, last_updated, values) = decode_envelope(bytes, registry)?;
        Ok(Self {
            record_type,
            last_updated,
            values,
        })
    }
}
