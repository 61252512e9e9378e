//! Record-kind registry.
//!
//! The `type` field of an envelope selects how its `values` are decoded.
//! The set of kinds is closed and fixed when the registry is built.

use crate::error::{ProtocolError, ProtocolResult};
use ledger_core::Item;
use serde_json::Value;
use std::collections::BTreeMap;

/// Discriminator of ledger items.
pub const ITEMS_KIND: &str = "items";

/// Decode and encode functions for one record kind.
#[derive(Debug, Clone, Copy)]
pub struct KindCodec {
    /// Decodes one JSON value into a record.
    pub decode: fn(Value) -> ProtocolResult<Item>,
    /// Encodes one record as a JSON value.
    pub encode: fn(&Item) -> ProtocolResult<Value>,
}

fn decode_item(value: Value) -> ProtocolResult<Item> {
    Ok(serde_json::from_value(value)?)
}

fn encode_item(item: &Item) -> ProtocolResult<Value> {
    Ok(serde_json::to_value(item)?)
}

/// The closed table of record kinds.
#[derive(Debug, Clone)]
pub struct KindRegistry {
    kinds: BTreeMap<&'static str, KindCodec>,
}

impl KindRegistry {
    /// Creates a registry with the built-in kinds.
    #[must_use]
    pub fn new() -> Self {
        let mut kinds = BTreeMap::new();
        kinds.insert(
            ITEMS_KIND,
            KindCodec {
                decode: decode_item,
                encode: encode_item,
            },
        );
        Self { kinds }
    }

    /// Looks up the codec for a discriminator.
    pub fn codec(&self, name: &str) -> ProtocolResult<&KindCodec> {
        self.kinds
            .get(name)
            .ok_or_else(|| ProtocolError::unknown_type(name))
    }

    /// Returns true if the discriminator is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Registered discriminators, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.keys().copied()
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}
