//! Serialization protocol for checkpoint payloads

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Strategy for turning checkpoint data into bytes and back
///
/// Backends pick an implementation; JSON is the default, bincode is available
/// when payload size matters more than readability.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// Serialize to a JSON value
    fn dumps_json<T: Serialize>(&self, value: &T) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Deserialize from a JSON value
    fn loads_json<T: for<'de> Deserialize<'de>>(&self, value: &serde_json::Value) -> Result<T> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Compact binary serializer
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let serializer = JsonSerializer::new();
        let cp = Checkpoint::new("thread-rt", json!({"messages": ["hello"], "count": 3}));

        let bytes = serializer.dumps(&cp).unwrap();
        let restored: Checkpoint = serializer.loads(&bytes).unwrap();

        assert_eq!(cp, restored);
    }

    #[test]
    fn test_bincode_round_trip() {
        let serializer = BincodeSerializer::new();
        let cp = Checkpoint::new("thread-rt", json!({"nested": {"a": [1, 2, 3]}}));

        let bytes = serializer.dumps(&cp).unwrap();
        let restored: Checkpoint = serializer.loads(&bytes).unwrap();

        assert_eq!(cp, restored);
    }

    #[test]
    fn test_json_value_round_trip() {
        let serializer = JsonSerializer::new();
        let cp = Checkpoint::new("t", json!({"k": "v"}));

        let value = serializer.dumps_json(&cp).unwrap();
        let restored: Checkpoint = serializer.loads_json(&value).unwrap();

        assert_eq!(cp, restored);
    }

    proptest! {
        // Serialize -> deserialize preserves id, thread, namespace, parent,
        // state, and version for arbitrary payloads.
        #[test]
        fn prop_json_round_trip_preserves_fields(
            thread in "[a-z]{1,12}",
            ns in "[a-z]{0,8}",
            key in "[a-z]{1,8}",
            n in any::<i64>(),
            text in ".{0,40}",
            version in 1u64..10_000,
        ) {
            let cp = Checkpoint::new(thread.clone(), json!({key.clone(): n, "text": text}))
                .with_namespace(ns.clone())
                .with_parent("parent-0")
                .with_version(version);

            let serializer = JsonSerializer::new();
            let restored: Checkpoint = serializer.loads(&serializer.dumps(&cp).unwrap()).unwrap();

            prop_assert_eq!(&restored.id, &cp.id);
            prop_assert_eq!(&restored.thread_id, &thread);
            prop_assert_eq!(&restored.namespace, &ns);
            prop_assert_eq!(restored.parent_id.as_deref(), Some("parent-0"));
            prop_assert_eq!(&restored.state, &cp.state);
            prop_assert_eq!(restored.version, version);
            prop_assert_eq!(restored.ts.timestamp(), cp.ts.timestamp());
        }
    }
}
