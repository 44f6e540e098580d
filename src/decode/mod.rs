//! Event decoding: topic0 lookup against the signature registry, then a
//! joint indexed/non-indexed parameter decode.

pub mod abi;
pub mod registry;

pub use registry::Registry;

use indexmap::IndexMap;
use serde_json::Value;

use crate::model::DecodedLog;

/// Decodes one log's `topics`/`data` against `registry`. Returns a
/// `DecodedLog` with every field `None` if `topic0` is unknown — the
/// pipeline never stalls on an unrecognized event.
pub fn decode_log(topics: &[Option<String>], data: &str, registry: &Registry) -> DecodedLog {
    let Some(topic0) = topics.first().and_then(|t| t.clone()) else {
        return DecodedLog::default();
    };
    let Some(descriptor) = registry.lookup(&topic0) else {
        return DecodedLog::default();
    };

    let mut params: IndexMap<String, Value> = IndexMap::new();
    let mut topic_cursor = 1usize;
    let non_indexed_kinds: Vec<(String, String)> = descriptor
        .params
        .iter()
        .filter(|p| !p.indexed)
        .map(|p| (p.name.clone(), p.kind.clone()))
        .collect();
    let non_indexed_values = abi::decode_non_indexed(&non_indexed_kinds, data);
    let mut non_indexed_iter = non_indexed_values.into_iter().flatten();

    for p in &descriptor.params {
        if p.indexed {
            let topic = topics.get(topic_cursor).and_then(|t| t.clone());
            topic_cursor += 1;
            let value = topic
                .map(|t| abi::decode_indexed(&p.kind, &t))
                .unwrap_or(Value::Null);
            params.insert(p.name.clone(), value);
        } else if let Some((name, value)) = non_indexed_iter.next() {
            params.insert(name, value);
        } else {
            // `data` was too short for the remaining non-indexed params.
            params.insert(p.name.clone(), Value::Null);
            params.insert("_rawData".to_string(), Value::String(data.to_string()));
        }
    }

    DecodedLog {
        event_name: Some(descriptor.name.clone()),
        canonical_signature: Some(descriptor.canonical_signature.clone()),
        event_standard: descriptor.standard_tag.clone(),
        decoded_params: serde_json::to_value(&params).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(word: u64) -> String {
        format!("0x{word:0>64x}")
    }

    #[test]
    fn decode_log_erc20_transfer() {
        let registry = Registry::default();
        let topic0 = registry::keccak_topic0("Transfer(address,address,uint256)");
        let from_topic = "0x0000000000000000000000000000000000000000000000000000000000000001".to_string();
        let to_topic = "0x0000000000000000000000000000000000000000000000000000000000000002".to_string();
        let data = format!("0x{:0>64x}", 100u64);

        let decoded = decode_log(&[Some(topic0), Some(from_topic), Some(to_topic)], &data, &registry);

        assert_eq!(decoded.event_name.as_deref(), Some("Transfer"));
        assert_eq!(decoded.event_standard.as_deref(), Some("ERC20/ERC721"));
        let params = decoded.decoded_params.unwrap();
        assert_eq!(params["value"], Value::String("100".to_string()));
    }

    #[test]
    fn decode_log_unknown_topic0_returns_empty() {
        let registry = Registry::default();
        let decoded = decode_log(&[Some("0xdeadbeef".to_string())], "0x", &registry);
        assert_eq!(decoded.event_name, None);
    }

    #[test]
    fn decode_log_no_topics_returns_empty() {
        let registry = Registry::default();
        let decoded = decode_log(&[], "0x", &registry);
        assert_eq!(decoded.event_name, None);
    }

    #[test]
    fn decode_log_short_data_falls_back_to_raw_data() {
        let registry = Registry::default();
        let topic0 = registry::keccak_topic0("Transfer(address,address,uint256)");
        let decoded = decode_log(
            &[Some(topic0), Some(topic(1)), Some(topic(2))],
            "0x00",
            &registry,
        );
        let params = decoded.decoded_params.unwrap();
        assert_eq!(params["_rawData"], Value::String("0x00".to_string()));
    }
}
