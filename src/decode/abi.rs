//! ABI-typed parameter decoding: indexed params read straight off topics,
//! non-indexed params jointly decoded from `data` using canonical
//! head/tail ABI layout.

use primitive_types::U256;
use serde_json::Value;

use crate::model::{addr_from_topic, u256_to_decimal};

const WORD: usize = 32;

/// Decodes one indexed parameter from its topic.
/// Dynamic types (`string`, `bytes`, and any array) are represented by
/// their topic verbatim, tagged as an indexed-hash rather than a value,
/// since a topic only carries the Keccak hash of a dynamic value.
pub fn decode_indexed(kind: &str, topic: &str) -> Value {
    match kind {
        "address" => Value::String(addr_from_topic(topic)),
        "bool" => Value::Bool(topic_as_u256(topic).map(|v| v == U256::one()).unwrap_or(false)),
        k if is_integer(k) => topic_as_u256(topic)
            .map(|v| Value::String(u256_to_decimal(v)))
            .unwrap_or(Value::Null),
        _ => Value::String(format!("{topic}#indexed-hash")),
    }
}

fn topic_as_u256(topic: &str) -> Option<U256> {
    let trimmed = topic.trim_start_matches("0x");
    U256::from_str_radix(trimmed, 16).ok()
}

fn is_integer(kind: &str) -> bool {
    kind.starts_with("uint") || kind.starts_with("int")
}

fn is_dynamic(kind: &str) -> bool {
    kind == "string" || kind == "bytes" || kind.ends_with("[]")
}

/// Strips a leading `0x` and decodes the rest as raw bytes.
fn data_bytes(data: &str) -> Vec<u8> {
    hex::decode(data.trim_start_matches("0x")).unwrap_or_default()
}

fn read_word(bytes: &[u8], offset: usize) -> Option<&[u8]> {
    bytes.get(offset..offset + WORD)
}

/// Decodes one non-indexed value at `head_offset` within `bytes`,
/// following the head/tail layout: static types are read directly from
/// the head word; dynamic types store an offset in the head word and
/// their payload at that offset from the start of the tuple.
fn decode_value(kind: &str, bytes: &[u8], head_offset: usize, tuple_base: usize) -> Value {
    if is_dynamic(kind) {
        let Some(offset_word) = read_word(bytes, head_offset) else {
            return Value::Null;
        };
        let rel_offset = U256::from_big_endian(offset_word).as_usize();
        let abs_offset = tuple_base + rel_offset;
        decode_dynamic(kind, bytes, abs_offset)
    } else {
        match read_word(bytes, head_offset) {
            Some(word) => decode_static(kind, word),
            None => Value::Null,
        }
    }
}

fn decode_static(kind: &str, word: &[u8]) -> Value {
    match kind {
        "address" => Value::String(format!("0x{}", hex::encode(&word[12..32]))),
        "bool" => Value::Bool(word[31] == 1),
        k if k.starts_with("bytes") && k.len() > 5 => Value::String(format!("0x{}", hex::encode(word))),
        k if is_integer(k) => Value::String(u256_to_decimal(U256::from_big_endian(word))),
        _ => Value::String(format!("0x{}", hex::encode(word))),
    }
}

fn decode_dynamic(kind: &str, bytes: &[u8], abs_offset: usize) -> Value {
    let Some(length_word) = read_word(bytes, abs_offset) else {
        return Value::Null;
    };
    let length = U256::from_big_endian(length_word).as_usize();
    let payload_start = abs_offset + WORD;
    let Some(payload) = bytes.get(payload_start..payload_start + length) else {
        return Value::Null;
    };

    if kind == "string" {
        Value::String(String::from_utf8_lossy(payload).trim_matches('\0').to_string())
    } else if kind == "bytes" {
        Value::String(format!("0x{}", hex::encode(payload)))
    } else if let Some(element_kind) = kind.strip_suffix("[]") {
        // One level of array nesting: `length` here is an element count,
        // not a byte length, so re-read it that way.
        let element_count = length;
        let mut items = Vec::with_capacity(element_count);
        for i in 0..element_count {
            let element_head = payload_start + i * WORD;
            items.push(decode_value(element_kind, bytes, element_head, payload_start));
        }
        Value::Array(items)
    } else {
        Value::Null
    }
}

/// Decodes every non-indexed parameter from `data` jointly, per the ABI's
/// head/tail layout. Returns `None` (caller falls back to `_rawData`) if
/// `data` is shorter than the fixed head region the types require.
pub fn decode_non_indexed(kinds: &[(String, String)], data: &str) -> Option<Vec<(String, Value)>> {
    let bytes = data_bytes(data);
    if bytes.len() < kinds.len() * WORD {
        return None;
    }
    let mut out = Vec::with_capacity(kinds.len());
    for (i, (name, kind)) in kinds.iter().enumerate() {
        let head_offset = i * WORD;
        out.push((name.clone(), decode_value(kind, &bytes, head_offset, 0)));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_indexed_address_extracts_right_twenty_bytes() {
        let topic = "0x000000000000000000000000c0ffee1234567890abcdef1234567890abcdef12";
        let value = decode_indexed("address", topic);
        assert_eq!(value, Value::String("0xc0ffee1234567890abcdef1234567890abcdef12".to_string()));
    }

    #[test]
    fn decode_indexed_bool_reads_low_bit() {
        let topic_true = "0x0000000000000000000000000000000000000000000000000000000000000001";
        assert_eq!(decode_indexed("bool", topic_true), Value::Bool(true));
    }

    #[test]
    fn decode_indexed_uint_renders_decimal() {
        let topic = "0x0000000000000000000000000000000000000000000000000000000000000064";
        assert_eq!(decode_indexed("uint256", topic), Value::String("100".to_string()));
    }

    #[test]
    fn decode_non_indexed_single_uint256() {
        let data = format!("0x{:0>64x}", 42u64);
        let kinds = vec![("value".to_string(), "uint256".to_string())];
        let decoded = decode_non_indexed(&kinds, &data).unwrap();
        assert_eq!(decoded[0].0, "value");
        assert_eq!(decoded[0].1, Value::String("42".to_string()));
    }

    #[test]
    fn decode_non_indexed_string_reads_offset_length_payload() {
        // head: offset = 0x20, tail: length = 5, payload = "hello" padded to 32 bytes.
        let mut hex_data = String::new();
        hex_data.push_str(&format!("{:0>64x}", 0x20));
        hex_data.push_str(&format!("{:0>64x}", 5));
        let mut payload = b"hello".to_vec();
        payload.resize(32, 0);
        hex_data.push_str(&hex::encode(payload));

        let kinds = vec![("name".to_string(), "string".to_string())];
        let decoded = decode_non_indexed(&kinds, &format!("0x{hex_data}")).unwrap();
        assert_eq!(decoded[0].1, Value::String("hello".to_string()));
    }

    #[test]
    fn decode_non_indexed_returns_none_on_short_data() {
        let kinds = vec![("value".to_string(), "uint256".to_string())];
        assert!(decode_non_indexed(&kinds, "0x00").is_none());
    }
}
