//! Typed shapes for every indexed entity: header, transaction, log,
//! contract, token metadata, address, address↔tx mapping, transfers,
//! indexer state, and the signature registry descriptor.
//!
//! All hash/address fields are lowercase `0x`-prefixed hex strings and all
//! 256-bit integers are decimal strings, matching the persisted shape —
//! conversion happens once, at the RPC/decode boundary, so nothing
//! downstream has to re-normalize.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Lowercases and 0x-prefixes a byte slice.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Renders a `U256` as an unprefixed decimal string, the wire format used
/// for every 256-bit integer field in the data model.
pub fn u256_to_decimal(value: U256) -> String {
    value.to_string()
}

/// Parses a `0x`-prefixed hex string (of any width) into a `U256`.
pub fn hex_to_u256(hex_str: &str) -> Result<U256, String> {
    let trimmed = hex_str.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(trimmed, 16).map_err(|e| e.to_string())
}

/// Right-20-byte address extraction from a 32-byte topic, per the
/// `addr(topic)` glossary entry. Lowercases the result.
pub fn addr_from_topic(topic: &str) -> String {
    let trimmed = topic.trim_start_matches("0x");
    let bytes = hex::decode(trimmed).unwrap_or_default();
    let tail = if bytes.len() >= 20 {
        &bytes[bytes.len() - 20..]
    } else {
        &bytes[..]
    };
    format!("0x{}", hex::encode(tail)).to_lowercase()
}

pub fn lower(address: &str) -> String {
    address.to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub miner: String,
    pub timestamp: u64,
    pub gas_limit: String,
    pub gas_used: String,
    pub size: Option<u64>,
    pub base_fee_per_gas: Option<String>,
    pub transaction_count: u32,
    /// Other header fields preserved verbatim from the node response
    /// (difficulty, extra_data, logs_bloom, …), keyed by field name.
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub hash: String,
    pub block_number: u64,
    pub transaction_index: u32,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value: String,
    pub gas: String,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub input: String,
    pub nonce: u64,
    pub tx_type: u64,
    pub chain_id: Option<u64>,
    pub access_list: Option<serde_json::Value>,
    // Receipt-merged fields.
    pub status: Option<u64>,
    pub gas_used: String,
    pub cumulative_gas_used: String,
    pub effective_gas_price: Option<String>,
    pub contract_address: Option<String>,
    pub logs_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DecodedLog {
    pub event_name: Option<String>,
    pub canonical_signature: Option<String>,
    pub event_standard: Option<String>,
    /// Ordered field-keyed record of decoded parameters, serialized as
    /// JSON for storage; an immutable record per descriptor in memory.
    pub decoded_params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Log {
    pub transaction_hash: String,
    pub block_number: u64,
    pub log_index: u32,
    pub address: String,
    pub data: String,
    pub topic0: Option<String>,
    pub topic1: Option<String>,
    pub topic2: Option<String>,
    pub topic3: Option<String>,
    pub removed: bool,
    #[serde(flatten)]
    pub decoded: DecodedLog,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contract {
    pub address: String,
    pub creator_address: String,
    pub creation_tx_hash: String,
    pub creation_block_number: u64,
    pub bytecode: String,
    pub is_erc20: bool,
    pub is_erc721: bool,
    pub is_erc1155: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Erc20Token {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    pub total_supply: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Erc721Token {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub total_supply: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Erc1155Token {
    pub address: String,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressRecord {
    pub address: String,
    pub first_seen_block: u64,
    pub first_seen_tx: String,
    pub is_contract: bool,
    pub tx_count: u64,
    pub balance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressTransaction {
    pub address: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub is_from: bool,
    pub is_to: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Erc20Transfer {
    pub transaction_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub contract_address: String,
    pub from_address: String,
    pub to_address: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Erc721Transfer {
    pub transaction_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub contract_address: String,
    pub from_address: String,
    pub to_address: String,
    pub token_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Erc1155Transfer {
    pub transaction_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub contract_address: String,
    pub operator: String,
    pub from_address: String,
    pub to_address: String,
    pub token_id: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IndexerState {
    pub forward_block: Option<u64>,
    pub backward_block: Option<u64>,
    pub latest_block: Option<u64>,
    pub is_synced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Event,
    Function,
}

/// A descriptor for one ABI-typed parameter (event or function).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamDescriptor {
    pub name: String,
    pub kind: String,
    pub indexed: bool,
}

#[derive(Debug, Clone)]
pub struct SignatureDescriptor {
    pub name: String,
    pub canonical_signature: String,
    pub standard_tag: Option<String>,
    pub params: Vec<ParamDescriptor>,
}

/// The full set of typed slices derived from one block, ready for one
/// atomic write (the glossary's "block fragment").
#[derive(Debug, Clone, Default)]
pub struct BlockFragment {
    pub header: Option<BlockHeader>,
    pub transactions: Vec<Transaction>,
    pub logs: Vec<Log>,
    pub addresses: Vec<AddressRecord>,
    pub address_transactions: Vec<AddressTransaction>,
    pub contracts: Vec<Contract>,
    pub erc20_tokens: Vec<Erc20Token>,
    pub erc721_tokens: Vec<Erc721Token>,
    pub erc1155_tokens: Vec<Erc1155Token>,
    pub erc20_transfers: Vec<Erc20Transfer>,
    pub erc721_transfers: Vec<Erc721Transfer>,
    pub erc1155_transfers: Vec<Erc1155Transfer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_from_topic_takes_right_twenty_bytes() {
        // 12 zero bytes of padding followed by a 20-byte address.
        let topic =
            "0x000000000000000000000000c0ffee1234567890abcdef1234567890abcdef12";
        let addr = addr_from_topic(topic);
        assert_eq!(addr, "0xc0ffee1234567890abcdef1234567890abcdef12");
        assert_eq!(addr.len(), 42);
    }

    #[test]
    fn addr_from_topic_is_pure_and_deterministic() {
        let topic = "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let a = addr_from_topic(topic);
        let b = addr_from_topic(topic);
        assert_eq!(a, b);
        assert_eq!(a.len(), 42);
        assert!(a.starts_with("0x"));
    }

    #[test]
    fn hex_to_u256_round_trips_through_decimal() {
        let v = hex_to_u256("0x64").unwrap();
        assert_eq!(u256_to_decimal(v), "100");
    }

    #[test]
    fn hex_to_u256_handles_empty_payload() {
        let v = hex_to_u256("0x").unwrap();
        assert_eq!(v, U256::zero());
    }
}
