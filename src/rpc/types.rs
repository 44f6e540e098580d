//! Raw JSON-RPC response shapes and their normalization into the stable
//! domain shapes: hex quantities become native integers, 256-bit values
//! stay as decimal strings, missing nullable fields become explicit
//! `None`, addresses are lowercased.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::model::{self, BlockHeader, Log, Transaction};
use crate::rpc::error::RpcError;

fn hex_to_u64(value: &str) -> Result<u64, RpcError> {
    let trimmed = value.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(trimmed, 16).map_err(|e| RpcError::Decode(e.to_string()))
}

fn hex_to_decimal_string(value: &str) -> Result<String, RpcError> {
    let parsed = model::hex_to_u256(value).map_err(|e| RpcError::Decode(e.to_string()))?;
    Ok(model::u256_to_decimal(parsed))
}

fn opt_hex_to_decimal(value: Option<&str>) -> Result<Option<String>, RpcError> {
    value.map(hex_to_decimal_string).transpose()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub number: String,
    pub hash: String,
    #[serde(rename = "parentHash")]
    pub parent_hash: String,
    pub miner: String,
    pub timestamp: String,
    #[serde(rename = "gasLimit")]
    pub gas_limit: String,
    #[serde(rename = "gasUsed")]
    pub gas_used: String,
    pub size: Option<String>,
    #[serde(rename = "baseFeePerGas")]
    pub base_fee_per_gas: Option<String>,
    /// Either a list of tx hashes or full transaction objects, depending
    /// on whether `include_full_txs` was requested.
    pub transactions: Vec<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    pub hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    #[serde(rename = "transactionIndex")]
    pub transaction_index: Option<String>,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub gas: String,
    #[serde(rename = "gasPrice")]
    pub gas_price: Option<String>,
    #[serde(rename = "maxFeePerGas")]
    pub max_fee_per_gas: Option<String>,
    #[serde(rename = "maxPriorityFeePerGas")]
    pub max_priority_fee_per_gas: Option<String>,
    pub input: String,
    pub nonce: String,
    #[serde(rename = "type")]
    pub tx_type: Option<String>,
    #[serde(rename = "chainId")]
    pub chain_id: Option<String>,
    #[serde(rename = "accessList")]
    pub access_list: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub data: String,
    pub topics: Vec<String>,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    pub status: Option<String>,
    #[serde(rename = "gasUsed")]
    pub gas_used: String,
    #[serde(rename = "cumulativeGasUsed")]
    pub cumulative_gas_used: String,
    #[serde(rename = "effectiveGasPrice")]
    pub effective_gas_price: Option<String>,
    #[serde(rename = "contractAddress")]
    pub contract_address: Option<String>,
    pub logs: Vec<RawLog>,
}

impl RawBlock {
    pub fn normalize(&self) -> Result<BlockHeader, RpcError> {
        Ok(BlockHeader {
            number: hex_to_u64(&self.number)?,
            hash: self.hash.to_lowercase(),
            parent_hash: self.parent_hash.to_lowercase(),
            miner: self.miner.to_lowercase(),
            timestamp: hex_to_u64(&self.timestamp)?,
            gas_limit: hex_to_decimal_string(&self.gas_limit)?,
            gas_used: hex_to_decimal_string(&self.gas_used)?,
            size: self.size.as_deref().map(hex_to_u64).transpose()?,
            base_fee_per_gas: opt_hex_to_decimal(self.base_fee_per_gas.as_deref())?,
            transaction_count: self.transactions.len() as u32,
            extra: self.extra.clone(),
        })
    }

    /// Extracts the full transaction objects embedded in this block, when
    /// fetched with `include_full_txs = true`. Returns an empty vec for a
    /// hash-only response, which the assembler treats the same as "no
    /// transactions to look up" for that block.
    pub fn full_transactions(&self) -> Result<Vec<RawTransaction>, RpcError> {
        self.transactions
            .iter()
            .filter(|v| v.is_object())
            .map(|v| serde_json::from_value(v.clone()).map_err(|e| RpcError::Decode(e.to_string())))
            .collect()
    }

    pub fn transaction_hashes(&self) -> Vec<String> {
        self.transactions
            .iter()
            .filter_map(|v| {
                if let Some(s) = v.as_str() {
                    Some(s.to_lowercase())
                } else {
                    v.get("hash").and_then(|h| h.as_str()).map(|s| s.to_lowercase())
                }
            })
            .collect()
    }
}

impl RawTransaction {
    pub fn normalize_with_receipt(&self, receipt: &RawReceipt) -> Result<Transaction, RpcError> {
        Ok(Transaction {
            hash: self.hash.to_lowercase(),
            block_number: self
                .block_number
                .as_deref()
                .map(hex_to_u64)
                .transpose()?
                .unwrap_or_default(),
            transaction_index: self
                .transaction_index
                .as_deref()
                .map(hex_to_u64)
                .transpose()?
                .unwrap_or_default() as u32,
            from_address: self.from.to_lowercase(),
            to_address: self.to.as_ref().map(|s| s.to_lowercase()),
            value: hex_to_decimal_string(&self.value)?,
            gas: hex_to_decimal_string(&self.gas)?,
            gas_price: opt_hex_to_decimal(self.gas_price.as_deref())?,
            max_fee_per_gas: opt_hex_to_decimal(self.max_fee_per_gas.as_deref())?,
            max_priority_fee_per_gas: opt_hex_to_decimal(self.max_priority_fee_per_gas.as_deref())?,
            input: self.input.to_lowercase(),
            nonce: hex_to_u64(&self.nonce)?,
            tx_type: self.tx_type.as_deref().map(hex_to_u64).transpose()?.unwrap_or_default(),
            chain_id: self.chain_id.as_deref().map(hex_to_u64).transpose()?,
            access_list: self.access_list.clone(),
            status: receipt.status.as_deref().map(hex_to_u64).transpose()?,
            gas_used: hex_to_decimal_string(&receipt.gas_used)?,
            cumulative_gas_used: hex_to_decimal_string(&receipt.cumulative_gas_used)?,
            effective_gas_price: opt_hex_to_decimal(receipt.effective_gas_price.as_deref())?,
            contract_address: receipt.contract_address.as_ref().map(|s| s.to_lowercase()),
            logs_count: receipt.logs.len() as u32,
        })
    }
}

impl RawLog {
    pub fn normalize(&self) -> Result<Log, RpcError> {
        let topic = |i: usize| self.topics.get(i).map(|t| t.to_lowercase());
        Ok(Log {
            transaction_hash: self.transaction_hash.to_lowercase(),
            block_number: hex_to_u64(&self.block_number)?,
            log_index: hex_to_u64(&self.log_index)? as u32,
            address: self.address.to_lowercase(),
            data: self.data.to_lowercase(),
            topic0: topic(0),
            topic1: topic(1),
            topic2: topic(2),
            topic3: topic(3),
            removed: self.removed,
            decoded: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_to_u64_handles_zero_payload() {
        assert_eq!(hex_to_u64("0x").unwrap(), 0);
        assert_eq!(hex_to_u64("0x10").unwrap(), 16);
    }

    #[test]
    fn raw_block_transaction_hashes_handles_both_shapes() {
        let block = RawBlock {
            number: "0x1".into(),
            hash: "0xHASH".into(),
            parent_hash: "0xPARENT".into(),
            miner: "0xMINER".into(),
            timestamp: "0x0".into(),
            gas_limit: "0x0".into(),
            gas_used: "0x0".into(),
            size: None,
            base_fee_per_gas: None,
            transactions: vec![
                Value::String("0xAAA".into()),
                serde_json::json!({"hash": "0xBBB"}),
            ],
            extra: BTreeMap::new(),
        };
        assert_eq!(block.transaction_hashes(), vec!["0xaaa", "0xbbb"]);
    }
}
