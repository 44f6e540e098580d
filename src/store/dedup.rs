//! Per-table dedup/merge rules applied to one writer cycle's worth of
//! flattened fragments, before any SQL is built. Pure and I/O-free so the
//! rules themselves are unit-testable without Postgres.

use indexmap::IndexMap;

use crate::model::{
    AddressRecord, AddressTransaction, BlockFragment, BlockHeader, Contract, Erc1155Token, Erc1155Transfer,
    Erc20Token, Erc20Transfer, Erc721Token, Erc721Transfer, Log, Transaction,
};

/// The deduped, ready-to-bind staging lists for one writer cycle.
#[derive(Debug, Default)]
pub struct StagedBatch {
    pub blocks: Vec<BlockHeader>,
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

/// Flattens a batch of block fragments and applies the per-table dedup
/// rules: first-occurrence-wins for addresses/contracts/token
/// tables, OR-merge for address↔tx rows, last-occurrence-wins for the
/// natural-keyed blocks/transactions tables (a later fragment in the same
/// cycle reflects a more complete view than an earlier one), and no dedup
/// at all for logs/transfers (duplicates are allowed by design).
pub fn stage(fragments: &[BlockFragment]) -> StagedBatch {
    let mut blocks: IndexMap<u64, BlockHeader> = IndexMap::new();
    let mut transactions: IndexMap<String, Transaction> = IndexMap::new();
    let mut addresses: IndexMap<String, AddressRecord> = IndexMap::new();
    let mut address_transactions: IndexMap<(String, String), AddressTransaction> = IndexMap::new();
    let mut contracts: IndexMap<String, Contract> = IndexMap::new();
    let mut erc20_tokens: IndexMap<String, Erc20Token> = IndexMap::new();
    let mut erc721_tokens: IndexMap<String, Erc721Token> = IndexMap::new();
    let mut erc1155_tokens: IndexMap<String, Erc1155Token> = IndexMap::new();
    let mut logs = Vec::new();
    let mut erc20_transfers = Vec::new();
    let mut erc721_transfers = Vec::new();
    let mut erc1155_transfers = Vec::new();

    for fragment in fragments {
        if let Some(header) = &fragment.header {
            blocks.insert(header.number, header.clone());
        }
        for tx in &fragment.transactions {
            transactions.insert(tx.hash.clone(), tx.clone());
        }
        logs.extend(fragment.logs.iter().cloned());
        for addr in &fragment.addresses {
            addresses.entry(addr.address.clone()).or_insert_with(|| addr.clone());
        }
        for at in &fragment.address_transactions {
            let key = (at.address.clone(), at.transaction_hash.clone());
            address_transactions
                .entry(key)
                .and_modify(|existing| {
                    existing.is_from |= at.is_from;
                    existing.is_to |= at.is_to;
                })
                .or_insert_with(|| at.clone());
        }
        for contract in &fragment.contracts {
            contracts
                .entry(contract.address.clone())
                .or_insert_with(|| contract.clone());
        }
        for token in &fragment.erc20_tokens {
            erc20_tokens.entry(token.address.clone()).or_insert_with(|| token.clone());
        }
        for token in &fragment.erc721_tokens {
            erc721_tokens
                .entry(token.address.clone())
                .or_insert_with(|| token.clone());
        }
        for token in &fragment.erc1155_tokens {
            erc1155_tokens
                .entry(token.address.clone())
                .or_insert_with(|| token.clone());
        }
        erc20_transfers.extend(fragment.erc20_transfers.iter().cloned());
        erc721_transfers.extend(fragment.erc721_transfers.iter().cloned());
        erc1155_transfers.extend(fragment.erc1155_transfers.iter().cloned());
    }

    StagedBatch {
        blocks: blocks.into_values().collect(),
        transactions: transactions.into_values().collect(),
        logs,
        addresses: addresses.into_values().collect(),
        address_transactions: address_transactions.into_values().collect(),
        contracts: contracts.into_values().collect(),
        erc20_tokens: erc20_tokens.into_values().collect(),
        erc721_tokens: erc721_tokens.into_values().collect(),
        erc1155_tokens: erc1155_tokens.into_values().collect(),
        erc20_transfers,
        erc721_transfers,
        erc1155_transfers,
    }
}

/// Splits a staged list into chunks whose `row_count * columns_per_row`
/// stays under `sql_placeholder_limit`, the bound on bound parameters a
/// single statement can carry.
pub fn chunk_by_placeholder_budget<T>(rows: &[T], columns_per_row: usize, placeholder_limit: usize) -> Vec<&[T]> {
    if rows.is_empty() {
        return Vec::new();
    }
    let rows_per_chunk = (placeholder_limit / columns_per_row.max(1)).max(1);
    rows.chunks(rows_per_chunk).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_address(addr: &str, tx_count: u64) -> AddressRecord {
        AddressRecord {
            address: addr.to_string(),
            first_seen_block: 1,
            first_seen_tx: "0xabc".to_string(),
            is_contract: false,
            tx_count,
            balance: "0".to_string(),
        }
    }

    #[test]
    fn addresses_first_occurrence_wins() {
        let mut first = BlockFragment::default();
        first.addresses.push(sample_address("0xaaa", 1));
        let mut second = BlockFragment::default();
        second.addresses.push(sample_address("0xaaa", 999));

        let staged = stage(&[first, second]);
        assert_eq!(staged.addresses.len(), 1);
        assert_eq!(staged.addresses[0].tx_count, 1);
    }

    #[test]
    fn address_transactions_or_merge_flags() {
        let mut first = BlockFragment::default();
        first.address_transactions.push(AddressTransaction {
            address: "0xaaa".into(),
            transaction_hash: "0xtx1".into(),
            block_number: 1,
            is_from: true,
            is_to: false,
        });
        let mut second = BlockFragment::default();
        second.address_transactions.push(AddressTransaction {
            address: "0xaaa".into(),
            transaction_hash: "0xtx1".into(),
            block_number: 1,
            is_from: false,
            is_to: true,
        });

        let staged = stage(&[first, second]);
        assert_eq!(staged.address_transactions.len(), 1);
        let merged = &staged.address_transactions[0];
        assert!(merged.is_from);
        assert!(merged.is_to);
    }

    #[test]
    fn logs_are_never_deduped() {
        let mut fragment = BlockFragment::default();
        let log = Log {
            transaction_hash: "0xtx".into(),
            block_number: 1,
            log_index: 0,
            address: "0xaaa".into(),
            data: "0x".into(),
            topic0: None,
            topic1: None,
            topic2: None,
            topic3: None,
            removed: false,
            decoded: Default::default(),
        };
        fragment.logs.push(log.clone());
        fragment.logs.push(log);

        let staged = stage(&[fragment]);
        assert_eq!(staged.logs.len(), 2);
    }

    #[test]
    fn transactions_last_occurrence_wins_by_hash() {
        let base_tx = |status: Option<u64>| Transaction {
            hash: "0xtx".into(),
            block_number: 1,
            transaction_index: 0,
            from_address: "0xaaa".into(),
            to_address: None,
            value: "0".into(),
            gas: "0".into(),
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            input: "0x".into(),
            nonce: 0,
            tx_type: 0,
            chain_id: None,
            access_list: None,
            status,
            gas_used: "0".into(),
            cumulative_gas_used: "0".into(),
            effective_gas_price: None,
            contract_address: None,
            logs_count: 0,
        };

        let mut first = BlockFragment::default();
        first.transactions.push(base_tx(None));
        let mut second = BlockFragment::default();
        second.transactions.push(base_tx(Some(1)));

        let staged = stage(&[first, second]);
        assert_eq!(staged.transactions.len(), 1);
        assert_eq!(staged.transactions[0].status, Some(1));
    }

    #[test]
    fn chunk_by_placeholder_budget_respects_column_width() {
        let rows = vec![1, 2, 3, 4, 5];
        let chunks = chunk_by_placeholder_budget(&rows, 2, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], &[1, 2]);
    }
}
