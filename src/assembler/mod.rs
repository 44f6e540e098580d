//! Block assembly pipeline: turns a set of block numbers into
//! fully-populated block fragments. Never writes to the DB directly —
//! the caller enqueues the returned fragments onto the write queue.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::decode::{self, Registry};
use crate::model::{
    AddressRecord, AddressTransaction, BlockFragment, Erc1155Transfer, Erc20Transfer, Erc721Transfer, Log,
};
use crate::model::{addr_from_topic, u256_to_decimal, hex_to_u256};
use crate::rpc::types::{RawBlock, RawReceipt};
use crate::rpc::RpcClient;
use crate::token;

pub struct Assembler {
    rpc: RpcClient,
    registry: Registry,
    token_probe_concurrency: usize,
}

impl Assembler {
    pub fn new(rpc: RpcClient, registry: Registry, token_probe_concurrency: usize) -> Self {
        Self {
            rpc,
            registry,
            token_probe_concurrency,
        }
    }

    /// Fetch plan for a chunk of block numbers: one batched block fetch
    /// with inlined transactions, a union-of-hashes receipt fetch, then
    /// per-block extraction.
    pub async fn assemble_range(&self, numbers: &[u64]) -> Vec<BlockFragment> {
        let raw_blocks = match self.rpc.blocks_by_number_batch(numbers).await {
            Ok(blocks) => blocks,
            Err(err) => {
                warn!(error = %err, "failed to fetch block range, skipping batch");
                return Vec::new();
            }
        };

        let present: Vec<RawBlock> = raw_blocks.into_iter().flatten().collect();
        if present.is_empty() {
            return Vec::new();
        }

        let mut all_hashes: Vec<String> = Vec::new();
        let mut full_txs_by_block: Vec<Vec<crate::rpc::types::RawTransaction>> = Vec::with_capacity(present.len());
        for block in &present {
            let txs = block.full_transactions().unwrap_or_default();
            all_hashes.extend(txs.iter().map(|t| t.hash.to_lowercase()));
            full_txs_by_block.push(txs);
        }

        let receipt_map: BTreeMap<String, RawReceipt> = if all_hashes.is_empty() {
            BTreeMap::new()
        } else {
            match self.rpc.receipts_batch(&all_hashes).await {
                Ok(receipts) => receipts
                    .into_iter()
                    .map(|r| (r.transaction_hash.to_lowercase(), r))
                    .collect(),
                Err(err) => {
                    warn!(error = %err, "failed to fetch receipts, degrading to header-only fragments");
                    BTreeMap::new()
                }
            }
        };

        let mut fragments = Vec::with_capacity(present.len());
        for (block, txs) in present.iter().zip(full_txs_by_block.into_iter()) {
            fragments.push(self.process_block_data(block, &txs, &receipt_map).await);
        }
        fragments
    }

    async fn process_block_data(
        &self,
        block: &RawBlock,
        txs: &[crate::rpc::types::RawTransaction],
        receipt_map: &BTreeMap<String, RawReceipt>,
    ) -> BlockFragment {
        let header = match block.normalize() {
            Ok(header) => header,
            Err(err) => {
                warn!(error = %err, "malformed block header, skipping block");
                return BlockFragment::default();
            }
        };
        let block_number = header.number;

        let mut fragment = BlockFragment {
            header: Some(header),
            ..Default::default()
        };

        let mut observed: HashSet<String> = HashSet::new();
        let mut first_seen: BTreeMap<String, String> = BTreeMap::new();
        let mut contract_set: HashSet<String> = HashSet::new();
        let mut creation_info: Vec<(String, String, String)> = Vec::new(); // (contract_addr, creator, creation_tx_hash)

        for raw_tx in txs {
            let Some(receipt) = receipt_map.get(&raw_tx.hash.to_lowercase()) else {
                debug!(tx_hash = %raw_tx.hash, "missing receipt, skipping tx");
                continue;
            };
            let tx = match raw_tx.normalize_with_receipt(receipt) {
                Ok(tx) => tx,
                Err(err) => {
                    warn!(error = %err, tx_hash = %raw_tx.hash, "malformed tx/receipt, skipping");
                    continue;
                }
            };

            observed.insert(tx.from_address.clone());
            first_seen.entry(tx.from_address.clone()).or_insert_with(|| tx.hash.clone());
            fragment.address_transactions.push(AddressTransaction {
                address: tx.from_address.clone(),
                transaction_hash: tx.hash.clone(),
                block_number,
                is_from: true,
                is_to: false,
            });

            if let Some(to) = &tx.to_address {
                observed.insert(to.clone());
                first_seen.entry(to.clone()).or_insert_with(|| tx.hash.clone());
                fragment.address_transactions.push(AddressTransaction {
                    address: to.clone(),
                    transaction_hash: tx.hash.clone(),
                    block_number,
                    is_from: false,
                    is_to: true,
                });
            }

            if let Some(contract_address) = &tx.contract_address {
                contract_set.insert(contract_address.clone());
                observed.insert(contract_address.clone());
                first_seen
                    .entry(contract_address.clone())
                    .or_insert_with(|| tx.hash.clone());
                creation_info.push((contract_address.clone(), tx.from_address.clone(), tx.hash.clone()));
            }

            for raw_log in &receipt.logs {
                let log = match raw_log.normalize() {
                    Ok(log) => log,
                    Err(err) => {
                        warn!(error = %err, "malformed log, skipping");
                        continue;
                    }
                };
                observed.insert(log.address.clone());
                first_seen.entry(log.address.clone()).or_insert_with(|| tx.hash.clone());

                let decoded = decode::decode_log(
                    &[log.topic0.clone(), log.topic1.clone(), log.topic2.clone(), log.topic3.clone()],
                    &log.data,
                    &self.registry,
                );
                self.extract_transfer(&log, &mut fragment);
                fragment.logs.push(Log { decoded, ..log });
            }

            fragment.transactions.push(tx);
        }

        if !creation_info.is_empty() {
            self.classify_new_contracts(&creation_info, block_number, &mut fragment).await;
        }

        for address in observed {
            let Some(first_tx) = first_seen.get(&address) else {
                continue;
            };
            fragment.addresses.push(AddressRecord {
                address: address.clone(),
                first_seen_block: block_number,
                first_seen_tx: first_tx.clone(),
                is_contract: contract_set.contains(&address),
                tx_count: 1,
                balance: "0".to_string(),
            });
        }

        fragment
    }

    /// Parses ERC-20/721/1155 transfer events from one decoded log,
    /// using topic-count and byte-length to discriminate the standard.
    fn extract_transfer(&self, log: &Log, fragment: &mut BlockFragment) {
        let topic0 = match &log.topic0 {
            Some(t) => t,
            None => return,
        };
        let transfer_topic0 = decode::registry::keccak_topic0("Transfer(address,address,uint256)");
        let transfer_single_topic0 =
            decode::registry::keccak_topic0("TransferSingle(address,address,address,uint256,uint256)");

        let topics_present = [&log.topic0, &log.topic1, &log.topic2, &log.topic3]
            .iter()
            .filter(|t| t.is_some())
            .count();

        if *topic0 == transfer_topic0 {
            match (topics_present, &log.topic1, &log.topic2, &log.topic3) {
                (3, Some(t1), Some(t2), None) => {
                    fragment.erc20_transfers.push(Erc20Transfer {
                        transaction_hash: log.transaction_hash.clone(),
                        log_index: log.log_index,
                        block_number: log.block_number,
                        contract_address: log.address.clone(),
                        from_address: addr_from_topic(t1),
                        to_address: addr_from_topic(t2),
                        value: log.data.clone(),
                    });
                }
                (4, Some(t1), Some(t2), Some(t3)) => {
                    fragment.erc721_transfers.push(Erc721Transfer {
                        transaction_hash: log.transaction_hash.clone(),
                        log_index: log.log_index,
                        block_number: log.block_number,
                        contract_address: log.address.clone(),
                        from_address: addr_from_topic(t1),
                        to_address: addr_from_topic(t2),
                        token_id: t3.clone(),
                    });
                }
                _ => {}
            }
        } else if *topic0 == transfer_single_topic0 && topics_present == 4 {
            let data_bytes = hex::decode(log.data.trim_start_matches("0x")).unwrap_or_default();
            if data_bytes.len() >= 64 {
                if let (Some(t1), Some(t2), Some(t3)) = (&log.topic1, &log.topic2, &log.topic3) {
                    let token_id = hex_to_u256(&format!("0x{}", hex::encode(&data_bytes[0..32])))
                        .map(u256_to_decimal)
                        .unwrap_or_default();
                    let value = hex_to_u256(&format!("0x{}", hex::encode(&data_bytes[32..64])))
                        .map(u256_to_decimal)
                        .unwrap_or_default();
                    fragment.erc1155_transfers.push(Erc1155Transfer {
                        transaction_hash: log.transaction_hash.clone(),
                        log_index: log.log_index,
                        block_number: log.block_number,
                        contract_address: log.address.clone(),
                        operator: addr_from_topic(t1),
                        from_address: addr_from_topic(t2),
                        to_address: addr_from_topic(t3),
                        token_id,
                        value,
                    });
                }
            }
        }
    }

    async fn classify_new_contracts(
        &self,
        creation_info: &[(String, String, String)],
        block_number: u64,
        fragment: &mut BlockFragment,
    ) {
        let addresses: Vec<String> = creation_info.iter().map(|(addr, _, _)| addr.clone()).collect();
        let bytecodes = match self.rpc.code_batch(&addresses, block_number).await {
            Ok(codes) => codes,
            Err(err) => {
                warn!(error = %err, "failed to fetch creation bytecode, skipping contract rows");
                return;
            }
        };

        let probes = token::batch_detect_tokens(&self.rpc, &addresses, block_number, self.token_probe_concurrency).await;
        let probe_map: BTreeMap<String, token::TokenProbeResult> = probes.into_iter().collect();

        for (i, (address, creator, creation_tx_hash)) in creation_info.iter().enumerate() {
            let bytecode = bytecodes.get(i).cloned().unwrap_or_default();
            let probe = probe_map.get(address).cloned().unwrap_or_default();

            fragment.contracts.push(crate::model::Contract {
                address: address.clone(),
                creator_address: creator.clone(),
                creation_tx_hash: creation_tx_hash.clone(),
                creation_block_number: block_number,
                bytecode,
                is_erc20: probe.is_erc20,
                is_erc721: probe.is_erc721,
                is_erc1155: probe.is_erc1155,
            });

            if let Some(token) = probe.erc20 {
                fragment.erc20_tokens.push(token);
            }
            if let Some(token) = probe.erc721 {
                fragment.erc721_tokens.push(token);
            }
            if let Some(token) = probe.erc1155 {
                fragment.erc1155_tokens.push(token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::cli::Cli;
    use crate::config::Config;

    fn test_assembler() -> Assembler {
        let cli = Cli {
            command: None,
            rpc_url: Some("http://localhost:8545".into()),
            ws_url: None,
            database_url: Some("postgres://x".into()),
            rpc_timeout_ms: None,
            retry_attempts: None,
            retry_delay_ms: None,
            max_rpc_batch: None,
            blocks_per_batch: None,
            parallel_requests: None,
            writer_concurrency: None,
            write_batch_size: None,
            queue_high_water: None,
            checkpoint_interval: None,
            tip_refresh_interval: None,
            ws_watchdog_ms: None,
            poll_interval_ms: None,
            log: None,
        };
        let config = Config::resolve(&cli).expect("test config resolves");
        let rpc = RpcClient::new(&config).expect("rpc client builds against a bare url");
        Assembler::new(rpc, Registry::default(), 3)
    }

    fn base_log(topic0: &str) -> Log {
        Log {
            transaction_hash: "0xtx".into(),
            block_number: 10,
            log_index: 0,
            address: "0xcontract000000000000000000000000000000".into(),
            data: String::new(),
            topic0: Some(topic0.to_string()),
            topic1: None,
            topic2: None,
            topic3: None,
            removed: false,
            decoded: Default::default(),
        }
    }

    fn topic_address(addr_byte: u8) -> String {
        let mut bytes = [0u8; 32];
        bytes[31] = addr_byte;
        format!("0x{}", hex::encode(bytes))
    }

    #[test]
    fn extract_transfer_recognizes_erc20_by_three_topics() {
        let assembler = test_assembler();
        let transfer_topic0 = decode::registry::keccak_topic0("Transfer(address,address,uint256)");
        let mut log = base_log(&transfer_topic0);
        log.topic1 = Some(topic_address(1));
        log.topic2 = Some(topic_address(2));
        log.data = format!("0x{:0>64x}", 500u64);

        let mut fragment = BlockFragment::default();
        assembler.extract_transfer(&log, &mut fragment);

        assert_eq!(fragment.erc20_transfers.len(), 1);
        assert!(fragment.erc721_transfers.is_empty());
        let row = &fragment.erc20_transfers[0];
        assert_eq!(row.from_address, addr_from_topic(&topic_address(1)));
        assert_eq!(row.to_address, addr_from_topic(&topic_address(2)));
    }

    #[test]
    fn extract_transfer_recognizes_erc721_by_four_topics() {
        let assembler = test_assembler();
        let transfer_topic0 = decode::registry::keccak_topic0("Transfer(address,address,uint256)");
        let mut log = base_log(&transfer_topic0);
        log.topic1 = Some(topic_address(1));
        log.topic2 = Some(topic_address(2));
        log.topic3 = Some(format!("0x{:0>64x}", 0xff));

        let mut fragment = BlockFragment::default();
        assembler.extract_transfer(&log, &mut fragment);

        assert!(fragment.erc20_transfers.is_empty());
        assert_eq!(fragment.erc721_transfers.len(), 1);
        assert_eq!(fragment.erc721_transfers[0].token_id, format!("0x{:0>64x}", 0xff));
    }

    #[test]
    fn extract_transfer_recognizes_erc1155_transfer_single() {
        let assembler = test_assembler();
        let transfer_single_topic0 =
            decode::registry::keccak_topic0("TransferSingle(address,address,address,uint256,uint256)");
        let mut log = base_log(&transfer_single_topic0);
        log.topic1 = Some(topic_address(9)); // operator
        log.topic2 = Some(topic_address(1)); // from
        log.topic3 = Some(topic_address(2)); // to
        log.data = format!("{:0>64x}{:0>64x}", 7u64, 42u64);

        let mut fragment = BlockFragment::default();
        assembler.extract_transfer(&log, &mut fragment);

        assert_eq!(fragment.erc1155_transfers.len(), 1);
        let row = &fragment.erc1155_transfers[0];
        assert_eq!(row.token_id, "7");
        assert_eq!(row.value, "42");
        assert_eq!(row.operator, addr_from_topic(&topic_address(9)));
    }

    #[test]
    fn extract_transfer_ignores_unrelated_events() {
        let assembler = test_assembler();
        let mut log = base_log("0xdeadbeef");
        log.topic1 = Some(topic_address(1));

        let mut fragment = BlockFragment::default();
        assembler.extract_transfer(&log, &mut fragment);

        assert!(fragment.erc20_transfers.is_empty());
        assert!(fragment.erc721_transfers.is_empty());
        assert!(fragment.erc1155_transfers.is_empty());
    }
}
