//! Writer workers: each cycle pops up to `write_batch_size` fragments off
//! the queue, stages them per `dedup::stage`, and writes every table
//! within **one** transaction, using `sqlx::QueryBuilder`'s
//! `push_values` for chunked bulk inserts.

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use crate::model::{
    AddressRecord, AddressTransaction, BlockHeader, Contract, Erc1155Token, Erc1155Transfer, Erc20Token,
    Erc20Transfer, Erc721Token, Erc721Transfer, Log, Transaction,
};
use crate::store::dedup::{chunk_by_placeholder_budget, StagedBatch};
use crate::store::error::WriteError;

/// Writes one staged batch inside a single Postgres transaction,
/// chunked per table so no statement's bound-parameter count exceeds
/// `placeholder_limit`. Commits once at the end; any failure rolls the
/// whole batch back (the `Transaction`'s `Drop` rolls back if `commit`
/// is never reached).
pub async fn write_batch(pool: &PgPool, batch: &StagedBatch, placeholder_limit: usize) -> Result<(), WriteError> {
    let mut tx = pool.begin().await?;

    write_blocks(&mut tx, &batch.blocks, placeholder_limit).await?;
    write_transactions(&mut tx, &batch.transactions, placeholder_limit).await?;
    write_logs(&mut tx, &batch.logs, placeholder_limit).await?;
    write_addresses(&mut tx, &batch.addresses, placeholder_limit).await?;
    write_address_transactions(&mut tx, &batch.address_transactions, placeholder_limit).await?;
    write_contracts(&mut tx, &batch.contracts, placeholder_limit).await?;
    write_erc20_tokens(&mut tx, &batch.erc20_tokens, placeholder_limit).await?;
    write_erc721_tokens(&mut tx, &batch.erc721_tokens, placeholder_limit).await?;
    write_erc1155_tokens(&mut tx, &batch.erc1155_tokens, placeholder_limit).await?;
    write_erc20_transfers(&mut tx, &batch.erc20_transfers, placeholder_limit).await?;
    write_erc721_transfers(&mut tx, &batch.erc721_transfers, placeholder_limit).await?;
    write_erc1155_transfers(&mut tx, &batch.erc1155_transfers, placeholder_limit).await?;

    tx.commit().await?;
    debug!(
        blocks = batch.blocks.len(),
        transactions = batch.transactions.len(),
        logs = batch.logs.len(),
        "write cycle transaction committed"
    );
    Ok(())
}

async fn write_blocks(conn: &mut PgConnection, rows: &[BlockHeader], placeholder_limit: usize) -> Result<(), WriteError> {
    const COLUMNS: usize = 10;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO blocks (number, hash, parent_hash, miner, timestamp, gas_limit, gas_used, size, \
             base_fee_per_gas, transaction_count) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(row.number as i64)
                .push_bind(&row.hash)
                .push_bind(&row.parent_hash)
                .push_bind(&row.miner)
                .push_bind(row.timestamp as i64)
                .push_bind(&row.gas_limit)
                .push_bind(&row.gas_used)
                .push_bind(row.size.map(|s| s as i64))
                .push_bind(&row.base_fee_per_gas)
                .push_bind(row.transaction_count as i32);
        });
        // ON CONFLICT (number) DO UPDATE: a later fragment for the same
        // block number (e.g. a reorg-unaware re-fetch) overwrites in
        // place rather than being skipped.
        qb.push(
            " ON CONFLICT (number) DO UPDATE SET hash = EXCLUDED.hash, parent_hash = EXCLUDED.parent_hash, \
             miner = EXCLUDED.miner, timestamp = EXCLUDED.timestamp, gas_limit = EXCLUDED.gas_limit, \
             gas_used = EXCLUDED.gas_used, size = EXCLUDED.size, base_fee_per_gas = EXCLUDED.base_fee_per_gas, \
             transaction_count = EXCLUDED.transaction_count",
        );
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged blocks chunk");
    }
    Ok(())
}

async fn write_transactions(
    conn: &mut PgConnection,
    rows: &[Transaction],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 20;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO transactions (hash, block_number, transaction_index, from_address, to_address, value, \
             gas, gas_price, max_fee_per_gas, max_priority_fee_per_gas, input, nonce, tx_type, chain_id, status, \
             gas_used, cumulative_gas_used, effective_gas_price, contract_address, logs_count) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.hash)
                .push_bind(row.block_number as i64)
                .push_bind(row.transaction_index as i32)
                .push_bind(&row.from_address)
                .push_bind(&row.to_address)
                .push_bind(&row.value)
                .push_bind(&row.gas)
                .push_bind(&row.gas_price)
                .push_bind(&row.max_fee_per_gas)
                .push_bind(&row.max_priority_fee_per_gas)
                .push_bind(&row.input)
                .push_bind(row.nonce as i64)
                .push_bind(row.tx_type as i32)
                .push_bind(row.chain_id.map(|c| c as i64))
                .push_bind(row.status.map(|s| s as i32))
                .push_bind(&row.gas_used)
                .push_bind(&row.cumulative_gas_used)
                .push_bind(&row.effective_gas_price)
                .push_bind(&row.contract_address)
                .push_bind(row.logs_count as i32);
        });
        qb.push(" ON CONFLICT (hash) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged transactions chunk");
    }
    Ok(())
}

async fn write_logs(conn: &mut PgConnection, rows: &[Log], placeholder_limit: usize) -> Result<(), WriteError> {
    const COLUMNS: usize = 12;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO logs (transaction_hash, block_number, log_index, address, data, topic0, topic1, topic2, \
             topic3, event_name, canonical_signature, decoded_params) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.transaction_hash)
                .push_bind(row.block_number as i64)
                .push_bind(row.log_index as i32)
                .push_bind(&row.address)
                .push_bind(&row.data)
                .push_bind(&row.topic0)
                .push_bind(&row.topic1)
                .push_bind(&row.topic2)
                .push_bind(&row.topic3)
                .push_bind(&row.decoded.event_name)
                .push_bind(&row.decoded.canonical_signature)
                .push_bind(&row.decoded.decoded_params);
        });
        // No unique constraint by design; duplicates within or across
        // batches are allowed.
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged logs chunk");
    }
    Ok(())
}

async fn write_addresses(
    conn: &mut PgConnection,
    rows: &[AddressRecord],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 5;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO addresses (address, first_seen_block, first_seen_tx, is_contract, balance) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.address)
                .push_bind(row.first_seen_block as i64)
                .push_bind(&row.first_seen_tx)
                .push_bind(row.is_contract)
                .push_bind(&row.balance);
        });
        qb.push(
            " ON CONFLICT (address) DO UPDATE SET tx_count = addresses.tx_count + 1, \
             is_contract = addresses.is_contract OR EXCLUDED.is_contract",
        );
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged addresses chunk");
    }
    Ok(())
}

async fn write_address_transactions(
    conn: &mut PgConnection,
    rows: &[AddressTransaction],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 5;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO address_transactions (address, transaction_hash, block_number, is_from, is_to) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.address)
                .push_bind(&row.transaction_hash)
                .push_bind(row.block_number as i64)
                .push_bind(row.is_from)
                .push_bind(row.is_to);
        });
        qb.push(
            " ON CONFLICT (address, transaction_hash) DO UPDATE SET \
             is_from = address_transactions.is_from OR EXCLUDED.is_from, \
             is_to = address_transactions.is_to OR EXCLUDED.is_to",
        );
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged address_transactions chunk");
    }
    Ok(())
}

async fn write_contracts(conn: &mut PgConnection, rows: &[Contract], placeholder_limit: usize) -> Result<(), WriteError> {
    const COLUMNS: usize = 8;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO contracts (address, creator_address, creation_tx_hash, creation_block_number, bytecode, \
             is_erc20, is_erc721, is_erc1155) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.address)
                .push_bind(&row.creator_address)
                .push_bind(&row.creation_tx_hash)
                .push_bind(row.creation_block_number as i64)
                .push_bind(&row.bytecode)
                .push_bind(row.is_erc20)
                .push_bind(row.is_erc721)
                .push_bind(row.is_erc1155);
        });
        qb.push(" ON CONFLICT (address) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged contracts chunk");
    }
    Ok(())
}

async fn write_erc20_tokens(
    conn: &mut PgConnection,
    rows: &[Erc20Token],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 5;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO erc20_tokens (address, name, symbol, decimals, total_supply) ");
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.address)
                .push_bind(&row.name)
                .push_bind(&row.symbol)
                .push_bind(row.decimals.map(|d| d as i16))
                .push_bind(&row.total_supply);
        });
        qb.push(" ON CONFLICT (address) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged erc20_tokens chunk");
    }
    Ok(())
}

async fn write_erc721_tokens(
    conn: &mut PgConnection,
    rows: &[Erc721Token],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 4;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO erc721_tokens (address, name, symbol, total_supply) ");
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.address)
                .push_bind(&row.name)
                .push_bind(&row.symbol)
                .push_bind(&row.total_supply);
        });
        qb.push(" ON CONFLICT (address) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged erc721_tokens chunk");
    }
    Ok(())
}

async fn write_erc1155_tokens(
    conn: &mut PgConnection,
    rows: &[Erc1155Token],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 2;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("INSERT INTO erc1155_tokens (address, uri) ");
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.address).push_bind(&row.uri);
        });
        qb.push(" ON CONFLICT (address) DO NOTHING");
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged erc1155_tokens chunk");
    }
    Ok(())
}

async fn write_erc20_transfers(
    conn: &mut PgConnection,
    rows: &[Erc20Transfer],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 7;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO erc20_transfers (transaction_hash, log_index, block_number, contract_address, \
             from_address, to_address, value) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.transaction_hash)
                .push_bind(row.log_index as i32)
                .push_bind(row.block_number as i64)
                .push_bind(&row.contract_address)
                .push_bind(&row.from_address)
                .push_bind(&row.to_address)
                .push_bind(&row.value);
        });
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged erc20_transfers chunk");
    }
    Ok(())
}

async fn write_erc721_transfers(
    conn: &mut PgConnection,
    rows: &[Erc721Transfer],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 7;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO erc721_transfers (transaction_hash, log_index, block_number, contract_address, \
             from_address, to_address, token_id) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.transaction_hash)
                .push_bind(row.log_index as i32)
                .push_bind(row.block_number as i64)
                .push_bind(&row.contract_address)
                .push_bind(&row.from_address)
                .push_bind(&row.to_address)
                .push_bind(&row.token_id);
        });
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged erc721_transfers chunk");
    }
    Ok(())
}

async fn write_erc1155_transfers(
    conn: &mut PgConnection,
    rows: &[Erc1155Transfer],
    placeholder_limit: usize,
) -> Result<(), WriteError> {
    const COLUMNS: usize = 9;
    for chunk in chunk_by_placeholder_budget(rows, COLUMNS, placeholder_limit) {
        if chunk.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO erc1155_transfers (transaction_hash, log_index, block_number, contract_address, \
             operator, from_address, to_address, token_id, value) ",
        );
        qb.push_values(chunk.iter(), |mut b, row| {
            b.push_bind(&row.transaction_hash)
                .push_bind(row.log_index as i32)
                .push_bind(row.block_number as i64)
                .push_bind(&row.contract_address)
                .push_bind(&row.operator)
                .push_bind(&row.from_address)
                .push_bind(&row.to_address)
                .push_bind(&row.token_id)
                .push_bind(&row.value);
        });
        qb.build().execute(&mut *conn).await?;
        debug!(rows = chunk.len(), "staged erc1155_transfers chunk");
    }
    Ok(())
}

/// Logs a retry decision; extracted so `queue.rs` doesn't need to know
/// about `tracing` field names.
pub fn log_retry(attempt: u32, error: &WriteError) {
    warn!(attempt, error = %error, "re-enqueueing batch after transient write failure");
}
