use crate::error::CommitError;
use crate::journal::{Block, Identifier, Transaction};
use crate::ledger::{JournalSink, LedgerSource, LedgerView};
use anyhow::{Context, Result};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;

// Values are bincode encoded then zstd compressed.

const CF_BLOCK: &str = "block";
const CF_TRANSACTION: &str = "transaction";
const CF_PENDING: &str = "pending"; // seq (be u64) -> transaction id
const CF_CHAIN: &str = "chain";     // height (be u64) -> block id
const CF_META: &str = "meta";

const HEAD_KEY: &[u8] = b"head";
const HEIGHT_KEY: &[u8] = b"height";
const PENDING_SEQ_KEY: &[u8] = b"pending_seq";

const ZSTD_LEVEL: i32 = 3;

/// RocksDB-backed journal.
pub struct Store {
    pub db: DB,
    path: String,
}

fn unexpected(e: anyhow::Error) -> CommitError {
    CommitError::Unexpected(e.to_string())
}

impl Store {
    pub fn open(base_path: &str) -> Result<Self> {
        let cf_names = ["default", CF_BLOCK, CF_TRANSACTION, CF_PENDING, CF_CHAIN, CF_META];

        let mut cf_opts = Options::default();
        cf_opts.set_write_buffer_size(32 * 1024 * 1024);
        cf_opts.set_max_write_buffer_number(2);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_bytes_per_sync(8 * 1024 * 1024);
        db_opts.set_max_open_files(512);
        db_opts.set_keep_log_file_num(10);

        std::fs::create_dir_all(base_path)
            .with_context(|| format!("Failed to create journal directory '{base_path}'"))?;
        let db = DB::open_cf_descriptors(&db_opts, base_path, cf_descriptors)
            .with_context(|| format!("Failed to open journal database at '{base_path}'"))?;

        tracing::debug!(path = %base_path, "journal database opened");
        Ok(Store { db, path: base_path.to_string() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", name))
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let raw = bincode::serialize(value).context("Failed to serialize value")?;
        zstd::encode_all(&raw[..], ZSTD_LEVEL).context("Failed to compress value")
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        let raw = zstd::decode_all(bytes).context("Failed to decompress value")?;
        bincode::deserialize(&raw).context("Failed to deserialize value")
    }

    pub fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let data = Self::encode(value)?;
        self.db
            .put_cf(self.cf(cf)?, key, data)
            .with_context(|| format!("Failed to PUT key '{key:?}' in CF '{cf}'"))
    }

    pub fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(value) => Ok(Some(
                Self::decode(&value).with_context(|| format!("Corrupt value for key '{key:?}' in CF '{cf}'"))?,
            )),
            None => Ok(None),
        }
    }

    fn contains(&self, cf: &str, key: &[u8]) -> Result<bool> {
        Ok(self.db.get_cf(self.cf(cf)?, key)?.is_some())
    }

    pub fn head_id(&self) -> Result<Option<Identifier>> {
        self.get(CF_META, HEAD_KEY)
    }

    pub fn chain_len(&self) -> Result<u64> {
        Ok(self.get::<u64>(CF_META, HEIGHT_KEY)?.unwrap_or(0))
    }

    /// Committed block ids, oldest first.
    pub fn chain(&self) -> Result<Vec<Identifier>> {
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_CHAIN)?, IteratorMode::Start) {
            let (_height, value) = item?;
            ids.push(Self::decode(&value)?);
        }
        Ok(ids)
    }

    /// Pending transaction entries as (key, id), in staging order.
    fn pending_entries(&self) -> Result<Vec<(Vec<u8>, Identifier)>> {
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_PENDING)?, IteratorMode::Start) {
            let (key, value) = item?;
            entries.push((key.to_vec(), Self::decode(&value)?));
        }
        Ok(entries)
    }

    pub fn pending(&self) -> Result<Vec<Identifier>> {
        Ok(self.pending_entries()?.into_iter().map(|(_, id)| id).collect())
    }

    /// Force flush all memtables and the WAL to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("Failed to flush database")?;
        if let Err(e) = self.db.flush_wal(true) {
            tracing::warn!(error = %e, "WAL flush failed (non-critical)");
        }
        Ok(())
    }

    fn stage(&self, txn: &Transaction) -> Result<()> {
        let key = txn.id.as_str().as_bytes();
        if self.contains(CF_TRANSACTION, key)? {
            return Ok(());
        }
        let seq = self.get::<u64>(CF_META, PENDING_SEQ_KEY)?.unwrap_or(0);
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_TRANSACTION)?, key, Self::encode(txn)?);
        batch.put_cf(self.cf(CF_PENDING)?, seq.to_be_bytes(), Self::encode(&txn.id)?);
        batch.put_cf(self.cf(CF_META)?, PENDING_SEQ_KEY, Self::encode(&(seq + 1))?);
        self.db.write(batch).context("Failed to stage transaction")
    }

    fn commit(&self, block: &Block) -> Result<()> {
        let height = self.chain_len()?;
        let included: HashSet<&Identifier> = block.transaction_ids.iter().collect();

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_BLOCK)?, block.id.as_str().as_bytes(), Self::encode(block)?);
        batch.put_cf(self.cf(CF_CHAIN)?, height.to_be_bytes(), Self::encode(&block.id)?);
        batch.put_cf(self.cf(CF_META)?, HEAD_KEY, Self::encode(&block.id)?);
        batch.put_cf(self.cf(CF_META)?, HEIGHT_KEY, Self::encode(&(height + 1))?);
        for (key, id) in self.pending_entries()? {
            if included.contains(&id) {
                batch.delete_cf(self.cf(CF_PENDING)?, key);
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db.write_opt(batch, &write_opts).context("Failed to commit block")
    }
}

impl LedgerView for Store {
    fn has_block(&self, id: &Identifier) -> bool {
        self.contains(CF_BLOCK, id.as_str().as_bytes()).unwrap_or_else(|e| {
            tracing::warn!(block = %id.short(), error = %e, "block lookup failed");
            false
        })
    }

    fn block(&self, id: &Identifier) -> Option<Block> {
        self.get(CF_BLOCK, id.as_str().as_bytes()).unwrap_or_else(|e| {
            tracing::warn!(block = %id.short(), error = %e, "block read failed");
            None
        })
    }

    fn has_transaction(&self, id: &Identifier) -> bool {
        self.contains(CF_TRANSACTION, id.as_str().as_bytes()).unwrap_or_else(|e| {
            tracing::warn!(transaction = %id.short(), error = %e, "transaction lookup failed");
            false
        })
    }

    fn transaction(&self, id: &Identifier) -> Option<Transaction> {
        self.get(CF_TRANSACTION, id.as_str().as_bytes()).unwrap_or_else(|e| {
            tracing::warn!(transaction = %id.short(), error = %e, "transaction read failed");
            None
        })
    }
}

impl LedgerSource for Store {
    fn block_ids(&self) -> Vec<Identifier> {
        self.chain().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not list chain");
            Vec::new()
        })
    }

    fn pending_ids(&self) -> Vec<Identifier> {
        self.pending().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not list pending transactions");
            Vec::new()
        })
    }
}

impl JournalSink for Store {
    fn stage_transaction(&mut self, txn: Transaction) -> Result<(), CommitError> {
        self.stage(&txn).map_err(unexpected)
    }

    fn commit_block(&mut self, block: Block) -> Result<(), CommitError> {
        if self.contains(CF_BLOCK, block.id.as_str().as_bytes()).map_err(unexpected)? {
            return Ok(());
        }
        let head = self.head_id().map_err(unexpected)?;
        if block.previous != head {
            return Err(CommitError::Violation(format!(
                "block {} does not extend head {}",
                block.id.short(),
                head.as_ref().map_or("<none>", |h| h.short())
            )));
        }
        for txn_id in &block.transaction_ids {
            if !self.contains(CF_TRANSACTION, txn_id.as_str().as_bytes()).map_err(unexpected)? {
                return Err(CommitError::Violation(format!(
                    "block {} references unknown transaction {}",
                    block.id.short(),
                    txn_id.short()
                )));
            }
        }
        self.commit(&block).map_err(unexpected)
    }

    fn head(&self) -> Option<Identifier> {
        self.head_id().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not read head");
            None
        })
    }

    fn persisted_block_count(&self) -> usize {
        self.chain_len().map(|n| n as usize).unwrap_or(0)
    }
}
