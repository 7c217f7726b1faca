//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `balances` - Per-user balance aggregate (key: user_id, big-endian)
//! - `transactions` - Ledger rows (key: transaction id)
//! - `indices` - Secondary indices:
//!   - `u | user_id | tx_id` -> empty (per-user history, UUIDv7 keeps it time-ordered)
//!   - `x | external_reference` -> tx_id (unique)
//!
//! Every mutation goes through [`Storage::commit`], which writes one
//! `WriteBatch`: either all staged rows land or none do.

use crate::{
    error::{Error, Result},
    types::{Balance, Transaction, TransactionId, UserId},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use uuid::Uuid;

/// Column family names
const CF_BALANCES: &str = "balances";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INDICES: &str = "indices";

/// Index key tags
const IDX_USER_TX: u8 = b'u';
const IDX_EXTERNAL_REF: u8 = b'x';

/// Rows staged by a unit of work, committed together
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Balances to overwrite
    pub balances: Vec<Balance>,
    /// Transactions appended in this unit
    pub inserted: Vec<Transaction>,
    /// Existing transactions whose status changed
    pub updated: Vec<Transaction>,
}

impl ChangeSet {
    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.inserted.is_empty() && self.updated.is_empty()
    }
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    sync_writes: bool,
    /// Serializes commits so external-reference uniqueness is checked and
    /// written without interleaving
    commit_lock: Mutex<()>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BALANCES, Self::cf_options_balances()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened token ledger store");

        Ok(Self {
            db,
            sync_writes: config.rocksdb.sync_writes,
            commit_lock: Mutex::new(()),
        })
    }

    // Column family options

    fn cf_options_balances() -> Options {
        let mut opts = Options::default();
        // Balances are read on every operation, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Balance operations

    /// Get balance row, `None` if the user has never been seen
    pub fn get_balance(&self, user_id: UserId) -> Result<Option<Balance>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, user_id.to_key())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All users that have a balance row
    pub fn balance_user_ids(&self) -> Result<Vec<UserId>> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let mut users = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let bytes: [u8; 8] = key[..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed balance key".to_string()))?;
            users.push(UserId::new(u64::from_be_bytes(bytes)));
        }
        Ok(users)
    }

    // Transaction operations

    /// Get transaction by ID
    pub fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Look up a transaction ID by its external reference
    pub fn transaction_id_by_external_reference(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, Self::index_key_external_ref(reference))? {
            Some(value) => {
                let bytes: [u8; 16] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Malformed external reference index".to_string()))?;
                Ok(Some(Uuid::from_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Transaction IDs for a user, newest first
    pub fn user_transaction_ids(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::index_key_user_tx(user_id, None);

        // Seek to the largest possible key under this user and walk backwards
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xFF; 16]);

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));

        let mut ids = Vec::new();
        for (position, item) in iter.enumerate() {
            let (key, _) = item?;
            if !key.starts_with(&prefix) || ids.len() == limit {
                break;
            }
            if position < offset {
                continue;
            }
            let bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("Malformed user index key".to_string()))?;
            ids.push(Uuid::from_bytes(bytes));
        }

        Ok(ids)
    }

    /// Transactions for a user, newest first
    pub fn user_transactions(
        &self,
        user_id: UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        self.user_transaction_ids(user_id, limit, offset)?
            .into_iter()
            .map(|id| {
                self.get_transaction(id)?.ok_or_else(|| {
                    Error::InvariantViolation(format!("Index points at missing transaction {}", id))
                })
            })
            .collect()
    }

    // Batch operations (atomic)

    /// Write a change set atomically
    ///
    /// New external references are checked for uniqueness inside the commit
    /// critical section, so two racing appends of one reference cannot both land.
    pub fn commit(&self, changes: &ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let cf_balances = self.cf_handle(CF_BALANCES)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let _guard = self.commit_lock.lock();

        let mut batch = WriteBatch::default();

        // 1. Balances
        for balance in &changes.balances {
            batch.put_cf(cf_balances, balance.user_id.to_key(), bincode::serialize(balance)?);
        }

        // 2. New transactions plus indices
        for tx in &changes.inserted {
            if let Some(reference) = &tx.external_reference {
                let key = Self::index_key_external_ref(reference);
                if self.db.get_cf(cf_indices, &key)?.is_some() {
                    return Err(Error::DuplicateExternalReference(reference.clone()));
                }
                batch.put_cf(cf_indices, &key, tx.id.as_bytes());
            }

            batch.put_cf(cf_transactions, tx.id.as_bytes(), bincode::serialize(tx)?);
            batch.put_cf(cf_indices, Self::index_key_user_tx(tx.user_id, Some(tx.id)), b"");
        }

        // 3. Status changes
        for tx in &changes.updated {
            batch.put_cf(cf_transactions, tx.id.as_bytes(), bincode::serialize(tx)?);
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        tracing::debug!(
            balances = changes.balances.len(),
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            "Change set committed"
        );

        Ok(())
    }

    // Index key helpers

    fn index_key_user_tx(user_id: UserId, tx_id: Option<TransactionId>) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 8 + 16);
        key.push(IDX_USER_TX);
        key.extend_from_slice(&user_id.to_key());
        if let Some(id) = tx_id {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    fn index_key_external_ref(reference: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + reference.len());
        key.push(IDX_EXTERNAL_REF);
        key.extend_from_slice(reference.as_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransactionStatus, TransactionType};
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_transaction(user: u64, reference: Option<&str>) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::now_v7(),
            user_id: UserId::new(user),
            tx_type: TransactionType::Purchase,
            amount: 100,
            external_reference: reference.map(str::to_string),
            counterparty_id: None,
            chapter_reference: None,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.db.cf_handle(CF_BALANCES).is_some());
        assert!(storage.db.cf_handle(CF_TRANSACTIONS).is_some());
        assert!(storage.db.cf_handle(CF_INDICES).is_some());
    }

    #[test]
    fn test_commit_and_read_back() {
        let (storage, _temp) = test_storage();

        let mut balance = Balance::zeroed(UserId::new(1));
        balance.balance = 42;
        let tx = test_transaction(1, Some("pi_123"));

        let changes = ChangeSet {
            balances: vec![balance.clone()],
            inserted: vec![tx.clone()],
            updated: vec![],
        };
        storage.commit(&changes).unwrap();

        assert_eq!(storage.get_balance(UserId::new(1)).unwrap(), Some(balance));
        assert_eq!(storage.get_transaction(tx.id).unwrap(), Some(tx.clone()));
        assert_eq!(
            storage.transaction_id_by_external_reference("pi_123").unwrap(),
            Some(tx.id)
        );
        assert_eq!(storage.get_balance(UserId::new(2)).unwrap(), None);
    }

    #[test]
    fn test_duplicate_external_reference_rejected_whole_batch() {
        let (storage, _temp) = test_storage();

        let first = test_transaction(1, Some("pi_dup"));
        storage
            .commit(&ChangeSet {
                inserted: vec![first],
                ..Default::default()
            })
            .unwrap();

        let mut balance = Balance::zeroed(UserId::new(9));
        balance.balance = 5;
        let second = test_transaction(9, Some("pi_dup"));
        let result = storage.commit(&ChangeSet {
            balances: vec![balance],
            inserted: vec![second.clone()],
            updated: vec![],
        });

        assert!(matches!(result, Err(Error::DuplicateExternalReference(_))));
        // Nothing from the rejected batch is visible
        assert_eq!(storage.get_balance(UserId::new(9)).unwrap(), None);
        assert_eq!(storage.get_transaction(second.id).unwrap(), None);
    }

    #[test]
    fn test_user_transactions_newest_first_with_paging() {
        let (storage, _temp) = test_storage();

        let mut ids = Vec::new();
        for _ in 0..5 {
            let tx = test_transaction(3, None);
            ids.push(tx.id);
            storage
                .commit(&ChangeSet {
                    inserted: vec![tx],
                    ..Default::default()
                })
                .unwrap();
        }
        // Another user's rows must not leak into the scan
        storage
            .commit(&ChangeSet {
                inserted: vec![test_transaction(4, None)],
                ..Default::default()
            })
            .unwrap();

        let newest_first: Vec<_> = ids.iter().rev().copied().collect();

        let all = storage.user_transaction_ids(UserId::new(3), 50, 0).unwrap();
        assert_eq!(all, newest_first);

        let page = storage.user_transaction_ids(UserId::new(3), 2, 1).unwrap();
        assert_eq!(page, newest_first[1..3].to_vec());

        assert!(storage.user_transaction_ids(UserId::new(5), 50, 0).unwrap().is_empty());
    }

    #[test]
    fn test_balance_user_ids() {
        let (storage, _temp) = test_storage();
        storage
            .commit(&ChangeSet {
                balances: vec![Balance::zeroed(UserId::new(2)), Balance::zeroed(UserId::new(300))],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            storage.balance_user_ids().unwrap(),
            vec![UserId::new(2), UserId::new(300)]
        );
    }
}
