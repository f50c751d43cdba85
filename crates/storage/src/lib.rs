pub mod db;

pub use db::{create_db, insert_dvf_rows, DbPool, SqliteSaleSource, SqliteTransactionStore, StorageError};
