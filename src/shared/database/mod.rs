/// 接続プールとスキーマ管理
pub mod connection;

pub use connection::{create_pool, create_tables, table_exists, DbConnection, DbPool};
