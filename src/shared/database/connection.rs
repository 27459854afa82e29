use crate::shared::config::{DatabaseConfig, DatabaseLocation};
use crate::shared::errors::{AppError, AppResult};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// SQLite接続プール
///
/// プロセス起動時に `create_pool` で作成し、操作ごとに接続を取得する。
/// 取得した接続はスコープを抜けると（エラー経路を含めて）プールへ返却され、
/// プール自体を破棄するとすべての接続が閉じられる。
pub type DbPool = Pool<SqliteConnectionManager>;

/// プールから取得した接続
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// 接続プールを作成し、テーブルを準備する
///
/// # 引数
/// * `config` - データベース設定
///
/// # 戻り値
/// 接続プール、または失敗時はエラー
///
/// # 処理内容
/// 1. ファイルデータベースの場合は親ディレクトリを作成
/// 2. 接続ごとの初期化（ロック待機時間・WALモード）を設定
/// 3. プールを構築
/// 4. テーブルとインデックスを作成
pub fn create_pool(config: &DatabaseConfig) -> AppResult<DbPool> {
    let busy_timeout = config.busy_timeout;

    let (manager, max_size) = match &config.location {
        DatabaseLocation::File(path) => {
            ensure_parent_directory(path)?;
            (SqliteConnectionManager::file(path), config.pool_size)
        }
        DatabaseLocation::Memory => {
            // インメモリDBは接続ごとに別のデータベースになるため1接続に固定する
            if config.pool_size > 1 {
                log::warn!(
                    "インメモリデータベースのため接続数を1に制限します（設定値: {}）",
                    config.pool_size
                );
            }
            (SqliteConnectionManager::memory(), 1)
        }
    };

    let manager = manager.with_init(move |conn| configure_connection(conn, busy_timeout));

    let mut builder = Pool::builder()
        .max_size(max_size)
        .connection_timeout(config.connection_timeout);

    // インメモリDBは接続を閉じると内容が消えるため、接続を回収しない
    if config.location == DatabaseLocation::Memory {
        builder = builder.idle_timeout(None).max_lifetime(None);
    }

    let pool = builder
        .build(manager)
        .map_err(|e| AppError::storage("create_pool", e.to_string()))?;

    let conn = pool.get()?;
    create_tables(&conn)?;

    log::info!(
        "データベース接続プールを作成しました: location={:?}, max_size={}",
        config.location,
        max_size
    );

    Ok(pool)
}

/// 新しい接続ごとに適用する設定
fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
}

/// ファイルデータベースの親ディレクトリを作成する
fn ensure_parent_directory(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                log::error!("データディレクトリの作成に失敗しました: {parent:?}: {e}");
                AppError::Io(e)
            })?;
            log::info!("データディレクトリを作成しました: {:?}", parent);
        }
    }
    Ok(())
}

/// データベーステーブルを作成する
///
/// 何度呼び出しても安全（既存のテーブル・インデックスはそのまま）。
pub fn create_tables(conn: &Connection) -> AppResult<()> {
    create_subscriptions_table(conn)?;
    create_indexes(conn)?;
    Ok(())
}

/// サブスクリプションテーブルを作成する
///
/// 日付は `YYYY-MM-DD` 形式のテキストで保存するため、文字列比較が日付順と一致する。
fn create_subscriptions_table(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY NOT NULL,
            service_name TEXT NOT NULL CHECK(length(trim(service_name)) > 0),
            price INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK(end_date IS NULL OR end_date >= start_date)
        )",
        [],
    )
    .map_err(|e| AppError::from(e).during("create_tables"))?;

    Ok(())
}

/// インデックスを作成する
fn create_indexes(conn: &Connection) -> AppResult<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_user_id ON subscriptions(user_id)",
        [],
    )
    .map_err(|e| AppError::from(e).during("create_indexes"))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_period ON subscriptions(start_date, end_date)",
        [],
    )
    .map_err(|e| AppError::from(e).during("create_indexes"))?;

    Ok(())
}

/// テーブルが存在するかチェックする
pub fn table_exists(conn: &Connection, table_name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table_name],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}
