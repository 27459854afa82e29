pub mod features;
pub mod shared;

use features::subscriptions::{SqliteSubscriptionStore, SubscriptionManager};
use log::{error, info, warn};
use shared::config::{
    initialize_logging_system, load_environment_variables, AppConfig, DatabaseLocation,
};
use shared::database::{create_pool, DbPool};
use shared::errors::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// SQLiteバックエンドを使う管理サービス
pub type SqliteSubscriptionManager = SubscriptionManager<SqliteSubscriptionStore>;

/// アプリケーション状態（接続プールと管理サービスを保持）
///
/// プロセス起動時に1度だけ作成し、各リクエストから共有する。
pub struct SubscriptionApp {
    pool: DbPool,
    manager: SqliteSubscriptionManager,
    health_check_interval: Duration,
    health_monitor: Option<JoinHandle<()>>,
}

impl SubscriptionApp {
    /// 環境変数（.envを含む）から設定を読み込んで初期化する
    ///
    /// # 処理内容
    /// 1. .envファイルを読み込む
    /// 2. 設定を解析する
    /// 3. ログシステムを初期化する
    /// 4. 接続プールと管理サービスを作成する
    pub fn from_env() -> AppResult<Self> {
        load_environment_variables();

        let config = AppConfig::from_env()?;
        initialize_logging_system(&config.environment);

        Self::initialize(config)
    }

    /// 設定を指定して初期化する
    ///
    /// # 引数
    /// * `config` - アプリケーション設定
    ///
    /// # 戻り値
    /// 初期化済みのアプリケーション、またはデータベースの準備に失敗した場合はエラー
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        info!(
            "アプリケーション初期化を開始します: environment={}",
            config.environment.environment
        );

        let in_memory = config.database.location == DatabaseLocation::Memory;
        if config.environment.is_production() && in_memory {
            warn!("本番環境でインメモリデータベースが指定されています。終了時にデータは失われます");
        }

        let pool = create_pool(&config.database).map_err(|e| {
            error!("データベースの初期化に失敗しました: {}", e.details());
            e
        })?;

        let store = Arc::new(SqliteSubscriptionStore::new(pool.clone()));
        let manager = SubscriptionManager::new(store, config.operation_timeout);

        info!("アプリケーション初期化が完了しました");

        Ok(Self {
            pool,
            manager,
            health_check_interval: config.health_check_interval,
            health_monitor: None,
        })
    }

    /// 管理サービスへの参照
    pub fn manager(&self) -> &SqliteSubscriptionManager {
        &self.manager
    }

    /// 接続プールの状態（接続数、アイドル数）
    pub fn pool_state(&self) -> (u32, u32) {
        let state = self.pool.state();
        (state.connections, state.idle_connections)
    }

    /// データベースに到達できるかを確認する
    ///
    /// # 戻り値
    /// 接続を取得して `SELECT 1` が成功すれば `Ok(())`
    pub fn health_check(&self) -> AppResult<()> {
        check_database(&self.pool)
    }

    /// 定期的なヘルスチェックをバックグラウンドで開始する
    ///
    /// Tokioランタイム上で呼び出す必要がある。失敗はログに記録するだけで、
    /// アプリケーションは停止しない。すでに開始済みの場合は何もしない。
    pub fn start_health_monitor(&mut self) {
        if self.health_monitor.is_some() {
            return;
        }

        let pool = self.pool.clone();
        let period = self.health_check_interval;
        info!("ヘルスチェックを開始します: interval={period:?}");

        self.health_monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 最初のtickは即座に完了するため読み捨てる
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pool = pool.clone();
                match tokio::task::spawn_blocking(move || check_database(&pool)).await {
                    Ok(Ok(())) => log::debug!("データベースのヘルスチェックに成功しました"),
                    Ok(Err(e)) => {
                        error!("データベースのヘルスチェックに失敗しました: {}", e.details())
                    }
                    Err(e) => error!("ヘルスチェックのタスクが異常終了しました: {e}"),
                }
            }
        }));
    }

    /// アプリケーションを終了し、接続プールを閉じる
    ///
    /// 管理サービスのクローンが残っている場合、それらが破棄された時点で接続が閉じられる。
    pub fn shutdown(mut self) {
        if let Some(monitor) = self.health_monitor.take() {
            monitor.abort();
        }
        let (connections, idle) = self.pool_state();
        info!("アプリケーションを終了します: connections={connections}, idle={idle}");
        drop(self.manager);
        drop(self.pool);
    }
}

fn check_database(pool: &DbPool) -> AppResult<()> {
    let conn = pool.get().map_err(|e| AppError::from(e).during("health_check"))?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map(|_| ())
        .map_err(|e| AppError::from(e).during("health_check"))
}
