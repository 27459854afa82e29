use crate::shared::errors::{AppError, AppResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// インメモリデータベースを指定する `DATABASE_PATH` の値
pub const IN_MEMORY_DATABASE: &str = ":memory:";

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// アプリケーションの実行環境を表す列挙型
#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    /// 開発環境
    Development,
    /// プロダクション環境
    Production,
}

/// 環境設定を管理する構造体
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// 実行環境
    pub environment: String,
    /// ログレベル
    pub log_level: String,
}

impl EnvironmentConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Self {
        let environment = get_environment();
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if environment == Environment::Development {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

        Self {
            environment: format!("{environment:?}").to_lowercase(),
            log_level,
        }
    }

    /// プロダクション環境かどうかを判定
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// ログレベル文字列を `log::LevelFilter` に変換する
    ///
    /// 不明な値は `Info` として扱う。
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.log_level.to_lowercase().as_str() {
            "error" => log::LevelFilter::Error,
            "warn" => log::LevelFilter::Warn,
            "info" => log::LevelFilter::Info,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Info,
        }
    }
}

/// データベースの配置場所
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// ファイルに永続化する
    File(PathBuf),
    /// プロセス内のインメモリデータベース（テスト・一時利用向け）
    Memory,
}

/// データベース接続プールの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// データベースの配置場所
    pub location: DatabaseLocation,
    /// プールの最大接続数
    pub pool_size: u32,
    /// ロック競合時に待機する時間
    pub busy_timeout: Duration,
    /// プールから接続を取得する際の待機上限
    pub connection_timeout: Duration,
}

impl DatabaseConfig {
    /// インメモリデータベースの設定
    pub fn in_memory() -> Self {
        Self {
            location: DatabaseLocation::Memory,
            pool_size: 1,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
        }
    }

    /// ファイルデータベースの設定（その他は既定値）
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
            pool_size: DEFAULT_POOL_SIZE,
            ..Self::in_memory()
        }
    }

    /// 環境変数から設定を読み込む
    ///
    /// # 参照する環境変数
    /// - `DATABASE_PATH`: ファイルパス、または `:memory:`（省略時は環境ごとの既定ファイル）
    /// - `DATABASE_POOL_SIZE`: 最大接続数
    /// - `DATABASE_BUSY_TIMEOUT_MS`: ロック待機時間（ミリ秒）
    /// - `DATABASE_CONNECTION_TIMEOUT_SECS`: 接続取得の待機上限（秒）
    pub fn from_env(environment: Environment) -> AppResult<Self> {
        Self::from_lookup(environment, |key| std::env::var(key).ok())
    }

    /// 任意の参照関数から設定を読み込む
    pub fn from_lookup<F>(environment: Environment, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let location = match lookup("DATABASE_PATH") {
            Some(path) if path == IN_MEMORY_DATABASE => DatabaseLocation::Memory,
            Some(path) if !path.trim().is_empty() => DatabaseLocation::File(PathBuf::from(path)),
            _ => DatabaseLocation::File(
                PathBuf::from(DEFAULT_DATA_DIR).join(get_database_filename(environment)),
            ),
        };

        let pool_size = parse_var(&lookup, "DATABASE_POOL_SIZE", DEFAULT_POOL_SIZE)?;
        if pool_size == 0 {
            return Err(AppError::configuration(
                "DATABASE_POOL_SIZE は1以上である必要があります",
            ));
        }

        let busy_timeout_ms =
            parse_var(&lookup, "DATABASE_BUSY_TIMEOUT_MS", DEFAULT_BUSY_TIMEOUT_MS)?;
        let connection_timeout_secs = parse_var(
            &lookup,
            "DATABASE_CONNECTION_TIMEOUT_SECS",
            DEFAULT_CONNECTION_TIMEOUT_SECS,
        )?;

        Ok(Self {
            location,
            pool_size,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            connection_timeout: Duration::from_secs(connection_timeout_secs),
        })
    }
}

/// アプリケーション全体の設定
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: EnvironmentConfig,
    pub database: DatabaseConfig,
    /// 1回のストア操作に許す最大時間
    pub operation_timeout: Duration,
    /// データベースのヘルスチェック間隔
    pub health_check_interval: Duration,
}

impl AppConfig {
    /// 環境変数からすべての設定を読み込む
    ///
    /// # 戻り値
    /// 設定、または数値の形式が不正な場合は `Configuration` エラー
    pub fn from_env() -> AppResult<Self> {
        let environment = EnvironmentConfig::from_env();
        let database = DatabaseConfig::from_env(get_environment())?;
        let lookup = |key: &str| std::env::var(key).ok();
        let operation_timeout_secs = parse_var(
            &lookup,
            "OPERATION_TIMEOUT_SECS",
            DEFAULT_OPERATION_TIMEOUT_SECS,
        )?;
        let health_check_interval_secs = parse_var(
            &lookup,
            "HEALTH_CHECK_INTERVAL_SECS",
            DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
        )?;
        if health_check_interval_secs == 0 {
            return Err(AppError::configuration(
                "HEALTH_CHECK_INTERVAL_SECS は1以上である必要があります",
            ));
        }

        Ok(Self {
            environment,
            database,
            operation_timeout: Duration::from_secs(operation_timeout_secs),
            health_check_interval: Duration::from_secs(health_check_interval_secs),
        })
    }
}

/// 数値の環境変数を読み込む（未設定なら既定値）
fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::configuration(format!("{key} の値が不正です: {raw:?}"))
        }),
        None => Ok(default),
    }
}

/// 現在の実行環境を判定する
///
/// # 判定ロジック
/// 1. 実行時環境変数 ENVIRONMENT を確認
/// 2. デバッグビルドの場合は Development
/// 3. リリースビルドの場合は Production
pub fn get_environment() -> Environment {
    if let Ok(env_var) = std::env::var("ENVIRONMENT") {
        let env = match env_var.as_str() {
            "production" => Environment::Production,
            _ => Environment::Development,
        };
        log::debug!("環境判定: 実行時環境変数を使用 -> {env_var} -> {env:?}");
        return env;
    }

    // フォールバック: ビルド設定に基づく判定
    let env = if cfg!(debug_assertions) {
        Environment::Development
    } else {
        Environment::Production
    };
    log::debug!(
        "環境判定: ビルド設定を使用 -> debug_assertions={} -> {env:?}",
        cfg!(debug_assertions)
    );
    env
}

/// 環境に応じたデータベースファイル名を取得する
///
/// # ファイル名の規則
/// - 開発環境: "dev_subscriptions.db"
/// - プロダクション環境: "subscriptions.db"
pub fn get_database_filename(env: Environment) -> &'static str {
    match env {
        Environment::Development => "dev_subscriptions.db",
        Environment::Production => "subscriptions.db",
    }
}

/// 環境に応じた.envファイルを読み込む
///
/// 環境固有のファイルがなければデフォルトの.envを試し、
/// それもなければ直接設定された環境変数を使う。
pub fn load_environment_variables() {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

    let env_file = match environment.as_str() {
        "production" => ".env.production",
        _ => ".env",
    };

    match dotenv::from_filename(env_file) {
        Ok(_) => {
            log::info!("{env_file}ファイルを読み込みました");
        }
        Err(_) => {
            if env_file != ".env" && dotenv::dotenv().is_ok() {
                log::warn!("{env_file}が見つからないため、デフォルトの.envファイルを読み込みました");
            } else {
                log::warn!("環境変数ファイルが見つかりません。直接設定された環境変数を使用します。");
            }
        }
    }
}

/// ログシステムを初期化する
///
/// 2回目以降の呼び出し（テストなど）はすでに登録済みのロガーを維持する。
pub fn initialize_logging_system(env_config: &EnvironmentConfig) {
    let result = env_logger::Builder::from_default_env()
        .filter_level(env_config.level_filter())
        .format_timestamp_secs()
        .format_module_path(false)
        .format_target(false)
        .try_init();

    if result.is_ok() {
        log::info!(
            "ログシステムを初期化しました: level={}, environment={}",
            env_config.log_level,
            env_config.environment
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_get_database_filename() {
        assert_eq!(
            get_database_filename(Environment::Development),
            "dev_subscriptions.db"
        );
        assert_eq!(
            get_database_filename(Environment::Production),
            "subscriptions.db"
        );
    }

    #[test]
    fn test_get_environment() {
        let env = get_environment();
        assert!(matches!(
            env,
            Environment::Development | Environment::Production
        ));
    }

    #[test]
    fn test_environment_config_methods() {
        let dev_config = EnvironmentConfig {
            environment: "development".to_string(),
            log_level: "debug".to_string(),
        };

        let prod_config = EnvironmentConfig {
            environment: "production".to_string(),
            log_level: "verbose".to_string(),
        };

        assert!(!dev_config.is_production());
        assert_eq!(dev_config.level_filter(), log::LevelFilter::Debug);

        assert!(prod_config.is_production());
        // 不明なレベルはInfo
        assert_eq!(prod_config.level_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::from_lookup(Environment::Production, lookup_from(&[]))
            .unwrap();

        assert_eq!(
            config.location,
            DatabaseLocation::File(PathBuf::from("data").join("subscriptions.db"))
        );
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.busy_timeout, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));
    }

    #[test]
    fn test_database_config_overrides() {
        let config = DatabaseConfig::from_lookup(
            Environment::Development,
            lookup_from(&[
                ("DATABASE_PATH", "/var/lib/subs/app.db"),
                ("DATABASE_POOL_SIZE", "4"),
                ("DATABASE_BUSY_TIMEOUT_MS", "250"),
                ("DATABASE_CONNECTION_TIMEOUT_SECS", "2"),
            ]),
        )
        .unwrap();

        assert_eq!(
            config.location,
            DatabaseLocation::File(PathBuf::from("/var/lib/subs/app.db"))
        );
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.connection_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_database_config_in_memory() {
        let config = DatabaseConfig::from_lookup(
            Environment::Development,
            lookup_from(&[("DATABASE_PATH", IN_MEMORY_DATABASE)]),
        )
        .unwrap();
        assert_eq!(config.location, DatabaseLocation::Memory);
    }

    #[test]
    fn test_database_config_rejects_bad_numbers() {
        let result = DatabaseConfig::from_lookup(
            Environment::Development,
            lookup_from(&[("DATABASE_POOL_SIZE", "many")]),
        );
        assert!(matches!(result, Err(AppError::Configuration(_))));

        let result = DatabaseConfig::from_lookup(
            Environment::Development,
            lookup_from(&[("DATABASE_POOL_SIZE", "0")]),
        );
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_load_environment_variables() {
        // .envがなくてもパニックしない
        load_environment_variables();
    }
}
