use thiserror::Error;

/// アプリケーション全体で使用される統一エラー型
///
/// ストア層・サービス層・コマンド層のすべての失敗はこの型で上位へ報告される。
/// どのエラーもプロセスにとって致命的ではなく、失敗した操作は後続の操作に影響しない。
#[derive(Debug, Error)]
pub enum AppError {
    /// "MM-YYYY" 形式ではない期間文字列
    #[error("日付形式エラー: {field} = {value:?}（MM-YYYY形式で指定してください）")]
    InvalidDateFormat { field: String, value: String },

    /// エンティティ構築・更新時の入力不正
    #[error("サブスクリプションデータが不正です: {0}")]
    InvalidSubscriptionData(String),

    /// ユーザーIDの形式不正
    #[error("ユーザーIDが不正です: {0}")]
    InvalidUserId(String),

    /// サブスクリプションIDの形式不正
    #[error("サブスクリプションIDが不正です: {0}")]
    InvalidSubscriptionId(String),

    /// 集計期間の指定不正（欠落または終了が開始より前）
    #[error("期間指定が不正です: {0}")]
    InvalidDateRange(String),

    /// リソースが見つからない場合のエラー
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// バックエンドに到達できない、またはステートメントが失敗した
    #[error("ストレージエラー（{operation}）: {message}")]
    Storage { operation: String, message: String },

    /// 設定関連のエラー
    #[error("設定エラー: {0}")]
    Configuration(String),

    /// I/O関連のエラー
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),
}

/// エラーの重要度を表す列挙型
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    /// 低重要度（ユーザー入力エラーなど）
    Low,
    /// 中重要度（I/Oの一時的なエラーなど）
    Medium,
    /// 高重要度（データベースエラーなど）
    High,
}

impl AppError {
    /// ユーザーに表示するためのフレンドリーなメッセージを取得
    ///
    /// # 戻り値
    /// ユーザーに表示可能なエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidDateFormat { field, .. } => {
                format!("{field} はMM-YYYY形式で入力してください")
            }
            AppError::InvalidSubscriptionData(msg) => msg.clone(),
            AppError::InvalidUserId(_) => "ユーザーIDが不正です".to_string(),
            AppError::InvalidSubscriptionId(_) => "サブスクリプションIDが不正です".to_string(),
            AppError::InvalidDateRange(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Storage { .. } => "データベース操作でエラーが発生しました".to_string(),
            AppError::Configuration(_) => "設定エラーが発生しました".to_string(),
            AppError::Io(_) => "ファイル操作でエラーが発生しました".to_string(),
        }
    }

    /// エラーの詳細情報を取得（ログ出力用）
    pub fn details(&self) -> String {
        format!("{self}")
    }

    /// エラーの重要度を取得
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::InvalidDateFormat { .. }
            | AppError::InvalidSubscriptionData(_)
            | AppError::InvalidUserId(_)
            | AppError::InvalidSubscriptionId(_)
            | AppError::InvalidDateRange(_)
            | AppError::NotFound(_) => ErrorSeverity::Low,
            AppError::Io(_) => ErrorSeverity::Medium,
            AppError::Storage { .. } | AppError::Configuration(_) => ErrorSeverity::High,
        }
    }

    /// 呼び出し側の入力に起因するエラーかどうか
    ///
    /// トランスポート層はこれを使ってクライアントエラーとサーバーエラーを振り分ける。
    pub fn is_client_error(&self) -> bool {
        self.severity() == ErrorSeverity::Low
    }

    /// 日付形式エラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `field` - 問題のあったフィールド名
    /// * `value` - 入力された値
    pub fn invalid_date_format<F: Into<String>, V: Into<String>>(field: F, value: V) -> Self {
        AppError::InvalidDateFormat {
            field: field.into(),
            value: value.into(),
        }
    }

    /// データ不正エラーを作成するヘルパー関数
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        AppError::InvalidSubscriptionData(message.into())
    }

    /// 期間指定エラーを作成するヘルパー関数
    pub fn invalid_range<S: Into<String>>(message: S) -> Self {
        AppError::InvalidDateRange(message.into())
    }

    /// リソース未発見エラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `resource` - 見つからなかったリソース名
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        AppError::NotFound(format!("{}が見つかりません", resource.into()))
    }

    /// ストレージエラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `operation` - 失敗した操作名
    /// * `message` - エラーメッセージ
    pub fn storage<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        AppError::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// 設定エラーを作成するヘルパー関数
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        AppError::Configuration(message.into())
    }

    /// 操作名を付け替える（ストレージエラーのみ対象）
    ///
    /// `From<rusqlite::Error>` 経由で生成されたエラーは操作名を持たないため、
    /// リポジトリ側で失敗した操作名を補う。
    pub fn during(self, operation: &str) -> Self {
        match self {
            AppError::Storage { message, .. } => AppError::Storage {
                operation: operation.to_string(),
                message,
            },
            other => other,
        }
    }
}

/// AppErrorからStringへの変換（トランスポート層での使用のため）
impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.user_message()
    }
}

/// rusqlite::ErrorからAppErrorへの変換
///
/// 制約違反（終了日が開始日より前など）は入力不正として扱う。
impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AppError::InvalidSubscriptionData(format!("制約違反: {error}"))
            }
            other => AppError::storage("database", other.to_string()),
        }
    }
}

/// r2d2::ErrorからAppErrorへの変換（接続の取得失敗）
impl From<r2d2::Error> for AppError {
    fn from(error: r2d2::Error) -> Self {
        AppError::storage("connection", error.to_string())
    }
}

/// Result型のエイリアス（アプリケーション全体で使用）
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        // 各エラータイプの重要度をテスト
        assert_eq!(
            AppError::invalid_date_format("start_date", "2024-02").severity(),
            ErrorSeverity::Low
        );
        assert_eq!(
            AppError::not_found("サブスクリプション").severity(),
            ErrorSeverity::Low
        );
        assert_eq!(
            AppError::storage("create", "disk I/O error").severity(),
            ErrorSeverity::High
        );
        assert_eq!(
            AppError::configuration("DATABASE_POOL_SIZE").severity(),
            ErrorSeverity::High
        );
    }

    #[test]
    fn test_user_message() {
        let data_error = AppError::invalid_data("サービス名を入力してください");
        assert_eq!(data_error.user_message(), "サービス名を入力してください");

        let not_found_error = AppError::not_found("サブスクリプション");
        assert_eq!(
            not_found_error.user_message(),
            "サブスクリプションが見つかりません"
        );

        // ストレージエラーは内部詳細を隠す
        let storage_error = AppError::storage("delete", "database is locked");
        assert_eq!(
            storage_error.user_message(),
            "データベース操作でエラーが発生しました"
        );
        assert!(storage_error.details().contains("database is locked"));
        assert!(storage_error.details().contains("delete"));
    }

    #[test]
    fn test_date_format_error_names_field() {
        let error = AppError::invalid_date_format("end_date", "13-2024");
        assert!(error.user_message().contains("end_date"));
        assert!(error.details().contains("13-2024"));
    }

    #[test]
    fn test_during_renames_storage_operation_only() {
        let error = AppError::storage("database", "no such table").during("list_all");
        assert!(matches!(
            error,
            AppError::Storage { ref operation, .. } if operation == "list_all"
        ));

        let error = AppError::not_found("x").during("list_all");
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[test]
    fn test_rusqlite_conversion() {
        let error: AppError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(error, AppError::Storage { .. }));
        assert!(!error.is_client_error());
    }

    #[test]
    fn test_string_conversion() {
        let error = AppError::invalid_range("終了期間は開始期間以降である必要があります");
        let error_string: String = error.into();
        assert_eq!(error_string, "終了期間は開始期間以降である必要があります");
    }
}
