/// サブスクリプション機能モジュール
///
/// - 月単位の期間を持つサブスクリプションの作成、取得、部分更新、削除
/// - 期間・ユーザー・サービス名による合計金額の集計
/// - 永続化バックエンド（SQLite / メモリ）の差し替え
pub mod cancellation;
pub mod commands;
pub mod memory;
pub mod models;
pub mod query_builder;
pub mod repository;
pub mod service;

// 公開インターフェース
pub use cancellation::Cancellation;

pub use commands::{
    calculate_total_cost, create_subscription, delete_subscription, get_subscription,
    get_subscriptions, get_user_subscriptions, update_subscription,
};

pub use memory::InMemorySubscriptionStore;

pub use models::{
    CreateSubscriptionDto, CreatedSubscription, FieldUpdate, Subscription, SubscriptionPatch,
    SubscriptionResponse, TotalCostDto, TotalCostFilter, TotalCostResponse, UpdateSubscriptionDto,
};

pub use query_builder::{QueryParam, TotalCostQueryBuilder};

pub use repository::{SqliteSubscriptionStore, SubscriptionStore};

pub use service::{SubscriptionManager, DEFAULT_OPERATION_TIMEOUT};
