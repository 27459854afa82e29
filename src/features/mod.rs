/// 機能別モジュール
///
/// 各機能モジュールは、その機能に関連するコード（モデル、コマンド、ストア、サービス）
/// を含む自己完結型のユニット。
pub mod subscriptions;
