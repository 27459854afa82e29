use super::cancellation::Cancellation;
use super::models::{Subscription, SubscriptionPatch, TotalCostFilter};
use super::repository::SubscriptionStore;
use crate::shared::errors::{AppError, AppResult, ErrorSeverity};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 操作タイムアウトの既定値
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// サブスクリプション管理サービス
///
/// ストアへの呼び出しをブロッキング用スレッドで実行し、タイムアウトを適用する。
/// 再試行は行わず、失敗はそのまま呼び出し元へ返す。
/// 失敗を報告した操作はバックエンドに何も残さない。
pub struct SubscriptionManager<S: SubscriptionStore + 'static> {
    /// 永続化バックエンド
    store: Arc<S>,
    /// 1操作あたりの制限時間
    operation_timeout: Duration,
}

impl<S: SubscriptionStore + 'static> Clone for SubscriptionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            operation_timeout: self.operation_timeout,
        }
    }
}

impl<S: SubscriptionStore + 'static> SubscriptionManager<S> {
    /// 新しいSubscriptionManagerを作成する
    ///
    /// # 引数
    /// * `store` - 共有ストア
    /// * `operation_timeout` - 1操作あたりの制限時間
    pub fn new(store: Arc<S>, operation_timeout: Duration) -> Self {
        log::info!(
            "SubscriptionManagerを初期化しました（タイムアウト: {:?}）",
            operation_timeout
        );
        Self {
            store,
            operation_timeout,
        }
    }

    /// サブスクリプションを作成する
    ///
    /// # 戻り値
    /// 作成されたサブスクリプションのID
    pub async fn create_subscription(&self, subscription: Subscription) -> AppResult<Uuid> {
        let id = self
            .run("create", move |store, cancel| store.create(&subscription, cancel))
            .await?;
        log::info!("サブスクリプションを作成しました: id={id}");
        Ok(id)
    }

    /// IDでサブスクリプションを取得する
    pub async fn get_subscription(&self, id: Uuid) -> AppResult<Subscription> {
        self.run("find_by_id", move |store, cancel| store.find_by_id(id, cancel))
            .await
    }

    /// すべてのサブスクリプションを取得する
    pub async fn list_subscriptions(&self) -> AppResult<Vec<Subscription>> {
        let subscriptions = self.run("list_all", |store, cancel| store.list_all(cancel)).await?;
        log::debug!("サブスクリプション一覧を取得しました: {}件", subscriptions.len());
        Ok(subscriptions)
    }

    /// 指定ユーザーのサブスクリプションを取得する
    pub async fn list_user_subscriptions(&self, user_id: Uuid) -> AppResult<Vec<Subscription>> {
        let subscriptions = self
            .run("list_by_user", move |store, cancel| store.list_by_user(user_id, cancel))
            .await?;
        log::debug!(
            "ユーザーのサブスクリプションを取得しました: user_id={user_id}, {}件",
            subscriptions.len()
        );
        Ok(subscriptions)
    }

    /// サブスクリプションを部分更新する
    ///
    /// # 引数
    /// * `id` - サブスクリプションID
    /// * `patch` - 変更するフィールド
    ///
    /// # 戻り値
    /// 更新後のサブスクリプション
    pub async fn update_subscription(
        &self,
        id: Uuid,
        patch: SubscriptionPatch,
    ) -> AppResult<Subscription> {
        let updated = self
            .run("update", move |store, cancel| store.update(id, &patch, cancel))
            .await?;
        log::info!("サブスクリプションを更新しました: id={id}");
        Ok(updated)
    }

    /// サブスクリプションを削除する
    pub async fn delete_subscription(&self, id: Uuid) -> AppResult<()> {
        self.run("delete", move |store, cancel| store.delete(id, cancel)).await?;
        log::info!("サブスクリプションを削除しました: id={id}");
        Ok(())
    }

    /// 期間内に有効なサブスクリプションの合計金額を計算する
    ///
    /// # 戻り値
    /// 合計金額（該当なしは0）
    pub async fn calculate_total_cost(&self, filter: TotalCostFilter) -> AppResult<i64> {
        let (start, end) = (filter.start_period, filter.end_period);
        let total = self
            .run("aggregate_total_cost", move |store, cancel| {
                store.aggregate_total_cost(&filter, cancel)
            })
            .await?;
        log::debug!("合計金額を計算しました: {start}〜{end} = {total}");
        Ok(total)
    }

    /// ストア操作をブロッキングスレッドで実行し、タイムアウトを適用する
    ///
    /// 制限時間を超えた場合は操作を中断し、ワーカーの終了を待ってから結果を決める。
    /// 中断が間に合わずに完了した操作は成功として返し、
    /// 中断された操作はタイムアウトとして `Storage` エラーを返す。
    async fn run<T, F>(&self, operation: &'static str, call: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&S, &Cancellation) -> AppResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let cancellation = Cancellation::new();
        let worker_cancellation = cancellation.clone();
        let mut task = tokio::task::spawn_blocking(move || call(&store, &worker_cancellation));

        let result = match tokio::time::timeout(self.operation_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(interrupted_worker(operation, join_error)),
            Err(_) => {
                cancellation.cancel();
                log::warn!(
                    "{operation} が制限時間（{:?}）を超えたため中断します",
                    self.operation_timeout
                );

                match task.await {
                    Ok(Ok(value)) => {
                        log::warn!("{operation} は中断前に完了していました");
                        Ok(value)
                    }
                    Ok(Err(e)) if e.is_client_error() => Err(e),
                    Ok(Err(_)) => Err(AppError::storage(
                        operation,
                        format!(
                            "ストア操作がタイムアウトしました（{:?}）",
                            self.operation_timeout
                        ),
                    )),
                    Err(join_error) => Err(interrupted_worker(operation, join_error)),
                }
            }
        };

        if let Err(e) = &result {
            match e.severity() {
                ErrorSeverity::High => log::error!("{operation} に失敗しました: {}", e.details()),
                _ => log::warn!("{operation} に失敗しました: {}", e.details()),
            }
        }

        result
    }
}

fn interrupted_worker(operation: &str, join_error: tokio::task::JoinError) -> AppError {
    AppError::storage(
        operation,
        format!("ストア操作が中断されました: {join_error}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::subscriptions::memory::InMemorySubscriptionStore;
    use crate::features::subscriptions::models::FieldUpdate;
    use chrono::NaiveDate;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_manager() -> SubscriptionManager<InMemorySubscriptionStore> {
        SubscriptionManager::new(
            Arc::new(InMemorySubscriptionStore::new()),
            DEFAULT_OPERATION_TIMEOUT,
        )
    }

    fn sample(name: &str) -> Subscription {
        Subscription::new(name, 1000, Uuid::new_v4(), ymd(2025, 7, 1), None).unwrap()
    }

    /// 各操作の前に待機してからメモリストアへ委譲するストア
    ///
    /// `honor_cancel` が偽の場合は中断要求を無視して書き込む。
    struct SlowStore {
        inner: InMemorySubscriptionStore,
        delay: Duration,
        honor_cancel: bool,
    }

    impl SlowStore {
        fn new(delay: Duration, honor_cancel: bool) -> Self {
            Self {
                inner: InMemorySubscriptionStore::new(),
                delay,
                honor_cancel,
            }
        }

        fn pause<'a>(&self, cancel: &'a Cancellation, ignored: &'a Cancellation) -> &'a Cancellation {
            std::thread::sleep(self.delay);
            if self.honor_cancel {
                cancel
            } else {
                ignored
            }
        }
    }

    impl SubscriptionStore for SlowStore {
        fn create(&self, subscription: &Subscription, cancel: &Cancellation) -> AppResult<Uuid> {
            let ignored = Cancellation::new();
            self.inner.create(subscription, self.pause(cancel, &ignored))
        }

        fn find_by_id(&self, id: Uuid, cancel: &Cancellation) -> AppResult<Subscription> {
            let ignored = Cancellation::new();
            self.inner.find_by_id(id, self.pause(cancel, &ignored))
        }

        fn list_all(&self, cancel: &Cancellation) -> AppResult<Vec<Subscription>> {
            let ignored = Cancellation::new();
            self.inner.list_all(self.pause(cancel, &ignored))
        }

        fn list_by_user(&self, user_id: Uuid, cancel: &Cancellation) -> AppResult<Vec<Subscription>> {
            let ignored = Cancellation::new();
            self.inner.list_by_user(user_id, self.pause(cancel, &ignored))
        }

        fn update(
            &self,
            id: Uuid,
            patch: &SubscriptionPatch,
            cancel: &Cancellation,
        ) -> AppResult<Subscription> {
            let ignored = Cancellation::new();
            self.inner.update(id, patch, self.pause(cancel, &ignored))
        }

        fn delete(&self, id: Uuid, cancel: &Cancellation) -> AppResult<()> {
            let ignored = Cancellation::new();
            self.inner.delete(id, self.pause(cancel, &ignored))
        }

        fn aggregate_total_cost(
            &self,
            filter: &TotalCostFilter,
            cancel: &Cancellation,
        ) -> AppResult<i64> {
            let ignored = Cancellation::new();
            self.inner
                .aggregate_total_cost(filter, self.pause(cancel, &ignored))
        }
    }

    /// 呼び出し時にパニックするストア
    struct PanickingStore;

    impl SubscriptionStore for PanickingStore {
        fn create(&self, _subscription: &Subscription, _cancel: &Cancellation) -> AppResult<Uuid> {
            panic!("backend crashed");
        }

        fn find_by_id(&self, _id: Uuid, _cancel: &Cancellation) -> AppResult<Subscription> {
            panic!("backend crashed");
        }

        fn list_all(&self, _cancel: &Cancellation) -> AppResult<Vec<Subscription>> {
            panic!("backend crashed");
        }

        fn list_by_user(
            &self,
            _user_id: Uuid,
            _cancel: &Cancellation,
        ) -> AppResult<Vec<Subscription>> {
            panic!("backend crashed");
        }

        fn update(
            &self,
            _id: Uuid,
            _patch: &SubscriptionPatch,
            _cancel: &Cancellation,
        ) -> AppResult<Subscription> {
            panic!("backend crashed");
        }

        fn delete(&self, _id: Uuid, _cancel: &Cancellation) -> AppResult<()> {
            panic!("backend crashed");
        }

        fn aggregate_total_cost(
            &self,
            _filter: &TotalCostFilter,
            _cancel: &Cancellation,
        ) -> AppResult<i64> {
            panic!("backend crashed");
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let manager = create_test_manager();
        let sub = sample("Netflix");

        let id = manager.create_subscription(sub.clone()).await.unwrap();
        assert_eq!(id, sub.id);
        assert_eq!(manager.get_subscription(id).await.unwrap(), sub);
        assert_eq!(manager.list_subscriptions().await.unwrap().len(), 1);
        assert_eq!(
            manager
                .list_user_subscriptions(sub.user_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_delete_and_not_found() {
        let manager = create_test_manager();
        let sub = Subscription::new(
            "Netflix",
            1000,
            Uuid::new_v4(),
            ymd(2025, 1, 1),
            Some(ymd(2025, 6, 30)),
        )
        .unwrap();
        let id = manager.create_subscription(sub).await.unwrap();

        let patch = SubscriptionPatch {
            end_date: FieldUpdate::Set(None),
            ..Default::default()
        };
        let updated = manager.update_subscription(id, patch).await.unwrap();
        assert_eq!(updated.end_date, None);

        manager.delete_subscription(id).await.unwrap();
        let result = manager.delete_subscription(id).await;
        assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_total_cost_scenario() {
        let manager = create_test_manager();
        let u1 = Uuid::new_v4();
        let a = Subscription::new("A", 100, u1, ymd(2025, 1, 1), Some(ymd(2025, 6, 30))).unwrap();
        let b = Subscription::new("B", 50, u1, ymd(2025, 5, 1), None).unwrap();
        manager.create_subscription(a).await.unwrap();
        manager.create_subscription(b).await.unwrap();

        let filter = TotalCostFilter::new(ymd(2025, 6, 1), ymd(2025, 6, 30))
            .unwrap()
            .with_user(Some(u1));
        assert_eq!(manager.calculate_total_cost(filter).await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_timed_out_create_persists_nothing() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(200), true));
        let manager = SubscriptionManager::new(Arc::clone(&store), Duration::from_millis(20));

        let result = manager.create_subscription(sample("Netflix")).await;
        match result {
            Err(AppError::Storage { operation, .. }) => assert_eq!(operation, "create"),
            other => panic!("unexpected result: {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.inner.list_all(&Cancellation::new()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_completed_after_deadline_is_reported_as_success() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(100), false));
        let manager = SubscriptionManager::new(Arc::clone(&store), Duration::from_millis(10));
        let sub = sample("Netflix");

        let id = manager.create_subscription(sub.clone()).await.unwrap();
        assert_eq!(id, sub.id);
        assert_eq!(store.inner.find_by_id(id, &Cancellation::new()).unwrap(), sub);
    }

    #[tokio::test]
    async fn test_timed_out_read_is_storage_failure() {
        let manager = SubscriptionManager::new(
            Arc::new(SlowStore::new(Duration::from_millis(200), true)),
            Duration::from_millis(20),
        );

        let result = manager.list_subscriptions().await;
        match result {
            Err(AppError::Storage { operation, .. }) => assert_eq!(operation, "list_all"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fast_enough_call_is_not_timed_out() {
        let manager = SubscriptionManager::new(
            Arc::new(SlowStore::new(Duration::from_millis(1), true)),
            Duration::from_secs(5),
        );

        let filter = TotalCostFilter::new(ymd(2025, 1, 1), ymd(2025, 1, 31)).unwrap();
        assert_eq!(manager.calculate_total_cost(filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_panicking_backend_is_reported_as_storage_failure() {
        let manager = SubscriptionManager::new(Arc::new(PanickingStore), DEFAULT_OPERATION_TIMEOUT);

        let result = manager.delete_subscription(Uuid::new_v4()).await;
        match result {
            Err(AppError::Storage { operation, .. }) => assert_eq!(operation, "delete"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_store() {
        let manager = create_test_manager();
        let user_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..10 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let sub =
                    Subscription::new(format!("Service {i}"), 10, user_id, ymd(2025, 1, 1), None)
                        .unwrap();
                manager.create_subscription(sub).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let filter = TotalCostFilter::new(ymd(2025, 1, 1), ymd(2025, 1, 31))
            .unwrap()
            .with_user(Some(user_id));
        assert_eq!(manager.calculate_total_cost(filter).await.unwrap(), 100);
    }
}
