use super::cancellation::Cancellation;
use super::models::{Subscription, SubscriptionPatch, TotalCostFilter};
use super::repository::{subscription_not_found, SubscriptionStore};
use crate::shared::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// メモリ上にサブスクリプションを保持するストア
///
/// プロセス終了とともに内容は失われる。テストや一時的な利用向け。
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, operation: &str) -> AppResult<RwLockReadGuard<'_, HashMap<Uuid, Subscription>>> {
        self.subscriptions
            .read()
            .map_err(|e| AppError::storage(operation, format!("ロックの取得に失敗しました: {e}")))
    }

    fn write(
        &self,
        operation: &str,
    ) -> AppResult<RwLockWriteGuard<'_, HashMap<Uuid, Subscription>>> {
        self.subscriptions
            .write()
            .map_err(|e| AppError::storage(operation, format!("ロックの取得に失敗しました: {e}")))
    }
}

/// SQLite版と同じ並び順（開始日、サービス名、ID）
fn sorted(mut subscriptions: Vec<Subscription>) -> Vec<Subscription> {
    subscriptions.sort_by(|a, b| {
        (a.start_date, &a.service_name, a.id.to_string())
            .cmp(&(b.start_date, &b.service_name, b.id.to_string()))
    });
    subscriptions
}

impl SubscriptionStore for InMemorySubscriptionStore {
    fn create(&self, subscription: &Subscription, cancel: &Cancellation) -> AppResult<Uuid> {
        let mut map = self.write("create")?;
        cancel.check("create")?;
        if map.contains_key(&subscription.id) {
            return Err(AppError::invalid_data(format!(
                "ID {} は既に使用されています",
                subscription.id
            )));
        }
        map.insert(subscription.id, subscription.clone());
        Ok(subscription.id)
    }

    fn find_by_id(&self, id: Uuid, cancel: &Cancellation) -> AppResult<Subscription> {
        let map = self.read("find_by_id")?;
        cancel.check("find_by_id")?;
        map.get(&id)
            .cloned()
            .ok_or_else(|| subscription_not_found(id))
    }

    fn list_all(&self, cancel: &Cancellation) -> AppResult<Vec<Subscription>> {
        let map = self.read("list_all")?;
        cancel.check("list_all")?;
        Ok(sorted(map.values().cloned().collect()))
    }

    fn list_by_user(&self, user_id: Uuid, cancel: &Cancellation) -> AppResult<Vec<Subscription>> {
        let map = self.read("list_by_user")?;
        cancel.check("list_by_user")?;
        Ok(sorted(
            map.values()
                .filter(|s| s.user_id == user_id)
                .cloned()
                .collect(),
        ))
    }

    fn update(
        &self,
        id: Uuid,
        patch: &SubscriptionPatch,
        cancel: &Cancellation,
    ) -> AppResult<Subscription> {
        // 検証と書き込みを同じロック内で行い、途中の状態を外から見せない
        let mut map = self.write("update")?;
        cancel.check("update")?;
        let existing = map.get(&id).ok_or_else(|| subscription_not_found(id))?;
        let updated = patch.apply_to(existing)?;
        map.insert(id, updated.clone());
        Ok(updated)
    }

    fn delete(&self, id: Uuid, cancel: &Cancellation) -> AppResult<()> {
        let mut map = self.write("delete")?;
        cancel.check("delete")?;
        map.remove(&id)
            .map(|_| ())
            .ok_or_else(|| subscription_not_found(id))
    }

    fn aggregate_total_cost(
        &self,
        filter: &TotalCostFilter,
        cancel: &Cancellation,
    ) -> AppResult<i64> {
        let map = self.read("aggregate_total_cost")?;
        cancel.check("aggregate_total_cost")?;
        // SQLiteのSUMと同じく、桁あふれはエラーとして報告する
        map.values()
            .filter(|s| filter.matches(s))
            .try_fold(0i64, |total, s| total.checked_add(s.price))
            .ok_or_else(|| AppError::storage("aggregate_total_cost", "integer overflow"))
    }
}
