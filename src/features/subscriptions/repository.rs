use super::cancellation::{CancelGuard, Cancellation};
use super::models::{Subscription, SubscriptionPatch, TotalCostFilter};
use super::query_builder::TotalCostQueryBuilder;
use crate::shared::database::{DbConnection, DbPool};
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::get_current_jst_timestamp;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Row, ToSql};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, service_name, price, user_id, start_date, end_date";

/// サブスクリプションの永続化操作
///
/// 各メソッドはバックエンドへの1回の往復（1つのSQLステートメント）で完結し、
/// 複数の呼び出し元から同時に使われても安全である必要がある。
/// バックエンドを差し替えてもサービス層は変更不要。
///
/// 各操作は `Cancellation` を受け取る。中断が要求された操作は何も変更せずに
/// エラーを返すか、中断が間に合わなければ通常どおり完了して結果を返す。
pub trait SubscriptionStore: Send + Sync {
    /// サブスクリプションを保存する
    ///
    /// # 戻り値
    /// 保存されたサブスクリプションのID
    fn create(&self, subscription: &Subscription, cancel: &Cancellation) -> AppResult<Uuid>;

    /// IDでサブスクリプションを取得する（存在しなければ `NotFound`）
    fn find_by_id(&self, id: Uuid, cancel: &Cancellation) -> AppResult<Subscription>;

    /// すべてのサブスクリプションを取得する（空ならば空のVec）
    fn list_all(&self, cancel: &Cancellation) -> AppResult<Vec<Subscription>>;

    /// 指定ユーザーのサブスクリプションを取得する
    fn list_by_user(&self, user_id: Uuid, cancel: &Cancellation) -> AppResult<Vec<Subscription>>;

    /// パッチで指定されたフィールドだけを更新する
    ///
    /// # 戻り値
    /// 更新後のサブスクリプション、または存在しなければ `NotFound`
    fn update(
        &self,
        id: Uuid,
        patch: &SubscriptionPatch,
        cancel: &Cancellation,
    ) -> AppResult<Subscription>;

    /// サブスクリプションを削除する（存在しなければ `NotFound`）
    fn delete(&self, id: Uuid, cancel: &Cancellation) -> AppResult<()>;

    /// フィルターに一致するサブスクリプションの金額合計
    ///
    /// 一致するものがなければ0を返す。
    fn aggregate_total_cost(&self, filter: &TotalCostFilter, cancel: &Cancellation)
        -> AppResult<i64>;
}

/// SQLiteをバックエンドとするストア
///
/// 操作ごとにプールから接続を取得し、操作が終わると返却する。
#[derive(Clone)]
pub struct SqliteSubscriptionStore {
    pool: DbPool,
}

impl SqliteSubscriptionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn connection(&self, operation: &str) -> AppResult<DbConnection> {
        self.pool
            .get()
            .map_err(|e| AppError::storage(operation, format!("接続の取得に失敗しました: {e}")))
    }

    fn query_list(
        &self,
        operation: &str,
        sql: &str,
        params: &[&dyn ToSql],
        cancel: &Cancellation,
    ) -> AppResult<Vec<Subscription>> {
        let conn = self.connection(operation)?;
        let _interrupt = interrupt_on_cancel(&conn, cancel, operation)?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::from(e).during(operation))?;

        let subscriptions = stmt
            .query_map(params, map_subscription_row)
            .map_err(|e| AppError::from(e).during(operation))?;

        subscriptions
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::from(e).during(operation))
    }
}

impl SubscriptionStore for SqliteSubscriptionStore {
    fn create(&self, subscription: &Subscription, cancel: &Cancellation) -> AppResult<Uuid> {
        let conn = self.connection("create")?;
        let _interrupt = interrupt_on_cancel(&conn, cancel, "create")?;
        let now = get_current_jst_timestamp();

        conn.execute(
            "INSERT INTO subscriptions (id, service_name, price, user_id, start_date, end_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                subscription.id.to_string(),
                subscription.service_name,
                subscription.price,
                subscription.user_id.to_string(),
                subscription.start_date,
                subscription.end_date,
                now,
                now
            ],
        )
        .map_err(|e| AppError::from(e).during("create"))?;

        Ok(subscription.id)
    }

    fn find_by_id(&self, id: Uuid, cancel: &Cancellation) -> AppResult<Subscription> {
        let conn = self.connection("find_by_id")?;
        let _interrupt = interrupt_on_cancel(&conn, cancel, "find_by_id")?;

        conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM subscriptions WHERE id = ?1"),
            params![id.to_string()],
            map_subscription_row,
        )
        .map_err(|e| not_found_or_storage(e, id, "find_by_id"))
    }

    fn list_all(&self, cancel: &Cancellation) -> AppResult<Vec<Subscription>> {
        self.query_list(
            "list_all",
            &format!(
                "SELECT {SELECT_COLUMNS} FROM subscriptions ORDER BY start_date, service_name, id"
            ),
            &[],
            cancel,
        )
    }

    fn list_by_user(&self, user_id: Uuid, cancel: &Cancellation) -> AppResult<Vec<Subscription>> {
        let user_id = user_id.to_string();
        self.query_list(
            "list_by_user",
            &format!(
                "SELECT {SELECT_COLUMNS} FROM subscriptions WHERE user_id = ?1
                 ORDER BY start_date, service_name, id"
            ),
            &[&user_id as &dyn ToSql],
            cancel,
        )
    }

    fn update(
        &self,
        id: Uuid,
        patch: &SubscriptionPatch,
        cancel: &Cancellation,
    ) -> AppResult<Subscription> {
        // 値ごとの検証はここで、開始日と終了日の前後関係はテーブルのCHECK制約で行う
        patch.validate()?;

        let conn = self.connection("update")?;
        let _interrupt = interrupt_on_cancel(&conn, cancel, "update")?;
        let now = get_current_jst_timestamp();

        // 終了日だけは「指定されたかどうか」と「値」を分けて渡し、Noneによる消去を可能にする
        let end_date_present = patch.end_date.is_set();
        let end_date: Option<NaiveDate> = patch.end_date.clone().into_option().flatten();

        conn.query_row(
            &format!(
                "UPDATE subscriptions
                 SET service_name = COALESCE(?1, service_name),
                     price = COALESCE(?2, price),
                     start_date = COALESCE(?3, start_date),
                     end_date = CASE WHEN ?4 THEN ?5 ELSE end_date END,
                     updated_at = ?6
                 WHERE id = ?7
                 RETURNING {SELECT_COLUMNS}"
            ),
            params![
                patch.service_name.as_ref().into_option(),
                patch.price.as_ref().into_option(),
                patch.start_date.as_ref().into_option(),
                end_date_present,
                end_date,
                now,
                id.to_string()
            ],
            map_subscription_row,
        )
        .map_err(|e| not_found_or_storage(e, id, "update"))
    }

    fn delete(&self, id: Uuid, cancel: &Cancellation) -> AppResult<()> {
        let conn = self.connection("delete")?;
        let _interrupt = interrupt_on_cancel(&conn, cancel, "delete")?;

        let rows_affected = conn
            .execute(
                "DELETE FROM subscriptions WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| AppError::from(e).during("delete"))?;

        if rows_affected == 0 {
            return Err(subscription_not_found(id));
        }

        Ok(())
    }

    fn aggregate_total_cost(
        &self,
        filter: &TotalCostFilter,
        cancel: &Cancellation,
    ) -> AppResult<i64> {
        let (sql, params) = TotalCostQueryBuilder::from_filter(filter).build();
        log::debug!("合計金額クエリ: {sql} (パラメータ数: {})", params.len());

        let conn = self.connection("aggregate_total_cost")?;
        let _interrupt = interrupt_on_cancel(&conn, cancel, "aggregate_total_cost")?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get::<_, i64>(0))
            .map_err(|e| AppError::from(e).during("aggregate_total_cost"))
    }
}

/// 中断要求で接続上の実行中ステートメントを中断するよう登録する
///
/// ガードは接続より先に破棄される必要がある（プールへ返却された接続を中断しないため）。
fn interrupt_on_cancel<'a>(
    conn: &DbConnection,
    cancel: &'a Cancellation,
    operation: &str,
) -> AppResult<CancelGuard<'a>> {
    let handle = conn.get_interrupt_handle();
    cancel.register(operation, move || handle.interrupt())
}

/// 行をサブスクリプションに変換する
fn map_subscription_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: get_uuid(row, 0)?,
        service_name: row.get(1)?,
        price: row.get(2)?,
        user_id: get_uuid(row, 3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
    })
}

/// テキスト列をUUIDとして読み取る
fn get_uuid(row: &Row<'_>, index: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(index)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

/// 行が見つからない場合は `NotFound`、それ以外は操作名付きのエラーに変換する
fn not_found_or_storage(error: rusqlite::Error, id: Uuid, operation: &str) -> AppError {
    match error {
        rusqlite::Error::QueryReturnedNoRows => subscription_not_found(id),
        other => AppError::from(other).during(operation),
    }
}

pub(crate) fn subscription_not_found(id: Uuid) -> AppError {
    AppError::not_found(format!("ID {id} のサブスクリプション"))
}
