use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::{format_month_year, is_month_end, is_month_start};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// サービス名の最大文字数
pub const MAX_SERVICE_NAME_LENGTH: usize = 100;

/// サブスクリプションデータモデル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,                       // 作成時に採番、以後不変
    pub service_name: String,           // 空でないサービス名
    pub price: i64,                     // 最小通貨単位の金額
    pub user_id: Uuid,                  // 所有ユーザー（存在確認はしない）
    pub start_date: NaiveDate,          // 常に月初日
    pub end_date: Option<NaiveDate>,    // 常に月末日、Noneは終了日なし（継続中）
}

impl Subscription {
    /// 新しいサブスクリプションを構築する
    ///
    /// 日付は正規化済み（開始は月初日、終了は月末日）のものを受け取る。
    /// 作成経路と更新経路の両方から使えるよう、期間文字列の解析はここでは行わない。
    ///
    /// # 引数
    /// * `service_name` - サービス名（空白のみは不可）
    /// * `price` - 金額（範囲チェックなし）
    /// * `user_id` - 所有ユーザーID
    /// * `start_date` - 開始日（月初日）
    /// * `end_date` - 終了日（月末日）、終了日なしの場合はNone
    ///
    /// # 戻り値
    /// 新しいIDが割り当てられたサブスクリプション、または `InvalidSubscriptionData`
    pub fn new(
        service_name: impl Into<String>,
        price: i64,
        user_id: Uuid,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> AppResult<Self> {
        let service_name = service_name.into();
        validate_service_name_present(&service_name)?;
        validate_period_bounds(start_date, end_date)?;

        Ok(Self {
            id: Uuid::new_v4(),
            service_name,
            price,
            user_id,
            start_date,
            end_date,
        })
    }

    /// `[window_start, window_end]` の期間と有効期間が重なるかどうか
    ///
    /// 終了日なしのサブスクリプションは開始済みであれば常に重なる。
    pub fn overlaps(&self, window_start: NaiveDate, window_end: NaiveDate) -> bool {
        self.start_date <= window_end && self.end_date.map_or(true, |end| end >= window_start)
    }
}

fn validate_service_name_present(service_name: &str) -> AppResult<()> {
    if service_name.trim().is_empty() {
        return Err(AppError::invalid_data("サービス名を入力してください"));
    }
    Ok(())
}

fn validate_start_date(start_date: NaiveDate) -> AppResult<()> {
    if !is_month_start(start_date) {
        return Err(AppError::invalid_data(format!(
            "開始日は月初日である必要があります: {start_date}"
        )));
    }
    Ok(())
}

fn validate_end_date(end_date: NaiveDate) -> AppResult<()> {
    if !is_month_end(end_date) {
        return Err(AppError::invalid_data(format!(
            "終了日は月末日である必要があります: {end_date}"
        )));
    }
    Ok(())
}

/// 開始日・終了日の不変条件を検証する
fn validate_period_bounds(start_date: NaiveDate, end_date: Option<NaiveDate>) -> AppResult<()> {
    validate_start_date(start_date)?;

    if let Some(end) = end_date {
        validate_end_date(end)?;
        if end < start_date {
            return Err(AppError::invalid_data(
                "終了日は開始日以降である必要があります",
            ));
        }
    }

    Ok(())
}

/// 部分更新における1フィールド分の指定
///
/// `Keep` は既存値を維持し、`Set` は値を置き換える。
/// 終了日は `FieldUpdate<Option<NaiveDate>>` として扱うため、
/// `Set(None)` で明示的に終了日を消去できる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    Keep,
    Set(T),
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Keep
    }
}

impl<T> FieldUpdate<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, FieldUpdate::Set(_))
    }

    pub fn as_ref(&self) -> FieldUpdate<&T> {
        match self {
            FieldUpdate::Keep => FieldUpdate::Keep,
            FieldUpdate::Set(value) => FieldUpdate::Set(value),
        }
    }

    /// 更新後の値を決定する
    pub fn resolve(self, existing: T) -> T {
        match self {
            FieldUpdate::Keep => existing,
            FieldUpdate::Set(value) => value,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            FieldUpdate::Keep => None,
            FieldUpdate::Set(value) => Some(value),
        }
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => FieldUpdate::Set(value),
            None => FieldUpdate::Keep,
        }
    }
}

/// サブスクリプションの部分更新
///
/// サービス名・金額・開始日は指定がなければ既存値を維持する。
/// 終了日は指定された場合に値ごと置き換える（Noneへの消去を含む）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPatch {
    pub service_name: FieldUpdate<String>,
    pub price: FieldUpdate<i64>,
    pub start_date: FieldUpdate<NaiveDate>,
    pub end_date: FieldUpdate<Option<NaiveDate>>,
}

impl SubscriptionPatch {
    /// 何も変更しないパッチかどうか
    pub fn is_empty(&self) -> bool {
        !self.service_name.is_set()
            && !self.price.is_set()
            && !self.start_date.is_set()
            && !self.end_date.is_set()
    }

    /// 指定された値それぞれの不変条件を検証する
    ///
    /// 開始日と終了日の前後関係は既存の値に依存するため、ここでは検証しない
    /// （`apply_to` またはストア側の制約で検証される）。
    pub fn validate(&self) -> AppResult<()> {
        if let FieldUpdate::Set(name) = &self.service_name {
            validate_service_name_present(name)?;
        }
        if let FieldUpdate::Set(start) = &self.start_date {
            validate_start_date(*start)?;
        }
        if let FieldUpdate::Set(Some(end)) = &self.end_date {
            validate_end_date(*end)?;
        }
        Ok(())
    }

    /// 既存のサブスクリプションにパッチを適用した結果を返す
    ///
    /// IDと所有ユーザーは変更されない。適用後の期間が不変条件を満たさない場合は
    /// `InvalidSubscriptionData` を返す。
    pub fn apply_to(&self, existing: &Subscription) -> AppResult<Subscription> {
        self.validate()?;

        let updated = Subscription {
            id: existing.id,
            service_name: self
                .service_name
                .clone()
                .resolve(existing.service_name.clone()),
            price: self.price.clone().resolve(existing.price),
            user_id: existing.user_id,
            start_date: self.start_date.clone().resolve(existing.start_date),
            end_date: self.end_date.clone().resolve(existing.end_date),
        };

        validate_period_bounds(updated.start_date, updated.end_date)?;

        Ok(updated)
    }
}

/// 合計金額集計のフィルター
///
/// ユーザーIDとサービス名は指定された場合のみ絞り込みに使う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotalCostFilter {
    pub start_period: NaiveDate,
    pub end_period: NaiveDate,
    pub user_id: Option<Uuid>,
    pub service_name: Option<String>,
}

impl TotalCostFilter {
    /// 集計期間を指定してフィルターを作成する
    ///
    /// # 戻り値
    /// フィルター、または終了が開始より前の場合は `InvalidDateRange`
    pub fn new(start_period: NaiveDate, end_period: NaiveDate) -> AppResult<Self> {
        if end_period < start_period {
            return Err(AppError::invalid_range(
                "終了期間は開始期間以降である必要があります",
            ));
        }

        Ok(Self {
            start_period,
            end_period,
            user_id: None,
            service_name: None,
        })
    }

    pub fn with_user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_service_name(mut self, service_name: Option<String>) -> Self {
        self.service_name = service_name;
        self
    }

    /// サブスクリプションが集計対象に含まれるかどうか
    pub fn matches(&self, subscription: &Subscription) -> bool {
        subscription.overlaps(self.start_period, self.end_period)
            && self.user_id.map_or(true, |id| subscription.user_id == id)
            && self
                .service_name
                .as_deref()
                .map_or(true, |name| subscription.service_name == name)
    }
}

/// サブスクリプション作成用DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionDto {
    pub service_name: String,
    pub price: i64,
    pub user_id: String,
    pub start_date: String,         // MM-YYYY
    #[serde(default)]
    pub end_date: Option<String>,   // MM-YYYY、省略時は終了日なし
}

/// サブスクリプション更新用DTO
///
/// `end_date` はキー自体の有無と `null` を区別する。
/// キーがなければ既存値を維持し、`null` なら終了日を消去する。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSubscriptionDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<Option<String>>,
}

/// キーが存在すれば `null` でも `Some` として扱う
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// 合計金額集計用DTO
///
/// 期間は必須だが、欠落を `InvalidDateRange` として報告するため `Option` で受け取る。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TotalCostDto {
    #[serde(default)]
    pub start_period: Option<String>,
    #[serde(default)]
    pub end_period: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
}

/// 呼び出し側へ返すサブスクリプション（日付はMM-YYYY形式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub service_name: String,
    pub price: i64,
    pub user_id: Uuid,
    pub start_date: String,
    pub end_date: Option<String>,
}

impl From<&Subscription> for SubscriptionResponse {
    fn from(subscription: &Subscription) -> Self {
        Self {
            id: subscription.id,
            service_name: subscription.service_name.clone(),
            price: subscription.price,
            user_id: subscription.user_id,
            start_date: format_month_year(subscription.start_date),
            end_date: subscription.end_date.map(format_month_year),
        }
    }
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self::from(&subscription)
    }
}

/// 作成結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSubscription {
    pub id: Uuid,
    pub message: String,
}

/// 合計金額の集計結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalCostResponse {
    pub total_cost: i64,
}
