use super::models::{
    CreateSubscriptionDto, CreatedSubscription, FieldUpdate, Subscription, SubscriptionPatch,
    SubscriptionResponse, TotalCostDto, TotalCostFilter, TotalCostResponse, UpdateSubscriptionDto,
    MAX_SERVICE_NAME_LENGTH,
};
use super::repository::SubscriptionStore;
use super::service::SubscriptionManager;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::{
    normalize_string, parse_month_end, parse_month_start, validate_required_field,
    validate_text_length,
};
use uuid::Uuid;

/// サブスクリプションを作成する
///
/// # 引数
/// * `manager` - サブスクリプション管理サービス
/// * `dto` - サブスクリプション作成用DTO（日付はMM-YYYY形式）
///
/// # 戻り値
/// 作成されたサブスクリプションのID、または失敗時はエラー
pub async fn create_subscription<S: SubscriptionStore + 'static>(
    manager: &SubscriptionManager<S>,
    dto: CreateSubscriptionDto,
) -> AppResult<CreatedSubscription> {
    let subscription = subscription_from_dto(dto)?;
    let id = manager.create_subscription(subscription).await?;

    Ok(CreatedSubscription {
        id,
        message: "サブスクリプションを作成しました".to_string(),
    })
}

/// サブスクリプション一覧を取得する
pub async fn get_subscriptions<S: SubscriptionStore + 'static>(
    manager: &SubscriptionManager<S>,
) -> AppResult<Vec<SubscriptionResponse>> {
    let subscriptions = manager.list_subscriptions().await?;
    Ok(subscriptions.iter().map(SubscriptionResponse::from).collect())
}

/// 指定ユーザーのサブスクリプション一覧を取得する
///
/// # 引数
/// * `manager` - サブスクリプション管理サービス
/// * `user_id` - ユーザーID（UUID文字列）
pub async fn get_user_subscriptions<S: SubscriptionStore + 'static>(
    manager: &SubscriptionManager<S>,
    user_id: &str,
) -> AppResult<Vec<SubscriptionResponse>> {
    let user_id = parse_user_id(user_id)?;
    let subscriptions = manager.list_user_subscriptions(user_id).await?;
    Ok(subscriptions.iter().map(SubscriptionResponse::from).collect())
}

/// IDを指定してサブスクリプションを取得する
pub async fn get_subscription<S: SubscriptionStore + 'static>(
    manager: &SubscriptionManager<S>,
    id: &str,
) -> AppResult<SubscriptionResponse> {
    let id = parse_subscription_id(id)?;
    let subscription = manager.get_subscription(id).await?;
    Ok(SubscriptionResponse::from(subscription))
}

/// サブスクリプションを更新する
///
/// # 引数
/// * `manager` - サブスクリプション管理サービス
/// * `id` - サブスクリプションID（UUID文字列）
/// * `dto` - 更新用DTO（指定されたフィールドのみ変更）
///
/// # 戻り値
/// 更新後のサブスクリプション、または失敗時はエラー
pub async fn update_subscription<S: SubscriptionStore + 'static>(
    manager: &SubscriptionManager<S>,
    id: &str,
    dto: UpdateSubscriptionDto,
) -> AppResult<SubscriptionResponse> {
    let id = parse_subscription_id(id)?;
    let patch = patch_from_dto(dto)?;

    if patch.is_empty() {
        log::debug!("変更のない更新リクエストです: id={id}");
    }

    let updated = manager.update_subscription(id, patch).await?;
    Ok(SubscriptionResponse::from(updated))
}

/// サブスクリプションを削除する
pub async fn delete_subscription<S: SubscriptionStore + 'static>(
    manager: &SubscriptionManager<S>,
    id: &str,
) -> AppResult<()> {
    let id = parse_subscription_id(id)?;
    manager.delete_subscription(id).await
}

/// 期間内に有効なサブスクリプションの合計金額を計算する
///
/// # 引数
/// * `manager` - サブスクリプション管理サービス
/// * `dto` - 集計条件（期間は必須、ユーザーIDとサービス名は任意）
///
/// # 戻り値
/// 合計金額、または失敗時はエラー
pub async fn calculate_total_cost<S: SubscriptionStore + 'static>(
    manager: &SubscriptionManager<S>,
    dto: TotalCostDto,
) -> AppResult<TotalCostResponse> {
    let filter = filter_from_dto(dto)?;
    let total_cost = manager.calculate_total_cost(filter).await?;
    Ok(TotalCostResponse { total_cost })
}

/// ユーザーIDを解析する
fn parse_user_id(text: &str) -> AppResult<Uuid> {
    Uuid::parse_str(text.trim()).map_err(|e| AppError::InvalidUserId(format!("{text:?}: {e}")))
}

/// サブスクリプションIDを解析する
fn parse_subscription_id(text: &str) -> AppResult<Uuid> {
    Uuid::parse_str(text.trim())
        .map_err(|e| AppError::InvalidSubscriptionId(format!("{text:?}: {e}")))
}

/// サービス名を検証し、前後の空白を取り除く
fn validate_service_name(service_name: &str) -> AppResult<String> {
    let normalized = normalize_string(service_name);
    validate_required_field(&normalized, "サービス名")?;
    validate_text_length(&normalized, MAX_SERVICE_NAME_LENGTH, "サービス名")?;
    Ok(normalized)
}

/// 作成用DTOからサブスクリプションを構築する
fn subscription_from_dto(dto: CreateSubscriptionDto) -> AppResult<Subscription> {
    let service_name = validate_service_name(&dto.service_name)?;
    let user_id = parse_user_id(&dto.user_id)?;
    let start_date = parse_month_start("start_date", &dto.start_date)?;
    // 空文字列は「省略」ではなく形式不正として扱う
    let end_date = dto
        .end_date
        .as_deref()
        .map(|text| parse_month_end("end_date", text))
        .transpose()?;

    Subscription::new(service_name, dto.price, user_id, start_date, end_date)
}

/// 更新用DTOからパッチを構築する
fn patch_from_dto(dto: UpdateSubscriptionDto) -> AppResult<SubscriptionPatch> {
    let service_name = dto
        .service_name
        .as_deref()
        .map(validate_service_name)
        .transpose()?;
    let start_date = dto
        .start_date
        .as_deref()
        .map(|text| parse_month_start("start_date", text))
        .transpose()?;
    let end_date = match dto.end_date {
        None => FieldUpdate::Keep,
        Some(None) => FieldUpdate::Set(None),
        Some(Some(text)) => FieldUpdate::Set(Some(parse_month_end("end_date", &text)?)),
    };

    Ok(SubscriptionPatch {
        service_name: service_name.into(),
        price: dto.price.into(),
        start_date: start_date.into(),
        end_date,
    })
}

/// 集計用DTOからフィルターを構築する
fn filter_from_dto(dto: TotalCostDto) -> AppResult<TotalCostFilter> {
    let start_text = dto
        .start_period
        .ok_or_else(|| AppError::invalid_range("開始期間を指定してください"))?;
    let end_text = dto
        .end_period
        .ok_or_else(|| AppError::invalid_range("終了期間を指定してください"))?;

    let start_period = parse_month_start("start_period", &start_text)?;
    let end_period = parse_month_end("end_period", &end_text)?;
    let user_id = dto.user_id.as_deref().map(parse_user_id).transpose()?;
    // 指定されていれば空文字列でも絞り込み条件として扱う（一致するものはない）
    let service_name = dto.service_name.map(|name| normalize_string(&name));

    Ok(TotalCostFilter::new(start_period, end_period)?
        .with_user(user_id)
        .with_service_name(service_name))
}
