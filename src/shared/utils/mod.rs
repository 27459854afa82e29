use crate::shared::errors::{AppError, AppResult};
use chrono::Utc;
use chrono_tz::Asia::Tokyo;

/// 月単位の期間（"MM-YYYY"）の解析と整形
pub mod month_year;

pub use month_year::{
    format_month_year, is_month_end, is_month_start, parse_month_end, parse_month_start,
    parse_month_year,
};

/// 文字列の長さバリデーション
///
/// # 引数
/// * `text` - 検証対象の文字列
/// * `max_length` - 最大文字数
/// * `field_name` - フィールド名（エラーメッセージ用）
///
/// # 戻り値
/// 有効な長さの場合はOk(())、無効な場合はエラー
pub fn validate_text_length(text: &str, max_length: usize, field_name: &str) -> AppResult<()> {
    let char_count = text.chars().count();
    if char_count > max_length {
        return Err(AppError::invalid_data(format!(
            "{field_name}は{max_length}文字以内で入力してください（現在: {char_count}文字）"
        )));
    }
    Ok(())
}

/// 必須フィールドのバリデーション
///
/// # 引数
/// * `text` - 検証対象の文字列
/// * `field_name` - フィールド名（エラーメッセージ用）
///
/// # 戻り値
/// 空でない場合はOk(())、空または空白のみの場合はエラー
pub fn validate_required_field(text: &str, field_name: &str) -> AppResult<()> {
    if text.trim().is_empty() {
        return Err(AppError::invalid_data(format!("{field_name}は必須項目です")));
    }
    Ok(())
}

/// 現在の日時をJST（日本標準時）で取得
///
/// # 戻り値
/// JST形式のRFC3339文字列
pub fn get_current_jst_timestamp() -> String {
    Utc::now().with_timezone(&Tokyo).to_rfc3339()
}

/// 文字列の正規化（前後の空白を削除）
pub fn normalize_string(text: &str) -> String {
    text.trim().to_string()
}
