use crate::shared::errors::{AppError, AppResult};
use chrono::{Datelike, Months, NaiveDate};

/// "MM-YYYY" 形式の文字列長
const MONTH_YEAR_LEN: usize = 7;

/// "MM-YYYY" 形式の文字列を (年, 月) に分解する
///
/// # 引数
/// * `field` - フィールド名（エラーメッセージ用）
/// * `text` - 期間文字列
///
/// # 戻り値
/// (年, 月)、または形式不正の場合は `InvalidDateFormat`
///
/// # 形式
/// - 2桁の数字、'-'、4桁の数字の7文字ちょうど
/// - 月は01から12
pub fn parse_month_year(field: &str, text: &str) -> AppResult<(i32, u32)> {
    let invalid = || AppError::invalid_date_format(field, text);

    let bytes = text.as_bytes();
    if bytes.len() != MONTH_YEAR_LEN || bytes[2] != b'-' {
        return Err(invalid());
    }

    let (month_part, year_part) = (&text[0..2], &text[3..7]);
    if !month_part.bytes().all(|b| b.is_ascii_digit())
        || !year_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let month: u32 = month_part.parse().map_err(|_| invalid())?;
    let year: i32 = year_part.parse().map_err(|_| invalid())?;

    if !(1..=12).contains(&month) {
        return Err(invalid());
    }

    Ok((year, month))
}

/// "MM-YYYY" をその月の初日に変換する
///
/// # 例
/// "07-2025" -> 2025-07-01
pub fn parse_month_start(field: &str, text: &str) -> AppResult<NaiveDate> {
    let (year, month) = parse_month_year(field, text)?;
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::invalid_date_format(field, text))
}

/// "MM-YYYY" をその月の末日に変換する
///
/// 翌月初日の前日を求めるため、うるう年の2月も正しく扱われる。
///
/// # 例
/// "02-2024" -> 2024-02-29
pub fn parse_month_end(field: &str, text: &str) -> AppResult<NaiveDate> {
    let start = parse_month_start(field, text)?;
    last_day_of_month(start).ok_or_else(|| AppError::invalid_date_format(field, text))
}

/// 日付を "MM-YYYY" 形式に整形する（日は捨てられる）
pub fn format_month_year(date: NaiveDate) -> String {
    format!("{:02}-{:04}", date.month(), date.year())
}

/// 日付が属する月の初日
pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    // 1日は常に存在する
    date.with_day(1).unwrap_or(date)
}

/// 日付が属する月の末日
pub fn last_day_of_month(date: NaiveDate) -> Option<NaiveDate> {
    first_day_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
}

/// 月初日かどうか
pub fn is_month_start(date: NaiveDate) -> bool {
    date.day() == 1
}

/// 月末日かどうか
pub fn is_month_end(date: NaiveDate) -> bool {
    last_day_of_month(date) == Some(date)
}
