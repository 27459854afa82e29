use super::models::TotalCostFilter;
use chrono::NaiveDate;
use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;
use uuid::Uuid;

const TOTAL_COST_SELECT: &str = "SELECT COALESCE(SUM(price), 0) FROM subscriptions";

/// バインドパラメータ
///
/// 値は常にプレースホルダ経由で渡し、SQL文字列には埋め込まない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    Text(String),
    Date(NaiveDate),
}

impl ToSql for QueryParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            QueryParam::Text(value) => value.to_sql(),
            QueryParam::Date(value) => value.to_sql(),
        }
    }
}

/// WHERE句を構成する1つの条件
#[derive(Debug, Clone)]
struct Predicate {
    clause: &'static str,
    params: Vec<QueryParam>,
}

/// 合計金額集計クエリのビルダー
///
/// 条件はすべてANDで結合されるため、追加順は結果に影響しない。
/// 任意フィルターは指定された場合のみ条件を追加する。
#[derive(Debug, Clone, Default)]
pub struct TotalCostQueryBuilder {
    predicates: Vec<Predicate>,
}

impl TotalCostQueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// フィルターからクエリを組み立てる
    pub fn from_filter(filter: &TotalCostFilter) -> Self {
        let mut builder = Self::new().active_between(filter.start_period, filter.end_period);

        if let Some(user_id) = filter.user_id {
            builder = builder.filter_user(user_id);
        }

        if let Some(ref service_name) = filter.service_name {
            builder = builder.filter_service_name(service_name);
        }

        builder
    }

    /// `[start, end]` の期間に有効なサブスクリプションに絞り込む
    ///
    /// 開始日が期間終了以前で、終了日が期間開始以降または未設定のもの。
    pub fn active_between(self, start: NaiveDate, end: NaiveDate) -> Self {
        self.push("start_date <= ?", vec![QueryParam::Date(end)])
            .push(
                "(end_date >= ? OR end_date IS NULL)",
                vec![QueryParam::Date(start)],
            )
    }

    pub fn filter_user(self, user_id: Uuid) -> Self {
        self.push("user_id = ?", vec![QueryParam::Text(user_id.to_string())])
    }

    pub fn filter_service_name(self, service_name: &str) -> Self {
        self.push(
            "service_name = ?",
            vec![QueryParam::Text(service_name.to_string())],
        )
    }

    fn push(mut self, clause: &'static str, params: Vec<QueryParam>) -> Self {
        self.predicates.push(Predicate { clause, params });
        self
    }

    /// SQLとバインドパラメータを生成する
    ///
    /// # 戻り値
    /// (SQL文字列, プレースホルダの出現順に並んだパラメータ)
    pub fn build(self) -> (String, Vec<QueryParam>) {
        let mut sql = String::from(TOTAL_COST_SELECT);
        let mut params = Vec::new();

        for (index, predicate) in self.predicates.into_iter().enumerate() {
            sql.push_str(if index == 0 { " WHERE " } else { " AND " });
            sql.push_str(predicate.clause);
            params.extend(predicate.params);
        }

        (sql, params)
    }
}
