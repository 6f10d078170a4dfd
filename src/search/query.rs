//! Filter expression building
//!
//! [`QueryBuilder`] collects [`QueryToken`]s and renders them to an OData
//! filter string on [`QueryBuilder::get_query`]. Connectors are dropped when
//! nothing precedes them and empty membership lists render nothing, so call
//! sites can chain optional clauses without checking what came before.

use crate::search::error::{SearchError, SearchResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Delimiter used inside `search.in` value lists.
///
/// Values containing it are not rejected; they split into several values.
pub const SEARCH_IN_DELIMITER: char = ',';

/// Comparison operator for scalar predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Eq,
    Ne,
    Ge,
    Lt,
}

impl Comparison {
    fn as_str(&self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Ge => "ge",
            Comparison::Lt => "lt",
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    Text(String),
    Date(DateTime<Utc>),
    Null,
}

impl Literal {
    fn render(&self) -> String {
        match self {
            Literal::Text(value) => quote(value),
            Literal::Date(at) => at.to_rfc3339_opts(SecondsFormat::Millis, true),
            Literal::Null => "null".to_string(),
        }
    }
}

/// One element of a filter expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryToken {
    And,
    Or,
    Not,
    OpenParen,
    CloseParen,
    /// `field op literal`
    Compare {
        field: String,
        op: Comparison,
        value: Literal,
    },
    /// `search.in(field, 'a,b', ',')`
    SearchIn { field: String, values: Vec<String> },
    /// `field/any(f: search.in(f, 'a,b', ','))`
    SearchInArray { field: String, values: Vec<String> },
    /// `field/any(f: f eq 'value')`
    Contains { field: String, value: String },
}

impl QueryToken {
    fn is_connector(&self) -> bool {
        matches!(self, QueryToken::And | QueryToken::Or | QueryToken::Not)
    }

    fn render_into(&self, out: &mut String) {
        match self {
            QueryToken::And => out.push_str("and "),
            QueryToken::Or => out.push_str("or "),
            QueryToken::Not => out.push_str("not "),
            QueryToken::OpenParen => out.push('('),
            QueryToken::CloseParen => out.push(')'),
            QueryToken::Compare { field, op, value } => {
                out.push_str(&format!("{} {} {} ", field, op.as_str(), value.render()));
            }
            QueryToken::SearchIn { field, values } => {
                out.push_str(&format!("{} ", search_in(field, values)));
            }
            QueryToken::SearchInArray { field, values } => {
                out.push_str(&format!("{}/any(f: {}) ", field, search_in("f", values)));
            }
            QueryToken::Contains { field, value } => {
                out.push_str(&format!("{}/any(f: f eq {}) ", field, quote(value)));
            }
        }
    }
}

/// Single-quote a literal, doubling embedded quotes.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn search_in(field: &str, values: &[String]) -> String {
    let joined = values.join(&SEARCH_IN_DELIMITER.to_string());
    format!(
        "search.in({}, {}, '{}')",
        field,
        quote(&joined),
        SEARCH_IN_DELIMITER
    )
}

fn require(name: &str, value: &str, operation: &str) -> SearchResult<()> {
    if value.trim().is_empty() {
        return Err(SearchError::InvalidArgument(format!(
            "{} requires a non-empty {}",
            operation, name
        )));
    }
    Ok(())
}

/// Builder for filter expressions over the unified index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBuilder {
    tokens: Vec<QueryToken>,
}

impl QueryBuilder {
    /// Start an empty expression
    pub fn create() -> Self {
        Self::default()
    }

    fn push(mut self, token: QueryToken) -> Self {
        self.tokens.push(token);
        self
    }

    fn connector(self, token: QueryToken) -> Self {
        if self.tokens.is_empty() {
            self
        } else {
            self.push(token)
        }
    }

    /// Append `and` unless the expression is still empty
    pub fn and(self) -> Self {
        self.connector(QueryToken::And)
    }

    /// Append `or` unless the expression is still empty
    pub fn or(self) -> Self {
        self.connector(QueryToken::Or)
    }

    /// Append `not` unless the expression is still empty
    pub fn not(self) -> Self {
        self.connector(QueryToken::Not)
    }

    pub fn open_parenthesis(self) -> Self {
        self.push(QueryToken::OpenParen)
    }

    pub fn close_parenthesis(self) -> Self {
        self.push(QueryToken::CloseParen)
    }

    /// `search.in(field, 'v1,v2', ',')`; no-op when `values` is empty
    pub fn search_in<I, S>(self, field: &str, values: I) -> SearchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        require("field", field, "search_in")?;
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Ok(self);
        }
        Ok(self.push(QueryToken::SearchIn {
            field: field.to_string(),
            values,
        }))
    }

    /// Membership test against a collection field; no-op when `values` is empty
    pub fn search_in_array<I, S>(self, field: &str, values: I) -> SearchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        require("field", field, "search_in_array")?;
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Ok(self);
        }
        Ok(self.push(QueryToken::SearchInArray {
            field: field.to_string(),
            values,
        }))
    }

    fn compare(self, field: &str, op: Comparison, value: Literal, operation: &str) -> SearchResult<Self> {
        require("field", field, operation)?;
        if let Literal::Text(text) = &value {
            require("value", text, operation)?;
        }
        Ok(self.push(QueryToken::Compare {
            field: field.to_string(),
            op,
            value,
        }))
    }

    /// `field eq 'value'`
    pub fn filter_equal(self, field: &str, value: &str) -> SearchResult<Self> {
        self.compare(field, Comparison::Eq, Literal::Text(value.to_string()), "filter_equal")
    }

    /// `field ne 'value'`
    pub fn filter_not_equal(self, field: &str, value: &str) -> SearchResult<Self> {
        self.compare(field, Comparison::Ne, Literal::Text(value.to_string()), "filter_not_equal")
    }

    /// `field/any(f: f eq 'value')`
    pub fn filter_contains(self, field: &str, value: &str) -> SearchResult<Self> {
        require("field", field, "filter_contains")?;
        require("value", value, "filter_contains")?;
        Ok(self.push(QueryToken::Contains {
            field: field.to_string(),
            value: value.to_string(),
        }))
    }

    /// `field ge 2024-01-01T00:00:00.000Z`
    pub fn filter_date_ge(self, field: &str, at: DateTime<Utc>) -> SearchResult<Self> {
        self.compare(field, Comparison::Ge, Literal::Date(at), "filter_date_ge")
    }

    /// `field lt 2024-01-01T00:00:00.000Z`
    pub fn filter_date_lt(self, field: &str, at: DateTime<Utc>) -> SearchResult<Self> {
        self.compare(field, Comparison::Lt, Literal::Date(at), "filter_date_lt")
    }

    /// `field eq null`
    pub fn filter_is_null(self, field: &str) -> SearchResult<Self> {
        self.compare(field, Comparison::Eq, Literal::Null, "filter_is_null")
    }

    pub fn tokens(&self) -> &[QueryToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Render the expression
    pub fn get_query(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            token.render_into(&mut out);
        }
        out
    }

    /// Render, or `None` when nothing was added
    pub fn to_filter(&self) -> Option<String> {
        if self.tokens.is_empty() {
            None
        } else {
            Some(self.get_query())
        }
    }

    /// True when no connector opens the expression
    pub fn starts_cleanly(&self) -> bool {
        self.tokens.first().map_or(true, |t| !t.is_connector())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_connectors_on_empty_builder_are_dropped() {
        assert_eq!(QueryBuilder::create().and().get_query(), "");
        assert_eq!(QueryBuilder::create().or().not().and().get_query(), "");
    }

    #[test]
    fn test_equal_and_equal() {
        let query = QueryBuilder::create()
            .filter_equal("a", "1")
            .unwrap()
            .and()
            .filter_equal("b", "2")
            .unwrap()
            .get_query();
        assert_eq!(query, "a eq '1' and b eq '2' ");
    }

    #[test]
    fn test_not_equal_and_not() {
        let query = QueryBuilder::create()
            .filter_equal("Type", "twin")
            .unwrap()
            .and()
            .not()
            .filter_not_equal("Category", "Model")
            .unwrap()
            .get_query();
        assert_eq!(query, "Type eq 'twin' and not Category ne 'Model' ");
    }

    #[test]
    fn test_search_in() {
        let empty = QueryBuilder::create()
            .search_in("Type", Vec::<String>::new())
            .unwrap();
        assert_eq!(empty.get_query(), "");

        let query = QueryBuilder::create()
            .search_in("Type", ["HVAC", "Chiller"])
            .unwrap()
            .get_query();
        assert_eq!(query, "search.in(Type, 'HVAC,Chiller', ',') ");
    }

    #[test]
    fn test_search_in_array() {
        let query = QueryBuilder::create()
            .search_in_array("ModelIds", ["dtmi:a;1", "dtmi:b;1"])
            .unwrap()
            .get_query();
        assert_eq!(
            query,
            "ModelIds/any(f: search.in(f, 'dtmi:a;1,dtmi:b;1', ',')) "
        );
    }

    #[test]
    fn test_filter_contains_and_grouping() {
        let query = QueryBuilder::create()
            .filter_equal("Type", "twin")
            .unwrap()
            .and()
            .open_parenthesis()
            .filter_equal("SiteId", "site-1")
            .unwrap()
            .or()
            .filter_contains("Location", "site-1")
            .unwrap()
            .close_parenthesis()
            .get_query();
        assert_eq!(
            query,
            "Type eq 'twin' and (SiteId eq 'site-1' or Location/any(f: f eq 'site-1') )"
        );
    }

    #[test]
    fn test_quotes_are_escaped() {
        let query = QueryBuilder::create()
            .filter_equal("Names", "O'Hare")
            .unwrap()
            .get_query();
        assert_eq!(query, "Names eq 'O''Hare' ");

        let query = QueryBuilder::create()
            .search_in("Names", ["it's"])
            .unwrap()
            .get_query();
        assert_eq!(query, "search.in(Names, 'it''s', ',') ");
    }

    #[test]
    fn test_empty_field_or_value_is_rejected() {
        assert!(QueryBuilder::create().filter_equal("", "x").is_err());
        assert!(QueryBuilder::create().filter_equal("Type", "").is_err());
        assert!(QueryBuilder::create().filter_not_equal("Type", " ").is_err());
        assert!(QueryBuilder::create().filter_contains("Tags", "").is_err());
        assert!(QueryBuilder::create().search_in("", ["a"]).is_err());
        assert!(QueryBuilder::create().search_in_array("", ["a"]).is_err());
        assert!(QueryBuilder::create().filter_is_null("").is_err());
    }

    #[test]
    fn test_date_and_null_predicates() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let query = QueryBuilder::create()
            .filter_equal("Type", "rule")
            .unwrap()
            .and()
            .open_parenthesis()
            .filter_date_lt("IndexedDate", at)
            .unwrap()
            .or()
            .filter_is_null("IndexedDate")
            .unwrap()
            .close_parenthesis()
            .get_query();
        assert_eq!(
            query,
            "Type eq 'rule' and (IndexedDate lt 2024-03-01T12:30:00.000Z or IndexedDate eq null )"
        );
    }

    #[test]
    fn test_to_filter() {
        assert_eq!(QueryBuilder::create().and().to_filter(), None);
        assert_eq!(
            QueryBuilder::create()
                .filter_equal("Type", "twin")
                .unwrap()
                .to_filter()
                .as_deref(),
            Some("Type eq 'twin' ")
        );
    }
}
