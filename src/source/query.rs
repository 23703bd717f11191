//! Renders the operator's SQL template into one page query.

use super::CandidateFilter;

use regex::Regex;
use std::sync::LazyLock;

/// Replaced in the template by the gender clause. Gender is inferred locally,
/// so the clause is always the no-op below.
const GENDER_PLACEHOLDER: &str = "...";
const GENDER_NOOP: &str = "1=1";

// Literal patterns; a failure here is a programming error.
static TRAILING_LIMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\s+LIMIT\s+\d+(\s+OFFSET\s+\d+)?[\s;]*$").expect("static regex")
});
static TRAILING_ORDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\s+(ORDER\s+BY\s+.+)$").expect("static regex"));
static WHERE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("static regex"));

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

struct ClauseWriter {
    sql: String,
    has_where: bool,
}

impl ClauseWriter {
    fn push(&mut self, clause: &str) {
        let joiner = if self.has_where { "AND" } else { "WHERE" };
        self.sql = format!("{} {} {}", self.sql, joiner, clause);
        self.has_where = true;
    }
}

/// Builds the SQL for one page.
///
/// Any trailing `LIMIT`/`OFFSET` in the template is dropped and replaced by
/// the page bounds. A trailing `ORDER BY` is kept and moved after the added
/// filters; without one, rows come back in random order.
pub fn render_page_query(
    template: &str,
    filter: &CandidateFilter,
    limit: usize,
    offset: usize,
) -> String {
    let base = template.trim().trim_end_matches(';').trim_end();
    let base = TRAILING_LIMIT.replace(base, "").into_owned();

    let (base, order_by) = match TRAILING_ORDER.captures(&base) {
        Some(caps) => {
            let order = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let start = caps.get(0).map(|m| m.start()).unwrap_or(base.len());
            (base[..start].to_string(), Some(order))
        }
        None => (base, None),
    };

    let mut writer = if base.contains(GENDER_PLACEHOLDER) {
        let sql = base.replacen(GENDER_PLACEHOLDER, GENDER_NOOP, 1);
        ClauseWriter {
            has_where: WHERE_KEYWORD.is_match(&sql),
            sql,
        }
    } else {
        let mut writer = ClauseWriter {
            has_where: WHERE_KEYWORD.is_match(&base),
            sql: base,
        };
        writer.push(GENDER_NOOP);
        writer
    };

    writer.push("first_name IS NOT NULL");

    if let Some(ref industry) = filter.industry {
        writer.push(&format!(
            "LOWER(industry) LIKE LOWER({})",
            quote(&format!("%{}%", industry))
        ));
    }

    if !filter.enabled_sources.is_empty() {
        let list = filter
            .enabled_sources
            .iter()
            .map(|s| quote(s))
            .collect::<Vec<_>>()
            .join(", ");
        writer.push(&format!("source IN ({})", list));
    }

    let order_by = order_by.unwrap_or_else(|| "ORDER BY RAND()".to_string());
    format!("{} {} LIMIT {} OFFSET {}", writer.sql, order_by, limit, offset)
}
