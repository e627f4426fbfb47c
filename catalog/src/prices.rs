//! Credit pricing with effective-date windowing and a repo-level fallback.

use {
    chrono::{DateTime, Utc},
    ordo_shared::{
        error::{Error, Result},
        ids::canon_module_id,
    },
    serde::Deserialize,
    std::{collections::BTreeMap, path::Path},
};

/// Special deliverable representing the base module invocation.
pub const RUN_DELIVERABLE: &str = "__run__";

#[derive(Debug, Deserialize)]
struct PriceCsvRow {
    module_id: String,
    deliverable_id: String,
    credits: i64,
    #[serde(default)]
    effective_from: String,
    #[serde(default)]
    effective_to: String,
    #[serde(default)]
    active: String,
}

#[derive(Debug, Clone)]
struct PriceRow {
    module_id: String,
    deliverable_id: String,
    credits: i64,
    effective_from: Option<DateTime<Utc>>,
    effective_to: Option<DateTime<Utc>>,
    active: bool,
}

#[derive(Debug)]
pub struct PriceBook {
    primary: Vec<PriceRow>,
    fallback: Vec<PriceRow>,
}

fn parse_timestamp(raw: &str, path: &Path) -> Result<Option<DateTime<Utc>>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| Error::Infra(format!("bad timestamp {trimmed:?} in {}: {e}", path.display())))
}

fn load_rows(path: &Path) -> Result<Vec<PriceRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::Infra(format!("open {}: {e}", path.display())))?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let raw: PriceCsvRow =
            record.map_err(|e| Error::Infra(format!("parse {}: {e}", path.display())))?;
        let active = raw.active.trim();
        rows.push(PriceRow {
            module_id: canon_module_id(&raw.module_id)?,
            deliverable_id: raw.deliverable_id.trim().to_owned(),
            credits: raw.credits,
            effective_from: parse_timestamp(&raw.effective_from, path)?,
            effective_to: parse_timestamp(&raw.effective_to, path)?,
            active: active.is_empty() || active.eq_ignore_ascii_case("true"),
        });
    }
    Ok(rows)
}

impl PriceBook {
    pub fn load(primary: &Path, fallback: Option<&Path>) -> Result<Self> {
        Ok(Self {
            primary: load_rows(primary)?,
            fallback: fallback.map(load_rows).transpose()?.unwrap_or_default(),
        })
    }

    /// Resolve the credit price of `(module_id, deliverable_id)` at `at`.
    ///
    /// Inactive rows and rows outside their effective window are ignored;
    /// among the survivors the latest `effective_from` wins, with ties
    /// broken by file row order (first loaded wins). The fallback table is
    /// consulted only when the primary has no effective row.
    pub fn price(&self, module_id: &str, deliverable_id: &str, at: DateTime<Utc>) -> Result<i64> {
        let module_id = canon_module_id(module_id)?;
        let deliverable_id = deliverable_id.trim();
        for table in [&self.primary, &self.fallback] {
            if let Some(credits) = pick(table, &module_id, deliverable_id, at) {
                return Ok(credits);
            }
        }
        Err(Error::MissingPrice {
            module_id,
            deliverable_id: deliverable_id.to_owned(),
        })
    }

    /// Per-deliverable price map for one step: the `__run__` base price plus
    /// every requested deliverable. A missing price anywhere is fatal for
    /// planning.
    pub fn breakdown(
        &self,
        module_id: &str,
        requested_deliverables: &[String],
        at: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>> {
        let mut breakdown = BTreeMap::new();
        breakdown.insert(
            RUN_DELIVERABLE.to_owned(),
            self.price(module_id, RUN_DELIVERABLE, at)?,
        );
        for deliverable in requested_deliverables {
            let deliverable = deliverable.trim();
            if deliverable.is_empty() || deliverable == RUN_DELIVERABLE {
                continue;
            }
            breakdown.insert(
                deliverable.to_owned(),
                self.price(module_id, deliverable, at)?,
            );
        }
        Ok(breakdown)
    }
}

fn pick(table: &[PriceRow], module_id: &str, deliverable_id: &str, at: DateTime<Utc>) -> Option<i64> {
    table
        .iter()
        .filter(|row| {
            row.active
                && row.module_id == module_id
                && row.deliverable_id == deliverable_id
                && row.effective_from.is_none_or(|from| from <= at)
                && row.effective_to.is_none_or(|to| to >= at)
        })
        // max_by_key returns the last maximum; reversed enumeration makes
        // the first file row win ties on effective_from.
        .rev()
        .max_by_key(|row| row.effective_from)
        .map(|row| row.credits)
}

#[cfg(test)]
mod tests {
    use {super::*, std::fs, test_case::test_case};

    const HEADER: &str = "module_id,deliverable_id,credits,effective_from,effective_to,active\n";

    fn book(primary_rows: &str, fallback_rows: Option<&str>) -> (tempfile::TempDir, PriceBook) {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("module_prices.csv");
        fs::write(&primary, format!("{HEADER}{primary_rows}")).unwrap();
        let fallback = fallback_rows.map(|rows| {
            let path = dir.path().join("fallback_prices.csv");
            fs::write(&path, format!("{HEADER}{rows}")).unwrap();
            path
        });
        let book = PriceBook::load(&primary, fallback.as_deref()).unwrap();
        (dir, book)
    }

    fn at(iso: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(iso).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn inactive_rows_are_ignored() {
        let (_dir, book) = book(
            "search,__run__,9,,,false\nsearch,__run__,5,,,true\n",
            None,
        );
        assert_eq!(book.price("search", "__run__", at("2026-01-01T00:00:00Z")).unwrap(), 5);
    }

    #[test_case("2025-12-31T23:59:59Z", 3; "before window start uses older row")]
    #[test_case("2026-01-01T00:00:00Z", 7; "window start boundary included")]
    #[test_case("2026-06-01T00:00:00Z", 7; "inside window")]
    fn windowing_picks_latest_effective_from(now: &str, expected: i64) {
        let (_dir, book) = book(
            "search,__run__,3,2025-01-01T00:00:00Z,,true\n\
             search,__run__,7,2026-01-01T00:00:00Z,,true\n",
            None,
        );
        assert_eq!(book.price("search", "__run__", at(now)).unwrap(), expected);
    }

    #[test]
    fn expired_rows_are_ignored() {
        let (_dir, book) = book(
            "search,__run__,3,2025-01-01T00:00:00Z,2025-06-01T00:00:00Z,true\n\
             search,__run__,5,,,true\n",
            None,
        );
        assert_eq!(book.price("search", "__run__", at("2026-01-01T00:00:00Z")).unwrap(), 5);
    }

    #[test]
    fn equal_effective_from_ties_break_by_row_order() {
        let (_dir, book) = book(
            "search,__run__,11,2026-01-01T00:00:00Z,,true\n\
             search,__run__,22,2026-01-01T00:00:00Z,,true\n",
            None,
        );
        // Deterministic: the first file row wins, every time.
        for _ in 0..10 {
            assert_eq!(book.price("search", "__run__", at("2026-02-01T00:00:00Z")).unwrap(), 11);
        }
    }

    #[test]
    fn falls_back_to_repo_table() {
        let (_dir, book) = book("", Some("search,__run__,4,,,true\n"));
        assert_eq!(book.price("search", "__run__", at("2026-01-01T00:00:00Z")).unwrap(), 4);
    }

    #[test]
    fn primary_shadows_fallback() {
        let (_dir, book) = book(
            "search,__run__,5,,,true\n",
            Some("search,__run__,4,,,true\n"),
        );
        assert_eq!(book.price("search", "__run__", at("2026-01-01T00:00:00Z")).unwrap(), 5);
    }

    #[test]
    fn missing_price_is_fatal() {
        let (_dir, book) = book("", None);
        assert!(matches!(
            book.price("search", "__run__", at("2026-01-01T00:00:00Z")),
            Err(Error::MissingPrice { .. })
        ));
    }

    #[test]
    fn breakdown_covers_run_and_requested() {
        let (_dir, book) = book(
            "search,__run__,5,,,true\nsearch,queries,2,,,true\n",
            None,
        );
        let breakdown = book
            .breakdown("search", &["queries".into()], at("2026-01-01T00:00:00Z"))
            .unwrap();
        assert_eq!(breakdown[RUN_DELIVERABLE], 5);
        assert_eq!(breakdown["queries"], 2);
        assert_eq!(breakdown.len(), 2);
    }
}
