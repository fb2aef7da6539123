use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset, Utc};

use crate::model::{PageRecord, format_timestamp};

/// Literal placeholder for a date the resolver could not determine.
pub const MISSING_DATE: &str = "N/A";

/// Which date columns the report carries. At least one must be requested;
/// `validate` enforces that before any network call happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportColumns {
    pub include_modified: bool,
    pub include_viewed: bool,
}

impl ReportColumns {
    pub fn validate(self) -> Result<Self> {
        if !self.include_modified && !self.include_viewed {
            bail!("at least one of --date-modified or --date-viewed must be specified");
        }
        Ok(self)
    }

    pub fn header(self) -> Vec<&'static str> {
        let mut columns = vec!["page", "page_url"];
        if self.include_modified {
            columns.push("date_modified");
        }
        if self.include_viewed {
            columns.push("date_viewed");
        }
        columns
    }
}

/// Descending by date. With both columns requested the modified date wins,
/// the viewed date breaks ties, and the title breaks remaining ties so two
/// runs over an unchanged space produce identical files. Missing dates sort
/// after every real date.
pub fn sort_records(records: &mut [PageRecord], columns: ReportColumns) {
    records.sort_by(|a, b| {
        let by_date = if columns.include_modified {
            descending(a.date_modified, b.date_modified).then_with(|| {
                if columns.include_viewed {
                    descending(a.date_viewed, b.date_viewed)
                } else {
                    Ordering::Equal
                }
            })
        } else {
            descending(a.date_viewed, b.date_viewed)
        };
        by_date.then_with(|| a.title.cmp(&b.title))
    });
}

fn descending(a: Option<DateTime<FixedOffset>>, b: Option<DateTime<FixedOffset>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Serialize the report into an in-memory CSV buffer. Rows are emitted in
/// the order given; call [`sort_records`] first.
pub fn render_csv(records: &[PageRecord], columns: ReportColumns) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(columns.header())
        .context("failed to write CSV header")?;
    for record in records {
        let mut row = vec![record.title.clone(), record.url.clone()];
        if columns.include_modified {
            row.push(render_date(record.date_modified));
        }
        if columns.include_viewed {
            row.push(render_date(record.date_viewed));
        }
        writer
            .write_record(&row)
            .with_context(|| format!("failed to write CSV row for page {}", record.id))?;
    }
    writer
        .into_inner()
        .map_err(|error| anyhow::anyhow!("failed to finish CSV buffer: {error}"))
}

fn render_date(value: Option<DateTime<FixedOffset>>) -> String {
    match value {
        Some(value) => format_timestamp(&value),
        None => MISSING_DATE.to_string(),
    }
}

/// Sort, render, and write the report in a single `fs::write` so a failed
/// run never leaves a truncated CSV behind. An empty record set still
/// produces a header-only file.
pub fn write_report(
    path: &Path,
    records: &mut Vec<PageRecord>,
    columns: ReportColumns,
) -> Result<()> {
    sort_records(records, columns);
    let rendered = render_csv(records, columns)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

/// `confluence_pages_<SPACE>_<YYYYMMDD_HHMMSS>.csv`, timestamped in UTC.
pub fn default_report_path(space_key: &str) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("confluence_pages_{space_key}_{stamp}.csv"))
}
