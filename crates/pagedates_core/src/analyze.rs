use std::collections::HashSet;

use anyhow::Result;

use crate::client::ConfluenceApi;
use crate::model::{PageRecord, PageSummary};
use crate::report::ReportColumns;

/// Listing batch size; a batch shorter than this ends pagination.
pub const PAGE_BATCH_LIMIT: usize = 50;

/// How often the observer hears about resolver progress.
pub const PROGRESS_INTERVAL: usize = 50;

/// Checkpoint notifications from the pipeline. Cosmetic only; implementations
/// must not influence the data flow. All methods default to no-ops so tests
/// can pass [`SilentProgress`].
pub trait ProgressObserver {
    /// Running total after each listing batch.
    fn pages_listed(&self, _total: usize) {}

    /// Listing finished, resolution is about to start.
    fn analysis_started(&self, _total: usize) {}

    /// Every [`PROGRESS_INTERVAL`] resolved pages.
    fn pages_analyzed(&self, _done: usize, _total: usize) {}
}

pub struct SilentProgress;

impl ProgressObserver for SilentProgress {}

/// Retrieve the complete page listing of a space, batch by batch, until the
/// API returns a short batch. An unknown space key yields an empty listing;
/// any batch-level error aborts since a partial listing must not be reported
/// as complete. Duplicate ids across batches are dropped.
pub fn collect_pages(
    api: &dyn ConfluenceApi,
    space_key: &str,
    progress: &dyn ProgressObserver,
) -> Result<Vec<PageSummary>> {
    let mut pages = Vec::new();
    let mut seen = HashSet::new();
    let mut start = 0;
    loop {
        let batch = api.content_batch(space_key, start, PAGE_BATCH_LIMIT)?;
        let batch_len = batch.len();
        for page in batch {
            if seen.insert(page.id.clone()) {
                pages.push(page);
            }
        }
        progress.pages_listed(pages.len());
        if batch_len < PAGE_BATCH_LIMIT {
            break;
        }
        start += PAGE_BATCH_LIMIT;
    }
    Ok(pages)
}

/// Fill in the requested date fields for every listed page. The modified
/// date comes from the listing's version metadata; the viewed date is a
/// best-effort per-page lookup whose failure never affects other pages.
pub fn resolve_dates(
    api: &dyn ConfluenceApi,
    pages: Vec<PageSummary>,
    columns: ReportColumns,
    progress: &dyn ProgressObserver,
) -> Vec<PageRecord> {
    let total = pages.len();
    progress.analysis_started(total);
    let mut records = Vec::with_capacity(total);
    for (index, page) in pages.into_iter().enumerate() {
        let date_modified = if columns.include_modified {
            page.version_when
        } else {
            None
        };
        let date_viewed = if columns.include_viewed {
            api.last_viewed(&page.id)
        } else {
            None
        };
        records.push(PageRecord {
            id: page.id,
            title: page.title,
            url: page.url,
            date_modified,
            date_viewed,
        });
        let done = index + 1;
        if done % PROGRESS_INTERVAL == 0 {
            progress.pages_analyzed(done, total);
        }
    }
    records
}

/// The full Lister → Resolver pipeline for one space.
pub fn analyze_space(
    api: &dyn ConfluenceApi,
    space_key: &str,
    columns: ReportColumns,
    progress: &dyn ProgressObserver,
) -> Result<Vec<PageRecord>> {
    let pages = collect_pages(api, space_key, progress)?;
    Ok(resolve_dates(api, pages, columns, progress))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use anyhow::{Result, bail};
    use chrono::{DateTime, FixedOffset};

    use super::{PAGE_BATCH_LIMIT, ProgressObserver, SilentProgress, analyze_space, collect_pages, resolve_dates};
    use crate::client::ConfluenceApi;
    use crate::model::{PageSummary, parse_api_timestamp};
    use crate::report::ReportColumns;

    struct FakeApi {
        pages: Vec<PageSummary>,
        views: HashMap<String, DateTime<FixedOffset>>,
        fail_from_offset: Option<usize>,
        batch_offsets: RefCell<Vec<usize>>,
        view_lookups: RefCell<Vec<String>>,
    }

    impl FakeApi {
        fn new(pages: Vec<PageSummary>) -> Self {
            Self {
                pages,
                views: HashMap::new(),
                fail_from_offset: None,
                batch_offsets: RefCell::new(Vec::new()),
                view_lookups: RefCell::new(Vec::new()),
            }
        }
    }

    impl ConfluenceApi for FakeApi {
        fn content_batch(
            &self,
            _space_key: &str,
            start: usize,
            limit: usize,
        ) -> Result<Vec<PageSummary>> {
            if let Some(fail_from) = self.fail_from_offset
                && start >= fail_from
            {
                bail!("simulated transport failure");
            }
            self.batch_offsets.borrow_mut().push(start);
            let end = (start + limit).min(self.pages.len());
            if start >= self.pages.len() {
                return Ok(Vec::new());
            }
            Ok(self.pages[start..end].to_vec())
        }

        fn last_viewed(&self, page_id: &str) -> Option<DateTime<FixedOffset>> {
            self.view_lookups.borrow_mut().push(page_id.to_string());
            self.views.get(page_id).copied()
        }
    }

    struct RecordingProgress {
        listed: RefCell<Vec<usize>>,
        analyzed: RefCell<Vec<(usize, usize)>>,
    }

    impl RecordingProgress {
        fn new() -> Self {
            Self {
                listed: RefCell::new(Vec::new()),
                analyzed: RefCell::new(Vec::new()),
            }
        }
    }

    impl ProgressObserver for RecordingProgress {
        fn pages_listed(&self, total: usize) {
            self.listed.borrow_mut().push(total);
        }

        fn pages_analyzed(&self, done: usize, total: usize) {
            self.analyzed.borrow_mut().push((done, total));
        }
    }

    fn summaries(count: usize) -> Vec<PageSummary> {
        (0..count)
            .map(|index| PageSummary {
                id: format!("id-{index}"),
                title: format!("Page {index}"),
                url: format!("https://wiki.example.org/display/DEV/id-{index}"),
                version_when: parse_api_timestamp("2024-08-14T10:00:00Z"),
            })
            .collect()
    }

    const MODIFIED_ONLY: ReportColumns = ReportColumns {
        include_modified: true,
        include_viewed: false,
    };
    const BOTH: ReportColumns = ReportColumns {
        include_modified: true,
        include_viewed: true,
    };

    #[test]
    fn pagination_walks_offsets_until_a_short_batch() {
        let api = FakeApi::new(summaries(125));
        let pages = collect_pages(&api, "DEV", &SilentProgress).expect("collect");
        assert_eq!(pages.len(), 125);
        assert_eq!(*api.batch_offsets.borrow(), vec![0, 50, 100]);
    }

    #[test]
    fn exact_multiple_of_batch_size_needs_one_extra_empty_batch() {
        let api = FakeApi::new(summaries(PAGE_BATCH_LIMIT));
        let pages = collect_pages(&api, "DEV", &SilentProgress).expect("collect");
        assert_eq!(pages.len(), PAGE_BATCH_LIMIT);
        assert_eq!(*api.batch_offsets.borrow(), vec![0, 50]);
    }

    #[test]
    fn unknown_space_yields_empty_listing() {
        let api = FakeApi::new(Vec::new());
        let pages = collect_pages(&api, "NOPE", &SilentProgress).expect("collect");
        assert!(pages.is_empty());
    }

    #[test]
    fn duplicate_ids_are_dropped() {
        let mut pages = summaries(3);
        pages.push(pages[0].clone());
        let api = FakeApi::new(pages);
        let collected = collect_pages(&api, "DEV", &SilentProgress).expect("collect");
        assert_eq!(collected.len(), 3);
    }

    #[test]
    fn batch_failure_after_first_page_aborts_the_listing() {
        let mut api = FakeApi::new(summaries(125));
        api.fail_from_offset = Some(50);
        let error = collect_pages(&api, "DEV", &SilentProgress).expect_err("must fail");
        assert!(error.to_string().contains("simulated transport failure"));
    }

    #[test]
    fn resolver_keeps_going_when_view_data_is_missing() {
        let mut api = FakeApi::new(summaries(3));
        api.views.insert(
            "id-1".to_string(),
            parse_api_timestamp("2024-08-20T12:00:00Z").expect("parse"),
        );
        let records = analyze_space(&api, "DEV", BOTH, &SilentProgress).expect("analyze");
        assert_eq!(records.len(), 3);
        assert!(records[0].date_viewed.is_none());
        assert!(records[1].date_viewed.is_some());
        assert!(records[2].date_viewed.is_none());
        assert!(records.iter().all(|record| record.date_modified.is_some()));
    }

    #[test]
    fn resolver_skips_view_lookups_unless_requested() {
        let api = FakeApi::new(summaries(2));
        let records = analyze_space(&api, "DEV", MODIFIED_ONLY, &SilentProgress).expect("analyze");
        assert_eq!(records.len(), 2);
        assert!(api.view_lookups.borrow().is_empty());
        assert!(records.iter().all(|record| record.date_viewed.is_none()));
    }

    #[test]
    fn resolver_drops_modified_dates_when_not_requested() {
        let api = FakeApi::new(summaries(1));
        let columns = ReportColumns {
            include_modified: false,
            include_viewed: true,
        };
        let records = analyze_space(&api, "DEV", columns, &SilentProgress).expect("analyze");
        assert!(records[0].date_modified.is_none());
    }

    #[test]
    fn progress_reports_listing_totals_and_interval_checkpoints() {
        let api = FakeApi::new(summaries(120));
        let progress = RecordingProgress::new();
        let records = analyze_space(&api, "DEV", MODIFIED_ONLY, &progress).expect("analyze");
        assert_eq!(records.len(), 120);
        assert_eq!(*progress.listed.borrow(), vec![50, 100, 120]);
        assert_eq!(*progress.analyzed.borrow(), vec![(50, 120), (100, 120)]);
    }

    #[test]
    fn resolver_preserves_listing_order() {
        let api = FakeApi::new(summaries(5));
        let pages = collect_pages(&api, "DEV", &SilentProgress).expect("collect");
        let records = resolve_dates(&api, pages, MODIFIED_ONLY, &SilentProgress);
        let ids = records.iter().map(|record| record.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["id-0", "id-1", "id-2", "id-3", "id-4"]);
    }
}
