//! In-process filtering, sorting, pagination and aggregation.
//!
//! The file and GitHub adapters load entries and answer every query here.
//! The relational adapter pushes queries into SQL but falls back to
//! [`compute_time_series`] when the dialect query fails.

use std::cmp::Ordering;

use crate::errors::Result;
use crate::models::{
    DateRange, DevlogEntry, DevlogFilter, DevlogStats, DevlogStatus, PaginatedResult,
    PaginationMeta, PaginationOptions, SortField, SortOrder, TimeSeriesDataPoint, TimeSeriesStats,
};

/// True when `entry` satisfies every criterion of `filter` (pagination is
/// ignored).
pub fn matches(entry: &DevlogEntry, filter: &DevlogFilter) -> bool {
    let archived_ok = match filter.archived {
        Some(true) => entry.archived,
        _ => !entry.archived,
    };
    if !archived_ok {
        return false;
    }
    if !filter.status.is_empty() && !filter.status.contains(&entry.status) {
        return false;
    }
    if !filter.entry_type.is_empty() && !filter.entry_type.contains(&entry.entry_type) {
        return false;
    }
    if !filter.priority.is_empty() && !filter.priority.contains(&entry.priority) {
        return false;
    }
    if let Some(assignee) = &filter.assignee
        && entry.assignee.as_deref() != Some(assignee.as_str())
    {
        return false;
    }
    if filter.from_date.is_some_and(|from| entry.created_at < from) {
        return false;
    }
    if filter.to_date.is_some_and(|to| entry.created_at > to) {
        return false;
    }
    if filter
        .updated_since
        .is_some_and(|since| entry.updated_at < since)
    {
        return false;
    }
    match filter.search_text() {
        Some(text) => matches_text(entry, text),
        None => true,
    }
}

/// Lowercased alphanumeric search terms of a free-text query.
pub fn search_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Every term must start a word of the title or description, the way the
/// SQLite FTS5 and MySQL full-text queries match.
fn matches_text(entry: &DevlogEntry, text: &str) -> bool {
    let tokens = search_tokens(text);
    if tokens.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", entry.title, entry.description).to_lowercase();
    let words: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    tokens
        .iter()
        .all(|token| words.iter().any(|word| word.starts_with(token.as_str())))
}

fn compare(a: &DevlogEntry, b: &DevlogEntry, field: SortField) -> Ordering {
    let primary = match field {
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::Id => Ordering::Equal,
        SortField::Title => a.title.cmp(&b.title),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
        SortField::Priority => a.priority.rank().cmp(&b.priority.rank()),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Sorts by the requested field; ties break on id in the same direction.
pub fn sort_entries(entries: &mut [DevlogEntry], pagination: &PaginationOptions) {
    entries.sort_by(|a, b| {
        let ord = compare(a, b, pagination.sort_by);
        match pagination.sort_order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

/// Filters, sorts and slices `entries` into one page.
pub fn apply(entries: Vec<DevlogEntry>, filter: &DevlogFilter) -> Result<PaginatedResult<DevlogEntry>> {
    let pagination = filter.page()?;
    let mut matched: Vec<DevlogEntry> = entries.into_iter().filter(|e| matches(e, filter)).collect();
    sort_entries(&mut matched, &pagination);

    let total = matched.len() as u64;
    let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
    let items = matched
        .into_iter()
        .skip(offset)
        .take(pagination.limit as usize)
        .collect();

    Ok(PaginatedResult {
        items,
        pagination: PaginationMeta::new(pagination.page, pagination.limit, total),
    })
}

/// Stats over entries matching `filter`, ignoring pagination.
pub fn compute_stats(entries: &[DevlogEntry], filter: &DevlogFilter) -> DevlogStats {
    let matched: Vec<&DevlogEntry> = entries.iter().filter(|e| matches(e, filter)).collect();
    DevlogStats::from_counts(
        matched.iter().map(|e| (e.status, 1)),
        matched.iter().map(|e| (e.entry_type, 1)),
        matched.iter().map(|e| (e.priority, 1)),
        average_completion_hours(matched.iter().copied()),
    )
}

pub fn average_completion_hours<'a>(entries: impl Iterator<Item = &'a DevlogEntry>) -> Option<f64> {
    let durations: Vec<f64> = entries
        .filter(|e| e.status == DevlogStatus::Done)
        .filter_map(|e| e.closed_at.map(|closed| closed - e.created_at))
        .map(|d| d.num_milliseconds() as f64 / 3_600_000.0)
        .collect();
    if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    }
}

/// Daily series over non-archived entries.
///
/// Every counter only considers entries created on or before the day, so
/// cumulative fields never decrease and `open` never goes negative.
pub fn compute_time_series(entries: &[DevlogEntry], range: DateRange) -> TimeSeriesStats {
    let live: Vec<&DevlogEntry> = entries.iter().filter(|e| !e.archived).collect();

    let data_points = range
        .days()
        .map(|day| {
            let mut point = TimeSeriesDataPoint {
                date: day,
                ..TimeSeriesDataPoint::default()
            };
            for entry in &live {
                let created = entry.created_at.date_naive();
                if created > day {
                    continue;
                }
                point.total_created += 1;
                if created == day {
                    point.daily_created += 1;
                }
                match entry.closed_date() {
                    Some(closed) if closed <= day => {
                        point.total_closed += 1;
                        if entry.status == DevlogStatus::Done {
                            point.total_completed += 1;
                            if closed == day {
                                point.daily_completed += 1;
                            }
                        }
                        *point.status_count_mut(entry.status) += 1;
                    }
                    Some(_) => {}
                    None => *point.status_count_mut(entry.status) += 1,
                }
            }
            point.open = point.total_created - point.total_closed;
            point
        })
        .collect();

    TimeSeriesStats {
        data_points,
        date_range: range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DevlogPriority, DevlogType, TimeSeriesRequest};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn entry(id: i64, title: &str, status: DevlogStatus) -> DevlogEntry {
        let mut e = DevlogEntry::new(title, DevlogType::Task);
        e.id = Some(id);
        e.status = status;
        e.normalize_lifecycle();
        e
    }

    fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    // ── filtering ──

    #[test]
    fn archived_excluded_by_default() {
        let mut archived = entry(1, "old", DevlogStatus::New);
        archived.archived = true;
        let live = entry(2, "new", DevlogStatus::New);

        let filter = DevlogFilter::default();
        assert!(!matches(&archived, &filter));
        assert!(matches(&live, &filter));

        let only_archived = DevlogFilter::default().with_archived(true);
        assert!(matches(&archived, &only_archived));
        assert!(!matches(&live, &only_archived));
    }

    #[test]
    fn multi_valued_fields_are_or_sets() {
        let filter = DevlogFilter::default()
            .with_status(DevlogStatus::New)
            .with_status(DevlogStatus::Blocked);
        assert!(matches(&entry(1, "a", DevlogStatus::New), &filter));
        assert!(matches(&entry(2, "b", DevlogStatus::Blocked), &filter));
        assert!(!matches(&entry(3, "c", DevlogStatus::Done), &filter));
    }

    #[test]
    fn search_is_case_insensitive() {
        let mut e = entry(1, "Fix Login bug", DevlogStatus::New);
        e.description = "OAuth redirect loops".into();
        assert!(matches(&e, &DevlogFilter::default().with_search("login")));
        assert!(matches(&e, &DevlogFilter::default().with_search("oauth")));
        assert!(!matches(&e, &DevlogFilter::default().with_search("payment")));
        assert!(matches(&e, &DevlogFilter::default().with_search("   ")));
    }

    #[test]
    fn search_terms_match_word_prefixes() {
        let mut e = entry(1, "Fix login-page bug", DevlogStatus::New);
        e.description = "OAuth redirect loops".into();
        assert!(matches(&e, &DevlogFilter::default().with_search("log")));
        assert!(matches(&e, &DevlogFilter::default().with_search("page")));
        assert!(matches(&e, &DevlogFilter::default().with_search("fix redir")));
        assert!(!matches(&e, &DevlogFilter::default().with_search("ogin")));
        assert!(!matches(&e, &DevlogFilter::default().with_search("fix payment")));
        // the key is not searched
        assert!(!matches(&e, &DevlogFilter::default().with_search(e.key.clone())));
    }

    #[test]
    fn updated_since_is_inclusive() {
        let mut e = entry(1, "a", DevlogStatus::New);
        e.updated_at = at(5, 10);
        let filter = DevlogFilter {
            updated_since: Some(at(5, 10)),
            ..DevlogFilter::default()
        };
        assert!(matches(&e, &filter));
        let later = DevlogFilter {
            updated_since: Some(at(5, 11)),
            ..DevlogFilter::default()
        };
        assert!(!matches(&e, &later));
    }

    // ── sorting and pagination ──

    #[test]
    fn default_sort_is_updated_desc_with_id_tiebreak() {
        let mut a = entry(1, "a", DevlogStatus::New);
        let mut b = entry(2, "b", DevlogStatus::New);
        let mut c = entry(3, "c", DevlogStatus::New);
        a.updated_at = at(2, 0);
        b.updated_at = at(2, 0);
        c.updated_at = at(1, 0);

        let page = apply(vec![c, a, b], &DevlogFilter::default()).unwrap();
        let ids: Vec<_> = page.items.iter().map(|e| e.id.unwrap()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn priority_sort_uses_rank() {
        let mut low = entry(1, "a", DevlogStatus::New);
        low.priority = DevlogPriority::Low;
        let mut critical = entry(2, "b", DevlogStatus::New);
        critical.priority = DevlogPriority::Critical;

        let filter = DevlogFilter::default().with_pagination(
            PaginationOptions::default().sorted(SortField::Priority, SortOrder::Asc),
        );
        let page = apply(vec![critical, low], &filter).unwrap();
        assert_eq!(page.items[0].priority, DevlogPriority::Low);
    }

    #[test]
    fn pages_slice_the_sorted_set() {
        let entries: Vec<_> = (1..=25)
            .map(|i| entry(i, &format!("e{}", i), DevlogStatus::New))
            .collect();
        let filter = DevlogFilter::default().with_pagination(
            PaginationOptions::new(3, 10).sorted(SortField::Id, SortOrder::Asc),
        );
        let page = apply(entries, &filter).unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].id, Some(21));
        assert_eq!(page.pagination.total, 25);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(!page.pagination.has_next_page);
    }

    #[test]
    fn invalid_pagination_is_rejected() {
        let filter = DevlogFilter::default().with_pagination(PaginationOptions::new(1, 5000));
        assert!(apply(Vec::new(), &filter).is_err());
    }

    // ── stats ──

    #[test]
    fn stats_ignore_pagination_and_sum_consistently() {
        let entries = vec![
            entry(1, "a", DevlogStatus::New),
            entry(2, "b", DevlogStatus::Done),
            entry(3, "c", DevlogStatus::Cancelled),
        ];
        let filter = DevlogFilter::default().with_pagination(PaginationOptions::new(1, 1));
        let stats = compute_stats(&entries, &filter);
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.open_entries + stats.closed_entries, stats.total_entries);
        assert_eq!(stats.by_status.values().sum::<u64>(), stats.total_entries);
        assert_eq!(stats.by_type.values().sum::<u64>(), stats.total_entries);
        assert_eq!(stats.by_priority.values().sum::<u64>(), stats.total_entries);
        assert_eq!(stats.closed_entries, 2);
    }

    #[test]
    fn average_completion_only_counts_done() {
        let mut done = entry(1, "a", DevlogStatus::Done);
        done.created_at = at(1, 0);
        done.closed_at = Some(at(1, 6));
        let mut cancelled = entry(2, "b", DevlogStatus::Cancelled);
        cancelled.created_at = at(1, 0);
        cancelled.closed_at = Some(at(3, 0));
        let avg = average_completion_hours([done, cancelled].iter()).unwrap();
        assert!((avg - 6.0).abs() < f64::EPSILON);
    }

    // ── time series ──

    fn series_fixture() -> Vec<DevlogEntry> {
        let mut a = entry(1, "a", DevlogStatus::Done);
        a.created_at = at(1, 9);
        a.updated_at = at(3, 9);
        a.closed_at = Some(at(3, 9));

        let mut b = entry(2, "b", DevlogStatus::InProgress);
        b.created_at = at(2, 9);
        b.updated_at = at(2, 9);

        let mut c = entry(3, "c", DevlogStatus::Cancelled);
        c.created_at = at(2, 10);
        c.updated_at = at(4, 10);
        c.closed_at = None;

        let mut archived = entry(4, "d", DevlogStatus::New);
        archived.created_at = at(1, 0);
        archived.archived = true;
        vec![a, b, c, archived]
    }

    #[test]
    fn time_series_counts_per_day() {
        let range = TimeSeriesRequest {
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            to: NaiveDate::from_ymd_opt(2024, 1, 4),
            days: None,
        }
        .resolve(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap())
        .unwrap();
        let series = compute_time_series(&series_fixture(), range);
        let points = &series.data_points;
        assert_eq!(points.len(), 4);

        assert_eq!(points[0].total_created, 1);
        assert_eq!(points[0].daily_created, 1);
        assert_eq!(points[0].open, 1);
        assert_eq!(points[0].done, 0);

        assert_eq!(points[1].total_created, 3);
        assert_eq!(points[1].in_progress, 1);

        assert_eq!(points[2].daily_completed, 1);
        assert_eq!(points[2].total_completed, 1);
        assert_eq!(points[2].done, 1);

        // cancelled without closed_at closes on its updated_at day
        assert_eq!(points[3].total_closed, 2);
        assert_eq!(points[3].cancelled, 1);
        assert_eq!(points[3].open, 1);
    }

    #[test]
    fn cumulative_fields_never_decrease() {
        let range = TimeSeriesRequest::last_days(10)
            .resolve(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap())
            .unwrap();
        let series = compute_time_series(&series_fixture(), range);
        for pair in series.data_points.windows(2) {
            assert!(pair[1].total_created >= pair[0].total_created);
            assert!(pair[1].total_completed >= pair[0].total_completed);
            assert!(pair[1].total_closed >= pair[0].total_closed);
        }
    }
}
