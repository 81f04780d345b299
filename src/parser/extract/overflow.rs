use chrono::NaiveDate;
use scraper::Html;
use tracing::{debug, info, warn};
use url::Url;

use super::groups::{read_entries, EntryData};
use super::{CompanyGroup, ExtractContext};
use crate::error::ExtractError;
use crate::page::{wait_for, PageSource, Waits};
use crate::parser::dom;
use crate::parser::layout::Layout;

/// Load a company's full position list from its overflow page.
///
/// The returned group carries `company` as its name and every position the
/// overflow page lists for it, in page order. Entries naming a different
/// company are ignored; if nothing on the page belongs to `company` the
/// group handle is considered stale. Nested overflow links are followed while
/// `depth` allows.
pub fn fetch_group<S: PageSource + ?Sized>(
    source: &mut S,
    url: &Url,
    company: &str,
    index: usize,
    today: NaiveDate,
    waits: &Waits,
    depth: usize,
) -> Result<CompanyGroup, ExtractError> {
    info!(company_index = index, company, url = %url, "following position overflow");
    source.navigate(url.as_str())?;
    wait_for(source, &dom::PAGED_ENTRY, "overflow positions", waits)?;

    let ctx = ExtractContext {
        layout: Layout::Paginated,
        today,
    };
    let entries = {
        let doc: &Html = source.document()?;
        read_entries(doc, source.current_url(), &ctx)
    };

    let mut merged = CompanyGroup::new(company.to_string());
    let mut nested = Vec::new();
    for data in entries {
        if !belongs_to(&data, company) {
            debug!(company_index = index, other = ?data.company, "ignoring foreign entry on overflow page");
            continue;
        }
        if let Some(next) = data.overflow.filter(|next| next != url) {
            nested.push(next);
        }
        for position in data.group.positions() {
            merged.push(position);
        }
    }

    if merged.is_empty() {
        warn!(company_index = index, company, url = %url, "overflow page has no positions for company");
        return Err(ExtractError::Stale {
            index,
            url: url.to_string(),
        });
    }

    if depth > 1 {
        for next in nested {
            match fetch_group(source, &next, company, index, today, waits, depth - 1) {
                Ok(more) => {
                    for position in more.positions() {
                        merged.push(position);
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!(company_index = index, error = %e, "nested overflow skipped");
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(merged)
}

/// Overflow pages usually repeat the company header; entries listing only
/// positions carry no company at all and are taken as ours.
fn belongs_to(data: &EntryData, company: &str) -> bool {
    match &data.company {
        None => true,
        Some(name) => name.eq_ignore_ascii_case(company),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::SnapshotSource;

    const OVERFLOW: &str = "https://www.linkedin.com/in/sam-lee/details/experience/globex/";

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    #[test]
    fn fetches_every_position_for_company() {
        let mut source =
            SnapshotSource::new().with_page(OVERFLOW, fixture("experience_overflow_globex"));
        let url = Url::parse(OVERFLOW).unwrap();
        let group =
            fetch_group(&mut source, &url, "Globex", 0, today(), &Waits::immediate(), 1).unwrap();
        assert_eq!(group.company_name, "Globex");
        assert_eq!(group.len(), 3);
        let positions = group.positions();
        assert_eq!(positions[0].title.as_deref(), Some("Director of Engineering"));
        assert_eq!(positions[2].title.as_deref(), Some("Software Engineer"));
        assert_eq!(positions[2].description, None);
    }

    #[test]
    fn company_match_is_case_insensitive() {
        let mut source =
            SnapshotSource::new().with_page(OVERFLOW, fixture("experience_overflow_globex"));
        let url = Url::parse(OVERFLOW).unwrap();
        let group =
            fetch_group(&mut source, &url, "GLOBEX", 0, today(), &Waits::immediate(), 1).unwrap();
        assert_eq!(group.company_name, "GLOBEX");
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn foreign_company_page_is_stale() {
        let mut source =
            SnapshotSource::new().with_page(OVERFLOW, fixture("experience_overflow_globex"));
        let url = Url::parse(OVERFLOW).unwrap();
        let err = fetch_group(&mut source, &url, "Initech", 4, today(), &Waits::immediate(), 1)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Stale { index: 4, .. }));
        assert!(err.is_recoverable());
    }

    fn nested_pages() -> SnapshotSource {
        SnapshotSource::new()
            .with_page(OVERFLOW, fixture("experience_overflow_nested"))
            .with_page(
                "https://www.linkedin.com/in/sam-lee/details/experience/globex/earlier/",
                fixture("experience_overflow_earlier"),
            )
    }

    fn titles(group: CompanyGroup) -> Vec<String> {
        group
            .positions()
            .into_iter()
            .filter_map(|p| p.title)
            .collect()
    }

    #[test]
    fn nested_overflow_appends_in_page_order() {
        let mut source = nested_pages();
        let url = Url::parse(OVERFLOW).unwrap();
        let group =
            fetch_group(&mut source, &url, "Globex", 0, today(), &Waits::immediate(), 2).unwrap();
        assert_eq!(
            titles(group),
            vec![
                "Director of Engineering",
                "Engineering Manager",
                "Software Engineer",
                "Intern"
            ]
        );
        // the link back to the same page is not followed again
        assert_eq!(source.visits().len(), 2);
    }

    #[test]
    fn nested_overflow_needs_depth() {
        let mut source = nested_pages();
        let url = Url::parse(OVERFLOW).unwrap();
        let group =
            fetch_group(&mut source, &url, "Globex", 0, today(), &Waits::immediate(), 1).unwrap();
        assert_eq!(titles(group), vec!["Director of Engineering", "Engineering Manager"]);
        assert_eq!(source.visits().len(), 1);
    }

    #[test]
    fn empty_overflow_page_times_out() {
        let mut source = SnapshotSource::new().with_page(OVERFLOW, "<html><body></body></html>");
        let url = Url::parse(OVERFLOW).unwrap();
        let err = fetch_group(&mut source, &url, "Globex", 0, today(), &Waits::immediate(), 1)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Timeout { .. }));
    }
}
