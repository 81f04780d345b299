use scraper::{ElementRef, Html};
use tracing::{debug, warn};
use url::Url;

use super::{fields, CompanyGroup, ExtractContext};
use crate::error::ExtractError;
use crate::page::same_site_target;
use crate::parser::dom::{self, Section};
use crate::parser::layout::Layout;

/// What one top-level entry yielded, before the company name is required.
#[derive(Debug, Clone)]
pub struct EntryData {
    pub company: Option<String>,
    pub group: CompanyGroup,
    /// Resolved per-company overflow link, when the position list is truncated.
    pub overflow: Option<Url>,
}

/// A company group in page order, possibly still waiting for its overflow page.
#[derive(Debug, Clone)]
pub struct PendingGroup {
    pub index: usize,
    pub group: CompanyGroup,
    pub overflow: Option<Url>,
}

/// The section's entries for the given layout.
pub fn entries<'a>(doc: &'a Html, layout: Layout, section: Section) -> Vec<ElementRef<'a>> {
    match layout {
        Layout::Inline => dom::inline_entries(doc, section),
        Layout::Paginated => dom::paginated_entries(doc),
    }
}

/// Read one entry. A nested sub-list of titled items marks a multi-position
/// entry whose own text gives only the company; otherwise the entry's own text
/// gives the company and the single position.
pub fn read_entry(entry: ElementRef<'_>, page_url: Option<&Url>, ctx: &ExtractContext) -> EntryData {
    let subs = dom::position_sub_entries(entry);

    let (company, units, fallback_location) = if subs.is_empty() {
        let company = dom::entry_subtitle(entry).and_then(|s| fields::company_name(&s));
        (company, vec![entry], None)
    } else {
        let company = dom::entry_title(entry).and_then(|s| fields::company_name(&s));
        let header_location = dom::entry_captions(entry)
            .into_iter()
            .find(|c| !fields::has_date_token(c));
        (company, subs, header_location)
    };

    let mut group = CompanyGroup::new(company.clone().unwrap_or_default());
    group.titles = fields::titles(&units);
    group.descriptions = fields::descriptions(&units);
    group.date_ranges = fields::date_ranges(&units, ctx.today);
    group.locations = fields::locations(&units, fallback_location.as_deref());

    let overflow = dom::overflow_link(entry)
        .and_then(|href| page_url.and_then(|base| same_site_target(base, href)));

    EntryData {
        company,
        group,
        overflow,
    }
}

/// All entries of the experience section, in page order.
pub fn read_entries(doc: &Html, page_url: Option<&Url>, ctx: &ExtractContext) -> Vec<EntryData> {
    entries(doc, ctx.layout, Section::Experience)
        .into_iter()
        .map(|entry| read_entry(entry, page_url, ctx))
        .collect()
}

/// Company groups of the experience section. Entries without a company name
/// are skipped; the remaining groups keep their page index.
pub fn extract_groups(doc: &Html, page_url: Option<&Url>, ctx: &ExtractContext) -> Vec<PendingGroup> {
    let mut groups = Vec::new();
    for (index, data) in read_entries(doc, page_url, ctx).into_iter().enumerate() {
        match require_company(data, index) {
            Ok(pending) => {
                debug!(
                    company_index = index,
                    company = %pending.group.company_name,
                    positions = pending.group.len(),
                    truncated = pending.overflow.is_some(),
                    "company group"
                );
                groups.push(pending);
            }
            Err(e) => warn!(company_index = index, field = "company", error = %e, "skipping entry"),
        }
    }
    groups
}

fn require_company(data: EntryData, index: usize) -> Result<PendingGroup, ExtractError> {
    if data.company.is_none() {
        return Err(ExtractError::NotFound {
            field: "company",
            index,
        });
    }
    Ok(PendingGroup {
        index,
        group: data.group,
        overflow: data.overflow,
    })
}
