use tracing::{debug, info, warn};

use super::dom::{self, Section};
use crate::error::ExtractError;
use crate::page::{same_site_target, wait_for, PageSource, Waits};

/// The two known renderings of a profile section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Entries listed directly on the profile page.
    Inline,
    /// Entries behind a "Show all" link on a separate detail page.
    Paginated,
}

/// Decide the layout for one section of the current profile page.
///
/// For `Paginated` the "Show all" link is followed before returning, so the
/// source is left on the page the extractors should read.
pub fn classify<S: PageSource + ?Sized>(
    source: &mut S,
    section: Section,
    waits: &Waits,
) -> Result<Layout, ExtractError> {
    let url = source
        .current_url()
        .map(|u| u.to_string())
        .unwrap_or_default();

    if let Err(e) = wait_for(source, &dom::PROFILE_MARKER, "profile content", waits) {
        warn!(url, section = ?section, error = %e, "profile content never appeared");
        return Err(ExtractError::LayoutClassification { url });
    }

    let target = {
        let doc = source.document()?;
        let base = source.current_url();
        dom::show_all_link(doc, section.show_all_noun())
            .and_then(|href| base.and_then(|b| same_site_target(b, href)))
    };

    let Some(target) = target else {
        debug!(section = ?section, "inline layout");
        return Ok(Layout::Inline);
    };

    info!(section = ?section, target = %target, "paginated layout, following show-all link");
    source.navigate(target.as_str())?;
    if let Err(e) = wait_for(source, &dom::PAGED_ENTRY, "paginated entries", waits) {
        // Recoverable: the extractor will simply find no entries.
        warn!(section = ?section, error = %e, "detail page has no entries yet");
    }
    Ok(Layout::Paginated)
}
