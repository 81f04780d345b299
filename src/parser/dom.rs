use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static EXPERIENCE_ANCHOR: LazyLock<Selector> = LazyLock::new(|| sel("#experience"));
static SKILLS_ANCHOR: LazyLock<Selector> = LazyLock::new(|| sel("#skills"));
static LIST: LazyLock<Selector> = LazyLock::new(|| sel("ul"));
static PAGED_ITEM: LazyLock<Selector> = LazyLock::new(|| sel("li.pvs-list__paged-list-item"));
static LINK: LazyLock<Selector> = LazyLock::new(|| sel("a[href]"));
static NAV_TEXT: LazyLock<Selector> = LazyLock::new(|| sel("span.pvs-navigation__text"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| sel(".t-bold"));
static SUBTITLE: LazyLock<Selector> =
    LazyLock::new(|| sel("span.t-normal:not(.t-black--light)"));
static CAPTION: LazyLock<Selector> = LazyLock::new(|| sel("span.t-black--light"));
static ARIA_VISIBLE: LazyLock<Selector> = LazyLock::new(|| sel(r#"span[aria-hidden="true"]"#));
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| sel(".inline-show-more-text"));
static ITEM: LazyLock<Selector> = LazyLock::new(|| sel("li"));
static PROFILE_NAME: LazyLock<Selector> = LazyLock::new(|| sel("h1.text-heading-xlarge"));
static PROFILE_LOCATION: LazyLock<Selector> =
    LazyLock::new(|| sel(".pv-text-details__left-panel span.text-body-small"));

/// Anything that shows a profile (or one of its detail pages) has loaded.
pub static PROFILE_MARKER: LazyLock<Selector> = LazyLock::new(|| {
    sel("h1.text-heading-xlarge, #experience, #skills, li.pvs-list__paged-list-item")
});

/// Top-level entries of a paginated detail page.
pub static PAGED_ENTRY: LazyLock<Selector> = LazyLock::new(|| sel("li.pvs-list__paged-list-item"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Experience,
    Skills,
}

impl Section {
    fn anchor(self) -> &'static Selector {
        match self {
            Section::Experience => &EXPERIENCE_ANCHOR,
            Section::Skills => &SKILLS_ANCHOR,
        }
    }

    /// Word used by the section-level "Show all ..." link.
    pub fn show_all_noun(self) -> &'static str {
        match self {
            Section::Experience => "experiences",
            Section::Skills => "skills",
        }
    }
}

// ── Section-level queries ──

pub fn section_anchor(doc: &Html, section: Section) -> Option<ElementRef<'_>> {
    doc.select(section.anchor()).next()
}

/// Entries rendered inline on the profile: the anchor's enclosing `<section>`,
/// its first list, that list's direct items.
pub fn inline_entries(doc: &Html, section: Section) -> Vec<ElementRef<'_>> {
    let Some(anchor) = section_anchor(doc, section) else {
        return Vec::new();
    };
    let Some(container) = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "section")
    else {
        return Vec::new();
    };
    container
        .select(&LIST)
        .next()
        .map(|ul| child_items(ul))
        .unwrap_or_default()
}

/// Top-level items of a "show all" detail page.
pub fn paginated_entries(doc: &Html) -> Vec<ElementRef<'_>> {
    doc.select(&PAGED_ITEM)
        .filter(|li| enclosing_item(li).is_none())
        .collect()
}

/// Section-level "Show all N <noun>" link, outside any entry.
pub fn show_all_link<'a>(doc: &'a Html, noun: &str) -> Option<&'a str> {
    doc.select(&LINK)
        .filter(|a| enclosing_item(a).is_none())
        .find(|a| is_show_all(a, noun))
        .and_then(|a| a.value().attr("href"))
}

// ── Entry-level queries ──

/// Per-company "Show all N positions" link.
pub fn overflow_link<'a>(entry: ElementRef<'a>) -> Option<&'a str> {
    entry
        .select(&LINK)
        .find(|a| is_show_all(a, "position"))
        .and_then(|a| a.value().attr("href"))
}

/// Nested items that carry their own title: one per position in a
/// multi-position entry, none in a single-position entry.
pub fn position_sub_entries(entry: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    entry
        .select(&ITEM)
        .filter(|li| li.select(&TITLE).next().is_some())
        .filter(|li| enclosing_item(li).is_some_and(|owner| owner.id() == entry.id()))
        .collect()
}

/// The unit's own bold line; titles of nested items do not count.
pub fn entry_title(unit: ElementRef<'_>) -> Option<String> {
    unit.select(&TITLE)
        .find(|s| owned_by(unit, s))
        .and_then(visible_line)
}

/// The entry's own middle line ("Acme Corp · Full-time").
pub fn entry_subtitle(unit: ElementRef<'_>) -> Option<String> {
    unit.select(&SUBTITLE)
        .find(|s| owned_by(unit, s))
        .and_then(visible_line)
}

/// Light caption lines owned by this unit (date range, location).
pub fn entry_captions(unit: ElementRef<'_>) -> Vec<String> {
    unit.select(&CAPTION)
        .filter(|s| owned_by(unit, s))
        .filter_map(visible_line)
        .collect()
}

pub fn description_block(unit: ElementRef<'_>) -> Option<ElementRef<'_>> {
    unit.select(&DESCRIPTION).next()
}

/// First link text inside a unit, used where no bold title is rendered.
pub fn first_link_text(unit: ElementRef<'_>) -> Option<String> {
    unit.select(&LINK).find_map(visible_line)
}

// ── Profile header ──

pub fn profile_name(doc: &Html) -> Option<String> {
    doc.select(&PROFILE_NAME).next().and_then(visible_line)
}

pub fn profile_location(doc: &Html) -> Option<String> {
    doc.select(&PROFILE_LOCATION).next().and_then(visible_line)
}

// ── Text ──

/// Text a reader sees: the `aria-hidden` copy when the page renders one (the
/// other copy is for screen readers), `<br>` as newline.
pub fn visible_text(el: ElementRef<'_>) -> String {
    let target = el.select(&ARIA_VISIBLE).next().unwrap_or(el);
    let mut out = String::new();
    for node in target.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) if matches!(e.name(), "br" | "p" | "li") => out.push('\n'),
            _ => {}
        }
    }
    out
}

/// Visible text collapsed onto one line; `None` when blank.
pub fn visible_line(el: ElementRef<'_>) -> Option<String> {
    let line = visible_text(el).split_whitespace().collect::<Vec<_>>().join(" ");
    (!line.is_empty()).then_some(line)
}

// ── Helpers ──

fn child_items(ul: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    ul.children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "li")
        .collect()
}

fn enclosing_item<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "li")
}

fn owned_by(unit: ElementRef<'_>, el: &ElementRef<'_>) -> bool {
    if unit.value().name() != "li" {
        return true;
    }
    enclosing_item(el).is_some_and(|owner| owner.id() == unit.id())
}

fn is_show_all(link: &ElementRef<'_>, noun: &str) -> bool {
    link.select(&NAV_TEXT)
        .next()
        .map(|span| span.text().collect::<String>())
        .is_some_and(|text| text.contains("Show all") && text.contains(noun))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> Html {
        let html = std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap();
        Html::parse_document(&html)
    }

    #[test]
    fn inline_experience_entries() {
        let doc = fixture("profile_inline");
        let entries = inline_entries(&doc, Section::Experience);
        assert_eq!(entries.len(), 3);
        assert!(show_all_link(&doc, "experiences").is_none());
    }

    #[test]
    fn inline_skills_entries_are_separate_from_experience() {
        let doc = fixture("profile_inline");
        let skills = inline_entries(&doc, Section::Skills);
        assert_eq!(skills.len(), 3);
    }

    #[test]
    fn show_all_link_on_paginated_profile() {
        let doc = fixture("profile_paginated");
        assert_eq!(
            show_all_link(&doc, "experiences"),
            Some("/in/sam-lee/details/experience/")
        );
        assert_eq!(
            show_all_link(&doc, "skills"),
            Some("https://www.linkedin.com/in/sam-lee/details/skills/")
        );
    }

    #[test]
    fn paginated_entries_skip_nested_items() {
        let doc = fixture("experience_details");
        let entries = paginated_entries(&doc);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn sub_entries_only_in_multi_position_entries() {
        let doc = fixture("profile_inline");
        let entries = inline_entries(&doc, Section::Experience);
        assert!(position_sub_entries(entries[0]).is_empty());
        assert_eq!(position_sub_entries(entries[1]).len(), 2);
    }

    #[test]
    fn overflow_link_scoped_to_entry() {
        let doc = fixture("experience_details");
        let entries = paginated_entries(&doc);
        assert_eq!(
            overflow_link(entries[0]),
            Some("https://www.linkedin.com/in/sam-lee/details/experience/globex/")
        );
        assert!(overflow_link(entries[1]).is_none());
    }

    #[test]
    fn visible_text_prefers_aria_hidden_copy() {
        let doc = Html::parse_fragment(
            r#"<div class="t-bold"><span aria-hidden="true">Engineer</span><span class="visually-hidden">Engineer</span></div>"#,
        );
        let bold = doc.select(&TITLE).next().unwrap();
        assert_eq!(visible_line(bold).as_deref(), Some("Engineer"));
    }

    #[test]
    fn br_becomes_newline() {
        let doc = Html::parse_fragment(
            r#"<div class="inline-show-more-text"><span aria-hidden="true">one<br>two</span></div>"#,
        );
        let block = doc.select(&DESCRIPTION).next().unwrap();
        assert_eq!(visible_text(block), "one\ntwo");
    }

    #[test]
    fn captions_belong_to_their_own_item() {
        let doc = fixture("profile_inline");
        let entries = inline_entries(&doc, Section::Experience);
        let header = entry_captions(entries[1]);
        assert_eq!(header, vec!["Springfield, IL".to_string()]);
    }

    #[test]
    fn title_of_nested_item_is_not_the_entry_title() {
        let doc = Html::parse_document(
            r#"<ul><li id="entry"><a><span aria-hidden="true">Globex</span></a>
               <ul><li><div class="t-bold"><span aria-hidden="true">Manager</span></div></li></ul>
            </li></ul>"#,
        );
        let entry = doc.select(&ITEM).next().unwrap();
        assert_eq!(entry_title(entry), None);
        assert_eq!(position_sub_entries(entry).len(), 1);
    }

    #[test]
    fn profile_header_fields() {
        let doc = fixture("profile_inline");
        assert_eq!(profile_name(&doc).as_deref(), Some("Jane Doe"));
        assert_eq!(profile_location(&doc).as_deref(), Some("Austin, Texas, United States"));
    }
}
