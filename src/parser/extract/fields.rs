use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::ElementRef;

use super::DateRange;
use crate::parser::dom;

static DATE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) (\d{4})\b|\bPresent\b").unwrap()
});

const MONTHS: &[&str] = &[
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const COMPANY_SEPARATOR: &str = " · ";

const EMOJI_PRESENTATION: char = '\u{FE0F}';

// ── Text-level ──

/// "Acme Corp · Full-time" → "Acme Corp".
pub fn company_name(label: &str) -> Option<String> {
    let name = label.split(COMPANY_SEPARATOR).next().unwrap_or("").trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Strip emoji, bullets and replacement characters, drop blank lines, join the
/// rest with single spaces. `None` when nothing visible is left.
pub fn clean_description(raw: &str) -> Option<String> {
    let mut stripped = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        // a text symbol followed by VS16 renders as emoji
        if chars.peek() == Some(&EMOJI_PRESENTATION) {
            continue;
        }
        if !is_emoji_char(c) && c != '•' && c != '\u{FFFD}' {
            stripped.push(c);
        }
    }
    let joined = stripped
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn is_emoji_char(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF
            | 0x2190..=0x21FF
            | 0x203C
            | 0x2049
            | 0x2300..=0x23FF
            | 0x2600..=0x27BF
            | 0x2B00..=0x2BFF
            | 0x200D
            | 0x20E3
            | 0xFE0E..=0xFE0F
    )
}

/// Read `MonthAbbrev Year` and `Present` tokens in page order. Two tokens give
/// start and end, one gives a start only, none gives an empty range.
pub fn parse_date_range(caption: &str, today: NaiveDate) -> DateRange {
    let tokens: Vec<NaiveDate> = DATE_TOKEN_RE
        .captures_iter(caption)
        .filter_map(|caps| match (caps.get(1), caps.get(2)) {
            (Some(month), Some(year)) => {
                let month = MONTHS.iter().position(|m| *m == month.as_str())? as u32 + 1;
                NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, 1)
            }
            _ => Some(today),
        })
        .collect();

    DateRange {
        start: tokens.first().copied(),
        end: tokens.get(1).copied(),
    }
}

pub fn has_date_token(caption: &str) -> bool {
    DATE_TOKEN_RE.is_match(caption)
}

// ── Unit-level ──
//
// A "unit" is the element holding one position: the entry itself for a
// single-position entry, each sub-entry for a multi-position one.

pub fn title(unit: ElementRef<'_>) -> Option<String> {
    dom::entry_title(unit)
}

pub fn description(unit: ElementRef<'_>) -> Option<String> {
    dom::description_block(unit).and_then(|block| clean_description(&dom::visible_text(block)))
}

pub fn date_range(unit: ElementRef<'_>, today: NaiveDate) -> DateRange {
    dom::entry_captions(unit)
        .iter()
        .find(|c| has_date_token(c))
        .map(|c| parse_date_range(c, today))
        .unwrap_or_default()
}

pub fn location(unit: ElementRef<'_>) -> Option<String> {
    dom::entry_captions(unit)
        .into_iter()
        .find(|c| !has_date_token(c))
}

// ── Per-entry lists (one slot per unit, never skipped) ──

pub fn titles(units: &[ElementRef<'_>]) -> Vec<Option<String>> {
    units.iter().map(|u| title(*u)).collect()
}

pub fn descriptions(units: &[ElementRef<'_>]) -> Vec<Option<String>> {
    units.iter().map(|u| description(*u)).collect()
}

pub fn date_ranges(units: &[ElementRef<'_>], today: NaiveDate) -> Vec<DateRange> {
    units.iter().map(|u| date_range(*u, today)).collect()
}

pub fn locations(units: &[ElementRef<'_>], fallback: Option<&str>) -> Vec<Option<String>> {
    units
        .iter()
        .map(|u| location(*u).or_else(|| fallback.map(str::to_string)))
        .collect()
}
