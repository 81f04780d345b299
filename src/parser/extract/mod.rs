pub mod fields;
pub mod groups;
pub mod overflow;
pub mod profile;
pub mod skills;

use chrono::NaiveDate;

use super::layout::Layout;

/// Per-page extraction inputs, fixed once the layout has been classified.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext {
    pub layout: Layout,
    /// Date that "Present" resolves to.
    pub today: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date_range: DateRange,
    pub location: Option<String>,
}

/// One employer entry: parallel per-position lists in page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyGroup {
    pub company_name: String,
    pub titles: Vec<Option<String>>,
    pub descriptions: Vec<Option<String>>,
    pub date_ranges: Vec<DateRange>,
    pub locations: Vec<Option<String>>,
}

impl CompanyGroup {
    pub fn new(company_name: String) -> Self {
        CompanyGroup {
            company_name,
            titles: Vec::new(),
            descriptions: Vec::new(),
            date_ranges: Vec::new(),
            locations: Vec::new(),
        }
    }

    /// Number of positions once the lists are aligned.
    pub fn len(&self) -> usize {
        self.titles
            .len()
            .max(self.descriptions.len())
            .max(self.date_ranges.len())
            .max(self.locations.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pad every shorter list with nulls at its tail so index `i` means the
    /// same position in all of them.
    pub fn pad(&mut self) {
        let n = self.len();
        self.titles.resize(n, None);
        self.descriptions.resize(n, None);
        self.date_ranges.resize(n, DateRange::default());
        self.locations.resize(n, None);
    }

    pub fn push(&mut self, position: Position) {
        self.pad();
        self.titles.push(position.title);
        self.descriptions.push(position.description);
        self.date_ranges.push(position.date_range);
        self.locations.push(position.location);
    }

    /// Replace the position lists with another group's, keeping this name.
    pub fn replace_positions(&mut self, other: CompanyGroup) {
        self.titles = other.titles;
        self.descriptions = other.descriptions;
        self.date_ranges = other.date_ranges;
        self.locations = other.locations;
    }

    pub fn positions(mut self) -> Vec<Position> {
        self.pad();
        self.titles
            .into_iter()
            .zip(self.descriptions)
            .zip(self.date_ranges)
            .zip(self.locations)
            .map(|(((title, description), date_range), location)| Position {
                title,
                description,
                date_range,
                location,
            })
            .collect()
    }
}
