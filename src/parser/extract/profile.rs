use scraper::Html;

use crate::parser::dom;

/// Name and location shown at the top of a profile page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileHeader {
    pub name: Option<String>,
    pub location: Option<String>,
}

impl ProfileHeader {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.location.is_none()
    }
}

pub fn extract(doc: &Html) -> ProfileHeader {
    ProfileHeader {
        name: dom::profile_name(doc),
        location: dom::profile_location(doc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_from_inline_profile() {
        let html = std::fs::read_to_string("tests/fixtures/profile_inline.html").unwrap();
        let header = extract(&Html::parse_document(&html));
        assert_eq!(header.name.as_deref(), Some("Jane Doe"));
        assert_eq!(header.location.as_deref(), Some("Austin, Texas, United States"));
    }

    #[test]
    fn detail_page_has_no_header() {
        let html = std::fs::read_to_string("tests/fixtures/experience_details.html").unwrap();
        assert!(extract(&Html::parse_document(&html)).is_empty());
    }
}
