use std::collections::HashSet;

use scraper::Html;

use super::groups::entries;
use crate::db::SkillRecord;
use crate::parser::dom::{self, Section};
use crate::parser::layout::Layout;

/// Skill names in page order. Blank entries are dropped and repeated names
/// (the same skill listed under several categories) are kept once.
pub fn extract(doc: &Html, layout: Layout) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for entry in entries(doc, layout, Section::Skills) {
        let Some(name) = dom::entry_title(entry).or_else(|| dom::first_link_text(entry)) else {
            continue;
        };
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

/// One record per skill, or a single null-skill record when the profile has
/// none so the user still shows up as processed.
pub fn to_records(user_id: i64, names: Vec<String>) -> Vec<SkillRecord> {
    if names.is_empty() {
        return vec![SkillRecord {
            user_id,
            skill_name: None,
        }];
    }
    names
        .into_iter()
        .map(|name| SkillRecord {
            user_id,
            skill_name: Some(name),
        })
        .collect()
}
