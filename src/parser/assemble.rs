use super::extract::CompanyGroup;
use crate::db::ExperienceEntry;

/// Flatten company groups into one row per position, companies in page order
/// and positions in their order within each company.
pub fn assemble(user_id: i64, groups: Vec<CompanyGroup>) -> Vec<ExperienceEntry> {
    let mut rows = Vec::new();
    for group in groups {
        let company = group.company_name.clone();
        for position in group.positions() {
            rows.push(ExperienceEntry {
                user_id,
                company: company.clone(),
                job_title: position.title,
                work_description: position.description,
                start_date: position.date_range.start,
                end_date: position.date_range.end,
                location_of_job: position.location,
            });
        }
    }
    rows
}
