use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::db::{Store, UserRow};
use crate::error::{ExtractError, SessionError, StoreError};
use crate::page::{PageSource, Waits};
use crate::parser::assemble::assemble;
use crate::parser::dom::Section;
use crate::parser::extract::groups::{extract_groups, PendingGroup};
use crate::parser::extract::overflow::fetch_group;
use crate::parser::extract::{profile, skills, CompanyGroup, ExtractContext};
use crate::parser::layout::{classify, Layout};

/// Where a profile session is. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Classified(Layout),
    ExtractingCompany { index: usize },
    OverflowFetch { index: usize },
    Assembling,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub user_id: i64,
    pub companies: usize,
    pub positions: usize,
    pub experience_inserted: usize,
    pub skills_found: usize,
    pub skills_inserted: usize,
    /// Truncated groups kept as-is because their overflow page failed.
    pub overflow_failures: usize,
}

/// One extraction of one profile: classify, extract, assemble, persist.
/// A session is used once; start a new one for the next profile.
pub struct Session<'a, S: PageSource + ?Sized> {
    source: &'a mut S,
    store: &'a mut Store,
    waits: Waits,
    overflow_depth: usize,
    today: NaiveDate,
    state: SessionState,
}

impl<'a, S: PageSource + ?Sized> Session<'a, S> {
    pub fn new(source: &'a mut S, store: &'a mut Store, today: NaiveDate) -> Self {
        Session {
            source,
            store,
            waits: Waits::default(),
            overflow_depth: 1,
            today,
            state: SessionState::Idle,
        }
    }

    pub fn with_waits(mut self, waits: Waits) -> Self {
        self.waits = waits;
        self
    }

    pub fn with_overflow_depth(mut self, depth: usize) -> Self {
        self.overflow_depth = depth;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn run(&mut self, user: &UserRow) -> Result<SessionReport, SessionError> {
        let result = self.drive(user);
        match &result {
            Ok(report) => {
                self.enter(SessionState::Done);
                info!(
                    user_id = user.user_id,
                    companies = report.companies,
                    positions = report.positions,
                    inserted = report.experience_inserted,
                    skills = report.skills_found,
                    "profile done"
                );
            }
            Err(e) => {
                warn!(user_id = user.user_id, url = %user.profile_url, error = %e, "profile failed");
                self.enter(SessionState::Failed);
            }
        }
        result
    }

    fn drive(&mut self, user: &UserRow) -> Result<SessionReport, SessionError> {
        let mut report = SessionReport {
            user_id: user.user_id,
            ..Default::default()
        };

        self.source
            .navigate(&user.profile_url)
            .map_err(|e| self.extract_failure(e))?;
        let header = {
            let doc = self.source.document().map_err(|e| self.extract_failure(e))?;
            profile::extract(doc)
        };

        // Experience
        let layout = classify(&mut *self.source, Section::Experience, &self.waits)
            .map_err(|e| self.extract_failure(e))?;
        self.enter(SessionState::Classified(layout));

        let pending = {
            let ctx = ExtractContext {
                layout,
                today: self.today,
            };
            let doc = self.source.document().map_err(|e| self.extract_failure(e))?;
            extract_groups(doc, self.source.current_url(), &ctx)
        };

        let mut groups = Vec::with_capacity(pending.len());
        for item in pending {
            groups.push(self.complete_group(item, &mut report)?);
        }
        report.companies = groups.len();

        self.enter(SessionState::Assembling);
        let rows = assemble(user.user_id, groups);
        report.positions = rows.len();

        // Skills, read from the profile page again
        if self.source.current_url().map(|u| u.as_str()) != Some(user.profile_url.as_str()) {
            self.source
                .navigate(&user.profile_url)
                .map_err(|e| self.extract_failure(e))?;
        }
        let skills_layout = classify(&mut *self.source, Section::Skills, &self.waits)
            .map_err(|e| self.extract_failure(e))?;
        let names = {
            let doc = self.source.document().map_err(|e| self.extract_failure(e))?;
            skills::extract(doc, skills_layout)
        };
        report.skills_found = names.len();
        debug!(user_id = user.user_id, layout = ?skills_layout, skills = names.len(), "skills extracted");

        // Each write is its own unit; a failure keeps what was already written.
        self.enter(SessionState::Persisting);
        if !header.is_empty() {
            self.store
                .update_user_profile(user.user_id, &header)
                .map_err(|e| self.store_failure(e))?;
        }
        for row in &rows {
            if self.store.upsert_experience(row).map_err(|e| self.store_failure(e))? {
                report.experience_inserted += 1;
            }
        }
        for record in skills::to_records(user.user_id, names) {
            if self.store.upsert_skill(&record).map_err(|e| self.store_failure(e))? {
                report.skills_inserted += 1;
            }
        }

        Ok(report)
    }

    /// Swap a truncated group for its overflow page's full list. Local
    /// failures keep the truncated group.
    fn complete_group(
        &mut self,
        item: PendingGroup,
        report: &mut SessionReport,
    ) -> Result<CompanyGroup, SessionError> {
        let index = item.index;
        self.enter(SessionState::ExtractingCompany { index });
        let mut group = item.group;
        let Some(url) = item.overflow else {
            return Ok(group);
        };
        if self.overflow_depth == 0 {
            debug!(company_index = index, url = %url, "overflow following disabled");
            return Ok(group);
        }

        self.enter(SessionState::OverflowFetch { index });
        let fetched = fetch_group(
            &mut *self.source,
            &url,
            &group.company_name,
            index,
            self.today,
            &self.waits,
            self.overflow_depth,
        );
        match fetched {
            Ok(full) => {
                debug!(
                    company_index = index,
                    before = group.len(),
                    after = full.len(),
                    "overflow group replaced"
                );
                group.replace_positions(full);
            }
            Err(e) if e.is_recoverable() => {
                warn!(company_index = index, company = %group.company_name, error = %e, "keeping truncated positions");
                report.overflow_failures += 1;
            }
            Err(e) => return Err(self.extract_failure(e)),
        }
        self.enter(SessionState::ExtractingCompany { index });
        Ok(group)
    }

    fn enter(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn extract_failure(&self, source: impl Into<ExtractError>) -> SessionError {
        SessionError::Extract {
            state: self.state,
            source: source.into(),
        }
    }

    fn store_failure(&self, source: StoreError) -> SessionError {
        SessionError::Store {
            state: self.state,
            source,
        }
    }
}
