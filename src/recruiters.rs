use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::db::Database;
use crate::error::{Result, ScoutError};
use crate::models::{OutreachStatus, SearchPage};

const MAX_QUERY_LEN: usize = 200;

pub struct RecruiterMatchEngine {
    db: Arc<Database>,
    max_page_size: u32,
}

impl RecruiterMatchEngine {
    pub fn new(db: Arc<Database>, max_page_size: u32) -> Self {
        Self { db, max_page_size }
    }

    /// Active recruiters whose name or title contains `query`, with the
    /// caller's outreach state attached.
    pub async fn search(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
        user_id: i64,
    ) -> Result<SearchPage> {
        if page < 1 {
            return Err(ScoutError::ValidationError("page must be at least 1".to_string()));
        }
        if page_size < 1 || page_size > self.max_page_size {
            return Err(ScoutError::ValidationError(format!(
                "page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        if user_id <= 0 {
            return Err(ScoutError::ValidationError("user_id must be positive".to_string()));
        }
        if query.chars().count() > MAX_QUERY_LEN {
            return Err(ScoutError::ValidationError(format!(
                "query longer than {} characters",
                MAX_QUERY_LEN
            )));
        }

        // Matched as given: no trimming, no pattern syntax
        let needle = query.to_lowercase();
        let offset = (page as i64 - 1) * page_size as i64;

        let total_count = self.db.count_recruiters(&needle).await?;
        let results = self
            .db
            .search_recruiters(&needle, user_id, page_size as i64, offset)
            .await?;

        debug!(query, page, page_size, total_count, returned = results.len(), "Recruiter search");
        Ok(SearchPage {
            results,
            total_count,
            page,
            page_size,
        })
    }

    pub async fn record_outreach(
        &self,
        user_id: i64,
        recruiter_id: i64,
        status: OutreachStatus,
        notes: Option<&str>,
    ) -> Result<()> {
        if user_id <= 0 {
            return Err(ScoutError::ValidationError("user_id must be positive".to_string()));
        }
        if !self.db.recruiter_exists(recruiter_id).await? {
            return Err(ScoutError::not_found("recruiter", recruiter_id));
        }

        let contacted_at = match status {
            OutreachStatus::NotContacted => None,
            _ => Some(Utc::now()),
        };
        self.db
            .upsert_outreach(user_id, recruiter_id, status, contacted_at, notes)
            .await
    }
}
