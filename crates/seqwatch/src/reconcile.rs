//! Merges push observations and pulled page snapshots into the page of
//! jobs currently held by the client.

use serde::Serialize;

use crate::model::{AlignJob, DedupKey, JobStatus, PagedResponse, PaginationInfo};

/// What a push observation did to the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Keep-alive frame; nothing to do.
    KeepAlive,
    /// Same `(taskId, status, updatedAt)` as the previous observation.
    Duplicate,
    /// Held record replaced in place; `previous` is the status it had.
    Updated { index: usize, previous: JobStatus },
    /// New record prepended to a window with room left.
    Inserted,
    /// New record prepended; the oldest entry was pushed out.
    InsertedWithEviction { evicted: String },
    /// Unknown task on a page other than the first.
    DroppedNotFirstPage,
    /// Unknown task created no later than the newest held record.
    DroppedOlderThanWindow,
    /// Older than the held record for the same task.
    DroppedStale,
}

impl MergeOutcome {
    /// True if the window content changed.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            MergeOutcome::Updated { .. }
                | MergeOutcome::Inserted
                | MergeOutcome::InsertedWithEviction { .. }
        )
    }
}

/// Bounded, ordered set of jobs shown for one listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageWindow {
    page: u32,
    page_size: usize,
    jobs: Vec<AlignJob>,
    last_key: Option<DedupKey>,
    total_pages: u32,
    total_items: u64,
}

impl PageWindow {
    /// Creates an empty window on page 1. A zero page size is treated as 1.
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            jobs: Vec::new(),
            last_key: None,
            total_pages: 0,
            total_items: 0,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn jobs(&self) -> &[AlignJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, task_id: &str) -> Option<&AlignJob> {
        self.jobs.iter().find(|j| j.task_id == task_id)
    }

    pub fn last_key(&self) -> Option<&DedupKey> {
        self.last_key.as_ref()
    }

    pub fn pagination(&self) -> PaginationInfo {
        PaginationInfo {
            current_page: self.page,
            total_pages: self.total_pages,
            total_items: self.total_items,
            items_per_page: self.page_size,
        }
    }

    /// Applies one observation from the push stream.
    pub fn apply_push(&mut self, incoming: AlignJob) -> MergeOutcome {
        if incoming.is_keep_alive() {
            return MergeOutcome::KeepAlive;
        }

        let key = incoming.dedup_key();
        if self.last_key.as_ref() == Some(&key) {
            log::trace!("Duplicate observation for task {}", incoming.task_id);
            return MergeOutcome::Duplicate;
        }
        self.last_key = Some(key);

        if let Some(index) = self
            .jobs
            .iter()
            .position(|j| j.task_id == incoming.task_id)
        {
            let held = &self.jobs[index];
            if held.supersedes(&incoming) {
                log::debug!(
                    "Dropping stale observation for task {} ({} @ {}; holding {} @ {})",
                    incoming.task_id,
                    incoming.status,
                    incoming.updated_at,
                    held.status,
                    held.updated_at
                );
                return MergeOutcome::DroppedStale;
            }
            let previous = held.status;
            self.jobs[index] = incoming;
            return MergeOutcome::Updated { index, previous };
        }

        if self.page != 1 {
            return MergeOutcome::DroppedNotFirstPage;
        }

        if let Some(newest) = self.jobs.iter().map(|j| j.created_at).max() {
            if incoming.created_at <= newest {
                return MergeOutcome::DroppedOlderThanWindow;
            }
        }

        log::debug!("New task {} on page 1", incoming.task_id);
        self.jobs.insert(0, incoming);
        if self.jobs.len() > self.page_size {
            let evicted = self
                .jobs
                .drain(self.page_size..)
                .map(|j| j.task_id)
                .collect::<Vec<_>>()
                .join(",");
            return MergeOutcome::InsertedWithEviction { evicted };
        }
        MergeOutcome::Inserted
    }

    /// Replaces the window with a pulled page.
    ///
    /// Snapshots for a different page are ignored. A held record that
    /// supersedes its snapshot counterpart is kept, and on page 1 a held
    /// record missing from a non-empty snapshot survives if it was created
    /// after everything in the snapshot. Returns true if the content changed.
    pub fn apply_snapshot(&mut self, snapshot: PagedResponse<AlignJob>) -> bool {
        if snapshot.page != self.page {
            log::debug!(
                "Ignoring snapshot for page {} while showing page {}",
                snapshot.page,
                self.page
            );
            return false;
        }

        self.total_pages = snapshot.total_pages;
        self.total_items = snapshot.total_elements;

        let mut merged: Vec<AlignJob> = snapshot
            .content
            .into_iter()
            .filter(|j| !j.is_keep_alive())
            .map(|pulled| match self.get(&pulled.task_id) {
                Some(held) if held.supersedes(&pulled) => held.clone(),
                _ => pulled,
            })
            .collect();

        if self.page == 1 {
            if let Some(newest) = merged.iter().map(|j| j.created_at).max() {
                let ahead: Vec<AlignJob> = self
                    .jobs
                    .iter()
                    .filter(|held| held.created_at > newest)
                    .filter(|held| !merged.iter().any(|j| j.task_id == held.task_id))
                    .cloned()
                    .collect();
                if !ahead.is_empty() {
                    merged.splice(0..0, ahead);
                }
            }
        }
        merged.truncate(self.page_size);

        if merged == self.jobs {
            return false;
        }
        self.jobs = merged;
        true
    }

    /// Switches to page `page` (1-based; 0 is treated as 1), clearing held
    /// records and the de-duplication key. Returns false if already there.
    pub fn go_to_page(&mut self, page: u32) -> bool {
        let page = page.max(1);
        if page == self.page {
            return false;
        }
        self.page = page;
        self.jobs.clear();
        self.last_key = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlignTool, JobStatus, KEEP_ALIVE_TASK_ID};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn job(id: &str, created: NaiveDateTime, updated: NaiveDateTime, status: JobStatus) -> AlignJob {
        let mut j = AlignJob::new(id, AlignTool::Mafft, created);
        j.updated_at = updated;
        j.status = status;
        j
    }

    fn pending(id: &str, created: NaiveDateTime) -> AlignJob {
        job(id, created, created, JobStatus::Pending)
    }

    fn snapshot(page: u32, jobs: Vec<AlignJob>) -> PagedResponse<AlignJob> {
        let mut s = PagedResponse::single_page(jobs, page, 10);
        s.total_pages = 3;
        s.total_elements = 25;
        s
    }

    fn window_with(page_size: usize, jobs: Vec<AlignJob>) -> PageWindow {
        let mut w = PageWindow::new(page_size);
        assert!(w.apply_snapshot(snapshot(1, jobs)) || w.is_empty());
        w
    }

    fn ids(w: &PageWindow) -> Vec<&str> {
        w.jobs().iter().map(|j| j.task_id.as_str()).collect()
    }

    #[test]
    fn test_scenario_a_newer_push_evicts_in_single_slot_window() {
        let mut w = window_with(1, vec![pending("t1", at(10, 0))]);
        let outcome = w.apply_push(pending("t2", at(10, 5)));
        assert_eq!(
            outcome,
            MergeOutcome::InsertedWithEviction {
                evicted: "t1".to_string()
            }
        );
        assert_eq!(ids(&w), vec!["t2"]);
        assert_eq!(w.jobs()[0].created_at, at(10, 5));
    }

    #[test]
    fn test_scenario_b_status_update_keeps_position() {
        let mut w = window_with(
            10,
            vec![pending("t0", at(10, 1)), pending("t1", at(10, 0))],
        );
        let outcome = w.apply_push(job("t1", at(10, 0), at(10, 10), JobStatus::Success));
        assert_eq!(
            outcome,
            MergeOutcome::Updated {
                index: 1,
                previous: JobStatus::Pending
            }
        );
        assert_eq!(ids(&w), vec!["t0", "t1"]);
        assert_eq!(w.jobs()[1].status, JobStatus::Success);
        assert_eq!(w.jobs()[1].updated_at, at(10, 10));
    }

    #[test]
    fn test_scenario_c_keep_alive_has_no_side_effects() {
        let mut w = window_with(10, vec![pending("t1", at(10, 0))]);
        let before = w.clone();
        let outcome = w.apply_push(pending(KEEP_ALIVE_TASK_ID, at(11, 0)));
        assert_eq!(outcome, MergeOutcome::KeepAlive);
        assert_eq!(w, before);
        assert!(w.last_key().is_none());
    }

    #[test]
    fn test_scenario_e_late_pending_after_success_is_dropped() {
        let mut w = window_with(10, vec![pending("t1", at(10, 0))]);
        w.apply_push(job("t1", at(10, 0), at(10, 10), JobStatus::Success));

        let outcome = w.apply_push(job("t1", at(10, 0), at(10, 5), JobStatus::Pending));
        assert_eq!(outcome, MergeOutcome::DroppedStale);
        assert_eq!(w.jobs()[0].status, JobStatus::Success);
        assert_eq!(w.jobs()[0].updated_at, at(10, 10));
    }

    #[test]
    fn test_same_timestamp_regression_is_dropped() {
        let mut w = window_with(
            10,
            vec![job("t1", at(10, 0), at(10, 10), JobStatus::Success)],
        );
        let outcome = w.apply_push(job("t1", at(10, 0), at(10, 10), JobStatus::Running));
        assert_eq!(outcome, MergeOutcome::DroppedStale);
        assert_eq!(w.jobs()[0].status, JobStatus::Success);
    }

    #[test]
    fn test_increasing_updates_converge_to_last() {
        let mut w = window_with(10, vec![pending("t1", at(10, 0))]);
        let sequence = [
            (1, JobStatus::Running),
            (2, JobStatus::Running),
            (3, JobStatus::Running),
            (4, JobStatus::Error),
        ];
        let mut last = None;
        for (minute, status) in sequence {
            let mut observation = job("t1", at(10, 0), at(10, minute), status);
            observation.progress = Some(minute as f64 * 25.0);
            w.apply_push(observation.clone());
            last = Some(observation);
        }
        assert_eq!(w.jobs(), &[last.unwrap()]);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut w = window_with(10, vec![pending("t1", at(10, 0))]);
        let update = job("t1", at(10, 0), at(10, 3), JobStatus::Running);
        assert!(w.apply_push(update.clone()).changed());
        let before = w.clone();
        assert_eq!(w.apply_push(update), MergeOutcome::Duplicate);
        assert_eq!(w, before);
    }

    #[test]
    fn test_unknown_task_off_first_page_is_dropped() {
        let mut w = PageWindow::new(10);
        w.go_to_page(2);
        w.apply_snapshot(snapshot(2, vec![pending("t5", at(9, 0))]));
        let before = w.jobs().to_vec();

        let outcome = w.apply_push(pending("t9", at(12, 0)));
        assert_eq!(outcome, MergeOutcome::DroppedNotFirstPage);
        assert_eq!(w.jobs(), before.as_slice());
    }

    #[test]
    fn test_known_task_off_first_page_is_updated() {
        let mut w = PageWindow::new(10);
        w.go_to_page(2);
        w.apply_snapshot(snapshot(2, vec![pending("t5", at(9, 0))]));
        let outcome = w.apply_push(job("t5", at(9, 0), at(9, 30), JobStatus::Running));
        assert_eq!(
            outcome,
            MergeOutcome::Updated {
                index: 0,
                previous: JobStatus::Pending
            }
        );
    }

    #[test]
    fn test_full_window_evicts_single_oldest() {
        let mut w = window_with(
            3,
            vec![
                pending("t3", at(10, 3)),
                pending("t2", at(10, 2)),
                pending("t1", at(10, 1)),
            ],
        );
        let outcome = w.apply_push(pending("t4", at(10, 4)));
        assert_eq!(
            outcome,
            MergeOutcome::InsertedWithEviction {
                evicted: "t1".to_string()
            }
        );
        assert_eq!(w.len(), 3);
        assert_eq!(ids(&w), vec!["t4", "t3", "t2"]);
    }

    #[test]
    fn test_insert_into_empty_window() {
        let mut w = PageWindow::new(10);
        assert_eq!(w.apply_push(pending("t1", at(10, 0))), MergeOutcome::Inserted);
        assert_eq!(ids(&w), vec!["t1"]);
    }

    #[test]
    fn test_late_unknown_older_than_window_is_dropped() {
        let mut w = window_with(
            10,
            vec![pending("t2", at(10, 5)), pending("t1", at(10, 0))],
        );
        let before = w.jobs().to_vec();
        assert_eq!(
            w.apply_push(pending("t0", at(10, 3))),
            MergeOutcome::DroppedOlderThanWindow
        );
        assert_eq!(
            w.apply_push(pending("tx", at(10, 5))),
            MergeOutcome::DroppedOlderThanWindow
        );
        assert_eq!(w.jobs(), before.as_slice());
    }

    #[test]
    fn test_snapshot_for_other_page_is_ignored() {
        let mut w = window_with(10, vec![pending("t1", at(10, 0))]);
        assert!(!w.apply_snapshot(snapshot(2, vec![pending("t9", at(8, 0))])));
        assert_eq!(ids(&w), vec!["t1"]);
    }

    #[test]
    fn test_snapshot_keeps_newer_held_record() {
        let mut w = window_with(10, vec![pending("t1", at(10, 0))]);
        w.apply_push(job("t1", at(10, 0), at(10, 10), JobStatus::Success));

        let changed = w.apply_snapshot(snapshot(1, vec![pending("t1", at(10, 0))]));
        assert!(!changed);
        assert_eq!(w.jobs()[0].status, JobStatus::Success);
        assert_eq!(w.pagination().total_items, 25);
    }

    #[test]
    fn test_snapshot_replaces_in_server_order() {
        let mut w = window_with(
            10,
            vec![pending("t2", at(10, 2)), pending("t1", at(10, 1))],
        );
        let changed = w.apply_snapshot(snapshot(
            1,
            vec![
                job("t2", at(10, 2), at(10, 9), JobStatus::Running),
                pending("t1", at(10, 1)),
            ],
        ));
        assert!(changed);
        assert_eq!(ids(&w), vec!["t2", "t1"]);
        assert_eq!(w.jobs()[0].status, JobStatus::Running);
    }

    #[test]
    fn test_push_and_pull_commute() {
        let base = vec![pending("t2", at(10, 2)), pending("t1", at(10, 1))];
        let stale_pull = snapshot(1, base.clone());
        let pushes = vec![
            job("t1", at(10, 1), at(10, 8), JobStatus::Success),
            pending("t3", at(10, 3)),
            job("t2", at(10, 2), at(10, 6), JobStatus::Running),
        ];

        let mut push_then_pull = window_with(3, base.clone());
        for p in &pushes {
            push_then_pull.apply_push(p.clone());
        }
        push_then_pull.apply_snapshot(stale_pull.clone());

        let mut pull_then_push = window_with(3, base);
        pull_then_push.apply_snapshot(stale_pull);
        for p in &pushes {
            pull_then_push.apply_push(p.clone());
        }

        assert_eq!(push_then_pull.jobs(), pull_then_push.jobs());
        assert_eq!(ids(&push_then_pull), vec!["t3", "t2", "t1"]);
        assert_eq!(push_then_pull.jobs()[2].status, JobStatus::Success);
    }

    #[test]
    fn test_go_to_page_clears_state() {
        let mut w = window_with(10, vec![pending("t1", at(10, 0))]);
        w.apply_push(job("t1", at(10, 0), at(10, 1), JobStatus::Running));
        assert!(w.go_to_page(3));
        assert_eq!(w.page(), 3);
        assert!(w.is_empty());
        assert!(w.last_key().is_none());
        assert!(!w.go_to_page(3));
        w.go_to_page(0);
        assert_eq!(w.page(), 1);
    }

    #[test]
    fn test_zero_page_size_clamped() {
        assert_eq!(PageWindow::new(0).page_size(), 1);
    }
}
