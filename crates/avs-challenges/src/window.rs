use crate::{ChallengeError, ChallengeStatus, ChallengeWindow, Result};
use avs_types::{Address, BlockNumber, TaskIndex};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Tracks one challenge window per recorded task response.
#[derive(Clone, Default)]
pub struct ChallengeWindowManager {
    windows: Arc<RwLock<HashMap<TaskIndex, ChallengeWindow>>>,
}

impl ChallengeWindowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the window for a recorded response. Reopening is a no-op.
    pub async fn open_window(
        &self,
        task_index: TaskIndex,
        response_digest: [u8; 32],
        opened_at: BlockNumber,
        deadline: BlockNumber,
    ) -> Result<()> {
        let mut windows = self.windows.write().await;
        if windows.contains_key(&task_index) {
            debug!(task_index = %task_index, "Challenge window already open");
            return Ok(());
        }
        windows.insert(
            task_index,
            ChallengeWindow::new(task_index, response_digest, opened_at, deadline),
        );

        info!(
            task_index = %task_index,
            response_digest = hex::encode(response_digest),
            opened_at = %opened_at,
            deadline = %deadline,
            "⏳ Challenge window opened"
        );

        Ok(())
    }

    /// Record a challenge confirmed at block `at`.
    pub async fn submit_challenge(
        &self,
        task_index: TaskIndex,
        challenger: Address,
        at: BlockNumber,
    ) -> Result<()> {
        let mut windows = self.windows.write().await;

        let window = windows
            .get_mut(&task_index)
            .ok_or(ChallengeError::WindowNotFound(task_index))?;

        match window.status {
            ChallengeStatus::Challenged | ChallengeStatus::Slashed => {
                return Err(ChallengeError::DuplicateChallenge(task_index));
            }
            ChallengeStatus::Finalized => {
                return Err(ChallengeError::NotActive(format!(
                    "window for task {task_index} already finalized"
                )));
            }
            ChallengeStatus::Active => {}
        }

        if !window.is_active(at) {
            return Err(ChallengeError::WindowClosed {
                task_index,
                deadline: window.deadline,
                head: at,
            });
        }

        window.status = ChallengeStatus::Challenged;
        window.challenger = Some(challenger);

        info!(
            task_index = %task_index,
            challenger = %challenger,
            at = %at,
            deadline = %window.deadline,
            "🎯 Challenge submitted"
        );

        Ok(())
    }

    /// Close an unchallenged window once its deadline has passed.
    pub async fn finalize_window(&self, task_index: TaskIndex, now: BlockNumber) -> Result<()> {
        let mut windows = self.windows.write().await;

        let window = windows
            .get_mut(&task_index)
            .ok_or(ChallengeError::WindowNotFound(task_index))?;

        if window.status == ChallengeStatus::Finalized {
            return Ok(());
        }
        if window.status != ChallengeStatus::Active {
            return Err(ChallengeError::NotActive(format!(
                "cannot finalize: task {task_index} was challenged"
            )));
        }
        if !window.is_expired(now) {
            return Err(ChallengeError::WindowNotExpired(task_index));
        }

        window.status = ChallengeStatus::Finalized;

        info!(
            task_index = %task_index,
            finalized_at = %now,
            deadline = %window.deadline,
            "✅ Challenge window finalized (no challenges)"
        );

        Ok(())
    }

    /// Record the operators that signed the wrong answer of a challenged task.
    pub async fn mark_slashed(&self, task_index: TaskIndex, signers: Vec<Address>) -> Result<()> {
        let mut windows = self.windows.write().await;

        let window = windows
            .get_mut(&task_index)
            .ok_or(ChallengeError::WindowNotFound(task_index))?;

        if window.status != ChallengeStatus::Challenged {
            return Err(ChallengeError::NotActive(format!(
                "task {task_index} is not challenged"
            )));
        }

        window.status = ChallengeStatus::Slashed;
        window.slashed = signers;

        info!(
            task_index = %task_index,
            slashed = window.slashed.len(),
            challenger = ?window.challenger,
            "⚡ Signers of wrong response marked for slashing"
        );

        Ok(())
    }

    pub async fn get_window(&self, task_index: TaskIndex) -> Option<ChallengeWindow> {
        self.windows.read().await.get(&task_index).cloned()
    }

    pub async fn active_windows(&self, now: BlockNumber) -> Vec<ChallengeWindow> {
        let windows = self.windows.read().await;
        let mut active: Vec<_> = windows
            .values()
            .filter(|w| w.is_active(now))
            .cloned()
            .collect();
        active.sort_by_key(|w| w.task_index);
        active
    }

    /// Unchallenged windows whose deadline has passed and that still need
    /// finalization.
    pub async fn expired_windows(&self, now: BlockNumber) -> Vec<ChallengeWindow> {
        let windows = self.windows.read().await;
        let mut expired: Vec<_> = windows
            .values()
            .filter(|w| w.is_expired(now) && w.status == ChallengeStatus::Active)
            .cloned()
            .collect();
        expired.sort_by_key(|w| w.task_index);
        expired
    }

    /// Drop finalized and slashed windows.
    pub async fn cleanup_resolved(&self) -> usize {
        let mut windows = self.windows.write().await;
        let before_count = windows.len();

        windows.retain(|_, w| {
            !matches!(
                w.status,
                ChallengeStatus::Finalized | ChallengeStatus::Slashed
            )
        });

        let removed = before_count - windows.len();
        if removed > 0 {
            debug!(removed, "Cleaned up resolved challenge windows");
        }
        removed
    }
}
