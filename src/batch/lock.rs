use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use tokio::task::JoinHandle;

use crate::db::Repository;
use crate::error::{AppError, Result};

pub const RUN_LOCK_NAME: &str = "digest";

/// Exclusive run token backed by a lease row in the store. While a guard is
/// alive a heartbeat keeps pushing the expiry forward, so only a process
/// that stopped renewing (crash, kill) loses the lease after `ttl`.
#[derive(Clone)]
pub struct RunLock {
    repo: Repository,
    name: String,
    ttl: chrono::Duration,
    /// Token of the lease currently held through this lock, if any.
    held: Arc<Mutex<Option<String>>>,
}

impl RunLock {
    pub fn new(repo: Repository, ttl: chrono::Duration) -> Self {
        Self {
            repo,
            name: RUN_LOCK_NAME.to_string(),
            ttl,
            held: Arc::new(Mutex::new(None)),
        }
    }

    /// Take the lock under a fresh holder token or fail with
    /// `AlreadyRunning`. Never waits.
    pub async fn try_acquire(&self) -> Result<RunGuard> {
        let token = uuid::Uuid::new_v4().to_string();
        if !self.repo.try_acquire_lease(&self.name, &token, self.ttl).await? {
            return Err(AppError::AlreadyRunning);
        }
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        tracing::debug!(holder = %token, "run lock acquired");

        let heartbeat = tokio::spawn(heartbeat(
            self.repo.clone(),
            self.name.clone(),
            token.clone(),
            self.ttl,
        ));
        Ok(RunGuard {
            lock: self.clone(),
            token,
            heartbeat,
            released: false,
        })
    }

    /// Drop the lease taken through this lock, if it is still ours. Used on
    /// shutdown.
    pub async fn release_if_held(&self) -> Result<bool> {
        let token = self.held.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match token {
            Some(token) => self.release_token(&token).await,
            None => Ok(false),
        }
    }

    async fn release_token(&self, token: &str) -> Result<bool> {
        let released = self.repo.release_lease(&self.name, token).await?;
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.as_deref() == Some(token) {
            *held = None;
        }
        Ok(released)
    }
}

async fn heartbeat(repo: Repository, name: String, token: String, ttl: chrono::Duration) {
    let period = (ttl / 3)
        .to_std()
        .unwrap_or_default()
        .max(StdDuration::from_millis(50));
    let mut ticks = tokio::time::interval(period);
    // First tick completes immediately.
    ticks.tick().await;
    loop {
        ticks.tick().await;
        match repo.renew_lease(&name, &token, ttl).await {
            Ok(true) => tracing::trace!(holder = %token, "run lock renewed"),
            Ok(false) => {
                tracing::warn!(holder = %token, "run lock was taken over, no longer renewing");
                break;
            }
            Err(e) => tracing::warn!(holder = %token, error = %e, "failed to renew run lock"),
        }
    }
}

/// Held while a batch runs. Release explicitly with [`RunGuard::release`];
/// a guard dropped without it (panic, cancellation) releases in the
/// background.
pub struct RunGuard {
    lock: RunLock,
    token: String,
    heartbeat: JoinHandle<()>,
    released: bool,
}

impl RunGuard {
    pub fn holder(&self) -> &str {
        &self.token
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.heartbeat.abort();
        self.lock.release_token(&self.token).await?;
        tracing::debug!(holder = %self.token, "run lock released");
        Ok(())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.heartbeat.abort();
        let lock = self.lock.clone();
        let token = self.token.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = lock.release_token(&token).await {
                    tracing::error!(error = %e, "failed to release run lock");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lock.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn each_acquisition_gets_its_own_holder() {
        let (_dir, repo) = repo().await;
        let lock = RunLock::new(repo.clone(), chrono::Duration::minutes(5));

        let first = lock.try_acquire().await.unwrap();
        let first_holder = first.holder().to_string();
        assert!(matches!(lock.try_acquire().await, Err(AppError::AlreadyRunning)));
        first.release().await.unwrap();

        let second = lock.try_acquire().await.unwrap();
        assert_ne!(second.holder(), first_holder);
        assert_eq!(repo.lease_holder(RUN_LOCK_NAME).await.unwrap().as_deref(), Some(second.holder()));
        second.release().await.unwrap();
        assert_eq!(repo.lease_holder(RUN_LOCK_NAME).await.unwrap(), None);
    }

    #[tokio::test]
    async fn release_never_touches_another_holders_lease() {
        let (_dir, repo) = repo().await;
        let lock = RunLock::new(repo.clone(), chrono::Duration::minutes(5));

        lock.try_acquire().await.unwrap().release().await.unwrap();
        assert!(repo
            .try_acquire_lease(RUN_LOCK_NAME, "elsewhere", chrono::Duration::minutes(5))
            .await
            .unwrap());

        assert!(!lock.release_if_held().await.unwrap());
        assert_eq!(repo.lease_holder(RUN_LOCK_NAME).await.unwrap().as_deref(), Some("elsewhere"));
    }

    #[tokio::test]
    async fn heartbeat_outlives_the_ttl() {
        let (_dir, repo) = repo().await;
        let lock = RunLock::new(repo.clone(), chrono::Duration::milliseconds(300));

        let guard = lock.try_acquire().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(900)).await;

        assert!(!repo
            .try_acquire_lease(RUN_LOCK_NAME, "intruder", chrono::Duration::minutes(5))
            .await
            .unwrap());
        guard.release().await.unwrap();
    }
}
