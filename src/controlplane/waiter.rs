//! State Waiter
//!
//! Bounded polling of volume and snapshot provisioning states, and the
//! reconciliation that follows a volume create: a volume that lands in the
//! Error state is deleted, one still creating is reported as in progress.

use crate::config::{PollPolicy, Timeouts};
use crate::controlplane::workflow::{Phase, Workflow};
use crate::domain::ports::{AnfClientRef, BackendSnapshot, FileSystem};
use crate::domain::state::ProvisioningState;
use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A wait that ended short of its desired state
#[derive(Debug)]
pub struct WaitFailure {
    /// Last state observed before giving up
    pub state: ProvisioningState,
    pub error: Error,
}

impl From<WaitFailure> for Error {
    fn from(failure: WaitFailure) -> Self {
        failure.error
    }
}

pub type WaitResult = std::result::Result<ProvisioningState, WaitFailure>;

/// Polls the service until objects reach a desired state
#[derive(Clone)]
pub struct StateWaiter {
    client: AnfClientRef,
    policy: PollPolicy,
}

impl StateWaiter {
    pub fn new(client: AnfClientRef, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    /// Wait for `volume` to reach `desired`, giving up early on any state in
    /// `abort`. A volume that disappears counts as Deleted.
    pub async fn wait_for_volume_state(
        &self,
        volume: &FileSystem,
        desired: ProvisioningState,
        abort: &[ProvisioningState],
        timeout: Duration,
    ) -> WaitResult {
        self.poll("volume", &volume.creation_token, desired, abort, timeout, || {
            self.client.volume_state(volume)
        })
        .await
    }

    /// Wait for `snapshot` of `volume` to reach `desired`
    pub async fn wait_for_snapshot_state(
        &self,
        snapshot: &BackendSnapshot,
        volume: &FileSystem,
        desired: ProvisioningState,
        abort: &[ProvisioningState],
        timeout: Duration,
    ) -> WaitResult {
        self.poll("snapshot", &snapshot.name, desired, abort, timeout, || {
            self.client.snapshot_state(volume, snapshot)
        })
        .await
    }

    async fn poll<F, Fut>(
        &self,
        kind: &str,
        name: &str,
        desired: ProvisioningState,
        abort: &[ProvisioningState],
        timeout: Duration,
        query: F,
    ) -> WaitResult
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ProvisioningState>>,
    {
        let deadline = Instant::now() + timeout;
        let mut backoff = self.policy.backoff();
        let mut state = ProvisioningState::Unknown;

        loop {
            match query().await {
                Ok(current) => {
                    state = current;
                    if current == desired {
                        debug!("{} {} reached state {}", kind, name, desired);
                        return Ok(current);
                    }
                    if abort.contains(&current) {
                        return Err(WaitFailure {
                            state,
                            error: Error::AbortState {
                                kind: kind.to_string(),
                                name: name.to_string(),
                                state: current.to_string(),
                                desired: desired.to_string(),
                            },
                        });
                    }
                    debug!("{} {} is {}, waiting for {}", kind, name, current, desired);
                }
                Err(e) if e.is_not_found() && desired == ProvisioningState::Deleted => {
                    debug!("{} {} is gone", kind, name);
                    return Ok(ProvisioningState::Deleted);
                }
                Err(e) if e.is_not_found() => {
                    return Err(WaitFailure { state, error: e });
                }
                Err(e) => {
                    warn!("Could not poll {} {} state, retrying: {}", kind, name, e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitFailure {
                    state,
                    error: Error::StateTimeout {
                        kind: kind.to_string(),
                        name: name.to_string(),
                        desired: desired.to_string(),
                        observed: state.to_string(),
                        waited: timeout,
                    },
                });
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.policy.max_interval)
                .min(deadline - now);
            tokio::time::sleep(delay).await;
        }
    }

    /// Wait for a freshly submitted volume to become Available.
    ///
    /// Still Accepted/Creating at the deadline returns `Error::VolumeCreating`
    /// so the host retries later. A volume in Error is deleted, one already
    /// Deleting is waited out; either way the original error is returned.
    /// Any other state is logged and treated as success.
    pub async fn wait_for_volume_create(
        &self,
        volume: &FileSystem,
        timeouts: &Timeouts,
        workflow: &mut Workflow,
    ) -> Result<()> {
        workflow.enter(Phase::Polling);

        let failure = match self
            .wait_for_volume_state(
                volume,
                ProvisioningState::Available,
                &[ProvisioningState::Error],
                timeouts.volume_create,
            )
            .await
        {
            Ok(_) => return Ok(()),
            Err(failure) => failure,
        };

        let token = &volume.creation_token;

        if failure.error.is_not_found() {
            return Err(failure.error);
        }

        match failure.state {
            ProvisioningState::Accepted | ProvisioningState::Creating => {
                debug!(volume = %token, "Volume is in {} state", failure.state);
                Err(Error::VolumeCreating {
                    name: token.clone(),
                    message: failure.error.to_string(),
                })
            }

            ProvisioningState::Deleting => {
                workflow.enter(Phase::Cleaning);
                if let Err(cleanup) = self
                    .wait_for_volume_state(
                        volume,
                        ProvisioningState::Deleted,
                        &[ProvisioningState::Error],
                        timeouts.default,
                    )
                    .await
                {
                    error!(
                        volume = %token,
                        "Volume could not be cleaned up and must be manually deleted: {}",
                        cleanup.error
                    );
                }
                Err(failure.error)
            }

            ProvisioningState::Error => {
                workflow.enter(Phase::Cleaning);
                match self.client.delete_volume(volume).await {
                    Ok(()) => info!(volume = %volume.name, "Volume deleted"),
                    Err(cleanup) => error!(
                        volume = %token,
                        "Volume could not be cleaned up and must be manually deleted: {}",
                        cleanup
                    ),
                }
                Err(failure.error)
            }

            other => {
                error!(volume = %token, "Unexpected volume state {} found for volume", other);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::memory::{CreateBehavior, MemoryAnfClient};
    use crate::domain::ports::{AnfClient, FilesystemCreateRequest};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn request(token: &str) -> FilesystemCreateRequest {
        FilesystemCreateRequest {
            resource_group: "rg1".into(),
            netapp_account: "acct1".into(),
            capacity_pool: "pool1".into(),
            name: token.into(),
            creation_token: token.into(),
            quota_in_bytes: 100 << 30,
            protocol_types: vec!["NFSv3".into()],
            ..Default::default()
        }
    }

    async fn setup(token: &str, behavior: CreateBehavior) -> (Arc<MemoryAnfClient>, StateWaiter, FileSystem) {
        let client = Arc::new(MemoryAnfClient::with_default_inventory());
        client.set_create_behavior(token, behavior);
        let volume = client.create_volume(&request(token)).await.unwrap();
        let waiter = StateWaiter::new(client.clone(), PollPolicy::default());
        (client, waiter, volume)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reaches_desired_state() {
        let (_client, waiter, volume) = setup("vol-a", CreateBehavior::Settle { polls: 3 }).await;

        let state = waiter
            .wait_for_volume_state(
                &volume,
                ProvisioningState::Available,
                &[ProvisioningState::Error],
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(state, ProvisioningState::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_in_creating() {
        let (_client, waiter, volume) = setup("vol-b", CreateBehavior::Stuck).await;

        let failure = waiter
            .wait_for_volume_state(
                &volume,
                ProvisioningState::Available,
                &[ProvisioningState::Error],
                Duration::from_secs(10),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.state, ProvisioningState::Creating);
        assert_matches!(failure.error, Error::StateTimeout { .. });
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_wait_reports_in_progress() {
        let (client, waiter, volume) = setup("vol-c", CreateBehavior::Stuck).await;
        let mut workflow = Workflow::start("test", "vol-c");
        workflow.enter(Phase::Submitted);

        let err = waiter
            .wait_for_volume_create(&volume, &Timeouts::default(), &mut workflow)
            .await
            .unwrap_err();
        assert!(err.is_volume_creating());
        assert_eq!(client.delete_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_wait_cleans_up_error_volume() {
        let (client, waiter, volume) = setup("vol-d", CreateBehavior::Fail).await;
        let mut workflow = Workflow::start("test", "vol-d");
        workflow.enter(Phase::Submitted);

        let err = waiter
            .wait_for_volume_create(&volume, &Timeouts::default(), &mut workflow)
            .await
            .unwrap_err();
        assert_matches!(err, Error::AbortState { ref state, .. } if state == "Error");
        assert_eq!(client.delete_calls(), 1);
        assert_eq!(workflow.phase(), Phase::Cleaning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_wait_keeps_original_error_when_cleanup_fails() {
        let (client, waiter, volume) = setup("vol-e", CreateBehavior::Fail).await;
        client.fail_deletes(true);
        let mut workflow = Workflow::start("test", "vol-e");
        workflow.enter(Phase::Submitted);

        let err = waiter
            .wait_for_volume_create(&volume, &Timeouts::default(), &mut workflow)
            .await
            .unwrap_err();
        assert_matches!(err, Error::AbortState { .. });
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_volume_satisfies_deleted_wait() {
        let (client, waiter, volume) = setup("vol-f", CreateBehavior::Settle { polls: 0 }).await;
        client.delete_volume(&volume).await.unwrap();

        let state = waiter
            .wait_for_volume_state(
                &volume,
                ProvisioningState::Deleted,
                &[ProvisioningState::Error],
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(state, ProvisioningState::Deleted);
    }
}
