//! Snapshot workflows

use super::{NasStorageDriver, TIMESTAMP_FORMAT};
use crate::controlplane::workflow::{Phase, Workflow};
use crate::domain::ports::BackendSnapshot;
use crate::domain::state::ProvisioningState;
use crate::domain::volume::{Snapshot, SnapshotConfig, SnapshotState, VolumeConfig};
use crate::error::{Error, Result};
use tracing::{debug, info, trace, warn};

fn host_snapshot(config: SnapshotConfig, snapshot: &BackendSnapshot) -> Snapshot {
    Snapshot {
        config,
        created: snapshot.created.format(TIMESTAMP_FORMAT).to_string(),
        size_bytes: 0,
        state: SnapshotState::Online,
    }
}

impl NasStorageDriver {
    pub(super) async fn find_snapshot(
        &self,
        config: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<Option<Snapshot>> {
        trace!(
            method = "GetSnapshot",
            snapshot = %config.internal_name,
            volume = %config.volume_internal_name,
            ">>>> GetSnapshot"
        );
        self.refresh().await?;

        let Some(parent) = self.client.volume_exists(volume).await? else {
            debug!(volume = %config.volume_internal_name, "Volume for snapshot not found");
            return Ok(None);
        };

        let snapshot = match self
            .client
            .snapshot_for_volume(&parent, &config.internal_name)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        if !snapshot.provisioning_state.is_usable() {
            return Err(Error::InvalidState {
                kind: "snapshot".to_string(),
                name: config.internal_name.clone(),
                state: snapshot.provisioning_state.to_string(),
                expected: ProvisioningState::Available.to_string(),
            });
        }

        debug!(snapshot = %config.internal_name, "Found snapshot");
        Ok(Some(host_snapshot(config.clone(), &snapshot)))
    }

    pub(super) async fn list_snapshots(&self, volume: &VolumeConfig) -> Result<Vec<Snapshot>> {
        trace!(method = "GetSnapshots", volume = %volume.internal_name, ">>>> GetSnapshots");
        self.refresh().await?;

        let parent = match self.client.volume(volume).await {
            Ok(parent) => parent,
            Err(e) if e.is_not_found() => {
                debug!(volume = %volume.internal_name, "Volume for snapshots not found");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(self
            .client
            .snapshots_for_volume(&parent)
            .await?
            .iter()
            .filter(|snapshot| snapshot.provisioning_state.is_usable())
            .map(|snapshot| {
                let config = SnapshotConfig {
                    name: snapshot.name.clone(),
                    internal_name: snapshot.name.clone(),
                    volume_name: volume.name.clone(),
                    volume_internal_name: volume.internal_name.clone(),
                };
                host_snapshot(config, snapshot)
            })
            .collect())
    }

    pub(super) async fn snapshot_volume(
        &self,
        config: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<Snapshot> {
        let mut workflow = Workflow::start("create_snapshot", config.internal_name.clone());
        let result = self.run_snapshot(config, volume, &mut workflow).await;
        workflow.finish(result)
    }

    async fn run_snapshot(
        &self,
        config: &SnapshotConfig,
        volume: &VolumeConfig,
        workflow: &mut Workflow,
    ) -> Result<Snapshot> {
        self.refresh().await?;

        let parent = self
            .client
            .volume_exists(volume)
            .await?
            .ok_or_else(|| Error::not_found("volume", &config.volume_internal_name))?;

        let created = self
            .client
            .create_snapshot(&parent, &config.internal_name)
            .await?;
        workflow.enter(Phase::Submitted);

        workflow.enter(Phase::Polling);
        self.waiter
            .wait_for_snapshot_state(
                &created,
                &parent,
                ProvisioningState::Available,
                &[ProvisioningState::Error],
                self.timeouts.snapshot,
            )
            .await?;

        info!(
            snapshot = %config.internal_name,
            volume = %config.volume_internal_name,
            "Snapshot created"
        );
        Ok(host_snapshot(config.clone(), &created))
    }

    pub(super) async fn revert_to_snapshot(
        &self,
        config: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<()> {
        let mut workflow = Workflow::start("restore_snapshot", config.internal_name.clone());
        let result = self.run_restore(config, volume, &mut workflow).await;
        workflow.finish(result)
    }

    async fn run_restore(
        &self,
        config: &SnapshotConfig,
        volume: &VolumeConfig,
        workflow: &mut Workflow,
    ) -> Result<()> {
        self.refresh().await?;

        let parent = self.client.volume(volume).await?;
        let snapshot = self
            .client
            .snapshot_for_volume(&parent, &config.internal_name)
            .await?;
        if !snapshot.provisioning_state.is_usable() {
            return Err(Error::InvalidState {
                kind: "snapshot".to_string(),
                name: config.internal_name.clone(),
                state: snapshot.provisioning_state.to_string(),
                expected: ProvisioningState::Available.to_string(),
            });
        }

        self.client.restore_snapshot(&parent, &snapshot).await?;
        workflow.enter(Phase::Submitted);

        workflow.enter(Phase::Polling);
        self.waiter
            .wait_for_volume_state(
                &parent,
                ProvisioningState::Available,
                &[
                    ProvisioningState::Error,
                    ProvisioningState::Deleting,
                    ProvisioningState::Deleted,
                ],
                self.timeouts.sdk,
            )
            .await?;

        info!(
            snapshot = %config.internal_name,
            volume = %config.volume_internal_name,
            "Volume reverted to snapshot"
        );
        Ok(())
    }

    pub(super) async fn remove_snapshot(
        &self,
        config: &SnapshotConfig,
        volume: &VolumeConfig,
    ) -> Result<()> {
        let mut workflow = Workflow::start("delete_snapshot", config.internal_name.clone());
        let result = self.run_remove_snapshot(config, volume, &mut workflow).await;
        workflow.finish(result)
    }

    async fn run_remove_snapshot(
        &self,
        config: &SnapshotConfig,
        volume: &VolumeConfig,
        workflow: &mut Workflow,
    ) -> Result<()> {
        self.refresh().await?;

        let parent = match self.client.volume(volume).await {
            Ok(parent) => parent,
            Err(e) if e.is_not_found() => {
                warn!(volume = %config.volume_internal_name, "Volume for snapshot already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let snapshot = match self
            .client
            .snapshot_for_volume(&parent, &config.internal_name)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => {
                warn!(snapshot = %config.internal_name, "Snapshot already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.client.delete_snapshot(&parent, &snapshot).await?;
        workflow.enter(Phase::Submitted);

        workflow.enter(Phase::Polling);
        self.waiter
            .wait_for_snapshot_state(
                &snapshot,
                &parent,
                ProvisioningState::Deleted,
                &[ProvisioningState::Error],
                self.timeouts.snapshot,
            )
            .await?;

        info!(snapshot = %config.internal_name, "Snapshot deleted");
        Ok(())
    }
}
