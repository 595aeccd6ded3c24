//! Write leases: at most one primary replica per chunk at any instant.
//!
//! Lease state sits inside the chunk registry's lock. Validity is evaluated
//! lazily from the stored expiration; nothing expires leases in the background.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{ChunkHandle, ChunkLocationInfo};
use crate::error::{MasterError, MasterResult};
use crate::master::chunk_registry::ChunkRegistry;

/// An outstanding lease on a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub handle: ChunkHandle,
    /// Selected by master, holds and renews the lease on the chunk.
    pub primary: String,
    /// Replicas known when the lease was granted.
    pub replicas: Vec<String>,
    pub expiration: SystemTime,
}

impl LeaseInfo {
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        now < self.expiration
    }
}

#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    leases: HashMap<ChunkHandle, LeaseInfo>,
}

impl LeaseTable {
    /// The lease for `handle`, if one is still valid at `now` and its primary
    /// is still a listed replica.
    fn current(
        &self,
        handle: ChunkHandle,
        replicas: &ChunkLocationInfo,
        now: SystemTime,
    ) -> Option<&LeaseInfo> {
        self.leases
            .get(&handle)
            .filter(|lease| lease.is_valid_at(now) && replicas.contains(&lease.primary))
    }

    fn grant_or_get<R: Rng + ?Sized>(
        &mut self,
        replicas: &ChunkLocationInfo,
        duration: Duration,
        now: SystemTime,
        rng: &mut R,
    ) -> MasterResult<LeaseInfo> {
        let handle = replicas.handle;
        if let Some(lease) = self.current(handle, replicas, now) {
            return Ok(lease.clone());
        }
        let primary = replicas
            .locations
            .choose(rng)
            .cloned()
            .ok_or(MasterError::LocationsUnavailable(handle))?;
        let lease = LeaseInfo {
            handle,
            primary,
            replicas: replicas.locations.clone(),
            expiration: now + duration,
        };
        debug!(handle, primary = %lease.primary, "granted lease");
        self.leases.insert(handle, lease.clone());
        Ok(lease)
    }

    fn extend(
        &mut self,
        address: &str,
        handle: ChunkHandle,
        duration: Duration,
        now: SystemTime,
    ) -> bool {
        match self.leases.get_mut(&handle) {
            Some(lease) if lease.primary == address && lease.is_valid_at(now) => {
                lease.expiration = now + duration;
                true
            }
            _ => false,
        }
    }
}

impl ChunkRegistry {
    /// Return the current lease holder for `handle`, granting a new lease to a
    /// random replica when there is no valid one. Reading never renews.
    pub fn find_lease_holder(&self, handle: ChunkHandle) -> MasterResult<LeaseInfo> {
        self.find_lease_holder_at(handle, SystemTime::now(), &mut rand::thread_rng())
    }

    pub(crate) fn find_lease_holder_at<R: Rng + ?Sized>(
        &self,
        handle: ChunkHandle,
        now: SystemTime,
        rng: &mut R,
    ) -> MasterResult<LeaseInfo> {
        let mut guard = self.write();
        let state = &mut *guard;
        if !state.is_allocated(handle) {
            return Err(MasterError::HandleNotFound(handle));
        }
        let replicas = state
            .locations
            .get(&handle)
            .ok_or(MasterError::LocationsUnavailable(handle))?;
        state.leases.grant_or_get(replicas, self.lease_duration, now, rng)
    }

    /// Extend the leases held by `address`. Handles for which `address` is not
    /// the current primary are skipped.
    pub fn extend_lease(&self, address: &str, handles: &[ChunkHandle]) {
        self.extend_lease_at(address, handles, SystemTime::now())
    }

    pub(crate) fn extend_lease_at(&self, address: &str, handles: &[ChunkHandle], now: SystemTime) {
        let mut state = self.write();
        for &handle in handles {
            if !state.leases.extend(address, handle, self.lease_duration, now) {
                debug!(handle, address, "ignored lease extension from non-primary");
            }
        }
    }

    /// The lease recorded for `handle`, valid or not.
    pub fn lease(&self, handle: ChunkHandle) -> Option<LeaseInfo> {
        self.read().leases.leases.get(&handle).cloned()
    }
}
