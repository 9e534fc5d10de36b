//! In-process concurrency groups.
//!
//! A group admits any number of runs, but only the most recent one may
//! publish. Entering a group cancels the previous holder's token; publishing
//! is serialised per group and re-checks the token once the permit is held, so
//! a run that was superseded while waiting never publishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::cancel::CancelToken;
use crate::error::PipelineError;

/// Registry of concurrency groups. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyGroups {
    inner: Arc<Mutex<HashMap<String, GroupSlot>>>,
}

#[derive(Debug, Default)]
struct GroupSlot {
    generation: u64,
    holder: Option<(u64, CancelToken)>,
    publish: Arc<AsyncMutex<()>>,
}

impl ConcurrencyGroups {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, GroupSlot>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enter `group`, superseding the run currently holding it.
    pub fn enter(&self, group: &str) -> GroupLease {
        let mut slots = self.slots();
        let slot = slots.entry(group.to_string()).or_default();

        if let Some((generation, previous)) = slot.holder.take() {
            tracing::info!(
                "Superseding run #{} in concurrency group '{}'",
                generation,
                group
            );
            previous.cancel();
        }

        slot.generation += 1;
        let token = CancelToken::new();
        slot.holder = Some((slot.generation, token.clone()));

        GroupLease {
            group: group.to_string(),
            generation: slot.generation,
            token,
            publish: Arc::clone(&slot.publish),
            groups: self.clone(),
        }
    }

    /// Generation of the current holder of `group`, if any.
    pub fn holder(&self, group: &str) -> Option<u64> {
        self.slots()
            .get(group)
            .and_then(|slot| slot.holder.as_ref().map(|(generation, _)| *generation))
    }

    fn release(&self, group: &str, generation: u64) {
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(group) {
            if matches!(slot.holder, Some((held, _)) if held == generation) {
                slot.holder = None;
            }
        }
    }
}

/// Membership of one run in a concurrency group.
///
/// Dropping the lease leaves the group.
#[derive(Debug)]
pub struct GroupLease {
    group: String,
    generation: u64,
    token: CancelToken,
    publish: Arc<AsyncMutex<()>>,
    groups: ConcurrencyGroups,
}

/// Exclusive right to publish for a group. Released on drop.
#[derive(Debug)]
pub struct DeployPermit {
    _guard: OwnedMutexGuard<()>,
}

impl GroupLease {
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Position of this run in the group's entry order, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Token cancelled when a newer run enters the group.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the group's publish slot.
    ///
    /// Fails if the run was superseded before or while waiting.
    pub async fn deploy_permit(&self) -> Result<DeployPermit, PipelineError> {
        let guard = Arc::clone(&self.publish).lock_owned().await;

        if self.is_superseded() {
            return Err(PipelineError::Superseded {
                group: self.group.clone(),
                step: "deploy".to_string(),
            });
        }

        Ok(DeployPermit { _guard: guard })
    }
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        self.groups.release(&self.group, self.generation);
    }
}
