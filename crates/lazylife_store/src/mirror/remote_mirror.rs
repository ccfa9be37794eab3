//! Per-entity mirror between a context and a remote backend.

use super::backend::{RemoteBackend, RemoteChange, RemoteRow, RemoteSubscriptionId};
use super::entity::MirroredEntity;
use crate::accessor::WriteOutcome;
use crate::context::StorageContext;
use crate::identity::Identity;
use log::{debug, info, warn};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    Pushed,
    SkippedGuest,
    Failed,
}

pub struct RemoteMirror<E: MirroredEntity> {
    context: StorageContext,
    backend: Arc<dyn RemoteBackend>,
    subscription: Mutex<Option<RemoteSubscriptionId>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: MirroredEntity> RemoteMirror<E> {
    pub fn new(context: StorageContext, backend: Arc<dyn RemoteBackend>) -> Arc<Self> {
        Arc::new(Self {
            context,
            backend,
            subscription: Mutex::new(None),
            _entity: PhantomData,
        })
    }

    fn namespace(&self) -> String {
        self.context.resolve_namespace(E::LOGICAL_KEY, E::SCOPE)
    }

    /// Entities currently stored locally for the active identity.
    pub fn local_snapshot(&self) -> Vec<E> {
        self.context.accessor().read(&self.namespace(), Vec::new())
    }

    /// Writes `entity` locally (replacing any entity with the same key),
    /// then pushes it upstream.
    pub fn save(&self, entity: &E) -> MirrorOutcome {
        let mut entities = self.local_snapshot();
        let key = entity.entity_key();
        match entities.iter_mut().find(|existing| existing.entity_key() == key) {
            Some(existing) => *existing = entity.clone(),
            None => entities.push(entity.clone()),
        }
        self.context.accessor().write(&self.namespace(), &entities);
        self.push(entity)
    }

    /// Upserts one entity snapshot; guests never reach the backend.
    pub fn push(&self, entity: &E) -> MirrorOutcome {
        let Identity::User(owner) = self.context.identity() else {
            debug!(
                "event=mirror_push module=mirror status=skipped table={} reason=guest",
                E::TABLE
            );
            return MirrorOutcome::SkippedGuest;
        };

        let snapshot = match serde_json::to_value(entity) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    "event=mirror_push module=mirror status=error table={} error_code=serialize_failed error={err}",
                    E::TABLE
                );
                return MirrorOutcome::Failed;
            }
        };
        let key = entity.entity_key();
        let row = RemoteRow {
            key: key.clone(),
            owner: Some(owner),
            snapshot,
        };

        match self.backend.upsert(E::TABLE, row) {
            Ok(()) => {
                debug!(
                    "event=mirror_push module=mirror status=ok table={} key={key}",
                    E::TABLE
                );
                MirrorOutcome::Pushed
            }
            Err(err) => {
                warn!(
                    "event=mirror_push module=mirror status=error table={} key={key} error_code={} retryable={} error={}",
                    E::TABLE, err.code, err.retryable, err.message
                );
                MirrorOutcome::Failed
            }
        }
    }

    /// Runs `push` on a worker thread so callers never wait on the network.
    pub fn push_in_background(self: &Arc<Self>, entity: E) -> JoinHandle<MirrorOutcome> {
        let mirror = Arc::clone(self);
        thread::spawn(move || mirror.push(&entity))
    }

    /// Remote entities relevant to the active identity, or the local
    /// snapshot when the backend cannot be reached.
    pub fn pull(&self) -> Vec<E> {
        self.fetch_remote()
            .map(|(_, entities)| entities)
            .unwrap_or_else(|| self.local_snapshot())
    }

    /// Pulls and merges into local storage; unchanged content is not
    /// rewritten and emits no signal.
    ///
    /// The pulled set is authoritative for the active identity: remote
    /// deletions and revoked memberships drop the local copy.
    pub fn sync_from_remote(&self) -> WriteOutcome {
        let Some((identity, remote)) = self.fetch_remote() else {
            return WriteOutcome::Unchanged;
        };
        let merged = merge_entities(self.local_snapshot(), remote, &identity);
        let outcome = self.context.accessor().write(&self.namespace(), &merged);
        debug!(
            "event=mirror_sync module=mirror status=ok table={} entities={} outcome={:?}",
            E::TABLE,
            merged.len(),
            outcome
        );
        outcome
    }

    /// Removes an entity locally, then deletes it remotely when signed in.
    pub fn remove(&self, key: &str) -> MirrorOutcome {
        let namespace = self.namespace();
        let remaining: Vec<E> = self
            .local_snapshot()
            .into_iter()
            .filter(|entity| entity.entity_key() != key)
            .collect();
        self.context.accessor().write(&namespace, &remaining);

        if self.context.identity().is_guest() {
            return MirrorOutcome::SkippedGuest;
        }
        match self.backend.delete(E::TABLE, key) {
            Ok(()) => MirrorOutcome::Pushed,
            Err(err) => {
                warn!(
                    "event=mirror_delete module=mirror status=error table={} key={key} error={err}",
                    E::TABLE
                );
                MirrorOutcome::Failed
            }
        }
    }

    /// Subscribes to backend changes; each one re-runs `sync_from_remote`.
    ///
    /// Returns `false` when the subscription could not be opened.
    pub fn attach(self: &Arc<Self>) -> bool {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscription.is_some() {
            return true;
        }

        let weak = Arc::downgrade(self);
        let listener = Arc::new(move |change: &RemoteChange| {
            if let Some(mirror) = weak.upgrade() {
                debug!(
                    "event=mirror_remote_change module=mirror status=ok table={} key={}",
                    change.table, change.key
                );
                mirror.sync_from_remote();
            }
        });
        match self.backend.subscribe(E::TABLE, listener) {
            Ok(id) => {
                info!(
                    "event=mirror_attach module=mirror status=ok table={}",
                    E::TABLE
                );
                *subscription = Some(id);
                true
            }
            Err(err) => {
                warn!(
                    "event=mirror_attach module=mirror status=error table={} error={err}",
                    E::TABLE
                );
                false
            }
        }
    }

    pub fn detach(&self) {
        let taken = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = taken {
            self.backend.unsubscribe(id);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn fetch_remote(&self) -> Option<(String, Vec<E>)> {
        let Identity::User(identity) = self.context.identity() else {
            return None;
        };
        let rows = match self.backend.select(E::TABLE) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(
                    "event=mirror_pull module=mirror status=error table={} fallback=local error={err}",
                    E::TABLE
                );
                return None;
            }
        };

        let entities: Vec<E> = rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value::<E>(row.snapshot) {
                Ok(entity) => Some(entity),
                Err(err) => {
                    warn!(
                        "event=mirror_pull module=mirror status=error table={} key={} error_code=bad_snapshot error={err}",
                        E::TABLE, row.key
                    );
                    None
                }
            })
            .filter(|entity| entity.is_relevant_to(&identity))
            .collect();
        Some((identity, entities))
    }
}

impl<E: MirroredEntity> Drop for RemoteMirror<E> {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Whole-entity last-writer-wins merge of a pull for `identity`.
///
/// `remote` holds every entity relevant to `identity`. Remote entities
/// replace local ones with the same key in place and newcomers are
/// appended. Local entities relevant to `identity` but missing remotely
/// were deleted or revoked and are dropped; entities outside its
/// relevance (other identities' groups under a global key) are kept.
pub fn merge_entities<E: MirroredEntity>(
    local: Vec<E>,
    remote: Vec<E>,
    identity: &str,
) -> Vec<E> {
    let mut remaining = remote;
    let mut merged: Vec<E> = local
        .into_iter()
        .filter_map(|entity| {
            let key = entity.entity_key();
            match remaining.iter().position(|candidate| candidate.entity_key() == key) {
                Some(index) => Some(remaining.remove(index)),
                None if entity.is_relevant_to(identity) => None,
                None => Some(entity),
            }
        })
        .collect();
    merged.extend(remaining);
    merged
}
