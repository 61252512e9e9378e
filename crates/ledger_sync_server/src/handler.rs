//! The sync merge algorithm.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{ServerStore, StoreTransaction};
use ledger_core::{Item, Owner, RecordId, Watermark};
use ledger_sync_protocol::{KindRegistry, SyncRequest, SyncResponse};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reconciles client batches against the server store.
pub struct SyncHandler {
    config: Arc<ServerConfig>,
    store: Arc<ServerStore>,
    registry: KindRegistry,
}

impl SyncHandler {
    /// Creates a new handler.
    pub fn new(config: Arc<ServerConfig>, store: Arc<ServerStore>, registry: KindRegistry) -> Self {
        Self {
            config,
            store,
            registry,
        }
    }

    /// Handles one sync request for an authenticated caller.
    ///
    /// Runs the merge in a single transaction, retrying it when a concurrent
    /// commit invalidates what it read. Client errors reject the whole
    /// request and leave the store untouched.
    pub fn handle(&self, caller: &Owner, request: SyncRequest) -> ServerResult<SyncResponse> {
        self.registry.codec(&request.record_type)?;

        if request.values.len() > self.config.max_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many records: {} > {}",
                request.values.len(),
                self.config.max_batch
            )));
        }

        let since = request.last_updated;
        let candidates = self.candidates(caller, request.values);

        for attempt in 0..=self.config.max_txn_retries {
            match self.merge(caller, since, &candidates) {
                Err(ServerError::TransactionConflict) => {
                    debug!(%caller, attempt, "sync transaction conflicted, retrying");
                }
                Ok((tick, values)) => {
                    info!(
                        %caller,
                        since = %since,
                        %tick,
                        received = candidates.len(),
                        returned = values.len(),
                        "sync completed"
                    );
                    return Ok(SyncResponse::new(request.record_type, tick, values));
                }
                Err(err) => {
                    if err.is_client_error() {
                        warn!(%caller, error = %err, "sync rejected");
                    }
                    return Err(err);
                }
            }
        }

        Err(ServerError::Storage(format!(
            "transaction retries exhausted after {} attempts",
            self.config.max_txn_retries + 1
        )))
    }

    /// Drops invalid records and keeps the last occurrence of each id.
    fn candidates(&self, caller: &Owner, values: Vec<Item>) -> BTreeMap<RecordId, Item> {
        let mut candidates = BTreeMap::new();
        for item in values {
            if let Err(err) = item.validate() {
                warn!(%caller, error = %err, "skipping invalid record");
                continue;
            }
            candidates.insert(item.id(), item);
        }
        candidates
    }

    fn merge(
        &self,
        caller: &Owner,
        since: Watermark,
        candidates: &BTreeMap<RecordId, Item>,
    ) -> ServerResult<(Watermark, Vec<Item>)> {
        let mut txn = self.store.begin();
        match self.stage(&mut txn, caller, since, candidates) {
            Ok(mut response) => {
                let outcome = self.store.commit(&mut txn, |now| {
                    if now < since {
                        Err(ServerError::StaleClock {
                            claimed: since,
                            now,
                        })
                    } else {
                        Ok(())
                    }
                })?;
                for item in outcome.written {
                    response.insert(item.id(), item);
                }
                Ok((outcome.tick, response.into_values().collect()))
            }
            Err(err) => {
                self.store.abort(&mut txn);
                Err(err)
            }
        }
    }

    /// Reads the caller's window and stages accepted candidates.
    ///
    /// Returns the window keyed by id; accepted records replace their entry
    /// after commit.
    fn stage(
        &self,
        txn: &mut StoreTransaction,
        caller: &Owner,
        since: Watermark,
        candidates: &BTreeMap<RecordId, Item>,
    ) -> ServerResult<BTreeMap<RecordId, Item>> {
        let window: BTreeMap<RecordId, Item> = self
            .store
            .changed_since(txn, caller, since)?
            .into_iter()
            .map(|item| (item.id(), item))
            .collect();

        for (id, candidate) in candidates {
            if let Some(server_copy) = window.get(id) {
                if server_copy.last_updated() > since {
                    debug!(%caller, %id, server = %server_copy.last_updated(), "server copy is newer, client edit dropped");
                    continue;
                }
            }

            if let Some((owner, _)) = self.store.lookup(txn, *id)? {
                if &owner != caller {
                    return Err(ServerError::OwnershipViolation);
                }
            }

            txn.put(caller.clone(), candidate.clone())?;
        }

        debug!(%caller, window = window.len(), accepted = txn.write_count(), "merge staged");
        Ok(window)
    }
}

impl std::fmt::Debug for SyncHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandler")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
