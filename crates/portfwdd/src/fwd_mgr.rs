//! Forwarding Manager - reconciles the desired-state table with live resources

use tracing::{debug, error, info, instrument, warn};

use portfwd_common::{
    AddRequest, ForwardDriver, ForwardingRule, FwdError, FwdResult, Method, RemoveRequest,
    ResourceHandle,
};

use crate::keys::{encode_key, rule_key, RuleKey};
use crate::registry::ResourceRegistry;
use crate::store::{DesiredTable, JsonFileStore};
use crate::validate::{validate_add, validate_remove};

/// Result of an add request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Installed and persisted.
    Added(ForwardingRule),
    /// The identity key is already in the table; nothing changed.
    AlreadyForwarded,
}

/// Result of a remove request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Torn down and dropped from the table.
    Removed(ForwardingRule),
    /// An unreadable store entry under that key was dropped; nothing was live.
    Discarded,
    /// The identity key is not in the table; nothing changed.
    NotForwarded,
}

/// Summary of a startup sync pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Rules with a live resource after the pass.
    pub installed: usize,
    /// Rules whose install failed, with the failure.
    pub failed: Vec<(RuleKey, FwdError)>,
}

/// Forwarding Manager
///
/// Sole owner of the desired-state table and the live resource registry.
/// Every mutation goes through `&mut self`, so callers sharing a manager
/// across tasks must serialize access (the server wraps it in a mutex).
pub struct FwdMgr {
    /// Rules that should be live
    table: DesiredTable,

    /// Rule key -> live resource handle
    registry: ResourceRegistry,

    /// Durable copy of `table`
    store: JsonFileStore,

    /// Relay backend
    relay: Box<dyn ForwardDriver>,

    /// NAT backend
    nat: Box<dyn ForwardDriver>,
}

impl FwdMgr {
    /// Create a new FwdMgr. The table stays empty until [`FwdMgr::startup_sync`].
    pub fn new(
        store: JsonFileStore,
        relay: Box<dyn ForwardDriver>,
        nat: Box<dyn ForwardDriver>,
    ) -> Self {
        debug_assert_eq!(relay.method(), Method::Relay);
        debug_assert_eq!(nat.method(), Method::Nat);
        Self {
            table: DesiredTable::new(),
            registry: ResourceRegistry::new(),
            store,
            relay,
            nat,
        }
    }

    fn driver(&self, method: Method) -> &dyn ForwardDriver {
        match method {
            Method::Relay => self.relay.as_ref(),
            Method::Nat => self.nat.as_ref(),
        }
    }

    /// Reloads the table from the store, tears down every entry, then
    /// installs every entry.
    ///
    /// Teardown failures are ignored: the resource may never have existed.
    /// Install failures are collected in the report and the rule stays in
    /// the table so the next sync retries it.
    #[instrument(skip(self))]
    pub async fn startup_sync(&mut self) -> FwdResult<SyncReport> {
        self.prune_exited();
        self.table = self.store.load()?;
        info!(
            "Syncing {} rules from {}",
            self.table.len(),
            self.store.path().display()
        );

        let entries: Vec<(RuleKey, ForwardingRule)> = self
            .table
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();

        for (key, rule) in &entries {
            self.teardown(key, rule).await;
        }

        let mut report = SyncReport::default();
        for (key, rule) in entries {
            match self.install(&key, &rule).await {
                Ok(()) => report.installed += 1,
                Err(e) => {
                    error!(key = %key, "Failed to install {}: {}", rule, e);
                    report.failed.push((key, e));
                }
            }
        }

        info!(
            "Sync complete: {} installed, {} failed",
            report.installed,
            report.failed.len()
        );
        Ok(report)
    }

    /// Rules in table order.
    pub fn list_rules(&self) -> Vec<ForwardingRule> {
        self.table.rules().cloned().collect()
    }

    /// Validates and installs a new rule.
    ///
    /// On any install failure the table is left exactly as it was.
    #[instrument(skip(self))]
    pub async fn add_rule(&mut self, req: &AddRequest) -> FwdResult<AddOutcome> {
        let rule = validate_add(req)?;
        let key = rule_key(&rule);
        self.prune_exited();

        if self.table.contains_key(&key) {
            info!(key = %key, "Port already forwarded");
            return Ok(AddOutcome::AlreadyForwarded);
        }

        // A kernel rule from a lost bookkeeping state would otherwise be
        // appended a second time.
        if rule.method == Method::Nat {
            self.teardown(&key, &rule).await;
        }

        self.install(&key, &rule).await?;

        self.table.insert(rule.clone());
        self.store.save(&self.table)?;
        info!(key = %key, "Added {}", rule);
        Ok(AddOutcome::Added(rule))
    }

    /// Validates and removes a rule. Backend teardown is best-effort.
    #[instrument(skip(self))]
    pub async fn remove_rule(&mut self, req: &RemoveRequest) -> FwdResult<RemoveOutcome> {
        let (port, protocol, method) = validate_remove(req)?;
        let key = encode_key(port, protocol, method);
        self.prune_exited();

        let Some(rule) = self.table.get(&key).cloned() else {
            if self.table.remove_unreadable(&key) {
                self.store.save(&self.table)?;
                info!(key = %key, "Dropped unreadable store entry");
                return Ok(RemoveOutcome::Discarded);
            }
            info!(key = %key, "Port not forwarded");
            return Ok(RemoveOutcome::NotForwarded);
        };

        self.teardown(&key, &rule).await;

        self.table.remove(&key);
        self.store.save(&self.table)?;
        info!(key = %key, "Removed {}", rule);
        Ok(RemoveOutcome::Removed(rule))
    }

    /// Number of tracked resources that are still running.
    pub fn live_resources(&self) -> usize {
        self.registry
            .iter()
            .filter(|(_, handle)| self.is_running(handle))
            .count()
    }

    /// Whether a running resource is tracked for `key`.
    pub fn is_live(&self, key: &RuleKey) -> bool {
        self.registry
            .get(key)
            .is_some_and(|handle| self.is_running(&handle))
    }

    fn is_running(&self, handle: &ResourceHandle) -> bool {
        let method = match handle {
            ResourceHandle::Process { .. } => Method::Relay,
            ResourceHandle::KernelRule => Method::Nat,
        };
        self.driver(method).is_running(handle)
    }

    /// Drops handles whose resource went away by itself.
    fn prune_exited(&mut self) {
        let exited: Vec<RuleKey> = self
            .registry
            .iter()
            .filter(|(_, handle)| !self.is_running(handle))
            .map(|(key, _)| key.clone())
            .collect();
        for key in exited {
            warn!(key = %key, "Live resource exited on its own, forgetting it");
            self.registry.take(&key);
        }
    }

    async fn install(&mut self, key: &RuleKey, rule: &ForwardingRule) -> FwdResult<()> {
        let handle = self.driver(rule.method).install(rule).await?;
        if let Some(stale) = self.registry.insert(key.clone(), handle) {
            warn!(key = %key, ?stale, "Replaced a live resource handle");
        }
        Ok(())
    }

    async fn teardown(&mut self, key: &RuleKey, rule: &ForwardingRule) {
        let handle = self.registry.take(key);
        if let Err(e) = self.driver(rule.method).remove(rule, handle).await {
            debug!(key = %key, "Ignoring teardown failure: {}", e);
        }
    }
}
