//! Selected tenant / data contract and the cached tenant listing.
//!
//! Loads are ordered by generation counters held in `watch` channels: every load
//! bumps its counter, and a load only writes state if its generation is still the
//! newest when the response arrives. Superseded loads also stop waiting on the
//! transport as soon as a newer generation appears.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::identity::SessionController;
use crate::storage::{keys, KeyValueStore, SharedKv};

mod clients;
mod model;

pub use clients::ClientsApi;
pub use model::{
    ContractPhase, DataContract, LoadOutcome, Scope, ScopePhase, SortDirection, Tenant, TenantInput,
    TenantListView, TenantPage, TenantQuery, TenantStatus,
};

/// Persisted ids from a previous process, not yet checked against a fresh listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRestore {
    tenant_id: i64,
    contract_id: Option<i64>,
}

#[derive(Debug, Default)]
struct ScopeState {
    phase: ScopePhase,
    contract_phase: ContractPhase,
    scope: Scope,
    page: TenantPage,
    query: TenantQuery,
    contracts: Vec<DataContract>,
    loading: bool,
    loaded_once: bool,
    error: Option<String>,
    pending_restore: Option<PendingRestore>,
}

pub struct ScopeContext {
    session: Arc<SessionController>,
    api: ClientsApi,
    kv: SharedKv,
    debounce: Duration,
    state: Mutex<ScopeState>,
    tenant_gen: watch::Sender<u64>,
    contract_gen: watch::Sender<u64>,
}

fn bump(tx: &watch::Sender<u64>) -> u64 {
    let mut next = 0;
    tx.send_modify(|g| {
        *g += 1;
        next = *g;
    });
    next
}

/// Resolves once `tx` has moved past `generation`.
async fn superseded(mut rx: watch::Receiver<u64>, generation: u64) {
    let _ = rx.wait_for(|g| *g != generation).await;
}

impl ScopeContext {
    pub fn new(session: Arc<SessionController>, api: ClientsApi, kv: SharedKv, debounce: Duration) -> Self {
        let pending_restore = read_persisted(kv.as_ref());
        if let Some(p) = pending_restore {
            debug!(target: "console::scope", tenant = p.tenant_id, contract = ?p.contract_id, "persisted selection awaiting validation");
        }
        let (tenant_gen, _) = watch::channel(0);
        let (contract_gen, _) = watch::channel(0);
        Self {
            session,
            api,
            kv,
            debounce,
            state: Mutex::new(ScopeState { pending_restore, ..Default::default() }),
            tenant_gen,
            contract_gen,
        }
    }

    pub fn api(&self) -> &ClientsApi { &self.api }

    pub fn current_scope(&self) -> Scope { self.state.lock().scope.clone() }

    pub fn phase(&self) -> ScopePhase { self.state.lock().phase }

    pub fn contract_phase(&self) -> ContractPhase { self.state.lock().contract_phase }

    pub fn contracts(&self) -> Vec<DataContract> { self.state.lock().contracts.clone() }

    pub fn last_query(&self) -> TenantQuery { self.state.lock().query.clone() }

    pub fn tenant_list(&self) -> TenantListView {
        let st = self.state.lock();
        TenantListView {
            tenants: st.page.content.clone(),
            total_elements: st.page.total_elements,
            total_pages: st.page.total_pages,
            page: st.page.page,
            size: st.page.size,
            loading: st.loading,
            error: st.error.clone(),
        }
    }

    /// Ids restored from storage that still await validation, as `(tenant, contract)`.
    pub fn pending_restore(&self) -> Option<(i64, Option<i64>)> {
        self.state.lock().pending_restore.map(|p| (p.tenant_id, p.contract_id))
    }

    fn require_session(&self) -> AppResult<()> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(AppError::unauthorized("not_authenticated", "Sign in before loading tenants."))
        }
    }

    /// Load one page of tenants. Rapid calls within the debounce window collapse into
    /// the last one; only the newest issued call may change state.
    pub async fn load_tenants(&self, query: TenantQuery) -> AppResult<LoadOutcome> {
        self.require_session()?;
        let generation = bump(&self.tenant_gen);
        {
            let mut st = self.state.lock();
            st.loading = true;
            st.phase = ScopePhase::LoadingTenants;
        }

        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
            if *self.tenant_gen.borrow() != generation {
                debug!(target: "console::scope", generation, "tenant load debounced away");
                return Ok(LoadOutcome::Superseded);
            }
        }

        debug!(target: "console::scope", generation, page = query.page, size = query.size, "loading tenants");
        let result = tokio::select! {
            r = self.api.list_tenants(&query) => Some(r),
            _ = superseded(self.tenant_gen.subscribe(), generation) => None,
        };
        let Some(result) = result else {
            debug!(target: "console::scope", generation, "tenant load aborted by newer load");
            return Ok(LoadOutcome::Superseded);
        };

        // An auth failure may already have reset scope (and bumped the generation)
        // through the signed-out hook; it is reported either way.
        match result {
            Err(e) if e.is_auth_failure() => {
                warn!(target: "console::scope", code = e.code_str(), "tenant load rejected; clearing scope");
                self.reset();
                Err(e)
            }
            _ if *self.tenant_gen.borrow() != generation => {
                debug!(target: "console::scope", generation, "stale tenant page dropped");
                Ok(LoadOutcome::Superseded)
            }
            Ok(page) => {
                let restore = self.apply_tenants(query, page);
                if let Some((tenant_id, contract_id)) = restore {
                    if let Err(e) = self.load_contracts(tenant_id, contract_id).await {
                        if e.is_auth_failure() {
                            return Err(e);
                        }
                        warn!(target: "console::scope", tenant = tenant_id, "restored tenant's contracts failed to load: {}", e);
                    }
                }
                Ok(LoadOutcome::Applied)
            }
            Err(e) => {
                warn!(target: "console::scope", code = e.code_str(), "tenant load failed; keeping last listing: {}", e.message());
                let mut st = self.state.lock();
                st.loading = false;
                st.error = Some(e.message().to_string());
                st.phase = if st.loaded_once { ScopePhase::Ready } else { ScopePhase::Uninitialized };
                Err(e)
            }
        }
    }

    /// Reload with the last query.
    pub async fn refresh_tenants(&self) -> AppResult<LoadOutcome> {
        let query = self.last_query();
        self.load_tenants(query).await
    }

    /// Install a fresh page and reconcile the selection against it. Returns the tenant
    /// (and contract) whose contracts must be loaded to finish a restore.
    fn apply_tenants(&self, query: TenantQuery, page: TenantPage) -> Option<(i64, Option<i64>)> {
        let complete = page.total_pages <= 1 && page.page == 0 && !query.is_filtered();
        let mut st = self.state.lock();
        st.page = page;
        st.query = query;
        st.loading = false;
        st.loaded_once = true;
        st.error = None;
        st.phase = ScopePhase::Ready;

        let mut restore = None;
        let mut drop_selection = false;
        if let Some(pending) = st.pending_restore.take() {
            match st.page.content.iter().find(|t| t.id == pending.tenant_id).cloned() {
                Some(t) => {
                    info!(target: "console::scope", tenant = t.id, "restored tenant selection");
                    st.scope = Scope { tenant: Some(t), data_contract: None };
                    st.contract_phase = ContractPhase::None;
                    restore = Some((pending.tenant_id, pending.contract_id));
                }
                None => {
                    info!(target: "console::scope", tenant = pending.tenant_id, "persisted tenant not in listing; dropping it");
                    drop_selection = true;
                }
            }
        } else if let Some(selected) = st.scope.tenant.as_ref().map(|t| t.id) {
            match st.page.content.iter().find(|t| t.id == selected).cloned() {
                Some(fresh) => st.scope.tenant = Some(fresh),
                None if complete => {
                    info!(target: "console::scope", tenant = selected, "selected tenant no longer listed; clearing selection");
                    drop_selection = true;
                }
                None => {}
            }
        }

        if drop_selection {
            st.scope = Scope::default();
            st.contracts.clear();
            st.contract_phase = ContractPhase::None;
        }
        drop(st);
        if drop_selection {
            bump(&self.contract_gen);
            self.forget(&[keys::SELECTED_CLIENT_ID, keys::SELECTED_INTERFACE_ID]);
        }
        restore
    }

    /// Change the selected tenant. The contract selection is always cleared; contracts
    /// are loaded only when a tenant is chosen.
    pub async fn select_tenant(&self, tenant: Option<Tenant>) -> AppResult<LoadOutcome> {
        {
            let mut st = self.state.lock();
            st.pending_restore = None;
            st.scope = Scope { tenant: tenant.clone(), data_contract: None };
            st.contracts.clear();
            st.contract_phase = ContractPhase::None;
        }
        bump(&self.contract_gen);
        self.forget(&[keys::SELECTED_INTERFACE_ID]);
        match &tenant {
            Some(t) => {
                self.remember(keys::SELECTED_CLIENT_ID, t.id);
                info!(target: "console::scope", tenant = t.id, name = %t.name, "tenant selected");
                self.load_contracts(t.id, None).await
            }
            None => {
                self.forget(&[keys::SELECTED_CLIENT_ID]);
                info!(target: "console::scope", "tenant selection cleared");
                Ok(LoadOutcome::Applied)
            }
        }
    }

    /// The contract must belong to the selected tenant.
    pub fn select_data_contract(&self, contract: Option<DataContract>) -> AppResult<()> {
        let mut st = self.state.lock();
        match contract {
            None => {
                st.scope.data_contract = None;
                drop(st);
                self.forget(&[keys::SELECTED_INTERFACE_ID]);
                Ok(())
            }
            Some(c) => {
                let tenant_id = st.scope.tenant.as_ref().map(|t| t.id);
                if tenant_id != Some(c.tenant_id) {
                    return Err(AppError::validation(
                        "contract_outside_scope",
                        format!("Data contract {} does not belong to the selected tenant.", c.id),
                    ));
                }
                let id = c.id;
                st.scope.data_contract = Some(c);
                drop(st);
                self.remember(keys::SELECTED_INTERFACE_ID, id);
                info!(target: "console::scope", contract = id, "data contract selected");
                Ok(())
            }
        }
    }

    pub async fn refresh_contracts(&self) -> AppResult<LoadOutcome> {
        let selected = self.state.lock().scope.tenant.as_ref().map(|t| t.id);
        match selected {
            Some(id) => self.load_contracts(id, None).await,
            None => Err(AppError::validation("no_tenant_selected", "Select a tenant first.")),
        }
    }

    async fn load_contracts(&self, tenant_id: i64, restore_contract: Option<i64>) -> AppResult<LoadOutcome> {
        self.require_session()?;
        let generation = bump(&self.contract_gen);
        self.state.lock().contract_phase = ContractPhase::Loading;

        let result = tokio::select! {
            r = self.api.list_contracts(tenant_id) => Some(r),
            _ = superseded(self.contract_gen.subscribe(), generation) => None,
        };
        let Some(result) = result else { return Ok(LoadOutcome::Superseded) };

        let contracts = match result {
            Err(e) if e.is_auth_failure() => {
                warn!(target: "console::scope", tenant = tenant_id, code = e.code_str(), "contract load rejected; clearing scope");
                self.reset();
                return Err(e);
            }
            _ if *self.contract_gen.borrow() != generation => return Ok(LoadOutcome::Superseded),
            Ok(c) => c,
            Err(e) => {
                warn!(target: "console::scope", tenant = tenant_id, "contract load failed: {}", e.message());
                let mut st = self.state.lock();
                st.error = Some(e.message().to_string());
                st.contract_phase = if st.contracts.is_empty() { ContractPhase::None } else { ContractPhase::Ready };
                return Err(e);
            }
        };

        let mut st = self.state.lock();
        if st.scope.tenant.as_ref().map(|t| t.id) != Some(tenant_id) {
            return Ok(LoadOutcome::Superseded);
        }
        let (owned, foreign): (Vec<_>, Vec<_>) = contracts.into_iter().partition(|c| c.tenant_id == tenant_id);
        if !foreign.is_empty() {
            warn!(target: "console::scope", tenant = tenant_id, dropped = foreign.len(), "ignoring contracts owned by another tenant");
        }
        st.contracts = owned;
        st.contract_phase = ContractPhase::Ready;

        let mut forget_contract = false;
        let mut restored = None;
        if let Some(cid) = restore_contract {
            match st.contracts.iter().find(|c| c.id == cid).cloned() {
                Some(c) => {
                    restored = Some(c.id);
                    st.scope.data_contract = Some(c);
                }
                None => forget_contract = true,
            }
        } else if let Some(selected) = st.scope.data_contract.as_ref().map(|c| c.id) {
            match st.contracts.iter().find(|c| c.id == selected).cloned() {
                Some(fresh) => st.scope.data_contract = Some(fresh),
                None => {
                    st.scope.data_contract = None;
                    forget_contract = true;
                }
            }
        }
        let count = st.contracts.len();
        drop(st);
        if forget_contract {
            self.forget(&[keys::SELECTED_INTERFACE_ID]);
        }
        debug!(target: "console::scope", tenant = tenant_id, contracts = count, restored = ?restored, "contracts loaded");
        Ok(LoadOutcome::Applied)
    }

    /// Drop everything, including persisted ids. In-flight loads become stale.
    pub fn reset(&self) {
        bump(&self.tenant_gen);
        bump(&self.contract_gen);
        *self.state.lock() = ScopeState::default();
        self.forget(&[keys::SELECTED_CLIENT_ID, keys::SELECTED_INTERFACE_ID]);
        debug!(target: "console::scope", "scope reset");
    }

    fn remember(&self, key: &str, id: i64) {
        if let Err(e) = self.kv.set(key, &id.to_string()) {
            warn!(target: "console::scope", key, "could not persist selection: {}", e);
        }
    }

    fn forget(&self, keys: &[&str]) {
        for key in keys {
            if let Err(e) = self.kv.remove(key) {
                warn!(target: "console::scope", key = *key, "could not remove persisted selection: {}", e);
            }
        }
    }
}

fn read_persisted(kv: &dyn KeyValueStore) -> Option<PendingRestore> {
    let read = |key: &str| -> Option<i64> {
        match kv.get(key) {
            Ok(v) => v.and_then(|s| s.trim().parse().ok()),
            Err(e) => {
                warn!(target: "console::scope", key, "could not read persisted selection: {}", e);
                None
            }
        }
    };
    let tenant_id = read(keys::SELECTED_CLIENT_ID)?;
    Some(PendingRestore { tenant_id, contract_id: read(keys::SELECTED_INTERFACE_ID) })
}
