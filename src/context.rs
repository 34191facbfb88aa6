//! One explicit object per console process wiring storage, session and scope.
//! Collaborators receive it (or the pieces they need) instead of reaching for globals.

use std::sync::{Arc, Weak};

use tracing::{info, warn};

use crate::config::ConsoleConfig;
use crate::error::AppResult;
use crate::identity::{Identity, SessionController, SessionState};
use crate::scope::{ClientsApi, DataContract, LoadOutcome, Scope, ScopeContext, Tenant, TenantListView, TenantQuery};
use crate::storage::{CredentialStore, FileStore, MemoryStore, SharedKv};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};

pub struct ConsoleContext {
    config: ConsoleConfig,
    session: Arc<SessionController>,
    scope: Arc<ScopeContext>,
    clients: ClientsApi,
}

impl ConsoleContext {
    pub fn new(config: ConsoleConfig, transport: Arc<dyn Transport>, kv: SharedKv) -> Self {
        let store = Arc::new(CredentialStore::new(kv.clone()));
        let session = Arc::new(SessionController::new(&config, transport, store));
        let clients = ClientsApi::new(session.clone());
        let scope = Arc::new(ScopeContext::new(session.clone(), clients.clone(), kv, config.debounce()));

        // Scope never outlives the session it was loaded under
        let weak: Weak<ScopeContext> = Arc::downgrade(&scope);
        session.on_signed_out(move || {
            if let Some(scope) = weak.upgrade() {
                scope.reset();
            }
        });
        Self { config, session, scope, clients }
    }

    /// HTTP transport plus file-backed state when `state_dir` is set, memory otherwise.
    pub fn from_config(config: ConsoleConfig) -> AppResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
        let kv: SharedKv = match &config.state_dir {
            Some(dir) => Arc::new(FileStore::open(dir)?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(config, transport, kv))
    }

    pub fn config(&self) -> &ConsoleConfig { &self.config }

    pub fn session(&self) -> &Arc<SessionController> { &self.session }

    pub fn scope(&self) -> &Arc<ScopeContext> { &self.scope }

    pub fn clients(&self) -> &ClientsApi { &self.clients }

    /// Process start: pick up stored credentials, confirm them with the server, then
    /// load the first tenant page (which also settles any persisted selection).
    /// Returns `None` when there was no session to resume.
    pub async fn start(&self) -> AppResult<Option<Identity>> {
        self.session.restore();
        if self.session.credentials().get()?.is_none() {
            info!(target: "console::session", "no stored session");
            return Ok(None);
        }
        let id = self.session.validate().await?;
        if let Err(e) = self.scope.load_tenants(TenantQuery::default()).await {
            warn!(target: "console::scope", "initial tenant load failed: {}", e);
            if e.is_auth_failure() {
                return Err(e);
            }
        }
        Ok(Some(id))
    }

    pub async fn login(&self, username: &str, password: &str) -> AppResult<Identity> {
        self.session.login(username, password).await
    }

    /// Sign out and drop the scope, including persisted selections.
    pub async fn logout(&self) {
        self.session.logout().await;
        self.scope.reset();
    }

    pub async fn validate(&self) -> AppResult<Identity> { self.session.validate().await }

    pub fn session_state(&self) -> SessionState { self.session.state() }

    pub fn current_identity(&self) -> Option<Identity> { self.session.current_identity() }

    pub fn current_scope(&self) -> Scope { self.scope.current_scope() }

    pub async fn select_tenant(&self, tenant: Option<Tenant>) -> AppResult<LoadOutcome> {
        self.scope.select_tenant(tenant).await
    }

    pub fn select_data_contract(&self, contract: Option<DataContract>) -> AppResult<()> {
        self.scope.select_data_contract(contract)
    }

    pub fn tenant_list(&self) -> TenantListView { self.scope.tenant_list() }

    pub async fn load_tenants(&self, query: TenantQuery) -> AppResult<LoadOutcome> {
        self.scope.load_tenants(query).await
    }

    /// Arbitrary authenticated call through the full request pipeline.
    pub async fn send(&self, req: ApiRequest) -> AppResult<ApiResponse> { self.session.send(req).await }
}
