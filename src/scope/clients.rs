use std::sync::Arc;

use tracing::debug;

use super::model::{DataContract, Tenant, TenantInput, TenantPage, TenantQuery};
use crate::error::AppResult;
use crate::identity::SessionController;
use crate::transport::ApiRequest;

/// Typed tenant and data contract endpoints. Every call goes through the session so
/// it is authenticated, refreshed and anti-forgery protected like any other.
#[derive(Clone)]
pub struct ClientsApi {
    session: Arc<SessionController>,
}

impl ClientsApi {
    pub fn new(session: Arc<SessionController>) -> Self { Self { session } }

    pub async fn list_tenants(&self, query: &TenantQuery) -> AppResult<TenantPage> {
        let mut req = ApiRequest::get("/clients");
        req.query = query.to_params();
        let resp = self.session.send(req).await?;
        let mut page: TenantPage = resp.json()?;
        // Some servers omit number/size on the page; fall back to what was asked for
        if page.size == 0 {
            page.size = query.size;
            page.page = query.page;
        }
        if page.total_pages == 0 && !page.content.is_empty() {
            page.total_pages = 1;
        }
        debug!(target: "console::scope", page = page.page, size = page.size, total = page.total_elements, "tenant page fetched");
        Ok(page)
    }

    pub async fn get_tenant(&self, id: i64) -> AppResult<Tenant> {
        let resp = self.session.send(ApiRequest::get(format!("/clients/{}", id))).await?;
        resp.json()
    }

    pub async fn create_tenant(&self, input: &TenantInput) -> AppResult<Tenant> {
        input.validate()?;
        let resp = self.session.send(ApiRequest::post("/clients").json(input)?).await?;
        resp.json()
    }

    pub async fn update_tenant(&self, id: i64, input: &TenantInput) -> AppResult<Tenant> {
        input.validate()?;
        let resp = self.session.send(ApiRequest::put(format!("/clients/{}", id)).json(input)?).await?;
        resp.json()
    }

    pub async fn delete_tenant(&self, id: i64) -> AppResult<()> {
        self.session.send(ApiRequest::delete(format!("/clients/{}", id))).await?;
        Ok(())
    }

    /// Contracts of one tenant. Entries without an owner get `tenant_id` stamped on.
    pub async fn list_contracts(&self, tenant_id: i64) -> AppResult<Vec<DataContract>> {
        let resp = self.session.send(ApiRequest::get(format!("/clients/{}/interfaces", tenant_id))).await?;
        let mut contracts: Vec<DataContract> = resp.json()?;
        for c in contracts.iter_mut().filter(|c| c.tenant_id == 0) {
            c.tenant_id = tenant_id;
        }
        Ok(contracts)
    }
}
