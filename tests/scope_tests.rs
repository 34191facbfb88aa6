//! Scope context: tenant and data contract selection, ordering of overlapping loads,
//! debounce, restoring persisted selections and clearing scope on auth failures.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};

use common::*;
use tenancy_console::identity::SessionState;
use tenancy_console::scope::{ContractPhase, DataContract, LoadOutcome, Scope, ScopePhase, Tenant, TenantQuery};
use tenancy_console::storage::{keys, Credentials, FileStore, KeyValueStore, MemoryStore, SharedKv};
use tenancy_console::transport::Method;
use tenancy_console::AppError;

fn listed(h: &Harness, id: i64) -> Tenant {
    h.ctx.tenant_list().tenants.into_iter().find(|t| t.id == id).expect("tenant listed")
}

fn contract(h: &Harness, id: i64) -> DataContract {
    h.ctx.scope().contracts().into_iter().find(|c| c.id == id).expect("contract loaded")
}

fn query_param(req: &tenancy_console::transport::ApiRequest, name: &str) -> Option<String> {
    req.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

async fn signed_in_with_listing() -> Result<Harness> {
    let h = Harness::new();
    route_tenants(&h.transport);
    h.sign_in().await;
    assert_eq!(h.ctx.load_tenants(TenantQuery::default()).await?, LoadOutcome::Applied);
    Ok(h)
}

fn seed_stored_session(h: &Harness, client: Option<&str>, interface: Option<&str>) -> Result<()> {
    h.ctx.session().credentials().put(&Credentials::new(fresh_token("stored"), "refresh-1"))?;
    if let Some(c) = client {
        h.kv.set(keys::SELECTED_CLIENT_ID, c)?;
    }
    if let Some(i) = interface {
        h.kv.set(keys::SELECTED_INTERFACE_ID, i)?;
    }
    Ok(())
}

#[tokio::test]
async fn selecting_a_tenant_loads_its_contracts() -> Result<()> {
    let h = signed_in_with_listing().await?;
    assert_eq!(h.ctx.scope().phase(), ScopePhase::Ready);
    assert_eq!(h.ctx.scope().contract_phase(), ContractPhase::None);

    let acme = listed(&h, 7);
    assert_eq!(h.ctx.select_tenant(Some(acme)).await?, LoadOutcome::Applied);
    assert_eq!(h.ctx.current_scope().tenant.map(|t| t.id), Some(7));
    assert!(h.ctx.current_scope().data_contract.is_none());
    assert_eq!(h.ctx.scope().contract_phase(), ContractPhase::Ready);
    let ids: Vec<i64> = h.ctx.scope().contracts().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![70, 71]);
    assert_eq!(h.persisted_selection(), (Some("7".into()), None));

    h.ctx.select_data_contract(Some(contract(&h, 70)))?;
    assert_eq!(h.ctx.current_scope().data_contract.map(|c| c.id), Some(70));
    assert_eq!(h.persisted_selection(), (Some("7".into()), Some("70".into())));

    // Changing tenant always drops the contract selection
    let globex = listed(&h, 8);
    h.ctx.select_tenant(Some(globex)).await?;
    assert!(h.ctx.current_scope().data_contract.is_none());
    assert_eq!(h.persisted_selection(), (Some("8".into()), None));

    h.ctx.select_tenant(None).await?;
    assert!(h.ctx.current_scope().tenant.is_none());
    assert_eq!(h.ctx.scope().contract_phase(), ContractPhase::None);
    assert!(h.ctx.scope().contracts().is_empty());
    assert_eq!(h.persisted_selection(), (None, None));
    Ok(())
}

#[tokio::test]
async fn contract_of_another_tenant_is_refused() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.ctx.select_tenant(Some(listed(&h, 8))).await?;
    let shipments = contract(&h, 80);

    h.ctx.select_tenant(Some(listed(&h, 7))).await?;
    let err = h.ctx.select_data_contract(Some(shipments)).unwrap_err();
    assert!(matches!(err, AppError::Validation { ref code, .. } if code == "contract_outside_scope"), "{:?}", err);
    assert!(h.ctx.current_scope().data_contract.is_none());
    Ok(())
}

#[tokio::test]
async fn contracts_owned_by_another_tenant_are_dropped() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.transport.route(Method::Get, "/clients/7/interfaces", |_| {
        ScriptedReply::ok(json!([contract_json(70, 7, "orders"), contract_json(80, 8, "shipments")]))
    });
    h.ctx.select_tenant(Some(listed(&h, 7))).await?;
    let ids: Vec<i64> = h.ctx.scope().contracts().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![70]);
    Ok(())
}

#[tokio::test]
async fn contracts_without_owner_are_stamped() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.transport.route(Method::Get, "/clients/7/interfaces", |_| {
        ScriptedReply::ok(json!([{"id": 72, "name": "payments", "type": "JSON"}]))
    });
    h.ctx.select_tenant(Some(listed(&h, 7))).await?;
    let c = contract(&h, 72);
    assert_eq!(c.tenant_id, 7);
    h.ctx.select_data_contract(Some(c))?;
    Ok(())
}

#[tokio::test]
async fn switching_tenants_mid_load_keeps_the_newer_one() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.transport.route(Method::Get, "/clients/7/interfaces", |_| {
        ScriptedReply::ok(json!([contract_json(70, 7, "orders")])).with_delay(Duration::from_millis(200))
    });
    let acme = listed(&h, 7);
    let globex = listed(&h, 8);

    let (first, second) = tokio::join!(h.ctx.select_tenant(Some(acme)), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.ctx.select_tenant(Some(globex)).await
    });
    assert_eq!(first?, LoadOutcome::Superseded);
    assert_eq!(second?, LoadOutcome::Applied);

    assert_eq!(h.ctx.current_scope().tenant.map(|t| t.id), Some(8));
    let ids: Vec<i64> = h.ctx.scope().contracts().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![80, 81]);
    assert_eq!(h.persisted_selection(), (Some("8".into()), None));
    Ok(())
}

#[tokio::test]
async fn older_page_never_overwrites_newer_one() -> Result<()> {
    let h = Harness::new();
    h.transport.route(Method::Get, "/clients", |req| {
        let page: u32 = query_param(req, "page").and_then(|p| p.parse().ok()).unwrap_or(0);
        let reply = ScriptedReply::ok(page_json(vec![tenant_json(100 + page as i64, "paged")], page, 2));
        if page == 0 {
            reply.with_delay(Duration::from_millis(200))
        } else {
            reply
        }
    });
    h.sign_in().await;

    let (first, second) = tokio::join!(h.ctx.load_tenants(TenantQuery::page(0, 10)), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.ctx.load_tenants(TenantQuery::page(1, 10)).await
    });
    assert_eq!(first?, LoadOutcome::Superseded);
    assert_eq!(second?, LoadOutcome::Applied);

    let view = h.ctx.tenant_list();
    assert_eq!(view.page, 1);
    assert_eq!(view.tenants.iter().map(|t| t.id).collect::<Vec<_>>(), vec![101]);
    assert!(!view.loading);
    assert_eq!(h.ctx.scope().last_query().page, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rapid_loads_are_debounced_into_one_request() -> Result<()> {
    let h = Harness::with(test_config().with_debounce(Duration::from_millis(300)), Arc::new(MemoryStore::new()));
    route_tenants(&h.transport);
    h.sign_in().await;

    let issue = |delay_ms: u64, page: u32| {
        let ctx = &h.ctx;
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            ctx.load_tenants(TenantQuery::page(page, 10).with_name_filter("ac")).await
        }
    };
    let (a, b, c) = tokio::join!(issue(0, 0), issue(100, 0), issue(200, 0));
    assert_eq!(a?, LoadOutcome::Superseded);
    assert_eq!(b?, LoadOutcome::Superseded);
    assert_eq!(c?, LoadOutcome::Applied);
    assert_eq!(h.transport.count(Method::Get, "/clients"), 1);

    let sent = h.transport.calls().into_iter().find(|r| r.path == "/clients").unwrap();
    assert_eq!(query_param(&sent, "nameFilter").as_deref(), Some("ac"));
    Ok(())
}

#[tokio::test]
async fn loading_requires_a_session() -> Result<()> {
    let h = Harness::new();
    route_tenants(&h.transport);
    let err = h.ctx.load_tenants(TenantQuery::default()).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized { ref code, .. } if code == "not_authenticated"), "{:?}", err);
    assert!(h.transport.calls().is_empty());
    assert_eq!(h.ctx.scope().phase(), ScopePhase::Uninitialized);
    Ok(())
}

#[tokio::test]
async fn server_error_keeps_the_last_listing() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.ctx.select_tenant(Some(listed(&h, 7))).await?;
    h.transport.route(Method::Get, "/clients", |_| ScriptedReply::status(500, Value::Null));

    let err = h.ctx.scope().refresh_tenants().await.unwrap_err();
    assert!(err.is_retryable());
    let view = h.ctx.tenant_list();
    assert_eq!(view.tenants.len(), 2);
    assert!(view.error.is_some());
    assert!(!view.loading);
    assert_eq!(h.ctx.scope().phase(), ScopePhase::Ready);
    assert_eq!(h.ctx.current_scope().tenant.map(|t| t.id), Some(7));
    assert_eq!(h.ctx.session_state(), SessionState::Authenticated);
    Ok(())
}

#[tokio::test]
async fn forbidden_listing_clears_scope_but_keeps_session() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.ctx.select_tenant(Some(listed(&h, 7))).await?;
    h.ctx.select_data_contract(Some(contract(&h, 71)))?;
    h.transport.route(Method::Get, "/clients", |_| ScriptedReply::status(403, json!({"message": "Access denied"})));

    let err = h.ctx.scope().refresh_tenants().await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden { .. }), "{:?}", err);
    assert!(h.ctx.current_scope().tenant.is_none());
    assert!(h.ctx.tenant_list().tenants.is_empty());
    assert_eq!(h.ctx.scope().phase(), ScopePhase::Uninitialized);
    assert_eq!(h.persisted_selection(), (None, None));
    assert_eq!(h.ctx.session_state(), SessionState::Authenticated);
    Ok(())
}

#[tokio::test]
async fn rejected_bearer_during_load_ends_session_and_scope() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.ctx.select_tenant(Some(listed(&h, 7))).await?;
    h.transport.route(Method::Get, "/clients", |_| ScriptedReply::status(401, json!({})));

    let err = h.ctx.scope().refresh_tenants().await.unwrap_err();
    assert!(err.is_terminal_unauthorized(), "{:?}", err);
    assert_eq!(h.ctx.session_state(), SessionState::Anonymous);
    assert!(h.ctx.current_scope().tenant.is_none());
    assert!(h.ctx.tenant_list().tenants.is_empty());
    assert_eq!(h.persisted_selection(), (None, None));
    Ok(())
}

#[tokio::test]
async fn logout_drops_scope_and_persisted_selection() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.ctx.select_tenant(Some(listed(&h, 7))).await?;
    h.ctx.select_data_contract(Some(contract(&h, 70)))?;

    h.ctx.logout().await;
    assert_eq!(h.ctx.current_scope(), Scope::default());
    assert!(h.ctx.tenant_list().tenants.is_empty());
    assert!(h.ctx.scope().contracts().is_empty());
    assert_eq!(h.persisted_selection(), (None, None));
    Ok(())
}

#[tokio::test]
async fn fresh_listing_corrects_the_selected_tenant() -> Result<()> {
    let h = signed_in_with_listing().await?;
    h.ctx.select_tenant(Some(listed(&h, 7))).await?;

    h.transport.route(Method::Get, "/clients", |_| {
        ScriptedReply::ok(page_json(vec![tenant_json(7, "acme-renamed"), tenant_json(8, "globex")], 0, 1))
    });
    h.ctx.scope().refresh_tenants().await?;
    assert_eq!(h.ctx.current_scope().tenant.map(|t| t.name), Some("acme-renamed".to_string()));

    // A filtered listing says nothing about tenants it does not show
    h.transport.route(Method::Get, "/clients", |_| ScriptedReply::ok(page_json(vec![tenant_json(8, "globex")], 0, 1)));
    h.ctx.load_tenants(TenantQuery::default().with_name_filter("glob")).await?;
    assert_eq!(h.ctx.current_scope().tenant.map(|t| t.id), Some(7));

    // The complete listing does
    h.ctx.load_tenants(TenantQuery::default()).await?;
    assert!(h.ctx.current_scope().tenant.is_none());
    assert!(h.ctx.scope().contracts().is_empty());
    assert_eq!(h.persisted_selection(), (None, None));
    Ok(())
}

#[tokio::test]
async fn persisted_selection_is_restored_after_restart() -> Result<()> {
    let h = Harness::new();
    route_tenants(&h.transport);
    seed_stored_session(&h, Some("7"), Some("71"))?;

    let ctx = h.restart(test_config());
    assert_eq!(ctx.scope().pending_restore(), Some((7, Some(71))));
    ctx.start().await?;

    let scope = ctx.current_scope();
    assert_eq!(scope.tenant.map(|t| t.id), Some(7));
    assert_eq!(scope.data_contract.map(|c| c.id), Some(71));
    assert_eq!(ctx.scope().contract_phase(), ContractPhase::Ready);
    assert!(ctx.scope().pending_restore().is_none());
    assert_eq!(h.persisted_selection(), (Some("7".into()), Some("71".into())));
    Ok(())
}

#[tokio::test]
async fn persisted_tenant_missing_from_listing_is_dropped() -> Result<()> {
    let h = Harness::new();
    route_tenants(&h.transport);
    seed_stored_session(&h, Some("99"), Some("990"))?;

    let ctx = h.restart(test_config());
    ctx.start().await?;
    assert_eq!(ctx.current_scope(), Scope::default());
    assert_eq!(h.persisted_selection(), (None, None));
    assert_eq!(h.transport.count(Method::Get, "/clients/99/interfaces"), 0);
    Ok(())
}

#[tokio::test]
async fn persisted_contract_missing_is_dropped_alone() -> Result<()> {
    let h = Harness::new();
    route_tenants(&h.transport);
    seed_stored_session(&h, Some("7"), Some("79"))?;

    let ctx = h.restart(test_config());
    ctx.start().await?;
    assert_eq!(ctx.current_scope().tenant.map(|t| t.id), Some(7));
    assert!(ctx.current_scope().data_contract.is_none());
    assert_eq!(h.persisted_selection(), (Some("7".into()), None));
    Ok(())
}

#[tokio::test]
async fn explicit_selection_wins_over_pending_restore() -> Result<()> {
    let h = Harness::new();
    route_tenants(&h.transport);
    seed_stored_session(&h, Some("7"), Some("70"))?;

    let ctx = h.restart(test_config());
    ctx.session().validate().await?;
    assert!(ctx.scope().pending_restore().is_some());

    let globex: Tenant = serde_json::from_value(tenant_json(8, "globex"))?;
    ctx.select_tenant(Some(globex)).await?;
    assert!(ctx.scope().pending_restore().is_none());

    ctx.load_tenants(TenantQuery::default()).await?;
    assert_eq!(ctx.current_scope().tenant.map(|t| t.id), Some(8));
    assert!(ctx.current_scope().data_contract.is_none());
    assert_eq!(h.persisted_selection(), (Some("8".into()), None));
    Ok(())
}

#[tokio::test]
async fn file_backed_selection_survives_process_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let kv: SharedKv = Arc::new(FileStore::open(dir.path())?);
    let h = Harness::with(test_config(), kv);
    route_tenants(&h.transport);
    h.sign_in().await;
    h.ctx.load_tenants(TenantQuery::default()).await?;
    h.ctx.select_tenant(Some(listed(&h, 8))).await?;
    h.ctx.select_data_contract(Some(contract(&h, 81)))?;

    let reopened: SharedKv = Arc::new(FileStore::open(dir.path())?);
    let next = Harness::with(test_config(), reopened);
    route_tenants(&next.transport);
    let id = next.ctx.start().await?.expect("session resumed");
    assert_eq!(id.subject_name, USER);
    assert_eq!(next.ctx.current_scope().tenant.map(|t| t.id), Some(8));
    assert_eq!(next.ctx.current_scope().data_contract.map(|c| c.id), Some(81));
    Ok(())
}
