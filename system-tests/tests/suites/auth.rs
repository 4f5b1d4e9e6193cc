//! Bearer-token authentication and role/project authorization
//! (`spec` §4.6), driving `fleetgraph-auth` against the same in-memory
//! store an `Orchestrator` minted the key against.

use std::collections::BTreeSet;

use fleetgraph_auth::AuthRequest;
use fleetgraph_auth::Authenticator;
use fleetgraph_auth::NoopAuditSink;
use fleetgraph_core::errors::ErrorCode;
use fleetgraph_core::ids::EventLogId;
use fleetgraph_core::interfaces::StoreTransaction;
use fleetgraph_core::model::ApiKeyScope;
use fleetgraph_core::model::ApiKeyStatus;
use fleetgraph_core::model::EventType;
use fleetgraph_core::model::Role;
use fleetgraph_core::runtime::service::CreateApiKeyRequest;

use crate::helpers::clock::FixedClock;
use crate::helpers::fixtures::seeded_project;
use crate::helpers::shared_store::SharedStore;

fn authenticator(store: SharedStore) -> Authenticator<SharedStore, FixedClock, NoopAuditSink> {
    Authenticator::new(store, FixedClock::new(), NoopAuditSink)
}

#[test]
fn a_freshly_minted_key_authenticates_and_authorizes() {
    let seeded = seeded_project();
    let issued = seeded
        .orchestrator
        .create_api_key(CreateApiKeyRequest {
            scope: ApiKeyScope::Project(seeded.project_id.clone()),
            name: "agent-key".to_string(),
            role_scopes: std::iter::once(Role::Agent).collect(),
            created_by: "root".to_string(),
        })
        .expect("mint api key");

    let auth = authenticator(seeded.store_handle());
    let ctx = auth.authenticate(&issued.raw_token).expect("authenticate");
    assert_eq!(ctx.api_key_id, issued.api_key.id);
    assert!(ctx.permits_project(&seeded.project_id));

    let mut required = BTreeSet::new();
    required.insert(Role::Agent);
    let request = AuthRequest { action: "claim_task", required_roles: required, project_id: Some(&seeded.project_id) };
    auth.authorize(&ctx, &request).expect("agent role authorizes claim_task");
}

#[test]
fn an_unknown_token_fails_authentication() {
    let seeded = seeded_project();
    let auth = authenticator(seeded.store_handle());
    let err = auth.authenticate("tsk_does_not_exist").expect_err("unknown token must not authenticate");
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[test]
fn a_revoked_key_fails_authentication() {
    let seeded = seeded_project();
    let issued = seeded
        .orchestrator
        .create_api_key(CreateApiKeyRequest {
            scope: ApiKeyScope::Global,
            name: "short-lived".to_string(),
            role_scopes: std::iter::once(Role::Operator).collect(),
            created_by: "root".to_string(),
        })
        .expect("mint api key");
    let revoked = seeded.orchestrator.revoke_api_key(&issued.api_key.id).expect("revoke");
    assert_eq!(revoked.status, ApiKeyStatus::Revoked);

    let auth = authenticator(seeded.store_handle());
    let err = auth.authenticate(&issued.raw_token).expect_err("a revoked key must not authenticate");
    assert_eq!(err.code, ErrorCode::AuthInvalid);
}

#[test]
fn insufficient_role_is_denied_and_audited() {
    let seeded = seeded_project();
    let issued = seeded
        .orchestrator
        .create_api_key(CreateApiKeyRequest {
            scope: ApiKeyScope::Project(seeded.project_id.clone()),
            name: "agent-key".to_string(),
            role_scopes: std::iter::once(Role::Agent).collect(),
            created_by: "root".to_string(),
        })
        .expect("mint api key");

    let auth = authenticator(seeded.store_handle());
    let ctx = auth.authenticate(&issued.raw_token).expect("authenticate");

    let mut required = BTreeSet::new();
    required.insert(Role::Admin);
    let request = AuthRequest { action: "revoke_api_key", required_roles: required, project_id: Some(&seeded.project_id) };
    let err = auth.authorize(&ctx, &request).expect_err("agent role does not satisfy admin-only endpoint");
    assert_eq!(err.code, ErrorCode::InsufficientRole);

    let mut txn = seeded.begin();
    let events = txn
        .list_events_from(&seeded.project_id, EventType::AuthDenied, EventLogId::new(0), 10)
        .expect("list events");
    txn.commit().expect("commit");
    assert_eq!(events.len(), 1, "a deny must persist a durable auth_denied event");
}

#[test]
fn project_scoped_key_is_denied_outside_its_project() {
    let seeded = seeded_project();
    let other_project = fleetgraph_core::ids::ProjectId::from("prj_other");
    let issued = seeded
        .orchestrator
        .create_api_key(CreateApiKeyRequest {
            scope: ApiKeyScope::Project(seeded.project_id.clone()),
            name: "scoped-key".to_string(),
            role_scopes: std::iter::once(Role::Operator).collect(),
            created_by: "root".to_string(),
        })
        .expect("mint api key");

    let auth = authenticator(seeded.store_handle());
    let ctx = auth.authenticate(&issued.raw_token).expect("authenticate");

    let request = AuthRequest { action: "list_tasks", required_roles: BTreeSet::new(), project_id: Some(&other_project) };
    let err = auth.authorize(&ctx, &request).expect_err("a project-scoped key must not reach another project");
    assert_eq!(err.code, ErrorCode::ProjectScopeViolation);
}
