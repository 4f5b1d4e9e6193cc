// crates/fleetgraph-auth/src/lib.rs
// ============================================================================
// Crate: fleetgraph-auth
// Description: The auth kernel (`spec` §4.6): bearer-token authentication
//              against `fleetgraph-core`'s `ApiKey` model, role-based
//              endpoint authorization, project-scope enforcement, and a
//              best-effort audit trail around every decision.
// Purpose: Keep authn/authz out of `fleetgraph-core::runtime` entirely —
//          the orchestrator trusts whatever `AuthContext` this crate hands
//          it; it never looks at a raw bearer token itself.
// Dependencies: fleetgraph-core, serde, serde_json
// ============================================================================

//! ## Overview
//! A caller presents a raw bearer token (`"tsk_..."`, minted by
//! [`fleetgraph_core::runtime::service::Orchestrator::create_api_key`]).
//! [`Authenticator::authenticate`] hashes it with
//! [`fleetgraph_core::hashing::hash_bytes`] and looks the digest up via
//! [`fleetgraph_core::interfaces::Store::begin`]. [`Authenticator::authorize`]
//! then checks the resulting [`AuthContext`] against an endpoint's required
//! role set and, when a project id is in scope, against the key's own
//! project scope. Every decision — allow or deny — is handed to an
//! [`AuthAuditSink`]; a deny is additionally persisted as a durable
//! `auth_denied` event so it survives independent of whatever sink happened
//! to be wired in, matching `spec` §4.8's event log coverage.

use std::collections::BTreeSet;

use fleetgraph_core::clock::Clock;
use fleetgraph_core::errors::ErrorCode;
use fleetgraph_core::errors::OperationError;
use fleetgraph_core::hashing;
use fleetgraph_core::ids::ProjectId;
use fleetgraph_core::interfaces::NewEvent;
use fleetgraph_core::interfaces::Store;
use fleetgraph_core::model::ApiKey;
use fleetgraph_core::model::ApiKeyScope;
use fleetgraph_core::model::ApiKeyStatus;
use fleetgraph_core::model::EventType;
use fleetgraph_core::model::Role;
use serde::Serialize;

const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

/// Authenticated caller context returned by [`Authenticator::authenticate`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The authenticated key's identifier, for audit labeling.
    pub api_key_id: fleetgraph_core::ids::ApiKeyId,
    /// The key's project scope.
    pub scope: ApiKeyScope,
    /// Roles granted to the key.
    pub roles: BTreeSet<Role>,
    /// SHA-256 fingerprint of the raw token (never the token itself).
    pub token_fingerprint: String,
}

impl AuthContext {
    /// Returns true if this context's roles satisfy `required` — any
    /// overlap, or [`Role::Admin`], authorizes the caller. An empty
    /// `required` set means the endpoint needs no particular role, only
    /// a valid credential.
    #[must_use]
    pub fn satisfies(&self, required: &BTreeSet<Role>) -> bool {
        if self.roles.contains(&Role::Admin) {
            return true;
        }
        required.is_empty() || self.roles.iter().any(|role| required.contains(role))
    }

    /// Returns true if this context's scope permits access to `project_id`:
    /// a [`ApiKeyScope::Global`] key always passes, a
    /// [`ApiKeyScope::Project`] key only passes for its own project.
    #[must_use]
    pub fn permits_project(&self, project_id: &ProjectId) -> bool {
        match &self.scope {
            ApiKeyScope::Global => true,
            ApiKeyScope::Project(scoped) => scoped == project_id,
        }
    }
}

/// A request to authorize: the required role set and, when the endpoint
/// is project-scoped, the project being acted on.
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    /// Human-readable endpoint/operation name, used only for audit labels.
    pub action: &'a str,
    /// Roles of which the caller must hold at least one (or be `admin`).
    /// Empty means "any authenticated caller".
    pub required_roles: BTreeSet<Role>,
    /// The project this request concerns, if any. `None` for
    /// project-agnostic endpoints (e.g. listing keys across the fleet).
    pub project_id: Option<&'a ProjectId>,
}

/// Audit sink for auth decisions, the seam that lets a deployment choose
/// where decisions are logged without the auth kernel itself depending on a
/// logging framework.
pub trait AuthAuditSink: Send + Sync {
    /// Records one auth decision.
    fn record(&self, event: &AuthAuditEvent);
}

/// One auth decision, allow or deny, in a shape suitable for structured
/// logging.
#[derive(Debug, Serialize)]
pub struct AuthAuditEvent {
    /// Always `"auth_decision"`.
    pub event: &'static str,
    /// `"allow"` or `"deny"`.
    pub decision: &'static str,
    /// The endpoint/operation name from [`AuthRequest::action`].
    pub action: String,
    /// The authenticated key id, if authentication succeeded.
    pub api_key_id: Option<String>,
    /// The bearer token fingerprint, if authentication succeeded.
    pub token_fingerprint: Option<String>,
    /// The project in scope, if any.
    pub project_id: Option<String>,
    /// Failure reason, present only on `deny`.
    pub reason: Option<String>,
}

/// Audit sink that writes one JSON line per decision to stderr, with no
/// logging-framework dependency.
pub struct StderrAuditSink;

impl AuthAuditSink for StderrAuditSink {
    fn record(&self, event: &AuthAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            eprintln!("{payload}");
        }
    }
}

/// Audit sink that discards every decision. For tests and embedders that
/// wire their own auditing elsewhere.
pub struct NoopAuditSink;

impl AuthAuditSink for NoopAuditSink {
    fn record(&self, _event: &AuthAuditEvent) {}
}

/// Parses a `"Bearer <token>"` authorization header value, enforcing a
/// length cap and scheme check before ever touching a credential store.
///
/// # Errors
///
/// Returns [`OperationError`] with [`ErrorCode::AuthMissing`] when no
/// header is present, or [`ErrorCode::AuthInvalid`] when it is malformed
/// or oversized.
pub fn parse_bearer_token(auth_header: Option<&str>) -> Result<String, OperationError> {
    let header = auth_header
        .ok_or_else(|| OperationError::new(ErrorCode::AuthMissing, "missing authorization header"))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(OperationError::new(
            ErrorCode::AuthInvalid,
            "authorization header too large",
        ));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(OperationError::new(
            ErrorCode::AuthInvalid,
            "authorization header is not a bearer token",
        ));
    }
    Ok(token.to_string())
}

/// Bearer-token authenticator and role/project authorizer over a
/// [`Store`] of [`ApiKey`] rows.
///
/// Disabled via `auth_disabled` in `fleetgraph-config` for single-node
/// test harnesses: callers that want that behavior should skip
/// `Authenticator` entirely and synthesize an admin [`AuthContext`]
/// themselves rather than teach this type an escape hatch.
pub struct Authenticator<S: Store, C: Clock, A: AuthAuditSink> {
    store: S,
    clock: C,
    audit: A,
}

impl<S: Store, C: Clock, A: AuthAuditSink> Authenticator<S, C, A> {
    /// Builds an authenticator over `store`, auditing decisions to `audit`
    /// and stamping `last_used_at` from `clock`.
    pub fn new(store: S, clock: C, audit: A) -> Self {
        Self { store, clock, audit }
    }

    /// Authenticates a raw bearer token against the active [`ApiKey`] set,
    /// updating `last_used_at` on success.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::AuthInvalid`] if the token does not resolve to
    /// an active key, or [`ErrorCode::DbError`] on store failure.
    pub fn authenticate(&self, raw_token: &str) -> Result<AuthContext, OperationError> {
        let fingerprint = hashing::hash_bytes(raw_token.as_bytes());
        let mut txn = self.store.begin().map_err(Self::db_err)?;
        let key = txn
            .get_api_key_by_hash(&fingerprint)
            .map_err(Self::db_err)?
            .filter(|key| key.status == ApiKeyStatus::Active)
            .ok_or_else(|| {
                OperationError::new(ErrorCode::AuthInvalid, "bearer token does not resolve to an active key")
            })?;
        self.touch_last_used(&mut txn, &key)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(Self::context_of(key, fingerprint))
    }

    /// Authorizes `ctx` against `request`, recording the decision (allow
    /// or deny) to the audit sink and, on deny, persisting a durable
    /// `auth_denied` event. The event write is best-effort: its own
    /// failure never masks the original denial.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::InsufficientRole`] if `ctx`'s roles do not
    /// satisfy [`AuthRequest::required_roles`], or
    /// [`ErrorCode::ProjectScopeViolation`] if `ctx`'s scope excludes
    /// [`AuthRequest::project_id`].
    pub fn authorize(&self, ctx: &AuthContext, request: &AuthRequest<'_>) -> Result<(), OperationError> {
        let outcome = self.check(ctx, request);
        self.audit.record(&Self::audit_event(ctx, request, outcome.as_ref().err()));
        if let Err(err) = &outcome {
            self.record_auth_denied(ctx, request, err);
        }
        outcome
    }

    fn check(&self, ctx: &AuthContext, request: &AuthRequest<'_>) -> Result<(), OperationError> {
        if !ctx.satisfies(&request.required_roles) {
            return Err(OperationError::new(
                ErrorCode::InsufficientRole,
                format!("caller roles do not satisfy required set for {}", request.action),
            ));
        }
        if let Some(project_id) = request.project_id {
            if !ctx.permits_project(project_id) {
                return Err(OperationError::new(
                    ErrorCode::ProjectScopeViolation,
                    format!("key is not scoped to project {project_id} for {}", request.action),
                ));
            }
        }
        Ok(())
    }

    fn touch_last_used(
        &self,
        txn: &mut Box<dyn fleetgraph_core::interfaces::StoreTransaction + '_>,
        key: &ApiKey,
    ) -> Result<(), OperationError> {
        let mut updated = key.clone();
        updated.last_used_at = Some(self.clock.now());
        txn.update_api_key(&updated).map_err(Self::db_err)
    }

    fn record_auth_denied(&self, ctx: &AuthContext, request: &AuthRequest<'_>, err: &OperationError) {
        let Ok(mut txn) = self.store.begin() else {
            return;
        };
        let payload = serde_json::json!({
            "reason": err.message,
            "endpoint": request.action,
            "caller_roles": ctx.roles,
            "required_roles": request.required_roles,
        });
        let project_id = request.project_id.cloned().unwrap_or_else(|| match &ctx.scope {
            ApiKeyScope::Project(scoped) => scoped.clone(),
            ApiKeyScope::Global => ProjectId::from("*"),
        });
        let event = NewEvent {
            project_id,
            entity_type: "api_key".to_string(),
            entity_id: Some(ctx.api_key_id.to_string()),
            event_type: EventType::AuthDenied,
            payload,
            caused_by: Some(ctx.api_key_id.to_string()),
        };
        let _ = txn.append_event(event);
        let _ = txn.commit();
    }

    fn audit_event(ctx: &AuthContext, request: &AuthRequest<'_>, err: Option<&OperationError>) -> AuthAuditEvent {
        AuthAuditEvent {
            event: "auth_decision",
            decision: if err.is_some() { "deny" } else { "allow" },
            action: request.action.to_string(),
            api_key_id: Some(ctx.api_key_id.to_string()),
            token_fingerprint: Some(ctx.token_fingerprint.clone()),
            project_id: request.project_id.map(ToString::to_string),
            reason: err.map(|err| err.message.clone()),
        }
    }

    fn context_of(key: ApiKey, token_fingerprint: String) -> AuthContext {
        AuthContext {
            api_key_id: key.id,
            scope: key.scope,
            roles: key.role_scopes,
            token_fingerprint,
        }
    }

    fn db_err(err: fleetgraph_core::interfaces::StoreError) -> OperationError {
        OperationError::new(ErrorCode::DbError, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bearer_token;
    use super::AuthContext;
    use super::ApiKeyScope;
    use fleetgraph_core::ids::ApiKeyId;
    use fleetgraph_core::ids::ProjectId;
    use fleetgraph_core::model::Role;
    use std::collections::BTreeSet;

    fn ctx(scope: ApiKeyScope, roles: &[Role]) -> AuthContext {
        AuthContext {
            api_key_id: ApiKeyId::new("key_test"),
            scope,
            roles: roles.iter().copied().collect(),
            token_fingerprint: "deadbeef".to_string(),
        }
    }

    #[test]
    fn parses_well_formed_bearer_header() {
        let token = parse_bearer_token(Some("Bearer tsk_abc123")).expect("parse");
        assert_eq!(token, "tsk_abc123");
    }

    #[test]
    fn rejects_missing_header() {
        assert!(parse_bearer_token(None).is_err());
    }

    #[test]
    fn rejects_non_bearer_scheme() {
        assert!(parse_bearer_token(Some("Basic dXNlcjpwYXNz")).is_err());
    }

    #[test]
    fn admin_role_satisfies_any_required_set() {
        let admin = ctx(ApiKeyScope::Global, &[Role::Admin]);
        let mut required = BTreeSet::new();
        required.insert(Role::Operator);
        assert!(admin.satisfies(&required));
    }

    #[test]
    fn empty_required_set_accepts_any_authenticated_caller() {
        let agent = ctx(ApiKeyScope::Global, &[Role::Agent]);
        assert!(agent.satisfies(&BTreeSet::new()));
    }

    #[test]
    fn disjoint_roles_are_rejected() {
        let agent = ctx(ApiKeyScope::Global, &[Role::Agent]);
        let mut required = BTreeSet::new();
        required.insert(Role::Reviewer);
        assert!(!agent.satisfies(&required));
    }

    #[test]
    fn project_scoped_key_only_permits_its_own_project() {
        let project_id = ProjectId::from("proj_1");
        let scoped = ctx(ApiKeyScope::Project(project_id.clone()), &[Role::Agent]);
        assert!(scoped.permits_project(&project_id));
        assert!(!scoped.permits_project(&ProjectId::from("proj_2")));
    }

    #[test]
    fn global_key_permits_every_project() {
        let global = ctx(ApiKeyScope::Global, &[Role::Agent]);
        assert!(global.permits_project(&ProjectId::from("proj_anything")));
    }
}
