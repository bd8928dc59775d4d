//! Per-session state, keyed by an opaque token. The cluster connection is the
//! only state machine here: `cluster == None` is Disconnected, `Some` is
//! Connected, and every mutating operation is gated on the latter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PortalError;
use crate::kube::context::ContextHandle;

/// The identity behind a session token.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

/// One session's live cluster connection. The context handle is shared via
/// `Arc` so a disconnect while a command is in flight cannot delete the
/// kubeconfig out from under the running invocation.
#[derive(Debug, Clone)]
pub struct ClusterSession {
    pub alias: String,
    pub endpoint: String,
    pub context: Arc<ContextHandle>,
    pub connected_at: DateTime<Utc>,
}

struct Session {
    user: SessionUser,
    cluster: Option<ClusterSession>,
}

/// In-memory session registry. Handlers clone what they need and release the
/// lock before doing anything slow, so sessions never serialize behind one
/// another's cluster calls.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, Session>>, PortalError> {
        self.inner
            .lock()
            .map_err(|_| PortalError::Internal("session registry lock poisoned".into()))
    }

    /// Issues a fresh token for an authenticated user.
    pub fn create(&self, user: SessionUser) -> Result<Uuid, PortalError> {
        let token = Uuid::new_v4();
        self.lock()?.insert(
            token,
            Session {
                user,
                cluster: None,
            },
        );
        Ok(token)
    }

    /// Ends the session, dropping any cluster connection with it. Returns the
    /// alias that was connected, for the audit trail.
    pub fn remove(&self, token: Uuid) -> Result<Option<String>, PortalError> {
        Ok(self
            .lock()?
            .remove(&token)
            .and_then(|s| s.cluster.map(|c| c.alias)))
    }

    pub fn user(&self, token: Uuid) -> Result<Option<SessionUser>, PortalError> {
        Ok(self.lock()?.get(&token).map(|s| s.user.clone()))
    }

    /// `Disconnected -> Connected`. Only called after the credential context
    /// has been verified against the cluster.
    pub fn connect(&self, token: Uuid, cluster: ClusterSession) -> Result<(), PortalError> {
        let mut sessions = self.lock()?;
        let session = sessions.get_mut(&token).ok_or(PortalError::Unauthorized)?;
        session.cluster = Some(cluster);
        Ok(())
    }

    /// `Connected -> Disconnected`. Returns the previous connection, if any.
    pub fn disconnect(&self, token: Uuid) -> Result<Option<ClusterSession>, PortalError> {
        let mut sessions = self.lock()?;
        let session = sessions.get_mut(&token).ok_or(PortalError::Unauthorized)?;
        Ok(session.cluster.take())
    }

    /// The gate in front of every mutating operation: fails fast with
    /// `NotConnected` from the Disconnected state.
    pub fn cluster(&self, token: Uuid) -> Result<ClusterSession, PortalError> {
        let sessions = self.lock()?;
        let session = sessions.get(&token).ok_or(PortalError::Unauthorized)?;
        session.cluster.clone().ok_or(PortalError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube::context::ClusterCredentials;

    fn user(name: &str) -> SessionUser {
        SessionUser {
            user_id: 1,
            username: name.to_string(),
            is_admin: false,
        }
    }

    fn cluster_session(alias: &str, endpoint: &str, token: &str) -> ClusterSession {
        let creds = ClusterCredentials::new(endpoint, alias, token).unwrap();
        ClusterSession {
            alias: alias.to_string(),
            endpoint: endpoint.to_string(),
            context: Arc::new(ContextHandle::materialize(&creds).unwrap()),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn gate_rejects_disconnected_sessions() {
        let registry = SessionRegistry::new();
        let token = registry.create(user("alice")).unwrap();
        match registry.cluster(token) {
            Err(PortalError::NotConnected) => {}
            other => panic!("expected NotConnected, got {other:?}"),
        }
    }

    #[test]
    fn gate_rejects_unknown_tokens() {
        let registry = SessionRegistry::new();
        match registry.cluster(Uuid::new_v4()) {
            Err(PortalError::Unauthorized) => {}
            other => panic!("expected Unauthorized, got {other:?}"),
        }
    }

    #[test]
    fn connect_then_disconnect_walks_the_state_machine() {
        let registry = SessionRegistry::new();
        let token = registry.create(user("alice")).unwrap();

        registry
            .connect(token, cluster_session("demo", "https://api.example.com", "abc123"))
            .unwrap();
        let connected = registry.cluster(token).unwrap();
        assert_eq!(connected.alias, "demo");

        let previous = registry.disconnect(token).unwrap();
        assert_eq!(previous.map(|c| c.alias).as_deref(), Some("demo"));
        assert!(matches!(
            registry.cluster(token),
            Err(PortalError::NotConnected)
        ));
    }

    #[test]
    fn sessions_never_share_context_artifacts() {
        let registry = SessionRegistry::new();
        let a = registry.create(user("alice")).unwrap();
        let b = registry.create(user("bob")).unwrap();

        registry
            .connect(a, cluster_session("demo", "https://api.example.com", "token-a"))
            .unwrap();
        registry
            .connect(b, cluster_session("other", "https://other.example.com", "token-b"))
            .unwrap();

        let ctx_a = registry.cluster(a).unwrap();
        let ctx_b = registry.cluster(b).unwrap();
        assert_ne!(
            ctx_a.context.kubeconfig_path(),
            ctx_b.context.kubeconfig_path()
        );

        // Alice's artifact never contains Bob's token.
        let raw = std::fs::read_to_string(ctx_a.context.kubeconfig_path()).unwrap();
        assert!(raw.contains("token-a"));
        assert!(!raw.contains("token-b"));
    }

    #[test]
    fn remove_reports_the_connected_alias() {
        let registry = SessionRegistry::new();
        let token = registry.create(user("alice")).unwrap();
        registry
            .connect(token, cluster_session("demo", "https://api.example.com", "t"))
            .unwrap();
        assert_eq!(registry.remove(token).unwrap().as_deref(), Some("demo"));
        assert!(registry.user(token).unwrap().is_none());
    }
}
