use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clients::roster_client::{check_entry, ClassAccess, ClassRoster};
use crate::error::{ClassroomError, ClassroomResult};
use crate::models::{ClassId, ConnectionId, Role, Session, UserId};
use crate::services::auth_service::JwtAuthenticator;
use crate::store::{keys, SharedStore};

/// Receives class membership changes. The participant directory renders them
/// into the per-class roster.
pub trait PresenceObserver: Send + Sync {
    fn on_join(&self, class_id: ClassId, session: &Session);
    fn on_leave(&self, class_id: ClassId, user_id: UserId);
}

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: Session,
    /// Connections of the same user that were evicted to make room
    pub evicted: Vec<ConnectionId>,
}

const RECONCILE_ROUNDS: usize = 4;

/// Maps live connections to sessions and keeps class membership in step.
///
/// State lives in the shared store under `ws:session:{conn}` (the session),
/// `ws:user:{uid}:session` (one live connection per user) and
/// `ws:class:{cid}:members` (user ids currently in the class). Each step is a
/// single-key atomic store operation; sequences of steps are not transactional,
/// but every step is idempotent so a racing disconnect only repeats harmless
/// removals.
pub struct SessionRegistry {
    store: SharedStore,
    authenticator: JwtAuthenticator,
    roster: Option<Arc<dyn ClassRoster>>,
    observer: Arc<dyn PresenceObserver>,
    early_join: Duration,
}

impl SessionRegistry {
    pub fn new(
        store: SharedStore,
        authenticator: JwtAuthenticator,
        roster: Option<Arc<dyn ClassRoster>>,
        observer: Arc<dyn PresenceObserver>,
        early_join_minutes: i64,
    ) -> Self {
        Self {
            store,
            authenticator,
            roster,
            observer,
            early_join: Duration::minutes(early_join_minutes),
        }
    }

    /// Validate the credential and install a session for `connection_id`.
    ///
    /// Any other live connection of the same user is evicted first: it leaves
    /// its class through the normal leave path and its session is deleted
    /// before the new session becomes visible.
    pub async fn authenticate(
        &self,
        connection_id: ConnectionId,
        credential: &str,
        class_hint: Option<ClassId>,
    ) -> ClassroomResult<Authenticated> {
        let identity = self.authenticator.authenticate_user(credential)?;
        let user_id = identity.user_id;

        let mut role = Role::from_claim(identity.role_claim.as_deref());
        if let Some(class_id) = class_hint {
            if let Some(access) = self.roster_entry(class_id, user_id).await {
                role = access.role;
            }
        }

        let index_key = keys::user_session(user_id);
        let mut evicted = Vec::new();
        if let Some(old) = self.store.get(&index_key) {
            self.evict(&old, connection_id, &mut evicted);
        }

        let session = Session {
            connection_id,
            user_id,
            display_name: identity.display_name,
            email: identity.email,
            role,
            current_class_id: None,
            connected_at: Utc::now(),
        };
        self.store.set_json(&keys::session(&connection_id), &session)?;

        // A concurrent handshake of the same user may have slipped in between
        // the eviction above and now; whoever we displace here is evicted too.
        if let Some(previous) = self.store.getset(&index_key, connection_id.to_string()) {
            self.evict(&previous, connection_id, &mut evicted);
        }

        info!(
            "Session established: connection {} user {} ({:?}), evicted {:?}",
            connection_id, user_id, role, evicted
        );
        Ok(Authenticated { session, evicted })
    }

    fn evict(&self, old: &str, current: ConnectionId, evicted: &mut Vec<ConnectionId>) {
        let Ok(old_id) = old.parse::<ConnectionId>() else {
            warn!("Ignoring malformed session index value '{}'", old);
            return;
        };
        if old_id == current || evicted.contains(&old_id) {
            return;
        }
        info!("Evicting connection {} (duplicate login)", old_id);
        self.leave_class(&old_id);
        self.terminate(&old_id);
        evicted.push(old_id);
    }

    /// Recover the identity behind a connection
    pub fn resolve(&self, connection_id: &ConnectionId) -> Option<Session> {
        self.store.get_json(&keys::session(connection_id))
    }

    /// Put the connection's user into `class_id`.
    ///
    /// Joining the class the connection is already in is a no-op. Joining a
    /// different class leaves the current one first. When a roster is
    /// configured the entry gate applies and the role is refreshed from it.
    pub async fn join_class(&self, connection_id: &ConnectionId, class_id: ClassId) -> ClassroomResult<Session> {
        let session = self
            .resolve(connection_id)
            .ok_or_else(|| ClassroomError::Authentication("connection has no session".to_string()))?;
        if session.current_class_id == Some(class_id) {
            debug!("Connection {} already in class {}", connection_id, class_id);
            return Ok(session);
        }

        let mut role = session.role;
        if let Some(roster) = &self.roster {
            match roster.class_access(class_id, session.user_id).await {
                Ok(Some(access)) => {
                    check_entry(&access, Utc::now(), self.early_join)?;
                    role = access.role;
                }
                Ok(None) => {
                    return Err(ClassroomError::AccessDenied(format!(
                        "user {} is not enrolled in class {}",
                        session.user_id, class_id
                    )));
                }
                Err(e) => {
                    error!("Roster unavailable, admitting user {} to class {} ungated: {}", session.user_id, class_id, e);
                }
            }
        }

        if session.current_class_id.is_some() {
            self.leave_class(connection_id);
        }

        let joined = self
            .store
            .update_json(&keys::session(connection_id), |s: &mut Session| {
                s.current_class_id = Some(class_id);
                s.role = role;
                s.clone()
            })
            .ok_or_else(|| ClassroomError::Authentication("session ended while joining".to_string()))?;

        self.store.sadd(&keys::class_members(class_id), &joined.user_id.to_string());
        self.observer.on_join(class_id, &joined);

        // An eviction or disconnect may have run its leave between the session
        // update and the member add above; it would have removed nothing.
        if !self.reconcile(class_id, joined.user_id) {
            return Err(ClassroomError::Authentication("session ended while joining".to_string()));
        }
        info!("User {} joined class {} as {:?}", joined.user_id, class_id, joined.role);
        Ok(joined)
    }

    /// Take the connection out of its class. Returns the class it left, or
    /// `None` if it was not in one (or a concurrent leave got there first).
    pub fn leave_class(&self, connection_id: &ConnectionId) -> Option<ClassId> {
        let taken = self
            .store
            .update_json(&keys::session(connection_id), |s: &mut Session| (s.current_class_id.take(), s.user_id))?;
        let (Some(class_id), user_id) = taken else {
            return None;
        };

        self.store.srem(&keys::class_members(class_id), &user_id.to_string());
        self.observer.on_leave(class_id, user_id);
        self.reconcile(class_id, user_id);
        info!("User {} left class {}", user_id, class_id);
        Some(class_id)
    }

    /// Bring the member set and the directory in line with the user's live
    /// session. Returns whether the user ends up in `class_id`.
    ///
    /// Join and leave each finish with this, so whichever of two racing
    /// updates completes last repairs what the other did out of order.
    fn reconcile(&self, class_id: ClassId, user_id: UserId) -> bool {
        let members_key = keys::class_members(class_id);
        for _ in 0..RECONCILE_ROUNDS {
            let live = self.session_of(user_id).filter(|s| s.current_class_id == Some(class_id));
            match (live, self.is_member(class_id, user_id)) {
                (Some(_), true) => return true,
                (None, false) => return false,
                (Some(session), false) => {
                    debug!("Restoring membership of user {} in class {}", user_id, class_id);
                    self.store.sadd(&members_key, &user_id.to_string());
                    self.observer.on_join(class_id, &session);
                }
                (None, true) => {
                    debug!("Dropping stale membership of user {} in class {}", user_id, class_id);
                    self.store.srem(&members_key, &user_id.to_string());
                    self.observer.on_leave(class_id, user_id);
                }
            }
        }
        warn!("Membership of user {} in class {} still moving after reconcile", user_id, class_id);
        self.is_member(class_id, user_id)
    }

    /// Delete the session and, if it still points here, the user's index entry
    pub fn terminate(&self, connection_id: &ConnectionId) -> Option<Session> {
        let session = self.resolve(connection_id);
        self.store.delete(&keys::session(connection_id));
        if let Some(s) = &session {
            self.store.delete_if_eq(&keys::user_session(s.user_id), &connection_id.to_string());
            debug!("Session of user {} on connection {} terminated", s.user_id, connection_id);
        }
        session
    }

    /// Full cleanup for a closed connection. Safe to call more than once.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        self.leave_class(connection_id);
        if self.terminate(connection_id).is_some() {
            info!("Connection {} disconnected", connection_id);
        }
    }

    /// Empty the class: drop its membership set and detach every session
    /// still pointing at it. No leave broadcasts are sent.
    pub fn clear_class(&self, class_id: ClassId) -> usize {
        let members = self.members(class_id);
        for user_id in &members {
            let Some(conn) = self.store.get(&keys::user_session(*user_id)) else { continue };
            let Ok(connection_id) = conn.parse::<ConnectionId>() else { continue };
            self.store.update_json(&keys::session(&connection_id), |s: &mut Session| {
                if s.current_class_id == Some(class_id) {
                    s.current_class_id = None;
                }
            });
        }
        self.store.delete(&keys::class_members(class_id));
        info!("Class {} membership cleared ({} member(s))", class_id, members.len());
        members.len()
    }

    pub fn members(&self, class_id: ClassId) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .store
            .smembers(&keys::class_members(class_id))
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_member(&self, class_id: ClassId, user_id: UserId) -> bool {
        self.store.sismember(&keys::class_members(class_id), &user_id.to_string())
    }

    /// Live connection of a user, if any
    pub fn session_of(&self, user_id: UserId) -> Option<Session> {
        let conn = self.store.get(&keys::user_session(user_id))?;
        self.resolve(&conn.parse().ok()?)
    }

    pub fn session_count(&self) -> usize {
        self.store.count_prefix(keys::SESSION_PREFIX)
    }

    /// Roster lookup used for role resolution. Failures and absent entries
    /// both fall back to the token's role.
    async fn roster_entry(&self, class_id: ClassId, user_id: UserId) -> Option<ClassAccess> {
        let roster = self.roster.as_ref()?;
        match roster.class_access(class_id, user_id).await {
            Ok(access) => access,
            Err(e) => {
                warn!("Role lookup for user {} in class {} failed: {}", user_id, class_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clients::roster_client::StaticRoster;
    use crate::error::ValidationKind;
    use crate::services::auth_service::tests::{user_token, SECRET};
    use crate::services::participant_directory::ParticipantDirectory;
    use crate::ws::broker::Broker;
    use uuid::Uuid;

    pub(crate) struct Fixture {
        pub store: SharedStore,
        pub broker: Arc<Broker>,
        pub directory: Arc<ParticipantDirectory>,
        pub registry: Arc<SessionRegistry>,
    }

    pub(crate) fn fixture(roster: Option<Arc<dyn ClassRoster>>) -> Fixture {
        let store = SharedStore::new(std::time::Duration::from_secs(600));
        let broker = Arc::new(Broker::new(64));
        let directory = Arc::new(ParticipantDirectory::new(store.clone(), broker.clone()));
        let registry = Arc::new(SessionRegistry::new(
            store.clone(),
            JwtAuthenticator::new(Some(SECRET.to_string())),
            roster,
            directory.clone(),
            10,
        ));
        Fixture { store, broker, directory, registry }
    }

    /// Connect a user and return the new connection id
    pub(crate) async fn connect(registry: &SessionRegistry, user_id: UserId, role: &str) -> ConnectionId {
        let conn = Uuid::new_v4();
        registry
            .authenticate(conn, &user_token(user_id, &format!("user{}", user_id), role), None)
            .await
            .unwrap();
        conn
    }

    #[tokio::test]
    async fn invalid_credentials_create_no_session() {
        let f = fixture(None);
        let conn = Uuid::new_v4();
        let err = f.registry.authenticate(conn, "not-a-jwt", None).await.unwrap_err();
        assert!(matches!(err, ClassroomError::Authentication(_)));
        assert!(f.registry.resolve(&conn).is_none());
    }

    #[tokio::test]
    async fn second_login_evicts_the_first_and_its_membership() {
        let f = fixture(None);
        let first = connect(&f.registry, 5, "STUDENT").await;
        f.registry.join_class(&first, 7).await.unwrap();
        assert!(f.directory.exists(7, 5));

        let second = Uuid::new_v4();
        let auth = f.registry.authenticate(second, &user_token(5, "again", "STUDENT"), None).await.unwrap();

        assert_eq!(auth.evicted, vec![first]);
        assert!(f.registry.resolve(&first).is_none());
        assert!(!f.registry.is_member(7, 5));
        assert!(!f.directory.exists(7, 5));
        assert_eq!(f.registry.session_of(5).map(|s| s.connection_id), Some(second));
        assert_eq!(f.registry.session_count(), 1);

        // The evicted socket closing later must not disturb the new session
        f.registry.disconnect(&first);
        assert_eq!(f.registry.session_of(5).map(|s| s.connection_id), Some(second));
    }

    #[tokio::test]
    async fn concurrent_logins_leave_one_session() {
        let f = fixture(None);
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = f.registry.clone();
            tasks.push(tokio::spawn(async move { connect(&registry, 9, "STUDENT").await }));
        }
        let mut conns = Vec::new();
        for t in tasks {
            conns.push(t.await.unwrap());
        }

        let live: Vec<_> = conns.iter().filter(|c| f.registry.resolve(c).is_some()).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(f.registry.session_of(9).map(|s| s.connection_id), Some(*live[0]));
    }

    #[tokio::test]
    async fn joining_is_idempotent_and_switching_leaves_the_old_class() {
        let f = fixture(None);
        let conn = connect(&f.registry, 1, "STUDENT").await;

        f.registry.join_class(&conn, 7).await.unwrap();
        f.registry.join_class(&conn, 7).await.unwrap();
        assert_eq!(f.registry.members(7), vec![1]);
        assert_eq!(f.directory.count(7), 1);

        let session = f.registry.join_class(&conn, 8).await.unwrap();
        assert_eq!(session.current_class_id, Some(8));
        assert!(f.registry.members(7).is_empty());
        assert!(!f.directory.exists(7, 1));
        assert_eq!(f.registry.members(8), vec![1]);
    }

    #[tokio::test]
    async fn disconnect_releases_everything_and_is_idempotent() {
        let f = fixture(None);
        let conn = connect(&f.registry, 3, "STUDENT").await;
        f.registry.join_class(&conn, 7).await.unwrap();

        f.registry.disconnect(&conn);
        f.registry.disconnect(&conn);

        assert!(f.registry.resolve(&conn).is_none());
        assert!(f.registry.session_of(3).is_none());
        assert!(f.registry.members(7).is_empty());
        assert_eq!(f.directory.count(7), 0);
        assert_eq!(f.store.get(&keys::user_session(3)), None);
    }

    #[tokio::test]
    async fn membership_matches_sessions_after_interleaved_events() {
        let f = fixture(None);
        let mut tasks = Vec::new();
        for user in 1..=12i64 {
            let registry = f.registry.clone();
            tasks.push(tokio::spawn(async move {
                let conn = connect(&registry, user, "STUDENT").await;
                registry.join_class(&conn, 7 + user % 2).await.unwrap();
                if user % 3 == 0 {
                    registry.leave_class(&conn);
                }
                if user % 4 == 0 {
                    registry.disconnect(&conn);
                }
                if user % 5 == 0 {
                    // Reconnect: evicts the connection above
                    let again = connect(&registry, user, "STUDENT").await;
                    registry.join_class(&again, 7).await.unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        for class_id in [7, 8] {
            for user in 1..=12i64 {
                let in_class = f
                    .registry
                    .session_of(user)
                    .is_some_and(|s| s.current_class_id == Some(class_id));
                assert_eq!(f.registry.is_member(class_id, user), in_class, "user {} class {}", user, class_id);
                assert_eq!(f.directory.exists(class_id, user), in_class, "directory user {} class {}", user, class_id);
            }
        }
    }

    /// Ends the joining session right after its member add, the way an
    /// eviction landing mid-join would.
    struct EndSessionOnJoin {
        directory: Arc<ParticipantDirectory>,
        registry: std::sync::OnceLock<std::sync::Weak<SessionRegistry>>,
        fired: std::sync::atomic::AtomicBool,
    }

    impl PresenceObserver for EndSessionOnJoin {
        fn on_join(&self, class_id: ClassId, session: &Session) {
            self.directory.on_join(class_id, session);
            if !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                if let Some(registry) = self.registry.get().and_then(std::sync::Weak::upgrade) {
                    registry.terminate(&session.connection_id);
                }
            }
        }

        fn on_leave(&self, class_id: ClassId, user_id: UserId) {
            self.directory.on_leave(class_id, user_id);
        }
    }

    #[tokio::test]
    async fn a_session_ending_mid_join_leaves_no_member_behind() {
        let store = SharedStore::new(std::time::Duration::from_secs(600));
        let broker = Arc::new(Broker::new(64));
        let directory = Arc::new(ParticipantDirectory::new(store.clone(), broker));
        let observer = Arc::new(EndSessionOnJoin {
            directory: directory.clone(),
            registry: std::sync::OnceLock::new(),
            fired: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = Arc::new(SessionRegistry::new(
            store,
            JwtAuthenticator::new(Some(SECRET.to_string())),
            None,
            observer.clone(),
            10,
        ));
        let _ = observer.registry.set(Arc::downgrade(&registry));

        let conn = connect(&registry, 4, "STUDENT").await;
        let err = registry.join_class(&conn, 7).await.unwrap_err();

        assert!(matches!(err, ClassroomError::Authentication(_)));
        assert!(registry.members(7).is_empty());
        assert!(!directory.exists(7, 4));

        // A fresh login joins normally afterwards
        let again = connect(&registry, 4, "STUDENT").await;
        registry.join_class(&again, 7).await.unwrap();
        assert_eq!(registry.members(7), vec![4]);
        assert!(directory.exists(7, 4));
    }

    #[tokio::test]
    async fn roster_decides_role_and_gates_entry() {
        let roster = Arc::new(StaticRoster::new());
        roster.enroll(7, 1, Role::Instructor);
        roster.insert(7, 2, ClassAccess {
            role: Role::Participant,
            starts_at: Some(Utc::now() + Duration::hours(2)),
            ends_at: Some(Utc::now() + Duration::hours(3)),
            online: true,
        });
        let f = fixture(Some(roster as Arc<dyn ClassRoster>));

        // Token claims STUDENT, roster says instructor
        let conn = Uuid::new_v4();
        let auth = f.registry.authenticate(conn, &user_token(1, "Ada", "STUDENT"), Some(7)).await.unwrap();
        assert_eq!(auth.session.role, Role::Instructor);

        let early = connect(&f.registry, 2, "STUDENT").await;
        let err = f.registry.join_class(&early, 7).await.unwrap_err();
        assert!(matches!(err, ClassroomError::Validation { kind: ValidationKind::ClassNotStarted, .. }));
        assert!(!f.registry.is_member(7, 2));

        let stranger = connect(&f.registry, 3, "STUDENT").await;
        assert!(matches!(f.registry.join_class(&stranger, 7).await, Err(ClassroomError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn clear_class_detaches_sessions() {
        let f = fixture(None);
        let a = connect(&f.registry, 1, "INSTRUCTOR").await;
        let b = connect(&f.registry, 2, "STUDENT").await;
        f.registry.join_class(&a, 7).await.unwrap();
        f.registry.join_class(&b, 7).await.unwrap();

        assert_eq!(f.registry.clear_class(7), 2);
        assert!(f.registry.members(7).is_empty());
        assert_eq!(f.registry.resolve(&a).and_then(|s| s.current_class_id), None);
        // Still connected
        assert!(f.registry.resolve(&b).is_some());
        assert_eq!(f.registry.leave_class(&b), None);
    }
}
