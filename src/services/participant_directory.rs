use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use crate::models::{ClassId, ParticipantInfo, ParticipantsMessage, Session, UserId};
use crate::services::session_registry::PresenceObserver;
use crate::store::{keys, SharedStore};
use crate::ws::broker::Broker;
use crate::ws::topics::Topic;

/// Per-class roster of connected users.
///
/// Entries are a projection of class membership kept by the session registry;
/// the directory only adds the profile fields captured at join time. Every
/// change broadcasts the full roster on `class.{id}.participants`.
pub struct ParticipantDirectory {
    store: SharedStore,
    broker: Arc<Broker>,
}

impl ParticipantDirectory {
    pub fn new(store: SharedStore, broker: Arc<Broker>) -> Self {
        Self { store, broker }
    }

    pub fn join(&self, class_id: ClassId, user_id: UserId, username: &str, email: Option<String>, instructor: bool) {
        let info = ParticipantInfo {
            user_id,
            username: username.to_string(),
            email,
            instructor,
            joined_at: Utc::now(),
        };
        match serde_json::to_string(&info) {
            Ok(json) => self.store.hset(&keys::participants(class_id), &user_id.to_string(), json),
            Err(e) => {
                error!("Failed to encode participant {} of class {}: {}", user_id, class_id, e);
                return;
            }
        }
        info!("Participant joined: class {} user {} ({})", class_id, user_id, username);
        self.broadcast(class_id);
    }

    pub fn leave(&self, class_id: ClassId, user_id: UserId) -> bool {
        let removed = self.store.hdel(&keys::participants(class_id), &user_id.to_string());
        info!("Participant left: class {} user {} (was present: {})", class_id, user_id, removed);
        self.broadcast(class_id);
        removed
    }

    /// Everyone in the class, oldest join first
    pub fn list(&self, class_id: ClassId) -> Vec<ParticipantInfo> {
        let key = keys::participants(class_id);
        let mut participants: Vec<ParticipantInfo> = self
            .store
            .hgetall(&key)
            .into_iter()
            .filter_map(|(field, raw)| match serde_json::from_str(&raw) {
                Ok(info) => Some(info),
                Err(e) => {
                    error!("Skipping unreadable participant {} in {}: {}", field, key, e);
                    None
                }
            })
            .collect();
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.user_id.cmp(&b.user_id)));
        participants
    }

    pub fn list_students(&self, class_id: ClassId) -> Vec<ParticipantInfo> {
        self.list(class_id).into_iter().filter(|p| !p.instructor).collect()
    }

    pub fn get_instructor(&self, class_id: ClassId) -> Option<ParticipantInfo> {
        self.list(class_id).into_iter().find(|p| p.instructor)
    }

    pub fn get(&self, class_id: ClassId, user_id: UserId) -> Option<ParticipantInfo> {
        let raw = self.store.hget(&keys::participants(class_id), &user_id.to_string())?;
        serde_json::from_str(&raw).ok()
    }

    pub fn exists(&self, class_id: ClassId, user_id: UserId) -> bool {
        self.store.hexists(&keys::participants(class_id), &user_id.to_string())
    }

    pub fn count(&self, class_id: ClassId) -> usize {
        self.store.hlen(&keys::participants(class_id))
    }

    pub fn roster(&self, class_id: ClassId) -> ParticipantsMessage {
        let participants = self.list(class_id);
        ParticipantsMessage {
            class_id,
            count: participants.len(),
            participants,
        }
    }

    pub fn clear_all(&self, class_id: ClassId) {
        self.store.delete(&keys::participants(class_id));
        info!("Participant directory cleared for class {}", class_id);
    }

    fn broadcast(&self, class_id: ClassId) {
        self.broker.publish(&Topic::ClassParticipants(class_id), &self.roster(class_id));
    }
}

impl PresenceObserver for ParticipantDirectory {
    fn on_join(&self, class_id: ClassId, session: &Session) {
        self.join(
            class_id,
            session.user_id,
            &session.display_name,
            session.email.clone(),
            session.is_instructor(),
        );
    }

    fn on_leave(&self, class_id: ClassId, user_id: UserId) {
        self.leave(class_id, user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::broker::tests::decode;
    use std::time::Duration;

    fn directory() -> (ParticipantDirectory, Arc<Broker>) {
        let broker = Arc::new(Broker::new(32));
        let store = SharedStore::new(Duration::from_secs(60));
        (ParticipantDirectory::new(store, broker.clone()), broker)
    }

    #[tokio::test]
    async fn every_change_broadcasts_the_full_roster() {
        let (dir, broker) = directory();
        let mut rx = broker.subscribe(&Topic::ClassParticipants(7));

        dir.join(7, 1, "Ada", None, true);
        dir.join(7, 2, "Bob", Some("bob@example.com".into()), false);

        let (_, first) = decode(&rx.recv().await.unwrap());
        assert_eq!(first["count"], 1);
        let (topic, second) = decode(&rx.recv().await.unwrap());
        assert_eq!(topic, "class.7.participants");
        assert_eq!(second["count"], 2);
        assert_eq!(second["participants"][1]["username"], "Bob");

        dir.leave(7, 1);
        let (_, third) = decode(&rx.recv().await.unwrap());
        assert_eq!(third["count"], 1);
        assert_eq!(third["participants"][0]["userId"], 2);
    }

    #[test]
    fn queries_split_instructor_and_students() {
        let (dir, _) = directory();
        dir.join(7, 1, "Ada", None, true);
        dir.join(7, 2, "Bob", None, false);
        dir.join(7, 3, "Cy", None, false);
        dir.join(8, 4, "Elsewhere", None, false);

        assert_eq!(dir.count(7), 3);
        assert_eq!(dir.get_instructor(7).map(|p| p.user_id), Some(1));
        let students: Vec<UserId> = dir.list_students(7).iter().map(|p| p.user_id).collect();
        assert_eq!(students, vec![2, 3]);
        assert!(dir.exists(7, 2));
        assert!(!dir.exists(7, 4));
        assert_eq!(dir.get(8, 4).map(|p| p.username), Some("Elsewhere".to_string()));
    }

    #[test]
    fn clear_all_empties_only_that_class() {
        let (dir, _) = directory();
        dir.join(7, 1, "Ada", None, true);
        dir.join(8, 2, "Bob", None, false);

        dir.clear_all(7);
        assert_eq!(dir.count(7), 0);
        assert!(dir.get_instructor(7).is_none());
        assert_eq!(dir.count(8), 1);
    }

    #[test]
    fn leaving_twice_is_harmless() {
        let (dir, _) = directory();
        dir.join(7, 1, "Ada", None, false);
        assert!(dir.leave(7, 1));
        assert!(!dir.leave(7, 1));
        assert_eq!(dir.count(7), 0);
    }
}
