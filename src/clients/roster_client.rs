use chrono::{DateTime, Duration, Utc};
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::{ClassroomError, ClassroomResult, ValidationKind};
use crate::models::{ClassId, Role, UserId};
use crate::services::auth_service::generate_service_token;

/// Enrollment of one user in one class, as the roster service reports it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAccess {
    pub role: Role,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

pub type RosterFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<ClassAccess>, String>> + Send + 'a>>;

/// Durable class roster. `None` means the user is not enrolled in the class.
pub trait ClassRoster: Send + Sync {
    fn class_access(&self, class_id: ClassId, user_id: UserId) -> RosterFuture<'_>;
}

/// Decide whether a user may enter the class right now
pub fn check_entry(access: &ClassAccess, now: DateTime<Utc>, early_join: Duration) -> ClassroomResult<()> {
    if !access.online {
        return Err(ClassroomError::validation(ValidationKind::ClassOffline, "class is not held online"));
    }
    if access.ends_at.is_some_and(|end| now >= end) {
        return Err(ClassroomError::validation(ValidationKind::ClassEnded, "class has already ended"));
    }
    if !access.role.is_instructor() && access.starts_at.is_some_and(|start| now < start - early_join) {
        return Err(ClassroomError::validation(ValidationKind::ClassNotStarted, "class has not started yet"));
    }
    Ok(())
}

/// HTTP client for the roster service
pub struct RosterServiceClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
    cache: Cache<(ClassId, UserId), Option<ClassAccess>>,
}

impl RosterServiceClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(std::time::Duration::from_secs(60))
            .build();

        info!("Roster service client initialized for {}", base_url);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            jwt_secret,
            service_name,
            cache,
        })
    }

    async fn fetch(&self, class_id: ClassId, user_id: UserId) -> Result<Option<ClassAccess>, String> {
        let token = generate_service_token(&self.jwt_secret, &self.service_name)
            .map_err(|e| format!("Failed to generate service token: {}", e))?;
        let url = format!("{}/classes/{}/roster/{}", self.base_url, class_id, user_id);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| format!("Roster request failed: {}", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| format!("Roster service error: {}", e))?;
        response
            .json::<ClassAccess>()
            .await
            .map(Some)
            .map_err(|e| format!("Invalid roster response: {}", e))
    }
}

impl ClassRoster for RosterServiceClient {
    fn class_access(&self, class_id: ClassId, user_id: UserId) -> RosterFuture<'_> {
        Box::pin(async move {
            let key = (class_id, user_id);
            if let Some(access) = self.cache.get(&key).await {
                return Ok(access);
            }

            debug!("Roster cache miss for class {} user {}", class_id, user_id);
            let access = self.fetch(class_id, user_id).await.map_err(|e| {
                error!("Failed to load roster entry for class {} user {}: {}", class_id, user_id, e);
                e
            })?;
            self.cache.insert(key, access.clone()).await;
            Ok(access)
        })
    }
}

/// One line of a roster file
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterEntry {
    class_id: ClassId,
    user_id: UserId,
    #[serde(flatten)]
    access: ClassAccess,
}

/// Fixed in-memory roster, for local runs (`ROSTER_FILE`) and tests
#[derive(Default)]
pub struct StaticRoster {
    entries: RwLock<HashMap<(ClassId, UserId), ClassAccess>>,
}

impl StaticRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON array of `{classId, userId, role, startsAt?, endsAt?, online?}`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let roster = Self::new();
        for entry in serde_json::from_str::<Vec<RosterEntry>>(json)? {
            roster.insert(entry.class_id, entry.user_id, entry.access);
        }
        Ok(roster)
    }

    /// Load a roster file, see [`StaticRoster::from_json`]
    pub fn load(path: &str) -> Result<Self, String> {
        let json = std::fs::read_to_string(path).map_err(|e| format!("Failed to read roster file {}: {}", path, e))?;
        let roster = Self::from_json(&json).map_err(|e| format!("Invalid roster file {}: {}", path, e))?;
        info!("Loaded {} roster entries from {}", roster.entry_count(), path);
        Ok(roster)
    }

    pub fn insert(&self, class_id: ClassId, user_id: UserId, access: ClassAccess) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert((class_id, user_id), access);
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Enroll a user in a class that is open right now
    #[cfg(test)]
    pub fn enroll(&self, class_id: ClassId, user_id: UserId, role: Role) {
        self.insert(class_id, user_id, ClassAccess { role, starts_at: None, ends_at: None, online: true });
    }
}

impl ClassRoster for StaticRoster {
    fn class_access(&self, class_id: ClassId, user_id: UserId) -> RosterFuture<'_> {
        let entry = {
            let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
            entries.get(&(class_id, user_id)).cloned()
        };
        Box::pin(async move { Ok(entry) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(role: Role, starts_in_min: i64, ends_in_min: i64) -> ClassAccess {
        let now = Utc::now();
        ClassAccess {
            role,
            starts_at: Some(now + Duration::minutes(starts_in_min)),
            ends_at: Some(now + Duration::minutes(ends_in_min)),
            online: true,
        }
    }

    fn gate(a: &ClassAccess) -> Option<ValidationKind> {
        match check_entry(a, Utc::now(), Duration::minutes(10)) {
            Ok(()) => None,
            Err(ClassroomError::Validation { kind, .. }) => Some(kind),
            Err(other) => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn participants_may_enter_inside_the_early_join_window() {
        assert_eq!(gate(&access(Role::Participant, 5, 60)), None);
        assert_eq!(gate(&access(Role::Participant, -30, 60)), None);
        assert_eq!(gate(&access(Role::Participant, 30, 90)), Some(ValidationKind::ClassNotStarted));
    }

    #[test]
    fn instructors_may_enter_any_time_before_the_end() {
        assert_eq!(gate(&access(Role::Instructor, 120, 180)), None);
        assert_eq!(gate(&access(Role::Instructor, -120, -60)), Some(ValidationKind::ClassEnded));
    }

    #[tokio::test]
    async fn roster_files_list_enrollments() {
        let roster = StaticRoster::from_json(
            r#"[
                {"classId": 7, "userId": 1, "role": "INSTRUCTOR"},
                {"classId": 7, "userId": 2, "role": "STUDENT", "startsAt": "2030-01-01T09:00:00Z", "online": false}
            ]"#,
        )
        .unwrap();
        assert_eq!(roster.entry_count(), 2);

        let ada = roster.class_access(7, 1).await.unwrap().unwrap();
        assert_eq!(ada.role, Role::Instructor);
        assert!(ada.online);

        let bob = roster.class_access(7, 2).await.unwrap().unwrap();
        assert_eq!(bob.role, Role::Participant);
        assert!(!bob.online);
        assert!(bob.starts_at.is_some());

        assert_eq!(roster.class_access(8, 1).await.unwrap(), None);
        assert!(StaticRoster::from_json("{}").is_err());
    }

    #[test]
    fn offline_classes_are_never_entered() {
        let mut a = access(Role::Instructor, -5, 60);
        a.online = false;
        assert_eq!(gate(&a), Some(ValidationKind::ClassOffline));
    }

    #[test]
    fn roster_entries_deserialize_with_defaults() {
        let a: ClassAccess = serde_json::from_str(r#"{"role":"INSTRUCTOR"}"#).unwrap();
        assert!(a.online);
        assert!(a.starts_at.is_none());
    }

    #[tokio::test]
    async fn static_roster_reports_enrollment() {
        let roster = StaticRoster::new();
        roster.enroll(7, 1, Role::Instructor);
        assert_eq!(roster.class_access(7, 1).await.unwrap().map(|a| a.role), Some(Role::Instructor));
        assert_eq!(roster.class_access(7, 2).await.unwrap(), None);
    }
}
