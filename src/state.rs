use std::sync::Arc;

use crate::clients::roster_client::ClassRoster;
use crate::config::Config;
use crate::services::auth_service::JwtAuthenticator;
use crate::services::chat_service::ChatService;
use crate::services::class_admin::ClassAdmin;
use crate::services::code_service::CodeService;
use crate::services::participant_directory::ParticipantDirectory;
use crate::services::session_registry::SessionRegistry;
use crate::store::SharedStore;
use crate::ws::broker::Broker;
use crate::ws::connctx::ConnectionHub;

/// Shared application state handed to every handler
pub struct AppState {
    pub broker: Arc<Broker>,
    pub hub: Arc<ConnectionHub>,
    pub authenticator: JwtAuthenticator,
    pub roster: Option<Arc<dyn ClassRoster>>,
    pub registry: Arc<SessionRegistry>,
    pub directory: Arc<ParticipantDirectory>,
    pub chat: Arc<ChatService>,
    pub code: Arc<CodeService>,
    pub admin: Arc<ClassAdmin>,
}

impl AppState {
    pub fn new(config: &Config, roster: Option<Arc<dyn ClassRoster>>) -> Self {
        let store = SharedStore::new(config.state_ttl());
        let broker = Arc::new(Broker::new(config.topic_capacity));
        let authenticator = JwtAuthenticator::new(config.auth_jwt_secret.clone());

        let directory = Arc::new(ParticipantDirectory::new(store.clone(), broker.clone()));
        let registry = Arc::new(SessionRegistry::new(
            store.clone(),
            authenticator.clone(),
            roster.clone(),
            directory.clone(),
            config.early_join_minutes,
        ));
        let chat = Arc::new(ChatService::new(store.clone(), broker.clone(), config.max_chat_length));
        let code = Arc::new(CodeService::new(store.clone(), broker.clone()));
        let admin = Arc::new(ClassAdmin::new(
            broker.clone(),
            registry.clone(),
            directory.clone(),
            chat.clone(),
            code.clone(),
        ));

        Self {
            broker,
            hub: Arc::new(ConnectionHub::new(config.outbound_capacity)),
            authenticator,
            roster,
            registry,
            directory,
            chat,
            code,
            admin,
        }
    }
}
