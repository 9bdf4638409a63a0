/// UniMesh client facade
///
/// Owns the signed-in session, the messaging hub and the stateless services,
/// and persists the session in the local store so a later run can resume.

use crate::backend::{AuthApi, Backend, RestAuth, RestBackend};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::models::{ConversationId, SignUpProfile, UserId};
use crate::services::{
    DiscoveryService, EventService, MessagingHub, NoticeService, OrganizationService,
    ProfileService,
};
use crate::session::{Session, SignUpOutcome};
use crate::storage::LocalStore;
use directories::BaseDirs;
use std::path::PathBuf;
use std::sync::Arc;

const STATE_DB: &str = "unimesh.db";

pub struct UniMesh {
    session: Session,
    auth: Arc<dyn AuthApi>,
    hub: MessagingHub,
    profiles: ProfileService,
    discovery: DiscoveryService,
    events: EventService,
    organizations: OrganizationService,
    notices: NoticeService,
    local_store: Option<LocalStore>,
}

impl UniMesh {
    /// Assemble a client around an existing session
    pub fn new(
        backend: Arc<dyn Backend>,
        auth: Arc<dyn AuthApi>,
        session: Session,
        config: &ClientConfig,
    ) -> Self {
        let hub = MessagingHub::new(backend.clone(), session.user_id.clone())
            .with_resubscribe_on_error(config.resubscribe_on_error);
        UniMesh {
            session,
            auth,
            hub,
            profiles: ProfileService::new(backend.clone()),
            discovery: DiscoveryService::new(backend.clone()),
            events: EventService::new(backend.clone()),
            organizations: OrganizationService::new(backend.clone()),
            notices: NoticeService::new(backend),
            local_store: None,
        }
    }

    /// Persist the session (and conversation preferences) in `store`
    pub fn with_local_store(mut self, store: LocalStore) -> Result<Self> {
        store.save_session(&self.session)?;
        self.local_store = Some(store);
        Ok(self)
    }

    /// Sign in against the hosted backend
    pub async fn connect_rest(config: &ClientConfig, email: &str, password: &str) -> Result<Self> {
        config.validate()?;
        let auth = Arc::new(RestAuth::new(config)?);
        let session = auth.sign_in(email, password).await?;
        log::info!("Signed in as {}", session.user_id);
        Self::from_rest_session(config, auth, session)
    }

    /// Resume the session persisted by an earlier run. Returns `None` when
    /// nothing is stored or the stored session can no longer be refreshed.
    pub async fn resume(config: &ClientConfig) -> Result<Option<Self>> {
        config.validate()?;
        let store = open_local_store(config)?;
        let Some(session) = store.load_session()? else {
            return Ok(None);
        };
        let auth = Arc::new(RestAuth::new(config)?);
        let session = match auth.ensure_fresh(session).await {
            Ok(session) => session,
            Err(ClientError::Auth(reason)) => {
                log::info!("Stored session rejected ({}); signing in again", reason);
                store.clear_session()?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        log::info!("Resumed session for {}", session.user_id);
        let backend = Arc::new(RestBackend::new(config)?.with_session(&session));
        Self::new(backend, auth, session, config)
            .with_local_store(store)
            .map(Some)
    }

    /// Create an account. When the backend wants the e-mail confirmed first
    /// there is no session yet and `None` is returned.
    pub async fn sign_up(
        config: &ClientConfig,
        email: &str,
        password: &str,
        profile: &SignUpProfile,
    ) -> Result<Option<Self>> {
        config.validate()?;
        let auth = Arc::new(RestAuth::new(config)?);
        match auth.sign_up(email, password, profile).await? {
            SignUpOutcome::SignedIn(session) => {
                Self::from_rest_session(config, auth, session).map(Some)
            }
            SignUpOutcome::ConfirmationRequired { user_id } => {
                log::info!("Account {} awaits e-mail confirmation", user_id);
                Ok(None)
            }
        }
    }

    fn from_rest_session(config: &ClientConfig, auth: Arc<RestAuth>, session: Session) -> Result<Self> {
        let backend = Arc::new(RestBackend::new(config)?.with_session(&session));
        let store = open_local_store(config)?;
        Self::new(backend, auth, session, config).with_local_store(store)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn user_id(&self) -> &UserId {
        &self.session.user_id
    }

    pub fn hub(&self) -> &MessagingHub {
        &self.hub
    }

    pub fn hub_mut(&mut self) -> &mut MessagingHub {
        &mut self.hub
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    pub fn events(&self) -> &EventService {
        &self.events
    }

    pub fn organizations(&self) -> &OrganizationService {
        &self.organizations
    }

    pub fn notices(&self) -> &NoticeService {
        &self.notices
    }

    /// Open a conversation and remember it for the next run
    pub async fn open_conversation(&mut self, id: &ConversationId) -> Result<()> {
        let opened = self.hub.select_conversation(id).await;
        if let Some(store) = &self.local_store {
            if self.hub.active_conversation().map(|c| &c.id) == Some(id) {
                store.save_last_conversation(&self.session.user_id, id)?;
            }
        }
        opened
    }

    /// Re-open the conversation that was open when the last run ended, if it
    /// is still in the list
    pub async fn restore_last_conversation(&mut self) -> Result<Option<ConversationId>> {
        let Some(store) = &self.local_store else {
            return Ok(None);
        };
        let Some(id) = store.last_conversation(&self.session.user_id)? else {
            return Ok(None);
        };
        if self.hub.conversation(&id).is_none() {
            store.clear_last_conversation(&self.session.user_id)?;
            return Ok(None);
        }
        self.open_conversation(&id).await?;
        Ok(Some(id))
    }

    /// Close every subscription, end the session with the backend and forget
    /// the stored session
    pub async fn sign_out(mut self) -> Result<()> {
        self.hub.shutdown();
        if let Err(e) = self.profiles.set_online(&self.session.user_id, false).await {
            log::debug!("Could not clear presence: {}", e);
        }
        let result = self.auth.sign_out(&self.session).await;
        if let Some(store) = &self.local_store {
            store.clear_session()?;
        }
        log::info!("Signed out {}", self.session.user_id);
        result
    }
}

/// Directory holding the local SQLite state; `~/.unimesh` unless configured
pub fn state_dir(config: &ClientConfig) -> Result<PathBuf> {
    if let Some(dir) = &config.state_dir {
        return Ok(dir.clone());
    }
    let base_dirs = BaseDirs::new()
        .ok_or_else(|| ClientError::Config("Failed to get home directory".to_string()))?;
    Ok(base_dirs.home_dir().join(".unimesh"))
}

fn open_local_store(config: &ClientConfig) -> Result<LocalStore> {
    let dir = state_dir(config)?;
    std::fs::create_dir_all(&dir)?;
    LocalStore::new(dir.join(STATE_DB))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    async fn signed_in(backend: &Arc<MemoryBackend>) -> Session {
        backend.register_user("ada@uni.edu", "secret1", "Ada");
        backend.sign_in("ada@uni.edu", "secret1").await.unwrap()
    }

    #[tokio::test]
    async fn test_sign_out_clears_stored_session() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(STATE_DB);
        let backend = Arc::new(MemoryBackend::new());
        let session = signed_in(&backend).await;
        let config = ClientConfig::new("http://localhost:54321", "anon");

        let client = UniMesh::new(backend.clone(), backend.clone(), session.clone(), &config)
            .with_local_store(LocalStore::new(&db_path).unwrap())
            .unwrap();
        let stored = LocalStore::new(&db_path).unwrap().load_session().unwrap();
        assert_eq!(stored.map(|s| s.user_id), Some(session.user_id));

        client.sign_out().await.unwrap();
        assert!(LocalStore::new(&db_path).unwrap().load_session().unwrap().is_none());
    }

    #[test]
    fn test_state_dir_prefers_config() {
        let config = ClientConfig::new("http://localhost:54321", "anon")
            .with_state_dir(PathBuf::from("/tmp/unimesh-test"));
        assert_eq!(state_dir(&config).unwrap(), PathBuf::from("/tmp/unimesh-test"));
    }
}
