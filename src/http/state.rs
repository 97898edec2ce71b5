use crate::config::Config;
use crate::session::StreamSession;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Sessions known to the API, in start order
///
/// Stopped sessions stay so their history and CSV remain reachable, but only
/// up to `limit` entries: past it the oldest finished sessions are dropped.
/// A session still sampling or connected is never dropped, nor is the one
/// just added, so the table can exceed the limit while sessions are live.
pub struct SessionTable {
    sessions: HashMap<String, Arc<StreamSession>>,
    order: VecDeque<String>,
    limit: usize,
}

impl SessionTable {
    pub fn new(limit: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            order: VecDeque::new(),
            limit,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Add a session unless the id is taken, then evict finished sessions
    /// beyond the limit. Returns false if the id was already present.
    pub fn insert(&mut self, session_id: String, session: Arc<StreamSession>) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }

        self.order.push_back(session_id.clone());
        self.sessions.insert(session_id, session);
        self.evict_finished();
        true
    }

    fn evict_finished(&mut self) {
        let mut excess = self.sessions.len().saturating_sub(self.limit);
        if excess == 0 {
            return;
        }

        let newest = self.order.back().cloned();
        let sessions = &mut self.sessions;
        self.order.retain(|id| {
            if excess == 0 || newest.as_ref() == Some(id) {
                return true;
            }
            let finished = sessions
                .get(id)
                .is_some_and(|s| !s.is_sampling() && !s.connection_state().is_open());
            if finished {
                sessions.remove(id);
                excess -= 1;
                info!("Dropped finished session {}", id);
            }
            !finished
        });
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Known sessions, kept after stop for export
    pub sessions: Arc<RwLock<SessionTable>>,

    /// Settings new sessions are built from
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(SessionTable::new(
                config.service.http.retained_sessions,
            ))),
            config: Arc::new(config),
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.read().await.get(session_id)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SourceKind;
    use crate::session::SessionConfig;

    fn offline_session() -> Arc<StreamSession> {
        let config = SessionConfig::from_config(&Config::default(), SourceKind::File);
        Arc::new(StreamSession::new(config))
    }

    #[test]
    fn test_oldest_finished_sessions_evicted() {
        let mut table = SessionTable::new(2);

        for id in ["first", "second", "third", "fourth"] {
            assert!(table.insert(id.to_string(), offline_session()));
        }

        assert_eq!(table.len(), 2);
        assert!(!table.contains("first"));
        assert!(!table.contains("second"));
        assert!(table.contains("third"));
        assert!(table.get("fourth").is_some());
    }

    #[tokio::test]
    async fn test_connected_session_kept_over_limit() -> anyhow::Result<()> {
        use futures::StreamExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            }
        });

        let mut cfg = Config::default();
        cfg.recognition.endpoint = format!("ws://{}", addr);
        let live = Arc::new(StreamSession::new(SessionConfig::from_config(
            &cfg,
            SourceKind::Camera,
        )));
        live.connect().await?;

        let mut table = SessionTable::new(1);
        table.insert("live".to_string(), Arc::clone(&live));
        table.insert("done-1".to_string(), offline_session());
        table.insert("done-2".to_string(), offline_session());

        assert!(table.contains("live"));
        assert!(!table.contains("done-1"));
        assert_eq!(table.len(), 2);

        live.stop().await?;
        table.insert("done-3".to_string(), offline_session());
        assert!(!table.contains("live"));
        assert!(!table.contains("done-2"));
        assert!(table.contains("done-3"));

        Ok(())
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut table = SessionTable::new(4);
        let original = offline_session();

        assert!(table.insert("cam".to_string(), Arc::clone(&original)));
        assert!(!table.insert("cam".to_string(), offline_session()));

        assert_eq!(table.len(), 1);
        assert!(table
            .get("cam")
            .is_some_and(|s| Arc::ptr_eq(&s, &original)));
    }

    #[test]
    fn test_default_limit_from_config() {
        let state = AppState::default();
        let limit = state.config.service.http.retained_sessions;
        assert_eq!(limit, 64);
    }
}
