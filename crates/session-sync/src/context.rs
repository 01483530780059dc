use std::sync::Arc;

use chess_core::RulesEngine;

use crate::config::SessionConfig;
use crate::opponent::OpponentMoveSource;
use crate::store::SessionStore;

/// Collaborators of a session, owned for the session's lifetime.
#[derive(Clone)]
pub struct SessionContext {
    pub rules: Arc<dyn RulesEngine>,
    pub store: Arc<dyn SessionStore>,
    /// `None` means both seats are played through `submit_move`
    pub opponent: Option<Arc<dyn OpponentMoveSource>>,
    pub config: SessionConfig,
}

impl SessionContext {
    pub fn new(rules: Arc<dyn RulesEngine>, store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            rules,
            store,
            opponent: None,
            config,
        }
    }

    pub fn with_opponent(mut self, opponent: Arc<dyn OpponentMoveSource>) -> Self {
        self.opponent = Some(opponent);
        self
    }
}
