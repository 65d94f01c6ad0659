use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::agent::{Agent, ScriptedAgent};
use crate::core::pipeline::StageComposer;

/// Application state shared across handlers.
///
/// Pipelines are per-session; the state holds what they are built from: the
/// configuration, the stage composer and the agent seam. The default agent is
/// the scripted one; embedders swap in their own through `with_agent`.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub composer: Arc<StageComposer>,
    pub agent: Arc<dyn Agent>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            composer: Arc::new(StageComposer::new()),
            agent: Arc::new(ScriptedAgent::default()),
        })
    }

    pub fn with_agent(config: ServerConfig, agent: Arc<dyn Agent>) -> Arc<Self> {
        Arc::new(Self {
            config,
            composer: Arc::new(StageComposer::new()),
            agent,
        })
    }
}
