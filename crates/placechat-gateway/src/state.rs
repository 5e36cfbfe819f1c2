//! Gateway shared state.

use std::sync::Arc;
use std::time::Duration;

use placechat_agent::ChatAgent;
use placechat_core::config::Config;
use placechat_core::session::SessionStore;
use placechat_tools::mcp::ToolConnector;

use crate::encoder::FrameOptions;

/// Shared gateway state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub agent: Arc<dyn ChatAgent>,
    pub connector: Arc<dyn ToolConnector>,
    pub frame_options: FrameOptions,
    pub turn_timeout: Duration,
}

impl GatewayState {
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<dyn SessionStore>,
        agent: Arc<dyn ChatAgent>,
        connector: Arc<dyn ToolConnector>,
    ) -> Self {
        let frame_options = FrameOptions {
            include_partial_flag: config.include_partial_flag(),
        };
        let turn_timeout = Duration::from_secs(config.turn_timeout_secs());
        Self {
            config,
            sessions,
            agent,
            connector,
            frame_options,
            turn_timeout,
        }
    }

    pub fn with_turn_timeout(mut self, turn_timeout: Duration) -> Self {
        self.turn_timeout = turn_timeout;
        self
    }
}
