use std::time::Duration;

use crate::transport::RECONNECT_DELAY;

/// Library configuration supplied by the embedding application. Page
/// sizes follow the server's conventions (20 conversations, 30
/// messages per page).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    pub conversation_page_size: usize,
    pub message_page_size: usize,
    pub notification_page_size: usize,
    /// Fixed delay between reconnect attempts after an unexpected close.
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ws_url: ws_url.into(),
            conversation_page_size: 20,
            message_page_size: 30,
            notification_page_size: 20,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}
