use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectConfig;
use crate::error::{Result, WickError};
use crate::local::{LocalConnector, LOCAL_SCHEME};
use crate::session::{Connector, Session};
use crate::wamp::WampConnector;

/// Picks the session implementation from the URL scheme: `local://` joins
/// an in-process router, `ws://`, `wss://`, `tcp://` and `tcps://` reach a
/// real one.
#[derive(Default)]
pub struct UrlConnector {
    local: LocalConnector,
    wamp: WampConnector,
}

impl UrlConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> &LocalConnector {
        &self.local
    }
}

#[async_trait]
impl Connector for UrlConnector {
    async fn connect(&self, config: &ConnectConfig) -> Result<Arc<dyn Session>> {
        if config.url.starts_with(LOCAL_SCHEME) {
            self.local.connect(config).await
        } else if WampConnector::accepts(&config.url) {
            self.wamp.connect(config).await
        } else {
            Err(WickError::UnsupportedTransport(config.url.clone()))
        }
    }
}
