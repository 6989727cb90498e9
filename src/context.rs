//! Application context built once at startup.

use std::sync::Arc;

use tracing::info;

use crate::config::TurnstileConfig;
use crate::error::Result;
use crate::ratelimit::{Clock, Dispatcher, SystemClock};
use crate::store::{BreakerState, CircuitBreaker, DistributedLock, RedisStore, Store, StoreClient};

/// Name given to the breaker guarding the shared store.
const STORE_BREAKER: &str = "store";

/// Everything a request handler needs, wired from configuration.
///
/// Constructed once and shared by reference; there is no global client.
pub struct AppContext {
    config: TurnstileConfig,
    dispatcher: Dispatcher,
}

impl AppContext {
    /// Connect to the configured Redis server and wire the components.
    pub async fn connect(config: TurnstileConfig) -> Result<Self> {
        let url = config.store.url();
        let store = RedisStore::connect(&url).await?;
        info!(addr = %config.store.addr, "Connected to shared store");
        Ok(Self::with_store(config, Arc::new(store), Arc::new(SystemClock)))
    }

    /// Wire the components over an existing store.
    pub fn with_store(config: TurnstileConfig, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            STORE_BREAKER,
            config.breaker.failure_threshold,
            config.breaker.cool_down(),
        ));
        let client = StoreClient::new(store, breaker, config.store.call_timeout());
        let lock = DistributedLock::new(client.clone());
        let dispatcher = Dispatcher::new(client, lock, clock, config.lock.ttl());

        Self { config, dispatcher }
    }

    pub fn config(&self) -> &TurnstileConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.dispatcher.client().breaker_state()
    }
}
