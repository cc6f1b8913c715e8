use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clients::TokenAccountClient;

use super::client::{BrokerApi, BrokerClient};

/// Resolves the broker client for a trading account. Abstracted so
/// `OrderEngine`/`GttEngine`/`ReconciliationWorker` can be built against a
/// fake pool in tests instead of a real `BrokerClientPool` making HTTP
/// calls (spec §4.3).
pub trait BrokerPool: Send + Sync {
    fn get(&self, trading_account_id: i64) -> Arc<dyn BrokerApi>;
}

/// Caches one `Arc<BrokerClient>` per account, built lazily on first use
/// (spec §4.3, §5: "one logical client per account but the process may hold
/// many of them").
pub struct BrokerClientPool {
    http: reqwest::Client,
    base_url: String,
    token_account_client: Arc<TokenAccountClient>,
    timeout: std::time::Duration,
    clients: RwLock<HashMap<i64, Arc<BrokerClient>>>,
}

impl BrokerClientPool {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        token_account_client: Arc<TokenAccountClient>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            token_account_client,
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn get_client(&self, trading_account_id: i64) -> Arc<BrokerClient> {
        if let Some(client) = self.clients.read().get(&trading_account_id).cloned() {
            return client;
        }

        let mut clients = self.clients.write();
        clients
            .entry(trading_account_id)
            .or_insert_with(|| {
                Arc::new(BrokerClient::new(
                    self.http.clone(),
                    self.base_url.clone(),
                    trading_account_id,
                    self.token_account_client.clone(),
                    self.timeout,
                ))
            })
            .clone()
    }
}

impl BrokerPool for BrokerClientPool {
    fn get(&self, trading_account_id: i64) -> Arc<dyn BrokerApi> {
        self.get_client(trading_account_id)
    }
}
