//! One logical broker client per trading account (spec §4.3).

mod client;
mod pool;

pub use client::{
    BrokerApi, BrokerClient, BrokerGttRequest, BrokerGttResponse, BrokerOrderRequest,
    BrokerOrderResponse, BrokerOrderView,
};
pub use pool::{BrokerClientPool, BrokerPool};

/// A scriptable `BrokerApi`/`BrokerPool` pair so order/GTT/reconciliation
/// tests run without a live broker HTTP server.
#[cfg(test)]
pub mod test_support {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{
        BrokerApi, BrokerGttRequest, BrokerGttResponse, BrokerOrderRequest, BrokerOrderResponse,
        BrokerOrderView, BrokerPool,
    };

    #[derive(Default)]
    pub struct MockBroker {
        pub placed: Mutex<Vec<BrokerOrderRequest>>,
        pub cancelled: Mutex<Vec<String>>,
        pub place_result: Mutex<Option<std::result::Result<BrokerOrderResponse, String>>>,
        pub list_orders_result: Mutex<Vec<BrokerOrderView>>,
    }

    impl MockBroker {
        pub fn returning_order_id(id: &str) -> Self {
            let broker = Self::default();
            *broker.place_result.lock() = Some(Ok(BrokerOrderResponse {
                broker_order_id: id.to_string(),
            }));
            broker
        }

        pub fn rejecting(message: &str) -> Self {
            let broker = Self::default();
            *broker.place_result.lock() = Some(Err(message.to_string()));
            broker
        }
    }

    #[async_trait]
    impl BrokerApi for MockBroker {
        async fn place_order(&self, req: &BrokerOrderRequest) -> Result<BrokerOrderResponse> {
            self.placed.lock().push(req.clone());
            match self.place_result.lock().take() {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Ok(BrokerOrderResponse {
                    broker_order_id: "MOCK-ORDER-1".into(),
                }),
            }
        }

        async fn modify_order(&self, _broker_order_id: &str, _req: &BrokerOrderRequest) -> Result<()> {
            Ok(())
        }

        async fn cancel_order(&self, broker_order_id: &str) -> Result<()> {
            self.cancelled.lock().push(broker_order_id.to_string());
            Ok(())
        }

        async fn list_orders(&self) -> Result<Vec<BrokerOrderView>> {
            Ok(self.list_orders_result.lock().clone())
        }

        async fn place_gtt(&self, _req: &BrokerGttRequest) -> Result<BrokerGttResponse> {
            Ok(BrokerGttResponse {
                broker_gtt_id: "MOCK-GTT-1".into(),
            })
        }

        async fn modify_gtt(&self, _broker_gtt_id: &str, _req: &BrokerGttRequest) -> Result<()> {
            Ok(())
        }

        async fn cancel_gtt(&self, _broker_gtt_id: &str) -> Result<()> {
            Ok(())
        }
    }

    /// Hands the same mock broker out for every trading account.
    pub struct SingleBrokerPool(pub Arc<dyn BrokerApi>);

    impl SingleBrokerPool {
        pub fn new(broker: MockBroker) -> Arc<dyn BrokerPool> {
            Arc::new(Self(Arc::new(broker)))
        }
    }

    impl BrokerPool for SingleBrokerPool {
        fn get(&self, _trading_account_id: i64) -> Arc<dyn BrokerApi> {
            self.0.clone()
        }
    }
}
