use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{StatusStore, StoreError};
use crate::domain::order::{Order, OrderId};

// ============================================================================
// Redis Status Store
// ============================================================================
//
// One JSON document per order under `{prefix}{order_id}`. SET and GET are
// single commands, so each key is read and written atomically.
//
// ============================================================================

pub struct RedisStatusStore {
    connection: MultiplexedConnection,
    key_prefix: String,
}

impl RedisStatusStore {
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(backend)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)?;

        tracing::info!(url = %url, "Connected to Redis status store");

        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
        })
    }

    fn key(&self, id: &OrderId) -> String {
        record_key(&self.key_prefix, id)
    }
}

fn record_key(prefix: &str, id: &OrderId) -> String {
    format!("{}{}", prefix, id)
}

fn backend(error: redis::RedisError) -> StoreError {
    StoreError::Backend(error.to_string())
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn put(&self, order: &Order) -> Result<(), StoreError> {
        let key = self.key(&order.id);
        let payload = serde_json::to_string(order).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let mut connection = self.connection.clone();
        connection
            .set::<_, _, ()>(&key, payload)
            .await
            .map_err(backend)?;

        tracing::debug!(key = %key, status = %order.status, "Stored order record");
        Ok(())
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let key = self.key(id);
        let mut connection = self.connection.clone();
        let payload: Option<String> = connection.get(&key).await.map_err(backend)?;

        payload
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
