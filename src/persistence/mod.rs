use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use crate::models::OrderRecord;
use crate::Result;

/// Destination for records of placed market orders
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn store_order(&self, account: &str, record: &OrderRecord) -> Result<()>;
}

/// Sink that discards everything
pub struct NullSink;

#[async_trait]
impl OrderSink for NullSink {
    async fn store_order(&self, account: &str, record: &OrderRecord) -> Result<()> {
        tracing::debug!("Order {} for {} not persisted (no sink)", record.id, account);
        Ok(())
    }
}

/// Redis store for order records
///
/// Each record is a JSON string at `orders:{account}:{id}`; the ids of an
/// account are kept in the set `orders:{account}`.
#[derive(Clone)]
pub struct RedisOrderStore {
    conn: ConnectionManager,
}

impl RedisOrderStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| crate::BotError::Timeout("Redis connection after 5 seconds".to_string()))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    fn record_key(account: &str, order_id: &str) -> String {
        format!("orders:{}:{}", account, order_id)
    }

    fn index_key(account: &str) -> String {
        format!("orders:{}", account)
    }

    #[cfg(test)]
    async fn load_order(&self, account: &str, order_id: &str) -> Result<Option<OrderRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::record_key(account, order_id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    #[cfg(test)]
    async fn order_ids(&self, account: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn.smembers(Self::index_key(account)).await?;
        ids.sort();
        Ok(ids)
    }

    /// Delete every stored order of an account, returns how many were removed
    #[cfg(test)]
    async fn clear_account(&self, account: &str) -> Result<usize> {
        let ids = self.order_ids(account).await?;
        let mut conn = self.conn.clone();
        for id in &ids {
            conn.del::<_, ()>(Self::record_key(account, id)).await?;
        }
        conn.del::<_, ()>(Self::index_key(account)).await?;
        Ok(ids.len())
    }
}

#[async_trait]
impl OrderSink for RedisOrderStore {
    async fn store_order(&self, account: &str, record: &OrderRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(record)?;

        let write = async {
            conn.set::<_, _, ()>(Self::record_key(account, &record.id), value)
                .await?;
            conn.sadd::<_, _, ()>(Self::index_key(account), &record.id)
                .await?;
            Ok::<(), crate::BotError>(())
        };
        timeout(Duration::from_secs(5), write).await.map_err(|_| {
            crate::BotError::Timeout(format!("Redis write of order {} after 5 seconds", record.id))
        })??;

        tracing::debug!("Stored order {} for {} in Redis", record.id, account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use serde_json::json;

    fn create_test_record(id: &str) -> OrderRecord {
        OrderRecord {
            id: id.to_string(),
            symbol: "BTCUSD".to_string(),
            side: Side::Buy,
            amount: 2.0,
            params: json!({ "time_in_force": "ioc" }),
            status: "closed".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_keys() {
        assert_eq!(RedisOrderStore::record_key("MAIN", "42"), "orders:MAIN:42");
        assert_eq!(RedisOrderStore::index_key("MAIN"), "orders:MAIN");
    }

    #[tokio::test]
    async fn test_null_sink_accepts_everything() {
        assert!(NullSink
            .store_order("MAIN", &create_test_record("1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_connection_timeout() {
        // Try to connect to non-existent Redis
        let result = RedisOrderStore::new("redis://192.0.2.1:6379").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_store_and_load_order() {
        let store = RedisOrderStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");

        // Clean up first
        let _ = store.clear_account("TEST_STORE").await;

        store
            .store_order("TEST_STORE", &create_test_record("100"))
            .await
            .unwrap();
        store
            .store_order("TEST_STORE", &create_test_record("101"))
            .await
            .unwrap();

        let loaded = store.load_order("TEST_STORE", "100").await.unwrap().unwrap();
        assert_eq!(loaded, create_test_record("100"));
        assert_eq!(store.order_ids("TEST_STORE").await.unwrap(), vec!["100", "101"]);

        // Cleanup
        assert_eq!(store.clear_account("TEST_STORE").await.unwrap(), 2);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_missing_order() {
        let store = RedisOrderStore::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");

        let loaded = store.load_order("NONEXISTENT", "1").await.unwrap();
        assert!(loaded.is_none());
    }
}
