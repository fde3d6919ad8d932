use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StatusStore, StoreError};
use crate::domain::order::{Order, OrderId};

/// Process-local store. `set_available(false)` simulates an outage.
#[derive(Default)]
pub struct InMemoryStatusStore {
    orders: RwLock<HashMap<OrderId, Order>>,
    unavailable: AtomicBool,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> Vec<Order> {
        self.orders.read().await.values().cloned().collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("in-memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn put(&self, order: &Order) -> Result<(), StoreError> {
        self.check_available()?;
        self.orders.write().await.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.check_available()?;
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderDetails, OrderStatus};
    use rust_decimal_macros::dec;

    fn order(id: &str) -> Order {
        Order::receive(
            OrderId::from(id),
            OrderDetails {
                customer_name: "Ana".to_string(),
                items: vec!["Pizza".to_string()],
                total: dec!(10),
            },
        )
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = InMemoryStatusStore::new();
        let order = order("a");
        store.put(&order).await.unwrap();

        assert_eq!(store.get(&order.id).await.unwrap(), Some(order));
        assert_eq!(store.get(&OrderId::from("missing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = InMemoryStatusStore::new();
        let mut order = order("a");
        store.put(&order).await.unwrap();
        order.start_processing().unwrap();
        store.put(&order).await.unwrap();

        let stored = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_outage_fails_every_operation() {
        let store = InMemoryStatusStore::new();
        store.set_available(false);

        assert!(store.put(&order("a")).await.is_err());
        assert!(store.get(&OrderId::from("a")).await.is_err());
        assert!(store.ping().await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
        assert_eq!(store.len().await, 0);
    }
}
