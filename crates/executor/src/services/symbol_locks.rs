use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per symbol, created on first use.
#[derive(Clone, Default)]
pub struct SymbolLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every listed symbol in sorted order, so two callers can never wait on each other.
    /// The locks are released when the returned guards are dropped.
    pub async fn acquire(&self, symbols: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys: Vec<&str> = symbols.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let mutexes: Vec<Arc<Mutex<()>>> = {
            let mut map = self.inner.lock().await;
            keys.iter()
                .map(|k| map.entry(k.to_string()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_symbol_is_exclusive() {
        let locks = SymbolLocks::new();
        let held = locks.acquire(&["USD", "BTC-USD"]).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move { contender.acquire(&["BTC-USD"]).await.len() });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        drop(held);
        assert_eq!(waiting.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_symbols_do_not_block_and_duplicates_collapse() {
        let locks = SymbolLocks::new();
        let _eth = locks.acquire(&["ETH-USD"]).await;
        let btc = tokio::time::timeout(Duration::from_secs(1), locks.acquire(&["BTC-USD", "BTC-USD"]))
            .await
            .unwrap();
        assert_eq!(btc.len(), 1);
    }
}
