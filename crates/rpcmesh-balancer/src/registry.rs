//! Service registry of live worker addresses

use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Round-robin set of worker addresses (`host:port`)
///
/// Every operation takes the same lock for a short splice, so `next` never observes a
/// half-applied `add` or `remove`.
pub struct ServiceRegistry {
    members: Mutex<VecDeque<String>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            members: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a member to the back. Returns false if it is already registered.
    pub async fn add(&self, address: impl Into<String>) -> bool {
        let address = address.into();
        let mut members = self.members.lock().await;
        if members.contains(&address) {
            debug!(address = %address, "Member already registered");
            return false;
        }

        members.push_back(address.clone());
        info!(address = %address, members = members.len(), "Registered worker");
        true
    }

    /// Select the next member in round-robin order
    pub async fn next(&self) -> Option<String> {
        let mut members = self.members.lock().await;
        let address = members.pop_front()?;
        members.push_back(address.clone());
        Some(address)
    }

    /// Remove the first member matching `address`
    pub async fn remove(&self, address: &str) -> bool {
        let mut members = self.members.lock().await;
        match members.iter().position(|m| m == address) {
            Some(index) => {
                members.remove(index);
                info!(address = %address, members = members.len(), "Removed worker");
                true
            }
            None => false,
        }
    }

    /// Current members in selection order
    pub async fn snapshot(&self) -> Vec<String> {
        self.members.lock().await.iter().cloned().collect()
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.members.lock().await.iter().any(|m| m == address)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
