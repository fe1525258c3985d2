use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Leader-local cache of `monitor_id -> interval_seconds`.
///
/// Lets the refresh loop tell new and re-intervalled monitors apart from
/// unchanged ones without reading the state store.
#[derive(Debug, Default)]
pub struct SchedulerState {
    intervals: RwLock<HashMap<String, i64>>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn interval(&self, id: &str) -> Option<i64> {
        self.intervals.read().await.get(id).copied()
    }

    /// Returns the previous interval
    pub async fn set(&self, id: &str, interval: i64) -> Option<i64> {
        self.intervals.write().await.insert(id.to_string(), interval)
    }

    pub async fn remove(&self, id: &str) -> Option<i64> {
        self.intervals.write().await.remove(id)
    }

    pub async fn replace(&self, intervals: HashMap<String, i64>) {
        *self.intervals.write().await = intervals;
    }

    pub async fn ids(&self) -> HashSet<String> {
        self.intervals.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.intervals.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.intervals.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_interval_changes() {
        let state = SchedulerState::new();
        assert_eq!(state.set("a", 60).await, None);
        assert_eq!(state.set("a", 30).await, Some(60));
        assert_eq!(state.interval("a").await, Some(30));

        state.replace(HashMap::from([("b".to_string(), 10)])).await;
        assert_eq!(state.interval("a").await, None);
        assert_eq!(state.ids().await, HashSet::from(["b".to_string()]));
        assert_eq!(state.remove("b").await, Some(10));
        assert!(state.is_empty().await);
    }
}
