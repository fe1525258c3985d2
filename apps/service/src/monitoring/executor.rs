use std::sync::Arc;

use uppe_scheduler::ExecutorRegistry;

use super::checker::{HttpChecker, PushChecker, TcpChecker};

/// Registry with every executor this binary knows about
///
/// `http-keyword` and `http-json-query` resolve to the HTTP checker through
/// the registry's `http` fallback.
pub fn build_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry
        .register("http", Arc::new(HttpChecker))
        .register("tcp", Arc::new(TcpChecker))
        .register("push", Arc::new(PushChecker));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_shipped_types() {
        let registry = build_registry();
        for monitor_type in ["http", "http-keyword", "http-json-query", "tcp", "push"] {
            assert!(registry.get(monitor_type).is_some(), "missing {}", monitor_type);
        }
        assert!(registry.get("dns").is_none());
    }
}
