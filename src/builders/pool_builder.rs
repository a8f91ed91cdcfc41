//! Builders to construct pools and queues from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::core::{
    LifecycleError, PoolTimerEvent, ResourceAdapter, ResourcePool, TimeoutScheduler,
};
use crate::infra::BoundedQueue;

/// Build one resource pool per configured entry, all driven by the same
/// scheduler, using `adapter_factory` to supply each pool's adapter.
///
/// # Errors
///
/// Propagates validation failures as [`LifecycleError::CreateFailed`] and
/// any error from the adapter factory.
pub fn build_pools<A, F>(
    cfg: &CoreConfig,
    scheduler: &Arc<TimeoutScheduler<PoolTimerEvent>>,
    mut adapter_factory: F,
) -> Result<HashMap<String, ResourcePool<A>>, LifecycleError>
where
    A: ResourceAdapter,
    F: FnMut(&str) -> Result<A, LifecycleError>,
{
    cfg.validate()
        .map_err(|e| LifecycleError::CreateFailed(format!("config invalid: {e}")))?;

    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        let adapter = adapter_factory(name)?;
        let pool = ResourcePool::new(
            name.clone(),
            adapter,
            Arc::clone(scheduler),
            pool_cfg.to_settings(),
        );
        pools.insert(name.clone(), pool);
    }

    Ok(pools)
}

/// Build one bounded queue per configured entry.
///
/// # Errors
///
/// Propagates validation failures as [`LifecycleError::CreateFailed`].
pub fn build_queues<T>(
    cfg: &CoreConfig,
) -> Result<HashMap<String, BoundedQueue<T>>, LifecycleError> {
    cfg.validate()
        .map_err(|e| LifecycleError::CreateFailed(format!("config invalid: {e}")))?;

    let mut queues = HashMap::new();
    for (name, queue_cfg) in &cfg.queues {
        let policy = queue_cfg.on_overflow.to_policy(name);
        queues.insert(
            name.clone(),
            BoundedQueue::new(name.clone(), queue_cfg.max_entries, policy),
        );
    }

    Ok(queues)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAdapter;

    impl ResourceAdapter for NoopAdapter {
        type Resource = ();

        fn create(&self, _id: &str) -> Result<(), LifecycleError> {
            Ok(())
        }
    }

    #[test]
    fn builds_one_pool_per_config_entry() {
        let cfg = CoreConfig::from_json_str(
            r#"{
                "pools": {
                    "session": { "max_instances": 4 },
                    "connection": { "max_instances": 2, "busy_to_idle_timeout_ms": 5000 }
                }
            }"#,
        )
        .unwrap();
        let scheduler = Arc::new(TimeoutScheduler::new("builder-test"));
        let pools = build_pools(&cfg, &scheduler, |_| Ok(NoopAdapter)).unwrap();
        assert_eq!(pools.len(), 2);
        assert!(pools.contains_key("session"));
        pools["connection"].reserve().unwrap();
        assert_eq!(pools["connection"].num_busy(), 1);
    }

    #[test]
    fn builds_queues_with_configured_policy() {
        let cfg = CoreConfig::from_json_str(
            r#"{ "queues": { "cb": { "max_entries": 2, "on_overflow": "discard" } } }"#,
        )
        .unwrap();
        let queues = build_queues::<u32>(&cfg).unwrap();
        let q = &queues["cb"];
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.num_lost(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = CoreConfig {
            pools: HashMap::from([(
                "bad".to_string(),
                crate::config::PoolConfig {
                    max_instances: 0,
                    busy_to_idle_timeout_ms: 0,
                    idle_to_erase_timeout_ms: 0,
                },
            )]),
            queues: HashMap::new(),
        };
        let scheduler = Arc::new(TimeoutScheduler::new("builder-test"));
        let err = build_pools(&cfg, &scheduler, |_| Ok(NoopAdapter)).unwrap_err();
        assert!(matches!(err, LifecycleError::CreateFailed(_)));
    }
}
