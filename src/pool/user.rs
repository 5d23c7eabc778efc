//! Per-user connection pools
//!
//! On-demand pools of provider connections, keyed by tenant id. Pools are
//! cached between lookups, evicted LRU when the table is at capacity, and
//! reclaimed by a periodic idle-TTL sweep. Creation is serialized per tenant
//! so two concurrent lookups for the same uninitialized tenant cannot both
//! connect and leak the loser's connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{TransportConfig, UserServerConfig};
use crate::connection::{connect_all, ConnectedServer, Connector, ToolDescriptor};

/// Tuning knobs for the per-user pool table
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of tenant pools held at once
    pub capacity: usize,

    /// Idle time after which a pool is reclaimed by the sweep
    pub idle_ttl: Duration,

    /// Interval between background eviction sweeps
    pub sweep_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            capacity: 200,
            idle_ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// One tenant's live pool entry
struct TenantPool {
    servers: Vec<Arc<ConnectedServer>>,
    tools: Vec<ToolDescriptor>,
    tool_to_server: HashMap<String, Arc<ConnectedServer>>,
    last_used_at: Instant,
}

impl TenantPool {
    fn from_servers(servers: Vec<Arc<ConnectedServer>>) -> Self {
        let mut tools = Vec::new();
        let mut tool_to_server = HashMap::new();
        for server in &servers {
            for tool in server.tools() {
                tools.push(tool.clone());
                tool_to_server.insert(tool.name.clone(), server.clone());
            }
        }
        Self {
            servers,
            tools,
            tool_to_server,
            last_used_at: Instant::now(),
        }
    }

    /// Close every contained connection, best-effort
    async fn close_all(&self) {
        for server in &self.servers {
            server.close().await;
        }
    }
}

/// Manages the per-tenant pool table
pub struct UserPoolManager {
    options: PoolOptions,
    connector: Arc<dyn Connector>,
    pools: Arc<RwLock<HashMap<String, TenantPool>>>,

    /// In-flight creation locks, keyed by tenant id
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    sweep_cancel: CancellationToken,
    sweeper: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UserPoolManager {
    /// Create a manager with the given connector and options
    pub fn new(connector: Arc<dyn Connector>, options: PoolOptions) -> Self {
        Self {
            options,
            connector,
            pools: Arc::new(RwLock::new(HashMap::new())),
            creating: Mutex::new(HashMap::new()),
            sweep_cancel: CancellationToken::new(),
            sweeper: std::sync::Mutex::new(None),
        }
    }

    /// Get (building if necessary) the tenant's namespaced tool list.
    ///
    /// A cached pool is returned as-is with its `last_used_at` refreshed; no
    /// reconnection happens until the pool is invalidated or evicted. A
    /// tenant with no enabled configs still caches an empty pool so repeated
    /// empty lookups don't reconnect.
    pub async fn tools_for_tenant(
        &self,
        tenant_id: &str,
        configs: &[UserServerConfig],
    ) -> Vec<ToolDescriptor> {
        if let Some(tools) = self.touch(tenant_id).await {
            return tools;
        }

        // Serialize pool creation per tenant: concurrent lookups for the
        // same uninitialized tenant would otherwise both connect, and the
        // loser's connections would leak untracked.
        //
        // The entry may be retired and replaced while a waiter sleeps on it
        // (build finishes, pool gets invalidated, a new caller installs a
        // fresh lock), so after acquiring we verify the held lock is still
        // the tenant's current entry and start over if it is not.
        let (_guard, lock) = loop {
            let lock = {
                let mut creating = self.creating.lock().await;
                creating
                    .entry(tenant_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(())))
                    .clone()
            };
            let guard = lock.clone().lock_owned().await;

            let current = self.creating.lock().await.get(tenant_id).cloned();
            match current {
                Some(current) if Arc::ptr_eq(&current, &lock) => break (guard, lock),
                _ => continue,
            }
        };

        // A concurrent caller may have built the pool while we waited
        if let Some(tools) = self.touch(tenant_id).await {
            return tools;
        }

        let targets: Vec<(String, TransportConfig)> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| {
                (
                    c.name.clone(),
                    TransportConfig::Http {
                        url: c.url.clone(),
                        headers: c.headers.clone(),
                    },
                )
            })
            .collect();

        let servers = if targets.is_empty() {
            Vec::new()
        } else {
            connect_all(targets, self.connector.clone()).await
        };

        let pool = TenantPool::from_servers(servers);
        let tools = pool.tools.clone();

        tracing::info!(
            "[UserPoolManager] Built pool for tenant '{}' with {} server(s), {} tool(s)",
            tenant_id,
            pool.servers.len(),
            tools.len()
        );

        {
            let mut pools = self.pools.write().await;
            if pools.len() >= self.options.capacity && !pools.contains_key(tenant_id) {
                Self::evict_lru(&mut pools);
            }
            // A pool may have slipped in while this build was in flight;
            // close the displaced entry instead of dropping it unclosed
            if let Some(displaced) = pools.insert(tenant_id.to_string(), pool) {
                tokio::spawn(async move {
                    displaced.close_all().await;
                });
            }
        }

        // Retire the creation entry only if it is still ours; a waiter that
        // lost the revalidation race may already have installed a new one
        {
            let mut creating = self.creating.lock().await;
            if creating
                .get(tenant_id)
                .is_some_and(|current| Arc::ptr_eq(current, &lock))
            {
                creating.remove(tenant_id);
            }
        }
        tools
    }

    /// Return the cached tool list if the tenant has a live pool, refreshing
    /// its `last_used_at`
    async fn touch(&self, tenant_id: &str) -> Option<Vec<ToolDescriptor>> {
        let mut pools = self.pools.write().await;
        let pool = pools.get_mut(tenant_id)?;
        pool.last_used_at = Instant::now();
        Some(pool.tools.clone())
    }

    /// Remove the entry with the oldest `last_used_at`, closing it in the
    /// background
    fn evict_lru(pools: &mut HashMap<String, TenantPool>) {
        let oldest = pools
            .iter()
            .min_by_key(|(_, pool)| pool.last_used_at)
            .map(|(tenant, _)| tenant.clone());

        if let Some(tenant) = oldest {
            if let Some(evicted) = pools.remove(&tenant) {
                tracing::info!("[UserPoolManager] Evicting LRU pool for tenant '{}'", tenant);
                tokio::spawn(async move {
                    evicted.close_all().await;
                });
            }
        }
    }

    /// Resolve a namespaced tool for a tenant, refreshing the pool's
    /// `last_used_at`
    pub async fn server_for_tool(
        &self,
        tenant_id: &str,
        namespaced: &str,
    ) -> Option<Arc<ConnectedServer>> {
        let mut pools = self.pools.write().await;
        let pool = pools.get_mut(tenant_id)?;
        pool.last_used_at = Instant::now();
        pool.tool_to_server.get(namespaced).cloned()
    }

    /// Tear down the tenant's pool so the next lookup reconnects with fresh
    /// config. Idempotent; mandatory after any mutation to the tenant's
    /// server configuration.
    pub async fn invalidate_tenant(&self, tenant_id: &str) {
        let removed = self.pools.write().await.remove(tenant_id);
        if let Some(pool) = removed {
            tracing::info!("[UserPoolManager] Invalidated pool for tenant '{}'", tenant_id);
            pool.close_all().await;
        }
    }

    /// Number of live tenant pools
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Start the periodic idle-TTL eviction sweep.
    ///
    /// The sweep decides evictions synchronously, then triggers closes that
    /// are fire-and-forget relative to the sweep itself. Cancelled by
    /// `shutdown`.
    pub fn start_sweeper(&self) {
        let pools = self.pools.clone();
        let ttl = self.options.idle_ttl;
        let interval = self.options.sweep_interval;
        let token = self.sweep_cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => Self::sweep(&pools, ttl).await,
                }
            }
        });

        *self.sweeper.lock().unwrap() = Some(handle);
    }

    /// Run a single eviction sweep immediately
    pub async fn sweep_once(&self) {
        Self::sweep(&self.pools, self.options.idle_ttl).await;
    }

    async fn sweep(pools: &RwLock<HashMap<String, TenantPool>>, ttl: Duration) {
        let expired: Vec<(String, TenantPool)> = {
            let mut pools = pools.write().await;
            let now = Instant::now();
            let dead: Vec<String> = pools
                .iter()
                .filter(|(_, pool)| now.duration_since(pool.last_used_at) > ttl)
                .map(|(tenant, _)| tenant.clone())
                .collect();
            dead.into_iter()
                .filter_map(|tenant| pools.remove(&tenant).map(|pool| (tenant, pool)))
                .collect()
        };

        for (tenant, pool) in expired {
            tracing::info!("[UserPoolManager] Evicting idle pool for tenant '{}'", tenant);
            // Each close runs in its own task and swallows its own failure
            tokio::spawn(async move {
                pool.close_all().await;
            });
        }
    }

    /// Cancel the sweeper and close every tenant pool, best-effort
    pub async fn shutdown(&self) {
        self.sweep_cancel.cancel();
        let handle = self.sweeper.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }

        let drained: Vec<TenantPool> = {
            let mut pools = self.pools.write().await;
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in drained {
            pool.close_all().await;
        }
    }
}
