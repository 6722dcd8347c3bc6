//! Tenant registry with durable storage.
//!
//! The registry owns all tenant records. Every mutation is persisted to the
//! blob store before it is acknowledged, so a restart never loses an
//! acknowledged create/update/delete. Mutations on one slug are serialized
//! by a per-slug lock; unrelated slugs proceed concurrently.

use super::{Tenant, TenantQuotas, TenantUpdate};
use crate::error::{Result, StackdError};
use crate::locks::KeyedLocks;
use crate::store::BlobStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

const KEY_PREFIX: &str = "tenant/";

fn tenant_key(slug: &str) -> String {
    format!("{}{}", KEY_PREFIX, slug)
}

/// Durable mapping from tenant slug to tenant record.
pub struct TenantRegistry {
    store: Arc<dyn BlobStore>,
    tenants: RwLock<HashMap<String, Tenant>>,
    locks: KeyedLocks,
}

impl TenantRegistry {
    /// Create a registry over a blob store and hydrate it from disk.
    pub async fn load(store: Arc<dyn BlobStore>) -> Result<Self> {
        let registry =
            Self { store, tenants: RwLock::new(HashMap::new()), locks: KeyedLocks::new() };
        registry.hydrate().await?;
        Ok(registry)
    }

    /// Load all persisted tenants into the in-memory map.
    async fn hydrate(&self) -> Result<()> {
        let keys = self.store.list_keys(KEY_PREFIX).await?;
        let mut tenants = self.tenants.write().await;

        for key in keys {
            let Some(blob) = self.store.get(&key).await? else { continue };
            match serde_json::from_slice::<Tenant>(&blob) {
                Ok(tenant) => {
                    tenants.insert(tenant.slug.clone(), tenant);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping undecodable tenant record");
                }
            }
        }

        info!(count = tenants.len(), "Loaded tenants from store");
        Ok(())
    }

    /// Create a new tenant.
    #[instrument(skip(self, quotas), fields(slug = %slug))]
    pub async fn create(
        &self,
        name: &str,
        slug: &str,
        description: &str,
        quotas: TenantQuotas,
    ) -> Result<Tenant> {
        let _guard = self.locks.acquire(slug).await;

        if self.tenants.read().await.contains_key(slug) {
            return Err(StackdError::DuplicateTenant { slug: slug.to_string() });
        }

        let tenant = Tenant::new(name, slug, description, quotas);
        self.persist(&tenant).await?;
        self.tenants.write().await.insert(slug.to_string(), tenant.clone());

        info!(tenant_id = %tenant.id, "Tenant created");
        Ok(tenant)
    }

    /// Get a tenant by slug.
    pub async fn get(&self, slug: &str) -> Result<Tenant> {
        self.tenants
            .read()
            .await
            .get(slug)
            .cloned()
            .ok_or_else(|| StackdError::TenantNotFound { slug: slug.to_string() })
    }

    /// List tenants, optionally only the active ones. Order is unspecified.
    pub async fn list(&self, active_only: bool) -> Vec<Tenant> {
        self.tenants
            .read()
            .await
            .values()
            .filter(|t| !active_only || t.active)
            .cloned()
            .collect()
    }

    /// Apply a partial update to a tenant.
    ///
    /// Identity fields cannot appear in [`TenantUpdate`]; `updated_at`
    /// advances on every successful call.
    #[instrument(skip(self, update), fields(slug = %slug))]
    pub async fn update(&self, slug: &str, update: TenantUpdate) -> Result<Tenant> {
        let _guard = self.locks.acquire(slug).await;

        let mut tenant = self.get(slug).await?;
        update.apply(&mut tenant);

        self.persist(&tenant).await?;
        self.tenants.write().await.insert(slug.to_string(), tenant.clone());

        Ok(tenant)
    }

    /// Delete a tenant. Returns whether a record existed.
    ///
    /// This is a pure registry operation; the live-deployments guard lives in
    /// [`DeploymentManager::delete_tenant`](crate::deployment::DeploymentManager::delete_tenant).
    #[instrument(skip(self), fields(slug = %slug))]
    pub async fn delete(&self, slug: &str) -> Result<bool> {
        let _guard = self.locks.acquire(slug).await;

        if !self.tenants.read().await.contains_key(slug) {
            return Ok(false);
        }

        self.store.delete(&tenant_key(slug)).await?;
        self.tenants.write().await.remove(slug);

        info!("Tenant deleted");
        Ok(true)
    }

    async fn persist(&self, tenant: &Tenant) -> Result<()> {
        let blob = serde_json::to_vec(tenant)
            .map_err(|e| StackdError::Store(format!("Failed to serialize tenant: {}", e)))?;
        self.store.put(&tenant_key(&tenant.slug), &blob).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn test_registry() -> TenantRegistry {
        let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
        TenantRegistry::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let registry = test_registry().await;

        let created = registry
            .create("Acme Corp", "acme", "widgets", TenantQuotas::default())
            .await
            .unwrap();

        let fetched = registry.get("acme").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let registry = test_registry().await;

        registry.create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
        let err = registry.create("Acme 2", "acme", "", TenantQuotas::default()).await.unwrap_err();
        assert!(matches!(err, StackdError::DuplicateTenant { slug } if slug == "acme"));
    }

    #[tokio::test]
    async fn test_get_missing_tenant() {
        let registry = test_registry().await;
        let err = registry.get("ghost").await.unwrap_err();
        assert!(matches!(err, StackdError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_active_only() {
        let registry = test_registry().await;

        registry.create("A", "a", "", TenantQuotas::default()).await.unwrap();
        registry.create("B", "b", "", TenantQuotas::default()).await.unwrap();
        registry
            .update("b", TenantUpdate { active: Some(false), ..TenantUpdate::default() })
            .await
            .unwrap();

        assert_eq!(registry.list(false).await.len(), 2);
        let active = registry.list(true).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].slug, "a");
    }

    #[tokio::test]
    async fn test_update_bumps_updated_at() {
        let registry = test_registry().await;

        let created = registry.create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
        let updated = registry
            .update(
                "acme",
                TenantUpdate { description: Some("new".to_string()), ..TenantUpdate::default() },
            )
            .await
            .unwrap();

        assert_eq!(updated.description, "new");
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.id, created.id);
    }

    #[tokio::test]
    async fn test_update_missing_tenant() {
        let registry = test_registry().await;
        let err = registry.update("ghost", TenantUpdate::default()).await.unwrap_err();
        assert!(matches!(err, StackdError::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let registry = test_registry().await;

        registry.create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
        assert!(registry.delete("acme").await.unwrap());
        assert!(!registry.delete("acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_acknowledged_writes_survive_reload() {
        let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());

        let created = {
            let registry = TenantRegistry::load(store.clone()).await.unwrap();
            registry.create("Acme", "acme", "widgets", TenantQuotas::default()).await.unwrap()
        };

        let registry = TenantRegistry::load(store).await.unwrap();
        let fetched = registry.get("acme").await.unwrap();
        assert_eq!(fetched, created);
    }
}
