//! Per-tenant quota admission control.
//!
//! Admission is a two-phase lease: [`QuotaEnforcer::check_and_reserve`]
//! atomically checks live usage plus in-flight reservations and, if the
//! request fits, records a reservation. The caller commits it once the
//! deployment is confirmed in the tracker, or releases it on failure. A
//! reservation that is neither committed nor released expires after a TTL
//! so a crashed operation cannot pin quota forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::deployment::DeploymentTracker;
use crate::error::{Result, StackdError};
use crate::locks::KeyedLocks;
use crate::tenant::TenantRegistry;

/// Default lease lifetime. Long enough to cover a slow runtime call with
/// retries, short enough that abandoned leases free up quickly.
pub const DEFAULT_RESERVATION_TTL: Duration = Duration::from_secs(120);

/// Handle for a granted quota lease.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: Uuid,
    pub tenant_slug: String,
    pub containers: u32,
}

#[derive(Debug)]
struct LedgerEntry {
    tenant_slug: String,
    containers: u32,
    expires_at: Instant,
}

/// Admission controller over tenant quotas.
pub struct QuotaEnforcer {
    registry: Arc<TenantRegistry>,
    tracker: Arc<DeploymentTracker>,
    tenant_locks: KeyedLocks,
    ledger: Mutex<HashMap<Uuid, LedgerEntry>>,
    ttl: Duration,
}

impl QuotaEnforcer {
    pub fn new(registry: Arc<TenantRegistry>, tracker: Arc<DeploymentTracker>) -> Self {
        Self::with_ttl(registry, tracker, DEFAULT_RESERVATION_TTL)
    }

    pub fn with_ttl(
        registry: Arc<TenantRegistry>,
        tracker: Arc<DeploymentTracker>,
        ttl: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            tenant_locks: KeyedLocks::new(),
            ledger: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn prune_expired(ledger: &mut HashMap<Uuid, LedgerEntry>) {
        let now = Instant::now();
        ledger.retain(|id, entry| {
            let live = entry.expires_at > now;
            if !live {
                warn!(reservation = %id, tenant = %entry.tenant_slug, "quota reservation expired");
                metrics::counter!("stackd_quota_reservations_expired_total").increment(1);
            }
            live
        });
    }

    /// Check whether one more deployment with `containers` containers fits
    /// within the tenant's quotas and reserve it if so.
    ///
    /// The check and the reservation happen under the tenant's admission
    /// lock, so two concurrent deploys for the same tenant cannot both be
    /// admitted into the last remaining slot.
    #[instrument(skip(self))]
    pub async fn check_and_reserve(&self, tenant_slug: &str, containers: u32) -> Result<Reservation> {
        let _guard = self.tenant_locks.acquire(tenant_slug).await;

        let tenant = self.registry.get(tenant_slug).await?;
        let usage = self.tracker.usage_for_tenant(tenant_slug).await;

        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune_expired(&mut ledger);
        // Saturating sums: an overflowing total must read as "over quota",
        // never wrap into an admission.
        let (pending_deployments, pending_containers) = ledger
            .values()
            .filter(|e| e.tenant_slug == tenant_slug)
            .fold((0u32, 0u32), |(d, c), e| {
                (d.saturating_add(1), c.saturating_add(e.containers))
            });

        let deployments = usage.deployments.saturating_add(pending_deployments);
        if deployments >= tenant.quotas.max_deployments {
            metrics::counter!("stackd_quota_rejections_total", "kind" => "deployments").increment(1);
            return Err(StackdError::QuotaExceeded {
                slug: tenant_slug.to_string(),
                reason: format!(
                    "deployment limit reached ({} of {})",
                    deployments, tenant.quotas.max_deployments
                ),
            });
        }

        let in_use = usage.containers.saturating_add(pending_containers);
        let over_containers = match in_use.checked_add(containers) {
            Some(total) => total > tenant.quotas.max_containers,
            None => true,
        };
        if over_containers {
            metrics::counter!("stackd_quota_rejections_total", "kind" => "containers").increment(1);
            return Err(StackdError::QuotaExceeded {
                slug: tenant_slug.to_string(),
                reason: format!(
                    "container limit exceeded ({} in use, {} requested, limit {})",
                    in_use, containers, tenant.quotas.max_containers
                ),
            });
        }

        let reservation = Reservation {
            id: Uuid::new_v4(),
            tenant_slug: tenant_slug.to_string(),
            containers,
        };
        ledger.insert(
            reservation.id,
            LedgerEntry {
                tenant_slug: tenant_slug.to_string(),
                containers,
                expires_at: Instant::now() + self.ttl,
            },
        );
        debug!(reservation = %reservation.id, tenant = %tenant_slug, containers, "quota reserved");
        Ok(reservation)
    }

    /// Drop the lease after the deployment is confirmed in the tracker. The
    /// tracker carries the usage from here on.
    pub fn commit(&self, reservation: &Reservation) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        if ledger.remove(&reservation.id).is_none() {
            warn!(reservation = %reservation.id, "committing a reservation that already expired");
        }
    }

    /// Return the lease without consuming quota, for deploys that failed
    /// before confirmation.
    pub fn release(&self, reservation: &Reservation) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.remove(&reservation.id);
        debug!(reservation = %reservation.id, "quota reservation released");
    }

    /// Number of live reservations, for diagnostics.
    pub fn pending(&self) -> usize {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune_expired(&mut ledger);
        ledger.len()
    }
}
