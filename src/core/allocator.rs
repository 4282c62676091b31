use crate::core::snapshot::Snapshot;
use crate::domain::model::AssignmentRecord;
use crate::domain::ports::ConfigStore;
use crate::utils::error::{ProxyError, Result};
use crate::utils::retry::RetryPolicy;
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Contiguous range of local ports reserved for forwarding endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }

    pub fn len(&self) -> usize {
        (self.max as usize + 1).saturating_sub(self.min as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(7891, 7999)
    }
}

/// Constraints for one find-and-claim call.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest<'a> {
    pub snapshot: &'a Snapshot,
    /// Tried first when it is free; otherwise the range is scanned.
    pub preferred: Option<u16>,
    /// Ports this resolution has already given up on.
    pub excluded: &'a HashSet<u16>,
}

pub struct PortAllocator {
    range: PortRange,
    claim_lock: Mutex<()>,
    retry: RetryPolicy,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            claim_lock: Mutex::new(()),
            retry: RetryPolicy::new().with_max_attempts(3).with_base_delay(50),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Picks a free port. A port is free when it is in range, unused by the
    /// snapshot, not excluded and has no persisted record.
    pub fn find_free(&self, request: &ClaimRequest<'_>, persisted: &HashSet<u16>) -> Result<u16> {
        let is_free = |port: u16| {
            self.range.contains(port)
                && !request.snapshot.claims_port(port)
                && !request.excluded.contains(&port)
                && !persisted.contains(&port)
        };

        if let Some(preferred) = request.preferred {
            if is_free(preferred) {
                return Ok(preferred);
            }
            tracing::debug!("Preferred port {} is not free, scanning range", preferred);
        }

        (self.range.min..=self.range.max)
            .find(|port| is_free(*port))
            .ok_or(ProxyError::NoAvailablePort {
                min: self.range.min,
                max: self.range.max,
            })
    }

    /// Finds a free port and persists the record built for it, atomically with
    /// respect to every other claim on this allocator.
    pub async fn claim<S, F>(
        &self,
        store: &S,
        request: ClaimRequest<'_>,
        build: F,
    ) -> Result<AssignmentRecord>
    where
        S: ConfigStore,
        F: Fn(u16) -> AssignmentRecord,
    {
        self.retry
            .run(
                |_| self.claim_once(store, &request, &build),
                |e| matches!(e, ProxyError::IoError(_)),
            )
            .await
    }

    async fn claim_once<S, F>(
        &self,
        store: &S,
        request: &ClaimRequest<'_>,
        build: &F,
    ) -> Result<AssignmentRecord>
    where
        S: ConfigStore,
        F: Fn(u16) -> AssignmentRecord,
    {
        let _guard = self.claim_lock.lock().await;

        let persisted: HashSet<u16> = store.list().await?.into_iter().collect();
        let port = self.find_free(request, &persisted)?;
        let record = build(port);
        store.write(port, &record).await?;

        tracing::debug!("Claimed port {} for {}", port, record.upstream_host);
        Ok(record)
    }

    /// Drops a claim made by this resolution. Only the claimant calls this.
    pub async fn release<S: ConfigStore>(&self, store: &S, port: u16) -> Result<()> {
        let _guard = self.claim_lock.lock().await;
        store.delete(port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::store::MemoryConfigStore;
    use crate::domain::model::{ActiveProfileProxy, ProxyDescriptor};
    use chrono::Utc;
    use std::sync::Arc;

    fn record(port: u16) -> AssignmentRecord {
        AssignmentRecord {
            local_port: port,
            provider: "nordvpn".into(),
            upstream_host: "vn42.nordvpn.com".into(),
            upstream_port: 89,
            country: Some("VN".into()),
            created_at: Utc::now(),
        }
    }

    fn snapshot_on(ports: &[u16]) -> Snapshot {
        Snapshot::from_entries(
            ports
                .iter()
                .map(|p| ActiveProfileProxy {
                    descriptor: ProxyDescriptor::new("socks5", "h", *p, "x.nordvpn.com", Some(89)),
                })
                .collect(),
        )
    }

    #[test]
    fn test_find_free_scans_ascending() {
        let allocator = PortAllocator::new(PortRange::new(7891, 7895));
        let snapshot = snapshot_on(&[7891]);
        let excluded = HashSet::from([7892]);
        let persisted = HashSet::from([7893]);

        let request = ClaimRequest {
            snapshot: &snapshot,
            preferred: None,
            excluded: &excluded,
        };
        assert_eq!(allocator.find_free(&request, &persisted).unwrap(), 7894);
    }

    #[test]
    fn test_find_free_prefers_requested_port() {
        let allocator = PortAllocator::new(PortRange::new(7891, 7895));
        let snapshot = Snapshot::default();
        let excluded = HashSet::new();

        let request = ClaimRequest {
            snapshot: &snapshot,
            preferred: Some(7894),
            excluded: &excluded,
        };
        assert_eq!(allocator.find_free(&request, &HashSet::new()).unwrap(), 7894);

        let out_of_range = ClaimRequest {
            preferred: Some(8080),
            ..request
        };
        assert_eq!(allocator.find_free(&out_of_range, &HashSet::new()).unwrap(), 7891);
    }

    #[test]
    fn test_find_free_uses_port_max_when_lower_ports_taken() {
        let allocator = PortAllocator::new(PortRange::new(7891, 7895));
        let snapshot = snapshot_on(&[7891, 7892]);
        let persisted = HashSet::from([7893, 7894]);
        let excluded = HashSet::new();

        let request = ClaimRequest {
            snapshot: &snapshot,
            preferred: None,
            excluded: &excluded,
        };
        assert_eq!(allocator.find_free(&request, &persisted).unwrap(), 7895);
    }

    #[test]
    fn test_find_free_exhausted_range() {
        let allocator = PortAllocator::new(PortRange::new(7891, 7893));
        let snapshot = snapshot_on(&[7891, 7892]);
        let persisted = HashSet::from([7893]);
        let excluded = HashSet::new();

        let request = ClaimRequest {
            snapshot: &snapshot,
            preferred: Some(7893),
            excluded: &excluded,
        };
        assert!(matches!(
            allocator.find_free(&request, &persisted),
            Err(ProxyError::NoAvailablePort { min: 7891, max: 7893 })
        ));
    }

    #[tokio::test]
    async fn test_claim_persists_record() {
        let allocator = PortAllocator::new(PortRange::new(7891, 7899));
        let store = MemoryConfigStore::new();
        store.write(7891, &record(7891)).await.unwrap();

        let snapshot = Snapshot::default();
        let excluded = HashSet::new();
        let claimed = allocator
            .claim(
                &store,
                ClaimRequest {
                    snapshot: &snapshot,
                    preferred: Some(7891),
                    excluded: &excluded,
                },
                record,
            )
            .await
            .unwrap();

        assert_eq!(claimed.local_port, 7892);
        assert_eq!(store.read(7892).await.unwrap(), Some(claimed));
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_collide() {
        let allocator = Arc::new(PortAllocator::new(PortRange::new(7891, 7999)));
        let store = MemoryConfigStore::new();

        let mut handles = Vec::new();
        for _ in 0..40 {
            let allocator = allocator.clone();
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let snapshot = Snapshot::default();
                let excluded = HashSet::new();
                allocator
                    .claim(
                        &store,
                        ClaimRequest {
                            snapshot: &snapshot,
                            preferred: None,
                            excluded: &excluded,
                        },
                        record,
                    )
                    .await
                    .map(|r| r.local_port)
            }));
        }

        let mut ports = HashSet::new();
        for handle in handles {
            let port = handle.await.unwrap().unwrap();
            assert!(ports.insert(port), "port {} handed out twice", port);
        }
        assert_eq!(ports.len(), 40);
        assert_eq!(store.list().await.unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_release_frees_port() {
        let allocator = PortAllocator::new(PortRange::new(7891, 7891));
        let store = MemoryConfigStore::new();
        let snapshot = Snapshot::default();
        let excluded = HashSet::new();
        let request = ClaimRequest {
            snapshot: &snapshot,
            preferred: None,
            excluded: &excluded,
        };

        allocator.claim(&store, request, record).await.unwrap();
        assert!(allocator.claim(&store, request, record).await.is_err());

        allocator.release(&store, 7891).await.unwrap();
        assert!(allocator.claim(&store, request, record).await.is_ok());
    }
}
