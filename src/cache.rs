//! Cached parcel snapshots
//!
//! One bulk listing serves repeated tool and resource calls. The snapshot is
//! replaced wholesale on refresh so callers never see two fetches mixed, and
//! an id/barcode index backs single-parcel lookup, with one targeted carrier
//! fetch as the fallback before a parcel is reported missing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::CarrierApi;
use crate::error::Result;
use crate::session::SessionManager;
use crate::types::{DhlConfig, Parcel, ParcelCollection};

struct CachedParcels {
    collection: ParcelCollection,
    /// Positions into `collection.parcels`, keyed by parcel id and barcode
    index: HashMap<String, usize>,
    fetched: Instant,
}

impl CachedParcels {
    fn new(collection: ParcelCollection) -> Self {
        let mut index = HashMap::with_capacity(collection.parcels.len() * 2);
        for (position, parcel) in collection.parcels.iter().enumerate() {
            index.insert(parcel.id.clone(), position);
            if let Some(barcode) = &parcel.barcode {
                index.insert(barcode.clone(), position);
            }
        }
        Self {
            collection,
            index,
            fetched: Instant::now(),
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched.elapsed() > ttl
    }

    fn find(&self, identifier: &str) -> Option<&Parcel> {
        self.index
            .get(identifier)
            .map(|&position| &self.collection.parcels[position])
    }
}

/// Staleness-window cache over the carrier's parcel listing
pub struct ParcelCache {
    api: Arc<dyn CarrierApi>,
    sessions: Arc<SessionManager>,
    ttl: Duration,
    slot: Mutex<Option<CachedParcels>>,
}

impl ParcelCache {
    pub fn new(api: Arc<dyn CarrierApi>, sessions: Arc<SessionManager>, config: &DhlConfig) -> Self {
        Self {
            api,
            sessions,
            ttl: config.cache_ttl,
            slot: Mutex::new(None),
        }
    }

    /// Cached collection if fresh, otherwise refresh first.
    ///
    /// The slot lock is held across the refresh so concurrent callers share
    /// one carrier fetch instead of stampeding.
    pub async fn get(&self, force_refresh: bool) -> Result<ParcelCollection> {
        let mut slot = self.slot.lock().await;
        if !force_refresh {
            if let Some(cached) = slot.as_ref() {
                if !cached.is_stale(self.ttl) {
                    debug!(
                        age_ms = cached.fetched.elapsed().as_millis() as u64,
                        "Serving parcels from cache"
                    );
                    return Ok(cached.collection.clone());
                }
            }
        }
        self.refresh_slot(&mut slot).await
    }

    /// Drop the snapshot and fetch a new one
    pub async fn refresh(&self) -> Result<ParcelCollection> {
        self.get(true).await
    }

    async fn refresh_slot(&self, slot: &mut Option<CachedParcels>) -> Result<ParcelCollection> {
        let api = self.api.clone();
        let parcels = self
            .sessions
            .with_session(move |session| {
                let api = api.clone();
                async move { api.list_parcels(&session).await }
            })
            .await?;
        let collection = ParcelCollection::new(parcels);
        info!(count = collection.len(), "Refreshed parcel cache");
        *slot = Some(CachedParcels::new(collection.clone()));
        Ok(collection)
    }

    /// Find one parcel by id or barcode.
    ///
    /// Checks the cached index first (refreshing a stale or absent snapshot),
    /// then falls back to one targeted carrier fetch before reporting the
    /// parcel missing.
    pub async fn lookup(&self, identifier: &str) -> Result<Parcel> {
        {
            let mut slot = self.slot.lock().await;
            let needs_refresh = match slot.as_ref() {
                Some(cached) => cached.is_stale(self.ttl),
                None => true,
            };
            if needs_refresh {
                self.refresh_slot(&mut slot).await?;
            }
            if let Some(cached) = slot.as_ref() {
                if let Some(parcel) = cached.find(identifier) {
                    return Ok(parcel.clone());
                }
            }
        }

        // Not in the listing; it may still exist (archived or early-announced)
        debug!(identifier, "Parcel not in cached listing, trying targeted fetch");
        let api = self.api.clone();
        let wanted = identifier.to_string();
        self.sessions
            .with_session(move |session| {
                let api = api.clone();
                let wanted = wanted.clone();
                async move { api.get_parcel(&session, &wanted).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DhlError;
    use crate::types::{Credentials, Session, UserProfile};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    fn parcel(id: &str) -> Parcel {
        serde_json::from_value(json!({
            "parcelId": id,
            "barcode": format!("JVGL{}", id),
            "status": "IN_TRANSIT"
        }))
        .unwrap()
    }

    struct StubApi {
        list_count: AtomicU32,
        get_count: AtomicU32,
        listings: StdMutex<VecDeque<Vec<Parcel>>>,
        targeted: Vec<Parcel>,
        list_delay: Duration,
    }

    impl StubApi {
        fn new(listings: Vec<Vec<Parcel>>) -> Self {
            Self {
                list_count: AtomicU32::new(0),
                get_count: AtomicU32::new(0),
                listings: StdMutex::new(listings.into()),
                targeted: Vec::new(),
                list_delay: Duration::ZERO,
            }
        }

        fn listings_served(&self) -> u32 {
            self.list_count.load(Ordering::SeqCst)
        }

        fn targeted_served(&self) -> u32 {
            self.get_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CarrierApi for StubApi {
        async fn login(&self, _credentials: &Credentials) -> Result<Session> {
            let now = Utc::now();
            Ok(Session {
                token: "tok".to_string(),
                issued_at: now,
                expires_at: now + chrono::Duration::hours(1),
                account_id: None,
            })
        }

        async fn list_parcels(&self, _session: &Session) -> Result<Vec<Parcel>> {
            self.list_count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.list_delay).await;
            let next = self.listings.lock().unwrap().pop_front();
            Ok(next.unwrap_or_default())
        }

        async fn get_parcel(&self, _session: &Session, identifier: &str) -> Result<Parcel> {
            self.get_count.fetch_add(1, Ordering::SeqCst);
            self.targeted
                .iter()
                .find(|p| p.matches_identifier(identifier))
                .cloned()
                .ok_or_else(|| DhlError::NotFound(identifier.to_string()))
        }

        async fn get_profile(&self, _session: &Session) -> Result<UserProfile> {
            Ok(UserProfile::default())
        }
    }

    fn cache_with(stub: Arc<StubApi>, ttl: Duration) -> ParcelCache {
        let credentials = Credentials::new("user@example.com", "pw").unwrap();
        let mut config = DhlConfig::new(credentials);
        config.cache_ttl = ttl;
        let sessions = Arc::new(SessionManager::new(stub.clone(), &config));
        ParcelCache::new(stub, sessions, &config)
    }

    #[tokio::test]
    async fn fresh_cache_serves_without_refetching() {
        let stub = Arc::new(StubApi::new(vec![vec![parcel("3SA1"), parcel("3SA2")]]));
        let cache = cache_with(stub.clone(), Duration::from_secs(300));

        let first = cache.get(false).await.unwrap();
        let second = cache.get(false).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(stub.listings_served(), 1);
    }

    #[tokio::test]
    async fn stale_cache_is_refetched() {
        let stub = Arc::new(StubApi::new(vec![vec![parcel("3SA1")], vec![parcel("3SA2")]]));
        let cache = cache_with(stub.clone(), Duration::from_millis(5));

        cache.get(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let refreshed = cache.get(false).await.unwrap();
        assert_eq!(stub.listings_served(), 2);
        assert_eq!(refreshed.parcels[0].id, "3SA2");
    }

    #[tokio::test]
    async fn forced_refresh_replaces_snapshot_wholesale() {
        let stub = Arc::new(StubApi::new(vec![
            vec![parcel("3SA1"), parcel("3SA2")],
            vec![parcel("3SB1")],
        ]));
        let cache = cache_with(stub.clone(), Duration::from_secs(300));

        assert_eq!(cache.get(false).await.unwrap().len(), 2);
        let refreshed = cache.refresh().await.unwrap();
        // The old snapshot is gone entirely, not merged
        let ids: Vec<_> = refreshed.parcels.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["3SB1"]);
        assert_eq!(stub.listings_served(), 2);

        // Lookup for a parcel from the replaced snapshot now misses the index
        let err = cache.lookup("3SA1").await.unwrap_err();
        assert!(matches!(err, DhlError::NotFound(_)));
    }

    #[tokio::test]
    async fn lookup_finds_by_id_and_barcode_without_targeted_fetch() {
        let stub = Arc::new(StubApi::new(vec![vec![parcel("3SA1"), parcel("3SA2")]]));
        let cache = cache_with(stub.clone(), Duration::from_secs(300));

        let by_id = cache.lookup("3SA2").await.unwrap();
        assert_eq!(by_id.id, "3SA2");
        let by_barcode = cache.lookup("JVGL3SA1").await.unwrap();
        assert_eq!(by_barcode.id, "3SA1");
        assert_eq!(stub.targeted_served(), 0);
        assert_eq!(stub.listings_served(), 1);
    }

    #[tokio::test]
    async fn lookup_falls_back_to_targeted_fetch() {
        let mut stub = StubApi::new(vec![vec![parcel("3SA1")]]);
        stub.targeted = vec![parcel("3SOLD9")];
        let stub = Arc::new(stub);
        let cache = cache_with(stub.clone(), Duration::from_secs(300));

        let found = cache.lookup("3SOLD9").await.unwrap();
        assert_eq!(found.id, "3SOLD9");
        assert_eq!(stub.targeted_served(), 1);
    }

    #[tokio::test]
    async fn lookup_unknown_identifier_is_not_found() {
        let stub = Arc::new(StubApi::new(vec![vec![parcel("3SA1")]]));
        let cache = cache_with(stub.clone(), Duration::from_secs(300));

        let err = cache.lookup("UNKNOWN123").await.unwrap_err();
        assert!(matches!(err, DhlError::NotFound(id) if id == "UNKNOWN123"));
        assert_eq!(stub.targeted_served(), 1);
    }

    #[tokio::test]
    async fn concurrent_gets_share_one_fetch() {
        let mut stub = StubApi::new(vec![vec![parcel("3SA1")]]);
        stub.list_delay = Duration::from_millis(20);
        let stub = Arc::new(stub);
        let cache = Arc::new(cache_with(stub.clone(), Duration::from_secs(300)));

        let (a, b) = tokio::join!(cache.get(false), cache.get(false));
        assert_eq!(a.unwrap().len(), 1);
        assert_eq!(b.unwrap().len(), 1);
        assert_eq!(stub.listings_served(), 1);
    }

    #[tokio::test]
    async fn empty_listing_is_cached_like_any_other() {
        let stub = Arc::new(StubApi::new(vec![Vec::new()]));
        let cache = cache_with(stub.clone(), Duration::from_secs(300));

        let collection = cache.get(false).await.unwrap();
        assert!(collection.is_empty());
        cache.get(false).await.unwrap();
        assert_eq!(stub.listings_served(), 1);
    }
}
