//! Live key management: rotation policy and provider fan-in.

use crate::manifest::{EncryptionKey, EncryptionMethod};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Key material in force for the live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEncryptionKey {
    pub id: Uuid,
    pub key: [u8; 16],
    /// Explicit IV; when absent, consumers derive one from the MSN.
    pub iv: Option<[u8; 16]>,
    /// Where clients fetch the key from.
    pub uri: String,
    pub key_format: Option<String>,
}

impl LiveEncryptionKey {
    /// The `#EXT-X-KEY` attributes advertising this key.
    pub fn to_manifest_key(&self, method: EncryptionMethod) -> EncryptionKey {
        EncryptionKey {
            method,
            uri: Some(self.uri.clone()),
            iv: self.iv,
            key_format: self.key_format.clone(),
            key_format_versions: None,
        }
    }
}

/// Produces fresh key material; the license/key-server exchange behind it
/// is not this crate's concern.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn provide_key(&self) -> Result<LiveEncryptionKey>;
}

/// When the key manager swaps keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRotationPolicy {
    EverySegment,
    EveryNSegments(u64),
    Interval(Duration),
    Manual,
    None,
}

/// Rotation bookkeeping exposed by [`LiveKeyManager::statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyManagerStats {
    pub total_rotations: u64,
    pub segments_served: u64,
    pub current_key_age: Option<Duration>,
}

#[derive(Default)]
struct KeyState {
    current: Option<LiveEncryptionKey>,
    last_rotation_segment: Option<u64>,
    last_rotation_at: Option<Instant>,
    total_rotations: u64,
    segments_served: u64,
}

/// Serialized actor owning the current live key.
///
/// `key_for_segment` decides rotation via the policy, fetches from the
/// provider when due, and returns the key in force.
pub struct LiveKeyManager<P> {
    provider: P,
    policy: KeyRotationPolicy,
    state: Mutex<KeyState>,
}

impl<P: KeyProvider> LiveKeyManager<P> {
    pub fn new(provider: P, policy: KeyRotationPolicy) -> Self {
        Self {
            provider,
            policy,
            state: Mutex::new(KeyState::default()),
        }
    }

    pub fn policy(&self) -> KeyRotationPolicy {
        self.policy
    }

    /// The key in force for segment `segment_index`, rotating first if the
    /// policy says so.
    pub async fn key_for_segment(&self, segment_index: u64, now: Instant) -> Result<LiveEncryptionKey> {
        let mut state = self.state.lock().await;
        state.segments_served += 1;

        let rotate = match (&state.current, self.policy) {
            (None, _) => true,
            (Some(_), KeyRotationPolicy::EverySegment) => {
                state.last_rotation_segment != Some(segment_index)
            }
            (Some(_), KeyRotationPolicy::EveryNSegments(n)) => {
                n > 0
                    && segment_index % n == 0
                    && state.last_rotation_segment != Some(segment_index)
            }
            (Some(_), KeyRotationPolicy::Interval(period)) => state
                .last_rotation_at
                .map_or(true, |at| now.duration_since(at) >= period),
            (Some(_), KeyRotationPolicy::Manual | KeyRotationPolicy::None) => false,
        };

        if rotate {
            let key = self.provider.provide_key().await?;
            info!(
                "rotated live key {} at segment {} (rotation #{})",
                key.id,
                segment_index,
                state.total_rotations + 1
            );
            state.current = Some(key);
            state.total_rotations += 1;
            state.last_rotation_segment = Some(segment_index);
            state.last_rotation_at = Some(now);
        } else {
            debug!("segment {} keeps the current key", segment_index);
        }

        Ok(state.current.clone().expect("key present after rotation"))
    }

    /// Force a rotation regardless of policy (the `Manual` path).
    pub async fn rotate_now(&self, now: Instant) -> Result<LiveEncryptionKey> {
        let mut state = self.state.lock().await;
        let key = self.provider.provide_key().await?;
        info!("manual key rotation to {}", key.id);
        state.current = Some(key.clone());
        state.total_rotations += 1;
        state.last_rotation_at = Some(now);
        state.last_rotation_segment = None;
        Ok(key)
    }

    pub async fn statistics(&self) -> KeyManagerStats {
        let state = self.state.lock().await;
        KeyManagerStats {
            total_rotations: state.total_rotations,
            segments_served: state.segments_served,
            current_key_age: state
                .last_rotation_at
                .map(|at| Instant::now().duration_since(at)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        issued: AtomicU64,
    }

    #[async_trait]
    impl KeyProvider for CountingProvider {
        async fn provide_key(&self) -> Result<LiveEncryptionKey> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            let mut key = [0u8; 16];
            key[8..].copy_from_slice(&n.to_be_bytes());
            Ok(LiveEncryptionKey {
                id: Uuid::new_v4(),
                key,
                iv: None,
                uri: format!("https://keys.example/{n}"),
                key_format: None,
            })
        }
    }

    #[tokio::test]
    async fn every_n_segments_rotates_ceil_m_over_n_times() {
        let mgr = LiveKeyManager::new(
            CountingProvider::default(),
            KeyRotationPolicy::EveryNSegments(10),
        );
        let now = Instant::now();
        let mut distinct = std::collections::HashSet::new();
        for idx in 0..100 {
            let key = mgr.key_for_segment(idx, now).await.unwrap();
            distinct.insert(key.key);
        }
        let stats = mgr.statistics().await;
        assert_eq!(stats.total_rotations, 10);
        assert_eq!(distinct.len(), 10);
        assert_eq!(stats.segments_served, 100);
    }

    #[tokio::test]
    async fn repeated_calls_for_one_segment_do_not_rotate_twice() {
        let mgr = LiveKeyManager::new(
            CountingProvider::default(),
            KeyRotationPolicy::EverySegment,
        );
        let now = Instant::now();
        let a = mgr.key_for_segment(0, now).await.unwrap();
        let b = mgr.key_for_segment(0, now).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(mgr.statistics().await.total_rotations, 1);
    }

    #[tokio::test]
    async fn none_policy_fetches_exactly_once() {
        let mgr = LiveKeyManager::new(CountingProvider::default(), KeyRotationPolicy::None);
        let now = Instant::now();
        let first = mgr.key_for_segment(0, now).await.unwrap();
        for idx in 1..50 {
            assert_eq!(mgr.key_for_segment(idx, now).await.unwrap(), first);
        }
        assert_eq!(mgr.statistics().await.total_rotations, 1);
    }

    #[tokio::test]
    async fn interval_policy_rotates_on_elapsed_time() {
        let mgr = LiveKeyManager::new(
            CountingProvider::default(),
            KeyRotationPolicy::Interval(Duration::from_secs(10)),
        );
        let start = Instant::now();
        let a = mgr.key_for_segment(0, start).await.unwrap();
        let b = mgr.key_for_segment(1, start + Duration::from_secs(5)).await.unwrap();
        assert_eq!(a, b);
        let c = mgr.key_for_segment(2, start + Duration::from_secs(11)).await.unwrap();
        assert_ne!(a, c);
        assert_eq!(mgr.statistics().await.total_rotations, 2);
    }

    #[tokio::test]
    async fn manual_policy_only_rotates_on_request() {
        let mgr = LiveKeyManager::new(CountingProvider::default(), KeyRotationPolicy::Manual);
        let now = Instant::now();
        let a = mgr.key_for_segment(0, now).await.unwrap();
        let b = mgr.key_for_segment(25, now).await.unwrap();
        assert_eq!(a, b);
        let c = mgr.rotate_now(now).await.unwrap();
        assert_ne!(a, c);
        assert_eq!(mgr.key_for_segment(26, now).await.unwrap(), c);
    }
}
