//! Concurrent fan-out to several destinations with a failover policy.

use super::{PushError, Pusher, PusherStats};
use futures_util::future::join_all;
use log::warn;
use std::collections::HashMap;

/// When an aggregate push counts as successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverPolicy {
    /// Every destination must succeed.
    AllOrNothing,
    /// One success is enough; failures are reported but tolerated.
    ContinueOnFailure,
    /// At least `k` destinations must succeed.
    QuorumOf(usize),
}

/// Per-destination outcome of one aggregate push.
#[derive(Debug)]
pub struct PushResult {
    pub destination: String,
    pub outcome: Result<(), PushError>,
    /// Retries the destination consumed for this operation.
    pub attempts: u32,
}

/// The aggregate outcome plus per-destination diagnostics.
#[derive(Debug)]
pub struct AggregatePushResult {
    pub success: bool,
    pub results: Vec<PushResult>,
}

impl AggregatePushResult {
    pub fn result_for(&self, destination: &str) -> Option<&PushResult> {
        self.results.iter().find(|r| r.destination == destination)
    }

    pub fn successes(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_ok()).count()
    }
}

struct Destination {
    id: String,
    pusher: Box<dyn Pusher>,
}

/// Pushes every artifact to a keyed set of inner pushers concurrently.
///
/// No cross-destination ordering is guaranteed; per destination, calls
/// remain serialized because each inner pusher is exclusively owned here.
pub struct MultiDestinationPusher {
    destinations: Vec<Destination>,
    policy: FailoverPolicy,
}

enum Payload<'a> {
    Segment(&'a [u8]),
    Partial(&'a [u8]),
    Playlist(&'a str),
}

impl MultiDestinationPusher {
    pub fn new(policy: FailoverPolicy) -> Self {
        Self {
            destinations: Vec::new(),
            policy,
        }
    }

    pub fn add_destination(&mut self, id: impl Into<String>, pusher: Box<dyn Pusher>) {
        self.destinations.push(Destination {
            id: id.into(),
            pusher,
        });
    }

    pub fn policy(&self) -> FailoverPolicy {
        self.policy
    }

    pub fn destination_ids(&self) -> Vec<&str> {
        self.destinations.iter().map(|d| d.id.as_str()).collect()
    }

    pub async fn connect_all(&mut self) -> AggregatePushResult {
        let futures = self.destinations.iter_mut().map(|d| async {
            let outcome = d.pusher.connect().await;
            PushResult {
                destination: d.id.clone(),
                outcome,
                attempts: 0,
            }
        });
        let results = join_all(futures).await;
        self.aggregate(results)
    }

    pub async fn disconnect_all(&mut self) {
        let futures = self
            .destinations
            .iter_mut()
            .map(|d| async { d.pusher.disconnect().await });
        for result in join_all(futures).await {
            if let Err(e) = result {
                warn!("disconnect failed: {e}");
            }
        }
    }

    pub async fn push_segment(&mut self, data: &[u8], name: &str) -> AggregatePushResult {
        self.fan_out(Payload::Segment(data), name).await
    }

    pub async fn push_partial(&mut self, data: &[u8], name: &str) -> AggregatePushResult {
        self.fan_out(Payload::Partial(data), name).await
    }

    pub async fn push_playlist(&mut self, text: &str, name: &str) -> AggregatePushResult {
        self.fan_out(Payload::Playlist(text), name).await
    }

    pub fn stats(&self) -> HashMap<String, PusherStats> {
        self.destinations
            .iter()
            .map(|d| (d.id.clone(), d.pusher.stats()))
            .collect()
    }

    async fn fan_out(&mut self, payload: Payload<'_>, name: &str) -> AggregatePushResult {
        let payload = &payload;
        let futures = self.destinations.iter_mut().map(|d| async move {
            let outcome = match payload {
                Payload::Segment(data) => d.pusher.push_segment(data, name).await,
                Payload::Partial(data) => d.pusher.push_partial(data, name).await,
                Payload::Playlist(text) => d.pusher.push_playlist(text, name).await,
            };
            PushResult {
                destination: d.id.clone(),
                attempts: d.pusher.stats().last_attempts,
                outcome,
            }
        });
        let results = join_all(futures).await;
        self.aggregate(results)
    }

    fn aggregate(&self, results: Vec<PushResult>) -> AggregatePushResult {
        let ok = results.iter().filter(|r| r.outcome.is_ok()).count();
        let success = match self.policy {
            FailoverPolicy::AllOrNothing => ok == results.len() && !results.is_empty(),
            FailoverPolicy::ContinueOnFailure => ok > 0,
            FailoverPolicy::QuorumOf(k) => ok >= k,
        };
        for r in &results {
            if let Err(e) = &r.outcome {
                warn!("destination {} failed: {e}", r.destination);
            }
        }
        AggregatePushResult { success, results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedPusher {
        fail_with: Option<PushError>,
        stats: PusherStats,
    }

    impl FixedPusher {
        fn ok() -> Box<dyn Pusher> {
            Box::new(Self {
                fail_with: None,
                stats: PusherStats::default(),
            })
        }

        fn failing(err: PushError) -> Box<dyn Pusher> {
            Box::new(Self {
                fail_with: Some(err),
                stats: PusherStats::default(),
            })
        }
    }

    #[async_trait]
    impl Pusher for FixedPusher {
        async fn connect(&mut self) -> Result<(), PushError> {
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), PushError> {
            Ok(())
        }

        async fn push_segment(&mut self, data: &[u8], _name: &str) -> Result<(), PushError> {
            self.stats.last_attempts = 0;
            match &self.fail_with {
                Some(e) => {
                    self.stats.failures += 1;
                    Err(e.clone())
                }
                None => {
                    self.stats.segments_pushed += 1;
                    self.stats.bytes_sent += data.len() as u64;
                    Ok(())
                }
            }
        }

        async fn push_playlist(&mut self, _text: &str, _name: &str) -> Result<(), PushError> {
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => {
                    self.stats.playlists_pushed += 1;
                    Ok(())
                }
            }
        }

        fn stats(&self) -> PusherStats {
            self.stats.clone()
        }
    }

    fn auth_failure() -> PushError {
        PushError::Permanent {
            reason: "HTTP 401".into(),
            status: Some(401),
        }
    }

    #[tokio::test]
    async fn continue_on_failure_succeeds_with_one_destination_up() {
        let mut multi = MultiDestinationPusher::new(FailoverPolicy::ContinueOnFailure);
        multi.add_destination("a", FixedPusher::failing(auth_failure()));
        multi.add_destination("b", FixedPusher::ok());

        let agg = multi.push_segment(&[0u8; 10], "seg0.m4s").await;
        assert!(agg.success);

        let a = agg.result_for("a").unwrap();
        assert!(matches!(
            a.outcome,
            Err(PushError::Permanent { status: Some(401), .. })
        ));
        assert_eq!(a.attempts, 0);

        let b = agg.result_for("b").unwrap();
        assert!(b.outcome.is_ok());
        assert_eq!(multi.stats()["b"].segments_pushed, 1);
    }

    #[tokio::test]
    async fn all_or_nothing_fails_on_any_failure() {
        let mut multi = MultiDestinationPusher::new(FailoverPolicy::AllOrNothing);
        multi.add_destination("a", FixedPusher::failing(auth_failure()));
        multi.add_destination("b", FixedPusher::ok());
        let agg = multi.push_segment(&[0u8; 10], "seg0.m4s").await;
        assert!(!agg.success);
        assert_eq!(agg.successes(), 1);
    }

    #[tokio::test]
    async fn quorum_counts_successes() {
        let mut multi = MultiDestinationPusher::new(FailoverPolicy::QuorumOf(2));
        multi.add_destination("a", FixedPusher::ok());
        multi.add_destination("b", FixedPusher::ok());
        multi.add_destination("c", FixedPusher::failing(auth_failure()));
        assert!(multi.push_segment(&[0u8; 1], "s").await.success);

        let mut multi = MultiDestinationPusher::new(FailoverPolicy::QuorumOf(3));
        multi.add_destination("a", FixedPusher::ok());
        multi.add_destination("b", FixedPusher::ok());
        multi.add_destination("c", FixedPusher::failing(auth_failure()));
        assert!(!multi.push_segment(&[0u8; 1], "s").await.success);
    }

    #[tokio::test]
    async fn playlists_fan_out_to_every_destination() {
        let mut multi = MultiDestinationPusher::new(FailoverPolicy::AllOrNothing);
        multi.add_destination("a", FixedPusher::ok());
        multi.add_destination("b", FixedPusher::ok());
        let agg = multi.push_playlist("#EXTM3U\n", "live.m3u8").await;
        assert!(agg.success);
        assert!(multi.stats().values().all(|s| s.playlists_pushed == 1));
    }
}
