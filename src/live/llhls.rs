//! The live LL-HLS origin state machine.
//!
//! A serialized actor owning the rolling playlist: full segments, the
//! in-progress segment's partials, blocking-reload waiters and delta
//! playlist production. Every mutation happens under one lock and waiters
//! are woken with freshly rendered playlists, so clients always observe a
//! consistent snapshot.

use crate::manifest::{
    EncryptionKey, MapTag, MediaPlaylist, PartInf, PartialSegment, PreloadHint, PreloadHintType,
    RenditionReport, Segment, ServerControl, Skip,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

#[derive(Debug, Error, PartialEq)]
pub enum LlhlsError {
    #[error("partial duration {duration:.3}s exceeds the part target {part_target:.3}s")]
    PartTooLong { duration: f64, part_target: f64 },
    #[error("segment duration {duration:.3}s exceeds the target duration {target:.3}s")]
    SegmentTooLong { duration: f64, target: f64 },
    #[error("the stream has already ended")]
    StreamAlreadyEnded,
    #[error("blocking reload deadline elapsed")]
    RequestTimeout,
    #[error("requested sequence {msn} is too far ahead of the live edge {next_msn}")]
    FarFutureRequest { msn: u64, next_msn: u64 },
}

/// Static configuration of the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct LlhlsConfig {
    /// Full-segment target duration in seconds.
    pub target_duration: f64,
    /// `PART-TARGET`; zero disables partial bookkeeping.
    pub part_target: f64,
    /// Maximum number of full segments kept in the playlist.
    pub window_size: usize,
    /// Advertised `CAN-SKIP-UNTIL` skip boundary.
    pub can_skip_until: Option<f64>,
}

impl Default for LlhlsConfig {
    fn default() -> Self {
        Self {
            target_duration: 6.0,
            part_target: 1.0,
            window_size: 6,
            can_skip_until: None,
        }
    }
}

/// A completed segment and its partials as tracked by the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub msn: u64,
    pub duration: f64,
    pub uri: String,
    pub parts: Vec<PartialRecord>,
    pub is_complete: bool,
    pub key: Option<EncryptionKey>,
    pub discontinuity: bool,
    pub program_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialRecord {
    pub msn: u64,
    pub index: u64,
    pub duration: f64,
    pub uri: String,
    pub independent: bool,
    pub is_gap: bool,
}

/// `_HLS_msn` / `_HLS_part` / `_HLS_skip` of a blocking playlist reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingPlaylistRequest {
    pub msn: u64,
    pub part_index: Option<u64>,
    pub skip: bool,
}

struct Waiter {
    msn: u64,
    part_index: Option<u64>,
    skip: bool,
    tx: oneshot::Sender<Result<String, LlhlsError>>,
}

struct ManagerState {
    segments: std::collections::VecDeque<SegmentRecord>,
    current_partials: Vec<PartialRecord>,
    /// MSN of the in-progress segment; assigned MSNs are never reused.
    next_msn: u64,
    /// MSN of the first listed segment.
    media_sequence: u64,
    stream_ended: bool,
    discontinuity_pending: bool,
    current_key: Option<EncryptionKey>,
    current_map: Option<MapTag>,
    rendition_reports: Vec<RenditionReport>,
    waiters: Vec<Waiter>,
}

/// Serialized LL-HLS playlist actor.
pub struct LlhlsManager {
    config: LlhlsConfig,
    state: Mutex<ManagerState>,
}

impl LlhlsManager {
    pub fn new(config: LlhlsConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ManagerState {
                segments: std::collections::VecDeque::new(),
                current_partials: Vec::new(),
                next_msn: 0,
                media_sequence: 0,
                stream_ended: false,
                discontinuity_pending: false,
                current_key: None,
                current_map: None,
                rendition_reports: Vec::new(),
                waiters: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &LlhlsConfig {
        &self.config
    }

    fn part_uri(&self, msn: u64, index: u64) -> String {
        format!("seg{msn}.part{index}.m4s")
    }

    /// Record a completed partial of the in-progress segment.
    pub async fn add_partial(
        &self,
        duration: f64,
        independent: bool,
        is_gap: bool,
    ) -> Result<(), LlhlsError> {
        let mut state = self.state.lock().await;
        if state.stream_ended {
            return Err(LlhlsError::StreamAlreadyEnded);
        }
        if duration > self.config.part_target + 1e-3 {
            return Err(LlhlsError::PartTooLong {
                duration,
                part_target: self.config.part_target,
            });
        }
        let index = state.current_partials.len() as u64;
        let msn = state.next_msn;
        state.current_partials.push(PartialRecord {
            msn,
            index,
            duration,
            uri: self.part_uri(msn, index),
            independent,
            is_gap,
        });
        debug!(
            "partial {}/{} added [{:.3}s, independent={}]",
            msn, index, duration, independent
        );
        self.resolve_waiters(&mut state);
        Ok(())
    }

    /// Close the in-progress segment, absorbing its partials, and slide the
    /// window.
    pub async fn complete_segment(
        &self,
        duration: f64,
        uri: impl Into<String>,
    ) -> Result<SegmentRecord, LlhlsError> {
        let mut state = self.state.lock().await;
        if state.stream_ended {
            return Err(LlhlsError::StreamAlreadyEnded);
        }
        if duration.round() > self.config.target_duration.round() {
            return Err(LlhlsError::SegmentTooLong {
                duration,
                target: self.config.target_duration,
            });
        }

        let msn = state.next_msn;
        let parts = std::mem::take(&mut state.current_partials);
        let record = SegmentRecord {
            msn,
            duration,
            uri: uri.into(),
            parts,
            is_complete: true,
            key: state.current_key.clone(),
            discontinuity: std::mem::take(&mut state.discontinuity_pending),
            program_date_time: Some(Utc::now()),
        };
        state.segments.push_back(record.clone());
        state.next_msn += 1;

        while state.segments.len() > self.config.window_size {
            let evicted = state.segments.pop_front().expect("len checked");
            state.media_sequence = evicted.msn + 1;
            debug!("evicted segment {} from the window", evicted.msn);
        }

        info!("segment {} complete [{:.3}s, {}]", msn, duration, record.uri);
        self.resolve_waiters(&mut state);
        Ok(record)
    }

    /// Advertise a new key for segments completed from now on.
    pub async fn set_key(&self, key: Option<EncryptionKey>) {
        self.state.lock().await.current_key = key;
    }

    /// Media initialization section for segments completed from now on.
    pub async fn set_map(&self, map: Option<MapTag>) {
        self.state.lock().await.current_map = map;
    }

    /// Mark the next completed segment as discontinuous.
    pub async fn mark_discontinuity(&self) {
        self.state.lock().await.discontinuity_pending = true;
    }

    /// Replace the rendition reports atomically.
    pub async fn set_rendition_reports(&self, reports: Vec<RenditionReport>) {
        self.state.lock().await.rendition_reports = reports;
    }

    /// End the stream when `token` fires, e.g. on pipeline shutdown.
    pub fn end_on_cancel(self: std::sync::Arc<Self>, token: tokio_util::sync::CancellationToken) {
        tokio::spawn(async move {
            token.cancelled().await;
            self.end_stream().await;
        });
    }

    /// End the stream: set `ENDLIST` and fail all pending waiters.
    pub async fn end_stream(&self) {
        let mut state = self.state.lock().await;
        if state.stream_ended {
            return;
        }
        state.stream_ended = true;
        let waiters = std::mem::take(&mut state.waiters);
        info!("stream ended, failing {} pending waiters", waiters.len());
        for w in waiters {
            let _ = w.tx.send(Err(LlhlsError::StreamAlreadyEnded));
        }
    }

    /// Full playlist of the current state.
    pub async fn render_playlist(&self) -> String {
        let state = self.state.lock().await;
        self.render(&state, false)
            .expect("full render is infallible")
    }

    /// Delta playlist, if enough content is covered by the skip boundary.
    pub async fn render_delta_playlist(&self) -> Option<String> {
        let state = self.state.lock().await;
        self.render(&state, true)
    }

    /// Number of blocking reloads currently parked.
    pub async fn pending_waiter_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.waiters.retain(|w| !w.tx.is_closed());
        state.waiters.len()
    }

    /// Blocking playlist reload: respond immediately when the state already
    /// satisfies the request, otherwise park until `add_partial` /
    /// `complete_segment` advances past it or the timeout fires.
    pub async fn await_playlist(
        &self,
        request: BlockingPlaylistRequest,
        timeout: Duration,
    ) -> Result<String, LlhlsError> {
        let rx = {
            let mut state = self.state.lock().await;
            if Self::satisfied(&state, request.msn, request.part_index) {
                return Ok(self
                    .render(&state, request.skip)
                    .or_else(|| self.render(&state, false))
                    .expect("full render is infallible"));
            }
            if state.stream_ended {
                return Err(LlhlsError::StreamAlreadyEnded);
            }
            // a request too far past the live edge will never resolve
            if request.msn > state.next_msn + 2 {
                return Err(LlhlsError::FarFutureRequest {
                    msn: request.msn,
                    next_msn: state.next_msn,
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(Waiter {
                msn: request.msn,
                part_index: request.part_index,
                skip: request.skip,
                tx,
            });
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LlhlsError::StreamAlreadyEnded),
            Err(_) => {
                // remove ourselves; the receiver is gone so the sender
                // half reports closed
                let mut state = self.state.lock().await;
                state.waiters.retain(|w| !w.tx.is_closed());
                Err(LlhlsError::RequestTimeout)
            }
        }
    }

    fn satisfied(state: &ManagerState, msn: u64, part_index: Option<u64>) -> bool {
        match part_index {
            None => msn < state.next_msn,
            Some(p) => {
                msn < state.next_msn
                    || (msn == state.next_msn && p < state.current_partials.len() as u64)
            }
        }
    }

    fn resolve_waiters(&self, state: &mut ManagerState) {
        let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
        let mut kept = Vec::new();
        for w in waiters {
            if w.tx.is_closed() {
                continue; // caller went away
            }
            if Self::satisfied(state, w.msn, w.part_index) {
                let rendered = self
                    .render(state, w.skip)
                    .or_else(|| self.render(state, false))
                    .expect("full render is infallible");
                if w.tx.send(Ok(rendered)).is_err() {
                    warn!("waiter for msn {} dropped before delivery", w.msn);
                }
            } else {
                kept.push(w);
            }
        }
        state.waiters = kept;
    }

    /// Build the manifest value and serialize it. `delta` applies the skip
    /// boundary; returns `None` when the boundary is unset or uncovered.
    fn render(&self, state: &ManagerState, delta: bool) -> Option<String> {
        let mut pl = MediaPlaylist {
            target_duration: self.config.target_duration.round() as u64,
            media_sequence: state.media_sequence,
            end_list: state.stream_ended,
            ..Default::default()
        };

        if self.config.part_target > 0.0 {
            pl.part_inf = Some(PartInf {
                part_target: self.config.part_target,
            });
            pl.server_control = Some(ServerControl {
                can_block_reload: true,
                can_skip_until: self.config.can_skip_until,
                can_skip_dateranges: false,
                hold_back: None,
                part_hold_back: Some(3.0 * self.config.part_target),
            });
        } else if self.config.can_skip_until.is_some() {
            pl.server_control = Some(ServerControl {
                can_block_reload: true,
                can_skip_until: self.config.can_skip_until,
                can_skip_dateranges: false,
                hold_back: None,
                part_hold_back: None,
            });
        }

        let mut skipped = 0usize;
        if delta {
            let boundary = self.config.can_skip_until?;
            let total: f64 = state.segments.iter().map(|s| s.duration).sum();
            if total < boundary {
                return None;
            }
            // skip the oldest segments covered by the boundary
            let mut acc = 0.0;
            for seg in &state.segments {
                if acc + seg.duration > boundary {
                    break;
                }
                acc += seg.duration;
                skipped += 1;
            }
            if skipped == 0 {
                return None;
            }
            pl.skip = Some(Skip {
                skipped_segments: skipped as u64,
                recently_removed_dateranges: None,
            });
        }

        for seg in state.segments.iter().skip(skipped) {
            pl.segments.push(Segment {
                uri: seg.uri.clone(),
                duration: seg.duration,
                title: None,
                byte_range: None,
                map: state.current_map.clone(),
                key: seg.key.clone(),
                discontinuity: seg.discontinuity,
                program_date_time: seg
                    .program_date_time
                    .map(|t| t.fixed_offset()),
                date_ranges: Vec::new(),
                gap: false,
                bitrate: None,
                parts: seg.parts.iter().map(to_manifest_part).collect(),
            });
        }
        pl.pending_parts = state.current_partials.iter().map(to_manifest_part).collect();

        if self.config.part_target > 0.0 && !state.stream_ended {
            let next_index = state.current_partials.len() as u64;
            pl.preload_hints.push(PreloadHint {
                hint_type: PreloadHintType::Part,
                uri: self.part_uri(state.next_msn, next_index),
                byte_range_start: None,
                byte_range_length: None,
            });
        }
        pl.rendition_reports = state.rendition_reports.clone();
        // fMP4 output floors at version 6; LL-HLS and delta features raise it
        pl.version = Some(pl.required_version().max(6));

        Some(crate::manifest::write::write_media(&pl))
    }
}

fn to_manifest_part(p: &PartialRecord) -> PartialSegment {
    PartialSegment {
        uri: p.uri.clone(),
        duration: p.duration,
        independent: p.independent,
        byte_range: None,
        gap: p.is_gap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn manager(part_target: f64, target: f64, window: usize) -> LlhlsManager {
        LlhlsManager::new(LlhlsConfig {
            target_duration: target,
            part_target,
            window_size: window,
            can_skip_until: None,
        })
    }

    #[tokio::test]
    async fn blocking_reload_wakes_all_waiters() {
        let _ = pretty_env_logger::try_init();
        let mgr = Arc::new(manager(0.33, 1.0, 6));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.await_playlist(
                    BlockingPlaylistRequest {
                        msn: 0,
                        part_index: None,
                        skip: false,
                    },
                    Duration::from_secs(5),
                )
                .await
            }));
        }
        // let the waiters park before mutating
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mgr.pending_waiter_count().await, 3);

        mgr.add_partial(0.33, true, false).await.unwrap();
        mgr.complete_segment(1.0, "seg0.m4s").await.unwrap();

        for h in handles {
            let playlist = h.await.unwrap().unwrap();
            assert!(playlist.contains("seg0.m4s"));
        }
        assert_eq!(mgr.pending_waiter_count().await, 0);
    }

    #[tokio::test]
    async fn blocking_reload_times_out() {
        let mgr = manager(0.33, 1.0, 6);
        let err = mgr
            .await_playlist(
                BlockingPlaylistRequest {
                    msn: 0,
                    part_index: None,
                    skip: false,
                },
                Duration::from_millis(150),
            )
            .await
            .unwrap_err();
        assert_eq!(err, LlhlsError::RequestTimeout);
        assert_eq!(mgr.pending_waiter_count().await, 0);
    }

    #[tokio::test]
    async fn partial_waiter_resolves_on_add_partial() {
        let mgr = Arc::new(manager(0.33, 1.0, 6));
        let waiter = {
            let mgr = mgr.clone();
            tokio::spawn(async move {
                mgr.await_playlist(
                    BlockingPlaylistRequest {
                        msn: 0,
                        part_index: Some(0),
                        skip: false,
                    },
                    Duration::from_secs(5),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.add_partial(0.2, true, false).await.unwrap();
        let playlist = waiter.await.unwrap().unwrap();
        assert!(playlist.contains("seg0.part0.m4s"));
    }

    #[tokio::test]
    async fn delta_playlist_skips_covered_segments() {
        let mgr = LlhlsManager::new(LlhlsConfig {
            target_duration: 1.0,
            part_target: 0.0,
            window_size: 100,
            can_skip_until: Some(12.0),
        });
        for i in 0..15 {
            mgr.complete_segment(1.0, format!("seg{i}.m4s")).await.unwrap();
        }

        let delta = mgr.render_delta_playlist().await.unwrap();
        assert!(delta.contains("#EXT-X-SKIP:SKIPPED-SEGMENTS=12"));
        assert_eq!(delta.matches("#EXT-X-SKIP").count(), 1);
        // every segment past the boundary is listed
        for i in 12..15 {
            assert!(delta.contains(&format!("seg{i}.m4s")));
        }
        for i in 0..12 {
            assert!(!delta.contains(&format!("seg{i}.m4s\n")));
        }

        let full = mgr.render_playlist().await;
        for i in 0..15 {
            assert!(full.contains(&format!("seg{i}.m4s")));
        }
    }

    #[tokio::test]
    async fn delta_unavailable_below_boundary() {
        let mgr = LlhlsManager::new(LlhlsConfig {
            target_duration: 1.0,
            part_target: 0.0,
            window_size: 100,
            can_skip_until: Some(12.0),
        });
        for i in 0..5 {
            mgr.complete_segment(1.0, format!("seg{i}.m4s")).await.unwrap();
        }
        assert_eq!(mgr.render_delta_playlist().await, None);
    }

    #[tokio::test]
    async fn msn_is_monotonic_and_window_bounded() {
        let mgr = manager(0.0, 6.0, 3);
        let mut last_msn = None;
        for i in 0..10 {
            let rec = mgr.complete_segment(6.0, format!("s{i}.ts")).await.unwrap();
            if let Some(prev) = last_msn {
                assert_eq!(rec.msn, prev + 1);
            }
            last_msn = Some(rec.msn);

            let playlist = mgr.render_playlist().await;
            let count = playlist.matches("#EXTINF").count();
            assert!(count <= 3);
        }
        // after eviction the media sequence advances to the first listed
        let playlist = mgr.render_playlist().await;
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:7"));
    }

    #[tokio::test]
    async fn part_too_long_is_rejected() {
        let mgr = manager(0.33, 1.0, 6);
        let err = mgr.add_partial(0.5, false, false).await.unwrap_err();
        assert!(matches!(err, LlhlsError::PartTooLong { .. }));
    }

    #[tokio::test]
    async fn end_stream_fails_waiters_and_rejects_mutation() {
        let mgr = Arc::new(manager(0.33, 1.0, 6));
        let waiter = {
            let mgr = mgr.clone();
            tokio::spawn(async move {
                mgr.await_playlist(
                    BlockingPlaylistRequest {
                        msn: 5,
                        part_index: None,
                        skip: false,
                    },
                    Duration::from_secs(5),
                )
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.end_stream().await;

        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            LlhlsError::StreamAlreadyEnded
        );
        assert_eq!(
            mgr.add_partial(0.1, false, false).await.unwrap_err(),
            LlhlsError::StreamAlreadyEnded
        );
        assert!(mgr.render_playlist().await.contains("#EXT-X-ENDLIST"));
    }

    #[tokio::test]
    async fn cancellation_token_ends_the_stream() {
        let mgr = Arc::new(manager(0.33, 1.0, 6));
        let token = tokio_util::sync::CancellationToken::new();
        mgr.clone().end_on_cancel(token.clone());

        token.cancel();
        // the watcher task runs on the next yield
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            mgr.add_partial(0.1, false, false).await.unwrap_err(),
            LlhlsError::StreamAlreadyEnded
        );
    }

    #[tokio::test]
    async fn far_future_request_is_rejected() {
        let mgr = manager(0.33, 1.0, 6);
        let err = mgr
            .await_playlist(
                BlockingPlaylistRequest {
                    msn: 10,
                    part_index: None,
                    skip: false,
                },
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlhlsError::FarFutureRequest { .. }));
    }

    #[tokio::test]
    async fn rendered_playlist_carries_preload_hint_and_reports() {
        let mgr = manager(0.33, 1.0, 6);
        mgr.add_partial(0.33, true, false).await.unwrap();
        mgr.set_rendition_reports(vec![RenditionReport {
            uri: "../low/live.m3u8".into(),
            last_msn: Some(0),
            last_part: Some(0),
        }])
        .await;

        let playlist = mgr.render_playlist().await;
        assert!(playlist.contains("#EXT-X-PART-INF:PART-TARGET=0.33"));
        assert!(playlist.contains("#EXT-X-PART:DURATION=0.33,URI=\"seg0.part0.m4s\",INDEPENDENT=YES"));
        assert!(playlist.contains("#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"seg0.part1.m4s\""));
        assert!(playlist.contains("#EXT-X-RENDITION-REPORT:URI=\"../low/live.m3u8\",LAST-MSN=0,LAST-PART=0"));
        assert!(playlist.contains("CAN-BLOCK-RELOAD=YES"));
    }
}
