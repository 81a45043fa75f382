//! Push-path throughput monitoring with sliding-window estimation and
//! threshold alerts.

use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Throughput levels below these trigger alerts, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthThresholds {
    pub insufficient_bps: f64,
    pub critical_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BandwidthAlert {
    /// Throughput dipped below the insufficient threshold.
    Insufficient { throughput_bps: f64 },
    /// Throughput dipped below the critical threshold.
    Critical { throughput_bps: f64 },
}

struct Sample {
    at: Instant,
    bytes: u64,
    duration: Duration,
}

struct MonitorState {
    samples: VecDeque<Sample>,
    total_bytes: u64,
}

/// Records `(bytes, transfer duration)` samples from the pushers and
/// computes effective throughput over a sliding time window.
///
/// Alerts are delivered on an unbounded channel with `send` that never
/// blocks; a slow consumer loses nothing and the push path never waits.
pub struct BandwidthMonitor {
    window: Duration,
    thresholds: Option<BandwidthThresholds>,
    state: Mutex<MonitorState>,
    alert_tx: mpsc::UnboundedSender<BandwidthAlert>,
}

impl BandwidthMonitor {
    pub fn new(
        window: Duration,
        thresholds: Option<BandwidthThresholds>,
    ) -> (Self, mpsc::UnboundedReceiver<BandwidthAlert>) {
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        (
            Self {
                window,
                thresholds,
                state: Mutex::new(MonitorState {
                    samples: VecDeque::new(),
                    total_bytes: 0,
                }),
                alert_tx,
            },
            alert_rx,
        )
    }

    /// Record one completed transfer. Never blocks.
    pub fn record(&self, bytes: u64, transfer_duration: Duration) {
        self.record_at(Instant::now(), bytes, transfer_duration);
    }

    fn record_at(&self, now: Instant, bytes: u64, transfer_duration: Duration) {
        let throughput = {
            let mut state = self.state.lock().expect("monitor lock");
            state.total_bytes += bytes;
            state.samples.push_back(Sample {
                at: now,
                bytes,
                duration: transfer_duration,
            });
            let horizon = now.checked_sub(self.window);
            if let Some(horizon) = horizon {
                while state
                    .samples
                    .front()
                    .map(|s| s.at < horizon)
                    .unwrap_or(false)
                {
                    state.samples.pop_front();
                }
            }
            Self::throughput_of(&state.samples)
        };

        debug!(
            "bandwidth sample: {bytes} bytes in {:?}, window throughput {:.0} bps",
            transfer_duration,
            throughput.unwrap_or(0.0)
        );

        let (Some(thresholds), Some(bps)) = (self.thresholds, throughput) else {
            return;
        };
        if bps < thresholds.critical_bps {
            warn!("throughput critical: {:.0} bps", bps);
            let _ = self.alert_tx.send(BandwidthAlert::Critical {
                throughput_bps: bps,
            });
        } else if bps < thresholds.insufficient_bps {
            warn!("throughput insufficient: {:.0} bps", bps);
            let _ = self.alert_tx.send(BandwidthAlert::Insufficient {
                throughput_bps: bps,
            });
        }
    }

    fn throughput_of(samples: &VecDeque<Sample>) -> Option<f64> {
        let total_bytes: u64 = samples.iter().map(|s| s.bytes).sum();
        let total_time: f64 = samples.iter().map(|s| s.duration.as_secs_f64()).sum();
        if total_time <= 0.0 {
            return None;
        }
        Some(total_bytes as f64 * 8.0 / total_time)
    }

    /// Effective throughput over the current window, bits per second.
    pub fn throughput_bps(&self) -> Option<f64> {
        let state = self.state.lock().expect("monitor lock");
        Self::throughput_of(&state.samples)
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().expect("monitor lock").total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn computes_effective_throughput() {
        let (monitor, _rx) = BandwidthMonitor::new(Duration::from_secs(30), None);
        // 1 MB in 1 s = 8 Mbps
        monitor.record(1_000_000, Duration::from_secs(1));
        let bps = monitor.throughput_bps().unwrap();
        assert!((bps - 8_000_000.0).abs() < 1.0);
        assert_eq!(monitor.total_bytes(), 1_000_000);
    }

    #[tokio::test]
    async fn alerts_fire_below_thresholds() {
        let (monitor, mut rx) = BandwidthMonitor::new(
            Duration::from_secs(30),
            Some(BandwidthThresholds {
                insufficient_bps: 5_000_000.0,
                critical_bps: 1_000_000.0,
            }),
        );

        // 8 Mbps: healthy, no alert
        monitor.record(1_000_000, Duration::from_secs(1));
        assert!(rx.try_recv().is_err());

        // 4 Mbps effective after averaging drops below insufficient
        monitor.record(125_000, Duration::from_secs(1));
        match rx.try_recv().unwrap() {
            BandwidthAlert::Insufficient { throughput_bps } => {
                assert!(throughput_bps < 5_000_000.0)
            }
            other => panic!("unexpected alert {other:?}"),
        }
    }

    #[tokio::test]
    async fn critical_beats_insufficient() {
        let (monitor, mut rx) = BandwidthMonitor::new(
            Duration::from_secs(30),
            Some(BandwidthThresholds {
                insufficient_bps: 5_000_000.0,
                critical_bps: 1_000_000.0,
            }),
        );
        monitor.record(10_000, Duration::from_secs(1)); // 80 kbps
        assert!(matches!(
            rx.try_recv().unwrap(),
            BandwidthAlert::Critical { .. }
        ));
    }

    #[tokio::test]
    async fn no_samples_means_no_estimate() {
        let (monitor, _rx) = BandwidthMonitor::new(Duration::from_secs(30), None);
        assert_eq!(monitor.throughput_bps(), None);
    }
}
