//! Apple HLS authoring guidelines engine. Advisory only: nothing here is
//! stronger than a warning.

use super::{Severity, ValidationReport};
use crate::manifest::{Manifest, MasterPlaylist, MediaPlaylist, MediaType};
use itertools::Itertools;

const RULE_SET: &str = "APPLE";

pub fn check(manifest: &Manifest, report: &mut ValidationReport) {
    match manifest {
        Manifest::Master(m) => check_master(m, report),
        Manifest::Media(m) => check_media(m, report),
    }
}

fn check_master(pl: &MasterPlaylist, report: &mut ValidationReport) {
    for (i, v) in pl.variants.iter().enumerate() {
        if v.codecs.is_none() {
            report.push(
                Severity::Warning,
                RULE_SET,
                "APPLE-codecs-recommended",
                format!("variants[{i}].codecs"),
                "every variant should declare CODECS",
            );
        }
        if v.resolution.is_some() && v.frame_rate.is_none() {
            report.push(
                Severity::Info,
                RULE_SET,
                "APPLE-frame-rate-recommended",
                format!("variants[{i}].frame_rate"),
                "video variants should declare FRAME-RATE",
            );
        }
        if let Some(res) = v.resolution {
            if res.height >= 2160 && v.hdcp_level.is_none() {
                report.push(
                    Severity::Warning,
                    RULE_SET,
                    "APPLE-hdcp-for-uhd",
                    format!("variants[{i}].hdcp_level"),
                    "2160p and larger variants should declare HDCP-LEVEL",
                );
            }
        }
    }

    if !pl.variants.is_empty() && pl.i_frame_variants.is_empty() {
        report.push(
            Severity::Info,
            RULE_SET,
            "APPLE-iframe-playlists",
            "i_frame_variants",
            "I-frame playlists are recommended for scrubbing support",
        );
    }

    for (i, r) in pl.renditions.iter().enumerate() {
        if r.media_type == MediaType::Audio && r.language.is_none() {
            report.push(
                Severity::Warning,
                RULE_SET,
                "APPLE-audio-language",
                format!("renditions[{i}].language"),
                "audio renditions should declare LANGUAGE",
            );
        }
    }

    let heights: Vec<u32> = pl
        .variants
        .iter()
        .filter_map(|v| v.resolution.map(|r| r.height))
        .collect();
    let ladder_hits = [480u32, 720, 1080]
        .iter()
        .filter(|h| heights.contains(h))
        .count();
    if !heights.is_empty() && ladder_hits < 3 {
        report.push(
            Severity::Info,
            RULE_SET,
            "APPLE-ladder-coverage",
            "variants",
            "the bitrate ladder should cover 480p, 720p and 1080p",
        );
    }

    if !pl
        .variants
        .iter()
        .map(|v| v.bandwidth)
        .tuple_windows()
        .all(|(a, b)| a <= b)
    {
        report.push(
            Severity::Warning,
            RULE_SET,
            "APPLE-ascending-bandwidth",
            "variants",
            "variants should be listed in ascending BANDWIDTH order",
        );
    }

    if !pl.independent_segments {
        report.push(
            Severity::Info,
            RULE_SET,
            "APPLE-independent-segments",
            "independent_segments",
            "EXT-X-INDEPENDENT-SEGMENTS is recommended",
        );
    }
}

fn check_media(pl: &MediaPlaylist, report: &mut ValidationReport) {
    let low_latency = pl.is_low_latency();

    for (i, seg) in pl.segments.iter().enumerate() {
        if !low_latency && (seg.duration < 4.0 || seg.duration > 8.0) {
            report.push(
                Severity::Info,
                RULE_SET,
                "APPLE-segment-duration",
                format!("segments[{i}].duration"),
                format!(
                    "segment duration {:.3}s is outside the recommended 4-8s window",
                    seg.duration
                ),
            );
        }
    }

    if low_latency {
        if pl.target_duration > 4 {
            report.push(
                Severity::Warning,
                RULE_SET,
                "APPLE-targetduration-llhls",
                "target_duration",
                "low-latency streams should use a target duration of 4s or less",
            );
        }
    } else if pl.target_duration != 0 && pl.target_duration != 6 {
        report.push(
            Severity::Warning,
            RULE_SET,
            "APPLE-targetduration-standard",
            "target_duration",
            "a target duration of 6s is recommended",
        );
    }

    if !pl.independent_segments {
        report.push(
            Severity::Info,
            RULE_SET,
            "APPLE-independent-segments",
            "independent_segments",
            "EXT-X-INDEPENDENT-SEGMENTS is recommended",
        );
    }

    let uses_ts = pl.segments.iter().any(|s| s.uri.ends_with(".ts"));
    let has_map = pl.segments.iter().any(|s| s.map.is_some());
    if uses_ts && !has_map {
        report.push(
            Severity::Info,
            RULE_SET,
            "APPLE-fmp4-preferred",
            "segments",
            "fragmented MP4 segments are preferred over MPEG-TS",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::validate;
    use super::*;
    use crate::manifest::{Rendition, Resolution, Variant};

    #[test]
    fn advisory_findings_never_exceed_warning() {
        let mut pl = MasterPlaylist::default();
        let mut v = Variant::new("hi.m3u8", 2_000_000);
        v.resolution = Some(Resolution {
            width: 3840,
            height: 2160,
        });
        pl.variants.push(v);
        pl.variants.push(Variant::new("lo.m3u8", 1_000_000));
        pl.renditions
            .push(Rendition::new(MediaType::Audio, "aud", "English"));

        let report = validate(&Manifest::Master(pl));
        assert!(report
            .results()
            .iter()
            .filter(|r| r.rule_set_id == "APPLE")
            .all(|r| r.severity <= Severity::Warning));
        assert!(report
            .results()
            .iter()
            .any(|r| r.rule_id == "APPLE-ascending-bandwidth"));
        assert!(report
            .results()
            .iter()
            .any(|r| r.rule_id == "APPLE-hdcp-for-uhd"));
        assert!(report
            .results()
            .iter()
            .any(|r| r.rule_id == "APPLE-audio-language"));
    }
}
