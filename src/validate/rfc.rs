//! RFC 8216 compliance engine, including the bis-draft LL-HLS rules.

use super::{Severity, ValidationReport};
use crate::manifest::{
    EncryptionMethod, Manifest, MasterPlaylist, MediaPlaylist, MediaType, PlaylistType,
};
use std::collections::{HashMap, HashSet};

const RULE_SET: &str = "RFC8216";

pub fn check(manifest: &Manifest, report: &mut ValidationReport) {
    match manifest {
        Manifest::Master(m) => check_master(m, report),
        Manifest::Media(m) => {
            check_media(m, report);
            check_low_latency(m, report);
        }
    }
}

fn check_master(pl: &MasterPlaylist, report: &mut ValidationReport) {
    if pl.variants.is_empty() {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216-4.3.4.2-variants-present",
            "variants",
            "master playlist lists no variant streams",
        );
    }

    for (i, v) in pl.variants.iter().enumerate() {
        if v.bandwidth == 0 {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216-4.3.4.2-bandwidth-positive",
                format!("variants[{i}].bandwidth"),
                "BANDWIDTH must be a positive integer",
            );
        }
        if v.uri.is_empty() {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216-4.3.4.2-uri-nonempty",
                format!("variants[{i}].uri"),
                "variant has an empty URI line",
            );
        }
        if v.resolution.is_none() {
            report.push(
                Severity::Warning,
                RULE_SET,
                "RFC8216-4.3.4.2-resolution-recommended",
                format!("variants[{i}].resolution"),
                "RESOLUTION is recommended for video variant streams",
            );
        }

        // group references must resolve to a rendition of matching type
        let refs = [
            (&v.audio, MediaType::Audio, "audio"),
            (&v.video, MediaType::Video, "video"),
            (&v.subtitles, MediaType::Subtitles, "subtitles"),
        ];
        for (group, media_type, field) in refs {
            if let Some(group_id) = group {
                if pl.group(media_type, group_id).next().is_none() {
                    report.push(
                        Severity::Error,
                        RULE_SET,
                        "RFC8216-4.3.4.2.1-group-reference",
                        format!("variants[{i}].{field}"),
                        format!(
                            "group reference {group_id:?} has no {} rendition",
                            media_type.as_str()
                        ),
                    );
                }
            }
        }
    }

    // per (TYPE, GROUP-ID): at most one DEFAULT=YES, unique NAMEs
    let mut groups: HashMap<(MediaType, &str), (usize, HashSet<&str>)> = HashMap::new();
    for r in &pl.renditions {
        let entry = groups
            .entry((r.media_type, r.group_id.as_str()))
            .or_insert((0, HashSet::new()));
        if r.default {
            entry.0 += 1;
        }
        if !entry.1.insert(r.name.as_str()) {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216-4.3.4.1-name-unique",
                format!("renditions[{}/{}]", r.media_type.as_str(), r.group_id),
                format!("NAME {:?} is duplicated within its group", r.name),
            );
        }
    }
    for ((media_type, group_id), (defaults, _)) in groups {
        if defaults > 1 {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216-4.3.4.1-default-unique",
                format!("renditions[{}/{}]", media_type.as_str(), group_id),
                "more than one rendition in the group has DEFAULT=YES",
            );
        }
    }

    // SESSION-DATA: exactly one of VALUE/URI, unique LANGUAGE per DATA-ID
    let mut languages: HashMap<&str, HashSet<Option<&str>>> = HashMap::new();
    for (i, sd) in pl.session_data.iter().enumerate() {
        if sd.value.is_some() == sd.uri.is_some() {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216-4.3.4.4-value-or-uri",
                format!("session_data[{i}]"),
                "SESSION-DATA must carry exactly one of VALUE or URI",
            );
        }
        if !languages
            .entry(sd.data_id.as_str())
            .or_default()
            .insert(sd.language.as_deref())
        {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216-4.3.4.4-language-unique",
                format!("session_data[{i}].language"),
                format!("duplicate LANGUAGE for DATA-ID {:?}", sd.data_id),
            );
        }
    }

    let required = pl.required_version();
    if pl.version.unwrap_or(1) < required {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216-7-declared-version",
            "version",
            format!(
                "declared version {} is below the required version {}",
                pl.version.unwrap_or(1),
                required
            ),
        );
    }
}

fn check_media(pl: &MediaPlaylist, report: &mut ValidationReport) {
    if pl.target_duration == 0 {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216-4.3.3.1-targetduration-positive",
            "target_duration",
            "EXT-X-TARGETDURATION must be a positive integer",
        );
    }

    for (i, seg) in pl.segments.iter().enumerate() {
        if seg.duration < 0.0 {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216-4.3.2.1-duration-nonnegative",
                format!("segments[{i}].duration"),
                "segment duration is negative",
            );
        }
        if pl.target_duration > 0 && seg.duration.round() as u64 > pl.target_duration {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216-4.3.3.1-duration-within-target",
                format!("segments[{i}].duration"),
                format!(
                    "segment duration {:.3}s exceeds EXT-X-TARGETDURATION {}s when rounded",
                    seg.duration, pl.target_duration
                ),
            );
        }
        if let Some(key) = &seg.key {
            if key.method != EncryptionMethod::None && key.uri.is_none() {
                report.push(
                    Severity::Error,
                    RULE_SET,
                    "RFC8216-4.3.2.4-key-uri",
                    format!("segments[{i}].key.uri"),
                    "EXT-X-KEY with METHOD other than NONE requires a URI",
                );
            }
        }
    }

    if pl.playlist_type == Some(PlaylistType::Vod) && !pl.end_list {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216-4.3.3.5-endlist-vod",
            "end_list",
            "VOD playlists must end with EXT-X-ENDLIST",
        );
    }

    let declared = pl.version.unwrap_or(1);
    if pl
        .segments
        .iter()
        .any(|s| s.key.as_ref().is_some_and(|k| k.iv.is_some()))
        && declared < 2
    {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216-7-iv-requires-v2",
            "version",
            "EXT-X-KEY with an IV attribute requires version 2",
        );
    }
    if pl.segments.iter().any(|s| s.byte_range.is_some()) && declared < 4 {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216-7-byterange-requires-v4",
            "version",
            "EXT-X-BYTERANGE requires version 4",
        );
    }
    if !pl.i_frames_only && pl.segments.iter().any(|s| s.map.is_some()) && declared < 6 {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216-7-map-requires-v6",
            "version",
            "EXT-X-MAP outside an I-frame playlist requires version 6",
        );
    }

    let required = pl.required_version();
    if declared < required {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216-7-declared-version",
            "version",
            format!("declared version {declared} is below the required version {required}"),
        );
    }
}

/// Bis-draft rules, applied only when any low-latency feature is present.
fn check_low_latency(pl: &MediaPlaylist, report: &mut ValidationReport) {
    if !pl.is_low_latency() {
        return;
    }

    let has_parts =
        !pl.pending_parts.is_empty() || pl.segments.iter().any(|s| !s.parts.is_empty());

    let Some(part_inf) = &pl.part_inf else {
        if has_parts {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216bis-4.4.4.9-part-inf-required",
                "part_inf",
                "EXT-X-PART requires EXT-X-PART-INF",
            );
        }
        low_latency_common(pl, report);
        return;
    };

    let all_parts = pl
        .segments
        .iter()
        .enumerate()
        .flat_map(|(i, s)| s.parts.iter().map(move |p| (format!("segments[{i}]"), p)))
        .chain(
            pl.pending_parts
                .iter()
                .map(|p| ("pending_parts".to_string(), p)),
        );
    for (path, part) in all_parts {
        // allow the usual float slack on the comparison
        if part.duration > part_inf.part_target + 0.001 {
            report.push(
                Severity::Error,
                RULE_SET,
                "RFC8216bis-4.4.4.9-part-duration",
                format!("{path}.parts[{:?}]", part.uri),
                format!(
                    "part duration {:.3}s exceeds PART-TARGET {:.3}s",
                    part.duration, part_inf.part_target
                ),
            );
        }
    }

    match &pl.server_control {
        None => report.push(
            Severity::Warning,
            RULE_SET,
            "RFC8216bis-4.4.3.8-server-control",
            "server_control",
            "low-latency playlists should carry EXT-X-SERVER-CONTROL",
        ),
        Some(sc) => {
            if let Some(phb) = sc.part_hold_back {
                if phb < 3.0 * part_inf.part_target {
                    report.push(
                        Severity::Warning,
                        RULE_SET,
                        "RFC8216bis-4.4.3.8-part-hold-back",
                        "server_control.part_hold_back",
                        format!(
                            "PART-HOLD-BACK {:.3}s is below three part targets ({:.3}s)",
                            phb,
                            3.0 * part_inf.part_target
                        ),
                    );
                }
            }
        }
    }

    low_latency_common(pl, report);
}

fn low_latency_common(pl: &MediaPlaylist, report: &mut ValidationReport) {
    if pl.version.unwrap_or(1) < 9 {
        report.push(
            Severity::Error,
            RULE_SET,
            "RFC8216bis-8-version-llhls",
            "version",
            "low-latency features require version 9",
        );
    }
}
