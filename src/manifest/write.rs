//! M3U8 serializer, symmetric with [`super::parse`].
//!
//! Output uses `\n` terminators, UTF-8 without BOM, and ends with a final
//! newline. Attribute orders are canonical so that serializing a parsed
//! playlist is byte-for-byte idempotent.

use super::attrs::{format_duration, format_float, AttrWriter};
use super::master::{ClosedCaptions, IFrameVariant, MasterPlaylist, Rendition, Variant};
use super::media::MediaPlaylist;
use super::types::{
    DateRange, Definition, EncryptionKey, MapTag, PartialSegment, PreloadHint, StartOffset,
};

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn write_key_attrs(key: &EncryptionKey) -> String {
    let mut w = AttrWriter::new();
    w.token("METHOD", key.method.as_str());
    if let Some(uri) = &key.uri {
        w.quoted("URI", uri);
    }
    if let Some(iv) = &key.iv {
        w.hex("IV", iv);
    }
    if let Some(kf) = &key.key_format {
        w.quoted("KEYFORMAT", kf);
    }
    if let Some(kfv) = &key.key_format_versions {
        w.quoted("KEYFORMATVERSIONS", kfv);
    }
    w.finish()
}

fn write_map(out: &mut String, map: &MapTag) {
    let mut w = AttrWriter::new();
    w.quoted("URI", &map.uri);
    if let Some(br) = &map.byte_range {
        w.quoted("BYTERANGE", &br.to_string());
    }
    push_line(out, &format!("#EXT-X-MAP:{}", w.finish()));
}

fn write_start(out: &mut String, start: &StartOffset) {
    let mut w = AttrWriter::new();
    w.float("TIME-OFFSET", start.time_offset);
    w.yes("PRECISE", start.precise);
    push_line(out, &format!("#EXT-X-START:{}", w.finish()));
}

fn write_define(out: &mut String, def: &Definition) {
    let mut w = AttrWriter::new();
    match def {
        Definition::Inline { name, value } => {
            w.quoted("NAME", name).quoted("VALUE", value);
        }
        Definition::Import { name } => {
            w.quoted("IMPORT", name);
        }
        Definition::QueryParam { name } => {
            w.quoted("QUERYPARAM", name);
        }
    }
    push_line(out, &format!("#EXT-X-DEFINE:{}", w.finish()));
}

fn write_part(out: &mut String, part: &PartialSegment) {
    let mut w = AttrWriter::new();
    w.float("DURATION", part.duration);
    w.quoted("URI", &part.uri);
    w.yes("INDEPENDENT", part.independent);
    if let Some(br) = &part.byte_range {
        w.quoted("BYTERANGE", &br.to_string());
    }
    w.yes("GAP", part.gap);
    push_line(out, &format!("#EXT-X-PART:{}", w.finish()));
}

fn write_date_range(out: &mut String, dr: &DateRange) {
    let mut w = AttrWriter::new();
    w.quoted("ID", &dr.id);
    if let Some(class) = &dr.class {
        w.quoted("CLASS", class);
    }
    if let Some(start) = &dr.start_date {
        w.quoted("START-DATE", &start.format(DATE_FORMAT).to_string());
    }
    if let Some(end) = &dr.end_date {
        w.quoted("END-DATE", &end.format(DATE_FORMAT).to_string());
    }
    if let Some(d) = dr.duration {
        w.float("DURATION", d);
    }
    if let Some(d) = dr.planned_duration {
        w.float("PLANNED-DURATION", d);
    }
    if let Some(cmd) = &dr.scte35_cmd {
        w.token("SCTE35-CMD", cmd);
    }
    if let Some(o) = &dr.scte35_out {
        w.token("SCTE35-OUT", o);
    }
    if let Some(i) = &dr.scte35_in {
        w.token("SCTE35-IN", i);
    }
    for (k, v) in &dr.client_attributes {
        w.quoted(k, v);
    }
    w.yes("END-ON-NEXT", dr.end_on_next);
    push_line(out, &format!("#EXT-X-DATERANGE:{}", w.finish()));
}

fn write_preload_hint(out: &mut String, hint: &PreloadHint) {
    let mut w = AttrWriter::new();
    w.token("TYPE", hint.hint_type.as_str());
    w.quoted("URI", &hint.uri);
    if let Some(s) = hint.byte_range_start {
        w.u64("BYTERANGE-START", s);
    }
    if let Some(l) = hint.byte_range_length {
        w.u64("BYTERANGE-LENGTH", l);
    }
    push_line(out, &format!("#EXT-X-PRELOAD-HINT:{}", w.finish()));
}

/// Serialize a media playlist.
pub fn write_media(pl: &MediaPlaylist) -> String {
    let version = pl.version.unwrap_or_else(|| pl.required_version());
    let mut out = String::with_capacity(1024);

    push_line(&mut out, "#EXTM3U");
    if pl.version.is_some() {
        push_line(&mut out, &format!("#EXT-X-VERSION:{}", version));
    }
    if pl.independent_segments {
        push_line(&mut out, "#EXT-X-INDEPENDENT-SEGMENTS");
    }
    push_line(
        &mut out,
        &format!("#EXT-X-TARGETDURATION:{}", pl.target_duration),
    );
    if pl.media_sequence != 0 {
        push_line(
            &mut out,
            &format!("#EXT-X-MEDIA-SEQUENCE:{}", pl.media_sequence),
        );
    }
    if pl.discontinuity_sequence != 0 {
        push_line(
            &mut out,
            &format!("#EXT-X-DISCONTINUITY-SEQUENCE:{}", pl.discontinuity_sequence),
        );
    }
    if let Some(t) = pl.playlist_type {
        push_line(&mut out, &format!("#EXT-X-PLAYLIST-TYPE:{}", t.as_str()));
    }
    if pl.i_frames_only {
        push_line(&mut out, "#EXT-X-I-FRAMES-ONLY");
    }
    if let Some(start) = &pl.start {
        write_start(&mut out, start);
    }
    if let Some(sc) = &pl.server_control {
        let mut w = AttrWriter::new();
        w.yes("CAN-BLOCK-RELOAD", sc.can_block_reload);
        if let Some(v) = sc.can_skip_until {
            w.float("CAN-SKIP-UNTIL", v);
        }
        w.yes("CAN-SKIP-DATERANGES", sc.can_skip_dateranges);
        if let Some(v) = sc.hold_back {
            w.float("HOLD-BACK", v);
        }
        if let Some(v) = sc.part_hold_back {
            w.float("PART-HOLD-BACK", v);
        }
        push_line(&mut out, &format!("#EXT-X-SERVER-CONTROL:{}", w.finish()));
    }
    if let Some(pi) = &pl.part_inf {
        push_line(
            &mut out,
            &format!("#EXT-X-PART-INF:PART-TARGET={}", format_float(pi.part_target)),
        );
    }
    if let Some(skip) = &pl.skip {
        let mut w = AttrWriter::new();
        w.u64("SKIPPED-SEGMENTS", skip.skipped_segments);
        if let Some(r) = &skip.recently_removed_dateranges {
            w.quoted("RECENTLY-REMOVED-DATERANGES", r);
        }
        push_line(&mut out, &format!("#EXT-X-SKIP:{}", w.finish()));
    }
    // the initial media initialization section belongs to the header; MAP
    // changes mid-playlist are emitted with their segment
    let mut map_in_force: Option<MapTag> = None;
    if let Some(map) = pl.segments.first().and_then(|s| s.map.as_ref()) {
        write_map(&mut out, map);
        map_in_force = Some(map.clone());
    }
    for def in &pl.variables {
        write_define(&mut out, def);
    }
    for tag in &pl.unknown_tags {
        push_line(&mut out, &tag.to_string());
    }

    let mut key_in_force: Option<EncryptionKey> = None;

    for seg in &pl.segments {
        if seg.key != key_in_force {
            match &seg.key {
                Some(key) => push_line(&mut out, &format!("#EXT-X-KEY:{}", write_key_attrs(key))),
                None => push_line(&mut out, "#EXT-X-KEY:METHOD=NONE"),
            }
            key_in_force = seg.key.clone();
        }
        if seg.map != map_in_force {
            if let Some(map) = &seg.map {
                write_map(&mut out, map);
            }
            map_in_force = seg.map.clone();
        }
        for dr in &seg.date_ranges {
            write_date_range(&mut out, dr);
        }
        if seg.discontinuity {
            push_line(&mut out, "#EXT-X-DISCONTINUITY");
        }
        if let Some(pdt) = &seg.program_date_time {
            push_line(
                &mut out,
                &format!("#EXT-X-PROGRAM-DATE-TIME:{}", pdt.format(DATE_FORMAT)),
            );
        }
        if seg.gap {
            push_line(&mut out, "#EXT-X-GAP");
        }
        if let Some(b) = seg.bitrate {
            push_line(&mut out, &format!("#EXT-X-BITRATE:{}", b));
        }
        if let Some(br) = &seg.byte_range {
            push_line(&mut out, &format!("#EXT-X-BYTERANGE:{}", br));
        }
        for part in &seg.parts {
            write_part(&mut out, part);
        }
        let mut inf = format!("#EXTINF:{},", format_duration(seg.duration, version));
        if let Some(title) = &seg.title {
            inf.push_str(title);
        }
        push_line(&mut out, &inf);
        push_line(&mut out, &seg.uri);
    }

    for part in &pl.pending_parts {
        write_part(&mut out, part);
    }
    for hint in &pl.preload_hints {
        write_preload_hint(&mut out, hint);
    }
    for report in &pl.rendition_reports {
        let mut w = AttrWriter::new();
        w.quoted("URI", &report.uri);
        if let Some(msn) = report.last_msn {
            w.u64("LAST-MSN", msn);
        }
        if let Some(part) = report.last_part {
            w.u64("LAST-PART", part);
        }
        push_line(&mut out, &format!("#EXT-X-RENDITION-REPORT:{}", w.finish()));
    }
    if pl.end_list {
        push_line(&mut out, "#EXT-X-ENDLIST");
    }

    out
}

fn write_rendition(out: &mut String, r: &Rendition) {
    let mut w = AttrWriter::new();
    w.token("TYPE", r.media_type.as_str());
    w.quoted("GROUP-ID", &r.group_id);
    w.quoted("NAME", &r.name);
    if let Some(lang) = &r.language {
        w.quoted("LANGUAGE", lang);
    }
    if let Some(lang) = &r.assoc_language {
        w.quoted("ASSOC-LANGUAGE", lang);
    }
    w.yes("DEFAULT", r.default);
    w.yes("AUTOSELECT", r.autoselect);
    w.yes("FORCED", r.forced);
    if let Some(id) = &r.instream_id {
        w.quoted("INSTREAM-ID", id);
    }
    if let Some(c) = &r.characteristics {
        w.quoted("CHARACTERISTICS", c);
    }
    if let Some(c) = &r.channels {
        w.quoted("CHANNELS", c);
    }
    if let Some(uri) = &r.uri {
        w.quoted("URI", uri);
    }
    push_line(out, &format!("#EXT-X-MEDIA:{}", w.finish()));
}

fn write_variant(out: &mut String, v: &Variant) {
    let mut w = AttrWriter::new();
    w.u64("BANDWIDTH", v.bandwidth);
    if let Some(avg) = v.average_bandwidth {
        w.u64("AVERAGE-BANDWIDTH", avg);
    }
    if let Some(res) = v.resolution {
        w.resolution("RESOLUTION", res);
    }
    if let Some(fps) = v.frame_rate {
        w.float("FRAME-RATE", fps);
    }
    if let Some(codecs) = &v.codecs {
        w.quoted("CODECS", codecs);
    }
    if let Some(codecs) = &v.supplemental_codecs {
        w.quoted("SUPPLEMENTAL-CODECS", codecs);
    }
    if let Some(h) = v.hdcp_level {
        w.token("HDCP-LEVEL", h.as_str());
    }
    if let Some(r) = v.video_range {
        w.token("VIDEO-RANGE", r.as_str());
    }
    if let Some(a) = &v.audio {
        w.quoted("AUDIO", a);
    }
    if let Some(g) = &v.video {
        w.quoted("VIDEO", g);
    }
    if let Some(s) = &v.subtitles {
        w.quoted("SUBTITLES", s);
    }
    match &v.closed_captions {
        Some(ClosedCaptions::GroupId(g)) => {
            w.quoted("CLOSED-CAPTIONS", g);
        }
        Some(ClosedCaptions::None) => {
            w.token("CLOSED-CAPTIONS", "NONE");
        }
        None => {}
    }
    push_line(out, &format!("#EXT-X-STREAM-INF:{}", w.finish()));
    push_line(out, &v.uri);
}

fn write_i_frame_variant(out: &mut String, v: &IFrameVariant) {
    let mut w = AttrWriter::new();
    w.u64("BANDWIDTH", v.bandwidth);
    if let Some(avg) = v.average_bandwidth {
        w.u64("AVERAGE-BANDWIDTH", avg);
    }
    if let Some(res) = v.resolution {
        w.resolution("RESOLUTION", res);
    }
    if let Some(codecs) = &v.codecs {
        w.quoted("CODECS", codecs);
    }
    if let Some(h) = v.hdcp_level {
        w.token("HDCP-LEVEL", h.as_str());
    }
    if let Some(r) = v.video_range {
        w.token("VIDEO-RANGE", r.as_str());
    }
    if let Some(g) = &v.video {
        w.quoted("VIDEO", g);
    }
    w.quoted("URI", &v.uri);
    push_line(out, &format!("#EXT-X-I-FRAME-STREAM-INF:{}", w.finish()));
}

/// Serialize a master playlist.
pub fn write_master(pl: &MasterPlaylist) -> String {
    let mut out = String::with_capacity(512);

    push_line(&mut out, "#EXTM3U");
    if let Some(v) = pl.version {
        push_line(&mut out, &format!("#EXT-X-VERSION:{}", v));
    }
    if pl.independent_segments {
        push_line(&mut out, "#EXT-X-INDEPENDENT-SEGMENTS");
    }
    if let Some(start) = &pl.start {
        write_start(&mut out, start);
    }
    for def in &pl.variables {
        write_define(&mut out, def);
    }
    for sd in &pl.session_data {
        let mut w = AttrWriter::new();
        w.quoted("DATA-ID", &sd.data_id);
        if let Some(v) = &sd.value {
            w.quoted("VALUE", v);
        }
        if let Some(u) = &sd.uri {
            w.quoted("URI", u);
        }
        if let Some(l) = &sd.language {
            w.quoted("LANGUAGE", l);
        }
        push_line(&mut out, &format!("#EXT-X-SESSION-DATA:{}", w.finish()));
    }
    for key in &pl.session_keys {
        push_line(
            &mut out,
            &format!("#EXT-X-SESSION-KEY:{}", write_key_attrs(key)),
        );
    }
    if let Some(cs) = &pl.content_steering {
        let mut w = AttrWriter::new();
        w.quoted("SERVER-URI", &cs.server_uri);
        if let Some(p) = &cs.pathway_id {
            w.quoted("PATHWAY-ID", p);
        }
        push_line(&mut out, &format!("#EXT-X-CONTENT-STEERING:{}", w.finish()));
    }
    for tag in &pl.unknown_tags {
        push_line(&mut out, &tag.to_string());
    }
    for r in &pl.renditions {
        write_rendition(&mut out, r);
    }
    for v in &pl.variants {
        write_variant(&mut out, v);
    }
    for v in &pl.i_frame_variants {
        write_i_frame_variant(&mut out, v);
    }

    out
}
