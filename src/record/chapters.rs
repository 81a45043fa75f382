//! Chapter extraction from stream events, exported as Podcast Namespace
//! JSON or WebVTT.

use log::debug;
use serde::Serialize;

/// A resolved chapter with its final time span.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub title: String,
    pub start_time: f64,
    pub end_time: f64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterFormat {
    /// Podcast Namespace 2.0 chapters JSON.
    PodcastJson,
    WebVtt,
}

#[derive(Debug, Clone, PartialEq)]
struct Marker {
    title: String,
    start_time: f64,
    url: Option<String>,
}

/// Accumulates chapter markers from metadata changes, discontinuities and
/// explicit calls, then resolves them into a chapter list.
pub struct AutoChapterGenerator {
    markers: Vec<Marker>,
    minimum_duration: f64,
    discontinuity_count: u64,
}

impl AutoChapterGenerator {
    pub fn new(minimum_duration: f64) -> Self {
        Self {
            markers: Vec::new(),
            minimum_duration,
            discontinuity_count: 0,
        }
    }

    /// Explicit chapter marker.
    pub fn add_chapter(&mut self, title: impl Into<String>, start_time: f64) {
        self.markers.push(Marker {
            title: title.into(),
            start_time,
            url: None,
        });
    }

    pub fn add_chapter_with_url(
        &mut self,
        title: impl Into<String>,
        start_time: f64,
        url: impl Into<String>,
    ) {
        self.markers.push(Marker {
            title: title.into(),
            start_time,
            url: Some(url.into()),
        });
    }

    /// Stream metadata changed (e.g. a new now-playing title).
    pub fn on_metadata_change(&mut self, title: impl Into<String>, at: f64) {
        let title = title.into();
        debug!("chapter marker from metadata at {at:.1}s: {title}");
        self.add_chapter(title, at);
    }

    /// A discontinuity usually means new content.
    pub fn on_discontinuity(&mut self, at: f64) {
        self.discontinuity_count += 1;
        let title = format!("Part {}", self.discontinuity_count + 1);
        self.add_chapter(title, at);
    }

    /// Sort, assign end times, and merge chapters shorter than the minimum
    /// into their predecessor.
    pub fn finalize(&self, total_duration: f64) -> Vec<Chapter> {
        let mut markers = self.markers.clone();
        markers.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        let mut chapters: Vec<Chapter> = Vec::with_capacity(markers.len());
        for (i, m) in markers.iter().enumerate() {
            let end_time = markers
                .get(i + 1)
                .map(|next| next.start_time)
                .unwrap_or(total_duration);
            chapters.push(Chapter {
                title: m.title.clone(),
                start_time: m.start_time,
                end_time,
                url: m.url.clone(),
            });
        }

        // merge too-short chapters into the previous one
        let mut merged: Vec<Chapter> = Vec::with_capacity(chapters.len());
        for ch in chapters {
            let too_short = ch.end_time - ch.start_time < self.minimum_duration;
            match merged.last_mut() {
                Some(prev) if too_short => prev.end_time = ch.end_time,
                _ => merged.push(ch),
            }
        }
        merged
    }

    pub fn render(&self, total_duration: f64, format: ChapterFormat) -> String {
        let chapters = self.finalize(total_duration);
        match format {
            ChapterFormat::PodcastJson => podcast_json(&chapters),
            ChapterFormat::WebVtt => webvtt(&chapters),
        }
    }
}

#[derive(Serialize)]
struct PodcastChapter<'a> {
    #[serde(rename = "startTime")]
    start_time: f64,
    #[serde(rename = "endTime")]
    end_time: f64,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

#[derive(Serialize)]
struct PodcastChapters<'a> {
    version: &'static str,
    chapters: Vec<PodcastChapter<'a>>,
}

fn podcast_json(chapters: &[Chapter]) -> String {
    let doc = PodcastChapters {
        version: "1.2.0",
        chapters: chapters
            .iter()
            .map(|c| PodcastChapter {
                start_time: c.start_time,
                end_time: c.end_time,
                title: &c.title,
                url: c.url.as_deref(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&doc).expect("chapters serialize")
}

fn vtt_timestamp(seconds: f64) -> String {
    let millis = (seconds * 1000.0).round() as u64;
    let h = millis / 3_600_000;
    let m = millis % 3_600_000 / 60_000;
    let s = millis % 60_000 / 1000;
    let ms = millis % 1000;
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

fn webvtt(chapters: &[Chapter]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for (i, c) in chapters.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            vtt_timestamp(c.start_time),
            vtt_timestamp(c.end_time),
            c.title
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_times_chain_to_the_next_chapter() {
        let mut gen = AutoChapterGenerator::new(1.0);
        gen.add_chapter("Intro", 0.0);
        gen.add_chapter("Main", 60.0);
        gen.add_chapter("Outro", 300.0);

        let chapters = gen.finalize(360.0);
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].end_time, 60.0);
        assert_eq!(chapters[1].end_time, 300.0);
        assert_eq!(chapters[2].end_time, 360.0);
    }

    #[test]
    fn markers_are_sorted_by_start_time() {
        let mut gen = AutoChapterGenerator::new(1.0);
        gen.add_chapter("Second", 100.0);
        gen.add_chapter("First", 0.0);
        let chapters = gen.finalize(200.0);
        assert_eq!(chapters[0].title, "First");
        assert_eq!(chapters[1].title, "Second");
    }

    #[test]
    fn short_chapters_merge_into_predecessor() {
        let mut gen = AutoChapterGenerator::new(10.0);
        gen.add_chapter("Intro", 0.0);
        gen.add_chapter("Blip", 60.0); // 2 seconds long
        gen.add_chapter("Main", 62.0);

        let chapters = gen.finalize(300.0);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Intro");
        assert_eq!(chapters[0].end_time, 62.0);
        assert_eq!(chapters[1].title, "Main");
    }

    #[test]
    fn podcast_json_shape() {
        let mut gen = AutoChapterGenerator::new(1.0);
        gen.add_chapter_with_url("Intro", 0.0, "https://example.com");
        let json = gen.render(120.0, ChapterFormat::PodcastJson);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], "1.2.0");
        assert_eq!(value["chapters"][0]["title"], "Intro");
        assert_eq!(value["chapters"][0]["startTime"], 0.0);
        assert_eq!(value["chapters"][0]["endTime"], 120.0);
        assert_eq!(value["chapters"][0]["url"], "https://example.com");
    }

    #[test]
    fn webvtt_shape() {
        let mut gen = AutoChapterGenerator::new(1.0);
        gen.add_chapter("Intro", 0.0);
        gen.add_chapter("Main", 61.5);
        let vtt = gen.render(3600.0, ChapterFormat::WebVtt);
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:00.000 --> 00:01:01.500\nIntro"));
        assert!(vtt.contains("00:01:01.500 --> 01:00:00.000\nMain"));
    }

    #[test]
    fn discontinuities_become_numbered_parts() {
        let mut gen = AutoChapterGenerator::new(1.0);
        gen.add_chapter("Start", 0.0);
        gen.on_discontinuity(120.0);
        gen.on_discontinuity(240.0);
        let chapters = gen.finalize(360.0);
        assert_eq!(chapters[1].title, "Part 2");
        assert_eq!(chapters[2].title, "Part 3");
    }
}
