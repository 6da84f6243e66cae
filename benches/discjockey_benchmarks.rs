//! # discjockey Performance Benchmarks
//!
//! Benchmarks for the text handling that runs on every track: parsing model
//! output, matching a choice against candidates, validating intros and
//! pacing them for speech.
//!
//! ## Benchmark Categories
//!
//! - **Model Output**: Tag extraction from raw completions
//! - **Choice Resolution**: Exact, normalized and fuzzy candidate matching
//! - **Intro Validation**: Sanitizing and finalizing intro text
//! - **Speech Formatting**: Pacing line breaks for TTS
//! - **Library Scan**: Directory walk and sampling
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench resolution
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use discjockey::song::Song;
use discjockey::{intro, library, llm, selector, tts};
use std::hint::black_box;
use std::path::PathBuf;
use tempfile::TempDir;

const RAW_ANSWER: &str = "Sure! Here is my pick.\n<choice>Song 0042 - Artist 3.flac</choice>\n\
    <reason>It keeps the tempo and moves from dusk into night.</reason>";

const RAW_INTRO: &str = "```xml\n\
    <facts>\nFACT: One.\nFACT: Two.\nTRIVIA: Three.\nFACT: Four.\nTRIVIA: Five.\n</facts>\n\
    <response>Ladies and gentlemen, welcome to the late show! \
    Next up is Harbor Lights by The Tides, a slow instrumental built around a lap steel guitar. \
    It closed their second record, and the band still ends every concert with it, \
    so settle in and enjoy Harbor Lights.</response>\n```";

fn create_test_songs(count: usize) -> Vec<Song> {
    (1..=count)
        .map(|i| {
            let artist = format!("Artist {}", (i - 1) / 20 + 1);
            Song {
                path: PathBuf::from(format!("/music/{artist}/Song {i:04} - {artist}.flac")),
                title: format!("Song {i:04}"),
                artist,
                album: format!("Album {}", (i - 1) / 10 + 1),
                is_compilation: false,
                length_seconds: Some(180 + i as u64),
                size_bytes: None,
                year: None,
            }
        })
        .collect()
}

fn create_library(count: usize) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    for i in 0..count {
        let dir = temp_dir.path().join(format!("artist{}", i / 25));
        std::fs::create_dir_all(&dir).expect("Failed to create artist directory");
        std::fs::write(dir.join(format!("track{i:04}.mp3")), b"x").expect("Failed to write song");
    }
    temp_dir
}

fn benchmark_model_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("model_output");

    group.bench_function("extract_choice", |b| {
        b.iter(|| llm::extract_xml_tag(black_box(RAW_ANSWER), "choice"))
    });
    group.bench_function("extract_response", |b| {
        b.iter(|| llm::extract_response_text(black_box(RAW_INTRO)))
    });

    group.finish();
}

fn benchmark_choice_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");

    for size in [10, 50, 200].iter() {
        let songs = create_test_songs(*size);
        let exact = songs[size - 1].file_name();

        group.bench_with_input(BenchmarkId::new("exact", size), &songs, |b, songs| {
            b.iter(|| selector::resolve_choice(black_box(&exact), black_box(songs)))
        });
        group.bench_with_input(BenchmarkId::new("fuzzy_miss", size), &songs, |b, songs| {
            b.iter(|| {
                selector::resolve_choice(black_box("a track about harbors"), black_box(songs))
            })
        });
    }

    group.finish();
}

fn benchmark_intro_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("intro_validation");

    group.bench_function("sanitize", |b| {
        b.iter(|| intro::sanitize_intro_text(black_box(RAW_INTRO)))
    });
    group.bench_function("finalize", |b| {
        b.iter(|| {
            let previous = Some("Sunrise");
            intro::finalize_intro_text(black_box(RAW_INTRO), "Harbor Lights", previous, false)
        })
    });
    group.bench_function("relaxed", |b| {
        b.iter(|| intro::build_relaxed_intro(black_box(RAW_INTRO), "Harbor Lights"))
    });

    group.finish();
}

fn benchmark_speech_formatting(c: &mut Criterion) {
    let mut group = c.benchmark_group("speech_formatting");
    let text =
        intro::finalize_intro_text(RAW_INTRO, "Harbor Lights", None, false).unwrap_or_default();

    group.bench_function("format_intro_for_tts", |b| {
        b.iter(|| tts::format_intro_for_tts(black_box(&text)))
    });
    group.bench_function("chunk_text", |b| {
        b.iter(|| tts::chunk_text(black_box(&text), tts::GTTS_CHUNK_CHARS))
    });

    group.finish();
}

fn benchmark_library_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("library");
    let dir = create_library(500);

    group.bench_function("scan_500", |b| {
        b.iter(|| library::get_song_list(black_box(dir.path())).expect("scan failed"))
    });

    let songs = library::get_song_list(dir.path()).expect("scan failed");
    group.bench_function("sample_10", |b| {
        b.iter(|| library::select_song_list(black_box(&songs), 10))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_model_output,
    benchmark_choice_resolution,
    benchmark_intro_validation,
    benchmark_speech_formatting,
    benchmark_library_scan
);

criterion_main!(benches);
