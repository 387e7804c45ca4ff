//! Joins composed segments, lays the background track underneath and encodes.

use crate::compose::{Segment, fade_secs};
use crate::error::{BotError, Result};
use crate::ffmpeg::{probe_duration, run_ffmpeg};
use std::path::{Path, PathBuf};
use tracing::info;

pub const SEGMENT_FADE_SECS: f64 = 1.0;
/// Slack allowed between the probed background length and the video length.
const BACKGROUND_TOLERANCE_SECS: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub fps: u32,
    pub video_codec: String,
    pub font: PathBuf,
    /// Overlap between neighbouring segments in seconds.
    pub transition_secs: f64,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            fps: 24,
            video_codec: "libx264".to_string(),
            font: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            transition_secs: 0.0,
        }
    }
}

pub struct Assembler {
    settings: EncodeSettings,
}

/// Smallest even-sized frame that holds every segment's image.
pub fn canvas(segments: &[Segment]) -> (u32, u32) {
    let even = |v: u32| v + (v % 2);
    let w = segments.iter().map(|s| s.image.width).max().unwrap_or(2);
    let h = segments.iter().map(|s| s.image.height).max().unwrap_or(2);
    (even(w), even(h))
}

/// Overlap actually applied: never more than half of the shortest segment.
pub fn effective_transition(segments: &[Segment], requested: f64) -> f64 {
    if segments.len() < 2 || requested <= 0.0 {
        return 0.0;
    }
    let shortest = segments
        .iter()
        .map(|s| s.duration_secs)
        .fold(f64::INFINITY, f64::min);
    requested.min(shortest / 2.0)
}

/// Length of the joined video: every segment minus one overlap per join.
pub fn total_duration(segments: &[Segment], transition: f64) -> f64 {
    let sum: f64 = segments.iter().map(|s| s.duration_secs).sum();
    let joins = segments.len().saturating_sub(1) as f64;
    sum - joins * transition
}

impl Assembler {
    pub fn new(settings: EncodeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EncodeSettings {
        &self.settings
    }

    /// Builds the `-filter_complex` graph. Segment `i` reads its image from
    /// input `2i` and its narration from `2i + 1`; the background is input `2n`.
    pub fn filter_graph(&self, segments: &[Segment]) -> String {
        let n = segments.len();
        let canvas = canvas(segments);
        let overlap = effective_transition(segments, self.settings.transition_secs);
        let total = total_duration(segments, overlap);
        let fps = self.settings.fps;

        let mut parts = Vec::with_capacity(2 * n + 4);
        for (i, segment) in segments.iter().enumerate() {
            let d = segment.duration_secs;
            let f = fade_secs(SEGMENT_FADE_SECS, d);
            parts.push(format!(
                "{},fps={},fade=t=in:st=0:d={:.3},fade=t=out:st={:.3}:d={:.3}[v{}]",
                segment.video_chain(2 * i, canvas, &self.settings.font),
                fps,
                f,
                d - f,
                f,
                i
            ));
            parts.push(format!("{}[a{}]", segment.audio_chain(2 * i + 1), i));
        }

        let (video, audio) = if overlap > 0.0 {
            let mut video = "v0".to_string();
            let mut audio = "a0".to_string();
            let mut offset = 0.0;
            for (prev, segment) in segments.iter().enumerate().take(n - 1) {
                let k = prev + 1;
                offset += segment.duration_secs - overlap;
                parts.push(format!(
                    "[{}][v{}]xfade=transition=fade:duration={:.3}:offset={:.3}[x{}]",
                    video, k, overlap, offset, k
                ));
                parts.push(format!("[{}][a{}]acrossfade=d={:.3}[y{}]", audio, k, overlap, k));
                video = format!("x{}", k);
                audio = format!("y{}", k);
            }
            (video, audio)
        } else {
            let inputs: String = (0..n).map(|i| format!("[v{}][a{}]", i, i)).collect();
            parts.push(format!("{}concat=n={}:v=1:a=1[vcat][acat]", inputs, n));
            ("vcat".to_string(), "acat".to_string())
        };

        parts.push(format!("[{}]fps={}[vout]", video, fps));
        parts.push(format!(
            "[{}:a]atrim=0:{:.3},asetpts=PTS-STARTPTS,aresample=44100,\
             aformat=sample_fmts=fltp:channel_layouts=stereo[bg]",
            2 * n,
            total
        ));
        parts.push(format!(
            "[{}][bg]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]",
            audio
        ));
        parts.join(";")
    }

    /// Full ffmpeg argument list, minus the global flags `run_ffmpeg` adds.
    pub fn command_args(&self, segments: &[Segment], background: &Path, output: &Path) -> Vec<String> {
        let overlap = effective_transition(segments, self.settings.transition_secs);
        let total = total_duration(segments, overlap);
        let fps = self.settings.fps.to_string();

        let mut args: Vec<String> = Vec::new();
        for segment in segments {
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-framerate".to_string(),
                fps.clone(),
                "-t".to_string(),
                format!("{:.3}", segment.duration_secs),
                "-i".to_string(),
                segment.image.path.to_string_lossy().into_owned(),
                "-i".to_string(),
                segment.narration.path.to_string_lossy().into_owned(),
            ]);
        }
        args.extend([
            "-i".to_string(),
            background.to_string_lossy().into_owned(),
            "-filter_complex".to_string(),
            self.filter_graph(segments),
            "-map".to_string(),
            "[vout]".to_string(),
            "-map".to_string(),
            "[aout]".to_string(),
            "-c:v".to_string(),
            self.settings.video_codec.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            fps,
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-t".to_string(),
            format!("{:.3}", total),
            output.to_string_lossy().into_owned(),
        ]);
        args
    }

    /// Encodes `segments` over `background` into `output` and returns the
    /// video length. Segments are consumed; their files belong to the
    /// caller's scratch directory.
    pub async fn assemble(&self, segments: Vec<Segment>, background: &Path, output: &Path) -> Result<f64> {
        if segments.is_empty() {
            return Err(BotError::NoImages);
        }
        let overlap = effective_transition(&segments, self.settings.transition_secs);
        let total = total_duration(&segments, overlap);

        check_background(probe_duration(background).await?, total)?;

        info!(
            "Encoding {} segments ({:.2}s, overlap {:.2}s) into {}",
            segments.len(),
            total,
            overlap,
            output.display()
        );
        let args = self.command_args(&segments, background, output);
        drop(segments);
        run_ffmpeg(&args).await?;
        info!("Final video written to {}", output.display());
        Ok(total)
    }
}

/// The background must cover the whole video, give or take probe rounding.
pub fn check_background(available: f64, needed: f64) -> Result<()> {
    if available + BACKGROUND_TOLERANCE_SECS < needed {
        return Err(BotError::BackgroundTooShort { available, needed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::PreparedImage;
    use crate::tts::Narration;

    fn segment(i: usize, w: u32, h: u32, secs: f64) -> Segment {
        Segment {
            image: PreparedImage {
                path: PathBuf::from(format!("/work/blurred_{i}.jpg")),
                width: w,
                height: h,
            },
            narration: Narration {
                path: PathBuf::from(format!("/work/voice_{i}.wav")),
            },
            caption_path: PathBuf::from(format!("/work/caption_{i}.txt")),
            font_size: 40,
            duration_secs: secs,
        }
    }

    fn assembler(transition: f64) -> Assembler {
        Assembler::new(EncodeSettings {
            transition_secs: transition,
            font: PathBuf::from("/fonts/a.ttf"),
            ..EncodeSettings::default()
        })
    }

    #[test]
    fn canvas_covers_every_image_with_even_sides() {
        let segments = vec![segment(0, 1280, 853, 2.0), segment(1, 1280, 961, 2.0)];
        assert_eq!(canvas(&segments), (1280, 962));

        let vertical = vec![segment(0, 721, 1280, 2.0), segment(1, 1707, 1280, 2.0)];
        assert_eq!(canvas(&vertical), (1708, 1280));
    }

    #[test]
    fn duration_without_overlap_is_the_sum() {
        let segments = vec![segment(0, 10, 10, 3.0), segment(1, 10, 10, 4.5), segment(2, 10, 10, 2.5)];
        assert_eq!(total_duration(&segments, 0.0), 10.0);
    }

    #[test]
    fn each_join_subtracts_one_overlap() {
        let segments = vec![segment(0, 10, 10, 3.0), segment(1, 10, 10, 4.5), segment(2, 10, 10, 2.5)];
        let overlap = effective_transition(&segments, 0.5);
        assert_eq!(overlap, 0.5);
        assert_eq!(total_duration(&segments, overlap), 9.0);
    }

    #[test]
    fn background_must_cover_the_video() {
        match check_background(8.0, 9.0) {
            Err(BotError::BackgroundTooShort { available, needed }) => {
                assert_eq!((available, needed), (8.0, 9.0));
            }
            other => panic!("expected BackgroundTooShort, got {other:?}"),
        }
        assert!(check_background(9.0, 9.0).is_ok());
        assert!(check_background(8.995, 9.0).is_ok());
        assert!(check_background(30.0, 9.0).is_ok());
    }

    #[test]
    fn overlap_is_limited_by_the_shortest_segment() {
        let segments = vec![segment(0, 10, 10, 0.8), segment(1, 10, 10, 4.0)];
        assert_eq!(effective_transition(&segments, 1.0), 0.4);
        assert_eq!(effective_transition(&segments[..1], 1.0), 0.0);
    }

    #[test]
    fn concat_graph_fades_each_segment_and_mixes_background() {
        let segments = vec![segment(0, 1280, 720, 3.0), segment(1, 1280, 960, 5.0)];
        let graph = assembler(0.0).filter_graph(&segments);

        assert!(graph.contains("fade=t=in:st=0:d=1.000,fade=t=out:st=2.000:d=1.000[v0]"));
        assert!(graph.contains("fade=t=in:st=0:d=1.000,fade=t=out:st=4.000:d=1.000[v1]"));
        assert!(graph.contains("[1:a]"));
        assert!(graph.contains("[3:a]"));
        assert!(graph.contains("[v0][a0][v1][a1]concat=n=2:v=1:a=1[vcat][acat]"));
        assert!(graph.contains("[4:a]atrim=0:8.000"));
        assert!(graph.contains("[acat][bg]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]"));
        assert!(graph.contains("pad=1280:960"));
        assert!(!graph.contains("xfade"));
    }

    #[test]
    fn overlapping_graph_chains_crossfades() {
        let segments = vec![segment(0, 100, 100, 3.0), segment(1, 100, 100, 4.0), segment(2, 100, 100, 2.0)];
        let graph = assembler(0.5).filter_graph(&segments);

        assert!(graph.contains("[v0][v1]xfade=transition=fade:duration=0.500:offset=2.500[x1]"));
        assert!(graph.contains("[x1][v2]xfade=transition=fade:duration=0.500:offset=6.000[x2]"));
        assert!(graph.contains("[a0][a1]acrossfade=d=0.500[y1]"));
        assert!(graph.contains("[y1][a2]acrossfade=d=0.500[y2]"));
        assert!(graph.contains("[x2]fps=24[vout]"));
        assert!(graph.contains("[6:a]atrim=0:8.000"));
        assert!(!graph.contains("concat="));
    }

    #[test]
    fn command_loops_images_for_their_narration_length() {
        let segments = vec![segment(0, 100, 100, 3.0), segment(1, 100, 100, 4.25)];
        let args = assembler(0.0).command_args(&segments, Path::new("/bg.mp3"), Path::new("/out.mp4"));

        let joined = args.join(" ");
        assert!(joined.starts_with("-loop 1 -framerate 24 -t 3.000 -i /work/blurred_0.jpg -i /work/voice_0.wav"));
        assert!(joined.contains("-t 4.250 -i /work/blurred_1.jpg -i /work/voice_1.wav -i /bg.mp3"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-r 24"));
        assert_eq!(args.last().map(String::as_str), Some("/out.mp4"));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 5);
    }

    #[tokio::test]
    async fn nothing_to_assemble_is_rejected() {
        let err = assembler(0.0)
            .assemble(Vec::new(), Path::new("/bg.mp3"), Path::new("/out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::NoImages));
    }
}
