//! Binds one narration, one prepared image and one caption into a timed segment.

use crate::audio::wav_duration_seconds;
use crate::background::PreparedImage;
use crate::caption::{caption_text, write_caption};
use crate::error::{BotError, Result};
use crate::quotes::Quote;
use crate::session::Orientation;
use crate::tts::Narration;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CAPTION_FADE_SECS: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub image: PreparedImage,
    pub narration: Narration,
    pub caption_path: PathBuf,
    pub font_size: u32,
    pub duration_secs: f64,
}

pub fn font_size(orientation: Orientation) -> u32 {
    match orientation {
        Orientation::Vertical => 30,
        Orientation::Horizontal => 40,
    }
}

/// Fade length for a clip of `duration` seconds; short clips split their time
/// between the fade in and the fade out.
pub fn fade_secs(nominal: f64, duration: f64) -> f64 {
    nominal.min(duration / 2.0).max(0.0)
}

pub fn compose_segment(
    quote: &Quote,
    image: PreparedImage,
    narration: Narration,
    orientation: Orientation,
    index: usize,
    scratch: &Path,
) -> Result<Segment> {
    let duration_secs = wav_duration_seconds(&narration.path).map_err(|e| BotError::Write {
        path: narration.path.clone(),
        message: e.to_string(),
    })?;

    let font_size = font_size(orientation);
    let caption_path = scratch.join(format!("caption_{}.txt", index));
    let text = caption_text(&quote.text, &quote.author, image.width, font_size);
    write_caption(&caption_path, &text).map_err(|e| BotError::Write {
        path: caption_path.clone(),
        message: e.to_string(),
    })?;

    debug!(
        "Composed segment {}: {:.2}s, {}x{}, font {}",
        index, duration_secs, image.width, image.height, font_size
    );
    Ok(Segment {
        image,
        narration,
        caption_path,
        font_size,
        duration_secs,
    })
}

impl Segment {
    /// Filter chain turning input `input` (the looped image) into the captioned
    /// frame, letterboxed onto `canvas`. The caption fades independently of
    /// the segment boundaries.
    pub fn video_chain(&self, input: usize, canvas: (u32, u32), font: &Path) -> String {
        let d = self.duration_secs;
        let f = fade_secs(CAPTION_FADE_SECS, d);
        let alpha = if f > 0.0 {
            format!(
                "if(lt(t,{f:.3}),t/{f:.3},if(gt(t,{out:.3}),({d:.3}-t)/{f:.3},1))",
                f = f,
                out = d - f,
                d = d
            )
        } else {
            "1".to_string()
        };
        format!(
            "[{input}:v]setsar=1,drawtext=fontfile={font}:textfile={caption}:fontsize={size}:\
             fontcolor=white:line_spacing=8:x=(w-text_w)/2:y=(h-text_h)/2:alpha='{alpha}',\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,format=yuv420p",
            input = input,
            font = quote_filter_value(font),
            caption = quote_filter_value(&self.caption_path),
            size = self.font_size,
            alpha = alpha,
            w = canvas.0,
            h = canvas.1,
        )
    }

    /// Normalizes the narration on input `input` and pins it to the segment length.
    pub fn audio_chain(&self, input: usize) -> String {
        format!(
            "[{input}:a]aresample=44100,aformat=sample_fmts=fltp:channel_layouts=stereo,\
             apad,atrim=0:{d:.3},asetpts=PTS-STARTPTS",
            input = input,
            d = self.duration_secs
        )
    }
}

/// Quotes a path for use as a filter option value.
pub fn quote_filter_value(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\\', "/").replace('\'', "'\\''"))
}
