//! One render request: quotes, narration, backgrounds, segments, final encode.

use crate::assemble::Assembler;
use crate::background;
use crate::compose::{Segment, compose_segment};
use crate::error::{BotError, Result};
use crate::quotes::{Quote, QuoteSource};
use crate::session::{Session, UserId};
use crate::tts::Synthesizer;
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedVideo {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub segments: usize,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Renders a video for `session`. Only derived artifacts are touched; the
    /// session's own image and audio files are left for the caller.
    async fn render(&self, user: UserId, session: &Session) -> Result<RenderedVideo>;
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub base_size: u32,
    pub blur_sigma: f32,
}

pub struct Pipeline {
    quotes: Arc<QuoteSource>,
    synthesizer: Arc<dyn Synthesizer>,
    assembler: Assembler,
    image: ImageSettings,
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        quotes: Arc<QuoteSource>,
        synthesizer: Arc<dyn Synthesizer>,
        assembler: Assembler,
        image: ImageSettings,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            quotes,
            synthesizer,
            assembler,
            image,
            output_dir,
        }
    }

    /// Narrates each quote over its image, in order.
    pub async fn compose_all(&self, quotes: &[Quote], session: &Session, scratch: &Path) -> Result<Vec<Segment>> {
        let mut segments = Vec::with_capacity(quotes.len());
        for (i, (quote, image_path)) in quotes.iter().zip(&session.image_paths).enumerate() {
            info!("Building segment {}/{}", i + 1, quotes.len());
            let narration = self
                .synthesizer
                .synthesize(&quote.text, &quote.author, i, scratch)
                .await?;
            let prepared = background::prepare(
                image_path,
                scratch,
                self.image.base_size,
                self.image.blur_sigma,
                session.orientation,
            )
            .await?;
            segments.push(compose_segment(
                quote,
                prepared,
                narration,
                session.orientation,
                i,
                scratch,
            )?);
        }
        Ok(segments)
    }
}

#[async_trait]
impl Renderer for Pipeline {
    async fn render(&self, user: UserId, session: &Session) -> Result<RenderedVideo> {
        if session.image_paths.is_empty() {
            return Err(BotError::NoImages);
        }
        let background = session.sound_effect_path.as_deref().ok_or(BotError::NoAudio)?;

        let mut rng = StdRng::from_entropy();
        let quotes = self.quotes.sample(&mut rng, session.image_paths.len())?;

        // Removed on drop, whatever the outcome.
        let scratch = tempfile::Builder::new()
            .prefix(&format!("render_{}_", user))
            .tempdir_in(&self.output_dir)?;
        info!(
            "Rendering {} segments ({}) for user {} in {}",
            quotes.len(),
            session.orientation,
            user,
            scratch.path().display()
        );

        let segments = self.compose_all(&quotes, session, scratch.path()).await?;
        let count = segments.len();

        let output = self
            .output_dir
            .join(format!("{}_{}.mp4", user, uuid::Uuid::new_v4()));
        match self.assembler.assemble(segments, background, &output).await {
            Ok(duration_secs) => Ok(RenderedVideo {
                path: output,
                duration_secs,
                segments: count,
            }),
            Err(e) => {
                if output.exists() {
                    if let Err(rm) = tokio::fs::remove_file(&output).await {
                        warn!("Could not remove partial output {}: {}", output.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::EncodeSettings;
    use crate::audio::PcmWavWriter;
    use crate::session::Orientation;
    use crate::tts::Narration;
    use image::{Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes silent narrations whose length grows with the item index.
    struct FakeVoice {
        calls: AtomicUsize,
        fail_at: Option<usize>,
    }

    impl FakeVoice {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_at,
            }
        }
    }

    #[async_trait]
    impl Synthesizer for FakeVoice {
        async fn synthesize(&self, _quote: &str, _author: &str, index: usize, dest_dir: &Path) -> Result<Narration> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(index) {
                return Err(BotError::Synthesis("HTTP 401: unauthorized".to_string()));
            }
            let path = dest_dir.join(format!("voice_{index}.wav"));
            let mut writer = PcmWavWriter::create(&path, 22050).unwrap();
            writer.write_chunk(&vec![0u8; 22050 * 2 * (index + 2)]).unwrap();
            writer.finalize().unwrap();
            Ok(Narration { path })
        }
    }

    fn corpus(n: usize) -> Arc<QuoteSource> {
        Arc::new(QuoteSource::new(
            (0..n)
                .map(|i| Quote {
                    text: format!("حكمة {i}"),
                    author: format!("كاتب {i}"),
                })
                .collect(),
        ))
    }

    fn session_with_images(dir: &Path, count: usize, orientation: Orientation) -> Session {
        let image_paths = (0..count)
            .map(|i| {
                let path = dir.join(format!("7_file{i}.png"));
                RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 9])).save(&path).unwrap();
                path
            })
            .collect();
        Session {
            image_paths,
            sound_effect_path: Some(dir.join("bg.mp3")),
            orientation,
        }
    }

    fn pipeline(voice: Arc<FakeVoice>, corpus_size: usize, output_dir: &Path) -> Pipeline {
        Pipeline::new(
            corpus(corpus_size),
            voice,
            Assembler::new(EncodeSettings::default()),
            ImageSettings {
                base_size: 64,
                blur_sigma: 1.0,
            },
            output_dir.to_path_buf(),
        )
    }

    fn leftover_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn one_narration_and_segment_per_image() {
        let inputs = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let voice = Arc::new(FakeVoice::new(None));
        let pipeline = pipeline(voice.clone(), 10, scratch.path());
        let session = session_with_images(inputs.path(), 3, Orientation::Vertical);

        let mut rng = StdRng::seed_from_u64(3);
        let quotes = pipeline.quotes.sample(&mut rng, 3).unwrap();
        let segments = pipeline.compose_all(&quotes, &session, scratch.path()).await.unwrap();

        assert_eq!(voice.calls.load(Ordering::SeqCst), 3);
        assert_eq!(segments.len(), 3);
        for (i, segment) in segments.iter().enumerate() {
            assert!((segment.duration_secs - (i + 2) as f64).abs() < 1e-6);
            assert_eq!(segment.font_size, 30);
            assert_eq!((segment.image.width, segment.image.height), (85, 64));
            assert!(segment.image.path.ends_with(format!("blurred_7_file{i}.png")));
        }
    }

    #[tokio::test]
    async fn oversized_session_fails_before_any_synthesis() {
        let inputs = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let voice = Arc::new(FakeVoice::new(None));
        let pipeline = pipeline(voice.clone(), 2, output.path());
        let session = session_with_images(inputs.path(), 3, Orientation::Horizontal);

        let err = pipeline.render(7, &session).await.unwrap_err();
        assert!(matches!(err, BotError::InsufficientCorpus { requested: 3, available: 2 }));
        assert_eq!(voice.calls.load(Ordering::SeqCst), 0);
        assert_eq!(leftover_entries(output.path()), 0);
    }

    #[tokio::test]
    async fn synthesis_failure_aborts_and_cleans_scratch() {
        let inputs = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let voice = Arc::new(FakeVoice::new(Some(1)));
        let pipeline = pipeline(voice.clone(), 5, output.path());
        let session = session_with_images(inputs.path(), 3, Orientation::Horizontal);

        let err = pipeline.render(7, &session).await.unwrap_err();
        assert!(matches!(err, BotError::Synthesis(_)));
        assert_eq!(voice.calls.load(Ordering::SeqCst), 2);
        assert_eq!(leftover_entries(output.path()), 0);
        // the user's uploads are untouched
        assert!(session.image_paths.iter().all(|p| p.exists()));
    }

    #[tokio::test]
    async fn missing_inputs_are_rejected() {
        let output = tempfile::tempdir().unwrap();
        let pipeline = pipeline(Arc::new(FakeVoice::new(None)), 5, output.path());

        let empty = Session::default();
        assert!(matches!(pipeline.render(1, &empty).await, Err(BotError::NoImages)));

        let no_audio = Session {
            image_paths: vec![PathBuf::from("a.jpg")],
            ..Session::default()
        };
        assert!(matches!(pipeline.render(1, &no_audio).await, Err(BotError::NoAudio)));
    }
}
