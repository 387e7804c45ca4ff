use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
pub struct Args {
    #[clap(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    pub telegram_token: String,

    #[clap(long, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
    pub elevenlabs_api_key: String,

    #[clap(long, default_value = "assets/images")]
    pub images_dir: PathBuf,

    #[clap(long, default_value = "assets/effects")]
    pub effects_dir: PathBuf,

    #[clap(long, default_value = "assets/output")]
    pub output_dir: PathBuf,

    /// Local copy of the quote corpus; fetched from the dataset hub when absent.
    #[clap(long, default_value = "assets/arabic_quotes.json")]
    pub corpus: PathBuf,

    #[clap(long, default_value = "HeshamHaroon/arabic-quotes")]
    pub corpus_dataset: String,

    #[clap(long, default_value = "N2lVS1w4EtoT3dr4eOWO")]
    pub voice_id: String,

    #[clap(long, default_value = "eleven_multilingual_v1")]
    pub model_id: String,

    #[clap(long, default_value_t = 1280)]
    pub base_size: u32,

    #[clap(long, default_value_t = 2.0)]
    pub blur: f32,

    #[clap(long, default_value_t = 24)]
    pub fps: u32,

    /// Font used for captions. Must contain Arabic glyphs.
    #[clap(long, default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")]
    pub font: PathBuf,

    /// Seconds of overlap between consecutive segments. 0 joins them back to back.
    #[clap(long, default_value_t = 0.0)]
    pub transition: f64,

    #[clap(long, default_value = "info")]
    pub log: String,
}
