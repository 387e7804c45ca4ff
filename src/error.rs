//! Error taxonomy for the video pipeline and the chat commands.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

/// Coarse classification of a failure. Rejected requests are logged as
/// routine; service failures are logged as warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing user input. Nothing was attempted.
    InputValidation,
    /// A dependency (TTS, ffmpeg, image codec, Telegram) failed mid-request.
    ExternalService,
    /// The quote corpus cannot satisfy the request.
    Corpus,
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("invalid orientation: {0}")]
    InvalidOrientation(String),

    #[error("missing argument for /{0}")]
    MissingArgument(&'static str),

    #[error("no images in session")]
    NoImages,

    #[error("no background audio in session")]
    NoAudio,

    #[error("requested {requested} quotes but the corpus only has {available}")]
    InsufficientCorpus { requested: usize, available: usize },

    #[error("cannot decode image {path}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("background audio is {available:.2}s but the video needs {needed:.2}s")]
    BackgroundTooShort { available: f64, needed: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::InvalidOrientation(_)
            | BotError::MissingArgument(_)
            | BotError::NoImages
            | BotError::NoAudio => ErrorKind::InputValidation,
            BotError::InsufficientCorpus { .. } => ErrorKind::Corpus,
            _ => ErrorKind::ExternalService,
        }
    }

    /// Reply text shown to the user in the chat.
    pub fn user_message(&self) -> String {
        match self {
            BotError::InvalidOrientation(_) => {
                "خيار غير صحيح. يرجى اختيار 'عمودي' أو 'أفقي'.".to_string()
            }
            BotError::MissingArgument(_) => "يرجى تحديد نوع الفيديو: عمودي أو أفقي.".to_string(),
            BotError::NoImages => {
                "لم يتم استلام أي صور. يرجى إرسال الصور أولاً باستخدام الأمر /send_images."
                    .to_string()
            }
            BotError::NoAudio => {
                "لم يتم استلام أي مقطع صوتي. يرجى إرسال المقطع الصوتي باستخدام الأمر /send_audio."
                    .to_string()
            }
            BotError::InsufficientCorpus { requested, available } => format!(
                "عدد الصور ({requested}) أكبر من عدد الحكم المتاحة ({available}). يرجى تقليل عدد الصور."
            ),
            BotError::Download(message) => format!("تعذر تحميل الملف: {message}"),
            other => format!("حدث خطأ أثناء إنشاء الفيديو: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_classified() {
        assert_eq!(BotError::NoImages.kind(), ErrorKind::InputValidation);
        assert_eq!(BotError::NoAudio.kind(), ErrorKind::InputValidation);
        assert_eq!(
            BotError::InvalidOrientation("x".into()).kind(),
            ErrorKind::InputValidation
        );
    }

    #[test]
    fn corpus_and_service_errors_are_classified() {
        let corpus = BotError::InsufficientCorpus { requested: 5, available: 2 };
        assert_eq!(corpus.kind(), ErrorKind::Corpus);
        assert!(corpus.user_message().contains('5'));

        let encode = BotError::Encode("boom".into());
        assert_eq!(encode.kind(), ErrorKind::ExternalService);
        assert!(encode.user_message().contains("boom"));
    }
}
