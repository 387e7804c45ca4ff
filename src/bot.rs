//! Command handling and per-user dispatch.

use crate::error::{BotError, ErrorKind};
use crate::pipeline::Renderer;
use crate::session::{Session, SessionStore, UserId};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const USAGE: &str = "مرحباً! لاختيار نوع الفيديو، استخدم الأمر /set_orientation [عمودي/أفقي]. \n\
ثم استخدم الأمر /send_images لإرسال الصور. \n\
وبعدها استخدم الأمر /send_audio لإرسال المقطع الصوتي. \n\
أخيرًا، استخدم الأمر /create_video لإنشاء الفيديو.";
const ASK_IMAGES: &str = "يرجى إرسال الصور (jpg, jpeg, png).";
const ASK_AUDIO: &str = "يرجى إرسال المقطع الصوتي (mp3).";
const WORKING: &str = "الفيديو تحت الإنشاء، يرجى الانتظار...";
const DONE: &str = "تم إنشاء الفيديو بنجاح!";
const HINT: &str = "أمر غير معروف. استخدم /start لعرض التعليمات.";

/// A user's worker exits after this long without updates.
const WORKER_IDLE: Duration = Duration::from_secs(600);

static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^/([A-Za-z_]+)(?:@\w+)?(?:\s+(.*))?$").unwrap());

/// Outbound side of the chat transport.
#[async_trait]
pub trait Chat: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
    async fn send_video(&self, chat_id: i64, path: &Path) -> Result<()>;
    async fn download(&self, file_id: &str, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Text(String),
    Photo { file_id: String },
    Audio { file_id: String, extension: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub chat_id: i64,
    pub user_id: UserId,
    pub incoming: Incoming,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    SetOrientation(Option<String>),
    SendImages,
    SendAudio,
    CreateVideo,
    Unknown(String),
}

impl Command {
    /// Parses `/name[@bot] [args]`. Plain text is not a command.
    pub fn parse(text: &str) -> Option<Command> {
        let caps = COMMAND_RE.captures(text.trim())?;
        let name = caps.get(1)?.as_str();
        let arg = caps
            .get(2)
            .and_then(|m| m.as_str().split_whitespace().next())
            .map(str::to_string);
        Some(match name {
            "start" => Command::Start,
            "set_orientation" => Command::SetOrientation(arg),
            "send_images" => Command::SendImages,
            "send_audio" => Command::SendAudio,
            "create_video" => Command::CreateVideo,
            other => Command::Unknown(other.to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Dirs {
    pub images: PathBuf,
    pub effects: PathBuf,
}

pub struct Bot {
    chat: Arc<dyn Chat>,
    renderer: Arc<dyn Renderer>,
    store: SessionStore,
    dirs: Dirs,
}

/// Hands back the session only if it has images and audio.
pub fn check_ready(session: Option<Session>) -> Result<Session, BotError> {
    let session = session.ok_or(BotError::NoImages)?;
    if session.image_paths.is_empty() {
        return Err(BotError::NoImages);
    }
    if session.sound_effect_path.is_none() {
        return Err(BotError::NoAudio);
    }
    Ok(session)
}

impl Bot {
    pub fn new(chat: Arc<dyn Chat>, renderer: Arc<dyn Renderer>, dirs: Dirs) -> Self {
        Self {
            chat,
            renderer,
            store: SessionStore::new(),
            dirs,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn handle(&self, envelope: Envelope) -> Result<()> {
        let Envelope {
            chat_id,
            user_id,
            incoming,
        } = envelope;
        match incoming {
            Incoming::Photo { file_id } => self.receive_image(chat_id, user_id, &file_id).await,
            Incoming::Audio { file_id, extension } => {
                self.receive_audio(chat_id, user_id, &file_id, extension).await
            }
            Incoming::Text(text) => match Command::parse(&text) {
                Some(command) => self.run_command(chat_id, user_id, command).await,
                None => self.chat.send_text(chat_id, HINT).await,
            },
        }
    }

    async fn run_command(&self, chat_id: i64, user_id: UserId, command: Command) -> Result<()> {
        debug!("User {} sent {:?}", user_id, command);
        match command {
            Command::Start => {
                self.store.get_or_create(user_id);
                self.chat.send_text(chat_id, USAGE).await
            }
            Command::SendImages => self.chat.send_text(chat_id, ASK_IMAGES).await,
            Command::SendAudio => self.chat.send_text(chat_id, ASK_AUDIO).await,
            Command::SetOrientation(arg) => self.set_orientation(chat_id, user_id, arg).await,
            Command::CreateVideo => self.create_video(chat_id, user_id).await,
            Command::Unknown(name) => {
                debug!("Unknown command /{}", name);
                self.chat.send_text(chat_id, HINT).await
            }
        }
    }

    async fn set_orientation(&self, chat_id: i64, user_id: UserId, arg: Option<String>) -> Result<()> {
        let reply = match arg {
            None => BotError::MissingArgument("set_orientation").user_message(),
            Some(token) => match self.store.set_orientation(user_id, &token) {
                Ok(orientation) => {
                    info!("User {} chose {} orientation", user_id, orientation);
                    format!("تم تحديد نوع الفيديو: {}.", orientation.arabic_name())
                }
                Err(e) => e.user_message(),
            },
        };
        self.chat.send_text(chat_id, &reply).await
    }

    async fn receive_image(&self, chat_id: i64, user_id: UserId, file_id: &str) -> Result<()> {
        let dest = self.dirs.images.join(format!("{}_{}.jpg", user_id, file_id));
        if let Err(e) = self.chat.download(file_id, &dest).await {
            warn!("Image download {} failed: {:#}", file_id, e);
            remove_partial(&dest).await;
            let reply = BotError::Download(e.to_string()).user_message();
            return self.chat.send_text(chat_id, &reply).await;
        }
        let count = self.store.append_image(user_id, dest);
        info!("User {} has {} image(s)", user_id, count);
        self.chat
            .send_text(chat_id, &format!("تم استلام الصورة: {}", file_id))
            .await
    }

    async fn receive_audio(&self, chat_id: i64, user_id: UserId, file_id: &str, extension: &str) -> Result<()> {
        let dest = self
            .dirs
            .effects
            .join(format!("{}_{}.{}", user_id, file_id, extension));
        if let Err(e) = self.chat.download(file_id, &dest).await {
            warn!("Audio download {} failed: {:#}", file_id, e);
            remove_partial(&dest).await;
            let reply = BotError::Download(e.to_string()).user_message();
            return self.chat.send_text(chat_id, &reply).await;
        }
        if let Some(previous) = self.store.set_audio(user_id, dest.clone()) {
            if previous != dest {
                remove_quietly(&previous).await;
            }
        }
        info!("User {} set background audio {}", user_id, dest.display());
        self.chat
            .send_text(chat_id, &format!("تم استلام المقطع الصوتي: {}", file_id))
            .await
    }

    async fn create_video(&self, chat_id: i64, user_id: UserId) -> Result<()> {
        let session = match check_ready(self.store.snapshot(user_id)) {
            Ok(session) => session,
            Err(e) => return self.chat.send_text(chat_id, &e.user_message()).await,
        };

        self.chat.send_text(chat_id, WORKING).await?;
        let video = match self.renderer.render(user_id, &session).await {
            Ok(video) => video,
            Err(e) => {
                // Uploads stay in place so the user can retry.
                match e.kind() {
                    ErrorKind::ExternalService => warn!("Render for user {} failed: {}", user_id, e),
                    ErrorKind::InputValidation | ErrorKind::Corpus => {
                        info!("Render for user {} rejected: {}", user_id, e)
                    }
                }
                return self.chat.send_text(chat_id, &e.user_message()).await;
            }
        };
        info!(
            "Rendered {} segment(s), {:.1}s for user {}",
            video.segments, video.duration_secs, user_id
        );

        if let Err(e) = self.chat.send_video(chat_id, &video.path).await {
            error!("Delivering {} failed: {:#}", video.path.display(), e);
            remove_quietly(&video.path).await;
            let reply = format!("حدث خطأ أثناء إرسال الفيديو: {}", e);
            return self.chat.send_text(chat_id, &reply).await;
        }
        // Delivered: from here on the request counts as done.
        if let Err(e) = self.chat.send_text(chat_id, DONE).await {
            warn!("Could not confirm delivery to chat {}: {:#}", chat_id, e);
        }

        for image in &session.image_paths {
            remove_quietly(image).await;
        }
        if let Some(audio) = &session.sound_effect_path {
            remove_quietly(audio).await;
        }
        remove_quietly(&video.path).await;
        self.store.reset(user_id);
        Ok(())
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not remove {}: {}", path.display(), e);
    }
}

/// Drops whatever a failed download left behind. A missing file is fine.
async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

/// Routes envelopes to one worker per user so each user's messages are
/// handled in arrival order while different users proceed in parallel.
/// Idle workers exit and are pruned; a replacement waits for its
/// predecessor to finish before handling anything.
pub struct Dispatcher {
    bot: Arc<Bot>,
    idle: Duration,
    workers: HashMap<UserId, Worker>,
}

struct Worker {
    tx: mpsc::UnboundedSender<Envelope>,
    task: JoinHandle<()>,
}

impl Dispatcher {
    pub fn new(bot: Arc<Bot>) -> Self {
        Self::with_idle_timeout(bot, WORKER_IDLE)
    }

    pub fn with_idle_timeout(bot: Arc<Bot>, idle: Duration) -> Self {
        Self {
            bot,
            idle,
            workers: HashMap::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn dispatch(&mut self, envelope: Envelope) {
        self.workers.retain(|_, worker| !worker.task.is_finished());

        let user_id = envelope.user_id;
        let envelope = match self.workers.get(&user_id) {
            Some(worker) => match worker.tx.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };
        let previous = self.workers.remove(&user_id).map(|worker| worker.task);
        let worker = self.spawn_worker(user_id, previous);
        if worker.tx.send(envelope).is_err() {
            error!("Worker for user {} exited immediately", user_id);
        }
        self.workers.insert(user_id, worker);
    }

    fn spawn_worker(&self, user_id: UserId, previous: Option<JoinHandle<()>>) -> Worker {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let bot = self.bot.clone();
        let idle = self.idle;
        debug!("Starting worker for user {}", user_id);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            loop {
                match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(envelope)) => handle_logged(&bot, user_id, envelope).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Refuse new sends, then finish what is already queued.
                        rx.close();
                        while let Some(envelope) = rx.recv().await {
                            handle_logged(&bot, user_id, envelope).await;
                        }
                        debug!("Worker for user {} idle, exiting", user_id);
                        break;
                    }
                }
            }
        });
        Worker { tx, task }
    }
}

async fn handle_logged(bot: &Bot, user_id: UserId, envelope: Envelope) {
    if let Err(e) = bot.handle(envelope).await {
        error!("Handling update for user {} failed: {:#}", user_id, e);
    }
}
