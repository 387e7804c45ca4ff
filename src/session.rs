//! In-memory per-user state collected before a render.

use crate::error::{BotError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    Vertical,
    #[default]
    Horizontal,
}

impl Orientation {
    pub fn arabic_name(self) -> &'static str {
        match self {
            Orientation::Vertical => "عمودي",
            Orientation::Horizontal => "أفقي",
        }
    }
}

impl FromStr for Orientation {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "عمودي" | "vertical" => Ok(Orientation::Vertical),
            "أفقي" | "horizontal" => Ok(Orientation::Horizontal),
            other => Err(BotError::InvalidOrientation(other.to_string())),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Vertical => write!(f, "vertical"),
            Orientation::Horizontal => write!(f, "horizontal"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub image_paths: Vec<PathBuf>,
    pub sound_effect_path: Option<PathBuf>,
    pub orientation: Orientation,
}

/// Keyed session map. Callers serialize work per user; the lock here only
/// guards the map itself.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<UserId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, user: UserId) -> Session {
        self.sessions.lock().entry(user).or_default().clone()
    }

    pub fn snapshot(&self, user: UserId) -> Option<Session> {
        self.sessions.lock().get(&user).cloned()
    }

    /// Parses `token` and stores it. On error the session is untouched.
    pub fn set_orientation(&self, user: UserId, token: &str) -> Result<Orientation> {
        let orientation: Orientation = token.parse()?;
        self.sessions.lock().entry(user).or_default().orientation = orientation;
        Ok(orientation)
    }

    pub fn append_image(&self, user: UserId, path: PathBuf) -> usize {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(user).or_default();
        session.image_paths.push(path);
        session.image_paths.len()
    }

    /// Replaces the background audio and hands back the one it displaced.
    pub fn set_audio(&self, user: UserId, path: PathBuf) -> Option<PathBuf> {
        self.sessions
            .lock()
            .entry(user)
            .or_default()
            .sound_effect_path
            .replace(path)
    }

    pub fn reset(&self, user: UserId) {
        self.sessions.lock().insert(user, Session::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_start_horizontal_and_empty() {
        let store = SessionStore::new();
        assert!(store.snapshot(1).is_none());
        let session = store.get_or_create(1);
        assert_eq!(session, Session::default());
        assert_eq!(session.orientation, Orientation::Horizontal);
    }

    #[test]
    fn orientation_tokens_parse() {
        assert_eq!("عمودي".parse::<Orientation>().unwrap(), Orientation::Vertical);
        assert_eq!(" أفقي ".parse::<Orientation>().unwrap(), Orientation::Horizontal);
        assert_eq!("Vertical".parse::<Orientation>().unwrap(), Orientation::Vertical);
    }

    #[test]
    fn invalid_orientation_leaves_state_alone() {
        let store = SessionStore::new();
        store.set_orientation(5, "عمودي").unwrap();
        for bad in ["", "diagonal", "عمود", "123"] {
            let err = store.set_orientation(5, bad).unwrap_err();
            assert!(matches!(err, BotError::InvalidOrientation(_)));
            assert_eq!(store.snapshot(5).unwrap().orientation, Orientation::Vertical);
        }
    }

    #[test]
    fn setting_orientation_twice_is_idempotent() {
        let once = SessionStore::new();
        once.set_orientation(9, "عمودي").unwrap();

        let twice = SessionStore::new();
        twice.set_orientation(9, "عمودي").unwrap();
        twice.set_orientation(9, "عمودي").unwrap();

        assert_eq!(once.snapshot(9), twice.snapshot(9));
    }

    #[test]
    fn audio_is_last_write_wins() {
        let store = SessionStore::new();
        assert_eq!(store.set_audio(3, "a.mp3".into()), None);
        assert_eq!(store.set_audio(3, "b.mp3".into()), Some(PathBuf::from("a.mp3")));
        assert_eq!(
            store.snapshot(3).unwrap().sound_effect_path,
            Some(PathBuf::from("b.mp3"))
        );
    }

    #[test]
    fn images_keep_arrival_order_and_reset_clears_everything() {
        let store = SessionStore::new();
        assert_eq!(store.append_image(2, "one.jpg".into()), 1);
        assert_eq!(store.append_image(2, "two.jpg".into()), 2);
        store.set_audio(2, "bg.mp3".into());
        store.set_orientation(2, "vertical").unwrap();

        let session = store.snapshot(2).unwrap();
        assert_eq!(
            session.image_paths,
            vec![PathBuf::from("one.jpg"), PathBuf::from("two.jpg")]
        );

        store.reset(2);
        assert_eq!(store.snapshot(2).unwrap(), Session::default());
    }

    #[test]
    fn users_do_not_share_sessions() {
        let store = SessionStore::new();
        store.append_image(1, "mine.jpg".into());
        assert!(store.get_or_create(2).image_paths.is_empty());
    }
}
