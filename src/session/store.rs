use super::types::{AiMode, Mode, SessionSettings};
use crate::providers::{ChatMessage, ImageResolution, ImageStyle, VisionDetail};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Idle sessions are dropped after this long.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Minimum spacing between expiry sweeps of the session map.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct SessionState {
    mode: Mode,
    history: Vec<ChatMessage>,
    settings: SessionSettings,
    touched: Option<Instant>,
}

#[derive(Debug)]
struct SessionMap {
    entries: HashMap<String, Arc<Mutex<SessionState>>>,
    last_sweep: Instant,
}

/// Per-conversation state keyed by session id.
///
/// The map lock is only held to find or create an entry; reads and writes
/// then lock that single session, so different sessions never wait on each
/// other while calls for the same session are serialized.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<SessionMap>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(SessionMap {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn entry(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        let mut sessions = self.sessions.lock();
        let now = Instant::now();
        if now.duration_since(sessions.last_sweep) >= SWEEP_INTERVAL {
            let ttl = self.ttl;
            // An entry whose Arc is still out with a caller is in use, even
            // if that caller has not locked it yet.
            sessions.entries.retain(|_, state| {
                Arc::strong_count(state) > 1
                    || state.try_lock().map_or(true, |s| {
                        s.touched.map_or(true, |t| now.duration_since(t) < ttl)
                    })
            });
            sessions.last_sweep = now;
        }
        Arc::clone(sessions.entries.entry(session_id.to_owned()).or_default())
    }

    fn existing(&self, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        self.sessions.lock().entries.get(session_id).cloned()
    }

    fn write<R>(&self, session_id: &str, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let entry = self.entry(session_id);
        let mut state = entry.lock();
        state.touched = Some(Instant::now());
        f(&mut state)
    }

    fn read<R: Default>(&self, session_id: &str, f: impl FnOnce(&SessionState) -> R) -> R {
        self.existing(session_id)
            .map(|entry| f(&entry.lock()))
            .unwrap_or_default()
    }

    /// Message history in insertion order; empty for unknown sessions.
    pub fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.read(session_id, |s| s.history.clone())
    }

    pub fn set_history(&self, session_id: &str, history: Vec<ChatMessage>) {
        self.write(session_id, |s| s.history = history);
    }

    /// Append under the session lock so concurrent appends are sequenced.
    pub fn append_messages(&self, session_id: &str, messages: impl IntoIterator<Item = ChatMessage>) {
        self.write(session_id, |s| s.history.extend(messages));
    }

    /// Insert `prompt()` as the first message unless a system message exists.
    /// Returns whether a prompt was inserted.
    pub fn ensure_system_prompt(&self, session_id: &str, prompt: impl FnOnce() -> String) -> bool {
        self.write(session_id, |s| {
            if s.history.iter().any(ChatMessage::is_system) {
                return false;
            }
            s.history.insert(0, ChatMessage::system(prompt()));
            true
        })
    }

    pub fn mode(&self, session_id: &str) -> Mode {
        self.read(session_id, |s| s.mode)
    }

    /// Switch mode. Changing to a different mode clears the history.
    pub fn set_mode(&self, session_id: &str, mode: Mode) {
        self.write(session_id, |s| {
            if s.mode != mode {
                s.history.clear();
            }
            s.mode = mode;
        });
    }

    pub fn settings(&self, session_id: &str) -> SessionSettings {
        self.read(session_id, |s| s.settings)
    }

    pub fn set_pic_resolution(&self, session_id: &str, resolution: ImageResolution) {
        self.write(session_id, |s| s.settings.pic_resolution = resolution);
    }

    pub fn set_pic_style(&self, session_id: &str, style: ImageStyle) {
        self.write(session_id, |s| s.settings.pic_style = style);
    }

    pub fn set_vision_detail(&self, session_id: &str, detail: VisionDetail) {
        self.write(session_id, |s| s.settings.vision_detail = detail);
    }

    pub fn set_ai_mode(&self, session_id: &str, ai_mode: AiMode) {
        self.write(session_id, |s| s.settings.ai_mode = ai_mode);
    }

    /// Reset history and settings. The mode is kept.
    pub fn clear(&self, session_id: &str) {
        self.write(session_id, |s| {
            s.history.clear();
            s.settings = SessionSettings::default();
        });
    }

    /// Reset everything, including the mode.
    pub fn clear_all(&self, session_id: &str) {
        self.write(session_id, |s| {
            s.history.clear();
            s.settings = SessionSettings::default();
            s.mode = Mode::default();
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
