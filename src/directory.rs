//! The client's cached view of the backend's sessions.

use crate::types::Session;

/// Ordered session list plus the active selection.
///
/// The list is replaced wholesale after every mutating operation; the active
/// session is a cached copy that always refers to an entry of the list, or is
/// absent.
#[derive(Debug, Clone, Default)]
pub struct SessionDirectory {
    sessions: Vec<Session>,
    active: Option<Session>,
}

impl SessionDirectory {
    /// Creates an empty directory with nothing active.
    pub fn new() -> Self {
        Self::default()
    }

    /// All sessions, in server order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// The active session, if any.
    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// The id of the active session, if any.
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.id.as_str())
    }

    /// Returns true if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Replaces the list with a fresh one from the server.
    ///
    /// The active selection survives only if its id is still listed, in which
    /// case the cached copy is refreshed from the list.
    pub fn replace(&mut self, sessions: Vec<Session>) {
        self.sessions = sessions;
        if let Some(active) = self.active.take() {
            self.active = self.find(&active.id).cloned();
        }
    }

    /// Makes `session` the active one, updating its entry in the list.
    pub fn activate(&mut self, session: Session) {
        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(entry) => *entry = session.clone(),
            None => self.sessions.insert(0, session.clone()),
        }
        self.active = Some(session);
    }

    /// Drops the active selection.
    pub fn deactivate(&mut self) {
        self.active = None;
    }

    /// The most recently updated session, which the server lists first.
    pub fn latest(&self) -> Option<&Session> {
        self.sessions.first()
    }

    /// Records a new deep-think flag on the active session.
    pub fn set_active_deep_think(&mut self, deep_think: bool) {
        if let Some(active) = self.active.as_mut() {
            active.deep_think = deep_think;
            if let Some(entry) = self.sessions.iter_mut().find(|s| s.id == active.id) {
                entry.deep_think = deep_think;
            }
        }
    }

    /// Returns true if a session with `id` is listed.
    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Looks up a session by id.
    pub fn find(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Maps a user-typed selector to a session id.
    ///
    /// A selector is a 1-based position in the list, an exact id, or a prefix
    /// matching exactly one id.
    pub fn resolve(&self, selector: &str) -> Option<&str> {
        let selector = selector.trim();
        if selector.is_empty() {
            return None;
        }
        if let Some(session) = self.find(selector) {
            return Some(session.id.as_str());
        }
        if let Ok(position) = selector.parse::<usize>() {
            return position
                .checked_sub(1)
                .and_then(|index| self.sessions.get(index))
                .map(|s| s.id.as_str());
        }
        let mut matches = self.sessions.iter().filter(|s| s.id.starts_with(selector));
        match (matches.next(), matches.next()) {
            (Some(session), None) => Some(session.id.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn session(id: &str, title: &str) -> Session {
        Session {
            id: id.to_string(),
            title: title.to_string(),
            deep_think: false,
            created_at: None,
            updated_at: datetime!(2025-03-01 09:30:00 UTC),
        }
    }

    #[test]
    fn starts_empty() {
        let directory = SessionDirectory::new();
        assert!(directory.is_empty());
        assert!(directory.active().is_none());
        assert!(directory.latest().is_none());
    }

    #[test]
    fn replace_keeps_active_only_if_listed() {
        let mut directory = SessionDirectory::new();
        directory.replace(vec![session("a", "A"), session("b", "B")]);
        directory.activate(session("b", "B"));
        directory.replace(vec![session("b", "B2"), session("c", "C")]);
        assert_eq!(directory.active_id(), Some("b"));
        assert_eq!(directory.active().unwrap().title, "B2");
        directory.replace(vec![session("c", "C")]);
        assert_eq!(directory.active_id(), None);
    }

    #[test]
    fn activate_unlisted_inserts_first() {
        let mut directory = SessionDirectory::new();
        directory.replace(vec![session("a", "A")]);
        directory.activate(session("n", "New chat"));
        assert_eq!(directory.latest().unwrap().id, "n");
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn deep_think_updates_both_copies() {
        let mut directory = SessionDirectory::new();
        directory.replace(vec![session("a", "A")]);
        directory.activate(session("a", "A"));
        directory.set_active_deep_think(true);
        assert!(directory.active().unwrap().deep_think);
        assert!(directory.find("a").unwrap().deep_think);
    }

    #[test]
    fn resolve_selectors() {
        let mut directory = SessionDirectory::new();
        directory.replace(vec![
            session("abc123", "A"),
            session("abd456", "B"),
            session("7", "C"),
        ]);
        assert_eq!(directory.resolve("1"), Some("abc123"));
        assert_eq!(directory.resolve("2"), Some("abd456"));
        assert_eq!(directory.resolve("7"), Some("7"));
        assert_eq!(directory.resolve("4"), None);
        assert_eq!(directory.resolve("0"), None);
        assert_eq!(directory.resolve("abc"), Some("abc123"));
        assert_eq!(directory.resolve("ab"), None);
        assert_eq!(directory.resolve("zzz"), None);
        assert_eq!(directory.resolve("  "), None);
    }
}
