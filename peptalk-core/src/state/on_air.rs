//! Live view of the elements the engine currently has on air.
//!
//! Keys are opaque strings and do not share one shape: direct element
//! notifications use the element id, carousel feeds use `path:feed`
//! because a single carousel can run several feeds at once. Every
//! "is this element playing" question therefore scans the values. The
//! scan is O(n) over a handful of simultaneously running elements.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::event::{CAROUSEL_STATUS, ElementPath, ProtocolEvent};

// ── PlayingElement ───────────────────────────────────────────────

/// One element the engine reported as running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayingElement {
    pub show_name: String,
    pub playlist_name: String,
    pub element_id: String,
    pub element_path: String,
    pub observed_at: SystemTime,
}

impl PlayingElement {
    /// Build a record from a storage path, overriding the element id.
    pub fn from_path(path: &str, element_id: &str) -> Self {
        let parsed = ElementPath::parse(path);
        Self {
            show_name: parsed.show_name,
            playlist_name: parsed.playlist_name,
            element_id: element_id.to_string(),
            element_path: path.to_string(),
            observed_at: SystemTime::now(),
        }
    }
}

/// Map key for a carousel feed.
pub fn feed_key(path: &str, feed: &str) -> String {
    format!("{path}:{feed}")
}

// ── OnAirState ───────────────────────────────────────────────────

/// Lock-protected on-air map shared between the read loop and callers.
#[derive(Debug, Default)]
pub struct OnAirState {
    records: RwLock<HashMap<String, PlayingElement>>,
}

impl OnAirState {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PlayingElement>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PlayingElement>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Insert or overwrite the record under `key`.
    pub fn record_playing(&self, key: impl Into<String>, record: PlayingElement) {
        self.write().insert(key.into(), record);
    }

    /// Remove every record whose key or element id equals `identifier`.
    ///
    /// Returns how many records were dropped.
    pub fn clear_by_element_or_key(&self, identifier: &str) -> usize {
        let mut records = self.write();
        let before = records.len();
        records.retain(|key, rec| key != identifier && rec.element_id != identifier);
        before - records.len()
    }

    /// Remove the record stored under exactly `key`.
    pub fn clear_key(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Drop everything.
    pub fn reset(&self) {
        self.write().clear();
    }

    /// Fold one protocol event into the map. Returns `true` when the
    /// on-air set changed.
    pub fn apply(&self, event: &ProtocolEvent) -> bool {
        match event {
            ProtocolEvent::ElementPlaying { path, element_id } => {
                self.record_playing(element_id.clone(), PlayingElement::from_path(path, element_id));
                true
            }
            ProtocolEvent::CarouselActive {
                path,
                feed,
                element_id,
            } => {
                let key = feed_key(path, feed);
                if element_id.is_empty() {
                    return self.clear_key(&key);
                }
                self.record_playing(key, PlayingElement::from_path(path, element_id));
                true
            }
            ProtocolEvent::AttributeChanged { node_id, attr_name } if attr_name == CAROUSEL_STATUS => {
                self.clear_stopped(node_id) > 0
            }
            _ => false,
        }
    }

    /// A node's `carousel_status` left `run`: drop records keyed by or
    /// naming the node, records observed at that path, and every feed
    /// of the node when it is a carousel. A path-shaped node also
    /// clears the element id it decomposes to.
    fn clear_stopped(&self, node_id: &str) -> usize {
        let feed_prefix = format!("{node_id}:");
        let decomposed = node_id
            .contains('/')
            .then(|| ElementPath::parse(node_id).element_id);

        let mut records = self.write();
        let before = records.len();
        records.retain(|key, rec| {
            let hit = key == node_id
                || rec.element_id == node_id
                || rec.element_path == node_id
                || decomposed.as_deref() == Some(rec.element_id.as_str())
                || key.starts_with(&feed_prefix);
            !hit
        });
        before - records.len()
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Element id playing for `show_name` (and `playlist_name`, when
    /// given). The most recently observed record wins on ties.
    pub fn find_element_id(&self, show_name: &str, playlist_name: Option<&str>) -> Option<String> {
        let records = self.read();
        records
            .iter()
            .filter(|(_, rec)| rec.show_name == show_name)
            .filter(|(_, rec)| playlist_name.is_none_or(|p| rec.playlist_name == p))
            .max_by(|(ka, a), (kb, b)| a.observed_at.cmp(&b.observed_at).then_with(|| kb.cmp(ka)))
            .map(|(_, rec)| rec.element_id.clone())
    }

    /// `true` when any record carries `element_id`.
    pub fn is_playing(&self, element_id: &str) -> bool {
        self.read().values().any(|rec| rec.element_id == element_id)
    }

    /// Distinct element ids currently on air.
    pub fn all_playing_element_ids(&self) -> HashSet<String> {
        self.read().values().map(|rec| rec.element_id.clone()).collect()
    }

    /// Copy of every record, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, PlayingElement)> {
        let mut entries: Vec<_> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    const E1_PATH: &str = "/storage/shows/NewsAM/playlists/Main/elements/E1";

    fn playing(path: &str, id: &str) -> ProtocolEvent {
        ProtocolEvent::ElementPlaying {
            path: path.into(),
            element_id: id.into(),
        }
    }

    fn carousel(path: &str, feed: &str, id: &str) -> ProtocolEvent {
        ProtocolEvent::CarouselActive {
            path: path.into(),
            feed: feed.into(),
            element_id: id.into(),
        }
    }

    fn stopped(node: &str) -> ProtocolEvent {
        ProtocolEvent::AttributeChanged {
            node_id: node.into(),
            attr_name: CAROUSEL_STATUS.into(),
        }
    }

    #[test]
    fn element_playing_is_keyed_by_element_id() {
        let state = OnAirState::new();
        assert!(state.apply(&playing(E1_PATH, "E1")));

        assert!(state.is_playing("E1"));
        assert_eq!(state.find_element_id("NewsAM", Some("Main")), Some("E1".into()));
        assert_eq!(state.find_element_id("NewsAM", None), Some("E1".into()));
        assert_eq!(state.find_element_id("NewsAM", Some("Other")), None);
        assert_eq!(state.snapshot()[0].0, "E1");
    }

    #[test]
    fn carousel_feed_is_keyed_by_path_and_feed() {
        let state = OnAirState::new();
        state.apply(&carousel("/carousel1", "feedA", "E7"));
        state.apply(&carousel("/carousel1", "feedB", "E8"));

        assert_eq!(state.len(), 2);
        assert!(state.is_playing("E7"));
        assert!(!state.is_playing("/carousel1:feedA"));
        let keys: Vec<String> = state.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["/carousel1:feedA", "/carousel1:feedB"]);
    }

    #[test]
    fn changed_clears_carousel_entry_by_element_id() {
        let state = OnAirState::new();
        state.apply(&carousel("/carousel1", "feedA", "E7"));
        assert!(state.is_playing("E7"));

        assert!(state.apply(&stopped("E7")));
        assert!(!state.is_playing("E7"));
        assert!(state.is_empty());
    }

    #[test]
    fn changed_on_path_clears_element() {
        let state = OnAirState::new();
        state.apply(&playing(E1_PATH, "E1"));
        assert!(state.apply(&stopped(E1_PATH)));
        assert!(!state.is_playing("E1"));
    }

    #[test]
    fn changed_on_carousel_clears_all_its_feeds() {
        let state = OnAirState::new();
        state.apply(&carousel("/carousel1", "feedA", "E7"));
        state.apply(&carousel("/carousel1", "feedB", "E8"));
        state.apply(&carousel("/carousel2", "feedA", "E9"));

        state.apply(&stopped("/carousel1"));
        assert_eq!(state.all_playing_element_ids(), HashSet::from(["E9".to_string()]));
    }

    #[test]
    fn changed_on_element_path_clears_carousel_feed_showing_it() {
        let state = OnAirState::new();
        state.apply(&carousel("/carousel1", "feedA", "E1"));
        state.apply(&carousel("/carousel1", "feedB", "E8"));
        assert!(state.apply(&stopped(E1_PATH)));
        assert_eq!(state.all_playing_element_ids(), HashSet::from(["E8".to_string()]));
    }

    #[test]
    fn empty_carousel_value_clears_the_feed() {
        let state = OnAirState::new();
        state.apply(&carousel("/carousel1", "feedA", "E7"));
        assert!(state.apply(&carousel("/carousel1", "feedA", "")));
        assert!(state.is_empty());
        assert!(!state.apply(&carousel("/carousel1", "feedA", "")));
    }

    #[test]
    fn clear_by_element_or_key_handles_both_shapes() {
        let state = OnAirState::new();
        state.record_playing("E1", PlayingElement::from_path(E1_PATH, "E1"));
        state.record_playing("/c:A", PlayingElement::from_path("/c", "E2"));

        assert_eq!(state.clear_by_element_or_key("/c:A"), 1);
        assert_eq!(state.clear_by_element_or_key("E1"), 1);
        assert_eq!(state.clear_by_element_or_key("E1"), 0);
        assert!(state.is_empty());
    }

    #[test]
    fn unrelated_events_do_not_change_state() {
        let state = OnAirState::new();
        assert!(!state.apply(&ProtocolEvent::Unrecognized));
        assert!(!state.apply(&ProtocolEvent::Insert {
            path: "/x".into(),
            payload: String::new()
        }));
        assert!(!state.apply(&ProtocolEvent::AttributeChanged {
            node_id: "E1".into(),
            attr_name: "text".into()
        }));
    }

    #[test]
    fn find_prefers_most_recent_record() {
        let state = OnAirState::new();
        let mut older = PlayingElement::from_path("/storage/shows/S/playlists/P/elements/A", "A");
        older.observed_at -= Duration::from_secs(10);
        state.record_playing("A", older);
        state.record_playing(
            "B",
            PlayingElement::from_path("/storage/shows/S/playlists/P/elements/B", "B"),
        );
        assert_eq!(state.find_element_id("S", Some("P")), Some("B".into()));
    }

    #[test]
    fn ids_are_distinct_and_reset_clears() {
        let state = OnAirState::new();
        state.apply(&playing(E1_PATH, "E1"));
        state.apply(&carousel("/carousel1", "feedA", "E1"));
        assert_eq!(state.len(), 2);
        assert_eq!(state.all_playing_element_ids().len(), 1);

        state.reset();
        assert!(state.is_empty());
        assert!(state.all_playing_element_ids().is_empty());
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let state = Arc::new(OnAirState::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let id = format!("T{t}-{i}");
                        state.record_playing(id.clone(), PlayingElement::from_path("/x", &id));
                        assert!(state.is_playing(&id));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.len(), 800);
    }
}
