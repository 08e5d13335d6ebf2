//! Status transitions and incidents derived from the probe history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use super::{load_entries, site_entries};
use crate::db::LogEntry;
use crate::site::Line;
use crate::state::MonitorState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Failed,
    Restored,
}

/// A line changed from up to down or back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentEvent {
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    pub message: String,
    pub site_id: String,
    pub line: Line,
    pub ip: String,
    pub is_outage: bool,
}

/// Transitions in chronological order. The first observation of a line is
/// never a transition.
pub fn derive_events(entries: &[&LogEntry]) -> Vec<RecentEvent> {
    let mut last: HashMap<Line, bool> = HashMap::new();
    let mut events = Vec::new();

    for entry in entries {
        if let Some(prev) = last.insert(entry.line, entry.success) {
            if prev == entry.success {
                continue;
            }
            let (status, verb) = if entry.success {
                (EventStatus::Restored, "restored")
            } else {
                (EventStatus::Failed, "lost")
            };
            events.push(RecentEvent {
                timestamp: entry.timestamp,
                status,
                message: format!("{} connection {}", entry.line.title(), verb),
                site_id: entry.site_id.clone(),
                line: entry.line,
                ip: entry.ip.clone(),
                is_outage: !entry.success,
            });
        }
    }

    events
}

/// Newest transitions of a site, at most `limit` of them (`limit <= 0`
/// returns all). `None` for an unknown site.
pub fn get_recent_events(state: &MonitorState, site_id: &str, limit: i64) -> Option<Vec<RecentEvent>> {
    state.find_site(site_id)?;
    let entries = load_entries(state);
    Some(recent_events(&entries, site_id, limit))
}

pub fn recent_events(entries: &[LogEntry], site_id: &str, limit: i64) -> Vec<RecentEvent> {
    let entries = site_entries(entries, site_id);
    let mut events = derive_events(&entries);
    events.reverse();
    if limit > 0 {
        events.truncate(limit as usize);
    }
    events
}

/// A run of consecutive failures on one line.
#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    pub line: Line,
    pub started: DateTime<Utc>,
    pub last_failure: DateTime<Utc>,
    /// First success after the run; `None` while still failing.
    pub restored: Option<DateTime<Utc>>,
}

/// Every incident in chronological entries, in order of their start.
pub fn incidents(entries: &[&LogEntry]) -> Vec<Incident> {
    let mut open: HashMap<Line, usize> = HashMap::new();
    let mut out: Vec<Incident> = Vec::new();

    for entry in entries {
        match (entry.success, open.get(&entry.line).copied()) {
            (false, Some(idx)) => out[idx].last_failure = entry.timestamp,
            (false, None) => {
                open.insert(entry.line, out.len());
                out.push(Incident {
                    line: entry.line,
                    started: entry.timestamp,
                    last_failure: entry.timestamp,
                    restored: None,
                });
            }
            (true, Some(idx)) => {
                out[idx].restored = Some(entry.timestamp);
                open.remove(&entry.line);
            }
            (true, None) => {}
        }
    }

    out
}

/// The incident holding the most recent failure on any line.
pub(crate) fn last_incident(entries: &[&LogEntry]) -> Option<Incident> {
    incidents(entries).into_iter().max_by_key(|i| i.last_failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::test_site;
    use crate::state::test_state;
    use crate::stats::entry_at;
    use chrono::Duration;

    fn history() -> (DateTime<Utc>, Vec<LogEntry>) {
        let now = Utc::now();
        let at = |mins: i64| now - Duration::minutes(mins);
        let mut entries = vec![
            entry_at("s1", Line::Primary, false, None, at(60)),
            entry_at("s1", Line::Secondary, true, Some(2.0), at(60)),
            entry_at("s1", Line::Primary, true, Some(1.0), at(50)),
            entry_at("s1", Line::Secondary, true, Some(2.0), at(50)),
            entry_at("s1", Line::Primary, false, None, at(40)),
            entry_at("s1", Line::Secondary, false, None, at(40)),
            entry_at("s1", Line::Primary, false, None, at(30)),
            entry_at("s1", Line::Secondary, true, Some(2.0), at(20)),
            entry_at("other", Line::Primary, true, Some(1.0), at(15)),
        ];
        for (i, e) in entries.iter_mut().enumerate() {
            e.id = i as i64 + 1;
        }
        (now, entries)
    }

    #[test]
    fn test_transitions_newest_first() {
        let (_, entries) = history();
        let events = recent_events(&entries, "s1", 0);

        let summary: Vec<(Line, EventStatus)> = events.iter().map(|e| (e.line, e.status)).collect();
        assert_eq!(
            summary,
            vec![
                (Line::Secondary, EventStatus::Restored),
                (Line::Secondary, EventStatus::Failed),
                (Line::Primary, EventStatus::Failed),
                (Line::Primary, EventStatus::Restored),
            ]
        );
        assert_eq!(events[0].message, "Secondary connection restored");
        assert!(!events[0].is_outage);
        assert_eq!(events[2].message, "Primary connection lost");
        assert!(events[2].is_outage);
    }

    #[test]
    fn test_limit_and_unsorted_input() {
        let (_, mut entries) = history();
        entries.reverse();
        let events = recent_events(&entries, "s1", 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, EventStatus::Restored);
        assert_eq!(events[0].line, Line::Secondary);
    }

    #[test]
    fn test_no_events_without_changes() {
        let now = Utc::now();
        let entries = vec![
            entry_at("s1", Line::Primary, false, None, now),
            entry_at("s1", Line::Primary, false, None, now),
        ];
        assert!(recent_events(&entries, "s1", 10).is_empty());
        assert!(recent_events(&[], "s1", 10).is_empty());
    }

    #[test]
    fn test_incidents() {
        let (now, entries) = history();
        let entries = crate::stats::site_entries(&entries, "s1");
        let found = incidents(&entries);

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].line, Line::Primary);
        assert_eq!(found[0].restored, Some(now - Duration::minutes(50)));
        assert_eq!(found[1].started, now - Duration::minutes(40));
        assert_eq!(found[1].last_failure, now - Duration::minutes(30));
        assert_eq!(found[1].restored, None);
        assert_eq!(found[2].line, Line::Secondary);

        let last = last_incident(&entries).unwrap();
        assert_eq!(last.line, Line::Primary);
        assert_eq!(last.last_failure, now - Duration::minutes(30));
    }

    #[test]
    fn test_unknown_site() {
        let state = test_state(vec![test_site("s1", None)]);
        assert!(get_recent_events(&state, "ghost", 10).is_none());
        assert_eq!(get_recent_events(&state, "s1", 10), Some(Vec::new()));
    }
}
