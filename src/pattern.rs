use crate::events::TriggerParams;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Step grid: `tracks[track][step]` is true where the track sounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub tracks: Vec<Vec<bool>>,
}

impl Pattern {
    pub fn new(tracks: Vec<Vec<bool>>) -> Self {
        Self { tracks }
    }

    /// Builds a pattern from rows like `"x...x..."`, one per track. Any
    /// character other than `.`, `-` or a space marks an active step.
    pub fn from_rows(rows: &[&str]) -> Self {
        let tracks = rows
            .iter()
            .map(|row| {
                row.chars()
                    .map(|c| !matches!(c, '.' | '-' | ' '))
                    .collect::<Vec<bool>>()
            })
            .collect();
        Self { tracks }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Length of the longest track.
    pub fn steps(&self) -> usize {
        self.tracks.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Steps past the end of a shorter track are inactive.
    pub fn is_active(&self, track: usize, step: usize) -> bool {
        self.tracks
            .get(track)
            .and_then(|row| row.get(step))
            .copied()
            .unwrap_or(false)
    }

    pub fn active_tracks(&self, step: usize) -> Vec<usize> {
        (0..self.tracks.len())
            .filter(|&track| self.is_active(track, step))
            .collect()
    }
}

/// Which tracks sound at a step. Read on every step callback, so
/// implementations must return the current data, not a snapshot.
pub trait PatternSource: Send + Sync {
    fn active_tracks(&self, step: usize) -> Vec<usize>;
}

impl PatternSource for Pattern {
    fn active_tracks(&self, step: usize) -> Vec<usize> {
        Pattern::active_tracks(self, step)
    }
}

impl PatternSource for ArcSwap<Pattern> {
    fn active_tracks(&self, step: usize) -> Vec<usize> {
        self.load().active_tracks(step)
    }
}

/// Trigger parameters for a track. `None` means the track is not
/// configured and is skipped.
pub trait TrackResolver: Send + Sync {
    fn resolve(&self, track: usize) -> Option<TriggerParams>;
}

impl TrackResolver for Vec<Option<TriggerParams>> {
    fn resolve(&self, track: usize) -> Option<TriggerParams> {
        self.get(track).cloned().flatten()
    }
}

impl TrackResolver for ArcSwap<Vec<Option<TriggerParams>>> {
    fn resolve(&self, track: usize) -> Option<TriggerParams> {
        self.load().resolve(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_from_rows() {
        let pattern = Pattern::from_rows(&["x...x...", "..x."]);
        assert_eq!(pattern.track_count(), 2);
        assert_eq!(pattern.steps(), 8);
        assert!(pattern.is_active(0, 0));
        assert!(pattern.is_active(1, 2));
        assert!(!pattern.is_active(1, 6));
        assert!(!pattern.is_active(5, 0));
    }

    #[test]
    fn test_active_tracks() {
        let pattern = Pattern::from_rows(&["x.x.", "x...", "...."]);
        assert_eq!(pattern.active_tracks(0), vec![0, 1]);
        assert_eq!(pattern.active_tracks(2), vec![0]);
        assert!(pattern.active_tracks(3).is_empty());
    }

    #[test]
    fn test_swapped_pattern_is_seen_immediately() {
        let shared = ArcSwap::from_pointee(Pattern::from_rows(&["x..."]));
        assert_eq!(PatternSource::active_tracks(&shared, 0), vec![0]);

        shared.store(Arc::new(Pattern::from_rows(&["....", "x..."])));
        assert_eq!(PatternSource::active_tracks(&shared, 0), vec![1]);
    }

    #[test]
    fn test_unconfigured_tracks_resolve_to_none() {
        let tracks = vec![
            Some(TriggerParams::Midi {
                channel: 9,
                note: 36,
                velocity: 100,
                duration: 0.1,
            }),
            None,
        ];
        assert!(tracks.resolve(0).is_some());
        assert!(tracks.resolve(1).is_none());
        assert!(tracks.resolve(7).is_none());
    }
}
