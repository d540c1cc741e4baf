use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DanceCueError, Result};

/// How far from a cue the playback position may be for the cue to count as
/// the active one.
pub const ACTIVE_CUE_TOLERANCE_SECONDS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CueId(u64);

impl CueId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for CueId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An annotation tied to a moment in the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuePoint {
    pub id: CueId,
    pub timestamp_seconds: f64,
    pub title: String,
    pub note: String,
    /// Beat the metronome was on when the cue was captured.
    pub beat: Option<u32>,
}

/// Editable fields of a cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueDraft {
    pub timestamp_seconds: f64,
    pub title: String,
    pub note: String,
    pub beat: Option<u32>,
}

impl CueDraft {
    pub fn new(timestamp_seconds: f64, title: impl Into<String>) -> Self {
        Self {
            timestamp_seconds,
            title: title.into(),
            note: String::new(),
            beat: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_beat(mut self, beat: Option<u32>) -> Self {
        self.beat = beat;
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.timestamp_seconds.is_finite() || self.timestamp_seconds < 0.0 {
            return Err(DanceCueError::InvalidTimestamp(
                self.timestamp_seconds.to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(DanceCueError::InvalidInput("cue title must not be empty"));
        }
        Ok(())
    }
}

/// Cue points of one viewing session, kept in memory only.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CueSheet {
    cues: Vec<CuePoint>,
    next_id: u64,
}

impl CueSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn add(&mut self, draft: CueDraft) -> Result<CueId> {
        draft.validate()?;
        self.next_id += 1;
        let id = CueId(self.next_id);
        self.cues.push(CuePoint {
            id,
            timestamp_seconds: draft.timestamp_seconds,
            title: draft.title,
            note: draft.note,
            beat: draft.beat,
        });
        tracing::debug!(%id, "cue added");
        Ok(id)
    }

    pub fn update(&mut self, id: CueId, draft: CueDraft) -> Result<()> {
        draft.validate()?;
        let cue = self
            .cues
            .iter_mut()
            .find(|cue| cue.id == id)
            .ok_or(DanceCueError::UnknownCue(id.0))?;
        cue.timestamp_seconds = draft.timestamp_seconds;
        cue.title = draft.title;
        cue.note = draft.note;
        cue.beat = draft.beat;
        Ok(())
    }

    pub fn remove(&mut self, id: CueId) -> Option<CuePoint> {
        let index = self.cues.iter().position(|cue| cue.id == id)?;
        Some(self.cues.remove(index))
    }

    pub fn get(&self, id: CueId) -> Option<&CuePoint> {
        self.cues.iter().find(|cue| cue.id == id)
    }

    /// Cues in playback order. Equal timestamps keep insertion order.
    pub fn sorted(&self) -> Vec<&CuePoint> {
        let mut cues: Vec<_> = self.cues.iter().collect();
        cues.sort_by(|a, b| a.timestamp_seconds.total_cmp(&b.timestamp_seconds));
        cues
    }

    /// The cue nearest to `seconds`, if one lies within
    /// [`ACTIVE_CUE_TOLERANCE_SECONDS`].
    pub fn active_at(&self, seconds: f64) -> Option<&CuePoint> {
        self.cues
            .iter()
            .map(|cue| ((cue.timestamp_seconds - seconds).abs(), cue))
            .filter(|(distance, _)| *distance < ACTIVE_CUE_TOLERANCE_SECONDS)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, cue)| cue)
    }
}

/// Parses `ss`, `m:ss` or `h:mm:ss`, each with optional fractional seconds.
pub fn parse_timestamp(text: &str) -> Result<f64> {
    let invalid = || DanceCueError::InvalidTimestamp(text.to_string());
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }

    let (seconds, larger) = parts.split_last().ok_or_else(invalid)?;
    let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds < 0.0 || (!larger.is_empty() && seconds >= 60.0) {
        return Err(invalid());
    }

    let mut total = 0.0;
    for (index, part) in larger.iter().enumerate() {
        let value: u32 = part.parse().map_err(|_| invalid())?;
        // Minutes under hours are bounded, the leading unit is not.
        if index > 0 && value >= 60 {
            return Err(invalid());
        }
        total = total * 60.0 + f64::from(value);
    }
    Ok(total * 60.0 + seconds)
}

/// Formats seconds as `m:ss`, or `h:mm:ss` past the hour.
pub fn format_timestamp(seconds: f64) -> String {
    let whole = seconds.max(0.0).floor() as u64;
    let (hours, minutes, secs) = (whole / 3_600, (whole / 60) % 60, whole % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> (CueSheet, CueId, CueId, CueId) {
        let mut sheet = CueSheet::new();
        let turn = sheet
            .add(CueDraft::new(75.0, "Cross body lead").with_beat(Some(1)))
            .unwrap();
        let intro = sheet.add(CueDraft::new(12.5, "Basic step")).unwrap();
        let spin = sheet
            .add(CueDraft::new(75.8, "Inside turn").with_note("prep on 3"))
            .unwrap();
        (sheet, turn, intro, spin)
    }

    #[test]
    fn sorted_follows_playback_order() {
        let (sheet, turn, intro, spin) = sheet();
        let ids: Vec<_> = sheet.sorted().iter().map(|cue| cue.id).collect();
        assert_eq!(ids, vec![intro, turn, spin]);
    }

    #[test]
    fn active_cue_is_the_nearest_within_tolerance() {
        let (sheet, turn, _, spin) = sheet();
        assert_eq!(sheet.active_at(75.3).map(|cue| cue.id), Some(turn));
        assert_eq!(sheet.active_at(75.5).map(|cue| cue.id), Some(spin));
        assert!(sheet.active_at(74.5).is_none());
        assert!(sheet.active_at(40.0).is_none());
    }

    #[test]
    fn update_and_remove() {
        let (mut sheet, turn, intro, _) = sheet();
        sheet
            .update(intro, CueDraft::new(10.0, "Basic step").with_beat(Some(5)))
            .unwrap();
        assert_eq!(sheet.get(intro).unwrap().beat, Some(5));
        assert_eq!(sheet.get(intro).unwrap().timestamp_seconds, 10.0);

        let removed = sheet.remove(turn).unwrap();
        assert_eq!(removed.title, "Cross body lead");
        assert!(sheet.remove(turn).is_none());
        assert_eq!(sheet.len(), 2);

        let err = sheet.update(turn, CueDraft::new(1.0, "gone")).unwrap_err();
        assert!(matches!(err, DanceCueError::UnknownCue(_)));
    }

    #[test]
    fn ids_are_not_reused() {
        let (mut sheet, _, _, spin) = sheet();
        sheet.remove(spin);
        let next = sheet.add(CueDraft::new(90.0, "Shine")).unwrap();
        assert!(next > spin);
    }

    #[test]
    fn rejects_bad_drafts() {
        let mut sheet = CueSheet::new();
        assert!(sheet.add(CueDraft::new(-1.0, "Too early")).is_err());
        assert!(sheet.add(CueDraft::new(f64::NAN, "Nowhere")).is_err());
        assert!(sheet.add(CueDraft::new(3.0, "   ")).is_err());
        assert!(sheet.is_empty());
    }

    #[test]
    fn parses_timestamps() {
        assert_eq!(parse_timestamp("42").unwrap(), 42.0);
        assert_eq!(parse_timestamp("1:15").unwrap(), 75.0);
        assert_eq!(parse_timestamp("1:15.5").unwrap(), 75.5);
        assert_eq!(parse_timestamp("1:02:03").unwrap(), 3_723.0);
        assert_eq!(parse_timestamp(" 0:07 ").unwrap(), 7.0);
    }

    #[test]
    fn rejects_malformed_timestamps() {
        for text in ["", "abc", "1:75", "1:2:3:4", "-3", "1:-2", "2:60:00", "x:10"] {
            assert!(parse_timestamp(text).is_err(), "`{text}` should fail");
        }
    }

    #[test]
    fn formats_timestamps() {
        assert_eq!(format_timestamp(7.9), "0:07");
        assert_eq!(format_timestamp(75.0), "1:15");
        assert_eq!(format_timestamp(3_723.0), "1:02:03");
        assert_eq!(format_timestamp(-4.0), "0:00");
    }
}
