use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::events::TriggerParams;
use crate::pattern::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const PRESET_FILE: &str = "preset.ron";

/// Everything needed to play one exercise, stored as RON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub engine: EngineConfig,
    pub pattern: Pattern,
    /// Parameters per pattern track; `None` leaves the track silent.
    pub tracks: Vec<Option<TriggerParams>>,
}

impl Preset {
    /// Basic rock beat on the General MIDI drum channel.
    pub fn demo() -> Self {
        let drum = |note, velocity| {
            Some(TriggerParams::Midi {
                channel: 9,
                note,
                velocity,
                duration: 0.05,
            })
        };

        Self {
            name: "Rock beat".to_string(),
            engine: EngineConfig::default(),
            pattern: Pattern::from_rows(&[
                "x.......x.......",
                "....x.......x...",
                "x.x.x.x.x.x.x.x.",
            ]),
            tracks: vec![drum(36, 110), drum(38, 100), drum(42, 80)],
        }
    }

    /// Accepts either a preset directory or a path to the RON file itself.
    pub fn resolve_path(path: &Path) -> std::path::PathBuf {
        if path.is_dir() {
            path.join(PRESET_FILE)
        } else {
            path.to_path_buf()
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let file = Self::resolve_path(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }

        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(file, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(Self::resolve_path(path))?;
        let preset: Preset = ron::from_str(&ron_string)?;
        preset.engine.validate()?;
        preset.validate_tracks()?;

        if preset.pattern.steps() > preset.engine.total_steps {
            tracing::warn!(
                pattern_steps = preset.pattern.steps(),
                total_steps = preset.engine.total_steps,
                "pattern is longer than the cycle, trailing steps never play"
            );
        }
        Ok(preset)
    }

    fn validate_tracks(&self) -> Result<(), ConfigError> {
        for (track, params) in self.tracks.iter().enumerate() {
            if let Some(TriggerParams::Midi { duration, .. }) = params {
                if Duration::try_from_secs_f64(*duration).is_err() {
                    return Err(ConfigError::InvalidNoteDuration {
                        track,
                        duration: *duration,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        let preset = Preset::demo();
        preset.save(dir.path()).unwrap();

        assert!(dir.path().join(PRESET_FILE).exists());
        let loaded = Preset::load(dir.path()).unwrap();
        assert_eq!(loaded, preset);
    }

    #[test]
    fn test_load_rejects_invalid_engine() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.ron");
        fs::write(
            &file,
            "(name: \"bad\", engine: (bpm: -4.0), pattern: (tracks: []), tracks: [])",
        )
        .unwrap();

        assert!(matches!(
            Preset::load(&file),
            Err(ConfigError::InvalidTempo(_))
        ));
    }

    #[test]
    fn test_load_rejects_unplayable_note_duration() {
        let dir = tempfile::tempdir().unwrap();
        for (name, duration) in [("huge.ron", "1e300"), ("negative.ron", "-0.5")] {
            let file = dir.path().join(name);
            fs::write(
                &file,
                format!(
                    "(name: \"drums\", pattern: (tracks: [[true]]), tracks: [None, \
                     Some(Midi(channel: 9, note: 36, velocity: 100, duration: {duration}))])"
                ),
            )
            .unwrap();

            assert!(matches!(
                Preset::load(&file),
                Err(ConfigError::InvalidNoteDuration { track: 1, .. })
            ));
        }
    }

    #[test]
    fn test_load_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.ron");
        fs::write(&file, "(name: ").unwrap();
        assert!(matches!(Preset::load(&file), Err(ConfigError::Parse(_))));
    }
}
