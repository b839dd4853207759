use crate::dispatcher::TriggerSink;
use crate::error::SinkError;
use crate::events::{TriggerEvent, TriggerParams};
use crossbeam::channel::{Receiver, Sender};
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Forwards every fired trigger to a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<TriggerEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<TriggerEvent>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self { tx }, rx)
    }
}

impl TriggerSink for ChannelSink {
    fn trigger(&self, event: &TriggerEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map_err(|_| SinkError::Disconnected)
    }
}

/// Logs fired triggers. Useful when no output device is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl TriggerSink for LogSink {
    fn trigger(&self, event: &TriggerEvent) -> Result<(), SinkError> {
        match &event.payload {
            TriggerParams::Midi {
                channel,
                note,
                velocity,
                ..
            } => tracing::info!(timestamp = event.timestamp, channel, note, velocity, "midi trigger"),
            TriggerParams::Sample {
                sample_id,
                velocity,
            } => tracing::info!(timestamp = event.timestamp, %sample_id, velocity, "sample trigger"),
        }
        Ok(())
    }
}

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

#[derive(Debug, Clone, Copy)]
struct SoundingNote {
    off_at: Instant,
    channel: u8,
    note: u8,
}

/// Sends MIDI triggers to an output port. Note-offs go out once their
/// duration has passed, on the next trigger or [`MidiSink::release_due`],
/// and all at once on `silence`.
pub struct MidiSink {
    connection: Mutex<MidiOutputConnection>,
    sounding: Mutex<Vec<SoundingNote>>,
}

impl MidiSink {
    pub fn port_names() -> Result<Vec<String>, SinkError> {
        let output = MidiOutput::new("tactus").map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(output
            .ports()
            .iter()
            .filter_map(|p| output.port_name(p).ok())
            .collect())
    }

    /// Connects to the first port whose name contains `port_hint`, or the
    /// first port at all when no hint is given.
    pub fn connect(port_hint: Option<&str>) -> Result<Self, SinkError> {
        let output = MidiOutput::new("tactus").map_err(|e| SinkError::Transport(e.to_string()))?;
        let ports = output.ports();
        let port = match port_hint {
            Some(hint) => ports.iter().find(|p| {
                output
                    .port_name(p)
                    .map(|name| name.contains(hint))
                    .unwrap_or(false)
            }),
            None => ports.first(),
        }
        .ok_or_else(|| SinkError::NoPort(port_hint.unwrap_or_default().to_string()))?;

        let port_name = output.port_name(port).unwrap_or_default();
        let connection = output
            .connect(port, "tactus-out")
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        tracing::info!(port = %port_name, "connected MIDI output");

        Ok(Self {
            connection: Mutex::new(connection),
            sounding: Mutex::new(Vec::new()),
        })
    }

    fn send(&self, message: &[u8]) -> Result<(), SinkError> {
        self.connection
            .lock()
            .send(message)
            .map_err(|e| SinkError::Transport(e.to_string()))
    }

    /// Sends note-offs for every note whose duration has elapsed.
    pub fn release_due(&self) {
        let now = Instant::now();
        let due: Vec<SoundingNote> = {
            let mut sounding = self.sounding.lock();
            let (due, still): (Vec<_>, Vec<_>) = sounding.drain(..).partition(|n| n.off_at <= now);
            *sounding = still;
            due
        };

        for note in due {
            if let Err(e) = self.send(&[NOTE_OFF | note.channel, note.note, 0]) {
                tracing::warn!(error = %e, note = note.note, "note-off failed");
            }
        }
    }

    fn note_on(&self, channel: u8, note: u8, velocity: u8, duration: f64) -> Result<(), SinkError> {
        let off_at = note_off_at(duration)?;
        let channel = channel & 0x0F;
        let note = note & 0x7F;

        let retriggered = {
            let mut sounding = self.sounding.lock();
            let before = sounding.len();
            sounding.retain(|n| !(n.channel == channel && n.note == note));
            sounding.len() != before
        };
        if retriggered {
            self.send(&[NOTE_OFF | channel, note, 0])?;
        }

        self.send(&note_on_message(channel, note, velocity))?;
        self.sounding.lock().push(SoundingNote {
            off_at,
            channel,
            note,
        });
        Ok(())
    }
}

/// Velocities above the MIDI range sound at full velocity rather than
/// wrapping to a note-off.
fn note_on_message(channel: u8, note: u8, velocity: u8) -> [u8; 3] {
    [NOTE_ON | (channel & 0x0F), note & 0x7F, velocity.min(127)]
}

/// When a note of `duration` seconds started now ends. Negative lengths
/// end immediately.
fn note_off_at(duration: f64) -> Result<Instant, SinkError> {
    Duration::try_from_secs_f64(duration.max(0.0))
        .ok()
        .and_then(|length| Instant::now().checked_add(length))
        .ok_or_else(|| SinkError::Transport(format!("note duration {duration}s out of range")))
}

impl TriggerSink for MidiSink {
    fn trigger(&self, event: &TriggerEvent) -> Result<(), SinkError> {
        self.release_due();
        match &event.payload {
            TriggerParams::Midi {
                channel,
                note,
                velocity,
                duration,
            } => self.note_on(*channel, *note, *velocity, *duration),
            TriggerParams::Sample { sample_id, .. } => {
                tracing::trace!(%sample_id, "MIDI output ignores sample trigger");
                Ok(())
            }
        }
    }

    fn silence(&self) {
        let sounding: Vec<SoundingNote> = self.sounding.lock().drain(..).collect();
        for note in sounding {
            if let Err(e) = self.send(&[NOTE_OFF | note.channel, note.note, 0]) {
                tracing::warn!(error = %e, note = note.note, "note-off failed");
            }
        }
    }
}

impl Drop for MidiSink {
    fn drop(&mut self) {
        self.silence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, rx) = ChannelSink::new();
        let event = TriggerEvent::new(
            1.5,
            TriggerParams::Sample {
                sample_id: "clap".into(),
                velocity: 0.8,
            },
        );
        sink.trigger(&event).unwrap();
        assert_eq!(rx.try_recv().unwrap(), event);
    }

    #[test]
    fn test_channel_sink_reports_disconnect() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let event = TriggerEvent::new(
            0.0,
            TriggerParams::Midi {
                channel: 0,
                note: 60,
                velocity: 100,
                duration: 0.1,
            },
        );
        assert!(matches!(sink.trigger(&event), Err(SinkError::Disconnected)));
    }

    #[test]
    fn test_note_off_rejects_unrepresentable_durations() {
        let start = Instant::now();
        assert!(note_off_at(0.25).unwrap() >= start + Duration::from_millis(250));
        assert!(note_off_at(-1.0).unwrap() >= start);
        assert!(matches!(note_off_at(1e300), Err(SinkError::Transport(_))));
        assert!(matches!(note_off_at(f64::INFINITY), Err(SinkError::Transport(_))));
    }

    #[test]
    fn test_note_on_clamps_velocity() {
        assert_eq!(note_on_message(9, 36, 100), [NOTE_ON | 9, 36, 100]);
        assert_eq!(note_on_message(9, 36, 200), [NOTE_ON | 9, 36, 127]);
        assert_eq!(note_on_message(0, 60, 128)[2], 127);
    }
}
