use arc_swap::ArcSwap;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::style::Print;
use crossterm::{cursor, execute, queue, terminal};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tactus::{
    HostClock, LogSink, MidiSink, Pattern, PlaybackEngine, Preset, TriggerParams, TriggerSink,
};
use tracing_subscriber::EnvFilter;

const TEMPO_STEP: f64 = 5.0;

#[derive(Debug, Default)]
struct Args {
    preset: Option<PathBuf>,
    midi: Option<String>,
    list_ports: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--midi" => {
                args.midi = Some(iter.next().ok_or("--midi needs a port name")?);
            }
            "--list-ports" => args.list_ports = true,
            other if other.starts_with("--") => return Err(format!("unknown option {other}")),
            path => args.preset = Some(PathBuf::from(path)),
        }
    }
    Ok(args)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tactus=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        tracing::error!(error = %e, "tactus exited with an error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;

    if args.list_ports {
        for name in MidiSink::port_names()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let preset = match &args.preset {
        Some(path) => Preset::load(path)?,
        None => Preset::demo(),
    };
    tracing::info!(name = %preset.name, "preset loaded");

    let pattern = Arc::new(ArcSwap::from_pointee(preset.pattern.clone()));
    let tracks = Arc::new(ArcSwap::from_pointee(preset.tracks.clone()));

    let midi = match &args.midi {
        Some(hint) => Some(Arc::new(MidiSink::connect(Some(hint))?)),
        None => None,
    };
    let sink: Arc<dyn TriggerSink> = match &midi {
        Some(midi) => midi.clone() as Arc<dyn TriggerSink>,
        None => Arc::new(LogSink),
    };

    let mut engine = PlaybackEngine::new(
        preset.engine.clone(),
        HostClock::shared()?,
        pattern.clone(),
        tracks.clone(),
        sink,
    )?;

    let _watcher = match &args.preset {
        Some(path) => Some(watch_preset(path, pattern.clone(), tracks.clone())?),
        None => None,
    };

    let mut stdout = std::io::stdout();
    terminal::enable_raw_mode()?;
    execute!(stdout, terminal::EnterAlternateScreen, cursor::Hide)?;

    let result = ui_loop(&mut engine, &preset.name, &pattern, midi.as_deref());

    engine.stop();
    execute!(stdout, cursor::Show, terminal::LeaveAlternateScreen)?;
    terminal::disable_raw_mode()?;
    HostClock::shutdown();
    result
}

/// Swaps in the new pattern and track parameters whenever the preset file
/// is saved. Engine settings need a restart of the binary.
fn watch_preset(
    path: &Path,
    pattern: Arc<ArcSwap<Pattern>>,
    tracks: Arc<ArcSwap<Vec<Option<TriggerParams>>>>,
) -> Result<RecommendedWatcher, notify::Error> {
    let file = Preset::resolve_path(path);
    let reload_from = file.clone();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) if event.kind.is_modify() => match Preset::load(&reload_from) {
                Ok(preset) => {
                    pattern.store(Arc::new(preset.pattern));
                    tracks.store(Arc::new(preset.tracks));
                    tracing::info!("preset reloaded");
                }
                Err(e) => tracing::warn!(error = %e, "preset reload failed"),
            },
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "watch error"),
        },
        Config::default(),
    )?;

    watcher.watch(&file, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn ui_loop(
    engine: &mut PlaybackEngine,
    name: &str,
    pattern: &ArcSwap<Pattern>,
    midi: Option<&MidiSink>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut status = String::from("space: play/stop  r: restart  +/-: tempo  q: quit");

    loop {
        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char(' ') => {
                        if engine.is_running() {
                            engine.stop();
                        } else if let Err(e) = engine.start() {
                            status = format!("start failed: {}", e);
                        }
                    }
                    KeyCode::Char('r') => {
                        if let Err(e) = engine.restart() {
                            status = format!("restart failed: {}", e);
                        }
                    }
                    KeyCode::Char('+') | KeyCode::Char('=') => {
                        let bpm = engine.bpm() + TEMPO_STEP;
                        if let Err(e) = engine.set_tempo(bpm) {
                            status = e.to_string();
                        }
                    }
                    KeyCode::Char('-') => {
                        let bpm = engine.bpm() - TEMPO_STEP;
                        if let Err(e) = engine.set_tempo(bpm) {
                            status = e.to_string();
                        }
                    }
                    KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                    _ => {}
                }
            }
        }

        if let Some(midi) = midi {
            midi.release_due();
        }

        draw(engine, name, &pattern.load(), &status)?;
    }
}

fn draw(
    engine: &PlaybackEngine,
    name: &str,
    pattern: &Pattern,
    status: &str,
) -> std::io::Result<()> {
    let total_steps = engine.config().total_steps;
    let position = engine.musical_position();

    let mut stdout = std::io::stdout();
    queue!(
        stdout,
        cursor::MoveTo(0, 0),
        terminal::Clear(terminal::ClearType::All),
        Print(format!(
            "{}  {:.0} BPM  {:?}",
            name,
            engine.bpm(),
            engine.state()
        )),
    )?;

    for track in 0..pattern.track_count() {
        let row: String = (0..total_steps)
            .map(|step| match (position.current_step == Some(step), pattern.is_active(track, step)) {
                (true, true) => '#',
                (true, false) => '|',
                (false, true) => 'x',
                (false, false) => '.',
            })
            .collect();
        queue!(stdout, cursor::MoveTo(0, 2 + track as u16), Print(row))?;
    }

    let bar_width = 20;
    let filled = (position.progress * bar_width as f64) as usize;
    let bar: String = (0..bar_width)
        .map(|i| if i < filled { '=' } else { ' ' })
        .collect();
    let footer = 3 + pattern.track_count() as u16;
    queue!(
        stdout,
        cursor::MoveTo(0, footer),
        Print(format!("[{}]", bar)),
        cursor::MoveTo(0, footer + 2),
        Print(status),
    )?;
    stdout.flush()
}
