use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dance_cue_core::{
    format_timestamp, parse_timestamp, profile_click, render_click, AppConfig, BeatEvent,
    ClickKind, CueDraft, CueId, CueSheet, DanceCueError, ManualClock, Metronome, OfflineBackend,
    SystemClock,
};
use tracing_subscriber::EnvFilter;

/// Longest the session loop waits without rendering audio.
const IDLE_POLL: Duration = Duration::from_millis(20);

fn main() -> dance_cue_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            bpm,
            beats,
            mute,
            json,
        } => run_clock(config, bpm, beats, mute, json),
        Commands::Tap { intervals } => run_tap(config, &intervals),
        Commands::Click { downbeat } => run_click(&config, downbeat),
        Commands::Session => run_session(config),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> dance_cue_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

/// Builds a wall-clock metronome whose beats arrive on the returned channel.
fn build_metronome(
    config: &AppConfig,
) -> dance_cue_core::Result<(Metronome, mpsc::Receiver<BeatEvent>)> {
    let mut metronome = Metronome::configure(
        config,
        Arc::new(SystemClock::start()),
        Box::new(OfflineBackend::new()),
    )?;
    // Failure is already logged; the clock runs silently.
    let _ = metronome.enable_audio();

    let (sender, beats) = mpsc::channel();
    metronome.on_beat(move |event| {
        let _ = sender.send(*event);
    });
    Ok((metronome, beats))
}

fn run_clock(
    config: AppConfig,
    bpm: Option<f64>,
    beats: u32,
    mute: bool,
    json: bool,
) -> dance_cue_core::Result<()> {
    let (mut metronome, events) = build_metronome(&config)?;
    if let Some(bpm) = bpm {
        metronome.set_bpm(bpm)?;
    }
    metronome.set_muted(mute);

    metronome.start();
    if !metronome.is_running() {
        return Err(DanceCueError::BpmUnset);
    }

    let mut fired = 0;
    while fired < beats {
        for event in events.try_iter() {
            tracing::debug!(lateness = ?event.lateness(), "beat dispatched");
            report_beat(&event, json)?;
            fired += 1;
        }
        if fired >= beats {
            break;
        }
        if let Some(delay) = metronome.next_delay() {
            std::thread::sleep(delay.min(IDLE_POLL));
        }
        metronome.poll();
    }

    metronome.stop();
    tracing::info!(beats = fired, "run finished");
    Ok(())
}

fn report_beat(event: &BeatEvent, json: bool) -> dance_cue_core::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        let marker = if event.is_downbeat { '●' } else { '○' };
        println!("{marker} {} ({:.2} BPM)", event.beat_number, event.bpm);
    }
    Ok(())
}

fn run_tap(config: AppConfig, intervals: &[f64]) -> dance_cue_core::Result<()> {
    let clock = ManualClock::new();
    let mut metronome =
        Metronome::configure(&config, Arc::new(clock.clone()), Box::new(OfflineBackend::new()))?;

    metronome.tap_tempo();
    for interval in intervals {
        clock.advance_ms(*interval);
        match metronome.tap_tempo() {
            Some(bpm) => println!("+{interval} ms -> {bpm:.2} BPM"),
            None => println!("+{interval} ms -> window restarted"),
        }
    }

    match metronome.bpm() {
        Some(bpm) => println!("tempo: {bpm:.2} BPM"),
        None => println!("tempo: unset"),
    }
    Ok(())
}

fn run_click(config: &AppConfig, downbeat: bool) -> dance_cue_core::Result<()> {
    let kind = if downbeat {
        ClickKind::Downbeat
    } else {
        ClickKind::Regular
    };
    let sample_rate = config.audio.sample_rate;
    let samples = render_click(&config.click, kind, sample_rate);
    let profile = profile_click(&samples, sample_rate)?;

    println!("{kind:?} click");
    println!("  frequency: {:.1} Hz", profile.peak_frequency_hz);
    println!("  peak:      {:.3}", profile.peak_amplitude);
    println!("  length:    {:.1} ms", profile.duration_ms);
    Ok(())
}

fn run_session(config: AppConfig) -> dance_cue_core::Result<()> {
    let (mut metronome, events) = build_metronome(&config)?;
    let mut cues = CueSheet::new();
    let step = config.metronome.bpm_step;

    let (sender, commands) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });

    println!("type `help` for commands");
    loop {
        let wait = metronome
            .next_delay()
            .map_or(IDLE_POLL, |delay| delay.min(IDLE_POLL));

        match commands.recv_timeout(wait) {
            Ok(line) => match handle_command(&line, &mut metronome, &mut cues, step) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(err) => println!("error: {err}"),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        metronome.poll();
        for event in events.try_iter() {
            report_beat(&event, false)?;
        }
    }

    metronome.stop();
    metronome.release_audio();
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

fn handle_command(
    line: &str,
    metronome: &mut Metronome,
    cues: &mut CueSheet,
    step: f64,
) -> dance_cue_core::Result<Flow> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Flow::Continue);
    };
    let rest: Vec<&str> = words.collect();

    match command {
        "start" => metronome.start(),
        "stop" => metronome.stop(),
        "+" => println!("{:.2} BPM", metronome.adjust_bpm(step)?),
        "-" => println!("{:.2} BPM", metronome.adjust_bpm(-step)?),
        "bpm" => {
            let value = rest
                .first()
                .and_then(|raw| raw.parse::<f64>().ok())
                .ok_or(DanceCueError::InvalidInput("usage: bpm <value>"))?;
            println!("{:.2} BPM", metronome.set_bpm(value)?);
        }
        "tap" => match metronome.tap_tempo() {
            Some(bpm) => println!("{bpm:.2} BPM"),
            None => println!("keep tapping"),
        },
        "mute" => {
            let muted = metronome.toggle_mute();
            println!("{}", if muted { "muted" } else { "unmuted" });
        }
        "audio" => {
            metronome.enable_audio()?;
            println!("audio enabled");
        }
        "cue" => {
            let (time, text) = rest
                .split_first()
                .ok_or(DanceCueError::InvalidInput("usage: cue <m:ss> <title> [| note]"))?;
            let id = cues.add(draft_from(time, text, metronome.beat_snapshot())?)?;
            println!("added cue {id}");
        }
        "edit" => {
            let (id, rest) = rest
                .split_first()
                .ok_or(DanceCueError::InvalidInput("usage: edit <id> <m:ss> <title> [| note]"))?;
            let id = parse_cue_id(id)?;
            let (time, text) = rest
                .split_first()
                .ok_or(DanceCueError::InvalidInput("usage: edit <id> <m:ss> <title> [| note]"))?;
            let beat = cues.get(id).and_then(|cue| cue.beat);
            cues.update(id, draft_from(time, text, beat)?)?;
            println!("updated cue {id}");
        }
        "rm" => {
            let id = parse_cue_id(
                rest.first()
                    .ok_or(DanceCueError::InvalidInput("usage: rm <id>"))?,
            )?;
            match cues.remove(id) {
                Some(cue) => println!("removed `{}`", cue.title),
                None => return Err(DanceCueError::UnknownCue(id.get())),
            }
        }
        "cues" => {
            for cue in cues.sorted() {
                let beat = cue.beat.map(|b| format!(" [beat {b}]")).unwrap_or_default();
                println!(
                    "{} {} {}{beat} {}",
                    cue.id,
                    format_timestamp(cue.timestamp_seconds),
                    cue.title,
                    cue.note
                );
            }
        }
        "at" => {
            let time = parse_timestamp(
                rest.first()
                    .ok_or(DanceCueError::InvalidInput("usage: at <m:ss>"))?,
            )?;
            match cues.active_at(time) {
                Some(cue) => println!("active: {} {}", cue.id, cue.title),
                None => println!("no cue near {}", format_timestamp(time)),
            }
        }
        "status" => println!(
            "{} | bpm {} | beat {}/{} | {}",
            if metronome.is_running() { "running" } else { "stopped" },
            metronome
                .bpm()
                .map_or_else(|| "unset".to_string(), |bpm| format!("{bpm:.2}")),
            metronome.current_beat(),
            metronome.beats_per_measure(),
            if metronome.is_muted() { "muted" } else { "sound on" },
        ),
        "help" => println!(
            "start | stop | bpm <v> | + | - | tap | mute | audio | cue <m:ss> <title> [| note] \
             | edit <id> <m:ss> <title> [| note] | rm <id> | cues | at <m:ss> | status | quit"
        ),
        "quit" | "exit" => return Ok(Flow::Quit),
        other => println!("unknown command `{other}`"),
    }
    Ok(Flow::Continue)
}

fn draft_from(time: &str, words: &[&str], beat: Option<u32>) -> dance_cue_core::Result<CueDraft> {
    let seconds = parse_timestamp(time)?;
    let text = words.join(" ");
    let (title, note) = match text.split_once('|') {
        Some((title, note)) => (title.trim(), note.trim()),
        None => (text.trim(), ""),
    };
    Ok(CueDraft::new(seconds, title).with_note(note).with_beat(beat))
}

fn parse_cue_id(raw: &str) -> dance_cue_core::Result<CueId> {
    raw.trim_start_matches('#')
        .parse::<u64>()
        .map(CueId::from)
        .map_err(|_| DanceCueError::InvalidInput("cue ids are numbers"))
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Metronome and cue sheet for dance videos", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply to anything it omits.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the beat clock in real time for a number of beats.
    Run {
        /// Tempo to start at, overriding the configured initial BPM.
        #[arg(short, long)]
        bpm: Option<f64>,
        /// Stop after this many beats.
        #[arg(short = 'n', long, default_value_t = 16)]
        beats: u32,
        /// Keep the beat clock but suppress the click.
        #[arg(long)]
        mute: bool,
        /// Print one JSON object per beat.
        #[arg(long)]
        json: bool,
    },
    /// Estimate a tempo from tap intervals given in milliseconds.
    Tap {
        #[arg(required = true, num_args = 1..)]
        intervals: Vec<f64>,
    },
    /// Render one click and report its tone.
    Click {
        /// Inspect the accented click instead of the regular one.
        #[arg(long)]
        downbeat: bool,
    },
    /// Interactive session reading commands from stdin.
    Session,
}
