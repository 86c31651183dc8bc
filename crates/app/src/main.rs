use std::{f64::consts::PI, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use karaoke_core::{
    midi_to_frequency, Difficulty, EngineConfig, Judgment, KaraokeError, LyricLine, Note,
    NoteTimeline, PitchTracker, PlaybackClock, Session,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> karaoke_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect {
            input,
            window,
            config,
        } => run_detect(&input, window, config.as_ref()),
        Commands::Simulate(args) => run_simulate(&args),
    }
}

fn run_detect(
    input: &PathBuf,
    window: Option<usize>,
    config: Option<&PathBuf>,
) -> karaoke_core::Result<()> {
    let mut config = load_config(config)?;
    let (samples, sample_rate) = read_mono_wav(input)?;
    config.capture.sample_rate = sample_rate;
    if let Some(window) = window {
        config.capture.window_size = window;
    }
    config.validate()?;
    let capture = config.capture.clone();

    info!(?input, sample_rate, window = capture.window_size, "detecting pitch");

    let mut tracker = PitchTracker::new(&capture, config.pitch);
    let hop = (capture.window_size / 2).max(1);
    println!("time_ms\tfrequency_hz\tmidi\tconfidence\tloudness");

    let mut start = 0;
    while start + capture.window_size <= samples.len() {
        let Some(sample) = tracker.push_window(&samples[start..start + capture.window_size])?
        else {
            break;
        };
        let time_ms = start as f64 * 1000.0 / f64::from(sample_rate);
        let hz = sample
            .frequency_hz
            .map_or_else(|| "-".to_string(), |hz| format!("{hz:.2}"));
        let midi = sample
            .midi
            .map_or_else(|| "-".to_string(), |midi| format!("{midi:.2}"));
        println!(
            "{time_ms:.0}\t{hz}\t{midi}\t{:.2}\t{:.2}",
            sample.confidence, sample.loudness
        );
        start += hop;
    }

    Ok(())
}

fn run_simulate(args: &SimulateArgs) -> karaoke_core::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let timeline = match &args.chart {
        Some(path) => NoteTimeline::load(path)?,
        None => demo_chart()?,
    };

    let sample_rate = config.capture.sample_rate;
    let window = config.capture.window_size;
    let tick_ms = config.capture.tick_interval_ms();

    let mut tracker = PitchTracker::new(&config.capture, config.pitch.clone());
    let handle = tracker.handle();
    let mut session = Session::new(timeline, args.difficulty, &config)?;
    let mut clock = PlaybackClock::new();
    let end_ms = session.timeline().end_ms() + 500;
    let mut star_power_requested = false;

    info!(
        difficulty = %args.difficulty,
        detune = args.detune,
        tick_ms,
        "simulating performance"
    );

    while clock.now_ms() <= end_ms {
        let now = clock.now_ms();

        let end_sample = (now * u64::from(sample_rate) / 1000) as usize;
        if end_sample >= window {
            let samples = render_voice(
                session.timeline(),
                sample_rate,
                args.detune,
                end_sample - window,
                window,
            );
            tracker.push_window(&samples)?;
        }

        if let Some(at) = args.star_power_at {
            if !star_power_requested && now >= at {
                star_power_requested = true;
                if let Err(err) = session.activate_star_power() {
                    warn!(%err, at_ms = now, "could not trigger star power");
                }
            }
        }

        let latest = handle.latest_estimate()?;
        for judgment in session.tick(now, latest.as_ref()) {
            report(&judgment);
        }
        clock.advance(tick_ms);
    }

    let (remaining, summary) = session.finish();
    for judgment in &remaining {
        report(judgment);
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> karaoke_core::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn report(judgment: &Judgment) {
    match judgment {
        Judgment::Hit {
            note_id,
            rating,
            points,
            combo,
            at_ms,
        } => info!(note = %note_id, ?rating, points, combo, at_ms, "hit"),
        Judgment::Miss { note_id, at_ms } => info!(note = %note_id, at_ms, "miss"),
    }
}

/// Reads the first channel of a WAV file as normalised floats.
fn read_mono_wav(path: &PathBuf) -> karaoke_core::Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(|err| {
        KaraokeError::msg(format!("cannot open `{}`: {err}", path.display()))
    })?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>(),
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 * scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
        }
    }
    .map_err(|err| KaraokeError::msg(format!("cannot decode `{}`: {err}", path.display())))?;

    let mono = interleaved.into_iter().step_by(channels).collect();
    Ok((mono, spec.sample_rate))
}

/// Synthesises a voice singing every active note, `detune` semitones off.
fn render_voice(
    timeline: &NoteTimeline,
    sample_rate: u32,
    detune: f64,
    start: usize,
    len: usize,
) -> Vec<f32> {
    let rate = f64::from(sample_rate);
    (start..start + len)
        .map(|index| {
            let t_ms = (index as f64 * 1000.0 / rate) as u64;
            let Some(note) = timeline.active_at(t_ms).next() else {
                return 0.0;
            };
            let frequency = midi_to_frequency(note.pitch_midi + detune);
            let phase = 2.0 * PI * frequency * index as f64 / rate;
            (0.3 * phase.sin() + 0.08 * (2.0 * phase).sin()) as f32
        })
        .collect()
}

fn demo_chart() -> karaoke_core::Result<NoteTimeline> {
    let melody = [
        (60.0, "Twin"),
        (60.0, "kle "),
        (67.0, "twin"),
        (67.0, "kle "),
        (69.0, "lit"),
        (69.0, "tle "),
        (67.0, "star"),
    ];

    let notes: Vec<Note> = melody
        .iter()
        .enumerate()
        .map(|(index, (pitch, lyric))| {
            let note = Note::new(index as u32 + 1, *pitch, 500 + index as u64 * 500, 450)
                .with_lyric(*lyric);
            match index {
                4 => note.bonus(),
                6 => note.golden(),
                _ => note,
            }
        })
        .collect();

    let (first, second) = notes.split_at(4);
    NoteTimeline::new(vec![
        LyricLine::new(first.to_vec()),
        LyricLine::new(second.to_vec()),
    ])
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Karaoke pitch scoring toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the detected pitch track of a WAV recording.
    Detect {
        /// Path to the WAV file to analyse.
        input: PathBuf,
        /// Analysis window in samples.
        #[arg(short, long)]
        window: Option<usize>,
        /// Optional JSON engine configuration.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Sing a chart with a synthetic voice and print the results.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// JSON chart to perform. Defaults to a short built-in melody.
    #[arg(long)]
    chart: Option<PathBuf>,
    /// easy, medium or hard.
    #[arg(short, long, default_value = "medium")]
    difficulty: Difficulty,
    /// How far off-key the synthetic singer is, in semitones.
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    detune: f64,
    /// Optional JSON engine configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Press the star-power button at this playback time.
    #[arg(long)]
    star_power_at: Option<u64>,
}
