use std::path::{Path, PathBuf};

use beatline_core::{
    DemoPlayer, EngineConfig, HeadlessCompiler, HeadlessDevice, NullAudio, PlaybackEvent,
    PlaybackService, ProjectData,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> beatline_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play(args) => run_play(&args),
        Commands::Inspect { project } => run_inspect(&project),
        Commands::InitConfig { path } => run_init_config(&path),
    }
}

fn run_play(args: &PlayArgs) -> beatline_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(width) = args.width {
        config.render.width = width;
    }
    if let Some(height) = args.height {
        config.render.height = height;
    }
    config.validate();

    let project = ProjectData::load(&args.project)?;
    tracing::info!(
        project = ?args.project,
        width = config.render.width,
        height = config.render.height,
        seconds = args.seconds,
        fps = args.fps,
        "starting headless playback"
    );

    let mut player = DemoPlayer::new(
        project,
        &config,
        HeadlessDevice::new(),
        HeadlessCompiler::new(),
        NullAudio,
    );
    let root = args.project.parent().unwrap_or_else(|| Path::new("."));
    let imported = player.import_textures(root);
    tracing::debug!(
        imported,
        registered = player.graph().assets().len(),
        "imported file textures"
    );

    player.prepare_playback()?;
    if let Some(beat) = args.seek_beat {
        player.seek_to_beat(beat);
    }

    let fps = args.fps.max(1.0);
    let dt = 1.0 / fps;
    let frames = (args.seconds.max(0.0) * fps).round() as u64;
    let (width, height) = (config.render.width, config.render.height);

    let mut event_count = 0usize;
    let mut black_frames = 0u64;
    for frame in 0..frames {
        let events = player.update(frame as f64 * dt);
        for event in &events {
            log_event(event);
        }
        event_count += events.len();

        if player.render(width, height).is_none() {
            black_frames += 1;
        }
        if !player.transport().is_playing() {
            tracing::info!(frame, "playback ended");
            break;
        }
    }

    let stats = player.graph().device().stats();
    let summary = serde_json::json!({
        "frames": frames,
        "blackFrames": black_frames,
        "events": event_count,
        "beat": player.current_beat(),
        "scene": player.active_scene().index,
        "draws": stats.draws,
        "dispatches": stats.dispatches,
        "compiles": player.graph().compiler().compile_count(),
        "compileFailures": player.graph().compiler().failure_count(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn log_event(event: &PlaybackEvent) {
    match event {
        PlaybackEvent::Scene(command) => tracing::info!(
            beat = command.beat,
            scene = ?command.scene_index,
            transition = %command.transition,
            "scene row"
        ),
        PlaybackEvent::MusicChange {
            beat, music_index, ..
        } => tracing::info!(beat, music = music_index, "music row"),
        PlaybackEvent::OneShot {
            beat,
            one_shot_index,
            ..
        } => tracing::info!(beat, one_shot = one_shot_index, "one-shot row"),
        PlaybackEvent::Stop { beat, .. } => tracing::info!(beat, "stop row"),
    }
}

fn run_inspect(path: &PathBuf) -> beatline_core::Result<()> {
    let project = ProjectData::load(path)?;
    let service = PlaybackService;
    let track = &project.track;

    println!(
        "track `{}`: {} beats at {} bpm, {} rows",
        track.name,
        track.length_in_beats,
        track.tempo,
        track.rows().len()
    );
    for (index, scene) in project.scenes.iter().enumerate() {
        println!(
            "scene {index}: {} ({} bindings, {} postfx, {} compute)",
            scene.name,
            scene.bindings.len(),
            scene.post_fx.len(),
            scene.compute_effects.len()
        );
    }
    for (index, clip) in project.audio_library.iter().enumerate() {
        let used = service.has_music_reference(track, index);
        println!("audio {index}: {} {:?} bpm {} used as music: {used}", clip.path, clip.kind, clip.bpm);
    }

    let last = track.rows().last().map_or(-1, |row| row.row_id);
    for event in service.build_playback_events(track, -1, last) {
        println!("{:>6}  {event:?}", event.beat());
    }
    Ok(())
}

fn run_init_config(path: &PathBuf) -> beatline_core::Result<()> {
    EngineConfig::default().save(path)?;
    tracing::info!(?path, "wrote default configuration");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-synchronized demo engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a project headlessly and print a frame summary.
    Play(PlayArgs),
    /// Print the scenes, audio clips and tracker events of a project.
    Inspect {
        /// Project document to read.
        project: PathBuf,
    },
    /// Write the default engine configuration.
    InitConfig {
        /// Destination of the configuration file.
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct PlayArgs {
    /// Project document to play.
    project: PathBuf,
    /// Engine configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Seconds of playback to simulate.
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,
    /// Simulated frame rate.
    #[arg(long, default_value_t = 60.0)]
    fps: f64,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Beat to start playback from.
    #[arg(long)]
    seek_beat: Option<i64>,
}
