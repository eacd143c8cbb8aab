use std::{
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    thread::{self, JoinHandle},
};

use clap::Parser;
use log::{LevelFilter, error, info, warn};
use replaykey::{
    Action, Activity, CancelSignal, Config, Error, Favorites, Listener, MacroResult,
    PlaybackOptions, PlaybackOutcome, Player, RdevSynthesizer, Recording, config::app_dir,
    global_event::serializer,
};

mod cli;

use cli::{Cli, Commands, ConfigCommand, FavoritesCommand, PlayArgs};

const SESSION_FILE: &str = "session.json";

fn init_logging(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> MacroResult<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    match cli.command {
        Commands::Record { file, name } => {
            let config = Config::load_from(&config_path)?;
            let name = name.unwrap_or_else(|| file_stem(&file));
            let recording = record(&config, name)?;
            serializer::save_to_path(&recording, &file)?;
            info!("Saved {} events to {}", recording.len(), file.display());
            Ok(())
        }
        Commands::Play { file, args } => {
            let config = Config::load_from(&config_path)?;
            let recording = serializer::load_from_path(&file)?;
            play(&config, &recording, &args)
        }
        Commands::Run { file } => {
            let config = Config::load_from(&config_path)?;
            let file = match file {
                Some(file) => file,
                None => app_dir()?.join(SESSION_FILE),
            };
            Session::new(config, file)?.run();
            Ok(())
        }
        Commands::Favorites { command } => favorites(command, &config_path),
        Commands::Config { command } => config_command(command, &config_path),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".into())
}

fn record(config: &Config, name: String) -> MacroResult<Recording> {
    let listener = Listener::spawn(
        config.capture.clone(),
        config.hotkeys.clone(),
        Activity::new(),
    )?;
    info!(
        "Press {} to start recording, again to stop",
        config.hotkeys.record
    );
    while let Ok(action) = listener.actions().recv_blocking() {
        if action != Action::ToggleRecord {
            continue;
        }
        if listener.is_capturing()? {
            return listener.stop_capture();
        }
        listener.start_capture(name.clone())?;
        info!("Recording {name:?}");
    }
    Err(Error::Disconnected)
}

fn playback_options(config: &Config, args: &PlayArgs) -> PlaybackOptions {
    let mut options = PlaybackOptions::from(&config.playback);
    if let Some(speed) = args.speed {
        options.speed = speed;
    }
    if let Some(loops) = args.loops {
        options.loops = loops;
    }
    if let Some(jitter) = args.jitter {
        options.jitter_radius = jitter;
    }
    options
}

fn play(config: &Config, recording: &Recording, args: &PlayArgs) -> MacroResult<()> {
    let options = playback_options(config, args);
    options.validate()?;
    let activity = Activity::new();
    let cancel = CancelSignal::new();

    // Held until playback returns; dropping it ends the forwarding thread.
    let _listener = match Listener::spawn(
        config.capture.clone(),
        config.hotkeys.clone(),
        activity.clone(),
    ) {
        Ok(listener) => {
            let actions = listener.actions().clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                while let Ok(action) = actions.recv_blocking() {
                    if matches!(action, Action::StopPlayback | Action::TogglePlay) {
                        cancel.cancel();
                    }
                }
            });
            info!("Press {} to stop", config.hotkeys.stop_playback);
            Some(listener)
        }
        Err(err) => {
            warn!("Stop hotkey unavailable: {err}");
            None
        }
    };

    let mut player = Player::new(RdevSynthesizer::new(), activity);
    match player.play_blocking(recording, &options, &cancel)? {
        PlaybackOutcome::Completed { passes, dispatched } => {
            info!("Played {dispatched} events in {passes} passes")
        }
        PlaybackOutcome::Stopped { passes, dispatched } => {
            info!("Stopped after {dispatched} events ({passes} full passes)")
        }
    }
    Ok(())
}

/// Hotkey-driven record/play loop without a window.
struct Session {
    config: Config,
    file: PathBuf,
    activity: Activity,
    listener: Listener,
    cancel: CancelSignal,
    current: Option<Recording>,
    playback: Option<JoinHandle<MacroResult<PlaybackOutcome>>>,
}

impl Session {
    fn new(config: Config, file: PathBuf) -> MacroResult<Self> {
        let activity = Activity::new();
        let listener = Listener::spawn(
            config.capture.clone(),
            config.hotkeys.clone(),
            activity.clone(),
        )?;
        let current = if file.exists() {
            serializer::load_from_path(&file)
                .inspect_err(|err| warn!("Ignoring {}: {err}", file.display()))
                .ok()
        } else {
            None
        };
        Ok(Self {
            config,
            file,
            activity,
            listener,
            cancel: CancelSignal::new(),
            current,
            playback: None,
        })
    }

    fn run(mut self) {
        for (action, combo) in self.config.hotkeys.iter() {
            info!("{combo}: {action}");
        }
        while let Ok(action) = self.listener.actions().recv_blocking() {
            self.reap_playback();
            if let Err(err) = self.handle(action) {
                error!("{action}: {err}");
            }
        }
        warn!("Listener closed, leaving session");
    }

    fn handle(&mut self, action: Action) -> MacroResult<()> {
        match action {
            Action::ToggleRecord => {
                if self.listener.is_capturing()? {
                    let recording = self.listener.stop_capture()?;
                    info!(
                        "Recorded {} events over {:?}",
                        recording.len(),
                        recording.duration()
                    );
                    self.current = Some(recording);
                } else {
                    self.listener.start_capture(file_stem(&self.file))?;
                    info!("Recording");
                }
            }
            Action::TogglePlay if self.playback.is_some() => self.cancel.cancel(),
            Action::TogglePlay => self.start_playback()?,
            Action::StopPlayback => {
                if self.playback.is_some() {
                    self.cancel.cancel();
                }
            }
            Action::Save => match &self.current {
                Some(recording) => {
                    serializer::save_to_path(recording, &self.file)?;
                    info!("Saved to {}", self.file.display());
                }
                None => warn!("Nothing recorded yet"),
            },
            Action::Load => {
                let recording = serializer::load_from_path(&self.file)?;
                info!("Loaded {:?} ({} events)", recording.name(), recording.len());
                self.current = Some(recording);
            }
        }
        Ok(())
    }

    fn start_playback(&mut self) -> MacroResult<()> {
        if let Some(kind) = self.activity.current() {
            return Err(Error::AlreadyActive(kind));
        }
        let Some(recording) = self.current.clone() else {
            warn!("Nothing to play");
            return Ok(());
        };
        let options = PlaybackOptions::from(&self.config.playback);
        let activity = self.activity.clone();
        let cancel = self.cancel.clone();
        cancel.reset();
        let handle = thread::Builder::new()
            .name("replaykey-player".into())
            .spawn(move || {
                Player::new(RdevSynthesizer::new(), activity)
                    .play_blocking(&recording, &options, &cancel)
            })?;
        self.playback = Some(handle);
        Ok(())
    }

    fn reap_playback(&mut self) {
        if !self.playback.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        if let Some(handle) = self.playback.take() {
            match handle.join() {
                Ok(Ok(outcome)) => info!("Playback: {outcome:?}"),
                Ok(Err(err)) => error!("Playback failed: {err}"),
                Err(_) => error!("Playback thread panicked"),
            }
        }
    }
}

fn favorites(command: FavoritesCommand, config_path: &Path) -> MacroResult<()> {
    let mut favorites = Favorites::load()?;
    match command {
        FavoritesCommand::List => {
            if favorites.is_empty() {
                info!("No favorites in {}", favorites.path().display());
            }
            for name in favorites.names() {
                println!("{name}");
            }
        }
        FavoritesCommand::Add { name, file } => {
            let recording = serializer::load_from_path(&file)?.renamed(name);
            favorites.insert(&recording)?;
            favorites.save()?;
        }
        FavoritesCommand::Remove { name } => {
            if favorites.remove(&name) {
                favorites.save()?;
            } else {
                warn!("No favorite named {name:?}");
            }
        }
        FavoritesCommand::Play { name, args } => {
            let config = Config::load_from(config_path)?;
            let recording = favorites.get(&name)?.ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no favorite named {name:?}"))
            })?;
            play(&config, &recording, &args)?;
        }
    }
    Ok(())
}

fn config_command(command: ConfigCommand, path: &Path) -> MacroResult<()> {
    match command {
        ConfigCommand::Show => {
            let config = Config::load_from(path)?;
            let text = serde_json::to_string_pretty(&config)
                .map_err(|e| Error::Config(e.to_string()))?;
            println!("{text}");
        }
        ConfigCommand::Path => println!("{}", path.display()),
        ConfigCommand::Reset => {
            Config::default().save_to(path)?;
            info!("Wrote defaults to {}", path.display());
        }
    }
    Ok(())
}
