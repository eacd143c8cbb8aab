use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Record global mouse and keyboard input and play it back.
#[derive(Parser, Debug)]
#[command(name = "replaykey")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Overrides for the configured playback defaults
#[derive(Args, Debug, Default)]
pub struct PlayArgs {
    /// Speed factor, 2.0 plays twice as fast
    #[arg(short, long)]
    pub speed: Option<f64>,

    /// Number of passes (0 = until stopped)
    #[arg(short, long)]
    pub loops: Option<u32>,

    /// Pointer jitter radius in pixels
    #[arg(short, long)]
    pub jitter: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture a macro between two presses of the record hotkey
    Record {
        /// Output file
        file: PathBuf,

        /// Macro name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Replay a saved macro; the stop hotkey cancels
    Play {
        file: PathBuf,

        #[command(flatten)]
        args: PlayArgs,
    },

    /// Hotkey-driven session: toggle record, toggle play, save, load, stop
    Run {
        /// File used by the save and load hotkeys
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Manage named macros
    Favorites {
        #[command(subcommand)]
        command: FavoritesCommand,
    },

    /// Inspect or reset the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum FavoritesCommand {
    List,
    /// Store the macro in <file> under <name>
    Add { name: String, file: PathBuf },
    Remove { name: String },
    Play {
        name: String,

        #[command(flatten)]
        args: PlayArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the configuration file location
    Path,
    /// Overwrite the configuration file with defaults
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_overrides_parse() {
        let cli = Cli::parse_from(["replaykey", "play", "m.json", "--speed", "2", "-l", "0"]);
        match cli.command {
            Commands::Play { file, args } => {
                assert_eq!(file, PathBuf::from("m.json"));
                assert_eq!(args.speed, Some(2.0));
                assert_eq!(args.loops, Some(0));
                assert_eq!(args.jitter, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nested_subcommands_parse() {
        let cli = Cli::parse_from(["replaykey", "-v", "favorites", "add", "login", "login.json"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Favorites {
                command: FavoritesCommand::Add { .. }
            }
        ));
        let cli = Cli::parse_from(["replaykey", "config", "reset", "--config", "/tmp/c.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
    }
}
