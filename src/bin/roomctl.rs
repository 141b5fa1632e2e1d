use clap::{Parser, Subcommand, ValueEnum};
use roomctl::{InputSource, ProjectorLink, Room, RoomConfig, StepDirection};
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Control the projector, mixer and relays of a room
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Room description (JSON)
    #[arg(short, long, default_value = "room.json")]
    config: PathBuf,

    /// Log protocol traffic
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the projector power sequence
    Power { state: Switch },
    /// Query the projector power state
    State,
    /// Select the projector input (HDMI1, HDMI2, Computer1, ...)
    Input { source: InputSource },
    /// Send a raw projector command, e.g. `raw LAMP ?`
    Raw { command: String, args: String },
    /// Mute or unmute every mixer channel in use
    Mute { state: Switch },
    /// Step a bus gain by one dB (up/down)
    Gain { bus: String, direction: StepDirection },
    /// Step a bus volume by one dB (up/down)
    Volume { bus: String, direction: StepDirection },
    /// Recall a mixer preset (F00, U01, ...)
    Recall { preset: String },
    /// Print the level of every bus as JSON
    Levels,
    /// Pulse the screen relay
    Screen { position: ScreenPosition },
    /// Run a room scene
    Scene {
        scene: Scene,
        /// Input selected by the projector scene
        #[arg(long, default_value = "HDMI1")]
        input: InputSource,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Switch {
    On,
    Off,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScreenPosition {
    Up,
    Down,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scene {
    Audio,
    Projector,
    Shutdown,
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "roomctl=debug" } else { "roomctl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = RoomConfig::from_path(&cli.config)?;
    let projector = ProjectorLink::new(&config.projector);
    let room = Room::from_config(config)?;

    match cli.command {
        Command::Power { state } => {
            let report = room.power_projector(matches!(state, Switch::On)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::State => {
            println!("{}", room.projector().power_state().await?);
        }
        Command::Input { source } => {
            let accepted = room.set_input(source).await?;
            println!("{}: {}", source, if accepted { "OK" } else { "refused" });
        }
        Command::Raw { command, args } => {
            println!("{}", projector.send_command(&command.to_uppercase(), &args).await?);
        }
        Command::Mute { state } => {
            room.mixer().mute_all(matches!(state, Switch::On)).await?;
        }
        Command::Gain { bus, direction } => {
            let db = room.mixer().apply_gain_delta(&bus, direction).await?;
            println!("{}: {:.1} dB", bus, db);
        }
        Command::Volume { bus, direction } => {
            let db = room.mixer().apply_volume_delta(&bus, direction).await?;
            println!("{}: {:.1} dB", bus, db);
        }
        Command::Recall { preset } => {
            room.mixer().recall(&preset).await?;
        }
        Command::Levels => {
            let levels = room.mixer().read_levels().await?;
            println!("{}", serde_json::to_string_pretty(&levels)?);
        }
        Command::Screen { position } => {
            let moved = match position {
                ScreenPosition::Up => room.raise_screen().await,
                ScreenPosition::Down => room.lower_screen().await,
            };
            if !moved {
                return Err("screen relay did not switch".into());
            }
        }
        Command::Scene { scene, input } => match scene {
            Scene::Audio => room.start_audio().await?,
            Scene::Projector => {
                let report = room.start_projector(input).await;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Scene::Shutdown => {
                let report = room.shutdown().await;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        },
    }

    room.mixer().close().await;
    Ok(())
}
