//! Rust library for controlling the audiovisual equipment of a room
//!
//! This library provides an async API for the devices found in a typical
//! classroom or meeting room. It supports:
//!
//! - Projector control over the CR-terminated line protocol on TCP port 4352,
//!   including the MD5 challenge-response handshake
//! - DSP mixer control over 9-byte binary frames through a serial-over-IP bridge
//! - Mains and screen relays switched over HTTP
//! - Projector power sequences (mains, warm-up, power command, state polling)
//! - Room scenes built from the above, with a live status feed
//!
//! # Quick Start
//!
//! ```no_run
//! use roomctl::{InputSource, Room, RoomConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RoomConfig::from_path("room.json")?;
//!     let room = Room::from_config(config)?;
//!
//!     // Watch progress while the projector starts
//!     let mut status = room.subscribe_status();
//!     tokio::spawn(async move {
//!         while let Ok(message) = status.recv().await {
//!             println!("{}", message);
//!         }
//!     });
//!
//!     let report = room.start_projector(InputSource::Hdmi1).await;
//!     println!("projector started: {}", report.succeeded());
//!
//!     // Nudge the main output up by one dB
//!     let level = room.mixer().apply_gain_delta("out0", roomctl::StepDirection::Up).await?;
//!     println!("out0 now at {:.1} dB", level);
//!     Ok(())
//! }
//! ```
//!
//! # Single Devices
//!
//! Each device client can be used on its own:
//!
//! ```no_run
//! use roomctl::{MixerConfig, MixerLink, ProjectorConfig, ProjectorLink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut projector = ProjectorConfig::new("192.168.1.220");
//!     projector.password = Some("1234".to_string());
//!     let projector = ProjectorLink::new(&projector);
//!     println!("power: {}", projector.power_state().await?);
//!
//!     let mixer = MixerLink::new(&MixerConfig::new("192.168.1.230"))?;
//!     mixer.mute_all(true).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Room**: Composition root and scenes
//! - **Sequencer**: Projector power-on and power-off procedures
//! - **Projector / Mixer / Relay**: Device clients
//! - **Connection**: Persistent framed mixer link over a pluggable transport
//! - **Protocol**: Wire formats of both device protocols
//! - **Config**: Serde room description handed to every component
//! - **Types**: Domain types and the dB code table

mod config;
mod connection;
pub mod db_table;
mod error;
mod mixer;
pub mod mock;
mod projector;
pub mod protocol;
mod relay;
mod room;
mod sequencer;
mod status;
mod types;

// Public exports
pub use config::{
    ChannelAssignments, MixerConfig, ProjectorConfig, RelayChannelRef, RelayConfig, RoomConfig,
    SequenceConfig, MIN_COMMAND_SPACING,
};
pub use connection::{Connector, LinkStream, MixerConnection, ReplyOptions, TcpConnector};
pub use error::{Result, RoomError};
pub use mixer::{decode_gain, MixerLink};
pub use projector::{ProjectorControl, ProjectorLink, RETRY_BACKOFF};
pub use relay::{HttpRelay, RelayChannel, RelayControl};
pub use room::{Room, RoomParts};
pub use sequencer::{PowerSequencer, SequenceKind, SequenceReport, SequenceSlot, SequenceTiming, StepOutcome};
pub use status::{StatusBoard, StatusReceiver, StatusSink};
pub use types::{BusLevel, InputSource, MixerBus, PowerState, Preset, StepDirection};
