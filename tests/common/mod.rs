//! Common test utilities: a loopback projector and a room assembled from fakes

#![allow(dead_code)]

use roomctl::mock::{MockConnector, MockProjector, MockRelay};
use roomctl::{MixerConfig, MixerLink, PowerState, ProjectorConfig, RelayChannel, Room, RoomParts, SequenceConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Projector speaking the line protocol on a loopback port
pub struct FakeProjector {
    pub port: u16,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeProjector {
    /// Greet every connection with `banner` and answer every command with `reply`;
    /// with no banner the connection is held open and never answered
    pub async fn start(banner: Option<&'static str>, reply: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let server_commands = commands.clone();
        let server_connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                server_connections.fetch_add(1, Ordering::SeqCst);
                let commands = server_commands.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, banner, reply, commands).await;
                });
            }
        });

        Self {
            port,
            commands,
            connections,
        }
    }

    pub fn config(&self) -> ProjectorConfig {
        let mut config = ProjectorConfig::new("127.0.0.1");
        config.port = self.port;
        config.timeout_s = 0.5;
        config.retries = 0;
        config
    }

    /// Non-empty lines received after the banner
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve(
    socket: TcpStream,
    banner: Option<&'static str>,
    reply: &'static str,
    commands: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    let Some(banner) = banner else {
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await?;
        return Ok(());
    };
    write_half.write_all(format!("{}\r", banner).as_bytes()).await?;

    loop {
        let mut line = Vec::new();
        if reader.read_until(b'\r', &mut line).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line).trim().to_string();
        if text.is_empty() {
            continue;
        }
        commands.lock().unwrap().push(text);
        write_half.write_all(format!("{}\r", reply).as_bytes()).await?;
    }
}

/// Fakes behind a [`Room`]
pub struct RoomFakes {
    pub projector: MockProjector,
    /// Channel 0 projector mains, channel 1 mixer mains
    pub mains: MockRelay,
    /// Channel 0 screen down, channel 1 screen up
    pub screen: MockRelay,
    pub mixer: MockConnector,
}

pub fn room_with(states: impl IntoIterator<Item = PowerState>) -> (Room, RoomFakes) {
    let fakes = RoomFakes {
        projector: MockProjector::new(states),
        mains: MockRelay::new(),
        screen: MockRelay::new(),
        mixer: MockConnector::new(),
    };

    let mains: Arc<MockRelay> = Arc::new(fakes.mains.clone());
    let screen: Arc<MockRelay> = Arc::new(fakes.screen.clone());
    let mixer = MixerLink::with_connector(&MixerConfig::new("mock"), Box::new(fakes.mixer.clone())).unwrap();

    let room = Room::with_parts(RoomParts {
        projector: Arc::new(fakes.projector.clone()),
        mixer: Arc::new(mixer),
        projector_mains: RelayChannel::new(mains.clone(), 0),
        mixer_mains: Some(RelayChannel::new(mains, 1)),
        screen_down: Some(RelayChannel::new(screen.clone(), 0)),
        screen_up: Some(RelayChannel::new(screen, 1)),
        sequence: SequenceConfig::default(),
    });

    (room, fakes)
}
