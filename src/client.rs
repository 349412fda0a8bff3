//! Client side of the control protocol.
//!
//! [`PlayerClient::connect`] opens a TCP connection and waits for the
//! greeting; a missing greeting or a timeout is a failed connection.
//! [`open_player`] adds one bounded attempt to start a player process and
//! reconnect, and reports [`PlayerStatus::Unavailable`] instead of failing.

use crate::config::PlayerConfig;
use crate::control::{Command, GREETING};
use crate::error::ConnectionError;
use log::{debug, info, warn};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::process::Stdio;
use std::thread;
use std::time::{Duration, Instant};

/// Delay between reconnect attempts while a launched player starts up
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

pub struct PlayerClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    addr: String,
}

/// Outcome of [`open_player`]
pub enum PlayerStatus {
    Ready(PlayerClient),
    Unavailable(ConnectionError),
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl PlayerClient {
    /// Connect and read the greeting, waiting at most `timeout` for each
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, ConnectionError> {
        let connect_error = |source: io::Error| ConnectionError::Connect {
            addr: addr.to_string(),
            source,
        };
        let resolved: Vec<SocketAddr> = addr.to_socket_addrs().map_err(connect_error)?.collect();
        let Some(target) = resolved.first() else {
            return Err(connect_error(io::Error::new(
                io::ErrorKind::NotFound,
                "address did not resolve",
            )));
        };

        let stream = TcpStream::connect_timeout(target, timeout).map_err(|e| {
            if is_timeout(&e) {
                ConnectionError::Timeout {
                    addr: addr.to_string(),
                }
            } else {
                connect_error(e)
            }
        })?;
        stream.set_read_timeout(Some(timeout))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);

        let mut greeting = String::new();
        match reader.read_line(&mut greeting) {
            Ok(_) if greeting.trim_end() == GREETING => {}
            Ok(_) => {
                return Err(ConnectionError::NoGreeting {
                    addr: addr.to_string(),
                })
            }
            Err(e) if is_timeout(&e) => {
                return Err(ConnectionError::Timeout {
                    addr: addr.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
        debug!("Connected to player at {}", addr);

        Ok(PlayerClient {
            reader,
            writer,
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one command and collect its data lines. `ERROR` replies become
    /// [`ConnectionError::Remote`].
    pub fn send(&mut self, command: &Command) -> Result<Vec<String>, ConnectionError> {
        writeln!(self.writer, "{}", command.to_line())?;
        self.writer.flush()?;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).map_err(|e| {
                if is_timeout(&e) {
                    ConnectionError::Timeout {
                        addr: self.addr.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "player closed the connection",
                )
                .into());
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line == "OK" {
                return Ok(lines);
            }
            if let Some(message) = line.strip_prefix("ERROR") {
                return Err(ConnectionError::Remote(message.trim().to_string()));
            }
            lines.push(line.to_string());
        }
    }

    /// Queue notation and return the new slot id
    pub fn queue_abc(&mut self, abc: &str, looping: bool) -> Result<u64, ConnectionError> {
        let command = if looping {
            Command::LoopAbc(abc.to_string())
        } else {
            Command::QueueAbc(abc.to_string())
        };
        let lines = self.send(&command)?;
        lines
            .iter()
            .find_map(|line| line.strip_prefix("Queued ")?.trim().parse().ok())
            .ok_or_else(|| ConnectionError::Remote(format!("Unexpected reply {:?}", lines)))
    }

    pub fn status(&mut self) -> Result<Vec<String>, ConnectionError> {
        self.send(&Command::Status)
    }
}

/// Start the configured player process, detached from our stdio
fn launch(command: &[String]) -> Result<(), ConnectionError> {
    let Some((program, args)) = command.split_first() else {
        return Err(ConnectionError::Launch(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty player command",
        )));
    };
    info!("Starting player: {}", command.join(" "));
    std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(ConnectionError::Launch)?;
    Ok(())
}

/// Connect to the configured player. If that fails and a player command is
/// configured, start it once and keep reconnecting until the connect timeout
/// runs out.
pub fn connect_or_launch(config: &PlayerConfig) -> Result<PlayerClient, ConnectionError> {
    let first = match PlayerClient::connect(&config.listen, config.connect_timeout) {
        Ok(client) => return Ok(client),
        Err(e) => e,
    };
    let Some(command) = &config.player_command else {
        return Err(first);
    };
    debug!("No player at {}: {}", config.listen, first);
    launch(command)?;

    let deadline = Instant::now() + config.connect_timeout;
    loop {
        thread::sleep(RETRY_INTERVAL);
        match PlayerClient::connect(&config.listen, config.connect_timeout) {
            Ok(client) => return Ok(client),
            Err(e) if Instant::now() >= deadline => return Err(e),
            Err(e) => debug!("Player not ready yet: {}", e),
        }
    }
}

/// Like [`connect_or_launch`], but a failure is reported as a status
pub fn open_player(config: &PlayerConfig) -> PlayerStatus {
    match connect_or_launch(config) {
        Ok(client) => PlayerStatus::Ready(client),
        Err(e) => {
            warn!("Player unavailable: {}", e);
            PlayerStatus::Unavailable(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::start_server;
    use crate::playback::{PlaybackScheduler, RecordingBackend};
    use std::net::TcpListener;
    use std::sync::Arc;

    fn config_for(addr: &str) -> PlayerConfig {
        PlayerConfig {
            listen: addr.to_string(),
            connect_timeout: Duration::from_millis(500),
            ..PlayerConfig::default()
        }
    }

    #[test]
    fn test_round_trip_through_server() {
        let scheduler = Arc::new(PlaybackScheduler::new(
            Box::new(RecordingBackend::new()),
            &PlayerConfig::default(),
        ));
        let addr = start_server("127.0.0.1:0", Arc::clone(&scheduler)).unwrap();

        let mut client = PlayerClient::connect(&addr.to_string(), Duration::from_secs(2)).unwrap();
        let id = client
            .queue_abc("X:1\nT:Drone\nL:1\nQ:1/4=30\nK:C\nC\n", false)
            .unwrap();
        assert_eq!(id, 1);

        let status = client.status().unwrap();
        assert!(status.iter().any(|l| l.starts_with("Queue size:")));
        assert!(status.iter().any(|l| l.starts_with("Volume:")));

        match client.send(&Command::Volume(3.0)) {
            Err(ConnectionError::Remote(message)) => assert!(message.starts_with("Invalid value")),
            other => panic!("expected a remote error, got {:?}", other.map(|_| ())),
        }
        client.send(&Command::Stop).unwrap();
    }

    #[test]
    fn test_missing_greeting_is_a_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = writeln!(stream, "HELLO SOMETHING ELSE");
                thread::sleep(Duration::from_millis(200));
            }
        });
        let result = PlayerClient::connect(&addr.to_string(), Duration::from_secs(2));
        assert!(matches!(result, Err(ConnectionError::NoGreeting { .. })));
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((_stream, _)) = listener.accept() {
                thread::sleep(Duration::from_millis(500));
            }
        });
        let result = PlayerClient::connect(&addr.to_string(), Duration::from_millis(100));
        assert!(matches!(result, Err(ConnectionError::Timeout { .. })));
    }

    #[test]
    fn test_unreachable_player_is_unavailable() {
        // Bind and drop to get a port nobody is listening on
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        match open_player(&config_for(&addr.to_string())) {
            PlayerStatus::Unavailable(ConnectionError::Connect { .. }) => {}
            PlayerStatus::Unavailable(e) => panic!("unexpected error {}", e),
            PlayerStatus::Ready(_) => panic!("nothing should be listening"),
        }
    }

    #[test]
    fn test_failed_launch_is_reported() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let config = PlayerConfig {
            player_command: Some(vec!["/nonexistent/abcplay-player".to_string()]),
            ..config_for(&addr.to_string())
        };
        assert!(matches!(
            connect_or_launch(&config),
            Err(ConnectionError::Launch(_))
        ));
    }
}
