//! # Control Protocol
//!
//! A line-oriented command channel in front of a [`PlaybackScheduler`].
//!
//! On connect the server writes the greeting [`GREETING`]. Each request is a
//! single line; each response is zero or more data lines followed by `OK` or
//! `ERROR <message>`.
//!
//! | Command            | Effect                                       |
//! |--------------------|----------------------------------------------|
//! | `QUEUE_ABC <abc>`  | Parse and queue; replies `Queued <id>`       |
//! | `LOOP_ABC <abc>`   | Same, looping until skipped or stopped       |
//! | `QUEUE_FILE <path>`| Read an ABC file and queue it                |
//! | `STOP`             | Silence, halt and drop the queue             |
//! | `PAUSE` / `RESUME` | Freeze / continue the current slot           |
//! | `SKIP`             | Move to the next slot                        |
//! | `REMOVE <id>`      | Drop a queued slot (skips if playing)        |
//! | `CLEAR`            | Drop queued slots                            |
//! | `VOLUME <0..1>`    | Master volume                                |
//! | `TEMPO <factor>`   | Global tempo multiplier                      |
//! | `STATUS`           | `Queue size:`, `Playing:`, `Paused:`, ...    |
//! | `LIST`             | One line per slot, current first             |
//!
//! Notation travels on one line: newlines are sent as the two characters `\n`.

use crate::error::SchedulerError;
use crate::playback::{PlaybackScheduler, SlotOptions};
use log::{debug, info, warn};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

pub const GREETING: &str = "ABCPLAY READY";

/// Replace line breaks with a literal `\n`
pub fn escape(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\\n")
}

/// Inverse of [`escape`]
pub fn unescape(text: &str) -> String {
    text.replace("\\n", "\n")
}

fn required_argument<'a>(verb: &str, argument: &'a str, what: &str) -> Result<&'a str, String> {
    if argument.is_empty() {
        Err(format!("{} requires {}", verb, what))
    } else {
        Ok(argument)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    QueueAbc(String),
    LoopAbc(String),
    QueueFile(PathBuf),
    Stop,
    Pause,
    Resume,
    Skip,
    Remove(u64),
    Clear,
    Volume(f32),
    Tempo(f64),
    Status,
    List,
}

impl Command {
    /// Parse one request line. Notation arguments are unescaped.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, argument) = match line.split_once(' ') {
            Some((verb, argument)) => (verb, argument.trim()),
            None => (line.trim(), ""),
        };
        let required = |what: &str| required_argument(verb, argument, what);

        match verb.to_ascii_uppercase().as_str() {
            "QUEUE_ABC" => Ok(Command::QueueAbc(unescape(required("notation")?))),
            "LOOP_ABC" => Ok(Command::LoopAbc(unescape(required("notation")?))),
            "QUEUE_FILE" => Ok(Command::QueueFile(PathBuf::from(required("a path")?))),
            "STOP" => Ok(Command::Stop),
            "PAUSE" => Ok(Command::Pause),
            "RESUME" => Ok(Command::Resume),
            "SKIP" => Ok(Command::Skip),
            "CLEAR" => Ok(Command::Clear),
            "STATUS" => Ok(Command::Status),
            "LIST" => Ok(Command::List),
            "REMOVE" => required("a slot id")?
                .parse()
                .map(Command::Remove)
                .map_err(|_| format!("Invalid slot id '{}'", argument)),
            "VOLUME" => required("a value")?
                .parse()
                .map(Command::Volume)
                .map_err(|_| format!("Invalid volume '{}'", argument)),
            "TEMPO" => required("a value")?
                .parse()
                .map(Command::Tempo)
                .map_err(|_| format!("Invalid tempo '{}'", argument)),
            "" => Err("Empty command".to_string()),
            other => Err(format!("Unknown command '{}'", other)),
        }
    }

    /// The request line for this command, without the line break
    pub fn to_line(&self) -> String {
        match self {
            Command::QueueAbc(abc) => format!("QUEUE_ABC {}", escape(abc)),
            Command::LoopAbc(abc) => format!("LOOP_ABC {}", escape(abc)),
            Command::QueueFile(path) => format!("QUEUE_FILE {}", path.display()),
            Command::Stop => "STOP".to_string(),
            Command::Pause => "PAUSE".to_string(),
            Command::Resume => "RESUME".to_string(),
            Command::Skip => "SKIP".to_string(),
            Command::Remove(id) => format!("REMOVE {}", id),
            Command::Clear => "CLEAR".to_string(),
            Command::Volume(volume) => format!("VOLUME {}", volume),
            Command::Tempo(tempo) => format!("TEMPO {}", tempo),
            Command::Status => "STATUS".to_string(),
            Command::List => "LIST".to_string(),
        }
    }
}

/// Data lines plus the final outcome of one command
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub lines: Vec<String>,
    pub result: Result<(), String>,
}

impl Response {
    fn ok(lines: Vec<String>) -> Self {
        Response {
            lines,
            result: Ok(()),
        }
    }

    fn error(message: impl ToString) -> Self {
        Response {
            lines: Vec::new(),
            result: Err(message.to_string()),
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        for line in &self.lines {
            writeln!(writer, "{}", line)?;
        }
        match &self.result {
            Ok(()) => writeln!(writer, "OK")?,
            // Keep the error on its one line
            Err(message) => writeln!(writer, "ERROR {}", message.replace('\n', " "))?,
        }
        writer.flush()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn queue_notation(scheduler: &PlaybackScheduler, source: &str, options: SlotOptions) -> Response {
    let tune = match crate::compile(source) {
        Ok(tune) => tune,
        Err(e) => return Response::error(e),
    };
    match scheduler.enqueue(tune, options) {
        Ok(id) => Response::ok(vec![format!("Queued {}", id)]),
        Err(e) => Response::error(e),
    }
}

fn scheduler_result(result: Result<(), SchedulerError>) -> Response {
    match result {
        Ok(()) => Response::ok(Vec::new()),
        Err(e) => Response::error(e),
    }
}

/// Run one command against the scheduler
pub fn execute(scheduler: &PlaybackScheduler, command: Command) -> Response {
    match command {
        Command::QueueAbc(abc) => queue_notation(scheduler, &abc, SlotOptions::default()),
        Command::LoopAbc(abc) => queue_notation(scheduler, &abc, SlotOptions::looping()),
        Command::QueueFile(path) => match std::fs::read_to_string(&path) {
            Ok(abc) => queue_notation(scheduler, &abc, SlotOptions::default()),
            Err(e) => Response::error(format!("Could not read {}: {}", path.display(), e)),
        },
        Command::Stop => {
            scheduler.stop();
            Response::ok(Vec::new())
        }
        Command::Pause => {
            scheduler.pause();
            Response::ok(Vec::new())
        }
        Command::Resume => {
            scheduler.resume();
            Response::ok(Vec::new())
        }
        Command::Skip => match scheduler.skip() {
            Some(id) => Response::ok(vec![format!("Skipped {}", id)]),
            None => Response::ok(Vec::new()),
        },
        Command::Remove(id) => scheduler_result(scheduler.remove(id)),
        Command::Clear => Response::ok(vec![format!("Cleared {}", scheduler.clear())]),
        Command::Volume(volume) => scheduler_result(scheduler.set_volume(volume)),
        Command::Tempo(tempo) => scheduler_result(scheduler.set_tempo(tempo)),
        Command::Status => {
            let status = scheduler.status();
            let mut lines = vec![
                format!("Queue size: {}", status.queue_size),
                format!("Playing: {}", yes_no(status.playing)),
                format!("Paused: {}", yes_no(status.paused)),
                format!("Volume: {:.2}", status.volume),
                format!("Tempo: {:.2}", status.tempo_multiplier),
            ];
            if let Some(current) = status.current {
                lines.push(format!("Current: {} {}", current.id, current.title));
                lines.push(format!("Position: {:.2}", status.position));
            }
            Response::ok(lines)
        }
        Command::List => {
            let current = scheduler.status().current.map(|c| c.id);
            let lines = scheduler
                .list()
                .into_iter()
                .map(|slot| {
                    let mut line = format!("{}: {}", slot.id, slot.title);
                    if Some(slot.id) == current {
                        line.push_str(" [playing]");
                    }
                    if slot.looping {
                        line.push_str(" [loop]");
                    }
                    line
                })
                .collect();
            Response::ok(lines)
        }
    }
}

/// Greet, then answer commands until the reader is exhausted
pub fn serve(
    reader: impl BufRead,
    mut writer: impl Write,
    scheduler: &PlaybackScheduler,
) -> io::Result<()> {
    writeln!(writer, "{}", GREETING)?;
    writer.flush()?;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match Command::parse(&line) {
            Ok(command) => {
                debug!("Command: {:?}", command);
                execute(scheduler, command)
            }
            Err(message) => Response::error(message),
        };
        response.write_to(&mut writer)?;
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, scheduler: &PlaybackScheduler) -> io::Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    serve(reader, stream, scheduler)
}

/// Accept connections forever, one thread per connection
pub fn run_server(listener: TcpListener, scheduler: Arc<PlaybackScheduler>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map_or_else(|_| "unknown".to_string(), |a| a.to_string());
                info!("Control connection from {}", peer);
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &scheduler) {
                        warn!("Connection {} closed: {}", peer, e);
                    }
                });
            }
            Err(e) => warn!("Accept failed: {}", e),
        }
    }
}

/// Bind `addr` and serve on a background thread. Returns the bound address,
/// which differs from `addr` when port 0 was asked for.
pub fn start_server(addr: &str, scheduler: Arc<PlaybackScheduler>) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr)?;
    let local = listener.local_addr()?;
    info!("Listening on {}", local);
    thread::Builder::new()
        .name("abcplay-control".to_string())
        .spawn(move || run_server(listener, scheduler))?;
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::playback::RecordingBackend;

    fn scheduler() -> PlaybackScheduler {
        PlaybackScheduler::new(Box::new(RecordingBackend::new()), &PlayerConfig::default())
    }

    fn run(scheduler: &PlaybackScheduler, input: &str) -> Vec<String> {
        let mut output = Vec::new();
        serve(input.as_bytes(), &mut output, scheduler).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_escape_round_trip() {
        let abc = "X:1\r\nK:C\nCDE \\\nFGA\n";
        let escaped = escape(abc);
        assert!(!escaped.contains('\n'));
        assert_eq!(unescape(&escaped), abc.replace("\r\n", "\n"));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("QUEUE_ABC X:1\\nK:C\\nC"),
            Ok(Command::QueueAbc("X:1\nK:C\nC".to_string()))
        );
        assert_eq!(Command::parse("stop"), Ok(Command::Stop));
        assert_eq!(Command::parse("VOLUME 0.5\r\n"), Ok(Command::Volume(0.5)));
        assert_eq!(Command::parse("REMOVE 3"), Ok(Command::Remove(3)));
        assert_eq!(Command::parse("TEMPO 2"), Ok(Command::Tempo(2.0)));
        assert!(Command::parse("VOLUME loud").is_err());
        assert!(Command::parse("QUEUE_ABC").is_err());
        assert!(Command::parse("DANCE").is_err());
    }

    #[test]
    fn test_command_line_round_trip() {
        let command = Command::LoopAbc("X:1\nK:G\nGAB".to_string());
        assert_eq!(Command::parse(&command.to_line()), Ok(command));
    }

    #[test]
    fn test_greeting_and_status() {
        let scheduler = scheduler();
        let output = run(&scheduler, "STATUS\n");
        assert_eq!(
            output,
            vec![
                GREETING,
                "Queue size: 0",
                "Playing: no",
                "Paused: no",
                "Volume: 1.00",
                "Tempo: 1.00",
                "OK"
            ]
        );
    }

    #[test]
    fn test_queue_list_and_errors() {
        let scheduler = scheduler();
        let output = run(
            &scheduler,
            "QUEUE_ABC X:1\\nT:Drone\\nL:1\\nQ:1/4=30\\nK:C\\nC\n\
             QUEUE_ABC X:2\\nK:C\\n(3ab\n\
             VOLUME 2\n\
             LIST\n\
             BOGUS\n",
        );
        assert_eq!(output[0], GREETING);
        assert_eq!(output[1], "Queued 1");
        assert_eq!(output[2], "OK");
        assert!(output[3].starts_with("ERROR Structural error at line 3"), "{}", output[3]);
        assert!(output[4].starts_with("ERROR Invalid value"), "{}", output[4]);
        assert!(output[5].starts_with("1: Drone"), "{}", output[5]);
        assert_eq!(output[6], "OK");
        assert_eq!(output[7], "ERROR Unknown command 'BOGUS'");
        scheduler.stop();
    }

    #[test]
    fn test_queue_missing_file() {
        let scheduler = scheduler();
        let output = run(&scheduler, "QUEUE_FILE /nonexistent/tune.abc\n");
        assert!(output[1].starts_with("ERROR Could not read"));
    }

    #[test]
    fn test_remove_unknown_slot() {
        let scheduler = scheduler();
        let output = run(&scheduler, "REMOVE 42\nCLEAR\n");
        assert_eq!(output[1], "ERROR No slot with id 42");
        assert_eq!(output[2], "Cleared 0");
        assert_eq!(output[3], "OK");
    }
}
