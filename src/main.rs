use abcplay::client::{open_player, PlayerStatus};
use abcplay::control::{self, Command};
use abcplay::playback::{LogBackend, PlaybackScheduler, SlotOptions};
use abcplay::PlayerConfig;
use clap::Parser;
use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Parse and play ABC tunes.
#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// YAML player configuration
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Action,
}

#[derive(clap::Subcommand, Debug)]
enum Action {
    /// Report every problem in a tune
    Check { input: PathBuf },
    /// Print the merged note events as YAML
    Events { input: PathBuf },
    /// Play a tune through the logging backend
    Play {
        input: PathBuf,
        #[clap(long = "loop")]
        looping: bool,
    },
    /// Run the control server
    Serve {
        #[clap(short, long)]
        listen: Option<String>,
    },
    /// Send one control command to a running player
    Send { words: Vec<String> },
}

fn read_source(path: &PathBuf) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn compile_or_exit(path: &PathBuf) -> abcplay::Tune {
    let tune = abcplay::compile_unchecked(&read_source(path));
    if !tune.is_complete() {
        for error in &tune.diagnostics {
            eprintln!("{}: {}", path.display(), error);
        }
        process::exit(1);
    }
    tune
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PlayerConfig::load(path),
        None => Ok(PlayerConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    match args.command {
        Action::Check { input } => {
            let tune = compile_or_exit(&input);
            println!("Title:    {}", tune.title().unwrap_or("Untitled"));
            println!("Voices:   {}", tune.voice_order.join(", "));
            println!("Events:   {}", tune.events.len());
            println!("Duration: {:.2} beats", tune.duration_beats());
        }
        Action::Events { input } => {
            let tune = compile_or_exit(&input);
            match serde_yaml::to_string(&tune.events) {
                Ok(yaml) => print!("{}", yaml),
                Err(e) => {
                    eprintln!("Could not serialize events: {}", e);
                    process::exit(1);
                }
            }
        }
        Action::Play { input, looping } => {
            let tune = compile_or_exit(&input);
            let scheduler = PlaybackScheduler::new(Box::new(LogBackend), &config);
            let options = SlotOptions {
                looping,
                gap_ms: None,
            };
            if let Err(e) = scheduler.enqueue(tune, options) {
                eprintln!("{}", e);
                process::exit(1);
            }
            // Wait for the slot to start, then to finish
            thread::sleep(config.tick * 4);
            while scheduler.status().current.is_some() {
                thread::sleep(Duration::from_millis(50));
            }
            scheduler.shutdown();
        }
        Action::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.listen.clone());
            let listener = match TcpListener::bind(&addr) {
                Ok(listener) => listener,
                Err(e) => {
                    eprintln!("Could not listen on {}: {}", addr, e);
                    process::exit(1);
                }
            };
            eprintln!("Listening on {}", addr);
            let scheduler = Arc::new(PlaybackScheduler::new(Box::new(LogBackend), &config));
            control::run_server(listener, scheduler);
        }
        Action::Send { words } => {
            let command = match Command::parse(&words.join(" ")) {
                Ok(command) => command,
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            };
            let mut client = match open_player(&config) {
                PlayerStatus::Ready(client) => client,
                PlayerStatus::Unavailable(e) => {
                    eprintln!("Player unavailable: {}", e);
                    process::exit(1);
                }
            };
            match client.send(&command) {
                Ok(lines) => {
                    for line in lines {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            }
        }
    }
}
