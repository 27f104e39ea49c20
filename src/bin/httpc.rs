// Line-oriented harness: each URL read from stdin becomes a discard-body GET.
// `quit` shuts the engine down and exits.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use httpc_engine::{init_tracing, Engine, EngineConfig, Request};

#[derive(Debug, Parser)]
#[command(name = "httpc", about = "Fetch URLs read from stdin, one per line")]
struct Args {
    /// Preferred reactor backend; overrides the config file.
    #[arg(long, env = "HTTPC_POLL_METHOD")]
    method: Option<String>,
    /// JSON engine configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Longest time one loop pass waits for socket activity.
    #[arg(long, default_value_t = 10)]
    idle_ms: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Fetch(String),
    Quit,
}

/// `None` for blank lines.
fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    match line {
        "" => None,
        "quit" => Some(Command::Quit),
        url => Some(Command::Fetch(url.to_string())),
    }
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            };
            if let Some(command) = parse_line(&line) {
                if tx.send(command).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    EngineConfig::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = load_config(args.config.as_ref())?;
    let method = args
        .method
        .clone()
        .unwrap_or_else(|| config.poll_method.clone());

    let mut engine = Engine::with_config(config);
    engine
        .initialize(&method)
        .context("engine initialization failed")?;

    let commands = spawn_stdin_reader();
    let idle = Duration::from_millis(args.idle_ms);
    let mut input_open = true;

    loop {
        while input_open {
            match commands.try_recv() {
                Ok(Command::Fetch(url)) => {
                    if let Err(e) = engine.submit(Request::get(url.clone()).discard_body(true)) {
                        warn!("submit {} failed: {}", url, e);
                    }
                }
                Ok(Command::Quit) => {
                    engine.shutdown()?;
                    info!("quit");
                    return Ok(());
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("stdin closed, finishing in-flight transfers");
                    input_open = false;
                }
            }
        }

        engine.poll_timeout(idle)?;
        for done in engine.drain_completed()? {
            println!(
                "failed response_code : {}, error : {}",
                done.response_code,
                if done.error.is_empty() { "NONE" } else { done.error.as_str() }
            );
        }

        if !input_open && engine.active_transfers()? == 0 {
            engine.shutdown()?;
            return Ok(());
        }
    }
}
