//! Hands one trigger to the running engine.
//!
//! Frontend game-start hooks call this as `runlights-cli <rom> <emulator> <system> ...`;
//! with three or more arguments the third one is the console name, otherwise
//! the first one is.
//!
//! Exit codes: 0 delivered, 2 engine not running, 3 anything else.

use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};

use runlights::ipc::{self, IpcEndpoint, IpcError, IpcMessage};
use runlights::logging;

const EXIT_NOT_LISTENING: u8 = 2;
const EXIT_FAILED: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "runlights-cli", version, about = "Send a trigger to the running RunLights engine")]
struct Cli {
    /// Send a numeric level to the active fullfade mode instead of a console name.
    #[arg(long, allow_negative_numbers = true, conflicts_with = "args")]
    level: Option<f64>,

    /// Console name, or the argument list of a frontend game-start hook.
    #[arg(required_unless_present = "level", allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Picks the console name out of the positional arguments, normalized for lookup.
fn console_name(args: &[String]) -> Option<String> {
    let raw = if args.len() >= 3 { &args[2] } else { args.first()? };
    let name = raw.trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

fn message(cli: &Cli) -> Option<IpcMessage> {
    match cli.level {
        Some(value) => Some(IpcMessage::Level { value }),
        None => console_name(&cli.args).map(|name| IpcMessage::Console { name }),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(EXIT_FAILED) } else { ExitCode::SUCCESS };
        }
    };
    logging::init_stderr_logging("warn");

    let Some(message) = message(&cli) else {
        error!("Console name is empty");
        return ExitCode::from(EXIT_FAILED);
    };

    let endpoint = IpcEndpoint::default();
    match ipc::send(&endpoint, &message).await {
        Ok(()) => {
            debug!(?message, endpoint = endpoint.address(), "Trigger delivered");
            ExitCode::SUCCESS
        }
        Err(IpcError::NotListening) => {
            error!("RunLights is not running");
            ExitCode::from(EXIT_NOT_LISTENING)
        }
        Err(e) => {
            error!("Failed to deliver trigger: {e}");
            ExitCode::from(EXIT_FAILED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_argument_is_the_console() {
        assert_eq!(console_name(&args(&[" SNES "])), Some("snes".into()));
    }

    #[test]
    fn third_argument_wins_for_frontend_hooks() {
        let hook = args(&["/roms/game.sfc", "snes9x", "SuperNintendo", "extra"]);
        assert_eq!(console_name(&hook), Some("supernintendo".into()));
    }

    #[test]
    fn blank_name_is_rejected() {
        assert_eq!(console_name(&args(&["   "])), None);
        assert_eq!(console_name(&[]), None);
    }

    #[test]
    fn level_flag_builds_level_message() {
        let cli = Cli::try_parse_from(["runlights-cli", "--level", "-4.5"]).unwrap();
        assert_eq!(message(&cli), Some(IpcMessage::Level { value: -4.5 }));
    }

    #[test]
    fn name_and_level_conflict() {
        assert!(Cli::try_parse_from(["runlights-cli", "--level", "3", "snes"]).is_err());
        assert!(Cli::try_parse_from(["runlights-cli"]).is_err());
    }
}
