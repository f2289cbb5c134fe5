//! Interactive mode.
//!
//! A line-oriented loop:
//! - Lines starting with `#` are commands (mode, names, reset, help, quit)
//! - Any other line is a story request

use std::io::{self, BufRead, Write};
use std::path::Path;

use bedtime_core::{Mode, Pipeline};

use crate::cli::persist_names;
use crate::report;

/// A parsed `#` command.
#[derive(Debug, PartialEq)]
enum Command {
    Mode(Option<Mode>),
    Names,
    Reset,
    Help,
    Quit,
    Unknown,
}

fn parse_command(line: &str) -> Command {
    let mut parts = line.trim_start_matches('#').split_whitespace();
    match parts.next() {
        Some("mode") => Command::Mode(parts.next().and_then(|m| m.parse().ok())),
        Some("names") => Command::Names,
        Some("reset") => Command::Reset,
        Some("help") => Command::Help,
        Some("quit") | Some("exit") => Command::Quit,
        _ => Command::Unknown,
    }
}

fn print_help() {
    println!("[HELP]");
    println!("  #mode <fast|balanced|best> - Change the quality mode");
    println!("  #names                     - List character names already used");
    println!("  #reset                     - Forget every used name");
    println!("  #quit                      - Exit");
    println!("  #help                      - Show this help");
    println!("  (anything else is a story request)");
}

pub async fn run(pipeline: &Pipeline, mut mode: Mode, names_file: Option<&Path>) -> anyhow::Result<()> {
    println!("=== Bedtime Stories ===");
    println!("Mode: {mode} ({})", mode.describe());
    println!();
    print_help();
    println!();
    println!("What story would you like tonight?");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            match parse_command(line) {
                Command::Mode(Some(new_mode)) => {
                    mode = new_mode;
                    println!("[MODE] {mode} ({})", mode.describe());
                }
                Command::Mode(None) => println!("[ERROR] Usage: #mode <fast|balanced|best>"),
                Command::Names => {
                    let names = pipeline.registry().names();
                    if names.is_empty() {
                        println!("[NAMES] none yet");
                    } else {
                        println!("[NAMES] {} used: {}", names.len(), names.join(", "));
                    }
                }
                Command::Reset => {
                    pipeline.registry().reset();
                    println!("[RESET] Name registry cleared");
                }
                Command::Help => print_help(),
                Command::Quit => {
                    println!("Goodnight!");
                    break;
                }
                Command::Unknown => println!("[ERROR] Unknown command. Type #help for help."),
            }
            stdout.flush().ok();
            continue;
        }

        print!("[WRITING]");
        stdout.flush().ok();

        let result = pipeline.run(line, mode).await;

        print!("\r         \r");
        stdout.flush().ok();
        report::print_result(&result);
        println!();

        if let Some(path) = names_file {
            if let Err(e) = persist_names(pipeline, path).await {
                println!("[ERROR] {e:#}");
            }
        }
    }

    Ok(())
}
