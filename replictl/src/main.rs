use clap::Parser;
use directories::BaseDirs;
use replikv::Session;
use rustyline::{error::ReadlineError, Editor};
use std::{fs, path::PathBuf};

/// RepliKV interactive client.
#[derive(Parser)]
#[command(name = "replictl", author, version, about = "RepliKV CLI Tool", long_about = None)]
struct Cli {
    /// Execute a single command and exit.
    #[arg(short = 'e', long = "exec")]
    command: Option<String>,

    /// Execute a workload script and exit.
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut session = Session::new();

    if let Some(command) = cli.command {
        execute(&mut session, &command);
        return Ok(());
    }

    if let Some(file) = cli.file {
        let content = fs::read_to_string(file)?;
        for line in content.lines() {
            execute(&mut session, line);
        }
        return Ok(());
    }

    interactive(&mut session)
}

/// Feed one line to the engine and print its output.
fn execute(session: &mut Session, line: &str) {
    for msg in session.execute_line(line) {
        println!("{msg}");
    }
}

/// Interactive readline shell over a single engine session.
fn interactive(session: &mut Session) -> anyhow::Result<()> {
    let mut rl: Editor<()> = Editor::new()?;
    let history = BaseDirs::new().map(|b| b.home_dir().join(".replikv_history"));
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    let prompt = "replictl> ";
    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.eq_ignore_ascii_case("exit") || trimmed == "\\q" {
                    break;
                }
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed);
                execute(session, trimmed);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Readline error: {err}");
                break;
            }
        }
    }

    if let Some(path) = &history {
        let _ = rl.save_history(path);
    }
    Ok(())
}
