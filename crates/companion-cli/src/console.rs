//! Interactive console driving the supervisor.

use anyhow::Result;
use companion_core::{Supervisor, SupervisorEvent};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

const HELP: &str = "\
Commands:
  start | stop | restart     control the server
  status                     show what the supervisor knows
  reveal                     read the admin password (restarts the server)
  password <new>             set the admin password (restarts the server)
  copy-user | copy-pass      copy a credential
  export <archive>           back up the data directory
  import <archive>           restore a backup (restarts the server)
  path <executable>          remember the server executable location
  help                       show this text
  quit                       stop the server and exit";

/// One line typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Restart,
    Status,
    Reveal,
    SetPassword(String),
    CopyUsername,
    CopyPassword,
    Export(PathBuf),
    Import(PathBuf),
    SetPath(PathBuf),
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse a console line. Blank lines parse to `Ok(None)`.
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let argument = |what: &str| {
            if rest.is_empty() {
                Err(format!("`{word}` needs {what}"))
            } else {
                Ok(rest.trim_matches('"').to_string())
            }
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "start" => ConsoleCommand::Start,
            "stop" => ConsoleCommand::Stop,
            "restart" => ConsoleCommand::Restart,
            "status" => ConsoleCommand::Status,
            "reveal" => ConsoleCommand::Reveal,
            "password" => ConsoleCommand::SetPassword(argument("a password")?),
            "copy-user" => ConsoleCommand::CopyUsername,
            "copy-pass" => ConsoleCommand::CopyPassword,
            "export" => ConsoleCommand::Export(argument("a destination")?.into()),
            "import" => ConsoleCommand::Import(argument("an archive")?.into()),
            "path" => ConsoleCommand::SetPath(argument("an executable path")?.into()),
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command `{other}`, try `help`")),
        };
        Ok(Some(command))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Run the console until `quit`, end of input or Ctrl-C.
///
/// The server is stopped on the way out: its output pipe dies with the
/// console.
pub async fn run(mut supervisor: Supervisor, autostart: bool) -> Result<()> {
    if supervisor.executable().is_none() {
        println!("No server executable found. Use `path <executable>` to locate it.");
    }
    println!("Admin panel: {}", supervisor.config().service_url());
    println!("{HELP}");

    supervisor.start_probe();
    if autostart {
        report(supervisor.start_service().map(|_| ()));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Console input closed");
                    break;
                };
                match ConsoleCommand::parse(&line) {
                    Ok(Some(command)) => {
                        if execute(&mut supervisor, command).await == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                }
            }
            Some(event) = supervisor.next_event() => {
                if let SupervisorEvent::Exited { pid, code } = event {
                    debug!("Server process {} exited with {:?}", pid, code);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                break;
            }
        }
    }

    report(supervisor.stop_service().map(|_| ()));
    Ok(())
}

async fn execute(supervisor: &mut Supervisor, command: ConsoleCommand) -> Flow {
    match command {
        ConsoleCommand::Start => report(supervisor.start_service().map(|_| ())),
        ConsoleCommand::Stop => report(supervisor.stop_service().map(|_| ())),
        ConsoleCommand::Restart => report(supervisor.restart_service().await.map(|_| ())),
        ConsoleCommand::Status => match serde_json::to_string_pretty(&supervisor.status()) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("error: {e}"),
        },
        ConsoleCommand::Reveal => match supervisor.reveal_credentials().await {
            Ok(Some(_)) => {}
            Ok(None) => println!("No password found"),
            Err(e) => eprintln!("error: {e}"),
        },
        ConsoleCommand::SetPassword(password) => {
            report(supervisor.set_password(&password).await)
        }
        ConsoleCommand::CopyUsername => supervisor.copy_username(),
        ConsoleCommand::CopyPassword => {
            if !supervisor.copy_password() {
                println!("Password unknown, use `reveal` first");
            }
        }
        ConsoleCommand::Export(destination) => {
            report(supervisor.export_backup(&destination).map(|_| ()))
        }
        ConsoleCommand::Import(source) => {
            report(supervisor.import_backup(&source).await.map(|_| ()))
        }
        ConsoleCommand::SetPath(executable) => {
            report(supervisor.set_executable_path(&executable).map(|_| ()))
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return Flow::Quit,
    }
    Flow::Continue
}

fn report(result: companion_core::Result<()>) {
    if let Err(e) = result {
        eprintln!("error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(ConsoleCommand::parse("start"), Ok(Some(ConsoleCommand::Start)));
        assert_eq!(ConsoleCommand::parse("  STOP  "), Ok(Some(ConsoleCommand::Stop)));
        assert_eq!(ConsoleCommand::parse("exit"), Ok(Some(ConsoleCommand::Quit)));
        assert_eq!(ConsoleCommand::parse(""), Ok(None));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            ConsoleCommand::parse("password  s3cret!"),
            Ok(Some(ConsoleCommand::SetPassword("s3cret!".into())))
        );
        assert_eq!(
            ConsoleCommand::parse(r#"import "C:\Backups\OpenList Backup.zip""#),
            Ok(Some(ConsoleCommand::Import(PathBuf::from(
                r"C:\Backups\OpenList Backup.zip"
            ))))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(ConsoleCommand::parse("export").is_err());
        assert!(ConsoleCommand::parse("launch").is_err());
    }
}
