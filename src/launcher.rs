//! Desktop applications Jarvis can open.
//!
//! Each [`App`] maps to a platform specific command line. The program is
//! started detached; if it exits with a failure status within a short grace
//! period the launch is reported as failed, otherwise it is left running.

use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::services::ServiceError;

/// How long a freshly spawned program is watched for an immediate failure.
const LAUNCH_GRACE: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum App {
    Notepad,
    Discord,
    CommandPrompt,
    Camera,
    Calculator,
    Screenshot,
}

impl App {
    pub fn label(self) -> &'static str {
        match self {
            App::Notepad => "notepad",
            App::Discord => "Discord",
            App::CommandPrompt => "the command prompt",
            App::Camera => "the camera",
            App::Calculator => "the calculator",
            App::Screenshot => "the screenshot tool",
        }
    }

    #[cfg(target_os = "windows")]
    fn command_line(self) -> (String, Vec<String>) {
        let start = |target: &str| {
            (
                "cmd".to_string(),
                vec!["/C".into(), "start".into(), String::new(), target.into()],
            )
        };
        match self {
            App::Notepad => ("notepad".into(), vec![]),
            App::Discord => {
                let local = std::env::var("LOCALAPPDATA").unwrap_or_default();
                (
                    format!("{local}\\Discord\\Update.exe"),
                    vec!["--processStart".into(), "Discord.exe".into()],
                )
            }
            App::CommandPrompt => start("cmd"),
            App::Camera => start("microsoft.windows.camera:"),
            App::Calculator => ("calc".into(), vec![]),
            App::Screenshot => ("snippingtool".into(), vec![]),
        }
    }

    #[cfg(target_os = "macos")]
    fn command_line(self) -> (String, Vec<String>) {
        let open = |name: &str| ("open".to_string(), vec!["-a".into(), name.into()]);
        match self {
            App::Notepad => open("TextEdit"),
            App::Discord => open("Discord"),
            App::CommandPrompt => open("Terminal"),
            App::Camera => open("Photo Booth"),
            App::Calculator => open("Calculator"),
            App::Screenshot => open("Screenshot"),
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    fn command_line(self) -> (String, Vec<String>) {
        let (program, args): (&str, &[&str]) = match self {
            App::Notepad => ("gedit", &[]),
            App::Discord => ("discord", &[]),
            App::CommandPrompt => ("x-terminal-emulator", &[]),
            App::Camera => ("cheese", &[]),
            App::Calculator => ("gnome-calculator", &[]),
            App::Screenshot => ("gnome-screenshot", &["--interactive"]),
        };
        (
            program.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        )
    }
}

/// Open `app`, returning once it is running (or has exited cleanly).
pub fn launch(app: App) -> Result<(), ServiceError> {
    let (program, args) = app.command_line();
    log::info!("Launching {} via {program} {args:?}", app.label());
    spawn_detached(&program, &args).map_err(|reason| ServiceError::Launch {
        app: app.label(),
        reason,
    })
}

fn spawn_detached(program: &str, args: &[String]) -> Result<(), String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to start {program}: {e}"))?;
    match child.wait_timeout(LAUNCH_GRACE) {
        Ok(Some(status)) if !status.success() => {
            Err(format!("{program} exited with {status}"))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(format!("failed to wait on {program}: {e}")),
    }
}
