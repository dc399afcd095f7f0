use colored::{ColoredString, Colorize};
use keel_core::{KeelError, Result};
use log::{debug, error, trace};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{self, AsyncBufReadExt, AsyncRead};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc::{self, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

async fn handle_stream<R: AsyncRead + Unpin>(reader: R, sender: UnboundedSender<String>) {
    let mut reader = io::BufReader::new(reader);
    let mut line = String::new();

    loop {
        match reader.read_line(&mut line).await {
            Ok(0) => {
                trace!("Reached end of stream");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim_end();
                if !trimmed.trim_start().is_empty() {
                    // Progress output rewrites the line with carriage returns
                    let last = trimmed.split('\r').next_back().unwrap_or(trimmed);
                    if sender.send(last.to_string()).is_err() {
                        break;
                    }
                }
                line.clear();
            }
            Err(e) => {
                error!("Error reading line: {}", e);
                break;
            }
        }
    }
}

/// Runs `program` to completion, collecting stdout and stderr line by line.
///
/// When `echo` is set every line is printed behind `label` as it arrives.
pub async fn run_command(
    label: &ColoredString,
    program: &Path,
    args: &[String],
    echo: bool,
) -> Result<CommandOutput> {
    debug!("Running command: {} {}", program.display(), args.join(" "));

    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                KeelError::ToolNotFound(program.display().to_string())
            }
            _ => KeelError::Io(e),
        })?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stdout_task = child
        .stdout
        .take()
        .map(|stdout| tokio::spawn(handle_stream(stdout, tx.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(handle_stream(stderr, tx.clone())));
    drop(tx);

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        if echo {
            let clean_line = line.replace(['\x1B', '\r', '\n'], "");
            println!("       {}  |   {}", label, clean_line);
        }
        lines.push(line);
    }

    for task in [stdout_task, stderr_task].into_iter().flatten() {
        let _ = task.await;
    }

    let status = child.wait().await?;
    let output = CommandOutput {
        code: status.code(),
        output: lines.join("\n"),
    };

    match output.code {
        Some(0) => trace!("Command completed successfully"),
        Some(code) => error!("Command failed with exit code: {}", code),
        None => error!("Command was terminated by a signal"),
    }
    Ok(output)
}

pub fn label(text: &str) -> ColoredString {
    text.white().bold()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_collects_both_streams() {
        let out = run_command(
            &label("test"),
            Path::new("/bin/sh"),
            &sh("echo one; echo two 1>&2"),
            false,
        )
        .await
        .unwrap();

        assert!(out.success());
        assert!(out.output.contains("one"));
        assert!(out.output.contains("two"));
    }

    #[tokio::test]
    async fn test_keeps_final_progress_update() {
        let out = run_command(
            &label("test"),
            Path::new("/bin/sh"),
            &sh(r"printf '10%%\r55%%\r100%%\n'; printf 'done\r\n'"),
            false,
        )
        .await
        .unwrap();

        assert_eq!(out.output.lines().collect::<Vec<_>>(), vec!["100%", "done"]);
    }

    #[tokio::test]
    async fn test_reports_exit_code() {
        let out = run_command(&label("test"), Path::new("/bin/sh"), &sh("exit 3"), false)
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_command(
            &label("test"),
            Path::new("/nonexistent/keel-tool"),
            &[],
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, KeelError::ToolNotFound(_)));
    }
}
