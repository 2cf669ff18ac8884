use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::agent::Agent;
use crate::error::{AppError, Result};

/// Environment variable telling the agent where the state directory is.
pub const STATE_DIR_ENV: &str = "HYPHAE_STATE_DIR";

/// Runs an agent CLI in the checkout, piping the prompt to its stdin.
pub struct CliAgent {
    command: String,
    args: Vec<String>,
    workdir: PathBuf,
    state_dir: PathBuf,
}

impl CliAgent {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        workdir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            workdir: workdir.into(),
            state_dir: state_dir.into(),
        }
    }
}

#[async_trait]
impl Agent for CliAgent {
    async fn invoke(&self, prompt: &str) -> Result<()> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&self.workdir)
            .env(STATE_DIR_ENV, &self.state_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Agent(format!(
                    "Failed to start '{}': {e}. Is it installed and on PATH?",
                    self.command
                ))
            })?;

        // The prompt is written concurrently with draining the output pipes, so
        // an agent that talks before reading all of stdin cannot stall either side
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = prompt.as_bytes().to_vec();
            tokio::spawn(async move {
                let result = stdin.write_all(&prompt).await;
                // Dropping stdin closes it so the agent sees EOF
                drop(stdin);
                result
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Agent("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Agent("Failed to capture stderr".to_string()))?;

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stderr_tail: Vec<String> = Vec::new();
        let mut stdout_done = false;
        let mut stderr_done = false;

        // Drain both pipes concurrently to avoid backpressure deadlock
        while !stdout_done || !stderr_done {
            tokio::select! {
                read = stdout.read_until(b'\n', &mut stdout_buf), if !stdout_done => {
                    match read {
                        Ok(0) => stdout_done = true,
                        Ok(_) => {
                            let line = decode_line(&stdout_buf);
                            tracing::debug!(target: "hyphae::agent", "{line}");
                            stdout_buf.clear();
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Stopped reading agent stdout");
                            stdout_done = true;
                        }
                    }
                }
                read = stderr.read_until(b'\n', &mut stderr_buf), if !stderr_done => {
                    match read {
                        Ok(0) => stderr_done = true,
                        Ok(_) => {
                            let line = decode_line(&stderr_buf);
                            tracing::debug!(target: "hyphae::agent", stream = "stderr", "{line}");
                            stderr_tail.push(line);
                            if stderr_tail.len() > 20 {
                                stderr_tail.remove(0);
                            }
                            stderr_buf.clear();
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Stopped reading agent stderr");
                            stderr_done = true;
                        }
                    }
                }
            }
        }

        if let Some(writer) = writer {
            match writer.await {
                // An agent that exits without reading stdin is judged by its exit status
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    tracing::warn!(error = %e, "Failed to write the full prompt to the agent");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Prompt writer task failed"),
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(AppError::Agent(format!(
                "'{}' exited with {status}{}",
                self.command,
                if stderr_tail.is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr_tail.join("\n"))
                }
            )));
        }

        Ok(())
    }
}

/// One output line without its terminator. Invalid UTF-8 is replaced, never
/// an error: only the exit status decides whether the agent succeeded.
fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, workdir: &std::path::Path) -> CliAgent {
        CliAgent::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            workdir,
            workdir.join("state"),
        )
    }

    #[tokio::test]
    async fn test_prompt_is_piped_to_stdin() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sh("cat > received.txt", tmp.path());

        agent.invoke("Implement the fix").await.unwrap();

        let received = std::fs::read_to_string(tmp.path().join("received.txt")).unwrap();
        assert_eq!(received, "Implement the fix");
    }

    #[tokio::test]
    async fn test_state_dir_is_exported() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sh("printf %s \"$HYPHAE_STATE_DIR\" > env.txt", tmp.path());

        agent.invoke("").await.unwrap();

        let exported = std::fs::read_to_string(tmp.path().join("env.txt")).unwrap();
        assert_eq!(PathBuf::from(exported), tmp.path().join("state"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sh("echo 'model overloaded' >&2; exit 3", tmp.path());

        let err = agent.invoke("prompt").await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, AppError::Agent(_)));
        assert!(msg.contains("model overloaded"), "unexpected error: {msg}");
    }

    #[tokio::test]
    async fn test_large_prompt_with_chatty_agent_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sh(
            "head -c 200000 /dev/zero | tr '\\0' a; echo; cat > received.txt",
            tmp.path(),
        );
        let prompt = "p".repeat(200_000);

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(30), agent.invoke(&prompt)).await;

        assert!(matches!(result, Ok(Ok(()))), "unexpected result: {result:?}");
        let received = std::fs::read_to_string(tmp.path().join("received.txt")).unwrap();
        assert_eq!(received.len(), 200_000);
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_does_not_fail_a_successful_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sh("printf '\\377\\376 progress\\n'; cat >/dev/null; exit 0", tmp.path());

        agent.invoke("prompt").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_stderr_is_kept_in_the_error() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = sh("printf '\\377 quota exceeded\\n' >&2; exit 2", tmp.path());

        let err = agent.invoke("prompt").await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_decode_line_replaces_invalid_bytes() {
        assert_eq!(decode_line(b"ok\r\n"), "ok");
        assert_eq!(decode_line(b"\xff done\n"), "\u{FFFD} done");
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let agent = CliAgent::new(
            "hyphae-no-such-agent",
            Vec::new(),
            tmp.path(),
            tmp.path(),
        );

        let err = agent.invoke("prompt").await.unwrap_err();
        assert!(err.to_string().contains("Is it installed"));
    }
}
