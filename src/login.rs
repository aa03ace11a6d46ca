use crate::error::{Error, Result};
use crate::ui::Logger;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Runs the interactive SSO login for a profile. Once it returns, a fresh
/// token is expected in the SSO cache.
#[async_trait]
pub trait LoginInvoker {
    async fn login(&self, profile: &str) -> Result<()>;
}

/// Delegates to `aws sso login --profile <profile>`, relaying its output as
/// it is produced.
pub struct AwsCliLogin<G> {
    program: String,
    logger: G,
}

impl<G: Logger> AwsCliLogin<G> {
    pub fn new(logger: G) -> Self {
        Self::with_program("aws", logger)
    }

    pub fn with_program(program: impl Into<String>, logger: G) -> Self {
        Self {
            program: program.into(),
            logger,
        }
    }

    fn command_line(&self, profile: &str) -> String {
        format!("{} sso login --profile {profile}", self.program)
    }
}

#[async_trait]
impl<G: Logger + Send + Sync> LoginInvoker for AwsCliLogin<G> {
    async fn login(&self, profile: &str) -> Result<()> {
        let start = Instant::now();
        self.logger.info("AWS CLI", "AWS SSO Login ...");
        let spawn_error = |source| Error::Login {
            command: self.command_line(profile),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(["sso", "login", "--profile", profile])
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, _, _) = tokio::join!(
            child.wait(),
            async {
                if let Some(out) = stdout {
                    relay(out, Stream::Stdout).await;
                }
            },
            async {
                if let Some(err) = stderr {
                    relay(err, Stream::Stderr).await;
                }
            }
        );
        let status = status.map_err(spawn_error)?;

        if !status.success() {
            tracing::warn!(%status, "`{}` exited unsuccessfully", self.command_line(profile));
        }
        self.logger.success(
            "AWS CLI",
            &format!(
                "AWS SSO Login finished in {} ms",
                start.elapsed().as_millis()
            ),
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Echoes the child's output line by line until it closes. Bytes that are not
/// UTF-8 are replaced rather than ending the relay, so the pipe keeps draining.
async fn relay<R: AsyncRead + Unpin>(reader: R, stream: Stream) -> usize {
    let mut segments = BufReader::new(reader).split(b'\n');
    let mut relayed = 0;
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes);
                let line = line.trim_end_matches('\r');
                match stream {
                    Stream::Stdout => println!("{line}"),
                    Stream::Stderr => eprintln!("ERROR: {line}"),
                }
                relayed += 1;
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(?stream, "stopped relaying login output: {err}");
                break;
            }
        }
    }
    relayed
}
