use crate::constants::bridge::{PASSWORD_SUFFIX, PORT_SUFFIX, USERNAME_SUFFIX};
use crate::constants::buffers::PIPE_READ_CHUNK;
use crate::errors::TunnelError;
use crate::services::logger::Logger;
use crate::services::ui::Ui;
use crate::utils::line_writer::LineWriter;
use crate::utils::redact::{redact_env, redact_text};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Connection coordinates handed to the local tool through its environment.
#[derive(Clone, PartialEq, Eq)]
pub struct BridgeEnv {
    pairs: Vec<(String, String)>,
}

impl BridgeEnv {
    pub fn new(prefix: &str, username: &str, password: &str, port: u16) -> Self {
        Self {
            pairs: vec![
                (format!("{}{}", prefix, USERNAME_SUFFIX), username.to_string()),
                (format!("{}{}", prefix, PASSWORD_SUFFIX), password.to_string()),
                (format!("{}{}", prefix, PORT_SUFFIX), port.to_string()),
            ],
        }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl std::fmt::Debug for BridgeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BridgeEnv({})", redact_env(&self.pairs, &[]))
    }
}

async fn forward_lines<R, F>(reader: Option<R>, emit: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut writer = LineWriter::new(emit);
    if let Some(mut reader) = reader {
        let mut buf = vec![0u8; PIPE_READ_CHUNK];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_bytes(&buf[..n]);
        }
    }
    writer.finish();
    Ok(())
}

/// Runs the local tool to completion with the inherited environment plus `bridge`,
/// streaming stdout to `ui.say` and stderr to `ui.error` line by line.
pub async fn run_local_command(
    logger: &Logger,
    ui: &dyn Ui,
    exec: &Path,
    args: &[String],
    bridge: &BridgeEnv,
    secret: &str,
) -> Result<(), TunnelError> {
    let display = std::iter::once(exec.display().to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    logger.debug(
        "Command",
        Some(&serde_json::json!({
            "argv": redact_text(&display, &[secret]),
            "env": redact_env(bridge.pairs(), &[secret]),
        })),
    );
    ui.say(&format!("Running command {}", display));

    let mut child = match tokio::process::Command::new(exec)
        .args(args)
        .envs(bridge.pairs().iter().map(|(name, value)| (name, value)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            ui.error(&format!("Error running command {}", err));
            return Err(TunnelError::executor(format!(
                "failed to start {}: {}",
                exec.display(),
                err
            )));
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err, status) = tokio::join!(
        forward_lines(stdout, |line| ui.say(line)),
        forward_lines(stderr, |line| ui.error(line)),
        child.wait()
    );
    if let Err(read_err) = out.and(err) {
        logger.debug(
            "failed to read local command output",
            Some(&serde_json::json!({ "error": read_err.to_string() })),
        );
    }

    let status = status.map_err(|wait_err| {
        ui.error(&format!("Error running command {}", wait_err));
        TunnelError::executor(format!("failed to wait for local command: {}", wait_err))
    })?;
    if !status.success() {
        ui.error(&format!("Error running command {}", status));
        return Err(TunnelError::executor(format!("local command failed: {}", status)));
    }
    Ok(())
}
