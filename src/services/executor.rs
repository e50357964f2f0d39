use crate::constants::buffers::PIPE_READ_CHUNK;
use crate::errors::TunnelError;
use crate::services::logger::Logger;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Destination for one output stream of a running command.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, bytes: &[u8]) -> Result<(), TunnelError>;
}

/// A command that has been started by a [`RemoteExecutor`].
#[async_trait]
pub trait RunningCommand: Send {
    /// Resolves once the command has finished and all of its output has been handed to
    /// the sinks. The status is whatever the executor reports; callers truncate it.
    async fn wait(&mut self) -> Result<i32, TunnelError>;
}

/// The capability that actually reaches the target machine.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn start(
        &self,
        command: &str,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<Box<dyn RunningCommand>, TunnelError>;
}

/// Runs commands on this machine through `sh -c`.
#[derive(Clone)]
pub struct LocalExecutor {
    logger: Logger,
    shell: String,
}

impl LocalExecutor {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("local"),
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn start(
        &self,
        command: &str,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<Box<dyn RunningCommand>, TunnelError> {
        let mut child = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TunnelError::executor(format!("Failed to spawn command: {}", err)))?;
        self.logger.debug(
            "spawned local command",
            Some(&serde_json::json!({ "pid": child.id() })),
        );

        let mut pumps = Vec::with_capacity(2);
        if let Some(reader) = child.stdout.take() {
            pumps.push(spawn_pump(reader, stdout));
        }
        if let Some(reader) = child.stderr.take() {
            pumps.push(spawn_pump(reader, stderr));
        }
        Ok(Box::new(LocalCommand { child, pumps }))
    }
}

struct LocalCommand {
    child: Child,
    pumps: Vec<JoinHandle<()>>,
}

#[async_trait]
impl RunningCommand for LocalCommand {
    async fn wait(&mut self) -> Result<i32, TunnelError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|err| TunnelError::executor(format!("Failed to wait for command: {}", err)))?;
        for pump in self.pumps.iter_mut() {
            let _ = pump.await;
        }
        Ok(exit_code(status))
    }
}

impl Drop for LocalCommand {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Copies a pipe into a sink. Keeps draining after the sink goes away so the child
/// never blocks on a full pipe.
fn spawn_pump<R>(mut reader: R, sink: Arc<dyn OutputSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; PIPE_READ_CHUNK];
        let mut forwarding = true;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if forwarding && sink.write(&buf[..n]).await.is_err() {
                forwarding = false;
            }
        }
    })
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
