#![allow(dead_code)]

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Notify};
use tunnel::errors::TunnelError;
use tunnel::services::executor::{OutputSink, RemoteExecutor, RunningCommand};
use tunnel::services::ui::Ui;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Executor double: records every command line and plays back canned output.
#[derive(Default)]
pub struct RecordingExecutor {
    pub commands: StdMutex<Vec<String>>,
    pub fail_start: bool,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub gate: Option<Arc<Notify>>,
}

impl RecordingExecutor {
    pub fn exiting_with(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

struct FinishedCommand {
    exit_code: i32,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl RunningCommand for FinishedCommand {
    async fn wait(&mut self) -> Result<i32, TunnelError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.exit_code)
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn start(
        &self,
        command: &str,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<Box<dyn RunningCommand>, TunnelError> {
        self.commands.lock().unwrap().push(command.to_string());
        if self.fail_start {
            return Err(TunnelError::executor("target unreachable"));
        }
        if !self.stdout.is_empty() {
            stdout.write(&self.stdout).await?;
        }
        if !self.stderr.is_empty() {
            stderr.write(&self.stderr).await?;
        }
        Ok(Box::new(FinishedCommand {
            exit_code: self.exit_code,
            gate: self.gate.clone(),
        }))
    }
}

#[derive(Default)]
pub struct RecordingUi {
    pub said: StdMutex<Vec<String>>,
    pub errors: StdMutex<Vec<String>>,
}

impl RecordingUi {
    pub fn said(&self) -> Vec<String> {
        self.said.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.said.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

/// Blocking libssh2 client; call from `spawn_blocking`.
pub fn connect(port: u16, username: &str, password: &str) -> Result<ssh2::Session, ssh2::Error> {
    let tcp = TcpStream::connect(("127.0.0.1", port)).expect("tcp connect");
    let mut session = ssh2::Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_password(username, password)?;
    Ok(session)
}

#[derive(Debug, Default)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

pub fn run_exec(
    session: &ssh2::Session,
    env: &[(&str, &str)],
    command: &str,
) -> Result<ExecOutcome, ssh2::Error> {
    let mut channel = session.channel_session()?;
    for (name, value) in env {
        channel.setenv(name, value)?;
    }
    channel.exec(command)?;

    let mut outcome = ExecOutcome::default();
    channel
        .read_to_string(&mut outcome.stdout)
        .expect("read stdout");
    channel
        .stderr()
        .read_to_string(&mut outcome.stderr)
        .expect("read stderr");
    channel.wait_close()?;
    outcome.exit_status = channel.exit_status()?;
    Ok(outcome)
}

pub fn disconnect(session: ssh2::Session) {
    let _ = session.disconnect(None, "done", None);
}
