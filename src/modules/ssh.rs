//! SSH transport for remote command execution
//!
//! Two cooperating pieces:
//! - [`connect`] dials and authenticates with retry. The run context is
//!   checked before every attempt; an attempt in progress is not interrupted.
//! - [`run_command`] runs one command on a blocking worker thread and lets
//!   the run context preempt it. On cancellation the remote process receives
//!   a `TERM` signal request and the channel is closed.
//!
//! `ssh2` is synchronous, so every libssh2 call happens inside
//! `tokio::task::spawn_blocking`. An [`SshConnection`] disconnects when it is
//! dropped, which releases the connection on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use fleetrun::cancel::RunContext;
//! use fleetrun::models::Host;
//! use fleetrun::modules::ssh::{connect, run_command, SshDefaults, SshTarget};
//!
//! # async fn example() -> Result<(), fleetrun::error::ModuleError> {
//! let mut host = Host::new("web1", "10.0.0.11");
//! host.user = "deploy".to_string();
//! host.private_key = Some("/home/deploy/.ssh/id_ed25519".to_string());
//!
//! let ctx = RunContext::new();
//! let target = SshTarget::from_host(&host, &SshDefaults::default())?;
//! let connection = connect(&ctx, &target).await?;
//! let output = run_command(&ctx, connection, "uptime").await?;
//! println!("{}", output);
//! # Ok(())
//! # }
//! ```

use crate::cancel::{CancelReason, RunContext};
use crate::error::ModuleError;
use crate::models::{Credentials, Host};
use crate::parser::duration_or_default;
use ssh2::{Channel, ExtendedData, Session};
use std::io::{self, ErrorKind, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a single TCP connect may take
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// libssh2 timeout for handshake and authentication (ms)
const HANDSHAKE_TIMEOUT_MS: u32 = 10_000;

/// How often the command worker checks the run context (ms)
const POLL_INTERVAL_MS: u32 = 200;

/// libssh2 timeout for closing and signalling (ms)
const CLOSE_TIMEOUT_MS: u32 = 2_000;

/// How long a cancelled caller waits for the worker to wind down
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Connection settings used when a host does not set its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SshDefaults {
    /// Delay between connection attempts
    pub retry_delay: Duration,
    /// Connection attempts
    pub retry_count: u32,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            retry_count: 1,
        }
    }
}

/// Fully resolved connection parameters for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    /// `address:port`
    pub addr: String,
    pub user: String,
    pub credentials: Credentials,
    pub retry_delay: Duration,
    pub retry_count: u32,
}

impl SshTarget {
    /// Resolve port, credentials and connection retry settings for `host`.
    ///
    /// Missing or ambiguous credentials and a missing key file are
    /// configuration errors; nothing is dialled for them.
    pub fn from_host(host: &Host, defaults: &SshDefaults) -> Result<Self, ModuleError> {
        let credentials = host.credentials()?;
        if let Credentials::KeyFile(path) = &credentials {
            if !path.exists() {
                return Err(ModuleError::InvalidConfig(format!(
                    "SSH key file not found: {}",
                    path.display()
                )));
            }
        }

        let what = format!("retry_ssh for host '{}'", host.name);
        let retry_delay = duration_or_default(host.retry_ssh.as_deref(), defaults.retry_delay, &what);
        let retry_count = match host.retry_ssh_count {
            Some(count) if count > 0 => count,
            _ => defaults.retry_count.max(1),
        };

        // Bare IPv6 literals need brackets before the port is appended
        let addr = if host.address.contains(':') && !host.address.starts_with('[') {
            format!("[{}]:{}", host.address, host.port())
        } else {
            format!("{}:{}", host.address, host.port())
        };

        Ok(Self {
            host: host.name.clone(),
            addr,
            user: host.user.clone(),
            credentials,
            retry_delay,
            retry_count,
        })
    }
}

/// An authenticated SSH session, disconnected on drop
pub struct SshConnection {
    session: Session,
    addr: String,
}

impl SshConnection {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        self.session.set_timeout(CLOSE_TIMEOUT_MS);
        if let Err(e) = self.session.disconnect(None, "fleetrun: done", None) {
            debug!("SSH disconnect from {} failed: {}", self.addr, e);
        }
        debug!("SSH connection to {} closed", self.addr);
    }
}

/// Dial and authenticate, retrying up to `target.retry_count` times
pub async fn connect(ctx: &RunContext, target: &SshTarget) -> Result<SshConnection, ModuleError> {
    let attempts = target.retry_count.max(1);
    let mut last_error = String::from("no connection attempt made");

    for attempt in 1..=attempts {
        if let Some(reason) = ctx.reason() {
            return Err(ModuleError::Cancelled(reason));
        }

        debug!(
            "Connecting to {} as {} (attempt {}/{})",
            target.addr, target.user, attempt, attempts
        );

        let dial_target = target.clone();
        let dialled = tokio::task::spawn_blocking(move || dial(&dial_target))
            .await
            .map_err(|e| ModuleError::Panicked(format!("SSH dial worker failed: {}", e)))?;

        match dialled {
            Ok(session) => {
                info!("SSH session established to {} ({})", target.host, target.addr);
                return Ok(SshConnection {
                    session,
                    addr: target.addr.clone(),
                });
            }
            Err(message) => {
                warn!(
                    "SSH connection to {} failed (attempt {}/{}): {}",
                    target.addr, attempt, attempts, message
                );
                last_error = message;
            }
        }

        if attempt < attempts {
            if let Err(reason) = ctx.sleep(target.retry_delay).await {
                return Err(ModuleError::Cancelled(reason));
            }
        }
    }

    Err(ModuleError::Connect {
        attempts,
        message: last_error,
    })
}

/// Single blocking connection attempt: TCP connect, handshake, auth
fn dial(target: &SshTarget) -> Result<Session, String> {
    let addrs: Vec<SocketAddr> = target
        .addr
        .to_socket_addrs()
        .map_err(|e| format!("failed to resolve {}: {}", target.addr, e))?
        .collect();

    let mut last_error = None;
    let mut stream = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, CONNECT_TIMEOUT) {
            Ok(tcp) => {
                stream = Some(tcp);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }
    let tcp = stream.ok_or_else(|| match last_error {
        Some(e) => format!("failed to connect to {}: {}", target.addr, e),
        None => format!("failed to connect to {}: no addresses resolved", target.addr),
    })?;

    if let Err(e) = tcp.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    let mut session =
        Session::new().map_err(|e| format!("failed to create SSH session: {}", e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(HANDSHAKE_TIMEOUT_MS);
    session
        .handshake()
        .map_err(|e| format!("SSH handshake with {} failed: {}", target.addr, e))?;

    let auth = match &target.credentials {
        Credentials::KeyFile(path) => {
            debug!("Authenticating with key: {}", path.display());
            session.userauth_pubkey_file(&target.user, None, path, None)
        }
        Credentials::Password(password) => session.userauth_password(&target.user, password),
    };
    auth.map_err(|e| format!("authentication as '{}' failed: {}", target.user, e))?;

    if !session.authenticated() {
        return Err(format!("authentication as '{}' failed", target.user));
    }

    session.set_timeout(0);
    Ok(session)
}

/// Run `command` over `connection`, preemptible by the run context.
///
/// Returns the combined stdout/stderr on exit status 0. The connection is
/// consumed and closed before this returns, or shortly after when the
/// worker has to be detached.
pub async fn run_command(
    ctx: &RunContext,
    connection: SshConnection,
    command: &str,
) -> Result<String, ModuleError> {
    if let Some(reason) = ctx.reason() {
        // Disconnecting blocks on libssh2
        tokio::task::spawn_blocking(move || drop(connection));
        return Err(ModuleError::Cancelled(reason));
    }

    let worker_ctx = ctx.clone();
    let worker_command = command.to_string();
    let mut worker =
        tokio::task::spawn_blocking(move || exec_blocking(&worker_ctx, connection, &worker_command));

    tokio::select! {
        joined = &mut worker => {
            return joined
                .map_err(|e| ModuleError::Panicked(format!("SSH command worker failed: {}", e)))?;
        }
        _ = ctx.cancelled() => {}
    }

    let reason = ctx.reason().unwrap_or(CancelReason::Cancelled);
    info!("Cancelling remote command '{}': {}", command, reason);

    // The worker notices the context on its next poll
    if tokio::time::timeout(TERMINATE_GRACE, worker).await.is_err() {
        warn!(
            "Remote command '{}' did not stop within {:?}, detaching",
            command, TERMINATE_GRACE
        );
    }
    Err(ModuleError::Cancelled(reason))
}

/// Blocking half of [`run_command`]
fn exec_blocking(
    ctx: &RunContext,
    connection: SshConnection,
    command: &str,
) -> Result<String, ModuleError> {
    let session = connection.session();
    let channel = session.channel_session().map_err(|e| {
        ModuleError::Command(format!("failed to open SSH channel for '{}': {}", command, e))
    })?;

    debug!("Executing command on {}: {}", connection.addr(), command);
    drive_command(ctx, &mut SessionChannel { session, channel }, command)
}

/// What the command loop needs from an exec channel
trait ExecChannel {
    /// Deliver stderr through the same stream as stdout
    fn merge_stderr(&mut self) -> io::Result<()>;
    /// Start `command`; reads afterwards time out instead of blocking
    fn exec(&mut self, command: &str) -> io::Result<()>;
    /// Next chunk of output, `Ok(0)` at end of stream
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Wait for the channel to close and return the exit status
    fn exit_status(&mut self) -> io::Result<i32>;
    /// Ask the remote side to send SIGTERM to the command, then close
    fn terminate(&mut self);
}

/// libssh2 channel of an authenticated session
struct SessionChannel<'a> {
    session: &'a Session,
    channel: Channel,
}

impl ExecChannel for SessionChannel<'_> {
    fn merge_stderr(&mut self) -> io::Result<()> {
        Ok(self.channel.handle_extended_data(ExtendedData::Merge)?)
    }

    fn exec(&mut self, command: &str) -> io::Result<()> {
        self.channel.exec(command)?;
        // Short libssh2 timeouts turn blocking reads into a poll loop
        self.session.set_timeout(POLL_INTERVAL_MS);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn exit_status(&mut self) -> io::Result<i32> {
        self.session.set_timeout(CLOSE_TIMEOUT_MS);
        self.channel.wait_close()?;
        Ok(self.channel.exit_status()?)
    }

    fn terminate(&mut self) {
        self.session.set_timeout(CLOSE_TIMEOUT_MS);
        match self.channel.process_startup("signal", Some("TERM")) {
            Ok(()) => debug!("Sent TERM to remote command"),
            Err(e) => warn!("Failed to signal remote command: {}", e),
        }
        if let Err(e) = self.channel.close() {
            debug!("Failed to close SSH channel: {}", e);
        }
    }
}

/// Run `command` on `channel` until it exits or the context ends
fn drive_command(
    ctx: &RunContext,
    channel: &mut impl ExecChannel,
    command: &str,
) -> Result<String, ModuleError> {
    let command_error =
        |what: &str, e: io::Error| ModuleError::Command(format!("{} '{}': {}", what, command, e));

    if let Some(reason) = ctx.reason() {
        return Err(ModuleError::Cancelled(reason));
    }

    channel
        .merge_stderr()
        .map_err(|e| command_error("failed to merge stderr of", e))?;
    channel
        .exec(command)
        .map_err(|e| command_error("failed to execute", e))?;

    let mut output = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        if let Some(reason) = ctx.reason() {
            channel.terminate();
            return Err(ModuleError::Cancelled(reason));
        }
        match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => continue,
            Err(e) => return Err(command_error("failed to read output of", e)),
        }
    }

    let exit_code = channel
        .exit_status()
        .map_err(|e| command_error("failed to get exit status of", e))?;

    let output = String::from_utf8_lossy(&output).into_owned();
    debug!("SSH command exit code: {}", exit_code);

    if exit_code != 0 {
        return Err(ModuleError::Command(format!(
            "command '{}' exited with status {}: {}",
            command,
            exit_code,
            output.trim_end()
        )));
    }

    Ok(output)
}
