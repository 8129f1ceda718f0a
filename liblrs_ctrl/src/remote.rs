use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::error::RemoteError;

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs commands on, and copies files to, the remote hardware controllers
pub trait RemoteExecutor: Send + Sync {
    /// Run a command on host, returning its stdout
    fn execute(&self, host: &str, command: &str, timeout: Duration) -> Result<String, RemoteError>;
    fn copy_to(
        &self,
        host: &str,
        files: &[PathBuf],
        remote_dir: &str,
        timeout: Duration,
    ) -> Result<(), RemoteError>;
}

/// RemoteExecutor over the system ssh and scp clients
#[derive(Debug, Clone)]
pub struct SshExecutor {
    user: String,
}

impl SshExecutor {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
        }
    }

    fn destination(&self, host: &str) -> String {
        if self.user.is_empty() {
            host.to_string()
        } else {
            format!("{}@{host}", self.user)
        }
    }
}

impl RemoteExecutor for SshExecutor {
    fn execute(&self, host: &str, command: &str, timeout: Duration) -> Result<String, RemoteError> {
        log::debug!("ssh {host}: {command}");
        let mut ssh = Command::new("ssh");
        ssh.arg("-o")
            .arg("BatchMode=yes")
            .arg(self.destination(host))
            .arg(command);
        run_with_timeout(ssh, host, command, timeout)
    }

    fn copy_to(
        &self,
        host: &str,
        files: &[PathBuf],
        remote_dir: &str,
        timeout: Duration,
    ) -> Result<(), RemoteError> {
        let target = format!("{}:{remote_dir}/", self.destination(host));
        let label = format!("scp {} file(s) to {target}", files.len());
        log::debug!("{label}");
        let mut scp = Command::new("scp");
        scp.arg("-q").arg("-o").arg("BatchMode=yes");
        scp.args(files);
        scp.arg(&target);
        run_with_timeout(scp, host, &label, timeout)?;
        Ok(())
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_string(&mut buffer);
        }
        buffer
    })
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        log::warn!("Failed to kill timed out child process: {e}");
    }
    let _ = child.wait();
}

/// Spawn the command and wait at most `timeout` for it. The child is killed at the deadline.
pub fn run_with_timeout(
    mut command: Command,
    host: &str,
    label: &str,
    timeout: Duration,
) -> Result<String, RemoteError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    // Pipes are drained on their own threads so a chatty child can't block on a full pipe
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            kill(&mut child);
            return Err(RemoteError::Timeout {
                host: host.to_string(),
                command: label.to_string(),
                after: timeout,
            });
        }
        std::thread::sleep(CHILD_POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    if !status.success() {
        return Err(RemoteError::Failed {
            host: host.to_string(),
            command: label.to_string(),
            status: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(stdout)
}

/// Re-issue `op` up to `retries` more times, but only while it times out
pub fn with_retries<T, F>(retries: u32, mut op: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Result<T, RemoteError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_timeout() && attempt < retries => {
                attempt += 1;
                log::warn!("{e}; retrying ({attempt}/{retries})");
            }
            result => return result,
        }
    }
}
