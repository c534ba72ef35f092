use crate::error::WorkerError;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{dup2, pipe};
use rcc_config::WorkerSettings;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Stdio;
use tokio::net::unix::pipe::{Receiver, Sender};
use tokio::process::{Child, Command};
use tracing::debug;

/// Worker subprocess file descriptors, fixed by convention (spec.md §4.B):
/// the child reads commands on 3, writes messages on 4, reads payload
/// chunks on 5, and writes payload chunks on 6.
const CHILD_MSG_IN: RawFd = 3;
const CHILD_MSG_OUT: RawFd = 4;
const CHILD_PAYLOAD_IN: RawFd = 5;
const CHILD_PAYLOAD_OUT: RawFd = 6;

pub struct WorkerPipes {
    pub msg_out: Receiver,
    pub msg_in: Sender,
    pub payload_out: Receiver,
    pub payload_in: Sender,
}

pub struct SpawnedWorker {
    pub child: Child,
    pub pipes: WorkerPipes,
}

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(std::io::Error::from)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(std::io::Error::from)?;
    Ok(())
}

/// Spawns the worker subprocess and wires up the four non-blocking pipes,
/// dup'd to fds 3-6 in the child. `wid` is this worker's numeric id, used
/// only for log correlation here (not passed to the subprocess itself).
pub fn spawn(wid: u32, settings: &WorkerSettings) -> Result<SpawnedWorker, WorkerError> {
    let (msg_out_r, msg_out_w) = pipe().map_err(std::io::Error::from)?;
    let (msg_in_r, msg_in_w) = pipe().map_err(std::io::Error::from)?;
    let (payload_out_r, payload_out_w) = pipe().map_err(std::io::Error::from)?;
    let (payload_in_r, payload_in_w) = pipe().map_err(std::io::Error::from)?;

    // tokio's unix pipe wrappers require the fd already be non-blocking when
    // constructed from a raw fd; only the parent-held ends need this, since
    // the child-bound ends are replaced by dup2 onto 3-6 before exec anyway.
    for fd in [msg_out_r.as_raw_fd(), msg_in_w.as_raw_fd(), payload_out_r.as_raw_fd(), payload_in_w.as_raw_fd()] {
        set_nonblocking(fd)?;
    }

    let mut cmd = build_command(settings);

    // The four child-side fds, dup'd onto 3-6 inside the forked child before
    // exec. SAFETY: `pre_exec` runs in the forked child between fork and
    // exec, where only async-signal-safe calls are permitted; dup2 is.
    let child_msg_in = msg_in_r.as_raw_fd();
    let child_msg_out = msg_out_w.as_raw_fd();
    let child_payload_in = payload_in_r.as_raw_fd();
    let child_payload_out = payload_out_w.as_raw_fd();
    unsafe {
        cmd.pre_exec(move || {
            dup2(child_msg_in, CHILD_MSG_IN)?;
            dup2(child_msg_out, CHILD_MSG_OUT)?;
            dup2(child_payload_in, CHILD_PAYLOAD_IN)?;
            dup2(child_payload_out, CHILD_PAYLOAD_OUT)?;
            Ok(())
        });
    }

    debug!(wid, binary = %settings.binary.display(), "spawning worker subprocess");
    let child = cmd.spawn().map_err(WorkerError::Io)?;

    // Parent keeps the other end of each pipe; drop the ends handed to the
    // child so EOF propagates correctly once they're only held by the child.
    drop(msg_in_r);
    drop(msg_out_w);
    drop(payload_in_r);
    drop(payload_out_w);

    let pipes = WorkerPipes {
        msg_out: owned_to_receiver(msg_out_r)?,
        msg_in: owned_to_sender(msg_in_w)?,
        payload_out: owned_to_receiver(payload_out_r)?,
        payload_in: owned_to_sender(payload_in_w)?,
    };

    Ok(SpawnedWorker { child, pipes })
}

fn owned_to_receiver(fd: OwnedFd) -> Result<Receiver, WorkerError> {
    Receiver::from_owned_fd(fd).map_err(WorkerError::Io)
}

fn owned_to_sender(fd: OwnedFd) -> Result<Sender, WorkerError> {
    Sender::from_owned_fd(fd).map_err(WorkerError::Io)
}

fn build_command(settings: &WorkerSettings) -> Command {
    let mut cmd = if settings.embedded {
        let mut cmd = Command::new(std::env::current_exe().expect("current executable path"));
        cmd.arg("--rcc-embedded-worker");
        cmd
    } else {
        Command::new(&settings.binary)
    };

    cmd.arg(format!("--logLevel={}", settings.log_level));
    for tag in &settings.log_tags {
        cmd.arg(format!("--logTags={tag}"));
    }
    cmd.arg(format!("--rtcMinPort={}", settings.rtc_min_port));
    cmd.arg(format!("--rtcMaxPort={}", settings.rtc_max_port));
    if let Some(cert) = &settings.dtls_certificate_file {
        cmd.arg(format!("--dtlsCertificateFile={}", cert.display()));
    }
    if let Some(key) = &settings.dtls_private_key_file {
        cmd.arg(format!("--dtlsPrivateKeyFile={}", key.display()));
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_settings() -> WorkerSettings {
        WorkerSettings {
            num_workers: 1,
            binary: PathBuf::from("mediasoup-worker"),
            embedded: false,
            log_level: "warn".into(),
            log_tags: vec!["rtp".into(), "ice".into()],
            rtc_min_port: 40000,
            rtc_max_port: 49999,
            dtls_certificate_file: None,
            dtls_private_key_file: None,
            request_timeout_ms: 10_000,
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn build_command_uses_configured_binary_when_not_embedded() {
        let cmd = build_command(&base_settings());
        assert_eq!(cmd.as_std().get_program(), std::ffi::OsStr::new("mediasoup-worker"));
    }

    #[test]
    fn build_command_forwards_log_level_tags_and_port_range() {
        let cmd = build_command(&base_settings());
        let args = args_of(&cmd);
        assert!(args.contains(&"--logLevel=warn".to_string()));
        assert!(args.contains(&"--logTags=rtp".to_string()));
        assert!(args.contains(&"--logTags=ice".to_string()));
        assert!(args.contains(&"--rtcMinPort=40000".to_string()));
        assert!(args.contains(&"--rtcMaxPort=49999".to_string()));
    }

    #[test]
    fn build_command_omits_dtls_flags_when_unset() {
        let cmd = build_command(&base_settings());
        let args = args_of(&cmd);
        assert!(!args.iter().any(|a| a.starts_with("--dtlsCertificateFile")));
        assert!(!args.iter().any(|a| a.starts_with("--dtlsPrivateKeyFile")));
    }

    #[test]
    fn build_command_includes_dtls_flags_when_set() {
        let mut settings = base_settings();
        settings.dtls_certificate_file = Some(PathBuf::from("/etc/rcc/cert.pem"));
        settings.dtls_private_key_file = Some(PathBuf::from("/etc/rcc/key.pem"));
        let args = args_of(&build_command(&settings));
        assert!(args.contains(&"--dtlsCertificateFile=/etc/rcc/cert.pem".to_string()));
        assert!(args.contains(&"--dtlsPrivateKeyFile=/etc/rcc/key.pem".to_string()));
    }

    #[test]
    fn build_command_reexecs_current_binary_when_embedded() {
        let mut settings = base_settings();
        settings.embedded = true;
        let cmd = build_command(&settings);
        let args = args_of(&cmd);
        assert!(args.contains(&"--rcc-embedded-worker".to_string()));
    }
}
