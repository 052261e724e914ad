//! backend::zfs
//!
//! [`StorageBackend`] implementation that shells out to the `zfs` utility.
//!
//! # Privileges
//!
//! Read-only subcommands (`list`, `diff`) run directly. Mutating
//! subcommands (`snapshot`, `destroy`, `send`, `recv`) are prefixed with the
//! configured privilege-elevation program, if any.
//!
//! # Dry Run
//!
//! Built with `really = false`, mutating subcommands are logged as
//! "would run" and report success without spawning anything. Read-only
//! subcommands still execute so that planning sees real state.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, Command, Output, Stdio};
use std::thread;

use tracing::{debug, info};

use super::traits::{BackendError, ReplicationRequest, SnapshotInfo, Stage, StorageBackend};
use crate::core::types::DatasetId;

/// Default location of the `zfs` binary.
pub const DEFAULT_ZFS_PATH: &str = "/usr/sbin/zfs";

/// Backend driving the real `zfs` command line.
#[derive(Debug, Clone)]
pub struct ZfsBackend {
    zfs: PathBuf,
    sudo: Option<PathBuf>,
    really: bool,
}

impl ZfsBackend {
    pub fn new(zfs: impl Into<PathBuf>, sudo: Option<PathBuf>, really: bool) -> Self {
        Self {
            zfs: zfs.into(),
            sudo,
            really,
        }
    }

    /// Full argv for a subcommand, elevated when `privileged`.
    fn command_line(&self, args: &[String], privileged: bool) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        if privileged {
            if let Some(sudo) = &self.sudo {
                argv.push(sudo.display().to_string());
            }
        }
        argv.push(self.zfs.display().to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    fn spawn_output(argv: &[String]) -> Result<Output, BackendError> {
        debug!(command = %argv.join(" "), "running");
        Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BackendError::Spawn {
                command: argv.join(" "),
                message: e.to_string(),
            })
    }

    /// Run a read-only subcommand; returns the raw output whatever the status.
    fn read(&self, args: &[String]) -> Result<Output, BackendError> {
        Self::spawn_output(&self.command_line(args, false))
    }

    /// Run a read-only subcommand and require success.
    fn read_ok(&self, args: &[String]) -> Result<String, BackendError> {
        let argv = self.command_line(args, false);
        let output = Self::spawn_output(&argv)?;
        check_status(&argv, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a mutating subcommand, or only log it in dry-run mode.
    fn mutate(&self, args: &[String]) -> Result<(), BackendError> {
        let argv = self.command_line(args, true);
        if !self.really {
            info!(command = %argv.join(" "), "would run");
            return Ok(());
        }
        let output = Self::spawn_output(&argv)?;
        check_status(&argv, &output)
    }
}

fn check_status(argv: &[String], output: &Output) -> Result<(), BackendError> {
    if output.status.success() {
        return Ok(());
    }
    Err(BackendError::CommandFailed {
        command: argv.join(" "),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Arguments for the sending half of a replication.
pub fn send_args(request: &ReplicationRequest) -> Vec<String> {
    let mut args = vec!["send".to_string()];
    if request.replicate {
        args.push("-R".into());
    }
    if let Some(base) = &request.incremental_base {
        args.push("-I".into());
        args.push(base.clone());
    }
    args.push(request.source.snapshot(request.snapshot.clone()).to_string());
    args
}

/// Arguments for the receiving half of a replication.
pub fn recv_args(request: &ReplicationRequest) -> Vec<String> {
    let mut args = vec!["recv".to_string()];
    if request.rollback {
        args.push("-F".into());
    }
    for (key, value) in &request.property_overwrites {
        args.push("-o".into());
        args.push(format!("{key}={value}"));
    }
    for prop in &request.property_ignores {
        args.push("-x".into());
        args.push(prop.clone());
    }
    args.push(request.destination.joined());
    args
}

fn parse_snapshot_line(command: &str, line: &str) -> Result<SnapshotInfo, BackendError> {
    let parse_err = |message: String| BackendError::Parse {
        command: command.to_string(),
        message,
    };
    let (dataset, name) = line
        .split_once('@')
        .ok_or_else(|| parse_err(format!("'{line}' is not a snapshot name")))?;
    let dataset = DatasetId::parse(dataset).map_err(|e| parse_err(e.to_string()))?;
    Ok(SnapshotInfo {
        dataset,
        name: name.to_string(),
    })
}

fn drain(stream: Option<ChildStderr>) -> String {
    let mut buf = String::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_string(&mut buf);
    }
    buf.trim().to_string()
}

fn spawn_failed(argv: &[String], e: std::io::Error) -> BackendError {
    BackendError::Spawn {
        command: argv.join(" "),
        message: e.to_string(),
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl StorageBackend for ZfsBackend {
    fn exists(&self, dataset: &DatasetId) -> Result<bool, BackendError> {
        let args = vec![
            "list".into(),
            "-H".into(),
            "-o".into(),
            "name".into(),
            dataset.joined(),
        ];
        Ok(self.read(&args)?.status.success())
    }

    fn list_datasets(&self, root: &DatasetId) -> Result<Vec<DatasetId>, BackendError> {
        let args = vec![
            "list".into(),
            "-H".into(),
            "-o".into(),
            "name".into(),
            "-s".into(),
            "name".into(),
            "-t".into(),
            "filesystem,volume".into(),
            "-r".into(),
            root.joined(),
        ];
        let stdout = self.read_ok(&args)?;
        let mut datasets = stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                DatasetId::parse(l.trim()).map_err(|e| BackendError::Parse {
                    command: "zfs list".into(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        datasets.sort();
        Ok(datasets)
    }

    fn list_snapshots(
        &self,
        dataset: &DatasetId,
        recurse: bool,
    ) -> Result<Vec<SnapshotInfo>, BackendError> {
        let mut args: Vec<String> = ["list", "-H", "-o", "name", "-s", "name", "-t", "snapshot"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if recurse {
            args.push("-r".into());
        }
        args.push(dataset.joined());

        let stdout = self.read_ok(&args)?;
        let mut snapshots = stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| parse_snapshot_line("zfs list -t snapshot", l.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        snapshots.sort();
        Ok(snapshots)
    }

    fn diff(&self, dataset: &DatasetId, a: &str, b: &str) -> Result<bool, BackendError> {
        let args = vec![
            "diff".into(),
            dataset.snapshot(a).to_string(),
            dataset.snapshot(b).to_string(),
        ];
        let stdout = self.read_ok(&args)?;
        Ok(!stdout.trim().is_empty())
    }

    fn create_snapshot(
        &self,
        dataset: &DatasetId,
        name: &str,
        recursive: bool,
    ) -> Result<(), BackendError> {
        let mut args = vec!["snapshot".to_string()];
        if recursive {
            args.push("-r".into());
        }
        args.push(dataset.snapshot(name).to_string());
        self.mutate(&args)
    }

    fn destroy_snapshot(&self, dataset: &DatasetId, name: &str) -> Result<(), BackendError> {
        let args = vec!["destroy".to_string(), dataset.snapshot(name).to_string()];
        self.mutate(&args)
    }

    fn replicate(&self, request: &ReplicationRequest) -> Result<(), BackendError> {
        let send = self.command_line(&send_args(request), true);
        let recv = self.command_line(&recv_args(request), true);

        if !self.really {
            info!(command = %format!("{} | {}", send.join(" "), recv.join(" ")), "would run");
            return Ok(());
        }
        debug!(command = %format!("{} | {}", send.join(" "), recv.join(" ")), "running");

        let mut sender = Command::new(&send[0])
            .args(&send[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(&send, e))?;

        let Some(stream) = sender.stdout.take() else {
            reap(&mut sender);
            return Err(BackendError::Spawn {
                command: send.join(" "),
                message: "sender has no output stream".into(),
            });
        };

        let mut receiver = match Command::new(&recv[0])
            .args(&recv[1..])
            .stdin(Stdio::from(stream))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                reap(&mut sender);
                return Err(spawn_failed(&recv, e));
            }
        };

        // Both stderr pipes are drained at once so neither child blocks on a
        // full buffer while the other is being read.
        let sender_stderr = sender.stderr.take();
        let receiver_stderr = receiver.stderr.take();
        let (sender_log, receiver_log) = thread::scope(|scope| {
            let sender_reader = scope.spawn(move || drain(sender_stderr));
            let receiver_log = drain(receiver_stderr);
            (sender_reader.join().unwrap_or_default(), receiver_log)
        });

        let sender_status = sender.wait().map_err(|e| spawn_failed(&send, e))?;
        let receiver_status = receiver.wait().map_err(|e| spawn_failed(&recv, e))?;

        // A receiver that exits early takes the sender down with a broken
        // pipe; the receiver's diagnostic is the one that explains it.
        let sender_killed = !sender_status.success() && sender_status.code().is_none();
        if !receiver_status.success() && (sender_status.success() || sender_killed) {
            return Err(BackendError::StageFailed {
                stage: Stage::Receiver,
                code: receiver_status.code(),
                stderr: receiver_log,
            });
        }
        if !sender_status.success() {
            return Err(BackendError::StageFailed {
                stage: Stage::Sender,
                code: sender_status.code(),
                stderr: sender_log,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ds(name: &str) -> DatasetId {
        DatasetId::parse(name).unwrap()
    }

    fn request() -> ReplicationRequest {
        ReplicationRequest {
            source: ds("tank/home"),
            snapshot: "202401020000".into(),
            destination: ds("backup/home"),
            incremental_base: None,
            replicate: false,
            rollback: false,
            property_overwrites: BTreeMap::new(),
            property_ignores: Vec::new(),
        }
    }

    #[test]
    fn full_send_arguments() {
        let req = request();
        assert_eq!(send_args(&req), vec!["send", "tank/home@202401020000"]);
        assert_eq!(recv_args(&req), vec!["recv", "backup/home"]);
    }

    #[test]
    fn incremental_replicated_send_arguments() {
        let mut req = request();
        req.incremental_base = Some("202401010000".into());
        req.replicate = true;
        req.rollback = true;
        req.property_overwrites
            .insert("mountpoint".into(), "none".into());
        req.property_overwrites
            .insert("canmount".into(), "off".into());
        req.property_ignores.push("sharenfs".into());

        assert_eq!(
            send_args(&req),
            vec!["send", "-R", "-I", "202401010000", "tank/home@202401020000"]
        );
        assert_eq!(
            recv_args(&req),
            vec![
                "recv",
                "-F",
                "-o",
                "canmount=off",
                "-o",
                "mountpoint=none",
                "-x",
                "sharenfs",
                "backup/home"
            ]
        );
    }

    #[test]
    fn elevation_applies_to_mutations_only() {
        let backend = ZfsBackend::new("/sbin/zfs", Some(PathBuf::from("/usr/bin/sudo")), true);
        let args = vec!["destroy".to_string(), "tank@x".to_string()];
        assert_eq!(
            backend.command_line(&args, true),
            vec!["/usr/bin/sudo", "/sbin/zfs", "destroy", "tank@x"]
        );
        assert_eq!(
            backend.command_line(&args, false),
            vec!["/sbin/zfs", "destroy", "tank@x"]
        );
    }

    #[test]
    fn dry_run_mutations_do_not_spawn() {
        let backend = ZfsBackend::new("/nonexistent/zfs", None, false);
        backend
            .create_snapshot(&ds("tank"), "202401010000", true)
            .unwrap();
        backend.destroy_snapshot(&ds("tank"), "202401010000").unwrap();
        backend.replicate(&request()).unwrap();
    }

    #[test]
    fn read_only_commands_run_in_dry_run() {
        let backend = ZfsBackend::new("/nonexistent/zfs", None, false);
        let err = backend.list_snapshots(&ds("tank"), false).unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
    }

    #[test]
    fn parse_snapshot_line_splits_dataset() {
        let info = parse_snapshot_line("zfs list", "tank/home@202401010000").unwrap();
        assert_eq!(info.dataset, ds("tank/home"));
        assert_eq!(info.name, "202401010000");
        assert!(parse_snapshot_line("zfs list", "tank/home").is_err());
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        #[test]
        fn exists_follows_exit_status() {
            assert!(ZfsBackend::new("true", None, true).exists(&ds("tank")).unwrap());
            assert!(!ZfsBackend::new("false", None, true).exists(&ds("tank")).unwrap());
        }

        #[test]
        fn failing_mutation_reports_command() {
            let backend = ZfsBackend::new("false", None, true);
            let err = backend.destroy_snapshot(&ds("tank"), "x").unwrap_err();
            match err {
                BackendError::CommandFailed { command, code, .. } => {
                    assert_eq!(command, "false destroy tank@x");
                    assert_eq!(code, Some(1));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[test]
        fn pipeline_succeeds_when_both_stages_succeed() {
            ZfsBackend::new("true", None, true)
                .replicate(&request())
                .unwrap();
        }

        #[test]
        fn pipeline_reports_sender_failure() {
            let err = ZfsBackend::new("false", None, true)
                .replicate(&request())
                .unwrap_err();
            assert_eq!(err.stage(), Some(Stage::Sender));
        }

        /// Write an executable stand-in for `zfs` into `dir`.
        fn fake_zfs(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
            use std::os::unix::fs::PermissionsExt;

            let path = dir.join("zfs");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn pipeline_reports_receiver_when_it_breaks_the_pipe() {
            let temp = tempfile::TempDir::new().unwrap();
            let zfs = fake_zfs(
                temp.path(),
                r#"case "$1" in
    send) exec yes ;;
    recv) echo "cannot receive new filesystem stream: destination has been modified" >&2; exit 1 ;;
esac"#,
            );

            let err = ZfsBackend::new(&zfs, None, true)
                .replicate(&request())
                .unwrap_err();
            assert_eq!(err.stage(), Some(Stage::Receiver));
            assert!(err.to_string().contains("destination has been modified"));
        }

        #[test]
        fn pipeline_reports_sender_when_it_fails_first() {
            let temp = tempfile::TempDir::new().unwrap();
            let zfs = fake_zfs(
                temp.path(),
                r#"case "$1" in
    send) echo "cannot open 'tank/home@202401020000': dataset does not exist" >&2; exit 1 ;;
    recv) cat >/dev/null ;;
esac"#,
            );

            let err = ZfsBackend::new(&zfs, None, true)
                .replicate(&request())
                .unwrap_err();
            assert_eq!(err.stage(), Some(Stage::Sender));
            assert!(err.to_string().contains("dataset does not exist"));
        }

        #[test]
        fn empty_diff_output_means_identical() {
            let backend = ZfsBackend::new("true", None, true);
            assert!(!backend.diff(&ds("tank"), "a", "b").unwrap());
        }

        #[test]
        fn diff_failure_is_an_error() {
            let backend = ZfsBackend::new("false", None, true);
            assert!(backend.diff(&ds("tank"), "a", "b").is_err());
        }
    }
}
