#![cfg(unix)]

use mongod_layer_core::{
    ImportJobs, LaunchSpec, LayerStdOut, LifecycleManager, ProcessHandle, ProcessLauncher,
    ProcessStatus, stream,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use mongod_layer_unix::UnixProcessLauncherFactory;
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn sh(script: &str) -> LaunchSpec {
    LaunchSpec::new("/bin/sh").arg("-c").arg(script)
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn read_pid(marker: &Path) -> i32 {
    for _ in 0..50 {
        if let Ok(text) = std::fs::read_to_string(marker) {
            if let Ok(pid) = text.trim().parse::<i32>() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("no pid recorded in {}", marker.display());
}

/// Gone or a zombie waiting to be reaped
async fn exited(pid: i32) -> bool {
    for _ in 0..50 {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => return true,
            Ok(stat) if stat.contains(") Z ") => return true,
            Ok(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    false
}

#[tokio::test]
async fn test_spawn_reports_exit_code() {
    let launcher = UnixProcessLauncherFactory::create_process_launcher();

    let mut ok = launcher.spawn(&sh("exit 0")).await.unwrap();
    assert!(ok.get_pid().is_some());
    assert_eq!(ok.get_command(), "/bin/sh");
    assert!(ok.wait().await.unwrap().success());

    let mut failed = launcher.spawn(&sh("exit 3")).await.unwrap();
    assert_eq!(failed.wait().await.unwrap(), ProcessStatus::Exited { code: Some(3) });
}

#[tokio::test]
async fn test_output_streams_are_piped() {
    let launcher = UnixProcessLauncherFactory::create_process_launcher();
    let mut handle = launcher
        .spawn(&sh("echo to-stdout; echo to-stderr >&2"))
        .await
        .unwrap();

    let output = handle.take_output().unwrap();
    assert!(handle.take_output().is_none());

    let (writer, mut reader) = tokio::io::duplex(4096);
    let out = LayerStdOut::new(Box::new(writer));
    stream(output.stdout.unwrap(), &out).await.unwrap();
    stream(output.stderr.unwrap(), &out).await.unwrap();
    drop(out);

    let mut text = String::new();
    reader.read_to_string(&mut text).await.unwrap();
    assert_eq!(text, "to-stdout\nto-stderr\n");
    assert!(handle.wait().await.unwrap().success());
}

#[tokio::test]
async fn test_missing_executable_fails_to_spawn() {
    let launcher = UnixProcessLauncherFactory::create_process_launcher();
    let result = launcher
        .spawn(&LaunchSpec::new("/nonexistent/bin/mongod").arg("--dbpath").arg("/tmp"))
        .await;
    let err = result.err().expect("spawn should fail");
    assert!(err.to_string().contains("/nonexistent/bin/mongod"));
}

#[tokio::test]
async fn test_kill_terminates_process() {
    let launcher = UnixProcessLauncherFactory::create_process_launcher();
    let mut handle = launcher.spawn(&sh("sleep 30")).await.unwrap();

    handle.kill().unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("process should exit after kill")
        .unwrap();
    assert_eq!(status, ProcessStatus::Terminated);

    // Killing a reaped process is a no-op
    handle.kill().unwrap();
}

#[tokio::test]
async fn test_kill_reaches_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("grandchild.pid");
    let launcher = UnixProcessLauncherFactory::create_process_launcher();

    // The shell forks a background sleep, records its pid and waits on it
    let script = format!("sleep 30 & echo $! > {}; wait", marker.display());
    let mut handle = launcher.spawn(&sh(&script)).await.unwrap();

    let grandchild = read_pid(&marker).await;

    handle.kill().unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();

    assert!(exited(grandchild).await, "grandchild {grandchild} survived the group kill");
}

#[tokio::test]
async fn test_emergency_kill_by_pid() {
    let launcher = UnixProcessLauncherFactory::create_process_launcher();
    let mut handle = launcher.spawn(&sh("sleep 30")).await.unwrap();
    let pid = handle.get_pid().unwrap();

    launcher.emergency_kill(pid);

    let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, ProcessStatus::Terminated);
}

#[tokio::test]
async fn test_dropped_handle_kills_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("grandchild.pid");
    let launcher = UnixProcessLauncherFactory::create_process_launcher();

    let script = format!("sleep 30 & echo $! > {}; wait", marker.display());
    let handle = launcher.spawn(&sh(&script)).await.unwrap();
    let child = handle.get_pid().unwrap().0 as i32;
    let grandchild = read_pid(&marker).await;

    drop(handle);

    assert!(exited(child).await, "child {child} survived its handle");
    assert!(exited(grandchild).await, "grandchild {grandchild} survived its handle");
}

#[tokio::test]
async fn test_import_returns_when_importer_exits() {
    let dir = tempfile::tempdir().unwrap();
    let mongod = write_script(dir.path(), "mongod", "exec sleep 30\n");
    // The background sleep inherits the importer's stdout and keeps it open
    let importer = write_script(dir.path(), "mongoimport", "sleep 10 &\necho imported\nexit 0\n");

    let manager = LifecycleManager::with_output(
        UnixProcessLauncherFactory::create_process_launcher(),
        LayerStdOut::sink(),
    );
    manager.configure(&mongod, dir.path()).await.unwrap();
    manager.start().await.unwrap();

    let jobs: ImportJobs = [("users", "users.json")].into_iter().collect();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        manager.run_import(&importer, "shop", &jobs),
    )
    .await
    .expect("run_import should return once the importer exits");

    assert!(result.is_ok());
    manager.stop().await;
}

#[tokio::test]
async fn test_emergency_kill_after_exit_is_harmless() {
    let launcher = UnixProcessLauncherFactory::create_process_launcher();
    let mut handle = launcher.spawn(&sh("exit 0")).await.unwrap();
    let pid = handle.get_pid().unwrap();
    assert!(handle.wait().await.unwrap().success());

    launcher.emergency_kill(pid);
    launcher.emergency_kill(pid);
}
