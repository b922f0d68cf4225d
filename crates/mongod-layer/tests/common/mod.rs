//! Shell-script stand-ins for mongod and mongoimport
#![allow(dead_code)]

use mongod_layer::ProcessId;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A script that writes its pid to `<name>.pid` before becoming `sleep 30`
pub fn sleeper(dir: &Path, name: &str) -> PathBuf {
    let body = format!("echo $$ > {}/{name}.pid\nexec sleep 30\n", dir.display());
    write_script(dir, name, &body)
}

/// Poll for the pid written by [`sleeper`]
pub async fn read_pid(dir: &Path, name: &str) -> ProcessId {
    let marker = dir.join(format!("{name}.pid"));
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(&marker) {
            if let Ok(pid) = text.trim().parse::<u32>() {
                return ProcessId(pid);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{name} never recorded its pid");
}

/// Gone or a zombie waiting to be reaped
pub async fn wait_for_exit(pid: ProcessId) -> bool {
    for _ in 0..100 {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid.0)) {
            Err(_) => return true,
            Ok(stat) if stat.contains(") Z ") => return true,
            Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    false
}
