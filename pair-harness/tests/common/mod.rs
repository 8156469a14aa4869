#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Tests in a binary fork while others write scripts; an executable that is
/// still open for writing in a forked child fails with ETXTBSY. Holding this
/// lock for the whole test keeps script writes and spawns apart.
static SERIAL: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write an executable `/bin/sh` script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// A role that appends its arguments to `log` and exits with `code`.
pub fn logging_role(dir: &Path, name: &str, log: &Path, code: i32) -> PathBuf {
    write_script(
        dir,
        name,
        &format!("echo \"{} $@\" >> \"{}\"\nexit {}", name, log.display(), code),
    )
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
