#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub fn fetcher_bin() -> &'static str {
    env!("CARGO_BIN_EXE_fetcher")
}

pub fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{port}")
}

/// A local "origin" directory and an empty pool next to it.
pub struct Layout {
    pub remote: PathBuf,
    pub pool: PathBuf,
}

pub fn layout(tmp: &Path) -> Layout {
    let remote = tmp.join("remote");
    let pool = tmp.join("pool");
    std::fs::create_dir_all(&remote).expect("create remote dir");
    std::fs::create_dir_all(&pool).expect("create pool dir");
    Layout { remote, pool }
}

/// Put an object into the origin.
pub fn publish(layout: &Layout, key: &str, bytes: &[u8]) {
    std::fs::write(layout.remote.join(key), bytes).expect("write remote object");
}

/// Write a config whose transfer is a plain `cp`, so the origin can be a
/// directory on disk.
pub fn write_config(tmp: &Path, layout: &Layout, listen: &str) -> PathBuf {
    let config = serde_json::json!({
        "remote": layout.remote.to_str().unwrap(),
        "pool": layout.pool.to_str().unwrap(),
        "fetcher": listen,
        "transfer": ["cp", "{source}", "{destination}"],
    });
    let path = tmp.join("config.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).expect("write config");
    path
}

pub fn spawn_server(config: &Path) -> Child {
    spawn_server_with_args(config, &[])
}

pub fn spawn_server_with_args(config: &Path, extra_args: &[&str]) -> Child {
    let mut cmd = Command::new(fetcher_bin());
    cmd.args(["serve", "--config", config.to_str().unwrap()]);
    let has_explicit_log_level = extra_args.iter().copied().any(|arg| arg == "--log-level");
    if !has_explicit_log_level {
        cmd.args(["--log-level", "warn"]);
    }
    cmd.args(extra_args)
        .env_remove("MERKLEFS_CONFIG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn fetcher serve")
}

pub fn wait_for_server(addr: &str, child: &mut Child) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        if let Some(status) = child.try_wait().expect("try_wait") {
            panic!("server exited before listening: {status:?}");
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("server failed to start before deadline");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Wait for a Unix socket to appear on disk and accept connections.
#[cfg(unix)]
pub fn wait_for_socket(path: &Path, child: &mut Child) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if path.exists() && std::os::unix::net::UnixStream::connect(path).is_ok() {
            return;
        }
        if let Some(status) = child.try_wait().expect("try_wait") {
            panic!("server exited before listening: {status:?}");
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("socket {} did not appear before deadline", path.display());
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Run `fetcher fetch --server <server> <key>`.
pub fn run_fetch(server: &str, key: &str) -> Output {
    Command::new(fetcher_bin())
        .args(["fetch", "--server", server, key])
        .env_remove("MERKLEFS_FETCHER")
        .output()
        .expect("run fetcher fetch")
}

pub fn run_fetcher(args: &[&str]) -> Output {
    Command::new(fetcher_bin())
        .args(args)
        .env_remove("MERKLEFS_CONFIG")
        .env_remove("MERKLEFS_FETCHER")
        .output()
        .expect("run fetcher")
}

/// Send SIGINT and wait for the server to exit.
#[cfg(unix)]
pub fn stop_server(mut child: Child) -> std::process::ExitStatus {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }
    wait_with_deadline(&mut child, Duration::from_secs(10))
}

pub fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::process::ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("server did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub fn assert_ok(output: &Output, context: &str) {
    assert!(
        output.status.success(),
        "{context} failed (status {:?})\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn stdout_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
