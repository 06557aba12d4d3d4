//! Clearing stale listeners off the launcher's ports.
//!
//! A previous run that died without tearing down its children can leave a
//! dev server or backend bound to one of our ports. Before starting anything
//! we look up who listens on each port and kill them. This is best effort:
//! failures are collected and reported, and the run proceeds regardless.

use tokio::process::Command;

use crate::errors::OccupantError;

/// Kills every process listening on any of `ports`, except this one.
pub async fn kill_port_occupants(ports: &[u16]) -> Result<(), OccupantError> {
    let own_pid = std::process::id();
    let mut failures = Vec::new();
    for &port in ports {
        let pids = match listeners_on(port).await {
            Ok(pids) => pids,
            Err(err) => {
                failures.push(format!("port {port}: {err}"));
                continue;
            }
        };
        for pid in pids.into_iter().filter(|pid| *pid != own_pid) {
            match kill_pid(pid).await {
                Ok(()) => tracing::info!("Killed process {pid} listening on port {port}"),
                Err(err) => failures.push(format!("port {port}: kill {pid}: {err}")),
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(OccupantError { failures })
    }
}

#[cfg(unix)]
async fn listeners_on(port: u16) -> Result<Vec<u32>, String> {
    let output = Command::new("lsof")
        .args(["-nP", "-t", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
        .output()
        .await
        .map_err(|err| format!("lsof: {err}"))?;
    // lsof exits 1 when nothing matched.
    if !output.status.success() && !output.stdout.is_empty() {
        return Err(format!("lsof exited with {}", output.status));
    }
    Ok(parse_lsof_pids(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(windows)]
async fn listeners_on(port: u16) -> Result<Vec<u32>, String> {
    let output = Command::new("netstat")
        .args(["-ano", "-p", "TCP"])
        .output()
        .await
        .map_err(|err| format!("netstat: {err}"))?;
    if !output.status.success() {
        return Err(format!("netstat exited with {}", output.status));
    }
    Ok(parse_netstat_pids(&String::from_utf8_lossy(&output.stdout), port))
}

#[cfg(not(any(unix, windows)))]
async fn listeners_on(_port: u16) -> Result<Vec<u32>, String> {
    Err("listener lookup is not supported on this platform".to_string())
}

#[cfg(unix)]
async fn kill_pid(pid: u32) -> Result<(), String> {
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().to_string())
    }
}

#[cfg(not(unix))]
async fn kill_pid(pid: u32) -> Result<(), String> {
    let status = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .output()
        .await
        .map_err(|err| format!("taskkill: {err}"))?
        .status;
    if status.success() {
        Ok(())
    } else {
        Err(format!("taskkill exited with {status}"))
    }
}

/// `lsof -t` prints one pid per line.
#[cfg_attr(not(unix), allow(dead_code))]
fn parse_lsof_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Picks pids of `LISTENING` rows whose local address ends in `:port`.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_netstat_pids(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{port}");
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [proto, local, _remote, state, pid]
                    if proto.eq_ignore_ascii_case("TCP")
                        && state.eq_ignore_ascii_case("LISTENING")
                        && local.ends_with(&suffix) =>
                {
                    pid.parse::<u32>().ok()
                }
                _ => None,
            }
        })
        .filter(|pid| *pid != 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}
