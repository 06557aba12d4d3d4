//! Deterministic port assignment.
//!
//! Every installation gets a port offset derived from the invoking user and
//! the installation path, so several checkouts (or several users on one
//! host) can run side by side without configuring anything. The offset is a
//! pure function of its inputs: restarting the same installation reuses the
//! same local URLs.

use std::fmt;
use std::path::Path;

/// Base port of the frontend dev server before the offset is applied.
pub const FRONTEND_BASE_PORT: u16 = 5173;
/// Base port of the backend before the offset is applied.
pub const BACKEND_BASE_PORT: u16 = 4000;
/// Offsets are taken modulo this span.
pub const OFFSET_SPAN: u32 = 1000;

/// Overrides the computed frontend port.
pub const FRONTEND_PORT_VAR: &str = "FRONTEND_PORT";
/// Overrides the computed backend port.
pub const BACKEND_PORT_VAR: &str = "ENCORE_PORT";

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Ports chosen for one run. Created once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub frontend_port: u16,
    pub backend_port: u16,
}

/// Who is running the launcher, as far as port hashing is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Numeric user id.
    Uid(u32),
    /// Account name when no numeric id exists.
    #[cfg_attr(unix, allow(dead_code))]
    Name(String),
}

impl Identity {
    /// Identity of the current user.
    #[cfg(unix)]
    pub fn current() -> Self {
        // SAFETY: getuid has no preconditions and cannot fail.
        Identity::Uid(unsafe { libc::getuid() })
    }

    /// Identity of the current user.
    #[cfg(not(unix))]
    pub fn current() -> Self {
        let name = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_default();
        Identity::Name(name)
    }

    fn token(&self) -> String {
        match self {
            Identity::Uid(uid) => uid.to_string(),
            Identity::Name(name) => name.clone(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

/// 32-bit FNV-1a over `bytes`, continuing from `hash`.
fn fnv1a(mut hash: u32, bytes: &[u8]) -> u32 {
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Offset in `[0, OFFSET_SPAN)` for an identity and installation path.
pub fn port_offset(identity: &Identity, root: &Path) -> u16 {
    let hash = fnv1a(FNV_OFFSET_BASIS, identity.token().as_bytes());
    let hash = fnv1a(hash, root.to_string_lossy().as_bytes());
    // OFFSET_SPAN is well below u16::MAX.
    (hash % OFFSET_SPAN) as u16
}

/// Computes the run's ports, consulting `lookup` for per-port overrides.
///
/// An override replaces the computed value whenever it parses as a non-zero
/// port number; anything else is ignored.
pub fn allocate<F>(identity: &Identity, root: &Path, lookup: F) -> LaunchConfig
where
    F: Fn(&str) -> Option<String>,
{
    let offset = port_offset(identity, root);
    let mut config = LaunchConfig {
        frontend_port: FRONTEND_BASE_PORT + offset,
        backend_port: BACKEND_BASE_PORT + offset,
    };
    if let Some(port) = override_port(FRONTEND_PORT_VAR, &lookup) {
        config.frontend_port = port;
    }
    if let Some(port) = override_port(BACKEND_PORT_VAR, &lookup) {
        config.backend_port = port;
    }
    tracing::debug!(
        identity = %identity,
        root = %root.display(),
        offset,
        frontend = config.frontend_port,
        backend = config.backend_port,
        "allocated ports"
    );
    config
}

fn override_port<F>(var: &str, lookup: &F) -> Option<u16>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(var)?;
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Some(port),
        _ => {
            tracing::debug!(var, value = %raw, "ignoring invalid port override");
            None
        }
    }
}
