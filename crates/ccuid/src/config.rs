//! Daemon configuration from environment variables.
//!
//! Invalid numeric values fall back to their defaults with a warning;
//! the daemon never refuses to start over a malformed variable.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default port of the session stream server.
pub const DEFAULT_STREAM_PORT: u16 = 4450;

/// Default port of the HTTP + WebSocket API server.
pub const DEFAULT_API_PORT: u16 = 4451;

/// Default publish window: sessions inactive longer are filtered out.
pub const DEFAULT_MAX_AGE_HOURS: u64 = 24;

/// Default idle timeout in minutes.
pub const DEFAULT_IDLE_TIMEOUT_MINUTES: u64 = 20;

/// Which host terminal emulator the daemon may script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Iterm2,
    None,
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stream server port (`PORT`)
    pub stream_port: u16,

    /// HTTP + WebSocket API port (`API_PORT`)
    pub api_port: u16,

    /// Sessions inactive longer than this are not published (`MAX_AGE_HOURS`)
    pub max_age: Duration,

    /// Inactivity window before a session is idle (`IDLE_TIMEOUT_MINUTES`)
    pub idle_timeout: Duration,

    /// Gates AI summaries (`ANTHROPIC_API_KEY`)
    pub anthropic_api_key: Option<String>,

    /// Desktop notifications toggle (`NOTIFICATIONS_ENABLED`)
    pub notifications_enabled: bool,

    /// Host terminal emulator to script (`TERMINAL`)
    pub terminal: TerminalKind,

    /// Local host label (`HOSTNAME` override, else the system hostname)
    pub hostname: String,

    /// State directory (`~/.claude-code-ui`)
    pub state_dir: PathBuf,

    /// Local log root (`~/.claude/projects`)
    pub local_log_root: PathBuf,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));

        Self {
            stream_port: env_u16("PORT", DEFAULT_STREAM_PORT),
            api_port: env_u16("API_PORT", DEFAULT_API_PORT),
            max_age: Duration::from_secs(
                env_u64("MAX_AGE_HOURS", DEFAULT_MAX_AGE_HOURS) * 3600,
            ),
            idle_timeout: Duration::from_secs(
                env_u64("IDLE_TIMEOUT_MINUTES", DEFAULT_IDLE_TIMEOUT_MINUTES) * 60,
            ),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok().filter(|v| !v.is_empty()),
            notifications_enabled: env_bool("NOTIFICATIONS_ENABLED", false),
            terminal: terminal_kind_from_env(),
            hostname: env::var("HOSTNAME")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(system_hostname),
            state_dir: home.join(".claude-code-ui"),
            local_log_root: home.join(".claude").join("projects"),
        }
    }

    /// Directory of the persisted session change stream.
    pub fn stream_dir(&self) -> PathBuf {
        self.state_dir.join("streams").join("sessions")
    }

    /// Directory that remote machine roots are mounted under.
    pub fn mounts_dir(&self) -> PathBuf {
        self.state_dir.join("mounts")
    }

    /// Path of the machine configuration file.
    pub fn machines_file(&self) -> PathBuf {
        self.state_dir.join("machines.json")
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(raw.as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn terminal_kind_from_env() -> TerminalKind {
    match env::var("TERMINAL").as_deref() {
        Ok("iterm2") => TerminalKind::Iterm2,
        Ok("none") => TerminalKind::None,
        Ok(other) => {
            warn!(value = other, "Unknown TERMINAL value, disabling host terminal");
            TerminalKind::None
        }
        // iTerm scripting only exists on macOS
        Err(_) if cfg!(target_os = "macos") => TerminalKind::Iterm2,
        Err(_) => TerminalKind::None,
    }
}

/// Reads the system hostname, falling back to "local".
fn system_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid, writable buffer of the length passed.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "local".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match buf.get(..end).map(std::str::from_utf8) {
        Some(Ok(name)) if !name.is_empty() => name.to_string(),
        _ => "local".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_STREAM_PORT, 4450);
        assert_eq!(DEFAULT_API_PORT, 4451);
        assert_eq!(DEFAULT_MAX_AGE_HOURS, 24);
        assert_eq!(DEFAULT_IDLE_TIMEOUT_MINUTES, 20);
    }

    #[test]
    fn test_system_hostname_nonempty() {
        assert!(!system_hostname().is_empty());
    }

    #[test]
    fn test_state_paths() {
        let config = Config {
            stream_port: DEFAULT_STREAM_PORT,
            api_port: DEFAULT_API_PORT,
            max_age: Duration::from_secs(24 * 3600),
            idle_timeout: Duration::from_secs(20 * 60),
            anthropic_api_key: None,
            notifications_enabled: false,
            terminal: TerminalKind::None,
            hostname: "local".to_string(),
            state_dir: PathBuf::from("/home/u/.claude-code-ui"),
            local_log_root: PathBuf::from("/home/u/.claude/projects"),
        };
        assert_eq!(
            config.stream_dir(),
            PathBuf::from("/home/u/.claude-code-ui/streams/sessions")
        );
        assert_eq!(
            config.machines_file(),
            PathBuf::from("/home/u/.claude-code-ui/machines.json")
        );
    }
}
