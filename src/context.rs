//! Local environment details for the agent's system prompt.
//!
//! The model picks better commands when it knows the OS, the shell that
//! will run them and where it is running.

use std::path::PathBuf;

/// Snapshot of the machine the agent operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Current working directory.
    pub cwd: PathBuf,
    /// Shell that will execute commands.
    pub shell: String,
    /// Operating system info (uname -a output).
    pub os: String,
    /// Linux distribution info (from /etc/os-release).
    pub distro: Option<String>,
}

/// Gather the environment for a run using `shell`.
pub fn gather_environment(shell: &str) -> Environment {
    Environment {
        cwd: get_cwd(),
        shell: shell.to_string(),
        os: get_os_info(),
        distro: get_distro_info(),
    }
}

fn get_cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Get OS information from uname.
fn get_os_info() -> String {
    #[cfg(unix)]
    {
        use std::process::Command;
        if let Ok(output) = Command::new("uname").arg("-a").output() {
            if output.status.success() {
                return String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
        }
    }

    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Get the distribution name, where one is available.
fn get_distro_info() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string("/etc/os-release") {
            return parse_pretty_name(&contents);
        }
    }

    #[cfg(target_os = "macos")]
    {
        use std::process::Command;
        if let Ok(output) = Command::new("sw_vers").arg("-productVersion").output() {
            if output.status.success() {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                return Some(format!("macOS {}", version));
            }
        }
    }

    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}
