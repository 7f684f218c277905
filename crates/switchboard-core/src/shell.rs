//! Platform-aware engine command construction.
//!
//! On Unix the engine runs inside the user's login shell so PATH and the
//! rest of the environment match an interactive terminal:
//!
//! ```text
//! $SHELL -l -c 'exec /path/to/claude -p ...'
//! ```
//!
//! `exec` makes the engine replace the shell, so the pid we signal on cancel
//! is the engine itself. Non-POSIX shells (fish, nushell, ...) fall back to
//! bash or sh.
//!
//! On Windows the binary is launched directly with console creation
//! suppressed.

use std::path::Path;

use tokio::process::Command;

use crate::error::{CoreError, Result};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Prepend the binary's directory to PATH so sibling tools (node, etc.) resolve.
pub fn prepare_path_env(cmd: &mut Command, binary_path: &Path) {
    let Some(dir) = binary_path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return;
    };
    let mut paths = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    if let Ok(joined) = std::env::join_paths(paths) {
        cmd.env("PATH", joined);
    }
}

/// Keep a child from opening a console window. No-op off Windows.
pub fn hide_console(cmd: &mut Command) {
    #[cfg(windows)]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(windows))]
    {
        let _ = cmd;
    }
}

/// Build a command that runs `binary_path args...` in a login shell.
///
/// `shell_prefix` overrides the default `$SHELL -l -c`, e.g. `/bin/sh -c`.
#[cfg(unix)]
pub fn build_login_shell_command(
    binary_path: &Path,
    args: &[String],
    working_dir: Option<&Path>,
    shell_prefix: Option<&str>,
) -> Result<Command> {
    let prefix = get_shell_prefix(shell_prefix);
    let prefix_parts: Vec<&str> = prefix.split_whitespace().collect();
    let Some((shell_program, shell_args)) = prefix_parts.split_first() else {
        return Err(CoreError::Command("empty shell prefix".to_string()));
    };

    let binary = binary_path
        .to_str()
        .ok_or_else(|| CoreError::Command(format!("non UTF-8 path: {}", binary_path.display())))?;

    let mut command_parts = Vec::with_capacity(args.len() + 2);
    command_parts.push("exec".to_string());
    command_parts.push(
        shlex::try_quote(binary)
            .map_err(|_| CoreError::Command(format!("invalid path: {binary}")))?
            .into_owned(),
    );
    for arg in args {
        command_parts.push(
            shlex::try_quote(arg)
                .map_err(|_| CoreError::Command(format!("invalid argument: {arg}")))?
                .into_owned(),
        );
    }

    let mut cmd = Command::new(shell_program);
    cmd.args(shell_args).arg(command_parts.join(" "));
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    prepare_path_env(&mut cmd, binary_path);
    Ok(cmd)
}

/// Windows: no login shell; launch directly without a console window.
#[cfg(windows)]
pub fn build_login_shell_command(
    binary_path: &Path,
    args: &[String],
    working_dir: Option<&Path>,
    _shell_prefix: Option<&str>,
) -> Result<Command> {
    let mut cmd = Command::new(binary_path);
    cmd.args(args);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    prepare_path_env(&mut cmd, binary_path);
    hide_console(&mut cmd);
    Ok(cmd)
}

#[cfg(unix)]
fn get_shell_prefix(custom_prefix: Option<&str>) -> String {
    if let Some(prefix) = custom_prefix.filter(|p| !p.trim().is_empty()) {
        return prefix.to_string();
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let shell_name = Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let non_posix = ["fish", "nu", "nushell", "elvish", "xonsh", "ion"];
    let effective_shell = if non_posix.contains(&shell_name) {
        if Path::new("/bin/bash").exists() {
            "/bin/bash"
        } else {
            "/bin/sh"
        }
    } else {
        &shell
    };

    format!("{} -l -c", effective_shell)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn custom_prefix_is_used_verbatim() {
        assert_eq!(get_shell_prefix(Some("/bin/zsh -l -c")), "/bin/zsh -l -c");
        assert_eq!(get_shell_prefix(Some("/usr/bin/bash -c")), "/usr/bin/bash -c");
    }

    #[test]
    #[cfg(unix)]
    fn blank_prefix_falls_back_to_login_shell() {
        assert!(get_shell_prefix(Some("  ")).ends_with(" -l -c"));
        assert!(get_shell_prefix(None).ends_with(" -l -c"));
    }

    #[test]
    #[cfg(unix)]
    fn wraps_quoted_command_with_exec() {
        let cmd = build_login_shell_command(
            Path::new("/path/with spaces/claude"),
            &["-p".to_string(), "what's up".to_string()],
            None,
            Some("/bin/sh -c"),
        )
        .unwrap();
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program().to_str().unwrap(), "/bin/sh");

        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_str().unwrap().to_string())
            .collect();
        assert_eq!(args[0], "-c");
        assert!(args[1].starts_with("exec '/path/with spaces/claude' -p "));
        assert_eq!(shlex::split(&args[1]).unwrap()[3], "what's up");
    }

    #[test]
    fn path_env_starts_with_binary_dir() {
        let mut cmd = Command::new("true");
        prepare_path_env(&mut cmd, Path::new("/opt/engines/bin/claude"));
        let path = cmd
            .as_std()
            .get_envs()
            .find(|(k, _)| *k == "PATH")
            .and_then(|(_, v)| v)
            .map(|v| v.to_os_string())
            .unwrap();
        let first = std::env::split_paths(&path).next().unwrap();
        assert_eq!(first, Path::new("/opt/engines/bin"));
    }

    #[test]
    fn bare_binary_name_leaves_path_alone() {
        let mut cmd = Command::new("true");
        prepare_path_env(&mut cmd, Path::new("claude"));
        assert!(cmd.as_std().get_envs().next().is_none());
    }
}
