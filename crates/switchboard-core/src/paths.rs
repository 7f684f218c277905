use std::env;
use std::path::PathBuf;

/// Return the user's home directory.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Default location of `config.json`: `~/.config/switchboard`.
pub fn default_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var("XDG_CONFIG_HOME") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir).join("switchboard"));
        }
    }
    home_dir().map(|home| home.join(".config").join("switchboard"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        let previous: Vec<_> = vars
            .iter()
            .map(|(key, _)| (*key, env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }

        f();

        for (key, value) in previous {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }

    #[test]
    fn home_dir_prefers_home() {
        with_env(
            &[("HOME", Some("/tmp/home")), ("USERPROFILE", Some("/tmp/profile"))],
            || assert_eq!(home_dir(), Some(PathBuf::from("/tmp/home"))),
        );
    }

    #[test]
    fn home_dir_falls_back_to_userprofile() {
        with_env(&[("HOME", None), ("USERPROFILE", Some("/tmp/profile"))], || {
            assert_eq!(home_dir(), Some(PathBuf::from("/tmp/profile")))
        });
    }

    #[test]
    fn config_dir_uses_xdg_when_set() {
        with_env(
            &[("XDG_CONFIG_HOME", Some("/tmp/xdg")), ("HOME", Some("/tmp/home"))],
            || {
                assert_eq!(
                    default_config_dir(),
                    Some(PathBuf::from("/tmp/xdg/switchboard"))
                )
            },
        );
    }
}
