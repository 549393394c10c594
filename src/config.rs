// Filesystem location the store reads and writes its header files under.
// Loading a config file is out of scope here; callers resolve their own
// directory (from a config file, CLI flag, or default) and hand it to
// `StoreConfig::at`.

pub const DEFAULT_DATA_DIR: &str = ".headerchain/mainnet";

pub struct StoreConfig {
    pub headers_dir: std::path::PathBuf,
}

impl StoreConfig {
    pub fn at<P: Into<std::path::PathBuf>>(headers_dir: P) -> Self {
        StoreConfig {
            headers_dir: headers_dir.into(),
        }
    }

    pub fn resolve_default() -> Self {
        StoreConfig {
            headers_dir: default_data_dir(),
        }
    }
}

pub fn default_data_dir() -> std::path::PathBuf {
    std::path::PathBuf::from(resolve_home_dir()).join(DEFAULT_DATA_DIR)
}

fn resolve_home_dir() -> String {
    if let Ok(home) = std::env::var("HOME") {
        if !home.trim().is_empty() {
            return home;
        }
    }
    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            if !home.trim().is_empty() {
                return home;
            }
        }
        let drive = std::env::var("HOMEDRIVE").unwrap_or_default();
        let path = std::env::var("HOMEPATH").unwrap_or_default();
        if !drive.is_empty() || !path.is_empty() {
            return format!("{drive}{path}");
        }
    }
    ".".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_uses_given_path() {
        let cfg = StoreConfig::at("/tmp/somewhere");
        assert_eq!(cfg.headers_dir, std::path::PathBuf::from("/tmp/somewhere"));
    }

    #[test]
    fn default_dir_ends_with_data_dir_name() {
        let dir = default_data_dir();
        assert!(dir.ends_with(".headerchain/mainnet"));
    }
}
