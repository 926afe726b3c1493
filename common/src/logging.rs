//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::{fs, io, path::Path};

/// Set up application-level logging using the log4rs configuration file at `config_file`.
/// If the file does not exist, `default_config` (an embedded log4rs YAML sample) is written
/// there first, with `{{log_dir}}` substituted by `log_dir`.
pub fn initialize_logging(config_file: &Path, log_dir: &Path, default_config: &str) -> bool {
    if !config_file.exists() {
        if let Err(e) = install_default_logfile_config(config_file, log_dir, default_config) {
            println!("Unable to install default logging configuration: {}", e);
            return false;
        }
    }
    if let Err(e) = log4rs::init_file(config_file, Default::default()) {
        println!("We couldn't load a logging configuration file. {}", e);
        return false;
    }
    true
}

/// Writes a default logfile configuration, rendered from the embedded sample, to the given path.
pub fn install_default_logfile_config(path: &Path, log_dir: &Path, default_config: &str) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let rendered = default_config.replace("{{log_dir}}", &log_dir.to_string_lossy());
    fs::write(path, rendered)
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "refresh_rate: 30 seconds\nappenders:\n  stdout:\n    kind: console\nroot:\n  level: info\n  appenders:\n    - stdout\n";

    #[test]
    fn install_substitutes_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/log4rs.yml");
        install_default_logfile_config(&path, Path::new("/var/log/lumen"), "dir: {{log_dir}}\n").unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "dir: /var/log/lumen\n");
    }

    #[test]
    fn install_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/log4rs.yml");
        install_default_logfile_config(&path, dir.path(), SAMPLE).unwrap();
        assert!(path.exists());
    }
}
