#![forbid(unsafe_code)]

//! Runtime configuration: command-line overrides beat the process
//! environment, which beats the `.env` file, which beats the defaults.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::session::{DEFAULT_SESSION_CAPACITY, DEFAULT_SESSION_TTL};
use crate::transcode::DEFAULT_FFMPEG_BIN;
use crate::ytdlp::DEFAULT_YTDLP_BIN;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TUBEGRAB_PORT: u16 = 8080;
pub const DEFAULT_TUBEGRAB_HOST: &str = "127.0.0.1";
pub const DEFAULT_ENVIRONMENT: &str = "Development";

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: String,
    pub port: u16,
    /// Parent of every per-download workspace.
    pub work_dir: PathBuf,
    pub session_ttl: Duration,
    pub session_capacity: usize,
    pub ytdlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub cookies: Option<PathBuf>,
    /// Free-form label shown in the page footer (`ENV`).
    pub environment: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub work_dir: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_runtime_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeSettings {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("TUBEGRAB_HOST"))
        .unwrap_or_else(|| DEFAULT_TUBEGRAB_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("TUBEGRAB_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_TUBEGRAB_PORT);
    let work_dir = overrides
        .work_dir
        .or_else(|| lookup("TUBEGRAB_WORK_DIR").map(PathBuf::from))
        .unwrap_or_else(env::temp_dir);
    let session_ttl = lookup("TUBEGRAB_SESSION_TTL_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SESSION_TTL);
    let session_capacity = lookup("TUBEGRAB_SESSION_CAPACITY")
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|capacity| *capacity > 0)
        .unwrap_or(DEFAULT_SESSION_CAPACITY);
    let ytdlp_bin = lookup("TUBEGRAB_YTDLP_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));
    let ffmpeg_bin = lookup("TUBEGRAB_FFMPEG_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_BIN));
    let cookies = lookup("TUBEGRAB_COOKIES").map(PathBuf::from);
    let environment = lookup("ENV").unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

    RuntimeSettings {
        host,
        port,
        work_dir,
        session_ttl,
        session_capacity,
        ytdlp_bin,
        ffmpeg_bin,
        cookies,
        environment,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None)
    }

    #[test]
    fn empty_config_uses_defaults() {
        let settings = settings_from("");
        assert_eq!(settings.host, DEFAULT_TUBEGRAB_HOST);
        assert_eq!(settings.port, DEFAULT_TUBEGRAB_PORT);
        assert_eq!(settings.work_dir, env::temp_dir());
        assert_eq!(settings.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(settings.session_capacity, DEFAULT_SESSION_CAPACITY);
        assert_eq!(settings.ytdlp_bin, PathBuf::from("yt-dlp"));
        assert_eq!(settings.ffmpeg_bin, PathBuf::from("ffmpeg"));
        assert!(settings.cookies.is_none());
        assert_eq!(settings.environment, DEFAULT_ENVIRONMENT);
    }

    #[test]
    fn reads_every_key_from_file() {
        let settings = settings_from(
            "TUBEGRAB_HOST=\"0.0.0.0\"\nTUBEGRAB_PORT=\"4242\"\nTUBEGRAB_WORK_DIR=\"/srv/tmp\"\n\
             TUBEGRAB_SESSION_TTL_SECS=\"60\"\nTUBEGRAB_SESSION_CAPACITY=\"5\"\n\
             TUBEGRAB_YTDLP_BIN=\"/opt/yt-dlp\"\nTUBEGRAB_FFMPEG_BIN=\"/opt/ffmpeg\"\n\
             TUBEGRAB_COOKIES=\"/srv/cookies.txt\"\nENV=\"Production\"\n",
        );
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.port, 4242);
        assert_eq!(settings.work_dir, PathBuf::from("/srv/tmp"));
        assert_eq!(settings.session_ttl, Duration::from_secs(60));
        assert_eq!(settings.session_capacity, 5);
        assert_eq!(settings.ytdlp_bin, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(settings.ffmpeg_bin, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(settings.cookies, Some(PathBuf::from("/srv/cookies.txt")));
        assert_eq!(settings.environment, "Production");
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from(
            "TUBEGRAB_PORT=\"nope\"\nTUBEGRAB_SESSION_TTL_SECS=\"-1\"\nTUBEGRAB_SESSION_CAPACITY=\"0\"\n",
        );
        assert_eq!(settings.port, DEFAULT_TUBEGRAB_PORT);
        assert_eq!(settings.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(settings.session_capacity, DEFAULT_SESSION_CAPACITY);
    }

    #[test]
    fn env_beats_file() {
        let vars = read_env_file(make_config("TUBEGRAB_PORT=\"7000\"\n").path()).unwrap();
        let settings = build_runtime_settings(&vars, |key| {
            if key == "TUBEGRAB_PORT" {
                Some("9000".to_string())
            } else {
                None
            }
        });
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn overrides_beat_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("TUBEGRAB_HOST".to_string(), "file-host".to_string());
        vars.insert("TUBEGRAB_PORT".to_string(), "7000".to_string());
        vars.insert("TUBEGRAB_WORK_DIR".to_string(), "/file-work".to_string());

        let overrides = RuntimeOverrides {
            host: Some("override-host".into()),
            port: Some(9100),
            work_dir: None,
            env_path: None,
        };
        let settings = build_runtime_settings_with_overrides(
            &vars,
            |key| {
                if key == "TUBEGRAB_WORK_DIR" {
                    Some("/env-work".to_string())
                } else if key == "TUBEGRAB_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        );

        assert_eq!(settings.host, "override-host");
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.work_dir, PathBuf::from("/env-work"));
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let settings = build_runtime_settings_with_overrides(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(settings.host, DEFAULT_TUBEGRAB_HOST);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export TUBEGRAB_WORK_DIR="/work"
            ENV='Staging'
            TUBEGRAB_HOST =  "0.0.0.0"
            TUBEGRAB_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("TUBEGRAB_WORK_DIR").unwrap(), "/work");
        assert_eq!(vars.get("ENV").unwrap(), "Staging");
        assert_eq!(vars.get("TUBEGRAB_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("TUBEGRAB_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_runtime_settings_reads_given_env_file() {
        let cfg = make_config("TUBEGRAB_SESSION_CAPACITY=\"17\"\n");
        let settings = resolve_runtime_settings(RuntimeOverrides {
            env_path: Some(cfg.path().to_path_buf()),
            ..RuntimeOverrides::default()
        })
        .unwrap();
        assert_eq!(settings.session_capacity, 17);
    }
}
