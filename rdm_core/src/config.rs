//! Process-wide tunables, assembled in layered precedence: compiled-in
//! defaults, an optional TOML file in the platform config directory, then
//! `RDM_*` environment variables. A missing or corrupt config file is logged
//! and skipped — config never aborts startup, mirroring [`crate::history`]'s
//! tolerance for a corrupt snapshot.

use std::path::PathBuf;

use serde::Deserialize;

use crate::transport::ProxyInfo;

#[derive(Debug, Clone)]
pub struct Config {
    pub max_concurrent_downloads: usize,
    pub global_speed_limit_bps: u64,
    pub speed_limit_enabled: bool,
    pub proxy: Option<ProxyInfo>,
    pub download_dir: PathBuf,
    pub history_path: PathBuf,
    pub control_endpoint_addr: String,
    pub video_site_hosts: Vec<String>,
    pub video_helper_program: String,
    pub video_helper_args: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rdm");
        Self {
            max_concurrent_downloads: 3,
            global_speed_limit_bps: 0,
            speed_limit_enabled: false,
            proxy: None,
            download_dir: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rdm"),
            history_path: data_dir.join("download_history.json"),
            control_endpoint_addr: "127.0.0.1:8080".to_string(),
            video_site_hosts: vec![
                "youtube.com".to_string(),
                "www.youtube.com".to_string(),
                "youtu.be".to_string(),
                "vimeo.com".to_string(),
            ],
            video_helper_program: "yt-dlp".to_string(),
            video_helper_args: Vec::new(),
        }
    }
}

/// Mirrors [`Config`] but every field is optional — this is what actually
/// gets deserialized from the TOML file, so a partial file only overrides
/// the fields it names.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    max_concurrent_downloads: Option<usize>,
    global_speed_limit_bps: Option<u64>,
    speed_limit_enabled: Option<bool>,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    proxy_username: Option<String>,
    proxy_password: Option<String>,
    download_dir: Option<PathBuf>,
    history_path: Option<PathBuf>,
    control_endpoint_addr: Option<String>,
    video_site_hosts: Option<Vec<String>>,
    video_helper_program: Option<String>,
    video_helper_args: Option<Vec<String>>,
}

impl Config {
    /// Default path for the on-disk config file: `<config_dir>/rdm/config.toml`.
    pub fn default_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rdm").join("config.toml"))
    }

    /// Load layered config: defaults -> file (if present and parseable) -> env.
    pub fn load() -> Self {
        let mut config = Config::default();

        if let Some(path) = Self::default_file_path() {
            config.apply_file(&path);
        }

        config.apply_env();
        config
    }

    fn apply_file(&mut self, path: &PathBuf) {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                log::debug!("[config] no config file at {:?}: {}", path, e);
                return;
            }
        };
        let file: FileConfig = match toml::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("[config] malformed config file {:?}: {} — ignoring", path, e);
                return;
            }
        };

        if let Some(v) = file.max_concurrent_downloads {
            self.max_concurrent_downloads = v.max(1);
        }
        if let Some(v) = file.global_speed_limit_bps {
            self.global_speed_limit_bps = v;
        }
        if let Some(v) = file.speed_limit_enabled {
            self.speed_limit_enabled = v;
        }
        if let Some(host) = file.proxy_host {
            self.proxy = Some(ProxyInfo {
                host,
                port: file.proxy_port.unwrap_or(8080),
                username: file.proxy_username,
                password: file.proxy_password,
            });
        }
        if let Some(v) = file.download_dir {
            self.download_dir = v;
        }
        if let Some(v) = file.history_path {
            self.history_path = v;
        }
        if let Some(v) = file.control_endpoint_addr {
            self.control_endpoint_addr = v;
        }
        if let Some(v) = file.video_site_hosts {
            self.video_site_hosts = v;
        }
        if let Some(v) = file.video_helper_program {
            self.video_helper_program = v;
        }
        if let Some(v) = file.video_helper_args {
            self.video_helper_args = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("RDM_MAX_CONCURRENT") {
            if let Ok(n) = v.parse::<usize>() {
                self.max_concurrent_downloads = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("RDM_SPEED_LIMIT_BPS") {
            if let Ok(n) = v.parse::<u64>() {
                self.global_speed_limit_bps = n;
                self.speed_limit_enabled = n > 0;
            }
        }
        if let Ok(v) = std::env::var("RDM_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RDM_HISTORY_PATH") {
            self.history_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RDM_CONTROL_ADDR") {
            self.control_endpoint_addr = v;
        }
        if let Ok(v) = std::env::var("RDM_VIDEO_HELPER") {
            self.video_helper_program = v;
        }
    }
}
