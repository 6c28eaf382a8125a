//! Shared utilities for integration testing.

use std::path::Path;

use tempfile::TempDir;
use template_server::config::{AdminConfig, ReloadConfig};
use template_server::lifecycle::Running;
use template_server::{App, ServerConfig};

pub const ADMIN_KEY: &str = "test-admin-key";

/// Write `(relative path, body)` pairs under `root`.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, body) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }
}

/// A template tree in a fresh temporary directory.
pub fn template_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path(), files);
    dir
}

/// Defaults for tests: ephemeral port, admin API on, manual reloads.
pub fn test_config(root: &Path) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.templates.root = root.to_path_buf();
    config.reload = ReloadConfig { watch: false, debounce_ms: 0 };
    config.admin = AdminConfig {
        enabled: true,
        api_key: ADMIN_KEY.to_string(),
    };
    config
}

/// Boot the server and return it with its base URL.
pub async fn start_server(config: ServerConfig) -> (Running, String) {
    let app = App::build(config).expect("app builds");
    let listener = app.bind().await.unwrap();
    let running = app.serve(listener, false).unwrap();
    let base = format!("http://{}", running.local_addr);
    (running, base)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
