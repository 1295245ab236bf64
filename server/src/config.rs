use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Pixelfield canvas server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "pixelfield-server", version, about = "Collaborative pixel canvas server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PIXELFIELD_PORT", default_value = "8000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PIXELFIELD_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./pixelfield.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PIXELFIELD_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "PIXELFIELD_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Minimum seconds between an actor's accepted pixel writes
    #[arg(long, env = "PIXELFIELD_COOLDOWN_SECS", default_value = "300")]
    pub cooldown_secs: u64,

    /// Canvas width in cells
    #[arg(long, env = "PIXELFIELD_FIELD_WIDTH", default_value = "64")]
    pub field_width: u32,

    /// Canvas height in cells
    #[arg(long, env = "PIXELFIELD_FIELD_HEIGHT", default_value = "64")]
    pub field_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./pixelfield.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            cooldown_secs: 300,
            field_width: 64,
            field_height: 64,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PIXELFIELD_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PIXELFIELD_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Pixelfield Server Configuration
# Place this file at ./pixelfield.toml or specify with --config <path>
# All settings can be overridden via environment variables (PIXELFIELD_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and token signing key
# data_dir = "./data"

# Minimum seconds between an actor's accepted pixel writes.
# Administrators can change this at runtime; the new value is not
# written back to this file.
# cooldown_secs = 300

# Canvas dimensions in cells. Changed at runtime by a game reset.
# field_width = 64
# field_height = 64
"#
    .to_string()
}

/// Runtime-mutable settings shared by the mutation service, the
/// registry handlers, and the router. The cooldown window and field
/// dimensions start from Config and are updated in-session by
/// administrators; each is read atomically (the dimensions as one pair).
#[derive(Debug)]
pub struct RuntimeSettings {
    cooldown_secs: AtomicU64,
    field_size: RwLock<(u32, u32)>,
}

impl RuntimeSettings {
    pub fn new(cooldown_secs: u64, width: u32, height: u32) -> Self {
        Self {
            cooldown_secs: AtomicU64::new(cooldown_secs),
            field_size: RwLock::new((width, height)),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cooldown_secs, config.field_width, config.field_height)
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs.load(Ordering::SeqCst)
    }

    pub fn set_cooldown_secs(&self, secs: u64) {
        self.cooldown_secs.store(secs, Ordering::SeqCst);
    }

    pub fn field_size(&self) -> (u32, u32) {
        *self.field_size.read().expect("field_size lock poisoned")
    }

    pub fn set_field_size(&self, width: u32, height: u32) {
        *self.field_size.write().expect("field_size lock poisoned") = (width, height);
    }

    /// Bounds check for cell coordinates against the current dimensions.
    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        let (w, h) = self.field_size();
        x >= 0 && y >= 0 && x < i64::from(w) && y < i64::from(h)
    }
}
