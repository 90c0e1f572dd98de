use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    history::{DEFAULT_HISTORY_KEY, DEFAULT_QUOTA_BYTES},
    library::{DEFAULT_DRAFT_KEY, DEFAULT_SAVED_POSTS_KEY},
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub history: HistoryConfig,
    pub server: ServerConfig,
    pub generator: GeneratorProviderConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HistoryConfig {
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default = "default_saved_posts_key")]
    pub saved_posts_key: String,
    #[serde(default = "default_draft_key")]
    pub draft_key: String,
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            saved_posts_key: default_saved_posts_key(),
            draft_key: default_draft_key(),
            quota_bytes: default_quota_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum GeneratorProviderConfig {
    LocalStub,
    Gemini {
        #[serde(default = "default_gemini_model")]
        model: String,
        #[serde(default = "default_gemini_image_model")]
        image_model: String,
        #[serde(default = "default_gemini_api_key_env")]
        api_key_env: String,
        #[serde(default)]
        base_url: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let root = match env::var("AGRI_APP_ROOT") {
            Ok(path) => PathBuf::from(path),
            Err(_) => env::current_dir()?,
        };
        let data_dir = root.join("data");
        let config_dir = root.join("config");
        let generator: GeneratorProviderConfig = load_yaml(config_dir.join("generator.yml"))?;
        let history = {
            let path = config_dir.join("history.yml");
            if path.exists() {
                load_yaml(path)?
            } else {
                HistoryConfig::default()
            }
        };

        ensure_data_layout(&data_dir)?;

        Ok(Self {
            data_dir,
            config_dir,
            history,
            generator,
            server: ServerConfig {
                bind_addr: env::var("AGRI_SERVER_BIND")
                    .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            },
        })
    }

    /// Directory backing the file substrate.
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join("storage")
    }
}

impl ServerConfig {
    pub fn addr(&self) -> &str {
        &self.bind_addr
    }
}

pub fn ensure_data_layout(data_dir: &Path) -> anyhow::Result<()> {
    let path = data_dir.join("storage");
    std::fs::create_dir_all(&path).with_context(|| format!("creating dir {:?}", path))?;
    Ok(())
}

pub fn load_yaml<T: DeserializeOwned>(path: PathBuf) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(&path).with_context(|| format!("reading yaml {:?}", path))?;
    let parsed =
        serde_yaml::from_str(&content).with_context(|| format!("parsing yaml {:?}", path))?;
    Ok(parsed)
}

fn default_storage_key() -> String {
    DEFAULT_HISTORY_KEY.to_string()
}

fn default_saved_posts_key() -> String {
    DEFAULT_SAVED_POSTS_KEY.to_string()
}

fn default_draft_key() -> String {
    DEFAULT_DRAFT_KEY.to_string()
}

fn default_quota_bytes() -> usize {
    DEFAULT_QUOTA_BYTES
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_gemini_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

fn default_gemini_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
