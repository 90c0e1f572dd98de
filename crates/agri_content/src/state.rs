use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    config::AppConfig,
    generator::{self, ContentGenerator},
    history::{BoundedHistoryStore, FileSubstrate, KvSubstrate},
    library::SavedPostStore,
};

#[derive(Clone)]
pub struct AppContext {
    config: Arc<AppConfig>,
    shutdown: Arc<Notify>,
    substrate: Arc<dyn KvSubstrate>,
    history: Arc<Mutex<BoundedHistoryStore>>,
    saved_posts: Arc<Mutex<SavedPostStore>>,
    generator: Arc<dyn ContentGenerator>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        generator: Arc<dyn ContentGenerator>,
        substrate: Arc<dyn KvSubstrate>,
    ) -> Self {
        let history =
            BoundedHistoryStore::open(config.history.storage_key.clone(), Arc::clone(&substrate));
        let saved_posts =
            SavedPostStore::open(config.history.saved_posts_key.clone(), Arc::clone(&substrate));

        Self {
            config: Arc::new(config),
            shutdown: Arc::new(Notify::new()),
            substrate,
            history: Arc::new(Mutex::new(history)),
            saved_posts: Arc::new(Mutex::new(saved_posts)),
            generator,
        }
    }

    /// Wire the configured generator and a file substrate under the data dir.
    pub fn from_app_config(config: AppConfig) -> anyhow::Result<Self> {
        let generator = generator::from_config(&config.generator)?;
        let substrate: Arc<dyn KvSubstrate> = Arc::new(FileSubstrate::new(
            config.storage_dir(),
            config.history.quota_bytes,
        ));
        Ok(Self::new(config, generator, substrate))
    }

    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    pub fn substrate(&self) -> Arc<dyn KvSubstrate> {
        Arc::clone(&self.substrate)
    }

    pub fn history(&self) -> Arc<Mutex<BoundedHistoryStore>> {
        Arc::clone(&self.history)
    }

    pub fn saved_posts(&self) -> Arc<Mutex<SavedPostStore>> {
        Arc::clone(&self.saved_posts)
    }

    pub fn generator(&self) -> Arc<dyn ContentGenerator> {
        Arc::clone(&self.generator)
    }

    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
