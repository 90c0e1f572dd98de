use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::ensure_data_layout;

const GENERATOR_CONFIG: &str = "\
# local_stub works offline. Switch to `provider: gemini` and export
# GEMINI_API_KEY to call the hosted models.
provider: local_stub
";

const HISTORY_CONFIG: &str = "\
storage_key: agri_content_history
saved_posts_key: saved_posts
draft_key: agri_content_form_autosave
quota_bytes: 5242880
";

/// Write a baseline `config/` and `data/` layout under `target_root`.
///
/// The generator defaults to the offline stub so the server starts without
/// credentials. Existing config files are overwritten; stored data is left
/// alone.
pub fn install_default_config(target_root: &Path) -> Result<PathBuf> {
    let config_dir = target_root.join("config");
    fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config dir {:?}", config_dir))?;

    for (name, content) in [
        ("generator.yml", GENERATOR_CONFIG),
        ("history.yml", HISTORY_CONFIG),
    ] {
        let path = config_dir.join(name);
        fs::write(&path, content).with_context(|| format!("writing config file {:?}", path))?;
    }

    ensure_data_layout(&target_root.join("data"))?;
    Ok(target_root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeneratorProviderConfig, HistoryConfig, load_yaml};
    use tempfile::TempDir;

    #[test]
    fn install_writes_parseable_config() {
        let tmp = TempDir::new().expect("temp dir");
        let installed = install_default_config(tmp.path()).expect("install config");

        let generator: GeneratorProviderConfig =
            load_yaml(installed.join("config/generator.yml")).unwrap();
        assert_eq!(generator, GeneratorProviderConfig::LocalStub);

        let history: HistoryConfig = load_yaml(installed.join("config/history.yml")).unwrap();
        assert_eq!(history, HistoryConfig::default());
        assert!(installed.join("data/storage").is_dir());
    }

    #[test]
    fn install_keeps_stored_data() {
        let tmp = TempDir::new().expect("temp dir");
        let stored = tmp.path().join("data/storage/agri_content_history.json");
        fs::create_dir_all(stored.parent().unwrap()).unwrap();
        fs::write(&stored, "[]").unwrap();

        install_default_config(tmp.path()).expect("install config");
        assert_eq!(fs::read_to_string(stored).unwrap(), "[]");
    }
}
