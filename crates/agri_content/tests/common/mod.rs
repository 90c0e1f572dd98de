use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Value, json};

pub fn install_config(root: &Path, quota_bytes: Option<usize>) -> Result<PathBuf> {
    let installed = agri_content::fixtures::install_default_config(root)?;
    if let Some(quota) = quota_bytes {
        fs::write(
            installed.join("config/history.yml"),
            format!("quota_bytes: {quota}\n"),
        )?;
    }
    Ok(installed)
}

pub fn seed_payload(name: &str) -> Value {
    json!({
        "seedName": name,
        "price": "25.000đ / gói",
        "strongPoints": "Trái ngọt, sai quả",
        "harvestTime": "60-70 ngày",
        "suitableSpace": "Ban công, sân thượng",
        "purchaseLink": "https://shop.example/hat-giong",
    })
}
