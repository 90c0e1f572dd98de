use serde::{Deserialize, Serialize};

/// Seed attributes submitted from the form. Missing fields deserialize as
/// blank so partially filled drafts still load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeedInput {
    pub seed_name: String,
    pub price: String,
    pub strong_points: String,
    pub harvest_time: String,
    pub suitable_space: String,
    pub purchase_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_combos: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_image_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_keywords: Option<String>,
}

impl SeedInput {
    /// Names of required fields that are blank, in form order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("seedName", &self.seed_name),
            ("price", &self.price),
            ("strongPoints", &self.strong_points),
            ("harvestTime", &self.harvest_time),
            ("suitableSpace", &self.suitable_space),
            ("purchaseLink", &self.purchase_link),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn recommended_combos(&self) -> Option<&str> {
        non_blank(self.recommended_combos.as_deref())
    }

    pub fn custom_image_prompt(&self) -> Option<&str> {
        non_blank(self.custom_image_prompt.as_deref())
    }

    pub fn seo_keywords(&self) -> Option<&str> {
        non_blank(self.seo_keywords.as_deref())
    }
}

/// Result of one generation: the post text, the prompt used for the
/// illustration and, when available, the illustration itself as base64.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub post_content: String,
    pub image_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

impl GeneratedContent {
    pub fn has_image(&self) -> bool {
        self.image_base64.is_some()
    }

    /// Copy of this content without the image payload.
    pub fn without_image(&self) -> Self {
        Self {
            image_base64: None,
            ..self.clone()
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
