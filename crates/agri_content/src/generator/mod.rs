use std::{env, sync::Arc};

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::{
    config::GeneratorProviderConfig,
    content::{GeneratedContent, SeedInput},
};

const SYSTEM_INSTRUCTION: &str = "You are an agricultural marketing expert. Write in Vietnamese with a friendly, trustworthy tone and plenty of fitting emoji for plant lovers.";

/// Generates sales posts and their illustrations.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_post(&self, input: &SeedInput) -> anyhow::Result<GeneratedContent>;
    /// Render an illustration for `image_prompt`. `None` when the model
    /// returned no image.
    async fn regenerate_image(&self, image_prompt: &str) -> anyhow::Result<Option<String>>;
    fn identity(&self) -> GeneratorIdentity;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorIdentity {
    pub provider: &'static str,
    pub model: Option<String>,
}

impl GeneratorIdentity {
    pub fn new(provider: &'static str, model: Option<String>) -> Self {
        Self { provider, model }
    }
}

pub fn from_config(
    config: &GeneratorProviderConfig,
) -> anyhow::Result<Arc<dyn ContentGenerator>> {
    let generator: Arc<dyn ContentGenerator> = match config {
        GeneratorProviderConfig::LocalStub => Arc::new(LocalStubGenerator),
        GeneratorProviderConfig::Gemini {
            model,
            image_model,
            api_key_env,
            base_url,
        } => Arc::new(GeminiGenerator::from_env(
            api_key_env,
            model,
            image_model,
            base_url.clone(),
        )?),
    };
    Ok(generator)
}

/// Build the post brief sent to the text model.
pub fn build_post_prompt(input: &SeedInput) -> String {
    let mut prompt = String::from(
        "Create an eye-catching, shareable Facebook sales post for the following seed product:\n\n",
    );
    prompt.push_str(&format!("- Seed: {}\n", input.seed_name.trim()));
    prompt.push_str(&format!("- Price: {}\n", input.price.trim()));
    prompt.push_str(&format!("- Strong points: {}\n", input.strong_points.trim()));
    prompt.push_str(&format!("- Harvest time: {}\n", input.harvest_time.trim()));
    prompt.push_str(&format!("- Suitable space: {}\n", input.suitable_space.trim()));
    if let Some(combos) = input.recommended_combos() {
        prompt.push_str(&format!("- Recommended combos: {combos}\n"));
    }
    prompt.push_str(&format!("- Purchase link: {}\n", input.purchase_link.trim()));
    if let Some(keywords) = input.seo_keywords() {
        prompt.push_str(&format!("- SEO keywords to optimise for: {keywords}\n"));
    }
    if let Some(image) = input.custom_image_prompt() {
        prompt.push_str(&format!("- Illustration requirements: {image}\n"));
    }

    prompt.push_str("\nPost structure:\n");
    prompt.push_str("1. Attention-grabbing title with icons.\n");
    match input.seo_keywords() {
        Some(keywords) => prompt.push_str(&format!(
            "2. Persuasive sales copy that naturally weaves in: \"{keywords}\".\n"
        )),
        None => prompt.push_str("2. Persuasive sales copy.\n"),
    }
    prompt.push_str("3. Benefits of buying this seed.\n");
    prompt.push_str("4. Quick growing guide.\n");
    match input.recommended_combos() {
        Some(combos) => {
            prompt.push_str(&format!("5. Combo or offer focused on: \"{combos}\".\n"))
        }
        None => prompt.push_str(&format!(
            "5. Suggest companion plants that grow well with {}.\n",
            input.seed_name.trim()
        )),
    }
    prompt.push_str("6. Purchase link with a strong call to action.\n");
    prompt.push_str("7. Hashtags in Vietnamese and English.\n\n");
    prompt.push_str(
        "Also write an imagePrompt describing a realistic mature plant in natural light on a balcony or garden.",
    );
    if let Some(image) = input.custom_image_prompt() {
        prompt.push_str(&format!(" Blend in this requirement: \"{image}\"."));
    }
    prompt
}

/// Offline generator returning deterministic content.
#[derive(Debug, Default)]
pub struct LocalStubGenerator;

/// Base64 of a PNG signature; stands in for a rendered image.
pub const STUB_IMAGE_BASE64: &str = "iVBORw0KGgo=";

#[async_trait]
impl ContentGenerator for LocalStubGenerator {
    async fn generate_post(&self, input: &SeedInput) -> anyhow::Result<GeneratedContent> {
        let seed = input.seed_name.trim();
        if seed.is_empty() {
            bail!("stub generator requires a seed name");
        }

        let mut post = format!(
            "🌱 {} | {}\n\n{}\nHarvest in {}, perfect for {}.\n",
            seed.to_uppercase(),
            input.price.trim(),
            input.strong_points.trim(),
            input.harvest_time.trim(),
            input.suitable_space.trim(),
        );
        if let Some(combos) = input.recommended_combos() {
            post.push_str(&format!("Combo: {combos}\n"));
        }
        post.push_str(&format!("👉 {}\n", input.purchase_link.trim()));

        let mut image_prompt = format!("A healthy mature {seed} plant in natural light");
        if let Some(extra) = input.custom_image_prompt() {
            image_prompt.push_str(&format!(", {extra}"));
        }

        Ok(GeneratedContent {
            post_content: post,
            image_prompt,
            image_base64: Some(STUB_IMAGE_BASE64.to_string()),
        })
    }

    async fn regenerate_image(&self, image_prompt: &str) -> anyhow::Result<Option<String>> {
        if image_prompt.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(STUB_IMAGE_BASE64.to_string()))
    }

    fn identity(&self) -> GeneratorIdentity {
        GeneratorIdentity::new("local_stub", Some("local_stub".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    http: Client,
    model: String,
    image_model: String,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostPayload {
    #[serde(default)]
    post_content: String,
    #[serde(default)]
    image_prompt: String,
}

impl GeminiGenerator {
    pub fn from_env(
        api_key_env: &str,
        model: &str,
        image_model: &str,
        base_url: Option<String>,
    ) -> anyhow::Result<Self> {
        let api_key = env::var(api_key_env)
            .with_context(|| format!("reading Gemini api key from {api_key_env}"))?;
        Self::new(api_key, model, image_model, base_url)
    }

    pub fn new(
        api_key: String,
        model: &str,
        image_model: &str,
        base_url: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        let normalized_base = base_url
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: client,
            model: model.to_string(),
            image_model: image_model.to_string(),
            api_key,
            base_url: normalized_base,
        })
    }

    async fn generate_content(&self, model: &str, body: Value) -> anyhow::Result<Value> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| "sending request to Gemini")?
            .error_for_status()
            .with_context(|| "Gemini returned an error status")?;

        response
            .json()
            .await
            .with_context(|| "parsing Gemini response body")
    }
}

#[async_trait]
impl ContentGenerator for GeminiGenerator {
    async fn generate_post(&self, input: &SeedInput) -> anyhow::Result<GeneratedContent> {
        let prompt = build_post_prompt(input);
        let payload = self
            .generate_content(
                &self.model,
                json!({
                    "systemInstruction": {"parts": [{"text": SYSTEM_INSTRUCTION}]},
                    "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                    "generationConfig": {
                        "responseMimeType": "application/json",
                        "responseSchema": {
                            "type": "OBJECT",
                            "properties": {
                                "postContent": {
                                    "type": "STRING",
                                    "description": "The complete Facebook post: title, body, benefits, guide, combo, link and hashtags."
                                },
                                "imagePrompt": {
                                    "type": "STRING",
                                    "description": "A detailed prompt for a realistic marketing image of the plant."
                                }
                            },
                            "required": ["postContent", "imagePrompt"]
                        }
                    }
                }),
            )
            .await?;

        let text = candidate_text(&payload)
            .ok_or_else(|| anyhow!("missing text content in Gemini response"))?;
        let post: PostPayload = serde_json::from_str(&text)
            .with_context(|| format!("parsing generated post payload: {text}"))?;
        if post.post_content.trim().is_empty() || post.image_prompt.trim().is_empty() {
            bail!("Gemini response is missing postContent or imagePrompt");
        }

        let image_base64 = match self.regenerate_image(&post.image_prompt).await {
            Ok(image) => image,
            Err(err) => {
                warn!(error = ?err, "image generation failed; returning text only");
                None
            }
        };

        Ok(GeneratedContent {
            post_content: post.post_content,
            image_prompt: post.image_prompt,
            image_base64,
        })
    }

    async fn regenerate_image(&self, image_prompt: &str) -> anyhow::Result<Option<String>> {
        let payload = self
            .generate_content(
                &self.image_model,
                json!({
                    "contents": [{"role": "user", "parts": [{"text": image_prompt}]}],
                    "generationConfig": {
                        "responseModalities": ["TEXT", "IMAGE"],
                        "imageConfig": {"aspectRatio": "1:1"}
                    }
                }),
            )
            .await?;

        Ok(candidate_parts(&payload)
            .into_iter()
            .flatten()
            .find_map(|part| part.get("inlineData")?.get("data")?.as_str())
            .map(str::to_string))
    }

    fn identity(&self) -> GeneratorIdentity {
        GeneratorIdentity::new("gemini", Some(self.model.clone()))
    }
}

fn candidate_parts(payload: &Value) -> Option<&Vec<Value>> {
    payload
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()
}

fn candidate_text(payload: &Value) -> Option<String> {
    let text: String = candidate_parts(payload)?
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() { None } else { Some(text) }
}
