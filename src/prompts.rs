use crate::config::AppConfig;
use crate::models::Market;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("failed to read {path}: {source}")]
pub struct PromptError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
}

/// Prompt material loaded once at startup and passed by reference into the
/// generation client. Both templates are required; the style-reference
/// image is optional and only steers image generation when present.
#[derive(Debug, Clone)]
pub struct PromptSet {
    image_template: String,
    description_system: String,
    style_reference: Option<Vec<u8>>,
}

impl PromptSet {
    pub fn load(config: &AppConfig) -> Result<Self, PromptError> {
        let image_template = read_text(&config.image_prompt_path)?;
        let description_system = read_text(&config.description_prompt_path)?;
        let style_reference = match std::fs::read(&config.style_image_path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(
                    target = "gamma.prompts",
                    path = %config.style_image_path.display(),
                    error = %err,
                    "style reference image unavailable, generating without it"
                );
                None
            }
        };
        Ok(Self {
            image_template,
            description_system,
            style_reference,
        })
    }

    pub fn image_prompt(&self, market: &Market) -> String {
        self.image_template
            .replace("{{MARKET_QUESTION}}", &market.question)
            .replace("{{MARKET_DESCRIPTION}}", &market.description)
    }

    pub fn description_system(&self) -> &str {
        &self.description_system
    }

    pub fn style_reference(&self) -> Option<&[u8]> {
        self.style_reference.as_deref()
    }
}

fn read_text(path: &Path) -> Result<String, PromptError> {
    std::fs::read_to_string(path).map_err(|source| PromptError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawMarket;

    fn sample_market() -> Market {
        Market::decode(RawMarket {
            id: "7".into(),
            question: "Will the launch slip?".into(),
            description: "Resolves yes if the window moves.".into(),
            volume: "60000".into(),
            events: vec![],
            outcomes: r#"["Yes","No"]"#.into(),
            outcome_prices: r#"["0.5","0.5"]"#.into(),
        })
        .expect("sample market decodes")
    }

    #[test]
    fn image_prompt_substitutes_both_placeholders() {
        let prompts = PromptSet {
            image_template: "Cover art for {{MARKET_QUESTION}} ({{MARKET_DESCRIPTION}})".into(),
            description_system: "You write market blurbs.".into(),
            style_reference: None,
        };
        let rendered = prompts.image_prompt(&sample_market());
        assert_eq!(
            rendered,
            "Cover art for Will the launch slip? (Resolves yes if the window moves.)"
        );
    }

    #[test]
    fn image_prompt_leaves_unknown_placeholders_alone() {
        let prompts = PromptSet {
            image_template: "{{MARKET_QUESTION}} {{STYLE}}".into(),
            description_system: String::new(),
            style_reference: None,
        };
        assert_eq!(
            prompts.image_prompt(&sample_market()),
            "Will the launch slip? {{STYLE}}"
        );
    }
}
