//! Summarization and rewriting
//!
//! Each style maps to a fixed output-type selector for provisioned backends
//! and to a fixed prompt template for system-managed ones. Adapters make
//! their own capability ready (probing and downloading as needed) and never
//! touch the chat session.

use std::sync::Arc;

use crate::backend::{InferenceRequest, Lifecycle, OutputType, PromptRequest};
use crate::capability::CapabilityRuntime;
use crate::coordinator::GenerationCoordinator;
use crate::error::{AiError, Result};
use crate::types::{GenerateOptions, RewriteStyle, SummarizeOptions, SummarizeStyle};

/// Selector used for a summary style on provisioned backends
pub fn summary_output_type(style: SummarizeStyle) -> OutputType {
    match style {
        SummarizeStyle::Concise => OutputType::OneBullet,
        SummarizeStyle::Bullets => OutputType::ThreeBullets,
        SummarizeStyle::Headline => OutputType::Headline,
    }
}

/// Prompt used for a summary style on system-managed backends
pub fn summary_prompt(style: SummarizeStyle, text: &str) -> String {
    let task = match style {
        SummarizeStyle::Concise => {
            "Summarize the following text in a concise manner (2-3 sentences). Output only the summary"
        }
        SummarizeStyle::Bullets => {
            "Summarize the following text as 3 bullet points. Output only the bullet points"
        }
        SummarizeStyle::Headline => {
            "Create a short headline (under 10 words) summarizing the following text. Output only the headline"
        }
    };
    format!("{}:\n\n{}", task, text)
}

/// Selector used for a rewrite style on provisioned backends
pub fn rewrite_output_type(style: RewriteStyle) -> OutputType {
    match style {
        RewriteStyle::Professional => OutputType::Professional,
        RewriteStyle::Friendly => OutputType::Friendly,
        RewriteStyle::Shorter => OutputType::Shorten,
        RewriteStyle::Longer => OutputType::Elaborate,
        RewriteStyle::Rephrase => OutputType::Rephrase,
    }
}

/// Prompt used for a rewrite style on system-managed backends
pub fn rewrite_prompt(style: RewriteStyle, text: &str) -> String {
    let instruction = match style {
        RewriteStyle::Professional => "in a professional, formal tone",
        RewriteStyle::Friendly => "in a friendly, casual tone",
        RewriteStyle::Shorter => "to be more concise while keeping the meaning",
        RewriteStyle::Longer => "to be more detailed and elaborate",
        RewriteStyle::Rephrase => "using different words while keeping the same meaning",
    };
    format!(
        "Rewrite the following text {}. Output only the rewritten text:\n\n{}",
        instruction, text
    )
}

/// Produces summaries on the summarize capability
pub struct Summarizer {
    runtime: Arc<CapabilityRuntime>,
    temperature: f32,
}

impl Summarizer {
    pub fn new(runtime: Arc<CapabilityRuntime>, temperature: f32) -> Self {
        Self {
            runtime,
            temperature,
        }
    }

    pub fn runtime(&self) -> &Arc<CapabilityRuntime> {
        &self.runtime
    }

    pub async fn summarize(&self, text: &str, options: &SummarizeOptions) -> Result<String> {
        let style = options.style.unwrap_or_default();
        self.runtime.ensure_ready().await?;

        let backend = self.runtime.backend();
        match backend.lifecycle() {
            Lifecycle::Provisioned => {
                let request = InferenceRequest {
                    text: text.to_string(),
                    output_type: summary_output_type(style),
                };
                backend
                    .run_inference(&request)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| AiError::generation("No summary generated"))
            }
            Lifecycle::Implicit => {
                let request = PromptRequest {
                    instructions: None,
                    prompt: summary_prompt(style, text),
                    params: GenerateOptions::with_temperature(self.temperature)
                        .resolve(self.temperature, backend.default_max_tokens()),
                };
                GenerationCoordinator::respond_once(backend.as_ref(), &request).await
            }
        }
    }
}

/// Rewrites text on the rewrite capability
pub struct Rewriter {
    runtime: Arc<CapabilityRuntime>,
    temperature: f32,
}

impl Rewriter {
    pub fn new(runtime: Arc<CapabilityRuntime>, temperature: f32) -> Self {
        Self {
            runtime,
            temperature,
        }
    }

    pub fn runtime(&self) -> &Arc<CapabilityRuntime> {
        &self.runtime
    }

    /// Rewrite `text`; a backend that returns no candidate yields the input
    pub async fn rewrite(&self, text: &str, style: RewriteStyle) -> Result<String> {
        self.runtime.ensure_ready().await?;

        let backend = self.runtime.backend();
        match backend.lifecycle() {
            Lifecycle::Provisioned => {
                let request = InferenceRequest {
                    text: text.to_string(),
                    output_type: rewrite_output_type(style),
                };
                let candidates = backend.run_inference(&request).await?;
                Ok(candidates
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| text.to_string()))
            }
            Lifecycle::Implicit => {
                let request = PromptRequest {
                    instructions: None,
                    prompt: rewrite_prompt(style, text),
                    params: GenerateOptions::default()
                        .resolve(self.temperature, backend.default_max_tokens()),
                };
                GenerationCoordinator::respond_once(backend.as_ref(), &request).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::{StubFeatureClient, StubSystemModel};
    use crate::backend::{ImplicitModel, ProvisionedModel};
    use crate::config::ClientConfig;
    use crate::constants::{defaults, feature_status};
    use crate::types::{Capability, UnavailableReason};

    const TEXT: &str = "Hey team, just a reminder that the quarterly planning meeting moved to Thursday afternoon in room four.";

    fn runtime(capability: Capability, client: Arc<StubFeatureClient>) -> Arc<CapabilityRuntime> {
        Arc::new(CapabilityRuntime::new(
            capability,
            Arc::new(ProvisionedModel::new(client)),
            &ClientConfig::default(),
        ))
    }

    fn rewriter(client: Arc<StubFeatureClient>) -> Rewriter {
        Rewriter::new(runtime(Capability::Rewrite, client), defaults::TEMPERATURE)
    }

    #[tokio::test]
    async fn test_summary_styles_select_different_outputs() {
        let client = Arc::new(StubFeatureClient::new());
        let summarizer = Summarizer::new(
            runtime(Capability::Summarize, client.clone()),
            defaults::SUMMARIZE_TEMPERATURE,
        );

        summarizer
            .summarize(TEXT, &SummarizeOptions::style(SummarizeStyle::Bullets))
            .await
            .unwrap();
        summarizer
            .summarize(TEXT, &SummarizeOptions::style(SummarizeStyle::Headline))
            .await
            .unwrap();
        summarizer
            .summarize(TEXT, &SummarizeOptions::default())
            .await
            .unwrap();

        assert_eq!(
            client.selectors(),
            vec![
                OutputType::ThreeBullets,
                OutputType::Headline,
                OutputType::OneBullet
            ]
        );
    }

    #[tokio::test]
    async fn test_shorter_rewrite_is_shorter() {
        let client = Arc::new(StubFeatureClient::new());
        let rewriter = rewriter(client.clone());

        let output = rewriter.rewrite(TEXT, RewriteStyle::Shorter).await.unwrap();
        assert!(output.len() < TEXT.len());
        assert_eq!(client.selectors(), vec![OutputType::Shorten]);
    }

    #[tokio::test]
    async fn test_unknown_rewrite_style_is_rephrase() {
        let client = Arc::new(StubFeatureClient::new());
        let rewriter = rewriter(client.clone());

        let bogus = rewriter
            .rewrite(TEXT, RewriteStyle::from("bogus"))
            .await
            .unwrap();
        let rephrase = rewriter.rewrite(TEXT, RewriteStyle::Rephrase).await.unwrap();

        assert_eq!(bogus, rephrase);
        assert_eq!(
            client.selectors(),
            vec![OutputType::Rephrase, OutputType::Rephrase]
        );
    }

    #[tokio::test]
    async fn test_rewrite_falls_back_to_input() {
        let client = Arc::new(StubFeatureClient::new().with_inference_output(Vec::new()));
        let output = rewriter(client)
            .rewrite(TEXT, RewriteStyle::Friendly)
            .await
            .unwrap();
        assert_eq!(output, TEXT);
    }

    #[tokio::test]
    async fn test_empty_summary_is_an_error() {
        let client = Arc::new(StubFeatureClient::new().with_inference_output(Vec::new()));
        let summarizer = Summarizer::new(runtime(Capability::Summarize, client), 0.3);
        assert!(matches!(
            summarizer.summarize(TEXT, &SummarizeOptions::default()).await,
            Err(AiError::GenerationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_downloadable_model_is_provisioned_first() {
        let client = Arc::new(StubFeatureClient::new().with_status(feature_status::DOWNLOADABLE));
        let output = rewriter(client.clone())
            .rewrite(TEXT, RewriteStyle::Professional)
            .await
            .unwrap();

        assert!(output.starts_with("Professional"));
        assert_eq!(client.download_count(), 1);
        assert_eq!(client.status(), feature_status::AVAILABLE);
    }

    #[tokio::test]
    async fn test_unavailable_model_is_rejected() {
        let client = Arc::new(StubFeatureClient::new().with_status(feature_status::UNAVAILABLE));
        assert_eq!(
            rewriter(client).rewrite(TEXT, RewriteStyle::Rephrase).await,
            Err(AiError::ModelUnavailable(UnavailableReason::DeviceNotSupported))
        );
    }

    #[tokio::test]
    async fn test_missing_context_is_reported() {
        let client = Arc::new(StubFeatureClient::new().without_context());
        assert_eq!(
            rewriter(client).rewrite(TEXT, RewriteStyle::Rephrase).await,
            Err(AiError::ContextUnavailable)
        );
    }

    #[tokio::test]
    async fn test_implicit_path_uses_templates() {
        let model = Arc::new(StubSystemModel::new().with_response("- one\n- two\n- three"));
        let summarizer = Summarizer::new(
            Arc::new(CapabilityRuntime::new(
                Capability::Summarize,
                Arc::new(ImplicitModel::new(model.clone())),
                &ClientConfig::default(),
            )),
            defaults::SUMMARIZE_TEMPERATURE,
        );

        let summary = summarizer
            .summarize(TEXT, &SummarizeOptions::style(SummarizeStyle::Bullets))
            .await
            .unwrap();
        assert_eq!(summary, "- one\n- two\n- three");

        let recorded = &model.prompts()[0];
        assert_eq!(recorded.instructions, None);
        assert!(recorded.prompt.starts_with("Summarize the following text as 3 bullet points"));
        assert!(recorded.prompt.ends_with(TEXT));
        assert_eq!(recorded.params.temperature, 0.3);
    }

    #[test]
    fn test_rewrite_prompt_template() {
        assert_eq!(
            rewrite_prompt(RewriteStyle::Shorter, "abc"),
            "Rewrite the following text to be more concise while keeping the meaning. Output only the rewritten text:\n\nabc"
        );
    }
}
