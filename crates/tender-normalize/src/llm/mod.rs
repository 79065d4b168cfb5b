//! LLM normalization path: prompt, completion call, response recovery, mapping.

pub mod client;
pub mod mapping;
pub mod prompt;
pub mod repair;
pub mod retry;

use std::time::Duration;

use tender_adapters::SourceAdapter;
use tender_core::{NormalizedTender, RawTenderRecord};
use tracing::debug;

use crate::error::{FieldWarning, LlmError};

pub use client::{CompletionClient, HttpCompletionClient, LlmConfig};
pub use mapping::{tender_from_json, MappedTender};
pub use prompt::build_prompt;
pub use repair::{recover_object, Recovered, RecoveryStage};
pub use retry::{BackoffPolicy, ThrottleConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct LlmOutcome {
    pub tender: NormalizedTender,
    pub stage: RecoveryStage,
    pub warnings: Vec<FieldWarning>,
}

pub async fn normalize_with_llm(
    client: &dyn CompletionClient,
    adapter: &dyn SourceAdapter,
    raw: &RawTenderRecord,
) -> Result<LlmOutcome, LlmError> {
    let prompt = build_prompt(raw, adapter.source_prompt());
    let completion = client.complete(&prompt).await?;
    let recovered = recover_object(&completion)?;
    debug!(
        source = adapter.source_table(),
        stage = ?recovered.stage,
        fields = recovered.fields.len(),
        "completion recovered"
    );
    let mapped = tender_from_json(&recovered.fields, adapter.profile());
    Ok(LlmOutcome {
        tender: mapped.tender,
        stage: recovered.stage,
        warnings: mapped.warnings,
    })
}

/// [`normalize_with_llm`] abandoned after `limit`.
pub async fn normalize_with_llm_timeout(
    client: &dyn CompletionClient,
    adapter: &dyn SourceAdapter,
    raw: &RawTenderRecord,
    limit: Duration,
) -> Result<LlmOutcome, LlmError> {
    tokio::time::timeout(limit, normalize_with_llm(client, adapter, raw))
        .await
        .unwrap_or(Err(LlmError::TimedOut(limit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tender_adapters::{ConfiguredAdapter, SourceProfile};
    use tender_core::TenderStatus;

    use crate::error::CompletionError;

    struct Scripted {
        reply: Result<&'static str, u16>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn replying(reply: &'static str) -> Self {
            Self {
                reply: Ok(reply),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            tokio::time::sleep(self.delay).await;
            match self.reply {
                Ok(text) => Ok(text.to_string()),
                Err(status) => Err(CompletionError::Quota {
                    status,
                    body: "insufficient_quota".into(),
                }),
            }
        }
    }

    fn adapter() -> ConfiguredAdapter {
        let mut profile = SourceProfile::named("ted_eu");
        profile.prompt_guidance = Some("Statuses are in French.".into());
        ConfiguredAdapter::new(profile)
    }

    fn raw() -> RawTenderRecord {
        RawTenderRecord::from_json(json!({"id": "7", "titre": "Fourniture de groupes électrogènes"})).unwrap()
    }

    #[tokio::test]
    async fn fenced_completion_is_recovered_and_mapped() {
        let client = Scripted::replying(
            "```json\n{\"title\": \"Fourniture de groupes électrogènes\", \"title_english\": \"Supply of generators\", \"status\": \"Open\"}\n```",
        );
        let outcome = normalize_with_llm(&client, &adapter(), &raw()).await.unwrap();
        assert_eq!(outcome.stage, RecoveryStage::FencedBlock);
        assert_eq!(outcome.tender.title_english.as_deref(), Some("Supply of generators"));
        assert_eq!(outcome.tender.status, Some(TenderStatus::Open));

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("Statuses are in French."));
        assert!(prompts[0].contains("groupes"));
    }

    #[tokio::test]
    async fn unrecoverable_completion_is_a_parse_failure() {
        let client = Scripted::replying("Sorry, I can't do that.");
        let err = normalize_with_llm(&client, &adapter(), &raw()).await.unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[tokio::test]
    async fn quota_errors_propagate_distinguishably() {
        let client = Scripted {
            reply: Err(429),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        };
        let err = normalize_with_llm(&client, &adapter(), &raw()).await.unwrap_err();
        assert!(err.is_quota());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_completion_is_abandoned() {
        let client = Scripted {
            reply: Ok("{\"title\": \"x\"}"),
            delay: Duration::from_secs(60),
            prompts: Mutex::new(Vec::new()),
        };
        let limit = Duration::from_secs(20);
        let err = normalize_with_llm_timeout(&client, &adapter(), &raw(), limit)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::TimedOut(d) if d == limit));
    }
}
