use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::llm::{LlmClient, LlmFuture};

/// Texts are cut to this many chars before scoring.
const MAX_SCORED_CHARS: usize = 512;

/// Polarity per text in [-1, 1]; negative means dissatisfied.
pub trait SentimentScorer: Send + Sync {
    fn score_batch<'a>(&'a self, texts: &'a [String]) -> LlmFuture<'a, Vec<f64>>;
}

pub struct LlmSentimentScorer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmSentimentScorer {
    pub fn new(llm: Arc<dyn LlmClient>, model: String) -> Self {
        Self { llm, model }
    }

    fn build_prompt(texts: &[String]) -> String {
        let numbered: Vec<String> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}", i + 1, t.chars().take(MAX_SCORED_CHARS).collect::<String>()))
            .collect();
        format!(
            "You score the sentiment of Korean consumer reviews.\n\
             For each numbered review below return a polarity score between -1.0 (very negative) \
             and 1.0 (very positive). Keep the input order.\n\
             Respond with JSON only: {{\"scores\": [number, ...]}} containing exactly {} numbers.\n\n{}",
            texts.len(),
            numbered.join("\n")
        )
    }

    async fn score(&self, texts: &[String]) -> Result<Vec<f64>, String> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let neutral = vec![0.0; texts.len()];
        let value = match self
            .llm
            .complete_json(&self.model, Self::build_prompt(texts))
            .await
        {
            Ok(v) => v,
            Err(err) => {
                warn!("[SENTIMENT] scoring failed, using neutral: {}", err);
                return Ok(neutral);
            }
        };
        match parse_scores(&value, texts.len()) {
            Some(scores) => Ok(scores),
            None => {
                warn!("[SENTIMENT] unexpected scores payload, using neutral");
                Ok(neutral)
            }
        }
    }
}

fn parse_scores(value: &Value, expected: usize) -> Option<Vec<f64>> {
    let items = value.get("scores")?.as_array()?;
    if items.len() != expected {
        return None;
    }
    Some(
        items
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0).clamp(-1.0, 1.0))
            .collect(),
    )
}

impl SentimentScorer for LlmSentimentScorer {
    fn score_batch<'a>(&'a self, texts: &'a [String]) -> LlmFuture<'a, Vec<f64>> {
        Box::pin(self.score(texts))
    }
}

#[cfg(test)]
pub mod testing {
    use super::SentimentScorer;
    use crate::services::llm::LlmFuture;

    /// Gives every text the same score.
    pub struct ConstantSentiment(pub f64);

    impl SentimentScorer for ConstantSentiment {
        fn score_batch<'a>(&'a self, texts: &'a [String]) -> LlmFuture<'a, Vec<f64>> {
            let scores = vec![self.0; texts.len()];
            Box::pin(async move { Ok(scores) })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::services::llm::testing::ScriptedLlm;

    #[tokio::test]
    async fn clamps_scores_and_degrades_to_neutral() {
        let llm = Arc::new(ScriptedLlm::json(vec![
            json!({"scores": [-3.0, 0.4]}),
            json!({"scores": [0.9]}),
        ]));
        let scorer = LlmSentimentScorer::new(llm.clone(), "gpt-4o-mini".into());
        let texts = vec!["불편해요".to_string(), "괜찮아요".to_string()];

        assert_eq!(scorer.score_batch(&texts).await.unwrap(), vec![-1.0, 0.4]);
        // length mismatch
        assert_eq!(scorer.score_batch(&texts).await.unwrap(), vec![0.0, 0.0]);
        // provider failure
        assert_eq!(scorer.score_batch(&texts).await.unwrap(), vec![0.0, 0.0]);
        assert!(llm.prompt(0).contains("exactly 2 numbers"));
    }

    #[tokio::test]
    async fn empty_batch_skips_the_provider() {
        let llm = Arc::new(ScriptedLlm::default());
        let scorer = LlmSentimentScorer::new(llm.clone(), "m".into());
        assert!(scorer.score_batch(&[]).await.unwrap().is_empty());
        assert_eq!(llm.request_count(), 0);
    }
}
