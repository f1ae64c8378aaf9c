use std::collections::{HashMap, HashSet};

use chrono::Local;
use futures::stream::{self, StreamExt};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::product_context::{fetch_product_context, normalize_product_type};
use super::{optional_string, required_string, ToolContext};
use crate::mining::round_to;
use crate::models::workspace::{RetrievedData, VocDocument, Workspace};
use crate::services::embedding::embed_query;
use crate::services::vector_store::{Filter, Payload, SearchRequest};
use crate::utils::date_range::{parse_natural_date, to_timestamp_bounds};

pub const WEB_COLLECTION: &str = "web_data";

/// Product lines recognised inside a search keyword.
pub const PRODUCT_KEYWORDS: [&str; 11] = [
    "스타일러",
    "트롬",
    "휘센",
    "퓨리케어",
    "디오스",
    "그램",
    "올레드",
    "코드제로",
    "틔운",
    "시네빔",
    "울트라기어",
];

const RRF_K: f64 = 60.0;
const TOP_K: usize = 50;
const SCORE_THRESHOLD: f32 = 0.5;
const SUMMARY_MIN_CHARS: usize = 150;
const SUMMARY_CONCURRENCY: usize = 4;

pub fn detect_product_type(keyword: &str) -> Option<&'static str> {
    PRODUCT_KEYWORDS.iter().copied().find(|p| keyword.contains(p))
}

pub async fn run_data_retriever(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let keyword = required_string(args, "keyword")?;
    let date_text = optional_string(args, "date_range");
    let product_type = normalize_product_type(optional_string(args, "product_type"))
        .or_else(|| detect_product_type(&keyword).map(str::to_string));

    let range = date_text
        .as_deref()
        .and_then(|text| parse_natural_date(text, Local::now().date_naive()));
    if let (Some(text), None) = (&date_text, range) {
        warn!("[RETRIEVER] unrecognised date range '{}', searching all dates", text);
    }
    let bounds = range.and_then(to_timestamp_bounds);

    let keywords = expand_keywords(ctx, &keyword, product_type.as_deref()).await;
    info!(
        "[RETRIEVER] keyword='{}' product_type={:?} expansions={}",
        keyword,
        product_type,
        keywords.len()
    );

    let web_results = rrf_search(ctx, &keywords, bounds).await?;
    let product_results = fetch_product_context(ctx, &keyword, product_type.as_deref(), 10).await;
    info!(
        "[RETRIEVER] {} VOC documents, {} product documents",
        web_results.len(),
        product_results.len()
    );

    let preview: Vec<&str> = web_results.iter().take(3).map(|d| d.text.as_str()).collect();
    let payload = json!({
        "query": keyword,
        "expanded_keywords": keywords,
        "voc_count": web_results.len(),
        "product_results": product_results.len(),
        "product_type": product_type,
        "date_range": range.map(|(start, end)| format!("{start} ~ {end}")),
        "preview": preview,
    });

    let artifacts = &mut ws.artifacts;
    artifacts.retrieved_data = Some(RetrievedData {
        query: keyword,
        web_results,
        product_results,
        product_type: product_type.clone(),
        date_range: date_text,
    });
    artifacts.product_type = product_type;
    artifacts.reset_corpus_analysis();

    Ok(payload)
}

/// Consumer-style rephrasings of `keyword`, original first, without duplicates.
/// Falls back to the bare keyword when the LLM is unavailable.
pub async fn expand_keywords(ctx: &ToolContext, keyword: &str, product_type: Option<&str>) -> Vec<String> {
    let product_line = product_type
        .map(|p| format!("Product category: {p}. Reflect this context in every sentence.\n"))
        .unwrap_or_default();
    let prompt = format!(
        "You understand both consumer language and product terminology.\n\
         Write 10 to 12 Korean sentences that consumers might post about the feature keyword \"{keyword}\".\n\
         {product_line}\
         ### 1. Situations, experiences and needs (5-6 sentences)\n\
         - Do not use the word \"{keyword}\" itself.\n\
         - Describe the situation where the feature is needed, the inconvenience, or the value sought.\n\
         ### 2. Other words for the keyword (4-5 sentences)\n\
         - Use synonyms or marketing and technical terms that carry the same value as \"{keyword}\".\n\
         Avoid plain praise. Sound like real reviews or community posts.\n\
         Output a list with one sentence per line."
    );

    match ctx.llm.complete_text(&ctx.models.tool, prompt, 0.7).await {
        Ok(text) => {
            let mut seen = HashSet::new();
            std::iter::once(keyword.to_string())
                .chain(
                    text.lines()
                        .filter(|line| !line.trim().is_empty() && !line.contains("###"))
                        .map(|line| line.trim().trim_matches(|c| c == '-' || c == '•' || c == ' ').to_string())
                        .filter(|line| !line.is_empty()),
                )
                .filter(|kw| seen.insert(kw.clone()))
                .collect()
        }
        Err(err) => {
            warn!("[RETRIEVER] keyword expansion failed: {}", err);
            vec![keyword.to_string()]
        }
    }
}

struct Fused {
    id: String,
    score: f64,
    payload: Payload,
}

/// Searches both named vectors for every keyword and fuses the ranked lists
/// with reciprocal-rank fusion.
async fn rrf_search(
    ctx: &ToolContext,
    keywords: &[String],
    bounds: Option<(i64, i64)>,
) -> Result<Vec<VocDocument>, String> {
    let filter = bounds.map(|(gte, lte)| Filter::range("date_timestamp", Some(gte), Some(lte)));
    let mut fused: Vec<Fused> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for kw in keywords {
        let vectors = embed_query(
            ctx.embedder.as_ref(),
            &ctx.models.meaning_embedding,
            &ctx.models.topic_embedding,
            kw,
        )
        .await?;
        let requests = vec![
            SearchRequest {
                vector_name: Some("meaning".to_string()),
                vector: vectors.meaning,
                limit: TOP_K,
                filter: filter.clone(),
                score_threshold: Some(SCORE_THRESHOLD),
            },
            SearchRequest {
                vector_name: Some("topic".to_string()),
                vector: vectors.topic,
                limit: TOP_K,
                filter: filter.clone(),
                score_threshold: Some(SCORE_THRESHOLD),
            },
        ];
        for hits in ctx.vectors.search_batch(WEB_COLLECTION, requests).await? {
            for (rank, hit) in hits.into_iter().enumerate() {
                let id = hit.id.to_string();
                let gain = 1.0 / (rank as f64 + RRF_K);
                match index.get(&id) {
                    Some(&pos) => fused[pos].score += gain,
                    None => {
                        index.insert(id.clone(), fused.len());
                        fused.push(Fused {
                            id,
                            score: gain,
                            payload: hit.payload,
                        });
                    }
                }
            }
        }
    }

    fused.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut seen = HashSet::new();
    let picked: Vec<(Fused, String)> = fused
        .into_iter()
        .filter_map(|hit| {
            let sentence = hit
                .payload
                .get("sentence")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            (!sentence.is_empty() && seen.insert(sentence.clone())).then_some((hit, sentence))
        })
        .take(TOP_K)
        .collect();

    let summaries: Vec<_> = picked
        .iter()
        .map(|(_, sentence)| async move {
            if sentence.chars().count() > SUMMARY_MIN_CHARS {
                summarize(ctx, sentence).await
            } else {
                sentence.clone()
            }
        })
        .collect();
    let texts: Vec<String> = stream::iter(summaries)
        .buffered(SUMMARY_CONCURRENCY)
        .collect()
        .await;

    let results = picked
        .into_iter()
        .zip(texts)
        .map(|((hit, sentence), text)| {
            let mut payload = hit.payload;
            for key in ["id", "text", "original_text", "score"] {
                payload.remove(key);
            }
            VocDocument {
                id: hit.id,
                text,
                original_text: sentence,
                score: round_to(hit.score, 4),
                payload,
            }
        })
        .collect();
    Ok(results)
}

async fn summarize(ctx: &ToolContext, text: &str) -> String {
    let prompt = format!(
        "You analyse consumer language. Below is a consumer post.\n\
         Summarise it in 3 to 5 sentences centred on the needs, inconveniences, situations and \
         behaviours of potential customers. Keep the original wording where possible and answer in Korean.\n\
         Post: {text}"
    );
    match ctx.llm.complete_text(&ctx.models.tool, prompt, 0.5).await {
        Ok(summary) if !summary.is_empty() => summary,
        Ok(_) => text.to_string(),
        Err(err) => {
            warn!("[RETRIEVER] summary failed, keeping original text: {}", err);
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::testing::context;
    use crate::models::workspace::ClusteringResult;
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::llm::AssistantReply;
    use crate::services::vector_store::testing::CannedVectorStore;
    use crate::services::vector_store::{Condition, PointId, ScoredPoint};

    fn hit(id: u64, sentence: &str) -> ScoredPoint {
        ScoredPoint {
            id: PointId::Num(id),
            score: 0.9,
            payload: json!({ "sentence": sentence, "date": "2024-05-01" })
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn detects_product_lines() {
        assert_eq!(detect_product_type("스타일러 살균"), Some("스타일러"));
        assert_eq!(detect_product_type("공기 청정"), None);
    }

    #[tokio::test]
    async fn expansion_keeps_keyword_first_and_dedupes() {
        let llm = ScriptedLlm::new(vec![Ok(AssistantReply::text(
            "### 1. 상황\n- 아이 옷을 매번 삶아요\n\n• 스팀으로 세균 박멸\n- 아이 옷을 매번 삶아요\n살균",
        ))]);
        let (ctx, _, _) = context(llm, CannedVectorStore::default(), 0.0);
        let keywords = expand_keywords(&ctx, "살균", None).await;
        assert_eq!(keywords, vec!["살균", "아이 옷을 매번 삶아요", "스팀으로 세균 박멸"]);

        let (ctx, _, _) = context(ScriptedLlm::default(), CannedVectorStore::default(), 0.0);
        assert_eq!(expand_keywords(&ctx, "살균", None).await, vec!["살균"]);
    }

    #[tokio::test]
    async fn fuses_ranks_dedupes_and_resets_downstream() {
        let long = "가".repeat(151);
        let store = CannedVectorStore {
            // meaning list, then topic list
            batch_hits: vec![
                vec![hit(1, "옷 냄새가 안 빠져요"), hit(2, &long), hit(3, "옷 냄새가 안 빠져요")],
                vec![hit(2, &long), hit(1, "옷 냄새가 안 빠져요")],
            ],
            ..Default::default()
        };
        let llm = ScriptedLlm::new(vec![
            Ok(AssistantReply::text("")),
            Ok(AssistantReply::text("요약된 문장")),
        ]);
        let (ctx, llm, store) = context(llm, store, 0.0);
        let mut ws = Workspace::new();
        ws.artifacts.cx_ward_clustering_results = Some(ClusteringResult::default());

        let args = json!({ "keyword": "스타일러 냄새", "date_range": "2024-01-01 ~ 2024-12-31" });
        let payload = run_data_retriever(&ctx, &mut ws, args.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(payload["voc_count"], 2);
        assert_eq!(payload["date_range"], "2024-01-01 ~ 2024-12-31");

        let data = ws.artifacts.retrieved_data.as_ref().unwrap();
        assert_eq!(data.product_type.as_deref(), Some("스타일러"));
        assert_eq!(ws.artifacts.product_type.as_deref(), Some("스타일러"));
        // id 1 ranks 0 and 1, id 2 ranks 1 and 0: tie keeps first-seen order
        assert_eq!(data.web_results[0].id, "1");
        assert_eq!(data.web_results[0].score, round_to(1.0 / 60.0 + 1.0 / 61.0, 4));
        assert_eq!(data.web_results[1].text, "요약된 문장");
        assert_eq!(data.web_results[1].original_text, long);
        assert_eq!(data.web_results[0].payload["sentence"], "옷 냄새가 안 빠져요");
        assert!(ws.artifacts.cx_ward_clustering_results.is_none());
        assert_eq!(llm.request_count(), 2);

        let calls = store.batch_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (collection, requests) = &calls[0];
        assert_eq!(collection, WEB_COLLECTION);
        assert_eq!(requests[0].vector_name.as_deref(), Some("meaning"));
        assert_eq!(requests[1].vector_name.as_deref(), Some("topic"));
        assert!(matches!(
            requests[0].filter.as_ref().unwrap().must[0],
            Condition::FieldRange { ref key, gte: Some(_), lte: Some(_) } if key == "date_timestamp"
        ));
    }

    #[tokio::test]
    async fn search_failure_is_a_tool_error() {
        let store = CannedVectorStore {
            fail_collections: vec![WEB_COLLECTION.to_string()],
            ..Default::default()
        };
        let (ctx, _, _) = context(ScriptedLlm::default(), store, 0.0);
        let mut ws = Workspace::new();
        let args = json!({ "keyword": "살균" });
        assert!(run_data_retriever(&ctx, &mut ws, args.as_object().unwrap())
            .await
            .is_err());
        assert!(ws.artifacts.retrieved_data.is_none());
    }
}
