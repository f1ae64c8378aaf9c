use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{optional_usize, required_string, required_usize, ToolContext};
use crate::mining::tfidf::column_sums;
use crate::mining::{degree_centrality, round_to, top_indices, KMeans, Lda, TfidfVectorizer};
use crate::models::workspace::{
    upsert_by, ClusterSummary, ClusteringResult, CustomerActionMap, LdaTopic, MicroSegment, MiningState,
    OpportunityScore, SnaResult, Workspace,
};
use crate::pipeline::Requirement;

const CLUSTER_KEYWORDS: usize = 10;
const SNA_KEYWORDS: usize = 10;
const TOPIC_KEYWORDS: usize = 7;
const TOPIC_ASSIGNMENT_THRESHOLD: f64 = 0.05;
const SENTIMENT_SAMPLE: usize = 20;
const MAX_TOPICS: usize = 20;

/// Runs CPU-bound mining on the blocking pool.
async fn run_blocking<T, F>(job: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| format!("analysis task failed: {err}"))?
}

pub async fn run_ward_clustering(ws: &mut Workspace, args: &Map<String, Value>) -> Result<Value, String> {
    let data = ws
        .artifacts
        .retrieved_data
        .as_ref()
        .ok_or_else(|| Requirement::RetrievedData.missing_message().to_string())?;
    let documents: Vec<String> = data
        .web_results
        .iter()
        .map(|d| d.original_text.clone())
        .filter(|text| !text.trim().is_empty())
        .collect();
    if documents.is_empty() {
        return Err("There are no usable VOC documents to cluster. Check the search results.".to_string());
    }

    let requested = optional_usize(args, "num_clusters").unwrap_or(5);
    let k = requested.min(documents.len());
    if k < 2 {
        return Err("At least 2 clusters are required.".to_string());
    }
    if k < requested {
        warn!("[CX] {} clusters requested for {} documents, using {}", requested, documents.len(), k);
    }

    let (documents, matrix, fit) = run_blocking(move || {
        let matrix = TfidfVectorizer::default()
            .fit_transform(&documents)
            .map_err(|err| format!("TF-IDF produced no usable terms: {err}"))?;
        let fit = KMeans::new(k).fit(&matrix.rows)?;
        Ok((documents, matrix, fit))
    })
    .await?;

    let mut cluster_docs_map: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (doc, &label) in fit.labels.iter().enumerate() {
        cluster_docs_map.entry(label).or_default().push(doc);
    }

    let mut cluster_summaries = BTreeMap::new();
    for cluster in 0..k {
        let docs = cluster_docs_map.get(&cluster).map(Vec::as_slice).unwrap_or(&[]);
        let summary = if docs.is_empty() {
            ClusterSummary {
                keywords: Vec::new(),
                description: format!("Group {cluster} (0 documents) has no documents."),
                doc_count: 0,
            }
        } else {
            let sums = column_sums(&matrix.rows, docs);
            let keywords: Vec<String> = top_indices(&sums, CLUSTER_KEYWORDS)
                .into_iter()
                .map(|i| matrix.features[i].clone())
                .collect();
            let lead = keywords.iter().take(5).cloned().collect::<Vec<_>>().join(", ");
            ClusterSummary {
                description: format!(
                    "Group {cluster} ({} documents) mainly contains keywords such as '{lead}'...",
                    docs.len()
                ),
                keywords,
                doc_count: docs.len(),
            }
        };
        cluster_summaries.insert(cluster.to_string(), summary);
    }
    info!(
        "[CX] clustered {} documents into {} groups over {} terms",
        documents.len(),
        k,
        matrix.features.len()
    );

    let result = ClusteringResult {
        num_clusters: k,
        cluster_labels: fit.labels.clone(),
        cluster_summaries,
    };
    let payload = json!({
        "num_clusters": k,
        "cluster_summaries": result.cluster_summaries,
    });

    let artifacts = &mut ws.artifacts;
    artifacts.cx_temp_data = Some(MiningState {
        cluster_labels: fit.labels,
        tfidf_matrix: matrix.rows,
        feature_names: matrix.features,
        documents,
        cluster_docs_map,
        doc_topic_distribution: BTreeMap::new(),
    });
    artifacts.cx_ward_clustering_results = Some(result);
    artifacts.analysis_results = Some(
        "Word clustering complete. Review each cluster's keywords and ask for a semantic network analysis of a cluster id to go deeper."
            .to_string(),
    );
    artifacts.reset_cluster_analysis();
    Ok(payload)
}

fn mining_state(ws: &Workspace) -> Result<&MiningState, String> {
    ws.artifacts
        .cx_temp_data
        .as_ref()
        .filter(|s| !s.cluster_labels.is_empty() && !s.tfidf_matrix.is_empty())
        .ok_or_else(|| Requirement::Clustering.missing_message().to_string())
}

/// Indices of the cluster's documents and their TF-IDF rows.
fn cluster_rows(state: &MiningState, cluster_id: usize) -> Result<(Vec<usize>, Vec<Vec<f64>>), String> {
    let docs: Vec<usize> = state
        .cluster_labels
        .iter()
        .enumerate()
        .filter(|(_, &label)| label == cluster_id)
        .map(|(i, _)| i)
        .collect();
    if docs.is_empty() {
        return Err(format!("Cluster {cluster_id} has no documents."));
    }
    let rows = docs
        .iter()
        .filter_map(|&i| state.tfidf_matrix.get(i).cloned())
        .collect();
    Ok((docs, rows))
}

pub async fn run_semantic_network_analysis(
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let cluster_id = required_usize(args, "cluster_id")?;
    let (_, rows) = cluster_rows(mining_state(ws)?, cluster_id)?;
    let ranked = run_blocking(move || Ok(degree_centrality(&rows))).await?;

    let state = mining_state(ws)?;
    let micro_segments: Vec<MicroSegment> = ranked
        .into_iter()
        .filter(|(idx, _)| *idx < state.feature_names.len())
        .take(SNA_KEYWORDS)
        .map(|(idx, score)| MicroSegment {
            core_keyword: state.feature_names[idx].clone(),
            centrality_score: round_to(score, 4),
        })
        .collect();

    let result = SnaResult {
        cluster_id,
        micro_segments,
        analysis_description: format!(
            "Semantic network analysis found the most central keywords inside cluster {cluster_id}."
        ),
    };
    let payload = serde_json::to_value(&result).map_err(|e| e.to_string())?;
    upsert_by(&mut ws.artifacts.cx_sna_results, result, |a, b| a.cluster_id == b.cluster_id);
    ws.artifacts.analysis_results = Some("Semantic network analysis complete.".to_string());
    Ok(payload)
}

pub async fn run_topic_modeling_lda(ws: &mut Workspace, args: &Map<String, Value>) -> Result<Value, String> {
    let cluster_id = required_usize(args, "cluster_id")?;
    let num_topics = optional_usize(args, "num_topics").unwrap_or(3);
    if !(1..=MAX_TOPICS).contains(&num_topics) {
        return Err(format!("num_topics must be between 1 and {MAX_TOPICS}"));
    }

    let (_, rows) = cluster_rows(mining_state(ws)?, cluster_id)?;
    let doc_count = rows.len();
    let fit = run_blocking(move || Lda::new(num_topics).fit_transform(&rows)).await?;

    let state = mining_state(ws)?;

    let topics: Vec<LdaTopic> = fit
        .components
        .iter()
        .enumerate()
        .map(|(i, weights)| {
            let action_keywords: Vec<String> = top_indices(weights, TOPIC_KEYWORDS)
                .into_iter()
                .filter_map(|w| state.feature_names.get(w).cloned())
                .collect();
            let lead = action_keywords.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
            LdaTopic {
                topic_id: format!("{cluster_id}-{i}"),
                description: format!("Key keywords: {lead}..."),
                action_keywords,
            }
        })
        .collect();
    info!("[CX] cluster {} yielded {} topics from {} documents", cluster_id, topics.len(), doc_count);

    let artifacts = &mut ws.artifacts;
    if let Some(state) = artifacts.cx_temp_data.as_mut() {
        state.doc_topic_distribution.insert(cluster_id, fit.doc_topic);
    }
    let prefix = format!("{cluster_id}-");
    artifacts.cx_lda_results.retain(|t| !t.topic_id.starts_with(&prefix));
    artifacts.cx_lda_results.extend(topics.iter().cloned());

    let preview: Vec<Value> = topics
        .iter()
        .map(|t| json!({ "topic_id": t.topic_id, "action_keywords": t.action_keywords }))
        .collect();
    Ok(json!({
        "message": format!("Identified {} topics in cluster {cluster_id}.", topics.len()),
        "topics": preview,
    }))
}

/// `"<cluster>-<topic>"` into its two indices.
pub fn parse_topic_id(topic_id: &str) -> Option<(usize, usize)> {
    let (cluster, topic) = topic_id.split_once('-')?;
    Some((cluster.trim().parse().ok()?, topic.trim().parse().ok()?))
}

pub async fn calculate_opportunity_scores(ctx: &ToolContext, ws: &mut Workspace) -> Result<Value, String> {
    let state = mining_state(ws)?;
    let topics = &ws.artifacts.cx_lda_results;
    if topics.is_empty() {
        return Err(Requirement::LdaTopics.missing_message().to_string());
    }

    let mut scores = Vec::new();
    for topic in topics {
        let Some((cluster_id, topic_idx)) = parse_topic_id(&topic.topic_id) else {
            warn!("[CX] skipping malformed topic id '{}'", topic.topic_id);
            continue;
        };
        let (Some(doc_indices), Some(distribution)) = (
            state.cluster_docs_map.get(&cluster_id).filter(|d| !d.is_empty()),
            state.doc_topic_distribution.get(&cluster_id),
        ) else {
            warn!("[CX] no documents or topic distribution for cluster {}", cluster_id);
            continue;
        };

        let topic_docs: Vec<String> = distribution
            .iter()
            .enumerate()
            .filter(|(_, row)| row.get(topic_idx).copied().unwrap_or(0.0) >= TOPIC_ASSIGNMENT_THRESHOLD)
            .filter_map(|(i, _)| doc_indices.get(i))
            .filter_map(|&doc| state.documents.get(doc).cloned())
            .collect();
        if topic_docs.is_empty() {
            warn!("[CX] topic {} has no documents above the threshold", topic.topic_id);
            continue;
        }

        let importance = topic_docs.len();
        let sample: Vec<String> = topic_docs.into_iter().take(SENTIMENT_SAMPLE).collect();
        let sentiments = ctx.sentiment.score_batch(&sample).await.unwrap_or_else(|err| {
            warn!("[CX] sentiment scoring failed, treating as neutral: {}", err);
            vec![0.0; sample.len()]
        });
        let satisfaction = if sentiments.is_empty() {
            0.0
        } else {
            sentiments.iter().sum::<f64>() / sentiments.len() as f64
        };
        let opportunity = importance as f64 * (-satisfaction).max(0.0);

        scores.push(OpportunityScore {
            topic_id: topic.topic_id.clone(),
            action_keywords: topic.action_keywords.clone(),
            importance,
            satisfaction: round_to(satisfaction, 2),
            opportunity_score: round_to(opportunity, 2),
        });
    }

    if scores.is_empty() {
        return Err(
            "No topic has documents to score. Run topic modeling on a cluster again.".to_string(),
        );
    }
    scores.sort_by(|a, b| b.opportunity_score.total_cmp(&a.opportunity_score));
    let payload = json!({ "cx_opportunity_scores": scores });
    ws.artifacts.cx_opportunity_scores = scores;
    Ok(payload)
}

pub async fn create_customer_action_map(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let topic_id = required_string(args, "topic_id")?;
    let artifacts = &ws.artifacts;
    let lda = artifacts.cx_lda_results.iter().find(|t| t.topic_id == topic_id);
    let score = artifacts.cx_opportunity_scores.iter().find(|s| s.topic_id == topic_id);
    let (Some(lda), Some(score)) = (lda, score) else {
        return Err(format!(
            "Analysis results for topic {topic_id} are incomplete. Run topic modeling and opportunity scoring first."
        ));
    };

    let action_name = lda
        .action_keywords
        .first()
        .cloned()
        .unwrap_or_else(|| topic_id.clone());
    let prompt = format!(
        "You are a CX strategist who completes customer action maps (CAM) from analysis results.\n\
         [Analysis summary]\n\
         - Action id: {topic_id}\n\
         - Core keywords of the action: \"{keywords}\"\n\
         - Customer satisfaction for this action: {satisfaction} (-1.0 very negative, 1.0 very positive)\n\
         - Importance (mention volume): {importance}\n\n\
         Infer 2-3 goals and 2-3 pain points of customers who perform this action. \
         Also infer the contexts in which it happens and the related touchpoints or artifacts.\n\
         Answer in Korean and return only this JSON:\n\
         {{\"action_name\": \"{action_name}\", \"goals\": [\"...\"], \"pain_points\": [\"...\"], \
         \"context\": [\"...\"], \"touchpoint_artifact\": [\"...\"]}}",
        keywords = lda.action_keywords.join(", "),
        satisfaction = score.satisfaction,
        importance = score.importance,
    );

    let mut value = ctx.llm.complete_json(&ctx.models.tool, prompt).await?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("topic_id");
    }
    let mut cam: CustomerActionMap =
        serde_json::from_value(value).map_err(|e| format!("invalid customer action map: {e}"))?;
    cam.topic_id = topic_id;
    cam.action_name = action_name;

    let payload = serde_json::to_value(&cam).map_err(|e| e.to_string())?;
    upsert_by(&mut ws.artifacts.cx_cam_results, cam, |a, b| a.topic_id == b.topic_id);
    Ok(payload)
}
