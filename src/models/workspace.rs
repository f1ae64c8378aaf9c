use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::services::token_budget::{estimate_message_tokens, estimate_messages_tokens};

/// Per-session state: chat history plus everything the analysis pipeline produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workspace {
    pub current_state: Option<String>,
    pub internal_history: Vec<Value>,
    pub user_history: Vec<Value>,
    pub last_request_type: Option<String>,
    pub artifacts: Artifacts,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a chat message. `user`/`assistant` messages also land in the
    /// user-visible history. Both lists keep at most `max_len` entries.
    pub fn append_to_history(&mut self, message: Value, max_len: usize) {
        let role = message_role(&message).to_string();
        if role == "user" || role == "assistant" {
            self.user_history.push(message.clone());
            cap_len(&mut self.user_history, max_len);
        }
        self.internal_history.push(message);
        cap_len(&mut self.internal_history, max_len);
    }

    /// Drops the oldest messages until both histories fit in `max_tokens`.
    pub fn trim_history(&mut self, max_tokens: i64) {
        trim_to_tokens(&mut self.internal_history, max_tokens);
        trim_to_tokens(&mut self.user_history, max_tokens);
    }
}

pub fn message_role(message: &Value) -> &str {
    message.get("role").and_then(|v| v.as_str()).unwrap_or("")
}

fn cap_len(history: &mut Vec<Value>, max_len: usize) {
    if history.len() > max_len {
        let excess = history.len() - max_len;
        history.drain(..excess);
    }
    drop_orphan_tool_head(history);
}

fn trim_to_tokens(history: &mut Vec<Value>, max_tokens: i64) {
    if max_tokens <= 0 {
        return;
    }
    let mut total = estimate_messages_tokens(history);
    let mut cut = 0usize;
    while cut < history.len() && total > max_tokens {
        total -= estimate_message_tokens(&history[cut]);
        cut += 1;
    }
    history.drain(..cut);
    drop_orphan_tool_head(history);
}

// A tool reply is meaningless once the assistant turn that requested it is gone.
fn drop_orphan_tool_head(history: &mut Vec<Value>) {
    let lead = history
        .iter()
        .take_while(|m| message_role(m) == "tool")
        .count();
    if lead > 0 {
        history.drain(..lead);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Artifacts {
    pub product_type: Option<String>,
    pub retrieved_data: Option<RetrievedData>,
    pub analysis_results: Option<String>,
    pub cx_ward_clustering_results: Option<ClusteringResult>,
    pub cx_sna_results: Vec<SnaResult>,
    pub cx_lda_results: Vec<LdaTopic>,
    pub cx_opportunity_scores: Vec<OpportunityScore>,
    pub cx_cam_results: Vec<CustomerActionMap>,
    pub personas: Vec<Persona>,
    pub selected_persona: Option<Persona>,
    pub service_ideas: Vec<ServiceIdea>,
    pub selected_service_idea: Option<ServiceIdea>,
    pub data_plan_for_service: Vec<DataPlan>,
    pub selected_data_plan_for_service: Option<DataPlan>,
    pub cdp_definition: Vec<CdpDefinition>,
    pub selected_cdp_definition: Option<CdpDefinition>,
    pub sensor_data: Vec<Value>,
    pub product_data: Vec<Value>,
    pub columns_product: Map<String, Value>,
    pub data_plan_recommendation_message: Option<String>,
    pub conversation_state: Option<Value>,
    #[serde(rename = "_cx_temp_data", skip_serializing_if = "Option::is_none")]
    pub cx_temp_data: Option<MiningState>,
}

impl Artifacts {
    pub fn has_retrieved_data(&self) -> bool {
        self.retrieved_data.is_some()
    }

    /// Human-readable inventory of what the pipeline has produced so far.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        if let Some(data) = &self.retrieved_data {
            if !data.web_results.is_empty() {
                lines.push(format!("- Retrieved VOC documents: {}", data.web_results.len()));
            }
        }
        if let Some(clustering) = &self.cx_ward_clustering_results {
            if !clustering.cluster_summaries.is_empty() {
                lines.push(format!(
                    "- Word clustering: {} clusters",
                    clustering.cluster_summaries.len()
                ));
            }
        }
        if !self.cx_sna_results.is_empty() {
            lines.push(format!(
                "- Semantic network analyses: {} completed",
                self.cx_sna_results.len()
            ));
        }
        if !self.cx_lda_results.is_empty() {
            lines.push(format!("- Topic modeling: {} topics", self.cx_lda_results.len()));
        }
        if !self.cx_opportunity_scores.is_empty() {
            lines.push(format!(
                "- Opportunity scores: {} topics scored",
                self.cx_opportunity_scores.len()
            ));
        }
        if !self.cx_cam_results.is_empty() {
            lines.push(format!("- Customer action maps: {} created", self.cx_cam_results.len()));
        }
        if !self.personas.is_empty() {
            let names = join_names(self.personas.iter().map(|p| p.name.as_str()));
            lines.push(format!("- Personas: {} ({})", self.personas.len(), names));
        }
        if let Some(persona) = self.selected_persona.as_ref().filter(|p| !p.name.is_empty()) {
            lines.push(format!("- Selected persona: {}", persona.name));
        }
        if !self.service_ideas.is_empty() {
            let names = join_names(self.service_ideas.iter().map(|s| s.service_name.as_str()));
            lines.push(format!("- Service ideas: {} ({})", self.service_ideas.len(), names));
        }
        if let Some(idea) = self
            .selected_service_idea
            .as_ref()
            .filter(|s| !s.service_name.is_empty())
        {
            lines.push(format!("- Selected service idea: {}", idea.service_name));
        }
        if !self.data_plan_for_service.is_empty() {
            let names = join_names(self.data_plan_for_service.iter().map(|p| p.service_name.as_str()));
            lines.push(format!(
                "- Data plans: {} ({})",
                self.data_plan_for_service.len(),
                names
            ));
        }
        if let Some(plan) = self
            .selected_data_plan_for_service
            .as_ref()
            .filter(|p| !p.service_name.is_empty())
        {
            lines.push(format!("- Selected data plan: {}", plan.service_name));
        }
        if !self.cdp_definition.is_empty() {
            lines.push(format!("- C-D-P definitions: {} created", self.cdp_definition.len()));
        }
        if self.selected_cdp_definition.is_some() {
            lines.push("- Selected C-D-P definition: saved".to_string());
        }
        if !self.sensor_data.is_empty() {
            lines.push(format!("- Sensor data samples: {}", self.sensor_data.len()));
        }
        if !self.product_data.is_empty() {
            lines.push(format!("- Product documents: {}", self.product_data.len()));
        }
        if !self.columns_product.is_empty() {
            lines.push(format!("- Product metadata: {} fields", self.columns_product.len()));
        }
        if self.data_plan_recommendation_message.is_some() {
            lines.push("- Data plan recommendation message: saved".to_string());
        }

        if lines.is_empty() {
            return NO_ARTIFACTS.to_string();
        }
        format!("The workspace currently holds these artifacts:\n{}", lines.join("\n"))
    }

    /// Everything derived from the VOC corpus. Called when a new corpus arrives.
    pub fn reset_corpus_analysis(&mut self) {
        self.analysis_results = None;
        self.cx_ward_clustering_results = None;
        self.cx_temp_data = None;
        self.reset_cluster_analysis();
    }

    /// Everything derived from one clustering run.
    pub fn reset_cluster_analysis(&mut self) {
        self.cx_sna_results.clear();
        self.cx_lda_results.clear();
        self.cx_opportunity_scores.clear();
        self.cx_cam_results.clear();
    }

    pub fn find_persona(&self, name: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.name == name)
    }

    pub fn find_service_idea(&self, name: &str) -> Option<&ServiceIdea> {
        self.service_ideas.iter().find(|s| s.service_name == name)
    }

    pub fn find_data_plan(&self, service_name: &str) -> Option<&DataPlan> {
        self.data_plan_for_service
            .iter()
            .find(|p| p.service_name == service_name)
    }
}

pub const NO_ARTIFACTS: &str = "No artifacts are stored in the workspace yet.";

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names
        .map(|n| if n.is_empty() { "(unnamed)" } else { n })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Replaces the entry matching `same` or appends `item`.
pub fn upsert_by<T, F>(items: &mut Vec<T>, item: T, same: F)
where
    F: Fn(&T, &T) -> bool,
{
    match items.iter().position(|existing| same(existing, &item)) {
        Some(idx) => items[idx] = item,
        None => items.push(item),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievedData {
    pub query: String,
    pub web_results: Vec<VocDocument>,
    pub product_results: Vec<Value>,
    pub product_type: Option<String>,
    pub date_range: Option<String>,
}

/// One fused search hit. `original_text` is the stored sentence, `text` may be an LLM summary of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocDocument {
    pub id: String,
    pub text: String,
    pub original_text: String,
    pub score: f64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringResult {
    pub num_clusters: usize,
    pub cluster_labels: Vec<usize>,
    pub cluster_summaries: BTreeMap<String, ClusterSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSummary {
    pub keywords: Vec<String>,
    pub description: String,
    pub doc_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnaResult {
    pub cluster_id: usize,
    pub micro_segments: Vec<MicroSegment>,
    pub analysis_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroSegment {
    pub core_keyword: String,
    pub centrality_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdaTopic {
    pub topic_id: String,
    pub action_keywords: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunityScore {
    pub topic_id: String,
    pub action_keywords: Vec<String>,
    pub importance: usize,
    pub satisfaction: f64,
    pub opportunity_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerActionMap {
    pub topic_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub action_name: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub goals: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub pain_points: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub context: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub touchpoint_artifact: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub demographics: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub key_behaviors: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub needs_and_goals: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub pain_points: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub motivating_quote: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceIdea {
    #[serde(deserialize_with = "lenient_string")]
    pub service_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub solved_pain_points: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub service_scalability: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPlan {
    #[serde(deserialize_with = "lenient_string")]
    pub service_name: String,
    pub product_data_utilization: Vec<Value>,
    pub new_data_from_sensors: Vec<Value>,
    pub new_sensor_recommendation: Vec<Value>,
    pub external_data_integration: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The final Customer / Data / Performance document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpDefinition {
    pub title: String,
    pub customer_delight_goal: String,
    pub cx: CdpCustomer,
    pub performance: CdpPerformance,
    pub dx: CdpDx,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpCustomer {
    pub target_definition: CdpTarget,
    pub core_experience: CdpCoreExperience,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpTarget {
    pub description: String,
    pub quote: String,
    pub market_info: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpCoreExperience {
    pub title: String,
    pub care: String,
    pub customization: Vec<String>,
    pub servitization: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpPerformance {
    pub concept: CdpConcept,
    pub competitiveness: CdpCompetitiveness,
    pub customer_value_graph: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConcept {
    pub find: String,
    pub unique: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpCompetitiveness {
    pub lump_sum_sales: String,
    pub subscription_sales: String,
    pub revenue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpDx {
    pub trigger: CdpDxSection,
    pub accelerator: CdpAccelerator,
    pub tracker: CdpDxSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpDxSection {
    pub title: String,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpAccelerator {
    pub title: String,
    pub up_contents_service: Vec<String>,
    pub data_driven_experience: Vec<String>,
}

/// Intermediate text-mining state shared by clustering, SNA, LDA and scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningState {
    pub cluster_labels: Vec<usize>,
    pub tfidf_matrix: Vec<Vec<f64>>,
    pub feature_names: Vec<String>,
    pub documents: Vec<String>,
    pub cluster_docs_map: BTreeMap<usize, Vec<usize>>,
    /// Doc-topic rows per cluster, aligned with `cluster_docs_map[cluster]`.
    pub doc_topic_distribution: BTreeMap<usize, Vec<Vec<f64>>>,
}

/// Accepts any JSON scalar where a string is expected. LLM output is not always well typed.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_text(&value))
}

/// Accepts a list of anything, or a single value, where a list of strings is expected.
pub fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect(),
        other => {
            let text = value_to_text(&other);
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    })
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_workspace_is_empty_and_summarizes_as_such() {
        let ws = Workspace::new();
        assert!(ws.internal_history.is_empty());
        assert!(!ws.artifacts.has_retrieved_data());
        assert_eq!(ws.artifacts.summary(), NO_ARTIFACTS);
    }

    #[test]
    fn history_caps_and_splits_by_role() {
        let mut ws = Workspace::new();
        for i in 0..6 {
            ws.append_to_history(json!({"role": "user", "content": format!("u{i}")}), 4);
            ws.append_to_history(json!({"role": "system", "content": "s"}), 4);
        }
        assert_eq!(ws.internal_history.len(), 4);
        assert_eq!(ws.user_history.len(), 4);
        assert!(ws.user_history.iter().all(|m| message_role(m) == "user"));
        assert_eq!(ws.user_history[3]["content"], "u5");
    }

    #[test]
    fn cap_never_leaves_a_tool_message_first() {
        let mut ws = Workspace::new();
        ws.append_to_history(json!({"role": "assistant", "tool_calls": [{"id": "a"}]}), 3);
        ws.append_to_history(json!({"role": "tool", "tool_call_id": "a", "content": "{}"}), 3);
        ws.append_to_history(json!({"role": "tool", "tool_call_id": "b", "content": "{}"}), 3);
        ws.append_to_history(json!({"role": "assistant", "content": "done"}), 3);
        assert_eq!(message_role(&ws.internal_history[0]), "assistant");
        assert_eq!(ws.internal_history.len(), 1);
    }

    #[test]
    fn trim_history_drops_oldest_until_budget_fits() {
        let mut ws = Workspace::new();
        for i in 0..5 {
            ws.append_to_history(json!({"role": "user", "content": format!("{i}{}", "x".repeat(39))}), 50);
        }
        ws.trim_history(25);
        assert_eq!(ws.internal_history.len(), 2);
        assert!(ws.internal_history[0]["content"].as_str().unwrap().starts_with('3'));
    }

    #[test]
    fn summary_lists_counts_and_names() {
        let mut artifacts = Artifacts::default();
        artifacts.retrieved_data = Some(RetrievedData {
            query: "살균".into(),
            web_results: vec![VocDocument::default(), VocDocument::default()],
            ..Default::default()
        });
        artifacts.personas = vec![
            Persona { name: "Kim".into(), ..Default::default() },
            Persona::default(),
        ];
        artifacts.selected_persona = artifacts.personas.first().cloned();
        artifacts.conversation_state = Some(json!({"step": 1}));

        let summary = artifacts.summary();
        assert!(summary.contains("Retrieved VOC documents: 2"));
        assert!(summary.contains("Personas: 2 (Kim, (unnamed))"));
        assert!(summary.contains("Selected persona: Kim"));
        assert!(!summary.contains("step"));
    }

    #[test]
    fn workspace_round_trips_and_tolerates_missing_fields() {
        let mut ws = Workspace::new();
        ws.last_request_type = Some("data_retriever_request".into());
        ws.artifacts.cx_temp_data = Some(MiningState {
            cluster_docs_map: [(0usize, vec![0usize, 2]), (1, vec![1])].into_iter().collect(),
            ..Default::default()
        });
        let text = serde_json::to_string(&ws).unwrap();
        let back: Workspace = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ws);
        assert!(text.contains("_cx_temp_data"));

        let legacy: Workspace = serde_json::from_str(r#"{"artifacts": {"product_type": "스타일러"}}"#).unwrap();
        assert_eq!(legacy.artifacts.product_type.as_deref(), Some("스타일러"));
        assert!(legacy.artifacts.personas.is_empty());
    }

    #[test]
    fn llm_records_keep_unknown_fields_and_coerce_types() {
        let persona: Persona = serde_json::from_value(json!({
            "name": "Park",
            "demographics": {"age": 38},
            "pain_points": "washing is tedious",
            "hobby": "camping"
        }))
        .unwrap();
        assert_eq!(persona.demographics, "{\"age\":38}");
        assert_eq!(persona.pain_points, vec!["washing is tedious".to_string()]);
        assert_eq!(persona.extra.get("hobby"), Some(&json!("camping")));

        let back = serde_json::to_value(&persona).unwrap();
        assert_eq!(back["hobby"], "camping");
    }

    #[test]
    fn reset_clears_downstream_analysis() {
        let mut artifacts = Artifacts::default();
        artifacts.cx_lda_results.push(LdaTopic::default());
        artifacts.cx_cam_results.push(CustomerActionMap::default());
        artifacts.cx_ward_clustering_results = Some(ClusteringResult::default());
        artifacts.personas.push(Persona::default());
        artifacts.reset_corpus_analysis();
        assert!(artifacts.cx_lda_results.is_empty());
        assert!(artifacts.cx_cam_results.is_empty());
        assert!(artifacts.cx_ward_clustering_results.is_none());
        assert_eq!(artifacts.personas.len(), 1);
    }

    #[test]
    fn upsert_replaces_matching_entries() {
        let mut topics = vec![LdaTopic { topic_id: "0-0".into(), ..Default::default() }];
        upsert_by(
            &mut topics,
            LdaTopic { topic_id: "0-0".into(), description: "new".into(), ..Default::default() },
            |a, b| a.topic_id == b.topic_id,
        );
        upsert_by(&mut topics, LdaTopic { topic_id: "1-0".into(), ..Default::default() }, |a, b| {
            a.topic_id == b.topic_id
        });
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].description, "new");
    }
}
