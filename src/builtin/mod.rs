//! Analysis tools the agent can call, and the registry that gates and
//! dispatches them against a session workspace.

pub mod cdp;
pub mod cx_analysis;
pub mod data_plan;
pub mod data_retriever;
pub mod persona;
pub mod product_context;
pub mod service_idea;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::workspace::{Artifacts, Workspace};
use crate::pipeline::Requirement;
use crate::services::embedding::Embedder;
use crate::services::llm::LlmClient;
use crate::services::sentiment::SentimentScorer;
use crate::services::vector_store::VectorStore;
use crate::utils::log_helpers::truncate_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    RunDataRetriever,
    RunWardClustering,
    RunSemanticNetworkAnalysis,
    RunTopicModelingLda,
    CalculateOpportunityScores,
    CreateCustomerActionMap,
    CreatePersonas,
    CreatePersonaFromManualInput,
    ModifyPersonas,
    CreateServiceIdeas,
    CreateServiceIdeasFromManualInput,
    ModifyServiceIdeas,
    CreateDataPlanForService,
    ModifyDataPlan,
    CreateCdpDefinition,
    ModifyCdpDefinition,
    FetchProductContext,
    FetchSensorContext,
    GetColumnsForProduct,
    ChangeProductContext,
}

impl ToolName {
    pub const ALL: [ToolName; 20] = [
        ToolName::RunDataRetriever,
        ToolName::RunWardClustering,
        ToolName::RunSemanticNetworkAnalysis,
        ToolName::RunTopicModelingLda,
        ToolName::CalculateOpportunityScores,
        ToolName::CreateCustomerActionMap,
        ToolName::CreatePersonas,
        ToolName::CreatePersonaFromManualInput,
        ToolName::ModifyPersonas,
        ToolName::CreateServiceIdeas,
        ToolName::CreateServiceIdeasFromManualInput,
        ToolName::ModifyServiceIdeas,
        ToolName::CreateDataPlanForService,
        ToolName::ModifyDataPlan,
        ToolName::CreateCdpDefinition,
        ToolName::ModifyCdpDefinition,
        ToolName::FetchProductContext,
        ToolName::FetchSensorContext,
        ToolName::GetColumnsForProduct,
        ToolName::ChangeProductContext,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolName::RunDataRetriever => "run_data_retriever",
            ToolName::RunWardClustering => "run_ward_clustering",
            ToolName::RunSemanticNetworkAnalysis => "run_semantic_network_analysis",
            ToolName::RunTopicModelingLda => "run_topic_modeling_lda",
            ToolName::CalculateOpportunityScores => "calculate_opportunity_scores",
            ToolName::CreateCustomerActionMap => "create_customer_action_map",
            ToolName::CreatePersonas => "create_personas",
            ToolName::CreatePersonaFromManualInput => "create_persona_from_manual_input",
            ToolName::ModifyPersonas => "modify_personas",
            ToolName::CreateServiceIdeas => "create_service_ideas",
            ToolName::CreateServiceIdeasFromManualInput => "create_service_ideas_from_manual_input",
            ToolName::ModifyServiceIdeas => "modify_service_ideas",
            ToolName::CreateDataPlanForService => "create_data_plan_for_service",
            ToolName::ModifyDataPlan => "modify_data_plan",
            ToolName::CreateCdpDefinition => "create_cdp_definition",
            ToolName::ModifyCdpDefinition => "modify_cdp_definition",
            ToolName::FetchProductContext => "fetch_product_context",
            ToolName::FetchSensorContext => "fetch_sensor_context",
            ToolName::GetColumnsForProduct => "get_columns_for_product",
            ToolName::ChangeProductContext => "change_product_context",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tool| tool.name() == name)
    }

    /// Tools 17-20 back structured requests and other tools only.
    pub fn exposed_to_llm(self) -> bool {
        !matches!(
            self,
            ToolName::FetchProductContext
                | ToolName::FetchSensorContext
                | ToolName::GetColumnsForProduct
                | ToolName::ChangeProductContext
        )
    }

    pub fn requirements(self) -> &'static [Requirement] {
        match self {
            ToolName::RunWardClustering | ToolName::CreatePersonas => &[Requirement::RetrievedData],
            ToolName::RunSemanticNetworkAnalysis | ToolName::RunTopicModelingLda => {
                &[Requirement::Clustering]
            }
            ToolName::CalculateOpportunityScores => &[Requirement::Clustering, Requirement::LdaTopics],
            ToolName::CreateCustomerActionMap => {
                &[Requirement::LdaTopics, Requirement::OpportunityScores]
            }
            ToolName::ModifyPersonas | ToolName::CreateServiceIdeas => &[Requirement::Personas],
            ToolName::ModifyServiceIdeas => &[Requirement::ServiceIdeas],
            ToolName::ModifyDataPlan | ToolName::CreateCdpDefinition => &[Requirement::DataPlans],
            ToolName::ModifyCdpDefinition => &[Requirement::SelectedCdp],
            _ => &[],
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolName::RunDataRetriever => {
                "[Data collection] Collect customer voice (VOC) documents for a keyword and an optional date range. Provides the base data for every later analysis."
            }
            ToolName::RunWardClustering => {
                "[Segmentation] Cluster the collected VOC by word usage to find the main interest groups and their keywords."
            }
            ToolName::RunSemanticNetworkAnalysis => {
                "[Segmentation] Analyse keyword connections inside one cluster to find its core keywords."
            }
            ToolName::RunTopicModelingLda => {
                "[Segmentation] Identify concrete customer actions (usage scenarios) inside one cluster with topic modeling."
            }
            ToolName::CalculateOpportunityScores => {
                "[Targeting] Score every identified action by mention volume and dissatisfaction to prioritise business opportunities."
            }
            ToolName::CreateCustomerActionMap => {
                "[Targeting] Infer goals, pain points, context and touchpoints for one action and write a customer action map (CAM)."
            }
            ToolName::CreatePersonas => {
                "[Targeting] Create data-driven customer personas from the VOC and the analysis results."
            }
            ToolName::CreatePersonaFromManualInput => {
                "[Targeting] Save a persona the user entered through a form and select it."
            }
            ToolName::ModifyPersonas => "[Targeting] Modify the existing personas as the user requests.",
            ToolName::CreateServiceIdeas => {
                "[Positioning] Propose new service ideas that solve the pain points of a persona."
            }
            ToolName::CreateServiceIdeasFromManualInput => {
                "[Positioning] Save a service idea the user entered and propose complementary ideas."
            }
            ToolName::ModifyServiceIdeas => {
                "[Positioning] Modify the existing service ideas as the user requests."
            }
            ToolName::CreateDataPlanForService => {
                "[Positioning] Write a detailed data plan for a service idea using product, sensor and external data."
            }
            ToolName::ModifyDataPlan => "[Positioning] Modify the selected data plan as the user requests.",
            ToolName::CreateCdpDefinition => {
                "[Positioning] Write the final C-D-P (Customer, Data, Performance) definition for a data plan."
            }
            ToolName::ModifyCdpDefinition => {
                "[Positioning] Modify the selected C-D-P definition as the user requests."
            }
            ToolName::FetchProductContext => "Search product feature documents for a keyword.",
            ToolName::FetchSensorContext => "Load sensor data samples for a product category.",
            ToolName::GetColumnsForProduct => "Load the product metadata fields of a product category.",
            ToolName::ChangeProductContext => {
                "Switch the product category and refresh product, sensor and metadata context."
            }
        }
    }

    pub fn parameters(self) -> Value {
        match self {
            ToolName::RunDataRetriever => json!({
                "type": "object",
                "properties": {
                    "keyword": { "type": "string", "description": "Keyword to search for (e.g. '살균')" },
                    "date_range": { "type": "string", "description": "Period, e.g. '최근 6개월' or '2024-01-01 to 2024-12-31'" },
                    "product_type": { "type": "string", "description": "Product category (optional)" }
                },
                "required": ["keyword"]
            }),
            ToolName::RunWardClustering => json!({
                "type": "object",
                "properties": {
                    "num_clusters": { "type": "integer", "description": "Number of groups (default 5)", "default": 5 }
                }
            }),
            ToolName::RunSemanticNetworkAnalysis => json!({
                "type": "object",
                "properties": {
                    "cluster_id": { "type": "integer", "description": "Cluster to analyse" }
                },
                "required": ["cluster_id"]
            }),
            ToolName::RunTopicModelingLda => json!({
                "type": "object",
                "properties": {
                    "cluster_id": { "type": "integer", "description": "Cluster to analyse" },
                    "num_topics": { "type": "integer", "description": "Number of actions to extract (default 3)", "default": 3, "minimum": 1, "maximum": 20 }
                },
                "required": ["cluster_id"]
            }),
            ToolName::CalculateOpportunityScores => json!({ "type": "object", "properties": {} }),
            ToolName::CreateCustomerActionMap => json!({
                "type": "object",
                "properties": {
                    "topic_id": { "type": "string", "description": "Action id, e.g. '0-1'" }
                },
                "required": ["topic_id"]
            }),
            ToolName::CreatePersonas => json!({
                "type": "object",
                "properties": {
                    "num_personas": { "type": "integer", "description": "Number of personas (default 3)", "default": 3 },
                    "focus_topic_ids": { "type": "array", "items": { "type": "string" }, "description": "Action ids to focus on" }
                }
            }),
            ToolName::CreatePersonaFromManualInput => json!({
                "type": "object",
                "properties": {
                    "persona_data": {
                        "type": "object",
                        "description": "Persona fields: name, title, demographics, key_behaviors, needs_and_goals, pain_points, motivating_quote"
                    }
                },
                "required": ["persona_data"]
            }),
            ToolName::CreateServiceIdeas => json!({
                "type": "object",
                "properties": {
                    "persona_name": { "type": "string", "description": "Name of the persona to design for" },
                    "num_ideas": { "type": "integer", "description": "Number of ideas (default 3)", "default": 3 }
                },
                "required": ["persona_name"]
            }),
            ToolName::CreateServiceIdeasFromManualInput => json!({
                "type": "object",
                "properties": {
                    "service_data": {
                        "type": "object",
                        "description": "Service fields: service_name, description, solved_pain_points, service_scalability"
                    },
                    "num_ideas": { "type": "integer", "description": "Number of additional ideas (default 3)", "default": 3 }
                },
                "required": ["service_data"]
            }),
            ToolName::CreateDataPlanForService => json!({
                "type": "object",
                "properties": {
                    "service_name": { "type": "string", "description": "Service idea to plan for" },
                    "service_description": { "type": "string", "description": "Free-text service description when there is no stored idea" },
                    "product_type": { "type": "string", "description": "Related product category (optional)" }
                }
            }),
            ToolName::CreateCdpDefinition => json!({
                "type": "object",
                "properties": {
                    "data_plan_service_name": { "type": "string", "description": "Service name of the data plan" }
                },
                "required": ["data_plan_service_name"]
            }),
            ToolName::ModifyPersonas
            | ToolName::ModifyServiceIdeas
            | ToolName::ModifyDataPlan
            | ToolName::ModifyCdpDefinition => json!({
                "type": "object",
                "properties": {
                    "modification_request": { "type": "string", "description": "What to change" }
                },
                "required": ["modification_request"]
            }),
            ToolName::FetchProductContext => json!({
                "type": "object",
                "properties": {
                    "keyword": { "type": "string" },
                    "product_type": { "type": "string" },
                    "top_k": { "type": "integer", "default": 10 }
                },
                "required": ["keyword"]
            }),
            ToolName::FetchSensorContext => json!({
                "type": "object",
                "properties": {
                    "product_type": { "type": "string" },
                    "top_k": { "type": "integer", "default": 10 }
                },
                "required": ["product_type"]
            }),
            ToolName::GetColumnsForProduct | ToolName::ChangeProductContext => json!({
                "type": "object",
                "properties": {
                    "product_type": { "type": "string" }
                },
                "required": ["product_type"]
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelNames {
    pub tool: String,
    pub planning: String,
    pub meaning_embedding: String,
    pub topic_embedding: String,
}

impl ModelNames {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            tool: cfg.tool_model.clone(),
            planning: cfg.planning_model.clone(),
            meaning_embedding: cfg.meaning_embedding_model.clone(),
            topic_embedding: cfg.topic_embedding_model.clone(),
        }
    }
}

/// External collaborators shared by every tool.
#[derive(Clone)]
pub struct ToolContext {
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<dyn VectorStore>,
    pub sentiment: Arc<dyn SentimentScorer>,
    pub models: ModelNames,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub success: bool,
    pub payload: Value,
    pub error: Option<String>,
}

impl ToolOutcome {
    fn ok(tool: ToolName, payload: Value) -> Self {
        Self {
            tool: tool.name().to_string(),
            success: true,
            payload,
            error: None,
        }
    }

    fn failed(tool: ToolName, err: String) -> Self {
        Self {
            tool: tool.name().to_string(),
            success: false,
            payload: Value::Null,
            error: Some(err),
        }
    }
}

#[derive(Clone)]
pub struct ToolRegistry {
    ctx: ToolContext,
}

impl ToolRegistry {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    /// OpenAI `tools` array for the tools the agent may choose from.
    pub fn llm_tools(&self) -> Vec<Value> {
        ToolName::ALL
            .iter()
            .filter(|tool| tool.exposed_to_llm())
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }

    pub fn check_requirements(&self, tool: ToolName, artifacts: &Artifacts) -> Result<(), String> {
        match tool
            .requirements()
            .iter()
            .find(|requirement| !requirement.is_met(artifacts))
        {
            Some(missing) => Err(missing.missing_message().to_string()),
            None => Ok(()),
        }
    }

    pub async fn dispatch(&self, tool: ToolName, args: &Map<String, Value>, ws: &mut Workspace) -> ToolOutcome {
        if let Err(err) = self.check_requirements(tool, &ws.artifacts) {
            warn!("[TOOL] {} blocked: {}", tool.name(), err);
            return ToolOutcome::failed(tool, err);
        }

        info!(
            "[TOOL] {} args={}",
            tool.name(),
            truncate_log(&serde_json::Value::Object(args.clone()).to_string(), 300)
        );
        let ctx = &self.ctx;
        let result = match tool {
            ToolName::RunDataRetriever => data_retriever::run_data_retriever(ctx, ws, args).await,
            ToolName::RunWardClustering => cx_analysis::run_ward_clustering(ws, args).await,
            ToolName::RunSemanticNetworkAnalysis => {
                cx_analysis::run_semantic_network_analysis(ws, args).await
            }
            ToolName::RunTopicModelingLda => cx_analysis::run_topic_modeling_lda(ws, args).await,
            ToolName::CalculateOpportunityScores => {
                cx_analysis::calculate_opportunity_scores(ctx, ws).await
            }
            ToolName::CreateCustomerActionMap => {
                cx_analysis::create_customer_action_map(ctx, ws, args).await
            }
            ToolName::CreatePersonas => persona::create_personas(ctx, ws, args).await,
            ToolName::CreatePersonaFromManualInput => persona::create_persona_from_manual_input(ws, args),
            ToolName::ModifyPersonas => persona::modify_personas(ctx, ws, args).await,
            ToolName::CreateServiceIdeas => service_idea::create_service_ideas(ctx, ws, args).await,
            ToolName::CreateServiceIdeasFromManualInput => {
                service_idea::create_service_ideas_from_manual_input(ctx, ws, args).await
            }
            ToolName::ModifyServiceIdeas => service_idea::modify_service_ideas(ctx, ws, args).await,
            ToolName::CreateDataPlanForService => {
                data_plan::create_data_plan_for_service(ctx, ws, args).await
            }
            ToolName::ModifyDataPlan => data_plan::modify_data_plan(ctx, ws, args).await,
            ToolName::CreateCdpDefinition => cdp::create_cdp_definition(ctx, ws, args).await,
            ToolName::ModifyCdpDefinition => cdp::modify_cdp_definition(ctx, ws, args).await,
            ToolName::FetchProductContext => product_context::fetch_product_context_tool(ctx, ws, args).await,
            ToolName::FetchSensorContext => product_context::fetch_sensor_context_tool(ctx, ws, args).await,
            ToolName::GetColumnsForProduct => product_context::get_columns_for_product_tool(ctx, ws, args).await,
            ToolName::ChangeProductContext => product_context::change_product_context(ctx, ws, args).await,
        };

        match result {
            Ok(payload) => ToolOutcome::ok(tool, payload),
            Err(err) => {
                warn!("[TOOL] {} failed: {}", tool.name(), err);
                ToolOutcome::failed(tool, err)
            }
        }
    }
}

pub(crate) fn optional_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(|value| value.as_str())
        .and_then(trimmed_non_empty)
        .map(|value| value.to_string())
}

pub(crate) fn required_string(map: &Map<String, Value>, key: &str) -> Result<String, String> {
    optional_string(map, key).ok_or_else(|| format!("{key} is required"))
}

/// Integers may arrive as JSON numbers or as numeric strings.
pub(crate) fn optional_usize(map: &Map<String, Value>, key: &str) -> Option<usize> {
    match map.get(key)? {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn required_usize(map: &Map<String, Value>, key: &str) -> Result<usize, String> {
    optional_usize(map, key).ok_or_else(|| format!("{key} must be a non-negative integer"))
}

pub(crate) fn string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter_map(trimmed_non_empty)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => trimmed_non_empty(s).map(|s| vec![s.to_string()]).unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub(crate) fn required_object(map: &Map<String, Value>, key: &str) -> Result<Map<String, Value>, String> {
    match map.get(key) {
        Some(Value::Object(obj)) => Ok(obj.clone()),
        Some(_) => Err(format!("{key} must be an object")),
        None => Err(format!("{key} is required")),
    }
}

pub(crate) fn trimmed_non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::context;
    use super::*;
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::vector_store::testing::CannedVectorStore;

    #[test]
    fn names_round_trip_and_sixteen_are_exposed() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::from_name(tool.name()), Some(tool));
        }
        assert_eq!(ToolName::from_name("rm_rf"), None);

        let (ctx, _, _) = context(ScriptedLlm::default(), CannedVectorStore::default(), 0.0);
        let tools = ToolRegistry::new(ctx).llm_tools();
        assert_eq!(tools.len(), 16);
        let names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t["function"]["name"].as_str())
            .collect();
        assert!(names.contains(&"run_data_retriever"));
        assert!(!names.contains(&"change_product_context"));
        assert!(tools.iter().all(|t| t["function"]["parameters"]["type"] == "object"));
    }

    #[tokio::test]
    async fn unmet_requirement_blocks_the_tool() {
        let (ctx, llm, _) = context(ScriptedLlm::default(), CannedVectorStore::default(), 0.0);
        let registry = ToolRegistry::new(ctx);
        let mut ws = Workspace::new();

        let outcome = registry
            .dispatch(ToolName::CreatePersonas, &Map::new(), &mut ws)
            .await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some(Requirement::RetrievedData.missing_message())
        );
        assert_eq!(llm.request_count(), 0);
    }

    #[tokio::test]
    async fn tool_errors_become_failed_outcomes() {
        let (ctx, _, _) = context(ScriptedLlm::default(), CannedVectorStore::default(), 0.0);
        let registry = ToolRegistry::new(ctx);
        let mut ws = Workspace::new();
        let args = json!({ "persona_data": { "title": "no name" } });

        let outcome = registry
            .dispatch(
                ToolName::CreatePersonaFromManualInput,
                args.as_object().unwrap(),
                &mut ws,
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("name"));
        assert!(ws.artifacts.personas.is_empty());
    }

    #[test]
    fn argument_helpers_accept_loose_types() {
        let args = json!({ "n": "4", "m": 2, "s": "  ", "list": ["a", " ", "b"], "one": "x" });
        let map = args.as_object().unwrap();
        assert_eq!(optional_usize(map, "n"), Some(4));
        assert_eq!(optional_usize(map, "m"), Some(2));
        assert_eq!(optional_string(map, "s"), None);
        assert_eq!(string_list(map, "list"), vec!["a", "b"]);
        assert_eq!(string_list(map, "one"), vec!["x"]);
        assert!(required_string(map, "missing").is_err());
        assert!(required_object(map, "n").is_err());
    }
}
