use crate::models::workspace::{Artifacts, Workspace};

/// Analysis stages in the order the workflow walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DataRetrieval,
    Clustering,
    TopicModeling,
    OpportunityScoring,
    ActionMap,
    Persona,
    ServiceIdea,
    DataPlan,
    CdpDefinition,
}

impl Stage {
    pub const ORDERED: [Stage; 9] = [
        Stage::DataRetrieval,
        Stage::Clustering,
        Stage::TopicModeling,
        Stage::OpportunityScoring,
        Stage::ActionMap,
        Stage::Persona,
        Stage::ServiceIdea,
        Stage::DataPlan,
        Stage::CdpDefinition,
    ];

    pub fn is_complete(self, artifacts: &Artifacts) -> bool {
        match self {
            Stage::DataRetrieval => artifacts.has_retrieved_data(),
            Stage::Clustering => artifacts.cx_ward_clustering_results.is_some(),
            Stage::TopicModeling => !artifacts.cx_lda_results.is_empty(),
            Stage::OpportunityScoring => !artifacts.cx_opportunity_scores.is_empty(),
            Stage::ActionMap => !artifacts.cx_cam_results.is_empty(),
            Stage::Persona => !artifacts.personas.is_empty(),
            Stage::ServiceIdea => !artifacts.service_ideas.is_empty(),
            Stage::DataPlan => !artifacts.data_plan_for_service.is_empty(),
            Stage::CdpDefinition => !artifacts.cdp_definition.is_empty(),
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            Stage::DataRetrieval => {
                "Start by searching VOC data. Example: {\"type\": \"data_retriever_request\", \"keyword\": \"살균\", \"date_range\": \"최근 1년\", \"product_type\": \"스타일러\"}"
            }
            Stage::Clustering => {
                "Run word clustering to group customers by interest. Example: {\"type\": \"chat_message\", \"content\": \"Cluster the data\"}"
            }
            Stage::TopicModeling => {
                "Run topic modeling to identify customer actions. Example: {\"type\": \"chat_message\", \"content\": \"Run topic modeling on cluster 0\"}"
            }
            Stage::OpportunityScoring => {
                "Calculate opportunity scores to prioritize business opportunities. Example: {\"type\": \"chat_message\", \"content\": \"Calculate opportunity scores\"}"
            }
            Stage::ActionMap => {
                "Create a customer action map (CAM) to analyze goals and pain points. Example: {\"type\": \"chat_message\", \"content\": \"Create a CAM for topic 0-1\"}"
            }
            Stage::Persona => {
                "Create personas from the customer insights. Example: {\"type\": \"chat_message\", \"content\": \"Create personas\"}"
            }
            Stage::ServiceIdea => {
                "Propose service ideas for a persona. Example: {\"type\": \"chat_message\", \"content\": \"Suggest service ideas\"}"
            }
            Stage::DataPlan => {
                "Write a data plan for a service idea. Example: {\"type\": \"chat_message\", \"content\": \"Create a data plan\"}"
            }
            Stage::CdpDefinition => {
                "Write the final C-D-P definition. Example: {\"type\": \"chat_message\", \"content\": \"Write the C-D-P definition\"}"
            }
        }
    }
}

pub const ALL_STAGES_DONE: &str =
    "Every stage is complete. Ask for further analysis or modifications any time!";

/// What a tool needs in the artifact store before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    RetrievedData,
    Clustering,
    LdaTopics,
    OpportunityScores,
    Personas,
    ServiceIdeas,
    DataPlans,
    SelectedCdp,
}

impl Requirement {
    pub fn is_met(self, artifacts: &Artifacts) -> bool {
        match self {
            Requirement::RetrievedData => artifacts.has_retrieved_data(),
            Requirement::Clustering => {
                artifacts.cx_ward_clustering_results.is_some() && artifacts.cx_temp_data.is_some()
            }
            Requirement::LdaTopics => !artifacts.cx_lda_results.is_empty(),
            Requirement::OpportunityScores => !artifacts.cx_opportunity_scores.is_empty(),
            Requirement::Personas => !artifacts.personas.is_empty(),
            Requirement::ServiceIdeas => !artifacts.service_ideas.is_empty(),
            Requirement::DataPlans => !artifacts.data_plan_for_service.is_empty(),
            Requirement::SelectedCdp => artifacts.selected_cdp_definition.is_some(),
        }
    }

    pub fn missing_message(self) -> &'static str {
        match self {
            Requirement::RetrievedData => {
                "No VOC data has been retrieved yet. Run a data search first."
            }
            Requirement::Clustering => {
                "Word clustering has not been run yet. Cluster the retrieved VOC data first."
            }
            Requirement::LdaTopics => {
                "No topic modeling results yet. Run topic modeling on a cluster first."
            }
            Requirement::OpportunityScores => {
                "Opportunity scores have not been calculated yet. Calculate them first."
            }
            Requirement::Personas => "No personas exist yet. Create personas first.",
            Requirement::ServiceIdeas => {
                "No service ideas exist yet. Create service ideas for a persona first."
            }
            Requirement::DataPlans => {
                "No data plan exists yet. Create a data plan for a service first."
            }
            Requirement::SelectedCdp => {
                "There is no C-D-P definition to modify. Create one first."
            }
        }
    }
}

/// Structured request types a front-end can send instead of free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    DataRetriever,
    ManualPersona,
    ManualService,
    ChangeProductType,
}

impl RequestKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "data_retriever_request" => Some(Self::DataRetriever),
            "manual_persona_request" => Some(Self::ManualPersona),
            "manual_service_request" => Some(Self::ManualService),
            "change_product_type_request" => Some(Self::ChangeProductType),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataRetriever => "data_retriever_request",
            Self::ManualPersona => "manual_persona_request",
            Self::ManualService => "manual_service_request",
            Self::ChangeProductType => "change_product_type_request",
        }
    }
}

pub fn suggest_next_step(workspace: &Workspace) -> String {
    let artifacts = &workspace.artifacts;
    let recent = workspace
        .last_request_type
        .as_deref()
        .and_then(RequestKind::parse);

    let recent_hint = match recent {
        Some(RequestKind::ManualService) if Stage::ServiceIdea.is_complete(artifacts) => {
            Some(Stage::DataPlan)
        }
        Some(RequestKind::ManualPersona) if Stage::Persona.is_complete(artifacts) => {
            Some(Stage::ServiceIdea)
        }
        Some(RequestKind::DataRetriever) if Stage::DataRetrieval.is_complete(artifacts) => {
            Some(Stage::Clustering)
        }
        _ => None,
    };
    if let Some(stage) = recent_hint {
        return stage.suggestion().to_string();
    }

    Stage::ORDERED
        .iter()
        .find(|stage| !stage.is_complete(artifacts))
        .map(|stage| stage.suggestion().to_string())
        .unwrap_or_else(|| ALL_STAGES_DONE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::workspace::{
        CdpDefinition, ClusteringResult, CustomerActionMap, DataPlan, LdaTopic, MiningState,
        OpportunityScore, Persona, RetrievedData, ServiceIdea,
    };

    fn complete_workspace() -> Workspace {
        let mut ws = Workspace::new();
        let a = &mut ws.artifacts;
        a.retrieved_data = Some(RetrievedData::default());
        a.cx_ward_clustering_results = Some(ClusteringResult::default());
        a.cx_temp_data = Some(MiningState::default());
        a.cx_lda_results.push(LdaTopic::default());
        a.cx_opportunity_scores.push(OpportunityScore::default());
        a.cx_cam_results.push(CustomerActionMap::default());
        a.personas.push(Persona::default());
        a.service_ideas.push(ServiceIdea::default());
        a.data_plan_for_service.push(DataPlan::default());
        a.cdp_definition.push(CdpDefinition::default());
        ws
    }

    #[test]
    fn empty_workspace_starts_with_retrieval() {
        let ws = Workspace::new();
        assert_eq!(suggest_next_step(&ws), Stage::DataRetrieval.suggestion());
    }

    #[test]
    fn first_incomplete_stage_wins() {
        let mut ws = complete_workspace();
        ws.artifacts.cx_opportunity_scores.clear();
        ws.artifacts.personas.clear();
        assert_eq!(suggest_next_step(&ws), Stage::OpportunityScoring.suggestion());
    }

    #[test]
    fn recent_request_takes_priority() {
        let mut ws = Workspace::new();
        ws.artifacts.service_ideas.push(ServiceIdea::default());
        ws.last_request_type = Some("manual_service_request".into());
        assert_eq!(suggest_next_step(&ws), Stage::DataPlan.suggestion());

        ws.last_request_type = Some("manual_persona_request".into());
        // No personas yet, so the ordered walk applies.
        assert_eq!(suggest_next_step(&ws), Stage::DataRetrieval.suggestion());

        ws.artifacts.retrieved_data = Some(RetrievedData::default());
        ws.last_request_type = Some("data_retriever_request".into());
        assert_eq!(suggest_next_step(&ws), Stage::Clustering.suggestion());
    }

    #[test]
    fn completed_pipeline_reports_done() {
        assert_eq!(suggest_next_step(&complete_workspace()), ALL_STAGES_DONE);
    }

    #[test]
    fn requirements_follow_artifacts() {
        let ws = complete_workspace();
        assert!(Requirement::Clustering.is_met(&ws.artifacts));
        assert!(!Requirement::SelectedCdp.is_met(&ws.artifacts));
        assert!(!Requirement::RetrievedData.is_met(&Artifacts::default()));
    }

    #[test]
    fn request_kinds_round_trip_through_names() {
        for kind in [
            RequestKind::DataRetriever,
            RequestKind::ManualPersona,
            RequestKind::ManualService,
            RequestKind::ChangeProductType,
        ] {
            assert_eq!(RequestKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RequestKind::parse("chat_message"), None);
    }
}
