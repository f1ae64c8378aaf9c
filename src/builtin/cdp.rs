use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::{required_string, ToolContext};
use crate::models::workspace::{
    lenient_string, lenient_strings, upsert_by, Artifacts, CdpAccelerator, CdpCompetitiveness, CdpConcept,
    CdpCoreExperience, CdpCustomer, CdpDefinition, CdpDx, CdpDxSection, CdpPerformance, CdpTarget, DataPlan,
    Persona, ServiceIdea, Workspace,
};
use crate::pipeline::Requirement;
use crate::services::token_budget::prompt_json;

const DEFAULT_DELIGHT_GOAL: &str = "정의된 고객 감동 목표 없음";
const MARKET_INFO: &str = "대한민국 전체 가구의 핵심 니즈를 공략하는 주요 타겟 고객층";
const CORE_EXPERIENCE_TITLE: &str = "우리가 만드는 고객가치는?";
const CONCEPT_FIND: &str = "살균된 가습을 안심하고 이용할 수 있는 경험";
const UNDECIDED: &str = "미정";
const VALUE_GRAPH: &str = "고객가치 그래프 (시간에 따른 가치 변화, 예: '23.12, '24.1...)";
const TRIGGER_TITLE: &str = "CX 기획 Data 기반 발굴";
const ACCELERATOR_TITLE: &str = "CX 구현 솔루션 제공";
const TRACKER_TITLE: &str = "CX검증 Data 기반 고객경험 모니터링";

const DX_FORMAT: &str = r#"{
  "customer_delight_goal": "a moving delight-goal slogan",
  "dx_trigger_items": ["data-driven discovery idea for CX planning", "..."],
  "dx_accelerator_up_contents": ["UP-Contents service idea", "..."],
  "dx_accelerator_data_driven": ["data-driven experience idea", "..."],
  "dx_tracker_items": ["key metric for CX validation", "..."]
}"#;

/// The parts of a C-D-P definition the model writes. Everything else is assembled.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DxContent {
    #[serde(deserialize_with = "lenient_string")]
    customer_delight_goal: String,
    #[serde(deserialize_with = "lenient_strings")]
    dx_trigger_items: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    dx_accelerator_up_contents: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    dx_accelerator_data_driven: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    dx_tracker_items: Vec<String>,
}

struct Sources {
    persona: Persona,
    idea: ServiceIdea,
    plan: DataPlan,
}

fn selected_sources(artifacts: &Artifacts) -> Result<Sources, String> {
    let plan = artifacts
        .selected_data_plan_for_service
        .clone()
        .ok_or_else(|| Requirement::DataPlans.missing_message().to_string())?;
    sources_with_plan(artifacts, plan)
}

fn sources_with_plan(artifacts: &Artifacts, plan: DataPlan) -> Result<Sources, String> {
    let persona = artifacts.selected_persona.clone().ok_or_else(|| {
        "A selected persona is required for the C-D-P definition. Create or pick a persona first.".to_string()
    })?;
    let idea = artifacts.selected_service_idea.clone().ok_or_else(|| {
        "A selected service idea is required for the C-D-P definition. Create or pick a service idea first."
            .to_string()
    })?;
    Ok(Sources { persona, idea, plan })
}

fn joined_field(item: &Value, left: &str, right: &str) -> String {
    let text = |key: &str| item.get(key).and_then(Value::as_str).unwrap_or("").to_string();
    format!("{}: {}", text(left), text(right))
}

fn assemble(sources: &Sources, content: DxContent) -> CdpDefinition {
    let Sources { persona, idea, plan } = sources;
    let delight_goal = if content.customer_delight_goal.trim().is_empty() {
        DEFAULT_DELIGHT_GOAL.to_string()
    } else {
        content.customer_delight_goal
    };
    let unique = plan
        .new_data_from_sensors
        .iter()
        .map(|item| joined_field(item, "idea", "details"))
        .chain(
            plan.new_sensor_recommendation
                .iter()
                .map(|item| joined_field(item, "sensor_name", "collectable_data")),
        )
        .collect();

    CdpDefinition {
        title: format!("유첨. {} C-D-P 정의서", idea.service_name),
        customer_delight_goal: delight_goal,
        cx: CdpCustomer {
            target_definition: CdpTarget {
                description: format!("{} ({})", persona.title, persona.demographics),
                quote: persona.motivating_quote.clone(),
                market_info: MARKET_INFO.to_string(),
            },
            core_experience: CdpCoreExperience {
                title: CORE_EXPERIENCE_TITLE.to_string(),
                care: idea.description.clone(),
                customization: idea.solved_pain_points.clone(),
                servitization: idea.service_scalability.clone(),
            },
        },
        performance: CdpPerformance {
            concept: CdpConcept {
                find: CONCEPT_FIND.to_string(),
                unique,
            },
            competitiveness: CdpCompetitiveness {
                lump_sum_sales: UNDECIDED.to_string(),
                subscription_sales: UNDECIDED.to_string(),
                revenue: UNDECIDED.to_string(),
            },
            customer_value_graph: VALUE_GRAPH.to_string(),
        },
        dx: CdpDx {
            trigger: CdpDxSection {
                title: TRIGGER_TITLE.to_string(),
                items: content.dx_trigger_items,
            },
            accelerator: CdpAccelerator {
                title: ACCELERATOR_TITLE.to_string(),
                up_contents_service: content.dx_accelerator_up_contents,
                data_driven_experience: content.dx_accelerator_data_driven,
            },
            tracker: CdpDxSection {
                title: TRACKER_TITLE.to_string(),
                items: content.dx_tracker_items,
            },
        },
    }
}

async fn generate_dx(ctx: &ToolContext, prompt: String) -> Result<DxContent, String> {
    let value = ctx.llm.complete_json(&ctx.models.planning, prompt).await?;
    if !value.is_object() {
        return Err("the model response is not a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("invalid C-D-P content: {e}"))
}

fn store(artifacts: &mut Artifacts, definition: &CdpDefinition) {
    upsert_by(&mut artifacts.cdp_definition, definition.clone(), |a, b| a.title == b.title);
    artifacts.selected_cdp_definition = Some(definition.clone());
}

pub async fn create_cdp_definition(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let plan_name = required_string(args, "data_plan_service_name")?;
    let plan = ws
        .artifacts
        .find_data_plan(&plan_name)
        .cloned()
        .ok_or_else(|| format!("No data plan named '{plan_name}' was found."))?;
    let sources = sources_with_plan(&ws.artifacts, plan)?;

    let as_json = |v: Result<Value, serde_json::Error>| v.map(|v| prompt_json(&v, 1500)).map_err(|e| e.to_string());
    let prompt = format!(
        "You are a business strategist who defines the core value and performance metrics of new services.\n\
         Analyse the persona, service idea and data plan below. Set the customer delight goal and complete the \
         DX (digital transformation) part of the C-D-P definition.\n\n\
         ### 1. Persona\n{persona}\n\n\
         ### 2. Service idea\n{idea}\n\n\
         ### 3. Data plan\n{plan}\n\n\
         Give 2-3 concrete ideas per list. Write every value in Korean and return only JSON in this format:\n{DX_FORMAT}",
        persona = as_json(serde_json::to_value(&sources.persona))?,
        idea = as_json(serde_json::to_value(&sources.idea))?,
        plan = as_json(serde_json::to_value(&sources.plan))?,
    );
    let content = generate_dx(ctx, prompt).await?;
    let definition = assemble(&sources, content);
    info!("[CDP] created '{}'", definition.title);

    ws.artifacts.selected_data_plan_for_service = Some(sources.plan);
    store(&mut ws.artifacts, &definition);
    Ok(json!({ "cdp_definition": definition }))
}

pub async fn modify_cdp_definition(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let request = required_string(args, "modification_request")?;
    let existing = ws
        .artifacts
        .selected_cdp_definition
        .clone()
        .ok_or_else(|| Requirement::SelectedCdp.missing_message().to_string())?;
    let sources = selected_sources(&ws.artifacts)?;

    let prompt = format!(
        "You are a business strategist. Revise the existing C-D-P definition according to the user's request.\n\
         The revision covers the customer delight goal and every DX item (trigger, accelerator, tracker).\n\n\
         ### Existing definition\n\
         - customer_delight_goal: {goal}\n\
         - dx_trigger_items: {trigger:?}\n\
         - dx_accelerator_up_contents: {up:?}\n\
         - dx_accelerator_data_driven: {driven:?}\n\
         - dx_tracker_items: {tracker:?}\n\n\
         ### User request\n\"{request}\"\n\n\
         Regenerate every item, written in Korean, as JSON in this format:\n{DX_FORMAT}",
        goal = existing.customer_delight_goal,
        trigger = existing.dx.trigger.items,
        up = existing.dx.accelerator.up_contents_service,
        driven = existing.dx.accelerator.data_driven_experience,
        tracker = existing.dx.tracker.items,
    );
    let content = generate_dx(ctx, prompt).await?;
    let definition = assemble(&sources, content);
    info!("[CDP] modified '{}'", definition.title);

    store(&mut ws.artifacts, &definition);
    Ok(json!({ "cdp_definition": definition }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::testing::context;
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::vector_store::testing::CannedVectorStore;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn ready_workspace() -> Workspace {
        let mut ws = Workspace::new();
        let persona = Persona {
            name: "김민지".to_string(),
            title: "꼼꼼한 위생관리맘".to_string(),
            demographics: "30대 후반".to_string(),
            motivating_quote: "확실한 게 좋아요".to_string(),
            ..Default::default()
        };
        let idea = ServiceIdea {
            service_name: "케어 구독".to_string(),
            description: "살균 관리 구독".to_string(),
            solved_pain_points: vec!["불안".to_string()],
            service_scalability: "정수기로 확장".to_string(),
            ..Default::default()
        };
        let plan = DataPlan {
            service_name: "케어 구독".to_string(),
            new_data_from_sensors: vec![json!({ "idea": "습도 추세", "details": "시간대별 분석" })],
            new_sensor_recommendation: vec![json!({ "sensor_name": "VOC 센서", "collectable_data": "유해가스" })],
            ..Default::default()
        };
        ws.artifacts.selected_persona = Some(persona.clone());
        ws.artifacts.personas.push(persona);
        ws.artifacts.selected_service_idea = Some(idea.clone());
        ws.artifacts.service_ideas.push(idea);
        ws.artifacts.data_plan_for_service.push(plan);
        ws
    }

    fn dx_reply(goal: &str) -> Value {
        json!({
            "customer_delight_goal": goal,
            "dx_trigger_items": ["리뷰 분석"],
            "dx_accelerator_up_contents": ["맞춤 모드"],
            "dx_accelerator_data_driven": "공기질 연동",
            "dx_tracker_items": ["월 사용 시간"]
        })
    }

    #[tokio::test]
    async fn definition_is_assembled_from_selected_artifacts() {
        let (ctx, llm, _) = context(ScriptedLlm::json(vec![dx_reply("안심 가습")]), CannedVectorStore::default(), 0.0);
        let mut ws = ready_workspace();

        create_cdp_definition(&ctx, &mut ws, &args(json!({ "data_plan_service_name": "케어 구독" })))
            .await
            .unwrap();

        let cdp = ws.artifacts.selected_cdp_definition.as_ref().unwrap();
        assert_eq!(cdp.title, "유첨. 케어 구독 C-D-P 정의서");
        assert_eq!(cdp.customer_delight_goal, "안심 가습");
        assert_eq!(cdp.cx.target_definition.description, "꼼꼼한 위생관리맘 (30대 후반)");
        assert_eq!(cdp.cx.target_definition.quote, "확실한 게 좋아요");
        assert_eq!(cdp.cx.core_experience.customization, vec!["불안"]);
        assert_eq!(
            cdp.performance.concept.unique,
            vec!["습도 추세: 시간대별 분석", "VOC 센서: 유해가스"]
        );
        assert_eq!(cdp.performance.competitiveness.revenue, UNDECIDED);
        assert_eq!(cdp.dx.accelerator.data_driven_experience, vec!["공기질 연동"]);
        assert_eq!(cdp.dx.tracker.title, TRACKER_TITLE);
        assert!(ws.artifacts.selected_data_plan_for_service.is_some());
        assert_eq!(llm.requests.lock().unwrap()[0].model, "planning-model");
    }

    #[tokio::test]
    async fn creation_needs_plan_persona_and_idea() {
        let (ctx, llm, _) = context(ScriptedLlm::default(), CannedVectorStore::default(), 0.0);
        let mut ws = ready_workspace();
        let err = create_cdp_definition(&ctx, &mut ws, &args(json!({ "data_plan_service_name": "없음" })))
            .await
            .unwrap_err();
        assert!(err.contains("'없음'"));

        ws.artifacts.selected_persona = None;
        ws.artifacts.selected_data_plan_for_service = None;
        let err = create_cdp_definition(&ctx, &mut ws, &args(json!({ "data_plan_service_name": "케어 구독" })))
            .await
            .unwrap_err();
        assert!(err.contains("persona"));
        assert!(ws.artifacts.selected_data_plan_for_service.is_none());
        assert_eq!(llm.request_count(), 0);
    }

    #[tokio::test]
    async fn modification_regenerates_goal_and_keeps_one_entry() {
        let llm = ScriptedLlm::json(vec![dx_reply("안심 가습"), json!({ "dx_trigger_items": ["새 발굴"] })]);
        let (ctx, llm, _) = context(llm, CannedVectorStore::default(), 0.0);
        let mut ws = ready_workspace();
        create_cdp_definition(&ctx, &mut ws, &args(json!({ "data_plan_service_name": "케어 구독" })))
            .await
            .unwrap();

        modify_cdp_definition(&ctx, &mut ws, &args(json!({ "modification_request": "발굴 항목을 바꿔줘" })))
            .await
            .unwrap();

        assert_eq!(ws.artifacts.cdp_definition.len(), 1);
        let cdp = ws.artifacts.selected_cdp_definition.as_ref().unwrap();
        assert_eq!(cdp.customer_delight_goal, DEFAULT_DELIGHT_GOAL);
        assert_eq!(cdp.dx.trigger.items, vec!["새 발굴"]);
        assert!(llm.prompt(1).contains("안심 가습"));
    }
}
