use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::product_context::get_columns_for_product;
use super::{optional_usize, required_object, required_string, ToolContext};
use crate::models::workspace::{upsert_by, Artifacts, Persona, ServiceIdea, Workspace};
use crate::services::token_budget::prompt_json;

const IDEA_FORMAT: &str = r#"{
  "service_ideas": [
    {
      "service_name": "AI 육아 위생 컨설턴트",
      "description": "아이의 연령과 건강 상태에 맞춰 의류와 장난감의 최적 살균 주기를 알려주고 가전을 자동 제어하는 구독형 서비스",
      "solved_pain_points": ["살균 효과를 눈으로 확인할 수 없어 불안하다"],
      "service_scalability": "ThinQ 앱 기능으로 시작해 영유아 건강 데이터 연동 프리미엄 구독으로 확장"
    }
  ]
}"#;

struct ProductContext {
    product_type: Option<String>,
    columns: Map<String, Value>,
    feature_docs: Vec<Value>,
}

fn persona_section(persona: Option<&Persona>) -> String {
    match persona {
        Some(p) => format!(
            "### Target persona\n\
             - Name: {} ({})\n\
             - Demographics: {}\n\
             - Needs and goals: {}\n\
             - **Pain points: {}**\n\
             - Motivating quote: \"{}\"",
            p.name,
            p.title,
            p.demographics,
            p.needs_and_goals.join(", "),
            p.pain_points.join(", "),
            p.motivating_quote
        ),
        None => "### Target persona\n- No persona is selected. Infer the target customer from the service idea.".to_string(),
    }
}

fn product_section(product: &ProductContext) -> String {
    match &product.product_type {
        Some(p) => format!(
            "### Existing product and features (category: {p})\n\
             - Product data fields: {}\n\
             - Related feature documents: {}",
            prompt_json(&Value::Object(product.columns.clone()), 1500),
            prompt_json(&Value::Array(product.feature_docs.clone()), 2500),
        ),
        None => "### Existing product and features\n- No product category is set.".to_string(),
    }
}

fn idea_prompt(persona: Option<&Persona>, product: &ProductContext, num_ideas: usize, seed_idea: Option<&ServiceIdea>) -> String {
    let seed = seed_idea
        .and_then(|idea| serde_json::to_value(idea).ok())
        .map(|idea| {
            format!(
                "\n### Idea proposed by the user\n{}\nPropose ideas that complement this idea and do not duplicate it.\n",
                prompt_json(&idea, 1000)
            )
        })
        .unwrap_or_default();
    format!(
        "You lead new-business planning and design innovative yet feasible services from customer data.\n\n\
         {persona}\n\n{product}\n{seed}\n\
         ### Instructions\n\
         Propose {num_ideas} new service ideas that:\n\
         1. clearly and directly solve at least one pain point of the persona;\n\
         2. describe the value and experience from the customer's point of view;\n\
         3. are new and creative, extending or complementing the existing product when one is given;\n\
         4. explain concretely how the service can grow (product links, subscriptions, personalisation, platforms).\n\
         Write every value in Korean and return only JSON in this format:\n{IDEA_FORMAT}",
        persona = persona_section(persona),
        product = product_section(product),
    )
}

fn parse_ideas(mut value: Value) -> Result<Vec<ServiceIdea>, String> {
    let list = value
        .get_mut("service_ideas")
        .map(Value::take)
        .ok_or_else(|| "the model response has no service_ideas".to_string())?;
    let ideas: Vec<ServiceIdea> =
        serde_json::from_value(list).map_err(|e| format!("invalid service idea list: {e}"))?;
    if ideas.is_empty() {
        return Err("the model returned no service ideas".to_string());
    }
    Ok(ideas)
}

fn sync_selected_idea(artifacts: &mut Artifacts) {
    if let Some(selected) = &artifacts.selected_service_idea {
        artifacts.selected_service_idea = artifacts.find_service_idea(&selected.service_name).cloned();
    }
}

/// Product columns and feature documents for the workspace's product type.
async fn load_product_context(ctx: &ToolContext, artifacts: &mut Artifacts) -> ProductContext {
    let product_type = artifacts.product_type.clone().or_else(|| {
        artifacts
            .retrieved_data
            .as_ref()
            .and_then(|d| d.product_type.clone())
    });
    let Some(product_type) = product_type else {
        return ProductContext {
            product_type: None,
            columns: Map::new(),
            feature_docs: Vec::new(),
        };
    };

    let columns = get_columns_for_product(ctx, &product_type).await;
    artifacts.columns_product = columns.clone();
    let feature_docs = artifacts
        .retrieved_data
        .as_ref()
        .map(|d| d.product_results.clone())
        .filter(|docs| !docs.is_empty())
        .unwrap_or_else(|| artifacts.product_data.clone());
    ProductContext {
        product_type: Some(product_type),
        columns,
        feature_docs,
    }
}

pub async fn create_service_ideas(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let persona_name = required_string(args, "persona_name")?;
    let num_ideas = optional_usize(args, "num_ideas").unwrap_or(3).max(1);

    let persona = ws.artifacts.find_persona(&persona_name).cloned().ok_or_else(|| {
        let available: Vec<String> = ws
            .artifacts
            .personas
            .iter()
            .map(|p| format!("'{}'", p.name))
            .collect();
        format!(
            "Persona '{persona_name}' was not found. Available personas: [{}]",
            available.join(", ")
        )
    })?;
    ws.artifacts.selected_persona = Some(persona.clone());

    let product = load_product_context(ctx, &mut ws.artifacts).await;
    let prompt = idea_prompt(Some(&persona), &product, num_ideas, None);
    let value = ctx.llm.complete_json(&ctx.models.tool, prompt).await?;
    let ideas = parse_ideas(value)?;
    info!("[SERVICE] {} ideas for persona '{}'", ideas.len(), persona_name);

    let artifacts = &mut ws.artifacts;
    artifacts.service_ideas = ideas;
    sync_selected_idea(artifacts);
    let mut payload = json!({ "persona": persona_name, "service_ideas": artifacts.service_ideas });
    if product.product_type.is_none() {
        payload["tip"] = json!("Naming a product category gives service ideas tailored to that product.");
    }
    Ok(payload)
}

/// Stores the user's idea and selects it, then asks for complementary ideas.
pub async fn create_service_ideas_from_manual_input(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let data = required_object(args, "service_data")?;
    let num_ideas = optional_usize(args, "num_ideas").unwrap_or(3);
    let mut idea: ServiceIdea =
        serde_json::from_value(Value::Object(data)).map_err(|e| format!("invalid service_data: {e}"))?;
    idea.service_name = idea.service_name.trim().to_string();
    if idea.service_name.is_empty() {
        return Err("service_data must include a non-empty service_name".to_string());
    }

    upsert_by(&mut ws.artifacts.service_ideas, idea.clone(), |a, b| {
        a.service_name == b.service_name
    });
    ws.artifacts.selected_service_idea = Some(idea.clone());
    info!("[SERVICE] saved manual idea '{}'", idea.service_name);

    if num_ideas == 0 {
        return Ok(json!({ "service_idea": idea, "additional_ideas": [] }));
    }

    let persona = ws.artifacts.selected_persona.clone();
    let product = load_product_context(ctx, &mut ws.artifacts).await;
    let prompt = idea_prompt(persona.as_ref(), &product, num_ideas, Some(&idea));
    let additional = match ctx.llm.complete_json(&ctx.models.tool, prompt).await.and_then(parse_ideas) {
        Ok(ideas) => ideas,
        Err(err) => {
            warn!("[SERVICE] complementary ideas failed: {}", err);
            return Ok(json!({
                "service_idea": idea,
                "additional_ideas": [],
                "message": format!("The idea was saved, but generating complementary ideas failed: {err}"),
            }));
        }
    };

    let artifacts = &mut ws.artifacts;
    for extra in additional.iter().filter(|x| x.service_name != idea.service_name) {
        upsert_by(&mut artifacts.service_ideas, extra.clone(), |a, b| {
            a.service_name == b.service_name
        });
    }
    Ok(json!({ "service_idea": idea, "additional_ideas": additional }))
}

pub async fn modify_service_ideas(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let request = required_string(args, "modification_request")?;
    let current = serde_json::to_value(&ws.artifacts.service_ideas).map_err(|e| e.to_string())?;
    let prompt = format!(
        "You are a service strategist. Revise the existing service ideas according to the user's request.\n\
         Keep ideas the request does not mention unchanged. Write every value in Korean.\n\n\
         ### Existing service ideas\n{existing}\n\n\
         ### User request\n\"{request}\"\n\n\
         Return the complete revised list as JSON in this format:\n{IDEA_FORMAT}",
        existing = prompt_json(&current, 3000),
    );
    let value = ctx.llm.complete_json(&ctx.models.tool, prompt).await?;
    let ideas = parse_ideas(value)?;

    let artifacts = &mut ws.artifacts;
    artifacts.service_ideas = ideas;
    sync_selected_idea(artifacts);
    Ok(json!({ "service_ideas": artifacts.service_ideas }))
}
