use serde_json::{json, Map, Value};
use tracing::info;

use super::product_context::{
    fetch_product_context, fetch_sensor_context, get_columns_for_product, normalize_product_type,
};
use super::{optional_string, required_string, ToolContext};
use crate::models::workspace::{upsert_by, DataPlan, Workspace};
use crate::pipeline::Requirement;
use crate::services::token_budget::prompt_json;

/// Plan name used when the service was only described in free text.
pub const CUSTOM_IDEA_NAME: &str = "사용자 정의 아이디어";

const NO_PRODUCT_TIP: &str =
    "Naming a related product category (e.g. '스타일러', '디오스') gives a more concrete data plan.";

fn plan_format(service_name: &str) -> String {
    format!(
        r#"{{
  "data_plan": {{
    "service_name": "{service_name}",
    "product_data_utilization": [
      {{"idea": "...", "details": "...", "required_data": ["existing product data field"]}}
    ],
    "new_data_from_sensors": [
      {{"idea": "...", "details": "how existing sensor data is combined", "required_sensors": ["existing sensor"]}}
    ],
    "new_sensor_recommendation": [
      {{"sensor_name": "...", "collectable_data": "...", "value_proposition": "..."}}
    ],
    "external_data_integration": [
      {{"external_data_name": "...", "integration_plan": "...", "value_proposition": "..."}}
    ]
  }},
  "recommendation_message": "..."
}}"#
    )
}

/// Accepts `{"data_plan": {...}}` or a bare plan object.
fn parse_plan(mut value: Value, service_name: &str) -> Result<(DataPlan, Option<String>), String> {
    let message = value
        .get("recommendation_message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|m| !m.trim().is_empty());
    let wrapped = value.get("data_plan").map(Value::is_object).unwrap_or(false);
    let body = if wrapped {
        value["data_plan"].take()
    } else {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("recommendation_message");
        }
        value
    };
    if !body.is_object() {
        return Err("the model response has no data plan".to_string());
    }
    let mut plan: DataPlan = serde_json::from_value(body).map_err(|e| format!("invalid data plan: {e}"))?;
    plan.service_name = service_name.to_string();
    Ok((plan, message))
}

pub async fn create_data_plan_for_service(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let service_name = optional_string(args, "service_name");
    let service_description = optional_string(args, "service_description");

    let (service_context, search_keyword, plan_name) = match (service_name, service_description) {
        (Some(name), _) => {
            let idea = ws.artifacts.find_service_idea(&name).cloned().ok_or_else(|| {
                let available: Vec<String> = ws
                    .artifacts
                    .service_ideas
                    .iter()
                    .map(|i| format!("'{}'", i.service_name))
                    .collect();
                format!(
                    "Service idea '{name}' was not found. Available ideas: [{}]",
                    available.join(", ")
                )
            })?;
            ws.artifacts.selected_service_idea = Some(idea.clone());
            let context = serde_json::to_value(&idea)
                .map(|v| prompt_json(&v, 1500))
                .map_err(|e| e.to_string())?;
            let keyword = format!("{} {}", idea.service_name, idea.description);
            (context, keyword, name)
        }
        (None, Some(description)) => (
            format!("A service idea described by the user: {description}"),
            description,
            CUSTOM_IDEA_NAME.to_string(),
        ),
        (None, None) => {
            return Err("Either service_name or service_description is required to create a data plan.".to_string())
        }
    };

    let product_type = normalize_product_type(optional_string(args, "product_type"))
        .or_else(|| ws.artifacts.product_type.clone());
    let product_section = match &product_type {
        Some(product) => {
            let columns = get_columns_for_product(ctx, product).await;
            let feature_docs = fetch_product_context(ctx, &search_keyword, Some(product.as_str()), 5).await;
            let sensor_docs = fetch_sensor_context(ctx, Some(product.as_str()), 10).await;
            let section = format!(
                "### Product and sensor context (category: {product})\n\
                 - Existing product data fields: {}\n\
                 - Related product feature documents: {}\n\
                 - Related sensor data (samples): {}",
                prompt_json(&Value::Object(columns.clone()), 1500),
                prompt_json(&Value::Array(feature_docs.clone()), 2000),
                prompt_json(&Value::Array(sensor_docs.clone()), 2000),
            );
            let artifacts = &mut ws.artifacts;
            artifacts.product_type = Some(product.clone());
            artifacts.columns_product = columns;
            artifacts.product_data = feature_docs;
            artifacts.sensor_data = sensor_docs;
            section
        }
        None => format!("### Product and sensor context\nNo related product category is given.\n{NO_PRODUCT_TIP}"),
    };

    let prompt = format!(
        "You are a data strategist who designs the data strategy of new services.\n\
         Write a concrete, actionable data plan that makes the service below succeed.\n\n\
         ### Service idea\n{service_context}\n\n{product_section}\n\n\
         ### Instructions\n\
         1. Existing product data: 2-3 ideas that combine the existing product data fields to strengthen the service.\n\
         2. New data from existing sensors: 2-3 ideas that derive meaningful new data from the sensor samples.\n\
         3. New sensors: recommend 1-2 sensors the service lacks, with the data they collect and its value.\n\
         4. External data: recommend 1-2 external data sources and how combining them with internal data creates value.\n\
         Write every value in Korean and return only JSON in this format:\n{format}",
        format = plan_format(&plan_name),
    );

    let value = ctx.llm.complete_json(&ctx.models.planning, prompt).await?;
    let (plan, message) = parse_plan(value, &plan_name)?;
    let message = message.or_else(|| product_type.is_none().then(|| NO_PRODUCT_TIP.to_string()));
    info!("[DATA_PLAN] plan for '{}' (product_type={:?})", plan_name, product_type);

    let artifacts = &mut ws.artifacts;
    upsert_by(&mut artifacts.data_plan_for_service, plan.clone(), |a, b| {
        a.service_name == b.service_name
    });
    artifacts.selected_data_plan_for_service = Some(plan.clone());
    artifacts.data_plan_recommendation_message = message.clone();
    Ok(json!({ "data_plan": plan, "recommendation_message": message }))
}

pub async fn modify_data_plan(ctx: &ToolContext, ws: &mut Workspace, args: &Map<String, Value>) -> Result<Value, String> {
    let request = required_string(args, "modification_request")?;
    let current = ws
        .artifacts
        .selected_data_plan_for_service
        .clone()
        .or_else(|| ws.artifacts.data_plan_for_service.last().cloned())
        .ok_or_else(|| Requirement::DataPlans.missing_message().to_string())?;
    let current_json = serde_json::to_value(&current).map_err(|e| e.to_string())?;

    let prompt = format!(
        "You are a data strategist. Revise the existing data plan according to the user's request.\n\
         Keep parts the request does not mention unchanged. Write every value in Korean.\n\n\
         ### Existing data plan\n{existing}\n\n\
         ### User request\n\"{request}\"\n\n\
         Return the complete revised plan as JSON in this format:\n{format}",
        existing = prompt_json(&current_json, 3000),
        format = plan_format(&current.service_name),
    );
    let value = ctx.llm.complete_json(&ctx.models.planning, prompt).await?;
    let (plan, _) = parse_plan(value, &current.service_name)?;

    let artifacts = &mut ws.artifacts;
    upsert_by(&mut artifacts.data_plan_for_service, plan.clone(), |a, b| {
        a.service_name == b.service_name
    });
    artifacts.selected_data_plan_for_service = Some(plan.clone());
    Ok(json!({ "data_plan": plan }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::builtin::product_context::SENSOR_COLLECTION;
    use crate::builtin::testing::context;
    use crate::models::workspace::ServiceIdea;
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::vector_store::testing::CannedVectorStore;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn plan_reply(name: &str) -> Value {
        json!({
            "data_plan": {
                "service_name": name,
                "product_data_utilization": [{ "idea": "사용 패턴", "details": "d" }],
                "new_data_from_sensors": [{ "idea": "습도 추세", "details": "d" }],
                "new_sensor_recommendation": [{ "sensor_name": "VOC 센서", "collectable_data": "유해가스" }],
                "external_data_integration": []
            },
            "recommendation_message": "좋습니다"
        })
    }

    #[tokio::test]
    async fn plan_requires_a_service() {
        let (ctx, _, _) = context(ScriptedLlm::default(), CannedVectorStore::default(), 0.0);
        let mut ws = Workspace::new();
        assert!(create_data_plan_for_service(&ctx, &mut ws, &Map::new())
            .await
            .unwrap_err()
            .contains("service_name or service_description"));
        assert!(create_data_plan_for_service(&ctx, &mut ws, &args(json!({ "service_name": "없음" })))
            .await
            .unwrap_err()
            .contains("not found"));
    }

    #[tokio::test]
    async fn plan_for_stored_idea_gathers_product_context() {
        let mut scroll_points = HashMap::new();
        scroll_points.insert(
            SENSOR_COLLECTION.to_string(),
            vec![json!({ "sensor": "humidity" }).as_object().cloned().unwrap()],
        );
        let store = CannedVectorStore {
            scroll_points,
            ..Default::default()
        };
        let llm = ScriptedLlm::json(vec![plan_reply("다른 이름"), plan_reply("x")]);
        let (ctx, llm, _) = context(llm, store, 0.0);
        let mut ws = Workspace::new();
        ws.artifacts.service_ideas.push(ServiceIdea {
            service_name: "케어 구독".to_string(),
            description: "살균 관리".to_string(),
            ..Default::default()
        });

        let a = args(json!({ "service_name": "케어 구독", "product_type": "스타일러" }));
        create_data_plan_for_service(&ctx, &mut ws, &a).await.unwrap();
        create_data_plan_for_service(&ctx, &mut ws, &a).await.unwrap();

        let artifacts = &ws.artifacts;
        assert_eq!(artifacts.data_plan_for_service.len(), 1);
        assert_eq!(artifacts.data_plan_for_service[0].service_name, "케어 구독");
        assert_eq!(artifacts.selected_service_idea.as_ref().unwrap().service_name, "케어 구독");
        assert_eq!(artifacts.sensor_data.len(), 1);
        assert_eq!(artifacts.product_type.as_deref(), Some("스타일러"));
        assert_eq!(artifacts.data_plan_recommendation_message.as_deref(), Some("좋습니다"));
        let request = &llm.requests.lock().unwrap()[0];
        assert_eq!(request.model, "planning-model");
        assert!(request.json_mode);
    }

    #[tokio::test]
    async fn described_service_without_product_gets_tip() {
        let mut reply = plan_reply("whatever");
        reply.as_object_mut().unwrap().remove("recommendation_message");
        let (ctx, _, store) = context(ScriptedLlm::json(vec![reply]), CannedVectorStore::default(), 0.0);
        let mut ws = Workspace::new();

        create_data_plan_for_service(&ctx, &mut ws, &args(json!({ "service_description": "반려동물 털 관리" })))
            .await
            .unwrap();
        assert_eq!(ws.artifacts.data_plan_for_service[0].service_name, CUSTOM_IDEA_NAME);
        assert_eq!(ws.artifacts.data_plan_recommendation_message.as_deref(), Some(NO_PRODUCT_TIP));
        assert!(store.scroll_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn modification_keeps_the_service_name() {
        let bare_plan = plan_reply("renamed")["data_plan"].clone();
        let (ctx, _, _) = context(ScriptedLlm::json(vec![bare_plan]), CannedVectorStore::default(), 0.0);
        let mut ws = Workspace::new();
        let plan = DataPlan {
            service_name: "케어 구독".to_string(),
            ..Default::default()
        };
        ws.artifacts.data_plan_for_service.push(plan);

        modify_data_plan(&ctx, &mut ws, &args(json!({ "modification_request": "외부 데이터 추가" })))
            .await
            .unwrap();
        assert_eq!(ws.artifacts.data_plan_for_service.len(), 1);
        let selected = ws.artifacts.selected_data_plan_for_service.as_ref().unwrap();
        assert_eq!(selected.service_name, "케어 구독");
        assert_eq!(selected.new_sensor_recommendation.len(), 1);
    }
}
