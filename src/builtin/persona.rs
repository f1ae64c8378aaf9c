use serde_json::{json, Map, Value};
use tracing::info;

use super::{optional_usize, required_object, required_string, string_list, ToolContext};
use crate::models::workspace::{upsert_by, Artifacts, Persona, Workspace};
use crate::pipeline::Requirement;
use crate::services::token_budget::prompt_json;

const VOC_SAMPLE: usize = 30;

const PERSONA_FORMAT: &str = r#"{
  "personas": [
    {
      "name": "박서준 (가명)",
      "title": "꼼꼼한 위생관리맘",
      "demographics": "30대 후반, 맞벌이, 7세 아이 엄마",
      "key_behaviors": ["아이 옷은 반드시 살균 기능으로 관리", "가전 구매 전 온라인 후기를 30개 이상 비교"],
      "needs_and_goals": ["가족의 건강을 유해세균으로부터 지키고 싶다"],
      "pain_points": ["살균 효과를 눈으로 확인할 수 없어 불안하다"],
      "motivating_quote": "아이가 쓰는 건데, 조금 비싸더라도 확실한 걸로 사야 마음이 놓여요."
    }
  ]
}"#;

pub async fn create_personas(ctx: &ToolContext, ws: &mut Workspace, args: &Map<String, Value>) -> Result<Value, String> {
    let num_personas = optional_usize(args, "num_personas").unwrap_or(3).max(1);
    let focus_ids = string_list(args, "focus_topic_ids");
    let artifacts = &ws.artifacts;
    let data = artifacts
        .retrieved_data
        .as_ref()
        .ok_or_else(|| Requirement::RetrievedData.missing_message().to_string())?;

    let samples: Vec<&str> = data
        .web_results
        .iter()
        .map(|d| d.original_text.as_str())
        .filter(|t| !t.is_empty())
        .take(VOC_SAMPLE)
        .collect();
    let product_section = match &artifacts.product_type {
        Some(p) => format!("The product category under analysis is '{p}'."),
        None => "[Note] No product category is set. Naming one lets the personas reflect its usage context.".to_string(),
    };

    let prompt = format!(
        "You are a UX researcher who turns consumer data analysis into vivid, data-driven personas.\n\
         Create {num_personas} personas with clearly different traits and motivations.\n\n\
         ### 1. Customer quotes (sample)\n- {quotes}\n\n\
         ### 2. Product category\n{product_section}\n\n\
         ### 3. CX analysis summary\n{analysis}\n\n\
         ### Instructions\n\
         - Infer demographics, key behaviors, needs and goals and pain points from all of the above.\n\
         - Write every value in Korean.\n\
         - Return only JSON in this format:\n{PERSONA_FORMAT}",
        quotes = samples.join("\n- "),
        analysis = analysis_summary(artifacts, &focus_ids),
    );

    let value = ctx.llm.complete_json(&ctx.models.tool, prompt).await?;
    let personas = parse_personas(value)?;
    info!("[PERSONA] created {} personas", personas.len());

    let artifacts = &mut ws.artifacts;
    artifacts.personas = personas;
    sync_selected_persona(artifacts);
    Ok(json!({ "personas": artifacts.personas }))
}

/// LDA topics, with CAM goals and pain points where available.
fn analysis_summary(artifacts: &Artifacts, focus_ids: &[String]) -> String {
    if artifacts.cx_lda_results.is_empty() {
        return "[Note] There are no CX analysis results. Analysing customer actions, goals and pain points first makes the personas much deeper.".to_string();
    }
    let (header, topics): (String, Vec<_>) = if focus_ids.is_empty() {
        (
            "[All actions] Consider these customer actions together:".to_string(),
            artifacts.cx_lda_results.iter().collect(),
        )
    } else {
        let topics: Vec<_> = artifacts
            .cx_lda_results
            .iter()
            .filter(|t| focus_ids.contains(&t.topic_id))
            .collect();
        (
            format!("[Focus] Build the personas around these {} customer actions:", topics.len()),
            topics,
        )
    };

    let mut lines = vec![header];
    for topic in topics {
        lines.push(format!(
            "- Action {}: '{}'",
            topic.topic_id,
            topic.action_keywords.join(", ")
        ));
        if let Some(cam) = artifacts.cx_cam_results.iter().find(|c| c.topic_id == topic.topic_id) {
            lines.push(format!("  - Goals: {}", cam.goals.join(", ")));
            lines.push(format!("  - Pain points: {}", cam.pain_points.join(", ")));
        }
    }
    lines.join("\n")
}

fn parse_personas(mut value: Value) -> Result<Vec<Persona>, String> {
    let list = value
        .get_mut("personas")
        .map(Value::take)
        .ok_or_else(|| "the model response has no personas".to_string())?;
    let personas: Vec<Persona> =
        serde_json::from_value(list).map_err(|e| format!("invalid persona list: {e}"))?;
    if personas.is_empty() {
        return Err("the model returned an empty persona list".to_string());
    }
    Ok(personas)
}

/// Re-points the selection at the persona with the same name, or clears it.
fn sync_selected_persona(artifacts: &mut Artifacts) {
    if let Some(selected) = &artifacts.selected_persona {
        artifacts.selected_persona = artifacts.find_persona(&selected.name).cloned();
    }
}

pub fn create_persona_from_manual_input(ws: &mut Workspace, args: &Map<String, Value>) -> Result<Value, String> {
    let data = required_object(args, "persona_data")?;
    let has_name = data
        .get("name")
        .and_then(Value::as_str)
        .map(|n| !n.trim().is_empty())
        .unwrap_or(false);
    if !has_name {
        return Err("persona_data must include a non-empty name".to_string());
    }
    let mut persona: Persona =
        serde_json::from_value(Value::Object(data)).map_err(|e| format!("invalid persona_data: {e}"))?;
    persona.name = persona.name.trim().to_string();

    let artifacts = &mut ws.artifacts;
    upsert_by(&mut artifacts.personas, persona.clone(), |a, b| a.name == b.name);
    artifacts.selected_persona = Some(persona.clone());
    info!("[PERSONA] saved manual persona '{}'", persona.name);
    Ok(json!({
        "message": format!("Persona '{}' was saved and selected.", persona.name),
        "persona": persona,
    }))
}

pub async fn modify_personas(ctx: &ToolContext, ws: &mut Workspace, args: &Map<String, Value>) -> Result<Value, String> {
    let request = required_string(args, "modification_request")?;
    let current = serde_json::to_value(&ws.artifacts.personas).map_err(|e| e.to_string())?;
    let prompt = format!(
        "You are a UX researcher. Revise the existing personas according to the user's request.\n\
         Keep personas the request does not mention unchanged. Write every value in Korean.\n\n\
         ### Existing personas\n{existing}\n\n\
         ### User request\n\"{request}\"\n\n\
         Return the complete revised list as JSON in this format:\n{PERSONA_FORMAT}",
        existing = prompt_json(&current, 3000),
    );

    let value = ctx.llm.complete_json(&ctx.models.tool, prompt).await?;
    let personas = parse_personas(value)?;
    let artifacts = &mut ws.artifacts;
    artifacts.personas = personas;
    sync_selected_persona(artifacts);
    Ok(json!({ "personas": artifacts.personas }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::builtin::testing::context;
    use crate::models::workspace::{CustomerActionMap, LdaTopic, RetrievedData, VocDocument};
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::vector_store::testing::CannedVectorStore;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn persona(name: &str, title: &str) -> Value {
        json!({ "name": name, "title": title, "demographics": "30대", "pain_points": ["불편"] })
    }

    #[tokio::test]
    async fn personas_use_samples_and_focused_topics() {
        let mut ws = Workspace::new();
        ws.artifacts.retrieved_data = Some(RetrievedData {
            web_results: (0..40)
                .map(|i| VocDocument {
                    original_text: format!("후기 {i}"),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        });
        ws.artifacts.product_type = Some("스타일러".to_string());
        for id in ["0-0", "0-1"] {
            ws.artifacts.cx_lda_results.push(LdaTopic {
                topic_id: id.to_string(),
                action_keywords: vec![format!("keyword{id}")],
                description: String::new(),
            });
        }
        ws.artifacts.cx_cam_results.push(CustomerActionMap {
            topic_id: "0-1".to_string(),
            goals: vec!["시간 절약".to_string()],
            ..Default::default()
        });

        let llm = ScriptedLlm::json(vec![json!({ "personas": [persona("김민지", "바쁜 직장인")] })]);
        let (ctx, llm, _) = context(llm, CannedVectorStore::default(), 0.0);
        create_personas(&ctx, &mut ws, &args(json!({ "focus_topic_ids": ["0-1"] })))
            .await
            .unwrap();

        assert_eq!(ws.artifacts.personas.len(), 1);
        assert_eq!(ws.artifacts.personas[0].pain_points, vec!["불편"]);
        let prompt = llm.prompt(0);
        assert!(prompt.contains("후기 29"));
        assert!(!prompt.contains("후기 30"));
        assert!(prompt.contains("keyword0-1"));
        assert!(!prompt.contains("keyword0-0"));
        assert!(prompt.contains("시간 절약"));
        assert!(prompt.contains("'스타일러'"));
    }

    #[test]
    fn manual_persona_is_upserted_and_selected() {
        let mut ws = Workspace::new();
        create_persona_from_manual_input(&mut ws, &args(json!({ "persona_data": persona("이수진", "A") })))
            .unwrap();
        create_persona_from_manual_input(&mut ws, &args(json!({ "persona_data": persona("이수진", "B") })))
            .unwrap();
        assert_eq!(ws.artifacts.personas.len(), 1);
        assert_eq!(ws.artifacts.selected_persona.as_ref().unwrap().title, "B");

        let err = create_persona_from_manual_input(&mut ws, &args(json!({ "persona_data": { "name": " " } })));
        assert!(err.is_err());
        assert!(create_persona_from_manual_input(&mut ws, &Map::new()).is_err());
    }

    #[tokio::test]
    async fn modification_keeps_selection_in_sync() {
        let mut ws = Workspace::new();
        create_persona_from_manual_input(&mut ws, &args(json!({ "persona_data": persona("이수진", "A") })))
            .unwrap();
        let llm = ScriptedLlm::json(vec![
            json!({ "personas": [persona("이수진", "수정됨")] }),
            json!({ "personas": [persona("박지훈", "새 인물")] }),
            json!({ "result": "nothing" }),
        ]);
        let (ctx, _, _) = context(llm, CannedVectorStore::default(), 0.0);
        let request = args(json!({ "modification_request": "제목을 바꿔줘" }));

        modify_personas(&ctx, &mut ws, &request).await.unwrap();
        assert_eq!(ws.artifacts.selected_persona.as_ref().unwrap().title, "수정됨");

        modify_personas(&ctx, &mut ws, &request).await.unwrap();
        assert!(ws.artifacts.selected_persona.is_none());

        assert!(modify_personas(&ctx, &mut ws, &request).await.is_err());
        assert_eq!(ws.artifacts.personas[0].name, "박지훈");
    }
}
