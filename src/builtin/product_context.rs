use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{optional_string, optional_usize, required_string, ToolContext};
use crate::models::workspace::Workspace;
use crate::services::vector_store::{Filter, SearchRequest};

pub const PRODUCT_COLLECTION: &str = "product_data";
pub const SENSOR_COLLECTION: &str = "sensor_data";
pub const METADATA_COLLECTION: &str = "product_metadata";

/// Front-ends send this when no product category is chosen.
pub const NO_PRODUCT_SELECTED: &str = "(선택 안함)";

pub fn normalize_product_type(raw: Option<String>) -> Option<String> {
    raw.map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && p != NO_PRODUCT_SELECTED)
}

/// Product feature documents near `keyword` on the topic vector.
/// Lookup failures are logged and yield an empty list.
pub async fn fetch_product_context(
    ctx: &ToolContext,
    keyword: &str,
    product_type: Option<&str>,
    top_k: usize,
) -> Vec<Value> {
    let vector = match ctx.embedder.embed(&ctx.models.topic_embedding, keyword).await {
        Ok(v) => v,
        Err(err) => {
            warn!("[PRODUCT] embedding failed: {}", err);
            return Vec::new();
        }
    };
    let request = SearchRequest {
        vector_name: None,
        vector,
        limit: top_k,
        filter: product_type.map(|p| Filter::matching("product_type", p)),
        score_threshold: Some(0.3),
    };
    match ctx.vectors.search(PRODUCT_COLLECTION, request).await {
        Ok(hits) => hits.into_iter().map(|hit| Value::Object(hit.payload)).collect(),
        Err(err) => {
            warn!("[PRODUCT] product search failed: {}", err);
            Vec::new()
        }
    }
}

pub async fn fetch_sensor_context(ctx: &ToolContext, product_type: Option<&str>, top_k: usize) -> Vec<Value> {
    let Some(product_type) = product_type else {
        info!("[PRODUCT] no product type, skipping sensor lookup");
        return Vec::new();
    };
    let filter = Filter::matching("Product Category", product_type);
    match ctx.vectors.scroll(SENSOR_COLLECTION, Some(filter), top_k).await {
        Ok(points) => points.into_iter().map(Value::Object).collect(),
        Err(err) => {
            warn!("[PRODUCT] sensor lookup failed for {}: {}", product_type, err);
            Vec::new()
        }
    }
}

/// The `fields` object of the product's metadata record, or an empty map.
pub async fn get_columns_for_product(ctx: &ToolContext, product_type: &str) -> Map<String, Value> {
    let filter = Filter::matching("product_type", product_type);
    match ctx.vectors.scroll(METADATA_COLLECTION, Some(filter), 1).await {
        Ok(points) => points
            .into_iter()
            .next()
            .and_then(|mut payload| match payload.remove("fields") {
                Some(Value::Object(fields)) => Some(fields),
                _ => None,
            })
            .unwrap_or_default(),
        Err(err) => {
            warn!("[PRODUCT] metadata lookup failed for {}: {}", product_type, err);
            Map::new()
        }
    }
}

pub async fn fetch_product_context_tool(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let keyword = required_string(args, "keyword")?;
    let product_type = normalize_product_type(optional_string(args, "product_type"));
    let top_k = optional_usize(args, "top_k").unwrap_or(10).max(1);
    let docs = fetch_product_context(ctx, &keyword, product_type.as_deref(), top_k).await;
    ws.artifacts.product_data = docs.clone();
    Ok(json!({ "product_results": docs }))
}

pub async fn fetch_sensor_context_tool(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let product_type = normalize_product_type(optional_string(args, "product_type"));
    let top_k = optional_usize(args, "top_k").unwrap_or(10).max(1);
    let samples = fetch_sensor_context(ctx, product_type.as_deref(), top_k).await;
    ws.artifacts.sensor_data = samples.clone();
    Ok(json!({ "sensor_data": samples }))
}

pub async fn get_columns_for_product_tool(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let product_type = required_string(args, "product_type")?;
    let columns = get_columns_for_product(ctx, &product_type).await;
    ws.artifacts.columns_product = columns.clone();
    Ok(json!({ "columns_product": columns }))
}

/// Switches the product category and reloads every product-derived artifact.
pub async fn change_product_context(
    ctx: &ToolContext,
    ws: &mut Workspace,
    args: &Map<String, Value>,
) -> Result<Value, String> {
    let product_type = normalize_product_type(optional_string(args, "product_type"))
        .ok_or_else(|| "product_type is required".to_string())?;

    let keyword = ws
        .artifacts
        .retrieved_data
        .as_ref()
        .map(|d| d.query.clone())
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| product_type.clone());

    let product_data = fetch_product_context(ctx, &keyword, Some(&product_type), 10).await;
    let sensor_data = fetch_sensor_context(ctx, Some(&product_type), 10).await;
    let columns = get_columns_for_product(ctx, &product_type).await;
    info!(
        "[PRODUCT] context switched to {}: {} docs, {} sensor samples, {} fields",
        product_type,
        product_data.len(),
        sensor_data.len(),
        columns.len()
    );

    let artifacts = &mut ws.artifacts;
    artifacts.product_type = Some(product_type.clone());
    artifacts.product_data = product_data;
    artifacts.sensor_data = sensor_data;
    artifacts.columns_product = columns;

    Ok(json!({
        "product_type": product_type,
        "product_documents": artifacts.product_data.len(),
        "sensor_samples": artifacts.sensor_data.len(),
        "metadata_fields": artifacts.columns_product.len(),
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::builtin::testing::context;
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::vector_store::testing::CannedVectorStore;
    use crate::services::vector_store::{Condition, PointId, ScoredPoint};

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn store() -> CannedVectorStore {
        let mut search_hits = HashMap::new();
        search_hits.insert(
            PRODUCT_COLLECTION.to_string(),
            vec![ScoredPoint {
                id: PointId::Num(1),
                score: 0.8,
                payload: payload(json!({ "product_type": "스타일러", "feature": "스팀 살균" })),
            }],
        );
        let mut scroll_points = HashMap::new();
        scroll_points.insert(
            SENSOR_COLLECTION.to_string(),
            vec![
                payload(json!({ "Product Category": "스타일러", "sensor": "humidity" })),
                payload(json!({ "Product Category": "스타일러", "sensor": "temperature" })),
            ],
        );
        scroll_points.insert(
            METADATA_COLLECTION.to_string(),
            vec![payload(json!({ "product_type": "스타일러", "fields": { "steam_mode": "string" } }))],
        );
        CannedVectorStore {
            search_hits,
            scroll_points,
            ..Default::default()
        }
    }

    #[test]
    fn unselected_product_type_is_none() {
        assert_eq!(normalize_product_type(Some(NO_PRODUCT_SELECTED.to_string())), None);
        assert_eq!(normalize_product_type(Some("  ".to_string())), None);
        assert_eq!(
            normalize_product_type(Some(" 휘센 ".to_string())),
            Some("휘센".to_string())
        );
    }

    #[tokio::test]
    async fn change_product_context_refreshes_everything() {
        let (ctx, _, store) = context(ScriptedLlm::default(), store(), 0.0);
        let mut ws = Workspace::new();
        let args = json!({ "product_type": "스타일러" });

        let payload = change_product_context(&ctx, &mut ws, args.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(payload["sensor_samples"], 2);
        assert_eq!(ws.artifacts.product_type.as_deref(), Some("스타일러"));
        assert_eq!(ws.artifacts.product_data.len(), 1);
        assert_eq!(ws.artifacts.sensor_data.len(), 2);
        assert!(ws.artifacts.columns_product.contains_key("steam_mode"));

        let calls = store.scroll_calls.lock().unwrap();
        let (collection, filter, _) = &calls[0];
        assert_eq!(collection, SENSOR_COLLECTION);
        assert_eq!(
            filter.as_ref().unwrap().must[0],
            Condition::FieldMatch("Product Category".to_string(), json!("스타일러"))
        );
    }

    #[tokio::test]
    async fn lookups_degrade_to_empty() {
        let failing = CannedVectorStore {
            fail_collections: vec![PRODUCT_COLLECTION.to_string(), METADATA_COLLECTION.to_string()],
            ..Default::default()
        };
        let (ctx, _, store) = context(ScriptedLlm::default(), failing, 0.0);
        assert!(fetch_product_context(&ctx, "살균", None, 10).await.is_empty());
        assert!(get_columns_for_product(&ctx, "스타일러").await.is_empty());
        assert!(fetch_sensor_context(&ctx, None, 10).await.is_empty());
        // no scroll without a product type
        assert_eq!(store.scroll_calls.lock().unwrap().len(), 1);
    }
}
