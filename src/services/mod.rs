pub mod agent;
pub mod embedding;
pub mod llm;
pub mod sentiment;
pub mod token_budget;
pub mod vector_store;
