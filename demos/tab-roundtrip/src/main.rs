//! Runs a page and an agent in one process and walks through a session.
//!
//! Usage: `tab-roundtrip [config.toml]`. `MODEL_CONTEXT_*` variables override
//! the file.

use std::collections::HashMap;

use anyhow::{Context as _, Result};
use model_context::config::{self, ContextConfig};
use model_context::primitives::{GetPromptResult, PromptMessage, ResourceContents};
use model_context::tools::{
    ExecutionContext, PromptDescriptor, ResourceDescriptor, SchemaSource, ToolDescriptor,
};
use model_context::transport::{OriginFilter, Role, RpcChannel};
use model_context::{
    ClientTransport, ModelContext, ModelContextOptions, ToolResult, Window, client_config,
    telemetry,
};
use serde_json::{Value, json};
use tracing::info;

fn load_config() -> Result<ContextConfig> {
    let base = match std::env::args().nth(1) {
        Some(path) => config::from_path(path)?,
        None => ContextConfig::default(),
    };
    config::apply_env(base).context("applying environment overrides")
}

fn register_page(handle: &model_context::ModelContextHandle) -> Result<()> {
    let registry = handle.registry();
    registry.register_tool(
        ToolDescriptor::new("add", "Adds two numbers", |args: Value, _ctx: ExecutionContext| async move {
            let a = args["a"].as_f64().unwrap_or_default();
            let b = args["b"].as_f64().unwrap_or_default();
            anyhow::Ok(ToolResult::text(format!("{}", a + b)))
        })
        .with_input_schema(SchemaSource::json(json!({
            "type": "object",
            "properties": { "a": { "type": "number" }, "b": { "type": "number" } },
            "required": ["a", "b"]
        }))),
    )?;

    let cart = HashMap::from([("1", "Espresso beans"), ("2", "Milk frother")]);
    registry.register_resource(
        ResourceDescriptor::new(
            "cart://items/{id}",
            "Cart item",
            move |uri: String, params: HashMap<String, String>| {
                let item = params
                    .get("id")
                    .and_then(|id| cart.get(id.as_str()))
                    .map(|item| (*item).to_owned());
                async move {
                    let item = item.context("no such cart item")?;
                    anyhow::Ok(vec![ResourceContents::text(uri, item)])
                }
            },
        )
        .with_mime_type("text/plain"),
    )?;

    registry.register_prompt(
        PromptDescriptor::new("summarize-cart", |args: Value| async move {
            let tone = args["tone"].as_str().unwrap_or("neutral").to_owned();
            anyhow::Ok(GetPromptResult {
                description: Some("Summarize the cart".to_owned()),
                messages: vec![PromptMessage::user(format!(
                    "Summarize the shopping cart in a {tone} tone."
                ))],
            })
        })
        .with_description("Summarize the current cart")
        .with_args_schema(SchemaSource::json(json!({
            "type": "object",
            "properties": { "tone": { "type": "string" } }
        }))),
    )?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = load_config()?;
    telemetry::tracing_support::init(&config.log_filter);

    let page = Window::new("https://shop.example");
    let handle = ModelContext::initialize(&page, ModelContextOptions::from_config(&config)?)?;
    register_page(&handle)?;

    let channel = RpcChannel::new(Role::Client, page.clone(), page.clone(), config.channel()?)
        .with_target_origin(config.target_origin.clone())
        .with_allowed_origins(OriginFilter::from_list(&config.allowed_origins));
    let agent = ClientTransport::new(channel, client_config(&config));
    agent.connect().await?;
    let server = agent.initialize("tab-roundtrip", env!("CARGO_PKG_VERSION")).await?;
    info!(server = %server["serverInfo"]["name"], "connected");

    for tool in agent.list_tools().await? {
        info!(name = %tool["name"], description = %tool["description"], "tool");
    }
    let sum = agent.call_tool("add", json!({ "a": 2, "b": 3 })).await?;
    info!(result = sum.first_text().unwrap_or_default(), "add(2, 3)");

    let item = agent.read_resource("cart://items/1").await?;
    info!(
        text = item.contents.first().and_then(ResourceContents::as_text).unwrap_or_default(),
        "cart item 1"
    );

    let prompt = agent.get_prompt("summarize-cart", json!({ "tone": "cheerful" })).await?;
    info!(messages = prompt.messages.len(), "prompt rendered");

    agent.close();
    ModelContext::teardown(handle);
    Ok(())
}
