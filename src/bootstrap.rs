//! Composition root shared by the binary and the integration tests.

use std::{collections::HashMap, fs, path::PathBuf, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result};

use crate::{
    adapters::outbound::{
        agent_flow::HttpAgentFlowClient,
        clock::SystemClock,
        memory::InMemoryRunStore,
        persistence::SqliteRunStore,
        simulated_user::{LlmProvider, RigSimulatedUser},
        templating::HandlebarsRenderer,
        webhook_delivery::HttpWebhookDelivery,
    },
    application::{AppService, RunOrchestrator, WebhookDispatcher},
    config::FlowbenchConfig,
    core::ports::{Clock, RunRepository, TemplateRenderer, TestCatalog},
    paths::home_env_path,
};

static HOME_ENV_ONCE: OnceLock<()> = OnceLock::new();

/// Where runs are stored.
#[derive(Debug, Clone, Default)]
pub enum StoreChoice {
    /// SQLite under the data dir, or under the given root.
    #[default]
    Sqlite,
    SqliteAt(PathBuf),
    InMemory,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub store: StoreChoice,
    /// Key for the configured simulated-user provider; env vars cover the rest.
    pub api_key: Option<String>,
}

/// Wires every adapter around the application service.
pub fn build_service(config: FlowbenchConfig, options: ServiceOptions) -> Result<Arc<AppService>> {
    let repository: Arc<dyn RunRepository> = match options.store {
        StoreChoice::Sqlite => Arc::new(SqliteRunStore::open(None)?),
        StoreChoice::SqliteAt(root) => Arc::new(SqliteRunStore::open(Some(root))?),
        StoreChoice::InMemory => Arc::new(InMemoryRunStore::new()),
    };
    let default_provider = LlmProvider::from_name(&config.simulated_user.provider);
    let api_keys = collect_api_keys(options.api_key, default_provider);

    let renderer: Arc<dyn TemplateRenderer> = Arc::new(HandlebarsRenderer::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let agent = Arc::new(
        HttpAgentFlowClient::new().context("Failed to build the agent flow HTTP client")?,
    );
    let simulated_user = Arc::new(RigSimulatedUser::new(
        api_keys,
        Arc::clone(&renderer),
        config.simulated_user.max_concurrent,
    ));
    let delivery =
        Arc::new(HttpWebhookDelivery::new().context("Failed to build the webhook HTTP client")?);
    let webhooks = Arc::new(WebhookDispatcher::new(
        renderer,
        delivery,
        Arc::clone(&clock),
    ));
    let orchestrator = RunOrchestrator::new(
        agent,
        simulated_user,
        Arc::clone(&repository),
        Arc::clone(&webhooks),
        Arc::clone(&clock),
    );
    let catalog: Arc<dyn TestCatalog> = Arc::new(config);
    Ok(Arc::new(AppService::new(
        catalog,
        orchestrator,
        repository,
        webhooks,
        clock,
    )))
}

/// Loads the config file; commands that only read runs tolerate a missing file.
pub fn load_config(path: &PathBuf, required: bool) -> Result<FlowbenchConfig> {
    if !required && !path.exists() {
        return Ok(FlowbenchConfig::default());
    }
    FlowbenchConfig::from_path(path)
}

/// One key per provider: `--api-key` applies to the configured provider only,
/// otherwise the provider's env var. Blank values count as missing.
fn collect_api_keys(
    cli_value: Option<String>,
    default_provider: Option<LlmProvider>,
) -> HashMap<LlmProvider, String> {
    load_home_env_once();
    LlmProvider::ALL
        .into_iter()
        .filter_map(|provider| {
            let cli = cli_value.as_deref().filter(|_| Some(provider) == default_provider);
            let env = std::env::var(provider.env_var()).ok();
            first_non_blank([cli, env.as_deref()]).map(|key| (provider, key))
        })
        .collect()
}

fn first_non_blank<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_owned)
}

fn load_home_env_once() {
    HOME_ENV_ONCE.get_or_init(|| {
        let Some(contents) = home_env_path().and_then(|path| fs::read_to_string(path).ok()) else {
            return;
        };
        for (key, value) in parse_env_file(&contents) {
            // The process environment always wins over the file.
            if std::env::var_os(&key).is_none() {
                unsafe { std::env::set_var(&key, &value) };
            }
        }
    });
}

/// `KEY=value` pairs from a dotenv-style file. Accepts `export` prefixes,
/// `#` comments and single- or double-quoted values.
fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.strip_prefix("export ").map_or(line, str::trim_start))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_owned(), unquote(value.trim()).to_owned()))
        .collect()
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
        .unwrap_or(value)
}
