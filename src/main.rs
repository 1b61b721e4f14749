use anyhow::Context;
use llmchat_bridge::chat::console::run_console;
use llmchat_bridge::chat::{self, AvatarHooks, ChatBridge, InMemoryHistory};
use llmchat_bridge::llm::{self, OllamaProvider};
use llmchat_bridge::utils::logging::init_tracing;
use llmchat_bridge::config;
use llmchat_bridge::vtube::{self, AvatarLinkClient};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(run());
    // A pending stdin read would otherwise hold the runtime open after Ctrl-C.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

/// Everything `run` needs, built without touching the network.
struct App {
    avatar: AvatarLinkClient,
    bridge: ChatBridge,
    user_name: String,
}

/// Load configs and build every component. All fallible construction
/// happens here so that a failure never leaves a running avatar link behind.
fn assemble(data_dir: &Path) -> anyhow::Result<App> {
    info!(path = %data_dir.display(), "Using data directory");

    let vts_path = data_dir.join(vtube::config::CONFIG_FILE);
    let vts_config = vtube::config::load_config(&vts_path);
    let llm_config = llm::llm_config::load_config(&data_dir.join(llm::llm_config::CONFIG_FILE));
    let chat_config = chat::config::load_config(&data_dir.join(chat::config::CONFIG_FILE));

    llm_config.validate().map_err(anyhow::Error::msg).context("invalid LLM configuration")?;
    chat_config.validate().map_err(anyhow::Error::msg).context("invalid chat configuration")?;

    let provider = OllamaProvider::new(&llm_config)?;
    info!(model = provider.model(), "LLM provider ready");

    let avatar = AvatarLinkClient::from_config_file(vts_config, &vts_path)
        .context("invalid VTube Studio configuration")?;

    let hooks: Option<Arc<dyn AvatarHooks>> = if avatar.enabled() {
        Some(Arc::new(avatar.clone()))
    } else {
        None
    };
    let bridge = ChatBridge::new(
        chat_config.clone(),
        Arc::new(InMemoryHistory::new(chat_config.history_capacity)),
        Arc::new(provider),
        hooks,
    );

    Ok(App {
        avatar,
        bridge,
        user_name: chat_config.user_name,
    })
}

async fn run() -> anyhow::Result<()> {
    let App {
        avatar,
        bridge,
        user_name,
    } = assemble(&config::data_dir())?;
    avatar.connect().await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received, shutting down");
        ctrl_c.cancel();
    });

    let console = run_console(
        &bridge,
        &user_name,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        cancel,
    )
    .await;

    avatar.shutdown().await;
    console.context("console I/O failed")?;
    Ok(())
}
