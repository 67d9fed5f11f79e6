use anyhow::Context;
use forge_client::OctocrabForge;
use log::{info, warn};
use pr_bot::census::{CensusClient, StaticCensus};
use pr_bot::check::checker::CommitMetadataChecker;
use pr_bot::commands::CommandRegistry;
use pr_bot::context::{BotContext, BotState};
use pr_bot::integration_lock::IntegrationLocks;
use pr_bot::logger;
use pr_bot::repo::GitRepositoryPool;
use pr_bot::Scheduler;
use pr_bot_config::BotConfig;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_file = logger::init();
    info!("Starting pr-bot, logging to {}", log_file.display());

    let content = pr_bot_config::load_config_file()
        .context("no pr-bot.toml configuration file found")?;
    let config = BotConfig::from_toml(&content)?;

    let token = std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN must be set")?;
    let octocrab = Arc::new(
        forge_client::octocrab::OctocrabBuilder::new()
            .personal_token(token)
            .build()?,
    );
    let bot_user = OctocrabForge::authenticated_user(&octocrab).await?;
    info!("authenticated as {}", bot_user.username);
    let forge = Arc::new(OctocrabForge::new(
        octocrab,
        &config.repository.owner,
        &config.repository.name,
        bot_user,
    ));

    let census_path = pr_bot_config::config_dir()?.join("census.toml");
    let census: Arc<dyn CensusClient> = if census_path.exists() {
        Arc::new(StaticCensus::from_file(&census_path)?)
    } else {
        warn!(
            "no census file at {}, nobody will have committer rights",
            census_path.display()
        );
        Arc::new(StaticCensus::empty())
    };

    let scratch = pr_bot_config::scratch_dir()?;
    let remote = format!("https://github.com/{}.git", config.repository.full_name());
    let repos = Arc::new(GitRepositoryPool::new(&remote, &scratch));

    let ctx = Arc::new(BotContext {
        config,
        forge,
        census,
        tracker: None,
        repos,
        checker: Arc::new(CommitMetadataChecker),
        registry: Arc::new(CommandRegistry::standard()),
        integration_locks: IntegrationLocks::new(),
        state: BotState::default(),
    });

    info!("governing {}", ctx.repository());
    Scheduler::new(ctx).run().await;
    Ok(())
}
