use crate::sync::discord::DiscordSource;
use crate::sync::paginator::RequestPacer;
use crate::sync::{SyncMode, Syncer};
use crate::{Context, Error};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum FetchMode {
    #[name = "full"]
    Full,
    #[name = "diff"]
    Diff,
}

impl From<FetchMode> for SyncMode {
    fn from(mode: FetchMode) -> Self {
        match mode {
            FetchMode::Full => SyncMode::Full,
            FetchMode::Diff => SyncMode::Differential,
        }
    }
}

/// Mirror this server's message history into the local archive
#[poise::command(slash_command, guild_only)]
pub async fn fetch(
    ctx: Context<'_>,
    #[description = "Full re-sync, or only messages newer than the archive"] mode: FetchMode,
) -> Result<(), Error> {
    // Syncing can take minutes on a large server; the reply must outlive the
    // interaction token's 3-second window.
    ctx.defer().await?;

    let guild_id = ctx.guild_id().map(|id| id.to_string());
    info!("Fetch command received ({:?}) for guild {:?}", mode, guild_id);

    let source = DiscordSource::new(ctx.serenity_context().http.clone());
    let pacer = RequestPacer::from_secs(ctx.data().config.history_fetch_delay_secs);
    let syncer = Syncer::new(&ctx.data().db, &source, &pacer);

    match syncer.sync_guild(guild_id.as_deref(), mode.into()).await {
        Ok(status) => {
            ctx.say(status).await?;
        }
        Err(e) => {
            error!("Sync failed: {}", e);
            ctx.say(format!("Sync failed: {}", e)).await?;
        }
    }
    Ok(())
}
