use crate::{Context, Error};

pub mod fetch;

/// Check that the bot is alive
#[poise::command(slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}
