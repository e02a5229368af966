//! `nick++` / `nick--` karma, stored in the shared database.

use sprocket::prelude::*;

#[derive(Default)]
pub struct Karma;

fn karma_table() -> TableDescriptor {
    TableDescriptor::new("karma")
        .step(
            1,
            "CREATE TABLE karma (nick TEXT PRIMARY KEY, score INTEGER NOT NULL DEFAULT 0)",
        )
        .step(2, "CREATE INDEX karma_score ON karma (score)")
}

async fn change(ctx: HandlerContext, delta: i64) -> Result<(), QueryError> {
    let Some(nick) = ctx.capture(1).map(str::to_string) else {
        return Ok(());
    };
    if nick.eq_ignore_ascii_case(ctx.event().author()) {
        return Ok(());
    }
    ctx.storage()
        .execute(
            "INSERT INTO karma (nick, score) VALUES (?, ?) \
             ON CONFLICT(nick) DO UPDATE SET score = score + excluded.score",
            &params![nick, delta],
        )
        .await?;
    Ok(())
}

async fn report(ctx: HandlerContext, _: State<()>) -> Result<(), BoxError> {
    let nick = ctx.capture(1).unwrap_or_default().to_string();
    let score: i64 = match ctx
        .storage()
        .query_optional("SELECT score FROM karma WHERE nick = ?", &params![nick.as_str()])
        .await?
    {
        Some(row) => row.get(0)?,
        None => 0,
    };
    ctx.reply(&format!("{nick} has {score} karma")).await?;
    Ok(())
}

#[async_trait]
impl Plugin for Karma {
    type State = ();

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            version: "0.1.0",
            desc: "Tracks karma",
            help: Some("<nick>++ and <nick>-- change karma; 'karma <nick>' shows it"),
        }
    }

    async fn init(&self, ctx: &mut LoadContext<()>) -> Result<(), BoxError> {
        ctx.register_table(&karma_table()).await?;
        ctx.on_match(EventKind::Message, r"^(\S+)\+\+$", |ctx, _| change(ctx, 1))?
            .on_match(EventKind::Message, r"^(\S+)--$", |ctx, _| change(ctx, -1))?
            .on_match(EventKind::Addressed, r"^karma\s+(\S+)$", report)?;
        Ok(())
    }
}

#[distributed_slice(PLUGINS)]
#[linkme(crate = sprocket::linkme)]
static KARMA: PluginDescriptor = PluginDescriptor::of::<Karma>("karma");
