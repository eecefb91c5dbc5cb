//! Pipeline CLI.
//!
//! Per-record error counts are reported in the load summaries and do not
//! affect the process exit code: a partially-errored run has still converged
//! and is safe to repeat. Only fatal failures (unresolvable league or season,
//! unusable database, structurally invalid input) exit non-zero.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use sqlx::Row;
use tracing::info;

use crosse::database_ops::identity::run_identity_pass;
use crosse::database_ops::loader::{
    discover_seasons, load_season, EntityLoadResult, LoadOptions,
};
use crosse::database_ops::queries::{
    get_leaderboard, get_player, get_team_stats, search_players, Cursor, LeaderboardFilter,
    SortBy, StatType,
};
use crosse::database_ops::reference::ensure_league;
use crosse::manifest::read_manifest;
use crosse::util::env as env_util;
use crosse::Db;

#[derive(Parser, Debug)]
#[command(name = "crosse", version, about = "Cross-league lacrosse statistics pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load one league's scraped JSON dumps into the normalized store
    Load(LoadArgs),
    /// Link unlinked source players to canonical identities
    Identity(IdentityArgs),
    /// Query a stat leaderboard with cursor pagination
    Leaderboard(LeaderboardArgs),
    /// Show a canonical player and all linked source records
    Player(PlayerArgs),
    /// Search players by name
    Search(SearchArgs),
    /// Show a team's standings and recorded games
    Team(TeamArgs),
    /// Report the extractor's manifest for a league
    Status(StatusArgs),
    /// List known leagues and their priorities
    Leagues,
}

#[derive(Debug, Args)]
struct LoadArgs {
    /// League code (pll, nll, …)
    #[arg(long)]
    league: String,
    /// Season year to load
    #[arg(long, conflicts_with = "all")]
    season: Option<i64>,
    /// Load every season directory found for the league
    #[arg(long, action = ArgAction::SetTrue)]
    all: bool,
    /// Run identity linking after the load
    #[arg(long, action = ArgAction::SetTrue)]
    identity: bool,
    /// Emit machine-readable JSON instead of the human summary
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct IdentityArgs {
    /// Restrict the pass to one league
    #[arg(long)]
    league: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct LeaderboardArgs {
    /// Sort column: points, goals or assists
    #[arg(long, default_value = "points")]
    sort: SortBy,
    #[arg(long)]
    league: Option<String>,
    #[arg(long)]
    season: Option<i64>,
    /// Stat row flavor: regular, playoff or career
    #[arg(long)]
    stat_type: Option<StatType>,
    /// Cursor from a previous page's next_cursor
    #[arg(long)]
    cursor: Option<Cursor>,
    #[arg(long, default_value_t = 25)]
    limit: i64,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct PlayerArgs {
    /// Canonical player id
    canonical_id: i64,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct SearchArgs {
    /// Name (or fragment) to search for; accents and case are ignored
    name: String,
    #[arg(long)]
    league: Option<String>,
    #[arg(long, default_value_t = 25)]
    limit: i64,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct TeamArgs {
    /// Internal team id
    team_id: i64,
    #[arg(long)]
    season: Option<i64>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long)]
    league: String,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, serde::Serialize)]
struct SeasonSummary {
    league: String,
    season: i64,
    results: Vec<EntityLoadResult>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    crosse::logging::init_tracing("info,sqlx=warn")?;

    let cli = Cli::parse();
    let db = Db::connect(&env_util::db_url())
        .await
        .context("connecting to database")?;

    match cli.command {
        Command::Load(args) => cmd_load(&db, args).await,
        Command::Identity(args) => cmd_identity(&db, args).await,
        Command::Leaderboard(args) => cmd_leaderboard(&db, args).await,
        Command::Player(args) => cmd_player(&db, args).await,
        Command::Search(args) => cmd_search(&db, args).await,
        Command::Team(args) => cmd_team(&db, args).await,
        Command::Status(args) => cmd_status(args),
        Command::Leagues => cmd_leagues(&db).await,
    }
}

async fn cmd_load(db: &Db, args: LoadArgs) -> Result<()> {
    let data_dir = env_util::data_dir();
    let seasons = if args.all {
        let found = discover_seasons(&data_dir, &args.league)?;
        if found.is_empty() {
            bail!(
                "no season directories for league '{}' under {}",
                args.league,
                data_dir.display()
            );
        }
        found
    } else {
        match args.season {
            Some(year) => vec![year],
            None => bail!("pass --season <year> or --all"),
        }
    };

    let opts = LoadOptions {
        run_identity: args.identity,
    };
    let mut summaries = Vec::new();
    for year in seasons {
        let results = load_season(db, &data_dir, &args.league, year, opts).await?;
        summaries.push(SeasonSummary {
            league: args.league.clone(),
            season: year,
            results,
        });
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let (mut loaded, mut skipped, mut errors) = (0u64, 0u64, 0u64);
    for summary in &summaries {
        println!("{}/{}", summary.league, summary.season);
        for r in &summary.results {
            println!(
                "  {:<13} loaded={:<5} skipped={:<5} errors={:<3} ({}ms)",
                r.entity.label(),
                r.loaded,
                r.skipped,
                r.errors,
                r.duration_ms
            );
            loaded += r.loaded;
            skipped += r.skipped;
            errors += r.errors;
        }
    }
    println!("total: loaded={loaded} skipped={skipped} errors={errors}");
    Ok(())
}

async fn cmd_identity(db: &Db, args: IdentityArgs) -> Result<()> {
    let league_id = match &args.league {
        Some(code) => Some(ensure_league(db, code).await?),
        None => None,
    };
    let summary = run_identity_pass(db, league_id).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "identity pass: linked={} skipped={} errors={}",
            summary.linked, summary.skipped, summary.errors
        );
    }
    Ok(())
}

async fn cmd_leaderboard(db: &Db, args: LeaderboardArgs) -> Result<()> {
    let filter = LeaderboardFilter {
        league: args.league,
        season_year: args.season,
        stat_type: args.stat_type,
    };
    let page = get_leaderboard(db, &filter, args.sort, args.cursor, args.limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    for e in &page.entries {
        println!(
            "{:>3}. {:<28} {:<4} {:<5} g={:<3} a={:<3} pts={}",
            e.rank,
            e.player_name.as_deref().unwrap_or("(unnamed)"),
            e.league_code,
            e.season_year,
            e.goals,
            e.assists,
            e.points
        );
    }
    match page.next_cursor {
        Some(cursor) => println!("next: --cursor {cursor}"),
        None => println!("(end of leaderboard)"),
    }
    Ok(())
}

async fn cmd_player(db: &Db, args: PlayerArgs) -> Result<()> {
    let Some(profile) = get_player(db, args.canonical_id).await? else {
        bail!("no canonical player with id {}", args.canonical_id);
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }
    let c = &profile.canonical;
    println!("{} (canonical #{})", c.display_name, c.id);
    if let Some(dob) = &c.dob {
        println!("  dob: {dob}");
    }
    if let Some(position) = &c.position {
        println!("  position: {position}");
    }
    println!("  sources:");
    for s in &profile.sources {
        let primary = if s.source_player_id == c.primary_source_player_id {
            " [primary]"
        } else {
            ""
        };
        println!(
            "    {} {} ({}, confidence {:.1}){}",
            s.league_code,
            s.source_id,
            s.match_method,
            s.confidence_score,
            primary
        );
    }
    Ok(())
}

async fn cmd_search(db: &Db, args: SearchArgs) -> Result<()> {
    let hits = search_players(db, &args.name, args.league.as_deref(), args.limit).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("no players match '{}'", args.name);
        return Ok(());
    }
    for h in &hits {
        let linked = match h.canonical_player_id {
            Some(id) => format!(" -> canonical #{id}"),
            None => String::new(),
        };
        println!(
            "#{:<6} {:<4} {:<28} {}{}",
            h.source_player_id,
            h.league_code,
            h.full_name.as_deref().unwrap_or("(unnamed)"),
            h.dob.as_deref().unwrap_or("dob unknown"),
            linked
        );
    }
    Ok(())
}

async fn cmd_team(db: &Db, args: TeamArgs) -> Result<()> {
    let stats = get_team_stats(db, args.team_id, args.season).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    if stats.is_empty() {
        bail!("no standings recorded for team {}", args.team_id);
    }
    for s in &stats {
        let gf = s.goals_for.map_or_else(|| "-".into(), |v| v.to_string());
        let ga = s.goals_against.map_or_else(|| "-".into(), |v| v.to_string());
        println!(
            "{} {}: {}-{}-{} (gf={} ga={}, {} games recorded)",
            s.team_name, s.season_year, s.wins, s.losses, s.ties, gf, ga, s.games_recorded
        );
    }
    Ok(())
}

fn cmd_status(args: StatusArgs) -> Result<()> {
    let data_dir = env_util::data_dir();
    let Some(manifest) = read_manifest(&data_dir, &args.league)? else {
        bail!(
            "no manifest for '{}' under {} (extractor has not run)",
            args.league,
            data_dir.display()
        );
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }
    println!(
        "{}: manifest v{}, last run {}",
        manifest.source, manifest.version, manifest.last_run
    );
    for (season, entities) in &manifest.seasons {
        println!("  {season}");
        for (entity, e) in entities {
            let state = if e.extracted { "ok" } else { "pending" };
            println!(
                "    {:<10} {:<8} count={:<6} at {}",
                entity, state, e.count, e.timestamp
            );
        }
    }
    Ok(())
}

async fn cmd_leagues(db: &Db) -> Result<()> {
    let rows = sqlx::query("SELECT code, name, priority, active FROM league ORDER BY priority")
        .fetch_all(&db.pool)
        .await?;
    info!(count = rows.len(), "listing leagues");
    for r in rows {
        let active: i64 = r.get("active");
        println!(
            "{:<8} priority={:<3} {}{}",
            r.get::<String, _>("code"),
            r.get::<i64, _>("priority"),
            r.get::<String, _>("name"),
            if active == 0 { " (inactive)" } else { "" }
        );
    }
    Ok(())
}
