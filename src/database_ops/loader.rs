//! Idempotent season loader: converts one league/season's raw JSON dumps into
//! normalized rows, using content-hash change detection so repeated runs skip
//! unchanged records and converge to the same end state.
//!
//! Entity order within a season is fixed by foreign keys: teams (with their
//! season links and embedded standings) -> players -> player stats -> games,
//! then an optional identity pass. Per-record failures are counted and the
//! loop continues; only structural problems (unresolvable dimensions, a file
//! that is not valid JSON) abort a season.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::Row;
use thiserror::Error;
use tracing::{info, warn};

use crate::database_ops::db::Db;
use crate::database_ops::identity::run_identity_pass;
use crate::database_ops::reference::{ensure_league, ensure_season, player_lookup, team_lookup};
use crate::hashing::content_hash;
use crate::normalization::name::normalize_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Teams,
    Standings,
    Players,
    PlayerStats,
    Games,
    Identity,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Teams => "teams",
            EntityKind::Standings => "standings",
            EntityKind::Players => "players",
            EntityKind::PlayerStats => "player_stats",
            EntityKind::Games => "games",
            EntityKind::Identity => "identity",
        }
    }
}

/// Per-entity outcome of one season load.
#[derive(Debug, Clone, Serialize)]
pub struct EntityLoadResult {
    pub entity: EntityKind,
    pub loaded: u64,
    pub skipped: u64,
    pub errors: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct LoadCounts {
    loaded: u64,
    skipped: u64,
    errors: u64,
}

impl LoadCounts {
    fn absorb(&mut self, outcome: Result<RecordOutcome>, entity: EntityKind) {
        match outcome {
            Ok(RecordOutcome::Loaded) => self.loaded += 1,
            Ok(RecordOutcome::Skipped) => self.skipped += 1,
            Err(err) => {
                warn!(entity = entity.label(), error = %err, "record failed; continuing");
                self.errors += 1;
            }
        }
    }

    fn into_result(self, entity: EntityKind, started: Instant) -> EntityLoadResult {
        EntityLoadResult {
            entity,
            loaded: self.loaded,
            skipped: self.skipped,
            errors: self.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

enum RecordOutcome {
    Loaded,
    Skipped,
}

/// Loader file-level failures. A missing file is recovered by the caller as a
/// zero-count result; the other variants are structural and fail the season.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("missing input file {}", path.display())]
    FileNotFound { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON in {}: {source}", path.display())]
    JsonParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{} is not a JSON array of records", path.display())]
    NotAnArray { path: PathBuf },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Run the identity linking pass over this league's unlinked players
    /// after the season's entities have loaded.
    pub run_identity: bool,
}

/// Load one league/season directory (`{data_dir}/{league}/{year}/`).
/// Returns one result per entity type; fatal only when the league or season
/// dimension row cannot be resolved or an input file is structurally invalid.
pub async fn load_season(
    db: &Db,
    data_dir: &Path,
    league_code: &str,
    year: i64,
    opts: LoadOptions,
) -> Result<Vec<EntityLoadResult>> {
    let league_id = ensure_league(db, league_code)
        .await
        .with_context(|| format!("resolving league '{league_code}'"))?;
    let season_dir = data_dir.join(league_code).join(year.to_string());
    let source_season_id = format!("{league_code}-{year}");
    let season_id = ensure_season(db, league_id, year, Some(&source_season_id))
        .await
        .with_context(|| format!("resolving season {league_code}/{year}"))?;

    info!(league = %league_code, year, "loading season");
    let mut results = Vec::new();

    let (teams, standings) = load_teams(db, &season_dir, league_id, season_id).await?;
    results.push(teams);
    results.push(standings);

    results.push(load_players(db, &season_dir, league_id).await?);
    results.push(load_player_stats(db, &season_dir, league_id, season_id).await?);
    results.push(load_games(db, &season_dir, league_id, season_id).await?);

    if opts.run_identity {
        let started = Instant::now();
        let pass = run_identity_pass(db, Some(league_id)).await?;
        results.push(EntityLoadResult {
            entity: EntityKind::Identity,
            loaded: pass.linked,
            skipped: pass.skipped,
            errors: pass.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    for r in &results {
        info!(
            league = %league_code,
            year,
            entity = r.entity.label(),
            loaded = r.loaded,
            skipped = r.skipped,
            errors = r.errors,
            duration_ms = r.duration_ms,
            "entity load complete"
        );
    }
    Ok(results)
}

/// Season directories present for a league under the extractor's output root,
/// ascending. Non-numeric directory names are ignored.
pub fn discover_seasons(data_dir: &Path, league_code: &str) -> Result<Vec<i64>> {
    let league_dir = data_dir.join(league_code);
    if !league_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut years = Vec::new();
    for entry in std::fs::read_dir(&league_dir)
        .with_context(|| format!("reading {}", league_dir.display()))?
    {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(year) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<i64>().ok())
        {
            years.push(year);
        }
    }
    years.sort_unstable();
    Ok(years)
}

fn read_records(path: &Path) -> Result<Vec<Value>, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| LoadError::JsonParse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Array(records) => Ok(records),
        _ => Err(LoadError::NotAnArray {
            path: path.to_path_buf(),
        }),
    }
}

/// Read an entity dump, treating an absent file as an empty record set with a
/// warning. Older dumps name the games file `events.json`; accept both.
fn read_entity_records(
    season_dir: &Path,
    names: &[&str],
    entity: EntityKind,
) -> Result<Vec<Value>> {
    for (i, name) in names.iter().enumerate() {
        let path = season_dir.join(name);
        match read_records(&path) {
            Ok(records) => return Ok(records),
            Err(LoadError::FileNotFound { path }) => {
                if i + 1 == names.len() {
                    warn!(entity = entity.label(), path = %path.display(), "input file missing; loading nothing");
                    return Ok(Vec::new());
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(Vec::new())
}

// --- field extraction over opaque source payloads ---------------------------
// Sources disagree on spelling; take the first present key. Values that are
// numbers where we expect strings (or vice versa) are coerced.

fn field<'a>(rec: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| rec.get(*k)).filter(|v| !v.is_null())
}

fn field_str(rec: &Value, keys: &[&str]) -> Option<String> {
    match field(rec, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_i64(rec: &Value, keys: &[&str]) -> Option<i64> {
    match field(rec, keys)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

// --- teams (+ season links + embedded standings) ----------------------------

async fn load_teams(
    db: &Db,
    season_dir: &Path,
    league_id: i64,
    season_id: i64,
) -> Result<(EntityLoadResult, EntityLoadResult)> {
    let started = Instant::now();
    let records = read_entity_records(season_dir, &["teams.json"], EntityKind::Teams)?;

    let mut teams = LoadCounts::default();
    let mut standings = LoadCounts::default();
    for rec in &records {
        let team_id = match upsert_team(db, league_id, season_id, rec).await {
            Ok((outcome, team_id)) => {
                match outcome {
                    RecordOutcome::Loaded => teams.loaded += 1,
                    RecordOutcome::Skipped => teams.skipped += 1,
                }
                team_id
            }
            Err(err) => {
                warn!(entity = "teams", error = %err, "record failed; continuing");
                teams.errors += 1;
                continue;
            }
        };

        // Standings ride along inside the team record when the source
        // publishes them; absence is not an error.
        if rec.get("record").is_some() || field_i64(rec, &["wins"]).is_some() {
            standings.absorb(
                upsert_standing(db, season_id, team_id, rec).await,
                EntityKind::Standings,
            );
        }
    }

    Ok((
        teams.into_result(EntityKind::Teams, started),
        standings.into_result(EntityKind::Standings, started),
    ))
}

async fn upsert_team(
    db: &Db,
    league_id: i64,
    season_id: i64,
    rec: &Value,
) -> Result<(RecordOutcome, i64)> {
    let source_id = field_str(rec, &["id", "source_id", "sourceId", "team_id", "teamId"])
        .ok_or_else(|| anyhow!("team record has no source id"))?;
    let name = field_str(rec, &["name", "team_name", "teamName"])
        .ok_or_else(|| anyhow!("team '{source_id}' has no name"))?;
    let city = field_str(rec, &["city", "location"]);
    let abbreviation = field_str(rec, &["abbreviation", "abbr", "code"]);
    let hash = content_hash(rec);

    let existing = sqlx::query("SELECT id, source_hash FROM team WHERE league_id = ? AND source_id = ?")
        .bind(league_id)
        .bind(&source_id)
        .fetch_optional(&db.pool)
        .await?;

    let (outcome, team_id) = match existing {
        Some(row) => {
            let team_id: i64 = row.get("id");
            let stored: String = row.get("source_hash");
            if stored == hash {
                (RecordOutcome::Skipped, team_id)
            } else {
                sqlx::query(
                    "UPDATE team SET name = ?, city = ?, abbreviation = ?, source_hash = ? WHERE id = ?",
                )
                .bind(&name)
                .bind(&city)
                .bind(&abbreviation)
                .bind(&hash)
                .bind(team_id)
                .execute(&db.pool)
                .await?;
                (RecordOutcome::Loaded, team_id)
            }
        }
        None => {
            let res = sqlx::query(
                "INSERT INTO team (league_id, source_id, name, city, abbreviation, source_hash)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(league_id)
            .bind(&source_id)
            .bind(&name)
            .bind(&city)
            .bind(&abbreviation)
            .bind(&hash)
            .execute(&db.pool)
            .await?;
            (RecordOutcome::Loaded, res.last_insert_rowid())
        }
    };

    // The season link is get-or-create regardless of the hash outcome: an
    // unchanged team record still has to appear in each season it shows up in.
    let division = field_str(rec, &["division"]);
    let conference = field_str(rec, &["conference"]);
    let linked = sqlx::query("SELECT id FROM team_season WHERE team_id = ? AND season_id = ?")
        .bind(team_id)
        .bind(season_id)
        .fetch_optional(&db.pool)
        .await?;
    if linked.is_none() {
        sqlx::query(
            "INSERT INTO team_season (team_id, season_id, division, conference) VALUES (?, ?, ?, ?)",
        )
        .bind(team_id)
        .bind(season_id)
        .bind(&division)
        .bind(&conference)
        .execute(&db.pool)
        .await?;
    }

    Ok((outcome, team_id))
}

async fn upsert_standing(
    db: &Db,
    season_id: i64,
    team_id: i64,
    rec: &Value,
) -> Result<RecordOutcome> {
    let source_id = field_str(rec, &["id", "source_id", "sourceId", "team_id", "teamId"])
        .ok_or_else(|| anyhow!("standing record has no source id"))?;
    let standing = rec.get("record").unwrap_or(rec);
    let wins = field_i64(standing, &["wins", "w"]).unwrap_or(0);
    let losses = field_i64(standing, &["losses", "l"]).unwrap_or(0);
    let ties = field_i64(standing, &["ties", "t"]).unwrap_or(0);
    let goals_for = field_i64(standing, &["goals_for", "goalsFor", "gf"]);
    let goals_against = field_i64(standing, &["goals_against", "goalsAgainst", "ga"]);
    let hash = content_hash(standing);

    let existing =
        sqlx::query("SELECT id, source_hash FROM standing WHERE season_id = ? AND team_id = ?")
            .bind(season_id)
            .bind(team_id)
            .fetch_optional(&db.pool)
            .await?;

    match existing {
        Some(row) => {
            let stored: String = row.get("source_hash");
            if stored == hash {
                return Ok(RecordOutcome::Skipped);
            }
            let id: i64 = row.get("id");
            sqlx::query(
                "UPDATE standing SET wins = ?, losses = ?, ties = ?, goals_for = ?,
                        goals_against = ?, source_hash = ? WHERE id = ?",
            )
            .bind(wins)
            .bind(losses)
            .bind(ties)
            .bind(goals_for)
            .bind(goals_against)
            .bind(&hash)
            .bind(id)
            .execute(&db.pool)
            .await?;
            Ok(RecordOutcome::Loaded)
        }
        None => {
            sqlx::query(
                "INSERT INTO standing (season_id, team_id, wins, losses, ties, goals_for,
                        goals_against, source_id, source_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(season_id)
            .bind(team_id)
            .bind(wins)
            .bind(losses)
            .bind(ties)
            .bind(goals_for)
            .bind(goals_against)
            .bind(&source_id)
            .bind(&hash)
            .execute(&db.pool)
            .await?;
            Ok(RecordOutcome::Loaded)
        }
    }
}

// --- players ----------------------------------------------------------------

async fn load_players(db: &Db, season_dir: &Path, league_id: i64) -> Result<EntityLoadResult> {
    let started = Instant::now();
    let records = read_entity_records(season_dir, &["players.json"], EntityKind::Players)?;

    let mut counts = LoadCounts::default();
    for rec in &records {
        counts.absorb(upsert_player(db, league_id, rec).await, EntityKind::Players);
    }
    Ok(counts.into_result(EntityKind::Players, started))
}

fn player_display_name(rec: &Value) -> Option<String> {
    if let Some(full) = field_str(rec, &["full_name", "fullName", "name"]) {
        return Some(full);
    }
    let first = field_str(rec, &["first_name", "firstName"]).unwrap_or_default();
    let last = field_str(rec, &["last_name", "lastName"]).unwrap_or_default();
    let joined = format!("{first} {last}").trim().to_string();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

async fn upsert_player(db: &Db, league_id: i64, rec: &Value) -> Result<RecordOutcome> {
    let source_id = field_str(rec, &["id", "source_id", "sourceId", "player_id", "playerId"])
        .ok_or_else(|| anyhow!("player record has no source id"))?;
    let first_name = field_str(rec, &["first_name", "firstName"]);
    let last_name = field_str(rec, &["last_name", "lastName"]);
    let full_name = player_display_name(rec);
    let normalized = full_name.as_deref().map(normalize_name).filter(|s| !s.is_empty());
    let dob = field_str(rec, &["dob", "birth_date", "birthDate", "date_of_birth"]);
    let position = field_str(rec, &["position", "pos"]);
    let height = field_str(rec, &["height"]);
    let weight = field_str(rec, &["weight"]);
    let hometown = field_str(rec, &["hometown", "home_town", "birthplace"]);
    let college = field_str(rec, &["college", "school"]);
    let source_team_id = field_str(rec, &["team_id", "teamId", "team"]);
    let hash = content_hash(rec);

    let existing = sqlx::query(
        "SELECT id, source_hash FROM source_player WHERE league_id = ? AND source_id = ?",
    )
    .bind(league_id)
    .bind(&source_id)
    .fetch_optional(&db.pool)
    .await?;

    match existing {
        Some(row) => {
            let stored: String = row.get("source_hash");
            if stored == hash {
                return Ok(RecordOutcome::Skipped);
            }
            let id: i64 = row.get("id");
            sqlx::query(
                "UPDATE source_player SET first_name = ?, last_name = ?, full_name = ?,
                        normalized_name = ?, dob = ?, position = ?, height = ?, weight = ?,
                        hometown = ?, college = ?, source_team_id = ?, source_hash = ?
                 WHERE id = ?",
            )
            .bind(&first_name)
            .bind(&last_name)
            .bind(&full_name)
            .bind(&normalized)
            .bind(&dob)
            .bind(&position)
            .bind(&height)
            .bind(&weight)
            .bind(&hometown)
            .bind(&college)
            .bind(&source_team_id)
            .bind(&hash)
            .bind(id)
            .execute(&db.pool)
            .await?;
            Ok(RecordOutcome::Loaded)
        }
        None => {
            sqlx::query(
                "INSERT INTO source_player (league_id, source_id, first_name, last_name,
                        full_name, normalized_name, dob, position, height, weight, hometown,
                        college, source_team_id, source_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(league_id)
            .bind(&source_id)
            .bind(&first_name)
            .bind(&last_name)
            .bind(&full_name)
            .bind(&normalized)
            .bind(&dob)
            .bind(&position)
            .bind(&height)
            .bind(&weight)
            .bind(&hometown)
            .bind(&college)
            .bind(&source_team_id)
            .bind(&hash)
            .execute(&db.pool)
            .await?;
            Ok(RecordOutcome::Loaded)
        }
    }
}

// --- player stats (embedded in player records) ------------------------------

async fn load_player_stats(
    db: &Db,
    season_dir: &Path,
    league_id: i64,
    season_id: i64,
) -> Result<EntityLoadResult> {
    let started = Instant::now();
    let records = read_entity_records(season_dir, &["players.json"], EntityKind::PlayerStats)?;
    let players = player_lookup(db, league_id).await?;
    let games = game_lookup(db, season_id).await?;

    let mut counts = LoadCounts::default();
    for rec in &records {
        let Some(source_id) =
            field_str(rec, &["id", "source_id", "sourceId", "player_id", "playerId"])
        else {
            continue; // already counted as a player error
        };
        let Some(entries) = stat_entries(rec) else {
            continue;
        };
        let player_id = match players.get(&source_id) {
            Some(id) => *id,
            None => {
                warn!(player = %source_id, "stats reference an unloaded player");
                counts.errors += entries.len() as u64;
                continue;
            }
        };
        for entry in entries {
            counts.absorb(
                upsert_player_stat(db, player_id, season_id, &games, entry).await,
                EntityKind::PlayerStats,
            );
        }
    }
    Ok(counts.into_result(EntityKind::PlayerStats, started))
}

fn stat_entries(rec: &Value) -> Option<Vec<&Value>> {
    let stats = field(rec, &["stats", "season_stats", "seasonStats", "stat_lines"])?;
    match stats {
        Value::Array(items) => Some(items.iter().collect()),
        Value::Object(_) => Some(vec![stats]),
        _ => None,
    }
}

async fn game_lookup(db: &Db, season_id: i64) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT source_id, id FROM game WHERE season_id = ?")
        .bind(season_id)
        .fetch_all(&db.pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>("source_id"), r.get::<i64, _>("id")))
        .collect())
}

async fn upsert_player_stat(
    db: &Db,
    player_id: i64,
    season_id: i64,
    games: &HashMap<String, i64>,
    entry: &Value,
) -> Result<RecordOutcome> {
    let game_id = match field_str(entry, &["game_id", "gameId", "game"]) {
        Some(source_game) => Some(
            *games
                .get(&source_game)
                .ok_or_else(|| anyhow!("stat references unknown game '{source_game}'"))?,
        ),
        None => None, // season totals
    };
    let stat_type = field_str(entry, &["stat_type", "statType", "type"])
        .unwrap_or_else(|| "regular".to_string());
    let goals = field_i64(entry, &["goals", "g"]).unwrap_or(0);
    let assists = field_i64(entry, &["assists", "a"]).unwrap_or(0);
    let points = field_i64(entry, &["points", "pts"]).unwrap_or(goals + assists);
    let games_played = field_i64(entry, &["games_played", "gamesPlayed", "gp"]).unwrap_or(0);
    let shots = field_i64(entry, &["shots"]).unwrap_or(0);
    let ground_balls = field_i64(entry, &["ground_balls", "groundBalls", "gb"]).unwrap_or(0);
    let turnovers = field_i64(entry, &["turnovers", "to"]).unwrap_or(0);
    let caused_turnovers =
        field_i64(entry, &["caused_turnovers", "causedTurnovers", "ct"]).unwrap_or(0);
    let faceoff_wins = field_i64(entry, &["faceoff_wins", "faceoffWins", "fow"]).unwrap_or(0);
    let faceoff_losses = field_i64(entry, &["faceoff_losses", "faceoffLosses", "fol"]).unwrap_or(0);
    let saves = field_i64(entry, &["saves"]);
    let goals_against = field_i64(entry, &["goals_against", "goalsAgainst"]);
    let hash = content_hash(entry);

    let existing = match game_id {
        Some(gid) => {
            sqlx::query(
                "SELECT id, source_hash FROM player_stat
                 WHERE source_player_id = ? AND season_id = ? AND game_id = ?",
            )
            .bind(player_id)
            .bind(season_id)
            .bind(gid)
            .fetch_optional(&db.pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, source_hash FROM player_stat
                 WHERE source_player_id = ? AND season_id = ? AND game_id IS NULL",
            )
            .bind(player_id)
            .bind(season_id)
            .fetch_optional(&db.pool)
            .await?
        }
    };

    match existing {
        Some(row) => {
            let stored: String = row.get("source_hash");
            if stored == hash {
                return Ok(RecordOutcome::Skipped);
            }
            let id: i64 = row.get("id");
            sqlx::query(
                "UPDATE player_stat SET stat_type = ?, games_played = ?, goals = ?, assists = ?,
                        points = ?, shots = ?, ground_balls = ?, turnovers = ?,
                        caused_turnovers = ?, faceoff_wins = ?, faceoff_losses = ?, saves = ?,
                        goals_against = ?, source_hash = ?
                 WHERE id = ?",
            )
            .bind(&stat_type)
            .bind(games_played)
            .bind(goals)
            .bind(assists)
            .bind(points)
            .bind(shots)
            .bind(ground_balls)
            .bind(turnovers)
            .bind(caused_turnovers)
            .bind(faceoff_wins)
            .bind(faceoff_losses)
            .bind(saves)
            .bind(goals_against)
            .bind(&hash)
            .bind(id)
            .execute(&db.pool)
            .await?;
            Ok(RecordOutcome::Loaded)
        }
        None => {
            sqlx::query(
                "INSERT INTO player_stat (source_player_id, season_id, game_id, stat_type,
                        games_played, goals, assists, points, shots, ground_balls, turnovers,
                        caused_turnovers, faceoff_wins, faceoff_losses, saves, goals_against,
                        source_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(player_id)
            .bind(season_id)
            .bind(game_id)
            .bind(&stat_type)
            .bind(games_played)
            .bind(goals)
            .bind(assists)
            .bind(points)
            .bind(shots)
            .bind(ground_balls)
            .bind(turnovers)
            .bind(caused_turnovers)
            .bind(faceoff_wins)
            .bind(faceoff_losses)
            .bind(saves)
            .bind(goals_against)
            .bind(&hash)
            .execute(&db.pool)
            .await?;
            Ok(RecordOutcome::Loaded)
        }
    }
}

// --- games ------------------------------------------------------------------

async fn load_games(
    db: &Db,
    season_dir: &Path,
    league_id: i64,
    season_id: i64,
) -> Result<EntityLoadResult> {
    let started = Instant::now();
    let records =
        read_entity_records(season_dir, &["games.json", "events.json"], EntityKind::Games)?;
    let teams = team_lookup(db, league_id).await?;

    let mut counts = LoadCounts::default();
    for rec in &records {
        counts.absorb(
            upsert_game(db, season_id, &teams, rec).await,
            EntityKind::Games,
        );
    }
    Ok(counts.into_result(EntityKind::Games, started))
}

async fn upsert_game(
    db: &Db,
    season_id: i64,
    teams: &HashMap<String, i64>,
    rec: &Value,
) -> Result<RecordOutcome> {
    let source_id = field_str(rec, &["id", "source_id", "sourceId", "game_id", "gameId"])
        .ok_or_else(|| anyhow!("game record has no source id"))?;
    // Team references outside the loaded set are tolerated (e.g. exhibition
    // opponents); the game row keeps a NULL side.
    let home_team_id = field_str(rec, &["home_team_id", "homeTeamId", "home_team", "home"])
        .and_then(|sid| teams.get(&sid).copied());
    let away_team_id = field_str(rec, &["away_team_id", "awayTeamId", "away_team", "away"])
        .and_then(|sid| teams.get(&sid).copied());
    let home_score = field_i64(rec, &["home_score", "homeScore"]);
    let away_score = field_i64(rec, &["away_score", "awayScore"]);
    let played_at = field_str(rec, &["played_at", "playedAt", "date", "start_time", "startTime"]);
    let status = field_str(rec, &["status", "state"]);
    let hash = content_hash(rec);

    let existing =
        sqlx::query("SELECT id, source_hash FROM game WHERE season_id = ? AND source_id = ?")
            .bind(season_id)
            .bind(&source_id)
            .fetch_optional(&db.pool)
            .await?;

    match existing {
        Some(row) => {
            let stored: String = row.get("source_hash");
            if stored == hash {
                return Ok(RecordOutcome::Skipped);
            }
            let id: i64 = row.get("id");
            sqlx::query(
                "UPDATE game SET home_team_id = ?, away_team_id = ?, home_score = ?,
                        away_score = ?, played_at = ?, status = ?, source_hash = ?
                 WHERE id = ?",
            )
            .bind(home_team_id)
            .bind(away_team_id)
            .bind(home_score)
            .bind(away_score)
            .bind(&played_at)
            .bind(&status)
            .bind(&hash)
            .bind(id)
            .execute(&db.pool)
            .await?;
            Ok(RecordOutcome::Loaded)
        }
        None => {
            sqlx::query(
                "INSERT INTO game (season_id, source_id, home_team_id, away_team_id,
                        home_score, away_score, played_at, status, source_hash)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(season_id)
            .bind(&source_id)
            .bind(home_team_id)
            .bind(away_team_id)
            .bind(home_score)
            .bind(away_score)
            .bind(&played_at)
            .bind(&status)
            .bind(&hash)
            .execute(&db.pool)
            .await?;
            Ok(RecordOutcome::Loaded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write_season_file(dir: &Path, league: &str, year: i64, name: &str, value: &Value) {
        let season_dir = dir.join(league).join(year.to_string());
        fs::create_dir_all(&season_dir).unwrap();
        fs::write(
            season_dir.join(name),
            serde_json::to_string_pretty(value).unwrap(),
        )
        .unwrap();
    }

    fn sample_teams() -> Value {
        json!([
            {"id": "t1", "name": "Archers", "city": "Utah", "abbreviation": "ARC",
             "division": "West", "record": {"wins": 7, "losses": 3, "ties": 0}},
            {"id": "t2", "name": "Whipsnakes", "city": "Maryland", "abbreviation": "WHP",
             "division": "East", "record": {"wins": 5, "losses": 5, "ties": 0}}
        ])
    }

    fn sample_players() -> Value {
        json!([
            {"id": "p1", "first_name": "Lyle", "last_name": "Thompson",
             "dob": "1992-09-15", "position": "A", "team_id": "t1",
             "stats": {"goals": 32, "assists": 41, "games_played": 10}},
            {"id": "p2", "full_name": "Trevor Baptiste", "dob": "1996-01-21",
             "position": "FO", "team_id": "t2",
             "stats": {"goals": 4, "assists": 2, "faceoff_wins": 210, "faceoff_losses": 90}}
        ])
    }

    fn result_for(results: &[EntityLoadResult], entity: EntityKind) -> EntityLoadResult {
        results
            .iter()
            .find(|r| r.entity == entity)
            .cloned()
            .unwrap_or_else(|| panic!("no result for {}", entity.label()))
    }

    #[tokio::test]
    async fn second_load_of_identical_dump_skips_everything() {
        let db = Db::connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_season_file(dir.path(), "pll", 2024, "teams.json", &sample_teams());
        write_season_file(dir.path(), "pll", 2024, "players.json", &sample_players());

        let first = load_season(&db, dir.path(), "pll", 2024, LoadOptions::default())
            .await
            .unwrap();
        let teams = result_for(&first, EntityKind::Teams);
        assert_eq!((teams.loaded, teams.skipped, teams.errors), (2, 0, 0));
        let players = result_for(&first, EntityKind::Players);
        assert_eq!((players.loaded, players.skipped), (2, 0));
        let stats = result_for(&first, EntityKind::PlayerStats);
        assert_eq!((stats.loaded, stats.skipped), (2, 0));

        let second = load_season(&db, dir.path(), "pll", 2024, LoadOptions::default())
            .await
            .unwrap();
        for entity in [EntityKind::Teams, EntityKind::Players, EntityKind::PlayerStats] {
            let r = result_for(&second, entity);
            assert_eq!(r.loaded, 0, "{} reloaded", entity.label());
            assert_eq!(r.errors, 0);
            assert!(r.skipped > 0);
        }
    }

    #[tokio::test]
    async fn changing_one_record_reloads_only_that_record() {
        let db = Db::connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_season_file(dir.path(), "pll", 2024, "teams.json", &sample_teams());
        load_season(&db, dir.path(), "pll", 2024, LoadOptions::default())
            .await
            .unwrap();

        let mut teams = sample_teams();
        teams[0]["city"] = json!("Salt Lake City");
        write_season_file(dir.path(), "pll", 2024, "teams.json", &teams);

        let results = load_season(&db, dir.path(), "pll", 2024, LoadOptions::default())
            .await
            .unwrap();
        let r = result_for(&results, EntityKind::Teams);
        assert_eq!((r.loaded, r.skipped, r.errors), (1, 1, 0));

        let city: String = sqlx::query_scalar("SELECT city FROM team WHERE source_id = 't1'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(city, "Salt Lake City");
    }

    #[tokio::test]
    async fn missing_optional_file_yields_zero_counts() {
        let db = Db::connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_season_file(dir.path(), "pll", 2024, "teams.json", &sample_teams());

        let results = load_season(&db, dir.path(), "pll", 2024, LoadOptions::default())
            .await
            .unwrap();
        let games = result_for(&results, EntityKind::Games);
        assert_eq!((games.loaded, games.skipped, games.errors), (0, 0, 0));
    }

    #[tokio::test]
    async fn events_json_is_accepted_as_games_alias() {
        let db = Db::connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_season_file(dir.path(), "pll", 2024, "teams.json", &sample_teams());
        write_season_file(
            dir.path(),
            "pll",
            2024,
            "events.json",
            &json!([
                {"id": "g1", "home_team_id": "t1", "away_team_id": "t2",
                 "home_score": 12, "away_score": 10, "status": "final"}
            ]),
        );

        let results = load_season(&db, dir.path(), "pll", 2024, LoadOptions::default())
            .await
            .unwrap();
        let games = result_for(&results, EntityKind::Games);
        assert_eq!((games.loaded, games.errors), (1, 0));
    }

    #[tokio::test]
    async fn bad_record_is_counted_and_does_not_abort_the_file() {
        let db = Db::connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_season_file(
            dir.path(),
            "pll",
            2024,
            "teams.json",
            &json!([
                {"id": "t1"},  // no name: per-record failure
                {"id": "t2", "name": "Whipsnakes"}
            ]),
        );

        let results = load_season(&db, dir.path(), "pll", 2024, LoadOptions::default())
            .await
            .unwrap();
        let teams = result_for(&results, EntityKind::Teams);
        assert_eq!((teams.loaded, teams.skipped, teams.errors), (1, 0, 1));
    }

    #[tokio::test]
    async fn malformed_json_fails_the_season() {
        let db = Db::connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let season_dir = dir.path().join("pll").join("2024");
        fs::create_dir_all(&season_dir).unwrap();
        fs::write(season_dir.join("teams.json"), "{not json").unwrap();

        let err = load_season(&db, dir.path(), "pll", 2024, LoadOptions::default()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn team_season_links_accumulate_across_seasons() {
        let db = Db::connect_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_season_file(dir.path(), "pll", 2023, "teams.json", &sample_teams());
        write_season_file(dir.path(), "pll", 2024, "teams.json", &sample_teams());

        load_season(&db, dir.path(), "pll", 2023, LoadOptions::default())
            .await
            .unwrap();
        let results = load_season(&db, dir.path(), "pll", 2024, LoadOptions::default())
            .await
            .unwrap();

        // Identical team content: skipped at the team level, but the new
        // season still gets its links.
        let teams = result_for(&results, EntityKind::Teams);
        assert_eq!((teams.loaded, teams.skipped), (0, 2));

        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM team_season")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(links, 4);

        let team_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM team")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(team_rows, 2);
    }

    #[tokio::test]
    async fn discover_seasons_lists_numeric_directories() {
        let dir = tempfile::tempdir().unwrap();
        for year in ["2022", "2024", "2023", "tmp"] {
            fs::create_dir_all(dir.path().join("pll").join(year)).unwrap();
        }
        let seasons = discover_seasons(dir.path(), "pll").unwrap();
        assert_eq!(seasons, vec![2022, 2023, 2024]);
        assert!(discover_seasons(dir.path(), "nll").unwrap().is_empty());
    }
}
