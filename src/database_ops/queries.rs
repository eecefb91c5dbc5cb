//! Read-only query surface: keyset-paginated leaderboards over season-total
//! stat rows, golden-record profiles, name search and per-team stats. Safe to
//! run concurrently with loads; a mid-flight load may be observed as
//! partially updated.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;

use crate::database_ops::db::Db;
use crate::normalization::name::normalize_name;

/// Hard cap on leaderboard page size.
pub const MAX_PAGE_SIZE: i64 = 500;

/// Sortable leaderboard columns. Closed set: the column name is interpolated
/// into SQL and must never come from user input directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Points,
    Goals,
    Assists,
}

impl SortBy {
    fn column(self) -> &'static str {
        match self {
            SortBy::Points => "points",
            SortBy::Goals => "goals",
            SortBy::Assists => "assists",
        }
    }
}

impl FromStr for SortBy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "points" => Ok(SortBy::Points),
            "goals" => Ok(SortBy::Goals),
            "assists" => Ok(SortBy::Assists),
            other => Err(anyhow::anyhow!(
                "unknown sort column '{other}' (expected points, goals or assists)"
            )),
        }
    }
}

/// Stat row flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatType {
    Regular,
    Playoff,
    Career,
}

impl StatType {
    pub fn as_str(self) -> &'static str {
        match self {
            StatType::Regular => "regular",
            StatType::Playoff => "playoff",
            StatType::Career => "career",
        }
    }
}

impl FromStr for StatType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "regular" => Ok(StatType::Regular),
            "playoff" => Ok(StatType::Playoff),
            "career" => Ok(StatType::Career),
            other => Err(anyhow::anyhow!(
                "unknown stat type '{other}' (expected regular, playoff or career)"
            )),
        }
    }
}

/// Keyset pagination cursor: the sort value and row id of the last entry the
/// caller has seen. Opaque to clients; `value:id` in string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cursor {
    pub value: i64,
    pub id: i64,
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.value, self.id)
    }
}

impl FromStr for Cursor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (value, id) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("malformed cursor '{s}'"))?;
        Ok(Cursor {
            value: value.trim().parse()?,
            id: id.trim().parse()?,
        })
    }
}

/// Leaderboard filters, combined with AND. Soft-deleted players are always
/// excluded.
#[derive(Debug, Clone, Default)]
pub struct LeaderboardFilter {
    pub league: Option<String>,
    pub season_year: Option<i64>,
    pub stat_type: Option<StatType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    /// Position within the returned page only (1-based). Not a global rank:
    /// following a cursor restarts the numbering. Kept page-relative on
    /// purpose; see DESIGN.md.
    pub rank: usize,
    pub stat_id: i64,
    pub source_player_id: i64,
    pub canonical_player_id: Option<i64>,
    pub player_name: Option<String>,
    pub league_code: String,
    pub season_year: i64,
    pub goals: i64,
    pub assists: i64,
    pub points: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

/// Keyset-paginated leaderboard over season-total rows, ordered by the chosen
/// column then row id, both descending. Fetches `limit + 1` rows to decide
/// `has_more` without a second query.
pub async fn get_leaderboard(
    db: &Db,
    filter: &LeaderboardFilter,
    sort_by: SortBy,
    cursor: Option<Cursor>,
    limit: i64,
) -> Result<LeaderboardPage> {
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let col = sort_by.column();

    let mut sql = String::from(
        "SELECT ps.id AS stat_id, ps.source_player_id, ps.goals, ps.assists, ps.points,
                sp.full_name, l.code AS league_code, se.year AS season_year,
                pi.canonical_player_id
         FROM player_stat ps
         JOIN source_player sp ON sp.id = ps.source_player_id
         JOIN season se ON se.id = ps.season_id
         JOIN league l ON l.id = se.league_id
         LEFT JOIN player_identity pi ON pi.source_player_id = sp.id
         WHERE ps.game_id IS NULL AND sp.deleted_at IS NULL",
    );
    if filter.league.is_some() {
        sql.push_str(" AND l.code = ?");
    }
    if filter.season_year.is_some() {
        sql.push_str(" AND se.year = ?");
    }
    if filter.stat_type.is_some() {
        sql.push_str(" AND ps.stat_type = ?");
    }
    if cursor.is_some() {
        sql.push_str(&format!(
            " AND (ps.{col} < ? OR (ps.{col} = ? AND ps.id < ?))"
        ));
    }
    sql.push_str(&format!(" ORDER BY ps.{col} DESC, ps.id DESC LIMIT ?"));

    let mut query = sqlx::query(&sql);
    if let Some(code) = &filter.league {
        query = query.bind(code);
    }
    if let Some(year) = filter.season_year {
        query = query.bind(year);
    }
    if let Some(stat_type) = filter.stat_type {
        query = query.bind(stat_type.as_str());
    }
    if let Some(c) = cursor {
        query = query.bind(c.value).bind(c.value).bind(c.id);
    }
    query = query.bind(limit + 1);

    let mut rows = query.fetch_all(&db.pool).await?;
    let has_more = rows.len() as i64 > limit;
    if has_more {
        rows.truncate(limit as usize);
    }

    let entries: Vec<LeaderboardEntry> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| LeaderboardEntry {
            rank: i + 1,
            stat_id: r.get("stat_id"),
            source_player_id: r.get("source_player_id"),
            canonical_player_id: r.get("canonical_player_id"),
            player_name: r.get("full_name"),
            league_code: r.get("league_code"),
            season_year: r.get("season_year"),
            goals: r.get("goals"),
            assists: r.get("assists"),
            points: r.get("points"),
        })
        .collect();

    let next_cursor = if has_more {
        entries.last().map(|last| Cursor {
            value: match sort_by {
                SortBy::Points => last.points,
                SortBy::Goals => last.goals,
                SortBy::Assists => last.assists,
            },
            id: last.stat_id,
        })
    } else {
        None
    };

    Ok(LeaderboardPage {
        entries,
        next_cursor,
        has_more,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalPlayerRecord {
    pub id: i64,
    pub display_name: String,
    pub primary_source_player_id: i64,
    pub dob: Option<String>,
    pub position: Option<String>,
    pub hometown: Option<String>,
    pub college: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkedSourceRecord {
    pub source_player_id: i64,
    pub league_code: String,
    pub source_id: String,
    pub full_name: Option<String>,
    pub match_method: String,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerProfile {
    pub canonical: CanonicalPlayerRecord,
    pub sources: Vec<LinkedSourceRecord>,
}

/// The golden record plus every linked per-league source row.
pub async fn get_player(db: &Db, canonical_id: i64) -> Result<Option<PlayerProfile>> {
    let canonical = sqlx::query(
        "SELECT id, display_name, primary_source_player_id, dob, position, hometown, college
         FROM canonical_player WHERE id = ?",
    )
    .bind(canonical_id)
    .fetch_optional(&db.pool)
    .await?;
    let Some(c) = canonical else {
        return Ok(None);
    };

    let sources = sqlx::query(
        "SELECT sp.id AS source_player_id, l.code AS league_code, sp.source_id, sp.full_name,
                pi.match_method, pi.confidence_score
         FROM player_identity pi
         JOIN source_player sp ON sp.id = pi.source_player_id
         JOIN league l ON l.id = sp.league_id
         WHERE pi.canonical_player_id = ?
         ORDER BY l.priority, sp.id",
    )
    .bind(canonical_id)
    .fetch_all(&db.pool)
    .await?
    .into_iter()
    .map(|r| LinkedSourceRecord {
        source_player_id: r.get("source_player_id"),
        league_code: r.get("league_code"),
        source_id: r.get("source_id"),
        full_name: r.get("full_name"),
        match_method: r.get("match_method"),
        confidence_score: r.get("confidence_score"),
    })
    .collect();

    Ok(Some(PlayerProfile {
        canonical: CanonicalPlayerRecord {
            id: c.get("id"),
            display_name: c.get("display_name"),
            primary_source_player_id: c.get("primary_source_player_id"),
            dob: c.get("dob"),
            position: c.get("position"),
            hometown: c.get("hometown"),
            college: c.get("college"),
        },
        sources,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerSearchHit {
    pub source_player_id: i64,
    pub league_code: String,
    pub full_name: Option<String>,
    pub dob: Option<String>,
    pub canonical_player_id: Option<i64>,
}

/// Substring search over normalized names; the query goes through the same
/// folding as stored names, so "José" finds "jose".
pub async fn search_players(
    db: &Db,
    name: &str,
    league: Option<&str>,
    limit: i64,
) -> Result<Vec<PlayerSearchHit>> {
    let pattern = format!("%{}%", normalize_name(name));
    let limit = limit.clamp(1, MAX_PAGE_SIZE);

    let mut sql = String::from(
        "SELECT sp.id AS source_player_id, l.code AS league_code, sp.full_name, sp.dob,
                pi.canonical_player_id
         FROM source_player sp
         JOIN league l ON l.id = sp.league_id
         LEFT JOIN player_identity pi ON pi.source_player_id = sp.id
         WHERE sp.deleted_at IS NULL AND sp.normalized_name LIKE ?",
    );
    if league.is_some() {
        sql.push_str(" AND l.code = ?");
    }
    sql.push_str(" ORDER BY sp.normalized_name, sp.id LIMIT ?");

    let mut query = sqlx::query(&sql).bind(pattern);
    if let Some(code) = league {
        query = query.bind(code);
    }
    query = query.bind(limit);

    Ok(query
        .fetch_all(&db.pool)
        .await?
        .into_iter()
        .map(|r| PlayerSearchHit {
            source_player_id: r.get("source_player_id"),
            league_code: r.get("league_code"),
            full_name: r.get("full_name"),
            dob: r.get("dob"),
            canonical_player_id: r.get("canonical_player_id"),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamSeasonStats {
    pub team_id: i64,
    pub team_name: String,
    pub season_year: i64,
    pub wins: i64,
    pub losses: i64,
    pub ties: i64,
    pub goals_for: Option<i64>,
    pub goals_against: Option<i64>,
    pub games_recorded: i64,
}

/// Standings plus recorded game counts for one team, optionally restricted to
/// a single season.
pub async fn get_team_stats(
    db: &Db,
    team_id: i64,
    season_year: Option<i64>,
) -> Result<Vec<TeamSeasonStats>> {
    let mut sql = String::from(
        "SELECT t.id AS team_id, t.name AS team_name, se.year AS season_year,
                st.wins, st.losses, st.ties, st.goals_for, st.goals_against,
                (SELECT COUNT(*) FROM game g
                  WHERE g.season_id = se.id
                    AND (g.home_team_id = t.id OR g.away_team_id = t.id)) AS games_recorded
         FROM standing st
         JOIN team t ON t.id = st.team_id
         JOIN season se ON se.id = st.season_id
         WHERE t.id = ?",
    );
    if season_year.is_some() {
        sql.push_str(" AND se.year = ?");
    }
    sql.push_str(" ORDER BY se.year");

    let mut query = sqlx::query(&sql).bind(team_id);
    if let Some(year) = season_year {
        query = query.bind(year);
    }

    Ok(query
        .fetch_all(&db.pool)
        .await?
        .into_iter()
        .map(|r| TeamSeasonStats {
            team_id: r.get("team_id"),
            team_name: r.get("team_name"),
            season_year: r.get("season_year"),
            wins: r.get("wins"),
            losses: r.get("losses"),
            ties: r.get("ties"),
            goals_for: r.get("goals_for"),
            goals_against: r.get("goals_against"),
            games_recorded: r.get("games_recorded"),
        })
        .collect())
}
