//! Get-or-create helpers for dimension rows and the per-load lookup maps that
//! resolve external source ids to internal row ids.
//!
//! Check-then-insert without an upsert guard: the pipeline runs single-writer
//! (one invocation at a time per league/season). A concurrent duplicate insert
//! would be rejected by the unique constraint, not silently merged.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::Row;
use tracing::debug;

use crate::database_ops::db::{Db, DEFAULT_LEAGUE_PRIORITY};

/// Look up a league by code, inserting a default row when absent.
/// Returns the internal league id.
pub async fn ensure_league(db: &Db, code: &str) -> Result<i64> {
    let existing = sqlx::query("SELECT id FROM league WHERE code = ?")
        .bind(code)
        .fetch_optional(&db.pool)
        .await?;
    if let Some(row) = existing {
        return Ok(row.get("id"));
    }

    // Unknown source: seed with the code as a stand-in name and the lowest
    // trust ranking until an operator edits the row.
    let res = sqlx::query("INSERT INTO league (code, name, priority, active) VALUES (?, ?, ?, 1)")
        .bind(code)
        .bind(code.to_uppercase())
        .bind(DEFAULT_LEAGUE_PRIORITY)
        .execute(&db.pool)
        .await?;
    let id = res.last_insert_rowid();
    debug!(league = %code, id, "created league row");
    Ok(id)
}

/// Look up a season by (league, year), inserting when absent. The external
/// source season identifier is retained for traceability but plays no part in
/// the natural key.
pub async fn ensure_season(
    db: &Db,
    league_id: i64,
    year: i64,
    source_season_id: Option<&str>,
) -> Result<i64> {
    let existing = sqlx::query("SELECT id FROM season WHERE league_id = ? AND year = ?")
        .bind(league_id)
        .bind(year)
        .fetch_optional(&db.pool)
        .await?;
    if let Some(row) = existing {
        return Ok(row.get("id"));
    }

    let res = sqlx::query("INSERT INTO season (league_id, year, source_season_id) VALUES (?, ?, ?)")
        .bind(league_id)
        .bind(year)
        .bind(source_season_id)
        .execute(&db.pool)
        .await?;
    let id = res.last_insert_rowid();
    debug!(league_id, year, id, "created season row");
    Ok(id)
}

/// Map of external team source id -> internal team id for one league, built
/// once per load invocation and consulted while resolving stat and game
/// foreign keys.
pub async fn team_lookup(db: &Db, league_id: i64) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT source_id, id FROM team WHERE league_id = ?")
        .bind(league_id)
        .fetch_all(&db.pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>("source_id"), r.get::<i64, _>("id")))
        .collect())
}

/// Map of external player source id -> internal source_player id for one
/// league. Soft-deleted players stay resolvable: their stats keep loading.
pub async fn player_lookup(db: &Db, league_id: i64) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT source_id, id FROM source_player WHERE league_id = ?")
        .bind(league_id)
        .fetch_all(&db.pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>("source_id"), r.get::<i64, _>("id")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_league_returns_stable_ids() {
        let db = Db::connect_in_memory().await.unwrap();
        let first = ensure_league(&db, "pll").await.unwrap();
        let second = ensure_league(&db, "pll").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_league_gets_default_priority() {
        let db = Db::connect_in_memory().await.unwrap();
        let id = ensure_league(&db, "boxla").await.unwrap();
        let priority: i64 = sqlx::query_scalar("SELECT priority FROM league WHERE id = ?")
            .bind(id)
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(priority, DEFAULT_LEAGUE_PRIORITY);
    }

    #[tokio::test]
    async fn ensure_season_is_unique_per_league_year() {
        let db = Db::connect_in_memory().await.unwrap();
        let league = ensure_league(&db, "pll").await.unwrap();
        let a = ensure_season(&db, league, 2024, Some("pll-2024")).await.unwrap();
        let b = ensure_season(&db, league, 2024, None).await.unwrap();
        let c = ensure_season(&db, league, 2023, None).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn lookup_maps_reflect_loaded_rows() {
        let db = Db::connect_in_memory().await.unwrap();
        let league = ensure_league(&db, "pll").await.unwrap();
        sqlx::query(
            "INSERT INTO team (league_id, source_id, name, source_hash) VALUES (?, 't9', 'Whipsnakes', 'h')",
        )
        .bind(league)
        .execute(&db.pool)
        .await
        .unwrap();

        let teams = team_lookup(&db, league).await.unwrap();
        assert_eq!(teams.len(), 1);
        assert!(teams.contains_key("t9"));

        let players = player_lookup(&db, league).await.unwrap();
        assert!(players.is_empty());
    }
}
