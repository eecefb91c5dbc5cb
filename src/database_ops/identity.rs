//! Cross-league player identity resolution.
//!
//! A source player is linked to a canonical "golden record" player when
//! another source player in any league shares its exact normalized name and
//! date of birth. This module is the only place where cross-league data
//! fusion happens; everything else treats leagues independently.

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database_ops::db::Db;

/// The only matching strategy currently implemented. Fuzzy matching is
/// deliberately out of scope.
pub const MATCH_METHOD_EXACT: &str = "exact";

/// Confidence recorded on every exact-match identity link.
pub const EXACT_MATCH_CONFIDENCE: f64 = 1.0;

/// Per-source-player outcomes of identity processing. Callers switch on these
/// exhaustively; the batch pass folds them into counters.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("source player {source_player_id} not found (or soft-deleted)")]
    SourcePlayerNotFound { source_player_id: i64 },

    #[error("source player {source_player_id} already linked to canonical player {existing_canonical_player_id}")]
    AlreadyLinked {
        source_player_id: i64,
        existing_canonical_player_id: i64,
    },

    #[error("source player {source_player_id} has no {missing_field}; exact matching requires normalized name and date of birth")]
    NoExactMatchData {
        source_player_id: i64,
        missing_field: &'static str,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityMatch {
    pub canonical_player_id: i64,
    pub is_new_canonical: bool,
    /// Every source player currently linked to the canonical, including the
    /// one just processed.
    pub linked_source_player_ids: Vec<i64>,
}

struct SourcePlayerRow {
    id: i64,
    first_name: Option<String>,
    last_name: Option<String>,
    full_name: Option<String>,
    normalized_name: Option<String>,
    dob: Option<String>,
    position: Option<String>,
    hometown: Option<String>,
    college: Option<String>,
    league_priority: i64,
}

async fn fetch_source_player(db: &Db, id: i64) -> Result<Option<SourcePlayerRow>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT sp.id, sp.first_name, sp.last_name, sp.full_name, sp.normalized_name,
                sp.dob, sp.position, sp.hometown, sp.college, l.priority AS league_priority
         FROM source_player sp
         JOIN league l ON l.id = sp.league_id
         WHERE sp.id = ? AND sp.deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(&db.pool)
    .await?;
    Ok(row.map(|r| SourcePlayerRow {
        id: r.get("id"),
        first_name: r.get("first_name"),
        last_name: r.get("last_name"),
        full_name: r.get("full_name"),
        normalized_name: r.get("normalized_name"),
        dob: r.get("dob"),
        position: r.get("position"),
        hometown: r.get("hometown"),
        college: r.get("college"),
        league_priority: r.get("league_priority"),
    }))
}

fn display_name(player: &SourcePlayerRow) -> String {
    if let Some(full) = player.full_name.as_deref().filter(|s| !s.trim().is_empty()) {
        return full.trim().to_string();
    }
    let first = player.first_name.as_deref().unwrap_or("");
    let last = player.last_name.as_deref().unwrap_or("");
    let joined = format!("{first} {last}").trim().to_string();
    if joined.is_empty() {
        // Exact matching guaranteed a normalized name; last resort only.
        player.normalized_name.clone().unwrap_or_default()
    } else {
        joined
    }
}

async fn linked_players_of(db: &Db, canonical_id: i64) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT source_player_id FROM player_identity
         WHERE canonical_player_id = ? ORDER BY source_player_id",
    )
    .bind(canonical_id)
    .fetch_all(&db.pool)
    .await
}

async fn insert_identity(
    db: &Db,
    source_player_id: i64,
    canonical_player_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO player_identity (source_player_id, canonical_player_id, match_method,
                confidence_score)
         VALUES (?, ?, ?, ?)",
    )
    .bind(source_player_id)
    .bind(canonical_player_id)
    .bind(MATCH_METHOD_EXACT)
    .bind(EXACT_MATCH_CONFIDENCE)
    .execute(&db.pool)
    .await?;
    Ok(())
}

/// Resolve the canonical identity of one source player.
///
/// Exact-match state machine:
/// 1. the player must exist and not be soft-deleted;
/// 2. an existing identity link fails with [`IdentityError::AlreadyLinked`]
///    (links are immutable once written);
/// 3. both `normalized_name` and `dob` must be present;
/// 4. all other non-deleted source players sharing that (name, dob) pair are
///    candidates;
/// 5. a candidate that is already linked pulls this player into its canonical
///    record;
/// 6. otherwise a new canonical player is created from the primary source:
///    the group member whose league has the lowest priority number, ties
///    broken by lowest source player id. Every group member is linked.
pub async fn process_identity(
    db: &Db,
    source_player_id: i64,
) -> Result<IdentityMatch, IdentityError> {
    let player = fetch_source_player(db, source_player_id)
        .await?
        .ok_or(IdentityError::SourcePlayerNotFound { source_player_id })?;

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT canonical_player_id FROM player_identity WHERE source_player_id = ?",
    )
    .bind(source_player_id)
    .fetch_optional(&db.pool)
    .await?;
    if let Some(existing_canonical_player_id) = existing {
        return Err(IdentityError::AlreadyLinked {
            source_player_id,
            existing_canonical_player_id,
        });
    }

    let normalized_name = match player.normalized_name.as_deref().filter(|s| !s.is_empty()) {
        Some(n) => n.to_string(),
        None => {
            return Err(IdentityError::NoExactMatchData {
                source_player_id,
                missing_field: "normalized_name",
            })
        }
    };
    let dob = match player.dob.as_deref().filter(|s| !s.is_empty()) {
        Some(d) => d.to_string(),
        None => {
            return Err(IdentityError::NoExactMatchData {
                source_player_id,
                missing_field: "dob",
            })
        }
    };

    // Candidates across every league, annotated with any existing canonical
    // link and their league's trust ranking. Ordering makes the tie-breaks
    // below deterministic.
    let candidates = sqlx::query(
        "SELECT sp.id, l.priority AS league_priority, pi.canonical_player_id
         FROM source_player sp
         JOIN league l ON l.id = sp.league_id
         LEFT JOIN player_identity pi ON pi.source_player_id = sp.id
         WHERE sp.normalized_name = ? AND sp.dob = ? AND sp.id != ?
           AND sp.deleted_at IS NULL
         ORDER BY l.priority, sp.id",
    )
    .bind(&normalized_name)
    .bind(&dob)
    .bind(source_player_id)
    .fetch_all(&db.pool)
    .await?;

    // Step 5: join an existing canonical record when any candidate has one.
    if let Some(canonical_id) = candidates
        .iter()
        .find_map(|r| r.get::<Option<i64>, _>("canonical_player_id"))
    {
        insert_identity(db, source_player_id, canonical_id).await?;
        let linked = linked_players_of(db, canonical_id).await?;
        info!(
            source_player_id,
            canonical_player_id = canonical_id,
            linked = linked.len(),
            "linked source player to existing canonical"
        );
        return Ok(IdentityMatch {
            canonical_player_id: canonical_id,
            is_new_canonical: false,
            linked_source_player_ids: linked,
        });
    }

    // Step 6: nobody in the group is linked yet. Pick the primary source by
    // league trust and copy its biography onto the new golden record.
    let mut group: Vec<(i64, i64)> = candidates
        .iter()
        .map(|r| (r.get::<i64, _>("id"), r.get::<i64, _>("league_priority")))
        .collect();
    group.push((player.id, player.league_priority));

    let (primary_id, _) = *group
        .iter()
        .min_by_key(|(id, priority)| (*priority, *id))
        .expect("group contains at least the player itself");

    let primary = if primary_id == player.id {
        player
    } else {
        fetch_source_player(db, primary_id)
            .await?
            .ok_or(IdentityError::SourcePlayerNotFound {
                source_player_id: primary_id,
            })?
    };

    let name = display_name(&primary);
    let res = sqlx::query(
        "INSERT INTO canonical_player (primary_source_player_id, display_name, first_name,
                last_name, dob, position, hometown, college)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(primary.id)
    .bind(&name)
    .bind(&primary.first_name)
    .bind(&primary.last_name)
    .bind(&primary.dob)
    .bind(&primary.position)
    .bind(&primary.hometown)
    .bind(&primary.college)
    .execute(&db.pool)
    .await?;
    let canonical_id = res.last_insert_rowid();

    let mut linked: Vec<i64> = group.iter().map(|(id, _)| *id).collect();
    linked.sort_unstable();
    for id in &linked {
        insert_identity(db, *id, canonical_id).await?;
    }

    info!(
        canonical_player_id = canonical_id,
        primary_source_player_id = primary.id,
        display_name = %name,
        linked = linked.len(),
        "created canonical player"
    );
    Ok(IdentityMatch {
        canonical_player_id: canonical_id,
        is_new_canonical: true,
        linked_source_player_ids: linked,
    })
}

/// Aggregate outcome of a batch identity pass.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct IdentityPassSummary {
    /// Source players whose processing produced a link (new or existing
    /// canonical). A single processing step may link several group members.
    pub linked: u64,
    /// Already linked (e.g. pulled in by an earlier group member this pass)
    /// or lacking exact-match data.
    pub skipped: u64,
    pub errors: u64,
}

/// Run identity resolution over every unlinked, non-deleted source player,
/// optionally restricted to one league. Per-player failures never abort the
/// batch.
pub async fn run_identity_pass(
    db: &Db,
    league_id: Option<i64>,
) -> Result<IdentityPassSummary> {
    let ids: Vec<i64> = match league_id {
        Some(league) => {
            sqlx::query_scalar(
                "SELECT sp.id FROM source_player sp
                 LEFT JOIN player_identity pi ON pi.source_player_id = sp.id
                 WHERE pi.id IS NULL AND sp.deleted_at IS NULL AND sp.league_id = ?
                 ORDER BY sp.id",
            )
            .bind(league)
            .fetch_all(&db.pool)
            .await?
        }
        None => {
            sqlx::query_scalar(
                "SELECT sp.id FROM source_player sp
                 LEFT JOIN player_identity pi ON pi.source_player_id = sp.id
                 WHERE pi.id IS NULL AND sp.deleted_at IS NULL
                 ORDER BY sp.id",
            )
            .fetch_all(&db.pool)
            .await?
        }
    };

    let mut summary = IdentityPassSummary::default();
    for id in ids {
        match process_identity(db, id).await {
            Ok(outcome) => {
                summary.linked += 1;
                debug!(
                    source_player_id = id,
                    canonical_player_id = outcome.canonical_player_id,
                    is_new = outcome.is_new_canonical,
                    "identity resolved"
                );
            }
            Err(IdentityError::AlreadyLinked { .. })
            | Err(IdentityError::NoExactMatchData { .. }) => summary.skipped += 1,
            Err(err) => {
                warn!(source_player_id = id, error = %err, "identity processing failed");
                summary.errors += 1;
            }
        }
    }
    info!(
        linked = summary.linked,
        skipped = summary.skipped,
        errors = summary.errors,
        "identity pass complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::reference::ensure_league;

    async fn seed_player(
        db: &Db,
        league_id: i64,
        source_id: &str,
        name: Option<&str>,
        normalized: Option<&str>,
        dob: Option<&str>,
    ) -> i64 {
        let res = sqlx::query(
            "INSERT INTO source_player (league_id, source_id, full_name, normalized_name, dob,
                    position, source_hash)
             VALUES (?, ?, ?, ?, ?, 'A', 'h')",
        )
        .bind(league_id)
        .bind(source_id)
        .bind(name)
        .bind(normalized)
        .bind(dob)
        .execute(&db.pool)
        .await
        .unwrap();
        res.last_insert_rowid()
    }

    #[tokio::test]
    async fn first_of_a_match_group_creates_the_canonical() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let nll = ensure_league(&db, "nll").await.unwrap();
        let a = seed_player(&db, pll, "p1", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;
        let b = seed_player(&db, nll, "n7", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;

        let first = process_identity(&db, a).await.unwrap();
        assert!(first.is_new_canonical);
        assert_eq!(first.linked_source_player_ids, vec![a, b]);

        let primary: i64 = sqlx::query_scalar(
            "SELECT primary_source_player_id FROM canonical_player WHERE id = ?",
        )
        .bind(first.canonical_player_id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(primary, a, "PLL outranks NLL");
    }

    #[tokio::test]
    async fn later_arrival_joins_the_existing_canonical() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let nll = ensure_league(&db, "nll").await.unwrap();
        let a = seed_player(&db, pll, "p1", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;

        let first = process_identity(&db, a).await.unwrap();
        assert!(first.is_new_canonical);
        assert_eq!(first.linked_source_player_ids, vec![a]);

        let b = seed_player(&db, nll, "n7", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;
        let second = process_identity(&db, b).await.unwrap();
        assert!(!second.is_new_canonical);
        assert_eq!(second.canonical_player_id, first.canonical_player_id);
        assert_eq!(second.linked_source_player_ids, vec![a, b]);
    }

    #[tokio::test]
    async fn reprocessing_fails_with_already_linked() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let a = seed_player(&db, pll, "p1", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;

        let first = process_identity(&db, a).await.unwrap();
        match process_identity(&db, a).await {
            Err(IdentityError::AlreadyLinked {
                existing_canonical_player_id,
                ..
            }) => assert_eq!(existing_canonical_player_id, first.canonical_player_id),
            other => panic!("expected AlreadyLinked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_dob_is_rejected() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let a = seed_player(&db, pll, "p1", Some("Lyle Thompson"), Some("lyle thompson"), None).await;

        match process_identity(&db, a).await {
            Err(IdentityError::NoExactMatchData { missing_field, .. }) => {
                assert_eq!(missing_field, "dob")
            }
            other => panic!("expected NoExactMatchData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_normalized_name_is_rejected() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let a = seed_player(&db, pll, "p1", None, None, Some("1992-09-15")).await;

        match process_identity(&db, a).await {
            Err(IdentityError::NoExactMatchData { missing_field, .. }) => {
                assert_eq!(missing_field, "normalized_name")
            }
            other => panic!("expected NoExactMatchData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_or_deleted_player_is_rejected() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        assert!(matches!(
            process_identity(&db, 404).await,
            Err(IdentityError::SourcePlayerNotFound { source_player_id: 404 })
        ));

        let a = seed_player(&db, pll, "p1", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;
        sqlx::query("UPDATE source_player SET deleted_at = datetime('now') WHERE id = ?")
            .bind(a)
            .execute(&db.pool)
            .await
            .unwrap();
        assert!(matches!(
            process_identity(&db, a).await,
            Err(IdentityError::SourcePlayerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn primary_source_follows_league_priority_not_processing_order() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let wayback = ensure_league(&db, "wayback").await.unwrap();
        // The low-trust record is processed first; the PLL record must still
        // become the primary source.
        let w = seed_player(&db, wayback, "w1", Some("Zed Williams"), Some("zed williams"), Some("1995-07-01")).await;
        let p = seed_player(&db, pll, "p3", Some("Zed Williams"), Some("zed williams"), Some("1995-07-01")).await;

        let outcome = process_identity(&db, w).await.unwrap();
        assert!(outcome.is_new_canonical);
        let primary: i64 = sqlx::query_scalar(
            "SELECT primary_source_player_id FROM canonical_player WHERE id = ?",
        )
        .bind(outcome.canonical_player_id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(primary, p);
    }

    #[tokio::test]
    async fn soft_deleted_candidates_are_invisible() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let nll = ensure_league(&db, "nll").await.unwrap();
        let a = seed_player(&db, pll, "p1", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;
        let b = seed_player(&db, nll, "n7", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;
        sqlx::query("UPDATE source_player SET deleted_at = datetime('now') WHERE id = ?")
            .bind(b)
            .execute(&db.pool)
            .await
            .unwrap();

        let outcome = process_identity(&db, a).await.unwrap();
        assert_eq!(outcome.linked_source_player_ids, vec![a]);
    }

    #[tokio::test]
    async fn batch_pass_counts_linked_skipped_and_errors() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let nll = ensure_league(&db, "nll").await.unwrap();
        seed_player(&db, pll, "p1", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;
        seed_player(&db, nll, "n7", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;
        seed_player(&db, pll, "p2", Some("Mystery Man"), Some("mystery man"), None).await;

        let summary = run_identity_pass(&db, None).await.unwrap();
        // p1 links the whole group; n7 is then already linked; p2 lacks a dob.
        assert_eq!(summary.linked, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.errors, 0);

        let identities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM player_identity")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(identities, 2);
    }

    #[tokio::test]
    async fn league_filter_restricts_the_pass() {
        let db = Db::connect_in_memory().await.unwrap();
        let pll = ensure_league(&db, "pll").await.unwrap();
        let nll = ensure_league(&db, "nll").await.unwrap();
        seed_player(&db, pll, "p1", Some("Lyle Thompson"), Some("lyle thompson"), Some("1992-09-15")).await;
        let b = seed_player(&db, nll, "n7", Some("Connor Fields"), Some("connor fields"), Some("1995-03-12")).await;

        let summary = run_identity_pass(&db, Some(pll)).await.unwrap();
        assert_eq!(summary.linked, 1);

        let unlinked: Option<i64> = sqlx::query_scalar(
            "SELECT canonical_player_id FROM player_identity WHERE source_player_id = ?",
        )
        .bind(b)
        .fetch_optional(&db.pool)
        .await
        .unwrap();
        assert!(unlinked.is_none());
    }
}
