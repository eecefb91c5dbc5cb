use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{info, instrument};

/// Leagues the pipeline knows about, seeded at schema setup. Priority ranks
/// source reliability: lower = more trusted. The Wayback Machine scrapes sit
/// last since they are lossy reconstructions of defunct league sites.
pub const SEED_LEAGUES: &[(&str, &str, i64)] = &[
    ("pll", "Premier Lacrosse League", 1),
    ("nll", "National Lacrosse League", 2),
    ("mll", "Major League Lacrosse", 3),
    ("msl", "Major Series Lacrosse", 4),
    ("wla", "Western Lacrosse Association", 5),
    ("wayback", "Wayback Machine Archives", 6),
];

/// Priority assigned to league codes ensured on demand that are not in the
/// seed table.
pub const DEFAULT_LEAGUE_PRIORITY: i64 = 99;

#[derive(Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may embed paths
    // the operator considers sensitive).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("connected to db");
        let db = Self { pool };
        db.setup_schema().await?;
        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs. A single
    /// connection is mandatory: every SQLite `:memory:` connection is its own
    /// database.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.setup_schema().await?;
        Ok(db)
    }

    /// Idempotent schema creation plus league seeding. Safe to run on every
    /// connect; `CREATE TABLE IF NOT EXISTS` and `INSERT OR IGNORE` make
    /// repeat invocations no-ops.
    async fn setup_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        for stmt in SCHEMA_STATEMENTS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        for (code, name, priority) in SEED_LEAGUES {
            sqlx::query(
                "INSERT OR IGNORE INTO league (code, name, priority, active) VALUES (?, ?, ?, 1)",
            )
            .bind(code)
            .bind(name)
            .bind(priority)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS league (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 99,
        active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS season (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        league_id INTEGER NOT NULL REFERENCES league(id),
        year INTEGER NOT NULL,
        source_season_id TEXT,
        UNIQUE (league_id, year)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        league_id INTEGER NOT NULL REFERENCES league(id),
        source_id TEXT NOT NULL,
        name TEXT NOT NULL,
        city TEXT,
        abbreviation TEXT,
        source_hash TEXT NOT NULL,
        UNIQUE (league_id, source_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team_season (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        team_id INTEGER NOT NULL REFERENCES team(id),
        season_id INTEGER NOT NULL REFERENCES season(id),
        division TEXT,
        conference TEXT,
        UNIQUE (team_id, season_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS source_player (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        league_id INTEGER NOT NULL REFERENCES league(id),
        source_id TEXT NOT NULL,
        first_name TEXT,
        last_name TEXT,
        full_name TEXT,
        normalized_name TEXT,
        dob TEXT,
        position TEXT,
        height TEXT,
        weight TEXT,
        hometown TEXT,
        college TEXT,
        source_team_id TEXT,
        source_hash TEXT NOT NULL,
        deleted_at TEXT,
        UNIQUE (league_id, source_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_source_player_match
     ON source_player(normalized_name, dob)",
    r#"
    CREATE TABLE IF NOT EXISTS canonical_player (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        primary_source_player_id INTEGER NOT NULL REFERENCES source_player(id),
        display_name TEXT NOT NULL,
        first_name TEXT,
        last_name TEXT,
        dob TEXT,
        position TEXT,
        hometown TEXT,
        college TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS player_identity (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_player_id INTEGER NOT NULL UNIQUE REFERENCES source_player(id),
        canonical_player_id INTEGER NOT NULL REFERENCES canonical_player(id),
        match_method TEXT NOT NULL,
        confidence_score REAL NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_player_identity_canonical
     ON player_identity(canonical_player_id)",
    r#"
    CREATE TABLE IF NOT EXISTS game (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        season_id INTEGER NOT NULL REFERENCES season(id),
        source_id TEXT NOT NULL,
        home_team_id INTEGER REFERENCES team(id),
        away_team_id INTEGER REFERENCES team(id),
        home_score INTEGER,
        away_score INTEGER,
        played_at TEXT,
        status TEXT,
        source_hash TEXT NOT NULL,
        UNIQUE (season_id, source_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS player_stat (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_player_id INTEGER NOT NULL REFERENCES source_player(id),
        season_id INTEGER NOT NULL REFERENCES season(id),
        game_id INTEGER REFERENCES game(id),
        stat_type TEXT NOT NULL DEFAULT 'regular'
            CHECK (stat_type IN ('regular', 'playoff', 'career')),
        games_played INTEGER NOT NULL DEFAULT 0,
        goals INTEGER NOT NULL DEFAULT 0,
        assists INTEGER NOT NULL DEFAULT 0,
        points INTEGER NOT NULL DEFAULT 0,
        shots INTEGER NOT NULL DEFAULT 0,
        ground_balls INTEGER NOT NULL DEFAULT 0,
        turnovers INTEGER NOT NULL DEFAULT 0,
        caused_turnovers INTEGER NOT NULL DEFAULT 0,
        faceoff_wins INTEGER NOT NULL DEFAULT 0,
        faceoff_losses INTEGER NOT NULL DEFAULT 0,
        saves INTEGER,
        goals_against INTEGER,
        source_hash TEXT NOT NULL,
        UNIQUE (source_player_id, season_id, game_id)
    )
    "#,
    // SQLite treats NULLs as distinct inside unique indexes, so the season
    // totals row (game_id IS NULL) needs its own partial uniqueness guard.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_player_stat_season_totals
     ON player_stat(source_player_id, season_id) WHERE game_id IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_player_stat_leaderboard
     ON player_stat(season_id, points, id)",
    r#"
    CREATE TABLE IF NOT EXISTS standing (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        season_id INTEGER NOT NULL REFERENCES season(id),
        team_id INTEGER NOT NULL REFERENCES team(id),
        wins INTEGER NOT NULL DEFAULT 0,
        losses INTEGER NOT NULL DEFAULT 0,
        ties INTEGER NOT NULL DEFAULT 0,
        goals_for INTEGER,
        goals_against INTEGER,
        source_id TEXT NOT NULL,
        source_hash TEXT NOT NULL,
        UNIQUE (season_id, team_id)
    )
    "#,
];
