//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &ACTION_QUEUE_V1).await?;
    }
    if version < 2 {
        apply(conn, 2, &COLLABORATORS_V2).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply one migration's statements in a transaction and record its version
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            libsql::params![version],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} (target {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: action queue
const ACTION_QUEUE_V1: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // seq breaks created_at ties by insertion order
    "CREATE TABLE IF NOT EXISTS sync_actions (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        owner TEXT NOT NULL,
        action_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_retry_at INTEGER,
        error_message TEXT,
        conflict_resolution TEXT,
        server_version TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        synced_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_actions_owner_order ON sync_actions(owner, created_at, seq)",
    "CREATE INDEX IF NOT EXISTS idx_sync_actions_owner_status ON sync_actions(owner, status)",
];

/// Version 2: collaborator tables written by replayed actions
const COLLABORATORS_V2: [&str; 14] = [
    "CREATE TABLE IF NOT EXISTS notes (
        owner TEXT NOT NULL,
        id TEXT NOT NULL,
        content TEXT NOT NULL,
        course_id TEXT,
        lesson_id TEXT,
        version INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (owner, id)
    )",
    // Client-supplied ids are only unique per user, so user-written tables key on (user, id)
    "CREATE TABLE IF NOT EXISTS posts (
        author TEXT NOT NULL,
        id TEXT NOT NULL,
        content TEXT NOT NULL,
        group_id TEXT,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (author, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_posts_id ON posts(id)",
    "CREATE TABLE IF NOT EXISTS comments (
        author TEXT NOT NULL,
        id TEXT NOT NULL,
        post_id TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (author, id)
    )",
    "CREATE TABLE IF NOT EXISTS likes (
        owner TEXT NOT NULL,
        target_type TEXT NOT NULL,
        target_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (owner, target_type, target_id)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        sender TEXT NOT NULL,
        id TEXT NOT NULL,
        recipient TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (sender, id)
    )",
    "CREATE TABLE IF NOT EXISTS lesson_progress (
        owner TEXT NOT NULL,
        lesson_id TEXT NOT NULL,
        course_id TEXT NOT NULL,
        progress_percent INTEGER NOT NULL,
        time_spent_secs INTEGER NOT NULL DEFAULT 0,
        completed INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (owner, lesson_id)
    )",
    "CREATE TABLE IF NOT EXISTS quiz_submissions (
        owner TEXT NOT NULL,
        id TEXT NOT NULL,
        quiz_id TEXT NOT NULL,
        answers TEXT NOT NULL,
        score REAL,
        submitted_at INTEGER NOT NULL,
        PRIMARY KEY (owner, id)
    )",
    "CREATE TABLE IF NOT EXISTS assignment_submissions (
        owner TEXT NOT NULL,
        id TEXT NOT NULL,
        assignment_id TEXT NOT NULL,
        content TEXT NOT NULL,
        attachment_urls TEXT NOT NULL,
        submitted_at INTEGER NOT NULL,
        PRIMARY KEY (owner, id)
    )",
    "CREATE TABLE IF NOT EXISTS enrollments (
        owner TEXT NOT NULL,
        course_id TEXT NOT NULL,
        enrolled_at INTEGER NOT NULL,
        PRIMARY KEY (owner, course_id)
    )",
    "CREATE TABLE IF NOT EXISTS course_completions (
        owner TEXT NOT NULL,
        course_id TEXT NOT NULL,
        completed_at INTEGER NOT NULL,
        PRIMARY KEY (owner, course_id)
    )",
    "CREATE TABLE IF NOT EXISTS flashcard_reviews (
        owner TEXT NOT NULL,
        card_id TEXT NOT NULL,
        reviewed_at INTEGER NOT NULL,
        quality INTEGER NOT NULL,
        PRIMARY KEY (owner, card_id, reviewed_at)
    )",
    "CREATE TABLE IF NOT EXISTS flashcard_schedules (
        owner TEXT NOT NULL,
        card_id TEXT NOT NULL,
        ease_factor REAL NOT NULL,
        interval_days INTEGER NOT NULL,
        repetitions INTEGER NOT NULL,
        due_at INTEGER NOT NULL,
        last_reviewed_at INTEGER NOT NULL,
        PRIMARY KEY (owner, card_id)
    )",
    "CREATE TABLE IF NOT EXISTS study_sessions (
        owner TEXT NOT NULL,
        id TEXT NOT NULL,
        duration_minutes INTEGER NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        completed_at INTEGER,
        PRIMARY KEY (owner, id)
    )",
];
