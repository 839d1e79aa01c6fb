use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{DEFAULT_MANAGER_USERNAME, ROLE_ADMIN, ROLE_MANAGER, User};

/// Creates the schema on first run. Table names follow the legacy
/// database this application fronts.
pub async fn init(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query(
        "
        CREATE TABLE IF NOT EXISTS user_details (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            role_id INTEGER NOT NULL,
            project_id INTEGER,
            password TEXT NOT NULL,
            name TEXT NOT NULL
        )
    ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "
        CREATE TABLE IF NOT EXISTS project (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )
    ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "
        CREATE TABLE IF NOT EXISTS bugs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL,
            assigned_to_id INTEGER,
            status_id INTEGER NOT NULL,
            priority_id INTEGER NOT NULL,
            summary TEXT NOT NULL,
            description TEXT NOT NULL,
            fix_description TEXT,
            date_raised TEXT NOT NULL,
            target_date TEXT,
            date_closed TEXT
        )
    ",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seeds a default admin and manager into an empty user table so the
/// at-least-one-admin-and-manager invariant holds from first boot.
pub async fn seed(pool: &SqlitePool, config: &Config) -> Result<(), AppError> {
    if User::count_all(pool).await? > 0 {
        return Ok(());
    }

    let admin_hash = bcrypt::hash(&config.seed_admin_password, bcrypt::DEFAULT_COST)?;
    User::insert(pool, "admin", ROLE_ADMIN, None, &admin_hash, "Administrator").await?;

    let manager_hash = bcrypt::hash(&config.seed_manager_password, bcrypt::DEFAULT_COST)?;
    User::insert(
        pool,
        DEFAULT_MANAGER_USERNAME,
        ROLE_MANAGER,
        None,
        &manager_hash,
        "Default Manager",
    )
    .await?;

    log::info!("Seeded default admin and manager accounts");
    Ok(())
}
