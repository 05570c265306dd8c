use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{FoodEntry, NewFoodEntry, Profile, ProfileDraft, User};
use crate::session::SessionData;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS profiles (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                    current_weight REAL,
                    target_weight REAL,
                    target_date TEXT,
                    daily_calorie_goal INTEGER,
                    goal_type TEXT NOT NULL DEFAULT 'maintain'
                        CHECK (goal_type IN ('lose', 'gain', 'maintain'))
                );

                CREATE TABLE IF NOT EXISTS food_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    grams REAL NOT NULL,
                    calories REAL,
                    timestamp TEXT NOT NULL,
                    entry_date TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_food_entries_user_date
                    ON food_entries(user_id, entry_date);

                CREATE TABLE IF NOT EXISTS sessions (
                    token_digest TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
            is_active: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    // Expects columns:
    // 0: id, 1: user_id, 2: current_weight, 3: target_weight, 4: target_date,
    // 5: daily_calorie_goal, 6: goal_type
    fn profile_from_row(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
        let target_date: Option<String> = row.get(4)?;
        let target_date = target_date
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
        let goal_type: String = row.get(6)?;
        Ok(Profile {
            id: row.get(0)?,
            user_id: row.get(1)?,
            current_weight: row.get(2)?,
            target_weight: row.get(3)?,
            target_date,
            daily_calorie_goal: row.get(5)?,
            goal_type: goal_type.parse().unwrap_or_default(),
        })
    }

    // Expects columns:
    // 0: id, 1: user_id, 2: name, 3: grams, 4: calories, 5: timestamp
    fn food_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<FoodEntry> {
        let timestamp: String = row.get(5)?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(FoodEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            grams: row.get(3)?,
            calories: row.get(4)?,
            timestamp,
        })
    }

    // --- Users ---

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        insert_user(&self.conn, username, password_hash)
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, password_hash, is_active, created_at FROM users WHERE id = ?1",
                params![id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, username, password_hash, is_active, created_at FROM users WHERE username = ?1",
                params![username],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(rows > 0)
    }

    /// Delete a user; their profile and food entries go with them.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Create a user and their fully populated profile in one transaction.
    ///
    /// Either both rows exist afterwards or neither does.
    pub fn create_account_with_profile(
        &self,
        username: &str,
        password_hash: &str,
        draft: &ProfileDraft,
    ) -> Result<(User, Profile)> {
        let tx = self.conn.unchecked_transaction()?;

        let user = insert_user(&tx, username, password_hash)?;
        tx.execute("INSERT INTO profiles (user_id) VALUES (?1)", params![user.id])
            .context("failed to create profile")?;
        tx.execute(
            "UPDATE profiles
             SET current_weight = ?1, target_weight = ?2, goal_type = ?3, daily_calorie_goal = ?4
             WHERE user_id = ?5",
            params![
                draft.current_weight,
                draft.target_weight,
                draft.goal_type.as_str(),
                draft.daily_calorie_goal,
                user.id,
            ],
        )
        .context("failed to populate profile")?;
        let profile = select_profile(&tx, user.id)?.context("Profile not found after insert")?;

        tx.commit()?;
        Ok((user, profile))
    }

    // --- Profiles ---

    pub fn get_profile(&self, user_id: i64) -> Result<Option<Profile>> {
        select_profile(&self.conn, user_id)
    }

    /// Return the user's profile, inserting a default one first if there is none.
    pub fn get_or_create_profile(&self, user_id: i64) -> Result<Profile> {
        self.conn.execute(
            "INSERT OR IGNORE INTO profiles (user_id) VALUES (?1)",
            params![user_id],
        )?;
        select_profile(&self.conn, user_id)?.context("Profile not found")
    }

    // --- Food entries ---

    pub fn insert_food_entry(&self, user_id: i64, entry: &NewFoodEntry) -> Result<FoodEntry> {
        self.insert_food_entry_at(user_id, entry, Local::now().fixed_offset())
    }

    pub fn insert_food_entry_at(
        &self,
        user_id: i64,
        entry: &NewFoodEntry,
        timestamp: DateTime<FixedOffset>,
    ) -> Result<FoodEntry> {
        let date_str = timestamp.date_naive().format("%Y-%m-%d").to_string();
        self.conn.execute(
            "INSERT INTO food_entries (user_id, name, grams, calories, timestamp, entry_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                entry.name,
                entry.grams,
                entry.calories,
                timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
                date_str,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_food_entry(id)
    }

    pub fn get_food_entry(&self, id: i64) -> Result<FoodEntry> {
        self.conn
            .query_row(
                "SELECT id, user_id, name, grams, calories, timestamp
                 FROM food_entries WHERE id = ?1",
                params![id],
                Self::food_entry_from_row,
            )
            .context("Food entry not found")
    }

    /// Delete an entry only if it belongs to `user_id`.
    pub fn delete_food_entry(&self, user_id: i64, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM food_entries WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(rows > 0)
    }

    /// Entries logged on `date`, most recent first.
    pub fn get_entries_for_date(&self, user_id: i64, date: NaiveDate) -> Result<Vec<FoodEntry>> {
        let date_str = date.format("%Y-%m-%d").to_string();
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, grams, calories, timestamp
             FROM food_entries
             WHERE user_id = ?1 AND entry_date = ?2
             ORDER BY timestamp DESC, id DESC",
        )?;
        let entries = stmt
            .query_map(params![user_id, date_str], Self::food_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Every entry the user has logged, oldest first.
    pub fn get_all_entries(&self, user_id: i64) -> Result<Vec<FoodEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, grams, calories, timestamp
             FROM food_entries
             WHERE user_id = ?1
             ORDER BY timestamp, id",
        )?;
        let entries = stmt
            .query_map(params![user_id], Self::food_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // --- Sessions ---

    pub fn load_session(&self, token_digest: &str) -> Result<Option<SessionData>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM sessions WHERE token_digest = ?1",
                params![token_digest],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).context("corrupt session data"))
            .transpose()
    }

    pub fn save_session(&self, token_digest: &str, data: &SessionData) -> Result<()> {
        let json = serde_json::to_string(data)?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.conn.execute(
            "INSERT INTO sessions (token_digest, data, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(token_digest) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![token_digest, json, now],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, token_digest: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM sessions WHERE token_digest = ?1",
            params![token_digest],
        )?;
        Ok(rows > 0)
    }

    /// Drop sessions not written since `cutoff`. Returns how many were removed.
    pub fn purge_sessions_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = cutoff.to_rfc3339_opts(SecondsFormat::Secs, true);
        let rows = self.conn.execute(
            "DELETE FROM sessions WHERE updated_at < ?1",
            params![cutoff],
        )?;
        Ok(rows)
    }
}

fn insert_user(conn: &Connection, username: &str, password_hash: &str) -> Result<User> {
    let now = Local::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (username, password_hash, is_active, created_at) VALUES (?1, ?2, 1, ?3)",
        params![username, password_hash, now],
    )?;
    Ok(User {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        is_active: true,
        created_at: now,
    })
}

fn select_profile(conn: &Connection, user_id: i64) -> Result<Option<Profile>> {
    let profile = conn
        .query_row(
            "SELECT id, user_id, current_weight, target_weight, target_date, daily_calorie_goal, goal_type
             FROM profiles WHERE user_id = ?1",
            params![user_id],
            Database::profile_from_row,
        )
        .optional()?;
    Ok(profile)
}

/// True when `err` is a UNIQUE/NOT NULL/CHECK/foreign-key violation.
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<rusqlite::Error>())
        .any(|e| e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation))
}
