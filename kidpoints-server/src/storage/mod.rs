pub mod models;
pub mod schema;

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use kidpoints_shared::domain::TransactionKind;
use models::{
    Goal, Kid, NewGoal, NewKid, NewParent, NewPointTransaction, Parent, PointTransaction,
};
use tracing::trace;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input; nothing was written.
    #[error("{0}")]
    InvalidInput(String),

    /// The referenced row is missing or a business rule was not met.
    #[error("{0}")]
    NotEligible(String),
}

/// Read-model aggregate for a single kid.
#[derive(Debug, Clone, Copy, Default)]
pub struct KidStats {
    pub total_points: i32,
    pub total_rewards: i64,
    pub total_penalties: i64,
    pub goals_achieved: i64,
    pub goals_total: i64,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    // Parents

    pub async fn create_parent(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<Parent, StorageError> {
        use schema::parents;
        let pool = self.pool.clone();
        let name = name.trim().to_string();
        let email = email.trim().to_string();
        let hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || -> Result<Parent, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let existing: Option<i32> = parents::table
                    .filter(parents::email.eq(&email))
                    .select(parents::id)
                    .first(conn)
                    .optional()?;
                if existing.is_some() {
                    return Err(StorageError::InvalidInput(
                        "an account with this email already exists".to_string(),
                    ));
                }
                let row = NewParent {
                    name: &name,
                    email: &email,
                    password_hash: &hash,
                };
                Ok(diesel::insert_into(parents::table)
                    .values(&row)
                    .returning(Parent::as_returning())
                    .get_result(conn)?)
            })
        })
        .await?
    }

    pub async fn find_parent_by_email(&self, email: &str) -> Result<Option<Parent>, StorageError> {
        use schema::parents;
        let pool = self.pool.clone();
        let wanted = email.trim().to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Parent>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(parents::table
                .filter(parents::email.eq(&wanted))
                .first::<Parent>(&mut conn)
                .optional()?)
        })
        .await?
    }

    // Kids

    pub async fn create_kid(
        &self,
        parent: i32,
        name: &str,
        age: Option<i32>,
    ) -> Result<Kid, StorageError> {
        use schema::kids;
        let name = name.trim().to_string();
        if name.chars().count() < 2 {
            return Err(StorageError::InvalidInput(
                "kid name must be at least 2 characters long".to_string(),
            ));
        }
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Kid, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                ensure_kid_name_free(conn, parent, &name, None)?;
                let row = NewKid {
                    parent_id: parent,
                    name: &name,
                    age,
                };
                Ok(diesel::insert_into(kids::table)
                    .values(&row)
                    .returning(Kid::as_returning())
                    .get_result(conn)?)
            })
        })
        .await?
    }

    pub async fn list_kids(&self, parent: i32) -> Result<Vec<Kid>, StorageError> {
        use schema::kids::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Kid>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(kids
                .filter(parent_id.eq(parent))
                .order(name.asc())
                .load::<Kid>(&mut conn)?)
        })
        .await?
    }

    pub async fn get_kid(&self, kid: i32, parent: i32) -> Result<Option<Kid>, StorageError> {
        use schema::kids::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Kid>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(kids
                .filter(id.eq(kid))
                .filter(parent_id.eq(parent))
                .first::<Kid>(&mut conn)
                .optional()?)
        })
        .await?
    }

    pub async fn update_kid(
        &self,
        kid: i32,
        parent: i32,
        new_name: Option<&str>,
        new_age: Option<i32>,
    ) -> Result<Kid, StorageError> {
        use schema::kids;
        if new_name.is_none() && new_age.is_none() {
            return Err(StorageError::InvalidInput("no data to update".to_string()));
        }
        let new_name = match new_name {
            Some(n) => {
                let n = n.trim().to_string();
                if n.chars().count() < 2 {
                    return Err(StorageError::InvalidInput(
                        "kid name must be at least 2 characters long".to_string(),
                    ));
                }
                Some(n)
            }
            None => None,
        };
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Kid, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let current: Option<Kid> = kids::table
                    .filter(kids::id.eq(kid))
                    .filter(kids::parent_id.eq(parent))
                    .first(conn)
                    .optional()?;
                let Some(current) = current else {
                    return Err(StorageError::NotEligible("kid not found".to_string()));
                };
                if let Some(name) = &new_name {
                    ensure_kid_name_free(conn, parent, name, Some(kid))?;
                }
                let name = new_name.unwrap_or(current.name);
                let age = new_age.or(current.age);
                Ok(diesel::update(kids::table.filter(kids::id.eq(kid)))
                    .set((kids::name.eq(&name), kids::age.eq(age)))
                    .returning(Kid::as_returning())
                    .get_result(conn)?)
            })
        })
        .await?
    }

    /// Removes a kid together with its transactions and goals in one
    /// transaction; a partial cascade is never observable.
    pub async fn delete_kid(&self, kid: i32, parent: i32) -> Result<(), StorageError> {
        use schema::{goals, kids, point_transactions};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                diesel::delete(point_transactions::table.filter(point_transactions::kid_id.eq(kid)))
                    .execute(conn)?;
                diesel::delete(goals::table.filter(goals::kid_id.eq(kid))).execute(conn)?;
                let deleted = diesel::delete(
                    kids::table
                        .filter(kids::id.eq(kid))
                        .filter(kids::parent_id.eq(parent)),
                )
                .execute(conn)?;
                if deleted == 0 {
                    // Rolls back the child-row deletes above
                    return Err(StorageError::NotEligible("kid not found".to_string()));
                }
                Ok(())
            })
        })
        .await?
    }

    // Points & goals ledger

    /// Applies a signed point delta to a kid: records the transaction,
    /// bumps the running balance, and (for rewards) flips every goal whose
    /// threshold the new balance reaches. All three steps commit or roll
    /// back together.
    pub async fn apply_points(
        &self,
        kid: i32,
        points: i32,
        description: &str,
        kind: TransactionKind,
    ) -> Result<PointTransaction, StorageError> {
        use schema::{kids, point_transactions};

        // Fail fast before touching storage; no mutation on bad input.
        let description = description.trim().to_string();
        if description.is_empty() {
            return Err(StorageError::InvalidInput(
                "description is required".to_string(),
            ));
        }
        if points == 0 {
            return Err(StorageError::InvalidInput(
                "points cannot be zero".to_string(),
            ));
        }
        if !kind.allows_delta(points) {
            let msg = match kind {
                TransactionKind::Reward => "reward points must be positive",
                TransactionKind::Penalty => "penalty points must be negative",
            };
            return Err(StorageError::InvalidInput(msg.to_string()));
        }

        let pool = self.pool.clone();
        trace!(kid_id = kid, points, kind = %kind, "apply_points starting");
        tokio::task::spawn_blocking(move || -> Result<PointTransaction, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let balance: Option<i32> = kids::table
                    .filter(kids::id.eq(kid))
                    .select(kids::total_points)
                    .first(conn)
                    .optional()?;
                let Some(balance) = balance else {
                    return Err(StorageError::NotEligible(format!("kid not found: {kid}")));
                };

                let row = NewPointTransaction {
                    kid_id: kid,
                    points,
                    description: &description,
                    kind: kind.as_str(),
                };
                let created: PointTransaction = diesel::insert_into(point_transactions::table)
                    .values(&row)
                    .returning(PointTransaction::as_returning())
                    .get_result(conn)?;

                diesel::update(kids::table.filter(kids::id.eq(kid)))
                    .set(kids::total_points.eq(kids::total_points + points))
                    .execute(conn)?;

                if kind == TransactionKind::Reward {
                    let achieved =
                        achieve_goals_within_reach(conn, kid, balance + points)?;
                    if achieved > 0 {
                        trace!(kid_id = kid, achieved, "auto-achieved goals");
                    }
                }

                Ok(created)
            })
        })
        .await?
    }

    pub async fn point_history(
        &self,
        kid: i32,
        limit: i64,
    ) -> Result<Vec<PointTransaction>, StorageError> {
        use schema::point_transactions::dsl::*;
        let pool = self.pool.clone();
        let limit = limit.clamp(1, 1000);
        tokio::task::spawn_blocking(move || -> Result<Vec<PointTransaction>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(point_transactions
                .filter(kid_id.eq(kid))
                .order((created_at.desc(), id.desc()))
                .limit(limit)
                .load::<PointTransaction>(&mut conn)?)
        })
        .await?
    }

    pub async fn create_goal(
        &self,
        kid: i32,
        title: &str,
        description: Option<&str>,
        points_required: i32,
    ) -> Result<Goal, StorageError> {
        use schema::{goals, kids};
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(StorageError::InvalidInput(
                "goal title is required".to_string(),
            ));
        }
        if points_required <= 0 {
            return Err(StorageError::InvalidInput(
                "points required must be greater than 0".to_string(),
            ));
        }
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Goal, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let exists: Option<i32> = kids::table
                    .filter(kids::id.eq(kid))
                    .select(kids::id)
                    .first(conn)
                    .optional()?;
                if exists.is_none() {
                    return Err(StorageError::NotEligible(format!("kid not found: {kid}")));
                }
                let row = NewGoal {
                    kid_id: kid,
                    title: &title,
                    description: description.as_deref(),
                    points_required,
                };
                Ok(diesel::insert_into(goals::table)
                    .values(&row)
                    .returning(Goal::as_returning())
                    .get_result(conn)?)
            })
        })
        .await?
    }

    pub async fn list_goals(&self, kid: i32) -> Result<Vec<Goal>, StorageError> {
        use schema::goals::dsl::*;
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Goal>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(goals
                .filter(kid_id.eq(kid))
                .order((created_at.desc(), id.desc()))
                .load::<Goal>(&mut conn)?)
        })
        .await?
    }

    /// Manual one-at-a-time redemption, independent from the bulk
    /// auto-achievement that runs on reward posts.
    pub async fn achieve_goal(&self, goal: i32, kid: i32) -> Result<Goal, StorageError> {
        use schema::{goals, kids};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Goal, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let pending: Option<Goal> = goals::table
                    .filter(goals::id.eq(goal))
                    .filter(goals::kid_id.eq(kid))
                    .filter(goals::is_achieved.eq(false))
                    .first(conn)
                    .optional()?;
                let Some(pending) = pending else {
                    return Err(StorageError::NotEligible(
                        "goal not found or already achieved".to_string(),
                    ));
                };

                let balance: Option<i32> = kids::table
                    .filter(kids::id.eq(kid))
                    .select(kids::total_points)
                    .first(conn)
                    .optional()?;
                let Some(balance) = balance else {
                    return Err(StorageError::NotEligible(format!("kid not found: {kid}")));
                };
                if balance < pending.points_required {
                    return Err(StorageError::NotEligible(
                        "not enough points to achieve this goal".to_string(),
                    ));
                }

                mark_goals_achieved(conn, &[pending.id])?;
                Ok(goals::table
                    .filter(goals::id.eq(goal))
                    .first::<Goal>(conn)?)
            })
        })
        .await?
    }

    /// Pure projection over existing rows; no side effects.
    pub async fn kid_stats(&self, kid: i32) -> Result<KidStats, StorageError> {
        use diesel::dsl::sum;
        use schema::{goals, kids, point_transactions as pt};
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<KidStats, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;

            let balance: Option<i32> = kids::table
                .filter(kids::id.eq(kid))
                .select(kids::total_points)
                .first(&mut conn)
                .optional()?;
            let rewards: Option<i64> = pt::table
                .filter(pt::kid_id.eq(kid))
                .filter(pt::kind.eq(TransactionKind::Reward.as_str()))
                .select(sum(pt::points))
                .first(&mut conn)?;
            let penalties: Option<i64> = pt::table
                .filter(pt::kid_id.eq(kid))
                .filter(pt::kind.eq(TransactionKind::Penalty.as_str()))
                .select(sum(pt::points))
                .first(&mut conn)?;
            let goals_total: i64 = goals::table
                .filter(goals::kid_id.eq(kid))
                .count()
                .get_result(&mut conn)?;
            let goals_achieved: i64 = goals::table
                .filter(goals::kid_id.eq(kid))
                .filter(goals::is_achieved.eq(true))
                .count()
                .get_result(&mut conn)?;

            Ok(KidStats {
                total_points: balance.unwrap_or(0),
                total_rewards: rewards.unwrap_or(0),
                // Penalty deltas are strictly negative; negate for the
                // "sum of absolute penalties" aggregate.
                total_penalties: -penalties.unwrap_or(0),
                goals_achieved,
                goals_total,
            })
        })
        .await?
    }
}

/// Flips every unachieved goal the kid's balance now covers. Runs inside
/// the caller's transaction.
fn achieve_goals_within_reach(
    conn: &mut SqliteConnection,
    kid: i32,
    balance: i32,
) -> Result<usize, StorageError> {
    use schema::goals;
    let eligible: Vec<i32> = goals::table
        .filter(goals::kid_id.eq(kid))
        .filter(goals::is_achieved.eq(false))
        .filter(goals::points_required.le(balance))
        .select(goals::id)
        .load(conn)?;
    if eligible.is_empty() {
        return Ok(0);
    }
    Ok(mark_goals_achieved(conn, &eligible)?)
}

/// Single update routine shared by the bulk auto-achievement path and the
/// manual achieve path, so the two cannot diverge. `achieved_at` is set
/// exactly once, together with the flag.
fn mark_goals_achieved(conn: &mut SqliteConnection, ids: &[i32]) -> QueryResult<usize> {
    use schema::goals;
    let now = Utc::now().naive_utc();
    diesel::update(
        goals::table
            .filter(goals::id.eq_any(ids.iter().copied()))
            .filter(goals::is_achieved.eq(false)),
    )
    .set((
        goals::is_achieved.eq(true),
        goals::achieved_at.eq(Some(now)),
    ))
    .execute(conn)
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency, set a busy timeout,
    // and enforce foreign keys (off by default in SQLite).
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

fn ensure_kid_name_free(
    conn: &mut SqliteConnection,
    parent: i32,
    name: &str,
    exclude: Option<i32>,
) -> Result<(), StorageError> {
    use schema::kids;
    let mut query = kids::table
        .filter(kids::parent_id.eq(parent))
        .filter(kids::name.eq(name))
        .select(kids::id)
        .into_boxed();
    if let Some(kid) = exclude {
        query = query.filter(kids::id.ne(kid));
    }
    let existing: Option<i32> = query.first(conn).optional()?;
    if existing.is_some() {
        return Err(StorageError::InvalidInput(
            "a kid with this name already exists".to_string(),
        ));
    }
    Ok(())
}
