//! Persistence gateway: schema ownership, direction seeding, and the
//! single ambient transaction a sync run writes through.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use vacsync_core::{NewVacancy, VacancyKey, DIRECTION_NAMES};

pub const CRATE_NAME: &str = "vacsync-storage";

const CREATE_DIRECTIONS: &str = "\
CREATE TABLE directions (
    id SERIAL PRIMARY KEY,
    name VARCHAR(120) NOT NULL UNIQUE
)";

const CREATE_VACANCIES: &str = "\
CREATE TABLE vacancies (
    id SERIAL PRIMARY KEY,
    company_name VARCHAR(200) NOT NULL,
    company_short_description TEXT,
    direction_id INTEGER NOT NULL REFERENCES directions (id) ON DELETE RESTRICT,
    vacancy_name VARCHAR(200) NOT NULL,
    vacancy_description TEXT NOT NULL,
    vacancy_requirements TEXT NOT NULL,
    vacancy_working_conditions TEXT NOT NULL,
    vacancy_salary VARCHAR(200) NOT NULL,
    vacancy_benefits TEXT NOT NULL,
    vacancy_contacts TEXT NOT NULL,
    company_website TEXT,
    degree VARCHAR(120) NOT NULL,
    minimal_english_level VARCHAR(20) NOT NULL,
    working_time VARCHAR(120) NOT NULL,
    working_experience VARCHAR(120) NOT NULL,
    date_added TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const INSERT_VACANCY: &str = "\
INSERT INTO vacancies (
    company_name, company_short_description, direction_id, vacancy_name,
    vacancy_description, vacancy_requirements, vacancy_working_conditions,
    vacancy_salary, vacancy_benefits, vacancy_contacts, company_website,
    degree, minimal_english_level, working_time, working_experience, date_added
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)";

const VACANCY_EXISTS: &str = "\
SELECT EXISTS (
    SELECT 1 FROM vacancies
    WHERE company_name = $1
      AND vacancy_name = $2
      AND vacancy_description = $3
      AND vacancy_salary = $4
)";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("no open run transaction; call begin first")]
    NoOpenTransaction,
}

/// Storage contract consumed by the sync engine. All reads and writes after
/// `begin` observe the single open run transaction, so rows staged earlier
/// in a run are visible to later existence checks before commit.
#[async_trait]
pub trait VacancyStore: Send + Sync {
    /// Create both tables and seed the direction catalog if neither table
    /// exists yet. Returns true when seeding happened. Detection is by
    /// schema existence, never row count.
    async fn ensure_seeded(&self) -> Result<bool, StoreError>;

    /// Open the run transaction. An earlier uncommitted transaction is
    /// rolled back.
    async fn begin(&self) -> Result<(), StoreError>;

    async fn direction_id(&self, name: &str) -> Result<Option<i32>, StoreError>;

    async fn vacancy_exists(&self, key: &VacancyKey) -> Result<bool, StoreError>;

    async fn insert_vacancy(&self, vacancy: &NewVacancy) -> Result<(), StoreError>;

    /// Commit everything staged since `begin`, all or nothing.
    async fn commit(&self) -> Result<(), StoreError>;
}

/// Postgres-backed store holding the ambient run transaction.
#[derive(Debug)]
pub struct PgVacancyStore {
    pool: PgPool,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgVacancyStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            tx: Mutex::new(None),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(format!("public.{table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl VacancyStore for PgVacancyStore {
    async fn ensure_seeded(&self) -> Result<bool, StoreError> {
        if self.table_exists("directions").await? || self.table_exists("vacancies").await? {
            debug!("schema already present, skipping seed");
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_DIRECTIONS).execute(&mut *tx).await?;
        sqlx::query(CREATE_VACANCIES).execute(&mut *tx).await?;
        for name in DIRECTION_NAMES {
            sqlx::query("INSERT INTO directions (name) VALUES ($1)")
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(directions = DIRECTION_NAMES.len(), "created schema and seeded direction catalog");
        Ok(true)
    }

    async fn begin(&self) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            debug!("discarding stale uncommitted transaction");
        }
        *guard = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn direction_id(&self, name: &str) -> Result<Option<i32>, StoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::NoOpenTransaction)?;
        let id: Option<i32> = sqlx::query_scalar("SELECT id FROM directions WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(id)
    }

    async fn vacancy_exists(&self, key: &VacancyKey) -> Result<bool, StoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::NoOpenTransaction)?;
        let exists: bool = sqlx::query_scalar(VACANCY_EXISTS)
            .bind(&key.company_name)
            .bind(&key.vacancy_name)
            .bind(&key.vacancy_description)
            .bind(&key.vacancy_salary)
            .fetch_one(&mut **tx)
            .await?;
        Ok(exists)
    }

    async fn insert_vacancy(&self, vacancy: &NewVacancy) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::NoOpenTransaction)?;
        sqlx::query(INSERT_VACANCY)
            .bind(&vacancy.company_name)
            .bind(&vacancy.company_short_description)
            .bind(vacancy.direction_id)
            .bind(&vacancy.vacancy_name)
            .bind(&vacancy.vacancy_description)
            .bind(&vacancy.vacancy_requirements)
            .bind(&vacancy.vacancy_working_conditions)
            .bind(&vacancy.vacancy_salary)
            .bind(&vacancy.vacancy_benefits)
            .bind(&vacancy.vacancy_contacts)
            .bind(&vacancy.company_website)
            .bind(&vacancy.degree)
            .bind(&vacancy.minimal_english_level)
            .bind(&vacancy.working_time)
            .bind(&vacancy.working_experience)
            .bind(vacancy.date_added)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or(StoreError::NoOpenTransaction)?;
        tx.commit().await?;
        Ok(())
    }
}

/// In-memory store with the same transactional contract, used by engine
/// tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryVacancyStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    seeded: bool,
    directions: Vec<vacsync_core::Direction>,
    committed: Vec<NewVacancy>,
    staged: Option<Vec<NewVacancy>>,
}

impl MemoryVacancyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn committed(&self) -> Vec<NewVacancy> {
        self.state.lock().await.committed.clone()
    }
}

#[async_trait]
impl VacancyStore for MemoryVacancyStore {
    async fn ensure_seeded(&self) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.seeded {
            return Ok(false);
        }
        state.seeded = true;
        state.directions = DIRECTION_NAMES
            .iter()
            .enumerate()
            .map(|(index, name)| vacsync_core::Direction {
                id: index as i32 + 1,
                name: name.to_string(),
            })
            .collect();
        Ok(true)
    }

    async fn begin(&self) -> Result<(), StoreError> {
        self.state.lock().await.staged = Some(Vec::new());
        Ok(())
    }

    async fn direction_id(&self, name: &str) -> Result<Option<i32>, StoreError> {
        let state = self.state.lock().await;
        if state.staged.is_none() {
            return Err(StoreError::NoOpenTransaction);
        }
        Ok(state
            .directions
            .iter()
            .find(|direction| direction.name == name)
            .map(|direction| direction.id))
    }

    async fn vacancy_exists(&self, key: &VacancyKey) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        let staged = state.staged.as_ref().ok_or(StoreError::NoOpenTransaction)?;
        Ok(state
            .committed
            .iter()
            .chain(staged.iter())
            .any(|vacancy| vacancy.key() == *key))
    }

    async fn insert_vacancy(&self, vacancy: &NewVacancy) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .staged
            .as_mut()
            .ok_or(StoreError::NoOpenTransaction)?
            .push(vacancy.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let staged = state.staged.take().ok_or(StoreError::NoOpenTransaction)?;
        state.committed.extend(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use vacsync_core::MappedRow;

    fn sample(company: &str, name: &str) -> NewVacancy {
        let row: MappedRow<'_> = BTreeMap::from([
            ("company_name", company.to_string()),
            ("vacancy_name", name.to_string()),
            ("vacancy_description", "D".to_string()),
            ("vacancy_salary", "1000".to_string()),
        ]);
        NewVacancy::from_mapped(&row, 1, Utc::now())
    }

    #[tokio::test]
    async fn seeding_is_run_once() {
        let store = MemoryVacancyStore::new();
        assert!(store.ensure_seeded().await.expect("first seed"));
        assert!(!store.ensure_seeded().await.expect("second seed"));

        store.begin().await.expect("begin");
        let id = store
            .direction_id("Юриспруденція")
            .await
            .expect("lookup")
            .expect("catalog entry");
        assert_eq!(id, DIRECTION_NAMES.len() as i32);
    }

    #[tokio::test]
    async fn staged_rows_are_visible_before_commit() {
        let store = MemoryVacancyStore::new();
        store.ensure_seeded().await.expect("seed");
        store.begin().await.expect("begin");

        let vacancy = sample("Acme", "Engineer");
        assert!(!store.vacancy_exists(&vacancy.key()).await.expect("exists"));
        store.insert_vacancy(&vacancy).await.expect("insert");
        assert!(store.vacancy_exists(&vacancy.key()).await.expect("exists"));
        assert!(store.committed().await.is_empty());

        store.commit().await.expect("commit");
        assert_eq!(store.committed().await.len(), 1);
    }

    #[tokio::test]
    async fn begin_discards_prior_uncommitted_rows() {
        let store = MemoryVacancyStore::new();
        store.ensure_seeded().await.expect("seed");

        store.begin().await.expect("begin");
        store
            .insert_vacancy(&sample("Acme", "Engineer"))
            .await
            .expect("insert");

        // Abandoned run: a new begin rolls the staged batch back.
        store.begin().await.expect("second begin");
        assert!(
            !store
                .vacancy_exists(&sample("Acme", "Engineer").key())
                .await
                .expect("exists")
        );
        store.commit().await.expect("commit");
        assert!(store.committed().await.is_empty());
    }

    #[tokio::test]
    async fn writes_outside_a_run_are_rejected() {
        let store = MemoryVacancyStore::new();
        store.ensure_seeded().await.expect("seed");
        let err = store
            .insert_vacancy(&sample("Acme", "Engineer"))
            .await
            .expect_err("no open transaction");
        assert!(matches!(err, StoreError::NoOpenTransaction));

        let err = store.commit().await.expect_err("no open transaction");
        assert!(matches!(err, StoreError::NoOpenTransaction));
    }
}
