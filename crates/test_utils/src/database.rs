//! Database Test Utilities
//!
//! Starts a PostgreSQL test container, applies the embedded migrations and
//! seeds billing rows with fixed ids.

use std::time::Duration;

use sqlx::PgPool;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;

use domain_billing::{BillingEntity, MaterialItem, TimeRecord};
use infra_db::{create_pool, run_migrations, DatabaseConfig};

const POSTGRES_USER: &str = "test_user";
const POSTGRES_PASSWORD: &str = "test_password";
const POSTGRES_DB: &str = "settlement_test";

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Tables in truncation order
const TABLES: &[&str] = &[
    "generated_documents",
    "document_jobs",
    "material_items",
    "time_records",
    "entity_recipients",
    "billing_entities",
    "time_categories",
    "articles",
];

/// A wrapper around a PostgreSQL test container
pub struct TestDatabase {
    _container: ContainerAsync<Postgres>,
    pub url: String,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Starts a new PostgreSQL container with the schema applied
    ///
    /// # Errors
    ///
    /// Returns an error if the container fails to start or a migration fails
    pub async fn new() -> TestResult<Self> {
        let container = Postgres::default()
            .with_db_name(POSTGRES_DB)
            .with_user(POSTGRES_USER)
            .with_password(POSTGRES_PASSWORD)
            .start()
            .await?;

        let port = container.get_host_port_ipv4(5432).await?;
        let host = container.get_host().await?;
        let url = format!(
            "postgres://{}:{}@{}:{}/{}",
            POSTGRES_USER, POSTGRES_PASSWORD, host, port, POSTGRES_DB
        );

        let pool = create_pool(
            DatabaseConfig::new(url.clone())
                .max_connections(8)
                .min_connections(1)
                .connect_timeout(Duration::from_secs(30)),
        )
        .await?;
        run_migrations(&pool).await?;

        Ok(Self {
            _container: container,
            url,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Clears all rows and restarts the id sequences
    pub async fn clear_data(&self) -> TestResult<()> {
        let statement = format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", TABLES.join(", "));
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts entities with their ids; owners must come before children
    pub async fn seed_entities(&self, entities: &[BillingEntity]) -> TestResult<()> {
        for entity in entities {
            sqlx::query(
                r#"
                INSERT INTO billing_entities
                    (id, name, external_accounting_id, is_billing_owner, owner_entity_id, bill_direct)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(entity.id.get())
            .bind(&entity.name)
            .bind(&entity.external_accounting_id)
            .bind(entity.is_billing_owner)
            .bind(entity.owner_entity_id.map(|id| id.get()))
            .bind(entity.bill_direct)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Adds a mail recipient for an entity
    pub async fn seed_recipient(&self, entity: &BillingEntity, email: &str) -> TestResult<()> {
        sqlx::query("INSERT INTO entity_recipients (billing_entity_id, email) VALUES ($1, $2)")
            .bind(entity.id.get())
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts time records with their ids, creating referenced categories
    pub async fn seed_records(&self, records: &[TimeRecord]) -> TestResult<()> {
        for record in records {
            if let Some(category) = record.category_id {
                sqlx::query(
                    "INSERT INTO time_categories (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
                )
                .bind(category.get())
                .bind(record.category_name.as_deref().unwrap_or("Work"))
                .execute(&self.pool)
                .await?;
            }

            sqlx::query(
                r#"
                INSERT INTO time_records
                    (id, owner_user_id, billing_entity_id, project_id, category_id, date, hours,
                     billable, billed, invoice_number, work_label, description)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(record.id.get())
            .bind(record.owner_user_id.get())
            .bind(record.billing_entity_id.map(|id| id.get()))
            .bind(record.project_id.map(|id| id.get()))
            .bind(record.category_id.map(|id| id.get()))
            .bind(record.date)
            .bind(record.hours)
            .bind(record.billable)
            .bind(record.billed)
            .bind(&record.invoice_number)
            .bind(&record.work_label)
            .bind(&record.description)
            .execute(&self.pool)
            .await?;
        }
        self.sync_sequence("time_records").await
    }

    /// Inserts material items with their ids, creating referenced articles
    pub async fn seed_items(&self, items: &[MaterialItem]) -> TestResult<()> {
        for item in items {
            if let Some(article) = item.registered_article() {
                sqlx::query("INSERT INTO articles (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                    .bind(article.get())
                    .bind(item.article_name.as_deref().unwrap_or("Article"))
                    .execute(&self.pool)
                    .await?;
            }

            sqlx::query(
                r#"
                INSERT INTO material_items
                    (id, time_record_id, article_id, quantity, description, invoice_number)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.id.get())
            .bind(item.parent_time_record_id.get())
            .bind(item.article_id.map(|id| id.get()))
            .bind(item.quantity)
            .bind(&item.description)
            .bind(&item.invoice_number)
            .execute(&self.pool)
            .await?;
        }
        self.sync_sequence("material_items").await
    }

    /// Moves a table's id sequence past explicitly inserted ids
    async fn sync_sequence(&self, table: &str) -> TestResult<()> {
        let statement = format!(
            "SELECT setval(pg_get_serial_sequence('{table}', 'id'), COALESCE(MAX(id), 0) + 1, false) FROM {table}"
        );
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }
}

/// Creates an isolated test database for a single test
pub async fn create_isolated_test_database() -> TestResult<TestDatabase> {
    TestDatabase::new().await
}
