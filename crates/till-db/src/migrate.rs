use tokio_postgres::Client;

use crate::{Error, Result};

/// A registered migration.
pub struct Migration {
    /// Version string, e.g. "0001_create_schema". Applied in sort order.
    pub version: &'static str,
    /// Human-readable name for logs.
    pub name: &'static str,
    /// Statements executed in order, all inside one transaction.
    pub statements: &'static [&'static str],
}

/// Runs migrations against a database.
pub struct MigrationRunner<'a> {
    client: &'a mut Client,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(client: &'a mut Client) -> Self {
        Self { client }
    }

    /// Ensure the migrations tracking table exists.
    pub async fn init(&self) -> Result<()> {
        self.client
            .execute(
                "CREATE TABLE IF NOT EXISTS _till_migrations (
                    version TEXT PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                &[],
            )
            .await?;
        Ok(())
    }

    /// Get all applied migration versions.
    pub async fn applied(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query("SELECT version FROM _till_migrations ORDER BY version", &[])
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Get all pending migrations (registered but not applied).
    pub fn pending(&self, applied: &[String]) -> Vec<&'static Migration> {
        let mut migrations: Vec<_> = inventory::iter::<Migration>
            .into_iter()
            .filter(|m| !applied.iter().any(|v| v == m.version))
            .collect();
        migrations.sort_by_key(|m| m.version);
        migrations
    }

    /// Run all pending migrations.
    ///
    /// Each migration runs in its own transaction. If a statement fails, the
    /// migration's changes are rolled back and subsequent migrations are
    /// skipped.
    pub async fn migrate(&mut self) -> Result<Vec<&'static str>> {
        self.init().await?;
        let applied = self.applied().await?;
        let pending = self.pending(&applied);

        let mut ran = Vec::new();
        for migration in pending {
            let tx = self.client.transaction().await?;

            for statement in migration.statements {
                tx.execute(*statement, &[]).await.map_err(|e| {
                    Error::Migration(format!(
                        "{} ({}): {}",
                        migration.version, migration.name, e
                    ))
                })?;
            }

            // Record the migration as applied, inside the same transaction.
            tx.execute(
                "INSERT INTO _till_migrations (version) VALUES ($1)",
                &[&migration.version],
            )
            .await?;

            tx.commit().await?;

            tracing::info!(version = migration.version, "applied migration");
            ran.push(migration.version);
        }

        Ok(ran)
    }

    /// Get status of all registered migrations.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        self.init().await?;
        let applied = self.applied().await?;

        let mut all: Vec<_> = inventory::iter::<Migration>
            .into_iter()
            .map(|m| MigrationStatus {
                version: m.version,
                name: m.name,
                applied: applied.contains(&m.version.to_string()),
            })
            .collect();
        all.sort_by_key(|m| m.version);
        Ok(all)
    }
}

/// Status of a single migration.
pub struct MigrationStatus {
    pub version: &'static str,
    pub name: &'static str,
    pub applied: bool,
}
