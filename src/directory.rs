//! Tenant directory: authoritative registry of tenant metadata in the central
//! database. The routing cache in front of it is advisory; this is the source
//! of truth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto::CredentialCipher;
use crate::error::{CryptoError, DirectoryError};

/// Tenant lifecycle status. Only `Active` tenants are ever routed to.
/// Provisioning inserts rows as `Inactive` and flips them to `Active` as its
/// final step, so a half-provisioned tenant is never routable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TenantStatus {
    Active,
    Suspended,
    Inactive,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "inactive" => Ok(TenantStatus::Inactive),
            _ => Err(DirectoryError::Other(format!(
                "invalid tenant status: {} (expected active, suspended or inactive)",
                s
            ))),
        }
    }
}

/// Decrypted connection parameters for one tenant database. Password is
/// redacted from Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// One row of the tenant directory. Subdomain is unique and immutable after
/// creation; the password is stored encrypted (`iv:tag:data` hex format).
#[derive(Clone, Debug)]
pub struct TenantMetadata {
    pub id: Uuid,
    pub subdomain: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password_enc: String,
    pub pool_size: u32,
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantMetadata {
    /// Decrypt the stored password and assemble usable connection parameters.
    pub fn decrypt_credentials(
        &self,
        cipher: &CredentialCipher,
    ) -> Result<ConnectionParams, CryptoError> {
        let password = cipher.decrypt(&self.db_password_enc)?;
        Ok(ConnectionParams {
            host: self.db_host.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            user: self.db_user.clone(),
            password,
            pool_size: self.pool_size,
        })
    }
}

/// Read side of the directory, the one dependency the resolver needs. Kept as
/// a trait so request-path tests can run against an in-memory directory.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Exact-match lookup on the normalized (lowercase) subdomain. No side effects.
    async fn find_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<TenantMetadata>, DirectoryError>;
}

/// Fields for a new directory row. The password arrives in plaintext from the
/// provisioning flow and is encrypted before it is written.
#[derive(Clone, Debug)]
pub struct NewTenant {
    pub subdomain: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub pool_size: u32,
}

/// Directory client over the central PostgreSQL database.
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
    schema: String,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgTenantDirectory {
            pool,
            schema: schema.into(),
        }
    }

    fn table(&self) -> String {
        format!("{}.tenants", self.schema)
    }

    /// Create the directory schema and table if missing. Call once at process start.
    pub async fn ensure_table(&self) -> Result<(), DirectoryError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                subdomain TEXT NOT NULL UNIQUE,
                db_host TEXT NOT NULL,
                db_port INT NOT NULL,
                db_name TEXT NOT NULL,
                db_user TEXT NOT NULL,
                db_password_enc TEXT NOT NULL,
                pool_size INT NOT NULL DEFAULT 5,
                status TEXT NOT NULL DEFAULT 'inactive',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.table()
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a new tenant row as `inactive` (provisioning flips it to active
    /// once the physical database is ready). Returns the stored row.
    pub async fn insert(
        &self,
        new: &NewTenant,
        cipher: &CredentialCipher,
    ) -> Result<TenantMetadata, DirectoryError> {
        let password_enc = cipher
            .encrypt(&new.db_password)
            .map_err(|e| DirectoryError::Other(format!("credential encryption: {}", e)))?;
        let id = Uuid::new_v4();
        let sql = format!(
            r#"
            INSERT INTO {} (id, subdomain, db_host, db_port, db_name, db_user, db_password_enc, pool_size, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'inactive')
            RETURNING created_at, updated_at
            "#,
            self.table()
        );
        let (created_at, updated_at): (DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(&sql)
            .bind(id)
            .bind(&new.subdomain)
            .bind(&new.db_host)
            .bind(new.db_port as i32)
            .bind(&new.db_name)
            .bind(&new.db_user)
            .bind(&password_enc)
            .bind(new.pool_size as i32)
            .fetch_one(&self.pool)
            .await?;
        Ok(TenantMetadata {
            id,
            subdomain: new.subdomain.clone(),
            db_host: new.db_host.clone(),
            db_port: new.db_port,
            db_name: new.db_name.clone(),
            db_user: new.db_user.clone(),
            db_password_enc: password_enc,
            pool_size: new.pool_size,
            status: TenantStatus::Inactive,
            created_at,
            updated_at,
        })
    }

    /// Flip a tenant's lifecycle status. Returns false if the id is unknown.
    pub async fn set_status(&self, id: Uuid, status: TenantStatus) -> Result<bool, DirectoryError> {
        let sql = format!(
            "UPDATE {} SET status = $2, updated_at = NOW() WHERE id = $1",
            self.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Change a tenant's desired pool size (plan changes). Takes effect the
    /// next time a pool is created for the tenant.
    pub async fn set_pool_size(&self, id: Uuid, pool_size: u32) -> Result<bool, DirectoryError> {
        let sql = format!(
            "UPDATE {} SET pool_size = $2, updated_at = NOW() WHERE id = $1",
            self.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(pool_size as i32)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Hard-delete a row. Compensation path for failed provisioning only;
    /// established tenants are retired via status, never deleted.
    pub async fn delete(&self, id: Uuid) -> Result<bool, DirectoryError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table());
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

type TenantRow = (
    Uuid,
    String,
    String,
    i32,
    String,
    String,
    String,
    i32,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_into_metadata(row: TenantRow) -> Result<TenantMetadata, DirectoryError> {
    let (id, subdomain, db_host, db_port, db_name, db_user, db_password_enc, pool_size, status, created_at, updated_at) =
        row;
    let db_port = u16::try_from(db_port).map_err(|_| {
        DirectoryError::Other(format!(
            "tenant {} has db_port {} outside the valid port range",
            subdomain, db_port
        ))
    })?;
    Ok(TenantMetadata {
        id,
        subdomain,
        db_host,
        db_port,
        db_name,
        db_user,
        db_password_enc,
        pool_size: pool_size.max(1) as u32,
        status: status.parse()?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn find_by_subdomain(
        &self,
        subdomain: &str,
    ) -> Result<Option<TenantMetadata>, DirectoryError> {
        let sql = format!(
            r#"
            SELECT id, subdomain, db_host, db_port, db_name, db_user,
                   db_password_enc, pool_size, status, created_at, updated_at
            FROM {} WHERE subdomain = $1
            "#,
            self.table()
        );
        let row: Option<TenantRow> = sqlx::query_as(&sql)
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_into_metadata).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(db_port: i32, pool_size: i32, status: &str) -> TenantRow {
        (
            Uuid::new_v4(),
            "club1".into(),
            "db.internal".into(),
            db_port,
            "club_1".into(),
            "club".into(),
            "aa:bb:cc".into(),
            pool_size,
            status.into(),
            Utc::now(),
            Utc::now(),
        )
    }

    #[test]
    fn valid_row_maps_to_metadata() {
        let meta = row_into_metadata(row(5432, 8, "active")).unwrap();
        assert_eq!(meta.db_port, 5432);
        assert_eq!(meta.pool_size, 8);
        assert_eq!(meta.status, TenantStatus::Active);
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        for bad in [-1, 70000, i32::MAX] {
            match row_into_metadata(row(bad, 8, "active")) {
                Err(DirectoryError::Other(msg)) => assert!(msg.contains("db_port")),
                other => panic!("expected error for port {}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(row_into_metadata(row(5432, 8, "zombie")).is_err());
    }

    #[test]
    fn non_positive_pool_size_is_clamped() {
        assert_eq!(row_into_metadata(row(5432, 0, "active")).unwrap().pool_size, 1);
        assert_eq!(row_into_metadata(row(5432, -3, "active")).unwrap().pool_size, 1);
    }
}
