//! Postgres-backed implementations of the record store traits.
//!
//! Connects lazily, creates its tables on first use, and keeps to plain
//! last-write-wins updates. Analysis payloads are stored as JSONB.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::{Bill, BillStatus, ChatMessage, InsuranceDocument, InsuranceStatus};
use crate::records::{BillStore, ChatStore, InsuranceStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hospital_bills (
    id UUID PRIMARY KEY,
    user_id TEXT NOT NULL,
    hospital_name TEXT NOT NULL,
    bill_date DATE NOT NULL,
    amount DOUBLE PRECISION NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    file_url TEXT,
    status TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'paid', 'denied')),
    analysis_result JSONB,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS hospital_bills_user_idx ON hospital_bills (user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS insurance_documents (
    id UUID PRIMARY KEY,
    user_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_type TEXT NOT NULL,
    file_url TEXT NOT NULL,
    file_size BIGINT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected')),
    analysis_result JSONB,
    upload_date TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS insurance_documents_user_idx ON insurance_documents (user_id, upload_date DESC);

CREATE TABLE IF NOT EXISTS chat_messages (
    id UUID PRIMARY KEY,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS chat_messages_user_idx ON chat_messages (user_id, created_at);
"#;

/// Shared pool wrapper; cloning is cheap.
#[derive(Clone)]
pub struct PostgresStores {
    pool: PgPool,
}

impl PostgresStores {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub fn bills(&self) -> PostgresBillStore {
        PostgresBillStore {
            pool: self.pool.clone(),
        }
    }

    pub fn insurance(&self) -> PostgresInsuranceStore {
        PostgresInsuranceStore {
            pool: self.pool.clone(),
        }
    }

    pub fn chat(&self) -> PostgresChatStore {
        PostgresChatStore {
            pool: self.pool.clone(),
        }
    }
}

pub struct PostgresBillStore {
    pool: PgPool,
}

fn bill_from_row(row: &PgRow) -> Result<Bill> {
    let status_text: String = row.try_get("status")?;
    let status = BillStatus::parse(&status_text)
        .ok_or_else(|| CoreError::Database(format!("unknown bill status {}", status_text)))?;
    let analysis: Option<serde_json::Value> = row.try_get("analysis_result")?;
    Ok(Bill {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        hospital_name: row.try_get("hospital_name")?,
        bill_date: row.try_get("bill_date")?,
        amount: row.try_get("amount")?,
        description: row.try_get("description")?,
        file_url: row.try_get("file_url")?,
        status,
        analysis_result: analysis
            .map(serde_json::from_value)
            .transpose()
            .map_err(CoreError::Serialization)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl BillStore for PostgresBillStore {
    async fn insert(&self, bill: Bill) -> Result<Bill> {
        let analysis = bill
            .analysis_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            "INSERT INTO hospital_bills \
             (id, user_id, hospital_name, bill_date, amount, description, file_url, status, analysis_result, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(bill.id)
        .bind(&bill.user_id)
        .bind(&bill.hospital_name)
        .bind(bill.bill_date)
        .bind(bill.amount)
        .bind(&bill.description)
        .bind(&bill.file_url)
        .bind(bill.status.as_str())
        .bind(analysis)
        .bind(bill.created_at)
        .bind(bill.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(bill)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<Bill>> {
        let row = sqlx::query("SELECT * FROM hospital_bills WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(bill_from_row).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bill>> {
        let rows =
            sqlx::query("SELECT * FROM hospital_bills WHERE user_id = $1 ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(bill_from_row).collect()
    }

    async fn update(&self, mut bill: Bill) -> Result<Bill> {
        bill.updated_at = Utc::now();
        let analysis = bill
            .analysis_result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let result = sqlx::query(
            "UPDATE hospital_bills SET hospital_name = $1, bill_date = $2, amount = $3, \
             description = $4, file_url = $5, status = $6, analysis_result = $7, updated_at = $8 \
             WHERE id = $9 AND user_id = $10",
        )
        .bind(&bill.hospital_name)
        .bind(bill.bill_date)
        .bind(bill.amount)
        .bind(&bill.description)
        .bind(&bill.file_url)
        .bind(bill.status.as_str())
        .bind(analysis)
        .bind(bill.updated_at)
        .bind(bill.id)
        .bind(&bill.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("bill {}", bill.id)));
        }
        Ok(bill)
    }

    async fn set_status(&self, user_id: &str, id: Uuid, status: BillStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE hospital_bills SET status = $1, updated_at = $2 WHERE id = $3 AND user_id = $4",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("bill {}", id)));
        }
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM hospital_bills WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PostgresInsuranceStore {
    pool: PgPool,
}

fn insurance_from_row(row: &PgRow) -> Result<InsuranceDocument> {
    let status_text: String = row.try_get("status")?;
    let status = InsuranceStatus::parse(&status_text)
        .ok_or_else(|| CoreError::Database(format!("unknown document status {}", status_text)))?;
    let file_size: i64 = row.try_get("file_size")?;
    Ok(InsuranceDocument {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        file_name: row.try_get("file_name")?,
        file_type: row.try_get("file_type")?,
        file_url: row.try_get("file_url")?,
        file_size: file_size.max(0) as u64,
        status,
        analysis_result: row.try_get("analysis_result")?,
        upload_date: row.try_get("upload_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl InsuranceStore for PostgresInsuranceStore {
    async fn insert(&self, doc: InsuranceDocument) -> Result<InsuranceDocument> {
        sqlx::query(
            "INSERT INTO insurance_documents \
             (id, user_id, file_name, file_type, file_url, file_size, status, analysis_result, upload_date, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(doc.id)
        .bind(&doc.user_id)
        .bind(&doc.file_name)
        .bind(&doc.file_type)
        .bind(&doc.file_url)
        .bind(doc.file_size as i64)
        .bind(doc.status.as_str())
        .bind(&doc.analysis_result)
        .bind(doc.upload_date)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<InsuranceDocument>> {
        let row = sqlx::query("SELECT * FROM insurance_documents WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(insurance_from_row).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<InsuranceDocument>> {
        let rows = sqlx::query(
            "SELECT * FROM insurance_documents WHERE user_id = $1 ORDER BY upload_date DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(insurance_from_row).collect()
    }

    async fn update(&self, mut doc: InsuranceDocument) -> Result<InsuranceDocument> {
        doc.updated_at = Utc::now();
        let result = sqlx::query(
            "UPDATE insurance_documents SET file_name = $1, file_type = $2, file_url = $3, \
             file_size = $4, status = $5, analysis_result = $6, updated_at = $7 \
             WHERE id = $8 AND user_id = $9",
        )
        .bind(&doc.file_name)
        .bind(&doc.file_type)
        .bind(&doc.file_url)
        .bind(doc.file_size as i64)
        .bind(doc.status.as_str())
        .bind(&doc.analysis_result)
        .bind(doc.updated_at)
        .bind(doc.id)
        .bind(&doc.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("insurance document {}", doc.id)));
        }
        Ok(doc)
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM insurance_documents WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PostgresChatStore {
    pool: PgPool,
}

#[async_trait]
impl ChatStore for PostgresChatStore {
    async fn append(&self, message: ChatMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_messages (id, user_id, role, content, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.id)
        .bind(&message.user_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, user_id, role, content, created_at FROM \
             (SELECT * FROM chat_messages WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2) t \
             ORDER BY created_at ASC",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ChatMessage {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    role: row.try_get("role")?,
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
