//! Remote relational store abstraction.
//!
//! Rows are scoped by `user_id` and mutated with plain last-write-wins
//! updates - there is no version column or optimistic lock. A write that
//! lands after its caller's timeout already fired simply overwrites.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::{Bill, BillStatus, ChatMessage, InsuranceDocument};

#[async_trait]
pub trait BillStore: Send + Sync {
    async fn insert(&self, bill: Bill) -> Result<Bill>;
    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<Bill>>;
    /// Bills for a user, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bill>>;
    /// Full-row overwrite; refreshes `updated_at`.
    async fn update(&self, bill: Bill) -> Result<Bill>;
    async fn set_status(&self, user_id: &str, id: Uuid, status: BillStatus) -> Result<()>;
    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait InsuranceStore: Send + Sync {
    async fn insert(&self, doc: InsuranceDocument) -> Result<InsuranceDocument>;
    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<InsuranceDocument>>;
    /// Documents for a user, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<InsuranceDocument>>;
    async fn update(&self, doc: InsuranceDocument) -> Result<InsuranceDocument>;
    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn append(&self, message: ChatMessage) -> Result<()>;
    /// Most recent `limit` messages, oldest first.
    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;
}

/// In-memory bill store for tests and local runs.
pub struct InMemoryBillStore {
    rows: Arc<DashMap<Uuid, Bill>>,
}

impl InMemoryBillStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryBillStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillStore for InMemoryBillStore {
    async fn insert(&self, bill: Bill) -> Result<Bill> {
        self.rows.insert(bill.id, bill.clone());
        Ok(bill)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<Bill>> {
        Ok(self
            .rows
            .get(&id)
            .filter(|row| row.user_id == user_id)
            .map(|row| row.clone()))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bill>> {
        let mut bills: Vec<Bill> = self
            .rows
            .iter()
            .filter(|row| row.user_id == user_id)
            .map(|row| row.clone())
            .collect();
        bills.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bills)
    }

    async fn update(&self, mut bill: Bill) -> Result<Bill> {
        if !self.rows.contains_key(&bill.id) {
            return Err(CoreError::NotFound(format!("bill {}", bill.id)));
        }
        bill.updated_at = Utc::now();
        self.rows.insert(bill.id, bill.clone());
        Ok(bill)
    }

    async fn set_status(&self, user_id: &str, id: Uuid, status: BillStatus) -> Result<()> {
        let mut row = self
            .rows
            .get_mut(&id)
            .filter(|row| row.user_id == user_id)
            .ok_or_else(|| CoreError::NotFound(format!("bill {}", id)))?;
        row.status = status;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()> {
        let owned = self
            .rows
            .get(&id)
            .map(|row| row.user_id == user_id)
            .unwrap_or(false);
        if owned {
            self.rows.remove(&id);
        }
        Ok(())
    }
}

/// In-memory insurance document store.
pub struct InMemoryInsuranceStore {
    rows: Arc<DashMap<Uuid, InsuranceDocument>>,
}

impl InMemoryInsuranceStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryInsuranceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InsuranceStore for InMemoryInsuranceStore {
    async fn insert(&self, doc: InsuranceDocument) -> Result<InsuranceDocument> {
        self.rows.insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<InsuranceDocument>> {
        Ok(self
            .rows
            .get(&id)
            .filter(|row| row.user_id == user_id)
            .map(|row| row.clone()))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<InsuranceDocument>> {
        let mut docs: Vec<InsuranceDocument> = self
            .rows
            .iter()
            .filter(|row| row.user_id == user_id)
            .map(|row| row.clone())
            .collect();
        docs.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
        Ok(docs)
    }

    async fn update(&self, mut doc: InsuranceDocument) -> Result<InsuranceDocument> {
        if !self.rows.contains_key(&doc.id) {
            return Err(CoreError::NotFound(format!("insurance document {}", doc.id)));
        }
        doc.updated_at = Utc::now();
        self.rows.insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()> {
        let owned = self
            .rows
            .get(&id)
            .map(|row| row.user_id == user_id)
            .unwrap_or(false);
        if owned {
            self.rows.remove(&id);
        }
        Ok(())
    }
}

/// In-memory chat history store.
pub struct InMemoryChatStore {
    rows: Arc<DashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn append(&self, message: ChatMessage) -> Result<()> {
        self.rows
            .entry(message.user_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let messages = self
            .rows
            .get(user_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_bill(user_id: &str) -> Bill {
        let now = Utc::now();
        Bill {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            hospital_name: "General".to_string(),
            bill_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            amount: 100.0,
            description: String::new(),
            file_url: None,
            status: BillStatus::Processing,
            analysis_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn bills_are_scoped_by_user() {
        let store = InMemoryBillStore::new();
        let bill = store.insert(sample_bill("alice")).await.unwrap();

        assert!(store.get("alice", bill.id).await.unwrap().is_some());
        assert!(store.get("mallory", bill.id).await.unwrap().is_none());

        store.delete("mallory", bill.id).await.unwrap();
        assert!(store.get("alice", bill.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_updates_are_last_write_wins() {
        let store = Arc::new(InMemoryBillStore::new());
        let bill = store.insert(sample_bill("alice")).await.unwrap();

        let mut handles = Vec::new();
        for amount in [10.0, 20.0, 30.0, 40.0] {
            let store = store.clone();
            let mut bill = bill.clone();
            handles.push(tokio::spawn(async move {
                bill.amount = amount;
                store.update(bill).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // No crash, and the row holds one of the written amounts.
        let row = store.get("alice", bill.id).await.unwrap().unwrap();
        assert!([10.0, 20.0, 30.0, 40.0].contains(&row.amount));
    }

    #[tokio::test]
    async fn chat_history_is_bounded_and_ordered() {
        let store = InMemoryChatStore::new();
        for i in 0..5 {
            store
                .append(ChatMessage {
                    id: Uuid::new_v4(),
                    user_id: "alice".to_string(),
                    role: "user".to_string(),
                    content: format!("msg {}", i),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let history = store.history("alice", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "msg 2");
        assert_eq!(history[2].content, "msg 4");
    }
}
