//! 内存本地存储，用于测试与无持久化需求的场景

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::LocalStore;
use crate::envelope::{EnvelopePayload, OfflineEnvelope};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    next_position: i64,
    envelopes: BTreeMap<i64, OfflineEnvelope>,
    values: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryLocalStore {
    inner: Mutex<Inner>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn append(
        &self,
        payload: &EnvelopePayload,
        created_at: DateTime<Utc>,
    ) -> Result<OfflineEnvelope> {
        let mut inner = self.inner.lock();
        inner.next_position += 1;
        let envelope = OfflineEnvelope {
            id: Uuid::now_v7().to_string(),
            payload: payload.clone(),
            created_at,
            position: inner.next_position,
        };
        inner.envelopes.insert(envelope.position, envelope.clone());
        Ok(envelope)
    }

    async fn pending(&self) -> Result<Vec<OfflineEnvelope>> {
        let mut envelopes: Vec<_> = self.inner.lock().envelopes.values().cloned().collect();
        envelopes.sort_by(|a, b| (a.created_at, a.position).cmp(&(b.created_at, b.position)));
        Ok(envelopes)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.inner.lock().envelopes.retain(|_, e| e.id != id);
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.inner.lock().envelopes.len() as u64)
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().values.get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
