//! Persistence seam for external media sessions

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{ExternalMediaError, Result};
use crate::types::{ExternalMedia, ListFilter, Status};

const KIND: &str = "external media";

/// Storage for [`ExternalMedia`] records.
///
/// Implementations enforce the record invariants: the local address is
/// written once, status only moves forward, and `begin_termination` is an
/// atomic check-and-set so only one caller ever gets to tear a session down.
#[async_trait]
pub trait ExternalMediaStore: Send + Sync {
    async fn create(&self, media: ExternalMedia) -> Result<ExternalMedia>;

    async fn get(&self, id: Uuid) -> Result<ExternalMedia>;

    /// Records matching `filter`, oldest first
    async fn list(&self, filter: &ListFilter) -> Result<Vec<ExternalMedia>>;

    async fn set_local_address(&self, id: Uuid, ip: &str, port: u16) -> Result<ExternalMedia>;

    /// Running -> Terminating. Anything else is `InvalidState`.
    async fn begin_termination(&self, id: Uuid) -> Result<ExternalMedia>;

    async fn set_status(&self, id: Uuid, status: Status) -> Result<ExternalMedia>;

    async fn delete(&self, id: Uuid) -> Result<ExternalMedia>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<Uuid, ExternalMedia>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    fn update<F>(&self, id: Uuid, f: F) -> Result<ExternalMedia>
    where
        F: FnOnce(&mut ExternalMedia) -> Result<()>,
    {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| ExternalMediaError::not_found(KIND, id))?;
        f(record.value_mut())?;
        record.updated_at = Utc::now();
        Ok(record.value().clone())
    }
}

#[async_trait]
impl ExternalMediaStore for MemoryStore {
    async fn create(&self, media: ExternalMedia) -> Result<ExternalMedia> {
        match self.records.entry(media.id) {
            Entry::Occupied(_) => Err(ExternalMediaError::invalid_state(format!(
                "external media {} already exists",
                media.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(media.clone());
                tracing::debug!(external_media_id = %media.id, "Stored external media");
                Ok(media)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<ExternalMedia> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ExternalMediaError::not_found(KIND, id))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ExternalMedia>> {
        let mut res: Vec<ExternalMedia> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        res.sort_by_key(|r| r.created_at);
        Ok(res)
    }

    async fn set_local_address(&self, id: Uuid, ip: &str, port: u16) -> Result<ExternalMedia> {
        self.update(id, |record| {
            if record.has_local_address() {
                return Err(ExternalMediaError::invalid_state(format!(
                    "local address of {} is already set to {}:{}",
                    id, record.local_ip, record.local_port
                )));
            }
            record.local_ip = ip.to_string();
            record.local_port = port;
            Ok(())
        })
    }

    async fn begin_termination(&self, id: Uuid) -> Result<ExternalMedia> {
        self.update(id, |record| {
            if record.status != Status::Running {
                return Err(ExternalMediaError::invalid_state(format!(
                    "external media {} is already {}",
                    id, record.status
                )));
            }
            record.status = Status::Terminating;
            Ok(())
        })
    }

    async fn set_status(&self, id: Uuid, status: Status) -> Result<ExternalMedia> {
        self.update(id, |record| {
            if !record.status.can_transition_to(status) {
                return Err(ExternalMediaError::invalid_state(format!(
                    "cannot move external media {} from {} to {}",
                    id, record.status, status
                )));
            }
            record.status = status;
            Ok(())
        })
    }

    async fn delete(&self, id: Uuid) -> Result<ExternalMedia> {
        self.records
            .remove(&id)
            .map(|(_, record)| record)
            .ok_or_else(|| ExternalMediaError::not_found(KIND, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionRole, Direction, Encapsulation, ReferenceType, Transport};

    fn record() -> ExternalMedia {
        let now = Utc::now();
        ExternalMedia {
            id: Uuid::new_v4(),
            asterisk_id: "42:01:0a:a4:00:05".to_string(),
            channel_id: Uuid::new_v4().to_string(),
            bridge_id: Some("500d8a7e".to_string()),
            snoop_channel_id: None,
            reference_type: ReferenceType::Call,
            reference_id: Uuid::new_v4(),
            local_ip: String::new(),
            local_port: 0,
            external_host: "example.com".to_string(),
            encapsulation: Encapsulation::Rtp,
            transport: Transport::Udp,
            connection_role: ConnectionRole::Client,
            format: "ulaw".to_string(),
            direction_listen: Direction::Both,
            direction_speak: Direction::Both,
            status: Status::Running,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_local_address_is_write_once() {
        let store = MemoryStore::new();
        let media = store.create(record()).await.unwrap();

        let updated = store.set_local_address(media.id, "10.0.0.1", 30000).await.unwrap();
        assert_eq!(updated.local_endpoint().as_deref(), Some("10.0.0.1:30000"));

        let err = store.set_local_address(media.id, "10.0.0.2", 30002).await.unwrap_err();
        assert!(matches!(err, ExternalMediaError::InvalidState { .. }));
        assert_eq!(store.get(media.id).await.unwrap().local_port, 30000);
    }

    #[tokio::test]
    async fn test_begin_termination_only_once() {
        let store = MemoryStore::new();
        let media = store.create(record()).await.unwrap();

        let first = store.begin_termination(media.id).await.unwrap();
        assert_eq!(first.status, Status::Terminating);
        assert!(store.begin_termination(media.id).await.is_err());

        let err = store.set_status(media.id, Status::Running).await.unwrap_err();
        assert!(matches!(err, ExternalMediaError::InvalidState { .. }));
        let done = store.set_status(media.id, Status::Terminated).await.unwrap();
        assert_eq!(done.status, Status::Terminated);
    }

    #[tokio::test]
    async fn test_duplicate_create_and_delete() {
        let store = MemoryStore::new();
        let media = store.create(record()).await.unwrap();
        assert!(store.create(media.clone()).await.is_err());

        let deleted = store.delete(media.id).await.unwrap();
        assert_eq!(deleted.id, media.id);
        assert!(store.delete(media.id).await.unwrap_err().is_not_found());
        assert!(store.get(media.id).await.unwrap_err().is_not_found());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_reference() {
        let store = MemoryStore::new();
        let a = store.create(record()).await.unwrap();
        let mut other = record();
        other.reference_type = ReferenceType::Conference;
        store.create(other).await.unwrap();

        let calls = store
            .list(&ListFilter { reference_type: Some(ReferenceType::Call), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, a.id);
        assert_eq!(store.list(&ListFilter::default()).await.unwrap().len(), 2);
    }
}
