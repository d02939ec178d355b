use std::fmt::Debug;
use std::io::Cursor;
use std::ops::{Bound, RangeBounds};
use std::sync::{Arc, Mutex};

use openraft::storage::{LogState, Snapshot};
use openraft::{
    AnyError, Entry, EntryPayload, ErrorSubject, ErrorVerb, LogId, OptionalSend, RaftLogReader,
    RaftSnapshotBuilder, RaftStorage, SnapshotMeta, StorageError, StorageIOError,
    StoredMembership, Vote,
};

use pyaz_storage::LogStore;

use crate::{NodeInfo, RaftNodeId, StateMachine, TypeConfig};

const META_VOTE: &str = "vote";
const META_PURGED: &str = "purged";

type StorageResult<T> = Result<T, StorageError<RaftNodeId>>;

fn io_err(
    subject: ErrorSubject<RaftNodeId>,
    verb: ErrorVerb,
    e: &(impl std::error::Error + 'static),
) -> StorageError<RaftNodeId> {
    StorageError::IO { source: StorageIOError::new(subject, verb, AnyError::new(e)) }
}

fn encode<T: serde::Serialize>(
    subject: ErrorSubject<RaftNodeId>,
    value: &T,
) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| io_err(subject, ErrorVerb::Write, &e))
}

fn decode<T: serde::de::DeserializeOwned>(
    subject: ErrorSubject<RaftNodeId>,
    raw: &[u8],
) -> StorageResult<T> {
    serde_json::from_slice(raw).map_err(|e| io_err(subject, ErrorVerb::Read, &e))
}

/// Volatile state-machine bookkeeping. Deliberately not persisted: the log is
/// the durable state, and a restarted node rebuilds the map by replay.
struct SmState {
    last_applied: Option<LogId<RaftNodeId>>,
    membership: StoredMembership<RaftNodeId, NodeInfo>,
    snapshot: Option<(SnapshotMeta<RaftNodeId, NodeInfo>, Vec<u8>)>,
    snapshot_idx: u64,
}

/// Bridges the consensus library onto [`pyaz_storage::LogStore`] (durable
/// entries, vote, purge cursor) and a [`StateMachine`] (committed commands).
/// The storage crate stays free of library types; this adapter owns the
/// entry encoding.
pub struct Adapter<S, M> {
    store: Arc<S>,
    fsm: Arc<M>,
    state: Arc<Mutex<SmState>>,
}

impl<S, M> Adapter<S, M> {
    pub fn new(store: Arc<S>, fsm: Arc<M>) -> Self {
        Adapter {
            store,
            fsm,
            state: Arc::new(Mutex::new(SmState {
                last_applied: None,
                membership: StoredMembership::default(),
                snapshot: None,
                snapshot_idx: 0,
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SmState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S, M> Clone for Adapter<S, M> {
    fn clone(&self) -> Self {
        Adapter { store: self.store.clone(), fsm: self.fsm.clone(), state: self.state.clone() }
    }
}

impl<S: LogStore, M: StateMachine> RaftLogReader<TypeConfig> for Adapter<S, M> {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> StorageResult<Vec<Entry<TypeConfig>>> {
        let from = match range.start_bound() {
            Bound::Included(&i) => i,
            Bound::Excluded(&i) => i + 1,
            Bound::Unbounded => 0,
        };
        let to = match range.end_bound() {
            Bound::Included(&i) => i,
            Bound::Excluded(&0) => return Ok(Vec::new()),
            Bound::Excluded(&i) => i - 1,
            Bound::Unbounded => {
                match self
                    .store
                    .last_index()
                    .await
                    .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, &e))?
                {
                    Some(last) => last,
                    None => return Ok(Vec::new()),
                }
            }
        };
        let raw = self
            .store
            .entries(from, to)
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, &e))?;
        raw.iter().map(|blob| decode(ErrorSubject::Logs, blob)).collect()
    }
}

impl<S: LogStore, M: StateMachine> RaftSnapshotBuilder<TypeConfig> for Adapter<S, M> {
    async fn build_snapshot(&mut self) -> StorageResult<Snapshot<TypeConfig>> {
        let data = self
            .fsm
            .snapshot()
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Read, &e))?;
        let mut g = self.state();
        g.snapshot_idx += 1;
        let meta = SnapshotMeta {
            last_log_id: g.last_applied,
            last_membership: g.membership.clone(),
            snapshot_id: format!(
                "{}-{}",
                g.last_applied.map(|l| l.index).unwrap_or(0),
                g.snapshot_idx
            ),
        };
        g.snapshot = Some((meta.clone(), data.clone()));
        Ok(Snapshot { meta, snapshot: Box::new(Cursor::new(data)) })
    }
}

impl<S: LogStore, M: StateMachine> RaftStorage<TypeConfig> for Adapter<S, M> {
    type LogReader = Self;
    type SnapshotBuilder = Self;

    async fn save_vote(&mut self, vote: &Vote<RaftNodeId>) -> StorageResult<()> {
        let raw = encode(ErrorSubject::Vote, vote)?;
        self.store
            .put_meta(META_VOTE, raw)
            .await
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Write, &e))
    }

    async fn read_vote(&mut self) -> StorageResult<Option<Vote<RaftNodeId>>> {
        let raw = self
            .store
            .get_meta(META_VOTE)
            .await
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Read, &e))?;
        match raw {
            Some(raw) => Ok(Some(decode(ErrorSubject::Vote, &raw)?)),
            None => Ok(None),
        }
    }

    async fn get_log_state(&mut self) -> StorageResult<LogState<TypeConfig>> {
        let last_purged: Option<LogId<RaftNodeId>> = match self
            .store
            .get_meta(META_PURGED)
            .await
            .map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Read, &e))?
        {
            Some(raw) => Some(decode(ErrorSubject::Store, &raw)?),
            None => None,
        };
        let last_log_id = match self
            .store
            .last_index()
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, &e))?
        {
            Some(index) => {
                let raw = self
                    .store
                    .entry(index)
                    .await
                    .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, &e))?
                    .ok_or_else(|| {
                        io_err(
                            ErrorSubject::Logs,
                            ErrorVerb::Read,
                            &std::io::Error::new(
                                std::io::ErrorKind::NotFound,
                                format!("log entry {index} missing"),
                            ),
                        )
                    })?;
                let entry: Entry<TypeConfig> = decode(ErrorSubject::Logs, &raw)?;
                Some(entry.log_id)
            }
            None => last_purged,
        };
        Ok(LogState { last_purged_log_id: last_purged, last_log_id })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn append_to_log<I>(&mut self, entries: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        let mut batch = Vec::new();
        for entry in entries {
            let raw = encode(ErrorSubject::Logs, &entry)?;
            batch.push((entry.log_id.index, raw));
        }
        self.store
            .append(batch)
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, &e))
    }

    async fn delete_conflict_logs_since(&mut self, log_id: LogId<RaftNodeId>) -> StorageResult<()> {
        self.store
            .truncate_since(log_id.index)
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, &e))
    }

    async fn purge_logs_upto(&mut self, log_id: LogId<RaftNodeId>) -> StorageResult<()> {
        let raw = encode(ErrorSubject::Store, &log_id)?;
        self.store
            .put_meta(META_PURGED, raw)
            .await
            .map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Write, &e))?;
        self.store
            .purge_upto(log_id.index)
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, &e))
    }

    async fn last_applied_state(
        &mut self,
    ) -> StorageResult<(Option<LogId<RaftNodeId>>, StoredMembership<RaftNodeId, NodeInfo>)> {
        let g = self.state();
        Ok((g.last_applied, g.membership.clone()))
    }

    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry<TypeConfig>],
    ) -> StorageResult<Vec<()>> {
        let mut replies = Vec::with_capacity(entries.len());
        for entry in entries {
            match &entry.payload {
                EntryPayload::Blank => {}
                EntryPayload::Normal(command) => {
                    self.fsm
                        .apply(entry.log_id.index, command)
                        .await
                        .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Write, &e))?;
                }
                EntryPayload::Membership(m) => {
                    self.state().membership =
                        StoredMembership::new(Some(entry.log_id), m.clone());
                }
            }
            self.state().last_applied = Some(entry.log_id);
            replies.push(());
        }
        Ok(replies)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(&mut self) -> StorageResult<Box<Cursor<Vec<u8>>>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<RaftNodeId, NodeInfo>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> StorageResult<()> {
        let data = snapshot.into_inner();
        self.fsm
            .restore(&data)
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Write, &e))?;
        let mut g = self.state();
        g.last_applied = meta.last_log_id;
        g.membership = meta.last_membership.clone();
        g.snapshot = Some((meta.clone(), data));
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> StorageResult<Option<Snapshot<TypeConfig>>> {
        let g = self.state();
        Ok(g.snapshot.as_ref().map(|(meta, data)| Snapshot {
            meta: meta.clone(),
            snapshot: Box::new(Cursor::new(data.clone())),
        }))
    }
}
