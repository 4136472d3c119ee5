//! Bitemporal versioning protocol shared by every entity repository
//!
//! A logical entity is a chain of immutable version rows linked by
//! `REPLACES` edges (new -> old). Exactly one row of a chain has an open
//! transaction window (`tt_end == MAX_DATE`); that row is the active version.
//!
//! `update` is optimistic: it reads the active row, closes it with a
//! conditional write that only applies while the row is still open, then
//! inserts the successor and the `REPLACES` edge. These are separate round
//! trips against the executor; a crash after the close and before the edge
//! leaves a closed version without a successor.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::clock::{Clock, Timestamp, MAX_DATE};
use crate::config::RetryPolicy;
use crate::error::{MemoryError, Result};
use crate::graph::{
    from_properties, to_properties, EdgePattern, EdgeRecord, GraphExecutor, NodeRef, Predicate,
    Properties, REPLACES,
};
use crate::id::EntityId;
use crate::temporal::{AsOf, Bitemporal, TxPoint};

/// Upper bound on chain hops when following `REPLACES` edges
const MAX_CHAIN_WALK: usize = 10_000;

/// Set on rows closed by `delete`; such a chain has no successor to wait for
pub(crate) const DELETED_AT: &str = "deleted_at";

enum Head<T> {
    Active(T),
    /// Deleted, invalidated or never stored
    Ended,
    /// Closed by an update whose successor is not linked yet
    Unlinked,
}

/// A node type stored through [`VersionedStore`].
///
/// The serde field names of the implementing struct are the stored property
/// names, so the mapping is fixed at compile time.
pub trait VersionedEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Node label in the graph
    const LABEL: &'static str;
    /// Payload accepted by `create`
    type Draft: Send + Sync;
    /// Partial payload accepted by `update`
    type Patch: Send + Sync;

    fn from_draft(id: EntityId, temporal: Bitemporal, draft: Self::Draft) -> Self;
    fn id(&self) -> EntityId;
    fn set_id(&mut self, id: EntityId);
    fn temporal(&self) -> &Bitemporal;
    fn temporal_mut(&mut self) -> &mut Bitemporal;
    /// Merge the set fields of `patch` over `self`
    fn apply(&mut self, patch: &Self::Patch);
}

/// Predicate selecting the active version
pub(crate) fn open_tt() -> Predicate {
    Predicate::eq("tt_end", MAX_DATE.as_millis())
}

pub(crate) fn id_is(id: &EntityId) -> Predicate {
    Predicate::eq("id", id.to_string())
}

/// Generic create/update/delete/time-travel repository for one entity type
pub struct VersionedStore<T> {
    executor: Arc<dyn GraphExecutor>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for VersionedStore<T> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            clock: Arc::clone(&self.clock),
            retry: self.retry,
            _entity: PhantomData,
        }
    }
}

impl<T: VersionedEntity> VersionedStore<T> {
    pub fn new(executor: Arc<dyn GraphExecutor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            executor,
            clock,
            retry: RetryPolicy::default(),
            _entity: PhantomData,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn executor(&self) -> &Arc<dyn GraphExecutor> {
        &self.executor
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// A store for another label over the same executor, clock and retries
    pub(crate) fn sibling<U: VersionedEntity>(&self) -> VersionedStore<U> {
        VersionedStore::new(Arc::clone(&self.executor), Arc::clone(&self.clock))
            .with_retry(self.retry)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Decode rows, skipping any that do not fit the schema
    fn decode(rows: Vec<Properties>) -> Vec<T> {
        rows.into_iter()
            .filter_map(|row| {
                let id = row
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<no id>")
                    .to_string();
                match from_properties::<T>(row) {
                    Ok(entity) => Some(entity),
                    Err(e) => {
                        log::warn!("Failed to decode {} {}: {}. Skipping.", T::LABEL, id, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Persist a new entity with open windows
    pub async fn create(&self, draft: T::Draft, valid_from: Option<Timestamp>) -> Result<T> {
        let now = self.clock.now();
        let entity = T::from_draft(
            EntityId::new(),
            Bitemporal::open(valid_from.unwrap_or(now), now),
            draft,
        );
        self.executor
            .create_node(T::LABEL, to_properties(&entity)?)
            .await?;
        log::debug!("Created {} {}", T::LABEL, entity.id());
        Ok(entity)
    }

    /// One `create` per draft, in order. Not atomic: each result stands alone
    /// and earlier successes are kept when a later item fails.
    pub async fn create_batch(
        &self,
        drafts: Vec<T::Draft>,
        valid_from: Option<Timestamp>,
    ) -> Vec<Result<T>> {
        let mut results = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let result = self.create(draft, valid_from).await;
            if let Err(e) = &result {
                log::warn!("Batch create of {} failed: {}", T::LABEL, e);
            }
            results.push(result);
        }
        results
    }

    /// Active rows matching every predicate
    pub async fn find_active(&self, filter: &[Predicate]) -> Result<Vec<T>> {
        let mut predicates = filter.to_vec();
        predicates.push(open_tt());
        let rows = self.executor.match_nodes(T::LABEL, &predicates).await?;
        Ok(Self::decode(rows))
    }

    /// The active row with this id, if any
    pub async fn find_by_id(&self, id: &EntityId) -> Result<Option<T>> {
        let mut found = self.find_active(&[id_is(id)]).await?;
        if found.len() > 1 {
            log::error!(
                "{} {} has {} active rows; using the newest",
                T::LABEL,
                id,
                found.len()
            );
            found.sort_by_key(|e| e.temporal().tt_start);
        }
        Ok(found.pop())
    }

    /// Any stored row with this id, open or closed
    pub async fn find_version(&self, id: &EntityId) -> Result<Option<T>> {
        let rows = self.executor.match_nodes(T::LABEL, &[id_is(id)]).await?;
        Ok(Self::decode(rows).into_iter().next())
    }

    /// Time-travel read of the row `id`, constrained on each set axis
    pub async fn find_at(&self, id: &EntityId, as_of: AsOf) -> Result<Option<T>> {
        let mut predicates = vec![id_is(id)];
        if let Some(vt) = as_of.vt {
            predicates.push(Predicate::lte("vt_start", vt.as_millis()));
            predicates.push(Predicate::gt("vt_end", vt.as_millis()));
        }
        match as_of.tt {
            None => {}
            Some(TxPoint::Current) => predicates.push(open_tt()),
            Some(TxPoint::At(tt)) => {
                predicates.push(Predicate::lte("tt_start", tt.as_millis()));
                predicates.push(Predicate::gt("tt_end", tt.as_millis()));
            }
        }
        let rows = self.executor.match_nodes(T::LABEL, &predicates).await?;
        Ok(Self::decode(rows).into_iter().next())
    }

    /// Replace the active version of `id` with `patch` merged over it.
    ///
    /// Retries lost races per the configured [`RetryPolicy`]; a retry follows
    /// `REPLACES` edges from `id` to whichever version won and re-applies the
    /// patch there.
    pub async fn update(&self, id: &EntityId, patch: &T::Patch) -> Result<T> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.try_update(id, patch, attempt > 1).await {
                Ok(next) => {
                    if attempt > 1 {
                        log::info!(
                            "Updated {} {} on attempt {}/{}",
                            T::LABEL,
                            id,
                            attempt,
                            attempts
                        );
                    }
                    return Ok(next);
                }
                Err(e) if e.is_concurrency() => {
                    log::debug!(
                        "{} {} lost optimistic close (attempt {}/{})",
                        T::LABEL,
                        id,
                        attempt,
                        attempts
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        log::warn!(
            "Giving up on {} {} after {} attempts: {}",
            T::LABEL,
            id,
            attempts,
            last_error
        );
        Err(MemoryError::ConcurrencyExhausted {
            id: id.to_string(),
            attempts,
            last_error,
        })
    }

    async fn try_update(&self, requested: &EntityId, patch: &T::Patch, rebase: bool) -> Result<T> {
        let current = if rebase {
            self.resolve_head(requested).await?
        } else {
            self.find_by_id(requested)
                .await?
                .ok_or_else(|| MemoryError::not_found(format!("{} {}", T::LABEL, requested)))?
        };
        let old_id = current.id();

        let now = self.clock.now();
        let closed = self
            .executor
            .set_properties(
                T::LABEL,
                &[id_is(&old_id), open_tt()],
                to_properties(&json!({ "tt_end": now }))?,
            )
            .await?;
        if closed == 0 {
            return Err(MemoryError::concurrent(old_id.to_string()));
        }

        let mut next = current;
        next.apply(patch);
        next.set_id(EntityId::new());
        *next.temporal_mut() = Bitemporal::open(now, now);
        self.executor
            .create_node(T::LABEL, to_properties(&next)?)
            .await?;

        let edge = EdgeRecord::new(
            REPLACES,
            NodeRef::new(T::LABEL, next.id().to_string()),
            NodeRef::new(T::LABEL, old_id.to_string()),
        )
        .with_properties(to_properties(&next.temporal().edge_stamp())?);
        if !self.executor.create_edge(edge).await? {
            log::warn!("REPLACES edge {} -> {} not created", next.id(), old_id);
        }

        log::debug!("Versioned {} {} -> {}", T::LABEL, old_id, next.id());
        Ok(next)
    }

    /// Walk same-chain `REPLACES` edges from `id` to the active version.
    ///
    /// A successor opens at the instant its predecessor closed; other edges
    /// into a version (such as those written by memory invalidation) belong
    /// to a different chain and are not followed.
    async fn walk_to_head(&self, id: &EntityId) -> Result<Head<T>> {
        let Some(mut cursor) = self.find_version(id).await? else {
            return Ok(Head::Ended);
        };
        for _ in 0..MAX_CHAIN_WALK {
            if cursor.temporal().is_active() {
                return Ok(Head::Active(cursor));
            }
            let closed_at = cursor.temporal().tt_end;
            let successor = self
                .find_replacements(&cursor.id())
                .await?
                .into_iter()
                .find(|s| s.temporal().tt_start == closed_at);
            match successor {
                Some(next) => cursor = next,
                None if self.is_retired(&cursor.id()).await? => return Ok(Head::Ended),
                None => return Ok(Head::Unlinked),
            }
        }
        log::error!("{} chain from {} exceeds {} versions", T::LABEL, id, MAX_CHAIN_WALK);
        Ok(Head::Unlinked)
    }

    /// Whether the row `id` was closed by a delete or an invalidation
    async fn is_retired(&self, id: &EntityId) -> Result<bool> {
        let rows = self.executor.match_nodes(T::LABEL, &[id_is(id)]).await?;
        let valid_open = Predicate::eq("vt_end", MAX_DATE.as_millis());
        Ok(rows.iter().any(|row| {
            row.get(DELETED_AT).is_some_and(|v| !v.is_null()) || !valid_open.matches(row)
        }))
    }

    /// Head of the chain containing `id`, for a retry that lost its close
    async fn resolve_head(&self, id: &EntityId) -> Result<T> {
        match self.walk_to_head(id).await? {
            Head::Active(head) => Ok(head),
            Head::Ended => Err(MemoryError::not_found(format!("{} {}", T::LABEL, id))),
            // closed by an update that has not linked its successor yet
            Head::Unlinked => Err(MemoryError::concurrent(id.to_string())),
        }
    }

    /// The active version of the chain that `id` (any version) belongs to.
    /// `None` once the chain was deleted or invalidated.
    pub async fn find_current(&self, id: &EntityId) -> Result<Option<T>> {
        Ok(match self.walk_to_head(id).await? {
            Head::Active(head) => Some(head),
            Head::Ended | Head::Unlinked => None,
        })
    }

    /// Id of the active version for the chain holding the stored version
    /// `id`, memoised in `seen`. Edges stay on the version they were written
    /// against, so readers map their endpoints through this.
    pub async fn current_id(
        &self,
        id: &str,
        seen: &mut HashMap<String, Option<String>>,
    ) -> Result<Option<String>> {
        if let Some(hit) = seen.get(id) {
            return Ok(hit.clone());
        }
        let current = match id.parse::<EntityId>() {
            Ok(parsed) => self.find_current(&parsed).await?.map(|head| head.id().to_string()),
            Err(_) => {
                log::debug!("Skipping malformed {} id {}", T::LABEL, id);
                None
            }
        };
        seen.insert(id.to_string(), current.clone());
        Ok(current)
    }

    /// Soft delete: close the active row with no successor.
    ///
    /// Only an open row is closed; losing to a concurrent update reports
    /// `NotFound` for the superseded version.
    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        if self.find_by_id(id).await?.is_none() {
            return Err(MemoryError::not_found(format!("{} {}", T::LABEL, id)));
        }
        let now = self.clock.now();
        let closed = self
            .executor
            .set_properties(
                T::LABEL,
                &[id_is(id), open_tt()],
                to_properties(&json!({ "tt_end": now, DELETED_AT: now }))?,
            )
            .await?;
        if closed == 0 {
            return Err(MemoryError::not_found(format!("{} {}", T::LABEL, id)));
        }
        log::debug!("Deleted {} {}", T::LABEL, id);
        Ok(())
    }

    /// Versions with an open `REPLACES` edge into `id`
    pub async fn find_replacements(&self, id: &EntityId) -> Result<Vec<T>> {
        let pattern = EdgePattern::of_type(REPLACES)
            .from_label(T::LABEL)
            .to_label(T::LABEL)
            .to_id(id.to_string())
            .with(open_tt());
        let edges = self.executor.match_edges(&pattern).await?;

        let mut replacements = Vec::with_capacity(edges.len());
        for edge in edges {
            let rows = self
                .executor
                .match_nodes(T::LABEL, &[Predicate::eq("id", edge.from.id.as_str())])
                .await?;
            replacements.extend(Self::decode(rows));
        }
        Ok(replacements)
    }

    /// The version `id` followed by every version it supersedes, newest first
    pub async fn history(&self, id: &EntityId) -> Result<Vec<T>> {
        let start = self
            .find_version(id)
            .await?
            .ok_or_else(|| MemoryError::not_found(format!("{} {}", T::LABEL, id)))?;

        let mut seen = HashSet::from([start.id()]);
        let mut chain = vec![start];
        while chain.len() < MAX_CHAIN_WALK {
            let tail = &chain[chain.len() - 1];
            let pattern = EdgePattern::of_type(REPLACES)
                .from_label(T::LABEL)
                .from_id(tail.id().to_string())
                .to_label(T::LABEL);
            let edges = self.executor.match_edges(&pattern).await?;

            // The prior version was closed at the instant this one opened.
            // Other outgoing REPLACES edges point at memories invalidated in
            // favour of this version and are not part of its chain.
            let mut prior = None;
            for edge in edges {
                let candidate: EntityId = edge.to.id.parse()?;
                if let Some(version) = self.find_version(&candidate).await? {
                    if version.temporal().tt_end == tail.temporal().tt_start {
                        prior = Some(version);
                        break;
                    }
                }
            }
            let Some(prior) = prior else {
                break;
            };
            if !seen.insert(prior.id()) {
                log::error!("Cycle in {} history at {}", T::LABEL, prior.id());
                break;
            }
            chain.push(prior);
        }
        Ok(chain)
    }

    /// In-place write of non-versioned fields on the active row.
    /// Returns whether a row was written.
    pub async fn set_in_place(&self, id: &EntityId, set: Properties) -> Result<bool> {
        let affected = self
            .executor
            .set_properties(T::LABEL, &[id_is(id), open_tt()], set)
            .await?;
        Ok(affected > 0)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TestGraph;
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::entities::{Entity, EntityDraft, EntityPatch};
    use crate::graph::InMemoryGraph;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    fn draft(name: &str) -> EntityDraft {
        EntityDraft::new("proj", name, "module")
    }

    fn store_on(graph: Arc<dyn GraphExecutor>) -> VersionedStore<Entity> {
        VersionedStore::new(graph, Arc::new(SystemClock::new()))
    }

    fn described(text: &str) -> EntityPatch {
        EntityPatch {
            description: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_opens_windows() {
        let clock = Arc::new(ManualClock::new(Timestamp(1_000)));
        let store: VersionedStore<Entity> = VersionedStore::new(Arc::new(InMemoryGraph::new()), clock);

        let e = store.create(draft("parser"), None).await.unwrap();
        assert_eq!(e.temporal.vt_start, Timestamp(1_001));
        assert_eq!(e.temporal.tt_start, Timestamp(1_001));
        assert!(e.temporal.vt_end.is_open());
        assert!(e.temporal.tt_end.is_open());

        let backdated = store
            .create(draft("lexer"), Some(Timestamp(10)))
            .await
            .unwrap();
        assert_eq!(backdated.temporal.vt_start, Timestamp(10));
        assert_eq!(backdated.temporal.tt_start, Timestamp(1_002));

        assert_eq!(store.find_by_id(&e.id).await.unwrap().unwrap().name, "parser");
    }

    #[tokio::test]
    async fn test_find_by_id_absent_is_none() {
        let store = store_on(Arc::new(InMemoryGraph::new()));
        assert!(store.find_by_id(&EntityId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_closes_old_and_links() {
        let graph = Arc::new(InMemoryGraph::new());
        let store = store_on(graph.clone());

        let v1 = store.create(draft("parser"), None).await.unwrap();
        let v2 = store.update(&v1.id, &described("tokenizes input")).await.unwrap();

        assert_ne!(v1.id, v2.id);
        assert_eq!(v2.name, "parser");
        assert_eq!(v2.description, "tokenizes input");
        assert!(v2.temporal.tt_start > v1.temporal.tt_start);

        let old = store.find_version(&v1.id).await.unwrap().unwrap();
        assert_eq!(old.temporal.tt_end, v2.temporal.tt_start);
        assert!(store.find_by_id(&v1.id).await.unwrap().is_none());

        let edges = graph
            .match_edges(&EdgePattern::of_type(REPLACES))
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from.id, v2.id.to_string());
        assert_eq!(edges[0].to.id, v1.id.to_string());
        assert_eq!(edges[0].properties["tt_start"], v2.temporal.tt_start.as_millis());
        assert_eq!(edges[0].properties["tt_end"], MAX_DATE.as_millis());

        let active = store.find_active(&[]).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, v2.id);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = store_on(Arc::new(InMemoryGraph::new()));
        let err = store
            .update(&EntityId::new(), &described("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_chain_integrity() {
        let graph = Arc::new(InMemoryGraph::new());
        let store = store_on(graph.clone());

        let original = store.create(draft("cache"), None).await.unwrap();
        let mut head = original.clone();
        for i in 0..4 {
            head = store
                .update(&head.id, &described(&format!("rev {}", i)))
                .await
                .unwrap();
        }

        assert_eq!(graph.edge_count(REPLACES), 4);
        let chain = store.history(&head.id).await.unwrap();
        assert_eq!(chain.len(), 5);
        assert_eq!(chain[0].id, head.id);
        assert_eq!(chain[4].id, original.id);

        let ids: HashSet<EntityId> = chain.iter().map(|v| v.id).collect();
        assert_eq!(ids.len(), 5);
        for pair in chain.windows(2) {
            assert!(pair[0].temporal.tt_start > pair[1].temporal.tt_start);
            assert_eq!(pair[1].temporal.tt_end, pair[0].temporal.tt_start);
        }
        assert_eq!(chain.iter().filter(|v| v.temporal.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn test_find_at() {
        let clock = Arc::new(ManualClock::new(Timestamp(1_000)).with_step(10));
        let store: VersionedStore<Entity> =
            VersionedStore::new(Arc::new(InMemoryGraph::new()), clock.clone());

        let v1 = store.create(draft("index"), None).await.unwrap(); // t=1010
        let v2 = store.update(&v1.id, &described("btree")).await.unwrap(); // t=1020

        // v1 was the recorded state between 1010 and 1020
        assert!(store
            .find_at(&v1.id, AsOf::recorded_at(Timestamp(1_015)))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_at(&v1.id, AsOf::recorded_at(Timestamp(1_020)))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_at(&v1.id, AsOf::current())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_at(&v2.id, AsOf::current())
            .await
            .unwrap()
            .is_some());

        // valid time of v2 starts at its update
        assert!(store
            .find_at(&v2.id, AsOf::valid_at(Timestamp(1_019)))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_at(&v2.id, AsOf::valid_at(Timestamp(1_020)))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_concurrent_updates_both_land_on_one_chain() {
        let graph = Arc::new(TestGraph {
            yield_ops: true,
            ..Default::default()
        });
        let store = store_on(graph.clone());
        let v1 = store.create(draft("scheduler"), None).await.unwrap();

        let a = described("from writer a");
        let b = EntityPatch {
            kind: Some("service".into()),
            ..Default::default()
        };
        let (ra, rb) = tokio::join!(store.update(&v1.id, &a), store.update(&v1.id, &b));
        let ra = ra.unwrap();
        let rb = rb.unwrap();
        assert_ne!(ra.id, rb.id);

        let active = store.find_active(&[]).await.unwrap();
        assert_eq!(active.len(), 1);
        let head = &active[0];
        // the retried patch was applied on top of the winner
        assert_eq!(head.description, "from writer a");
        assert_eq!(head.kind, "service");

        assert_eq!(graph.inner.edge_count(REPLACES), 2);
        let chain = store.history(&head.id).await.unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2].id, v1.id);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let graph = Arc::new(TestGraph {
            always_conflict: true,
            ..Default::default()
        });
        let store = store_on(graph.clone());
        let v1 = store.create(draft("flaky"), None).await.unwrap();

        let started = Instant::now();
        let err = store.update(&v1.id, &described("never")).await.unwrap_err();
        match err {
            MemoryError::ConcurrencyExhausted {
                id,
                attempts,
                last_error,
            } => {
                assert_eq!(id, v1.id.to_string());
                assert_eq!(attempts, 3);
                assert!(last_error.contains("Concurrent modification"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(graph.set_calls.load(Ordering::SeqCst), 3);
        // 10ms + 20ms between the three attempts
        assert!(started.elapsed().as_millis() >= 30);
        assert_eq!(graph.inner.node_count(Entity::LABEL), 1);
    }

    #[tokio::test]
    async fn test_storage_errors_not_retried() {
        let graph = Arc::new(TestGraph {
            fail_set: true,
            ..Default::default()
        });
        let store = store_on(graph.clone());
        let v1 = store.create(draft("disk"), None).await.unwrap();

        let err = store.update(&v1.id, &described("x")).await.unwrap_err();
        assert!(matches!(err, MemoryError::Storage(_)));
        assert_eq!(graph.set_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store_on(Arc::new(InMemoryGraph::new()));
        let v1 = store.create(draft("legacy"), None).await.unwrap();

        store.delete(&v1.id).await.unwrap();
        assert!(store.find_by_id(&v1.id).await.unwrap().is_none());
        let closed = store.find_version(&v1.id).await.unwrap().unwrap();
        assert!(!closed.temporal.is_active());
        assert!(closed.temporal.is_well_formed());

        assert!(matches!(
            store.delete(&v1.id).await,
            Err(MemoryError::NotFound(_))
        ));
        assert!(matches!(
            store.update(&v1.id, &described("x")).await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_losing_to_delete_is_not_found() {
        let graph = Arc::new(TestGraph::default());
        let store = store_on(graph.clone());
        let v1 = store.create(draft("session_cache"), None).await.unwrap();

        let racer = store.clone();
        let id = v1.id;
        *graph.before_set.lock() = Some(Box::pin(async move {
            racer.delete(&id).await.unwrap();
        }));

        let err = store.update(&v1.id, &described("x")).await.unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)), "{err}");
        assert!(store.find_active(&[]).await.unwrap().is_empty());
        assert_eq!(graph.inner.node_count(Entity::LABEL), 1);
    }

    #[tokio::test]
    async fn test_unlinked_close_stays_retryable() {
        let graph = Arc::new(TestGraph::default());
        let store = store_on(graph.clone());
        let v1 = store.create(draft("planner"), None).await.unwrap();

        // a competing update that closed v1 but never linked a successor
        let racer = graph.clone();
        let id = v1.id;
        *graph.before_set.lock() = Some(Box::pin(async move {
            racer
                .inner
                .set_properties(
                    Entity::LABEL,
                    &[id_is(&id), open_tt()],
                    to_properties(&json!({ "tt_end": 5 })).unwrap(),
                )
                .await
                .unwrap();
        }));

        let err = store.update(&v1.id, &described("x")).await.unwrap_err();
        assert!(
            matches!(err, MemoryError::ConcurrencyExhausted { attempts: 3, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_find_current_follows_chain() {
        let store = store_on(Arc::new(InMemoryGraph::new()));
        let v1 = store.create(draft("router"), None).await.unwrap();
        let v2 = store.update(&v1.id, &described("one")).await.unwrap();
        let v3 = store.update(&v2.id, &described("two")).await.unwrap();

        assert_eq!(store.find_current(&v1.id).await.unwrap().unwrap().id, v3.id);
        assert_eq!(store.find_current(&v3.id).await.unwrap().unwrap().id, v3.id);
        assert!(store.find_current(&EntityId::new()).await.unwrap().is_none());

        store.delete(&v3.id).await.unwrap();
        assert!(store.find_current(&v1.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_batch_is_best_effort() {
        let graph = Arc::new(TestGraph {
            fail_create_on: Some(2),
            ..Default::default()
        });
        let store = store_on(graph.clone());

        let results = store
            .create_batch(vec![draft("a"), draft("b"), draft("c")], None)
            .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(store.find_active(&[]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped() {
        let graph = Arc::new(InMemoryGraph::new());
        let store = store_on(graph.clone());
        store.create(draft("good"), None).await.unwrap();
        graph
            .create_node(
                Entity::LABEL,
                to_properties(&json!({"id": "broken", "tt_end": MAX_DATE})).unwrap(),
            )
            .await
            .unwrap();

        let active = store.find_active(&[]).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "good");
    }
}
