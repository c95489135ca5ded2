//! Test controllers.
//!
//! [`AdaptiveTest`] drives a caller-owned [`Session`] against a synchronous
//! item bank. [`AsyncAdaptiveTest`] runs the same flow against an
//! [`AsyncItemBank`] and a [`SessionStore`], doing load → mutate → save with
//! optimistic versioning so concurrent writers never overwrite each other.

use std::sync::Arc;

use crate::config::AdaptestConfig;
use crate::error::CatError;
use crate::model::{ItemParams, TerminationReason};
use crate::selection::{ItemSelector, RankedItem, Selection, SelectionConfig};
use crate::session::{AbilityUpdate, Restored, Session, SessionDefaults};
use crate::termination::{StandardTermination, TerminationPolicy};
use crate::traits::{AsyncItemBank, CandidateFilter, ItemBank, SessionStore};

/// What the controller should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Present this item.
    Administer(RankedItem),
    /// The session is over.
    Finished(TerminationReason),
}

impl NextStep {
    pub fn item(&self) -> Option<&ItemParams> {
        match self {
            NextStep::Administer(ranked) => Some(&ranked.item),
            NextStep::Finished(_) => None,
        }
    }
}

/// Stop check shared by both controllers. Terminates the session when the
/// policy says so.
fn check_stop(session: &mut Session, policy: &dyn TerminationPolicy) -> Option<TerminationReason> {
    let decision = session.check_termination(policy);
    if decision.stop {
        Some(decision.reason.unwrap_or(TerminationReason::ManualStop))
    } else {
        None
    }
}

/// Select the next item and remember it on the session. The flag reports
/// whether the session changed.
fn choose(
    selector: &ItemSelector,
    session: &mut Session,
    candidates: &[ItemParams],
) -> Result<(NextStep, bool), CatError> {
    match selector.select(session.theta(), candidates, session.history()) {
        Selection::Next(ranked) => {
            let changed = session.set_pending_item(&ranked.item)?;
            Ok((NextStep::Administer(ranked), changed))
        }
        Selection::Exhausted => {
            tracing::info!(session = %session.session_id(), "item pool exhausted");
            session.mark_pool_exhausted()?;
            Ok((NextStep::Finished(TerminationReason::PoolExhausted), true))
        }
    }
}

// ---------------------------------------------------------------------------
// Synchronous controller
// ---------------------------------------------------------------------------

/// Synchronous controller over a borrowed item bank.
pub struct AdaptiveTest<'a> {
    bank: &'a dyn ItemBank,
    selector: ItemSelector,
    policy: Box<dyn TerminationPolicy>,
    filter: CandidateFilter,
}

impl<'a> AdaptiveTest<'a> {
    /// Controller with plain maximum-information selection and the standard
    /// stopping rule.
    pub fn new(bank: &'a dyn ItemBank) -> Self {
        Self {
            bank,
            selector: ItemSelector::new(SelectionConfig::default()),
            policy: Box::new(StandardTermination),
            filter: CandidateFilter::default(),
        }
    }

    /// Controller with the selector and stopping rule described by `config`.
    pub fn from_config(bank: &'a dyn ItemBank, config: &AdaptestConfig, seed: u64) -> Self {
        Self {
            bank,
            selector: config.selector(seed),
            policy: config.termination_policy(),
            filter: CandidateFilter::default(),
        }
    }

    pub fn with_selector(mut self, selector: ItemSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_policy(mut self, policy: impl TerminationPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_filter(mut self, filter: CandidateFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Decide the next step, terminating the session on a policy stop or an
    /// exhausted pool.
    pub fn next_item(&self, session: &mut Session) -> Result<NextStep, CatError> {
        if let Some(reason) = check_stop(session, self.policy.as_ref()) {
            return Ok(NextStep::Finished(reason));
        }
        let candidates = self
            .bank
            .candidates(&session.administered_ids(), &self.filter);
        let (step, _) = choose(&self.selector, session, &candidates)?;
        Ok(step)
    }

    /// Record a response to an administered item.
    pub fn submit(
        &self,
        session: &mut Session,
        item: &ItemParams,
        correct: bool,
    ) -> Result<AbilityUpdate, CatError> {
        session.record_attempt(item, correct)
    }

    /// Administer items until the session finishes, asking `respond` for
    /// each answer.
    pub fn run(
        &self,
        session: &mut Session,
        mut respond: impl FnMut(&ItemParams) -> bool,
    ) -> Result<TerminationReason, CatError> {
        loop {
            match self.next_item(session)? {
                NextStep::Administer(ranked) => {
                    let correct = respond(&ranked.item);
                    self.submit(session, &ranked.item, correct)?;
                }
                NextStep::Finished(reason) => return Ok(reason),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Asynchronous controller
// ---------------------------------------------------------------------------

/// Controller over an async item bank and a versioned session store.
pub struct AsyncAdaptiveTest {
    bank: Arc<dyn AsyncItemBank>,
    store: Arc<dyn SessionStore>,
    selector: ItemSelector,
    policy: Box<dyn TerminationPolicy>,
    filter: CandidateFilter,
    defaults: SessionDefaults,
}

/// A session loaded from the store with the version it was read at.
struct Loaded {
    session: Session,
    version: Option<u64>,
    fresh: bool,
}

impl AsyncAdaptiveTest {
    pub fn new(bank: Arc<dyn AsyncItemBank>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            bank,
            store,
            selector: ItemSelector::new(SelectionConfig::default()),
            policy: Box::new(StandardTermination),
            filter: CandidateFilter::default(),
            defaults: SessionDefaults::default(),
        }
    }

    pub fn from_config(
        bank: Arc<dyn AsyncItemBank>,
        store: Arc<dyn SessionStore>,
        config: &AdaptestConfig,
        seed: u64,
    ) -> Self {
        Self {
            bank,
            store,
            selector: config.selector(seed),
            policy: config.termination_policy(),
            filter: CandidateFilter::default(),
            defaults: config.session_defaults(),
        }
    }

    pub fn with_selector(mut self, selector: ItemSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_policy(mut self, policy: impl TerminationPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_filter(mut self, filter: CandidateFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_defaults(mut self, defaults: SessionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Create and store a new session.
    pub async fn start(&self, session_id: Option<&str>) -> Result<Session, CatError> {
        let mut builder = Session::builder_from(self.defaults);
        if let Some(id) = session_id {
            builder = builder.session_id(id);
        }
        let session = builder.build()?;
        self.store
            .save(session.session_id(), session.serialize()?, None)
            .await?;
        tracing::debug!(session = %session.session_id(), store = self.store.name(), "session started");
        Ok(session)
    }

    /// Read a session without changing it.
    pub async fn session(&self, session_id: &str) -> Result<Session, CatError> {
        match self.store.load(session_id).await? {
            Some(stored) => Session::deserialize(stored.blob),
            None => Err(CatError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Decide the next step for a stored session.
    ///
    /// A missing or unreadable blob is replaced by a fresh session.
    pub async fn next_item(&self, session_id: &str) -> Result<NextStep, CatError> {
        let Loaded {
            mut session,
            version,
            fresh,
        } = self.load_or_create(session_id).await?;

        let was_active = session.is_active();
        let (step, changed) = match check_stop(&mut session, self.policy.as_ref()) {
            Some(reason) => (NextStep::Finished(reason), was_active),
            None => {
                let candidates = self
                    .bank
                    .candidates(&session.administered_ids(), &self.filter)
                    .await
                    .map_err(|e| CatError::ItemBank(format!("{e:#}")))?;
                choose(&self.selector, &mut session, &candidates)?
            }
        };

        if fresh || changed {
            self.store
                .save(session_id, session.serialize()?, version)
                .await?;
        }
        Ok(step)
    }

    /// Record a response.
    ///
    /// The pending item snapshot taken by [`next_item`](Self::next_item) is
    /// recorded when the ids match; any other item is looked up in the bank.
    pub async fn submit(
        &self,
        session_id: &str,
        item_id: &str,
        correct: bool,
    ) -> Result<AbilityUpdate, CatError> {
        let Some(stored) = self.store.load(session_id).await? else {
            return Err(CatError::SessionNotFound(session_id.to_string()));
        };
        let mut session = Session::deserialize(stored.blob)?;
        let item = match session.pending_item() {
            Some(pending) if pending.id == item_id => pending.clone(),
            _ => self
                .bank
                .get(item_id)
                .await
                .map_err(|e| CatError::ItemBank(format!("{e:#}")))?
                .ok_or_else(|| CatError::UnknownItem(item_id.to_string()))?,
        };

        let update = session.record_attempt(&item, correct)?;
        self.store
            .save(session_id, session.serialize()?, Some(stored.version))
            .await?;
        Ok(update)
    }

    /// Stop a stored session explicitly.
    pub async fn stop(&self, session_id: &str) -> Result<Session, CatError> {
        let Some(stored) = self.store.load(session_id).await? else {
            return Err(CatError::SessionNotFound(session_id.to_string()));
        };
        let mut session = Session::deserialize(stored.blob)?;
        session.stop_manually()?;
        self.store
            .save(session_id, session.serialize()?, Some(stored.version))
            .await?;
        Ok(session)
    }

    async fn load_or_create(&self, session_id: &str) -> Result<Loaded, CatError> {
        let stored = match self.store.load(session_id).await {
            Ok(stored) => stored,
            Err(CatError::Decode(e)) => {
                tracing::warn!(
                    session = %session_id,
                    store = self.store.name(),
                    error = %e,
                    "stored entry is unreadable, discarding it"
                );
                self.store.delete(session_id).await?;
                None
            }
            Err(e) => return Err(e),
        };
        let version = stored.as_ref().map(|s| s.version);
        let (session, restored) =
            Session::restore_or_create(session_id, stored.map(|s| s.blob), &self.defaults)?;
        let fresh = matches!(restored, Restored::Fresh { .. });
        Ok(Loaded {
            session,
            version,
            fresh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::bank::InMemoryItemBank;
    use crate::model::{EstimationMethod, SessionStatus};
    use crate::termination::MinimumItems;
    use crate::traits::StoredSession;

    fn items() -> Vec<ItemParams> {
        (0..12)
            .map(|k| ItemParams::new(format!("q{k:02}"), 1.4, -2.2 + 0.4 * k as f64, 0.15))
            .collect()
    }

    #[test]
    fn next_item_picks_informative_item() {
        let bank = InMemoryItemBank::new(items());
        let test = AdaptiveTest::new(&bank);
        let mut session = Session::create(0.0, EstimationMethod::Eap, 5, 0.1).unwrap();
        let step = test.next_item(&mut session).unwrap();
        let item = step.item().unwrap();
        assert!(item.b.abs() <= 0.4);
        assert!(session.is_active());
    }

    #[test]
    fn run_stops_at_max_items() {
        let bank = InMemoryItemBank::new(items());
        let test = AdaptiveTest::new(&bank);
        let mut session = Session::create(0.0, EstimationMethod::Map, 4, 0.01).unwrap();
        let reason = test.run(&mut session, |item| item.b < 0.5).unwrap();
        assert_eq!(reason, TerminationReason::MaxItemsReached);
        assert_eq!(session.attempt_count(), 4);
        assert_eq!(session.status(), SessionStatus::Terminated);
    }

    #[test]
    fn run_reports_pool_exhaustion() {
        let bank = InMemoryItemBank::new(items().into_iter().take(3).collect());
        let test = AdaptiveTest::new(&bank);
        let mut session = Session::create(0.0, EstimationMethod::Eap, 10, 0.01).unwrap();
        let reason = test.run(&mut session, |_| true).unwrap();
        assert_eq!(reason, TerminationReason::PoolExhausted);
        assert_eq!(session.attempt_count(), 3);
        assert_eq!(
            session.termination_reason(),
            Some(TerminationReason::PoolExhausted)
        );
    }

    #[test]
    fn finished_session_stays_finished() {
        let bank = InMemoryItemBank::new(items());
        let test = AdaptiveTest::new(&bank).with_policy(MinimumItems::new(2, StandardTermination));
        let mut session = Session::create(0.0, EstimationMethod::Eap, 1, 0.3).unwrap();
        test.run(&mut session, |_| false).unwrap();
        assert_eq!(
            test.next_item(&mut session).unwrap(),
            NextStep::Finished(TerminationReason::MaxItemsReached)
        );
    }

    /// Store kept in a mutex-guarded map, enough to exercise versioning.
    #[derive(Default)]
    struct MapStore {
        sessions: Mutex<HashMap<String, StoredSession>>,
    }

    #[async_trait]
    impl SessionStore for MapStore {
        fn name(&self) -> &str {
            "map"
        }

        async fn load(&self, session_id: &str) -> Result<Option<StoredSession>, CatError> {
            Ok(self.sessions.lock().unwrap().get(session_id).cloned())
        }

        async fn save(
            &self,
            session_id: &str,
            blob: Value,
            expected_version: Option<u64>,
        ) -> Result<u64, CatError> {
            let mut sessions = self.sessions.lock().unwrap();
            let found = sessions.get(session_id).map(|s| s.version);
            if found != expected_version {
                return Err(CatError::VersionConflict {
                    session_id: session_id.to_string(),
                    expected: expected_version,
                    found,
                });
            }
            let version = found.unwrap_or(0) + 1;
            sessions.insert(session_id.to_string(), StoredSession { version, blob });
            Ok(version)
        }

        async fn delete(&self, session_id: &str) -> Result<bool, CatError> {
            Ok(self.sessions.lock().unwrap().remove(session_id).is_some())
        }
    }

    fn async_test(store: Arc<MapStore>) -> AsyncAdaptiveTest {
        let bank: Arc<dyn AsyncItemBank> = Arc::new(InMemoryItemBank::new(items()));
        AsyncAdaptiveTest::new(bank, store).with_defaults(SessionDefaults {
            max_items: 3,
            target_se: 0.01,
            ..SessionDefaults::default()
        })
    }

    #[tokio::test]
    async fn async_flow_runs_to_completion() {
        let store = Arc::new(MapStore::default());
        let test = async_test(Arc::clone(&store));
        let session = test.start(Some("s-1")).await.unwrap();
        assert_eq!(session.session_id(), "s-1");

        let mut administered = 0;
        let reason = loop {
            match test.next_item("s-1").await.unwrap() {
                NextStep::Administer(ranked) => {
                    test.submit("s-1", &ranked.item.id, true).await.unwrap();
                    administered += 1;
                }
                NextStep::Finished(reason) => break reason,
            }
        };
        assert_eq!(reason, TerminationReason::MaxItemsReached);
        assert_eq!(administered, 3);

        let stored = test.session("s-1").await.unwrap();
        assert_eq!(stored.status(), SessionStatus::Terminated);
        assert!(stored.theta() > 0.0);
    }

    #[tokio::test]
    async fn async_submit_rejects_unknown_item_and_session() {
        let store = Arc::new(MapStore::default());
        let test = async_test(store);
        test.start(Some("s-2")).await.unwrap();
        assert!(matches!(
            test.submit("s-2", "nope", true).await,
            Err(CatError::UnknownItem(_))
        ));
        assert!(matches!(
            test.submit("missing", "q00", true).await,
            Err(CatError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn async_start_twice_conflicts() {
        let store = Arc::new(MapStore::default());
        let test = async_test(store);
        test.start(Some("dup")).await.unwrap();
        let err = test.start(Some("dup")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn async_next_item_replaces_corrupt_blob() {
        let store = Arc::new(MapStore::default());
        store.save("bad", Value::from("garbage"), None).await.unwrap();
        let test = async_test(Arc::clone(&store));
        let step = test.next_item("bad").await.unwrap();
        assert!(step.item().is_some());
        let replaced = test.session("bad").await.unwrap();
        assert!(replaced.history().is_empty());
        assert_eq!(store.load("bad").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn async_submit_records_item_as_administered() {
        let bank = Arc::new(InMemoryItemBank::new(items()));
        let store = Arc::new(MapStore::default());
        let test = AsyncAdaptiveTest::new(bank.clone(), store.clone());
        test.start(Some("s-4")).await.unwrap();

        let NextStep::Administer(ranked) = test.next_item("s-4").await.unwrap() else {
            panic!("expected an item");
        };
        assert_eq!(
            test.session("s-4").await.unwrap().pending_item(),
            Some(&ranked.item)
        );
        assert!(bank.recalibrate(&ranked.item.id, 0.5, 2.0, 0.0));

        test.submit("s-4", &ranked.item.id, true).await.unwrap();
        let session = test.session("s-4").await.unwrap();
        let recorded = &session.history()[0].item;
        assert_eq!((recorded.a, recorded.b), (ranked.item.a, ranked.item.b));
        assert!(session.pending_item().is_none());
    }

    #[tokio::test]
    async fn async_repeated_next_item_does_not_rewrite() {
        let store = Arc::new(MapStore::default());
        let test = async_test(Arc::clone(&store));
        test.start(Some("s-5")).await.unwrap();
        let first = test.next_item("s-5").await.unwrap();
        let version = store.load("s-5").await.unwrap().unwrap().version;
        assert_eq!(test.next_item("s-5").await.unwrap(), first);
        assert_eq!(store.load("s-5").await.unwrap().unwrap().version, version);
    }

    #[tokio::test]
    async fn async_stop_terminates() {
        let store = Arc::new(MapStore::default());
        let test = async_test(store);
        test.start(Some("s-3")).await.unwrap();
        let session = test.stop("s-3").await.unwrap();
        assert_eq!(session.termination_reason(), Some(TerminationReason::ManualStop));
        assert_eq!(
            test.next_item("s-3").await.unwrap(),
            NextStep::Finished(TerminationReason::ManualStop)
        );
    }
}
