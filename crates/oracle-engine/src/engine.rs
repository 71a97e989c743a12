use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use demand_core::catalog::{decision_key, decode_trusted_oracle, trusted_oracle_inner_data};
use demand_core::{Address, ArbiterRegistry, Attestation, Bytes, Demand, TxRef, Uid, B256};

use crate::feed::EventFeed;
use crate::filters::ArbitrateFilters;
use crate::ledger::{BlockRange, EventFilter, EventKind, EventPayload, Ledger, LedgerCall, LedgerEvent};
use crate::transport::{Delivery, DEFAULT_POLLING_INTERVAL};
use crate::{OracleError, Result};

// ─── Records ──────────────────────────────────────────────────────────────

/// A recorded ask for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbitrationRequest {
    pub obligation: Uid,
    pub oracle: Address,
    pub demand: Bytes,
    pub block_number: u64,
    pub log_index: u64,
}

impl ArbitrationRequest {
    pub fn from_event(event: &LedgerEvent) -> Option<Self> {
        match &event.payload {
            EventPayload::ArbitrationRequested {
                obligation,
                oracle,
                demand,
            } => Some(ArbitrationRequest {
                obligation: *obligation,
                oracle: *oracle,
                demand: demand.clone(),
                block_number: event.block_number,
                log_index: event.log_index,
            }),
            _ => None,
        }
    }
}

/// A recorded answer. `decision_key` ties it to the demand it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArbitrationDecision {
    pub decision_key: B256,
    pub obligation: Uid,
    pub oracle: Address,
    pub decision: bool,
}

impl ArbitrationDecision {
    pub fn from_event(event: &LedgerEvent) -> Option<Self> {
        match event.payload {
            EventPayload::ArbitrationMade {
                decision_key,
                obligation,
                oracle,
                decision,
            } => Some(ArbitrationDecision {
                decision_key,
                obligation,
                oracle,
                decision,
            }),
            _ => None,
        }
    }
}

/// A decision this engine submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub tx: TxRef,
    pub attestation: Attestation,
    pub decision: bool,
}

/// An obligation awaiting this oracle, with the demand from its request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingObligation {
    pub attestation: Attestation,
    pub demand: Bytes,
    pub request: ArbitrationRequest,
}

// ─── Batch reports ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Submitted { decision: Decision },
    /// `decide` returned `None`.
    Abstained,
    AlreadyArbitrated { decision: bool },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub obligation: Uid,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    pub fn decisions(&self) -> impl Iterator<Item = &Decision> {
        self.items.iter().filter_map(|item| match &item.outcome {
            ItemOutcome::Submitted { decision } => Some(decision),
            _ => None,
        })
    }

    pub fn into_decisions(self) -> Vec<Decision> {
        self.items
            .into_iter()
            .filter_map(|item| match item.outcome {
                ItemOutcome::Submitted { decision } => Some(decision),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    pub fn abstained(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Abstained))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::AlreadyArbitrated { .. }))
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.outcome)).count()
    }
}

// ─── Watch handles ────────────────────────────────────────────────────────

/// Controls a live listening loop.
///
/// `unwatch` stops further deliveries; a handler already running finishes
/// first. Dropping the handle detaches the loop, which then runs until its
/// feed ends.
pub struct WatchHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn unwatch(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "listen loop panicked");
        }
    }
}

struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    fn pair() -> (watch::Sender<bool>, StopSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, StopSignal { rx })
    }

    /// Resolves once `unwatch` was called. Never resolves after the handle
    /// was dropped without it.
    async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Runs after each successful live submission of [`OracleEngine::listen_and_arbitrate`].
pub type AfterArbitrate = Arc<dyn Fn(Decision) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ListenOptions {
    pub filters: ArbitrateFilters,
    pub on_after_arbitrate: Option<AfterArbitrate>,
    /// Polling override for pull-only transports.
    pub interval: Option<Duration>,
}

impl ListenOptions {
    pub fn new(filters: ArbitrateFilters) -> Self {
        ListenOptions {
            filters,
            ..Default::default()
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn on_after_arbitrate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Decision) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: AfterArbitrate = Arc::new(move |d: Decision| -> BoxFuture<'static, ()> {
            Box::pin(hook(d))
        });
        self.on_after_arbitrate = Some(hook);
        self
    }
}

pub struct ListenOutcome {
    /// Decisions submitted by the catch-up pass.
    pub decisions: Vec<Decision>,
    pub watch: WatchHandle,
}

// ─── OracleEngine ─────────────────────────────────────────────────────────

/// Discovers, decides and tracks arbitration requests for one oracle.
///
/// The oracle identity is the ledger account; `arbiter` is the trusted oracle
/// arbiter contract requests and decisions are recorded on. Delivery (push or
/// poll) is detected once, at construction.
pub struct OracleEngine<L: ?Sized> {
    ledger: Arc<L>,
    arbiter: Address,
    oracle: Address,
    registry: Arc<ArbiterRegistry>,
    delivery: Delivery,
}

impl<L: ?Sized> Clone for OracleEngine<L> {
    fn clone(&self) -> Self {
        OracleEngine {
            ledger: Arc::clone(&self.ledger),
            arbiter: self.arbiter,
            oracle: self.oracle,
            registry: Arc::clone(&self.registry),
            delivery: self.delivery,
        }
    }
}

impl<L> OracleEngine<L>
where
    L: Ledger + ?Sized + 'static,
{
    pub fn new(ledger: Arc<L>, arbiter: Address) -> Self {
        let oracle = ledger.account();
        let delivery = Delivery::detect(ledger.transport(), DEFAULT_POLLING_INTERVAL);
        tracing::debug!(oracle = %oracle, arbiter = %arbiter, ?delivery, "oracle engine ready");
        OracleEngine {
            ledger,
            arbiter,
            oracle,
            registry: Arc::new(ArbiterRegistry::new()),
            delivery,
        }
    }

    /// Registry used to resolve escrow demands.
    pub fn with_registry(mut self, registry: ArbiterRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Default cadence on pull-only transports.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.delivery = Delivery::detect(self.ledger.transport(), interval);
        self
    }

    pub fn oracle(&self) -> Address {
        self.oracle
    }

    pub fn arbiter(&self) -> Address {
        self.arbiter
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    pub fn registry(&self) -> &ArbiterRegistry {
        &self.registry
    }

    // ─── Writes ───────────────────────────────────────────────────────────

    pub async fn request_arbitration(
        &self,
        obligation: Uid,
        oracle: Address,
        demand: impl Into<Bytes>,
    ) -> Result<TxRef> {
        let call = LedgerCall::RequestArbitration {
            obligation,
            oracle,
            demand: demand.into(),
        };
        let tx = self.ledger.write_state(self.arbiter, call).await?;
        tracing::info!(obligation = %obligation, oracle = %oracle, tx = %tx, "arbitration requested");
        Ok(tx)
    }

    /// Submit a decision as this oracle. `demand` is the payload the escrow's
    /// TrustedOracle demand hands to the oracle.
    pub async fn arbitrate(
        &self,
        obligation: Uid,
        demand: impl Into<Bytes>,
        decision: bool,
    ) -> Result<TxRef> {
        let call = LedgerCall::Arbitrate {
            obligation,
            demand: demand.into(),
            decision,
        };
        let tx = self.ledger.write_state(self.arbiter, call).await?;
        tracing::info!(obligation = %obligation, decision, tx = %tx, "arbitration submitted");
        Ok(tx)
    }

    // ─── Reads ────────────────────────────────────────────────────────────

    fn made_filter(&self, obligation: Uid, oracle: Address) -> EventFilter {
        EventFilter::new(self.arbiter, EventKind::ArbitrationMade)
            .obligation(obligation)
            .oracle(oracle)
    }

    fn requested_filter(&self, oracle: Address) -> EventFilter {
        EventFilter::new(self.arbiter, EventKind::ArbitrationRequested).oracle(oracle)
    }

    async fn history(&self, filter: &EventFilter) -> Result<Vec<LedgerEvent>> {
        let head = self.ledger.block_number().await?;
        let mut events = self
            .ledger
            .get_past_events(filter, BlockRange::up_to(head))
            .await?;
        events.sort_by_key(LedgerEvent::position);
        Ok(events)
    }

    fn decision_filter(&self, obligation: Uid, oracle: Address, key: Option<B256>) -> EventFilter {
        let filter = self.made_filter(obligation, oracle);
        match key {
            Some(key) => filter.decision_key(key),
            None => filter,
        }
    }

    /// The decision `oracle` recorded for `obligation`, if any, whatever
    /// demand it answered. A later decision supersedes an earlier one.
    pub async fn check_existing_arbitration(
        &self,
        obligation: Uid,
        oracle: Address,
    ) -> Result<Option<ArbitrationDecision>> {
        self.existing_decision(obligation, oracle, None).await
    }

    /// The decision `oracle` recorded for `obligation` answering `demand`
    /// (the inner data it was asked about), if any.
    pub async fn check_existing_arbitration_for(
        &self,
        obligation: Uid,
        oracle: Address,
        demand: &[u8],
    ) -> Result<Option<ArbitrationDecision>> {
        let key = decision_key(obligation, demand);
        self.existing_decision(obligation, oracle, Some(key)).await
    }

    async fn existing_decision(
        &self,
        obligation: Uid,
        oracle: Address,
        key: Option<B256>,
    ) -> Result<Option<ArbitrationDecision>> {
        let events = self.history(&self.decision_filter(obligation, oracle, key)).await?;
        Ok(events.iter().rev().find_map(ArbitrationDecision::from_event))
    }

    /// Fetch an obligation, failing if it is not of `expected_schema`.
    pub async fn fetch_obligation(&self, uid: Uid, expected_schema: B256) -> Result<Attestation> {
        let attestation = self.ledger.get_attestation(uid).await?;
        if attestation.schema != expected_schema {
            return Err(OracleError::SchemaMismatch {
                uid,
                expected: expected_schema,
                actual: attestation.schema,
            });
        }
        Ok(attestation)
    }

    /// Whether the escrow `obligation` refers to demands a decision from this
    /// oracle anywhere in its demand tree.
    pub async fn escrow_demands_oracle(&self, obligation: &Attestation) -> Result<bool> {
        if !obligation.has_ref() {
            return Ok(false);
        }
        let escrow = self.ledger.get_attestation(obligation.ref_uid).await?;
        let demand = Demand::from_escrow_data(&escrow.data)?;
        let tree = self.registry.parse_demand(&demand)?;
        for node in tree.find(self.arbiter) {
            let (oracle, _) = decode_trusted_oracle(&node.demand_data)?;
            if oracle == self.oracle {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ─── Waits ────────────────────────────────────────────────────────────

    async fn open_feed(
        &self,
        filter: EventFilter,
        from_block: Option<u64>,
        interval: Option<Duration>,
    ) -> Result<EventFeed> {
        let delivery = self.delivery.with_interval(interval);
        Ok(EventFeed::open(Arc::clone(&self.ledger), filter, from_block, delivery).await?)
    }

    /// Suspend until `oracle` has decided `obligation`.
    ///
    /// Has no timeout of its own; wrap it in `tokio::time::timeout`.
    pub async fn wait_for_arbitration(
        &self,
        obligation: Uid,
        oracle: Address,
        interval: Option<Duration>,
    ) -> Result<ArbitrationDecision> {
        self.await_decision(obligation, oracle, None, interval).await
    }

    /// Suspend until `oracle` has decided `obligation` for `demand`.
    pub async fn wait_for_arbitration_for(
        &self,
        obligation: Uid,
        oracle: Address,
        demand: &[u8],
        interval: Option<Duration>,
    ) -> Result<ArbitrationDecision> {
        let key = decision_key(obligation, demand);
        self.await_decision(obligation, oracle, Some(key), interval).await
    }

    async fn await_decision(
        &self,
        obligation: Uid,
        oracle: Address,
        key: Option<B256>,
        interval: Option<Duration>,
    ) -> Result<ArbitrationDecision> {
        let filter = self.decision_filter(obligation, oracle, key);
        let mut feed = self.open_feed(filter, None, interval).await?;
        if let Some(existing) = self.existing_decision(obligation, oracle, key).await? {
            return Ok(existing);
        }
        while let Some(event) = feed.next().await {
            if let Some(decision) = ArbitrationDecision::from_event(&event?) {
                return Ok(decision);
            }
        }
        Err(OracleError::FeedClosed)
    }

    /// Suspend until arbitration of `obligation` by `oracle` has been requested.
    pub async fn wait_for_arbitration_request(
        &self,
        obligation: Uid,
        oracle: Address,
        interval: Option<Duration>,
    ) -> Result<ArbitrationRequest> {
        let filter = self.requested_filter(oracle).obligation(obligation);
        let mut feed = self.open_feed(filter.clone(), None, interval).await?;
        let past = self.history(&filter).await?;
        if let Some(request) = past.iter().find_map(ArbitrationRequest::from_event) {
            return Ok(request);
        }
        while let Some(event) = feed.next().await {
            if let Some(request) = ArbitrationRequest::from_event(&event?) {
                return Ok(request);
            }
        }
        Err(OracleError::FeedClosed)
    }

    // ─── Batch ────────────────────────────────────────────────────────────

    /// Obligations awaiting this oracle, from requests recorded in the
    /// filtered block range. One entry per obligation; its first request wins.
    pub async fn get_arbitration_requests(
        &self,
        filters: &ArbitrateFilters,
    ) -> Result<Vec<PendingObligation>> {
        let head = self.ledger.block_number().await?;
        let Some(range) = filters.block_range(head) else {
            return Ok(Vec::new());
        };
        let mut events = self
            .ledger
            .get_past_events(&self.requested_filter(self.oracle), range)
            .await?;
        events.sort_by_key(LedgerEvent::position);

        let now = unix_now();
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for request in events.iter().filter_map(ArbitrationRequest::from_event) {
            if !seen.insert(request.obligation) {
                continue;
            }
            let attestation = match self.ledger.get_attestation(request.obligation).await {
                Ok(attestation) => attestation,
                Err(e) => {
                    tracing::warn!(
                        obligation = %request.obligation,
                        error = %e,
                        "requested obligation unreadable, skipped"
                    );
                    continue;
                }
            };
            if !filters.admits(&attestation, now) {
                continue;
            }
            if filters.only_if_escrow_demands_current_oracle && !self.demanded_here(&attestation).await {
                continue;
            }
            pending.push(PendingObligation {
                attestation,
                demand: request.demand.clone(),
                request,
            });
        }

        if filters.prioritize_recent {
            pending.sort_by(|a, b| b.attestation.time.cmp(&a.attestation.time));
        }
        if let Some(max) = filters.max_obligations {
            pending.truncate(max);
        }
        tracing::debug!(
            from = range.from,
            to = range.to,
            pending = pending.len(),
            "arbitration requests collected"
        );
        Ok(pending)
    }

    /// `escrow_demands_oracle` for filtering: an unreadable escrow counts as
    /// not demanding this oracle.
    async fn demanded_here(&self, obligation: &Attestation) -> bool {
        match self.escrow_demands_oracle(obligation).await {
            Ok(demanded) => demanded,
            Err(e) => {
                tracing::warn!(obligation = %obligation.uid, error = %e, "escrow demand unreadable");
                false
            }
        }
    }

    /// Decide every pending obligation once and submit the answers.
    ///
    /// Returns only the decisions that were submitted; see
    /// [`Self::arbitrate_past_report`] for per-item outcomes.
    pub async fn arbitrate_past<F, Fut>(
        &self,
        decide: F,
        filters: &ArbitrateFilters,
    ) -> Result<Vec<Decision>>
    where
        F: Fn(&PendingObligation) -> Fut,
        Fut: Future<Output = Option<bool>>,
    {
        Ok(self
            .arbitrate_past_report(decide, filters)
            .await?
            .into_decisions())
    }

    /// Like [`Self::arbitrate_past`], reporting every item. A failed item is
    /// logged and recorded; the rest of the batch still runs.
    pub async fn arbitrate_past_report<F, Fut>(
        &self,
        decide: F,
        filters: &ArbitrateFilters,
    ) -> Result<BatchReport>
    where
        F: Fn(&PendingObligation) -> Fut,
        Fut: Future<Output = Option<bool>>,
    {
        let pending = self.get_arbitration_requests(filters).await?;
        let mut report = BatchReport::default();
        for item in &pending {
            let outcome = self
                .process(item, &decide, filters.skip_already_arbitrated)
                .await;
            if let ItemOutcome::Failed { error } = &outcome {
                tracing::warn!(obligation = %item.attestation.uid, error = %error, "arbitration failed");
            }
            report.items.push(ItemReport {
                obligation: item.attestation.uid,
                outcome,
            });
        }
        tracing::info!(
            items = report.items.len(),
            failed = report.failed(),
            abstained = report.abstained(),
            skipped = report.skipped(),
            "arbitration pass complete"
        );
        Ok(report)
    }

    async fn process<F, Fut>(&self, item: &PendingObligation, decide: &F, skip_existing: bool) -> ItemOutcome
    where
        F: Fn(&PendingObligation) -> Fut,
        Fut: Future<Output = Option<bool>>,
    {
        let uid = item.attestation.uid;
        let data = match trusted_oracle_inner_data(&item.demand) {
            Ok(data) => data,
            Err(e) => return ItemOutcome::Failed { error: e.to_string() },
        };
        if skip_existing {
            match self.check_existing_arbitration_for(uid, self.oracle, &data).await {
                Ok(Some(existing)) => {
                    tracing::debug!(obligation = %uid, "already arbitrated");
                    return ItemOutcome::AlreadyArbitrated {
                        decision: existing.decision,
                    };
                }
                Ok(None) => {}
                Err(e) => return ItemOutcome::Failed { error: e.to_string() },
            }
        }
        let Some(decision) = decide(item).await else {
            return ItemOutcome::Abstained;
        };
        match self.submit(item, data, decision).await {
            Ok(decision) => ItemOutcome::Submitted { decision },
            Err(e) => ItemOutcome::Failed { error: e.to_string() },
        }
    }

    async fn submit(&self, item: &PendingObligation, data: Bytes, decision: bool) -> Result<Decision> {
        let tx = self.arbitrate(item.attestation.uid, data, decision).await?;
        Ok(Decision {
            tx,
            attestation: item.attestation.clone(),
            decision,
        })
    }

    // ─── Live ─────────────────────────────────────────────────────────────

    /// Decide each new request for `oracle` with `handler`, in ledger order,
    /// until unwatched. Submission errors are logged and the loop goes on.
    pub async fn listen_for_arbitration_requests_only<H, Fut>(
        &self,
        oracle: Address,
        handler: H,
        interval: Option<Duration>,
    ) -> Result<WatchHandle>
    where
        H: Fn(&ArbitrationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut feed = self
            .open_feed(self.requested_filter(oracle), None, interval)
            .await?;
        let (stop, mut signal) = StopSignal::pair();
        let engine = self.clone();

        let task = tokio::spawn(async move {
            tracing::info!(oracle = %oracle, "listening for arbitration requests");
            loop {
                let event = tokio::select! {
                    biased;
                    _ = signal.stopped() => break,
                    event = feed.next() => event,
                };
                let Some(event) = event else { break };
                let request = match event {
                    Ok(event) => match ArbitrationRequest::from_event(&event) {
                        Some(request) => request,
                        None => continue,
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "change feed error");
                        continue;
                    }
                };
                let decision = handler(&request).await;
                let submitted = match trusted_oracle_inner_data(&request.demand) {
                    Ok(data) => engine.arbitrate(request.obligation, data, decision).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = submitted {
                    tracing::error!(obligation = %request.obligation, error = %e, "live arbitration failed");
                }
            }
            tracing::info!(oracle = %oracle, "stopped listening");
        });

        Ok(WatchHandle { stop, task })
    }

    /// Catch up on past requests, then keep deciding new ones.
    ///
    /// The live feed is opened first, from the block after the catch-up head,
    /// so requests recorded during catch-up are handled live exactly once.
    pub async fn listen_and_arbitrate<F, Fut>(
        &self,
        decide: F,
        options: ListenOptions,
    ) -> Result<ListenOutcome>
    where
        F: Fn(&PendingObligation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<bool>> + Send + 'static,
    {
        let ListenOptions {
            filters,
            on_after_arbitrate,
            interval,
        } = options;

        let head = self.ledger.block_number().await?;
        let mut feed = self
            .open_feed(self.requested_filter(self.oracle), Some(head + 1), interval)
            .await?;

        let mut catch_up = filters.clone();
        catch_up.to_block = Some(filters.to_block.map_or(head, |t| t.min(head)));
        let decisions = self.arbitrate_past(&decide, &catch_up).await?;

        let (stop, mut signal) = StopSignal::pair();
        let engine = self.clone();
        let task = tokio::spawn(async move {
            tracing::info!(oracle = %engine.oracle, from_block = head + 1, "live arbitration started");
            loop {
                let event = tokio::select! {
                    biased;
                    _ = signal.stopped() => break,
                    event = feed.next() => event,
                };
                let Some(event) = event else { break };
                let request = match event {
                    Ok(event) => match ArbitrationRequest::from_event(&event) {
                        Some(request) => request,
                        None => continue,
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "change feed error");
                        continue;
                    }
                };
                if let Some(decision) = engine.handle_live(request, &decide, &filters).await {
                    if let Some(hook) = &on_after_arbitrate {
                        hook(decision).await;
                    }
                }
            }
            tracing::info!(oracle = %engine.oracle, "live arbitration stopped");
        });

        Ok(ListenOutcome {
            decisions,
            watch: WatchHandle { stop, task },
        })
    }

    async fn handle_live<F, Fut>(
        &self,
        request: ArbitrationRequest,
        decide: &F,
        filters: &ArbitrateFilters,
    ) -> Option<Decision>
    where
        F: Fn(&PendingObligation) -> Fut,
        Fut: Future<Output = Option<bool>>,
    {
        let attestation = match self.ledger.get_attestation(request.obligation).await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(obligation = %request.obligation, error = %e, "obligation unreadable");
                return None;
            }
        };
        if !filters.admits(&attestation, unix_now()) {
            tracing::debug!(obligation = %request.obligation, "filtered out");
            return None;
        }
        if filters.only_if_escrow_demands_current_oracle && !self.demanded_here(&attestation).await {
            return None;
        }
        let item = PendingObligation {
            attestation,
            demand: request.demand.clone(),
            request,
        };
        match self
            .process(&item, decide, filters.skip_already_arbitrated)
            .await
        {
            ItemOutcome::Submitted { decision } => Some(decision),
            ItemOutcome::Failed { error } => {
                tracing::error!(obligation = %item.attestation.uid, error = %error, "live arbitration failed");
                None
            }
            _ => None,
        }
    }
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// ─── Tests ────────────────────────────────────────────────────────────────
