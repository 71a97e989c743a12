use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use demand_core::catalog::trusted_oracle_demand;
use demand_core::{
    Address, ArbiterAddresses, ArbiterRegistry, Attestation, Bytes, Demand, TxRef, Uid, B256,
};
use oracle_engine::{
    ArbitrateFilters, ArbitrationRequest, BlockRange, Delivery, EventFilter, EventSubscription,
    InMemoryLedger, Ledger, LedgerCall, LedgerEvent, LedgerResult, ListenOptions, OracleEngine,
    PendingObligation, TransportKind,
};
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

const ARBITER: Address = Address::new([0xc0; 20]);
const ORACLE: Address = Address::new([0x0a; 20]);
const REQUESTER: Address = Address::new([0x0e; 20]);
const TICK: Duration = Duration::from_millis(10);
const PATIENCE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

fn ledger(transport: TransportKind) -> InMemoryLedger {
    init_tracing();
    InMemoryLedger::new(ORACLE, transport)
}

fn oracle(ledger: &InMemoryLedger) -> OracleEngine<InMemoryLedger> {
    OracleEngine::new(Arc::new(ledger.clone()), ARBITER).with_polling_interval(TICK)
}

fn requester(ledger: &InMemoryLedger) -> OracleEngine<InMemoryLedger> {
    OracleEngine::new(Arc::new(ledger.connect(REQUESTER)), ARBITER).with_polling_interval(TICK)
}

fn attestation(n: u8, ref_uid: Uid, data: Bytes) -> Attestation {
    Attestation {
        uid: Uid::repeat_byte(n),
        schema: B256::repeat_byte(0x5c),
        time: 0,
        expiration_time: 0,
        revocation_time: 0,
        ref_uid,
        recipient: REQUESTER,
        attester: REQUESTER,
        revocable: true,
        data,
    }
}

fn obligation(ledger: &InMemoryLedger, n: u8) -> Uid {
    ledger.attest(attestation(n, Uid::ZERO, Bytes::new()))
}

fn oracle_demand() -> Bytes {
    asking(b"is it done?")
}

fn asking(question: &[u8]) -> Bytes {
    trusted_oracle_demand(ORACLE, question.to_vec()).unwrap()
}

fn uids(pending: &[PendingObligation]) -> Vec<Uid> {
    pending.iter().map(|p| p.attestation.uid).collect()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(PATIENCE, async {
        while !check() {
            tokio::time::sleep(TICK).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Historical queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn requests_are_limited_to_the_block_window() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let o: Vec<Uid> = (1..=4).map(|n| obligation(&ledger, n)).collect();

    asker.request_arbitration(o[0], ORACLE, oracle_demand()).await.unwrap();
    ledger.advance_to(99);
    asker.request_arbitration(o[1], ORACLE, oracle_demand()).await.unwrap();
    ledger.advance_to(199);
    asker.request_arbitration(o[2], ORACLE, oracle_demand()).await.unwrap();
    asker.request_arbitration(o[3], ORACLE, oracle_demand()).await.unwrap();

    let filters = ArbitrateFilters {
        from_block: Some(100),
        to_block: Some(200),
        ..Default::default()
    };
    let pending = engine.get_arbitration_requests(&filters).await.unwrap();
    assert_eq!(uids(&pending), vec![o[1], o[2]]);
    assert!(pending
        .iter()
        .all(|p| (100..=200).contains(&p.request.block_number)));
}

#[tokio::test]
async fn requests_for_other_oracles_are_ignored_and_duplicates_collapse() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let a = obligation(&ledger, 1);
    let b = obligation(&ledger, 2);

    asker.request_arbitration(a, ORACLE, oracle_demand()).await.unwrap();
    asker.request_arbitration(a, ORACLE, Bytes::new()).await.unwrap();
    asker
        .request_arbitration(b, Address::repeat_byte(0x99), Bytes::new())
        .await
        .unwrap();

    let pending = engine
        .get_arbitration_requests(&ArbitrateFilters::default())
        .await
        .unwrap();
    assert_eq!(uids(&pending), vec![a]);
    assert_eq!(pending[0].demand, oracle_demand());
}

#[tokio::test]
async fn recency_and_cap_shape_the_batch() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let o: Vec<Uid> = (1..=3).map(|n| obligation(&ledger, n)).collect();
    for uid in &o {
        asker.request_arbitration(*uid, ORACLE, Bytes::new()).await.unwrap();
    }

    let filters = ArbitrateFilters {
        prioritize_recent: true,
        max_obligations: Some(2),
        ..Default::default()
    };
    let pending = engine.get_arbitration_requests(&filters).await.unwrap();
    assert_eq!(uids(&pending), vec![o[2], o[1]]);
}

#[tokio::test]
async fn escrow_filter_keeps_obligations_whose_escrow_names_this_oracle() {
    let ledger = ledger(TransportKind::Http);
    let registry = ArbiterRegistry::with_builtin(&ArbiterAddresses {
        trusted_oracle_arbiter: Some(ARBITER),
        ..Default::default()
    })
    .unwrap();
    let engine = oracle(&ledger).with_registry(registry);
    let asker = requester(&ledger);

    let ours = Demand::new(ARBITER, oracle_demand()).to_escrow_data(vec![]);
    let theirs = Demand::new(
        ARBITER,
        trusted_oracle_demand(Address::repeat_byte(0x99), Bytes::new()).unwrap(),
    )
    .to_escrow_data(vec![]);
    let escrow_ours = ledger.attest(attestation(0xe1, Uid::ZERO, ours));
    let escrow_theirs = ledger.attest(attestation(0xe2, Uid::ZERO, theirs));
    let a = ledger.attest(attestation(1, escrow_ours, Bytes::new()));
    let b = ledger.attest(attestation(2, escrow_theirs, Bytes::new()));
    let c = obligation(&ledger, 3);
    for uid in [a, b, c] {
        asker.request_arbitration(uid, ORACLE, oracle_demand()).await.unwrap();
    }

    let att_a = ledger.get_attestation(a).await.unwrap();
    assert!(engine.escrow_demands_oracle(&att_a).await.unwrap());

    let filters = ArbitrateFilters {
        only_if_escrow_demands_current_oracle: true,
        ..Default::default()
    };
    let pending = engine.get_arbitration_requests(&filters).await.unwrap();
    assert_eq!(uids(&pending), vec![a]);
}

#[tokio::test]
async fn request_for_a_missing_obligation_does_not_sink_the_batch() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    asker
        .request_arbitration(Uid::repeat_byte(0xee), ORACLE, oracle_demand())
        .await
        .unwrap();
    let real = obligation(&ledger, 1);
    asker.request_arbitration(real, ORACLE, oracle_demand()).await.unwrap();

    let decisions = engine
        .arbitrate_past(|_: &PendingObligation| async { Some(true) }, &ArbitrateFilters::default())
        .await
        .unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].attestation.uid, real);
    assert_eq!(ledger.arbitrate_calls(), 1);
}

// ---------------------------------------------------------------------------
// Catch-up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abstaining_on_one_item_leaves_the_others() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let o: Vec<Uid> = (1..=3).map(|n| obligation(&ledger, n)).collect();
    for uid in &o {
        asker.request_arbitration(*uid, ORACLE, oracle_demand()).await.unwrap();
    }

    let second = o[1];
    let decisions = engine
        .arbitrate_past(
            move |p: &PendingObligation| {
                let answer = (p.attestation.uid != second).then_some(true);
                async move { answer }
            },
            &ArbitrateFilters::default(),
        )
        .await
        .unwrap();

    let mut decided: Vec<Uid> = decisions.iter().map(|d| d.attestation.uid).collect();
    decided.sort();
    assert_eq!(decided, vec![o[0], o[2]]);
    assert!(engine
        .check_existing_arbitration(second, ORACLE)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn rejected_submission_does_not_stop_the_batch() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let o: Vec<Uid> = (1..=3).map(|n| obligation(&ledger, n)).collect();
    for uid in &o {
        asker.request_arbitration(*uid, ORACLE, oracle_demand()).await.unwrap();
    }
    ledger.reject_arbitration(o[0]);

    let report = engine
        .arbitrate_past_report(|_: &PendingObligation| async { Some(false) }, &ArbitrateFilters::default())
        .await
        .unwrap();
    assert_eq!(report.failed(), 1);
    assert_eq!(report.decisions().count(), 2);
    assert_eq!(ledger.arbitrate_calls(), 3);
}

#[tokio::test]
async fn repeated_catch_up_submits_nothing_new() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    for n in 1..=3 {
        let uid = obligation(&ledger, n);
        asker.request_arbitration(uid, ORACLE, oracle_demand()).await.unwrap();
    }

    let filters = ArbitrateFilters {
        skip_already_arbitrated: true,
        ..Default::default()
    };
    let decide = |_: &PendingObligation| async { Some(true) };
    let first = engine.arbitrate_past(decide, &filters).await.unwrap();
    assert_eq!(first.len(), 3);
    let calls = ledger.arbitrate_calls();

    let second = engine.arbitrate_past(decide, &filters).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(ledger.arbitrate_calls(), calls);
}

#[tokio::test]
async fn skip_already_arbitrated_is_scoped_to_the_demand() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let uid = obligation(&ledger, 1);
    let filters = ArbitrateFilters {
        skip_already_arbitrated: true,
        ..Default::default()
    };
    let decide = |_: &PendingObligation| async { Some(true) };

    asker.request_arbitration(uid, ORACLE, asking(b"first?")).await.unwrap();
    assert_eq!(engine.arbitrate_past(decide, &filters).await.unwrap().len(), 1);
    assert!(engine.arbitrate_past(decide, &filters).await.unwrap().is_empty());

    // Same obligation, new question: the earlier decision does not answer it.
    let from_block = ledger.block_number().await.unwrap() + 1;
    asker.request_arbitration(uid, ORACLE, asking(b"second?")).await.unwrap();
    let later = ArbitrateFilters {
        from_block: Some(from_block),
        ..filters.clone()
    };
    assert_eq!(engine.arbitrate_past(decide, &later).await.unwrap().len(), 1);
    assert!(engine.arbitrate_past(decide, &later).await.unwrap().is_empty());
    assert_eq!(ledger.arbitrate_calls(), 2);

    for question in [&b"first?"[..], &b"second?"[..]] {
        let found = engine
            .check_existing_arbitration_for(uid, ORACLE, question)
            .await
            .unwrap();
        assert!(found.is_some_and(|d| d.decision));
    }
    assert!(engine
        .check_existing_arbitration_for(uid, ORACLE, b"third?")
        .await
        .unwrap()
        .is_none());
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

async fn wait_sees_a_later_decision(transport: TransportKind) {
    let ledger = ledger(transport);
    let engine = oracle(&ledger);
    let uid = obligation(&ledger, 1);

    let (ready_tx, ready_rx) = oneshot::channel();
    let waiter = engine.clone();
    let waiting = tokio::spawn(async move {
        let _ = ready_tx.send(());
        waiter.wait_for_arbitration(uid, ORACLE, None).await
    });
    ready_rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.arbitrate(uid, Bytes::new(), true).await.unwrap();

    let decision = tokio::time::timeout(PATIENCE, waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(decision.decision);
    assert_eq!(decision.obligation, uid);
    assert_eq!(decision.oracle, ORACLE);
}

#[tokio::test]
async fn wait_for_arbitration_over_push() {
    let ledger = ledger(TransportKind::WebSocket);
    assert_eq!(oracle(&ledger).delivery(), Delivery::Push);
    wait_sees_a_later_decision(TransportKind::WebSocket).await;
}

#[tokio::test]
async fn wait_for_arbitration_over_poll() {
    let ledger = ledger(TransportKind::Http);
    assert_eq!(oracle(&ledger).delivery(), Delivery::Poll(TICK));
    wait_sees_a_later_decision(TransportKind::Http).await;
}

#[tokio::test]
async fn wait_returns_an_existing_decision_immediately() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let uid = obligation(&ledger, 1);
    engine.arbitrate(uid, Bytes::new(), false).await.unwrap();

    let decision = tokio::time::timeout(
        PATIENCE,
        engine.wait_for_arbitration(uid, ORACLE, Some(Duration::from_secs(3600))),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(!decision.decision);
}

#[tokio::test]
async fn wait_for_request_then_decide() {
    let ledger = ledger(TransportKind::WebSocket);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let uid = obligation(&ledger, 1);

    let waiter = engine.clone();
    let waiting =
        tokio::spawn(async move { waiter.wait_for_arbitration_request(uid, ORACLE, None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    asker.request_arbitration(uid, ORACLE, oracle_demand()).await.unwrap();

    let request = tokio::time::timeout(PATIENCE, waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(request.obligation, uid);
    assert_eq!(request.demand, oracle_demand());
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

async fn listen_handles_requests_in_ledger_order(transport: TransportKind) {
    let ledger = ledger(transport);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let o: Vec<Uid> = (1..=3).map(|n| obligation(&ledger, n)).collect();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let watch = engine
        .listen_for_arbitration_requests_only(
            ORACLE,
            move |req: &ArbitrationRequest| {
                record.lock().unwrap().push(req.obligation);
                async { true }
            },
            None,
        )
        .await
        .unwrap();

    for uid in &o {
        asker.request_arbitration(*uid, ORACLE, oracle_demand()).await.unwrap();
    }
    eventually(|| ledger.arbitrate_calls() == 3).await;
    watch.unwatch();
    watch.join().await;

    assert_eq!(*seen.lock().unwrap(), o);
    for uid in &o {
        let decision = engine.check_existing_arbitration(*uid, ORACLE).await.unwrap();
        assert_eq!(decision.map(|d| d.decision), Some(true));
    }
}

#[tokio::test]
async fn listen_over_push() {
    listen_handles_requests_in_ledger_order(TransportKind::WebSocket).await;
}

#[tokio::test]
async fn listen_over_poll() {
    listen_handles_requests_in_ledger_order(TransportKind::Http).await;
}

#[tokio::test]
async fn listen_and_arbitrate_catches_up_then_follows() {
    let ledger = ledger(TransportKind::Http);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let early = obligation(&ledger, 1);
    let late = obligation(&ledger, 2);
    asker.request_arbitration(early, ORACLE, oracle_demand()).await.unwrap();

    let (after_tx, mut after_rx) = mpsc::unbounded_channel();
    let options = ListenOptions::new(ArbitrateFilters {
        skip_already_arbitrated: true,
        ..Default::default()
    })
    .interval(TICK)
    .on_after_arbitrate(move |decision| {
        let after_tx = after_tx.clone();
        async move {
            let _ = after_tx.send(decision);
        }
    });

    let outcome = engine
        .listen_and_arbitrate(|_: &PendingObligation| async { Some(true) }, options)
        .await
        .unwrap();
    assert_eq!(outcome.decisions.len(), 1);
    assert_eq!(outcome.decisions[0].attestation.uid, early);

    asker.request_arbitration(late, ORACLE, oracle_demand()).await.unwrap();
    let live = tokio::time::timeout(PATIENCE, after_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.attestation.uid, late);
    assert!(live.decision);

    // A repeated request for a decided obligation is skipped.
    asker.request_arbitration(late, ORACLE, oracle_demand()).await.unwrap();
    tokio::time::sleep(TICK * 10).await;
    assert_eq!(ledger.arbitrate_calls(), 2);

    outcome.watch.unwatch();
    outcome.watch.join().await;
}

#[tokio::test]
async fn unwatch_lets_the_current_handler_finish_and_stops_delivery() {
    let ledger = ledger(TransportKind::WebSocket);
    let engine = oracle(&ledger);
    let asker = requester(&ledger);
    let first = obligation(&ledger, 1);
    let second = obligation(&ledger, 2);

    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let watch = engine
        .listen_for_arbitration_requests_only(
            ORACLE,
            move |req: &ArbitrationRequest| {
                let _ = started_tx.send(req.obligation);
                async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    true
                }
            },
            None,
        )
        .await
        .unwrap();

    asker.request_arbitration(first, ORACLE, oracle_demand()).await.unwrap();
    let started = tokio::time::timeout(PATIENCE, started_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(started, first);

    watch.unwatch();
    tokio::time::timeout(PATIENCE, watch.join()).await.unwrap();
    assert_eq!(ledger.arbitrate_calls(), 1);

    asker.request_arbitration(second, ORACLE, oracle_demand()).await.unwrap();
    tokio::time::sleep(TICK * 5).await;
    assert_eq!(ledger.arbitrate_calls(), 1);
    assert!(started_rx.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Subscription setup
// ---------------------------------------------------------------------------

/// Records one arbitration request inside its first `subscribe` call, before
/// the subscription is live: the window between a listener fixing its start
/// block and its push feed going live.
struct RequestDuringSubscribe {
    inner: InMemoryLedger,
    obligation: Uid,
    fired: AtomicBool,
}

#[async_trait]
impl Ledger for RequestDuringSubscribe {
    fn account(&self) -> Address {
        self.inner.account()
    }

    fn transport(&self) -> TransportKind {
        self.inner.transport()
    }

    async fn block_number(&self) -> LedgerResult<u64> {
        self.inner.block_number().await
    }

    async fn get_attestation(&self, uid: Uid) -> LedgerResult<Attestation> {
        self.inner.get_attestation(uid).await
    }

    async fn write_state(&self, contract: Address, call: LedgerCall) -> LedgerResult<TxRef> {
        self.inner.write_state(contract, call).await
    }

    async fn get_past_events(
        &self,
        filter: &EventFilter,
        range: BlockRange,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.inner.get_past_events(filter, range).await
    }

    async fn subscribe(&self, filter: &EventFilter) -> LedgerResult<EventSubscription> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let call = LedgerCall::RequestArbitration {
                obligation: self.obligation,
                oracle: ORACLE,
                demand: oracle_demand(),
            };
            self.inner.connect(REQUESTER).write_state(ARBITER, call).await?;
        }
        self.inner.subscribe(filter).await
    }
}

fn requested_while_subscribing(ledger: &InMemoryLedger, n: u8) -> OracleEngine<RequestDuringSubscribe> {
    let racy = RequestDuringSubscribe {
        inner: ledger.clone(),
        obligation: obligation(ledger, n),
        fired: AtomicBool::new(false),
    };
    OracleEngine::new(Arc::new(racy), ARBITER)
}

#[tokio::test]
async fn listen_and_arbitrate_decides_a_request_recorded_while_subscribing() {
    let ledger = ledger(TransportKind::WebSocket);
    let engine = requested_while_subscribing(&ledger, 1);

    let outcome = engine
        .listen_and_arbitrate(|_: &PendingObligation| async { Some(true) }, ListenOptions::default())
        .await
        .unwrap();
    assert!(outcome.decisions.is_empty());

    eventually(|| ledger.arbitrate_calls() == 1).await;
    tokio::time::sleep(TICK * 10).await;
    assert_eq!(ledger.arbitrate_calls(), 1);
    outcome.watch.unwatch();
    outcome.watch.join().await;
}

#[tokio::test]
async fn listener_decides_a_request_recorded_while_subscribing() {
    let ledger = ledger(TransportKind::WebSocket);
    let engine = requested_while_subscribing(&ledger, 1);

    let watch = engine
        .listen_for_arbitration_requests_only(ORACLE, |_: &ArbitrationRequest| async { true }, None)
        .await
        .unwrap();

    eventually(|| ledger.arbitrate_calls() == 1).await;
    tokio::time::sleep(TICK * 10).await;
    assert_eq!(ledger.arbitrate_calls(), 1);
    watch.unwatch();
    watch.join().await;
}
