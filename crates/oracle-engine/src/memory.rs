//! In-process [`Ledger`] for tests and local simulation.
//!
//! Every write mines one block holding one event. Handles created with
//! [`InMemoryLedger::connect`] share state but sign as a different account.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use demand_core::{decision_key, Address, Attestation, TxRef, Uid};

use crate::ledger::{
    BlockRange, EventFilter, EventPayload, EventSubscription, Ledger, LedgerCall, LedgerError,
    LedgerEvent, LedgerResult,
};
use crate::transport::{is_push_capable, TransportKind};

#[derive(Default)]
struct State {
    block: u64,
    tx_counter: u64,
    attestations: HashMap<Uid, Attestation>,
    events: Vec<LedgerEvent>,
    subscribers: Vec<(EventFilter, mpsc::UnboundedSender<LedgerResult<LedgerEvent>>)>,
    arbitrate_calls: usize,
    rejected: HashSet<Uid>,
}

impl State {
    fn next_tx(&mut self) -> TxRef {
        self.tx_counter += 1;
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&self.tx_counter.to_be_bytes());
        TxRef::from(word)
    }

    fn emit(&mut self, contract: Address, payload: EventPayload) -> TxRef {
        self.block += 1;
        let tx = self.next_tx();
        let event = LedgerEvent {
            contract,
            block_number: self.block,
            log_index: 0,
            tx,
            payload,
        };
        self.subscribers.retain(|(filter, sink)| {
            !filter.matches(&event) || sink.send(Ok(event.clone())).is_ok()
        });
        self.events.push(event);
        tx
    }
}

#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<State>>,
    account: Address,
    transport: TransportKind,
}

impl InMemoryLedger {
    pub fn new(account: Address, transport: TransportKind) -> Self {
        InMemoryLedger {
            state: Arc::new(Mutex::new(State::default())),
            account,
            transport,
        }
    }

    /// Another handle on the same ledger, signing as `account`.
    pub fn connect(&self, account: Address) -> Self {
        InMemoryLedger {
            state: Arc::clone(&self.state),
            account,
            transport: self.transport,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an attestation. Stamps `time` with the current block when unset.
    pub fn attest(&self, mut attestation: Attestation) -> Uid {
        let mut state = self.lock();
        state.block += 1;
        if attestation.time == 0 {
            attestation.time = state.block;
        }
        let uid = attestation.uid;
        state.attestations.insert(uid, attestation);
        uid
    }

    pub fn revoke(&self, uid: Uid, at: u64) -> LedgerResult<()> {
        let mut state = self.lock();
        let att = state
            .attestations
            .get_mut(&uid)
            .ok_or_else(|| LedgerError::NotFound(format!("attestation {uid}")))?;
        att.revocation_time = at;
        Ok(())
    }

    /// Mine empty blocks until the head is at least `block`.
    pub fn advance_to(&self, block: u64) {
        let mut state = self.lock();
        state.block = state.block.max(block);
    }

    /// `arbitrate` calls received so far, rejected ones included.
    pub fn arbitrate_calls(&self) -> usize {
        self.lock().arbitrate_calls
    }

    /// Make every future `arbitrate` on `obligation` fail.
    pub fn reject_arbitration(&self, obligation: Uid) {
        self.lock().rejected.insert(obligation);
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.lock().events.clone()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn account(&self) -> Address {
        self.account
    }

    fn transport(&self) -> TransportKind {
        self.transport
    }

    async fn block_number(&self) -> LedgerResult<u64> {
        Ok(self.lock().block)
    }

    async fn get_attestation(&self, uid: Uid) -> LedgerResult<Attestation> {
        self.lock()
            .attestations
            .get(&uid)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("attestation {uid}")))
    }

    async fn write_state(&self, contract: Address, call: LedgerCall) -> LedgerResult<TxRef> {
        let mut state = self.lock();
        match call {
            LedgerCall::RequestArbitration {
                obligation,
                oracle,
                demand,
            } => Ok(state.emit(
                contract,
                EventPayload::ArbitrationRequested {
                    obligation,
                    oracle,
                    demand,
                },
            )),
            LedgerCall::Arbitrate {
                obligation,
                demand,
                decision,
            } => {
                state.arbitrate_calls += 1;
                if state.rejected.contains(&obligation) {
                    return Err(LedgerError::Rejected(format!(
                        "arbitrate on {obligation} reverted"
                    )));
                }
                Ok(state.emit(
                    contract,
                    EventPayload::ArbitrationMade {
                        decision_key: decision_key(obligation, &demand),
                        obligation,
                        oracle: self.account,
                        decision,
                    },
                ))
            }
        }
    }

    async fn get_past_events(
        &self,
        filter: &EventFilter,
        range: BlockRange,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| range.contains(e.block_number) && filter.matches(e))
            .cloned()
            .collect())
    }

    async fn subscribe(&self, filter: &EventFilter) -> LedgerResult<EventSubscription> {
        if !is_push_capable(self.transport) {
            return Err(LedgerError::Unsupported(format!(
                "subscribe over {}",
                self.transport
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push((filter.clone(), tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
