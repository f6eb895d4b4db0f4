//! Shared application state: every component constructed once, wired
//! explicitly, and handed to the HTTP/WS layer as injected handles.

use crate::chat::ChatOutbox;
use crate::config::BrokerConfig;
use crate::counters::CounterEngine;
use crate::dispatcher::{Dispatcher, event_channel};
use crate::lifecycle::LifecycleController;
use crate::rooms::Rooms;
use crate::supervisor::Supervisor;
use crate::token_broker::TokenBroker;
use ov_protocol::StreamEvent;
use ov_store::{Records, Store};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BrokerConfig>,
    pub records: Records,
    pub engine: Arc<CounterEngine>,
    pub rooms: Arc<Rooms>,
    pub outbox: Arc<ChatOutbox>,
    pub dispatcher: Arc<Dispatcher>,
    pub broker: Arc<TokenBroker>,
    pub supervisor: Arc<Supervisor>,
    pub lifecycle: Arc<LifecycleController>,
    /// Producer side of the event channel (upstream sessions hold clones;
    /// this one keeps the dispatcher alive until shutdown).
    pub events: mpsc::Sender<StreamEvent>,
}

impl AppState {
    /// Wire the full component graph over a store backend and start the
    /// dispatcher consumer.
    pub fn new(config: BrokerConfig, store: Arc<dyn Store>) -> Self {
        let config = Arc::new(config);
        let records = Records::new(store);
        let engine = Arc::new(CounterEngine::new(records.clone()));
        let rooms = Arc::new(Rooms::new());
        let outbox = Arc::new(ChatOutbox::new());
        let dispatcher = Arc::new(Dispatcher::new(
            records.clone(),
            engine.clone(),
            rooms.clone(),
            outbox.clone(),
        ));
        let broker = Arc::new(TokenBroker::new(records.clone(), config.upstream.clone()));

        let (events, events_rx) = event_channel();
        dispatcher.clone().spawn(events_rx);

        let supervisor = Supervisor::new(
            records.clone(),
            broker.clone(),
            dispatcher.clone(),
            rooms.clone(),
            outbox.clone(),
            events.clone(),
            config.upstream.clone(),
            config.chat.clone(),
        );
        let lifecycle = Arc::new(LifecycleController::new(
            records.clone(),
            engine.clone(),
            supervisor.clone(),
            rooms.clone(),
        ));

        AppState {
            config,
            records,
            engine,
            rooms,
            outbox,
            dispatcher,
            broker,
            supervisor,
            lifecycle,
            events,
        }
    }
}
