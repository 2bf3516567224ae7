//! Listener registry and the telemetry dispatch loop.
//!
//! Payload messages carry the id of the node that produced them. The
//! [`Dispatcher`] looks that id up in a [`ListenerRegistry`] and hands the
//! payload's `data` object to the listener, strictly in emission order.
//! Debug messages go to the log. Heartbeats are counted.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use aim_core::{Message, Network, NodeId, NodeKind, VoiceId};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde_json::{Value, json};

/// Receives the payloads of one node.
pub trait Listener: Send {
    /// Handles one payload's `data` object.
    fn receive(&mut self, data: &Value);

    /// Current state as JSON, for reports.
    fn snapshot(&self) -> Value {
        Value::Null
    }
}

/// Keeps the latest oscilloscope trace of every voice.
///
/// A payload is `{"voice_id": <u64>, "samples": [<f32>...]}`. An empty
/// sample array means the voice is gone.
#[derive(Debug, Clone)]
pub struct ScopeListener {
    node: NodeId,
    traces: BTreeMap<VoiceId, Vec<f32>>,
    updates: u64,
}

impl ScopeListener {
    /// Listener for the oscilloscope `node`.
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            traces: BTreeMap::new(),
            updates: 0,
        }
    }

    /// The producing node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Latest trace per live voice.
    pub fn traces(&self) -> &BTreeMap<VoiceId, Vec<f32>> {
        &self.traces
    }

    /// Latest trace of one voice.
    pub fn trace(&self, voice: VoiceId) -> Option<&[f32]> {
        self.traces.get(&voice).map(Vec::as_slice)
    }

    /// Payloads received so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl Listener for ScopeListener {
    fn receive(&mut self, data: &Value) {
        let (Some(voice), Some(samples)) = (
            data.get("voice_id").and_then(Value::as_u64),
            data.get("samples").and_then(Value::as_array),
        ) else {
            tracing::warn!(node = %self.node, %data, "oscilloscope payload without voice_id/samples");
            return;
        };
        self.updates += 1;
        let voice = VoiceId(voice);
        if samples.is_empty() {
            self.traces.remove(&voice);
            return;
        }
        let trace = samples.iter().filter_map(Value::as_f64).map(|s| s as f32).collect();
        self.traces.insert(voice, trace);
    }

    fn snapshot(&self) -> Value {
        let voices: serde_json::Map<String, Value> = self
            .traces
            .iter()
            .map(|(voice, trace)| (voice.0.to_string(), json!(trace.len())))
            .collect();
        json!({"node": self.node.index(), "updates": self.updates, "voices": voices})
    }
}

/// Listeners keyed by the node whose payloads they receive.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: BTreeMap<NodeId, Box<dyn Listener>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("nodes", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a [`ScopeListener`] for every oscilloscope in `order`.
    pub fn for_schedule(network: &Network, order: &[NodeId]) -> Self {
        let mut registry = Self::new();
        for &id in order {
            if let Some(node) = network.node(id)
                && matches!(node.kind(), NodeKind::Oscilloscope { .. })
            {
                registry.register(id, Box::new(ScopeListener::new(id)));
            }
        }
        registry
    }

    /// Registers `listener` for `node`, replacing any earlier one.
    pub fn register(&mut self, node: NodeId, listener: Box<dyn Listener>) {
        self.listeners.insert(node, listener);
    }

    /// The listener registered for `node`.
    pub fn get(&self, node: NodeId) -> Option<&dyn Listener> {
        self.listeners.get(&node).map(|l| &**l)
    }

    /// Registered nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.listeners.keys().copied()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn deliver(&mut self, node: NodeId, data: &Value) -> bool {
        match self.listeners.get_mut(&node) {
            Some(listener) => {
                listener.receive(data);
                true
            }
            None => false,
        }
    }
}

/// Counts of what a dispatcher has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Heartbeats.
    pub heartbeats: u64,
    /// Debug messages.
    pub debug: u64,
    /// Payloads delivered to a listener.
    pub delivered: u64,
    /// Payloads for nodes without a listener.
    pub unrouted: u64,
}

/// Consumes the telemetry queue and invokes listeners.
pub struct Dispatcher {
    registry: ListenerRegistry,
    rx: Receiver<Message>,
    stats: DispatchStats,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher reading from `rx`.
    pub fn new(registry: ListenerRegistry, rx: Receiver<Message>) -> Self {
        Self {
            registry,
            rx,
            stats: DispatchStats::default(),
        }
    }

    /// Routes one message.
    pub fn dispatch(&mut self, message: Message) {
        match message {
            Message::Status { .. } => self.stats.heartbeats += 1,
            Message::Debug {
                node,
                name,
                time,
                data,
                ..
            } => {
                self.stats.debug += 1;
                let text = data.as_str().map_or_else(|| data.to_string(), str::to_string);
                tracing::info!(target: "aim::debug", node, name = %name, time, "{}", text);
            }
            Message::Payload { node_id, name, data } => {
                if self.registry.deliver(NodeId::new(node_id), &data) {
                    self.stats.delivered += 1;
                } else {
                    self.stats.unrouted += 1;
                    tracing::warn!(node = node_id, name = %name, "payload for a node without a listener");
                }
            }
        }
    }

    /// Routes every message already queued, returning how many there were.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Ok(message) = self.rx.try_recv() {
            self.dispatch(message);
            count += 1;
        }
        count
    }

    /// Routes messages until the producer hangs up or `timeout` has passed,
    /// however busy the queue is. Returns false once the producer is gone.
    pub fn run_for(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(message) => self.dispatch(message),
                Err(RecvTimeoutError::Timeout) => return true,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// The listeners.
    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Counts so far.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    /// Records every payload it receives.
    struct Recorder(std::sync::Arc<std::sync::Mutex<Vec<Value>>>);

    impl Listener for Recorder {
        fn receive(&mut self, data: &Value) {
            self.0.lock().unwrap().push(data.clone());
        }
    }

    #[test]
    fn scope_keeps_latest_trace_and_forgets_removed_voices() {
        let mut scope = ScopeListener::new(NodeId::new(3));
        scope.receive(&json!({"voice_id": 0, "samples": [0.0, 0.5]}));
        scope.receive(&json!({"voice_id": 4, "samples": [1.0]}));
        scope.receive(&json!({"voice_id": 0, "samples": [0.25]}));
        assert_eq!(scope.trace(VoiceId(0)), Some(&[0.25][..]));
        scope.receive(&json!({"voice_id": 4, "samples": []}));
        assert!(scope.trace(VoiceId(4)).is_none());
        assert_eq!(scope.updates(), 4);
        assert_eq!(scope.snapshot()["voices"], json!({"0": 1}));
    }

    #[test]
    fn scope_ignores_payloads_without_fields() {
        let mut scope = ScopeListener::new(NodeId::new(3));
        scope.receive(&json!({"samples": [1.0]}));
        assert_eq!(scope.updates(), 0);
    }

    #[test]
    fn payloads_reach_their_listener_in_order() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        registry.register(NodeId::new(5), Box::new(Recorder(seen.clone())));
        let (tx, rx) = unbounded();
        let mut dispatcher = Dispatcher::new(registry, rx);

        for i in 0..3 {
            tx.send(Message::payload(NodeId::new(5), "oscilloscope", json!({"n": i})))
                .unwrap();
        }
        tx.send(Message::payload(NodeId::new(9), "oscilloscope", json!({})))
            .unwrap();
        tx.send(Message::debug(NodeId::new(1), "print", 0.0, "hello")).unwrap();
        tx.send(Message::HEARTBEAT).unwrap();

        assert_eq!(dispatcher.drain(), 6);
        assert_eq!(*seen.lock().unwrap(), [json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                heartbeats: 1,
                debug: 1,
                delivered: 3,
                unrouted: 1,
            }
        );
    }

    #[test]
    fn run_for_reports_a_closed_producer() {
        let (tx, rx) = unbounded();
        let mut dispatcher = Dispatcher::new(ListenerRegistry::new(), rx);
        tx.send(Message::HEARTBEAT).unwrap();
        assert!(dispatcher.run_for(Duration::from_millis(1)));
        drop(tx);
        assert!(!dispatcher.run_for(Duration::from_millis(1)));
        assert_eq!(dispatcher.stats().heartbeats, 1);
    }

    #[test]
    fn run_for_returns_while_the_producer_keeps_sending() {
        let (tx, rx) = unbounded();
        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let producer = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(std::sync::atomic::Ordering::SeqCst) {
                    if tx.send(Message::HEARTBEAT).is_err() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
        };
        let mut dispatcher = Dispatcher::new(ListenerRegistry::new(), rx);

        let started = Instant::now();
        assert!(dispatcher.run_for(Duration::from_millis(20)));
        let elapsed = started.elapsed();
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        producer.join().unwrap();

        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_millis(500), "run_for took {elapsed:?}");
    }

    #[test]
    fn registry_from_schedule_covers_every_oscilloscope() {
        let patch = aim_core::Patch::new();
        let a = patch.oscilloscope(patch.sine(1.0), 0.01);
        let b = patch.oscilloscope(patch.saw(1.0), 0.01);
        patch.out(a + b);
        let (a, b) = (a.id(), b.id());
        let network = patch.finish().unwrap();
        let graph = aim_core::build_graph(&network).unwrap();
        let order = aim_core::execution_order(&graph);
        let registry = ListenerRegistry::for_schedule(&network, &order);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a).is_some());
        assert!(registry.get(b).is_some());
    }
}
