use std::future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use morsel_types::{FrameKind, GatewayCommand, GatewayEvent};

use crate::config::GatewayConfig;
use crate::dispatcher::{Dispatcher, FrameHandler, HandlerId};
use crate::error::GatewayError;
use crate::machine::{ConnectionState, Machine, Transition};
use crate::queue::OutboundQueue;
use crate::token::TokenProvider;
use crate::transport::{Connector, Link};

/// Longest slice of a bad frame we put in the logs.
const LOGGED_FRAME_CHARS: usize = 200;

enum Command {
    Connect(String),
    Send(GatewayCommand),
    Disconnect,
    Shutdown,
}

/// Handle to the session's single real-time connection.
///
/// Cheap to clone. The socket itself lives on a background task spawned by
/// [`ConnectionManager::spawn`]; every method here just posts to it.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    commands: mpsc::UnboundedSender<Command>,
    dispatcher: Dispatcher,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Start the connection task. Nothing is dialled until `connect` or `send`.
    pub fn spawn<C: Connector>(
        config: GatewayConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: C,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.event_buffer);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            machine: Machine::new(config.backoff),
            queue: OutboundQueue::new(config.queue_capacity),
            config,
            connector: Arc::new(connector),
            tokens,
            dispatcher: dispatcher.clone(),
            state_tx,
            link: None,
            last_token: None,
            retry_at: None,
            epoch: 0,
            dial_tx,
        };
        tokio::spawn(actor.run(commands_rx, dial_rx));

        Self {
            inner: Arc::new(ManagerInner {
                commands: commands_tx,
                dispatcher,
                state_rx,
            }),
        }
    }

    /// Open the socket with `token`. No-op while connecting or open.
    pub fn connect(&self, token: impl Into<String>) {
        self.post(Command::Connect(token.into()));
    }

    /// Transmit now if open, otherwise queue and start connecting.
    pub fn send(&self, command: GatewayCommand) -> Result<(), GatewayError> {
        self.inner
            .commands
            .send(Command::Send(command))
            .map_err(|_| GatewayError::Closed)
    }

    /// Close the socket, drop queued frames and forget any pending retry.
    pub fn disconnect(&self) {
        self.post(Command::Disconnect);
    }

    /// Stop the connection task. The handle is useless afterwards.
    pub fn shutdown(&self) {
        self.post(Command::Shutdown);
    }

    pub fn add_handler<H>(&self, topics: &[FrameKind], handler: H) -> HandlerId
    where
        H: FrameHandler + 'static,
    {
        self.inner.dispatcher.add_handler(topics, handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.dispatcher.remove_handler(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.dispatcher.subscribe()
    }

    pub fn latest(&self) -> watch::Receiver<Option<GatewayEvent>> {
        self.inner.dispatcher.latest()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state() == ConnectionState::Open
    }

    fn post(&self, command: Command) {
        if self.inner.commands.send(command).is_err() {
            debug!("Connection task already stopped");
        }
    }
}

type DialResult = (u64, Result<Link, GatewayError>);

/// Owns the socket. Everything that touches connection state runs here, so
/// inbound frames are dispatched strictly in arrival order.
struct Actor<C> {
    config: GatewayConfig,
    connector: Arc<C>,
    tokens: Arc<dyn TokenProvider>,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<ConnectionState>,

    machine: Machine,
    queue: OutboundQueue,
    link: Option<Link>,

    /// Last token handed to `connect`, used when the provider has none
    last_token: Option<String>,

    /// When the next automatic dial fires
    retry_at: Option<Instant>,

    /// Bumped on every dial and on disconnect; stale dial results are dropped
    epoch: u64,
    dial_tx: mpsc::UnboundedSender<DialResult>,
}

impl<C: Connector> Actor<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut dials: mpsc::UnboundedReceiver<DialResult>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Connect(token)) => self.start_dial(Some(token)),
                        Some(Command::Send(frame)) => self.on_send(frame),
                        Some(Command::Disconnect) => self.on_disconnect(),
                        Some(Command::Shutdown) | None => break,
                    }
                }
                Some((epoch, result)) = dials.recv() => {
                    self.on_dial(epoch, result);
                }
                incoming = recv_link(&mut self.link) => {
                    match incoming {
                        Some(text) => self.on_text(&text),
                        None => self.on_closed(),
                    }
                }
                _ = retry_timer(self.retry_at) => {
                    self.retry_at = None;
                    self.start_dial(None);
                }
            }
        }

        self.link = None;
        self.queue.clear();
        debug!("Connection task stopped");
    }

    fn start_dial(&mut self, explicit: Option<String>) {
        if let Some(token) = &explicit {
            self.last_token = Some(token.clone());
        }

        if self.machine.state() != ConnectionState::Disconnected {
            trace!(state = ?self.machine.state(), "Connect ignored");
            return;
        }

        let token = explicit
            .or_else(|| self.tokens.access_token())
            .or_else(|| self.last_token.clone());
        let Some(token) = token else {
            warn!("No access token available, not connecting");
            return;
        };

        let url = match self.config.endpoint(&token) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build gateway endpoint");
                return;
            }
        };

        if self.machine.connect() != Transition::Dial {
            return;
        }
        self.retry_at = None;
        self.epoch += 1;
        self.publish_state();

        let epoch = self.epoch;
        let connector = self.connector.clone();
        let dial_tx = self.dial_tx.clone();
        debug!(epoch, attempt = self.machine.attempts(), "Dialling gateway");
        tokio::spawn(async move {
            let result = connector.connect(url).await;
            let _ = dial_tx.send((epoch, result));
        });
    }

    fn on_dial(&mut self, epoch: u64, result: Result<Link, GatewayError>) {
        if epoch != self.epoch || self.machine.state() != ConnectionState::Connecting {
            // Dropping a stale link closes it
            trace!(epoch, current = self.epoch, "Discarding stale dial");
            return;
        }

        match result {
            Ok(link) => {
                self.link = Some(link);
                if self.machine.opened() == Transition::Drain {
                    info!(queued = self.queue.len(), "Connected to gateway");
                    self.publish_state();
                    self.drain();
                }
            }
            Err(e) => {
                debug!(error = %e, "Gateway dial failed");
                self.on_closed();
            }
        }
    }

    fn on_send(&mut self, frame: GatewayCommand) {
        if self.machine.state() == ConnectionState::Open {
            match self.transmit(&frame) {
                Ok(()) => return,
                Err(e) => debug!(error = %e, "Write failed, queueing frame"),
            }
        }

        if let Some(evicted) = self.queue.push(frame) {
            warn!(
                capacity = self.queue.capacity(),
                conversation_id = %evicted.conversation_id(),
                "Outbound queue full, dropped oldest frame"
            );
        }

        if self.machine.state() != ConnectionState::Connecting {
            self.start_dial(None);
        }
    }

    fn on_disconnect(&mut self) {
        if self.machine.disconnect() == Transition::Close {
            info!("Disconnecting from gateway");
        }
        self.queue.clear();
        self.retry_at = None;
        self.epoch += 1;
        self.link = None;
        self.machine.closed();
        self.publish_state();
    }

    /// Dial failure and dropped socket end up here alike.
    fn on_closed(&mut self) {
        let was_open = self.machine.state() == ConnectionState::Open;
        self.link = None;

        match self.machine.closed() {
            Transition::Retry { attempt, delay } => {
                if was_open {
                    info!("Lost gateway connection");
                }
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
                self.retry_at = Some(Instant::now() + delay);
            }
            Transition::GiveUp => {
                info!(
                    attempts = self.machine.attempts(),
                    queued = self.queue.len(),
                    "Gave up reconnecting to gateway"
                );
            }
            _ => {}
        }
        self.publish_state();
    }

    fn on_text(&mut self, text: &str) {
        match morsel_types::decode(text) {
            Ok(envelope) => {
                trace!(kind = %envelope.event.kind(), "Inbound frame");
                self.dispatcher.dispatch(envelope.event);
            }
            Err(e) => {
                let raw: String = text.chars().take(LOGGED_FRAME_CHARS).collect();
                warn!(error = %e, frame = %raw, "Dropping malformed frame");
            }
        }
    }

    fn drain(&mut self) {
        while let Some(frame) = self.queue.pop() {
            if let Err(e) = self.transmit(&frame) {
                debug!(error = %e, remaining = self.queue.len() + 1, "Drain interrupted");
                self.queue.requeue(frame);
                break;
            }
        }
    }

    /// Write one frame. A frame that cannot be encoded is logged and dropped;
    /// only transport failures come back as errors.
    fn transmit(&mut self, frame: &GatewayCommand) -> Result<(), GatewayError> {
        let link = self.link.as_ref().ok_or(GatewayError::Closed)?;
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Dropping unencodable frame");
                return Ok(());
            }
        };
        link.outgoing.send(text).map_err(|_| GatewayError::Closed)
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}

async fn recv_link(link: &mut Option<Link>) -> Option<String> {
    match link {
        Some(link) => link.incoming.recv().await,
        None => future::pending().await,
    }
}

async fn retry_timer(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}
