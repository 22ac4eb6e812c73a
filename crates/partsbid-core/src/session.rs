// Live-bidding session: the event loop that owns one view's state.
//
// The loop listens on three channels with `tokio::select!`:
// 1. Commands from the caller (toggle, award, switch RFQ, shutdown)
// 2. Events from the bid channel subscription task
// 3. Results of the snapshot and award tasks
//
// Each RFQ view gets a generation number. Every spawned task is tagged with
// the generation it was started for. Stream events and snapshots from older
// generations are dropped, so a slow response from a previous RFQ can never
// leak into the current one. Award outcomes from older generations are still
// reported to the caller but leave the current view alone.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, MarketplaceApi};
use crate::config::GroupBy;
use crate::protocol::{AwardReceipt, Bid, BidId, CurrentUser, LineItemId, RfqId, Role};
use crate::stream::{
    channel_url, run_subscription, BidStreamConnector, ConnectionState, StreamEvent,
};
use crate::view::{Admission, BidBoard, LiveBidState};

const DEFAULT_AWARD_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Caller-facing types
// ---------------------------------------------------------------------------

/// What the caller mounts the view with.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub rfq_id: RfqId,
    /// Role the view is rendered for. Decides filtering and whether bids can
    /// be selected.
    pub role: Role,
    /// Line items that already have an order.
    pub excluded: Vec<LineItemId>,
}

impl SessionParams {
    pub fn new(rfq_id: RfqId, role: Role) -> Self {
        Self {
            rfq_id,
            role,
            excluded: Vec::new(),
        }
    }

    pub fn with_excluded(mut self, excluded: impl IntoIterator<Item = LineItemId>) -> Self {
        self.excluded = excluded.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    ToggleBid(BidId),
    Award,
    SwitchRfq {
        rfq_id: RfqId,
        excluded: Vec<LineItemId>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationTarget {
    OrderTracking,
}

/// Updates pushed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    Board(BidBoard),
    AwardSucceeded {
        order_ids: Vec<u64>,
        message: Option<String>,
    },
    AwardFailed {
        message: String,
    },
    Navigate(NavigationTarget),
}

// ---------------------------------------------------------------------------
// Internal task results
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum TaskEvent {
    Snapshot {
        generation: u64,
        result: Result<(Vec<Bid>, CurrentUser), ApiError>,
    },
    Award {
        generation: u64,
        result: Result<AwardReceipt, ApiError>,
    },
}

struct ActiveStream {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Dependencies and settings shared by every view the session mounts.
pub struct LiveBidSession {
    api: Arc<dyn MarketplaceApi>,
    connector: Arc<dyn BidStreamConnector>,
    api_base: Url,
    award_timeout: Duration,
    group_by: GroupBy,
}

impl LiveBidSession {
    /// `api_base` is the REST base address; the bid channel address is
    /// derived from it.
    pub fn new(
        api: Arc<dyn MarketplaceApi>,
        connector: Arc<dyn BidStreamConnector>,
        api_base: Url,
    ) -> Self {
        Self {
            api,
            connector,
            api_base,
            award_timeout: DEFAULT_AWARD_TIMEOUT,
            group_by: GroupBy::default(),
        }
    }

    pub fn with_award_timeout(mut self, timeout: Duration) -> Self {
        self.award_timeout = timeout;
        self
    }

    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    /// Run the session until `Shutdown` arrives or `cmd_rx` closes.
    ///
    /// Pushes a fresh `ViewUpdate::Board` whenever the derived view changes.
    /// On exit the active bid channel is closed and its task awaited.
    pub async fn run(
        self,
        params: SessionParams,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        ui_tx: mpsc::Sender<ViewUpdate>,
    ) -> anyhow::Result<()> {
        let (stream_tx, mut stream_rx) = mpsc::channel(64);
        let (task_tx, mut task_rx) = mpsc::channel(16);

        let mut runtime = SessionRuntime {
            state: LiveBidState::new(params.rfq_id, params.role, [], self.group_by),
            session: self,
            role: params.role,
            generation: 0,
            stream: None,
            snapshot_task: None,
            stream_tx,
            task_tx,
            ui_tx,
        };

        info!(rfq = %params.rfq_id, role = ?params.role, "Live bid session started");
        runtime.mount(params.rfq_id, params.excluded).await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Shutdown) => {
                            info!("Shutdown command received");
                            break;
                        }
                        Some(cmd) => runtime.handle_command(cmd).await,
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(event) = stream_rx.recv() => {
                    runtime.handle_stream_event(event).await;
                }

                Some(event) = task_rx.recv() => {
                    runtime.handle_task_event(event).await;
                }
            }
        }

        runtime.teardown().await;
        info!("Live bid session exiting");
        Ok(())
    }
}

/// Mutable state of a running session. Only touched from the loop task.
struct SessionRuntime {
    session: LiveBidSession,
    role: Role,
    state: LiveBidState,
    /// Bumped on every mount. Task results carrying an older value are stale.
    generation: u64,
    stream: Option<ActiveStream>,
    snapshot_task: Option<JoinHandle<()>>,
    stream_tx: mpsc::Sender<StreamEvent>,
    task_tx: mpsc::Sender<TaskEvent>,
    ui_tx: mpsc::Sender<ViewUpdate>,
}

impl SessionRuntime {
    /// Tear down whatever view is mounted and mount `rfq_id` from scratch:
    /// empty bids and selection, a new snapshot fetch and a new subscription.
    async fn mount(&mut self, rfq_id: RfqId, excluded: Vec<LineItemId>) {
        self.teardown().await;

        self.generation += 1;
        let generation = self.generation;
        self.state = LiveBidState::new(rfq_id, self.role, excluded, self.session.group_by);
        info!(rfq = %rfq_id, generation, "Mounting live bid view");

        let api = Arc::clone(&self.session.api);
        let task_tx = self.task_tx.clone();
        self.snapshot_task = Some(tokio::spawn(async move {
            let result = tokio::try_join!(api.fetch_bids(rfq_id), api.current_user());
            let _ = task_tx.send(TaskEvent::Snapshot { generation, result }).await;
        }));

        match channel_url(&self.session.api_base, rfq_id) {
            Ok(url) => {
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(run_subscription(
                    Arc::clone(&self.session.connector),
                    url,
                    generation,
                    self.stream_tx.clone(),
                    cancel.clone(),
                ));
                self.stream = Some(ActiveStream { cancel, handle });
            }
            Err(e) => {
                warn!("Cannot open bid channel: {e}");
                self.state.set_connection(ConnectionState::Error);
            }
        }

        self.publish().await;
    }

    /// Close the active subscription (waiting for its socket to be released)
    /// and abandon any snapshot fetch in progress.
    async fn teardown(&mut self) {
        if let Some(handle) = self.snapshot_task.take() {
            handle.abort();
        }
        if let Some(ActiveStream { cancel, handle }) = self.stream.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!("Bid channel task ended abnormally: {e}");
            }
            debug!(generation = self.generation, "Bid channel torn down");
        }
    }

    async fn publish(&self) {
        let _ = self.ui_tx.send(ViewUpdate::Board(self.state.board())).await;
    }

    // -- Commands --

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::ToggleBid(bid_id) => {
                if self.state.toggle(bid_id) {
                    self.publish().await;
                }
            }
            SessionCommand::Award => self.start_award().await,
            SessionCommand::SwitchRfq { rfq_id, excluded } => {
                info!(from = %self.state.rfq_id(), to = %rfq_id, "Switching RFQ");
                self.mount(rfq_id, excluded).await;
            }
            SessionCommand::Shutdown => {}
        }
    }

    async fn start_award(&mut self) {
        let Some(bid_ids) = self.state.begin_award() else {
            debug!("Award ignored: not allowed, nothing selected, or already in flight");
            return;
        };
        self.publish().await;

        let rfq_id = self.state.rfq_id();
        let generation = self.generation;
        let api = Arc::clone(&self.session.api);
        let timeout = self.session.award_timeout;
        let task_tx = self.task_tx.clone();
        info!(rfq = %rfq_id, bids = ?bid_ids, "Submitting award");

        tokio::spawn(async move {
            let award = api.award_order(rfq_id, &bid_ids);
            let result = match tokio::time::timeout(timeout, award).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout),
            };
            let _ = task_tx.send(TaskEvent::Award { generation, result }).await;
        });
    }

    // -- Stream events --

    async fn handle_stream_event(&mut self, event: StreamEvent) {
        if event.generation() != self.generation {
            debug!(
                "Discarding stale stream event (event gen: {}, current gen: {})",
                event.generation(),
                self.generation
            );
            return;
        }

        match event {
            StreamEvent::State { state, .. } => {
                info!(rfq = %self.state.rfq_id(), "Bid channel: {state}");
                if self.state.set_connection(state) {
                    self.publish().await;
                }
            }
            StreamEvent::BidPlaced { bid, .. } => {
                let bid_id = bid.id;
                match self.state.apply_streamed_bid(bid) {
                    Admission::Accepted => self.publish().await,
                    rejected => debug!(bid = %bid_id, ?rejected, "Streamed bid not shown"),
                }
            }
        }
    }

    // -- Task results --

    async fn handle_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Snapshot { generation, result } => {
                if generation != self.generation {
                    debug!(generation, "Discarding stale snapshot");
                    return;
                }
                self.snapshot_task = None;
                match result {
                    Ok((bids, user)) => {
                        info!(
                            rfq = %self.state.rfq_id(),
                            bids = bids.len(),
                            user = %user.id,
                            "Loaded bid snapshot"
                        );
                        self.state.apply_snapshot(bids, user);
                        self.publish().await;
                    }
                    Err(e) => warn!(rfq = %self.state.rfq_id(), "Failed to load bid snapshot: {e}"),
                }
            }
            TaskEvent::Award { generation, result } => {
                // An order placed for a previous RFQ still exists, so its
                // outcome is reported, but it must not touch the current view.
                let current = generation == self.generation;
                if !current {
                    info!(generation, "Award result arrived for a previous RFQ");
                }
                match result {
                    Ok(receipt) => {
                        info!(orders = ?receipt.order_ids, "Award succeeded");
                        if current {
                            self.state.finish_award(true);
                            self.publish().await;
                        }
                        let _ = self
                            .ui_tx
                            .send(ViewUpdate::AwardSucceeded {
                                order_ids: receipt.order_ids,
                                message: receipt.message,
                            })
                            .await;
                        let _ = self
                            .ui_tx
                            .send(ViewUpdate::Navigate(NavigationTarget::OrderTracking))
                            .await;
                    }
                    Err(e) => {
                        warn!("Award failed: {e}");
                        if current {
                            self.state.finish_award(false);
                            self.publish().await;
                        }
                        let _ = self
                            .ui_tx
                            .send(ViewUpdate::AwardFailed {
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            }
        }
    }
}
