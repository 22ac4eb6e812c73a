// Integration tests for the live-bidding session.
//
// These drive `LiveBidSession::run` end-to-end through its public command and
// update channels, with an in-memory marketplace API and an in-memory bid
// channel connector standing in for the backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use partsbid_core::api::{ApiError, MarketplaceApi};
use partsbid_core::protocol::*;
use partsbid_core::session::*;
use partsbid_core::stream::{BidSocket, BidStreamConnector, ConnectionState, StreamError};
use partsbid_core::view::BidBoard;
use reqwest::Url;
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

// ===========================================================================
// Test helpers
// ===========================================================================

fn bid(id: u64, vendor: u64, item: u64) -> Bid {
    serde_json::from_value(json!({
        "id": id,
        "rfq_item": item,
        "vendor": vendor,
        "vendor_name": format!("vendor{vendor}"),
        "vendor_shop_name": "",
        "vendor_rating": "4.20",
        "amount": "100.00",
        "item_name": "Brake pad",
        "item_quantity": 2,
        "brand": "Bosch",
        "part_category": "GENUINE_OEM",
        "availability": true,
        "eta": "2 hours",
        "status": "PENDING",
        "created_at": "2024-05-01T10:00:00Z"
    }))
    .unwrap()
}

/// A bid exactly as the backend's bid serializer emits it, with no vendor id.
fn serializer_bid_json(id: u64, item: u64) -> serde_json::Value {
    json!({
        "id": id,
        "rfq_item": item,
        "item_name": "Oil filter",
        "item_quantity": 1,
        "vendor_name": "karim",
        "vendor_shop_name": "Karim Motors",
        "vendor_rating": "3.80",
        "amount": "450.00",
        "part_category": "AFTERMARKET_BRANDED",
        "brand": "Mann",
        "availability": true,
        "eta": "",
        "remarks": "",
        "status": "PENDING",
        "created_at": "2024-05-01T10:00:00.123456Z"
    })
}

fn bid_frame(id: u64, vendor: u64, item: u64) -> Message {
    let bid = serde_json::to_value(bid(id, vendor, item)).unwrap();
    Message::Text(json!({"type": "bid_placed", "bid": bid}).to_string().into())
}

fn user(id: u64, role: Role) -> CurrentUser {
    serde_json::from_value(json!({"id": id, "role": role, "username": "tester"})).unwrap()
}

// -- Marketplace API double --

enum AwardOutcome {
    Succeed(Vec<u64>),
    Reject(&'static str),
}

struct MockApi {
    bids: HashMap<RfqId, Vec<Bid>>,
    user: CurrentUser,
    fail_snapshot: bool,
    snapshot_gate: Option<Arc<Notify>>,
    award_gate: Option<Arc<Notify>>,
    award_outcome: AwardOutcome,
    award_calls: AtomicUsize,
    awarded: Mutex<Vec<Vec<BidId>>>,
}

impl MockApi {
    fn new(user: CurrentUser) -> Self {
        Self {
            bids: HashMap::new(),
            user,
            fail_snapshot: false,
            snapshot_gate: None,
            award_gate: None,
            award_outcome: AwardOutcome::Succeed(vec![501]),
            award_calls: AtomicUsize::new(0),
            awarded: Mutex::new(Vec::new()),
        }
    }

    fn with_bids(mut self, rfq: u64, bids: Vec<Bid>) -> Self {
        self.bids.insert(RfqId(rfq), bids);
        self
    }
}

#[async_trait]
impl MarketplaceApi for MockApi {
    async fn fetch_bids(&self, rfq_id: RfqId) -> Result<Vec<Bid>, ApiError> {
        if let Some(gate) = &self.snapshot_gate {
            gate.notified().await;
        }
        if self.fail_snapshot {
            return Err(ApiError::Status {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }
        Ok(self.bids.get(&rfq_id).cloned().unwrap_or_default())
    }

    async fn current_user(&self) -> Result<CurrentUser, ApiError> {
        Ok(self.user.clone())
    }

    async fn award_order(
        &self,
        _rfq_id: RfqId,
        bid_ids: &[BidId],
    ) -> Result<AwardReceipt, ApiError> {
        self.award_calls.fetch_add(1, Ordering::SeqCst);
        self.awarded.lock().unwrap().push(bid_ids.to_vec());
        if let Some(gate) = &self.award_gate {
            gate.notified().await;
        }
        match &self.award_outcome {
            AwardOutcome::Succeed(order_ids) => Ok(AwardReceipt {
                message: Some("Order(s) created successfully".into()),
                order_ids: order_ids.clone(),
            }),
            AwardOutcome::Reject(message) => Err(ApiError::Status {
                status: 400,
                message: (*message).into(),
            }),
        }
    }
}

// -- Bid channel double --

/// Hands out in-memory sockets. The test pushes frames through the sender
/// recorded for each connection; close frames written by the session are
/// counted.
#[derive(Default)]
struct MockConnector {
    urls: Mutex<Vec<Url>>,
    feeds: Mutex<Vec<mpsc::UnboundedSender<Message>>>,
    closes: Arc<AtomicUsize>,
}

impl MockConnector {
    fn connects(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn push(&self, connection: usize, frame: Message) {
        // The receiving end is gone once that connection has been torn down.
        let _ = self.feeds.lock().unwrap()[connection].send(frame);
    }
}

#[async_trait]
impl BidStreamConnector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<BidSocket, StreamError> {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        self.urls.lock().unwrap().push(url.clone());
        self.feeds.lock().unwrap().push(feed_tx);

        let frames = stream::unfold(feed_rx, |mut rx| async move {
            let msg = rx.recv().await?;
            Some((Ok::<_, WsError>(msg), rx))
        });
        let sink = futures_util::sink::unfold(
            Arc::clone(&self.closes),
            |closes, msg: Message| async move {
                if matches!(msg, Message::Close(_)) {
                    closes.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, WsError>(closes)
            },
        );
        Ok(BidSocket {
            sink: Box::pin(sink),
            stream: Box::pin(frames),
        })
    }
}

// -- Session harness --

struct Harness {
    cmd_tx: mpsc::Sender<SessionCommand>,
    ui_rx: mpsc::Receiver<ViewUpdate>,
    handle: JoinHandle<anyhow::Result<()>>,
    api: Arc<MockApi>,
    connector: Arc<MockConnector>,
}

fn start(api: MockApi, params: SessionParams) -> Harness {
    start_with(api, params, |session| session)
}

fn start_with(
    api: MockApi,
    params: SessionParams,
    configure: impl FnOnce(LiveBidSession) -> LiveBidSession,
) -> Harness {
    let api = Arc::new(api);
    let connector = Arc::new(MockConnector::default());
    let base = Url::parse("http://127.0.0.1:8000/api/v1/").unwrap();
    let session = configure(LiveBidSession::new(
        Arc::clone(&api) as Arc<dyn MarketplaceApi>,
        Arc::clone(&connector) as Arc<dyn BidStreamConnector>,
        base,
    ));
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (ui_tx, ui_rx) = mpsc::channel(64);
    let handle = tokio::spawn(session.run(params, cmd_rx, ui_tx));
    Harness {
        cmd_tx,
        ui_rx,
        handle,
        api,
        connector,
    }
}

impl Harness {
    async fn send(&self, cmd: SessionCommand) {
        self.cmd_tx.send(cmd).await.unwrap();
    }

    /// Receive updates until one matches, failing after two seconds.
    async fn wait_for(&mut self, mut pred: impl FnMut(&ViewUpdate) -> bool) -> ViewUpdate {
        let deadline = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let update = self.ui_rx.recv().await.expect("session ended early");
                if pred(&update) {
                    return update;
                }
            }
        });
        deadline.await.expect("timed out waiting for view update")
    }

    async fn wait_for_board(&mut self, mut pred: impl FnMut(&BidBoard) -> bool) -> BidBoard {
        match self
            .wait_for(|u| matches!(u, ViewUpdate::Board(b) if pred(b)))
            .await
        {
            ViewUpdate::Board(board) => board,
            other => unreachable!("{other:?}"),
        }
    }

    /// Collect every update that arrives within `window`.
    async fn drain_for(&mut self, window: Duration) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        let _ = tokio::time::timeout(window, async {
            while let Some(update) = self.ui_rx.recv().await {
                updates.push(update);
            }
        })
        .await;
        updates
    }

    async fn shutdown(self) {
        self.cmd_tx.send(SessionCommand::Shutdown).await.unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn shown_ids(board: &BidBoard) -> Vec<u64> {
    board
        .groups
        .iter()
        .flat_map(|g| g.bids.iter().map(|b| b.id.0))
        .collect()
}

fn is_live(board: &BidBoard) -> bool {
    board.connection == ConnectionState::Live
}

/// Workshop session on RFQ 1 with bids 1 and 2 loaded and the channel live.
async fn workshop_with_two_bids(api: MockApi) -> Harness {
    let api = api.with_bids(1, vec![bid(1, 5, 10), bid(2, 6, 11)]);
    let mut h = start(api, SessionParams::new(RfqId(1), Role::Workshop));
    h.wait_for_board(|b| b.bid_count() == 2 && is_live(b)).await;
    h
}

// ===========================================================================
// Snapshot and filtering
// ===========================================================================

#[tokio::test]
async fn vendor_sees_only_own_bids() {
    let api =
        MockApi::new(user(5, Role::Vendor)).with_bids(1, vec![bid(1, 5, 10), bid(2, 9, 10)]);
    let mut h = start(api, SessionParams::new(RfqId(1), Role::Vendor));

    let board = h.wait_for_board(|b| b.bid_count() > 0).await;
    assert_eq!(shown_ids(&board), vec![1]);
    h.shutdown().await;
}

#[tokio::test]
async fn vendor_with_no_matching_bids_sees_nothing() {
    let api = MockApi::new(user(9, Role::Vendor)).with_bids(1, vec![bid(1, 5, 10)]);
    let mut h = start(api, SessionParams::new(RfqId(1), Role::Vendor));

    h.wait_for_board(is_live).await;
    // Let the snapshot land, then push a foreign bid over the channel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.connector.push(0, bid_frame(3, 5, 10));

    let updates = h.drain_for(Duration::from_millis(200)).await;
    for update in &updates {
        if let ViewUpdate::Board(board) = update {
            assert!(shown_ids(board).is_empty(), "foreign bid shown: {board:?}");
        }
    }
    h.shutdown().await;
}

#[tokio::test]
async fn workshop_sees_bids_without_vendor_id() {
    let snapshot: Bid = serde_json::from_value(serializer_bid_json(1, 10)).unwrap();
    assert_eq!(snapshot.vendor, None);
    let api = MockApi::new(user(3, Role::Workshop)).with_bids(1, vec![snapshot]);
    let mut h = start(api, SessionParams::new(RfqId(1), Role::Workshop));
    h.wait_for_board(|b| b.bid_count() == 1 && is_live(b)).await;

    let frame = json!({"type": "bid_placed", "bid": serializer_bid_json(2, 11)});
    h.connector.push(0, Message::Text(frame.to_string().into()));

    let board = h.wait_for_board(|b| b.bid_count() == 2).await;
    assert_eq!(shown_ids(&board), vec![2, 1]);
    assert_eq!(board.groups.len(), 1);
    assert_eq!(board.groups[0].label, "Karim Motors");
    h.shutdown().await;
}

#[tokio::test]
async fn streamed_bid_for_awarded_item_is_dropped() {
    let api = MockApi::new(user(3, Role::Workshop));
    let params = SessionParams::new(RfqId(1), Role::Workshop).with_excluded([LineItemId(10)]);
    let mut h = start(api, params);
    h.wait_for_board(is_live).await;

    h.connector.push(0, bid_frame(7, 5, 10));
    h.connector.push(0, bid_frame(8, 5, 11));

    let board = h.wait_for_board(|b| b.bid_count() > 0).await;
    assert_eq!(shown_ids(&board), vec![8]);
    h.shutdown().await;
}

#[tokio::test]
async fn streamed_bid_before_snapshot_survives_it() {
    let gate = Arc::new(Notify::new());
    let mut api = MockApi::new(user(3, Role::Workshop)).with_bids(1, vec![bid(1, 5, 10)]);
    api.snapshot_gate = Some(Arc::clone(&gate));
    let mut h = start(api, SessionParams::new(RfqId(1), Role::Workshop));
    h.wait_for_board(is_live).await;

    h.connector.push(0, bid_frame(7, 6, 10));
    h.wait_for_board(|b| shown_ids(b) == vec![7]).await;

    gate.notify_one();
    let board = h.wait_for_board(|b| b.bid_count() == 2).await;
    assert_eq!(shown_ids(&board), vec![7, 1]);
    h.shutdown().await;
}

#[tokio::test]
async fn bid_in_snapshot_and_stream_appears_once() {
    let mut h = workshop_with_two_bids(MockApi::new(user(3, Role::Workshop))).await;

    h.connector.push(0, bid_frame(2, 6, 11));
    h.connector.push(0, bid_frame(9, 6, 11));

    let board = h.wait_for_board(|b| shown_ids(b).contains(&9)).await;
    let mut ids = shown_ids(&board);
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 9]);
    h.shutdown().await;
}

#[tokio::test]
async fn snapshot_failure_leaves_view_untouched() {
    let mut api = MockApi::new(user(3, Role::Workshop)).with_bids(1, vec![bid(1, 5, 10)]);
    api.fail_snapshot = true;
    let mut h = start(api, SessionParams::new(RfqId(1), Role::Workshop));
    h.wait_for_board(is_live).await;

    h.connector.push(0, bid_frame(4, 5, 10));
    let board = h.wait_for_board(|b| b.bid_count() > 0).await;
    assert_eq!(shown_ids(&board), vec![4]);
    h.shutdown().await;
}

// ===========================================================================
// Connection lifecycle
// ===========================================================================

#[tokio::test]
async fn channel_address_follows_api_base() {
    let h = workshop_with_two_bids(MockApi::new(user(3, Role::Workshop))).await;
    assert_eq!(
        h.connector.urls.lock().unwrap()[0].as_str(),
        "ws://127.0.0.1:8000/ws/rfqs/1/"
    );
    h.shutdown().await;
}

#[tokio::test]
async fn peer_close_shows_disconnected() {
    let mut h = workshop_with_two_bids(MockApi::new(user(3, Role::Workshop))).await;

    h.connector.push(0, Message::Close(None));
    let board = h
        .wait_for_board(|b| b.connection == ConnectionState::Disconnected)
        .await;
    assert_eq!(board.bid_count(), 2);
    assert_eq!(h.connector.connects(), 1, "no automatic reconnect");
    h.shutdown().await;
}

#[tokio::test]
async fn switching_rfq_replaces_connection_and_state() {
    let api = MockApi::new(user(3, Role::Workshop)).with_bids(2, vec![bid(20, 5, 30)]);
    let mut h = workshop_with_two_bids(api).await;
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    h.wait_for_board(|b| b.selected == vec![BidId(1)]).await;

    h.send(SessionCommand::SwitchRfq {
        rfq_id: RfqId(2),
        excluded: vec![],
    })
    .await;

    let board = h.wait_for_board(|b| b.rfq_id == RfqId(2)).await;
    assert!(board.selected.is_empty());
    assert_eq!(board.bid_count(), 0);
    assert_eq!(h.connector.closes(), 1);

    let board = h.wait_for_board(|b| b.bid_count() == 1 && is_live(b)).await;
    assert_eq!(shown_ids(&board), vec![20]);
    assert_eq!(h.connector.connects(), 2);
    assert_eq!(
        h.connector.urls.lock().unwrap()[1].as_str(),
        "ws://127.0.0.1:8000/ws/rfqs/2/"
    );

    // Frames on the old connection no longer reach the view.
    h.connector.push(0, bid_frame(99, 5, 30));
    let updates = h.drain_for(Duration::from_millis(100)).await;
    assert!(updates.iter().all(|u| match u {
        ViewUpdate::Board(b) => !shown_ids(b).contains(&99),
        _ => true,
    }));

    h.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_connection_once() {
    let h = workshop_with_two_bids(MockApi::new(user(3, Role::Workshop))).await;
    let connector = Arc::clone(&h.connector);

    h.shutdown().await;
    assert_eq!(connector.closes(), 1);
    assert_eq!(connector.connects(), 1);
}

// ===========================================================================
// Selection and award
// ===========================================================================

#[tokio::test]
async fn award_success_clears_selection_and_navigates_once() {
    let mut h = workshop_with_two_bids(MockApi::new(user(3, Role::Workshop))).await;
    h.send(SessionCommand::ToggleBid(BidId(2))).await;
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    let board = h.wait_for_board(|b| b.selected.len() == 2).await;
    assert!(board.award.visible && board.award.enabled);
    assert_eq!(board.award.count, 2);

    h.send(SessionCommand::Award).await;
    let update = h
        .wait_for(|u| matches!(u, ViewUpdate::AwardSucceeded { .. }))
        .await;
    assert_eq!(
        update,
        ViewUpdate::AwardSucceeded {
            order_ids: vec![501],
            message: Some("Order(s) created successfully".into()),
        }
    );

    let rest = h.drain_for(Duration::from_millis(100)).await;
    let navigations = rest
        .iter()
        .filter(|u| matches!(u, ViewUpdate::Navigate(NavigationTarget::OrderTracking)))
        .count();
    assert_eq!(navigations, 1);

    assert_eq!(
        h.api.awarded.lock().unwrap().clone(),
        vec![vec![BidId(1), BidId(2)]]
    );
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    let board = h.wait_for_board(|_| true).await;
    assert_eq!(board.selected, vec![BidId(1)], "selection was cleared");
    h.shutdown().await;
}

#[tokio::test]
async fn rejected_award_keeps_selection() {
    let mut api = MockApi::new(user(3, Role::Workshop));
    api.award_outcome = AwardOutcome::Reject("Bid 2 is no longer pending");
    let mut h = workshop_with_two_bids(api).await;
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    h.send(SessionCommand::ToggleBid(BidId(2))).await;
    h.wait_for_board(|b| b.selected.len() == 2).await;

    h.send(SessionCommand::Award).await;
    let update = h
        .wait_for(|u| matches!(u, ViewUpdate::AwardFailed { .. }))
        .await;
    match update {
        ViewUpdate::AwardFailed { message } => {
            assert!(message.contains("Bid 2 is no longer pending"), "{message}")
        }
        other => unreachable!("{other:?}"),
    }

    let rest = h.drain_for(Duration::from_millis(100)).await;
    assert!(!rest.iter().any(|u| matches!(u, ViewUpdate::Navigate(_))));

    // Deselecting one bid leaves the other, so both survived the failure.
    h.send(SessionCommand::ToggleBid(BidId(2))).await;
    let board = h.wait_for_board(|_| true).await;
    assert_eq!(board.selected, vec![BidId(1)]);
    assert!(board.award.enabled);
    h.shutdown().await;
}

#[tokio::test]
async fn rapid_double_award_submits_once() {
    let gate = Arc::new(Notify::new());
    let mut api = MockApi::new(user(3, Role::Workshop));
    api.award_gate = Some(Arc::clone(&gate));
    let mut h = workshop_with_two_bids(api).await;
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    h.wait_for_board(|b| b.selected.len() == 1).await;

    h.send(SessionCommand::Award).await;
    h.send(SessionCommand::Award).await;
    // Commands are handled in order: once this toggle shows up, both award
    // commands have been processed.
    h.send(SessionCommand::ToggleBid(BidId(2))).await;
    let board = h.wait_for_board(|b| b.selected.len() == 2).await;
    assert!(board.award_in_flight);
    assert!(board.award.visible && !board.award.enabled);

    gate.notify_one();
    h.wait_for(|u| matches!(u, ViewUpdate::AwardSucceeded { .. }))
        .await;
    assert_eq!(h.api.award_calls.load(Ordering::SeqCst), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn vendor_cannot_award() {
    let api = MockApi::new(user(5, Role::Vendor)).with_bids(1, vec![bid(1, 5, 10)]);
    let mut h = start(api, SessionParams::new(RfqId(1), Role::Vendor));
    h.wait_for_board(|b| b.bid_count() == 1).await;

    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    h.send(SessionCommand::Award).await;
    let updates = h.drain_for(Duration::from_millis(100)).await;
    assert!(updates.iter().all(|u| match u {
        ViewUpdate::Board(b) => b.selected.is_empty() && !b.award.visible,
        ViewUpdate::AwardSucceeded { .. } | ViewUpdate::AwardFailed { .. } => false,
        _ => true,
    }));
    assert_eq!(h.api.award_calls.load(Ordering::SeqCst), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn award_result_after_rfq_switch_is_still_reported() {
    let gate = Arc::new(Notify::new());
    let mut api = MockApi::new(user(3, Role::Workshop)).with_bids(2, vec![bid(20, 5, 30)]);
    api.award_gate = Some(Arc::clone(&gate));
    let mut h = workshop_with_two_bids(api).await;
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    h.send(SessionCommand::Award).await;
    h.wait_for_board(|b| b.award_in_flight).await;

    h.send(SessionCommand::SwitchRfq {
        rfq_id: RfqId(2),
        excluded: vec![],
    })
    .await;
    h.wait_for_board(|b| b.rfq_id == RfqId(2) && b.bid_count() == 1 && is_live(b))
        .await;

    // The order for RFQ 1 was placed, so the caller hears about it.
    gate.notify_one();
    let update = h
        .wait_for(|u| matches!(u, ViewUpdate::AwardSucceeded { .. }))
        .await;
    assert_eq!(
        update,
        ViewUpdate::AwardSucceeded {
            order_ids: vec![501],
            message: Some("Order(s) created successfully".into()),
        }
    );
    let rest = h.drain_for(Duration::from_millis(100)).await;
    let navigations = rest
        .iter()
        .filter(|u| matches!(u, ViewUpdate::Navigate(NavigationTarget::OrderTracking)))
        .count();
    assert_eq!(navigations, 1);
    assert!(
        !rest.iter().any(|u| matches!(u, ViewUpdate::Board(_))),
        "the RFQ 2 board was republished: {rest:?}"
    );

    // RFQ 2 is untouched and can start its own award.
    h.send(SessionCommand::ToggleBid(BidId(20))).await;
    let board = h.wait_for_board(|_| true).await;
    assert_eq!(board.rfq_id, RfqId(2));
    assert_eq!(board.selected, vec![BidId(20)]);
    assert!(!board.award_in_flight);
    assert!(board.award.visible && board.award.enabled);
    h.shutdown().await;
}

#[tokio::test]
async fn award_that_never_answers_times_out() {
    let gate = Arc::new(Notify::new());
    let mut api = MockApi::new(user(3, Role::Workshop)).with_bids(1, vec![bid(1, 5, 10)]);
    api.award_gate = Some(Arc::clone(&gate));
    let mut h = start_with(api, SessionParams::new(RfqId(1), Role::Workshop), |session| {
        session.with_award_timeout(Duration::from_millis(100))
    });
    h.wait_for_board(|b| b.bid_count() == 1 && is_live(b)).await;
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    h.send(SessionCommand::Award).await;
    h.wait_for_board(|b| b.award_in_flight).await;

    // The gate is never opened.
    let update = h
        .wait_for(|u| matches!(u, ViewUpdate::AwardFailed { .. }))
        .await;
    match update {
        ViewUpdate::AwardFailed { message } => assert!(message.contains("timed out"), "{message}"),
        other => unreachable!("{other:?}"),
    }

    // The guard is released and the selection kept.
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    let board = h.wait_for_board(|_| true).await;
    assert!(board.selected.is_empty());
    assert!(!board.award_in_flight);
    h.send(SessionCommand::ToggleBid(BidId(1))).await;
    let board = h.wait_for_board(|_| true).await;
    assert_eq!(board.selected, vec![BidId(1)]);
    assert!(board.award.visible && board.award.enabled);
    assert_eq!(h.api.award_calls.load(Ordering::SeqCst), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn closing_command_channel_ends_session() {
    let h = workshop_with_two_bids(MockApi::new(user(3, Role::Workshop))).await;
    let Harness {
        cmd_tx,
        handle,
        connector,
        ..
    } = h;

    drop(cmd_tx);
    handle.await.unwrap().unwrap();
    assert_eq!(connector.closes(), 1);
}
