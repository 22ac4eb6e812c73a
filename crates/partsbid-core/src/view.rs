// Live bid view state for one RFQ.
//
// `LiveBidState` is a plain synchronous reducer owned by the session task.
// It applies the role and exclusion filters, merges the REST snapshot with
// streamed bids, tracks the workshop's selection, and guards the award
// operation. Everything the caller renders comes out of `board()`.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::config::GroupBy;
use crate::protocol::{Bid, BidId, CurrentUser, LineItemId, RfqId, Role};
use crate::stream::ConnectionState;

/// Group key used when a bid carries no vendor display name.
pub const UNKNOWN_VENDOR: &str = "Unknown Vendor";

/// Outcome of offering a streamed bid to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// A bid with the same id is already shown.
    Duplicate,
    /// Vendor viewer, bid placed by someone else.
    ForeignVendor,
    /// The bid's line item has already been awarded.
    ExcludedItem,
    /// Vendor viewer whose identity has not loaded yet.
    IdentityPending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VendorGroup {
    pub key: String,
    pub label: String,
    pub rating: Option<f64>,
    pub bids: Vec<Bid>,
}

/// Derived state of the "create order" control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AwardControl {
    pub visible: bool,
    pub enabled: bool,
    /// Number of selected bids.
    pub count: usize,
}

/// Snapshot of everything the caller renders.
#[derive(Debug, Clone, PartialEq)]
pub struct BidBoard {
    pub rfq_id: RfqId,
    pub role: Role,
    pub connection: ConnectionState,
    pub groups: Vec<VendorGroup>,
    /// Selected bid ids, ascending.
    pub selected: Vec<BidId>,
    pub award: AwardControl,
    pub award_in_flight: bool,
}

impl BidBoard {
    pub fn bid_count(&self) -> usize {
        self.groups.iter().map(|g| g.bids.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Reducer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LiveBidState {
    rfq_id: RfqId,
    role: Role,
    excluded: HashSet<LineItemId>,
    group_by: GroupBy,
    user: Option<CurrentUser>,
    /// Most recent first.
    bids: Vec<Bid>,
    /// Ids of bids that arrived over the channel rather than the snapshot.
    streamed: HashSet<BidId>,
    selection: BTreeSet<BidId>,
    award_in_flight: bool,
    connection: ConnectionState,
}

impl LiveBidState {
    pub fn new(
        rfq_id: RfqId,
        role: Role,
        excluded: impl IntoIterator<Item = LineItemId>,
        group_by: GroupBy,
    ) -> Self {
        Self {
            rfq_id,
            role,
            excluded: excluded.into_iter().collect(),
            group_by,
            user: None,
            bids: Vec::new(),
            streamed: HashSet::new(),
            selection: BTreeSet::new(),
            award_in_flight: false,
            connection: ConnectionState::Connecting,
        }
    }

    pub fn rfq_id(&self) -> RfqId {
        self.rfq_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    /// Visible bids, most recent first.
    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    pub fn selection(&self) -> &BTreeSet<BidId> {
        &self.selection
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn award_in_flight(&self) -> bool {
        self.award_in_flight
    }

    /// Returns true if the state changed.
    pub fn set_connection(&mut self, state: ConnectionState) -> bool {
        if self.connection == state {
            return false;
        }
        self.connection = state;
        true
    }

    // -- Filtering --

    fn passes_filters(&self, bid: &Bid) -> Admission {
        if self.excluded.contains(&bid.line_item) {
            return Admission::ExcludedItem;
        }
        if self.role == Role::Vendor {
            match &self.user {
                None => return Admission::IdentityPending,
                Some(user) if bid.vendor != Some(user.id) => return Admission::ForeignVendor,
                Some(_) => {}
            }
        }
        Admission::Accepted
    }

    // -- Snapshot / stream merge --

    /// Replace the bid collection with a REST snapshot.
    ///
    /// Streamed bids the snapshot does not contain stay in front, in their
    /// current order. Bids present in both appear once. The selection is
    /// pruned to what is still visible.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Bid>, user: CurrentUser) {
        self.user = Some(user);

        let snapshot_ids: HashSet<BidId> = snapshot.iter().map(|b| b.id).collect();
        let previous = std::mem::take(&mut self.bids);
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(previous.len() + snapshot.len());

        let carried = previous
            .into_iter()
            .filter(|b| self.streamed.contains(&b.id) && !snapshot_ids.contains(&b.id));
        for bid in carried.chain(snapshot) {
            if self.passes_filters(&bid) != Admission::Accepted {
                continue;
            }
            if seen.insert(bid.id) {
                merged.push(bid);
            }
        }

        debug!(
            rfq = %self.rfq_id,
            shown = merged.len(),
            carried_over = merged.iter().filter(|b| self.streamed.contains(&b.id)).count(),
            "Applied bid snapshot"
        );
        self.streamed.retain(|id| seen.contains(id));
        self.bids = merged;
        self.prune_selection();
    }

    /// Offer a bid delivered over the channel. Accepted bids are prepended.
    pub fn apply_streamed_bid(&mut self, bid: Bid) -> Admission {
        let admission = self.passes_filters(&bid);
        if admission != Admission::Accepted {
            return admission;
        }
        if self.bids.iter().any(|b| b.id == bid.id) {
            return Admission::Duplicate;
        }
        self.streamed.insert(bid.id);
        self.bids.insert(0, bid);
        Admission::Accepted
    }

    fn prune_selection(&mut self) {
        let visible: HashSet<BidId> = self.bids.iter().map(|b| b.id).collect();
        self.selection.retain(|id| visible.contains(id));
    }

    // -- Selection --

    /// Toggle a visible bid in or out of the selection. Workshop only.
    /// Returns true if the selection changed.
    pub fn toggle(&mut self, bid_id: BidId) -> bool {
        if self.role != Role::Workshop {
            return false;
        }
        if !self.bids.iter().any(|b| b.id == bid_id) {
            debug!(bid = %bid_id, "Ignoring toggle of a bid that is not shown");
            return false;
        }
        if !self.selection.remove(&bid_id) {
            self.selection.insert(bid_id);
        }
        true
    }

    // -- Award guard --

    /// Claim the award slot. Returns the selected ids in ascending order, or
    /// `None` when the viewer cannot award, nothing is selected, or an award
    /// is already in flight.
    pub fn begin_award(&mut self) -> Option<Vec<BidId>> {
        if self.role != Role::Workshop || self.selection.is_empty() || self.award_in_flight {
            return None;
        }
        self.award_in_flight = true;
        Some(self.selection.iter().copied().collect())
    }

    /// Release the award slot. Success clears the selection.
    pub fn finish_award(&mut self, succeeded: bool) {
        self.award_in_flight = false;
        if succeeded {
            self.selection.clear();
        }
    }

    pub fn award_control(&self) -> AwardControl {
        let visible = self.role == Role::Workshop && !self.selection.is_empty();
        AwardControl {
            visible,
            enabled: visible && !self.award_in_flight,
            count: self.selection.len(),
        }
    }

    // -- Grouping --

    /// Bucket visible bids by vendor, in first-seen order.
    pub fn groups(&self) -> Vec<VendorGroup> {
        let mut groups: Vec<VendorGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for bid in &self.bids {
            let display_name = bid.vendor_name.as_deref().unwrap_or(UNKNOWN_VENDOR);
            let key = match self.group_by {
                GroupBy::DisplayName => display_name.to_string(),
                GroupBy::VendorId => match bid.vendor {
                    Some(vendor) => vendor.to_string(),
                    None => display_name.to_string(),
                },
            };

            match index.get(&key) {
                Some(&i) => groups[i].bids.push(bid.clone()),
                None => {
                    let label = bid
                        .vendor_shop_name
                        .clone()
                        .unwrap_or_else(|| display_name.to_string());
                    index.insert(key.clone(), groups.len());
                    groups.push(VendorGroup {
                        key,
                        label,
                        rating: bid.vendor_rating,
                        bids: vec![bid.clone()],
                    });
                }
            }
        }

        groups
    }

    pub fn board(&self) -> BidBoard {
        BidBoard {
            rfq_id: self.rfq_id,
            role: self.role,
            connection: self.connection,
            groups: self.groups(),
            selected: self.selection.iter().copied().collect(),
            award: self.award_control(),
            award_in_flight: self.award_in_flight,
        }
    }
}
