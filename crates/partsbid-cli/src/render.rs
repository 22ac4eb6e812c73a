// Plain-text rendering of the live bid board and session notices.

use std::fmt::Write;

use partsbid_core::protocol::Bid;
use partsbid_core::session::{NavigationTarget, ViewUpdate};
use partsbid_core::view::{BidBoard, VendorGroup};

pub fn render_update(update: &ViewUpdate) -> String {
    match update {
        ViewUpdate::Board(board) => render_board(board),
        ViewUpdate::AwardSucceeded { order_ids, message } => {
            let ids: Vec<String> = order_ids.iter().map(|id| format!("#{id}")).collect();
            format!(
                "{} Orders: {}",
                message.as_deref().unwrap_or("Order created."),
                ids.join(", ")
            )
        }
        ViewUpdate::AwardFailed { message } => format!("Award failed: {message}"),
        ViewUpdate::Navigate(NavigationTarget::OrderTracking) => "-> Order tracking".to_string(),
    }
}

pub fn render_board(board: &BidBoard) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "== RFQ {} == Live Offers [{}] {} bid(s)",
        board.rfq_id,
        board.connection,
        board.bid_count()
    );

    if board.groups.is_empty() {
        out.push_str("  Waiting for live offers...\n");
    }
    for group in &board.groups {
        render_group(&mut out, board, group);
    }

    if board.award.visible {
        let _ = write!(out, "  [ Award Order ({}) ]", board.award.count);
        if !board.award.enabled {
            out.push_str(" submitting...");
        }
        out.push('\n');
    }
    out
}

fn render_group(out: &mut String, board: &BidBoard, group: &VendorGroup) {
    match group.rating {
        Some(rating) => {
            let _ = writeln!(out, "  {} ({rating:.1})", group.label);
        }
        None => {
            let _ = writeln!(out, "  {}", group.label);
        }
    }
    for bid in &group.bids {
        let marker = if board.selected.contains(&bid.id) {
            "[x]"
        } else {
            "[ ]"
        };
        let _ = writeln!(out, "    {marker} {}", bid_line(bid));
    }
}

fn bid_line(bid: &Bid) -> String {
    let mut line = format!("#{} {}", bid.id, bid.item_name);
    if let Some(quantity) = bid.item_quantity {
        let _ = write!(line, " x{quantity}");
    }
    let _ = write!(line, "  ৳ {:.2}", bid.amount);
    if bid.brand.is_empty() {
        let _ = write!(line, "  {}", bid.part_category);
    } else {
        let _ = write!(line, "  {} • {}", bid.brand, bid.part_category);
    }
    if let Some(eta) = &bid.eta {
        let _ = write!(line, "  ETA: {eta}");
    }
    line.push_str(if bid.availability {
        "  In Stock"
    } else {
        "  Check Stock"
    });
    line
}
