//! BPF filter builders for GOOSE capture

/// Number of stacked 802.1Q tags matched by default
pub const DEFAULT_MAX_VLAN_DEPTH: usize = 2;

const GOOSE_PROTO: &str = "ether proto 0x88B8";

/// One filter clause per tag depth: untagged GOOSE, then GOOSE behind 1..=max_depth tags.
///
/// BPF has no "one or more tags" construct and every `vlan` keyword shifts the
/// following offsets by 4 bytes, so each depth gets its own clause.
pub fn goose_filter_clauses(max_depth: usize) -> Vec<String> {
    let mut clauses = Vec::with_capacity(max_depth + 1);
    clauses.push(GOOSE_PROTO.to_string());
    for depth in 1..=max_depth {
        clauses.push(format!("({}{})", "vlan and ".repeat(depth), GOOSE_PROTO));
    }
    clauses
}

/// GOOSE filter tolerating up to `max_depth` nested VLAN tags.
/// A depth of 0 matches untagged traffic only.
pub fn build_goose_filter(max_depth: usize) -> String {
    goose_filter_clauses(max_depth).join(" or ")
}
