//! Text notices pushed to clients.

/// A direct message, delivered to its target.
#[must_use]
pub fn direct(from: &str, msg: &str) -> String {
    format!("user {from} send:{msg}")
}

/// A group message, delivered to every member except the sender.
#[must_use]
pub fn group(group: &str, from: &str, msg: &str) -> String {
    format!("group 【{group}】 user 【{from}】 send:{msg}")
}

/// A broadcast, delivered to every user except the sender.
#[must_use]
pub fn broadcast(from: &str, msg: &str) -> String {
    format!("user 【{from}】 send all:{msg}")
}

/// Join confirmation sent to the joiner, also published as the join notice.
///
/// The double space before `to` is part of the format clients match on.
#[must_use]
pub fn joined(user: &str, group: &str) -> String {
    format!("user 【{user}】 add  to group 【{group}】")
}

/// Rejection for a group send to a group nobody has joined.
#[must_use]
pub fn group_not_found(group: &str) -> String {
    format!("group【{group}】 not exists")
}

/// Rejection for a group send from a non-member.
#[must_use]
pub fn not_member(user: &str, group: &str) -> String {
    format!("user 【{user}】 not in 【{group}】")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices_carry_ids_and_text() {
        assert_eq!(direct("alice", "hi"), "user alice send:hi");
        assert_eq!(group("rust", "alice", "hi"), "group 【rust】 user 【alice】 send:hi");
        assert_eq!(broadcast("alice", "hi"), "user 【alice】 send all:hi");
        assert_eq!(joined("alice", "rust"), "user 【alice】 add  to group 【rust】");
        assert_eq!(group_not_found("rust"), "group【rust】 not exists");
        assert_eq!(not_member("alice", "rust"), "user 【alice】 not in 【rust】");
    }
}
