use relay_domain::message::Identifiable;
use relay_macros::identifiable;

#[identifiable]
struct Heartbeat {
    sent_at: i64,
}

fn main() {
    let hb = Heartbeat { sent_at: 1 };
    assert_eq!(hb.event_id(), None);
    assert_eq!(hb.correlation_id(), None);
    assert_eq!(hb.event_type(), "Heartbeat");
    assert_eq!(hb.sent_at, 1);
}
