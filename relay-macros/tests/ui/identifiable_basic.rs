use relay_domain::message::Identifiable;
use relay_macros::identifiable;
use serde::Deserialize;

#[identifiable(id = payment_id, correlation_id = trace_id, event_type = "payment.captured")]
#[derive(Debug, Deserialize)]
struct PaymentCaptured {
    payment_id: String,
    trace_id: Option<String>,
    amount: u64,
}

fn main() {
    let event: PaymentCaptured =
        serde_json::from_str(r#"{"payment_id":"p-1","trace_id":"t-1","amount":500}"#).unwrap();
    assert_eq!(event.event_id(), Some("p-1"));
    assert_eq!(event.correlation_id(), Some("t-1"));
    assert_eq!(event.event_type(), "payment.captured");
    assert_eq!(event.amount, 500);

    let blank: PaymentCaptured =
        serde_json::from_str(r#"{"payment_id":"","trace_id":null,"amount":1}"#).unwrap();
    assert_eq!(blank.event_id(), None);
    assert_eq!(blank.correlation_id(), None);
}
