use relay_application::command::Command;
use relay_macros::command;

#[command]
struct Ping;

#[command(name = "orders.create", output = u64, correlation_id = correlation_id, initiator = requested_by)]
struct CreateOrder {
    sku: String,
    correlation_id: Option<String>,
    requested_by: String,
}

fn main() {
    assert_eq!(Ping::NAME, "Ping");
    assert_eq!(Ping.initiator(), "SYSTEM");
    assert_eq!(Ping.correlation_id(), None);

    let mut cmd = CreateOrder {
        sku: "sku-1".into(),
        correlation_id: Some("cor-7".into()),
        requested_by: "alice".into(),
    };
    assert_eq!(CreateOrder::NAME, "orders.create");
    assert_eq!(cmd.correlation_id(), Some("cor-7"));
    assert_eq!(cmd.initiator(), "alice");
    assert!(cmd.validate().is_ok());
    assert!(!cmd.sku.is_empty());

    cmd.requested_by.clear();
    assert_eq!(cmd.initiator(), "SYSTEM");

    let out: <CreateOrder as Command>::Output = 42u64;
    assert_eq!(out, 42);
}
