use relay_application::command::Command;
use relay_application::error::AppError;
use relay_macros::command;

fn non_empty_lines(cmd: &PlaceOrder) -> Result<(), AppError> {
    if cmd.lines.is_empty() {
        return Err(AppError::validation("order must have at least one line"));
    }
    Ok(())
}

#[command(output = String, validate = non_empty_lines)]
struct PlaceOrder {
    lines: Vec<String>,
}

fn main() {
    let empty = PlaceOrder { lines: vec![] };
    let err = empty.validate().unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let ok = PlaceOrder {
        lines: vec!["sku-1".into()],
    };
    assert!(ok.validate().is_ok());
    assert_eq!(PlaceOrder::NAME, "PlaceOrder");
}
