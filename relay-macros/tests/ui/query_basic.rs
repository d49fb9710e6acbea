use relay_application::query::{Query, cache_key};
use relay_macros::query;

#[query(name = "orders.by_customer", output = Vec<String>, correlation_id = trace)]
struct OrdersByCustomer {
    customer_id: String,
    trace: String,
}

#[query(output = Option<u32>)]
#[derive(Clone)]
struct StockLevel {
    sku: String,
}

fn main() {
    let q = OrdersByCustomer {
        customer_id: "c-1".into(),
        trace: "cor-1".into(),
    };
    assert_eq!(OrdersByCustomer::NAME, "orders.by_customer");
    assert_eq!(q.correlation_id(), Some("cor-1"));

    let key = cache_key(&q).unwrap();
    assert!(key.starts_with("orders.by_customer:"));
    assert_eq!(key, cache_key(&q).unwrap());

    let stock = StockLevel { sku: "sku-9".into() };
    let copy = stock.clone();
    assert_eq!(StockLevel::NAME, "StockLevel");
    assert_eq!(cache_key(&stock).unwrap(), cache_key(&copy).unwrap());
    assert!(format!("{stock:?}").contains("sku-9"));
}
