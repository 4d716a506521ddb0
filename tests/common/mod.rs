#![allow(dead_code)]

use std::fs::File;
use std::io::Error;
use std::path::Path;
use storepay::application::gateway::PaymentGateway;
use storepay::domain::operation::{Metadata, ORDER_ID_KEY};
use storepay::infrastructure::in_memory::InMemoryOrderService;

pub const GATEWAY_SECRET: &str = "s3cr3t";

pub fn order_metadata(order: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(ORDER_ID_KEY.to_string(), order.to_string());
    metadata
}

/// Simulated gateway over an order service that knows `orders`, each
/// reachable under its own id as payment reference.
pub async fn simulated_gateway(orders: &[&str]) -> (PaymentGateway, InMemoryOrderService) {
    let service = InMemoryOrderService::new();
    for order in orders {
        service.add_order(order, order).await;
    }
    let gateway = PaymentGateway::simulated(Box::new(service.clone())).unwrap();
    (gateway, service)
}

/// Transaction gateway event body with `data` embedded verbatim.
pub fn gateway_event_body(event: &str, data: &str, timestamp: u64) -> String {
    format!(r#"{{"event":"{event}","data":{data},"timestamp":{timestamp}}}"#)
}

pub fn card_event_body(event_type: &str, intent_id: &str, status: &str, order: &str) -> String {
    format!(
        r#"{{"type":"{event_type}","data":{{"object":{{"id":"{intent_id}","object":"payment_intent","status":"{status}","metadata":{{"order_id":"{order}"}}}}}}}}"#
    )
}

pub fn write_scenario(path: &Path, rows: &[[&str; 6]]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["action", "label", "provider", "amount", "currency", "order"])?;
    for row in rows {
        wtr.write_record(row)?;
    }

    wtr.flush()?;
    Ok(())
}
