use crate::domain::operation::PaymentOperation;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct OperationRow<'a> {
    label: &'a str,
    provider: &'a str,
    status: &'a str,
    amount_minor: i64,
    currency: &'a str,
    order: &'a str,
}

/// Writes labelled operations as CSV:
/// `label,provider,status,amount_minor,currency,order`.
pub struct OperationWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OperationWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_operations<'a, I>(&mut self, operations: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a PaymentOperation)>,
    {
        for (label, operation) in operations {
            self.writer.serialize(OperationRow {
                label,
                provider: operation.provider.as_str(),
                status: operation.canonical_status.as_str(),
                amount_minor: operation.amount_minor,
                currency: &operation.currency,
                order: operation.order_reference().unwrap_or_default(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
