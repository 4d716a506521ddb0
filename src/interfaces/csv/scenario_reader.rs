use crate::domain::operation::Provider;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioAction {
    Create,
    Confirm,
    Refund,
    Decline,
    Fail,
    Get,
}

/// One row of a replay scenario.
///
/// `label` names the operation across rows; provider ids are only known once
/// `create` has run. `amount` is in major units of `currency`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioStep {
    pub action: ScenarioAction,
    pub label: String,
    #[serde(deserialize_with = "provider")]
    pub provider: Provider,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub order: Option<String>,
}

fn provider<'de, D>(deserializer: D) -> std::result::Result<Provider, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// Reads scenario steps from a CSV source.
///
/// Whitespace is trimmed and short rows are accepted; optional trailing
/// columns may be left out.
pub struct ScenarioReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes the steps, one `Result` per row.
    pub fn steps(self) -> impl Iterator<Item = Result<ScenarioStep>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
