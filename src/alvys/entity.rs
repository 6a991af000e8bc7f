use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{error::IngestError, interval::week::TimeWindow};

/// The record types exported from the Alvys public API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    Loads,
    Trips,
    Invoices,
    Drivers,
    Trucks,
    Trailers,
    Customers,
    Carriers,
}

const CARRIER_STATUSES: [&str; 7] = [
    "Pending",
    "Active",
    "Expired Insurance",
    "Interested",
    "Invited",
    "Packet Sent",
    "Packet Completed",
];

impl Entity {
    pub const ALL: [Entity; 8] = [
        Entity::Loads,
        Entity::Trips,
        Entity::Invoices,
        Entity::Drivers,
        Entity::Trucks,
        Entity::Trailers,
        Entity::Customers,
        Entity::Carriers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Loads => "loads",
            Entity::Trips => "trips",
            Entity::Invoices => "invoices",
            Entity::Drivers => "drivers",
            Entity::Trucks => "trucks",
            Entity::Trailers => "trailers",
            Entity::Customers => "customers",
            Entity::Carriers => "carriers",
        }
    }

    /// Windowed entities are filtered by the week; the others are
    /// exported as a full snapshot every run.
    pub fn is_windowed(&self) -> bool {
        matches!(self, Entity::Loads | Entity::Trips | Entity::Invoices)
    }

    /// The search filter sent with every page request, without paging fields.
    pub fn search_filter(&self, window: &TimeWindow) -> Map<String, Value> {
        let range = json!({"start": window.start_iso(), "end": window.end_iso()});
        let filter = match self {
            Entity::Loads | Entity::Trips => json!({
                "updatedAtRange": range,
                "status": [],
                "IncludeDeleted": true,
            }),
            Entity::Invoices => json!({
                "invoicedDateRange": range,
                "status": ["Paid"],
            }),
            Entity::Drivers => json!({
                "name": "",
                "employeeId": "",
                "fleetName": "",
                "status": [],
            }),
            Entity::Trucks => json!({
                "truckNumber": "",
                "fleetName": "",
                "vinNumber": "",
                "registeredName": "",
                "status": [],
            }),
            Entity::Trailers => json!({
                "status": [],
                "trailerNumber": "",
                "fleetName": "",
                "vinNumber": "",
            }),
            Entity::Customers => json!({
                "statuses": ["Active", "Inactive", "Disabled"],
            }),
            Entity::Carriers => json!({
                "status": CARRIER_STATUSES,
            }),
        };
        match filter {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Parse a list of entity names, `all` meaning every entity.  The result
    /// is deduplicated and in canonical order.
    pub fn normalise<S: AsRef<str>>(names: &[S]) -> Result<Vec<Entity>, IngestError> {
        let mut out: Vec<Entity> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if name.eq_ignore_ascii_case("all") {
                return Ok(Entity::ALL.to_vec());
            }
            out.push(name.parse()?);
        }
        if out.is_empty() {
            return Ok(Entity::ALL.to_vec());
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Entity {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "loads" => Ok(Entity::Loads),
            "trips" => Ok(Entity::Trips),
            "invoices" => Ok(Entity::Invoices),
            "drivers" => Ok(Entity::Drivers),
            "trucks" => Ok(Entity::Trucks),
            "trailers" => Ok(Entity::Trailers),
            "customers" => Ok(Entity::Customers),
            "carriers" => Ok(Entity::Carriers),
            _ => Err(IngestError::Config(format!("unknown entity {:?}", s))),
        }
    }
}
