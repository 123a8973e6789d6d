use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WatchError;

pub const OPERATION_NAME: &str = "GetRegistrationsForSale";

const REGISTRATIONS_QUERY: &str = r#"query GetRegistrationsForSale($id: ID!, $tickets: [String!], $limit: Int!) {
  event(id: $id) {
    id
    registrations_for_sale_count
    filtered_registrations_for_sale_count: registrations_for_sale_count(
      tickets: $tickets
    )
    sold_registrations_count
    cached_tickets_for_resale {
      id
      title
      __typename
    }
    registrations_for_sale(tickets: $tickets, limit: $limit) {
      id
      ticket {
        id
        title
        __typename
      }
      start_time
      corral_name
      time_slot {
        id
        start_date
        start_time
        title
        multi_date
        __typename
      }
      promotion {
        id
        title
        __typename
      }
      resale {
        id
        available
        total_amount
        fee
        public_url
        public_token
        upgrades {
          id
          product {
            id
            title
            is_ticket_fee
            __typename
          }
          product_variant {
            id
            title
            __typename
          }
          __typename
        }
        __typename
      }
      __typename
    }
    __typename
  }
}
"#;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
    pub operation_name: &'static str,
    pub variables: QueryVariables,
    pub query: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryVariables {
    pub id: String,
    pub tickets: Option<Vec<String>>,
    pub limit: u32,
}

impl GraphqlRequest {
    pub fn registrations_for_sale(event_id: &str, limit: u32) -> Self {
        Self {
            operation_name: OPERATION_NAME,
            variables: QueryVariables {
                id: event_id.to_string(),
                tickets: None,
                limit,
            },
            query: REGISTRATIONS_QUERY,
        }
    }
}

#[derive(Debug)]
pub struct EventSnapshot {
    pub registrations_for_sale_count: i64,
    pub filtered_registrations_for_sale_count: i64,
    pub registrations: Vec<Registration>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Registration {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ticket: Option<TicketInfo>,
    #[serde(default)]
    pub resale: Option<ResaleInfo>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct TicketInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct ResaleInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub total_amount: Option<Value>,
    #[serde(default)]
    pub fee: Option<Value>,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub public_token: Option<String>,
}

impl Registration {
    /// The resale flag is authoritative; the ticket flag covers listings without one.
    pub fn is_available(&self) -> bool {
        let resale = self.resale.as_ref().and_then(|resale| resale.available);
        let ticket = self.ticket.as_ref().and_then(|ticket| ticket.available);
        resale.or(ticket).unwrap_or(false)
    }

    pub fn purchase_url(&self) -> Option<&str> {
        self.resale
            .as_ref()
            .and_then(|resale| resale.public_url.as_deref())
            .or_else(|| {
                self.ticket
                    .as_ref()
                    .and_then(|ticket| ticket.public_url.as_deref())
            })
    }

    pub fn title(&self) -> &str {
        self.ticket
            .as_ref()
            .and_then(|ticket| ticket.title.as_deref())
            .unwrap_or("untitled")
    }
}

impl EventSnapshot {
    /// Extracts `data.event` and checks both count fields are integers before
    /// anything else in the body is trusted.
    pub fn from_body(body: &str) -> Result<Self, WatchError> {
        let payload: Value = serde_json::from_str(body)
            .map_err(|err| WatchError::MalformedResponse(format!("invalid json: {err}")))?;
        let event = payload
            .get("data")
            .and_then(|data| data.get("event"))
            .filter(|event| event.is_object())
            .ok_or_else(|| WatchError::MalformedResponse("missing data.event".to_string()))?;

        let registrations_for_sale_count = count_field(event, "registrations_for_sale_count")?;
        let filtered_registrations_for_sale_count =
            count_field(event, "filtered_registrations_for_sale_count")?;

        let registrations = match event.get("registrations_for_sale") {
            None | Some(Value::Null) => Vec::new(),
            Some(list) => Vec::<Registration>::deserialize(list).map_err(|err| {
                WatchError::MalformedResponse(format!("registrations_for_sale: {err}"))
            })?,
        };

        Ok(Self {
            registrations_for_sale_count,
            filtered_registrations_for_sale_count,
            registrations,
        })
    }

    pub fn available(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter().filter(|registration| registration.is_available())
    }
}

fn count_field(event: &Value, name: &str) -> Result<i64, WatchError> {
    match event.get(name) {
        Some(value) => value.as_i64().ok_or_else(|| {
            WatchError::MalformedResponse(format!("{name} is not an integer: {value}"))
        }),
        None => Err(WatchError::MalformedResponse(format!("missing {name}"))),
    }
}
