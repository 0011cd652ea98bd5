//! Property-data requests: submit, then poll the result endpoint until a terminal
//! status or the attempt budget runs out.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::Client;
use crate::error::{ApiError, Error, Result, ValidationError};
use crate::http::ApiRequest;
use crate::retry::RetryPolicy;

const SUBMIT_PATH: &str = "/property/v2/request";
const RESULT_TTL: Duration = Duration::from_secs(10 * 60);

/// What a property-data request is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyTarget {
    Coordinates {
        lat: f64,
        lon: f64,
    },
    Address {
        #[serde(rename = "completeAddress")]
        complete_address: String,
    },
}

impl PropertyTarget {
    pub fn coordinates(lat: f64, lon: f64) -> Self {
        PropertyTarget::Coordinates { lat, lon }
    }

    pub fn address(address: impl Into<String>) -> Self {
        PropertyTarget::Address {
            complete_address: address.into(),
        }
    }

    fn body(&self) -> Value {
        match self {
            PropertyTarget::Coordinates { lat, lon } => {
                json!({ "coordinates": { "lat": lat, "lon": lon } })
            }
            PropertyTarget::Address { complete_address } => {
                json!({ "address": { "completeAddress": complete_address } })
            }
        }
    }
}

impl fmt::Display for PropertyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyTarget::Coordinates { lat, lon } => write!(f, "({lat}, {lon})"),
            PropertyTarget::Address { complete_address } => write!(f, "{complete_address:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Submitted,
    InProgress,
    Complete,
    Failed,
    Unknown,
}

impl RequestStatus {
    /// Exact, case-sensitive match of the service's status strings.
    pub fn parse(s: &str) -> Self {
        match s {
            "Submitted" => RequestStatus::Submitted,
            "In Progress" | "InProgress" => RequestStatus::InProgress,
            "Complete" | "Completed" => RequestStatus::Complete,
            "Failed" => RequestStatus::Failed,
            _ => RequestStatus::Unknown,
        }
    }

    /// Reads `status` or `request.status` from a result payload.
    pub fn from_payload(payload: &Value) -> Self {
        payload
            .get("status")
            .or_else(|| payload.pointer("/request/status"))
            .and_then(Value::as_str)
            .map_or(RequestStatus::Unknown, Self::parse)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RequestStatus::Submitted | RequestStatus::InProgress)
    }
}

/// A submitted request and what polling has learned about it so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRequest {
    target: PropertyTarget,
    request_id: String,
    status: RequestStatus,
    /// Last payload returned by the result endpoint.
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    polls: u32,
}

impl PropertyRequest {
    /// A request the service has accepted under `request_id`.
    pub fn submitted(target: PropertyTarget, request_id: impl Into<String>) -> Self {
        Self {
            target,
            request_id: request_id.into(),
            status: RequestStatus::Submitted,
            payload: None,
            polls: 0,
        }
    }

    pub fn target(&self) -> &PropertyTarget {
        &self.target
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Result-endpoint calls made so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }
}

/// Outcome of one entry of [`Client::submit_many`].
#[derive(Debug)]
pub struct BatchItem {
    pub target: PropertyTarget,
    pub outcome: Result<PropertyRequest>,
}

impl BatchItem {
    pub fn request(&self) -> Option<&PropertyRequest> {
        self.outcome.as_ref().ok()
    }
}

fn result_path(request_id: &str) -> String {
    format!("/property/v2/result/{request_id}")
}

impl Client {
    /// Submits one property-data request. Only HTTP 202 with a request id counts
    /// as accepted.
    pub fn submit(&self, target: &PropertyTarget) -> Result<PropertyRequest> {
        match target {
            PropertyTarget::Coordinates { lat, lon } => self.validate_coordinates(*lat, *lon)?,
            PropertyTarget::Address { complete_address } => {
                if complete_address.trim().is_empty() {
                    return Err(ValidationError::EmptyAddress.into());
                }
            }
        }

        let request = ApiRequest::post(SUBMIT_PATH).imagery().json(target.body());
        let resp = self.execute(&request)?;
        let url = self.gateway.url_for(&request);

        if resp.status != 202 {
            return Err(ApiError::unexpected(&url, resp.status, &resp.body, 202).into());
        }

        let id = resp.json_value().and_then(|v| {
            match v.pointer("/request/id").or_else(|| v.get("id"))? {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        });
        let Some(id) = id else {
            return Err(ApiError::malformed(&url, resp.status, &resp.body, "a request id").into());
        };

        tracing::info!("submitted property request {id} for {target}");
        Ok(PropertyRequest::submitted(target.clone(), id))
    }

    /// Submits every target in order. Each one gets its own bounded retry; a failure
    /// is recorded in its [`BatchItem`] and the batch moves on.
    pub fn submit_many(&self, targets: &[PropertyTarget]) -> Vec<BatchItem> {
        let policy = RetryPolicy::exponential(3);
        let total = targets.len();

        let items: Vec<BatchItem> = targets
            .iter()
            .enumerate()
            .map(|(i, target)| {
                tracing::info!("submitting request {}/{total} for {target}", i + 1);
                let outcome = policy.run(
                    self.clock.as_ref(),
                    |_| self.submit(target),
                    |e| matches!(e, Error::Api(_)),
                );
                if let Err(e) = &outcome {
                    tracing::error!("giving up on {target}: {e}");
                }
                BatchItem {
                    target: target.clone(),
                    outcome,
                }
            })
            .collect();

        let ok = items.iter().filter(|i| i.outcome.is_ok()).count();
        tracing::info!("submitted {ok}/{total} property requests");
        items
    }

    /// One call to the result endpoint: `(status, payload)` for a 2xx with a JSON
    /// body, `None` otherwise.
    pub fn property_result(&self, request_id: &str) -> Result<Option<(u16, Value)>> {
        let resp = self.execute(&ApiRequest::get(result_path(request_id)).imagery())?;
        if !resp.is_success() {
            return Ok(None);
        }
        Ok(resp.json_value().map(|v| (resp.status, v)))
    }

    /// Polls until `request` completes, fails, or the poll budget is spent.
    ///
    /// Exhaustion is not an error: the status becomes `Unknown` with the last
    /// payload kept, or `Failed` when no attempt returned anything. A request
    /// that is already `Complete` is returned untouched. Only authentication
    /// failures abort the loop.
    pub fn poll(&self, request: &mut PropertyRequest) -> Result<RequestStatus> {
        if request.status == RequestStatus::Complete {
            return Ok(request.status);
        }

        let key = format!("GET {}", result_path(&request.request_id));
        if let Some(payload) = self
            .cache
            .as_ref()
            .and_then(|c| c.get::<Value>(&key, RESULT_TTL))
        {
            request.payload = Some(payload);
            request.status = RequestStatus::Complete;
            return Ok(request.status);
        }

        let max_polls = self.settings.max_polls;
        let mut saw_payload = false;

        for attempt in 1..=max_polls {
            request.polls += 1;

            match self.property_result(&request.request_id) {
                Ok(Some((status_code, payload))) => {
                    saw_payload = true;
                    let status = RequestStatus::from_payload(&payload);
                    request.payload = Some(payload);

                    if status_code != 202 && !status.is_pending() {
                        if status == RequestStatus::Failed {
                            tracing::warn!("request {} failed", request.request_id);
                            request.status = RequestStatus::Failed;
                        } else {
                            tracing::info!("request {} complete", request.request_id);
                            request.status = RequestStatus::Complete;
                            if let (Some(cache), Some(payload)) = (&self.cache, &request.payload) {
                                cache.put(&key, payload);
                            }
                        }
                        return Ok(request.status);
                    }
                    request.status = if status.is_pending() {
                        status
                    } else {
                        RequestStatus::InProgress
                    };
                }
                Ok(None) => {
                    tracing::warn!("no result payload for {} yet", request.request_id);
                }
                Err(e @ Error::Auth(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("polling {} failed: {e}", request.request_id);
                }
            }

            if attempt < max_polls {
                tracing::info!(
                    "request {} still processing (poll {attempt}/{max_polls}), waiting {:?}",
                    request.request_id,
                    self.settings.poll_interval
                );
                self.clock.sleep(self.settings.poll_interval);
            }
        }

        request.status = if saw_payload {
            RequestStatus::Unknown
        } else {
            RequestStatus::Failed
        };
        tracing::warn!(
            "stopped polling {} after {max_polls} attempts ({:?})",
            request.request_id,
            request.status
        );
        Ok(request.status)
    }

    /// Polls each request in turn.
    pub fn fetch_results(&self, requests: &mut [PropertyRequest]) -> Result<()> {
        let total = requests.len();
        for (i, request) in requests.iter_mut().enumerate() {
            tracing::info!(
                "fetching result {}/{total} for request {}",
                i + 1,
                request.request_id
            );
            self.poll(request)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_matching_is_exact() {
        assert_eq!(RequestStatus::parse("In Progress"), RequestStatus::InProgress);
        assert_eq!(RequestStatus::parse("InProgress"), RequestStatus::InProgress);
        assert_eq!(RequestStatus::parse("Completed"), RequestStatus::Complete);
        assert_eq!(RequestStatus::parse("in progress"), RequestStatus::Unknown);
        assert_eq!(RequestStatus::parse("Still In Progress"), RequestStatus::Unknown);
        assert_eq!(RequestStatus::parse(""), RequestStatus::Unknown);
    }

    #[test]
    fn status_is_read_from_either_location() {
        assert_eq!(
            RequestStatus::from_payload(&json!({"status": "Failed"})),
            RequestStatus::Failed
        );
        assert_eq!(
            RequestStatus::from_payload(&json!({"request": {"status": "Submitted"}})),
            RequestStatus::Submitted
        );
        assert_eq!(
            RequestStatus::from_payload(&json!({"property": {}})),
            RequestStatus::Unknown
        );
    }

    #[test]
    fn target_bodies_match_the_wire_format() {
        assert_eq!(
            PropertyTarget::coordinates(41.25, -95.99).body(),
            json!({"coordinates": {"lat": 41.25, "lon": -95.99}})
        );
        assert_eq!(
            PropertyTarget::address("1 Main St").body(),
            json!({"address": {"completeAddress": "1 Main St"}})
        );
    }

    #[test]
    fn serialized_target_uses_the_same_shape() {
        let target = PropertyTarget::address("1 Main St");

        assert_eq!(serde_json::to_value(&target).expect("json"), target.body());
    }
}
