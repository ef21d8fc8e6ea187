use itertools::Itertools;
use log::warn;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::ApiError;
use crate::records::{PredictionRecord, VehicleRecord};

/// The predictions endpoint accepts at most this many vehicle ids per request.
pub const VEHICLES_PER_PREDICTION_CALL: usize = 10;

/// Every response wraps its payload in this single top-level object.
const ENVELOPE_KEY: &str = "bustime-response";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Vehicles,
    Routes,
    Patterns,
    Directions,
    Stops,
    Predictions,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Vehicles => "/getvehicles",
            Endpoint::Routes => "/getroutes",
            Endpoint::Patterns => "/getpatterns",
            Endpoint::Directions => "/getdirections",
            Endpoint::Stops => "/getstops",
            Endpoint::Predictions => "/getpredictions",
        }
    }
}

/// Counts issued requests against the service's daily quota. The check runs
/// before a request goes out, so a rejected call is never sent (and never
/// counted).
#[derive(Debug, Default)]
pub struct CallMeter {
    calls: u64,
    limit: Option<u64>,
}

impl CallMeter {
    pub fn new(limit: Option<u64>) -> Self {
        Self { calls: 0, limit }
    }

    pub fn charge(&mut self) -> Result<(), ApiError> {
        if let Some(limit) = self.limit {
            if self.calls >= limit {
                return Err(ApiError::QuotaExceeded { limit });
            }
        }
        self.calls += 1;
        Ok(())
    }

    pub fn current(&self) -> u64 {
        self.calls
    }
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the client and the actual HTTP stack, so the call-count and
/// failure-path properties are testable without a network.
pub trait Transport {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<RawResponse, ApiError>;
}

pub struct HttpTransport {
    http: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<RawResponse, ApiError> {
        let response = self
            .http
            .get(url)
            .query(params)
            .send()
            .map_err(|e| ApiError::Connect {
                message: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| ApiError::Connect {
            message: e.to_string(),
        })?;
        Ok(RawResponse { status, body })
    }
}

/// Single point of contact with the BusTime service.
pub struct Client<T: Transport> {
    transport: T,
    base_url: String,
    api_key: String,
    feed: String,
    meter: CallMeter,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: &Config) -> Self {
        Self {
            transport,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            feed: config.feed.clone(),
            meter: CallMeter::new(config.max_calls),
        }
    }

    pub fn calls_made(&self) -> u64 {
        self.meter.current()
    }

    /// Issues one GET against `endpoint` and unwraps the response envelope.
    /// The key, format and rtpidatafeed parameters are added to whatever the
    /// caller supplies. Failed calls are not retried.
    pub fn call(
        &mut self,
        endpoint: Endpoint,
        params: &[(&str, &str)],
    ) -> Result<Map<String, Value>, ApiError> {
        self.meter.charge()?;

        let url = format!("{}{}", self.base_url, endpoint.path());
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        query.push(("key".to_owned(), self.api_key.clone()));
        query.push(("format".to_owned(), "json".to_owned()));
        query.push(("rtpidatafeed".to_owned(), self.feed.clone()));

        let response = self.transport.get(&url, &query)?;
        if !(200..300).contains(&response.status) {
            return Err(ApiError::Transport {
                endpoint: endpoint.path(),
                status: response.status,
                body: response.body,
            });
        }

        let parsed: Value =
            serde_json::from_str(&response.body).map_err(|_| ApiError::EnvelopeMissing {
                endpoint: endpoint.path(),
            })?;
        match parsed {
            Value::Object(mut top) => match top.remove(ENVELOPE_KEY) {
                Some(Value::Object(envelope)) => Ok(envelope),
                _ => Err(ApiError::EnvelopeMissing {
                    endpoint: endpoint.path(),
                }),
            },
            _ => Err(ApiError::EnvelopeMissing {
                endpoint: endpoint.path(),
            }),
        }
    }

    /// Retrieves the running buses on the given routes (at most 10 ids).
    ///
    /// A failed call or a response without a vehicle list is a quiet miss:
    /// buses are legitimately absent during off-service hours, so it maps to
    /// an empty snapshot rather than an error. A vehicle entry that no longer
    /// matches the documented shape is loud, since it means the upstream
    /// contract changed.
    pub fn vehicles(&mut self, route_ids: &[String]) -> Result<Vec<VehicleRecord>, ApiError> {
        let rt = route_ids.iter().join(",");
        let envelope = match self.call(Endpoint::Vehicles, &[("rt", rt.as_str()), ("tmres", "s")]) {
            Ok(envelope) => envelope,
            Err(e @ ApiError::QuotaExceeded { .. }) => return Err(e),
            Err(e) => {
                warn!("Couldn't retrieve vehicles: {e}");
                return Ok(Vec::new());
            }
        };

        let Some(raw_vehicles) = envelope.get("vehicle") else {
            warn!("No vehicle list for routes {rt}: {envelope:?}");
            return Ok(Vec::new());
        };

        serde_json::from_value(raw_vehicles.clone()).map_err(|source| ApiError::Mapping {
            kind: "vehicle",
            source,
        })
    }

    /// Retrieves arrival predictions for the given vehicles, 10 by 10.
    ///
    /// One call is issued per group of at most 10 ids; a failed group
    /// contributes nothing and the remaining groups are still fetched. Only
    /// arrival-type predictions are kept.
    pub fn predictions_for(
        &mut self,
        vehicle_ids: &[String],
    ) -> Result<Vec<PredictionRecord>, ApiError> {
        let mut predictions = Vec::new();

        for group in vehicle_ids.chunks(VEHICLES_PER_PREDICTION_CALL) {
            let vid = group.iter().join(",");
            let envelope = match self
                .call(Endpoint::Predictions, &[("vid", vid.as_str()), ("tmres", "s")])
            {
                Ok(envelope) => envelope,
                Err(e @ ApiError::QuotaExceeded { .. }) => return Err(e),
                Err(e) => {
                    warn!("Couldn't retrieve predictions: {e}");
                    continue;
                }
            };

            let Some(raw_predictions) = envelope.get("prd") else {
                warn!("No prediction list for vehicles {vid}: {envelope:?}");
                continue;
            };

            let group_predictions: Vec<PredictionRecord> =
                serde_json::from_value(raw_predictions.clone()).map_err(|source| {
                    ApiError::Mapping {
                        kind: "prediction",
                        source,
                    }
                })?;
            predictions.extend(group_predictions.into_iter().filter(PredictionRecord::is_arrival));
        }

        Ok(predictions)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::{RawResponse, Transport};
    use crate::error::ApiError;

    pub struct Request {
        pub url: String,
        pub params: Vec<(String, String)>,
    }

    impl Request {
        pub fn param(&self, key: &str) -> Option<&str> {
            self.params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        }
    }

    #[derive(Default)]
    struct Script {
        responses: VecDeque<RawResponse>,
        requests: Vec<Request>,
    }

    /// Replays canned responses in order; an exhausted script answers with an
    /// empty envelope.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport(Rc<RefCell<Script>>);

    impl ScriptedTransport {
        pub fn respond(&self, status: u16, body: &str) {
            self.0.borrow_mut().responses.push_back(RawResponse {
                status,
                body: body.to_owned(),
            });
        }

        pub fn request_count(&self) -> usize {
            self.0.borrow().requests.len()
        }

        pub fn request(&self, index: usize) -> (String, Vec<(String, String)>) {
            let script = self.0.borrow();
            let request = &script.requests[index];
            (request.url.clone(), request.params.clone())
        }

        pub fn request_param(&self, index: usize, key: &str) -> Option<String> {
            self.0.borrow().requests[index]
                .param(key)
                .map(str::to_owned)
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, url: &str, params: &[(String, String)]) -> Result<RawResponse, ApiError> {
            let mut script = self.0.borrow_mut();
            script.requests.push(Request {
                url: url.to_owned(),
                params: params.to_vec(),
            });
            Ok(script.responses.pop_front().unwrap_or(RawResponse {
                status: 200,
                body: r#"{"bustime-response": {}}"#.to_owned(),
            }))
        }
    }
}
