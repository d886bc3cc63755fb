//! Profile view: attribute results for a subject plus per-tab journeys.
//!
//! A [`ProfileTemplate`] lists the attributes to compute. Attributes of type
//! `tab` are requested verbose, so the backend also returns the events behind
//! them as an embedded JSON document. [`ProfileView::assemble`] pairs each
//! template attribute with its result, splits comma-separated values and
//! decodes tab journeys. A tab whose journey cannot be decoded is kept with
//! no events.

use crate::error::{FeedError, Result};
use crate::types::{normalize_batch, Event, RawEvent, SubjectId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

const TAB: &str = "tab";

/// One attribute requested by a profile template.
///
/// Fields this crate does not interpret are carried through unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateAttribute {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(rename = "DisplayName", default)]
    pub display_name: String,

    /// Ask the backend for the events behind the result.
    #[serde(rename = "Verbose", default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TemplateAttribute {
    /// Whether this attribute renders as a journey tab.
    pub fn is_tab(&self) -> bool {
        self.kind.as_deref() == Some(TAB)
    }
}

/// Attribute list sent to the profile endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileTemplate {
    #[serde(rename = "Attributes", default)]
    pub attributes: Vec<TemplateAttribute>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileTemplate {
    /// Parse a template document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The template as sent to the backend: tab attributes marked verbose.
    pub fn request_body(&self) -> Self {
        let mut body = self.clone();
        for attribute in body.attributes.iter_mut().filter(|a| a.is_tab()) {
            attribute.verbose = Some(true);
        }
        body
    }
}

/// Backend result for one template attribute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeResult {
    /// Comma-separated values.
    #[serde(default)]
    pub result: String,

    /// JSON array of events, present for verbose attributes.
    #[serde(rename = "journeyEvents", default)]
    pub journey_events: Option<String>,
}

/// Profile endpoint response, one result per template attribute in order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileResponse {
    #[serde(rename = "attributeView", default)]
    pub attribute_view: Vec<AttributeResult>,
}

impl ProfileResponse {
    /// Parse a response document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Computes a subject's profile from a template.
pub trait ProfileLoader: Send + Sync {
    fn fetch_profile(&self, subject: &SubjectId, template: &ProfileTemplate)
        -> Result<ProfileResponse>;
}

impl<F> ProfileLoader for F
where
    F: Fn(&SubjectId, &ProfileTemplate) -> Result<ProfileResponse> + Send + Sync,
{
    fn fetch_profile(
        &self,
        subject: &SubjectId,
        template: &ProfileTemplate,
    ) -> Result<ProfileResponse> {
        self(subject, template)
    }
}

/// One template attribute paired with its result.
#[derive(Debug)]
pub struct ProfileAttribute {
    pub query: TemplateAttribute,
    pub values: Vec<String>,
    /// Tab journey, newest first. `None` for non-tab attributes and for tabs
    /// whose journey was absent or undecodable.
    pub journey: Option<Vec<Event>>,
    /// Records and documents dropped while decoding the journey.
    pub diagnostics: Vec<FeedError>,
}

impl ProfileAttribute {
    /// Whether this attribute renders as a journey tab.
    pub fn is_tab(&self) -> bool {
        self.query.is_tab()
    }

    /// Number of events in the tab journey.
    pub fn event_count(&self) -> usize {
        self.journey.as_ref().map_or(0, Vec::len)
    }
}

/// A subject's assembled profile.
#[derive(Debug, Default)]
pub struct ProfileView {
    pub attributes: Vec<ProfileAttribute>,
}

impl ProfileView {
    /// Fetch and assemble the profile for `subject`.
    pub fn load(
        loader: &dyn ProfileLoader,
        subject: &SubjectId,
        template: &ProfileTemplate,
    ) -> Result<Self> {
        let response = loader.fetch_profile(subject, &template.request_body())?;
        let view = Self::assemble(template, response)?;
        info!(
            subject = %subject,
            attributes = view.attributes.len(),
            tabs = view.tabs().count(),
            "profile loaded"
        );
        Ok(view)
    }

    /// Pair template attributes with their results.
    ///
    /// Fails when the response has fewer results than the template has
    /// attributes.
    pub fn assemble(template: &ProfileTemplate, response: ProfileResponse) -> Result<Self> {
        if response.attribute_view.len() < template.attributes.len() {
            return Err(FeedError::Fetch(format!(
                "profile has {} results for {} attributes",
                response.attribute_view.len(),
                template.attributes.len()
            )));
        }

        let attributes = template
            .attributes
            .iter()
            .zip(response.attribute_view)
            .map(|(query, result)| {
                let (journey, diagnostics) = if query.is_tab() {
                    decode_journey(&query.display_name, result.journey_events.as_deref())
                } else {
                    (None, Vec::new())
                };

                ProfileAttribute {
                    query: query.clone(),
                    values: result.result.split(',').map(str::to_string).collect(),
                    journey,
                    diagnostics,
                }
            })
            .collect();

        Ok(Self { attributes })
    }

    /// Tab attributes in template order.
    pub fn tabs(&self) -> impl Iterator<Item = &ProfileAttribute> {
        self.attributes.iter().filter(|a| a.is_tab())
    }
}

fn decode_journey(tab: &str, body: Option<&str>) -> (Option<Vec<Event>>, Vec<FeedError>) {
    let value = match serde_json::from_str::<Value>(body.unwrap_or("null")) {
        Ok(value) => value,
        Err(e) => {
            warn!(tab, error = %e, "undecodable journey events");
            return (None, vec![e.into()]);
        }
    };

    let records = match value {
        Value::Null => return (None, Vec::new()),
        Value::Array(records) => records,
        _ => {
            warn!(tab, "journey events are not an array");
            let error = FeedError::Serialization(format!("journey events for {tab} are not an array"));
            return (None, vec![error]);
        }
    };

    let raws = records.into_iter().map(RawEvent::from_value).collect();
    let (mut events, rejected) = normalize_batch(raws);
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    (Some(events), rejected)
}
