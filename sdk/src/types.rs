//! Actor and action vocabulary
//!
//! Planner output is loosely typed JSON. These types close it into a small set
//! of tagged variants, each with an explicit catch-all so partially specified
//! output still round-trips instead of failing to decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Normalise a free-form tag: lowercase, `-`, whitespace and control
/// characters become `_`.
pub fn normalize_tag(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .replace(|c: char| c == '-' || c.is_whitespace() || c.is_control(), "_")
}

/// Lifecycle status of a simulated actor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActorStatus {
    Active,
    Dormant,
    Dead,
}

impl ActorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorStatus::Active => "active",
            ActorStatus::Dormant => "dormant",
            ActorStatus::Dead => "dead",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match normalize_tag(tag).as_str() {
            "active" => Some(ActorStatus::Active),
            "dormant" => Some(ActorStatus::Dormant),
            "dead" => Some(ActorStatus::Dead),
            _ => None,
        }
    }
}

impl fmt::Display for ActorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three tracked resources
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Food,
    Energy,
    Materials,
}

impl Resource {
    /// Every tracked resource, in tie-break order
    pub const ALL: [Resource; 3] = [Resource::Food, Resource::Energy, Resource::Materials];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Food => "food",
            Resource::Energy => "energy",
            Resource::Materials => "materials",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match normalize_tag(tag).as_str() {
            "food" => Some(Resource::Food),
            "energy" => Some(Resource::Energy),
            "materials" | "material" => Some(Resource::Materials),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ballot choice on a proposal or enforcement action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

impl VoteChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteChoice::Yes => "yes",
            VoteChoice::No => "no",
            VoteChoice::Abstain => "abstain",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match normalize_tag(tag).as_str() {
            "yes" | "for" | "approve" => Some(VoteChoice::Yes),
            "no" | "against" | "reject" => Some(VoteChoice::No),
            "abstain" => Some(VoteChoice::Abstain),
            _ => None,
        }
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Personality tag assigned to an actor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum Personality {
    Cooperative,
    Competitive,
    Cautious,
    Opportunist,
    Neutral,
    Other(String),
}

impl Personality {
    pub fn from_tag(tag: &str) -> Self {
        match normalize_tag(tag).as_str() {
            "cooperative" => Personality::Cooperative,
            "competitive" | "aggressive" => Personality::Competitive,
            "cautious" => Personality::Cautious,
            "opportunist" | "opportunistic" => Personality::Opportunist,
            "neutral" | "" => Personality::Neutral,
            other => Personality::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Personality::Cooperative => "cooperative",
            Personality::Competitive => "competitive",
            Personality::Cautious => "cautious",
            Personality::Opportunist => "opportunist",
            Personality::Neutral => "neutral",
            Personality::Other(tag) => tag,
        }
    }
}

impl From<String> for Personality {
    fn from(tag: String) -> Self {
        Personality::from_tag(&tag)
    }
}

impl From<Personality> for String {
    fn from(p: Personality) -> Self {
        p.as_str().to_string()
    }
}

/// Category of a governance proposal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum ProposalType {
    Rule,
    Allocation,
    Sanction,
    Infrastructure,
    Other(String),
}

impl ProposalType {
    pub fn from_tag(tag: &str) -> Self {
        match normalize_tag(tag).as_str() {
            "rule" | "law" => ProposalType::Rule,
            "allocation" | "resource_allocation" => ProposalType::Allocation,
            "sanction" | "enforcement" | "exile" => ProposalType::Sanction,
            "infrastructure" | "build" => ProposalType::Infrastructure,
            other => ProposalType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProposalType::Rule => "rule",
            ProposalType::Allocation => "allocation",
            ProposalType::Sanction => "sanction",
            ProposalType::Infrastructure => "infrastructure",
            ProposalType::Other(tag) => tag,
        }
    }
}

impl From<String> for ProposalType {
    fn from(tag: String) -> Self {
        ProposalType::from_tag(&tag)
    }
}

impl From<ProposalType> for String {
    fn from(t: ProposalType) -> Self {
        t.as_str().to_string()
    }
}

/// Strategy tag carried by an actor's intent state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum Strategy {
    Stabilize,
    AccumulateFood,
    AccumulateEnergy,
    AccumulateMaterials,
    Governance,
    SocialCoordination,
    ResourceExchange,
    ConserveEnergy,
    Other(String),
}

impl Strategy {
    pub fn from_tag(tag: &str) -> Self {
        match normalize_tag(tag).as_str() {
            "stabilize" => Strategy::Stabilize,
            "accumulate_food" => Strategy::AccumulateFood,
            "accumulate_energy" => Strategy::AccumulateEnergy,
            "accumulate_materials" => Strategy::AccumulateMaterials,
            "governance" => Strategy::Governance,
            "social_coordination" => Strategy::SocialCoordination,
            "resource_exchange" => Strategy::ResourceExchange,
            "conserve_energy" => Strategy::ConserveEnergy,
            other => Strategy::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Strategy::Stabilize => "stabilize",
            Strategy::AccumulateFood => "accumulate_food",
            Strategy::AccumulateEnergy => "accumulate_energy",
            Strategy::AccumulateMaterials => "accumulate_materials",
            Strategy::Governance => "governance",
            Strategy::SocialCoordination => "social_coordination",
            Strategy::ResourceExchange => "resource_exchange",
            Strategy::ConserveEnergy => "conserve_energy",
            Strategy::Other(tag) => tag,
        }
    }

    /// Infer the strategy an action most plausibly serves
    pub fn implied_by(action: &Action) -> Self {
        match action {
            Action::Work {
                resource: Resource::Food,
            } => Strategy::AccumulateFood,
            Action::Work {
                resource: Resource::Energy,
            } => Strategy::AccumulateEnergy,
            Action::Work {
                resource: Resource::Materials,
            } => Strategy::AccumulateMaterials,
            Action::Vote { .. } | Action::Propose { .. } => Strategy::Governance,
            Action::Communicate { .. } => Strategy::SocialCoordination,
            Action::OfferTrade { .. } => Strategy::ResourceExchange,
            Action::Rest => Strategy::ConserveEnergy,
            Action::Idle | Action::Other { .. } => Strategy::Stabilize,
        }
    }
}

impl From<String> for Strategy {
    fn from(tag: String) -> Self {
        Strategy::from_tag(&tag)
    }
}

impl From<Strategy> for String {
    fn from(s: Strategy) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single action an actor can take in one turn
///
/// The wire form is a JSON object keyed by `"action"`. Anything that does not
/// decode into a known variant is preserved verbatim in `Other`, which the
/// action pipeline is expected to reject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Action {
    Work {
        resource: Resource,
    },
    Vote {
        proposal_id: String,
        choice: VoteChoice,
    },
    Propose {
        title: String,
        proposal_type: ProposalType,
        description: String,
    },
    Communicate {
        message: String,
        recipient: Option<String>,
    },
    OfferTrade {
        offer: Resource,
        request: Resource,
        amount: f64,
        partner: Option<String>,
    },
    Rest,
    Idle,
    Other {
        kind: String,
        payload: Value,
    },
}

impl Action {
    /// The action's kind tag as it appears on the wire
    pub fn kind(&self) -> &str {
        match self {
            Action::Work { .. } => "work",
            Action::Vote { .. } => "vote",
            Action::Propose { .. } => "propose",
            Action::Communicate { .. } => "communicate",
            Action::OfferTrade { .. } => "offer_trade",
            Action::Rest => "rest",
            Action::Idle => "idle",
            Action::Other { kind, .. } => kind,
        }
    }

    /// Decode an action from loosely typed planner output
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Action::Other {
                kind: "invalid".to_string(),
                payload: value.clone(),
            };
        };

        let kind = obj
            .get("action")
            .or_else(|| obj.get("type"))
            .and_then(Value::as_str)
            .map(normalize_tag)
            .unwrap_or_default();

        let decoded = match kind.as_str() {
            "work" | "produce" | "gather" => text_field(obj, "resource")
                .and_then(|r| Resource::from_tag(&r))
                .map(|resource| Action::Work { resource }),
            "vote" => {
                let proposal_id = id_field(obj, "proposal_id");
                let choice = text_field(obj, "vote")
                    .or_else(|| text_field(obj, "choice"))
                    .and_then(|c| VoteChoice::from_tag(&c));
                match (proposal_id, choice) {
                    (Some(proposal_id), Some(choice)) => Some(Action::Vote {
                        proposal_id,
                        choice,
                    }),
                    _ => None,
                }
            }
            "propose" => text_field(obj, "title").map(|title| Action::Propose {
                title,
                proposal_type: ProposalType::from_tag(
                    text_field(obj, "proposal_type").as_deref().unwrap_or("rule"),
                ),
                description: text_field(obj, "description").unwrap_or_default(),
            }),
            "communicate" | "message" | "send_message" | "broadcast" => text_field(obj, "message")
                .or_else(|| text_field(obj, "content"))
                .map(|message| Action::Communicate {
                    message,
                    recipient: id_field(obj, "recipient").or_else(|| id_field(obj, "target")),
                }),
            "offer_trade" | "trade" => {
                let offer = text_field(obj, "offer").and_then(|r| Resource::from_tag(&r));
                let request = text_field(obj, "request").and_then(|r| Resource::from_tag(&r));
                match (offer, request) {
                    (Some(offer), Some(request)) => Some(Action::OfferTrade {
                        offer,
                        request,
                        amount: obj.get("amount").and_then(Value::as_f64).unwrap_or(1.0),
                        partner: id_field(obj, "partner"),
                    }),
                    _ => None,
                }
            }
            "rest" => Some(Action::Rest),
            "idle" | "wait" => Some(Action::Idle),
            _ => None,
        };

        decoded.unwrap_or_else(|| Action::Other {
            kind: if kind.is_empty() {
                "unknown".to_string()
            } else {
                kind
            },
            payload: value.clone(),
        })
    }

    /// Encode the action in its wire form
    pub fn to_value(&self) -> Value {
        match self {
            Action::Work { resource } => json!({ "action": "work", "resource": resource.as_str() }),
            Action::Vote {
                proposal_id,
                choice,
            } => json!({ "action": "vote", "proposal_id": proposal_id, "vote": choice.as_str() }),
            Action::Propose {
                title,
                proposal_type,
                description,
            } => json!({
                "action": "propose",
                "title": title,
                "proposal_type": proposal_type.as_str(),
                "description": description,
            }),
            Action::Communicate { message, recipient } => {
                let mut value = json!({ "action": "communicate", "message": message });
                if let Some(recipient) = recipient {
                    value["recipient"] = json!(recipient);
                }
                value
            }
            Action::OfferTrade {
                offer,
                request,
                amount,
                partner,
            } => {
                let mut value = json!({
                    "action": "offer_trade",
                    "offer": offer.as_str(),
                    "request": request.as_str(),
                    "amount": amount,
                });
                if let Some(partner) = partner {
                    value["partner"] = json!(partner);
                }
                value
            }
            Action::Rest => json!({ "action": "rest" }),
            Action::Idle => json!({ "action": "idle" }),
            Action::Other { payload, .. } => payload.clone(),
        }
    }
}

impl From<Value> for Action {
    fn from(value: Value) -> Self {
        Action::from_value(&value)
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        action.to_value()
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Ids arrive as either strings or numbers depending on the model
fn id_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Actor record as seen by the scheduler
///
/// Owned by the persistence layer. The scheduler reads it every turn and only
/// writes the last-active timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub status: ActorStatus,
    /// Provider-routing key (e.g. "default", "premium")
    pub model_route: String,
    pub personality: Personality,
    pub last_active_at: Option<DateTime<Utc>>,
}
