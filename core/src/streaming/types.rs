use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::events::{EventName, EventPayload};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: Option<u64>,
    pub screen_name: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub id: Option<u64>,
    pub text: String,
    pub user: User,
    pub in_reply_to_status_id: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectMessage {
    pub id: Option<u64>,
    pub text: String,
    pub sender: User,
    pub recipient: User,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletedStatus {
    pub id: u64,
    pub user_id: Option<u64>,
}

/// Body of a `{"delete": {...}}` notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusDeletion {
    pub status: DeletedStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrubGeo {
    pub user_id: u64,
    pub up_to_status_id: u64,
}

/// A follow, unfollow, favorite or unfavorite notice.
///
/// `target_object` is only present for favorites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialEvent {
    pub event: String,
    pub source: User,
    pub target: User,
    pub target_object: Option<Status>,
    pub created_at: Option<String>,
}

fn decode<T: for<'de> Deserialize<'de>>(
    value: &Value,
    wrap: impl FnOnce(T) -> EventPayload,
) -> EventPayload {
    match T::deserialize(value) {
        Ok(decoded) => wrap(decoded),
        Err(err) => {
            warn!("Could not decode stream message: {}", err);
            EventPayload::Other {
                name: EventName::UNKNOWN,
                data: value.clone(),
            }
        }
    }
}

/// Map one decoded stream message to its typed payload.
pub fn classify(message: &Value) -> EventPayload {
    let Some(object) = message.as_object() else {
        return EventPayload::Other {
            name: EventName::UNKNOWN,
            data: message.clone(),
        };
    };

    if let Some(friends) = object.get("friends") {
        return decode(friends, EventPayload::Friends);
    }

    if let Some(event) = object.get("event") {
        return match event.as_str() {
            Some("follow") => decode(message, EventPayload::Follow),
            Some("unfollow") => decode(message, EventPayload::Unfollow),
            Some("favorite") => decode(message, EventPayload::Favorite),
            Some("unfavorite") => decode(message, EventPayload::Unfavorite),
            Some(other) => EventPayload::Other {
                name: EventName::new(other),
                data: message.clone(),
            },
            None => EventPayload::Other {
                name: EventName::UNKNOWN,
                data: message.clone(),
            },
        };
    }

    if let Some(deletion) = object.get("delete") {
        return decode(deletion, EventPayload::Delete);
    }

    if let Some(scrub) = object.get("scrub_geo") {
        return decode(scrub, EventPayload::ScrubGeo);
    }

    if let Some(dm) = object.get("direct_message") {
        return decode(dm, EventPayload::DirectMessage);
    }

    if object.contains_key("text") && object.contains_key("user") {
        return decode(message, EventPayload::Status);
    }

    EventPayload::Other {
        name: EventName::UNKNOWN,
        data: message.clone(),
    }
}
