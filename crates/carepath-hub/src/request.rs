use crate::topics::Topics;
use thiserror::Error;

/// The eight request actions, resolved from the inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NewDevice,
    StoreJourney,
    StoreEmergency,
    StoreUser,
    StoreProduct,
    GetJourneys,
    GetEmergencies,
    ValidateUser,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::NewDevice => "new_device",
            Action::StoreJourney => "store_event",
            Action::StoreEmergency => "emergency",
            Action::StoreUser => "store_user",
            Action::StoreProduct => "store_product",
            Action::GetJourneys => "get_events",
            Action::GetEmergencies => "get_emergencies",
            Action::ValidateUser => "valid_user",
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("message on unknown topic {0}")]
    UnknownTopic(String),
    #[error("payload on {0} is not valid UTF-8")]
    Encoding(String),
    #[error("{action} payload is missing its trailing delimiter")]
    MissingDelimiter { action: &'static str },
    #[error("{action} payload has {got} fields, expected {expected}")]
    FieldCount {
        action: &'static str,
        expected: &'static str,
        got: usize,
    },
}

/// A request parsed from the wire into typed fields. The wire format is a
/// `;`-separated field list with a trailing delimiter, except `new_device`
/// where the whole payload is the device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    NewDevice {
        device_id: String,
    },
    StoreJourney {
        datetime: String,
        rtt: String,
        tt: String,
        device_id: String,
    },
    StoreEmergency {
        datetime: String,
        et: String,
        device_id: String,
    },
    StoreUser {
        username: String,
        password: String,
        usertype: String,
    },
    StoreProduct {
        device_id: String,
        username: String,
    },
    GetJourneys {
        username: String,
        device_id: Option<String>,
    },
    GetEmergencies {
        username: String,
        device_id: Option<String>,
    },
    ValidateUser {
        username: String,
        password: String,
        /// Opaque correlation token, round-tripped into the reply topic.
        client_id: String,
    },
}

impl Request {
    pub fn parse(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Self, ParseError> {
        let action = topics
            .action_for(topic)
            .ok_or_else(|| ParseError::UnknownTopic(topic.to_string()))?;
        let text = std::str::from_utf8(payload)
            .map_err(|_| ParseError::Encoding(topic.to_string()))?;

        let wrong_count = |got: usize, expected: &'static str| ParseError::FieldCount {
            action: action.name(),
            expected,
            got,
        };

        let request = match action {
            Action::NewDevice => Request::NewDevice {
                device_id: text.to_string(),
            },
            Action::StoreJourney => match split_fields(action, text)?.as_slice() {
                [datetime, rtt, tt, device_id] => Request::StoreJourney {
                    datetime: datetime.to_string(),
                    rtt: rtt.to_string(),
                    tt: tt.to_string(),
                    device_id: device_id.to_string(),
                },
                fields => return Err(wrong_count(fields.len(), "4")),
            },
            Action::StoreEmergency => match split_fields(action, text)?.as_slice() {
                [datetime, et, device_id] => Request::StoreEmergency {
                    datetime: datetime.to_string(),
                    et: et.to_string(),
                    device_id: device_id.to_string(),
                },
                fields => return Err(wrong_count(fields.len(), "3")),
            },
            Action::StoreUser => match split_fields(action, text)?.as_slice() {
                [username, password, usertype] => Request::StoreUser {
                    username: username.to_string(),
                    password: password.to_string(),
                    usertype: usertype.to_string(),
                },
                fields => return Err(wrong_count(fields.len(), "3")),
            },
            Action::StoreProduct => match split_fields(action, text)?.as_slice() {
                [device_id, username] => Request::StoreProduct {
                    device_id: device_id.to_string(),
                    username: username.to_string(),
                },
                fields => return Err(wrong_count(fields.len(), "2")),
            },
            Action::GetJourneys => match split_fields(action, text)?.as_slice() {
                [username] => Request::GetJourneys {
                    username: username.to_string(),
                    device_id: None,
                },
                [username, device_id] => Request::GetJourneys {
                    username: username.to_string(),
                    device_id: Some(device_id.to_string()),
                },
                fields => return Err(wrong_count(fields.len(), "1 or 2")),
            },
            Action::GetEmergencies => match split_fields(action, text)?.as_slice() {
                [username] => Request::GetEmergencies {
                    username: username.to_string(),
                    device_id: None,
                },
                [username, device_id] => Request::GetEmergencies {
                    username: username.to_string(),
                    device_id: Some(device_id.to_string()),
                },
                fields => return Err(wrong_count(fields.len(), "1 or 2")),
            },
            Action::ValidateUser => match split_fields(action, text)?.as_slice() {
                [username, password, client_id] => Request::ValidateUser {
                    username: username.to_string(),
                    password: password.to_string(),
                    client_id: client_id.to_string(),
                },
                fields => return Err(wrong_count(fields.len(), "3")),
            },
        };
        Ok(request)
    }
}

/// Split `a;b;c;` into `["a", "b", "c"]`. The trailing delimiter is part of
/// the wire format; a payload without it is rejected rather than guessed at.
fn split_fields<'a>(action: Action, payload: &'a str) -> Result<Vec<&'a str>, ParseError> {
    let mut fields: Vec<&str> = payload.split(';').collect();
    match fields.pop() {
        Some("") => Ok(fields),
        _ => Err(ParseError::MissingDelimiter {
            action: action.name(),
        }),
    }
}
