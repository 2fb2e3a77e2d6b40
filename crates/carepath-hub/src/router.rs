use crate::request::Request;
use crate::topics::Topics;
use carepath_store::{Store, StoreError};
use std::sync::Arc;

/// An outbound reply produced by routing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub topic: String,
    pub payload: String,
}

/// Maps typed requests onto store operations and builds the reply for the
/// actions that have one. Telemetry ingest actions reply with nothing.
pub struct Router {
    topics: Arc<Topics>,
    store: Store,
}

impl Router {
    pub fn new(topics: Arc<Topics>, store: Store) -> Self {
        Self { topics, store }
    }

    pub async fn handle(&self, request: Request) -> Result<Option<Reply>, StoreError> {
        match request {
            Request::NewDevice { device_id } => {
                self.store.store_device(&device_id).await?;
                Ok(None)
            }
            Request::StoreJourney {
                datetime,
                rtt,
                tt,
                device_id,
            } => {
                self.store
                    .store_journey(&datetime, &rtt, &tt, &device_id)
                    .await?;
                Ok(None)
            }
            Request::StoreEmergency {
                datetime,
                et,
                device_id,
            } => {
                self.store.store_emergency(&datetime, &et, &device_id).await?;
                Ok(None)
            }
            Request::StoreUser {
                username,
                password,
                usertype,
            } => {
                let status = self.store.store_user(&username, &password, &usertype).await?;
                Ok(Some(Reply {
                    topic: self.topics.valid_response(&username),
                    payload: status.to_string(),
                }))
            }
            Request::StoreProduct {
                device_id,
                username,
            } => {
                let status = self.store.store_product(&device_id, &username).await?;
                Ok(Some(Reply {
                    topic: self.topics.valid_response(&username),
                    payload: status.to_string(),
                }))
            }
            Request::GetJourneys {
                username,
                device_id,
            } => {
                let events = self
                    .store
                    .get_journeys(&username, device_id.as_deref())
                    .await?;
                Ok(Some(Reply {
                    topic: self.topics.send_events_response(&username),
                    payload: events,
                }))
            }
            Request::GetEmergencies {
                username,
                device_id,
            } => {
                let events = self
                    .store
                    .get_emergencies(&username, device_id.as_deref())
                    .await?;
                Ok(Some(Reply {
                    topic: self.topics.emergency_response(&username),
                    payload: events,
                }))
            }
            Request::ValidateUser {
                username,
                password,
                client_id,
            } => {
                let status = self.store.validate_user(&username, &password).await?;
                Ok(Some(Reply {
                    // Replies route by the requester's token, not the username,
                    // so concurrent logins for one account do not cross-talk.
                    topic: self.topics.valid_response(&client_id),
                    payload: status.to_string(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        let store = Store::open(None).expect("open in-memory store");
        Router::new(Arc::new(Topics::new("carepath")), store)
    }

    #[tokio::test]
    async fn ingest_actions_have_no_reply() {
        let router = router();
        let reply = router
            .handle(Request::NewDevice {
                device_id: "dev1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(reply, None);

        let reply = router
            .handle(Request::StoreJourney {
                datetime: "01/01/2024, 00:00:00".to_string(),
                rtt: "100".to_string(),
                tt: "50".to_string(),
                device_id: "dev2".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(reply, None);
    }

    #[tokio::test]
    async fn store_user_replies_on_valid_topic() {
        let router = router();
        let reply = router
            .handle(Request::StoreUser {
                username: "alice".to_string(),
                password: "pw".to_string(),
                usertype: "resident".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.topic, "carepath/response/valid/alice/response");
        assert_eq!(reply.payload, "VALID");

        let duplicate = router
            .handle(Request::StoreUser {
                username: "alice".to_string(),
                password: "pw".to_string(),
                usertype: "resident".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(duplicate.payload, "INVALID");
    }

    #[tokio::test]
    async fn validate_user_replies_by_client_id() {
        let router = router();
        router
            .handle(Request::StoreUser {
                username: "alice".to_string(),
                password: "pw".to_string(),
                usertype: "resident".to_string(),
            })
            .await
            .unwrap();

        let reply = router
            .handle(Request::ValidateUser {
                username: "alice".to_string(),
                password: "pw".to_string(),
                client_id: "web-17".to_string(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.topic, "carepath/response/valid/web-17/response");
        assert_eq!(reply.payload, "VALID");
    }

    #[tokio::test]
    async fn get_journeys_replies_with_json_array() {
        let router = router();
        router
            .handle(Request::GetJourneys {
                username: "alice".to_string(),
                device_id: None,
            })
            .await
            .unwrap()
            .map(|reply| {
                assert_eq!(reply.topic, "carepath/response/send_events/alice/response");
                assert_eq!(reply.payload, "[]");
            })
            .expect("query actions always reply");
    }
}
