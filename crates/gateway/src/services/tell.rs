//! Direct user-to-user messages: `tell` and `emoteto`.

use serde::Deserialize;
use serde_json::{json, Value};

use i3_domain::event::{name, Event, EventScope};
use i3_domain::{Error, Result};
use i3_protocol::packet::{Header, Packet, TellPacket};
use i3_sessions::SessionEntry;

use crate::link::SendPriority;
use crate::state::AppState;

/// Fallback origin user when the client does not name one.
const DEFAULT_FROM_USER: &str = "player";

#[derive(Debug, Deserialize)]
pub struct TellParams {
    pub target_mud: String,
    pub target_user: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "emote")]
    pub emote_text: Option<String>,
    pub from_user: Option<String>,
}

pub struct TellService {
    state: AppState,
}

impl TellService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    // ── API ──────────────────────────────────────────────────────────

    pub fn send_tell(&self, session: &SessionEntry, params: Value) -> Result<Value> {
        let params: TellParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let message = params.message.clone();
        if message.is_empty() {
            return Err(Error::InvalidParams("message must not be empty".into()));
        }
        if message.len() > self.state.config.limits.max_tell_len {
            return Err(Error::InvalidParams(format!(
                "message exceeds {} bytes",
                self.state.config.limits.max_tell_len
            )));
        }
        self.send(session, &params, message, false)
    }

    pub fn send_emoteto(&self, session: &SessionEntry, params: Value) -> Result<Value> {
        let params: TellParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let emote = params
            .emote_text
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| Error::InvalidParams("emote must not be empty".into()))?;
        if emote.len() > self.state.config.limits.max_emote_len {
            return Err(Error::InvalidParams(format!(
                "emote exceeds {} bytes",
                self.state.config.limits.max_emote_len
            )));
        }
        self.send(session, &params, emote, true)
    }

    fn send(
        &self,
        session: &SessionEntry,
        params: &TellParams,
        message: String,
        emote: bool,
    ) -> Result<Value> {
        if !self.state.mudlist.contains(&params.target_mud) {
            return Err(Error::MudUnknown(params.target_mud.clone()));
        }
        if let Some(entry) = self.state.mudlist.get(&params.target_mud) {
            if !entry.state.is_up() {
                return Err(Error::TargetOffline(params.target_mud.clone()));
            }
        }

        let from_user = params
            .from_user
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_FROM_USER.to_string());

        // visname keeps the caller's capitalization; header slots are
        // lowercased for routing.
        let packet = TellPacket {
            header: Header::new(&session.mud_name)
                .from_user(&from_user.to_lowercase())
                .to_mud(&params.target_mud.to_lowercase())
                .to_user(&params.target_user.to_lowercase()),
            visname: from_user,
            message,
        };
        let packet = if emote {
            Packet::Emoteto(packet)
        } else {
            Packet::Tell(packet)
        };
        super::enqueue(&self.state, packet, SendPriority::User)?;
        Ok(json!({ "status": "sent" }))
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Deliver an inbound tell/emoteto to every session of the target
    /// mud. Nothing is stored.
    pub fn accept(&self, packet: &TellPacket, emote: bool) {
        let event_name = if emote {
            name::EMOTETO_RECEIVED
        } else {
            name::TELL_RECEIVED
        };
        self.state.bus.publish(
            Event::new(
                event_name,
                json!({
                    "from_mud": packet.header.origin_mud,
                    "from_user": packet.header.origin_user,
                    "to_user": packet.header.target_user,
                    "message": packet.message,
                    "visname": packet.visname,
                }),
                EventScope::Mud(packet.header.target_mud.clone()),
            )
            .priority(8)
            .expires_in(chrono::Duration::seconds(300)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::test_support::test_state;
    use i3_protocol::packet::{MudInfo, MudlistPacket};
    use i3_protocol::LpcValue;
    use i3_sessions::Transport;

    fn state_with_mud(name: &str, up: bool) -> AppState {
        let state = test_state();
        state.mudlist.apply(&MudlistPacket {
            header: Header::new("*i4"),
            mudlist_id: 1,
            muds: vec![(
                name.to_string(),
                Some(MudInfo {
                    state: if up { -1 } else { 0 },
                    address: "10.0.0.1".into(),
                    player_port: 4000,
                    tcp_port: 0,
                    udp_port: 0,
                    mudlib: "Lib".into(),
                    base_mudlib: "Lib".into(),
                    driver: "D".into(),
                    mud_type: "MUD".into(),
                    open_status: "open".into(),
                    admin_email: "a@b.c".into(),
                    services: vec![("tell".into(), 1)],
                    other_data: LpcValue::NULL,
                }),
            )],
        });
        state
    }

    fn session(state: &AppState) -> SessionEntry {
        state.sessions.create(
            "LuminariMUD",
            "k1",
            ["*".to_string()].into_iter().collect(),
            Transport::Ws,
        )
    }

    #[tokio::test]
    async fn tell_builds_exact_wire_layout() {
        let state = state_with_mud("OtherMUD", true);
        let service = TellService::new(state.clone());
        let sess = session(&state);

        let result = service
            .send_tell(
                &sess,
                json!({
                    "target_mud": "OtherMUD",
                    "target_user": "Friend",
                    "message": "hi",
                    "from_user": "player",
                }),
            )
            .unwrap();
        assert_eq!(result, json!({"status": "sent"}));

        let packet = state.outbound.pop().unwrap();
        let items_owned = packet.to_lpc();
        let items = items_owned.as_array().unwrap();
        assert_eq!(items.len(), 8);
        assert_eq!(items[0].as_str(), Some("tell"));
        assert_eq!(items[1].as_int(), Some(200));
        assert_eq!(items[2].as_str(), Some("LuminariMUD"));
        assert_eq!(items[3].as_str(), Some("player"));
        assert_eq!(items[4].as_str(), Some("othermud"));
        assert_eq!(items[5].as_str(), Some("friend"));
        assert_eq!(items[6].as_str(), Some("player"));
        assert_eq!(items[7].as_str(), Some("hi"));
    }

    #[tokio::test]
    async fn visname_keeps_caps_target_lowered() {
        let state = state_with_mud("OtherMUD", true);
        let service = TellService::new(state.clone());
        let sess = session(&state);

        service
            .send_tell(
                &sess,
                json!({
                    "target_mud": "OtherMUD",
                    "target_user": "FRIEND",
                    "message": "hi",
                    "from_user": "Gandalf",
                }),
            )
            .unwrap();
        let Packet::Tell(p) = state.outbound.pop().unwrap() else {
            panic!()
        };
        assert_eq!(p.visname, "Gandalf");
        assert_eq!(p.header.origin_user, "gandalf");
        assert_eq!(p.header.target_user, "friend");
    }

    #[tokio::test]
    async fn unknown_mud_is_rejected() {
        let state = test_state();
        let service = TellService::new(state.clone());
        let sess = session(&state);
        let err = service
            .send_tell(
                &sess,
                json!({"target_mud": "Nowhere", "target_user": "x", "message": "hi"}),
            )
            .unwrap_err();
        assert!(matches!(err, Error::MudUnknown(_)));
    }

    #[tokio::test]
    async fn down_mud_is_target_offline() {
        let state = state_with_mud("SleepyMUD", false);
        let service = TellService::new(state.clone());
        let sess = session(&state);
        let err = service
            .send_tell(
                &sess,
                json!({"target_mud": "SleepyMUD", "target_user": "x", "message": "hi"}),
            )
            .unwrap_err();
        assert!(matches!(err, Error::TargetOffline(_)));
    }

    #[tokio::test]
    async fn oversized_message_is_invalid_params() {
        let state = state_with_mud("OtherMUD", true);
        let service = TellService::new(state.clone());
        let sess = session(&state);
        let err = service
            .send_tell(
                &sess,
                json!({
                    "target_mud": "OtherMUD",
                    "target_user": "x",
                    "message": "x".repeat(3000),
                }),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[tokio::test]
    async fn inbound_tell_reaches_owning_mud_sessions() {
        let state = test_state();
        let service = TellService::new(state.clone());
        let sess = session(&state);

        service.accept(
            &TellPacket {
                header: Header {
                    ttl: 5,
                    origin_mud: "FarMUD".into(),
                    origin_user: "Alice".into(),
                    target_mud: "luminarimud".into(),
                    target_user: "bob".into(),
                },
                visname: "Alice".into(),
                message: "ping".into(),
            },
            false,
        );
        // Disconnected session: the event lands in its offline queue.
        assert_eq!(state.sessions.offline_len(&sess.id), 1);
    }
}
