//! Mudlist gossip and the `mudlist` API, plus the inbound handlers for
//! startup-reply, chanlist-reply, error and shutdown packets that are
//! not tied to a single query.

use serde::Deserialize;
use serde_json::{json, Value};

use i3_domain::event::{name, Event, EventScope};
use i3_domain::{Error, Result};
use i3_protocol::packet::{
    ChanlistReplyPacket, ErrorPacket, MudlistPacket, Packet, ShutdownPacket, StartupReplyPacket,
};

use crate::link::SendPriority;
use crate::services::pending::PendingKey;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct MudlistParams {
    #[serde(default)]
    refresh: bool,
    filter: Option<String>,
}

pub struct MudlistService {
    state: AppState,
}

impl MudlistService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    // ── API ──────────────────────────────────────────────────────────

    pub fn mudlist(&self, params: Value) -> Result<Value> {
        let params: MudlistParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        if params.refresh {
            let packet = crate::link::build_startup_packet(
                &self.state.config,
                &self.state.state_file,
                &self.state.link.current_router().unwrap_or_default(),
            );
            let _ = super::enqueue(&self.state, packet, SendPriority::Heartbeat);
        }

        let entries = match params.filter.as_deref().filter(|f| !f.is_empty()) {
            Some(filter) => match regex::RegexBuilder::new(filter)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => self
                    .state
                    .mudlist
                    .list(None)
                    .into_iter()
                    .filter(|m| re.is_match(&m.display_name))
                    .collect(),
                // Not a valid regex: fall back to substring matching.
                Err(_) => self.state.mudlist.list(Some(filter)),
            },
            None => self.state.mudlist.list(None),
        };
        let muds: Vec<Value> = entries
            .into_iter()
            .map(|m| {
                json!({
                    "name": m.display_name,
                    "state": m.state,
                    "address": m.address,
                    "player_port": m.player_port,
                    "mudlib": m.mudlib,
                    "driver": m.driver,
                    "mud_type": m.mud_type,
                    "open_status": m.open_status,
                    "admin_email": m.admin_email,
                    "services": m.services,
                })
            })
            .collect();
        Ok(json!({
            "mudlist_id": self.state.mudlist.mudlist_id(),
            "muds": muds,
        }))
    }

    // ── Inbound ──────────────────────────────────────────────────────

    pub fn accept_mudlist(&self, packet: &MudlistPacket) {
        let transitions = self.state.mudlist.apply(packet);
        if let Err(e) = self.state.state_file.set_mudlist_id(packet.mudlist_id) {
            tracing::warn!(error = %e, "failed to persist mudlist id");
        }
        for transition in transitions {
            let event_name = if transition.online {
                name::MUD_ONLINE
            } else {
                name::MUD_OFFLINE
            };
            // Connection notices are the one event class that never
            // expires in offline queues.
            self.state.bus.publish(
                Event::new(
                    event_name,
                    json!({ "mud_name": transition.mud_name }),
                    EventScope::Broadcast,
                )
                .priority(6),
            );
        }
    }

    pub fn accept_chanlist(&self, packet: &ChanlistReplyPacket) {
        self.state.channels.apply_chanlist(packet);
        if let Err(e) = self.state.state_file.set_chanlist_id(packet.chanlist_id) {
            tracing::warn!(error = %e, "failed to persist chanlist id");
        }
    }

    /// startup-reply outside the handshake (heartbeat response).
    pub fn accept_startup_reply(&self, packet: &StartupReplyPacket) {
        if let Err(e) = self.state.state_file.set_router_password(&packet.password) {
            tracing::warn!(error = %e, "failed to persist router password");
        }
    }

    /// Inbound error packets: correlate against a pending request when
    /// the bounced packet identifies one, and surface an event either
    /// way.
    pub fn accept_error(&self, packet: &ErrorPacket) {
        let origin = packet.header.origin_mud.to_ascii_lowercase();
        let correlated = match packet
            .bad_packet
            .as_deref()
            .and_then(|bad| Packet::from_lpc(bad).ok())
        {
            Some(Packet::WhoReq(_)) => {
                let code = packet.code.clone();
                self.state
                    .pending
                    .fail(&PendingKey::Who(origin.clone()), || {
                        Error::UserUnknown(code.clone())
                    })
            }
            Some(Packet::FingerReq(req)) => {
                let user = req.username.to_ascii_lowercase();
                self.state
                    .pending
                    .fail(&PendingKey::Finger(origin.clone(), user.clone()), || {
                        Error::UserUnknown(user.clone())
                    })
            }
            Some(Packet::ChanWhoReq(req)) => self.state.pending.fail(
                &PendingKey::ChanWho(origin.clone(), req.channel.clone()),
                || Error::ChannelUnknown(req.channel.clone()),
            ),
            _ => false,
        };

        tracing::warn!(
            code = %packet.code,
            message = %packet.message,
            from = %packet.header.origin_mud,
            correlated,
            "inbound error packet"
        );
        self.state.bus.publish(
            Event::new(
                name::ERROR_OCCURRED,
                json!({
                    "code": packet.code,
                    "message": packet.message,
                    "from_mud": packet.header.origin_mud,
                }),
                EventScope::Mud(packet.header.target_mud.clone()),
            )
            .priority(6)
            .expires_in(chrono::Duration::seconds(300)),
        );
    }

    /// The router (or a mud) says goodbye. The link notices the close
    /// itself; this only surfaces the notice.
    pub fn accept_shutdown(&self, packet: &ShutdownPacket) {
        tracing::info!(
            from = %packet.header.origin_mud,
            restart_delay = packet.restart_delay,
            "peer announced shutdown"
        );
        self.state.bus.publish(
            Event::new(
                name::MUD_OFFLINE,
                json!({ "mud_name": packet.header.origin_mud }),
                EventScope::Broadcast,
            )
            .priority(6),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::test_support::test_state;
    use i3_protocol::packet::{FingerReqPacket, Header, MudInfo};
    use i3_protocol::LpcValue;
    use std::time::Duration;

    fn mud_info() -> MudInfo {
        MudInfo {
            state: -1,
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
        }
    }

    #[tokio::test]
    async fn mudlist_api_is_deterministic_without_refresh() {
        let state = test_state();
        let service = MudlistService::new(state.clone());
        service.accept_mudlist(&MudlistPacket {
            header: Header::new("*i4"),
            mudlist_id: 5,
            muds: vec![
                ("BetaMUD".into(), Some(mud_info())),
                ("AlphaMUD".into(), Some(mud_info())),
            ],
        });

        let a = service.mudlist(json!({})).unwrap();
        let b = service.mudlist(json!({})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a["mudlist_id"], 5);
        let names: Vec<&str> = a["muds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["AlphaMUD", "BetaMUD"]);
        // No refresh: nothing was queued for the router.
        assert!(state.outbound.pop().is_none());
    }

    #[tokio::test]
    async fn refresh_queues_a_reannounce() {
        let state = test_state();
        let service = MudlistService::new(state.clone());
        service.mudlist(json!({"refresh": true})).unwrap();
        assert!(matches!(
            state.outbound.pop(),
            Some(Packet::StartupReq3(_))
        ));
    }

    #[tokio::test]
    async fn mudlist_id_is_persisted() {
        let state = test_state();
        let service = MudlistService::new(state.clone());
        service.accept_mudlist(&MudlistPacket {
            header: Header::new("*i4"),
            mudlist_id: 99,
            muds: vec![("M".into(), Some(mud_info()))],
        });
        assert_eq!(state.state_file.snapshot().mudlist_id, 99);
    }

    #[tokio::test]
    async fn error_packet_fails_matching_finger() {
        let state = test_state();
        let service = MudlistService::new(state.clone());
        let (rx, _) = state.pending.register(
            PendingKey::Finger("farmud".into(), "ghost".into()),
            Duration::from_secs(10),
        );

        let bad = Packet::FingerReq(FingerReqPacket {
            header: Header::new("LuminariMUD").to_mud("farmud").to_user("ghost"),
            username: "ghost".into(),
        });
        service.accept_error(&ErrorPacket {
            header: Header::new("FarMUD").to_mud("LuminariMUD"),
            code: "unk-user".into(),
            message: "no such user".into(),
            bad_packet: Some(Box::new(bad.to_lpc())),
        });

        assert!(matches!(rx.await.unwrap(), Err(Error::UserUnknown(_))));
    }
}
