//! Channel traffic: send/emote/targeted messages, join/leave,
//! listings, remote channel-who, and local history.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use i3_domain::event::{name, Event, EventScope};
use i3_domain::{Error, Result};
use i3_protocol::packet::{
    ChanWhoReplyPacket, ChanWhoReqPacket, ChannelListenPacket, ChannelMessagePacket,
    ChannelTargetPacket, Header, Packet,
};
use i3_sessions::SessionEntry;

use crate::link::SendPriority;
use crate::services::pending::PendingKey;
use crate::state::AppState;
use crate::store::channels::HistoryEntry;

#[derive(Debug, Deserialize)]
struct SendParams {
    channel: String,
    #[serde(default)]
    message: String,
    from_user: Option<String>,
    target_user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JoinParams {
    channel: String,
    #[serde(default)]
    listen_only: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    channel: String,
    limit: Option<usize>,
}

pub struct ChannelService {
    state: AppState,
}

impl ChannelService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    // ── API: messaging ───────────────────────────────────────────────

    pub fn send_message(&self, session: &SessionEntry, params: Value) -> Result<Value> {
        let params: SendParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let (channel, visname, from_user) = self.prepare_send(session, &params)?;
        let packet = Packet::ChannelM(ChannelMessagePacket {
            header: Header::new(&session.mud_name).from_user(&from_user),
            channel,
            visname,
            message: params.message,
        });
        super::enqueue(&self.state, packet, SendPriority::User)?;
        Ok(json!({ "status": "sent" }))
    }

    pub fn send_emote(&self, session: &SessionEntry, params: Value) -> Result<Value> {
        let params: SendParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let (channel, visname, from_user) = self.prepare_send(session, &params)?;
        let packet = Packet::ChannelE(ChannelMessagePacket {
            header: Header::new(&session.mud_name).from_user(&from_user),
            channel,
            visname,
            message: params.message,
        });
        super::enqueue(&self.state, packet, SendPriority::User)?;
        Ok(json!({ "status": "sent" }))
    }

    pub fn send_targeted(&self, session: &SessionEntry, params: Value) -> Result<Value> {
        let params: SendParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let target_user = params
            .target_user
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::InvalidParams("target_user is required".into()))?;
        let (channel, visname, from_user) = self.prepare_send(session, &params)?;
        let packet = Packet::ChannelT(ChannelTargetPacket {
            header: Header::new(&session.mud_name).from_user(&from_user),
            channel,
            visname,
            target_user: target_user.to_lowercase(),
            message: params.message,
        });
        super::enqueue(&self.state, packet, SendPriority::User)?;
        Ok(json!({ "status": "sent" }))
    }

    fn prepare_send(
        &self,
        session: &SessionEntry,
        params: &SendParams,
    ) -> Result<(String, String, String)> {
        if params.message.is_empty() {
            return Err(Error::InvalidParams("message must not be empty".into()));
        }
        if params.message.len() > self.state.config.limits.max_tell_len {
            return Err(Error::InvalidParams(format!(
                "message exceeds {} bytes",
                self.state.config.limits.max_tell_len
            )));
        }
        if !self.state.channels.contains(&params.channel) {
            return Err(Error::ChannelUnknown(params.channel.clone()));
        }
        if !session.channels.contains(&params.channel) {
            return Err(Error::InvalidParams(format!(
                "not joined to channel {}",
                params.channel
            )));
        }
        let visname = params
            .from_user
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "player".to_string());
        let from_user = visname.to_lowercase();
        Ok((params.channel.clone(), visname, from_user))
    }

    // ── API: membership ──────────────────────────────────────────────

    pub fn join(&self, session: &SessionEntry, params: Value) -> Result<Value> {
        let params: JoinParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        if !self.state.channels.contains(&params.channel) {
            return Err(Error::ChannelUnknown(params.channel.clone()));
        }

        self.state
            .sessions
            .subscribe_channel(&session.id, &params.channel);
        // The listen packet goes out only when membership actually
        // changed (fresh join, or the listen_only flag flipped).
        let changed = self.state.channels.record_member(
            &params.channel,
            &session.mud_name,
            "",
            params.listen_only,
        );
        if changed {
            let packet = Packet::ChannelListen(ChannelListenPacket {
                header: Header::new(&session.mud_name),
                channel: params.channel.clone(),
                on: true,
            });
            super::enqueue(&self.state, packet, SendPriority::User)?;
        }
        self.state.bus.publish(
            Event::new(
                name::CHANNEL_JOINED,
                json!({ "channel": params.channel, "mud_name": session.mud_name }),
                EventScope::Session(session.id.clone()),
            )
            .priority(4)
            .expires_in(chrono::Duration::seconds(300)),
        );
        Ok(json!({ "status": "joined", "channel": params.channel }))
    }

    pub fn leave(&self, session: &SessionEntry, params: Value) -> Result<Value> {
        let params: JoinParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let was_subscribed = self
            .state
            .sessions
            .unsubscribe_channel(&session.id, &params.channel);
        self.state
            .channels
            .remove_member(&params.channel, &session.mud_name, "");
        if was_subscribed {
            let packet = Packet::ChannelListen(ChannelListenPacket {
                header: Header::new(&session.mud_name),
                channel: params.channel.clone(),
                on: false,
            });
            super::enqueue(&self.state, packet, SendPriority::User)?;
        }
        Ok(json!({ "status": "left", "channel": params.channel }))
    }

    // ── API: queries ─────────────────────────────────────────────────

    pub fn list(&self, params: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct ListParams {
            #[serde(default)]
            refresh: bool,
        }
        let params: ListParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        if params.refresh {
            // Re-announcing with our last chanlist id makes the router
            // resend the delta since then.
            let packet = crate::link::build_startup_packet(
                &self.state.config,
                &self.state.state_file,
                &self.state.link.current_router().unwrap_or_default(),
            );
            let _ = super::enqueue(&self.state, packet, SendPriority::Heartbeat);
        }
        let channels: Vec<Value> = self
            .state
            .channels
            .list()
            .into_iter()
            .map(|c| json!({ "name": c.name, "type": c.kind, "owner_mud": c.owner_mud }))
            .collect();
        Ok(json!({
            "chanlist_id": self.state.channels.chanlist_id(),
            "channels": channels,
        }))
    }

    /// Ask the owning mud who is on a channel; fall back to local
    /// membership when the owner is unknown.
    pub async fn who(&self, params: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct WhoParams {
            channel: String,
        }
        let params: WhoParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        let Some(entry) = self.state.channels.get(&params.channel) else {
            return Err(Error::ChannelUnknown(params.channel));
        };

        if entry.owner_mud.is_empty() || !self.state.mudlist.contains(&entry.owner_mud) {
            let users: Vec<String> = self
                .state
                .channels
                .members(&params.channel)
                .into_iter()
                .filter(|m| !m.user_name.is_empty())
                .map(|m| format!("{}@{}", m.user_name, m.mud_name))
                .collect();
            return Ok(json!({ "channel": params.channel, "users": users, "source": "local" }));
        }

        let key = PendingKey::ChanWho(
            entry.owner_mud.to_ascii_lowercase(),
            params.channel.clone(),
        );
        let timeout = Duration::from_secs(self.state.config.cache.request_timeout_secs);
        let (rx, fresh) = self.state.pending.register(key, timeout);
        if fresh {
            let packet = Packet::ChanWhoReq(ChanWhoReqPacket {
                header: Header::new(&self.state.config.mud.name).to_mud(&entry.owner_mud),
                channel: params.channel.clone(),
            });
            super::enqueue(&self.state, packet, SendPriority::User)?;
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout("chan-who reply lost".into())),
        }
    }

    pub fn history(&self, params: Value) -> Result<Value> {
        let params: HistoryParams =
            serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))?;
        if !self.state.channels.contains(&params.channel) {
            return Err(Error::ChannelUnknown(params.channel.clone()));
        }
        let limit = params
            .limit
            .unwrap_or(50)
            .min(self.state.config.limits.channel_history);
        let entries: Vec<Value> = self
            .state
            .channels
            .history(&params.channel, limit)
            .into_iter()
            .map(|h| {
                json!({
                    "at": h.at,
                    "from_mud": h.from_mud,
                    "from_user": h.from_user,
                    "visname": h.visname,
                    "message": h.message,
                    "kind": h.kind,
                })
            })
            .collect();
        Ok(json!({ "channel": params.channel, "messages": entries }))
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// channel-m / channel-e: record history, deliver to subscribers.
    pub fn accept_message(&self, packet: &ChannelMessagePacket, emote: bool) {
        self.state.channels.push_history(
            &packet.channel,
            HistoryEntry {
                at: Utc::now(),
                from_mud: packet.header.origin_mud.clone(),
                from_user: packet.header.origin_user.clone(),
                visname: packet.visname.clone(),
                message: packet.message.clone(),
                kind: if emote { "emote" } else { "message" },
            },
        );
        let event_name = if emote {
            name::CHANNEL_EMOTE
        } else {
            name::CHANNEL_MESSAGE
        };
        self.state.bus.publish(
            Event::new(
                event_name,
                json!({
                    "channel": packet.channel,
                    "from_mud": packet.header.origin_mud,
                    "from_user": packet.header.origin_user,
                    "visname": packet.visname,
                    "message": packet.message,
                }),
                EventScope::Channel(packet.channel.clone()),
            )
            .priority(5)
            .expires_in(chrono::Duration::seconds(300)),
        );
    }

    pub fn accept_targeted(&self, packet: &ChannelTargetPacket) {
        self.state.channels.push_history(
            &packet.channel,
            HistoryEntry {
                at: Utc::now(),
                from_mud: packet.header.origin_mud.clone(),
                from_user: packet.header.origin_user.clone(),
                visname: packet.visname.clone(),
                message: packet.message.clone(),
                kind: "message",
            },
        );
        self.state.bus.publish(
            Event::new(
                name::CHANNEL_MESSAGE,
                json!({
                    "channel": packet.channel,
                    "from_mud": packet.header.origin_mud,
                    "from_user": packet.header.origin_user,
                    "visname": packet.visname,
                    "target_user": packet.target_user,
                    "message": packet.message,
                }),
                EventScope::Channel(packet.channel.clone()),
            )
            .priority(5)
            .expires_in(chrono::Duration::seconds(300)),
        );
    }

    /// channel-listen gossip from other muds.
    pub fn accept_listen(&self, packet: &ChannelListenPacket) {
        let header = &packet.header;
        if packet.on {
            self.state.channels.record_member(
                &packet.channel,
                &header.origin_mud,
                &header.origin_user,
                false,
            );
        } else {
            self.state.channels.remove_member(
                &packet.channel,
                &header.origin_mud,
                &header.origin_user,
            );
        }
        let event_name = if packet.on {
            name::CHANNEL_JOINED
        } else {
            name::CHANNEL_LEFT
        };
        self.state.bus.publish(
            Event::new(
                event_name,
                json!({
                    "channel": packet.channel,
                    "mud_name": header.origin_mud,
                    "user_name": header.origin_user,
                }),
                EventScope::Channel(packet.channel.clone()),
            )
            .priority(3)
            .expires_in(chrono::Duration::seconds(300)),
        );
    }

    /// Inbound chan-who-req about one of our channels: answer with the
    /// locally known members for this mud.
    pub fn accept_chan_who_req(&self, packet: &ChanWhoReqPacket) {
        let mud_name = self.state.config.mud.name.clone();
        let users: Vec<String> = self
            .state
            .channels
            .members(&packet.channel)
            .into_iter()
            .filter(|m| {
                m.mud_name.eq_ignore_ascii_case(&mud_name) && !m.user_name.is_empty()
            })
            .map(|m| m.user_name)
            .collect();
        let reply = Packet::ChanWhoReply(ChanWhoReplyPacket {
            header: Header::new(&mud_name)
                .to_mud(&packet.header.origin_mud)
                .to_user(&packet.header.origin_user),
            channel: packet.channel.clone(),
            users,
        });
        if let Err(e) = super::enqueue(&self.state, reply, SendPriority::Reply) {
            tracing::warn!(error = %e, "failed to queue chan-who reply");
        }
    }

    pub fn accept_chan_who_reply(&self, packet: &ChanWhoReplyPacket) {
        let key = PendingKey::ChanWho(
            packet.header.origin_mud.to_ascii_lowercase(),
            packet.channel.clone(),
        );
        let value = json!({
            "channel": packet.channel,
            "users": packet.users,
            "source": packet.header.origin_mud,
        });
        if !self.state.pending.complete(&key, value) {
            tracing::debug!(channel = %packet.channel, "unsolicited chan-who reply dropped");
        }
    }
}
