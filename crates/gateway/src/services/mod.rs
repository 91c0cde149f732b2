//! Per-packet-type services: each one accepts inbound I3 packets and/or
//! serves API calls, producing outbound packets, cache updates, and
//! events.

pub mod channel;
pub mod mudlist;
pub mod pending;
pub mod query;
pub mod tell;

use serde_json::json;

use i3_domain::event::{name, Event, EventScope};
use i3_domain::{Error, Result};
use i3_protocol::Packet;

use crate::link::{Enqueue, SendPriority};
use crate::state::AppState;

pub struct Services {
    pub tell: tell::TellService,
    pub channel: channel::ChannelService,
    pub query: query::QueryService,
    pub mudlist: mudlist::MudlistService,
}

impl Services {
    pub fn new(state: AppState) -> Self {
        Self {
            tell: tell::TellService::new(state.clone()),
            channel: channel::ChannelService::new(state.clone()),
            query: query::QueryService::new(state.clone()),
            mudlist: mudlist::MudlistService::new(state),
        }
    }
}

/// Queue one packet for the router, honoring the circuit breaker and
/// the bounded queue's drop policy.
pub(crate) fn enqueue(state: &AppState, packet: Packet, priority: SendPriority) -> Result<()> {
    if !state.breaker.allow() {
        return Err(Error::Link("router circuit open".into()));
    }
    match state.outbound.push(packet, priority) {
        Enqueue::Queued => Ok(()),
        Enqueue::QueuedDropping(dropped) => {
            state.metrics.packets_dropped.inc();
            state.bus.publish(
                Event::new(
                    name::BACKPRESSURE,
                    json!({ "dropped": dropped.kind().as_str() }),
                    EventScope::Broadcast,
                )
                .priority(6)
                .expires_in(chrono::Duration::seconds(60)),
            );
            Ok(())
        }
        Enqueue::Rejected => {
            state.metrics.packets_dropped.inc();
            Err(Error::Backpressure)
        }
    }
}
