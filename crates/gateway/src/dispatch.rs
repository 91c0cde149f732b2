//! Inbound packet dispatch: the single consumer of the link reader's
//! channel. Packets are handled in arrival order; one handler never
//! blocks on another's completion.

use std::sync::Arc;

use tokio::sync::mpsc;

use i3_protocol::Packet;

use crate::services::Services;
use crate::state::AppState;

pub struct Dispatcher {
    state: AppState,
    services: Arc<Services>,
}

impl Dispatcher {
    pub fn new(state: AppState, services: Arc<Services>) -> Self {
        Self { state, services }
    }

    /// Consume decoded packets until the link side hangs up.
    pub async fn run(self, mut rx: mpsc::Receiver<Packet>) {
        while let Some(packet) = rx.recv().await {
            self.dispatch(packet);
        }
        tracing::info!("packet dispatcher stopped");
    }

    fn dispatch(&self, packet: Packet) {
        tracing::trace!(kind = %packet.kind(), from = %packet.header().origin_mud, "inbound packet");
        match packet {
            Packet::Tell(p) => self.services.tell.accept(&p, false),
            Packet::Emoteto(p) => self.services.tell.accept(&p, true),
            Packet::ChannelM(p) => self.services.channel.accept_message(&p, false),
            Packet::ChannelE(p) => self.services.channel.accept_message(&p, true),
            Packet::ChannelT(p) => self.services.channel.accept_targeted(&p),
            Packet::WhoReq(p) => self.services.query.accept_who_req(&p),
            Packet::WhoReply(p) => self.services.query.accept_who_reply(&p),
            Packet::FingerReq(p) => self.services.query.accept_finger_req(&p),
            Packet::FingerReply(p) => self.services.query.accept_finger_reply(&p),
            Packet::LocateReq(p) => self.services.query.accept_locate_req(&p),
            Packet::LocateReply(p) => self.services.query.accept_locate_reply(p),
            Packet::ChannelAdd(p) => {
                self.state
                    .channels
                    .upsert(&p.channel, p.kind, &p.header.origin_mud)
            }
            Packet::ChannelRemove(p) => self.state.channels.remove(&p.channel),
            Packet::ChannelListen(p) => self.services.channel.accept_listen(&p),
            Packet::ChanWhoReq(p) => self.services.channel.accept_chan_who_req(&p),
            Packet::ChanWhoReply(p) => self.services.channel.accept_chan_who_reply(&p),
            Packet::ChanlistReply(p) => self.services.mudlist.accept_chanlist(&p),
            Packet::Mudlist(p) => self.services.mudlist.accept_mudlist(&p),
            Packet::StartupReply(p) => self.services.mudlist.accept_startup_reply(&p),
            Packet::Shutdown(p) => self.services.mudlist.accept_shutdown(&p),
            Packet::Error(p) => self.services.mudlist.accept_error(&p),
            Packet::StartupReq3(p) => {
                // Only muds send this; receiving one means a confused peer.
                self.state.metrics.packets_dropped.inc();
                tracing::warn!(from = %p.header.origin_mud, "dropping inbound startup-req-3");
            }
        }
    }
}
