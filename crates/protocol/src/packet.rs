//! Typed I3 packet model.
//!
//! Every MudMode frame carries an LPC array whose first element names the
//! packet type. [`Packet::from_lpc`] dispatches on that element and
//! validates field counts, field types and the TTL range;
//! [`Packet::to_lpc`] produces the exact wire layout back.
//!
//! Header rule: the five header slots after the type string are
//! `ttl, origin_mud, origin_user, target_mud, target_user`. A broadcast or
//! absent slot is integer `0` on the wire and the empty string in this
//! model; the two representations convert symmetrically in both
//! directions.

use crate::lpc::LpcValue;

/// Default routing hop counter for freshly built packets. Routers
/// decrement it; the gateway never does.
pub const DEFAULT_TTL: i32 = 200;

pub const TTL_MIN: i32 = 1;
pub const TTL_MAX: i32 = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet is not an LPC array")]
    NotAnArray,

    #[error("packet array is empty")]
    MissingType,

    #[error("unknown packet type {0:?}")]
    UnknownType(String),

    #[error("{kind}: expected {expected} fields, got {got}")]
    WrongFieldCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{kind}: field {index} should be {expected}, got {got}")]
    BadField {
        kind: &'static str,
        index: usize,
        expected: &'static str,
        got: &'static str,
    },

    #[error("ttl {0} outside 1..=200")]
    TtlOutOfRange(i32),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Packet kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Tell,
    Emoteto,
    ChannelM,
    ChannelE,
    ChannelT,
    WhoReq,
    WhoReply,
    FingerReq,
    FingerReply,
    LocateReq,
    LocateReply,
    ChannelAdd,
    ChannelRemove,
    ChannelListen,
    ChanWhoReq,
    ChanWhoReply,
    ChanlistReply,
    Mudlist,
    StartupReq3,
    StartupReply,
    Shutdown,
    Error,
}

impl PacketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketKind::Tell => "tell",
            PacketKind::Emoteto => "emoteto",
            PacketKind::ChannelM => "channel-m",
            PacketKind::ChannelE => "channel-e",
            PacketKind::ChannelT => "channel-t",
            PacketKind::WhoReq => "who-req",
            PacketKind::WhoReply => "who-reply",
            PacketKind::FingerReq => "finger-req",
            PacketKind::FingerReply => "finger-reply",
            PacketKind::LocateReq => "locate-req",
            PacketKind::LocateReply => "locate-reply",
            PacketKind::ChannelAdd => "channel-add",
            PacketKind::ChannelRemove => "channel-remove",
            PacketKind::ChannelListen => "channel-listen",
            PacketKind::ChanWhoReq => "chan-who-req",
            PacketKind::ChanWhoReply => "chan-who-reply",
            PacketKind::ChanlistReply => "chanlist-reply",
            PacketKind::Mudlist => "mudlist",
            PacketKind::StartupReq3 => "startup-req-3",
            PacketKind::StartupReply => "startup-reply",
            PacketKind::Shutdown => "shutdown",
            PacketKind::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<PacketKind> {
        Some(match s {
            "tell" => PacketKind::Tell,
            "emoteto" => PacketKind::Emoteto,
            "channel-m" => PacketKind::ChannelM,
            "channel-e" => PacketKind::ChannelE,
            "channel-t" => PacketKind::ChannelT,
            "who-req" => PacketKind::WhoReq,
            "who-reply" => PacketKind::WhoReply,
            "finger-req" => PacketKind::FingerReq,
            "finger-reply" => PacketKind::FingerReply,
            "locate-req" => PacketKind::LocateReq,
            "locate-reply" => PacketKind::LocateReply,
            "channel-add" => PacketKind::ChannelAdd,
            "channel-remove" => PacketKind::ChannelRemove,
            "channel-listen" => PacketKind::ChannelListen,
            "chan-who-req" => PacketKind::ChanWhoReq,
            "chan-who-reply" => PacketKind::ChanWhoReply,
            "chanlist-reply" => PacketKind::ChanlistReply,
            "mudlist" => PacketKind::Mudlist,
            "startup-req-3" => PacketKind::StartupReq3,
            "startup-reply" => PacketKind::StartupReply,
            "shutdown" => PacketKind::Shutdown,
            "error" => PacketKind::Error,
            _ => return None,
        })
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Header
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The five routing slots every packet carries after its type string.
/// Empty strings stand for the wire's integer 0 (broadcast / absent).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub ttl: i32,
    pub origin_mud: String,
    pub origin_user: String,
    pub target_mud: String,
    pub target_user: String,
}

impl Header {
    pub fn new(origin_mud: &str) -> Self {
        Self {
            ttl: DEFAULT_TTL,
            origin_mud: origin_mud.to_string(),
            origin_user: String::new(),
            target_mud: String::new(),
            target_user: String::new(),
        }
    }

    pub fn from_user(mut self, user: &str) -> Self {
        self.origin_user = user.to_string();
        self
    }

    pub fn to_mud(mut self, mud: &str) -> Self {
        self.target_mud = mud.to_string();
        self
    }

    pub fn to_user(mut self, user: &str) -> Self {
        self.target_user = user.to_string();
        self
    }

    fn decode(kind: &'static str, items: &[LpcValue]) -> Result<Self, PacketError> {
        let ttl = int_at(kind, items, 1)?;
        if !(TTL_MIN..=TTL_MAX).contains(&ttl) {
            return Err(PacketError::TtlOutOfRange(ttl));
        }
        Ok(Self {
            ttl,
            origin_mud: str_at(kind, items, 2)?,
            origin_user: str_at(kind, items, 3)?,
            target_mud: str_at(kind, items, 4)?,
            target_user: str_at(kind, items, 5)?,
        })
    }

    fn encode(&self, kind: PacketKind, out: &mut Vec<LpcValue>) {
        out.push(LpcValue::str(kind.as_str()));
        out.push(LpcValue::Int(self.ttl));
        out.push(str_slot(&self.origin_mud));
        out.push(str_slot(&self.origin_user));
        out.push(str_slot(&self.target_mud));
        out.push(str_slot(&self.target_user));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload structs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `tell` and `emoteto` share this 8-field shape. `visname` is always
/// present at slot 6 and preserves capitalization; `target_user` in the
/// header must already be lowercased by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TellPacket {
    pub header: Header,
    pub visname: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessagePacket {
    pub header: Header,
    pub channel: String,
    pub visname: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTargetPacket {
    pub header: Header,
    pub channel: String,
    pub visname: String,
    pub target_user: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoReqPacket {
    pub header: Header,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoEntry {
    pub name: String,
    pub idle: i32,
    pub extra: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoReplyPacket {
    pub header: Header,
    pub users: Vec<WhoEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerReqPacket {
    pub header: Header,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerInfo {
    pub visname: String,
    pub title: String,
    pub real_name: String,
    pub email: String,
    pub login_time: String,
    pub idle: i32,
    pub ip_name: String,
    pub level: String,
    pub extra: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerReplyPacket {
    pub header: Header,
    pub info: FingerInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateReqPacket {
    pub header: Header,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateReplyPacket {
    pub header: Header,
    pub mud_name: String,
    pub user_name: String,
    pub idle: i32,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddPacket {
    pub header: Header,
    pub channel: String,
    /// 0 public, 1 private.
    pub kind: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRemovePacket {
    pub header: Header,
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelListenPacket {
    pub header: Header,
    pub channel: String,
    pub on: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChanWhoReqPacket {
    pub header: Header,
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChanWhoReplyPacket {
    pub header: Header,
    pub channel: String,
    pub users: Vec<String>,
}

/// Channel metadata as the router gossips it: `name → 0` removes a
/// channel, `name → [owner_mud, type]` adds or updates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub owner_mud: String,
    pub kind: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChanlistReplyPacket {
    pub header: Header,
    pub chanlist_id: i32,
    pub channels: Vec<(String, Option<ChannelInfo>)>,
}

/// Mud metadata as the router gossips it: `name → 0` marks a deleted
/// mud, `name → [13 fields]` adds or updates one.
#[derive(Debug, Clone, PartialEq)]
pub struct MudInfo {
    /// -1 up, 0 down, n > 0 rebooting (back in n seconds).
    pub state: i32,
    pub address: String,
    pub player_port: i32,
    pub tcp_port: i32,
    pub udp_port: i32,
    pub mudlib: String,
    pub base_mudlib: String,
    pub driver: String,
    pub mud_type: String,
    pub open_status: String,
    pub admin_email: String,
    pub services: Vec<(String, i32)>,
    /// Opaque extension mapping, kept verbatim (Int(0) when absent).
    pub other_data: LpcValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MudlistPacket {
    pub header: Header,
    pub mudlist_id: i32,
    pub muds: Vec<(String, Option<MudInfo>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartupReq3Packet {
    pub header: Header,
    /// Empty until the router assigns one; numeric passwords are encoded
    /// as LPC integers, anything else as a string.
    pub password: String,
    pub old_mudlist_id: i32,
    pub old_chanlist_id: i32,
    pub player_port: i32,
    pub imud_tcp_port: i32,
    pub imud_udp_port: i32,
    pub mudlib: String,
    pub base_mudlib: String,
    pub driver: String,
    pub mud_type: String,
    pub open_status: String,
    pub admin_email: String,
    pub services: Vec<(String, i32)>,
    pub other_data: LpcValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterEntry {
    pub name: String,
    /// `"host port"` as the router formats it.
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReplyPacket {
    pub header: Header,
    pub routers: Vec<RouterEntry>,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownPacket {
    pub header: Header,
    /// Seconds until the sender expects to be back; 0 = indefinite.
    pub restart_delay: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPacket {
    pub header: Header,
    pub code: String,
    pub message: String,
    pub bad_packet: Option<Box<LpcValue>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Packet
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Tell(TellPacket),
    Emoteto(TellPacket),
    ChannelM(ChannelMessagePacket),
    ChannelE(ChannelMessagePacket),
    ChannelT(ChannelTargetPacket),
    WhoReq(WhoReqPacket),
    WhoReply(WhoReplyPacket),
    FingerReq(FingerReqPacket),
    FingerReply(FingerReplyPacket),
    LocateReq(LocateReqPacket),
    LocateReply(LocateReplyPacket),
    ChannelAdd(ChannelAddPacket),
    ChannelRemove(ChannelRemovePacket),
    ChannelListen(ChannelListenPacket),
    ChanWhoReq(ChanWhoReqPacket),
    ChanWhoReply(ChanWhoReplyPacket),
    ChanlistReply(ChanlistReplyPacket),
    Mudlist(MudlistPacket),
    StartupReq3(Box<StartupReq3Packet>),
    StartupReply(StartupReplyPacket),
    Shutdown(ShutdownPacket),
    Error(ErrorPacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Tell(_) => PacketKind::Tell,
            Packet::Emoteto(_) => PacketKind::Emoteto,
            Packet::ChannelM(_) => PacketKind::ChannelM,
            Packet::ChannelE(_) => PacketKind::ChannelE,
            Packet::ChannelT(_) => PacketKind::ChannelT,
            Packet::WhoReq(_) => PacketKind::WhoReq,
            Packet::WhoReply(_) => PacketKind::WhoReply,
            Packet::FingerReq(_) => PacketKind::FingerReq,
            Packet::FingerReply(_) => PacketKind::FingerReply,
            Packet::LocateReq(_) => PacketKind::LocateReq,
            Packet::LocateReply(_) => PacketKind::LocateReply,
            Packet::ChannelAdd(_) => PacketKind::ChannelAdd,
            Packet::ChannelRemove(_) => PacketKind::ChannelRemove,
            Packet::ChannelListen(_) => PacketKind::ChannelListen,
            Packet::ChanWhoReq(_) => PacketKind::ChanWhoReq,
            Packet::ChanWhoReply(_) => PacketKind::ChanWhoReply,
            Packet::ChanlistReply(_) => PacketKind::ChanlistReply,
            Packet::Mudlist(_) => PacketKind::Mudlist,
            Packet::StartupReq3(_) => PacketKind::StartupReq3,
            Packet::StartupReply(_) => PacketKind::StartupReply,
            Packet::Shutdown(_) => PacketKind::Shutdown,
            Packet::Error(_) => PacketKind::Error,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Packet::Tell(p) | Packet::Emoteto(p) => &p.header,
            Packet::ChannelM(p) | Packet::ChannelE(p) => &p.header,
            Packet::ChannelT(p) => &p.header,
            Packet::WhoReq(p) => &p.header,
            Packet::WhoReply(p) => &p.header,
            Packet::FingerReq(p) => &p.header,
            Packet::FingerReply(p) => &p.header,
            Packet::LocateReq(p) => &p.header,
            Packet::LocateReply(p) => &p.header,
            Packet::ChannelAdd(p) => &p.header,
            Packet::ChannelRemove(p) => &p.header,
            Packet::ChannelListen(p) => &p.header,
            Packet::ChanWhoReq(p) => &p.header,
            Packet::ChanWhoReply(p) => &p.header,
            Packet::ChanlistReply(p) => &p.header,
            Packet::Mudlist(p) => &p.header,
            Packet::StartupReq3(p) => &p.header,
            Packet::StartupReply(p) => &p.header,
            Packet::Shutdown(p) => &p.header,
            Packet::Error(p) => &p.header,
        }
    }

    // ── Decode ───────────────────────────────────────────────────────

    pub fn from_lpc(value: &LpcValue) -> Result<Packet, PacketError> {
        let items = value.as_array().ok_or(PacketError::NotAnArray)?;
        let type_name = items
            .first()
            .ok_or(PacketError::MissingType)?
            .as_str()
            .ok_or(PacketError::MissingType)?;
        let kind =
            PacketKind::parse(type_name).ok_or_else(|| PacketError::UnknownType(type_name.into()))?;
        let k = kind.as_str();

        match kind {
            PacketKind::Tell | PacketKind::Emoteto => {
                expect_len(k, items, 8)?;
                let pkt = TellPacket {
                    header: Header::decode(k, items)?,
                    visname: str_at(k, items, 6)?,
                    message: str_at(k, items, 7)?,
                };
                Ok(match kind {
                    PacketKind::Tell => Packet::Tell(pkt),
                    _ => Packet::Emoteto(pkt),
                })
            }
            PacketKind::ChannelM | PacketKind::ChannelE => {
                expect_len(k, items, 9)?;
                let pkt = ChannelMessagePacket {
                    header: Header::decode(k, items)?,
                    channel: str_at(k, items, 6)?,
                    visname: str_at(k, items, 7)?,
                    message: str_at(k, items, 8)?,
                };
                Ok(match kind {
                    PacketKind::ChannelM => Packet::ChannelM(pkt),
                    _ => Packet::ChannelE(pkt),
                })
            }
            PacketKind::ChannelT => {
                expect_len(k, items, 10)?;
                Ok(Packet::ChannelT(ChannelTargetPacket {
                    header: Header::decode(k, items)?,
                    channel: str_at(k, items, 6)?,
                    visname: str_at(k, items, 7)?,
                    target_user: str_at(k, items, 8)?,
                    message: str_at(k, items, 9)?,
                }))
            }
            PacketKind::WhoReq => {
                expect_len(k, items, 6)?;
                Ok(Packet::WhoReq(WhoReqPacket {
                    header: Header::decode(k, items)?,
                }))
            }
            PacketKind::WhoReply => {
                expect_len(k, items, 7)?;
                let rows = array_at(k, items, 6)?;
                let mut users = Vec::with_capacity(rows.len());
                for row in rows {
                    let cols = row
                        .as_array()
                        .ok_or(bad_field(k, 6, "array of [name, idle, extra]", row))?;
                    if cols.len() != 3 {
                        return Err(bad_field(k, 6, "3-element who row", row));
                    }
                    users.push(WhoEntry {
                        name: lenient_str(k, 6, &cols[0])?,
                        idle: cols[1].as_int().ok_or(bad_field(k, 6, "int idle", &cols[1]))?,
                        extra: lenient_str(k, 6, &cols[2])?,
                    });
                }
                Ok(Packet::WhoReply(WhoReplyPacket {
                    header: Header::decode(k, items)?,
                    users,
                }))
            }
            PacketKind::FingerReq => {
                expect_len(k, items, 7)?;
                Ok(Packet::FingerReq(FingerReqPacket {
                    header: Header::decode(k, items)?,
                    username: str_at(k, items, 6)?,
                }))
            }
            PacketKind::FingerReply => {
                expect_len(k, items, 15)?;
                Ok(Packet::FingerReply(FingerReplyPacket {
                    header: Header::decode(k, items)?,
                    info: FingerInfo {
                        visname: str_at(k, items, 6)?,
                        title: str_at(k, items, 7)?,
                        real_name: str_at(k, items, 8)?,
                        email: str_at(k, items, 9)?,
                        login_time: str_at(k, items, 10)?,
                        idle: int_at(k, items, 11)?,
                        ip_name: str_at(k, items, 12)?,
                        level: str_at(k, items, 13)?,
                        extra: str_at(k, items, 14)?,
                    },
                }))
            }
            PacketKind::LocateReq => {
                expect_len(k, items, 7)?;
                Ok(Packet::LocateReq(LocateReqPacket {
                    header: Header::decode(k, items)?,
                    username: str_at(k, items, 6)?,
                }))
            }
            PacketKind::LocateReply => {
                expect_len(k, items, 10)?;
                Ok(Packet::LocateReply(LocateReplyPacket {
                    header: Header::decode(k, items)?,
                    mud_name: str_at(k, items, 6)?,
                    user_name: str_at(k, items, 7)?,
                    idle: int_at(k, items, 8)?,
                    status: str_at(k, items, 9)?,
                }))
            }
            PacketKind::ChannelAdd => {
                expect_len(k, items, 8)?;
                Ok(Packet::ChannelAdd(ChannelAddPacket {
                    header: Header::decode(k, items)?,
                    channel: str_at(k, items, 6)?,
                    kind: int_at(k, items, 7)?,
                }))
            }
            PacketKind::ChannelRemove => {
                expect_len(k, items, 7)?;
                Ok(Packet::ChannelRemove(ChannelRemovePacket {
                    header: Header::decode(k, items)?,
                    channel: str_at(k, items, 6)?,
                }))
            }
            PacketKind::ChannelListen => {
                expect_len(k, items, 8)?;
                Ok(Packet::ChannelListen(ChannelListenPacket {
                    header: Header::decode(k, items)?,
                    channel: str_at(k, items, 6)?,
                    on: int_at(k, items, 7)? != 0,
                }))
            }
            PacketKind::ChanWhoReq => {
                expect_len(k, items, 7)?;
                Ok(Packet::ChanWhoReq(ChanWhoReqPacket {
                    header: Header::decode(k, items)?,
                    channel: str_at(k, items, 6)?,
                }))
            }
            PacketKind::ChanWhoReply => {
                expect_len(k, items, 8)?;
                let rows = array_at(k, items, 7)?;
                let mut users = Vec::with_capacity(rows.len());
                for row in rows {
                    users.push(lenient_str(k, 7, row)?);
                }
                Ok(Packet::ChanWhoReply(ChanWhoReplyPacket {
                    header: Header::decode(k, items)?,
                    channel: str_at(k, items, 6)?,
                    users,
                }))
            }
            PacketKind::ChanlistReply => {
                expect_len(k, items, 8)?;
                let pairs = items[7]
                    .as_mapping()
                    .ok_or(bad_field(k, 7, "mapping", &items[7]))?;
                let mut channels = Vec::with_capacity(pairs.len());
                for (name, info) in pairs {
                    let name = lenient_str(k, 7, name)?;
                    let info = if info.is_null() {
                        None
                    } else {
                        let cols = info
                            .as_array()
                            .ok_or(bad_field(k, 7, "[owner_mud, type] or 0", info))?;
                        if cols.len() != 2 {
                            return Err(bad_field(k, 7, "2-element channel info", info));
                        }
                        Some(ChannelInfo {
                            owner_mud: lenient_str(k, 7, &cols[0])?,
                            kind: cols[1]
                                .as_int()
                                .ok_or(bad_field(k, 7, "int channel type", &cols[1]))?,
                        })
                    };
                    channels.push((name, info));
                }
                Ok(Packet::ChanlistReply(ChanlistReplyPacket {
                    header: Header::decode(k, items)?,
                    chanlist_id: int_at(k, items, 6)?,
                    channels,
                }))
            }
            PacketKind::Mudlist => {
                expect_len(k, items, 8)?;
                let pairs = items[7]
                    .as_mapping()
                    .ok_or(bad_field(k, 7, "mapping", &items[7]))?;
                let mut muds = Vec::with_capacity(pairs.len());
                for (name, info) in pairs {
                    let name = lenient_str(k, 7, name)?;
                    let info = if info.is_null() {
                        None
                    } else {
                        Some(decode_mud_info(k, info)?)
                    };
                    muds.push((name, info));
                }
                Ok(Packet::Mudlist(MudlistPacket {
                    header: Header::decode(k, items)?,
                    mudlist_id: int_at(k, items, 6)?,
                    muds,
                }))
            }
            PacketKind::StartupReq3 => {
                expect_len(k, items, 20)?;
                Ok(Packet::StartupReq3(Box::new(StartupReq3Packet {
                    header: Header::decode(k, items)?,
                    password: password_at(k, items, 6)?,
                    old_mudlist_id: int_at(k, items, 7)?,
                    old_chanlist_id: int_at(k, items, 8)?,
                    player_port: int_at(k, items, 9)?,
                    imud_tcp_port: int_at(k, items, 10)?,
                    imud_udp_port: int_at(k, items, 11)?,
                    mudlib: str_at(k, items, 12)?,
                    base_mudlib: str_at(k, items, 13)?,
                    driver: str_at(k, items, 14)?,
                    mud_type: str_at(k, items, 15)?,
                    open_status: str_at(k, items, 16)?,
                    admin_email: str_at(k, items, 17)?,
                    services: decode_services(k, &items[18])?,
                    other_data: items[19].clone(),
                })))
            }
            PacketKind::StartupReply => {
                expect_len(k, items, 8)?;
                let rows = array_at(k, items, 6)?;
                let mut routers = Vec::with_capacity(rows.len());
                for row in rows {
                    let cols = row
                        .as_array()
                        .ok_or(bad_field(k, 6, "[name, address] pair", row))?;
                    if cols.len() != 2 {
                        return Err(bad_field(k, 6, "2-element router entry", row));
                    }
                    routers.push(RouterEntry {
                        name: lenient_str(k, 6, &cols[0])?,
                        address: lenient_str(k, 6, &cols[1])?,
                    });
                }
                Ok(Packet::StartupReply(StartupReplyPacket {
                    header: Header::decode(k, items)?,
                    routers,
                    password: password_at(k, items, 7)?,
                }))
            }
            PacketKind::Shutdown => {
                expect_len(k, items, 7)?;
                Ok(Packet::Shutdown(ShutdownPacket {
                    header: Header::decode(k, items)?,
                    restart_delay: int_at(k, items, 6)?,
                }))
            }
            PacketKind::Error => {
                expect_len(k, items, 9)?;
                let bad_packet = if items[8].is_null() {
                    None
                } else {
                    Some(Box::new(items[8].clone()))
                };
                Ok(Packet::Error(ErrorPacket {
                    header: Header::decode(k, items)?,
                    code: str_at(k, items, 6)?,
                    message: str_at(k, items, 7)?,
                    bad_packet,
                }))
            }
        }
    }

    // ── Encode ───────────────────────────────────────────────────────

    pub fn to_lpc(&self) -> LpcValue {
        let kind = self.kind();
        let mut out = Vec::with_capacity(8);
        self.header().encode(kind, &mut out);

        match self {
            Packet::Tell(p) | Packet::Emoteto(p) => {
                out.push(LpcValue::str(&p.visname));
                out.push(LpcValue::str(&p.message));
            }
            Packet::ChannelM(p) | Packet::ChannelE(p) => {
                out.push(LpcValue::str(&p.channel));
                out.push(LpcValue::str(&p.visname));
                out.push(LpcValue::str(&p.message));
            }
            Packet::ChannelT(p) => {
                out.push(LpcValue::str(&p.channel));
                out.push(LpcValue::str(&p.visname));
                out.push(LpcValue::str(&p.target_user));
                out.push(LpcValue::str(&p.message));
            }
            Packet::WhoReq(_) => {}
            Packet::WhoReply(p) => {
                out.push(LpcValue::Array(
                    p.users
                        .iter()
                        .map(|u| {
                            LpcValue::Array(vec![
                                LpcValue::str(&u.name),
                                LpcValue::Int(u.idle),
                                LpcValue::str(&u.extra),
                            ])
                        })
                        .collect(),
                ));
            }
            Packet::FingerReq(p) => out.push(LpcValue::str(&p.username)),
            Packet::FingerReply(p) => {
                out.push(LpcValue::str(&p.info.visname));
                out.push(LpcValue::str(&p.info.title));
                out.push(LpcValue::str(&p.info.real_name));
                out.push(LpcValue::str(&p.info.email));
                out.push(LpcValue::str(&p.info.login_time));
                out.push(LpcValue::Int(p.info.idle));
                out.push(LpcValue::str(&p.info.ip_name));
                out.push(LpcValue::str(&p.info.level));
                out.push(LpcValue::str(&p.info.extra));
            }
            Packet::LocateReq(p) => out.push(LpcValue::str(&p.username)),
            Packet::LocateReply(p) => {
                out.push(LpcValue::str(&p.mud_name));
                out.push(LpcValue::str(&p.user_name));
                out.push(LpcValue::Int(p.idle));
                out.push(LpcValue::str(&p.status));
            }
            Packet::ChannelAdd(p) => {
                out.push(LpcValue::str(&p.channel));
                out.push(LpcValue::Int(p.kind));
            }
            Packet::ChannelRemove(p) => out.push(LpcValue::str(&p.channel)),
            Packet::ChannelListen(p) => {
                out.push(LpcValue::str(&p.channel));
                out.push(LpcValue::Int(p.on as i32));
            }
            Packet::ChanWhoReq(p) => out.push(LpcValue::str(&p.channel)),
            Packet::ChanWhoReply(p) => {
                out.push(LpcValue::str(&p.channel));
                out.push(LpcValue::Array(
                    p.users.iter().map(|u| LpcValue::str(u)).collect(),
                ));
            }
            Packet::ChanlistReply(p) => {
                out.push(LpcValue::Int(p.chanlist_id));
                out.push(LpcValue::Mapping(
                    p.channels
                        .iter()
                        .map(|(name, info)| {
                            let value = match info {
                                None => LpcValue::NULL,
                                Some(info) => LpcValue::Array(vec![
                                    LpcValue::str(&info.owner_mud),
                                    LpcValue::Int(info.kind),
                                ]),
                            };
                            (LpcValue::str(name), value)
                        })
                        .collect(),
                ));
            }
            Packet::Mudlist(p) => {
                out.push(LpcValue::Int(p.mudlist_id));
                out.push(LpcValue::Mapping(
                    p.muds
                        .iter()
                        .map(|(name, info)| {
                            let value = match info {
                                None => LpcValue::NULL,
                                Some(info) => encode_mud_info(info),
                            };
                            (LpcValue::str(name), value)
                        })
                        .collect(),
                ));
            }
            Packet::StartupReq3(p) => {
                out.push(password_slot(&p.password));
                out.push(LpcValue::Int(p.old_mudlist_id));
                out.push(LpcValue::Int(p.old_chanlist_id));
                out.push(LpcValue::Int(p.player_port));
                out.push(LpcValue::Int(p.imud_tcp_port));
                out.push(LpcValue::Int(p.imud_udp_port));
                out.push(LpcValue::str(&p.mudlib));
                out.push(LpcValue::str(&p.base_mudlib));
                out.push(LpcValue::str(&p.driver));
                out.push(LpcValue::str(&p.mud_type));
                out.push(LpcValue::str(&p.open_status));
                out.push(LpcValue::str(&p.admin_email));
                out.push(encode_services(&p.services));
                out.push(p.other_data.clone());
            }
            Packet::StartupReply(p) => {
                out.push(LpcValue::Array(
                    p.routers
                        .iter()
                        .map(|r| {
                            LpcValue::Array(vec![
                                LpcValue::str(&r.name),
                                LpcValue::str(&r.address),
                            ])
                        })
                        .collect(),
                ));
                out.push(password_slot(&p.password));
            }
            Packet::Shutdown(p) => out.push(LpcValue::Int(p.restart_delay)),
            Packet::Error(p) => {
                out.push(LpcValue::str(&p.code));
                out.push(LpcValue::str(&p.message));
                out.push(match &p.bad_packet {
                    None => LpcValue::NULL,
                    Some(v) => (**v).clone(),
                });
            }
        }

        LpcValue::Array(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn expect_len(kind: &'static str, items: &[LpcValue], expected: usize) -> Result<(), PacketError> {
    if items.len() != expected {
        return Err(PacketError::WrongFieldCount {
            kind,
            expected,
            got: items.len(),
        });
    }
    Ok(())
}

fn bad_field(
    kind: &'static str,
    index: usize,
    expected: &'static str,
    got: &LpcValue,
) -> PacketError {
    PacketError::BadField {
        kind,
        index,
        expected,
        got: got_name(got),
    }
}

fn got_name(v: &LpcValue) -> &'static str {
    v.type_name()
}

/// String slot: a string, or integer 0 standing for the empty string.
fn str_at(kind: &'static str, items: &[LpcValue], index: usize) -> Result<String, PacketError> {
    lenient_str(kind, index, &items[index])
}

fn lenient_str(kind: &'static str, index: usize, v: &LpcValue) -> Result<String, PacketError> {
    match v {
        LpcValue::String(s) => Ok(s.clone()),
        LpcValue::Int(0) => Ok(String::new()),
        other => Err(bad_field(kind, index, "string or 0", other)),
    }
}

fn int_at(kind: &'static str, items: &[LpcValue], index: usize) -> Result<i32, PacketError> {
    items[index]
        .as_int()
        .ok_or(bad_field(kind, index, "int", &items[index]))
}

fn array_at<'a>(
    kind: &'static str,
    items: &'a [LpcValue],
    index: usize,
) -> Result<&'a [LpcValue], PacketError> {
    items[index]
        .as_array()
        .ok_or(bad_field(kind, index, "array", &items[index]))
}

/// Empty string encodes as integer 0; strings that are plain integers
/// (the common case for router-assigned passwords) encode as LPC ints.
fn password_slot(password: &str) -> LpcValue {
    if password.is_empty() {
        return LpcValue::NULL;
    }
    match password.parse::<i32>() {
        Ok(n) => LpcValue::Int(n),
        Err(_) => LpcValue::str(password),
    }
}

fn password_at(kind: &'static str, items: &[LpcValue], index: usize) -> Result<String, PacketError> {
    match &items[index] {
        LpcValue::Int(0) => Ok(String::new()),
        LpcValue::Int(n) => Ok(n.to_string()),
        LpcValue::String(s) => Ok(s.clone()),
        other => Err(bad_field(kind, index, "string or int", other)),
    }
}

fn decode_services(
    kind: &'static str,
    value: &LpcValue,
) -> Result<Vec<(String, i32)>, PacketError> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let pairs = value
        .as_mapping()
        .ok_or(bad_field(kind, 18, "services mapping or 0", value))?;
    let mut services = Vec::with_capacity(pairs.len());
    for (name, flag) in pairs {
        services.push((
            lenient_str(kind, 18, name)?,
            flag.as_int().ok_or(bad_field(kind, 18, "int flag", flag))?,
        ));
    }
    Ok(services)
}

fn encode_services(services: &[(String, i32)]) -> LpcValue {
    LpcValue::Mapping(
        services
            .iter()
            .map(|(name, flag)| (LpcValue::str(name), LpcValue::Int(*flag)))
            .collect(),
    )
}

fn decode_mud_info(kind: &'static str, value: &LpcValue) -> Result<MudInfo, PacketError> {
    let cols = value
        .as_array()
        .ok_or(bad_field(kind, 7, "13-field mud info or 0", value))?;
    if cols.len() != 13 {
        return Err(bad_field(kind, 7, "13-field mud info", value));
    }
    let services = if cols[11].is_null() {
        Vec::new()
    } else {
        cols[11]
            .as_mapping()
            .ok_or(bad_field(kind, 7, "services mapping", &cols[11]))?
            .iter()
            .map(|(name, flag)| {
                Ok((
                    lenient_str(kind, 7, name)?,
                    flag.as_int().ok_or(bad_field(kind, 7, "int flag", flag))?,
                ))
            })
            .collect::<Result<_, PacketError>>()?
    };
    Ok(MudInfo {
        state: cols[0].as_int().ok_or(bad_field(kind, 7, "int state", &cols[0]))?,
        address: lenient_str(kind, 7, &cols[1])?,
        player_port: cols[2].as_int().ok_or(bad_field(kind, 7, "int port", &cols[2]))?,
        tcp_port: cols[3].as_int().ok_or(bad_field(kind, 7, "int port", &cols[3]))?,
        udp_port: cols[4].as_int().ok_or(bad_field(kind, 7, "int port", &cols[4]))?,
        mudlib: lenient_str(kind, 7, &cols[5])?,
        base_mudlib: lenient_str(kind, 7, &cols[6])?,
        driver: lenient_str(kind, 7, &cols[7])?,
        mud_type: lenient_str(kind, 7, &cols[8])?,
        open_status: lenient_str(kind, 7, &cols[9])?,
        admin_email: lenient_str(kind, 7, &cols[10])?,
        services,
        other_data: cols[12].clone(),
    })
}

fn encode_mud_info(info: &MudInfo) -> LpcValue {
    LpcValue::Array(vec![
        LpcValue::Int(info.state),
        LpcValue::str(&info.address),
        LpcValue::Int(info.player_port),
        LpcValue::Int(info.tcp_port),
        LpcValue::Int(info.udp_port),
        LpcValue::str(&info.mudlib),
        LpcValue::str(&info.base_mudlib),
        LpcValue::str(&info.driver),
        LpcValue::str(&info.mud_type),
        LpcValue::str(&info.open_status),
        LpcValue::str(&info.admin_email),
        encode_services(&info.services),
        info.other_data.clone(),
    ])
}

/// Header slot rule: empty string becomes integer 0 on the wire.
fn str_slot(s: &str) -> LpcValue {
    if s.is_empty() {
        LpcValue::NULL
    } else {
        LpcValue::str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lpc;

    fn tell(visname: &str, message: &str) -> Packet {
        Packet::Tell(TellPacket {
            header: Header {
                ttl: 200,
                origin_mud: "LuminariMUD".into(),
                origin_user: "player".into(),
                target_mud: "othermud".into(),
                target_user: "friend".into(),
            },
            visname: visname.into(),
            message: message.into(),
        })
    }

    fn round_trip(pkt: Packet) {
        let wire = pkt.to_lpc();
        // Also push through the byte codec to cover both layers.
        let decoded = Packet::from_lpc(&lpc::decode(&lpc::encode(&wire)).unwrap()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn tell_has_exactly_eight_fields() {
        let wire = tell("Player", "hi").to_lpc();
        let items = wire.as_array().unwrap();
        assert_eq!(items.len(), 8);
        assert_eq!(items[0].as_str(), Some("tell"));
        assert_eq!(items[6].as_str(), Some("Player"));
        assert_eq!(items[7].as_str(), Some("hi"));
    }

    #[test]
    fn tell_matches_wire_example() {
        // ["tell",200,"LuminariMUD","player","othermud","friend","player","hi"]
        let wire = tell("player", "hi").to_lpc();
        let expected = LpcValue::Array(vec![
            LpcValue::str("tell"),
            LpcValue::Int(200),
            LpcValue::str("LuminariMUD"),
            LpcValue::str("player"),
            LpcValue::str("othermud"),
            LpcValue::str("friend"),
            LpcValue::str("player"),
            LpcValue::str("hi"),
        ]);
        assert_eq!(wire, expected);
    }

    #[test]
    fn inbound_tell_decodes() {
        let wire = LpcValue::Array(vec![
            LpcValue::str("tell"),
            LpcValue::Int(5),
            LpcValue::str("FarMUD"),
            LpcValue::str("Alice"),
            LpcValue::str("luminarimud"),
            LpcValue::str("bob"),
            LpcValue::str("Alice"),
            LpcValue::str("ping"),
        ]);
        let Packet::Tell(pkt) = Packet::from_lpc(&wire).unwrap() else {
            panic!("expected tell");
        };
        assert_eq!(pkt.header.ttl, 5);
        assert_eq!(pkt.header.origin_mud, "FarMUD");
        assert_eq!(pkt.visname, "Alice");
        assert_eq!(pkt.message, "ping");
    }

    #[test]
    fn header_zero_round_trips_as_empty_string() {
        let pkt = Packet::LocateReq(LocateReqPacket {
            header: Header {
                ttl: 200,
                origin_mud: "LuminariMUD".into(),
                origin_user: "player".into(),
                target_mud: String::new(), // broadcast
                target_user: "wiz".into(),
            },
            username: "wiz".into(),
        });
        let wire = pkt.to_lpc();
        assert!(wire.as_array().unwrap()[4].is_null());
        round_trip(pkt);
    }

    #[test]
    fn ttl_out_of_range_rejected() {
        for ttl in [0, -5, 201] {
            let wire = LpcValue::Array(vec![
                LpcValue::str("who-req"),
                LpcValue::Int(ttl),
                LpcValue::str("A"),
                LpcValue::NULL,
                LpcValue::str("B"),
                LpcValue::NULL,
            ]);
            assert_eq!(
                Packet::from_lpc(&wire),
                Err(PacketError::TtlOutOfRange(ttl))
            );
        }
    }

    #[test]
    fn wrong_field_count_rejected() {
        // 7-field tell (the legacy layout) must not parse.
        let wire = LpcValue::Array(vec![
            LpcValue::str("tell"),
            LpcValue::Int(200),
            LpcValue::str("A"),
            LpcValue::str("a"),
            LpcValue::str("b"),
            LpcValue::str("u"),
            LpcValue::str("hi"),
        ]);
        assert_eq!(
            Packet::from_lpc(&wire),
            Err(PacketError::WrongFieldCount {
                kind: "tell",
                expected: 8,
                got: 7
            })
        );
    }

    #[test]
    fn non_string_header_slot_rejected() {
        let wire = LpcValue::Array(vec![
            LpcValue::str("who-req"),
            LpcValue::Int(200),
            LpcValue::Float(1.0), // origin_mud must be string or 0
            LpcValue::NULL,
            LpcValue::str("B"),
            LpcValue::NULL,
        ]);
        assert!(matches!(
            Packet::from_lpc(&wire),
            Err(PacketError::BadField { index: 2, .. })
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        let wire = LpcValue::Array(vec![LpcValue::str("oob-begin"), LpcValue::Int(200)]);
        assert_eq!(
            Packet::from_lpc(&wire),
            Err(PacketError::UnknownType("oob-begin".into()))
        );
    }

    #[test]
    fn startup_req_3_has_twenty_fields() {
        let pkt = Packet::StartupReq3(Box::new(StartupReq3Packet {
            header: Header {
                ttl: 200,
                origin_mud: "LuminariMUD".into(),
                origin_user: String::new(),
                target_mud: "*i4".into(),
                target_user: String::new(),
            },
            password: String::new(),
            old_mudlist_id: 0,
            old_chanlist_id: 0,
            player_port: 4000,
            imud_tcp_port: 0,
            imud_udp_port: 0,
            mudlib: "LuminariMUD".into(),
            base_mudlib: "LuminariMUD".into(),
            driver: "CircleMUD".into(),
            mud_type: "MUD".into(),
            open_status: "open".into(),
            admin_email: "admin@example.com".into(),
            services: vec![("tell".into(), 1), ("channel".into(), 1)],
            other_data: LpcValue::NULL,
        }));
        let wire = pkt.to_lpc();
        let items = wire.as_array().unwrap();
        assert_eq!(items.len(), 20);
        // First-run password is integer 0.
        assert!(items[6].is_null());
        round_trip(pkt);
    }

    #[test]
    fn numeric_password_round_trips_through_int() {
        let slot = password_slot("123456");
        assert_eq!(slot, LpcValue::Int(123_456));
        let back = password_at("startup-reply", &[slot], 0).unwrap();
        assert_eq!(back, "123456");

        let slot = password_slot("P2");
        assert_eq!(slot, LpcValue::str("P2"));
    }

    #[test]
    fn startup_reply_round_trips() {
        round_trip(Packet::StartupReply(StartupReplyPacket {
            header: Header {
                ttl: 200,
                origin_mud: "*i4".into(),
                origin_user: String::new(),
                target_mud: "LuminariMUD".into(),
                target_user: String::new(),
            },
            routers: vec![RouterEntry {
                name: "*i4".into(),
                address: "204.209.44.3 8080".into(),
            }],
            password: "P2".into(),
        }));
    }

    #[test]
    fn mudlist_round_trips_with_deletions() {
        round_trip(Packet::Mudlist(MudlistPacket {
            header: Header {
                ttl: 200,
                origin_mud: "*i4".into(),
                origin_user: String::new(),
                target_mud: "LuminariMUD".into(),
                target_user: String::new(),
            },
            mudlist_id: 42,
            muds: vec![
                (
                    "OtherMUD".into(),
                    Some(MudInfo {
                        state: -1,
                        address: "10.0.0.1".into(),
                        player_port: 4000,
                        tcp_port: 0,
                        udp_port: 0,
                        mudlib: "Lib".into(),
                        base_mudlib: "Lib".into(),
                        driver: "FluffOS".into(),
                        mud_type: "MUD".into(),
                        open_status: "open".into(),
                        admin_email: "a@b.c".into(),
                        services: vec![("tell".into(), 1)],
                        other_data: LpcValue::NULL,
                    }),
                ),
                ("DeadMUD".into(), None),
            ],
        }));
    }

    #[test]
    fn channel_packets_round_trip() {
        let header = Header {
            ttl: 200,
            origin_mud: "LuminariMUD".into(),
            origin_user: "player".into(),
            target_mud: String::new(),
            target_user: String::new(),
        };
        round_trip(Packet::ChannelM(ChannelMessagePacket {
            header: header.clone(),
            channel: "intermud".into(),
            visname: "Player".into(),
            message: "hello".into(),
        }));
        round_trip(Packet::ChannelT(ChannelTargetPacket {
            header: header.clone(),
            channel: "intermud".into(),
            visname: "Player".into(),
            target_user: "friend".into(),
            message: "waves".into(),
        }));
        round_trip(Packet::ChannelListen(ChannelListenPacket {
            header,
            channel: "intermud".into(),
            on: true,
        }));
    }

    #[test]
    fn error_packet_keeps_bad_packet_verbatim() {
        let bad = LpcValue::Array(vec![LpcValue::str("tell"), LpcValue::Int(1)]);
        round_trip(Packet::Error(ErrorPacket {
            header: Header {
                ttl: 200,
                origin_mud: "*i4".into(),
                origin_user: String::new(),
                target_mud: "LuminariMUD".into(),
                target_user: "bob".into(),
            },
            code: "unk-user".into(),
            message: "user not found".into(),
            bad_packet: Some(Box::new(bad)),
        }));
    }

    #[test]
    fn who_and_finger_round_trip() {
        let header = Header {
            ttl: 200,
            origin_mud: "A".into(),
            origin_user: "u".into(),
            target_mud: "B".into(),
            target_user: String::new(),
        };
        round_trip(Packet::WhoReply(WhoReplyPacket {
            header: header.clone(),
            users: vec![
                WhoEntry {
                    name: "Alice".into(),
                    idle: 0,
                    extra: "the Brave".into(),
                },
                WhoEntry {
                    name: "Bob".into(),
                    idle: 120,
                    extra: String::new(),
                },
            ],
        }));
        round_trip(Packet::FingerReply(FingerReplyPacket {
            header,
            info: FingerInfo {
                visname: "Alice".into(),
                title: "the Brave".into(),
                real_name: String::new(),
                email: String::new(),
                login_time: "Sun Feb  1 10:00:00 2026".into(),
                idle: 5,
                ip_name: String::new(),
                level: "wizard".into(),
                extra: String::new(),
            },
        }));
    }
}
