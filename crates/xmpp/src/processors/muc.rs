use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use xmpp_parsers::message::MessageType;
use xmpp_parsers::muc::user::{MucUser, Status};
use xmpp_parsers::presence::Type as PresenceType;

use wisp_core::event::{
    Channel, ChatMessage, Event, EventPayload, EventSource, MessageType as CoreMessageType,
    MucAffiliation as CoreAffiliation, MucLeaveReason, MucOccupant as CoreOccupant,
    MucRole as CoreRole,
};

#[cfg(feature = "native")]
use wisp_core::event::EventBus;

use crate::pipeline::{ProcessorContext, ProcessorResult, StanzaProcessor};
use crate::stanza::Stanza;

/// Classifies inbound groupchat presence and dispatches join/leave/rename/
/// subject/occupant events per the status codes in SPEC_FULL.md §4.G
/// (201 room-created, 301 ban, 303 nick-change, 307 kick).
pub struct MucProcessor {
    #[cfg(feature = "native")]
    event_bus: Arc<dyn EventBus>,
}

impl MucProcessor {
    #[cfg(feature = "native")]
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self { event_bus }
    }
}

impl StanzaProcessor for MucProcessor {
    fn name(&self) -> &str {
        "muc"
    }

    fn process_inbound(&self, stanza: &mut Stanza, _ctx: &ProcessorContext) -> ProcessorResult {
        match stanza {
            Stanza::Message(msg) => self.handle_message(msg),
            Stanza::Presence(presence) => self.handle_presence(presence),
            _ => {}
        }

        ProcessorResult::Continue
    }

    fn process_outbound(&self, _stanza: &mut Stanza, _ctx: &ProcessorContext) -> ProcessorResult {
        ProcessorResult::Continue
    }

    fn priority(&self) -> i32 {
        10
    }
}

impl MucProcessor {
    fn handle_message(&self, msg: &xmpp_parsers::message::Message) {
        if msg.type_ != MessageType::Groupchat {
            return;
        }

        let room = msg
            .from
            .as_ref()
            .map(|j| j.to_bare().to_string())
            .unwrap_or_default();

        if let Some((_, subject)) = msg.get_best_subject(vec![]) {
            debug!(room = %room, "MUC subject changed");
            self.publish(
                "xmpp.muc.subject.changed",
                EventPayload::MucSubjectChanged {
                    room,
                    subject: subject.clone(),
                },
            );
            return;
        }

        let Some((_, body)) = msg.get_best_body(vec![]) else {
            return;
        };

        let chat_message = ChatMessage {
            id: msg.id.as_ref().map(|id| id.0.clone()).unwrap_or_default(),
            from: msg.from.as_ref().map(|j| j.to_string()).unwrap_or_default(),
            to: msg.to.as_ref().map(|j| j.to_string()).unwrap_or_default(),
            body: body.clone(),
            timestamp: Utc::now(),
            message_type: CoreMessageType::Groupchat,
            thread: msg.thread.as_ref().map(|t| t.id.clone()),
        };

        debug!(room = %room, "MUC message received");
        self.publish(
            "xmpp.muc.message.received",
            EventPayload::MucMessageReceived {
                room,
                message: chat_message,
            },
        );
    }

    fn handle_presence(&self, presence: &xmpp_parsers::presence::Presence) {
        let Some(muc_user) = presence
            .payloads
            .iter()
            .find_map(|el| MucUser::try_from(el.clone()).ok())
        else {
            return;
        };

        let room = presence
            .from
            .as_ref()
            .map(|j| j.to_bare().to_string())
            .unwrap_or_default();
        let nick = presence
            .from
            .as_ref()
            .and_then(|j| j.resource().map(|r| r.to_string()))
            .unwrap_or_default();

        let is_self = muc_user.status.contains(&Status::SelfPresence);

        // Status 201: room just created, unlocked by submitting an
        // iq-set elsewhere (the session controller owns that write);
        // here we only surface the fact.
        if muc_user.status.contains(&Status::RoomCreated) {
            debug!(room = %room, "MUC room created");
        }

        if presence.type_ == PresenceType::Unavailable {
            if let Some(new_nick) = renamed_to(&muc_user) {
                debug!(room = %room, from = %nick, to = %new_nick, "MUC occupant renamed");
                self.publish(
                    "xmpp.muc.occupant.changed",
                    EventPayload::MucOccupantChanged {
                        room: room.clone(),
                        occupant: CoreOccupant {
                            nick: new_nick,
                            jid: None,
                            affiliation: CoreAffiliation::None,
                            role: CoreRole::None,
                        },
                    },
                );
                return;
            }

            let reason = leave_reason(&muc_user);
            if is_self {
                debug!(room = %room, ?reason, "left MUC room");
                self.publish(
                    "xmpp.muc.left",
                    EventPayload::MucLeft {
                        room,
                        reason: Some(reason),
                    },
                );
            } else {
                self.emit_occupant_changed(&room, &nick, &muc_user);
            }
            return;
        }

        if is_self {
            debug!(room = %room, nick = %nick, "joined MUC room");
            self.publish(
                "xmpp.muc.joined",
                EventPayload::MucJoined {
                    room: room.clone(),
                    nick: nick.clone(),
                },
            );
        }
        self.emit_occupant_changed(&room, &nick, &muc_user);
    }

    fn emit_occupant_changed(&self, room: &str, nick: &str, muc_user: &MucUser) {
        let Some(item) = muc_user.items.first() else {
            return;
        };

        let occupant = CoreOccupant {
            nick: nick.to_string(),
            jid: item.jid.as_ref().map(|j| j.to_string()),
            affiliation: match item.affiliation {
                xmpp_parsers::muc::user::Affiliation::Owner => CoreAffiliation::Owner,
                xmpp_parsers::muc::user::Affiliation::Admin => CoreAffiliation::Admin,
                xmpp_parsers::muc::user::Affiliation::Member => CoreAffiliation::Member,
                xmpp_parsers::muc::user::Affiliation::Outcast => CoreAffiliation::Outcast,
                xmpp_parsers::muc::user::Affiliation::None => CoreAffiliation::None,
            },
            role: match item.role {
                xmpp_parsers::muc::user::Role::Moderator => CoreRole::Moderator,
                xmpp_parsers::muc::user::Role::Participant => CoreRole::Participant,
                xmpp_parsers::muc::user::Role::Visitor => CoreRole::Visitor,
                xmpp_parsers::muc::user::Role::None => CoreRole::None,
            },
        };

        debug!(room = %room, nick = %nick, "MUC occupant changed");
        self.publish(
            "xmpp.muc.occupant.changed",
            EventPayload::MucOccupantChanged {
                room: room.to_string(),
                occupant,
            },
        );
    }

    #[cfg(feature = "native")]
    fn publish(&self, channel: &str, payload: EventPayload) {
        let _ = self.event_bus.publish(Event::new(
            Channel::new(channel).unwrap(),
            EventSource::Xmpp,
            payload,
        ));
    }

    #[cfg(not(feature = "native"))]
    fn publish(&self, _channel: &str, _payload: EventPayload) {}
}

/// A departing occupant carries status 303 plus a `nick` attribute on its
/// `<item/>` when the departure is a rename, not a real leave.
fn renamed_to(muc_user: &MucUser) -> Option<String> {
    if !muc_user.status.contains(&Status::NewNick) {
        return None;
    }
    muc_user
        .items
        .first()
        .and_then(|item| item.nick.as_ref())
        .map(|n| n.to_string())
}

fn leave_reason(muc_user: &MucUser) -> MucLeaveReason {
    if muc_user.status.contains(&Status::Kicked) {
        MucLeaveReason::Kicked
    } else if muc_user.status.contains(&Status::Banned) {
        MucLeaveReason::Banned
    } else {
        MucLeaveReason::Left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUC_MESSAGE_XML: &[u8] = b"<message xmlns='jabber:client' type='groupchat' \
        from='room@conference.example.com/alice' to='bob@example.com' id='muc-1'>\
        <body>Hello everyone!</body>\
    </message>";

    const MUC_SUBJECT_XML: &[u8] = b"<message xmlns='jabber:client' type='groupchat' \
        from='room@conference.example.com/alice' to='bob@example.com'>\
        <subject>New topic</subject>\
    </message>";

    const MUC_PRESENCE_XML: &[u8] = b"<presence xmlns='jabber:client' \
        from='room@conference.example.com/bob'>\
        <x xmlns='http://jabber.org/protocol/muc#user'>\
            <item affiliation='member' role='participant'/>\
            <status code='110'/>\
        </x>\
    </presence>";

    const MUC_KICK_XML: &[u8] = b"<presence xmlns='jabber:client' type='unavailable' \
        from='room@conference.example.com/bob'>\
        <x xmlns='http://jabber.org/protocol/muc#user'>\
            <item affiliation='none' role='none'/>\
            <status code='307'/>\
            <status code='110'/>\
        </x>\
    </presence>";

    const MUC_RENAME_XML: &[u8] = b"<presence xmlns='jabber:client' type='unavailable' \
        from='room@conference.example.com/bob'>\
        <x xmlns='http://jabber.org/protocol/muc#user'>\
            <item nick='bob2'/>\
            <status code='303'/>\
        </x>\
    </presence>";

    #[test]
    fn parses_muc_message() {
        let stanza = Stanza::parse(MUC_MESSAGE_XML).unwrap();
        let Stanza::Message(msg) = &stanza else {
            panic!("expected message");
        };
        assert_eq!(msg.type_, MessageType::Groupchat);
    }

    #[test]
    fn parses_muc_subject() {
        let stanza = Stanza::parse(MUC_SUBJECT_XML).unwrap();
        let Stanza::Message(msg) = &stanza else {
            panic!("expected message");
        };
        assert!(msg.get_best_subject(vec![]).is_some());
    }

    #[test]
    fn parses_muc_presence() {
        let stanza = Stanza::parse(MUC_PRESENCE_XML).unwrap();
        let Stanza::Presence(presence) = &stanza else {
            panic!("expected presence");
        };
        let muc_user = presence
            .payloads
            .iter()
            .find_map(|el| MucUser::try_from(el.clone()).ok());
        assert!(muc_user.is_some());
        let muc_user = muc_user.unwrap();
        assert!(muc_user.status.contains(&Status::SelfPresence));
    }

    #[test]
    fn classifies_kick_status_code() {
        let stanza = Stanza::parse(MUC_KICK_XML).unwrap();
        let Stanza::Presence(presence) = &stanza else {
            panic!("expected presence");
        };
        let muc_user = presence
            .payloads
            .iter()
            .find_map(|el| MucUser::try_from(el.clone()).ok())
            .unwrap();
        assert_eq!(leave_reason(&muc_user), MucLeaveReason::Kicked);
    }

    #[test]
    fn detects_rename_via_303_and_nick_attribute() {
        let stanza = Stanza::parse(MUC_RENAME_XML).unwrap();
        let Stanza::Presence(presence) = &stanza else {
            panic!("expected presence");
        };
        let muc_user = presence
            .payloads
            .iter()
            .find_map(|el| MucUser::try_from(el.clone()).ok())
            .unwrap();
        assert_eq!(renamed_to(&muc_user), Some("bob2".to_string()));
    }
}
