//! Roster (component F) and MUC room model (component G).
//!
//! Owns the authoritative in-memory contact list: mutable `Contact`/
//! `Resource` state rather than a passive cache of presence deltas. MUC
//! rooms are contacts of [`ContactKind::Chatroom`] whose resources are
//! occupant nicknames, so join/leave/rename all fall out of the same
//! resource map operations buddies use.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::debug;

use wisp_core::event::{MucAffiliation, MucRole, Subscription};
use wisp_xmpp::{PipelineError, Stanza};

#[cfg(feature = "native")]
use std::sync::Arc;
#[cfg(feature = "native")]
use wisp_core::event::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("unknown contact: {0}")]
    UnknownContact(String),

    #[error("unknown resource {resource} for {jid}")]
    UnknownResource { jid: String, resource: String },

    #[error("event bus error: {0}")]
    EventBus(String),

    #[error("failed to build MUC presence stanza: {0}")]
    StanzaBuild(String),
}

/// Presence availability of a single resource. Distinct from
/// [`wisp_core::event::ChatState`], which tracks XEP-0085 typing
/// notifications rather than `<show/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceShow {
    Available,
    Chat,
    Away,
    Dnd,
    Xa,
    Unavailable,
}

impl Default for PresenceShow {
    fn default() -> Self {
        PresenceShow::Unavailable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactKind {
    Buddy,
    Group,
    Chatroom,
}

/// How [`Roster::setuiprio`] combines a new value with the existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiPrioOp {
    Set,
    MaxKeep,
    Add,
}

/// One connected resource (a `/resource` suffix on a buddy, or an occupant
/// nickname inside a chatroom).
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub priority: i8,
    pub show: PresenceShow,
    pub status_msg: Option<String>,
    pub last_updated: DateTime<Utc>,
    /// Only meaningful for chatroom occupants (component G).
    pub role: MucRole,
    pub affiliation: MucAffiliation,
    pub real_jid: Option<String>,
}

impl Resource {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            show: PresenceShow::Unavailable,
            status_msg: None,
            last_updated: Utc::now(),
            role: MucRole::None,
            affiliation: MucAffiliation::None,
            real_jid: None,
        }
    }
}

pub struct Contact {
    pub jid: String,
    pub name: Option<String>,
    pub group: Option<String>,
    pub kind: ContactKind,
    pub subscription: Subscription,
    pub resources: HashMap<String, Resource>,
    pub active_resource: Option<String>,
    pub ui_prio: u32,
    pub flags: u32,
}

impl Contact {
    fn new(jid: impl Into<String>, kind: ContactKind) -> Self {
        Self {
            jid: jid.into(),
            name: None,
            group: None,
            kind,
            subscription: Subscription::None,
            resources: HashMap::new(),
            active_resource: None,
            ui_prio: 0,
            flags: 0,
        }
    }

    /// The resource picked by `getactiveresource` absent an explicit
    /// override: highest priority, ties broken by most recent update. See
    /// `crates/presence/src/lib.rs`'s `best_presence` for the original
    /// shape this mirrors.
    fn best_resource(&self) -> Option<&Resource> {
        self.resources.values().max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.last_updated.cmp(&b.last_updated))
        })
    }
}

/// Bitset of status values a contact can be filtered by in
/// [`Roster::buddylist_build`]. Matches the `online`/`away`/`offline`
/// filter bits mcabber's roster listing toggles independently.
pub mod filter {
    pub const ONLINE: u32 = 1 << 0;
    pub const AWAY: u32 = 1 << 1;
    pub const DND: u32 = 1 << 2;
    pub const OFFLINE: u32 = 1 << 3;
    pub const ALL: u32 = ONLINE | AWAY | DND | OFFLINE;
}

/// Builds the presence that joins `room` under `nick`, per SPEC_FULL.md
/// §4.G's join flow: a plain presence to `room/nick` carrying a
/// `<x xmlns='http://jabber.org/protocol/muc'>` child, with a `<password>`
/// grandchild when the room requires one.
pub fn join_presence(room_jid: &str, nick: &str, password: Option<&str>) -> Result<Stanza, RosterError> {
    let password_child = password
        .map(|p| format!("<password>{}</password>", xml_escape(p)))
        .unwrap_or_default();
    let xml = format!(
        "<presence xmlns='jabber:client' to='{}/{}'>\
             <x xmlns='http://jabber.org/protocol/muc'>{password_child}</x>\
         </presence>",
        xml_escape(room_jid),
        xml_escape(nick),
    );
    Stanza::parse(xml.as_bytes()).map_err(pipeline_error_to_roster)
}

/// Builds the unavailable presence that leaves `room/nick`.
pub fn leave_presence(room_jid: &str, nick: &str) -> Result<Stanza, RosterError> {
    let xml = format!(
        "<presence xmlns='jabber:client' type='unavailable' to='{}/{}'/>",
        xml_escape(room_jid),
        xml_escape(nick),
    );
    Stanza::parse(xml.as_bytes()).map_err(pipeline_error_to_roster)
}

fn pipeline_error_to_roster(error: PipelineError) -> RosterError {
    RosterError::StanzaBuild(error.to_string())
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

pub struct Roster {
    contacts: RwLock<HashMap<String, Contact>>,
    filter: RwLock<u32>,
    #[cfg(feature = "native")]
    #[allow(dead_code)]
    event_bus: Arc<dyn EventBus>,
}

impl Roster {
    #[cfg(feature = "native")]
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            contacts: RwLock::new(HashMap::new()),
            filter: RwLock::new(filter::ALL),
            event_bus,
        }
    }

    #[cfg(not(feature = "native"))]
    pub fn new() -> Self {
        Self {
            contacts: RwLock::new(HashMap::new()),
            filter: RwLock::new(filter::ALL),
        }
    }

    /// Returns the bare JIDs of every contact whose kind is set in
    /// `kind_mask` (a bitmask over [`ContactKind`] cast to its discriminant).
    pub fn find(&self, jid: &str, kind_mask: Option<ContactKind>) -> Vec<String> {
        let contacts = self.contacts.read().unwrap();
        contacts
            .values()
            .filter(|c| c.jid == jid || jid.is_empty())
            .filter(|c| kind_mask.map_or(true, |mask| c.kind == mask))
            .map(|c| c.jid.clone())
            .collect()
    }

    pub fn add_user(
        &self,
        jid: &str,
        name: Option<&str>,
        group: Option<&str>,
        kind: ContactKind,
        subscription: Subscription,
    ) {
        let mut contacts = self.contacts.write().unwrap();
        let contact = contacts
            .entry(jid.to_string())
            .or_insert_with(|| Contact::new(jid, kind));
        contact.name = name.map(String::from).or_else(|| contact.name.take());
        contact.group = group.map(String::from).or_else(|| contact.group.take());
        contact.subscription = subscription;
        debug!(jid, "roster contact added or updated");
    }

    pub fn del_user(&self, jid: &str) -> Result<(), RosterError> {
        let mut contacts = self.contacts.write().unwrap();
        contacts
            .remove(jid)
            .map(|_| ())
            .ok_or_else(|| RosterError::UnknownContact(jid.to_string()))?;
        // removing the last member of a group drops the group entry too
        let remaining_in_group: Vec<String> = contacts
            .values()
            .filter(|c| c.kind == ContactKind::Group)
            .map(|c| c.jid.clone())
            .collect();
        for group_jid in remaining_in_group {
            let has_members = contacts
                .values()
                .any(|c| c.group.as_deref() == Some(group_jid.as_str()));
            if !has_members {
                contacts.remove(&group_jid);
            }
        }
        debug!(jid, "roster contact removed");
        Ok(())
    }

    /// Updates (or inserts) one resource's presence, including the
    /// MUC-specific role/affiliation/real-JID fields component G always
    /// writes through on every occupant presence.
    #[allow(clippy::too_many_arguments)]
    pub fn setstatus(
        &self,
        jid: &str,
        resource: &str,
        priority: i8,
        show: PresenceShow,
        status_msg: Option<&str>,
        role: MucRole,
        affiliation: MucAffiliation,
        real_jid: Option<&str>,
    ) -> Result<(), RosterError> {
        let mut contacts = self.contacts.write().unwrap();
        let contact = contacts
            .get_mut(jid)
            .ok_or_else(|| RosterError::UnknownContact(jid.to_string()))?;

        if matches!(show, PresenceShow::Unavailable) {
            contact.resources.remove(resource);
            if contact.active_resource.as_deref() == Some(resource) {
                contact.active_resource = None;
            }
            return Ok(());
        }

        let entry = contact
            .resources
            .entry(resource.to_string())
            .or_insert_with(|| Resource::new(resource));
        entry.priority = priority;
        entry.show = show;
        entry.status_msg = status_msg.map(String::from);
        entry.last_updated = Utc::now();
        entry.role = role;
        entry.affiliation = affiliation;
        entry.real_jid = real_jid.map(String::from);
        Ok(())
    }

    pub fn setflag(&self, jid: &str, mask: u32, value: bool) -> Result<(), RosterError> {
        let mut contacts = self.contacts.write().unwrap();
        let contact = contacts
            .get_mut(jid)
            .ok_or_else(|| RosterError::UnknownContact(jid.to_string()))?;
        if value {
            contact.flags |= mask;
        } else {
            contact.flags &= !mask;
        }
        Ok(())
    }

    /// The resource `setactiveresource` pinned, or the highest-priority
    /// resource if none was pinned, or `None` if the contact has no
    /// resources online.
    pub fn getactiveresource(&self, jid: &str) -> Option<String> {
        let contacts = self.contacts.read().unwrap();
        let contact = contacts.get(jid)?;
        if let Some(active) = &contact.active_resource {
            if contact.resources.contains_key(active) {
                return Some(active.clone());
            }
        }
        contact.best_resource().map(|r| r.name.clone())
    }

    pub fn setactiveresource(&self, jid: &str, resource: &str) -> Result<(), RosterError> {
        let mut contacts = self.contacts.write().unwrap();
        let contact = contacts
            .get_mut(jid)
            .ok_or_else(|| RosterError::UnknownContact(jid.to_string()))?;
        if !contact.resources.contains_key(resource) {
            return Err(RosterError::UnknownResource {
                jid: jid.to_string(),
                resource: resource.to_string(),
            });
        }
        contact.active_resource = Some(resource.to_string());
        Ok(())
    }

    pub fn getresources(&self, jid: &str) -> Vec<String> {
        let contacts = self.contacts.read().unwrap();
        contacts
            .get(jid)
            .map(|c| c.resources.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn getstatusmsg(&self, jid: &str, resource: &str) -> Option<String> {
        let contacts = self.contacts.read().unwrap();
        contacts
            .get(jid)?
            .resources
            .get(resource)?
            .status_msg
            .clone()
    }

    pub fn getuiprio(&self, jid: &str) -> Option<u32> {
        let contacts = self.contacts.read().unwrap();
        contacts.get(jid).map(|c| c.ui_prio)
    }

    pub fn setuiprio(&self, jid: &str, value: u32, op: UiPrioOp) -> Result<(), RosterError> {
        let mut contacts = self.contacts.write().unwrap();
        let contact = contacts
            .get_mut(jid)
            .ok_or_else(|| RosterError::UnknownContact(jid.to_string()))?;
        contact.ui_prio = match op {
            UiPrioOp::Set => value,
            UiPrioOp::MaxKeep => contact.ui_prio.max(value),
            UiPrioOp::Add => contact.ui_prio.saturating_add(value),
        };
        Ok(())
    }

    /// Flattens the roster into the JIDs visible under the current status
    /// filter, sorted by descending UI priority then JID so unread contacts
    /// always float to the top.
    pub fn buddylist_build(&self) -> Vec<String> {
        let active_filter = *self.filter.read().unwrap();
        let contacts = self.contacts.read().unwrap();
        let mut visible: Vec<&Contact> = contacts
            .values()
            .filter(|c| contact_matches_filter(c, active_filter))
            .collect();
        visible.sort_by(|a, b| b.ui_prio.cmp(&a.ui_prio).then(a.jid.cmp(&b.jid)));
        visible.into_iter().map(|c| c.jid.clone()).collect()
    }

    pub fn set_filter(&self, mask: u32) {
        *self.filter.write().unwrap() = mask;
    }
}

fn contact_matches_filter(contact: &Contact, active_filter: u32) -> bool {
    match contact.best_resource() {
        None => active_filter & filter::OFFLINE != 0,
        Some(resource) => match resource.show {
            PresenceShow::Available | PresenceShow::Chat => active_filter & filter::ONLINE != 0,
            PresenceShow::Away | PresenceShow::Xa => active_filter & filter::AWAY != 0,
            PresenceShow::Dnd => active_filter & filter::DND != 0,
            PresenceShow::Unavailable => active_filter & filter::OFFLINE != 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "native")]
    fn make_roster() -> Roster {
        use wisp_core::event::BroadcastEventBus;
        Roster::new(Arc::new(BroadcastEventBus::default()))
    }

    #[cfg(not(feature = "native"))]
    fn make_roster() -> Roster {
        Roster::new()
    }

    #[test]
    fn add_and_find_contact() {
        let roster = make_roster();
        roster.add_user(
            "alice@example.com",
            Some("Alice"),
            None,
            ContactKind::Buddy,
            Subscription::Both,
        );
        let found = roster.find("alice@example.com", None);
        assert_eq!(found, vec!["alice@example.com"]);
    }

    #[test]
    fn del_user_removes_empty_group() {
        let roster = make_roster();
        roster.add_user(
            "friends",
            None,
            None,
            ContactKind::Group,
            Subscription::None,
        );
        roster.add_user(
            "alice@example.com",
            None,
            Some("friends"),
            ContactKind::Buddy,
            Subscription::Both,
        );
        roster.del_user("alice@example.com").unwrap();
        assert!(roster.find("friends", None).is_empty());
    }

    #[test]
    fn del_user_unknown_contact_errors() {
        let roster = make_roster();
        let error = roster.del_user("ghost@example.com").unwrap_err();
        assert!(matches!(error, RosterError::UnknownContact(_)));
    }

    #[test]
    fn setstatus_then_best_resource_picks_highest_priority() {
        let roster = make_roster();
        roster.add_user(
            "alice@example.com",
            None,
            None,
            ContactKind::Buddy,
            Subscription::Both,
        );
        roster
            .setstatus(
                "alice@example.com",
                "desktop",
                5,
                PresenceShow::Available,
                None,
                MucRole::None,
                MucAffiliation::None,
                None,
            )
            .unwrap();
        roster
            .setstatus(
                "alice@example.com",
                "mobile",
                10,
                PresenceShow::Away,
                Some("on phone"),
                MucRole::None,
                MucAffiliation::None,
                None,
            )
            .unwrap();

        let active = roster.getactiveresource("alice@example.com").unwrap();
        assert_eq!(active, "mobile");
        assert_eq!(
            roster.getstatusmsg("alice@example.com", "mobile"),
            Some("on phone".to_string())
        );
    }

    #[test]
    fn setstatus_unavailable_removes_resource() {
        let roster = make_roster();
        roster.add_user(
            "alice@example.com",
            None,
            None,
            ContactKind::Buddy,
            Subscription::Both,
        );
        roster
            .setstatus(
                "alice@example.com",
                "desktop",
                0,
                PresenceShow::Available,
                None,
                MucRole::None,
                MucAffiliation::None,
                None,
            )
            .unwrap();
        roster
            .setstatus(
                "alice@example.com",
                "desktop",
                0,
                PresenceShow::Unavailable,
                None,
                MucRole::None,
                MucAffiliation::None,
                None,
            )
            .unwrap();
        assert!(roster.getresources("alice@example.com").is_empty());
        assert!(roster.getactiveresource("alice@example.com").is_none());
    }

    #[test]
    fn setactiveresource_pins_override() {
        let roster = make_roster();
        roster.add_user(
            "alice@example.com",
            None,
            None,
            ContactKind::Buddy,
            Subscription::Both,
        );
        roster
            .setstatus(
                "alice@example.com",
                "desktop",
                10,
                PresenceShow::Available,
                None,
                MucRole::None,
                MucAffiliation::None,
                None,
            )
            .unwrap();
        roster
            .setstatus(
                "alice@example.com",
                "mobile",
                5,
                PresenceShow::Available,
                None,
                MucRole::None,
                MucAffiliation::None,
                None,
            )
            .unwrap();
        roster
            .setactiveresource("alice@example.com", "mobile")
            .unwrap();
        assert_eq!(
            roster.getactiveresource("alice@example.com"),
            Some("mobile".to_string())
        );
    }

    #[test]
    fn setuiprio_ops() {
        let roster = make_roster();
        roster.add_user(
            "alice@example.com",
            None,
            None,
            ContactKind::Buddy,
            Subscription::Both,
        );
        roster
            .setuiprio("alice@example.com", 3, UiPrioOp::Set)
            .unwrap();
        assert_eq!(roster.getuiprio("alice@example.com"), Some(3));

        roster
            .setuiprio("alice@example.com", 1, UiPrioOp::MaxKeep)
            .unwrap();
        assert_eq!(roster.getuiprio("alice@example.com"), Some(3));

        roster
            .setuiprio("alice@example.com", 5, UiPrioOp::MaxKeep)
            .unwrap();
        assert_eq!(roster.getuiprio("alice@example.com"), Some(5));

        roster
            .setuiprio("alice@example.com", 2, UiPrioOp::Add)
            .unwrap();
        assert_eq!(roster.getuiprio("alice@example.com"), Some(7));
    }

    #[test]
    fn buddylist_build_sorts_by_ui_prio_then_jid() {
        let roster = make_roster();
        for jid in ["bob@example.com", "alice@example.com", "carol@example.com"] {
            roster.add_user(jid, None, None, ContactKind::Buddy, Subscription::Both);
        }
        roster
            .setuiprio("carol@example.com", 9, UiPrioOp::Set)
            .unwrap();

        let list = roster.buddylist_build();
        assert_eq!(list[0], "carol@example.com");
        assert_eq!(&list[1..], ["alice@example.com", "bob@example.com"]);
    }

    #[test]
    fn buddylist_build_respects_filter() {
        let roster = make_roster();
        roster.add_user(
            "alice@example.com",
            None,
            None,
            ContactKind::Buddy,
            Subscription::Both,
        );
        roster
            .setstatus(
                "alice@example.com",
                "desktop",
                0,
                PresenceShow::Away,
                None,
                MucRole::None,
                MucAffiliation::None,
                None,
            )
            .unwrap();

        roster.set_filter(filter::ONLINE);
        assert!(roster.buddylist_build().is_empty());

        roster.set_filter(filter::AWAY);
        assert_eq!(roster.buddylist_build(), vec!["alice@example.com"]);
    }

    #[test]
    fn join_presence_carries_muc_namespace_and_password() {
        let stanza = join_presence("room@conference.example.com", "nick", Some("secret")).unwrap();
        assert_eq!(stanza.name(), "presence");
        let bytes = stanza.to_bytes().unwrap();
        let xml = String::from_utf8(bytes).unwrap();
        assert!(xml.contains("http://jabber.org/protocol/muc"));
        assert!(xml.contains("secret"));
    }

    #[test]
    fn join_presence_without_password_has_no_password_child() {
        let stanza = join_presence("room@conference.example.com", "nick", None).unwrap();
        let bytes = stanza.to_bytes().unwrap();
        let xml = String::from_utf8(bytes).unwrap();
        assert!(!xml.contains("password"));
    }

    #[test]
    fn leave_presence_is_type_unavailable() {
        let stanza = leave_presence("room@conference.example.com", "nick").unwrap();
        assert_eq!(stanza.name(), "presence");
    }

    #[test]
    fn setflag_toggles_bits() {
        let roster = make_roster();
        roster.add_user(
            "alice@example.com",
            None,
            None,
            ContactKind::Buddy,
            Subscription::Both,
        );
        roster.setflag("alice@example.com", 0b0010, true).unwrap();
        roster.setflag("alice@example.com", 0b0001, true).unwrap();
        roster.setflag("alice@example.com", 0b0010, false).unwrap();

        let contacts = roster.contacts.read().unwrap();
        assert_eq!(contacts["alice@example.com"].flags, 0b0001);
    }
}
