use std::sync::Arc;

use tracing::{debug, warn};
use xmpp_parsers::{iq::Iq, ns, roster::Roster};

use wisp_core::event::{
    Channel, Event, EventPayload, EventSource, RosterItem, Subscription as CoreSubscription,
};

#[cfg(feature = "native")]
use wisp_core::event::EventBus;

use crate::pipeline::{ProcessorContext, ProcessorResult, StanzaProcessor};
use crate::stanza::Stanza;

pub struct RosterProcessor {
    #[cfg(feature = "native")]
    event_bus: Arc<dyn EventBus>,
}

impl RosterProcessor {
    #[cfg(feature = "native")]
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self { event_bus }
    }
}

impl StanzaProcessor for RosterProcessor {
    fn name(&self) -> &str {
        "roster"
    }

    fn process_inbound(&self, stanza: &mut Stanza, _ctx: &ProcessorContext) -> ProcessorResult {
        let Stanza::Iq(iq) = stanza else {
            return ProcessorResult::Continue;
        };

        match iq.as_ref() {
            Iq::Result {
                payload: Some(payload),
                ..
            } => {
                if !payload.is("query", ns::ROSTER) {
                    return ProcessorResult::Continue;
                }
                let Ok(roster) = Roster::try_from(payload.clone()) else {
                    warn!("failed to parse roster result payload");
                    return ProcessorResult::Continue;
                };
                let items: Vec<RosterItem> = roster.items.iter().map(convert_roster_item).collect();
                debug!(count = items.len(), "roster result received");
                #[cfg(feature = "native")]
                {
                    let _ = self.event_bus.publish(Event::new(
                        Channel::new("xmpp.roster.received").unwrap(),
                        EventSource::Xmpp,
                        EventPayload::RosterReceived { items },
                    ));
                }
            }
            Iq::Set { payload, .. } => {
                if !payload.is("query", ns::ROSTER) {
                    return ProcessorResult::Continue;
                }
                let Ok(roster) = Roster::try_from(payload.clone()) else {
                    warn!("failed to parse roster push payload");
                    return ProcessorResult::Continue;
                };
                for item in &roster.items {
                    let core_item = convert_roster_item(item);
                    if matches!(
                        item.subscription,
                        xmpp_parsers::roster::Subscription::Remove
                    ) {
                        debug!(jid = %item.jid, "roster item removed");
                        #[cfg(feature = "native")]
                        {
                            let _ = self.event_bus.publish(Event::new(
                                Channel::new("xmpp.roster.removed").unwrap(),
                                EventSource::Xmpp,
                                EventPayload::RosterRemoved {
                                    jid: item.jid.to_string(),
                                },
                            ));
                        }
                    } else {
                        debug!(jid = %item.jid, "roster item updated");
                        #[cfg(feature = "native")]
                        {
                            let _ = self.event_bus.publish(Event::new(
                                Channel::new("xmpp.roster.updated").unwrap(),
                                EventSource::Xmpp,
                                EventPayload::RosterUpdated { item: core_item },
                            ));
                        }
                    }
                }
            }
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

fn convert_roster_item(item: &xmpp_parsers::roster::Item) -> RosterItem {
    RosterItem {
        jid: item.jid.to_string(),
        name: item.name.clone(),
        subscription: match item.subscription {
            xmpp_parsers::roster::Subscription::None => CoreSubscription::None,
            xmpp_parsers::roster::Subscription::From => CoreSubscription::From,
            xmpp_parsers::roster::Subscription::To => CoreSubscription::To,
            xmpp_parsers::roster::Subscription::Both => CoreSubscription::Both,
            xmpp_parsers::roster::Subscription::Remove => CoreSubscription::Remove,
        },
        groups: item.groups.iter().map(|g| g.0.clone()).collect(),
    }
}
