use std::collections::{HashMap, VecDeque};

use tracing::debug;

use super::{Machine, WatchId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Resumed,
    Paused,
    Finish,
    Error,
    ContInvoked,
    Watched,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    Value(Value),
    Watch { id: WatchId, value: Value },
}

pub type HandlerId = u64;

type Handler = Box<dyn FnMut(&mut Machine, &EventPayload)>;

/// Deferred event delivery. Firing only enqueues; nothing runs until the
/// host drains the queue, so handlers never interrupt guest execution and
/// may safely drive the machine themselves.
#[derive(Default)]
pub(crate) struct EventBus {
    handlers: HashMap<Event, Vec<(HandlerId, Handler)>>,
    queue: VecDeque<(Event, EventPayload)>,
    next_handler_id: HandlerId,
}

impl Machine {
    pub fn on(
        &mut self,
        event: Event,
        handler: impl FnMut(&mut Machine, &EventPayload) + 'static,
    ) -> HandlerId {
        let id = self.events.next_handler_id;
        self.events.next_handler_id += 1;
        self.events
            .handlers
            .entry(event)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    pub fn off(&mut self, event: Event, handler: HandlerId) {
        if let Some(list) = self.events.handlers.get_mut(&event) {
            list.retain(|(id, _)| *id != handler);
        }
    }

    pub fn off_all(&mut self, event: Event) {
        self.events.handlers.remove(&event);
    }

    /// Queue an event for the next pump.
    pub fn fire(&mut self, event: Event, payload: EventPayload) {
        debug!(?event, "event queued");
        self.events.queue.push_back((event, payload));
    }

    /// Deliver everything queued so far, including events the handlers
    /// cause in turn. Handlers are taken out of the bus while they run so
    /// they can re-enter the machine.
    pub fn pump_events(&mut self) {
        while let Some((event, payload)) = self.events.queue.pop_front() {
            let mut handlers = self.events.handlers.remove(&event).unwrap_or_default();
            for (_, handler) in handlers.iter_mut() {
                handler(self, &payload);
            }
            // keep subscriptions made during delivery
            let added = self.events.handlers.remove(&event).unwrap_or_default();
            handlers.extend(added);
            if !handlers.is_empty() {
                self.events.handlers.insert(event, handlers);
            }
        }
    }

    pub fn pending_events(&self) -> usize {
        self.events.queue.len()
    }
}
