use homewave_core::prelude::*;
use homewave_serial::message::Message;

/// Where command classes enqueue their outbound frames. Implemented by
/// the driver's send scheduler.
pub trait MessageSink {
    fn send(&mut self, message: Message, priority: SendPriority);
}

/// Facts a command class learns that belong to the node model rather
/// than the value store. Applied by the driver after dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum CcSideEffect {
    Manufacturer {
        manufacturer_id: u16,
        product_type: u16,
        product_id: u16,
    },
    ClassVersion {
        class: CommandClassId,
        version: u8,
    },
    InstanceCount {
        class: CommandClassId,
        count: u8,
    },
    GroupCount {
        count: u8,
    },
    Group {
        index: u8,
        max_members: u8,
        members: Vec<NodeId>,
    },
}

/// A report the interview should wait for after a class queued a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedReport {
    pub class: CommandClassId,
    pub command: u8,
}

/// The narrow handle a command class works through: the value store,
/// the send queue, and the outgoing notification batch. Built fresh by
/// the driver for every call into a class.
pub struct CcContext<'a> {
    pub home_id: HomeId,
    pub node_id: NodeId,
    pub own_node_id: NodeId,
    pub store: &'a mut ValueStore,
    pub sink: &'a mut dyn MessageSink,
    pub notifications: &'a mut Vec<Notification>,
    pub effects: &'a mut Vec<CcSideEffect>,
    pub expected: &'a mut Vec<ExpectedReport>,
}

impl CcContext<'_> {
    pub fn value_id(
        &self,
        class: CommandClassId,
        genre: ValueGenre,
        instance: u8,
        index: u8,
        value_type: ValueType,
    ) -> ValueId {
        ValueId::new(
            self.home_id,
            self.node_id,
            genre,
            class as u8,
            instance,
            index,
            value_type,
        )
    }

    /// Registers a value the owning class created. Raises `ValueAdded`
    /// (or `CreateButton` for buttons) exactly once per id.
    pub fn add_value(&mut self, value: Value) {
        let id = value.id;
        let is_button = id.value_type() == ValueType::Button;
        if self.store.insert(value) {
            self.notifications.push(if is_button {
                Notification::CreateButton { value_id: id }
            } else {
                Notification::ValueAdded { value_id: id }
            });
        }
    }

    /// Writes a decoded payload with change detection. Equal payloads
    /// raise nothing; that is what makes optimistic sets idempotent.
    pub fn write_value(&mut self, id: &ValueId, data: ValueData) {
        if let Some(WriteOutcome::Changed) = self.store.write(id, data) {
            self.notifications.push(Notification::ValueChanged { value_id: *id });
        }
    }

    /// Creates the value on first sight, otherwise writes with change
    /// detection. Used by classes that discover values from reports.
    pub fn upsert_value(&mut self, value: Value) {
        let id = value.id;
        match self.store.upsert(value) {
            WriteOutcome::Added => self.notifications.push(Notification::ValueAdded { value_id: id }),
            WriteOutcome::Changed => {
                self.notifications.push(Notification::ValueChanged { value_id: id })
            }
            WriteOutcome::Unchanged => {}
        }
    }

    /// Enqueues a command-class payload to this node at application
    /// priority.
    pub fn send_to_node(&mut self, class_payload: &[u8]) {
        let message = Message::send_data(self.node_id, class_payload);
        self.sink.send(message, SendPriority::Application);
    }

    /// Tells the interview which report will answer the query the class
    /// just queued.
    pub fn expect_report(&mut self, class: CommandClassId, command: u8) {
        self.expected.push(ExpectedReport { class, command });
    }
}
