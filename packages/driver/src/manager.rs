use crate::driver::{ControllerCallback, Driver, DriverInput, DriverOptions};
use crate::error::Result;
use crate::notify::{WatcherCallback, WatcherId, Watchers};
use homewave_core::prelude::*;
use homewave_logging::{LogSink, NullLogger};
use homewave_serial::port::{SerialBinding, SerialPort};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use typed_builder::TypedBuilder;

#[derive(TypedBuilder)]
pub struct ManagerOptions {
    /// Where config files are written and restored from.
    #[builder(setter(into))]
    pub user_path: PathBuf,
    #[builder(default = Arc::new(NullLogger))]
    pub log_sink: Arc<dyn LogSink>,
    /// Seconds for one full pass over the poll-enabled nodes.
    #[builder(default = 30)]
    pub poll_interval: u64,
}

/// The application's entry point: a registry of drivers keyed by Home
/// ID plus the shared notification bus. Create one, pass it around by
/// reference, and destroy it on the way out. All calls are
/// non-blocking: they enqueue work for the driver actor and return.
pub struct Manager {
    options: ManagerOptions,
    watchers: Arc<Watchers>,
    drivers: Arc<Mutex<HashMap<HomeId, Driver>>>,
    ports: Mutex<HashMap<String, Driver>>,
}

impl Manager {
    pub fn new(options: ManagerOptions) -> Self {
        Self {
            options,
            watchers: Arc::new(Watchers::new()),
            drivers: Arc::new(Mutex::new(HashMap::new())),
            ports: Mutex::new(HashMap::new()),
        }
    }

    /// Shorthand for the common case: config files under `user_path`,
    /// no logging.
    pub fn create(user_path: impl Into<PathBuf>) -> Self {
        Self::new(ManagerOptions::builder().user_path(user_path).build())
    }

    // ---- drivers --------------------------------------------------------

    /// Opens a serial port and binds a driver to the controller on it.
    pub fn add_driver(&self, port: &str) -> Result<()> {
        let serial = SerialPort::open(port)?;
        self.add_driver_with(serial, port);
        Ok(())
    }

    /// Binds a driver to an already-opened port. This is how tests and
    /// replay tools connect a mock controller.
    pub fn add_driver_with<P: SerialBinding>(&self, binding: P, port_name: &str) -> bool {
        let mut ports = self.ports.lock().expect("port map poisoned");
        if ports.contains_key(port_name) {
            return false;
        }
        let options = DriverOptions::builder()
            .user_path(self.options.user_path.clone())
            .log_sink(self.options.log_sink.clone())
            .poll_interval(self.options.poll_interval)
            .build();
        let driver = Driver::start(
            binding,
            options,
            self.watchers.clone(),
            self.drivers.clone(),
            port_name,
        );
        ports.insert(port_name.to_string(), driver);
        true
    }

    /// Stops the driver on a port, writing its config file first.
    pub fn remove_driver(&self, port: &str) -> bool {
        let Some(driver) = self.ports.lock().expect("port map poisoned").remove(port) else {
            return false;
        };
        if let Some(home_id) = driver.home_id() {
            self.drivers
                .lock()
                .expect("driver registry poisoned")
                .remove(&home_id);
        }
        driver.send_input(DriverInput::WriteConfig { reply: None });
        let (tx, _rx) = oneshot::channel();
        driver.send_input(DriverInput::Shutdown { reply: tx });
        true
    }

    /// Stops every driver. The manager is unusable afterwards.
    pub fn destroy(&self) {
        let ports: Vec<String> = self
            .ports
            .lock()
            .expect("port map poisoned")
            .keys()
            .cloned()
            .collect();
        for port in ports {
            self.remove_driver(&port);
        }
    }

    fn driver_for(&self, home_id: HomeId) -> Option<Driver> {
        self.drivers
            .lock()
            .expect("driver registry poisoned")
            .get(&home_id)
            .cloned()
    }

    // ---- watchers -------------------------------------------------------

    pub fn add_watcher(&self, callback: WatcherCallback) -> WatcherId {
        self.watchers.add(callback)
    }

    pub fn remove_watcher(&self, id: WatcherId) -> bool {
        self.watchers.remove(id)
    }

    // ---- node queries ---------------------------------------------------

    pub fn get_controller_node_id(&self, home_id: HomeId) -> Option<NodeId> {
        self.driver_for(home_id)
            .map(|driver| driver.storage.own_node_id())
    }

    pub fn get_node_ids(&self, home_id: HomeId) -> Vec<NodeId> {
        self.driver_for(home_id)
            .map(|driver| driver.storage.nodes().keys().copied().collect())
            .unwrap_or_default()
    }

    fn read_node<T>(
        &self,
        home_id: HomeId,
        node: NodeId,
        read: impl FnOnce(&crate::node::NodeRecord) -> T,
    ) -> Option<T> {
        let driver = self.driver_for(home_id)?;
        let nodes = driver.storage.nodes();
        nodes.get(&node).map(read)
    }

    pub fn is_node_listening(&self, home_id: HomeId, node: NodeId) -> bool {
        self.read_node(home_id, node, |record| record.listening())
            .unwrap_or(false)
    }

    pub fn is_node_routing(&self, home_id: HomeId, node: NodeId) -> bool {
        self.read_node(home_id, node, |record| {
            record.protocol_info.map(|info| info.routing).unwrap_or(false)
        })
        .unwrap_or(false)
    }

    pub fn is_node_beaming(&self, home_id: HomeId, node: NodeId) -> bool {
        self.read_node(home_id, node, |record| {
            record.protocol_info.map(|info| info.beaming).unwrap_or(false)
        })
        .unwrap_or(false)
    }

    pub fn get_node_max_baud_rate(&self, home_id: HomeId, node: NodeId) -> u32 {
        self.read_node(home_id, node, |record| {
            record
                .protocol_info
                .map(|info| info.max_baud_rate)
                .unwrap_or(0)
        })
        .unwrap_or(0)
    }

    pub fn get_node_device_class(&self, home_id: HomeId, node: NodeId) -> Option<DeviceClass> {
        self.read_node(home_id, node, |record| {
            record.protocol_info.map(|info| info.device_class)
        })
        .flatten()
    }

    /// The manufacturer id as the conventional 16-bit hex string.
    pub fn get_node_manufacturer_id(&self, home_id: HomeId, node: NodeId) -> String {
        self.read_node(home_id, node, |record| {
            record
                .manufacturer_id
                .map(|id| format!("0x{:04x}", id))
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn get_node_product_type(&self, home_id: HomeId, node: NodeId) -> String {
        self.read_node(home_id, node, |record| {
            record
                .product_type
                .map(|id| format!("0x{:04x}", id))
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn get_node_product_id(&self, home_id: HomeId, node: NodeId) -> String {
        self.read_node(home_id, node, |record| {
            record
                .product_id
                .map(|id| format!("0x{:04x}", id))
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn get_node_manufacturer_name(&self, home_id: HomeId, node: NodeId) -> String {
        self.read_node(home_id, node, |record| record.manufacturer_name.clone())
            .unwrap_or_default()
    }

    pub fn get_node_product_name(&self, home_id: HomeId, node: NodeId) -> String {
        self.read_node(home_id, node, |record| record.product_name.clone())
            .unwrap_or_default()
    }

    pub fn get_node_name(&self, home_id: HomeId, node: NodeId) -> String {
        self.read_node(home_id, node, |record| record.name.clone())
            .unwrap_or_default()
    }

    pub fn get_node_location(&self, home_id: HomeId, node: NodeId) -> String {
        self.read_node(home_id, node, |record| record.location.clone())
            .unwrap_or_default()
    }

    pub fn set_node_name(&self, home_id: HomeId, node: NodeId, name: &str) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        driver.send_input(DriverInput::SetNodeName {
            node,
            name: name.to_string(),
        })
    }

    pub fn set_node_location(&self, home_id: HomeId, node: NodeId, location: &str) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        driver.send_input(DriverInput::SetNodeLocation {
            node,
            location: location.to_string(),
        })
    }

    /// Forces a full re-interview of a node, the only sanctioned way to
    /// regress its interview state.
    pub fn refresh_node_info(&self, home_id: HomeId, node: NodeId) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        driver.send_input(DriverInput::RefreshNode { node })
    }

    // ---- values ---------------------------------------------------------

    /// Every value a node owns, in display order.
    pub fn get_all_values(&self, home_id: HomeId, node: NodeId) -> Vec<ValueId> {
        self.driver_for(home_id)
            .map(|driver| {
                driver
                    .storage
                    .values()
                    .node_values(node)
                    .map(|value| value.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read_value<T>(&self, value_id: &ValueId, read: impl FnOnce(&Value) -> T) -> Option<T> {
        let driver = self.driver_for(value_id.home_id())?;
        let values = driver.storage.values();
        values.get(value_id).map(read)
    }

    pub fn get_value_label(&self, value_id: &ValueId) -> String {
        self.read_value(value_id, |value| value.meta.label.clone())
            .unwrap_or_default()
    }

    pub fn get_value_units(&self, value_id: &ValueId) -> String {
        self.read_value(value_id, |value| value.meta.units.clone())
            .unwrap_or_default()
    }

    pub fn is_value_read_only(&self, value_id: &ValueId) -> bool {
        self.read_value(value_id, |value| value.meta.read_only)
            .unwrap_or(false)
    }

    pub fn get_value_as_bool(&self, value_id: &ValueId) -> Option<bool> {
        self.read_value(value_id, |value| match &value.data {
            ValueData::Bool(b) => Some(*b),
            _ => None,
        })
        .flatten()
    }

    pub fn get_value_as_byte(&self, value_id: &ValueId) -> Option<u8> {
        self.read_value(value_id, |value| match &value.data {
            ValueData::Byte(b) => Some(*b),
            _ => None,
        })
        .flatten()
    }

    pub fn get_value_as_short(&self, value_id: &ValueId) -> Option<i16> {
        self.read_value(value_id, |value| match &value.data {
            ValueData::Short(s) => Some(*s),
            _ => None,
        })
        .flatten()
    }

    pub fn get_value_as_int(&self, value_id: &ValueId) -> Option<i32> {
        self.read_value(value_id, |value| match &value.data {
            ValueData::Int(i) => Some(*i),
            _ => None,
        })
        .flatten()
    }

    /// Decimal values parse on the way out so float drift never enters
    /// the store.
    pub fn get_value_as_float(&self, value_id: &ValueId) -> Option<f64> {
        self.read_value(value_id, |value| match &value.data {
            ValueData::Decimal(s) => s.parse().ok(),
            _ => None,
        })
        .flatten()
    }

    pub fn get_value_as_string(&self, value_id: &ValueId) -> Option<String> {
        self.read_value(value_id, |value| value.data.to_display_string())
    }

    pub fn get_value_list_selection(&self, value_id: &ValueId) -> Option<String> {
        self.read_value(value_id, |value| match &value.data {
            ValueData::List(list) => list.selection().map(|item| item.label.clone()),
            _ => None,
        })
        .flatten()
    }

    pub fn get_value_list_items(&self, value_id: &ValueId) -> Vec<String> {
        self.read_value(value_id, |value| match &value.data {
            ValueData::List(list) => list.items.iter().map(|item| item.label.clone()).collect(),
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }

    /// The common path of every typed setter: validate against the
    /// current snapshot, then hand the write to the driver actor. A
    /// `false` means the value is unknown, read-only, or of the wrong
    /// type; no notification is ever raised for a rejected call.
    fn set_value(&self, value_id: &ValueId, data: ValueData) -> bool {
        let Some(driver) = self.driver_for(value_id.home_id()) else {
            return false;
        };
        if driver.is_failed() {
            return false;
        }
        let valid = {
            let values = driver.storage.values();
            match values.get(value_id) {
                Some(value) => {
                    !value.meta.read_only && value.data.value_type() == data.value_type()
                }
                None => false,
            }
        };
        if !valid {
            return false;
        }
        driver.send_input(DriverInput::SetValue {
            value_id: *value_id,
            data,
        })
    }

    pub fn set_value_bool(&self, value_id: &ValueId, value: bool) -> bool {
        self.set_value(value_id, ValueData::Bool(value))
    }

    pub fn set_value_byte(&self, value_id: &ValueId, value: u8) -> bool {
        self.set_value(value_id, ValueData::Byte(value))
    }

    pub fn set_value_short(&self, value_id: &ValueId, value: i16) -> bool {
        self.set_value(value_id, ValueData::Short(value))
    }

    pub fn set_value_int(&self, value_id: &ValueId, value: i32) -> bool {
        self.set_value(value_id, ValueData::Int(value))
    }

    pub fn set_value_string(&self, value_id: &ValueId, value: &str) -> bool {
        self.set_value(value_id, ValueData::String(value.to_string()))
    }

    pub fn set_value_decimal(&self, value_id: &ValueId, value: &str) -> bool {
        if value.parse::<f64>().is_err() {
            return false;
        }
        self.set_value(value_id, ValueData::Decimal(value.to_string()))
    }

    /// Sets any value from its string form; lists select by label.
    pub fn set_value_from_string(&self, value_id: &ValueId, value: &str) -> bool {
        match value_id.value_type() {
            ValueType::List => self.set_value_list_selection(value_id, value),
            ValueType::Button => false,
            value_type => match ValueData::parse_as(value_type, value) {
                Some(data) => self.set_value(value_id, data),
                None => false,
            },
        }
    }

    /// Changes a list selection. An unknown label is rejected here and
    /// never reaches the driver.
    pub fn set_value_list_selection(&self, value_id: &ValueId, label: &str) -> bool {
        let Some(driver) = self.driver_for(value_id.home_id()) else {
            return false;
        };
        let valid = {
            let values = driver.storage.values();
            match values.get(value_id) {
                Some(Value {
                    data: ValueData::List(list),
                    meta,
                    ..
                }) => !meta.read_only && list.items.iter().any(|item| item.label == label),
                _ => false,
            }
        };
        if !valid {
            return false;
        }
        driver.send_input(DriverInput::SelectListLabel {
            value_id: *value_id,
            label: label.to_string(),
        })
    }

    pub fn press_button(&self, value_id: &ValueId) -> bool {
        self.set_button(value_id, true)
    }

    pub fn release_button(&self, value_id: &ValueId) -> bool {
        self.set_button(value_id, false)
    }

    fn set_button(&self, value_id: &ValueId, pressed: bool) -> bool {
        if value_id.value_type() != ValueType::Button {
            return false;
        }
        let Some(driver) = self.driver_for(value_id.home_id()) else {
            return false;
        };
        let exists = driver.storage.values().contains(value_id);
        if !exists {
            return false;
        }
        driver.send_input(DriverInput::SetButton {
            value_id: *value_id,
            pressed,
        })
    }

    // ---- configuration parameters ---------------------------------------

    /// Writes a device config parameter. The encoder picks 1, 2 or 4
    /// bytes from the magnitude of `value`.
    pub fn set_config_param(
        &self,
        home_id: HomeId,
        node: NodeId,
        param: u8,
        value: i32,
    ) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        if !self.node_supports(&driver, node, CommandClassId::Configuration) {
            return false;
        }
        driver.send_input(DriverInput::SetConfigParam { node, param, value })
    }

    pub fn request_config_param(&self, home_id: HomeId, node: NodeId, param: u8) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        if !self.node_supports(&driver, node, CommandClassId::Configuration) {
            return false;
        }
        driver.send_input(DriverInput::RequestConfigParam { node, param })
    }

    fn node_supports(&self, driver: &Driver, node: NodeId, class: CommandClassId) -> bool {
        driver
            .storage
            .nodes()
            .get(&node)
            .map(|record| record.classes.contains_key(&class))
            .unwrap_or(false)
    }

    // ---- association groups ---------------------------------------------

    pub fn get_num_groups(&self, home_id: HomeId, node: NodeId) -> u8 {
        self.read_node(home_id, node, |record| record.group_count)
            .unwrap_or(0)
    }

    /// The members of one group, returned by value.
    pub fn get_associations(&self, home_id: HomeId, node: NodeId, group: u8) -> Vec<NodeId> {
        self.read_node(home_id, node, |record| {
            record
                .groups
                .get(&group)
                .map(|info| info.members.clone())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn add_association(
        &self,
        home_id: HomeId,
        node: NodeId,
        group: u8,
        target: NodeId,
    ) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        if !self.node_supports(&driver, node, CommandClassId::Association) {
            return false;
        }
        driver.send_input(DriverInput::AddAssociation {
            node,
            group,
            target,
        })
    }

    pub fn remove_association(
        &self,
        home_id: HomeId,
        node: NodeId,
        group: u8,
        target: NodeId,
    ) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        if !self.node_supports(&driver, node, CommandClassId::Association) {
            return false;
        }
        driver.send_input(DriverInput::RemoveAssociation {
            node,
            group,
            target,
        })
    }

    // ---- polling --------------------------------------------------------

    pub fn set_poll_interval(&self, home_id: HomeId, seconds: u64) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        driver.send_input(DriverInput::SetPollInterval { seconds })
    }

    pub fn enable_poll(&self, home_id: HomeId, node: NodeId) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        if !driver.storage.nodes().contains_key(&node) {
            return false;
        }
        driver.send_input(DriverInput::EnablePoll { node })
    }

    pub fn disable_poll(&self, home_id: HomeId, node: NodeId) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        driver.send_input(DriverInput::DisablePoll { node })
    }

    // ---- controller commands --------------------------------------------

    pub fn reset_controller(&self, home_id: HomeId) -> bool {
        self.driver_for(home_id)
            .map(|driver| driver.send_input(DriverInput::ResetController))
            .unwrap_or(false)
    }

    pub fn soft_reset(&self, home_id: HomeId) -> bool {
        self.driver_for(home_id)
            .map(|driver| driver.send_input(DriverInput::SoftReset))
            .unwrap_or(false)
    }

    pub fn begin_controller_command(
        &self,
        home_id: HomeId,
        command: ControllerCommand,
        callback: ControllerCallback,
        high_power: bool,
    ) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        driver.send_input(DriverInput::BeginControllerCommand {
            command,
            high_power,
            callback,
        })
    }

    pub fn cancel_controller_command(&self, home_id: HomeId) -> bool {
        self.driver_for(home_id)
            .map(|driver| driver.send_input(DriverInput::CancelControllerCommand))
            .unwrap_or(false)
    }

    pub fn request_node_neighbor_update(&self, home_id: HomeId, node: NodeId) -> bool {
        let Some(driver) = self.driver_for(home_id) else {
            return false;
        };
        driver.send_input(DriverInput::RequestNodeNeighborUpdate { node })
    }

    pub fn request_network_update(&self, home_id: HomeId) -> bool {
        self.driver_for(home_id)
            .map(|driver| driver.send_input(DriverInput::RequestNetworkUpdate))
            .unwrap_or(false)
    }

    // ---- persistence ----------------------------------------------------

    /// Queues a config snapshot and returns immediately.
    pub fn write_config(&self, home_id: HomeId) -> bool {
        self.driver_for(home_id)
            .map(|driver| driver.send_input(DriverInput::WriteConfig { reply: None }))
            .unwrap_or(false)
    }

    /// Writes the config snapshot and waits for the file to hit disk.
    /// The one blocking call in the API, intended for shutdown paths.
    pub async fn write_config_and_wait(&self, home_id: HomeId) -> Result<PathBuf> {
        let driver = self
            .driver_for(home_id)
            .ok_or_else(|| crate::error::Error::State("unknown home id".into()))?;
        let (tx, rx) = oneshot::channel();
        driver.send_input(DriverInput::WriteConfig { reply: Some(tx) });
        rx.await.map_err(|_| crate::error::Error::ShutDown)?
    }
}
